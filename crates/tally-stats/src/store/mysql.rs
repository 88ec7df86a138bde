//! MySQL event sink.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::{Captures, Regex};
use sqlx::mysql::{MySql, MySqlPool, MySqlPoolOptions};
use sqlx::QueryBuilder;
use tokio_util::sync::CancellationToken;

use crate::config::DatabaseConfig;
use crate::error::{StatsError, StatsResult};
use crate::event::{Event, INCOMING_FIELDS, INCOMING_TABLE};

use super::EventSink;

/// Matches the `user:password@` part of a connection URL.
static CREDENTIALS_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^([a-z][a-z0-9+.-]*://)?([^:@/]*):([^@/]*)@").ok());

/// Writes drained events to the `incoming` table.
///
/// Each batch becomes one `INSERT ... VALUES (...), (...)` statement. MySQL caps
/// a statement at 65535 placeholders, so a batch holds at most
/// [`MAX_CHUNK_SIZE`](crate::config::MAX_CHUNK_SIZE) rows; buffer config
/// validation enforces that bound.
#[derive(Debug, Clone)]
pub struct MySqlSink {
    pool: MySqlPool,
}

impl MySqlSink {
    /// Wrap an existing connection pool.
    #[must_use]
    pub const fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    pub const fn pool(&self) -> &MySqlPool {
        &self.pool
    }
}

/// Build the multi-row insert for `events`.
fn insert_query(events: &[Event]) -> QueryBuilder<'_, MySql> {
    let mut builder = QueryBuilder::new(format!(
        "INSERT INTO `{INCOMING_TABLE}` ({}) ",
        INCOMING_FIELDS.join(", ")
    ));
    builder.push_values(events, |mut row, event| {
        row.push_bind(event.id)
            .push_bind(event.property.as_str())
            .push_bind(event.property_section)
            .push_bind(event.property_id)
            .push_bind(event.remote_ip.as_str())
            .push_bind(event.stamp);
    });
    builder
}

#[async_trait]
impl EventSink for MySqlSink {
    async fn insert_batch(&self, events: &[Event]) -> StatsResult<()> {
        if events.is_empty() {
            return Ok(());
        }
        let result = insert_query(events).build().execute(&self.pool).await?;
        tracing::trace!(rows = result.rows_affected(), "Inserted batch");
        Ok(())
    }
}

/// Connect to MySQL, retrying until the pool is up.
///
/// Attempts repeat every `retry_delay_secs` until one succeeds, the attempt
/// budget is spent (`connect_retries`, when non-zero), the overall
/// `connect_timeout_secs` elapses, or `cancel` fires.
pub async fn connect_with_retry(
    config: &DatabaseConfig,
    cancel: &CancellationToken,
) -> StatsResult<MySqlPool> {
    let dsn = mask_dsn(&config.url);
    tracing::info!(dsn = %dsn, "Connecting to database");

    let attempts = async {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let result = MySqlPoolOptions::new()
                .max_connections(config.max_connections)
                .acquire_timeout(config.acquire_timeout())
                .connect(&config.url)
                .await;

            match result {
                Ok(pool) => {
                    tracing::info!(dsn = %dsn, attempt, "Connected to database");
                    return Ok(pool);
                }
                Err(e) if config.connect_retries > 0 && attempt >= config.connect_retries => {
                    return Err(StatsError::Connect(format!(
                        "dsn={dsn}, tries={attempt}: {e}"
                    )));
                }
                Err(e) => {
                    tracing::warn!(dsn = %dsn, error = %e, attempt, "Can't connect to database");
                    tokio::time::sleep(config.retry_delay()).await;
                }
            }
        }
    };

    tokio::select! {
        result = attempts => result,
        () = tokio::time::sleep(config.connect_timeout()) => {
            Err(StatsError::Connect(format!("timed out, dsn={dsn}")))
        }
        () = cancel.cancelled() => {
            Err(StatsError::Connect(format!("cancelled, dsn={dsn}")))
        }
    }
}

/// Mask the user name and password of a connection URL for logging.
///
/// The first and last characters of each are kept; shorter values are
/// replaced outright. URLs without a password are returned unchanged.
pub fn mask_dsn(dsn: &str) -> String {
    let Some(pattern) = CREDENTIALS_PATTERN.as_ref() else {
        return dsn.to_owned();
    };

    pattern
        .replace(dsn, |caps: &Captures<'_>| {
            format!(
                "{}{}:{}@",
                caps.get(1).map_or("", |m| m.as_str()),
                mask_part(&caps[2]),
                mask_part(&caps[3]),
            )
        })
        .into_owned()
}

fn mask_part(value: &str) -> String {
    let mut chars = value.chars();
    match (chars.next(), chars.next_back()) {
        (Some(first), Some(last)) => format!("{first}****{last}"),
        _ => "****".to_owned(),
    }
}
