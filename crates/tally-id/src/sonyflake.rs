//! Sonyflake identifier generator.

use std::net::{Ipv4Addr, UdpSocket};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, TimeZone, Utc};

use crate::{IdError, IdGenerator};

/// Bits allocated to elapsed time.
pub const BIT_LEN_TIME: u32 = 39;

/// Bits allocated to the per-tick sequence number.
pub const BIT_LEN_SEQUENCE: u32 = 8;

/// Bits allocated to the machine id.
pub const BIT_LEN_MACHINE_ID: u32 = 63 - BIT_LEN_TIME - BIT_LEN_SEQUENCE;

/// Length of one time unit in milliseconds.
const TIME_UNIT_MS: i64 = 10;

const SEQUENCE_MASK: u16 = (1 << BIT_LEN_SEQUENCE) - 1;

const MACHINE_ID_MASK: u64 = (1 << BIT_LEN_MACHINE_ID) - 1;

type Clock = Box<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Construction options for [`Sonyflake`].
#[derive(Debug, Clone, Default)]
pub struct Settings {
    /// Epoch the time field counts from. Defaults to 2014-09-01T00:00:00Z.
    pub start_time: Option<DateTime<Utc>>,
    /// Machine id. Derived from the host's private IPv4 address when absent.
    pub machine_id: Option<u16>,
}

#[derive(Debug)]
struct State {
    elapsed_time: i64,
    sequence: u16,
}

/// Thread-safe Sonyflake generator.
pub struct Sonyflake {
    start_time: i64,
    machine_id: u16,
    state: Mutex<State>,
    clock: Clock,
}

impl std::fmt::Debug for Sonyflake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sonyflake")
            .field("start_time", &self.start_time)
            .field("machine_id", &self.machine_id)
            .finish_non_exhaustive()
    }
}

impl Sonyflake {
    /// Build a generator using the wall clock.
    pub fn new(settings: Settings) -> Result<Self, IdError> {
        Self::with_clock(settings, Box::new(Utc::now))
    }

    fn with_clock(settings: Settings, clock: Clock) -> Result<Self, IdError> {
        let start = settings.start_time.unwrap_or_else(default_start_time);
        if start > clock() {
            return Err(IdError::StartTimeInFuture(start));
        }

        let machine_id = match settings.machine_id {
            Some(id) => id,
            None => lower_16_bit_private_ip()?,
        };

        tracing::debug!(machine_id, start_time = %start, "Sonyflake generator ready");

        Ok(Self {
            start_time: to_sonyflake_time(start),
            machine_id,
            state: Mutex::new(State {
                elapsed_time: 0,
                sequence: SEQUENCE_MASK,
            }),
            clock,
        })
    }

    /// The machine id embedded in every identifier.
    pub const fn machine_id(&self) -> u16 {
        self.machine_id
    }

    fn current_elapsed_time(&self) -> i64 {
        to_sonyflake_time((self.clock)()) - self.start_time
    }

    fn to_id(&self, state: &State) -> Result<u64, IdError> {
        if state.elapsed_time < 0 || state.elapsed_time >= 1 << BIT_LEN_TIME {
            return Err(IdError::OverTimeLimit);
        }

        #[allow(clippy::cast_sign_loss, clippy::as_conversions)]
        let elapsed = state.elapsed_time as u64;
        Ok(elapsed << (BIT_LEN_SEQUENCE + BIT_LEN_MACHINE_ID)
            | u64::from(state.sequence) << BIT_LEN_MACHINE_ID
            | u64::from(self.machine_id))
    }
}

impl IdGenerator for Sonyflake {
    /// Produce the next identifier.
    ///
    /// When the sequence wraps inside a single tick the logical clock borrows
    /// the next tick rather than sleeping, so this never blocks the caller.
    fn next_id(&self) -> Result<u64, IdError> {
        let current = self.current_elapsed_time();
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        if state.elapsed_time < current {
            state.elapsed_time = current;
            state.sequence = 0;
        } else {
            state.sequence = (state.sequence + 1) & SEQUENCE_MASK;
            if state.sequence == 0 {
                state.elapsed_time += 1;
            }
        }

        self.to_id(&state)
    }
}

/// Split an identifier into its `(time, sequence, machine_id)` parts.
pub fn decompose(id: u64) -> (u64, u16, u16) {
    let time = id >> (BIT_LEN_SEQUENCE + BIT_LEN_MACHINE_ID);
    #[allow(clippy::cast_possible_truncation, clippy::as_conversions)]
    let sequence = ((id >> BIT_LEN_MACHINE_ID) & u64::from(SEQUENCE_MASK)) as u16;
    #[allow(clippy::cast_possible_truncation, clippy::as_conversions)]
    let machine_id = (id & MACHINE_ID_MASK) as u16;
    (time, sequence, machine_id)
}

fn default_start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2014, 9, 1, 0, 0, 0)
        .single()
        .unwrap_or(DateTime::UNIX_EPOCH)
}

fn to_sonyflake_time(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis() / TIME_UNIT_MS
}

/// Derive a machine id from the host's outbound private IPv4 address.
///
/// Connecting a UDP socket performs a route lookup without sending packets.
fn lower_16_bit_private_ip() -> Result<u16, IdError> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
        .map_err(|e| IdError::NoPrivateAddress(e.to_string()))?;
    socket
        .connect((Ipv4Addr::new(192, 0, 2, 1), 9))
        .map_err(|e| IdError::NoPrivateAddress(e.to_string()))?;
    let local = socket
        .local_addr()
        .map_err(|e| IdError::NoPrivateAddress(e.to_string()))?;

    match local.ip() {
        std::net::IpAddr::V4(ip) if is_private_ipv4(ip) => Ok(machine_id_from_ip(ip)),
        other => Err(IdError::NoPrivateAddress(format!(
            "{other} is not a private IPv4 address"
        ))),
    }
}

fn is_private_ipv4(ip: Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();
    ip.is_private() || (a == 100 && (64..128).contains(&b))
}

fn machine_id_from_ip(ip: Ipv4Addr) -> u16 {
    let [_, _, c, d] = ip.octets();
    u16::from(c) << 8 | u16::from(d)
}
