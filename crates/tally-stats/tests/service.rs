//! End-to-end tests over a real listener.

mod common;

use std::net::SocketAddr;
use std::sync::Arc;

use tally_stats::{server, StatsConfig};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use common::{buffer_config, RecordingSink, SequentialIds};

struct TestServer {
    addr: SocketAddr,
    sink: Arc<RecordingSink>,
    cancel: CancellationToken,
    task: JoinHandle<tally_stats::StatsResult<()>>,
}

impl TestServer {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let sink = Arc::new(RecordingSink::new());
        let cancel = CancellationToken::new();

        let config = StatsConfig {
            buffer: buffer_config(4, 3600, 1000),
            ..StatsConfig::default()
        };
        let task = tokio::spawn({
            let sink = sink.clone();
            let cancel = cancel.clone();
            async move {
                server::serve(
                    listener,
                    &config,
                    Arc::new(SequentialIds::default()),
                    sink,
                    cancel,
                )
                .await
            }
        });

        Self {
            addr,
            sink,
            cancel,
            task,
        }
    }

    /// Send one HTTP/1.1 request and return the status code and body.
    async fn post(&self, path: &str, headers: &[(&str, &str)], body: &str) -> (u16, String) {
        let mut stream = TcpStream::connect(self.addr).await.unwrap();
        let mut request = format!(
            "POST {path} HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n",
            body.len()
        );
        for (name, value) in headers {
            request.push_str(&format!("{name}: {value}\r\n"));
        }
        request.push_str("\r\n");
        request.push_str(body);
        stream.write_all(request.as_bytes()).await.unwrap();

        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();

        let status = response
            .split_whitespace()
            .nth(1)
            .and_then(|s| s.parse().ok())
            .unwrap();
        let body = response
            .split_once("\r\n\r\n")
            .map(|(_, body)| body.to_owned())
            .unwrap_or_default();
        (status, body)
    }

    async fn stop(self) -> Arc<RecordingSink> {
        self.cancel.cancel();
        self.task.await.unwrap().unwrap();
        self.sink
    }
}

const PUSH: &str = "/twirp/stats.StatsService/Push";

#[tokio::test]
async fn pushed_views_are_flushed_on_shutdown() {
    let server = TestServer::start().await;

    let (status, body) = server
        .post(PUSH, &[], r#"{"property":"news","section":4,"id":99}"#)
        .await;
    assert_eq!(status, 200);
    assert!(body.contains("{}"), "{body}");

    let (status, _) = server
        .post(
            PUSH,
            &[("X-Forwarded-For", "203.0.113.7, 10.0.0.1")],
            r#"{"property":"news","section":4,"id":100}"#,
        )
        .await;
    assert_eq!(status, 200);

    let sink = server.stop().await;
    let mut events = sink.events();
    events.sort_by_key(|e| e.property_id);

    assert_eq!(events.len(), 2);
    assert_eq!(events[0].property_id, 99);
    assert_eq!(events[0].property_section, 4);
    assert_eq!(events[0].remote_ip, "127.0.0.1");
    assert_eq!(events[1].remote_ip, "203.0.113.7");
    assert_ne!(events[0].id, events[1].id);
}

#[tokio::test]
async fn invalid_push_is_not_buffered() {
    let server = TestServer::start().await;

    let (status, body) = server
        .post(PUSH, &[], r#"{"property":"news","section":0,"id":1}"#)
        .await;
    assert_eq!(status, 400);
    assert!(body.contains("invalid_argument"), "{body}");
    assert!(body.contains("missing section"), "{body}");

    let sink = server.stop().await;
    assert_eq!(sink.rows(), 0);
    assert_eq!(sink.calls(), 0);
}
