//! End-to-end behaviour of a [`Channel`] against a scripted TCP peer.
//!
//! Run with: cargo test --test channel
//! Logs: RUST_LOG=misty_channel=debug cargo test --test channel -- --nocapture

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Result, bail};
use futures_util::future::join_all;
use misty_channel::protocol::Framer;
use misty_channel::{Channel, Error, Request, Response, Token};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

// ============================================================================
// Scripted Peer
// ============================================================================

/// What the peer does with one incoming request.
enum Reply {
    /// Write this envelope.
    Send(Value),
    /// Write this envelope after a delay.
    Delayed(Value, Duration),
    /// Write raw bytes.
    Raw(&'static [u8]),
    /// Close the connection.
    Close,
}

type Behaviour = Arc<dyn Fn(&Value) -> Vec<Reply> + Send + Sync>;

/// A fake remote service.
struct Peer {
    port: u16,
    connections: Arc<AtomicUsize>,
    received: Arc<Mutex<Vec<Value>>>,
    writers: Arc<Mutex<Vec<mpsc::UnboundedSender<Vec<u8>>>>>,
}

impl Peer {
    async fn start<F>(behaviour: F) -> Self
    where
        F: Fn(&Value) -> Vec<Reply> + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        Self::serve(listener, behaviour)
    }

    fn serve<F>(listener: TcpListener, behaviour: F) -> Self
    where
        F: Fn(&Value) -> Vec<Reply> + Send + Sync + 'static,
    {
        let port = listener.local_addr().expect("addr").port();
        let behaviour: Behaviour = Arc::new(behaviour);
        let connections = Arc::new(AtomicUsize::new(0));
        let received = Arc::new(Mutex::new(Vec::new()));
        let writers = Arc::new(Mutex::new(Vec::new()));

        tokio::spawn({
            let connections = Arc::clone(&connections);
            let received = Arc::clone(&received);
            let writers = Arc::clone(&writers);
            async move {
                while let Ok((stream, _)) = listener.accept().await {
                    connections.fetch_add(1, Ordering::SeqCst);
                    let (tx, rx) = mpsc::unbounded_channel();
                    writers.lock().push(tx.clone());
                    tokio::spawn(handle_connection(
                        stream,
                        Arc::clone(&behaviour),
                        Arc::clone(&received),
                        tx,
                        rx,
                    ));
                }
            }
        });

        Self {
            port,
            connections,
            received,
            writers,
        }
    }

    fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Writes `message` on the `index`-th accepted connection.
    fn push(&self, index: usize, message: &Value) {
        let bytes = serde_json::to_vec(message).expect("encode");
        let writers = self.writers.lock();
        writers[index].send(bytes).expect("connection open");
    }

    /// Waits until a received envelope matches `predicate`.
    async fn wait_for(&self, predicate: impl Fn(&Value) -> bool) -> Result<Value> {
        let deadline = Instant::now() + Duration::from_secs(3);
        while Instant::now() < deadline {
            if let Some(found) = self.received.lock().iter().find(|v| predicate(v)) {
                return Ok(found.clone());
            }
            sleep(Duration::from_millis(10)).await;
        }
        bail!("no matching envelope received")
    }
}

async fn handle_connection(
    stream: TcpStream,
    behaviour: Behaviour,
    received: Arc<Mutex<Vec<Value>>>,
    tx: mpsc::UnboundedSender<Vec<u8>>,
    mut rx: mpsc::UnboundedReceiver<Vec<u8>>,
) {
    let (mut reader, mut writer) = stream.into_split();

    // An empty buffer closes the write half.
    tokio::spawn(async move {
        while let Some(bytes) = rx.recv().await {
            if bytes.is_empty() || writer.write_all(&bytes).await.is_err() {
                break;
            }
        }
    });

    let mut framer = Framer::new(1024 * 1024);
    let mut buf = [0u8; 4096];

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        let Ok(frames) = framer.feed(&buf[..n]) else {
            return;
        };

        for frame in frames {
            let Ok(value) = serde_json::from_slice::<Value>(&frame) else {
                continue;
            };
            received.lock().push(value.clone());

            if value.get("method").is_none() {
                continue;
            }

            for reply in behaviour(&value) {
                match reply {
                    Reply::Send(message) => {
                        let _ = tx.send(serde_json::to_vec(&message).expect("encode"));
                    }
                    Reply::Delayed(message, delay) => {
                        let tx = tx.clone();
                        tokio::spawn(async move {
                            sleep(delay).await;
                            let _ = tx.send(serde_json::to_vec(&message).expect("encode"));
                        });
                    }
                    Reply::Raw(bytes) => {
                        let _ = tx.send(bytes.to_vec());
                    }
                    Reply::Close => {
                        let _ = tx.send(Vec::new());
                        return;
                    }
                }
            }
        }
    }
}

/// Response carrying the request token, resource and headers.
fn echo(request: &Value) -> Value {
    json!({
        "status": 200,
        "token": request["token"],
        "resource": request["resource"],
        "body": { "headers": request["headers"] },
    })
}

fn echo_all(request: &Value) -> Vec<Reply> {
    vec![Reply::Send(echo(request))]
}

// ============================================================================
// Helpers
// ============================================================================

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn channel(port: u16, max_workers: usize) -> Channel {
    init_tracing();
    Channel::builder()
        .host("127.0.0.1")
        .port(port)
        .timeout(Duration::from_secs(2))
        .retry_interval(Duration::from_millis(50))
        .max_workers(max_workers)
        .build()
        .expect("valid config")
}

// ============================================================================
// Calls
// ============================================================================

#[tokio::test]
async fn test_call_round_trip_sets_headers() -> Result<()> {
    let peer = Peer::start(echo_all).await;
    let channel = channel(peer.port, 1);

    let response = channel
        .call(Request::new("GET", "/feeds").with_token("T1"))
        .await?;

    assert_eq!(response.status, 200);
    assert_eq!(response.token, Some(Token::from("T1")));
    assert_eq!(response.resource.as_deref(), Some("/feeds"));

    let request = peer.wait_for(|v| v["token"] == "T1").await?;
    assert_eq!(request["method"], "GET");
    assert_eq!(request["headers"]["Content-Type"], "application/json");
    assert!(
        request["headers"]["User-Agent"]
            .as_str()
            .is_some_and(|ua| ua.starts_with("misty-channel/"))
    );
    assert_eq!(channel.pending_count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_call_generates_token_when_missing() -> Result<()> {
    let peer = Peer::start(echo_all).await;
    let channel = channel(peer.port, 1);

    let response = channel.call(Request::new("GET", "/status")).await?;

    let token = response.token.expect("token echoed");
    assert!(!token.as_str().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_concurrent_calls_use_separate_connections() -> Result<()> {
    let peer = Peer::start(|request| {
        vec![Reply::Delayed(echo(request), Duration::from_millis(200))]
    })
    .await;
    let channel = Arc::new(channel(peer.port, 2));

    let calls = ["T1", "T2"].map(|token| {
        let channel = Arc::clone(&channel);
        tokio::spawn(async move {
            channel
                .call(Request::new("GET", "/resource").with_token(token))
                .await
        })
    });

    let results = join_all(calls).await;
    for (result, expected) in results.into_iter().zip(["T1", "T2"]) {
        let response = result??;
        assert_eq!(response.token, Some(Token::from(expected)));
    }

    assert_eq!(peer.connections(), 2);
    assert_eq!(channel.worker_count(), 2);
    Ok(())
}

#[tokio::test]
async fn test_single_worker_serializes_calls() -> Result<()> {
    let peer = Peer::start(|request| {
        vec![Reply::Delayed(echo(request), Duration::from_millis(100))]
    })
    .await;
    let channel = Arc::new(channel(peer.port, 1));

    // Connect first so the measurement covers only the calls.
    channel.call(Request::new("GET", "/warmup")).await?;

    let start = Instant::now();
    let calls: Vec<_> = (0..3)
        .map(|i| {
            let channel = Arc::clone(&channel);
            tokio::spawn(async move {
                channel
                    .call(Request::new("GET", "/serial").with_token(format!("S{i}")))
                    .await
            })
        })
        .collect();

    for result in join_all(calls).await {
        result??;
    }

    assert!(start.elapsed() >= Duration::from_millis(300));
    assert_eq!(peer.connections(), 1);
    Ok(())
}

// ============================================================================
// Correlation
// ============================================================================

#[tokio::test]
async fn test_unmatched_and_malformed_messages_are_ignored() -> Result<()> {
    let peer = Peer::start(|request| {
        vec![
            Reply::Send(json!({ "status": 200, "token": "ghost" })),
            Reply::Raw(b"{not json}"),
            Reply::Send(echo(request)),
        ]
    })
    .await;
    let channel = channel(peer.port, 1);

    let response = channel
        .call(Request::new("GET", "/feeds").with_token("T1"))
        .await?;
    assert_eq!(response.token, Some(Token::from("T1")));

    // The connection survived both.
    channel.call(Request::new("GET", "/again")).await?;
    assert_eq!(peer.connections(), 1);
    Ok(())
}

#[tokio::test]
async fn test_timeout_returns_none_and_connection_survives() -> Result<()> {
    let peer = Peer::start(|request| {
        if request["resource"] == "/slow" {
            vec![Reply::Delayed(echo(request), Duration::from_millis(300))]
        } else {
            echo_all(request)
        }
    })
    .await;
    let channel = channel(peer.port, 1);

    let slow = channel
        .execute_with_timeout(
            Request::new("GET", "/slow").with_token("late"),
            Duration::from_millis(100),
        )
        .await;
    assert!(slow.is_none());
    assert_eq!(channel.pending_count(), 0);

    // The late response arrives while this call is in flight and is dropped.
    let fast = channel
        .call(Request::new("GET", "/fast").with_token("T2"))
        .await?;
    assert_eq!(fast.token, Some(Token::from("T2")));

    sleep(Duration::from_millis(300)).await;
    assert_eq!(channel.pending_count(), 0);
    assert_eq!(peer.connections(), 1);
    Ok(())
}

#[tokio::test]
async fn test_timeout_error_names_token() -> Result<()> {
    let peer = Peer::start(|_| Vec::new()).await;
    let channel = channel(peer.port, 1);

    let err = channel
        .call_with_timeout(
            Request::new("GET", "/void").with_token("T9"),
            Duration::from_millis(100),
        )
        .await
        .unwrap_err();

    assert!(err.is_timeout());
    assert!(err.to_string().contains("T9"));
    Ok(())
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn test_connection_drop_fails_call_and_replaces_worker() -> Result<()> {
    let peer = Peer::start(|request| {
        if request["resource"] == "/drop" {
            vec![Reply::Close]
        } else {
            echo_all(request)
        }
    })
    .await;
    let channel = channel(peer.port, 1);

    let started = Instant::now();
    let dropped = channel.execute(Request::new("GET", "/drop")).await;
    assert!(dropped.is_none());
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(channel.pending_count(), 0);

    let response = channel.call(Request::new("GET", "/after")).await?;
    assert_eq!(response.status, 200);
    assert_eq!(peer.connections(), 2);
    Ok(())
}

#[tokio::test]
async fn test_oversized_response_replaces_worker() -> Result<()> {
    let peer = Peer::start(|request| {
        if request["resource"] == "/big" {
            let mut response = echo(request);
            response["body"] = json!("x".repeat(256));
            vec![Reply::Send(response)]
        } else {
            echo_all(request)
        }
    })
    .await;

    init_tracing();
    let channel = Channel::builder()
        .host("127.0.0.1")
        .port(peer.port)
        .timeout(Duration::from_secs(2))
        .retry_interval(Duration::from_millis(50))
        .max_frame_size(256)
        .build()?;

    let started = Instant::now();
    let big = channel.execute(Request::new("GET", "/big")).await;
    assert!(big.is_none());
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(channel.pending_count(), 0);

    let response = channel.call(Request::new("GET", "/small")).await?;
    assert_eq!(response.status, 200);
    assert_eq!(peer.connections(), 2);
    Ok(())
}

#[tokio::test]
async fn test_first_connect_failure_is_retried() -> Result<()> {
    // Reserve a port, then release it so the first attempts are refused.
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        listener.local_addr()?.port()
    };
    let channel = Arc::new(channel(port, 1));

    let call = tokio::spawn({
        let channel = Arc::clone(&channel);
        async move {
            channel
                .call_with_timeout(Request::new("GET", "/retry"), Duration::from_secs(5))
                .await
        }
    });

    sleep(Duration::from_millis(200)).await;
    assert!(!call.is_finished());

    let listener = TcpListener::bind(("127.0.0.1", port)).await?;
    let peer = Peer::serve(listener, echo_all);

    let response = timeout(Duration::from_secs(5), call).await???;
    assert_eq!(response.status, 200);
    assert_eq!(peer.connections(), 1);
    Ok(())
}

#[tokio::test]
async fn test_shutdown_resolves_blocked_callers() -> Result<()> {
    let peer = Peer::start(|_| Vec::new()).await;
    let channel = Arc::new(channel(peer.port, 1));

    let waiting = tokio::spawn({
        let channel = Arc::clone(&channel);
        async move {
            channel
                .execute_with_timeout(
                    Request::new("GET", "/never").with_token("W1"),
                    Duration::from_secs(10),
                )
                .await
        }
    });
    let queued = tokio::spawn({
        let channel = Arc::clone(&channel);
        async move { channel.call(Request::new("GET", "/queued")).await }
    });

    peer.wait_for(|v| v["token"] == "W1").await?;
    assert_eq!(channel.pending_count(), 1);

    channel.shutdown();

    let waiting = timeout(Duration::from_secs(2), waiting).await??;
    assert!(waiting.is_none());

    let queued = timeout(Duration::from_secs(2), queued).await??;
    assert!(queued.is_err());

    assert_eq!(channel.pending_count(), 0);
    assert!(matches!(
        channel.call(Request::new("GET", "/late")).await,
        Err(Error::ShuttingDown)
    ));
    Ok(())
}

// ============================================================================
// Inbound Requests
// ============================================================================

#[tokio::test]
async fn test_inbound_request_is_answered_by_handler() -> Result<()> {
    let peer = Peer::start(echo_all).await;
    let channel = channel(peer.port, 1);

    let seen = Arc::new(Mutex::new(Vec::new()));
    channel.set_request_handler({
        let seen = Arc::clone(&seen);
        move |request: Request| {
            seen.lock().push(request.resource.clone());
            Some(Response::ok().with_resource(request.resource).with_body(json!({ "ack": true })))
        }
    });

    // Establish the connection.
    channel.call(Request::new("GET", "/hello")).await?;

    peer.push(
        0,
        &json!({
            "method": "POST",
            "resource": "/events/battery",
            "token": "P1",
            "body": { "level": 80 },
        }),
    );

    let reply = peer
        .wait_for(|v| v["token"] == "P1" && v.get("status").is_some())
        .await?;
    assert_eq!(reply["status"], 200);
    assert_eq!(reply["resource"], "/events/battery");
    assert_eq!(reply["body"]["ack"], true);
    assert_eq!(*seen.lock(), vec!["/events/battery".to_string()]);
    Ok(())
}

#[tokio::test]
async fn test_panicking_handler_does_not_stall_calls() -> Result<()> {
    let peer = Peer::start(echo_all).await;
    let channel = channel(peer.port, 1);
    channel.set_request_handler(|_| -> Option<Response> { panic!("handler bug") });

    channel.call(Request::new("GET", "/hello")).await?;
    peer.push(0, &json!({ "method": "POST", "resource": "/events", "token": "P3" }));
    sleep(Duration::from_millis(50)).await;

    for i in 0..3 {
        let response = channel
            .call(Request::new("GET", "/after").with_token(format!("A{i}")))
            .await?;
        assert_eq!(response.status, 200);
    }
    assert_eq!(peer.connections(), 1);
    Ok(())
}

#[tokio::test]
async fn test_inbound_request_without_handler_is_dropped() -> Result<()> {
    let peer = Peer::start(echo_all).await;
    let channel = channel(peer.port, 1);

    channel.call(Request::new("GET", "/hello")).await?;
    peer.push(0, &json!({ "method": "POST", "resource": "/events", "token": "P2" }));

    sleep(Duration::from_millis(100)).await;
    let answered = peer
        .received
        .lock()
        .iter()
        .any(|v| v["token"] == "P2" && v.get("status").is_some());
    assert!(!answered);

    channel.call(Request::new("GET", "/still-alive")).await?;
    assert_eq!(peer.connections(), 1);
    Ok(())
}

// ============================================================================
// Capacity
// ============================================================================

#[tokio::test]
async fn test_set_max_workers_switches_to_bounded_pool() -> Result<()> {
    let peer = Peer::start(|request| {
        vec![Reply::Delayed(echo(request), Duration::from_millis(100))]
    })
    .await;
    let channel = Arc::new(channel(peer.port, 1));

    channel.call(Request::new("GET", "/single")).await?;
    assert_eq!(peer.connections(), 1);

    channel.set_max_workers(2)?;
    assert_eq!(channel.max_workers(), 2);

    let calls: Vec<_> = (0..2)
        .map(|i| {
            let channel = Arc::clone(&channel);
            tokio::spawn(async move {
                channel
                    .call(Request::new("GET", "/bounded").with_token(format!("B{i}")))
                    .await
            })
        })
        .collect();

    for result in join_all(calls).await {
        result??;
    }

    // The single-pool connection was closed, two bounded ones opened.
    assert_eq!(peer.connections(), 3);
    assert_eq!(channel.worker_count(), 2);
    Ok(())
}
