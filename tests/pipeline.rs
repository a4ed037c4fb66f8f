//! End-to-end pipeline tests against local socket servers.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

use waypost::{
    AuthType, HistoryStore, PipelineHandle, PipelineOrchestrator, PreparedRequest,
    PresentationSink, Protocol, RequestModel, ResponseEvent, ScriptResult, TerminalState,
};

#[derive(Debug, Clone)]
enum Call {
    Prepared { url: String },
    Opened { status: u16 },
    Message { payload: String, script_ok: bool },
    Closed { body: Option<String> },
    Failed { error: String },
    Terminal { state: TerminalState },
    Cancelled,
}

struct RecordingSink {
    calls: Arc<Mutex<Vec<Call>>>,
    done_tx: mpsc::UnboundedSender<()>,
}

impl PresentationSink for RecordingSink {
    fn on_prepared(&mut self, prepared: &PreparedRequest) {
        self.calls.lock().unwrap().push(Call::Prepared {
            url: prepared.url.clone(),
        });
    }

    fn on_event(&mut self, event: &ResponseEvent, script: &ScriptResult) {
        let call = match event {
            ResponseEvent::Opened { status, .. } => Call::Opened { status: *status },
            ResponseEvent::Message { payload, .. } => Call::Message {
                payload: payload.clone(),
                script_ok: script.success,
            },
            ResponseEvent::Closed { body, .. } => Call::Closed { body: body.clone() },
            ResponseEvent::Failed { error } => Call::Failed {
                error: error.to_string(),
            },
        };
        self.calls.lock().unwrap().push(call);
    }

    fn on_terminal(&mut self, state: TerminalState, _event: Option<&ResponseEvent>) {
        self.calls.lock().unwrap().push(Call::Terminal { state });
        let _ = self.done_tx.send(());
    }

    fn on_cancelled(&mut self) {
        self.calls.lock().unwrap().push(Call::Cancelled);
        let _ = self.done_tx.send(());
    }
}

struct Harness {
    handle: PipelineHandle,
    calls: Arc<Mutex<Vec<Call>>>,
    done_rx: mpsc::UnboundedReceiver<()>,
}

impl Harness {
    fn start(history: Box<dyn HistoryStore>, max_redirects: usize) -> Self {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let sink = RecordingSink {
            calls: Arc::clone(&calls),
            done_tx,
        };
        let orchestrator = PipelineOrchestrator::new(Box::new(sink), history)
            .with_max_redirects(max_redirects);
        let (handle, cmd_rx) = PipelineHandle::new();
        tokio::spawn(orchestrator.run(cmd_rx));
        Harness {
            handle,
            calls,
            done_rx,
        }
    }

    fn with_null_history() -> Self {
        Self::start(Box::new(waypost::NullHistoryStore), 10)
    }

    async fn wait_done(&mut self) {
        timeout(Duration::from_secs(5), self.done_rx.recv())
            .await
            .expect("pipeline did not finish in time")
            .expect("done channel closed");
    }

    async fn wait_until<F: Fn(&[Call]) -> bool>(&self, pred: F) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            if pred(&self.calls.lock().unwrap()) {
                return;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "condition not reached in time: {:?}",
                self.calls.lock().unwrap()
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }
}

async fn read_head(stream: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                if buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    break;
                }
            }
        }
    }
    String::from_utf8_lossy(&buf).to_string()
}

/// One response per connection; every request head is recorded.
async fn spawn_http_server<F>(responder: F) -> (SocketAddr, Arc<Mutex<Vec<String>>>)
where
    F: Fn(usize, &str) -> String + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let heads = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&heads);
    tokio::spawn(async move {
        let mut count = 0usize;
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            let head = read_head(&mut stream).await;
            recorded.lock().unwrap().push(head.clone());
            let response = responder(count, &head);
            count += 1;
            let _ = stream.write_all(response.as_bytes()).await;
            let _ = stream.shutdown().await;
        }
    });
    (addr, heads)
}

/// Accepts one connection and leaves it hanging without a response.
async fn spawn_slow_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let Ok((_stream, _)) = listener.accept().await else {
            return;
        };
        tokio::time::sleep(Duration::from_secs(30)).await;
    });
    addr
}

fn ok_json(body: &str) -> String {
    format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    )
}

fn get_model(url: String) -> RequestModel {
    RequestModel {
        url,
        headers: Vec::new(),
        ..RequestModel::default()
    }
}

#[tokio::test]
async fn http_request_flows_to_sink_and_history() {
    let (addr, _) = spawn_http_server(|_, _| ok_json(r#"{"ok":true}"#)).await;
    let dir = tempfile::tempdir().unwrap();
    let history = waypost::FileHistoryStore::with_dir(dir.path().to_path_buf());

    let mut harness = Harness::start(Box::new(history), 10);
    harness.handle.send(get_model(format!("http://{}/status", addr)));
    harness.wait_done().await;

    let calls = harness.calls();
    assert!(matches!(&calls[0], Call::Prepared { url } if url.ends_with("/status")));
    assert!(matches!(calls[1], Call::Opened { status: 200 }));
    match &calls[2] {
        Call::Closed { body: Some(body) } => assert_eq!(body, "{\n  \"ok\": true\n}"),
        other => panic!("expected closed with body, got {:?}", other),
    }
    assert!(matches!(
        calls[3],
        Call::Terminal {
            state: TerminalState::Completed
        }
    ));

    let reloaded = waypost::FileHistoryStore::with_dir(dir.path().to_path_buf());
    assert_eq!(reloaded.len(), 1);
    let entry = reloaded.get(0).unwrap();
    assert_eq!(entry.summary.status, Some(200));
    assert_eq!(entry.summary.message_count, 0);
}

#[tokio::test]
async fn validation_failure_short_circuits() {
    let mut harness = Harness::with_null_history();
    let model = RequestModel {
        url: String::from("ws://example.dev/socket"),
        protocol: Protocol::Http,
        ..RequestModel::default()
    };
    harness.handle.send(model);
    harness.wait_done().await;

    let calls = harness.calls();
    assert_eq!(calls.len(), 1);
    assert!(matches!(
        calls[0],
        Call::Terminal {
            state: TerminalState::Failed
        }
    ));
}

#[tokio::test]
async fn pre_script_failure_blocks_transport() {
    // Port 9 (discard) would refuse the connection if anything got that far.
    let mut harness = Harness::with_null_history();
    let model = RequestModel {
        url: String::from("http://127.0.0.1:9/never"),
        pre_script: String::from("fail(\"missing token\")"),
        ..RequestModel::default()
    };
    harness.handle.send(model);
    harness.wait_done().await;

    let calls = harness.calls();
    assert_eq!(calls.len(), 1, "no prepared/transport callbacks expected");
    assert!(matches!(
        calls[0],
        Call::Terminal {
            state: TerminalState::Failed
        }
    ));
}

#[tokio::test]
async fn pre_script_mutations_reach_the_wire() {
    let (addr, heads) = spawn_http_server(|_, _| ok_json("{}")).await;
    let mut harness = Harness::with_null_history();

    let mut model = get_model(format!("http://{}/search", addr));
    model.pre_script = String::from(
        "set(\"tok\", \"abc\")\nsetHeader(\"X-Token\", \"{{tok}}\")\nsetParam(\"q\", \"1\")",
    );
    harness.handle.send(model);
    harness.wait_done().await;

    let heads = heads.lock().unwrap();
    assert_eq!(heads.len(), 1);
    let head = heads[0].to_lowercase();
    assert!(head.starts_with("get /search?q=1"), "head: {}", head);
    assert!(head.contains("x-token: abc"), "head: {}", head);
}

#[tokio::test]
async fn redirect_chain_is_bounded() {
    let (addr, heads) = spawn_http_server(|_, _| {
        String::from("HTTP/1.1 302 Found\r\nLocation: /again\r\nConnection: close\r\n\r\n")
    })
    .await;

    let mut harness = Harness::start(Box::new(waypost::NullHistoryStore), 3);
    harness.handle.send(get_model(format!("http://{}/start", addr)));
    harness.wait_done().await;

    let calls = harness.calls();
    assert!(calls.iter().any(
        |c| matches!(c, Call::Failed { error } if error.contains("3 redirects"))
    ));
    assert!(matches!(
        calls.last(),
        Some(Call::Terminal {
            state: TerminalState::Failed
        })
    ));
    // Initial request plus exactly max_redirects hops.
    assert_eq!(heads.lock().unwrap().len(), 4);
}

#[tokio::test]
async fn cross_origin_redirect_drops_authorization() {
    let (target, target_heads) = spawn_http_server(|_, _| ok_json("{}")).await;
    let location = format!("http://{}/landed", target);
    let (addr, source_heads) = spawn_http_server(move |_, _| {
        format!(
            "HTTP/1.1 302 Found\r\nLocation: {}\r\nConnection: close\r\n\r\n",
            location
        )
    })
    .await;

    let mut harness = Harness::with_null_history();
    let mut model = get_model(format!("http://{}/start", addr));
    model.auth = AuthType::Bearer(String::from("secret"));
    harness.handle.send(model);
    harness.wait_done().await;

    let source = source_heads.lock().unwrap()[0].to_lowercase();
    assert!(source.contains("authorization: bearer secret"));
    // Different port is a different origin; credentials must not follow.
    let target = target_heads.lock().unwrap()[0].to_lowercase();
    assert!(!target.contains("authorization"), "head: {}", target);
}

#[tokio::test]
async fn same_origin_redirect_keeps_authorization() {
    let (addr, heads) = spawn_http_server(|count, _| {
        if count == 0 {
            String::from("HTTP/1.1 302 Found\r\nLocation: /next\r\nConnection: close\r\n\r\n")
        } else {
            ok_json("{}")
        }
    })
    .await;

    let mut harness = Harness::with_null_history();
    let mut model = get_model(format!("http://{}/start", addr));
    model.auth = AuthType::Bearer(String::from("secret"));
    harness.handle.send(model);
    harness.wait_done().await;

    let heads = heads.lock().unwrap();
    assert_eq!(heads.len(), 2);
    assert!(heads[1].to_lowercase().contains("authorization: bearer secret"));
}

#[tokio::test]
async fn http_response_upgrades_to_event_stream() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let _ = read_head(&mut stream).await;
        stream
            .write_all(
                b"HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nConnection: close\r\n\r\n",
            )
            .await
            .unwrap();
        for payload in ["one", "two", "three"] {
            stream
                .write_all(format!("data: {}\n\n", payload).as_bytes())
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let _ = stream.shutdown().await;
    });

    let mut harness = Harness::with_null_history();
    // Sent as plain HTTP; the content type flips it to streaming delivery.
    let mut model = get_model(format!("http://{}/events", addr));
    model.post_script = String::from("assert(\"{{$body}} != two\")");
    harness.handle.send(model);
    harness.wait_done().await;

    let calls = harness.calls();
    let messages: Vec<(String, bool)> = calls
        .iter()
        .filter_map(|c| match c {
            Call::Message { payload, script_ok } => Some((payload.clone(), *script_ok)),
            _ => None,
        })
        .collect();
    assert_eq!(
        messages,
        vec![
            (String::from("one"), true),
            // Post-script failure is recorded but never terminal.
            (String::from("two"), false),
            (String::from("three"), true),
        ]
    );
    assert!(calls.iter().any(|c| matches!(c, Call::Closed { body: None })));
    assert!(matches!(
        calls.last(),
        Some(Call::Terminal {
            state: TerminalState::Completed
        })
    ));
}

#[tokio::test]
async fn sse_protocol_streams_events() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let head = Arc::new(Mutex::new(String::new()));
    let recorded = Arc::clone(&head);
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        *recorded.lock().unwrap() = read_head(&mut stream).await;
        stream
            .write_all(
                b"HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nConnection: close\r\n\r\n",
            )
            .await
            .unwrap();
        for payload in ["one", "two", "three"] {
            stream
                .write_all(format!("data: {}\n\n", payload).as_bytes())
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let _ = stream.shutdown().await;
    });

    let mut harness = Harness::with_null_history();
    let model = RequestModel {
        url: format!("http://{}/events", addr),
        protocol: Protocol::Sse,
        headers: Vec::new(),
        auth: AuthType::Bearer(String::from("tok")),
        ..RequestModel::default()
    };
    harness.handle.send(model);
    harness.wait_done().await;

    let calls = harness.calls();
    assert!(matches!(calls[1], Call::Opened { status: 200 }));
    let messages: Vec<String> = calls
        .iter()
        .filter_map(|c| match c {
            Call::Message { payload, .. } => Some(payload.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(messages, vec!["one", "two", "three"]);
    assert!(calls.iter().any(|c| matches!(c, Call::Closed { body: None })));
    assert!(matches!(
        calls.last(),
        Some(Call::Terminal {
            state: TerminalState::Completed
        })
    ));

    let head = head.lock().unwrap().to_lowercase();
    assert!(head.contains("accept: text/event-stream"), "head: {}", head);
    assert!(head.contains("authorization: bearer tok"), "head: {}", head);
}

#[tokio::test]
async fn cancel_stops_callbacks() {
    let addr = spawn_slow_server().await;
    let mut harness = Harness::with_null_history();
    let id = harness.handle.send(get_model(format!("http://{}/slow", addr)));
    harness
        .wait_until(|calls| calls.iter().any(|c| matches!(c, Call::Prepared { .. })))
        .await;

    harness.handle.cancel(id);
    harness.wait_done().await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    let calls = harness.calls();
    assert!(matches!(calls.last(), Some(Call::Cancelled)));
    assert!(!calls.iter().any(|c| matches!(c, Call::Opened { .. })));
    assert!(!calls.iter().any(|c| matches!(c, Call::Terminal { .. })));
}

#[tokio::test]
async fn new_send_supersedes_previous() {
    let slow = spawn_slow_server().await;
    let (fast, _) = spawn_http_server(|_, _| ok_json("{}")).await;

    let mut harness = Harness::with_null_history();
    harness.handle.send(get_model(format!("http://{}/slow", slow)));
    harness
        .wait_until(|calls| calls.iter().any(|c| matches!(c, Call::Prepared { .. })))
        .await;

    harness.handle.send(get_model(format!("http://{}/fast", fast)));
    harness.wait_done().await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    let calls = harness.calls();
    let prepared = calls
        .iter()
        .filter(|c| matches!(c, Call::Prepared { .. }))
        .count();
    let opened = calls
        .iter()
        .filter(|c| matches!(c, Call::Opened { .. }))
        .count();
    let terminal = calls
        .iter()
        .filter(|c| matches!(c, Call::Terminal { .. }))
        .count();
    assert_eq!(prepared, 2);
    // Only the superseding send produces transport callbacks.
    assert_eq!(opened, 1);
    assert_eq!(terminal, 1);
    assert!(!calls.iter().any(|c| matches!(c, Call::Cancelled)));
}

#[tokio::test]
async fn websocket_round_trip() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        ws.send(Message::Text(String::from("welcome"))).await.unwrap();
        while let Some(Ok(msg)) = ws.next().await {
            if let Message::Text(text) = msg {
                let done = text == "bye";
                ws.send(Message::Text(format!("echo: {}", text)))
                    .await
                    .unwrap();
                if done {
                    break;
                }
            }
        }
        let _ = ws.close(None).await;
    });

    let mut harness = Harness::with_null_history();
    let model = RequestModel {
        url: format!("ws://{}/socket", addr),
        protocol: Protocol::WebSocket,
        headers: Vec::new(),
        ..RequestModel::default()
    };
    harness.handle.send(model);

    harness
        .wait_until(|calls| {
            calls
                .iter()
                .any(|c| matches!(c, Call::Message { payload, .. } if payload == "welcome"))
        })
        .await;

    harness.handle.send_text("bye");
    harness.wait_done().await;

    let calls = harness.calls();
    assert!(calls
        .iter()
        .any(|c| matches!(c, Call::Message { payload, .. } if payload == "echo: bye")));
    assert!(matches!(
        calls.last(),
        Some(Call::Terminal {
            state: TerminalState::Completed
        })
    ));
}
