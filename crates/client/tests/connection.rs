//! Connection manager against a local WebSocket server.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use legion_client::connection::TaggedEvent;
use legion_client::{ClientError, ConnectionHandle, ConnectionState, ReconnectPolicy, Sleeper};
use legion_protocol::{ClientMessage, InboundEvent, TerminalPayload};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

const WAIT: Duration = Duration::from_secs(10);

/// Records requested delays and returns at once.
#[derive(Default)]
struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    fn delays(&self) -> Vec<Duration> {
        self.delays.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, delay: Duration) {
        self.delays.lock().unwrap().push(delay);
    }
}

async fn listen() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, format!("ws://{addr}"))
}

async fn accept(listener: &TcpListener) -> WebSocketStream<TcpStream> {
    let (stream, _) = listener.accept().await.unwrap();
    tokio_tungstenite::accept_async(stream).await.unwrap()
}

fn spawn_client(ws_base: &str) -> (ConnectionHandle, mpsc::Receiver<TaggedEvent>, Arc<RecordingSleeper>) {
    let sleeper = Arc::new(RecordingSleeper::default());
    let (handle, events) =
        ConnectionHandle::spawn(ws_base, ReconnectPolicy::default(), sleeper.clone());
    (handle, events, sleeper)
}

async fn wait_for_state(handle: &ConnectionHandle, want: impl Fn(&ConnectionState) -> bool) {
    let mut rx = handle.subscribe_state();
    tokio::time::timeout(WAIT, rx.wait_for(|s| want(s)))
        .await
        .expect("timed out waiting for connection state")
        .expect("connection actor stopped");
}

async fn next_event(events: &mut mpsc::Receiver<TaggedEvent>) -> TaggedEvent {
    tokio::time::timeout(WAIT, events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

/// Accepts TCP connections and holds them without answering the handshake.
fn spawn_silent_server(listener: TcpListener) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    })
}

fn close_frame(code: CloseCode) -> Option<CloseFrame> {
    Some(CloseFrame {
        code,
        reason: String::new().into(),
    })
}

#[tokio::test]
async fn frames_arrive_in_order_tagged_with_their_conversation() {
    let (listener, ws_base) = listen().await;
    let (path_tx, path_rx) = tokio::sync::oneshot::channel();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let capture_path = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            let _ = path_tx.send(req.uri().path().to_string());
            Ok(resp)
        };
        let mut ws = tokio_tungstenite::accept_hdr_async(stream, capture_path)
            .await
            .unwrap();
        for frame in [
            r#"{"type":"chunk","content":"a"}"#,
            r#"{"type":"chunk"}"#,
            "not json",
            r#"{"type":"chunk","content":"b"}"#,
            r#"{"type":"complete"}"#,
        ] {
            ws.send(Message::Text(frame.to_string().into())).await.unwrap();
        }
        // Hold the socket open until the client is done.
        while let Some(Ok(_)) = ws.next().await {}
    });

    let (handle, mut events, _sleeper) = spawn_client(&ws_base);
    handle.connect("conv 1").await.unwrap();

    let received: Vec<TaggedEvent> = vec![
        next_event(&mut events).await,
        next_event(&mut events).await,
        next_event(&mut events).await,
    ];
    assert!(received.iter().all(|e| e.conversation_id == "conv 1"));
    assert_eq!(
        received.into_iter().map(|e| e.event).collect::<Vec<_>>(),
        vec![
            InboundEvent::Chunk("a".to_string()),
            InboundEvent::Chunk("b".to_string()),
            InboundEvent::Terminal(TerminalPayload::default()),
        ]
    );
    assert_eq!(path_rx.await.unwrap(), "/api/conversations/ws/conv%201");

    handle.disconnect().await.unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn unreachable_backend_gives_up_after_five_retries() {
    let (listener, ws_base) = listen().await;
    drop(listener);

    let (handle, _events, sleeper) = spawn_client(&ws_base);
    handle.connect("conv-1").await.unwrap();

    wait_for_state(&handle, |s| *s == ConnectionState::Closed { code: 1006 }).await;
    let secs: Vec<u64> = sleeper.delays().iter().map(Duration::as_secs).collect();
    assert_eq!(secs, vec![1, 2, 3, 4, 5]);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(sleeper.delays().len(), 5, "no sixth attempt");
    assert_eq!(handle.state(), ConnectionState::Closed { code: 1006 });
}

#[tokio::test]
async fn abnormal_close_reconnects_but_clean_close_does_not() {
    let (listener, ws_base) = listen().await;

    let server = tokio::spawn(async move {
        let mut first = accept(&listener).await;
        first.close(close_frame(CloseCode::Error)).await.unwrap();

        let mut second = accept(&listener).await;
        second
            .send(Message::Text(r#"{"type":"chunk","content":"again"}"#.to_string().into()))
            .await
            .unwrap();
        second.close(close_frame(CloseCode::Normal)).await.unwrap();

        // A third connection would mean a reconnect after a clean close.
        tokio::time::timeout(Duration::from_millis(300), listener.accept())
            .await
            .is_err()
    });

    let (handle, mut events, sleeper) = spawn_client(&ws_base);
    handle.connect("conv-1").await.unwrap();

    let event = next_event(&mut events).await;
    assert_eq!(event.event, InboundEvent::Chunk("again".to_string()));
    wait_for_state(&handle, |s| *s == ConnectionState::Closed { code: 1000 }).await;

    assert_eq!(sleeper.delays(), vec![Duration::from_secs(1)]);
    assert!(server.await.unwrap(), "client reconnected after a clean close");
}

#[tokio::test]
async fn send_writes_json_and_refuses_without_a_socket() {
    let (listener, ws_base) = listen().await;
    let (handle, _events, _sleeper) = spawn_client(&ws_base);

    let refused = handle.send(ClientMessage::stop()).await;
    assert!(matches!(refused, Err(ClientError::NotConnected)));

    let server = tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => return text.to_string(),
                Some(Ok(_)) => continue,
                other => panic!("socket ended before a message: {other:?}"),
            }
        }
    });

    handle.connect("conv-1").await.unwrap();
    wait_for_state(&handle, ConnectionState::is_open).await;
    handle.send(ClientMessage::stop()).await.unwrap();

    let received: serde_json::Value = serde_json::from_str(&server.await.unwrap()).unwrap();
    assert_eq!(received, serde_json::json!({"type": "stop"}));
}

#[tokio::test]
async fn disconnect_closes_with_normal_code_and_stays_idle() {
    let (listener, ws_base) = listen().await;

    let server = tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        while let Some(Ok(msg)) = ws.next().await {
            if let Message::Close(frame) = msg {
                return frame.map(|f| u16::from(f.code));
            }
        }
        None
    });

    let (handle, _events, sleeper) = spawn_client(&ws_base);
    handle.connect("conv-1").await.unwrap();
    wait_for_state(&handle, ConnectionState::is_open).await;

    handle.disconnect().await.unwrap();
    wait_for_state(&handle, |s| *s == ConnectionState::Idle).await;

    assert_eq!(server.await.unwrap(), Some(1000));
    assert!(sleeper.delays().is_empty());
}

#[tokio::test]
async fn becoming_visible_reconnects_immediately_after_giving_up() {
    let (listener, ws_base) = listen().await;
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let (handle, _events, sleeper) = spawn_client(&ws_base);
    handle.connect("conv-1").await.unwrap();
    wait_for_state(&handle, |s| matches!(s, ConnectionState::Closed { .. })).await;
    assert_eq!(sleeper.delays().len(), 5);

    let listener = TcpListener::bind(addr).await.unwrap();
    let server = tokio::spawn(async move {
        let _ws = accept(&listener).await;
        tokio::time::sleep(Duration::from_millis(500)).await;
    });

    handle.set_visible(true).await.unwrap();
    wait_for_state(&handle, ConnectionState::is_open).await;
    assert_eq!(sleeper.delays().len(), 5, "visibility reconnect skips the backoff");

    handle.disconnect().await.unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn pending_handshake_does_not_block_commands() {
    let (listener, ws_base) = listen().await;
    let server = spawn_silent_server(listener);

    let (handle, _events, sleeper) = spawn_client(&ws_base);
    handle.connect("conv-1").await.unwrap();
    wait_for_state(&handle, |s| *s == ConnectionState::Connecting).await;

    let started = Instant::now();
    let refused = tokio::time::timeout(Duration::from_secs(2), handle.send(ClientMessage::stop()))
        .await
        .expect("send blocked by pending handshake");
    assert!(matches!(refused, Err(ClientError::NotConnected)));

    handle.disconnect().await.unwrap();
    let mut rx = handle.subscribe_state();
    tokio::time::timeout(
        Duration::from_secs(2),
        rx.wait_for(|s| *s == ConnectionState::Idle),
    )
    .await
    .expect("disconnect blocked by pending handshake")
    .unwrap();
    assert!(started.elapsed() < Duration::from_secs(2));

    // The cancelled attempt must not resurface as a failure or a retry.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(handle.state(), ConnectionState::Idle);
    assert!(sleeper.delays().is_empty());
    server.abort();
}

#[tokio::test]
async fn switching_during_a_handshake_cancels_it() {
    let (listener, ws_base) = listen().await;
    let (path_tx, path_rx) = tokio::sync::oneshot::channel();
    let (stalled_tx, stalled_rx) = tokio::sync::oneshot::channel();

    let server = tokio::spawn(async move {
        // First connection never completes its handshake.
        let (_stalled, _) = listener.accept().await.unwrap();
        let _ = stalled_tx.send(());
        let (stream, _) = listener.accept().await.unwrap();
        let capture_path = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            let _ = path_tx.send(req.uri().path().to_string());
            Ok(resp)
        };
        let mut ws = tokio_tungstenite::accept_hdr_async(stream, capture_path)
            .await
            .unwrap();
        ws.send(Message::Text(r#"{"type":"chunk","content":"b"}"#.to_string().into()))
            .await
            .unwrap();
        while let Some(Ok(_)) = ws.next().await {}
    });

    let (handle, mut events, _sleeper) = spawn_client(&ws_base);
    let first = handle.connect("conv-a").await.unwrap();
    tokio::time::timeout(WAIT, stalled_rx).await.unwrap().unwrap();
    assert_eq!(handle.state(), ConnectionState::Connecting);
    let second = handle.connect("conv-b").await.unwrap();
    assert!(second > first);

    let mut rx = handle.subscribe_state();
    tokio::time::timeout(Duration::from_secs(2), rx.wait_for(ConnectionState::is_open))
        .await
        .expect("switch blocked by pending handshake")
        .unwrap();
    assert_eq!(path_rx.await.unwrap(), "/api/conversations/ws/conv-b");

    let event = next_event(&mut events).await;
    assert_eq!(event.conversation_id, "conv-b");
    assert_eq!(event.generation, second);
    assert_eq!(event.event, InboundEvent::Chunk("b".to_string()));

    handle.disconnect().await.unwrap();
    server.await.unwrap();
}
