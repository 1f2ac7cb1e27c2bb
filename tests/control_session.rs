//! Control session against an in-process websocket controller on loopback

use autobid::config::ControllerConfig;
use autobid::domain::{EngineState, ItemIdentity};
use autobid::driver::{shared, PaperConfig, PaperDriver, PaperPage};
use autobid::engine::{AnchoredClock, BidEngine};
use autobid::session::{ControlSession, LinkState, SessionHandle};
use autobid::status::{RecordingReporter, Status};
use chrono::NaiveDate;
use futures_util::{SinkExt, StreamExt};
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::{accept_async, tungstenite::Message, WebSocketStream};

type ServerSide = WebSocketStream<TcpStream>;

struct Agent {
    engine: BidEngine,
    page: PaperPage,
    reporter: Arc<RecordingReporter>,
    handle: SessionHandle,
    _shutdown: broadcast::Sender<()>,
}

async fn controller() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    (listener, url)
}

fn spawn_agent(url: String, reconnect_delay_ms: u64) -> Agent {
    let driver = PaperDriver::new(PaperConfig::default());
    let page = driver.page();
    let reporter = Arc::new(RecordingReporter::new());
    let clock = AnchoredClock::new(
        NaiveDate::from_ymd_opt(2026, 10, 19)
            .unwrap()
            .and_hms_opt(15, 0, 0)
            .unwrap(),
    );
    let engine = BidEngine::new(shared(driver), Arc::new(clock), reporter.clone());
    let config = ControllerConfig {
        url,
        reconnect_delay_ms,
        connect_timeout_ms: 2000,
        ping_interval_secs: 0,
    };
    let (session, handle) = ControlSession::new(
        config,
        ItemIdentity::new("1005006", "https://img/1005006.jpg"),
        engine.clone(),
        reporter.clone(),
    );

    let (shutdown_tx, _) = broadcast::channel(1);
    tokio::spawn(session.run(shutdown_tx.subscribe()));

    Agent {
        engine,
        page,
        reporter,
        handle,
        _shutdown: shutdown_tx,
    }
}

async fn accept(listener: &TcpListener) -> ServerSide {
    let (stream, _) = timeout(Duration::from_secs(5), listener.accept())
        .await
        .expect("agent did not connect")
        .unwrap();
    accept_async(stream).await.unwrap()
}

async fn next_json(ws: &mut ServerSide) -> Value {
    loop {
        let msg = timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("no message from agent")
            .expect("stream ended")
            .unwrap();
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

async fn wait_until(what: &str, check: impl Fn() -> bool) {
    timeout(Duration::from_secs(5), async {
        while !check() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {}", what));
}

fn settings_frame(kind: &str, prices: Value) -> Message {
    Message::Text(
        json!({
            "type": kind,
            "globalParams": {
                "targetHour": 14, "targetMinute": 30, "targetSecond": 0,
                "decrementValue": 0.5, "checkDelay": 50,
                "resultCheckDelay": 50, "resubmitDelay": 50
            },
            "specificParams": {
                "minValues": [1, 1], "skuPrices": prices, "autoDecrement": false
            }
        })
        .to_string(),
    )
}

#[tokio::test]
async fn test_registers_on_open() {
    let (listener, url) = controller().await;
    let agent = spawn_agent(url, 200);

    let mut ws = accept(&listener).await;
    let register = next_json(&mut ws).await;
    assert_eq!(
        register,
        json!({
            "type": "register",
            "productId": "1005006",
            "imageUrl": "https://img/1005006.jpg",
            "itemId": "1005006",
            "imageRef": "https://img/1005006.jpg"
        })
    );

    wait_until("open link", || agent.handle.link_state() == LinkState::Open).await;
    wait_until("registered status", || {
        agent.reporter.last() == Some(Status::Registered)
    })
    .await;
    assert!(!agent.handle.connect_now());
}

#[tokio::test]
async fn test_commands_dispatch_in_order_and_survive_bad_frames() {
    let (listener, url) = controller().await;
    let agent = spawn_agent(url, 200);
    let mut ws = accept(&listener).await;
    next_json(&mut ws).await;

    ws.send(settings_frame("apply_settings", json!([5, 8])))
        .await
        .unwrap();
    wait_until("preview write", || agent.page.price_writes().len() == 1).await;
    assert_eq!(&agent.page.fields()[..2], &[dec!(5.00), dec!(8.00)]);
    assert_eq!(agent.engine.state(), EngineState::Idle);

    ws.send(Message::Text("{not json".into())).await.unwrap();
    ws.send(Message::Text(r#"{"type":"firmware_update"}"#.into()))
        .await
        .unwrap();

    // Target is in the past for the agent's clock, so the run fires at once
    ws.send(settings_frame("start", json!([6, 9]))).await.unwrap();
    wait_until("submission", || agent.page.submissions() == 1).await;
    wait_until("run settles", || {
        agent.engine.snapshot().last_outcome.is_some()
    })
    .await;

    let generation = agent.engine.snapshot().generation;
    ws.send(Message::Text(r#"{"type":"stop"}"#.into()))
        .await
        .unwrap();
    wait_until("stopped", || agent.engine.snapshot().generation > generation).await;
    assert_eq!(agent.engine.state(), EngineState::Idle);
    assert_eq!(agent.handle.link_state(), LinkState::Open);
    assert_eq!(agent.handle.connect_attempts(), 1);
}

#[tokio::test]
async fn test_reconnects_after_drop_one_connection_at_a_time() {
    let (listener, url) = controller().await;
    let agent = spawn_agent(url, 200);

    let mut first = accept(&listener).await;
    next_json(&mut first).await;
    drop(first);

    wait_until("disconnect reported", || {
        agent.reporter.history().contains(&Status::Disconnected)
    })
    .await;

    let mut second = accept(&listener).await;
    let register = next_json(&mut second).await;
    assert_eq!(register["type"], "register");
    assert_eq!(agent.handle.connect_attempts(), 2);

    // While the second connection stays open nobody dials again
    assert!(timeout(Duration::from_millis(600), listener.accept())
        .await
        .is_err());
    assert_eq!(agent.handle.connect_attempts(), 2);
}

#[tokio::test]
async fn test_connect_now_skips_reconnect_delay() {
    let (listener, url) = controller().await;
    let agent = spawn_agent(url, 60_000);

    let mut first = accept(&listener).await;
    next_json(&mut first).await;
    first.close(None).await.unwrap();

    wait_until("reconnect pending", || {
        agent.handle.link_state() == LinkState::ReconnectPending
    })
    .await;
    assert!(agent.handle.connect_now());

    let mut second = accept(&listener).await;
    assert_eq!(next_json(&mut second).await["productId"], "1005006");
    wait_until("open again", || agent.handle.link_state() == LinkState::Open).await;
    assert!(!agent.handle.connect_now());
}
