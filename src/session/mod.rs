//! Control session with the remote controller
//!
//! One long-lived task owns the websocket. It registers on every open, feeds
//! inbound messages to the engine one at a time and reconnects after a fixed
//! delay for as long as the process lives.

pub mod protocol;

pub use protocol::{ControlMessage, OutboundMessage};

use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch, Notify};
use tokio::time::{interval_at, Instant, Interval};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::config::ControllerConfig;
use crate::domain::ItemIdentity;
use crate::engine::BidEngine;
use crate::error::{AutobidError, Result};
use crate::status::{Status, StatusReporter};

/// Connection lifecycle as seen from outside the session task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Open,
    /// Closed, waiting out the reconnect delay
    ReconnectPending,
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LinkState::Disconnected => "DISCONNECTED",
            LinkState::Connecting => "CONNECTING",
            LinkState::Open => "OPEN",
            LinkState::ReconnectPending => "RECONNECT_PENDING",
        };
        write!(f, "{}", s)
    }
}

/// Cheap handle for observing and nudging a running [`ControlSession`]
#[derive(Clone)]
pub struct SessionHandle {
    link_rx: watch::Receiver<LinkState>,
    wake: Arc<Notify>,
    attempts: Arc<AtomicU64>,
}

impl SessionHandle {
    pub fn link_state(&self) -> LinkState {
        *self.link_rx.borrow()
    }

    /// Connection attempts made so far
    pub fn connect_attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Watch link state changes
    pub fn subscribe(&self) -> watch::Receiver<LinkState> {
        self.link_rx.clone()
    }

    /// Connect immediately instead of waiting out the reconnect delay.
    ///
    /// A no-op while a connection is open or being opened. Returns whether a
    /// pending reconnect was brought forward.
    pub fn connect_now(&self) -> bool {
        match self.link_state() {
            LinkState::ReconnectPending => {
                // Wakes only a delay already in progress, never stores a permit
                self.wake.notify_waiters();
                true
            }
            state => {
                debug!(%state, "connect requested while link busy, ignoring");
                false
            }
        }
    }
}

pub struct ControlSession {
    config: ControllerConfig,
    identity: ItemIdentity,
    engine: BidEngine,
    reporter: Arc<dyn StatusReporter>,
    link_tx: watch::Sender<LinkState>,
    wake: Arc<Notify>,
    attempts: Arc<AtomicU64>,
}

impl ControlSession {
    pub fn new(
        config: ControllerConfig,
        identity: ItemIdentity,
        engine: BidEngine,
        reporter: Arc<dyn StatusReporter>,
    ) -> (Self, SessionHandle) {
        let (link_tx, link_rx) = watch::channel(LinkState::Disconnected);
        let wake = Arc::new(Notify::new());
        let attempts = Arc::new(AtomicU64::new(0));

        let handle = SessionHandle {
            link_rx,
            wake: wake.clone(),
            attempts: attempts.clone(),
        };
        let session = Self {
            config,
            identity,
            engine,
            reporter,
            link_tx,
            wake,
            attempts,
        };
        (session, handle)
    }

    fn set_link(&self, state: LinkState) {
        self.link_tx.send_replace(state);
    }

    /// Run until shutdown, reconnecting after every close or failure
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(item = %self.identity, "Starting control session: {}", self.config.url);

        loop {
            self.set_link(LinkState::Connecting);
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;

            let result = tokio::select! {
                result = self.connect_and_serve() => result,
                _ = shutdown.recv() => break,
            };

            match result {
                Ok(()) => info!("Controller connection closed"),
                Err(e) => error!("Controller connection error (attempt {}): {}", attempt, e),
            }

            // Registered before the link reads ReconnectPending so no request is missed
            let wake = self.wake.notified();
            tokio::pin!(wake);

            // Exactly one pending reconnect: the next attempt only starts from here
            self.set_link(LinkState::ReconnectPending);
            self.reporter.report(Status::Disconnected);
            let delay = self.config.reconnect_delay();
            info!("Reconnecting to controller in {:?}", delay);

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = &mut wake => info!("Reconnecting now on request"),
                _ = shutdown.recv() => break,
            }
        }

        self.set_link(LinkState::Disconnected);
        info!("Control session stopped");
    }

    async fn connect_and_serve(&self) -> Result<()> {
        let url = Url::parse(&self.config.url)
            .map_err(|e| AutobidError::Protocol(format!("Invalid controller URL: {}", e)))?;

        self.reporter.report(Status::Connecting);
        info!("Connecting to controller: {}", url);

        let (ws_stream, _) = tokio::time::timeout(self.config.connect_timeout(), connect_async(&url))
            .await
            .map_err(|_| AutobidError::ConnectTimeout(url.to_string()))??;

        self.set_link(LinkState::Open);
        self.reporter.report(Status::Connected);
        info!("Connected to controller");

        let (mut write, mut read) = ws_stream.split();

        let register = OutboundMessage::register(&self.identity).to_json()?;
        write.send(Message::Text(register)).await?;
        self.reporter.report(Status::Registered);
        info!(item = %self.identity, "Registered with controller");

        let mut keepalive = self
            .config
            .ping_interval()
            .map(|period| interval_at(Instant::now() + period, period));

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_text(&text).await;
                        }
                        Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                            Ok(text) => self.handle_text(&text).await,
                            Err(_) => warn!("Ignoring non-UTF-8 binary frame"),
                        },
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            info!(?frame, "Received close frame from controller");
                            break;
                        }
                        Some(Err(e)) => {
                            return Err(AutobidError::WebSocket(e));
                        }
                        None => {
                            info!("Controller stream ended");
                            break;
                        }
                        _ => {}
                    }
                }
                _ = tick(&mut keepalive) => {
                    write.send(Message::Ping(vec![])).await?;
                    debug!("Sent ping to controller");
                }
            }
        }

        Ok(())
    }

    /// Decode and dispatch one inbound frame. Bad frames are logged and dropped.
    pub async fn handle_text(&self, text: &str) {
        let msg = match ControlMessage::decode(text) {
            Ok(msg) => msg,
            Err(e) => {
                let preview: String = text.chars().take(120).collect();
                error!("Error processing controller message: {} ({})", e, preview);
                return;
            }
        };

        debug!(kind = msg.kind(), "controller message");
        match msg {
            ControlMessage::ApplySettings(settings) => {
                info!("Applying settings from controller");
                self.engine.apply(settings).await;
            }
            ControlMessage::Start(settings) => {
                info!("Start requested by controller");
                self.engine.configure(settings);
                if let Err(reason) = self.engine.start().await {
                    warn!(%reason, "Start refused");
                }
            }
            ControlMessage::Stop => {
                info!("Stop requested by controller");
                self.engine.stop();
            }
            ControlMessage::Unknown(kind) => {
                info!("Ignoring unknown message type: {}", kind);
            }
        }
    }
}

async fn tick(keepalive: &mut Option<Interval>) {
    match keepalive {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EngineState;
    use crate::driver::{shared, DriverCall, PaperConfig, PaperDriver, PaperPage};
    use crate::engine::AnchoredClock;
    use crate::status::RecordingReporter;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn session() -> (ControlSession, SessionHandle, PaperPage) {
        let driver = PaperDriver::new(PaperConfig::default());
        let page = driver.page();
        let reporter = Arc::new(RecordingReporter::new());
        let clock = AnchoredClock::new(
            NaiveDate::from_ymd_opt(2026, 10, 19)
                .unwrap()
                .and_hms_opt(9, 0, 0)
                .unwrap(),
        );
        let engine = BidEngine::new(shared(driver), Arc::new(clock), reporter.clone());
        let (session, handle) = ControlSession::new(
            ControllerConfig::default(),
            ItemIdentity::new("42", "https://img/42.jpg"),
            engine,
            reporter,
        );
        (session, handle, page)
    }

    fn settings_frame(kind: &str) -> String {
        serde_json::json!({
            "type": kind,
            "globalParams": {
                "targetHour": 10, "targetMinute": 0, "targetSecond": 0,
                "decrementValue": 1, "checkDelay": 100,
                "resultCheckDelay": 100, "resubmitDelay": 100
            },
            "specificParams": {
                "minValues": [1], "skuPrices": [3], "autoDecrement": true
            }
        })
        .to_string()
    }

    #[tokio::test(start_paused = true)]
    async fn test_apply_settings_previews_only() {
        let (session, _, page) = session();
        session.handle_text(&settings_frame("apply_settings")).await;

        assert_eq!(page.price_writes(), vec![vec![dec!(3)]]);
        assert_eq!(session.engine.state(), EngineState::Idle);
        assert!(session.engine.settings().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_then_stop() {
        let (session, _, page) = session();
        session.handle_text(&settings_frame("start")).await;
        assert!(session.engine.state().is_active());
        assert_eq!(page.calls(), vec![DriverCall::LocateSubmit]);

        session.handle_text(r#"{"type":"stop"}"#).await;
        assert_eq!(session.engine.state(), EngineState::Idle);

        tokio::time::sleep(Duration::from_secs(7200)).await;
        assert_eq!(page.submissions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bad_frames_are_dropped() {
        let (session, _, page) = session();
        session.handle_text("{oops").await;
        session.handle_text(r#"{"type":"start","globalParams":{}}"#).await;
        session.handle_text(r#"{"type":"mystery"}"#).await;

        assert!(page.calls().is_empty());
        assert_eq!(session.engine.state(), EngineState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_now_leaves_no_wakeup_behind() {
        let (session, handle, _) = session();
        session.set_link(LinkState::ReconnectPending);
        assert!(handle.connect_now());
        assert!(handle.connect_now());

        // A later delay must not be cut short by requests made before it began
        let pending = tokio::time::timeout(Duration::from_millis(10), session.wake.notified());
        assert!(pending.await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_now_wakes_delay_in_progress() {
        let (session, handle, _) = session();
        let wake = session.wake.notified();
        tokio::pin!(wake);
        session.set_link(LinkState::ReconnectPending);

        assert!(handle.connect_now());
        assert!(tokio::time::timeout(Duration::from_millis(10), wake).await.is_ok());
    }

    #[test]
    fn test_connect_now_ignored_before_disconnect() {
        let (_session, handle, _) = session();
        assert_eq!(handle.link_state(), LinkState::Disconnected);
        assert!(!handle.connect_now());
        assert_eq!(handle.connect_attempts(), 0);
    }
}
