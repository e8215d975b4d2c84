use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use uuid::Uuid;

use crate::auth::{AccessToken, Credentials, OAuthClient};
use crate::config::{Settings, WebSocketConfig};
use crate::error::{AppError, Result};
use crate::tasks::HeartbeatTask;
use crate::websocket::{EventHandler, MessageDispatcher};

use super::session::{receive_loop, run_writer};
use super::stats::SessionStats;
use super::types::{CloseReason, ConnectionState, SessionSummary};

/// Owns the connect / heartbeat / receive lifecycle of the event subscription
pub struct ConnectionManager {
    credentials: Credentials,
    oauth: OAuthClient,
    config: WebSocketConfig,
    dispatcher: MessageDispatcher,
    state: watch::Sender<ConnectionState>,
    transitions: broadcast::Sender<ConnectionState>,
    shutdown: broadcast::Sender<()>,
}

/// Buffered transitions per subscriber; one connect() produces at most four
const TRANSITION_BUFFER: usize = 16;

impl ConnectionManager {
    pub fn new(settings: &Settings, handler: Arc<dyn EventHandler>) -> Result<Self> {
        let (state, _) = watch::channel(ConnectionState::Idle);
        let (transitions, _) = broadcast::channel(TRANSITION_BUFFER);
        let (shutdown, _) = broadcast::channel(1);

        Ok(Self {
            credentials: settings.credentials(),
            oauth: OAuthClient::new(&settings.oauth)?,
            config: settings.websocket.clone(),
            dispatcher: MessageDispatcher::new(handler),
            state,
            transitions,
            shutdown,
        })
    }

    /// Current state
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receive every state transition, in order, from now on
    pub fn subscribe_state(&self) -> broadcast::Receiver<ConnectionState> {
        self.transitions.subscribe()
    }

    /// Sender used to request a local shutdown of the running session
    pub fn shutdown_signal(&self) -> broadcast::Sender<()> {
        self.shutdown.clone()
    }

    fn transition(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            tracing::debug!(from = %previous, to = %next, "Connection state changed");
            // No subscribers is fine
            let _ = self.transitions.send(next);
        }
    }

    /// Exchange the configured credentials for an access token
    pub async fn authenticate(&self) -> Result<AccessToken> {
        self.oauth.authenticate(&self.credentials).await
    }

    /// Subscription URL with the access token appended
    pub fn websocket_url(&self, token: &AccessToken) -> String {
        append_access_token(&self.config.url, token)
    }

    /// Authenticate, open the WebSocket and run the session until it closes.
    ///
    /// Authentication and handshake failures leave the manager `Closed` and
    /// are returned without any retry. A session that ends through a
    /// transport error is reported as `AppError::Connection`.
    #[tracing::instrument(name = "ws.connect", skip(self))]
    pub async fn connect(&self) -> Result<SessionSummary> {
        let mut shutdown = self.shutdown.subscribe();

        self.transition(ConnectionState::Authenticating);
        let token = match cancellable(self.authenticate(), &mut shutdown).await {
            Ok(token) => token,
            Err(e) => {
                self.transition(ConnectionState::Closed);
                tracing::error!(code = e.code(), error = %e, "Authentication failed");
                return Err(e);
            }
        };

        self.transition(ConnectionState::Connecting);
        let url = self.websocket_url(&token);
        let handshake = async {
            match timeout(self.config.connect_timeout(), connect_async(url.as_str())).await {
                Ok(Ok((socket, response))) => {
                    tracing::info!(
                        status = response.status().as_u16(),
                        endpoint = %redact_query(&self.config.url),
                        "Connected to WebSocket"
                    );
                    Ok(socket)
                }
                Ok(Err(e)) => Err(AppError::WebSocket(e)),
                Err(_) => Err(AppError::Connection(format!(
                    "handshake timed out after {}s",
                    self.config.connect_timeout_secs
                ))),
            }
        };

        let socket = match cancellable(handshake, &mut shutdown).await {
            Ok(socket) => socket,
            Err(e) => {
                self.transition(ConnectionState::Closed);
                tracing::error!(code = e.code(), error = %e, "Failed to connect to WebSocket");
                return Err(e);
            }
        };

        self.drive_session(socket, shutdown).await
    }

    /// Run the heartbeat, writer and receive loop over an already connected
    /// socket until the session closes.
    pub async fn run_session<S>(&self, socket: S) -> Result<SessionSummary>
    where
        S: Stream<Item = std::result::Result<Message, WsError>>
            + Sink<Message, Error = WsError>
            + Send
            + Unpin
            + 'static,
    {
        let shutdown = self.shutdown.subscribe();
        self.drive_session(socket, shutdown).await
    }

    async fn drive_session<S>(
        &self,
        socket: S,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<SessionSummary>
    where
        S: Stream<Item = std::result::Result<Message, WsError>>
            + Sink<Message, Error = WsError>
            + Send
            + Unpin
            + 'static,
    {
        let session_id = Uuid::new_v4();
        let connected_at = chrono::Utc::now();
        let started = Instant::now();
        let stats = Arc::new(SessionStats::default());

        self.transition(ConnectionState::Open);
        tracing::info!(session_id = %session_id, "Session open");

        let (sink, mut stream) = socket.split::<Message>();
        let (outbound_tx, outbound_rx) = mpsc::channel(self.config.outbound_buffer);
        let (stop_tx, _) = broadcast::channel::<()>(1);

        let writer = tokio::spawn(run_writer(
            sink,
            outbound_rx,
            stop_tx.subscribe(),
            stats.clone(),
        ));
        let heartbeat = tokio::spawn(
            HeartbeatTask::new(&self.config, outbound_tx, stop_tx.subscribe()).run(),
        );

        let close_reason = receive_loop(
            session_id,
            &mut stream,
            &self.dispatcher,
            &stats,
            &mut shutdown,
        )
        .await;

        // Heartbeat stops before the writer releases the socket
        let _ = stop_tx.send(());
        if let Err(e) = heartbeat.await {
            tracing::error!(session_id = %session_id, error = %e, "Heartbeat task panicked");
        }

        match writer.await {
            Ok(mut sink) => {
                if close_reason == CloseReason::Local {
                    let frame = CloseFrame {
                        code: CloseCode::Normal,
                        reason: "client shutdown".into(),
                    };
                    if let Err(e) = sink.send(Message::Close(Some(frame))).await {
                        tracing::debug!(session_id = %session_id, error = %e, "Failed to send close frame");
                    }
                }
                // Flushes the reply to a server-initiated close
                if let Err(e) = sink.close().await {
                    tracing::debug!(session_id = %session_id, error = %e, "Socket close returned error");
                }
            }
            Err(e) => {
                tracing::error!(session_id = %session_id, error = %e, "Writer task panicked");
            }
        }
        drop(stream);

        self.transition(ConnectionState::Closed);

        let summary = SessionSummary {
            session_id,
            connected_at,
            duration_ms: started.elapsed().as_millis() as u64,
            frames_received: stats.frames_received(),
            heartbeats_sent: stats.heartbeats_sent(),
            user_created_events: stats.user_created_events(),
            malformed_frames: stats.malformed_frames(),
            close_reason,
        };

        tracing::info!(
            session_id = %session_id,
            duration_ms = summary.duration_ms,
            frames_received = summary.frames_received,
            heartbeats_sent = summary.heartbeats_sent,
            user_created_events = summary.user_created_events,
            malformed_frames = summary.malformed_frames,
            close_reason = ?summary.close_reason,
            "Connection closed"
        );

        match &summary.close_reason {
            CloseReason::Transport { error } => Err(AppError::Connection(error.clone())),
            _ => Ok(summary),
        }
    }
}

/// Run `fut` unless a shutdown arrives first
async fn cancellable<T>(
    fut: impl Future<Output = Result<T>>,
    shutdown: &mut broadcast::Receiver<()>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = shutdown.recv() => Err(AppError::Connection(
            "shutdown requested before the session opened".to_string(),
        )),
        result = fut => result,
    }
}

/// Append `access_token` to a URL that may already carry a query string
pub fn append_access_token(url: &str, token: &AccessToken) -> String {
    let separator = if url.ends_with('?') || url.ends_with('&') {
        ""
    } else if url.contains('?') {
        "&"
    } else {
        "?"
    };
    format!(
        "{}{}access_token={}",
        url,
        separator,
        urlencoding::encode(token.as_str())
    )
}

/// Strip the query string before logging a URL
fn redact_query(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CredentialsConfig, LoggingConfig, OAuthConfig};
    use crate::websocket::EventContent;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio_tungstenite::tungstenite::protocol::Role;
    use tokio_tungstenite::WebSocketStream;

    #[derive(Default)]
    struct CountingHandler {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EventHandler for CountingHandler {
        async fn on_user_created(&self, _event: &EventContent) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn test_settings() -> Settings {
        Settings {
            credentials: CredentialsConfig {
                account_id: "acct".into(),
                client_id: "client".into(),
                client_secret: "secret".into(),
            },
            oauth: OAuthConfig::default(),
            websocket: WebSocketConfig {
                url: "wss://ws.zoom.us/ws?subscriptionId=sub-1".into(),
                ..Default::default()
            },
            logging: LoggingConfig::default(),
        }
    }

    async fn socket_pair() -> (
        WebSocketStream<tokio::io::DuplexStream>,
        WebSocketStream<tokio::io::DuplexStream>,
    ) {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let client = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;
        let server = WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;
        (client, server)
    }

    const HEARTBEAT: &str = r#"{"module":"heartbeat"}"#;
    const USER_CREATED: &str = r#"{"module":"message","content":"{\"event\":\"user.created\"}"}"#;

    #[test]
    fn test_append_access_token() {
        let token = AccessToken::new("a+b/c").unwrap();
        assert_eq!(
            append_access_token("wss://ws.zoom.us/ws?subscriptionId=1", &token),
            "wss://ws.zoom.us/ws?subscriptionId=1&access_token=a%2Bb%2Fc"
        );
        assert_eq!(
            append_access_token("wss://ws.zoom.us/ws", &token),
            "wss://ws.zoom.us/ws?access_token=a%2Bb%2Fc"
        );
        assert_eq!(
            append_access_token("wss://ws.zoom.us/ws?", &token),
            "wss://ws.zoom.us/ws?access_token=a%2Bb%2Fc"
        );
    }

    #[test]
    fn test_redact_query() {
        assert_eq!(redact_query("wss://host/ws?access_token=x"), "wss://host/ws");
        assert_eq!(redact_query("wss://host/ws"), "wss://host/ws");
    }

    #[test]
    fn test_new_manager_is_idle() {
        let manager =
            ConnectionManager::new(&test_settings(), Arc::new(CountingHandler::default())).unwrap();
        assert_eq!(manager.state(), ConnectionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeats_while_open_and_none_after_remote_close() {
        let handler = Arc::new(CountingHandler::default());
        let manager = Arc::new(ConnectionManager::new(&test_settings(), handler.clone()).unwrap());
        let (client, mut server) = socket_pair().await;

        let session = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.run_session(client).await })
        };

        // Immediate heartbeat, then one per interval
        let first = server.next().await.unwrap().unwrap();
        assert_eq!(first, Message::Text(HEARTBEAT.into()));
        assert_eq!(manager.state(), ConnectionState::Open);

        let before = tokio::time::Instant::now();
        let second = server.next().await.unwrap().unwrap();
        assert_eq!(second, Message::Text(HEARTBEAT.into()));
        assert!(before.elapsed() >= Duration::from_secs(30));

        server.send(Message::Text(USER_CREATED.into())).await.unwrap();
        server.send(Message::Text("not json".into())).await.unwrap();
        server.send(Message::Close(None)).await.unwrap();

        // Only the close reply may follow
        while let Some(Ok(frame)) = server.next().await {
            assert!(frame.is_close(), "unexpected frame after close: {:?}", frame);
        }

        let summary = session.await.unwrap().unwrap();
        assert_eq!(summary.heartbeats_sent, 2);
        assert_eq!(summary.user_created_events, 1);
        assert_eq!(summary.malformed_frames, 1);
        assert_eq!(summary.frames_received, 2);
        assert!(matches!(summary.close_reason, CloseReason::Remote { .. }));
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(manager.state(), ConnectionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_error_closes_session() {
        let manager =
            ConnectionManager::new(&test_settings(), Arc::new(CountingHandler::default())).unwrap();
        let (client, mut server) = socket_pair().await;

        let session = manager.run_session(client);
        let peer = async move {
            let _ = server.next().await;
            // Drop without a close handshake
            drop(server);
        };

        let (result, _) = tokio::join!(session, peer);
        assert!(matches!(result, Err(AppError::Connection(_))));
        assert_eq!(manager.state(), ConnectionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_shutdown_sends_normal_close() {
        let manager = Arc::new(
            ConnectionManager::new(&test_settings(), Arc::new(CountingHandler::default())).unwrap(),
        );
        let (client, mut server) = socket_pair().await;
        let shutdown = manager.shutdown_signal();

        let session = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.run_session(client).await })
        };

        assert_eq!(server.next().await.unwrap().unwrap(), Message::Text(HEARTBEAT.into()));
        shutdown.send(()).unwrap();

        let frame = server.next().await.unwrap().unwrap();
        match frame {
            Message::Close(Some(close)) => assert_eq!(close.code, CloseCode::Normal),
            other => panic!("expected close frame, got {:?}", other),
        }

        let summary = session.await.unwrap().unwrap();
        assert_eq!(summary.close_reason, CloseReason::Local);
        assert_eq!(summary.heartbeats_sent, 1);
    }
}
