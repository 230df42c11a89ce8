//! Unix domain socket server for IPC
//!
//! Bridges the in-process bus to other processes: speech recognizers
//! publish utterances, synthesizers subscribe to the outbound topic, and
//! tools query the turn machine's status.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, error, info, warn};

use crate::bus::{MessageChannel, Subscription};
use crate::events::TurnEvent;

use super::protocol::{DaemonStatus, Request, Response, MAX_FRAME_LEN};

/// Frames queued for one client before pushed messages are dropped
const CLIENT_QUEUE_LEN: usize = 256;

/// IPC Server handling client connections
pub struct Server {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
    state: Arc<RwLock<ServerState>>,
    bus: Arc<dyn MessageChannel>,
    shutdown_tx: broadcast::Sender<()>,
}

/// Shared server state
struct ServerState {
    status: DaemonStatus,
    start_time: std::time::Instant,
}

impl Server {
    /// Create a new IPC server bridging `bus`
    pub fn new(socket_path: &Path, bus: Arc<dyn MessageChannel>) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).context("failed to create socket directory")?;
        }

        // Remove stale socket if it exists
        if socket_path.exists() {
            std::fs::remove_file(socket_path).context("failed to remove stale socket")?;
        }

        let listener = UnixListener::bind(socket_path).context("failed to bind Unix socket")?;

        // Set socket permissions to owner-only (0600)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
        }

        let (shutdown_tx, _) = broadcast::channel(1);

        let state = Arc::new(RwLock::new(ServerState {
            status: DaemonStatus::default(),
            start_time: std::time::Instant::now(),
        }));

        info!(?socket_path, "IPC server listening");

        Ok(Self {
            socket_path: socket_path.to_owned(),
            listener: Some(listener),
            state,
            bus,
            shutdown_tx,
        })
    }

    /// Fold a turn event into the status reported to clients
    pub async fn record_event(&self, event: &TurnEvent) {
        let mut server_state = self.state.write().await;
        match event {
            TurnEvent::StateEntered { state } => {
                server_state.status.state = Some(state.clone());
            }
            TurnEvent::StateExited { .. } => {}
            TurnEvent::TurnCompleted { outcome, .. } => {
                server_state.status.state = None;
                server_state.status.turns_completed += 1;
                info!(%outcome, turns = server_state.status.turns_completed, "IPC server: turn recorded");
            }
        }
    }

    /// Current status snapshot
    pub async fn status(&self) -> DaemonStatus {
        let state = self.state.read().await;
        DaemonStatus {
            uptime_secs: state.start_time.elapsed().as_secs(),
            ..state.status.clone()
        }
    }

    /// Run the server, accepting connections
    pub async fn run(&self) -> Result<()> {
        let listener = self.listener.as_ref().context("server not initialized")?;

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    debug!("client connected");
                    let state = Arc::clone(&self.state);
                    let bus = Arc::clone(&self.bus);
                    let mut shutdown_rx = self.shutdown_tx.subscribe();

                    tokio::spawn(async move {
                        tokio::select! {
                            result = Self::handle_client(stream, state, bus) => {
                                if let Err(e) = result {
                                    warn!(?e, "client handler error");
                                }
                            }
                            _ = shutdown_rx.recv() => {
                                debug!("client handler shutting down");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(?e, "accept error");
                }
            }
        }
    }

    /// Handle a single client connection
    async fn handle_client(
        stream: UnixStream,
        state: Arc<RwLock<ServerState>>,
        bus: Arc<dyn MessageChannel>,
    ) -> Result<()> {
        let (mut reader, mut writer) = stream.into_split();

        // Responses and pushed messages share one ordered outbound queue
        let (out_tx, mut out_rx) = mpsc::channel::<Response>(CLIENT_QUEUE_LEN);
        let writer_task = tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                if let Err(e) = send_message(&mut writer, &frame).await {
                    debug!(?e, "client write failed");
                    break;
                }
            }
        });

        // Dropped on exit, which removes the client's bus callbacks
        let mut subscriptions: Vec<Subscription> = Vec::new();

        let result = loop {
            let msg_buf = match read_message(&mut reader).await {
                Ok(Some(buf)) => buf,
                Ok(None) => {
                    debug!("client disconnected");
                    break Ok(());
                }
                Err(e) => break Err(e),
            };

            let response = match serde_json::from_slice::<Request>(&msg_buf) {
                Ok(request) => {
                    debug!(?request, "received request");
                    Self::process_request(request, &state, &bus, &out_tx, &mut subscriptions).await
                }
                Err(e) => {
                    warn!(error = %e, "unparseable request");
                    Response::error("invalid_request", e.to_string())
                }
            };

            if out_tx.send(response).await.is_err() {
                break Ok(());
            }
        };

        drop(subscriptions);
        drop(out_tx);
        let _ = writer_task.await;

        result
    }

    /// Process a request and return the response frame
    async fn process_request(
        request: Request,
        state: &Arc<RwLock<ServerState>>,
        bus: &Arc<dyn MessageChannel>,
        out_tx: &mpsc::Sender<Response>,
        subscriptions: &mut Vec<Subscription>,
    ) -> Response {
        match request {
            Request::Ping => Response::Pong,

            Request::GetStatus => {
                let state = state.read().await;
                Response::Status(DaemonStatus {
                    uptime_secs: state.start_time.elapsed().as_secs(),
                    ..state.status.clone()
                })
            }

            Request::Publish { topic, data } => match bus.publish(&topic, &data) {
                Ok(()) => {
                    debug!(%topic, "client published");
                    Response::Published
                }
                Err(e) => Response::error("channel_closed", e.to_string()),
            },

            Request::Subscribe { topic } => {
                if subscriptions.iter().any(|s| s.topic() == topic) {
                    debug!(%topic, "client already subscribed");
                    return Response::Subscribed { topic };
                }

                let tx = out_tx.clone();
                let push_topic = topic.clone();
                // Runs on the publisher's task and must never block
                let callback = Arc::new(move |data: &str| {
                    let frame = Response::Message {
                        topic: push_topic.clone(),
                        data: data.to_owned(),
                    };
                    if let Err(mpsc::error::TrySendError::Full(_)) = tx.try_send(frame) {
                        warn!(topic = %push_topic, "client queue full, dropping message");
                    }
                });

                match Subscription::new(Arc::clone(bus), &topic, callback) {
                    Ok(subscription) => {
                        info!(%topic, "client subscribed");
                        subscriptions.push(subscription);
                        Response::Subscribed { topic }
                    }
                    Err(e) => Response::error("channel_closed", e.to_string()),
                }
            }
        }
    }

    /// Gracefully shutdown the server
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());

        // Remove socket file
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(?e, "failed to remove socket file");
            }
        }

        info!("IPC server shutdown complete");
    }
}

/// Read one length-prefixed frame. `None` on clean end of stream.
pub async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        anyhow::bail!("frame of {len} bytes exceeds limit");
    }

    let mut msg_buf = vec![0u8; len];
    reader.read_exact(&mut msg_buf).await?;
    Ok(Some(msg_buf))
}

/// Send a length-prefixed JSON message
pub async fn send_message<W, T>(writer: &mut W, msg: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: serde::Serialize,
{
    let msg_bytes = serde_json::to_vec(msg)?;
    let msg_len = (msg_bytes.len() as u32).to_le_bytes();

    writer.write_all(&msg_len).await?;
    writer.write_all(&msg_bytes).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::LocalBus;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::timeout;

    static NEXT_SOCKET: AtomicUsize = AtomicUsize::new(0);

    fn socket_path() -> PathBuf {
        std::env::temp_dir().join(format!(
            "dialogue-turn-{}-{}.sock",
            std::process::id(),
            NEXT_SOCKET.fetch_add(1, Ordering::SeqCst)
        ))
    }

    async fn start(bus: Arc<LocalBus>) -> (Arc<Server>, UnixStream) {
        let path = socket_path();
        let server = Arc::new(Server::new(&path, bus).unwrap());
        let running = Arc::clone(&server);
        tokio::spawn(async move { running.run().await });

        let client = UnixStream::connect(&path).await.unwrap();
        (server, client)
    }

    async fn call(client: &mut UnixStream, request: &Request) -> Response {
        send_message(client, request).await.unwrap();
        next_frame(client).await
    }

    async fn next_frame(client: &mut UnixStream) -> Response {
        let frame = timeout(Duration::from_secs(5), read_message(client))
            .await
            .expect("no frame within 5s")
            .unwrap()
            .expect("server closed the connection");
        serde_json::from_slice(&frame).unwrap()
    }

    #[tokio::test]
    async fn test_ping() {
        let (server, mut client) = start(Arc::new(LocalBus::new())).await;
        assert_eq!(call(&mut client, &Request::Ping).await, Response::Pong);
        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_client_publish_reaches_bus() {
        let bus = Arc::new(LocalBus::new());
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        bus.subscribe(
            "recognized_speech",
            Arc::new(move |data: &str| {
                let _ = seen_tx.send(data.to_owned());
            }),
        )
        .unwrap();

        let (server, mut client) = start(bus).await;
        let response = call(
            &mut client,
            &Request::Publish {
                topic: "recognized_speech".into(),
                data: "turn left".into(),
            },
        )
        .await;

        assert_eq!(response, Response::Published);
        assert_eq!(seen_rx.try_recv().unwrap(), "turn left");
        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_subscribed_client_receives_bus_messages() {
        let bus = Arc::new(LocalBus::new());
        let (server, mut client) = start(Arc::clone(&bus)).await;

        let response = call(&mut client, &Request::Subscribe { topic: "say".into() }).await;
        assert_eq!(response, Response::Subscribed { topic: "say".into() });
        assert_eq!(bus.subscriber_count("say"), 1);

        bus.publish("say", "MOVE:LEFT").unwrap();
        assert_eq!(
            next_frame(&mut client).await,
            Response::Message {
                topic: "say".into(),
                data: "MOVE:LEFT".into()
            }
        );

        drop(client);
        for _ in 0..50 {
            if bus.subscriber_count("say") == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(bus.subscriber_count("say"), 0);
        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_repeated_subscribe_is_a_no_op() {
        let bus = Arc::new(LocalBus::new());
        let (server, mut client) = start(Arc::clone(&bus)).await;

        for _ in 0..2 {
            let response = call(&mut client, &Request::Subscribe { topic: "say".into() }).await;
            assert_eq!(response, Response::Subscribed { topic: "say".into() });
        }
        assert_eq!(bus.subscriber_count("say"), 1);

        bus.publish("say", "MOVE:LEFT").unwrap();
        assert_eq!(
            next_frame(&mut client).await,
            Response::Message {
                topic: "say".into(),
                data: "MOVE:LEFT".into()
            }
        );
        assert_eq!(call(&mut client, &Request::Ping).await, Response::Pong);
        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_stalled_subscriber_queue_is_capped() {
        let bus = Arc::new(LocalBus::new());
        let (server, mut client) = start(Arc::clone(&bus)).await;

        let response = call(&mut client, &Request::Subscribe { topic: "say".into() }).await;
        assert_eq!(response, Response::Subscribed { topic: "say".into() });

        // Nothing reads while these are published
        let payload = "x".repeat(4096);
        for _ in 0..CLIENT_QUEUE_LEN * 8 {
            bus.publish("say", &payload).unwrap();
        }

        let mut received = 0;
        while let Ok(frame) = timeout(Duration::from_millis(200), read_message(&mut client)).await {
            let frame = frame.unwrap().expect("server closed the connection");
            match serde_json::from_slice::<Response>(&frame).unwrap() {
                Response::Message { data, .. } => assert_eq!(data.len(), 4096),
                other => panic!("unexpected response: {other:?}"),
            }
            received += 1;
        }

        assert!(received > 0);
        assert!(received <= CLIENT_QUEUE_LEN, "received {received} frames");
        assert_eq!(call(&mut client, &Request::Ping).await, Response::Pong);
        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_malformed_request_gets_error_frame() {
        let (server, mut client) = start(Arc::new(LocalBus::new())).await;

        let garbage = br#"{"type":"dance"}"#;
        client.write_all(&(garbage.len() as u32).to_le_bytes()).await.unwrap();
        client.write_all(garbage).await.unwrap();

        match next_frame(&mut client).await {
            Response::Error { code, .. } => assert_eq!(code, "invalid_request"),
            other => panic!("unexpected response: {other:?}"),
        }
        assert_eq!(call(&mut client, &Request::Ping).await, Response::Pong);
        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_status_tracks_turn_events() {
        let (server, mut client) = start(Arc::new(LocalBus::new())).await;

        server
            .record_event(&TurnEvent::StateEntered { state: "HEAR".into() })
            .await;
        match call(&mut client, &Request::GetStatus).await {
            Response::Status(status) => {
                assert_eq!(status.state.as_deref(), Some("HEAR"));
                assert_eq!(status.turns_completed, 0);
            }
            other => panic!("unexpected response: {other:?}"),
        }

        server
            .record_event(&TurnEvent::TurnCompleted {
                outcome: "succeeded".into(),
                transitions: 3,
                duration_ms: 2100,
            })
            .await;
        let status = server.status().await;
        assert_eq!(status.state, None);
        assert_eq!(status.turns_completed, 1);
        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_removes_socket() {
        let path = socket_path();
        let server = Server::new(&path, Arc::new(LocalBus::new())).unwrap();
        assert!(path.exists());

        server.shutdown().await;
        assert!(!path.exists());
    }
}
