//! Unix domain socket server for the panel
//!
//! Provides request-response communication for status and virtual
//! buttons, and pushes device events to subscribed clients.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::events::DeviceEvent;
use crate::sim::SimPins;
use crate::storage::{DirStorage, Storage};

use super::protocol::{DeviceStatus, Request, Response};

const MAX_MESSAGE_LEN: usize = 1024 * 1024;

/// Panel server handling client connections
pub struct Server {
    socket_path: PathBuf,
    listener: UnixListener,
    shared: Arc<Shared>,
    shutdown_tx: broadcast::Sender<()>,
}

/// State every client handler sees
struct Shared {
    status: RwLock<DeviceStatus>,
    start_time: std::time::Instant,
    pins: SimPins,
    storage_root: PathBuf,
    event_tx: broadcast::Sender<DeviceEvent>,
}

type SharedWriter = Arc<Mutex<OwnedWriteHalf>>;

/// Event forwarding task that dies with its connection handler, including
/// when the handler future is dropped at server shutdown
struct Forwarder(JoinHandle<()>);

impl Drop for Forwarder {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl Server {
    /// Bind the panel socket
    pub fn new(
        socket_path: &Path,
        pins: SimPins,
        storage_root: &Path,
        event_tx: broadcast::Sender<DeviceEvent>,
    ) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).context("failed to create socket directory")?;
        }

        // Remove stale socket if it exists
        if socket_path.exists() {
            std::fs::remove_file(socket_path).context("failed to remove stale socket")?;
        }

        let listener = UnixListener::bind(socket_path).context("failed to bind Unix socket")?;

        // Owner-only permissions
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
        }

        let (shutdown_tx, _) = broadcast::channel(1);
        let shared = Arc::new(Shared {
            status: RwLock::new(DeviceStatus::default()),
            start_time: std::time::Instant::now(),
            pins,
            storage_root: storage_root.to_owned(),
            event_tx,
        });

        info!(?socket_path, "panel socket listening");

        Ok(Self {
            socket_path: socket_path.to_owned(),
            listener,
            shared,
            shutdown_tx,
        })
    }

    /// Update the status snapshot from a device event
    pub async fn apply_event(&self, event: &DeviceEvent) {
        let mut status = self.shared.status.write().await;
        let old_state = status.state;
        status.apply(event);
        if old_state != status.state {
            debug!(from = %old_state, to = %status.state, "panel status updated");
        }
    }

    /// Run the server, accepting connections
    pub async fn run(&self) -> Result<()> {
        loop {
            match self.listener.accept().await {
                Ok((stream, _addr)) => {
                    debug!("client connected");
                    let shared = Arc::clone(&self.shared);
                    let mut shutdown_rx = self.shutdown_tx.subscribe();

                    tokio::spawn(async move {
                        tokio::select! {
                            result = Self::handle_client(stream, shared) => {
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
    async fn handle_client(stream: UnixStream, shared: Arc<Shared>) -> Result<()> {
        let (mut reader, writer) = stream.into_split();
        let writer: SharedWriter = Arc::new(Mutex::new(writer));
        let mut forwarder: Option<Forwarder> = None;

        loop {
            let Some(request) = Self::read_message(&mut reader).await? else {
                debug!("client disconnected");
                return Ok(());
            };
            debug!(?request, "received request");

            let subscribe = matches!(request, Request::Subscribe);
            let response = Self::process_request(request, &shared).await;
            Self::send_message(&mut *writer.lock().await, &response).await?;

            if subscribe && forwarder.is_none() {
                debug!("client subscribed to events");
                let events = shared.event_tx.subscribe();
                let task = tokio::spawn(Self::forward_events(events, Arc::clone(&writer)));
                forwarder = Some(Forwarder(task));
            }
        }
    }

    /// Push device events to a subscribed client until it goes away
    async fn forward_events(mut events: broadcast::Receiver<DeviceEvent>, writer: SharedWriter) {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let response = Response::Event { event };
                    if let Err(e) = Self::send_message(&mut *writer.lock().await, &response).await {
                        debug!(?e, "event forwarding stopped");
                        return;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "panel subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    }

    /// Read one length-prefixed JSON message; `None` on a clean disconnect
    async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Request>> {
        let mut len_buf = [0u8; 4];
        match reader.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let len = u32::from_le_bytes(len_buf) as usize;
        if len > MAX_MESSAGE_LEN {
            warn!(len, "message too large, disconnecting");
            return Ok(None);
        }

        let mut msg_buf = vec![0u8; len];
        reader.read_exact(&mut msg_buf).await?;
        let request = serde_json::from_slice(&msg_buf).context("failed to parse request")?;
        Ok(Some(request))
    }

    /// Send a length-prefixed JSON message
    async fn send_message<W, T>(writer: &mut W, msg: &T) -> Result<()>
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

    /// Process a request and return a response
    async fn process_request(request: Request, shared: &Shared) -> Response {
        match request {
            Request::Ping => Response::Pong,

            Request::GetStatus => {
                let mut status = shared.status.write().await;
                status.uptime_secs = shared.start_time.elapsed().as_secs();
                Response::Status(status.clone())
            }

            Request::SetButton { button, pressed } => {
                shared.pins.set_pressed(button, pressed);
                info!(?button, pressed, "button set via panel");
                Response::ButtonSet { button, pressed }
            }

            Request::PressButton { button, hold_ms } => {
                shared.pins.set_pressed(button, true);
                shared.pins.schedule_in(hold_ms, button, false);
                info!(?button, hold_ms, "button held via panel");
                Response::ButtonHeld { button, hold_ms }
            }

            Request::ListFiles => {
                if !shared.status.read().await.transfer_active {
                    return Response::Error {
                        code: "transfer_inactive".to_string(),
                        message: "file transfer is not enabled".to_string(),
                    };
                }
                match DirStorage::new(&shared.storage_root).list() {
                    Ok(names) => Response::Files { names },
                    Err(e) => Response::Error {
                        code: "storage".to_string(),
                        message: e.to_string(),
                    },
                }
            }

            Request::Subscribe => Response::Subscribed,
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

        info!("panel server shutdown complete");
    }
}
