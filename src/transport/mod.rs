// Copyright 2025 Pulsewatch contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Async connection layer with schedule-driven reconnection.
//!
//! A connection runs in a background task: it dials the channel endpoint,
//! performs the handshake, then pumps frames in both directions until the
//! session ends. Unexpected closes re-enter the loop after the next delay in
//! the [`BackoffSchedule`]; this loop is the only place retries are
//! scheduled. A `close` frame without an error is a clean shutdown and ends
//! the task.

use std::time::Duration;

use log::{error, info, warn};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;

use crate::protocol::{Frame, ParseError, PROTOCOL_VERSION};

/// Delays between successive reconnection attempts, in milliseconds.
///
/// Attempt `n` waits `delays[n]`; past the end the final delay repeats, so
/// the default schedule settles at one attempt every 30 seconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffSchedule {
    delays_ms: Vec<u64>,
}

impl Default for BackoffSchedule {
    fn default() -> Self {
        Self {
            delays_ms: vec![0, 2000, 10_000, 30_000],
        }
    }
}

impl BackoffSchedule {
    /// Create a schedule from explicit delays. An empty list means
    /// immediate retries.
    #[must_use]
    pub fn new(delays_ms: Vec<u64>) -> Self {
        Self { delays_ms }
    }

    /// Delay before reconnection attempt number `attempt` (zero-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let idx = (attempt as usize).min(self.delays_ms.len().saturating_sub(1));
        Duration::from_millis(self.delays_ms.get(idx).copied().unwrap_or(0))
    }
}

/// Configuration for one channel connection.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Server host name or address.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Channel path sent in the handshake (e.g. "/hubs/notifications").
    pub channel: String,
    /// Bearer token attached to every handshake.
    pub token: Option<String>,
    /// Reconnection schedule.
    pub backoff: BackoffSchedule,
    /// Buffer size for the event and outbound channels.
    pub buffer_size: usize,
    /// How long to wait for the server's welcome frame.
    pub handshake_timeout: Duration,
    /// Interval between client pings.
    pub ping_interval: Duration,
    /// Force a reconnect after this much server silence.
    pub inactivity_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 7420,
            channel: "/hubs/monitoring".to_string(),
            token: None,
            backoff: BackoffSchedule::default(),
            buffer_size: 256,
            handshake_timeout: Duration::from_secs(5),
            ping_interval: Duration::from_secs(15),
            inactivity_timeout: Duration::from_secs(30),
        }
    }
}

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Not connected and not trying to be.
    #[default]
    Disconnected,
    /// First connection attempt in flight.
    Connecting,
    /// Handshake accepted; session active.
    Connected,
    /// Session lost; retrying on the backoff schedule.
    Reconnecting,
}

/// Events emitted by the connection task.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// Lifecycle state changed.
    StateChanged(ConnectionState),
    /// Handshake accepted; carries the server-assigned connection id.
    Welcome { connection_id: String },
    /// A connection attempt or active session failed.
    Failed(String),
    /// A server frame that is not handled by the transport itself
    /// (events and completions).
    Frame(Frame),
}

/// Errors terminating one session of the connection loop.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Protocol(#[from] ParseError),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("connection closed by server")]
    ConnectionLost,

    #[error("server closed connection: {0}")]
    Closed(String),

    #[error("no server activity for {0:?}")]
    Unresponsive(Duration),
}

/// Handle to a managed channel connection.
///
/// The connection runs in a background task and reconnects on its own
/// schedule. Use `recv()` to consume events, `sender()` to write frames,
/// and `shutdown()` to end the task. Dropping the handle also shuts down.
pub struct Connection {
    event_rx: mpsc::Receiver<ConnectionEvent>,
    outbound_tx: mpsc::Sender<Frame>,
    cancel_token: CancellationToken,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("cancel_token", &self.cancel_token)
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Spawn the connection task.
    #[must_use]
    pub fn spawn(config: ConnectionConfig) -> Self {
        let (event_tx, event_rx) = mpsc::channel(config.buffer_size);
        let (outbound_tx, outbound_rx) = mpsc::channel(config.buffer_size);
        let cancel_token = CancellationToken::new();

        let task_cancel = cancel_token.clone();
        tokio::spawn(async move {
            connection_loop(config, event_tx, outbound_rx, task_cancel).await;
        });

        Self {
            event_rx,
            outbound_tx,
            cancel_token,
        }
    }

    /// Receive the next event. Returns `None` once the task has ended.
    pub async fn recv(&mut self) -> Option<ConnectionEvent> {
        self.event_rx.recv().await
    }

    /// Sender for outbound frames.
    #[must_use]
    pub fn sender(&self) -> mpsc::Sender<Frame> {
        self.outbound_tx.clone()
    }

    /// Shut down the connection task.
    pub fn shutdown(&self) {
        self.cancel_token.cancel();
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

async fn connection_loop(
    config: ConnectionConfig,
    event_tx: mpsc::Sender<ConnectionEvent>,
    mut outbound_rx: mpsc::Receiver<Frame>,
    cancel_token: CancellationToken,
) {
    // Index into the backoff schedule; reset on every successful handshake.
    let mut attempt: u32 = 0;
    let mut ever_connected = false;

    loop {
        if cancel_token.is_cancelled() {
            let _ = event_tx
                .send(ConnectionEvent::StateChanged(ConnectionState::Disconnected))
                .await;
            return;
        }

        let entering = if ever_connected || attempt > 0 {
            ConnectionState::Reconnecting
        } else {
            ConnectionState::Connecting
        };
        if event_tx
            .send(ConnectionEvent::StateChanged(entering))
            .await
            .is_err()
        {
            return; // Receiver dropped
        }

        info!(
            "Connecting to {}:{}{} (attempt {})",
            config.host, config.port, config.channel, attempt
        );

        match run_session(
            &config,
            &event_tx,
            &mut outbound_rx,
            &cancel_token,
            &mut attempt,
            &mut ever_connected,
        )
        .await
        {
            Ok(SessionEnd::Cancelled) => {
                info!("Connection to {} cancelled", config.channel);
                let _ = event_tx
                    .send(ConnectionEvent::StateChanged(ConnectionState::Disconnected))
                    .await;
                return;
            }
            Ok(SessionEnd::CleanClose) => {
                info!("Server closed {} cleanly", config.channel);
                let _ = event_tx
                    .send(ConnectionEvent::StateChanged(ConnectionState::Disconnected))
                    .await;
                return;
            }
            Err(e) => {
                error!("Connection to {} failed: {}", config.channel, e);
                if event_tx
                    .send(ConnectionEvent::Failed(e.to_string()))
                    .await
                    .is_err()
                {
                    return;
                }
            }
        }

        let delay = config.backoff.delay_for(attempt);
        attempt = attempt.saturating_add(1);
        warn!(
            "Reconnecting to {} in {} ms",
            config.channel,
            delay.as_millis()
        );

        tokio::select! {
            () = sleep(delay) => {}
            () = cancel_token.cancelled() => {
                let _ = event_tx
                    .send(ConnectionEvent::StateChanged(ConnectionState::Disconnected))
                    .await;
                return;
            }
        }
    }
}

enum SessionEnd {
    Cancelled,
    CleanClose,
}

async fn write_frame(write_half: &mut OwnedWriteHalf, frame: &Frame) -> Result<(), TransportError> {
    let mut line = frame.encode()?;
    line.push('\n');
    write_half.write_all(line.as_bytes()).await?;
    write_half.flush().await?;
    Ok(())
}

async fn run_session(
    config: &ConnectionConfig,
    event_tx: &mpsc::Sender<ConnectionEvent>,
    outbound_rx: &mut mpsc::Receiver<Frame>,
    cancel_token: &CancellationToken,
    attempt: &mut u32,
    ever_connected: &mut bool,
) -> Result<SessionEnd, TransportError> {
    let stream = TcpStream::connect((config.host.as_str(), config.port)).await?;
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    write_frame(
        &mut write_half,
        &Frame::Handshake {
            version: PROTOCOL_VERSION,
            channel: config.channel.clone(),
            token: config.token.clone(),
        },
    )
    .await?;

    let welcome = timeout(config.handshake_timeout, lines.next_line())
        .await
        .map_err(|_| TransportError::Handshake("timed out waiting for welcome".to_string()))??
        .ok_or(TransportError::ConnectionLost)?;

    let connection_id = match Frame::decode(&welcome)? {
        Frame::Welcome { connection_id } => connection_id,
        Frame::Close { error } => {
            return Err(TransportError::Handshake(
                error.unwrap_or_else(|| "rejected by server".to_string()),
            ));
        }
        other => {
            return Err(TransportError::Handshake(format!(
                "expected welcome, got {other:?}"
            )));
        }
    };

    info!(
        "Connected to {} (connection id {})",
        config.channel, connection_id
    );
    *attempt = 0;
    *ever_connected = true;

    if event_tx
        .send(ConnectionEvent::Welcome { connection_id })
        .await
        .is_err()
    {
        return Ok(SessionEnd::Cancelled);
    }
    if event_tx
        .send(ConnectionEvent::StateChanged(ConnectionState::Connected))
        .await
        .is_err()
    {
        return Ok(SessionEnd::Cancelled);
    }

    let mut ping = tokio::time::interval_at(
        Instant::now() + config.ping_interval,
        config.ping_interval,
    );
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut last_activity = Instant::now();

    loop {
        let idle_deadline = last_activity + config.inactivity_timeout;

        tokio::select! {
            line_result = lines.next_line() => {
                match line_result {
                    Ok(Some(line)) => {
                        last_activity = Instant::now();
                        match Frame::decode(&line) {
                            Ok(Frame::Ping) => write_frame(&mut write_half, &Frame::Pong).await?,
                            Ok(Frame::Pong) => {}
                            Ok(Frame::Close { error: None }) => return Ok(SessionEnd::CleanClose),
                            Ok(Frame::Close { error: Some(e) }) => {
                                return Err(TransportError::Closed(e));
                            }
                            Ok(frame) => {
                                if event_tx.send(ConnectionEvent::Frame(frame)).await.is_err() {
                                    return Ok(SessionEnd::Cancelled);
                                }
                            }
                            Err(e) => warn!("Dropping undecodable frame: {}", e),
                        }
                    }
                    Ok(None) => return Err(TransportError::ConnectionLost),
                    Err(e) => return Err(TransportError::Io(e)),
                }
            }

            frame = outbound_rx.recv() => {
                match frame {
                    Some(frame) => write_frame(&mut write_half, &frame).await?,
                    None => return Ok(SessionEnd::Cancelled),
                }
            }

            _ = ping.tick() => {
                write_frame(&mut write_half, &Frame::Ping).await?;
            }

            () = tokio::time::sleep_until(idle_deadline) => {
                return Err(TransportError::Unresponsive(config.inactivity_timeout));
            }

            () = cancel_token.cancelled() => {
                // Best effort; the server learns about the close either way.
                let _ = write_frame(&mut write_half, &Frame::Close { error: None }).await;
                return Ok(SessionEnd::Cancelled);
            }
        }
    }
}
