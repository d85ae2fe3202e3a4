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

//! Channel client: lifecycle, typed subscriptions, and invocations.
//!
//! [`ChannelClient`] wraps one transport connection. `start` is idempotent
//! (concurrent callers wait on the same in-flight attempt) and `invoke`/
//! `send` start the connection on demand. Server events dispatch to typed
//! handlers registered with [`ChannelClient::on`]; request/response calls
//! are matched to completions by uuid and rejected if the session drops
//! before the answer arrives.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use log::{debug, warn};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::protocol::{EventPayload, Frame, OutboundCall};
use crate::transport::{Connection, ConnectionConfig, ConnectionEvent, ConnectionState};

/// Errors surfaced by the channel client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("invalid endpoint url: {0}")]
    InvalidUrl(String),

    #[error("connect failed: {0}")]
    Connect(String),

    #[error("client is stopped")]
    Stopped,

    #[error("connection lost before the call completed")]
    ConnectionLost,

    #[error("server error: {0}")]
    Server(String),

    #[error("unexpected result shape: {0}")]
    BadResult(String),
}

/// Handle returned by [`ChannelClient::on`], used to detach the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerId {
    event: &'static str,
    seq: u64,
}

type Handler = Arc<dyn Fn(&Value) + Send + Sync>;

/// Outcome of the most recent connection attempt, used to settle `start`
/// callers. `seq` advances once per settled attempt.
#[derive(Debug, Clone, Default)]
struct AttemptStatus {
    seq: u64,
    connected: bool,
    error: Option<String>,
}

/// Live transport handles; replaced on restart after `stop`.
#[derive(Default)]
struct Lifecycle {
    outbound: Option<mpsc::Sender<Frame>>,
    cancel: Option<CancellationToken>,
}

struct Inner {
    config: ConnectionConfig,
    state_tx: watch::Sender<ConnectionState>,
    attempt_tx: watch::Sender<AttemptStatus>,
    lifecycle: Mutex<Lifecycle>,
    handlers: Mutex<HashMap<&'static str, Vec<(u64, Handler)>>>,
    next_handler: AtomicU64,
    pending: Mutex<HashMap<String, oneshot::Sender<Result<Value, ClientError>>>>,
    connection_id: Mutex<Option<String>>,
    reconnect_attempts: AtomicU32,
}

/// One logical channel to the dashboard server.
#[derive(Clone)]
pub struct ChannelClient {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ChannelClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelClient")
            .field("channel", &self.inner.config.channel)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl ChannelClient {
    /// Create a client for one channel. No connection is made until
    /// `start`, `invoke`, or `send` is called.
    #[must_use]
    pub fn new(config: ConnectionConfig) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (attempt_tx, _) = watch::channel(AttemptStatus::default());

        Self {
            inner: Arc::new(Inner {
                config,
                state_tx,
                attempt_tx,
                lifecycle: Mutex::new(Lifecycle::default()),
                handlers: Mutex::new(HashMap::new()),
                next_handler: AtomicU64::new(1),
                pending: Mutex::new(HashMap::new()),
                connection_id: Mutex::new(None),
                reconnect_attempts: AtomicU32::new(0),
            }),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// Watch lifecycle state changes.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Server-assigned connection id, if currently connected.
    #[must_use]
    pub fn connection_id(&self) -> Option<String> {
        self.inner
            .connection_id
            .lock()
            .expect("connection id mutex poisoned")
            .clone()
    }

    /// Reconnection attempts since the last successful connect.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.reconnect_attempts.load(Ordering::Relaxed)
    }

    /// Channel path this client serves.
    #[must_use]
    pub fn channel(&self) -> &str {
        &self.inner.config.channel
    }

    /// Connect if not already connected.
    ///
    /// Idempotent: when an attempt is already in flight, every caller waits
    /// on that same attempt and observes its outcome. A failed attempt
    /// returns an error here while the background loop keeps retrying on
    /// the backoff schedule.
    pub async fn start(&self) -> Result<(), ClientError> {
        self.ensure_running();

        if self.state() == ConnectionState::Connected {
            return Ok(());
        }

        let mut rx = self.inner.attempt_tx.subscribe();
        let seen = rx.borrow_and_update().seq;
        let status = rx
            .wait_for(|s| s.connected || s.seq > seen)
            .await
            .map_err(|_| ClientError::Stopped)?
            .clone();

        if status.connected {
            Ok(())
        } else {
            Err(ClientError::Connect(
                status.error.unwrap_or_else(|| "connection failed".to_string()),
            ))
        }
    }

    /// Stop the connection and reject all pending invocations.
    ///
    /// The client can be started again afterwards.
    pub fn stop(&self) {
        let mut lifecycle = self
            .inner
            .lifecycle
            .lock()
            .expect("lifecycle mutex poisoned");
        if let Some(cancel) = lifecycle.cancel.take() {
            cancel.cancel();
        }
        lifecycle.outbound = None;
        drop(lifecycle);

        self.inner.state_tx.send_replace(ConnectionState::Disconnected);
        self.inner
            .connection_id
            .lock()
            .expect("connection id mutex poisoned")
            .take();
        reject_pending(&self.inner.pending, || ClientError::Stopped);

        self.inner.attempt_tx.send_modify(|s| {
            s.seq += 1;
            s.connected = false;
            s.error = Some("client stopped".to_string());
        });
    }

    /// Attach a typed handler for one event. Returns a handle for
    /// [`ChannelClient::off`].
    pub fn on<E, F>(&self, handler: F) -> HandlerId
    where
        E: EventPayload,
        F: Fn(E) + Send + Sync + 'static,
    {
        let seq = self.inner.next_handler.fetch_add(1, Ordering::Relaxed);
        let dispatch: Handler = Arc::new(move |payload: &Value| {
            match serde_json::from_value::<E>(payload.clone()) {
                Ok(event) => handler(event),
                Err(e) => warn!("Dropping {} event with unexpected shape: {}", E::NAME, e),
            }
        });

        self.inner
            .handlers
            .lock()
            .expect("handler mutex poisoned")
            .entry(E::NAME)
            .or_default()
            .push((seq, dispatch));

        HandlerId { event: E::NAME, seq }
    }

    /// Detach a handler. Returns false when it was already gone.
    pub fn off(&self, id: HandlerId) -> bool {
        let mut handlers = self.inner.handlers.lock().expect("handler mutex poisoned");
        if let Some(list) = handlers.get_mut(id.event) {
            let before = list.len();
            list.retain(|(seq, _)| *seq != id.seq);
            return list.len() != before;
        }
        false
    }

    /// Call a server method and wait for its completion.
    ///
    /// Starts the connection first when not connected. The returned future
    /// is rejected if the session drops before the completion arrives.
    pub async fn invoke(&self, target: &str, args: Vec<Value>) -> Result<Value, ClientError> {
        if self.state() != ConnectionState::Connected {
            self.start().await?;
        }

        let id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.inner
            .pending
            .lock()
            .expect("pending mutex poisoned")
            .insert(id.clone(), tx);

        let frame = Frame::Invocation {
            id: Some(id.clone()),
            target: target.to_string(),
            args,
        };
        if let Err(e) = self.write(frame).await {
            self.inner
                .pending
                .lock()
                .expect("pending mutex poisoned")
                .remove(&id);
            return Err(e);
        }

        rx.await.map_err(|_| ClientError::ConnectionLost)?
    }

    /// Call a server method without waiting for a result.
    ///
    /// Starts the connection first when not connected.
    pub async fn send(&self, target: &str, args: Vec<Value>) -> Result<(), ClientError> {
        if self.state() != ConnectionState::Connected {
            self.start().await?;
        }

        self.write(Frame::Invocation {
            id: None,
            target: target.to_string(),
            args,
        })
        .await
    }

    /// Typed wrapper over [`ChannelClient::invoke`].
    pub async fn call(&self, call: OutboundCall) -> Result<Value, ClientError> {
        self.invoke(call.target(), call.arguments()).await
    }

    async fn write(&self, frame: Frame) -> Result<(), ClientError> {
        let outbound = {
            let lifecycle = self
                .inner
                .lifecycle
                .lock()
                .expect("lifecycle mutex poisoned");
            lifecycle.outbound.clone()
        };

        match outbound {
            Some(tx) => tx.send(frame).await.map_err(|_| ClientError::ConnectionLost),
            None => Err(ClientError::Stopped),
        }
    }

    /// Spawn the transport and dispatch tasks if they are not running.
    fn ensure_running(&self) {
        let mut lifecycle = self
            .inner
            .lifecycle
            .lock()
            .expect("lifecycle mutex poisoned");

        let running = match (&lifecycle.cancel, &lifecycle.outbound) {
            (Some(cancel), Some(outbound)) => !cancel.is_cancelled() && !outbound.is_closed(),
            _ => false,
        };
        if running {
            return;
        }

        let connection = Connection::spawn(self.inner.config.clone());
        lifecycle.outbound = Some(connection.sender());
        lifecycle.cancel = Some({
            let token = CancellationToken::new();
            // Tie the transport's lifetime to this token so `stop` works
            // without holding the connection handle itself.
            let conn_token = token.clone();
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move {
                dispatch_loop(inner, connection, conn_token).await;
            });
            token
        });
    }
}

/// Consume transport events and maintain client state.
async fn dispatch_loop(inner: Arc<Inner>, mut connection: Connection, cancel: CancellationToken) {
    loop {
        let event = tokio::select! {
            event = connection.recv() => event,
            () = cancel.cancelled() => {
                // `stop` already reset the shared state; a superseded task
                // must leave the replacement's state alone.
                connection.shutdown();
                return;
            }
        };

        let Some(event) = event else { break };

        match event {
            ConnectionEvent::StateChanged(state) => {
                if state == ConnectionState::Connected {
                    inner.reconnect_attempts.store(0, Ordering::Relaxed);
                    inner.attempt_tx.send_modify(|s| {
                        s.seq += 1;
                        s.connected = true;
                        s.error = None;
                    });
                } else {
                    inner
                        .connection_id
                        .lock()
                        .expect("connection id mutex poisoned")
                        .take();
                    reject_pending(&inner.pending, || ClientError::ConnectionLost);
                }
                inner.state_tx.send_replace(state);
            }
            ConnectionEvent::Welcome { connection_id } => {
                inner
                    .connection_id
                    .lock()
                    .expect("connection id mutex poisoned")
                    .replace(connection_id);
            }
            ConnectionEvent::Failed(error) => {
                inner.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
                inner.attempt_tx.send_modify(|s| {
                    s.seq += 1;
                    s.connected = false;
                    s.error = Some(error);
                });
            }
            ConnectionEvent::Frame(Frame::Event { target, payload }) => {
                let handlers: Vec<Handler> = {
                    let map = inner.handlers.lock().expect("handler mutex poisoned");
                    map.get(target.as_str())
                        .map(|list| list.iter().map(|(_, h)| Arc::clone(h)).collect())
                        .unwrap_or_default()
                };
                if handlers.is_empty() {
                    debug!("No handler for event '{}'", target);
                }
                for handler in handlers {
                    handler(&payload);
                }
            }
            ConnectionEvent::Frame(Frame::Completion { id, result, error }) => {
                let waiter = inner
                    .pending
                    .lock()
                    .expect("pending mutex poisoned")
                    .remove(&id);
                match waiter {
                    Some(tx) => {
                        let outcome = match error {
                            Some(message) => Err(ClientError::Server(message)),
                            None => Ok(result.unwrap_or(Value::Null)),
                        };
                        let _ = tx.send(outcome);
                    }
                    None => debug!("Completion for unknown invocation '{}'", id),
                }
            }
            ConnectionEvent::Frame(other) => {
                debug!("Ignoring unexpected frame: {:?}", other);
            }
        }
    }

    // Transport ended on its own (clean close): settle any waiters. When
    // the token was cancelled concurrently, `stop` has already reset the
    // shared state, possibly for a replacement task.
    if cancel.is_cancelled() {
        return;
    }
    inner.state_tx.send_replace(ConnectionState::Disconnected);
    inner
        .connection_id
        .lock()
        .expect("connection id mutex poisoned")
        .take();
    reject_pending(&inner.pending, || ClientError::ConnectionLost);
    inner.attempt_tx.send_modify(|s| {
        s.seq += 1;
        s.connected = false;
        if s.error.is_none() {
            s.error = Some("connection closed".to_string());
        }
    });
}

fn reject_pending<F>(
    pending: &Mutex<HashMap<String, oneshot::Sender<Result<Value, ClientError>>>>,
    error: F,
) where
    F: Fn() -> ClientError,
{
    let waiters: Vec<_> = {
        let mut map = pending.lock().expect("pending mutex poisoned");
        map.drain().map(|(_, tx)| tx).collect()
    };
    for tx in waiters {
        let _ = tx.send(Err(error()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::UnreadCount;
    use crate::transport::BackoffSchedule;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    fn test_config(port: u16) -> ConnectionConfig {
        ConnectionConfig {
            host: "127.0.0.1".to_string(),
            port,
            channel: "/hubs/notifications".to_string(),
            token: Some("test-token".to_string()),
            backoff: BackoffSchedule::new(vec![10]),
            ..Default::default()
        }
    }

    async fn write_line(stream: &mut TcpStream, frame: &Frame) {
        let mut line = frame.encode().unwrap();
        line.push('\n');
        stream.write_all(line.as_bytes()).await.unwrap();
    }

    /// Accept one session: verify the handshake and send a welcome.
    async fn accept_session(listener: &TcpListener, connection_id: &str) -> TcpStream {
        let (mut stream, _) = listener.accept().await.unwrap();

        let mut line = String::new();
        let mut reader = BufReader::new(&mut stream);
        reader.read_line(&mut line).await.unwrap();
        match Frame::decode(line.trim_end()).unwrap() {
            Frame::Handshake { channel, token, .. } => {
                assert_eq!(channel, "/hubs/notifications");
                assert_eq!(token.as_deref(), Some("test-token"));
            }
            other => panic!("expected handshake, got {other:?}"),
        }

        write_line(
            &mut stream,
            &Frame::Welcome {
                connection_id: connection_id.to_string(),
            },
        )
        .await;
        stream
    }

    /// Drain frames from the client until the socket closes.
    async fn drain(stream: TcpStream) {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(_)) = lines.next_line().await {}
    }

    #[tokio::test]
    async fn test_start_connects_and_reports_connection_id() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let stream = accept_session(&listener, "conn-1").await;
            drain(stream).await;
        });

        let client = ChannelClient::new(test_config(port));
        timeout(WAIT, client.start()).await.unwrap().unwrap();

        assert_eq!(client.state(), ConnectionState::Connected);
        assert_eq!(client.connection_id().as_deref(), Some("conn-1"));
        client.stop();
    }

    #[tokio::test]
    async fn test_concurrent_starts_share_one_attempt() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accepts = Arc::new(AtomicUsize::new(0));

        let server_accepts = Arc::clone(&accepts);
        tokio::spawn(async move {
            loop {
                let stream = accept_session(&listener, "conn-1").await;
                server_accepts.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(drain(stream));
            }
        });

        let client = ChannelClient::new(test_config(port));
        let (a, b) = tokio::join!(
            timeout(WAIT, client.start()),
            timeout(WAIT, client.start())
        );
        a.unwrap().unwrap();
        b.unwrap().unwrap();

        // Let any stray second connection land before counting.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(accepts.load(Ordering::SeqCst), 1);
        client.stop();
    }

    #[tokio::test]
    async fn test_invoke_triggers_start_and_completes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let stream = accept_session(&listener, "conn-1").await;
            let (read, mut write) = stream.into_split();
            let mut lines = BufReader::new(read).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if let Ok(Frame::Invocation {
                    id: Some(id),
                    target,
                    ..
                }) = Frame::decode(&line)
                {
                    assert_eq!(target, "GetUnreadCount");
                    let mut reply = Frame::Completion {
                        id,
                        result: Some(json!(5)),
                        error: None,
                    }
                    .encode()
                    .unwrap();
                    reply.push('\n');
                    write.write_all(reply.as_bytes()).await.unwrap();
                }
            }
        });

        // No explicit start: invoke must connect on its own.
        let client = ChannelClient::new(test_config(port));
        let result = timeout(WAIT, client.invoke("GetUnreadCount", Vec::new()))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(result, json!(5));
        assert_eq!(client.state(), ConnectionState::Connected);
        client.stop();
    }

    #[tokio::test]
    async fn test_send_triggers_start_and_writes_fire_and_forget_frame() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (seen_tx, seen_rx) = oneshot::channel();

        tokio::spawn(async move {
            let stream = accept_session(&listener, "conn-1").await;
            let mut lines = BufReader::new(stream).lines();
            let line = lines.next_line().await.unwrap().unwrap();
            let _ = seen_tx.send(Frame::decode(&line).unwrap());
            while let Ok(Some(_)) = lines.next_line().await {}
        });

        // No explicit start: send must connect on its own.
        let client = ChannelClient::new(test_config(port));
        timeout(WAIT, client.send("JoinUserGroup", vec![json!("user-1")]))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(client.state(), ConnectionState::Connected);

        match timeout(WAIT, seen_rx).await.unwrap().unwrap() {
            Frame::Invocation { id, target, args } => {
                assert!(id.is_none());
                assert_eq!(target, "JoinUserGroup");
                assert_eq!(args, vec![json!("user-1")]);
            }
            other => panic!("unexpected frame: {other:?}"),
        }
        client.stop();
    }

    #[tokio::test]
    async fn test_server_error_completion_rejects_invocation() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let stream = accept_session(&listener, "conn-1").await;
            let (read, mut write) = stream.into_split();
            let mut lines = BufReader::new(read).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if let Ok(Frame::Invocation { id: Some(id), .. }) = Frame::decode(&line) {
                    let mut reply = Frame::Completion {
                        id,
                        result: None,
                        error: Some("no such endpoint".to_string()),
                    }
                    .encode()
                    .unwrap();
                    reply.push('\n');
                    write.write_all(reply.as_bytes()).await.unwrap();
                }
            }
        });

        let client = ChannelClient::new(test_config(port));
        let err = timeout(WAIT, client.invoke("RequestEndpointCheck", vec![json!("ep-404")]))
            .await
            .unwrap()
            .unwrap_err();

        match err {
            ClientError::Server(message) => assert_eq!(message, "no such endpoint"),
            other => panic!("unexpected error: {other:?}"),
        }
        client.stop();
    }

    #[tokio::test]
    async fn test_typed_event_dispatch() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let mut stream = accept_session(&listener, "conn-1").await;
            write_line(
                &mut stream,
                &Frame::Event {
                    target: "UnreadCount".to_string(),
                    payload: json!({ "count": 3 }),
                },
            )
            .await;
            drain(stream).await;
        });

        let client = ChannelClient::new(test_config(port));
        let (tx, mut rx) = mpsc::channel::<u32>(1);
        client.on::<UnreadCount, _>(move |event| {
            let _ = tx.try_send(event.count);
        });

        timeout(WAIT, client.start()).await.unwrap().unwrap();
        let count = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(count, 3);
        client.stop();
    }

    #[tokio::test]
    async fn test_off_detaches_handler() {
        let client = ChannelClient::new(test_config(1));
        let id = client.on::<UnreadCount, _>(|_| {});
        assert!(client.off(id));
        assert!(!client.off(id));
    }

    #[tokio::test]
    async fn test_reconnects_after_unexpected_close_and_resets_counter() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accepts = Arc::new(AtomicUsize::new(0));

        let server_accepts = Arc::clone(&accepts);
        tokio::spawn(async move {
            // First session: welcome, then drop the socket immediately.
            let stream = accept_session(&listener, "conn-1").await;
            server_accepts.fetch_add(1, Ordering::SeqCst);
            drop(stream);

            // Second session stays up.
            let stream = accept_session(&listener, "conn-2").await;
            server_accepts.fetch_add(1, Ordering::SeqCst);
            drain(stream).await;
        });

        let client = ChannelClient::new(test_config(port));
        timeout(WAIT, client.start()).await.unwrap().unwrap();

        let mut state = client.watch_state();
        timeout(WAIT, state.wait_for(|s| *s == ConnectionState::Reconnecting))
            .await
            .unwrap()
            .unwrap();
        timeout(WAIT, state.wait_for(|s| *s == ConnectionState::Connected))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(client.connection_id().as_deref(), Some("conn-2"));
        // Successful reconnect resets the attempt counter.
        assert_eq!(client.reconnect_attempts(), 0);

        // Exactly one reconnection attempt was needed.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(accepts.load(Ordering::SeqCst), 2);
        client.stop();
    }

    #[tokio::test]
    async fn test_pending_invocation_rejected_on_disconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let stream = accept_session(&listener, "conn-1").await;
            let (read, _write) = stream.into_split();
            let mut lines = BufReader::new(read).lines();
            // Read the invocation, then drop the connection without answering.
            let _ = lines.next_line().await;
        });

        let client = ChannelClient::new(test_config(port));
        let err = timeout(WAIT, client.invoke("GetUnreadCount", Vec::new()))
            .await
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, ClientError::ConnectionLost));
        client.stop();
    }

    #[tokio::test]
    async fn test_start_fails_when_server_unreachable() {
        // Grab a free port, then close the listener so connects are refused.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut config = test_config(port);
        config.backoff = BackoffSchedule::new(vec![60_000]);
        let client = ChannelClient::new(config);

        let err = timeout(WAIT, client.start()).await.unwrap().unwrap_err();
        assert!(matches!(err, ClientError::Connect(_)));
        client.stop();
    }

    #[tokio::test]
    async fn test_stop_disconnects() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let stream = accept_session(&listener, "conn-1").await;
            drain(stream).await;
        });

        let client = ChannelClient::new(test_config(port));
        timeout(WAIT, client.start()).await.unwrap().unwrap();

        client.stop();
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(client.connection_id().is_none());
    }

    #[tokio::test]
    async fn test_restart_after_stop_keeps_new_session_connected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let stream = accept_session(&listener, "conn-1").await;
            tokio::spawn(drain(stream));
            let stream = accept_session(&listener, "conn-2").await;
            drain(stream).await;
        });

        let client = ChannelClient::new(test_config(port));
        timeout(WAIT, client.start()).await.unwrap().unwrap();
        client.stop();
        timeout(WAIT, client.start()).await.unwrap().unwrap();

        // The superseded dispatch task winds down in the background; it must
        // not clobber the new session's state or connection id.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(client.state(), ConnectionState::Connected);
        assert_eq!(client.connection_id().as_deref(), Some("conn-2"));
        client.stop();
    }
}
