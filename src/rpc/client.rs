//! RPC client for communicating with the relayd daemon
//!
//! This module owns the correlation engine (matching responses to
//! in-flight requests), the connection state machine, and the
//! reconnection supervisor. All transports funnel through here; the
//! bot layer and the feature managers are built on [`Client::call`].

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::common::config::{Config, TransportKind};
use crate::common::{Error, Result};
use crate::managers::{self, recipient_params};

use super::events::{ClientEvent, ErrorEvent, ErrorEventKind, LogEvent};
use super::router::{self, Routed};
use super::transport::{self, Channel, StderrSeverity, TransportEvent};
use super::wire::{self, Request};

/// Connection lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    ShuttingDown,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::ShuttingDown => write!(f, "shutting down"),
        }
    }
}

/// Result of a send call as reported by the daemon
#[derive(Debug, Clone, Deserialize)]
pub struct SendResult {
    pub timestamp: u64,
    #[serde(default)]
    pub results: Vec<Value>,
}

/// Mutable connection state, guarded by one lock
struct Conn {
    state: ConnectionState,
    reconnect_attempts: u32,
    intentional_shutdown: bool,
    outgoing: Option<mpsc::Sender<String>>,
    channel: Option<Channel>,
    reader_task: Option<JoinHandle<()>>,
    reconnect_task: Option<JoinHandle<()>>,
}

impl Conn {
    fn new() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            reconnect_attempts: 0,
            intentional_shutdown: false,
            outgoing: None,
            channel: None,
            reader_task: None,
            reconnect_task: None,
        }
    }
}

/// State shared between the client handle, the reader task, and the
/// reconnection supervisor
struct Shared {
    config: Config,
    /// In-flight calls keyed by correlation token. The sole owner of
    /// each pending entry; removed on response, timeout, or close.
    pending: Mutex<HashMap<String, oneshot::Sender<Result<Value>>>>,
    events: broadcast::Sender<ClientEvent>,
    conn: Mutex<Conn>,
    /// Only present in HTTP mode
    http: Option<reqwest::Client>,
}

/// Client for the relayd messaging daemon
///
/// Cheap to clone; all clones share one connection, one event stream,
/// and one correlation map.
#[derive(Clone)]
pub struct Client {
    shared: Arc<Shared>,
}

impl Client {
    /// Create a client from configuration. Does not connect.
    pub fn new(config: Config) -> Result<Self> {
        let http = if config.transport.kind == TransportKind::Http {
            if config.transport.http_url.is_none() {
                return Err(Error::Config(
                    "http_url required for http transport".to_string(),
                ));
            }
            Some(reqwest::Client::new())
        } else {
            None
        };

        let (events, _) = broadcast::channel(256);

        Ok(Self {
            shared: Arc::new(Shared {
                config,
                pending: Mutex::new(HashMap::new()),
                events,
                conn: Mutex::new(Conn::new()),
                http,
            }),
        })
    }

    /// Subscribe to the client event stream
    ///
    /// Every subscriber receives every event; slow subscribers that
    /// fall behind the channel capacity miss the oldest events.
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.shared.events.subscribe()
    }

    /// Current connection state
    pub async fn state(&self) -> ConnectionState {
        self.shared.conn.lock().await.state
    }

    /// Open the configured transport
    pub async fn connect(&self) -> Result<()> {
        {
            let mut conn = self.shared.conn.lock().await;
            match conn.state {
                ConnectionState::Connected | ConnectionState::Connecting => {
                    return Err(Error::Connection("already connected".to_string()));
                }
                _ => {}
            }
            conn.intentional_shutdown = false;
            if let Some(task) = conn.reconnect_task.take() {
                task.abort();
            }
        }

        Self::establish(&self.shared).await
    }

    /// Close the connection immediately
    ///
    /// Suppresses the reconnection supervisor and rejects all pending
    /// calls. The daemon child, if any, is terminated without the
    /// graceful wait.
    pub async fn disconnect(&self) -> Result<()> {
        self.shutdown(Duration::ZERO).await
    }

    /// Close the connection, giving a daemon child time to exit
    ///
    /// Runs terminate → bounded wait → force-kill on the process
    /// transport; identical to [`Client::disconnect`] for sockets.
    pub async fn graceful_shutdown(&self) -> Result<()> {
        let grace = self.shared.config.timeouts.shutdown_grace();
        self.shutdown(grace).await
    }

    async fn shutdown(&self, grace: Duration) -> Result<()> {
        let channel = {
            let mut conn = self.shared.conn.lock().await;
            conn.intentional_shutdown = true;
            conn.state = ConnectionState::ShuttingDown;
            if let Some(task) = conn.reconnect_task.take() {
                task.abort();
            }
            if let Some(task) = conn.reader_task.take() {
                task.abort();
            }
            conn.outgoing = None;
            conn.channel.take()
        };

        if let Some(mut channel) = channel {
            channel.close(grace).await;
        }

        Self::fail_pending(&self.shared, || Error::ConnectionClosed).await;

        {
            let mut conn = self.shared.conn.lock().await;
            conn.state = ConnectionState::Disconnected;
            conn.reconnect_attempts = 0;
        }

        let _ = self
            .shared
            .events
            .send(ClientEvent::Closed { intentional: true });
        tracing::info!("disconnected");
        Ok(())
    }

    /// Issue a JSON-RPC call and await its response
    ///
    /// Stream transports multiplex concurrent calls over one channel
    /// and correlate by token; HTTP sends one POST per call. Fails
    /// immediately with [`Error::NotConnected`] when no transport is
    /// open — calls are never silently queued.
    pub async fn call(&self, method: &str, params: Option<Value>) -> Result<Value> {
        if self.shared.http.is_some() {
            return self.call_http(method, params).await;
        }

        let outgoing = {
            let conn = self.shared.conn.lock().await;
            if conn.state != ConnectionState::Connected {
                return Err(Error::NotConnected);
            }
            conn.outgoing.clone().ok_or(Error::NotConnected)?
        };

        let id = Uuid::new_v4().to_string();
        let line = Request::new(method, params, id.clone()).to_line()?;

        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().await.insert(id.clone(), tx);

        tracing::debug!(method, id = %id, "rpc request");

        if outgoing.send(line).await.is_err() {
            self.shared.pending.lock().await.remove(&id);
            return Err(Error::NotConnected);
        }

        let timeout = self.shared.config.timeouts.request();
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            // The sender was dropped: connection torn down underneath us
            Ok(Err(_)) => Err(Error::ConnectionClosed),
            Err(_) => {
                self.shared.pending.lock().await.remove(&id);
                Err(Error::timeout(method, timeout))
            }
        }
    }

    /// One-shot request/response over HTTP
    async fn call_http(&self, method: &str, params: Option<Value>) -> Result<Value> {
        {
            let conn = self.shared.conn.lock().await;
            if conn.state != ConnectionState::Connected {
                return Err(Error::NotConnected);
            }
        }

        let http = self
            .shared
            .http
            .as_ref()
            .ok_or(Error::NotConnected)?;
        let url = self
            .shared
            .config
            .transport
            .http_url
            .as_ref()
            .ok_or(Error::NotConnected)?;

        let id = Uuid::new_v4().to_string();
        let request = Request::new(method, params, id);

        let response: wire::Response = http
            .post(url)
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        response.into_outcome()
    }

    // === Typed send helpers ===

    /// Send a text message to a contact or group
    pub async fn send_message(
        &self,
        recipient: &str,
        text: &str,
        attachments: &[&Path],
    ) -> Result<SendResult> {
        if recipient.is_empty() {
            return Err(Error::validation("recipient", "must not be empty"));
        }

        let mut params = recipient_params(recipient);
        params["message"] = json!(text);
        if !attachments.is_empty() {
            let paths: Vec<String> = attachments
                .iter()
                .map(|p| p.to_string_lossy().into_owned())
                .collect();
            params["attachments"] = json!(paths);
        }

        let result = self.call("send", Some(params)).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Send a reaction to a previously received message
    pub async fn send_reaction(
        &self,
        recipient: &str,
        emoji: &str,
        target_author: &str,
        target_timestamp: u64,
        remove: bool,
    ) -> Result<SendResult> {
        if recipient.is_empty() {
            return Err(Error::validation("recipient", "must not be empty"));
        }
        if emoji.is_empty() {
            return Err(Error::validation("emoji", "must not be empty"));
        }

        let mut params = recipient_params(recipient);
        params["emoji"] = json!(emoji);
        params["targetAuthor"] = json!(target_author);
        params["targetTimestamp"] = json!(target_timestamp);
        params["remove"] = json!(remove);

        let result = self.call("sendReaction", Some(params)).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Send a typing indicator
    pub async fn send_typing(&self, recipient: &str, stop: bool) -> Result<()> {
        if recipient.is_empty() {
            return Err(Error::validation("recipient", "must not be empty"));
        }

        let mut params = recipient_params(recipient);
        params["stop"] = json!(stop);

        self.call("sendTyping", Some(params)).await?;
        Ok(())
    }

    /// Send a read receipt for a received message
    pub async fn send_receipt(&self, recipient: &str, target_timestamp: u64) -> Result<()> {
        if recipient.is_empty() {
            return Err(Error::validation("recipient", "must not be empty"));
        }

        let params = json!({
            "recipient": recipient,
            "targetTimestamp": target_timestamp,
        });

        self.call("sendReceipt", Some(params)).await?;
        Ok(())
    }

    /// Daemon version string
    pub async fn version(&self) -> Result<Value> {
        self.call("version", None).await
    }

    // === Feature manager accessors ===

    pub fn groups(&self) -> managers::GroupManager {
        managers::GroupManager::new(self.clone())
    }

    pub fn contacts(&self) -> managers::ContactManager {
        managers::ContactManager::new(self.clone())
    }

    pub fn devices(&self) -> managers::DeviceManager {
        managers::DeviceManager::new(self.clone())
    }

    pub fn accounts(&self) -> managers::AccountManager {
        managers::AccountManager::new(self.clone())
    }

    pub fn stickers(&self) -> managers::StickerManager {
        managers::StickerManager::new(self.clone())
    }

    // === Connection establishment ===

    /// Open the transport and wire it into the client
    ///
    /// Establishment resolves on the first inbound line, or after the
    /// configured grace period with the handle confirmed alive —
    /// daemons that print no startup banner must not hang us forever.
    //
    // Returns a boxed future rather than an `async fn` so the opaque
    // return type does not recurse through the reconnection supervisor
    // (establish -> read_loop -> handle_close -> schedule_reconnect ->
    // establish), which would otherwise defeat `Send` inference.
    fn establish<'a>(
        shared: &'a Arc<Shared>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(Self::establish_inner(shared))
    }

    async fn establish_inner(shared: &Arc<Shared>) -> Result<()> {
        {
            let mut conn = shared.conn.lock().await;
            conn.state = ConnectionState::Connecting;
        }

        if shared.http.is_some() {
            // Stateless: nothing to open, no notifications possible
            let mut conn = shared.conn.lock().await;
            conn.state = ConnectionState::Connected;
            conn.reconnect_attempts = 0;
            tracing::info!("http transport ready");
            return Ok(());
        }

        let result = Self::open_and_confirm(shared).await;

        match result {
            Ok((channel, events, buffered)) => {
                let mut conn = shared.conn.lock().await;
                conn.outgoing = Some(channel.sender());
                conn.channel = Some(channel);
                conn.state = ConnectionState::Connected;
                conn.reconnect_attempts = 0;
                conn.reader_task = Some(tokio::spawn(Self::read_loop(
                    shared.clone(),
                    events,
                    buffered,
                )));
                tracing::info!("connected to daemon");
                Ok(())
            }
            Err(e) => {
                let mut conn = shared.conn.lock().await;
                conn.state = ConnectionState::Disconnected;
                Err(e)
            }
        }
    }

    /// Open the channel and wait for the liveness confirmation
    async fn open_and_confirm(
        shared: &Arc<Shared>,
    ) -> Result<(
        Channel,
        mpsc::UnboundedReceiver<TransportEvent>,
        Vec<TransportEvent>,
    )> {
        let mut channel = transport::open(&shared.config.transport).await?;
        let mut events = channel
            .take_events()
            .ok_or_else(|| Error::Internal("channel events already taken".to_string()))?;

        let grace = shared.config.timeouts.connect_grace();
        let deadline = tokio::time::Instant::now() + grace;
        // Events observed before confirmation are replayed to the
        // reader so no line is lost
        let mut buffered = Vec::new();

        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                break;
            }
            match tokio::time::timeout(remaining, events.recv()).await {
                Ok(Some(TransportEvent::Closed)) | Ok(None) => {
                    channel.close(Duration::ZERO).await;
                    return Err(Error::Connection(
                        "transport closed during connect".to_string(),
                    ));
                }
                Ok(Some(event @ TransportEvent::Line(_))) => {
                    buffered.push(event);
                    return Ok((channel, events, buffered));
                }
                Ok(Some(event)) => buffered.push(event),
                Err(_) => break,
            }
        }

        // Grace elapsed with no data; accept if the handle is alive
        if channel.is_alive() {
            Ok((channel, events, buffered))
        } else {
            channel.close(Duration::ZERO).await;
            Err(Error::Connection(
                "daemon exited before producing output".to_string(),
            ))
        }
    }

    // === Inbound processing ===

    /// Drive transport events until the channel closes
    async fn read_loop(
        shared: Arc<Shared>,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
        buffered: Vec<TransportEvent>,
    ) {
        for event in buffered {
            if Self::handle_transport_event(&shared, event).await {
                Self::handle_close(shared).await;
                return;
            }
        }

        while let Some(event) = events.recv().await {
            if Self::handle_transport_event(&shared, event).await {
                break;
            }
        }

        Self::handle_close(shared).await;
    }

    /// Process one transport event; returns true when the transport
    /// reported close
    async fn handle_transport_event(shared: &Arc<Shared>, event: TransportEvent) -> bool {
        match event {
            TransportEvent::Line(line) => {
                match router::route_line(&line) {
                    Routed::Response(response) => {
                        Self::settle_response(shared, response).await;
                    }
                    Routed::Events(events) => {
                        for event in events {
                            let _ = shared.events.send(event);
                        }
                    }
                }
                false
            }
            TransportEvent::Stderr(stderr) => {
                match stderr.severity {
                    StderrSeverity::Error => {
                        tracing::error!(target: "relaybot::daemon", "{}", stderr.text);
                        let _ = shared.events.send(ClientEvent::Error(ErrorEvent {
                            kind: ErrorEventKind::Daemon,
                            message: stderr.text,
                        }));
                    }
                    StderrSeverity::Warning => {
                        tracing::warn!(target: "relaybot::daemon", "{}", stderr.text);
                        let _ = shared
                            .events
                            .send(ClientEvent::Log(LogEvent { line: stderr.text }));
                    }
                    StderrSeverity::Info => {
                        tracing::debug!(target: "relaybot::daemon", "{}", stderr.text);
                        let _ = shared
                            .events
                            .send(ClientEvent::Log(LogEvent { line: stderr.text }));
                    }
                }
                false
            }
            TransportEvent::Closed => true,
        }
    }

    /// Resolve or reject the pending call matching a response
    async fn settle_response(shared: &Arc<Shared>, response: wire::Response) {
        let Some(id) = response.id_str().map(str::to_string) else {
            tracing::debug!("response with non-string id ignored");
            return;
        };

        let entry = shared.pending.lock().await.remove(&id);
        match entry {
            Some(tx) => {
                let _ = tx.send(response.into_outcome());
            }
            None => {
                // Late response after timeout, or not ours
                tracing::debug!(id = %id, "response without pending call");
            }
        }
    }

    /// React to transport termination
    async fn handle_close(shared: Arc<Shared>) {
        let intentional = {
            let mut conn = shared.conn.lock().await;
            conn.state = ConnectionState::Disconnected;
            conn.outgoing = None;
            conn.channel = None;
            conn.reader_task = None;
            conn.intentional_shutdown
        };

        Self::fail_pending(&shared, || Error::ConnectionClosed).await;
        let _ = shared.events.send(ClientEvent::Closed { intentional });

        if intentional {
            tracing::info!("transport closed (intentional shutdown)");
        } else {
            tracing::warn!("transport closed unexpectedly");
            Self::schedule_reconnect(&shared).await;
        }
    }

    /// Reject every pending call
    async fn fail_pending(shared: &Arc<Shared>, err: impl Fn() -> Error) {
        let entries: Vec<_> = shared.pending.lock().await.drain().collect();
        for (_, tx) in entries {
            let _ = tx.send(Err(err()));
        }
    }

    // === Reconnection supervisor ===

    /// Schedule reconnect attempts with exponential backoff
    ///
    /// Exactly one supervisor task runs at a time. Establishment
    /// failures inside the task count as further attempts; full
    /// success resets the attempt counter. Exhausting the attempt cap
    /// is terminal until the caller reconnects manually.
    async fn schedule_reconnect(shared: &Arc<Shared>) {
        let mut conn = shared.conn.lock().await;

        if conn.intentional_shutdown {
            return;
        }
        if conn
            .reconnect_task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
        {
            return;
        }

        let max_attempts = shared.config.reconnect.max_attempts;
        let base_delay = shared.config.reconnect.base_delay();
        let shared = shared.clone();

        conn.reconnect_task = Some(tokio::spawn(async move {
            loop {
                let attempt = {
                    let mut conn = shared.conn.lock().await;
                    if conn.intentional_shutdown {
                        return;
                    }
                    if conn.reconnect_attempts >= max_attempts {
                        tracing::error!(
                            attempts = conn.reconnect_attempts,
                            "reconnect attempts exhausted; manual reconnect required"
                        );
                        let _ = shared.events.send(ClientEvent::Error(ErrorEvent {
                            kind: ErrorEventKind::ReconnectExhausted,
                            message: Error::ReconnectExhausted {
                                attempts: conn.reconnect_attempts,
                            }
                            .to_string(),
                        }));
                        return;
                    }
                    conn.reconnect_attempts += 1;
                    conn.reconnect_attempts
                };

                let delay = backoff_delay(base_delay, attempt);
                tracing::info!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "scheduling reconnect"
                );
                tokio::time::sleep(delay).await;

                match Self::establish(&shared).await {
                    Ok(()) => {
                        tracing::info!(attempt, "reconnected");
                        return;
                    }
                    Err(e) => {
                        tracing::warn!(attempt, "reconnect attempt failed: {e}");
                    }
                }
            }
        }));
    }
}

/// Delay before reconnect attempt `attempt` (1-based): doubles each
/// attempt starting from `base`
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base * 2u32.saturating_pow(attempt.saturating_sub(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::config::TransportKind;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    fn tcp_config(addr: &str) -> Config {
        let mut config = Config::default();
        config.transport.kind = TransportKind::Tcp;
        config.transport.tcp_address = Some(addr.to_string());
        config.timeouts.connect_grace_ms = 50;
        config.timeouts.request_secs = 2;
        config.reconnect.base_delay_ms = 20;
        config.reconnect.max_attempts = 3;
        config
    }

    /// Accept one connection and answer every request with `make_reply`
    async fn echo_server(
        listener: TcpListener,
        make_reply: impl Fn(&Value) -> Option<String> + Send + 'static,
    ) {
        let (stream, _) = listener.accept().await.unwrap();
        let (read, mut write) = stream.into_split();
        let mut lines = BufReader::new(read).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let request: Value = serde_json::from_str(&line).unwrap();
            if let Some(reply) = make_reply(&request) {
                write.write_all(reply.as_bytes()).await.unwrap();
                write.write_all(b"\n").await.unwrap();
            }
        }
    }

    #[test]
    fn test_backoff_delay_doubles() {
        let base = Duration::from_secs(1);
        let delays: Vec<u64> = (1..=5).map(|n| backoff_delay(base, n).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16]);
    }

    #[tokio::test]
    async fn test_call_without_connection_fails_immediately() {
        let client = Client::new(tcp_config("127.0.0.1:1")).unwrap();
        let started = std::time::Instant::now();
        let err = client.call("version", None).await.unwrap_err();
        assert!(matches!(err, Error::NotConnected));
        // No timer raced: the rejection is immediate
        assert!(started.elapsed() < Duration::from_millis(100));
        assert!(client.shared.pending.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_call_resolves_and_clears_pending() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(echo_server(listener, |request| {
            let id = request["id"].as_str().unwrap();
            Some(format!(
                r#"{{"jsonrpc":"2.0","id":"{id}","result":{{"timestamp":123,"results":[]}}}}"#
            ))
        }));

        let client = Client::new(tcp_config(&addr)).unwrap();
        client.connect().await.unwrap();
        assert_eq!(client.state().await, ConnectionState::Connected);

        let result = client
            .send_message("+15550000000", "hi", &[])
            .await
            .unwrap();
        assert_eq!(result.timestamp, 123);
        assert!(result.results.is_empty());
        assert!(client.shared.pending.lock().await.is_empty());

        client.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_calls_resolve_by_id() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        // Collect both requests, then answer in reverse arrival order
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read, mut write) = stream.into_split();
            let mut lines = BufReader::new(read).lines();
            let mut requests = Vec::new();
            while requests.len() < 2 {
                let line = lines.next_line().await.unwrap().unwrap();
                requests.push(serde_json::from_str::<Value>(&line).unwrap());
            }
            for request in requests.iter().rev() {
                let id = request["id"].as_str().unwrap();
                let method = request["method"].as_str().unwrap();
                let reply = format!(
                    r#"{{"jsonrpc":"2.0","id":"{id}","result":{{"method":"{method}"}}}}"#
                );
                write.write_all(reply.as_bytes()).await.unwrap();
                write.write_all(b"\n").await.unwrap();
            }
        });

        let client = Client::new(tcp_config(&addr)).unwrap();
        client.connect().await.unwrap();

        let (first, second) = tokio::join!(
            client.call("alpha", None),
            client.call("beta", None),
        );
        assert_eq!(first.unwrap()["method"], "alpha");
        assert_eq!(second.unwrap()["method"], "beta");

        client.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_timeout_removes_pending_entry() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        // Server accepts but never answers
        tokio::spawn(echo_server(listener, |_| None));

        let mut config = tcp_config(&addr);
        config.timeouts.request_secs = 1;
        let client = Client::new(config).unwrap();
        client.connect().await.unwrap();

        let err = client.call("version", None).await.unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
        assert!(client.shared.pending.lock().await.is_empty());

        client.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_daemon_error_maps_to_daemon_variant() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(echo_server(listener, |request| {
            let id = request["id"].as_str().unwrap();
            Some(format!(
                r#"{{"jsonrpc":"2.0","id":"{id}","error":{{"code":-32601,"message":"Method not found"}}}}"#
            ))
        }));

        let client = Client::new(tcp_config(&addr)).unwrap();
        client.connect().await.unwrap();

        match client.call("nonsense", None).await {
            Err(Error::Daemon { code, message }) => {
                assert_eq!(code, -32601);
                assert_eq!(message, "Method not found");
            }
            other => panic!("expected daemon error, got {other:?}"),
        }

        client.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_unexpected_close_schedules_reconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        // First accept: greet so establishment confirms, then hang up
        // (unexpected close). Second accept: stay open so the
        // reconnect succeeds.
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (_read, mut write) = stream.into_split();
            let banner = "{\"jsonrpc\":\"2.0\",\"method\":\"receive\",\"params\":{}}\n";
            write.write_all(banner.as_bytes()).await.unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
            drop(write);
            drop(_read);
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let client = Client::new(tcp_config(&addr)).unwrap();
        let mut events = client.subscribe();
        client.connect().await.unwrap();

        // Close event for the dropped connection, not intentional
        loop {
            match events.recv().await.unwrap() {
                ClientEvent::Closed { intentional } => {
                    assert!(!intentional);
                    break;
                }
                _ => continue,
            }
        }

        // Supervisor reconnects with backoff
        let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
        loop {
            if client.state().await == ConnectionState::Connected {
                break;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "reconnect did not happen"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        client.disconnect().await.unwrap();
        server.abort();
    }

    #[tokio::test]
    async fn test_intentional_disconnect_does_not_reconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            // A second accept would indicate a stray reconnect
            let second = listener.accept().await;
            panic!("unexpected reconnect: {second:?}");
        });

        let client = Client::new(tcp_config(&addr)).unwrap();
        client.connect().await.unwrap();
        client.disconnect().await.unwrap();
        assert_eq!(client.state().await, ConnectionState::Disconnected);

        // Give a would-be supervisor time to misbehave
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!server.is_finished());
        server.abort();

        let conn = client.shared.conn.lock().await;
        assert!(conn.reconnect_task.is_none());
    }

    #[tokio::test]
    async fn test_validation_error_precedes_io() {
        let client = Client::new(tcp_config("127.0.0.1:1")).unwrap();
        let err = client.send_message("", "hi", &[]).await.unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[tokio::test]
    async fn test_notification_fans_out_to_subscribers() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (_read, mut write) = stream.into_split();
            let push = concat!(
                r#"{"jsonrpc":"2.0","method":"receive","params":{"envelope":"#,
                r#"{"source":"+1","dataMessage":{"message":"ping"}}}}"#,
                "\n"
            );
            write.write_all(push.as_bytes()).await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let client = Client::new(tcp_config(&addr)).unwrap();
        let mut first = client.subscribe();
        let mut second = client.subscribe();
        client.connect().await.unwrap();

        for events in [&mut first, &mut second] {
            let mut saw_notification = false;
            let mut saw_message = false;
            while !(saw_notification && saw_message) {
                match tokio::time::timeout(Duration::from_secs(2), events.recv())
                    .await
                    .expect("event timeout")
                    .unwrap()
                {
                    ClientEvent::Notification { method, .. } => {
                        assert_eq!(method, "receive");
                        saw_notification = true;
                    }
                    ClientEvent::Message(msg) => {
                        assert_eq!(msg.text, "ping");
                        saw_message = true;
                    }
                    _ => continue,
                }
            }
        }

        client.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_malformed_line_does_not_break_following_line() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read, mut write) = stream.into_split();
            let mut lines = BufReader::new(read).lines();
            let line = lines.next_line().await.unwrap().unwrap();
            let request: Value = serde_json::from_str(&line).unwrap();
            let id = request["id"].as_str().unwrap();
            // Garbage first, then the real response in the same batch
            let batch = format!(
                "this is not json\n{{\"jsonrpc\":\"2.0\",\"id\":\"{id}\",\"result\":{{}}}}\n"
            );
            write.write_all(batch.as_bytes()).await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let client = Client::new(tcp_config(&addr)).unwrap();
        let mut events = client.subscribe();
        client.connect().await.unwrap();

        client.call("version", None).await.unwrap();

        // The bad line surfaced as a parse-error event
        let mut saw_parse_error = false;
        while let Ok(Ok(event)) =
            tokio::time::timeout(Duration::from_millis(200), events.recv()).await
        {
            if matches!(
                event,
                ClientEvent::Error(ErrorEvent { kind: ErrorEventKind::Parse, .. })
            ) {
                saw_parse_error = true;
                break;
            }
        }
        assert!(saw_parse_error);

        client.disconnect().await.unwrap();
    }
}
