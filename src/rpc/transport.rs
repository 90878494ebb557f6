//! Transport layer
//!
//! Normalizes the four ways of reaching the daemon — child-process
//! stdio, local socket, TCP, and stateless HTTP — into "send framed
//! JSON line" / "receive framed JSON line" operations. The three
//! stream kinds produce a [`Channel`]; the HTTP variant has no
//! persistent connection and is handled directly by the client.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::common::config::{TransportKind, TransportSettings};
use crate::common::{Error, Result};

/// Severity of one line of daemon stderr output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StderrSeverity {
    /// Surfaces as an error event
    Error,
    /// Surfaces as a warning log event
    Warning,
    /// Surfaces as an informational log event
    Info,
}

/// One classified line of daemon stderr
#[derive(Debug, Clone)]
pub struct StderrLine {
    pub severity: StderrSeverity,
    pub text: String,
}

/// Raw events delivered by a channel's background tasks
#[derive(Debug)]
pub enum TransportEvent {
    /// One newline-delimited frame of transport data
    Line(String),
    /// One line of daemon diagnostic output (process transport only)
    Stderr(StderrLine),
    /// The transport terminated
    Closed,
}

/// A live stream transport
///
/// Owns the reader/writer tasks and, for the process variant, the
/// daemon child process. Dropping the channel aborts the tasks;
/// [`Channel::close`] additionally runs the graceful termination
/// sequence on the child.
pub struct Channel {
    outgoing: mpsc::Sender<String>,
    events: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    process: Option<Child>,
    tasks: Vec<JoinHandle<()>>,
}

/// Open a stream channel for the configured transport
///
/// The HTTP kind has no channel; callers must route HTTP through the
/// per-request path instead.
pub async fn open(settings: &TransportSettings) -> Result<Channel> {
    match settings.kind {
        TransportKind::Stdio => {
            let path = settings
                .daemon_path
                .clone()
                .or_else(|| which::which("relayd").ok())
                .ok_or_else(|| {
                    Error::Config("daemon_path not set and relayd not found on PATH".to_string())
                })?;
            open_process(&path, &settings.daemon_args, settings.account.as_deref())
        }
        TransportKind::UnixSocket => {
            let path = settings.socket_path.as_ref().ok_or_else(|| {
                Error::Config("socket_path required for unix_socket transport".to_string())
            })?;
            open_local_socket(path).await
        }
        TransportKind::Tcp => {
            let addr = settings.tcp_address.as_ref().ok_or_else(|| {
                Error::Config("tcp_address required for tcp transport".to_string())
            })?;
            let stream = tokio::net::TcpStream::connect(addr)
                .await
                .map_err(|e| Error::Connection(format!("tcp connect to {addr}: {e}")))?;
            let (read, write) = stream.into_split();
            Ok(Channel::from_halves(read, write))
        }
        TransportKind::Http => Err(Error::Config(
            "http transport has no stream channel".to_string(),
        )),
    }
}

/// The program and argument list used to spawn the daemon
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonCommand {
    pub program: String,
    pub args: Vec<String>,
}

/// Build the daemon invocation for the long-running JSON-RPC stdio mode
///
/// On Windows the executable is run through `cmd /C` with the path
/// quoted, since paths with spaces cannot be spawned directly there.
/// The `windows` flag is a parameter so both branches stay testable
/// on any host.
pub fn daemon_command(
    path: &Path,
    extra_args: &[String],
    account: Option<&str>,
    windows: bool,
) -> DaemonCommand {
    let mut args = Vec::new();
    if let Some(account) = account {
        args.push("--account".to_string());
        args.push(account.to_string());
    }
    args.push("jsonrpc".to_string());
    args.extend(extra_args.iter().cloned());

    let path_str = path.to_string_lossy().into_owned();

    if windows {
        let quoted = if path_str.contains(' ') {
            format!("\"{path_str}\"")
        } else {
            path_str
        };
        let mut cmd_args = vec!["/C".to_string(), quoted];
        cmd_args.extend(args);
        DaemonCommand {
            program: "cmd".to_string(),
            args: cmd_args,
        }
    } else {
        DaemonCommand {
            program: path_str,
            args,
        }
    }
}

/// Spawn the daemon and wire its stdio into a channel
fn open_process(path: &Path, extra_args: &[String], account: Option<&str>) -> Result<Channel> {
    let command = daemon_command(path, extra_args, account, cfg!(windows));

    tracing::info!(program = %command.program, args = ?command.args, "spawning daemon");

    let mut child = Command::new(&command.program)
        .args(&command.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| Error::DaemonStartFailed(format!("{}: {e}", path.display())))?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| Error::DaemonStartFailed("failed to get daemon stdin".to_string()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| Error::DaemonStartFailed("failed to get daemon stdout".to_string()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| Error::DaemonStartFailed("failed to get daemon stderr".to_string()))?;

    let (outgoing_tx, outgoing_rx) = mpsc::channel::<String>(64);
    let (event_tx, event_rx) = mpsc::unbounded_channel();

    let tasks = vec![
        spawn_reader(stdout, event_tx.clone()),
        spawn_writer(stdin, outgoing_rx),
        spawn_stderr_reader(stderr, event_tx),
    ];

    Ok(Channel {
        outgoing: outgoing_tx,
        events: Some(event_rx),
        process: Some(child),
        tasks,
    })
}

/// Connect to a daemon listening on a local socket
async fn open_local_socket(path: &Path) -> Result<Channel> {
    use interprocess::local_socket::tokio::{prelude::*, Stream};

    #[cfg(unix)]
    let name = {
        use interprocess::local_socket::GenericFilePath;
        path.to_string_lossy()
            .into_owned()
            .to_fs_name::<GenericFilePath>()
            .map_err(|e| Error::Connection(format!("socket name: {e}")))?
    };

    #[cfg(windows)]
    let name = {
        use interprocess::local_socket::GenericNamespaced;
        path.to_string_lossy()
            .into_owned()
            .to_ns_name::<GenericNamespaced>()
            .map_err(|e| Error::Connection(format!("socket name: {e}")))?
    };

    let stream = Stream::connect(name)
        .await
        .map_err(|e| Error::Connection(format!("socket connect to {}: {e}", path.display())))?;

    Ok(Channel::from_stream(stream))
}

impl Channel {
    /// Build a channel over any duplex byte stream
    ///
    /// Used by the socket transports and by tests driving an in-memory
    /// stream.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read, write) = tokio::io::split(stream);
        Self::from_halves(read, write)
    }

    /// Build a channel from separate read and write halves
    pub fn from_halves<R, W>(read: R, write: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (outgoing_tx, outgoing_rx) = mpsc::channel::<String>(64);
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let tasks = vec![
            spawn_reader(read, event_tx),
            spawn_writer(write, outgoing_rx),
        ];

        Self {
            outgoing: outgoing_tx,
            events: Some(event_rx),
            process: None,
            tasks,
        }
    }

    /// Sender for outgoing wire lines
    pub fn sender(&self) -> mpsc::Sender<String> {
        self.outgoing.clone()
    }

    /// Take the event receiver (can only be called once)
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        self.events.take()
    }

    /// Whether the underlying handle is still live
    ///
    /// For the process variant this checks the child; socket liveness
    /// is only discovered by the reader hitting EOF.
    pub fn is_alive(&mut self) -> bool {
        match &mut self.process {
            Some(child) => child.try_wait().ok().flatten().is_none(),
            None => !self.outgoing.is_closed(),
        }
    }

    /// Close the transport
    ///
    /// Aborts the background tasks, then runs terminate → bounded wait
    /// → force-kill on the daemon child, releasing the OS handle.
    pub async fn close(&mut self, grace: Duration) {
        for task in self.tasks.drain(..) {
            task.abort();
        }

        if let Some(mut child) = self.process.take() {
            terminate_child(&mut child, grace).await;
        }
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        // kill_on_drop covers the child when close() was never called
    }
}

/// Cooperative terminate, bounded wait, then force kill
async fn terminate_child(child: &mut Child, grace: Duration) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        // SIGTERM first so the daemon can flush and unlink its state
        unsafe {
            libc::kill(pid as i32, libc::SIGTERM);
        }
        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(?status, "daemon exited after SIGTERM");
                return;
            }
            Ok(Err(e)) => tracing::warn!("error waiting for daemon exit: {e}"),
            Err(_) => tracing::warn!(grace_ms = grace.as_millis() as u64, "daemon ignored SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    let _ = grace;

    if let Err(e) = child.kill().await {
        tracing::warn!("failed to kill daemon process: {e}");
    }
}

/// Read newline-delimited frames and forward them as events
fn spawn_reader<R>(
    read: R,
    event_tx: mpsc::UnboundedSender<TransportEvent>,
) -> JoinHandle<()>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(read).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    if event_tx.send(TransportEvent::Line(line)).is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!("transport read error: {e}");
                    break;
                }
            }
        }
        let _ = event_tx.send(TransportEvent::Closed);
    })
}

/// Drain the outgoing queue onto the wire, one line per frame
fn spawn_writer<W>(write: W, mut outgoing_rx: mpsc::Receiver<String>) -> JoinHandle<()>
where
    W: AsyncWrite + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        let mut writer = BufWriter::new(write);
        while let Some(line) = outgoing_rx.recv().await {
            if let Err(e) = write_frame(&mut writer, &line).await {
                tracing::debug!("transport write error: {e}");
                break;
            }
        }
    })
}

async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> std::io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

/// Classify and forward daemon stderr lines
fn spawn_stderr_reader<R>(
    read: R,
    event_tx: mpsc::UnboundedSender<TransportEvent>,
) -> JoinHandle<()>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(read).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line.trim().is_empty() {
                continue;
            }
            let classified = classify_stderr_line(&line);
            if event_tx.send(TransportEvent::Stderr(classified)).is_err() {
                break;
            }
        }
    })
}

/// Expected chatter the daemon emits at WARN that callers should not
/// be alarmed by, mostly cancellation noise during shutdown
const BENIGN_WARNINGS: &[&str] = &[
    "InterruptedException",
    "Interrupted while waiting",
    "Connection closed unexpectedly",
    "Websocket closed",
];

/// Classify one line of daemon stderr by its severity marker
pub fn classify_stderr_line(line: &str) -> StderrLine {
    let severity = if line.contains("ERROR") {
        StderrSeverity::Error
    } else if line.contains("WARN") {
        if BENIGN_WARNINGS.iter().any(|b| line.contains(b)) {
            StderrSeverity::Info
        } else {
            StderrSeverity::Warning
        }
    } else {
        StderrSeverity::Info
    };

    StderrLine {
        severity,
        text: line.to_string(),
    }
}
