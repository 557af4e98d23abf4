//! Local process transport
//!
//! The backend command runs under the platform shell. Requests go to its
//! stdin as one JSON object per line; its stdout is read line by line and
//! each message is routed either to the caller waiting on that id or to the
//! registered notification observers. Stderr is diagnostic only.
//!
//! ## Timeouts
//!
//! | Stage | Default |
//! |-------|---------|
//! | writing a request and waiting for its response | 30s (closes the transport) |
//! | closing stdin on shutdown | 3s |
//! | waiting for process exit on shutdown | 5s, then kill |

mod meta;
mod pending;

use std::collections::VecDeque;
use std::fmt;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use mcprouter_protocol::{JSONRPC_VERSION, RequestId};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{Mutex as AsyncMutex, oneshot};
use tokio::time::Instant;
use tokio_util::codec::{
    AnyDelimiterCodec, AnyDelimiterCodecError, FramedRead, LinesCodec, LinesCodecError,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use self::pending::PendingRequests;
use crate::client::{Client, NotificationHandler};
use crate::config::ServerConfig;
use crate::error::{ClientError, ClientResult};

/// Default ceiling for a single request/response exchange
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default ceiling for closing the backend's stdin during shutdown
pub const DEFAULT_STDIN_CLOSE_TIMEOUT: Duration = Duration::from_secs(3);

/// Default ceiling for the backend process to exit during shutdown
pub const DEFAULT_PROCESS_EXIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default upper bound for one output line (10 MiB)
pub const DEFAULT_MAX_LINE_BYTES: usize = 10 * 1024 * 1024;

const STDERR_TAIL_LINES: usize = 64;

/// Tunables for [`StdioClient`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StdioOptions {
    /// How long a request may take, from writing it to reading its response
    pub request_timeout: Duration,
    /// How long shutdown waits for stdin to close
    pub stdin_close_timeout: Duration,
    /// How long shutdown waits for the process to exit before killing it
    pub process_exit_timeout: Duration,
    /// Stdout lines longer than this are dropped; a longer stderr line fails
    /// the transport
    pub max_line_bytes: usize,
}

impl Default for StdioOptions {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            stdin_close_timeout: DEFAULT_STDIN_CLOSE_TIMEOUT,
            process_exit_timeout: DEFAULT_PROCESS_EXIT_TIMEOUT,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
        }
    }
}

impl StdioOptions {
    /// Set the request ceiling
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the stdin close ceiling
    #[must_use]
    pub fn with_stdin_close_timeout(mut self, timeout: Duration) -> Self {
        self.stdin_close_timeout = timeout;
        self
    }

    /// Set the process exit ceiling
    #[must_use]
    pub fn with_process_exit_timeout(mut self, timeout: Duration) -> Self {
        self.process_exit_timeout = timeout;
        self
    }

    /// Set the line length bound
    #[must_use]
    pub fn with_max_line_bytes(mut self, max: usize) -> Self {
        self.max_line_bytes = max;
        self
    }
}

/// Lifecycle of a local process transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Process started, readers not yet running
    Starting,
    /// Accepting requests
    Running,
    /// Shutdown in progress
    Closing,
    /// Shutdown finished
    Closed,
    /// The diagnostic stream failed; terminal
    Failed,
}

impl ClientState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Starting,
            1 => Self::Running,
            2 => Self::Closing,
            3 => Self::Closed,
            _ => Self::Failed,
        }
    }
}

/// JSON-RPC over a child process's stdin/stdout
pub struct StdioClient {
    shared: Arc<Shared>,
}

struct Shared {
    config: ServerConfig,
    options: StdioOptions,
    metadata: Value,
    pid: Option<u32>,
    stdin: AsyncMutex<Option<ChildStdin>>,
    child: AsyncMutex<Option<Child>>,
    pending: PendingRequests,
    observers: RwLock<Vec<NotificationHandler>>,
    stderr_tail: Mutex<VecDeque<String>>,
    fatal: OnceLock<String>,
    done: CancellationToken,
    closing: AtomicBool,
    state: AtomicU8,
    next_id: AtomicI64,
}

impl StdioClient {
    /// Start the backend command with default options
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidConfiguration`] for an empty command and
    /// [`ClientError::Spawn`] when the shell cannot be started.
    pub async fn spawn(config: ServerConfig) -> ClientResult<Self> {
        Self::spawn_with_options(config, StdioOptions::default()).await
    }

    /// Start the backend command
    ///
    /// Returns once the stdout reader is running, so the first request cannot
    /// miss its response.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidConfiguration`] for an empty command and
    /// [`ClientError::Spawn`] when the shell cannot be started.
    pub async fn spawn_with_options(
        mut config: ServerConfig,
        options: StdioOptions,
    ) -> ClientResult<Self> {
        if config.command.trim().is_empty() {
            return Err(ClientError::invalid_configuration(
                "command must not be empty",
            ));
        }
        config.ensure_command_hash();

        let mut child = shell_command(&config.command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                error!(command = %config.command, error = %e, "failed to start command");
                ClientError::Spawn(e)
            })?;

        let stdin = child.stdin.take().ok_or_else(|| missing_pipe("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing_pipe("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing_pipe("stderr"))?;

        let shared = Arc::new(Shared {
            metadata: meta::metadata(config.server_params_object()),
            pid: child.id(),
            config,
            options,
            stdin: AsyncMutex::new(Some(stdin)),
            child: AsyncMutex::new(Some(child)),
            pending: PendingRequests::default(),
            observers: RwLock::new(Vec::new()),
            stderr_tail: Mutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES)),
            fatal: OnceLock::new(),
            done: CancellationToken::new(),
            closing: AtomicBool::new(false),
            state: AtomicU8::new(ClientState::Starting as u8),
            next_id: AtomicI64::new(0),
        });

        tokio::spawn(read_stderr(Arc::clone(&shared), stderr));

        let (ready_tx, ready_rx) = oneshot::channel();
        tokio::spawn(read_stdout(Arc::clone(&shared), stdout, ready_tx));
        // The reader drops the sender only after signalling, so an error here
        // means it already stopped; requests will then see a closed transport.
        let _ = ready_rx.await;

        shared.set_state(ClientState::Running);
        info!(
            command = %shared.config.command,
            pid = ?shared.pid,
            "mcp server running"
        );

        Ok(Self { shared })
    }

    /// Descriptor this transport was started from
    pub fn server_config(&self) -> &ServerConfig {
        &self.shared.config
    }

    /// OS process id of the shell running the backend
    pub fn pid(&self) -> Option<u32> {
        self.shared.pid
    }

    /// Current lifecycle state
    pub fn state(&self) -> ClientState {
        self.shared.state()
    }

    /// Most recent stderr lines, oldest first
    pub fn stderr_tail(&self) -> Vec<String> {
        self.shared.stderr_tail.lock().iter().cloned().collect()
    }

    /// Number of requests waiting for a response
    pub fn pending_requests(&self) -> usize {
        self.shared.pending.len()
    }
}

#[async_trait]
impl Client for StdioClient {
    fn error(&self) -> Option<ClientError> {
        self.shared
            .fatal
            .get()
            .map(|message| ClientError::StreamFailure(message.clone()))
    }

    async fn close(&self) -> ClientResult<()> {
        self.shared.shutdown().await
    }

    fn on_notification(&self, handler: NotificationHandler) {
        self.shared.observers.write().push(handler);
    }

    async fn send_message(&self, message: &[u8]) -> ClientResult<Option<Bytes>> {
        self.shared.send_message(message).await
    }

    fn next_request_id(&self) -> RequestId {
        RequestId::Number(self.shared.next_id.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Debug for StdioClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StdioClient")
            .field("command", &self.shared.config.command)
            .field("pid", &self.shared.pid)
            .field("state", &self.shared.state())
            .field("pending", &self.shared.pending.len())
            .finish()
    }
}

impl Drop for StdioClient {
    fn drop(&mut self) {
        if self.shared.closing.load(Ordering::SeqCst) {
            return;
        }
        self.shared.done.cancel();
        // Best effort: a concurrent shutdown may hold the lock.
        if let Ok(mut child) = self.shared.child.try_lock()
            && let Some(child) = child.as_mut()
        {
            let _ = child.start_kill();
        }
    }
}

impl Shared {
    fn state(&self) -> ClientState {
        if self.fatal.get().is_some() {
            return ClientState::Failed;
        }
        ClientState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: ClientState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// Error handed to callers whose wait ended because the transport closed
    fn closed_error(&self) -> ClientError {
        match self.fatal.get() {
            Some(message) => ClientError::StreamFailure(message.clone()),
            None => ClientError::ClosedNoResponse,
        }
    }

    async fn send_message(&self, message: &[u8]) -> ClientResult<Option<Bytes>> {
        if self.done.is_cancelled() {
            return Err(self.closed_error());
        }

        let mut value: Value = serde_json::from_slice(message)
            .map_err(|e| ClientError::malformed_message(format!("invalid request message: {e}")))?;
        if value.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
            return Err(ClientError::malformed_message(
                "invalid request message: jsonrpc must be \"2.0\"",
            ));
        }
        let id = match value.get("id") {
            None => None,
            Some(raw) => Some(serde_json::from_value::<RequestId>(raw.clone()).map_err(|_| {
                ClientError::malformed_message("invalid request message: id must be a number or string")
            })?),
        };

        meta::inject(&mut value, &self.metadata)?;

        let mut line = serde_json::to_vec(&value)
            .map_err(|e| ClientError::malformed_message(e.to_string()))?;
        line.push(b'\n');

        let deadline = Instant::now() + self.options.request_timeout;

        let Some(id) = id else {
            self.write_before(&line, deadline).await?;
            trace!(command = %self.config.command, "stdin write notification message");
            return Ok(None);
        };

        let (rx, _guard) = self.pending.register(id.clone())?;
        self.write_before(&line, deadline).await?;
        trace!(request_id = %id, "stdin write request message");

        self.await_response(&id, rx, deadline).await
    }

    /// Write one line unless the transport closes or `deadline` passes first
    ///
    /// A backend that stops reading stdin blocks the write; the deadline then
    /// closes the transport like an unanswered request does.
    async fn write_before(&self, line: &[u8], deadline: Instant) -> ClientResult<()> {
        enum Outcome {
            Written(ClientResult<()>),
            Closed,
            TimedOut,
        }

        let outcome = tokio::select! {
            biased;
            () = self.done.cancelled() => Outcome::Closed,
            written = self.write_line(line) => Outcome::Written(written),
            () = tokio::time::sleep_until(deadline) => Outcome::TimedOut,
        };

        match outcome {
            Outcome::Written(Ok(())) => Ok(()),
            Outcome::Written(Err(_)) | Outcome::Closed if self.done.is_cancelled() => {
                Err(self.closed_error())
            }
            Outcome::Written(Err(e)) => {
                error!(error = %e, "failed to write message to mcp server");
                if let Err(close_err) = self.shutdown().await {
                    debug!(error = %close_err, "error while closing after failed write");
                }
                Err(e)
            }
            Outcome::Closed => Err(self.closed_error()),
            Outcome::TimedOut => {
                warn!(
                    timeout_secs = self.options.request_timeout.as_secs(),
                    "timeout writing to mcp server, closing client"
                );
                if let Err(e) = self.shutdown().await {
                    warn!(error = %e, "failed to close client after timeout");
                }
                Err(ClientError::Timeout(self.options.request_timeout))
            }
        }
    }

    async fn await_response(
        &self,
        id: &RequestId,
        rx: oneshot::Receiver<Bytes>,
        deadline: Instant,
    ) -> ClientResult<Option<Bytes>> {
        enum Outcome {
            Response(Bytes),
            Closed,
            TimedOut,
        }

        let outcome = tokio::select! {
            biased;
            response = rx => match response {
                Ok(payload) => Outcome::Response(payload),
                Err(_) => Outcome::Closed,
            },
            () = self.done.cancelled() => Outcome::Closed,
            () = tokio::time::sleep_until(deadline) => Outcome::TimedOut,
        };

        match outcome {
            Outcome::Response(payload) => Ok(Some(payload)),
            Outcome::Closed => Err(self.closed_error()),
            Outcome::TimedOut => {
                warn!(
                    request_id = %id,
                    timeout_secs = self.options.request_timeout.as_secs(),
                    "timeout waiting for response, closing client"
                );
                if let Err(e) = self.shutdown().await {
                    warn!(error = %e, "failed to close client after timeout");
                }
                Err(ClientError::Timeout(self.options.request_timeout))
            }
        }
    }

    async fn write_line(&self, line: &[u8]) -> ClientResult<()> {
        let mut stdin = self.stdin.lock().await;
        let Some(stdin) = stdin.as_mut() else {
            return Err(self.closed_error());
        };
        stdin.write_all(line).await?;
        stdin.flush().await?;
        Ok(())
    }

    /// Route one stdout line to its waiter or to the notification observers
    fn route_line(&self, line: String) {
        if line.trim().is_empty() {
            return;
        }

        let message: Value = match serde_json::from_str(&line) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "invalid response message from backend");
                return;
            }
        };
        if message.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
            warn!("invalid response message: jsonrpc must be \"2.0\"");
            return;
        }

        let Some(raw_id) = message.get("id") else {
            self.notify(line.as_bytes());
            return;
        };
        let Ok(id) = serde_json::from_value::<RequestId>(raw_id.clone()) else {
            warn!(id = %raw_id, "isolated response message: unusable id");
            return;
        };

        if self.pending.complete(&id, Bytes::from(line)) {
            trace!(request_id = %id, "response delivered");
        } else {
            warn!(request_id = %id, "isolated response message: no pending request");
        }
    }

    fn notify(&self, line: &[u8]) {
        let observers = self.observers.read();
        if observers.is_empty() {
            trace!("notification dropped: no observers registered");
            return;
        }
        for handler in observers.iter() {
            handler(line);
        }
    }

    fn record_stderr(&self, line: &[u8]) {
        let text = String::from_utf8_lossy(line);
        let text = text.trim_end();
        debug!(server = %self.config.display_name(), "stderr: {}", text);

        let mut tail = self.stderr_tail.lock();
        if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(text.to_string());
    }

    /// Release the backend; safe to call any number of times
    ///
    /// Stages: cancel waiters, close stdin, wait for exit, kill on timeout.
    /// Every stage runs; the first error is returned.
    async fn shutdown(&self) -> ClientResult<()> {
        if self.closing.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.set_state(ClientState::Closing);
        self.done.cancel();

        let abandoned = self.pending.clear();
        info!(
            command = %self.config.command,
            pid = ?self.pid,
            abandoned,
            "closing mcp server"
        );

        let mut first_error: Option<ClientError> = None;

        let stdin_closed = tokio::time::timeout(self.options.stdin_close_timeout, async {
            match self.stdin.lock().await.take() {
                Some(mut stdin) => stdin.shutdown().await,
                None => Ok(()),
            }
        })
        .await;
        match stdin_closed {
            Ok(Ok(())) => debug!("stdin closed"),
            Ok(Err(e)) => {
                warn!(error = %e, "failed to close stdin");
                keep_first(&mut first_error, ClientError::Io(e));
            }
            Err(_) => {
                warn!("timeout while closing stdin");
                keep_first(&mut first_error, ClientError::StdinCloseTimeout);
            }
        }

        let child = self.child.lock().await.take();
        if let Some(mut child) = child {
            match tokio::time::timeout(self.options.process_exit_timeout, child.wait()).await {
                Ok(Ok(status)) if status.success() => debug!(%status, "mcp server exited"),
                Ok(Ok(status)) => {
                    warn!(%status, "mcp server exited unsuccessfully");
                    keep_first(&mut first_error, ClientError::ProcessExit(status.to_string()));
                }
                Ok(Err(e)) => {
                    error!(error = %e, "failed to wait for mcp server exit");
                    keep_first(&mut first_error, ClientError::Io(e));
                }
                Err(_) => {
                    warn!("mcp server did not exit in time, killing");
                    match child.kill().await {
                        Ok(()) => keep_first(&mut first_error, ClientError::KilledAfterTimeout),
                        Err(e) => {
                            error!(error = %e, "failed to kill mcp server");
                            keep_first(&mut first_error, ClientError::Io(e));
                        }
                    }
                }
            }
        }

        self.set_state(ClientState::Closed);
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn keep_first(slot: &mut Option<ClientError>, error: ClientError) {
    if slot.is_none() {
        *slot = Some(error);
    }
}

fn missing_pipe(name: &str) -> ClientError {
    ClientError::Spawn(std::io::Error::other(format!("{name} pipe unavailable")))
}

#[cfg(not(windows))]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(windows)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("cmd.exe");
    cmd.arg("/C").arg(command);
    cmd
}

async fn read_stdout(shared: Arc<Shared>, stdout: ChildStdout, ready: oneshot::Sender<()>) {
    let max = shared.options.max_line_bytes;
    let mut lines = FramedRead::new(stdout, LinesCodec::new_with_max_length(max));
    let _ = ready.send(());

    // After a decode error the framed reader yields one `None` before it
    // resumes reading.
    let mut resuming = false;
    loop {
        let next = tokio::select! {
            biased;
            () = shared.done.cancelled() => {
                debug!("stdout reader stopped: client closed");
                return;
            }
            next = lines.next() => next,
        };
        match next {
            Some(Ok(line)) => shared.route_line(line),
            Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                warn!(max_bytes = max, "dropping oversized message from backend");
                resuming = true;
            }
            Some(Err(LinesCodecError::Io(e))) if e.kind() == std::io::ErrorKind::InvalidData => {
                warn!(error = %e, "dropping non-UTF-8 message from backend");
                resuming = true;
            }
            Some(Err(LinesCodecError::Io(e))) => {
                warn!(error = %e, "failed to read stdout");
                break;
            }
            None if resuming => resuming = false,
            None => {
                debug!("stdout closed by mcp server");
                break;
            }
        }
    }

    if let Err(e) = shared.shutdown().await {
        debug!(error = %e, "shutdown after stdout closed");
    }
}

async fn read_stderr(shared: Arc<Shared>, stderr: ChildStderr) {
    let max = shared.options.max_line_bytes;
    let codec = AnyDelimiterCodec::new_with_max_length(b"\n".to_vec(), Vec::new(), max);
    let mut lines = FramedRead::new(stderr, codec);

    loop {
        let next = tokio::select! {
            biased;
            () = shared.done.cancelled() => break,
            next = lines.next() => next,
        };
        let failure = match next {
            Some(Ok(line)) => {
                shared.record_stderr(&line);
                continue;
            }
            None => break,
            Some(Err(AnyDelimiterCodecError::MaxChunkLengthExceeded)) => {
                format!("stderr line exceeds {max} bytes")
            }
            Some(Err(AnyDelimiterCodecError::Io(e))) => format!("stderr read failed: {e}"),
        };

        error!(server = %shared.config.display_name(), error = %failure, "stderr stream failed");
        let _ = shared.fatal.set(failure);
        shared.set_state(ClientState::Failed);
        if let Err(close_err) = shared.shutdown().await {
            debug!(error = %close_err, "shutdown after stderr failure");
        }
        break;
    }
    debug!("stderr reader task completed");
}
