//! Connection lifecycle and registration.
//!
//! ```text
//! Disconnected ──▶ Connecting ──▶ Registering ──▶ Ready
//!       ▲                                           │
//!       └────────────── socket error / shutdown ────┘
//! ```
//!
//! A [`Session`] owns the directory and runs one connection at a time. Inbound
//! lines are read and dispatched strictly one after another; outbound lines
//! go through a separate writer task so the flood limiter never stalls the
//! read loop. Reconnecting is the caller's policy: call [`Session::run`] again
//! and the stale directory is cleared on the way into `Connecting`.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::commands::wrap_lines;
use crate::directory::Directory;
use crate::irc::{MAX_LINE_LENGTH, Message};
use crate::isupport::ISupport;
use crate::nick::{DEFAULT_MAX_ATTEMPTS, NickNegotiator};
use crate::outbound::Outbound;
use crate::registry::{Context, HandlerError, Registry, RegistryError, SendError, Sender};
use crate::throttle::FloodConfig;

// ── Configuration ──────────────────────────────────────────────────

/// Who the client registers as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub preferred: String,
    /// Tried when the preferred nickname is taken; may be empty.
    pub alternate: String,
    pub ident: String,
    pub realname: String,
}

impl Identity {
    pub fn new(preferred: &str, alternate: &str, ident: &str, realname: &str) -> Self {
        Self {
            preferred: preferred.to_string(),
            alternate: alternate.to_string(),
            ident: ident.to_string(),
            realname: realname.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must not be empty")]
    Empty(&'static str),
    #[error("invalid {field}: {value:?}")]
    Invalid { field: &'static str, value: String },
    #[error("ping timeout must be longer than the ping interval")]
    PingTiming,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// `host:port`.
    pub server_addr: String,
    pub identity: Identity,
    /// Sent as `PASS` before registration when set.
    pub password: Option<String>,
    /// Joined every time the session becomes ready.
    pub channels: Vec<String>,
    /// Idle time before the client pings the server.
    pub ping_interval: Duration,
    /// Idle time before the connection is given up.
    pub ping_timeout: Duration,
    pub max_nick_attempts: u32,
    pub flood: FloodConfig,
    /// How long queued lines may take to drain on shutdown.
    pub flush_timeout: Duration,
}

impl SessionConfig {
    pub fn new(server_addr: &str, identity: Identity) -> Self {
        Self {
            server_addr: server_addr.to_string(),
            identity,
            password: None,
            channels: Vec::new(),
            ping_interval: Duration::from_secs(60),
            ping_timeout: Duration::from_secs(120),
            max_nick_attempts: DEFAULT_MAX_ATTEMPTS,
            flood: FloodConfig::default(),
            flush_timeout: Duration::from_secs(5),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field, value: &str| ConfigError::Invalid {
            field,
            value: value.to_string(),
        };

        if self.server_addr.is_empty() {
            return Err(ConfigError::Empty("server address"));
        }
        let port_ok = self
            .server_addr
            .rsplit_once(':')
            .is_some_and(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok());
        if !port_ok {
            return Err(invalid("server address", &self.server_addr));
        }

        let id = &self.identity;
        check_token("nickname", &id.preferred)?;
        if !id.alternate.is_empty() {
            check_token("alternate nickname", &id.alternate)?;
        }
        check_token("ident", &id.ident)?;
        if id.realname.trim().is_empty() {
            return Err(ConfigError::Empty("realname"));
        }
        if id.realname.contains(['\r', '\n', '\0']) {
            return Err(invalid("realname", &id.realname));
        }
        if let Some(password) = &self.password {
            check_token("password", password)?;
        }

        for channel in &self.channels {
            let named = channel.starts_with(['#', '&']) && channel.len() > 1;
            if !named || channel.contains([' ', ',', '\x07', '\r', '\n', '\0']) {
                return Err(invalid("channel", channel));
            }
        }

        if self.ping_interval.is_zero() || self.ping_timeout <= self.ping_interval {
            return Err(ConfigError::PingTiming);
        }
        if self.max_nick_attempts == 0 {
            return Err(invalid("nick attempt limit", "0"));
        }
        Ok(())
    }
}

/// Single-token fields travel as middle parameters.
fn check_token(field: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.is_empty() {
        return Err(ConfigError::Empty(field));
    }
    if value.starts_with(':') || value.contains(|c: char| c.is_whitespace() || c == '\0') {
        return Err(ConfigError::Invalid {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

// ── State ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Disconnected,
    Connecting,
    Registering,
    Ready,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Status::Disconnected => "disconnected",
            Status::Connecting => "connecting",
            Status::Registering => "registering",
            Status::Ready => "ready",
        })
    }
}

/// Registration state handlers may read and advance.
#[derive(Debug)]
pub struct SessionState {
    identity: Identity,
    nick: String,
    status: watch::Sender<Status>,
    negotiator: NickNegotiator,
    autojoin: Vec<String>,
}

impl SessionState {
    pub fn new(identity: Identity) -> Self {
        let (status, _) = watch::channel(Status::Disconnected);
        Self {
            nick: identity.preferred.clone(),
            identity,
            status,
            negotiator: NickNegotiator::default(),
            autojoin: Vec::new(),
        }
    }

    fn from_config(config: &SessionConfig) -> Self {
        let mut state = Self::new(config.identity.clone());
        state.negotiator = NickNegotiator::new(config.max_nick_attempts);
        state.autojoin = config.channels.clone();
        state
    }

    pub fn status(&self) -> Status {
        *self.status.borrow()
    }

    /// Nickname last requested, or confirmed by the server once ready.
    pub fn nick(&self) -> &str {
        &self.nick
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn set_nick(&mut self, nick: &str) {
        self.nick = nick.to_string();
    }

    /// Move to `next`, logging the change. Same-state moves are ignored.
    pub fn transition(&mut self, next: Status) {
        let from = self.status();
        if from == next {
            return;
        }
        info!(from = %from, to = %next, nick = %self.nick, "Session state changed");
        self.status.send_replace(next);
    }

    pub fn subscribe(&self) -> watch::Receiver<Status> {
        self.status.subscribe()
    }

    pub fn negotiator_mut(&mut self) -> &mut NickNegotiator {
        &mut self.negotiator
    }

    /// Channels to join when registration completes.
    pub fn autojoin(&self) -> &[String] {
        &self.autojoin
    }
}

// ── Errors ─────────────────────────────────────────────────────────

/// Failures that end the current connection.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("could not connect to {addr}: {source}")]
    Connect {
        addr: String,
        source: std::io::Error,
    },
    #[error("registration failed after {attempts} nickname attempts")]
    RegistrationFailed { attempts: u32 },
    #[error("connection error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no traffic from server for {0:?}")]
    PingTimeout(Duration),
    #[error("server closed the connection")]
    Closed,
}

// ── Session ────────────────────────────────────────────────────────

pub struct Session {
    config: SessionConfig,
    registry: Arc<Registry>,
    directory: Directory,
    isupport: ISupport,
    state: SessionState,
    cmd_tx: mpsc::UnboundedSender<Message>,
    cmd_rx: mpsc::UnboundedReceiver<Message>,
    shutdown: Arc<watch::Sender<Option<String>>>,
    /// Commands queued before registration completed.
    pending: Vec<Message>,
}

impl Session {
    /// Validate `config` and build a disconnected session.
    pub fn new(config: SessionConfig, registry: Arc<Registry>) -> Result<Self, ConfigError> {
        config.validate()?;
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(None);
        Ok(Self {
            state: SessionState::from_config(&config),
            config,
            registry,
            directory: Directory::new(),
            isupport: ISupport::default(),
            cmd_tx,
            cmd_rx,
            shutdown: Arc::new(shutdown),
            pending: Vec::new(),
        })
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            cmd_tx: self.cmd_tx.clone(),
            registry: Arc::clone(&self.registry),
            status: self.state.subscribe(),
            shutdown: Arc::clone(&self.shutdown),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    pub fn isupport(&self) -> &ISupport {
        &self.isupport
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn status(&self) -> Status {
        self.state.status()
    }

    /// Connect over TCP and run until the connection ends.
    ///
    /// Returns `Ok(())` only after a requested shutdown.
    pub async fn run(&mut self) -> Result<(), SessionError> {
        self.connecting();
        let addr = self.config.server_addr.clone();
        info!(addr = %addr, "Connecting");
        let stream = match TcpStream::connect(&addr).await {
            Ok(stream) => stream,
            Err(source) => {
                self.disconnected();
                return Err(SessionError::Connect { addr, source });
            }
        };
        self.drive(stream).await
    }

    /// Run over an already established stream.
    pub async fn run_with_stream<S>(&mut self, stream: S) -> Result<(), SessionError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        self.connecting();
        self.drive(stream).await
    }

    async fn drive<S>(&mut self, stream: S) -> Result<(), SessionError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let mut reader = BufReader::new(reader);
        let outbound = Outbound::spawn(writer, self.config.flood);

        let registration = self.begin_registration();
        self.forward(&outbound, registration);

        let result = self.read_loop(&mut reader, &outbound).await;
        let flush = match &result {
            Ok(reason) => {
                while let Ok(msg) = self.cmd_rx.try_recv() {
                    if let Some(msg) = self.submit(msg) {
                        self.forward(&outbound, vec![msg]);
                    }
                }
                self.forward(&outbound, vec![Message::new("QUIT", vec![reason.as_str()])]);
                self.config.flush_timeout
            }
            Err(_) => Duration::ZERO,
        };
        if let Err(e) = outbound.close(flush).await {
            debug!(error = %e, "Writer closed with error");
        }
        self.disconnected();

        match result {
            Ok(reason) => {
                info!(reason = %reason, "Session shut down");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Connection lost");
                Err(e)
            }
        }
    }

    /// Enter `Connecting`, wiping anything left over from the last connection.
    fn connecting(&mut self) {
        if self.directory.clear_if_stale() {
            debug!("Cleared stale directory");
        }
        self.isupport = ISupport::default();
        self.state.negotiator.reset();
        self.state.nick.clone_from(&self.state.identity.preferred);
        self.state.transition(Status::Connecting);
    }

    fn disconnected(&mut self) {
        self.directory.invalidate();
        self.state.transition(Status::Disconnected);
    }

    /// Enter `Registering` and produce the registration burst.
    ///
    /// Called once the socket is up; nothing waits for a reply.
    pub fn begin_registration(&mut self) -> Vec<Message> {
        if self.status() == Status::Disconnected {
            self.connecting();
        }
        let id = &self.config.identity;
        let mut out = Vec::with_capacity(3);
        if let Some(password) = &self.config.password {
            out.push(Message::new("PASS", vec![password.as_str()]));
        }
        out.push(Message::new("NICK", vec![id.preferred.as_str()]));
        out.push(Message::new("USER", vec![id.ident.as_str(), "0", "*", &id.realname]));
        self.state.transition(Status::Registering);
        out
    }

    /// Decode and dispatch one inbound line, returning what it wants sent.
    ///
    /// Malformed lines are logged and dropped. Commands queued before
    /// registration are released the moment the session becomes ready.
    pub fn handle_line(&mut self, line: &str) -> Result<Vec<Message>, SessionError> {
        let msg = match Message::parse(line) {
            Ok(msg) => msg,
            Err(e) => {
                debug!(raw = %line.trim_end(), error = %e, "Dropping malformed line");
                return Ok(Vec::new());
            }
        };
        debug!(raw = %msg, "<-");

        let before = self.status();
        let registry = Arc::clone(&self.registry);
        let mut ctx = Context::new(&mut self.directory, &mut self.isupport, &mut self.state, &registry);
        match registry.dispatch(&mut ctx, &msg) {
            Ok(()) => {}
            Err(HandlerError::RegistrationFailed { attempts }) => {
                return Err(SessionError::RegistrationFailed { attempts });
            }
            Err(e) => warn!(verb = %msg.verb, error = %e, "Unexpected fatal handler error"),
        }
        let mut out = ctx.take_outbound();

        if before != Status::Ready && self.status() == Status::Ready && !self.pending.is_empty() {
            debug!(count = self.pending.len(), "Flushing commands queued during registration");
            out.append(&mut self.pending);
        }
        Ok(out)
    }

    /// Queue a command from a handle: sent now when ready, held otherwise.
    fn submit(&mut self, msg: Message) -> Option<Message> {
        if self.status() == Status::Ready {
            Some(msg)
        } else {
            self.pending.push(msg);
            None
        }
    }

    fn forward(&self, outbound: &Outbound, messages: Vec<Message>) {
        for msg in messages {
            if let Err(e) = outbound.push(&msg) {
                warn!(verb = %msg.verb, error = %e, "Dropping outbound message");
            }
        }
    }

    /// Returns the shutdown reason on a requested stop.
    async fn read_loop<R>(&mut self, reader: &mut R, outbound: &Outbound) -> Result<String, SessionError>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut shutdown = self.shutdown.subscribe();
        let mut buf = Vec::with_capacity(MAX_LINE_LENGTH);
        let mut discarding = false;
        let mut last_activity = Instant::now();
        let mut awaiting_pong = false;

        loop {
            let requested = shutdown.borrow_and_update().clone();
            if let Some(reason) = requested {
                return Ok(reason);
            }
            let deadline = if awaiting_pong {
                last_activity + self.config.ping_timeout
            } else {
                last_activity + self.config.ping_interval
            };

            // Handle commands first so anything queued before a line arrives
            // is ordered ahead of that line's effects.
            tokio::select! {
                biased;
                Some(msg) = self.cmd_rx.recv() => {
                    if let Some(msg) = self.submit(msg) {
                        self.forward(outbound, vec![msg]);
                    }
                }
                result = read_bounded(reader, &mut buf) => {
                    if result? == 0 {
                        return Err(SessionError::Closed);
                    }
                    last_activity = Instant::now();
                    awaiting_pong = false;
                    let complete = buf.ends_with(b"\n");
                    if !complete && buf.len() >= MAX_BUFFERED {
                        if !discarding {
                            warn!(limit = MAX_BUFFERED, "Inbound line too long, discarding until newline");
                        }
                        discarding = true;
                        buf.clear();
                        continue;
                    }
                    if discarding {
                        // Tail of the overlong line.
                        discarding = !complete;
                        buf.clear();
                        continue;
                    }
                    let line = String::from_utf8_lossy(&buf).into_owned();
                    buf.clear();
                    let out = self.handle_line(&line)?;
                    self.forward(outbound, out);
                }
                Ok(()) = shutdown.changed() => {}
                _ = tokio::time::sleep_until(deadline) => {
                    if awaiting_pong {
                        return Err(SessionError::PingTimeout(self.config.ping_timeout));
                    }
                    let token = chrono::Utc::now().timestamp().to_string();
                    debug!(token = %token, "Idle, pinging server");
                    self.forward(outbound, vec![Message::new("PING", vec![token.as_str()])]);
                    awaiting_pong = true;
                }
            }
        }
    }
}

/// Most bytes held for one inbound line before it is thrown away.
const MAX_BUFFERED: usize = MAX_LINE_LENGTH * 4;

/// `read_until` capped so `buf` never grows past [`MAX_BUFFERED`]. Partial
/// data stays in `buf` if the future is dropped, so the cap is recomputed on
/// every call.
async fn read_bounded<R>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let room = MAX_BUFFERED.saturating_sub(buf.len()).max(1) as u64;
    reader.take(room).read_until(b'\n', buf).await
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("server", &self.config.server_addr)
            .field("status", &self.status())
            .field("nick", &self.state.nick())
            .finish()
    }
}

// ── Handle ─────────────────────────────────────────────────────────

/// Cloneable way to talk to a running [`Session`] from other tasks.
#[derive(Clone)]
pub struct SessionHandle {
    cmd_tx: mpsc::UnboundedSender<Message>,
    registry: Arc<Registry>,
    status: watch::Receiver<Status>,
    shutdown: Arc<watch::Sender<Option<String>>>,
}

impl SessionHandle {
    /// Queue `msg`. It is validated here, so encode errors never reach the
    /// session; commands sent before registration completes wait for it.
    pub fn send(&self, msg: Message) -> Result<(), SendError> {
        msg.encode()?;
        if self.is_shutdown() {
            return Err(SendError::Closed);
        }
        self.cmd_tx.send(msg).map_err(|_| SendError::Closed)
    }

    /// A schema-checked builder for `verb`.
    pub fn sender(&self, verb: &str) -> Result<Sender, RegistryError> {
        self.registry.sender(verb)
    }

    /// Send text to a channel or nick, wrapping long text over several lines.
    pub fn privmsg(&self, target: &str, text: &str) -> Result<(), SendError> {
        for line in wrap_lines(text, crate::commands::MAX_REPLY_LEN) {
            self.send(Message::new("PRIVMSG", vec![target, &line]))?;
        }
        Ok(())
    }

    pub fn join(&self, channel: &str, key: Option<&str>) -> Result<(), SendError> {
        let mut params = vec![channel];
        params.extend(key);
        self.send(Message::new("JOIN", params))
    }

    /// Ask the session to quit with `reason` and stop.
    pub fn shutdown(&self, reason: &str) {
        self.shutdown.send_replace(Some(reason.to_string()));
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.borrow().is_some()
    }

    /// Resolves once [`shutdown`](Self::shutdown) has been called.
    pub async fn shutdown_requested(&self) {
        let mut rx = self.shutdown.subscribe();
        let _ = rx.wait_for(Option::is_some).await;
    }

    pub fn status(&self) -> Status {
        *self.status.borrow()
    }

    /// Wait until the session reaches `status`. Returns `false` if the
    /// session was dropped first.
    pub async fn wait_for(&self, status: Status) -> bool {
        let mut rx = self.status.clone();
        rx.wait_for(|s| *s == status).await.is_ok()
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("status", &self.status())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}
