//! Command handler registry and dispatch.
//!
//! The registry maps a verb (`JOIN`, `433`, ...) to exactly one [`Handler`].
//! Inbound messages are routed by verb; verbs nobody registered are dropped.
//! Handler failures are logged and contained so one bad handler never stops
//! the read loop.
//!
//! Each handler also declares the parameter schema of its verb, which backs
//! the [`Sender`] builder returned by [`Registry::sender`].

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::directory::{Directory, DirectoryError};
use crate::irc::{CodecError, Message};
use crate::isupport::ISupport;
use crate::session::SessionState;

/// Everything a handler may touch while processing one inbound message.
pub struct Context<'a> {
    pub directory: &'a mut Directory,
    pub isupport: &'a mut ISupport,
    pub state: &'a mut SessionState,
    pub(crate) registry: &'a Registry,
    outbound: Vec<Message>,
}

impl<'a> Context<'a> {
    pub fn new(
        directory: &'a mut Directory,
        isupport: &'a mut ISupport,
        state: &'a mut SessionState,
        registry: &'a Registry,
    ) -> Self {
        Self {
            directory,
            isupport,
            state,
            registry,
            outbound: Vec::new(),
        }
    }

    /// Queue an outbound message. Messages leave in the order queued.
    pub fn send(&mut self, msg: Message) {
        self.outbound.push(msg);
    }

    /// A fresh builder for `verb`.
    pub fn sender(&self, verb: &str) -> Result<Sender, RegistryError> {
        self.registry.sender(verb)
    }

    /// Whether `nick` is the client's current nickname.
    pub fn is_me(&self, nick: &str) -> bool {
        crate::casemap::eq(nick, self.state.nick())
    }

    /// Drain the queued outbound messages.
    pub fn take_outbound(&mut self) -> Vec<Message> {
        std::mem::take(&mut self.outbound)
    }
}

/// Reacts to inbound messages of one or more verbs.
pub trait Handler: Send + Sync {
    fn receive(&self, ctx: &mut Context<'_>, msg: &Message) -> Result<(), HandlerError>;

    /// Outbound parameter schema. Empty for receive-only verbs.
    fn params(&self) -> &'static [Param] {
        &[]
    }
}

/// One positional parameter of an outbound verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Param {
    pub name: &'static str,
    pub required: bool,
}

impl Param {
    pub const fn required(name: &'static str) -> Self {
        Self { name, required: true }
    }

    pub const fn optional(name: &'static str) -> Self {
        Self { name, required: false }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("a handler is already registered for {0}")]
    DuplicateHandler(String),
    #[error("no handler registered for {0}")]
    UnknownVerb(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("{verb}: missing required argument `{name}`")]
    MissingArgument { verb: String, name: &'static str },
    #[error("{verb}: unknown argument `{name}`")]
    UnknownArgument { verb: String, name: String },
    #[error("{verb}: `{name}` given but an earlier optional argument is missing")]
    ArgumentGap { verb: String, name: &'static str },
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("session is closed")]
    Closed,
}

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("{verb}: expected at least {expected} parameters")]
    NeedMoreParams { verb: String, expected: usize },
    #[error("{0} without a user source")]
    MissingSource(String),
    #[error(transparent)]
    Directory(#[from] DirectoryError),
    #[error(transparent)]
    Send(#[from] SendError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("registration failed after {attempts} nickname attempts")]
    RegistrationFailed { attempts: u32 },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl HandlerError {
    /// Fatal errors end the connection; everything else is logged and dropped.
    pub fn is_fatal(&self) -> bool {
        matches!(self, HandlerError::RegistrationFailed { .. })
    }
}

/// Fail with [`HandlerError::NeedMoreParams`] unless `msg` has `n` params.
pub fn require_params(msg: &Message, n: usize) -> Result<(), HandlerError> {
    if msg.params.len() < n {
        return Err(HandlerError::NeedMoreParams {
            verb: msg.verb.clone(),
            expected: n,
        });
    }
    Ok(())
}

/// Builder for one outbound message, validated against its verb's schema.
#[derive(Debug, Clone)]
pub struct Sender {
    verb: String,
    schema: &'static [Param],
    values: Vec<Option<String>>,
    error: Option<SendError>,
}

impl Sender {
    fn new(verb: &str, schema: &'static [Param]) -> Self {
        Self {
            verb: verb.to_string(),
            schema,
            values: vec![None; schema.len()],
            error: None,
        }
    }

    /// Set a named argument. Unknown names fail at [`Sender::build`].
    pub fn arg(mut self, name: &str, value: impl Into<String>) -> Self {
        match self.schema.iter().position(|p| p.name == name) {
            Some(index) => self.values[index] = Some(value.into()),
            None => {
                if self.error.is_none() {
                    self.error = Some(SendError::UnknownArgument {
                        verb: self.verb.clone(),
                        name: name.to_string(),
                    });
                }
            }
        }
        self
    }

    /// Set an argument only when a value is present.
    pub fn opt_arg(self, name: &str, value: Option<impl Into<String>>) -> Self {
        match value {
            Some(v) => self.arg(name, v),
            None => self,
        }
    }

    /// Validate and produce the message.
    pub fn build(self) -> Result<Message, SendError> {
        if let Some(error) = self.error {
            return Err(error);
        }
        let mut params = Vec::with_capacity(self.values.len());
        let mut gap = false;
        for (param, value) in self.schema.iter().zip(self.values) {
            match value {
                Some(_) if gap => {
                    return Err(SendError::ArgumentGap {
                        verb: self.verb,
                        name: param.name,
                    });
                }
                Some(v) => params.push(v),
                None if param.required => {
                    return Err(SendError::MissingArgument {
                        verb: self.verb,
                        name: param.name,
                    });
                }
                None => gap = true,
            }
        }
        let msg = Message {
            source: None,
            verb: self.verb,
            params,
        };
        msg.encode()?;
        Ok(msg)
    }
}

/// Registry of handlers by verb.
#[derive(Default)]
pub struct Registry {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `handler` to `verb`. A single handler instance may be bound to
    /// several verbs; a verb takes only one handler.
    pub fn register(&mut self, verb: &str, handler: Arc<dyn Handler>) -> Result<(), RegistryError> {
        let key = verb.to_ascii_uppercase();
        if self.handlers.contains_key(&key) {
            return Err(RegistryError::DuplicateHandler(key));
        }
        self.handlers.insert(key, handler);
        Ok(())
    }

    pub fn contains(&self, verb: &str) -> bool {
        self.handlers.contains_key(&verb.to_ascii_uppercase())
    }

    pub fn verbs(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    /// A fresh builder for an outbound `verb`.
    pub fn sender(&self, verb: &str) -> Result<Sender, RegistryError> {
        let key = verb.to_ascii_uppercase();
        let handler = self
            .handlers
            .get(&key)
            .ok_or_else(|| RegistryError::UnknownVerb(key.clone()))?;
        Ok(Sender::new(&key, handler.params()))
    }

    /// Route `msg` to its handler.
    ///
    /// Returns an error only when the handler reports a fatal condition;
    /// ordinary failures and panics are logged here and swallowed.
    pub fn dispatch(&self, ctx: &mut Context<'_>, msg: &Message) -> Result<(), HandlerError> {
        let key = msg.verb.to_ascii_uppercase();
        let Some(handler) = self.handlers.get(&key) else {
            return Ok(());
        };

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler.receive(ctx, msg)));
        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) if e.is_fatal() => Err(e),
            Ok(Err(HandlerError::Directory(e))) => {
                debug!(verb = %key, raw = %msg, error = %e, "Directory out of sync, ignoring");
                Ok(())
            }
            Ok(Err(e)) => {
                warn!(verb = %key, raw = %msg, error = %e, "Handler failed");
                Ok(())
            }
            Err(panic) => {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                warn!(verb = %key, raw = %msg, reason, "Handler panicked");
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut verbs: Vec<_> = self.handlers.keys().collect();
        verbs.sort();
        f.debug_struct("Registry").field("verbs", &verbs).finish()
    }
}
