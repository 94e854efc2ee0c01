//! Built-in protocol handlers.
//!
//! [`install`] binds every verb the client understands. Handlers only touch
//! the [`Context`] they are given, so a registry can be built and tested
//! without a connection.

mod channel;
mod message;
mod query;
mod registration;

use std::sync::Arc;

use crate::commands::Commands;
use crate::irc::{Message, Source};
use crate::registry::{Context, Handler, HandlerError, Param, Registry, RegistryError};

pub use channel::{
    InviteHandler, JoinHandler, KickHandler, ModeHandler, NamesHandler, NickHandler, PartHandler,
    QuitHandler, TopicHandler,
};
pub use message::{NoticeHandler, PrivmsgHandler, VERSION_REPLY};
pub use query::{WhoReplyHandler, WhoisReplyHandler};
pub use registration::{ErrorHandler, NickRejectedHandler, PingHandler, SupportHandler, WelcomeHandler};

/// Outbound schemas, one per verb the client may send.
pub mod schema {
    use super::Param;

    pub const PRIVMSG: &[Param] = &[Param::required("target"), Param::required("text")];
    pub const NOTICE: &[Param] = PRIVMSG;
    pub const JOIN: &[Param] = &[Param::required("channel"), Param::optional("key")];
    pub const PART: &[Param] = &[Param::required("channel"), Param::optional("reason")];
    pub const KICK: &[Param] = &[
        Param::required("channel"),
        Param::required("nick"),
        Param::optional("reason"),
    ];
    pub const NICK: &[Param] = &[Param::required("nick")];
    pub const TOPIC: &[Param] = &[Param::required("channel"), Param::optional("topic")];
    pub const MODE: &[Param] = &[
        Param::required("target"),
        Param::optional("modes"),
        Param::optional("argument"),
    ];
    pub const INVITE: &[Param] = &[Param::required("nick"), Param::required("channel")];
    pub const QUIT: &[Param] = &[Param::optional("reason")];
    pub const PING: &[Param] = &[Param::required("token")];
    pub const PONG: &[Param] = &[Param::required("token")];
    pub const USER: &[Param] = &[
        Param::required("ident"),
        Param::required("mode"),
        Param::required("unused"),
        Param::required("realname"),
    ];
    pub const WHO: &[Param] = &[Param::required("mask")];
    pub const WHOIS: &[Param] = &[Param::required("nick")];
}

/// A verb the client sends but never needs to react to.
pub struct Outgoing(pub &'static [Param]);

impl Handler for Outgoing {
    fn receive(&self, _: &mut Context<'_>, _: &Message) -> Result<(), HandlerError> {
        Ok(())
    }

    fn params(&self) -> &'static [Param] {
        self.0
    }
}

/// Register every built-in handler. `commands` serves addressed PRIVMSGs.
pub fn install(registry: &mut Registry, commands: Arc<Commands>) -> Result<(), RegistryError> {
    let welcome: Arc<dyn Handler> = Arc::new(WelcomeHandler);
    let rejected: Arc<dyn Handler> = Arc::new(NickRejectedHandler);
    let topic: Arc<dyn Handler> = Arc::new(TopicHandler);

    // Registration
    registry.register("001", Arc::clone(&welcome))?;
    registry.register("376", Arc::clone(&welcome))?;
    registry.register("422", welcome)?;
    registry.register("005", Arc::new(SupportHandler))?;
    registry.register("431", Arc::clone(&rejected))?;
    registry.register("432", Arc::clone(&rejected))?;
    registry.register("433", rejected)?;
    registry.register("PING", Arc::new(PingHandler))?;
    registry.register("ERROR", Arc::new(ErrorHandler))?;

    // Channel state
    registry.register("JOIN", Arc::new(JoinHandler))?;
    registry.register("PART", Arc::new(PartHandler))?;
    registry.register("KICK", Arc::new(KickHandler))?;
    registry.register("QUIT", Arc::new(QuitHandler))?;
    registry.register("NICK", Arc::new(NickHandler))?;
    registry.register("TOPIC", Arc::clone(&topic))?;
    registry.register("331", Arc::clone(&topic))?;
    registry.register("332", topic)?;
    registry.register("353", Arc::new(NamesHandler))?;
    registry.register("MODE", Arc::new(ModeHandler))?;
    registry.register("INVITE", Arc::new(InviteHandler))?;

    // Queries
    registry.register("352", Arc::new(WhoReplyHandler))?;
    registry.register("311", Arc::new(WhoisReplyHandler))?;

    // Messages
    registry.register("PRIVMSG", Arc::new(PrivmsgHandler::new(commands)))?;
    registry.register("NOTICE", Arc::new(NoticeHandler))?;

    // Send-only
    registry.register("USER", Arc::new(Outgoing(schema::USER)))?;
    registry.register("PONG", Arc::new(Outgoing(schema::PONG)))?;
    registry.register("WHO", Arc::new(Outgoing(schema::WHO)))?;
    registry.register("WHOIS", Arc::new(Outgoing(schema::WHOIS)))?;
    Ok(())
}

/// A registry with every built-in handler and the given command set.
pub fn registry(commands: Arc<Commands>) -> Result<Registry, RegistryError> {
    let mut registry = Registry::new();
    install(&mut registry, commands)?;
    Ok(registry)
}

// ── Shared helpers ─────────────────────────────────────────────────

fn user_source<'m>(msg: &'m Message) -> Result<&'m Source, HandlerError> {
    msg.source
        .as_ref()
        .filter(|s| !s.is_server())
        .ok_or_else(|| HandlerError::MissingSource(msg.verb.clone()))
}

fn source_nick(msg: &Message) -> Result<&str, HandlerError> {
    msg.nick()
        .ok_or_else(|| HandlerError::MissingSource(msg.verb.clone()))
}
