//! Text delivery: CTCP auto-replies and the interactive command layer.

use std::sync::Arc;

use anyhow::Context as _;
use tracing::{debug, info};

use super::{schema, user_source};
use crate::commands::{Commands, Location, Request};
use crate::ctcp::{self, Ctcp};
use crate::irc::Message;
use crate::registry::{Context, Handler, HandlerError, Param, require_params};

/// Answer to CTCP VERSION.
pub const VERSION_REPLY: &str = concat!("parley ", env!("CARGO_PKG_VERSION"));

/// `PRIVMSG <target> :<text>`.
pub struct PrivmsgHandler {
    commands: Arc<Commands>,
}

impl PrivmsgHandler {
    pub fn new(commands: Arc<Commands>) -> Self {
        Self { commands }
    }
}

impl Handler for PrivmsgHandler {
    fn receive(&self, ctx: &mut Context<'_>, msg: &Message) -> Result<(), HandlerError> {
        require_params(msg, 2)?;
        let source = user_source(msg)?;
        let nick = source.nick().unwrap_or_default();
        if ctx.is_me(nick) {
            return Ok(());
        }
        let (target, text) = (&msg.params[0], &msg.params[1]);

        if let Some(query) = Ctcp::parse(text) {
            if let Some(reply) = ctcp_reply(&query) {
                debug!(from = nick, verb = %query.verb, "Answering CTCP");
                let notice = ctx.sender("NOTICE")?.arg("target", nick).arg("text", reply).build()?;
                ctx.send(notice);
            }
            return Ok(());
        }

        let location = if ctx.isupport.is_channel(target) {
            Location::Channel(target.clone())
        } else {
            Location::Private
        };
        let own_nick = ctx.state.nick().to_string();
        let Some((keyword, args)) = self.commands.parse(text, &location, &own_nick) else {
            return Ok(());
        };

        let Some(user_id) = ctx.directory.request_user(source) else {
            return Ok(());
        };
        let outcome = match ctx.directory.user(user_id) {
            Some(user) => {
                let request = Request {
                    location: &location,
                    user_id,
                    user,
                    role: self.commands.role_of(user, &location, &*ctx.directory),
                    keyword: &keyword,
                    args,
                    directory: &*ctx.directory,
                    own_nick: &own_nick,
                    commands: &self.commands,
                };
                info!(
                    from = nick,
                    command = %keyword,
                    role = %request.role,
                    channel = location.channel().unwrap_or("-"),
                    "Command"
                );
                self.commands.execute(&request)
            }
            None => Ok(Vec::new()),
        };
        // Private senders are looked up only for the duration of the command.
        ctx.directory.release(user_id);

        let replies = outcome.with_context(|| format!("command {keyword} from {nick}"))?;
        for reply in replies {
            ctx.send(reply);
        }
        Ok(())
    }

    fn params(&self) -> &'static [Param] {
        schema::PRIVMSG
    }
}

fn ctcp_reply(query: &Ctcp<'_>) -> Option<String> {
    let args = match query.verb.as_str() {
        "VERSION" => Some(VERSION_REPLY.to_string()),
        "PING" => query.args.map(str::to_string),
        "TIME" => Some(chrono::Local::now().to_rfc2822()),
        "CLIENTINFO" => Some(ctcp::SUPPORTED.join(" ")),
        _ => return None,
    };
    Some(ctcp::frame(&query.verb, args.as_deref()))
}

/// `NOTICE <target> :<text>`. Never answered, so two clients can't loop.
pub struct NoticeHandler;

impl Handler for NoticeHandler {
    fn receive(&self, _: &mut Context<'_>, msg: &Message) -> Result<(), HandlerError> {
        require_params(msg, 2)?;
        let from = msg.nick().unwrap_or("server");
        match Ctcp::parse(&msg.params[1]) {
            Some(reply) => debug!(from, verb = %reply.verb, args = reply.args.unwrap_or(""), "CTCP reply"),
            None => debug!(from, target = %msg.params[0], text = %msg.params[1], "Notice"),
        }
        Ok(())
    }

    fn params(&self) -> &'static [Param] {
        schema::NOTICE
    }
}
