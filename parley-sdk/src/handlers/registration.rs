//! Registration, keepalive and server status.

use tracing::{debug, info, warn};

use super::schema;
use crate::irc::Message;
use crate::nick::Rejection;
use crate::registry::{Context, Handler, HandlerError, Param, require_params};
use crate::session::Status;

/// `001 RPL_WELCOME`, `376 RPL_ENDOFMOTD` and `422 ERR_NOMOTD`.
///
/// Any of them completes registration; servers that skip the MOTD still send
/// the welcome, and some clients only ever see the MOTD end.
pub struct WelcomeHandler;

impl Handler for WelcomeHandler {
    fn receive(&self, ctx: &mut Context<'_>, msg: &Message) -> Result<(), HandlerError> {
        if msg.verb == "001"
            && let Some(nick) = msg.param(0)
            && !nick.is_empty()
            && nick != "*"
        {
            ctx.state.set_nick(nick);
            ctx.directory.set_own(nick);
        }

        if ctx.state.status() != Status::Registering {
            return Ok(());
        }
        if ctx.directory.own().is_none() {
            let nick = ctx.state.nick().to_string();
            ctx.directory.set_own(&nick);
        }
        ctx.state.transition(Status::Ready);

        let channels = ctx.state.autojoin().to_vec();
        for channel in channels {
            let join = ctx.sender("JOIN")?.arg("channel", channel).build()?;
            ctx.send(join);
        }
        Ok(())
    }
}

/// `005 RPL_ISUPPORT`: `<nick> <token>... :are supported by this server`.
pub struct SupportHandler;

impl Handler for SupportHandler {
    fn receive(&self, ctx: &mut Context<'_>, msg: &Message) -> Result<(), HandlerError> {
        require_params(msg, 2)?;
        let tokens = &msg.params[1..msg.params.len() - 1];
        ctx.isupport.apply(tokens.iter().map(String::as_str));
        debug!(
            nicklen = ctx.isupport.nicklen,
            chantypes = %ctx.isupport.chantypes,
            "Server features updated"
        );
        Ok(())
    }
}

/// `431`/`432`/`433`: the requested nickname was refused.
pub struct NickRejectedHandler;

impl Handler for NickRejectedHandler {
    fn receive(&self, ctx: &mut Context<'_>, msg: &Message) -> Result<(), HandlerError> {
        let Some(rejection) = Rejection::from_numeric(&msg.verb) else {
            return Ok(());
        };
        // After registration this answers a NICK change somebody asked for.
        if ctx.state.status() != Status::Registering {
            info!(verb = %msg.verb, raw = %msg, "Nickname change refused");
            return Ok(());
        }

        let rejected = match rejection {
            Rejection::NoneGiven => String::new(),
            _ => msg
                .param(1)
                .map(str::to_string)
                .unwrap_or_else(|| ctx.state.nick().to_string()),
        };
        let identity = ctx.state.identity().clone();
        let nicklen = ctx.isupport.nicklen;
        let candidate = ctx
            .state
            .negotiator_mut()
            .next(rejection, &rejected, &identity, nicklen)
            .map_err(|attempts| HandlerError::RegistrationFailed { attempts })?;

        info!(?rejection, rejected = %rejected, next = %candidate, "Retrying registration nickname");
        ctx.state.set_nick(&candidate);
        let nick = ctx.sender("NICK")?.arg("nick", candidate).build()?;
        ctx.send(nick);
        Ok(())
    }
}

/// `PING <token>` is answered in every state, registration included.
pub struct PingHandler;

impl Handler for PingHandler {
    fn receive(&self, ctx: &mut Context<'_>, msg: &Message) -> Result<(), HandlerError> {
        require_params(msg, 1)?;
        let token = msg.params.last().cloned().unwrap_or_default();
        let pong = ctx.sender("PONG")?.arg("token", token).build()?;
        ctx.send(pong);
        Ok(())
    }

    fn params(&self) -> &'static [Param] {
        schema::PING
    }
}

/// `ERROR :<reason>` precedes the server closing the link.
pub struct ErrorHandler;

impl Handler for ErrorHandler {
    fn receive(&self, _: &mut Context<'_>, msg: &Message) -> Result<(), HandlerError> {
        let reason = msg.params.last().map(String::as_str).unwrap_or("");
        warn!(reason, "Server sent ERROR");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::Harness;
    use crate::isupport::ISupport;
    use crate::nick::SUFFIX_LEN;
    use crate::session::Status;

    #[test]
    fn welcome_confirms_nick_and_completes_registration() {
        let mut h = Harness::new();
        h.state.transition(Status::Registering);
        let out = h.feed(":irc.example.net 001 bot_ :Welcome to the network");
        assert!(out.is_empty());
        assert_eq!(h.state.status(), Status::Ready);
        assert_eq!(h.state.nick(), "bot_");
        assert!(h.directory.is_own("bot_"));
    }

    #[test]
    fn no_motd_is_also_a_completion_signal() {
        let mut h = Harness::new();
        h.state.transition(Status::Registering);
        h.feed(":irc.example.net 422 bot :MOTD File is missing");
        assert_eq!(h.state.status(), Status::Ready);

        // a later end-of-MOTD changes nothing
        assert!(h.feed(":irc.example.net 376 bot :End of MOTD").is_empty());
        assert_eq!(h.state.status(), Status::Ready);
    }

    #[test]
    fn in_use_then_alternate_in_use() {
        let mut h = Harness::new();
        h.state.transition(Status::Registering);

        let out = h.feed(":irc.example.net 433 * bot :Nickname is already in use");
        assert_eq!(out, vec!["NICK bot_"]);
        assert_eq!(h.state.nick(), "bot_");

        let out = h.feed(":irc.example.net 433 * bot_ :Nickname is already in use");
        assert_eq!(out.len(), 1);
        let candidate = out[0].strip_prefix("NICK ").unwrap();
        assert_ne!(candidate, "bot");
        assert_ne!(candidate, "bot_");
        assert!(candidate.len() <= ISupport::default().nicklen);
        assert_eq!(candidate.len(), "bot_".len() + SUFFIX_LEN);
    }

    #[test]
    fn erroneous_nick_honours_advertised_nicklen() {
        let mut h = Harness::new();
        h.state.transition(Status::Registering);
        h.feed(":irc.example.net 005 * NICKLEN=6 :are supported by this server");
        let out = h.feed(":irc.example.net 432 * bot :Erroneous nickname");
        let candidate = out[0].strip_prefix("NICK ").unwrap();
        assert!(candidate.len() <= 6, "{candidate}");
    }

    #[test]
    fn no_nick_given_falls_back_to_preferred() {
        let mut h = Harness::new();
        h.state.transition(Status::Registering);
        assert_eq!(h.feed(":irc.example.net 431 * :No nickname given"), vec!["NICK bot"]);
    }

    #[test]
    fn rejections_after_registration_are_ignored() {
        let mut h = Harness::ready();
        assert!(h.feed(":irc.example.net 433 bot other :Nickname is already in use").is_empty());
        assert_eq!(h.state.nick(), "bot");
    }

    #[test]
    fn ping_is_answered_while_registering() {
        let mut h = Harness::new();
        h.state.transition(Status::Registering);
        assert_eq!(h.feed("PING :irc.example.net"), vec!["PONG irc.example.net"]);
        assert_eq!(h.feed("PING :two words"), vec!["PONG :two words"]);
    }

    #[test]
    fn isupport_tokens_are_applied() {
        let mut h = Harness::new();
        h.feed(":irc.example.net 005 bot PREFIX=(ov)@+ CHANTYPES=# :are supported");
        assert_eq!(h.isupport.prefixes, vec![('o', '@'), ('v', '+')]);
        assert_eq!(h.isupport.chantypes, "#");
    }

    #[test]
    fn error_is_logged_only() {
        let mut h = Harness::ready();
        assert!(h.feed("ERROR :Closing Link: bot (Quit)").is_empty());
    }
}
