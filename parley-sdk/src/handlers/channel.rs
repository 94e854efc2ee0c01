//! Handlers that keep the directory in step with channel traffic.

use tracing::{debug, info};

use super::{schema, source_nick, user_source};
use crate::directory::DirectoryError;
use crate::irc::{Message, Source};
use crate::isupport::MemberModes;
use crate::registry::{Context, Handler, HandlerError, Param, require_params};

/// `JOIN <channel>`. Our own join creates the channel and asks who is in it.
pub struct JoinHandler;

impl Handler for JoinHandler {
    fn receive(&self, ctx: &mut Context<'_>, msg: &Message) -> Result<(), HandlerError> {
        require_params(msg, 1)?;
        let source = user_source(msg)?;
        let nick = source_nick(msg)?;
        let is_me = ctx.is_me(nick);
        if is_me && ctx.directory.own().is_none() {
            ctx.directory.set_own(nick);
        }
        let id = ctx
            .directory
            .request_user(source)
            .ok_or_else(|| HandlerError::MissingSource(msg.verb.clone()))?;

        for channel in msg.params[0].split(',').filter(|c| !c.is_empty()) {
            ctx.directory.request_channel(channel);
            ctx.directory.join(channel, id, MemberModes::NONE)?;
            if is_me {
                info!(channel, "Joined");
                let who = ctx.sender("WHO")?.arg("mask", channel).build()?;
                ctx.send(who);
            }
        }
        Ok(())
    }

    fn params(&self) -> &'static [Param] {
        schema::JOIN
    }
}

/// `PART <channel> [:reason]`.
pub struct PartHandler;

impl Handler for PartHandler {
    fn receive(&self, ctx: &mut Context<'_>, msg: &Message) -> Result<(), HandlerError> {
        require_params(msg, 1)?;
        let nick = source_nick(msg)?;
        for channel in msg.params[0].split(',').filter(|c| !c.is_empty()) {
            ctx.directory.part(channel, nick)?;
            if ctx.is_me(nick) {
                info!(channel, "Left");
            }
        }
        Ok(())
    }

    fn params(&self) -> &'static [Param] {
        schema::PART
    }
}

/// `KICK <channel> <nick> [:reason]`.
pub struct KickHandler;

impl Handler for KickHandler {
    fn receive(&self, ctx: &mut Context<'_>, msg: &Message) -> Result<(), HandlerError> {
        require_params(msg, 2)?;
        let (channel, target) = (&msg.params[0], &msg.params[1]);
        ctx.directory.kick(channel, target)?;
        if ctx.is_me(target) {
            info!(
                channel = %channel,
                by = msg.nick().unwrap_or("server"),
                reason = msg.param(2).unwrap_or(""),
                "Kicked"
            );
        }
        Ok(())
    }

    fn params(&self) -> &'static [Param] {
        schema::KICK
    }
}

/// `QUIT [:reason]` removes the user everywhere.
pub struct QuitHandler;

impl Handler for QuitHandler {
    fn receive(&self, ctx: &mut Context<'_>, msg: &Message) -> Result<(), HandlerError> {
        let nick = source_nick(msg)?;
        if ctx.is_me(nick) {
            return Ok(());
        }
        ctx.directory.remove_user(nick)?;
        Ok(())
    }

    fn params(&self) -> &'static [Param] {
        schema::QUIT
    }
}

/// `NICK <new>` renames in place. Our own rename also moves the session nick.
pub struct NickHandler;

impl Handler for NickHandler {
    fn receive(&self, ctx: &mut Context<'_>, msg: &Message) -> Result<(), HandlerError> {
        require_params(msg, 1)?;
        let old = source_nick(msg)?;
        let new = &msg.params[0];
        if ctx.is_me(old) {
            info!(from = old, to = %new, "Own nickname changed");
            ctx.state.set_nick(new);
        }
        ctx.directory.rename(old, new)?;
        Ok(())
    }

    fn params(&self) -> &'static [Param] {
        schema::NICK
    }
}

/// `TOPIC`, `332 RPL_TOPIC` and `331 RPL_NOTOPIC`.
pub struct TopicHandler;

impl Handler for TopicHandler {
    fn receive(&self, ctx: &mut Context<'_>, msg: &Message) -> Result<(), HandlerError> {
        let (channel, topic) = match msg.verb.as_str() {
            // <me> <channel> :<topic>
            "332" => {
                require_params(msg, 3)?;
                (&msg.params[1], Some(msg.params[2].clone()))
            }
            "331" => {
                require_params(msg, 2)?;
                (&msg.params[1], None)
            }
            _ => {
                require_params(msg, 1)?;
                (&msg.params[0], msg.params.get(1).cloned())
            }
        };
        ctx.directory.set_topic(channel, topic)?;
        Ok(())
    }

    fn params(&self) -> &'static [Param] {
        schema::TOPIC
    }
}

/// `353 RPL_NAMREPLY`: `<me> <symbol> <channel> :[sigils]nick...`.
///
/// Only channels we are in are tracked; a NAMES for anything else would
/// otherwise fill the directory with users nothing ever removes.
pub struct NamesHandler;

impl Handler for NamesHandler {
    fn receive(&self, ctx: &mut Context<'_>, msg: &Message) -> Result<(), HandlerError> {
        require_params(msg, 4)?;
        let channel = &msg.params[2];
        if ctx.directory.channel(channel).is_none() {
            return Err(DirectoryError::UnknownChannel(channel.clone()).into());
        }

        for entry in msg.params[3].split_whitespace() {
            let (modes, rest) = ctx.isupport.split_sigils(entry);
            // userhost-in-names sends full prefixes
            let source = if rest.contains('!') {
                Source::parse(rest)
            } else {
                Source::user(rest, "", "")
            };
            let Some(id) = ctx.directory.request_user(&source) else {
                continue;
            };
            ctx.directory.join(channel, id, modes)?;
        }
        Ok(())
    }
}

/// `MODE <channel> <changes> [args...]`: track membership prefix modes.
pub struct ModeHandler;

impl Handler for ModeHandler {
    fn receive(&self, ctx: &mut Context<'_>, msg: &Message) -> Result<(), HandlerError> {
        require_params(msg, 2)?;
        let target = &msg.params[0];
        if !ctx.isupport.is_channel(target) {
            return Ok(());
        }

        let mut args = msg.params[2..].iter();
        let mut adding = true;
        let mut first_error = None;
        for mode in msg.params[1].chars() {
            match mode {
                '+' => adding = true,
                '-' => adding = false,
                _ => {
                    if !ctx.isupport.takes_arg(mode, adding) {
                        continue;
                    }
                    let Some(arg) = args.next() else {
                        debug!(mode = %mode, raw = %msg, "Mode argument missing");
                        break;
                    };
                    if !ctx.isupport.is_prefix_mode(mode) {
                        continue;
                    }
                    let Some(flag) = MemberModes::from_mode(mode) else {
                        continue;
                    };
                    if let Err(e) = ctx.directory.update_modes(target, arg, flag, adding) {
                        first_error.get_or_insert(e);
                    }
                }
            }
        }
        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    fn params(&self) -> &'static [Param] {
        schema::MODE
    }
}

/// `INVITE <me> <channel>` is only reported.
pub struct InviteHandler;

impl Handler for InviteHandler {
    fn receive(&self, _: &mut Context<'_>, msg: &Message) -> Result<(), HandlerError> {
        require_params(msg, 2)?;
        info!(
            by = msg.nick().unwrap_or("server"),
            channel = %msg.params[1],
            "Invited"
        );
        Ok(())
    }

    fn params(&self) -> &'static [Param] {
        schema::INVITE
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::Harness;
    use crate::isupport::MemberModes;

    fn in_channel() -> Harness {
        let mut h = Harness::ready();
        h.feed(":bot!bot@parley.example JOIN #chan");
        h
    }

    #[test]
    fn join_adds_user_and_channel() {
        let mut h = in_channel();
        h.feed(":alice!a@h JOIN #chan");
        let alice = h.directory.lookup("alice").unwrap();
        assert_eq!(alice.hostmask(), "alice!a@h");
        assert!(h.directory.channel("#chan").unwrap().member("alice").is_some());
        h.directory.assert_consistent();
    }

    #[test]
    fn self_join_registers_empty_channel_and_asks_who() {
        let mut h = Harness::ready();
        let out = h.feed(":bot!bot@parley.example JOIN :#empty");
        assert_eq!(out, vec!["WHO #empty"]);
        let channel = h.directory.channel("#empty").unwrap();
        assert_eq!(channel.member_count(), 1);
        assert!(channel.member("bot").is_some());
    }

    #[test]
    fn join_nick_quit_sequence() {
        let mut h = in_channel();
        h.feed(":alice!a@h JOIN #chan");
        let id = h.directory.find("alice").unwrap();

        h.feed(":alice!a@h NICK alicia");
        let channel = h.directory.channel("#chan").unwrap();
        assert!(channel.member("alice").is_none());
        assert_eq!(channel.member("alicia").unwrap().user, id);
        assert!(h.directory.find("alice").is_none());

        h.feed(":alicia!a@h QUIT :bye");
        let channel = h.directory.channel("#chan").unwrap();
        assert!(channel.member("alicia").is_none());
        assert!(channel.member("alice").is_none());
        assert!(h.directory.find("alicia").is_none());
        h.directory.assert_consistent();
    }

    #[test]
    fn own_nick_change_follows_session() {
        let mut h = in_channel();
        h.feed(":bot!bot@parley.example NICK bot2");
        assert_eq!(h.state.nick(), "bot2");
        assert!(h.directory.is_own("bot2"));
        assert!(h.directory.channel("#chan").unwrap().member("bot2").is_some());
    }

    #[test]
    fn part_of_unknown_member_is_contained() {
        let mut h = in_channel();
        assert!(h.feed(":ghost!g@h PART #chan").is_empty());
        assert_eq!(h.directory.channel("#chan").unwrap().member_count(), 1);
    }

    #[test]
    fn own_part_and_kick_forget_channel() {
        let mut h = in_channel();
        h.feed(":alice!a@h JOIN #chan");
        h.feed(":bot!bot@parley.example PART #chan :later");
        assert!(h.directory.channel("#chan").is_none());
        assert!(h.directory.find("alice").is_none());

        h.feed(":bot!bot@parley.example JOIN #chan");
        h.feed(":op!o@h KICK #chan bot :out");
        assert!(h.directory.channel("#chan").is_none());
        h.directory.assert_consistent();
    }

    #[test]
    fn kick_removes_target() {
        let mut h = in_channel();
        h.feed(":alice!a@h JOIN #chan");
        h.feed(":bot!bot@parley.example KICK #chan alice :spam");
        assert!(h.directory.find("alice").is_none());
        h.directory.assert_consistent();
    }

    #[test]
    fn names_reply_bulk_joins_with_modes() {
        let mut h = in_channel();
        h.feed(":irc.example.net 353 bot = #chan :@alice +bob carol @+dave!d@h");
        let channel = h.directory.channel("#chan").unwrap();
        assert_eq!(channel.member_count(), 5);
        assert_eq!(channel.member("alice").unwrap().modes, MemberModes::OP);
        assert_eq!(channel.member("bob").unwrap().modes, MemberModes::VOICE);
        assert!(channel.member("carol").unwrap().modes.is_empty());
        assert_eq!(
            channel.member("dave").unwrap().modes,
            MemberModes::OP | MemberModes::VOICE
        );
        assert_eq!(h.directory.lookup("dave").unwrap().host, "h");
        h.directory.assert_consistent();
    }

    #[test]
    fn names_for_other_channels_are_ignored() {
        let mut h = in_channel();
        h.feed(":irc.example.net 353 bot = #elsewhere :alice bob");
        assert!(h.directory.channel("#elsewhere").is_none());
        assert!(h.directory.find("alice").is_none());
    }

    #[test]
    fn topic_variants() {
        let mut h = in_channel();
        h.feed(":irc.example.net 332 bot #chan :Welcome to #chan");
        assert_eq!(
            h.directory.channel("#chan").unwrap().topic.as_deref(),
            Some("Welcome to #chan")
        );
        h.feed(":alice!a@h TOPIC #chan :new topic");
        assert_eq!(h.directory.channel("#chan").unwrap().topic.as_deref(), Some("new topic"));
        h.feed(":alice!a@h TOPIC #chan :");
        assert!(h.directory.channel("#chan").unwrap().topic.is_none());
        h.feed(":irc.example.net 332 bot #chan :back");
        h.feed(":irc.example.net 331 bot #chan :No topic is set");
        assert!(h.directory.channel("#chan").unwrap().topic.is_none());
    }

    #[test]
    fn mode_changes_track_prefixes_and_skip_other_arguments() {
        let mut h = in_channel();
        h.feed(":irc.example.net 353 bot = #chan :alice bob");
        h.feed(":op!o@h MODE #chan +bov-k *!*@spam alice bob secret");
        let channel = h.directory.channel("#chan").unwrap();
        assert_eq!(channel.member("alice").unwrap().modes, MemberModes::OP);
        assert_eq!(channel.member("bob").unwrap().modes, MemberModes::VOICE);

        h.feed(":op!o@h MODE #chan +l-o 10 alice");
        assert!(h.directory.modes("#chan", "alice").unwrap().is_empty());
    }

    #[test]
    fn user_modes_are_ignored() {
        let mut h = in_channel();
        assert!(h.feed(":bot MODE bot :+i").is_empty());
    }

    #[test]
    fn invite_is_only_logged() {
        let mut h = Harness::ready();
        assert!(h.feed(":alice!a@h INVITE bot :#secret").is_empty());
        assert!(h.directory.channel("#secret").is_none());
    }
}
