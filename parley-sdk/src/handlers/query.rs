//! WHO and WHOIS replies fill in what JOIN and NAMES leave out.

use crate::directory::DirectoryError;
use crate::irc::Message;
use crate::registry::{Context, Handler, HandlerError, require_params};

/// `352 RPL_WHOREPLY`:
/// `<me> <channel> <ident> <host> <server> <nick> <flags> :<hops> <realname>`.
pub struct WhoReplyHandler;

impl Handler for WhoReplyHandler {
    fn receive(&self, ctx: &mut Context<'_>, msg: &Message) -> Result<(), HandlerError> {
        require_params(msg, 7)?;
        let realname = msg
            .param(7)
            .map(|tail| tail.split_once(' ').map_or("", |(_, name)| name));
        update(ctx, &msg.params[5], &msg.params[2], &msg.params[3], realname)
    }
}

/// `311 RPL_WHOISUSER`: `<me> <nick> <ident> <host> * :<realname>`.
pub struct WhoisReplyHandler;

impl Handler for WhoisReplyHandler {
    fn receive(&self, ctx: &mut Context<'_>, msg: &Message) -> Result<(), HandlerError> {
        require_params(msg, 4)?;
        update(ctx, &msg.params[1], &msg.params[2], &msg.params[3], msg.param(5))
    }
}

/// Replies about users we do not track are not an error worth more than a
/// debug line, but they must not create entries either.
fn update(
    ctx: &mut Context<'_>,
    nick: &str,
    ident: &str,
    host: &str,
    realname: Option<&str>,
) -> Result<(), HandlerError> {
    let id = ctx
        .directory
        .find(nick)
        .ok_or_else(|| DirectoryError::UnknownUser(nick.to_string()))?;
    if let Some(user) = ctx.directory.user_mut(id) {
        user.ident = ident.to_string();
        user.host = host.to_string();
        if let Some(name) = realname.filter(|n| !n.is_empty()) {
            user.realname = Some(name.to_string());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::testing::Harness;

    #[test]
    fn who_reply_fills_in_hosts() {
        let mut h = Harness::ready();
        h.feed(":bot!bot@parley.example JOIN #chan");
        h.feed(":irc.example.net 353 bot = #chan :@alice bot");
        h.feed(":irc.example.net 352 bot #chan ~al host.example irc.example.net alice H@ :0 Alice Liddell");
        let alice = h.directory.lookup("alice").unwrap();
        assert_eq!(alice.hostmask(), "alice!~al@host.example");
        assert_eq!(alice.realname.as_deref(), Some("Alice Liddell"));
    }

    #[test]
    fn whois_reply_updates_known_users_only() {
        let mut h = Harness::ready();
        h.feed(":bot!bot@parley.example JOIN #chan");
        h.feed(":irc.example.net 353 bot = #chan :bob");
        h.feed(":irc.example.net 311 bot bob b bob.example * :Bob");
        assert_eq!(h.directory.lookup("bob").unwrap().hostmask(), "bob!b@bob.example");

        h.feed(":irc.example.net 311 bot zed z zed.example * :Zed");
        assert!(h.directory.find("zed").is_none());
        h.directory.assert_consistent();
    }
}
