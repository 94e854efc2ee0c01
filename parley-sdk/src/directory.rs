//! Channel and user directory.
//!
//! An in-memory mirror of the channels the client is in and the users it can
//! see there. Users live in an arena keyed by [`UserId`]; channel member maps
//! and the nickname index both point at the same id, so a rename re-keys the
//! indexes while every holder keeps the same logical user.
//!
//! Invariants:
//! - `by_nick[fold(u.nick)] == id` for every user `u` with that id.
//! - A user is in `users` only if some channel lists it, or it is the client.
//! - `user.channels` and the channel member maps agree in both directions.
//!
//! The directory is a best-effort mirror of server state. Inconsistent
//! notifications surface as [`DirectoryError`] and are expected to be logged
//! and ignored by callers.

use std::collections::{BTreeSet, HashMap};

use crate::casemap::fold;
use crate::irc::Source;
use crate::isupport::MemberModes;

/// Stable handle to a user across renames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserId(u64);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DirectoryError {
    #[error("{nick} is not a member of {channel}")]
    NotAMember { channel: String, nick: String },
    #[error("unknown user {0}")]
    UnknownUser(String),
    #[error("unknown channel {0}")]
    UnknownChannel(String),
    #[error("cannot rename {old} to {new}: nickname belongs to another user")]
    NicknameCollision { old: String, new: String },
}

#[derive(Debug, Clone, Default)]
pub struct User {
    pub nick: String,
    pub ident: String,
    pub host: String,
    pub realname: Option<String>,
    /// Folded names of channels shared with the client.
    channels: BTreeSet<String>,
    /// Per-module payloads, keyed by module id.
    pub data: HashMap<String, serde_json::Value>,
}

impl User {
    fn new(nick: &str) -> Self {
        Self {
            nick: nick.to_string(),
            ..Default::default()
        }
    }

    /// `nick!ident@host`, with `*` for unknown parts.
    pub fn hostmask(&self) -> String {
        let ident = if self.ident.is_empty() { "*" } else { &self.ident };
        let host = if self.host.is_empty() { "*" } else { &self.host };
        format!("{}!{ident}@{host}", self.nick)
    }

    pub fn channel_keys(&self) -> impl Iterator<Item = &str> {
        self.channels.iter().map(String::as_str)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

/// One entry in a channel's member map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Member {
    pub user: UserId,
    pub modes: MemberModes,
}

#[derive(Debug, Clone)]
pub struct Channel {
    pub name: String,
    pub topic: Option<String>,
    members: HashMap<String, Member>,
}

impl Channel {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            topic: None,
            members: HashMap::new(),
        }
    }

    pub fn member(&self, nick: &str) -> Option<&Member> {
        self.members.get(&fold(nick))
    }

    pub fn members(&self) -> impl Iterator<Item = &Member> {
        self.members.values()
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }
}

#[derive(Debug, Default)]
pub struct Directory {
    users: HashMap<UserId, User>,
    by_nick: HashMap<String, UserId>,
    channels: HashMap<String, Channel>,
    own: Option<UserId>,
    next_id: u64,
    stale: bool,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Lookup ─────────────────────────────────────────────────────

    pub fn user(&self, id: UserId) -> Option<&User> {
        self.users.get(&id)
    }

    pub fn user_mut(&mut self, id: UserId) -> Option<&mut User> {
        self.users.get_mut(&id)
    }

    pub fn find(&self, nick: &str) -> Option<UserId> {
        self.by_nick.get(&fold(nick)).copied()
    }

    pub fn lookup(&self, nick: &str) -> Option<&User> {
        self.find(nick).and_then(|id| self.users.get(&id))
    }

    pub fn channel(&self, name: &str) -> Option<&Channel> {
        self.channels.get(&fold(name))
    }

    pub fn channels(&self) -> impl Iterator<Item = &Channel> {
        self.channels.values()
    }

    pub fn users(&self) -> impl Iterator<Item = (UserId, &User)> {
        self.users.iter().map(|(id, user)| (*id, user))
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// The client's own user, once registration has named it.
    pub fn own(&self) -> Option<UserId> {
        self.own
    }

    pub fn is_own(&self, nick: &str) -> bool {
        self.own.is_some() && self.find(nick) == self.own
    }

    /// Membership flags of `nick` in `channel`, if it is a member.
    pub fn modes(&self, channel: &str, nick: &str) -> Option<MemberModes> {
        self.channel(channel)?.member(nick).map(|m| m.modes)
    }

    // ── Lazy creation ──────────────────────────────────────────────

    /// Existing user for `nick`, or a new one.
    pub fn request_nick(&mut self, nick: &str) -> UserId {
        let key = fold(nick);
        if let Some(id) = self.by_nick.get(&key) {
            return *id;
        }
        let id = UserId(self.next_id);
        self.next_id += 1;
        self.users.insert(id, User::new(nick));
        self.by_nick.insert(key, id);
        id
    }

    /// Resolve a message source to a user, refreshing ident and host from the
    /// prefix. Server sources have no user.
    pub fn request_user(&mut self, source: &Source) -> Option<UserId> {
        let Source::User { nick, ident, host } = source else {
            return None;
        };
        let id = self.request_nick(nick);
        if let Some(user) = self.users.get_mut(&id) {
            if !ident.is_empty() {
                user.ident.clone_from(ident);
            }
            if !host.is_empty() {
                user.host.clone_from(host);
            }
        }
        Some(id)
    }

    /// Existing channel for `name`, or a new empty one.
    pub fn request_channel(&mut self, name: &str) -> &mut Channel {
        self.channels
            .entry(fold(name))
            .or_insert_with(|| Channel::new(name))
    }

    /// Mark `nick` as the client's own identity.
    pub fn set_own(&mut self, nick: &str) -> UserId {
        if let Some(previous) = self.own
            && self.find(nick) != Some(previous)
            && let Some(user) = self.users.get(&previous)
        {
            // Registration settled on a different nick than we first recorded.
            let old = user.nick.clone();
            if self.rename(&old, nick).is_ok() {
                return previous;
            }
            self.own = None;
            self.release(previous);
        }
        let id = self.request_nick(nick);
        self.own = Some(id);
        id
    }

    // ── Membership ─────────────────────────────────────────────────

    /// Add `user` to `channel`, overwriting its flags if already a member.
    pub fn join(
        &mut self,
        channel: &str,
        user: UserId,
        modes: MemberModes,
    ) -> Result<(), DirectoryError> {
        let Some(record) = self.users.get_mut(&user) else {
            return Err(DirectoryError::UnknownUser(format!("{user:?}")));
        };
        let channel_key = fold(channel);
        record.channels.insert(channel_key.clone());
        let nick_key = fold(&record.nick);

        let entry = self
            .channels
            .entry(channel_key)
            .or_insert_with(|| Channel::new(channel));
        entry.members.insert(nick_key, Member { user, modes });
        Ok(())
    }

    /// Remove `nick` from `channel`.
    ///
    /// When the client itself leaves, the whole channel is forgotten. Users
    /// left without any shared channel are dropped.
    pub fn part(&mut self, channel: &str, nick: &str) -> Result<UserId, DirectoryError> {
        let channel_key = fold(channel);
        let nick_key = fold(nick);
        let not_a_member = || DirectoryError::NotAMember {
            channel: channel.to_string(),
            nick: nick.to_string(),
        };

        let entry = self.channels.get_mut(&channel_key).ok_or_else(not_a_member)?;
        let member = entry.members.remove(&nick_key).ok_or_else(not_a_member)?;

        if Some(member.user) == self.own {
            self.forget_channel(&channel_key);
        } else {
            self.detach(member.user, &channel_key);
        }
        Ok(member.user)
    }

    /// A kick removes the member exactly like a part.
    pub fn kick(&mut self, channel: &str, nick: &str) -> Result<UserId, DirectoryError> {
        self.part(channel, nick)
    }

    /// Re-key `old` to `new`, keeping the same user and its per-channel flags.
    pub fn rename(&mut self, old: &str, new: &str) -> Result<UserId, DirectoryError> {
        let old_key = fold(old);
        let new_key = fold(new);
        let id = *self
            .by_nick
            .get(&old_key)
            .ok_or_else(|| DirectoryError::UnknownUser(old.to_string()))?;

        if let Some(existing) = self.by_nick.get(&new_key)
            && *existing != id
        {
            return Err(DirectoryError::NicknameCollision {
                old: old.to_string(),
                new: new.to_string(),
            });
        }

        let Some(user) = self.users.get_mut(&id) else {
            return Err(DirectoryError::UnknownUser(old.to_string()));
        };
        user.nick = new.to_string();

        if old_key != new_key {
            self.by_nick.remove(&old_key);
            self.by_nick.insert(new_key.clone(), id);
            for channel_key in &user.channels {
                if let Some(channel) = self.channels.get_mut(channel_key)
                    && let Some(member) = channel.members.remove(&old_key)
                {
                    channel.members.insert(new_key.clone(), member);
                }
            }
        }
        Ok(id)
    }

    /// Remove a user from every channel, then from the directory.
    pub fn remove_user(&mut self, nick: &str) -> Result<UserId, DirectoryError> {
        let key = fold(nick);
        let id = *self
            .by_nick
            .get(&key)
            .ok_or_else(|| DirectoryError::UnknownUser(nick.to_string()))?;
        let channels = self
            .users
            .get(&id)
            .map(|u| u.channels.clone())
            .unwrap_or_default();
        for channel_key in channels {
            if let Some(channel) = self.channels.get_mut(&channel_key) {
                channel.members.remove(&key);
            }
        }
        self.users.remove(&id);
        self.by_nick.remove(&key);
        if self.own == Some(id) {
            self.own = None;
        }
        Ok(id)
    }

    /// Drop `id` if nothing references it any more. Used after a lookup for
    /// a user that was never seen in a channel (a private message sender).
    pub fn release(&mut self, id: UserId) {
        if Some(id) == self.own {
            return;
        }
        let orphan = self.users.get(&id).is_some_and(|u| u.channels.is_empty());
        if orphan && let Some(user) = self.users.remove(&id) {
            self.by_nick.remove(&fold(&user.nick));
        }
    }

    // ── Channel state ──────────────────────────────────────────────

    pub fn set_topic(&mut self, channel: &str, topic: Option<String>) -> Result<(), DirectoryError> {
        let entry = self
            .channels
            .get_mut(&fold(channel))
            .ok_or_else(|| DirectoryError::UnknownChannel(channel.to_string()))?;
        entry.topic = topic.filter(|t| !t.is_empty());
        Ok(())
    }

    /// Add or remove a membership flag for `nick` in `channel`.
    pub fn update_modes(
        &mut self,
        channel: &str,
        nick: &str,
        flag: MemberModes,
        adding: bool,
    ) -> Result<(), DirectoryError> {
        let member = self
            .channels
            .get_mut(&fold(channel))
            .and_then(|c| c.members.get_mut(&fold(nick)))
            .ok_or_else(|| DirectoryError::NotAMember {
                channel: channel.to_string(),
                nick: nick.to_string(),
            })?;
        if adding {
            member.modes.insert(flag);
        } else {
            member.modes.remove(flag);
        }
        Ok(())
    }

    /// Names of the channels `id` shares with the client.
    pub fn channels_of(&self, id: UserId) -> Vec<&str> {
        self.users
            .get(&id)
            .map(|u| {
                u.channels
                    .iter()
                    .filter_map(|key| self.channels.get(key).map(|c| c.name.as_str()))
                    .collect()
            })
            .unwrap_or_default()
    }

    // ── Invalidation ───────────────────────────────────────────────

    /// Mark everything stale; the next [`Directory::clear_if_stale`] wipes it.
    pub fn invalidate(&mut self) {
        self.stale = true;
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    /// Wipe all state if it was invalidated. Returns whether it did.
    pub fn clear_if_stale(&mut self) -> bool {
        if !self.stale {
            return false;
        }
        *self = Directory {
            next_id: self.next_id,
            ..Directory::default()
        };
        true
    }

    // ── Internals ──────────────────────────────────────────────────

    fn detach(&mut self, id: UserId, channel_key: &str) {
        let Some(user) = self.users.get_mut(&id) else {
            return;
        };
        user.channels.remove(channel_key);
        if user.channels.is_empty() && Some(id) != self.own {
            let nick_key = fold(&user.nick);
            self.users.remove(&id);
            self.by_nick.remove(&nick_key);
        }
    }

    fn forget_channel(&mut self, channel_key: &str) {
        let Some(channel) = self.channels.remove(channel_key) else {
            return;
        };
        if let Some(own) = self.own {
            self.detach(own, channel_key);
        }
        for member in channel.members.values() {
            self.detach(member.user, channel_key);
        }
    }

    #[cfg(test)]
    pub(crate) fn assert_consistent(&self) {
        for (key, id) in &self.by_nick {
            let user = self.users.get(id).expect("indexed user exists");
            assert_eq!(&fold(&user.nick), key, "index key matches nick");
        }
        assert_eq!(self.by_nick.len(), self.users.len(), "one index entry per user");
        for (id, user) in &self.users {
            assert!(
                !user.channels.is_empty() || Some(*id) == self.own,
                "{} is unreachable",
                user.nick
            );
            for channel_key in &user.channels {
                let channel = self.channels.get(channel_key).expect("channel exists");
                let member = channel.members.get(&fold(&user.nick)).expect("member entry");
                assert_eq!(member.user, *id);
            }
        }
        for (channel_key, channel) in &self.channels {
            for (nick_key, member) in &channel.members {
                let user = self.users.get(&member.user).expect("member user exists");
                assert_eq!(&fold(&user.nick), nick_key);
                assert!(user.channels.contains(channel_key));
            }
        }
    }
}
