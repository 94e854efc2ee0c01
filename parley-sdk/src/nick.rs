//! Nickname negotiation during registration.
//!
//! The server rejects a requested nickname with one of three numerics; each
//! maps to a rule for the next candidate:
//!
//! | numeric | meaning           | next candidate                               |
//! |---------|-------------------|----------------------------------------------|
//! | 433     | nickname in use   | alternate, then alternate + random suffix     |
//! | 432     | erroneous         | sanitized prefix + random suffix              |
//! | 431     | no nickname given | preferred, alternate, generated (first set)   |
//!
//! Attempts are capped; exceeding the cap fails registration.

use rand::Rng;
use rand::distributions::Alphanumeric;

use crate::casemap;
use crate::session::Identity;

/// Length of the random suffix appended to generated candidates.
pub const SUFFIX_LEN: usize = 4;

/// Default number of retries before registration is abandoned.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Why the server refused a nickname.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    InUse,
    Erroneous,
    NoneGiven,
}

impl Rejection {
    pub fn from_numeric(verb: &str) -> Option<Self> {
        match verb {
            "433" => Some(Rejection::InUse),
            "432" => Some(Rejection::Erroneous),
            "431" => Some(Rejection::NoneGiven),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NickNegotiator {
    attempts: u32,
    max_attempts: u32,
    alternate_tried: bool,
}

impl Default for NickNegotiator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS)
    }
}

impl NickNegotiator {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            attempts: 0,
            max_attempts,
            alternate_tried: false,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Start over for a new connection.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.alternate_tried = false;
    }

    /// Pick the next nickname after `rejected` was refused.
    ///
    /// Returns `Err(attempts)` once the retry ceiling is exceeded.
    pub fn next(
        &mut self,
        rejection: Rejection,
        rejected: &str,
        identity: &Identity,
        nicklen: usize,
    ) -> Result<String, u32> {
        self.attempts += 1;
        if self.attempts > self.max_attempts {
            return Err(self.attempts - 1);
        }

        let candidate = match rejection {
            Rejection::InUse => {
                let alternate = identity.alternate.as_str();
                let fresh = !self.alternate_tried
                    && !alternate.is_empty()
                    && !casemap::eq(rejected, alternate);
                if fresh {
                    self.alternate_tried = true;
                    alternate.to_string()
                } else {
                    generate(base_of(identity), nicklen)
                }
            }
            Rejection::Erroneous => generate(&sanitize(base_of(identity)), nicklen),
            Rejection::NoneGiven => [identity.preferred.as_str(), identity.alternate.as_str()]
                .into_iter()
                .find(|n| !n.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| generate("guest", nicklen)),
        };
        Ok(candidate)
    }
}

fn base_of(identity: &Identity) -> &str {
    if identity.alternate.is_empty() {
        &identity.preferred
    } else {
        &identity.alternate
    }
}

/// Truncate `base` to leave room for the suffix, then append a random
/// alphanumeric suffix.
pub fn generate(base: &str, nicklen: usize) -> String {
    let room = nicklen.saturating_sub(SUFFIX_LEN).max(1);
    let mut nick: String = base.chars().take(room).collect();
    if nick.is_empty() {
        nick.push('g');
    }
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SUFFIX_LEN)
        .map(char::from)
        .collect();
    nick.push_str(&suffix);
    nick
}

/// Keep only characters valid in a nickname, and make sure it starts with a
/// letter or special character.
fn sanitize(base: &str) -> String {
    let kept: String = base
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || "[]\\`_^{|}-".contains(*c))
        .collect();
    let trimmed = kept.trim_start_matches(|c: char| c.is_ascii_digit() || c == '-');
    if trimmed.is_empty() {
        "guest".to_string()
    } else {
        trimmed.to_string()
    }
}
