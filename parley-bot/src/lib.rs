//! parley-bot: an interactive IRC bot on top of `parley-sdk`.
//!
//! The binary wires these together: [`config`] turns a TOML file and flags
//! into session settings, [`commands`] holds the built-in commands and
//! [`reconnect`] keeps the session connected.

pub mod commands;
pub mod config;
pub mod reconnect;
