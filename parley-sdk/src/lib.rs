//! # parley-sdk
//!
//! An IRC client protocol engine: a line codec, a verb-keyed handler
//! registry, a session state machine with nickname negotiation, and a
//! channel/user directory kept in step with server traffic.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use parley_sdk::commands::Commands;
//! use parley_sdk::handlers;
//! use parley_sdk::session::{Identity, Session, SessionConfig};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let registry = handlers::registry(Arc::new(Commands::empty()))?;
//! let mut config = SessionConfig::new("irc.libera.chat:6667", Identity::new("parley", "parley_", "parley", "Parley"));
//! config.channels = vec!["#parley".into()];
//! let mut session = Session::new(config, Arc::new(registry))?;
//! let handle = session.handle();
//! tokio::spawn(async move { handle.wait_for(parley_sdk::session::Status::Ready).await });
//! session.run().await?;
//! # Ok(())
//! # }
//! ```

pub mod casemap;
pub mod commands;
pub mod ctcp;
pub mod directory;
pub mod handlers;
pub mod irc;
pub mod isupport;
pub mod nick;
mod outbound;
pub mod registry;
pub mod session;
pub mod throttle;

pub use commands::{Command, CommandError, Commands, Location, Reply, Request, Role};
pub use directory::{Directory, DirectoryError, UserId};
pub use irc::{CodecError, Message, Source};
pub use registry::{Context, Handler, HandlerError, Registry, RegistryError, SendError};
pub use session::{Identity, Session, SessionConfig, SessionError, SessionHandle, Status};
