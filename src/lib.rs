//! Lichat protocol client core.
//!
//! [`wire`] turns updates into NUL-delimited S-expression frames and back,
//! [`update`] models the updates themselves, and [`client`] runs the
//! connection: handshake, correlated sends, and dispatch to handlers.

pub mod client;
pub mod commands;
pub mod config;
pub mod emotes;
pub mod error;
pub mod logging;
pub mod update;
pub mod wire;

pub use client::{Client, ClientOptions, Profile, Selector, Session, State};
pub use error::{ClientError, ClientResult, Rejection};
pub use update::{Kind, Update};
