//! # tillsync Server
//!
//! A reference remote authority for tillsync devices.
//!
//! This crate provides:
//! - A sequenced, append-only record log shared by all devices
//! - Effectively-once acceptance: a record ID is logged at most once
//! - Stale-write detection using the same version ordering as devices
//! - Record validation with per-record rejection reasons
//! - Paged pull by server sequence
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────┐
//! │   Device 1   │     │   Device 2   │     │   Device N   │
//! └──────┬───────┘     └──────┬───────┘     └──────┬───────┘
//!        │ CBOR/HTTP          │                    │
//!        └────────────────────┼────────────────────┘
//!                             │
//!                     ┌───────▼────────┐
//!                     │   SyncServer   │
//!                     ├────────────────┤
//!                     │ RequestHandler │
//!                     ├────────────────┤
//!                     │   ServerLog    │
//!                     └────────────────┘
//! ```
//!
//! The server is transport-agnostic: [`SyncServer::handle_post`] takes a
//! path and a CBOR body and returns a CBOR body, so any HTTP stack (or an
//! in-process loopback) can sit in front of it.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod error;
mod handler;
mod log;
mod server;

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use handler::RequestHandler;
pub use log::{Admission, ServerLog};
pub use server::{SyncServer, PULL_PATH, PUSH_PATH};
