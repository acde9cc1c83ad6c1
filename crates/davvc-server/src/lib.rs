//! # davvc-server
//!
//! WebDAV file server extended with per-file version control methods.
//!
//! Standard WebDAV verbs are delegated to an embedded WebDAV engine bound
//! to the working tree; VERSION-CONTROL, CHECKOUT, CHECKIN and UNCHECKOUT
//! are handled by the [`davvc_engine`] VC store behind a request gatekeeper
//! and a per-path lock shared with the WebDAV engine's lock system.

pub mod config;
mod handler;
mod logging;
mod server;

pub use config::Config;
pub use logging::init_logging;
pub use server::{serve, serve_background, DavVcServer};
