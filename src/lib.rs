//! Warden: session lifecycle management and input resilience for a
//! single-page business app.
//!
//! - [`lifecycle`] owns the authenticated session: idle timeout, warning,
//!   expiry and logout.
//! - [`watchdog`] keeps form inputs writable, probing and repairing them on
//!   a schedule driven by app activity.
//! - [`http_server`] exposes both to a page over HTTP and a WebSocket.

pub mod activity;
pub mod config;
pub mod control;
pub mod error;
pub mod host;
pub mod http_server;
pub mod lifecycle;
pub mod probe;
pub mod session;
pub mod state;
pub mod store;
pub mod timer;
pub mod watchdog;
