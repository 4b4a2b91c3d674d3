//! HTTP callback endpoint for GENA event notifications.
//!
//! Devices deliver state-variable changes by sending an HTTP request (usually
//! `NOTIFY`) to the callback URL given at subscription time. This crate runs
//! that endpoint and owns the process-wide map from subscription id to the
//! service that holds the subscription:
//!
//! - [`CallbackServer`] binds the first free port in a range and serves one
//!   callback path for every subscription in the process.
//! - [`EventRouter`] maps SIDs to service uids and forwards resolved
//!   notifications to a channel as [`NotificationPayload`]s.
//!
//! The endpoint answers `200 OK` to every request carrying a `SID` header,
//! whether or not the SID is known, so a device never sees our subscription
//! bookkeeping. Parsing the body is left to the consumer.

mod config;
mod error;
pub mod router;
mod server;

pub use config::CallbackServerConfig;
pub use error::{CallbackServerError, Result};
pub use router::{EventRouter, NotificationPayload};
pub use server::{local_ip_for, CallbackServer};
