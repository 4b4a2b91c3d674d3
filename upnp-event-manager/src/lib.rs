//! GENA event subscriptions.
//!
//! [`EventManager`] owns one subscription task per service. Each task
//! subscribes, renews at half the granted timeout and re-subscribes after a
//! cool-down when a request fails. Notifications delivered to the callback
//! server are resolved by SID, parsed from their `LastChange` body and handed
//! to the callbacks registered for the service.
//!
//! # Example
//!
//! ```no_run
//! use upnp_event_manager::{EventConfig, EventManager, SubscriptionTarget};
//!
//! # async fn example() -> upnp_event_manager::Result<()> {
//! let manager = EventManager::start(EventConfig::default()).await?;
//! let callback_url = manager.callback_url("192.168.1.20".parse().unwrap());
//!
//! manager.subscribe(
//!     SubscriptionTarget {
//!         uid: "uuid:RINCON_1::urn:schemas-upnp-org:service:AVTransport:1".into(),
//!         event_url: "http://192.168.1.50:1400/MediaRenderer/AVTransport/Event".into(),
//!         callback_url,
//!         friendly_name: "Kitchen:AVTransport".into(),
//!     },
//!     |events| async move {
//!         for event in events.values() {
//!             println!("{event}");
//!         }
//!     },
//! );
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod event;
mod manager;
mod worker;

pub use config::EventConfig;
pub use error::{EventManagerError, Result};
pub use event::{parse_last_change, Event};
pub use manager::{EventCallback, EventManager, SubscriptionTarget};
