//! Multi-user chat and file relay.
//!
//! The server side is a [`RelayServer`] accepting TCP connections, one
//! [`Session`] task per connection, a shared [`SessionRegistry`] of display
//! names, and a [`Dispatcher`] that fans text and file payloads out to
//! recipients. The [`client`] module is the interactive terminal client.

pub mod client;
pub mod config;
pub mod dispatch;
pub mod metrics;
pub mod outbound;
pub mod registry;
pub mod server;
pub mod session;

#[cfg(test)]
mod test_helpers;

pub use config::{ClientConfig, FileConfig, ServerConfig};
pub use dispatch::{DeliveryReport, DispatchError, Dispatcher};
pub use metrics::{MetricsSnapshot, ServerMetrics};
pub use outbound::{DeliveryError, Outbound};
pub use registry::SessionRegistry;
pub use server::RelayServer;
pub use session::{CloseReason, RelayContext, Session};
