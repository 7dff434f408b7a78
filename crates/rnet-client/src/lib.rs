//! rnet-client library entry point.
//!
//! Talks to a Russound RNET bus over TCP or a serial port.  The [`Session`]
//! owns one connection and lets any number of tasks send events, read and
//! write device paths, and subscribe to data as it arrives.
//!
//! ```no_run
//! use std::sync::Arc;
//! use rnet_client::{Connection, Session, SessionConfig, TcpTransport};
//! use rnet_core::{DeviceAddress, EventId, Path, Priority};
//!
//! # async fn demo() -> Result<(), rnet_client::SessionError> {
//! let transport = TcpTransport::new("10.0.0.5", 4001, std::time::Duration::from_secs(3));
//! let session = Session::new(Connection::new(Arc::new(transport)), SessionConfig::default());
//! session.start().await?;
//!
//! let zone = Path::new([2, 0]).expect("short path");
//! session
//!     .send_event(DeviceAddress::root_controller(), zone, EventId::VOLUME_UP, Priority::High)
//!     .await?;
//! session.stop().await;
//! # Ok(())
//! # }
//! ```

/// Application layer: session, queueing and correlation.
pub mod application;

/// Infrastructure layer: transports and configuration.
pub mod infrastructure;

pub use application::error::SessionError;
pub use application::pending::Reply;
pub use application::session::{
    ProtocolIssue, ResponseHandle, Session, SessionConfig, SessionEvent, SessionState,
};
pub use application::subscriptions::{PathUpdate, SubscriptionId};
pub use infrastructure::connection::{Connection, ConnectionError, ConnectionState, Transport};
pub use infrastructure::serial::SerialTransport;
pub use infrastructure::tcp::TcpTransport;
