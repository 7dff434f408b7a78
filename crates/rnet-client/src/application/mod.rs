//! Application layer: the session and the bookkeeping it is built from.
//!
//! - **`session`** – lifecycle, send path, inbound dispatch and the
//!   background tasks.
//! - **`send_queue`** – strict-priority outbound queue.
//! - **`pending`** – reply correlation, retries and timeouts.
//! - **`subscriptions`** – per-path callbacks fired by inbound data.
//! - **`error`** – [`SessionError`](error::SessionError).

pub mod error;
pub mod pending;
pub mod send_queue;
pub mod session;
pub mod subscriptions;
