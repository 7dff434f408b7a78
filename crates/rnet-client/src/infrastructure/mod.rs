//! Infrastructure layer: byte transports and configuration files.
//!
//! **Dependency rule**: `application` uses the [`connection::Connection`]
//! abstraction only; it never names a concrete transport.
//!
//! - **`connection`** – the `Transport` trait and the `Connection` that wraps it.
//! - **`tcp`** / **`serial`** – the two concrete transports.
//! - **`config`** – TOML settings and the platform config location.

pub mod config;
pub mod connection;
pub mod serial;
pub mod tcp;
