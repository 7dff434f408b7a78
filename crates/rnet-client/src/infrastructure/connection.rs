//! Transport-agnostic duplex byte stream to the RNET bus.
//!
//! A [`Connection`] knows nothing about frames.  It opens a [`Transport`]
//! (TCP socket, serial port, or a test double), then moves raw bytes in both
//! directions and tracks whether the link is usable.
//!
//! # Why separate read and write halves? (for beginners)
//!
//! The session reads continuously on one task while another task writes.  If
//! both directions sat behind a single lock, a reader parked in `read()`
//! waiting for the bus would block every writer.  Splitting the stream gives
//! each direction its own lock, so the only thing a writer ever waits for is
//! another writer.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info};

/// Read half handed out by a [`Transport`].
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Write half handed out by a [`Transport`].
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Errors raised by the connection layer.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The transport could not be opened.
    #[error("failed to open {endpoint}: {source}")]
    OpenFailed {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    /// `send` or `receive` was called while the connection is not open.
    #[error("connection is not open")]
    NotOpen,

    /// The remote end closed the stream.
    #[error("connection closed by peer")]
    Closed,

    /// An I/O error occurred on the open stream.
    #[error("connection I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Link state as seen by the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Closed,
    Open,
    /// A read or write failed while open.  `open` must be called again.
    Faulted,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Closed => "closed",
            ConnectionState::Open => "open",
            ConnectionState::Faulted => "faulted",
        };
        f.write_str(s)
    }
}

/// Something that can produce a fresh byte stream to the bus.
///
/// Implemented by [`crate::infrastructure::tcp::TcpTransport`] and
/// [`crate::infrastructure::serial::SerialTransport`]; tests supply their own.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    /// Human-readable endpoint for logs, e.g. `tcp://10.0.0.5:4001`.
    fn describe(&self) -> String;

    /// Opens the underlying stream and returns its two halves.
    async fn connect(&self) -> Result<(BoxedReader, BoxedWriter), ConnectionError>;
}

/// A duplex byte stream with open/close lifecycle and fault tracking.
pub struct Connection {
    transport: Arc<dyn Transport>,
    reader: Mutex<Option<BoxedReader>>,
    writer: Mutex<Option<BoxedWriter>>,
    state_tx: watch::Sender<ConnectionState>,
}

impl Connection {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Closed);
        Self {
            transport,
            reader: Mutex::new(None),
            writer: Mutex::new(None),
            state_tx,
        }
    }

    pub fn endpoint(&self) -> String {
        self.transport.describe()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Receiver that observes every state change.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Opens the transport.  Does nothing if already open.
    ///
    /// # Errors
    ///
    /// Whatever the transport reports, typically [`ConnectionError::OpenFailed`].
    /// The state is left unchanged on failure.
    pub async fn open(&self) -> Result<(), ConnectionError> {
        // A parked `receive` holds the reader lock while the link is open.
        if self.state() == ConnectionState::Open {
            return Ok(());
        }
        let mut reader = self.reader.lock().await;
        let mut writer = self.writer.lock().await;
        if self.state() == ConnectionState::Open {
            return Ok(());
        }

        let endpoint = self.transport.describe();
        let (r, w) = self.transport.connect().await.map_err(|e| {
            error!(%endpoint, "open failed: {e}");
            e
        })?;
        *reader = Some(r);
        *writer = Some(w);
        self.state_tx.send_replace(ConnectionState::Open);
        info!(%endpoint, "connection open");
        Ok(())
    }

    /// Closes the stream.  A `receive` or `send` in progress returns
    /// [`ConnectionError::NotOpen`].
    pub async fn close(&self) {
        // Publishing the state first wakes a parked `receive` or a `send`
        // stuck on a full pipe, and both release their locks.
        let previous = self.state_tx.send_replace(ConnectionState::Closed);

        if let Some(mut w) = self.writer.lock().await.take() {
            if let Err(e) = w.shutdown().await {
                debug!("shutdown during close failed: {e}");
            }
        }
        self.reader.lock().await.take();

        if previous != ConnectionState::Closed {
            info!(endpoint = %self.transport.describe(), "connection closed");
        }
    }

    /// Writes `bytes` in full and flushes.
    ///
    /// A write blocked on a peer that stopped reading is abandoned as soon as
    /// the connection leaves `Open`, so [`close`](Self::close) never waits on it.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::NotOpen`] if closed, or closed while writing;
    /// [`ConnectionError::Io`] on a write failure (the connection is then
    /// `Faulted`).
    pub async fn send(&self, bytes: &[u8]) -> Result<(), ConnectionError> {
        let mut state_rx = self.state_tx.subscribe();
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(ConnectionError::NotOpen)?;

        let write = async {
            writer.write_all(bytes).await?;
            writer.flush().await
        };
        let result = tokio::select! {
            result = write => result,
            _ = state_rx.wait_for(|s| *s != ConnectionState::Open) => {
                return Err(ConnectionError::NotOpen);
            }
        };

        if let Err(e) = result {
            guard.take();
            self.fault(&e);
            return Err(ConnectionError::Io(e));
        }
        Ok(())
    }

    /// Waits for bytes and copies them into `buf`, returning how many arrived.
    ///
    /// # Errors
    ///
    /// - [`ConnectionError::NotOpen`] if closed, or closed while waiting.
    /// - [`ConnectionError::Closed`] when the peer ends the stream.
    /// - [`ConnectionError::Io`] on a read failure.
    ///
    /// The last two leave the connection `Faulted`.
    pub async fn receive(&self, buf: &mut [u8]) -> Result<usize, ConnectionError> {
        let mut state_rx = self.state_tx.subscribe();
        let mut guard = self.reader.lock().await;
        let reader = guard.as_mut().ok_or(ConnectionError::NotOpen)?;

        let read = tokio::select! {
            read = reader.read(buf) => read,
            _ = state_rx.wait_for(|s| *s != ConnectionState::Open) => {
                return Err(ConnectionError::NotOpen);
            }
        };

        match read {
            Ok(0) => {
                guard.take();
                self.fault(&"end of stream");
                Err(ConnectionError::Closed)
            }
            Ok(n) => Ok(n),
            Err(e) => {
                guard.take();
                self.fault(&e);
                Err(ConnectionError::Io(e))
            }
        }
    }

    fn fault(&self, cause: &dyn fmt::Display) {
        // Only an open link can fault; a racing close wins.
        let faulted = self.state_tx.send_if_modified(|s| {
            if *s == ConnectionState::Open {
                *s = ConnectionState::Faulted;
                true
            } else {
                false
            }
        });
        if faulted {
            error!(endpoint = %self.transport.describe(), "connection faulted: {cause}");
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("endpoint", &self.transport.describe())
            .field("state", &self.state())
            .finish()
    }
}
