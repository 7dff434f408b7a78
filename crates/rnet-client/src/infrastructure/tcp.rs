//! TCP transport, for RNET controllers reached through a serial-to-Ethernet
//! bridge or a controller with a native network port.

use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tracing::debug;

use crate::infrastructure::connection::{BoxedReader, BoxedWriter, ConnectionError, Transport};

/// Opens a fresh TCP stream on every [`Transport::connect`].
#[derive(Debug, Clone)]
pub struct TcpTransport {
    host: String,
    port: u16,
    connect_timeout: Duration,
}

impl TcpTransport {
    pub fn new(host: impl Into<String>, port: u16, connect_timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout,
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn describe(&self) -> String {
        format!("tcp://{}:{}", self.host, self.port)
    }

    async fn connect(&self) -> Result<(BoxedReader, BoxedWriter), ConnectionError> {
        let endpoint = self.describe();
        let connect = TcpStream::connect((self.host.as_str(), self.port));
        let stream = match tokio::time::timeout(self.connect_timeout, connect).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => return Err(ConnectionError::OpenFailed { endpoint, source }),
            Err(_) => {
                return Err(ConnectionError::OpenFailed {
                    endpoint,
                    source: std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        format!("no answer within {:?}", self.connect_timeout),
                    ),
                })
            }
        };

        // Frames are small and latency matters more than throughput.
        if let Err(e) = stream.set_nodelay(true) {
            debug!("could not disable Nagle on {endpoint}: {e}");
        }

        let (r, w) = stream.into_split();
        Ok((Box::new(r), Box::new(w)))
    }
}
