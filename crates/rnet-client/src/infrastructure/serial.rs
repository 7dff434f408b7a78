//! Raw serial-port transport.
//!
//! RNET controllers expose an RS-232 port running 19200 baud, 8 data bits,
//! no parity, one stop bit, no flow control.  Those are the defaults here.

use async_trait::async_trait;
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, StopBits};

use crate::infrastructure::connection::{BoxedReader, BoxedWriter, ConnectionError, Transport};

/// Line speed used by RNET controllers.
pub const DEFAULT_BAUD_RATE: u32 = 19_200;

/// Opens the serial device on every [`Transport::connect`].
#[derive(Debug, Clone)]
pub struct SerialTransport {
    path: String,
    baud_rate: u32,
}

impl SerialTransport {
    pub fn new(path: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            path: path.into(),
            baud_rate,
        }
    }
}

#[async_trait]
impl Transport for SerialTransport {
    fn describe(&self) -> String {
        format!("serial://{}@{}", self.path, self.baud_rate)
    }

    async fn connect(&self) -> Result<(BoxedReader, BoxedWriter), ConnectionError> {
        let port = tokio_serial::new(&self.path, self.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .open_native_async()
            .map_err(|e| ConnectionError::OpenFailed {
                endpoint: self.describe(),
                source: e.into(),
            })?;

        let (r, w) = tokio::io::split(port);
        Ok((Box::new(r), Box::new(w)))
    }
}
