//! Three-part RNET device addresses.
//!
//! Every participant on the bus is identified by a `(controller, zone, keypad)`
//! triple.  A handful of keypad and controller values are reserved:
//!
//! | Meaning                    | controller | zone | keypad |
//! |----------------------------|------------|------|--------|
//! | The controller itself      | `n`        | `0`  | `0x7F` |
//! | External host (us)         | `0`        | `0`  | `0x70` |
//! | Broadcast to all controllers | `0x7F`   | `0`  | `0x7F` |
//!
//! On the wire an address is exactly three bytes in the order
//! controller, zone, keypad.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::protocol::codec::ProtocolError;

/// Number of bytes an encoded [`DeviceAddress`] occupies.
pub const ADDRESS_LEN: usize = 3;

/// Keypad id that designates the controller itself rather than a keypad.
pub const KEYPAD_CONTROLLER: u8 = 0x7F;

/// Keypad id used by an external host application.
pub const KEYPAD_EXTERNAL: u8 = 0x70;

/// Controller id that addresses every controller on the bus.
pub const CONTROLLER_ALL: u8 = 0x7F;

/// Identifies a single participant on the RNET bus.
///
/// Ordering and equality are by `(controller_id, zone_id, keypad_id)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeviceAddress {
    pub controller_id: u8,
    pub zone_id: u8,
    pub keypad_id: u8,
}

impl DeviceAddress {
    /// Creates an address from its three components.
    pub const fn new(controller_id: u8, zone_id: u8, keypad_id: u8) -> Self {
        Self {
            controller_id,
            zone_id,
            keypad_id,
        }
    }

    /// The controller numbered `controller_id`.
    pub const fn controller(controller_id: u8) -> Self {
        Self::new(controller_id, 0, KEYPAD_CONTROLLER)
    }

    /// The root controller (controller 0).
    pub const fn root_controller() -> Self {
        Self::controller(0)
    }

    /// The external host application.
    pub const fn external() -> Self {
        Self::new(0, 0, KEYPAD_EXTERNAL)
    }

    /// Broadcast address reaching every controller.
    pub const fn all_controllers() -> Self {
        Self::new(CONTROLLER_ALL, 0, KEYPAD_CONTROLLER)
    }

    /// Returns `true` if this address refers to a controller rather than a keypad.
    pub const fn is_controller(&self) -> bool {
        self.keypad_id == KEYPAD_CONTROLLER
    }

    pub const fn is_external(&self) -> bool {
        self.keypad_id == KEYPAD_EXTERNAL
    }

    /// Returns `true` for broadcast addresses, which never produce a single reply.
    pub const fn is_broadcast(&self) -> bool {
        self.controller_id == CONTROLLER_ALL
    }

    /// Encodes the address as its three wire bytes.
    pub const fn to_bytes(self) -> [u8; ADDRESS_LEN] {
        [self.controller_id, self.zone_id, self.keypad_id]
    }

    /// Appends the three wire bytes to `buf`.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.to_bytes());
    }

    /// Decodes an address from the first three bytes of `bytes`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MalformedAddress`] if fewer than three bytes are
    /// available.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        match bytes {
            [controller_id, zone_id, keypad_id, ..] => {
                Ok(Self::new(*controller_id, *zone_id, *keypad_id))
            }
            _ => Err(ProtocolError::MalformedAddress {
                needed: ADDRESS_LEN,
                available: bytes.len(),
            }),
        }
    }
}

impl From<[u8; ADDRESS_LEN]> for DeviceAddress {
    fn from(bytes: [u8; ADDRESS_LEN]) -> Self {
        Self::new(bytes[0], bytes[1], bytes[2])
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_broadcast() {
            return write!(f, "all-controllers");
        }
        if *self == Self::external() {
            return write!(f, "external");
        }
        if self.is_controller() {
            return write!(f, "c{}", self.controller_id);
        }
        write!(
            f,
            "c{}.z{}.k{}",
            self.controller_id, self.zone_id, self.keypad_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_controller_encodes_to_reference_bytes() {
        assert_eq!(DeviceAddress::root_controller().to_bytes(), [0x00, 0x00, 0x7F]);
    }

    #[test]
    fn test_external_encodes_to_reference_bytes() {
        assert_eq!(DeviceAddress::external().to_bytes(), [0x00, 0x00, 0x70]);
    }

    #[test]
    fn test_decode_reads_only_first_three_bytes() {
        // Arrange
        let bytes = [0x01, 0x02, 0x03, 0xAA, 0xBB];

        // Act
        let addr = DeviceAddress::decode(&bytes).expect("decode");

        // Assert
        assert_eq!(addr, DeviceAddress::new(1, 2, 3));
    }

    #[test]
    fn test_decode_short_input_is_malformed_address() {
        let result = DeviceAddress::decode(&[0x00, 0x7F]);
        assert_eq!(
            result,
            Err(ProtocolError::MalformedAddress {
                needed: 3,
                available: 2
            })
        );
    }

    #[test]
    fn test_sentinel_predicates() {
        assert!(DeviceAddress::controller(3).is_controller());
        assert!(!DeviceAddress::controller(3).is_broadcast());
        assert!(DeviceAddress::external().is_external());
        assert!(DeviceAddress::all_controllers().is_broadcast());
        assert!(!DeviceAddress::new(0, 2, 1).is_controller());
    }

    #[test]
    fn test_ordering_is_by_triple() {
        let mut addrs = vec![
            DeviceAddress::new(1, 0, 0),
            DeviceAddress::new(0, 1, 0),
            DeviceAddress::new(0, 0, 5),
        ];
        addrs.sort();
        assert_eq!(
            addrs,
            vec![
                DeviceAddress::new(0, 0, 5),
                DeviceAddress::new(0, 1, 0),
                DeviceAddress::new(1, 0, 0),
            ]
        );
    }

    #[test]
    fn test_display_names_sentinels() {
        assert_eq!(DeviceAddress::external().to_string(), "external");
        assert_eq!(DeviceAddress::all_controllers().to_string(), "all-controllers");
        assert_eq!(DeviceAddress::controller(2).to_string(), "c2");
        assert_eq!(DeviceAddress::new(1, 4, 9).to_string(), "c1.z4.k9");
    }
}
