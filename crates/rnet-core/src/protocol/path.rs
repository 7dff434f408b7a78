//! Variable-length paths into a device's variable tree.
//!
//! A path such as `[2, 0, 3, 7]` reads "zone group 2, zone 0, sub-table 3,
//! variable 7".  On the wire it is length-prefixed: `[len, e0, e1, ...]`, so the
//! empty path encodes as the single byte `0x00`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::protocol::codec::ProtocolError;

/// Longest path the one-byte length prefix can describe.
pub const MAX_PATH_LEN: usize = u8::MAX as usize;

/// An ordered sequence of path elements.
///
/// Immutable: [`Path::navigate`] returns a new path rather than mutating.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<u8>")]
pub struct Path(Vec<u8>);

impl Path {
    /// Builds a path from its elements.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::PathTooLong`] for more than [`MAX_PATH_LEN`] elements.
    pub fn new(elements: impl AsRef<[u8]>) -> Result<Self, ProtocolError> {
        let elements = elements.as_ref();
        if elements.len() > MAX_PATH_LEN {
            return Err(ProtocolError::PathTooLong(elements.len()));
        }
        Ok(Self(elements.to_vec()))
    }

    /// The empty path (the device's root).
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Returns a new path with `element` appended.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::PathTooLong`] if the path is already at its maximum length.
    pub fn navigate(&self, element: u8) -> Result<Self, ProtocolError> {
        if self.0.len() >= MAX_PATH_LEN {
            return Err(ProtocolError::PathTooLong(self.0.len() + 1));
        }
        let mut elements = self.0.clone();
        elements.push(element);
        Ok(Self(elements))
    }

    pub fn elements(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of bytes the encoded form occupies (prefix included).
    pub fn encoded_len(&self) -> usize {
        1 + self.0.len()
    }

    /// Appends `[len, elements...]` to `buf`.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        // `new`/`navigate` guarantee the length fits in one byte.
        buf.push(self.0.len() as u8);
        buf.extend_from_slice(&self.0);
    }

    /// Encodes the path into a fresh vector.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf
    }

    /// Decodes a path from the start of `bytes`.
    ///
    /// Returns the path and the number of bytes consumed (`1 + len`).
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MalformedPath`] when `bytes` ends before the
    /// declared number of elements has been read.
    pub fn decode(bytes: &[u8]) -> Result<(Self, usize), ProtocolError> {
        let Some((&len, rest)) = bytes.split_first() else {
            return Err(ProtocolError::MalformedPath {
                declared: 0,
                available: 0,
            });
        };
        let len = len as usize;
        if rest.len() < len {
            return Err(ProtocolError::MalformedPath {
                declared: len,
                available: rest.len(),
            });
        }
        Ok((Self(rest[..len].to_vec()), 1 + len))
    }
}

impl TryFrom<&[u8]> for Path {
    type Error = ProtocolError;

    fn try_from(elements: &[u8]) -> Result<Self, Self::Error> {
        Self::new(elements)
    }
}

impl TryFrom<Vec<u8>> for Path {
    type Error = ProtocolError;

    fn try_from(elements: Vec<u8>) -> Result<Self, Self::Error> {
        if elements.len() > MAX_PATH_LEN {
            return Err(ProtocolError::PathTooLong(elements.len()));
        }
        Ok(Self(elements))
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, element) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{element}")?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::de::value::{Error as ValueError, SeqDeserializer};

    fn deserialize(elements: Vec<u8>) -> Result<Path, ValueError> {
        Path::deserialize(SeqDeserializer::<_, ValueError>::new(elements.into_iter()))
    }

    #[test]
    fn test_deserialize_accepts_maximum_length() {
        let path = deserialize(vec![1; MAX_PATH_LEN]).unwrap();
        assert_eq!(path.len(), MAX_PATH_LEN);
    }

    #[test]
    fn test_deserialize_rejects_overlong_path() {
        let result = deserialize(vec![1; MAX_PATH_LEN + 1]);
        assert!(result.is_err());
    }

    #[test]
    fn test_encode_three_element_path() {
        let path = Path::new([1, 2, 3]).unwrap();
        assert_eq!(path.encode(), vec![0x03, 0x01, 0x02, 0x03]);
    }

    #[test]
    fn test_encode_empty_path_is_single_zero_byte() {
        assert_eq!(Path::root().encode(), vec![0x00]);
    }

    #[test]
    fn test_decode_consumes_prefix_plus_elements_only() {
        // Arrange – trailing bytes belong to the next field
        let bytes = [0x02, 0x05, 0x06, 0xEE, 0xFF];

        // Act
        let (path, consumed) = Path::decode(&bytes).expect("decode");

        // Assert
        assert_eq!(path.elements(), &[5, 6]);
        assert_eq!(consumed, 3);
    }

    #[test]
    fn test_decode_underrun_is_malformed_path() {
        let result = Path::decode(&[0x04, 0x01, 0x02]);
        assert_eq!(
            result,
            Err(ProtocolError::MalformedPath {
                declared: 4,
                available: 2
            })
        );
    }

    #[test]
    fn test_decode_empty_input_is_malformed_path() {
        assert!(matches!(
            Path::decode(&[]),
            Err(ProtocolError::MalformedPath { .. })
        ));
    }

    #[test]
    fn test_navigate_returns_new_path_and_leaves_original() {
        // Arrange
        let zone = Path::new([2, 0]).unwrap();

        // Act
        let variable = zone.navigate(7).unwrap();

        // Assert
        assert_eq!(zone.elements(), &[2, 0]);
        assert_eq!(variable.elements(), &[2, 0, 7]);
    }

    #[test]
    fn test_new_rejects_paths_longer_than_prefix_allows() {
        let too_long = vec![0u8; MAX_PATH_LEN + 1];
        assert_eq!(
            Path::new(&too_long),
            Err(ProtocolError::PathTooLong(MAX_PATH_LEN + 1))
        );
    }

    #[test]
    fn test_navigate_past_maximum_fails() {
        let full = Path::new(vec![1u8; MAX_PATH_LEN]).unwrap();
        assert!(full.navigate(0).is_err());
    }

    #[test]
    fn test_paths_work_as_map_keys() {
        use std::collections::HashMap;
        let mut map = HashMap::new();
        map.insert(Path::new([1, 2]).unwrap(), "a");
        assert_eq!(map.get(&Path::new([1, 2]).unwrap()), Some(&"a"));
        assert_eq!(map.get(&Path::new([1]).unwrap()), None);
    }

    #[test]
    fn test_display_lists_elements() {
        assert_eq!(Path::new([2, 0, 3]).unwrap().to_string(), "[2,0,3]");
        assert_eq!(Path::root().to_string(), "[]");
    }
}
