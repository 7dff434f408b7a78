//! Reassembly buffers for values that arrive in several SetData packets.
//!
//! # Lifecycle
//!
//! ```text
//!            write_begin             write_end
//!   Empty ──────────────► Writing ──────────────► Complete
//!                            ▲  │ write(fragment)     │
//!                            │  └──────┘              │
//!                            └────────────────────────┘
//!                                   write_begin
//! ```
//!
//! A buffer keeps two things apart: the bytes of the transfer in progress and
//! the last *complete* value.  Readers only ever see the latter, as an
//! `Arc<[u8]>` swapped in whole by [`PathBuffer::write_end`], so a reader can
//! never observe a half-written value.  Starting a new transfer does not hide
//! the previous complete value.
//!
//! [`PathBuffer::write_packet`] drives the same cycle from numbered SetData
//! packets and refuses gaps: a packet that is not the next one expected, or
//! that changes the packet count mid-transfer, abandons the transfer.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use thiserror::Error;

use crate::protocol::address::DeviceAddress;
use crate::protocol::path::Path;

/// Errors raised by buffer operations used out of order.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BufferError {
    /// `write` or `write_end` was called without a preceding `write_begin`.
    #[error("no write in progress for path {path}")]
    NoActiveWrite { path: Path },

    /// A numbered packet did not continue the open transfer.  The transfer
    /// has been abandoned.
    #[error(
        "packet {packet_number}/{packet_count} for path {path} out of sequence \
         (expected {expected}/{expected_count})"
    )]
    OutOfSequence {
        path: Path,
        expected: u16,
        expected_count: u16,
        packet_number: u16,
        packet_count: u16,
    },
}

/// Where a [`PathBuffer`] is in its write cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    /// Nothing has been written since creation.
    Empty,
    /// A transfer is open and accepting fragments.
    Writing,
    /// The last transfer was closed; its value is readable.
    Complete,
}

/// Buffered state for one path on one device.
#[derive(Debug, Clone)]
pub struct PathBuffer {
    path: Path,
    state: BufferState,
    in_progress: Vec<u8>,
    complete: Option<Arc<[u8]>>,
    last_modified: Option<SystemTime>,
    next_packet: u16,
    packet_count: u16,
}

impl PathBuffer {
    pub fn new(path: Path) -> Self {
        Self {
            path,
            state: BufferState::Empty,
            in_progress: Vec::new(),
            complete: None,
            last_modified: None,
            next_packet: 0,
            packet_count: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> BufferState {
        self.state
    }

    /// Opens a new transfer, discarding any unfinished one.
    pub fn write_begin(&mut self) {
        self.in_progress.clear();
        self.state = BufferState::Writing;
        self.next_packet = 0;
        self.packet_count = 0;
    }

    /// Feeds packet `packet_number` of `packet_count`.
    ///
    /// Packet 0 opens a transfer; the packet numbered `packet_count - 1`
    /// closes it and its value is returned.
    ///
    /// # Errors
    ///
    /// - [`BufferError::NoActiveWrite`] for a later packet with no transfer open.
    /// - [`BufferError::OutOfSequence`] when a packet is skipped or repeated, or
    ///   the count changes.  The open transfer is dropped and the previous
    ///   complete value stays readable.
    pub fn write_packet(
        &mut self,
        packet_number: u16,
        packet_count: u16,
        fragment: &[u8],
    ) -> Result<Option<Arc<[u8]>>, BufferError> {
        if packet_number == 0 {
            self.write_begin();
            self.packet_count = packet_count;
        } else {
            self.require_writing()?;
            if packet_number != self.next_packet || packet_count != self.packet_count {
                let err = BufferError::OutOfSequence {
                    path: self.path.clone(),
                    expected: self.next_packet,
                    expected_count: self.packet_count,
                    packet_number,
                    packet_count,
                };
                self.abandon();
                return Err(err);
            }
        }

        self.in_progress.extend_from_slice(fragment);
        self.next_packet = packet_number.saturating_add(1);
        if self.next_packet >= self.packet_count {
            self.write_end().map(Some)
        } else {
            Ok(None)
        }
    }

    /// Drops the open transfer without publishing it.
    pub fn abandon(&mut self) {
        self.in_progress.clear();
        self.state = if self.complete.is_some() {
            BufferState::Complete
        } else {
            BufferState::Empty
        };
    }

    /// Appends a fragment to the open transfer.
    ///
    /// # Errors
    ///
    /// Returns [`BufferError::NoActiveWrite`] unless the buffer is `Writing`.
    pub fn write(&mut self, fragment: &[u8]) -> Result<(), BufferError> {
        self.require_writing()?;
        self.in_progress.extend_from_slice(fragment);
        Ok(())
    }

    /// Closes the transfer and publishes the assembled value.
    ///
    /// Returns the newly published value.
    ///
    /// # Errors
    ///
    /// Returns [`BufferError::NoActiveWrite`] unless the buffer is `Writing`.
    pub fn write_end(&mut self) -> Result<Arc<[u8]>, BufferError> {
        self.require_writing()?;
        let value: Arc<[u8]> = Arc::from(std::mem::take(&mut self.in_progress));
        self.complete = Some(Arc::clone(&value));
        self.state = BufferState::Complete;
        self.last_modified = Some(SystemTime::now());
        Ok(value)
    }

    /// The last complete value, if any.
    pub fn read(&self) -> Option<Arc<[u8]>> {
        self.complete.clone()
    }

    /// When the last complete value was published.
    pub fn last_modified(&self) -> Option<SystemTime> {
        self.last_modified
    }

    /// Bytes accumulated by the open transfer so far.
    pub fn pending_len(&self) -> usize {
        self.in_progress.len()
    }

    fn require_writing(&self) -> Result<(), BufferError> {
        if self.state != BufferState::Writing {
            return Err(BufferError::NoActiveWrite {
                path: self.path.clone(),
            });
        }
        Ok(())
    }
}

/// All path buffers observed on one device.
#[derive(Debug, Default, Clone)]
pub struct DeviceBuffers {
    buffers: HashMap<Path, PathBuffer>,
}

impl DeviceBuffers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates or resets the buffer for `path` and opens a transfer.
    pub fn write_begin(&mut self, path: &Path) {
        self.buffers
            .entry(path.clone())
            .or_insert_with(|| PathBuffer::new(path.clone()))
            .write_begin();
    }

    /// Appends `fragment` to the open transfer for `path`.
    ///
    /// # Errors
    ///
    /// [`BufferError::NoActiveWrite`] if no transfer is open for `path`.
    pub fn write(&mut self, path: &Path, fragment: &[u8]) -> Result<(), BufferError> {
        self.get_writing(path)?.write(fragment)
    }

    /// Closes the transfer for `path` and returns the published value.
    ///
    /// # Errors
    ///
    /// [`BufferError::NoActiveWrite`] if no transfer is open for `path`.
    pub fn write_end(&mut self, path: &Path) -> Result<Arc<[u8]>, BufferError> {
        self.get_writing(path)?.write_end()
    }

    /// Feeds one numbered packet for `path`; see [`PathBuffer::write_packet`].
    ///
    /// # Errors
    ///
    /// As [`PathBuffer::write_packet`].
    pub fn write_packet(
        &mut self,
        path: &Path,
        packet_number: u16,
        packet_count: u16,
        fragment: &[u8],
    ) -> Result<Option<Arc<[u8]>>, BufferError> {
        let buffer = if packet_number == 0 {
            self.buffers
                .entry(path.clone())
                .or_insert_with(|| PathBuffer::new(path.clone()))
        } else {
            self.get_writing(path)?
        };
        buffer.write_packet(packet_number, packet_count, fragment)
    }

    pub fn read(&self, path: &Path) -> Option<Arc<[u8]>> {
        self.buffers.get(path).and_then(PathBuffer::read)
    }

    pub fn get(&self, path: &Path) -> Option<&PathBuffer> {
        self.buffers.get(path)
    }

    /// Discards everything known about `path`.  Returns whether it existed.
    pub fn remove(&mut self, path: &Path) -> bool {
        self.buffers.remove(path).is_some()
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.buffers.keys()
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    fn get_writing(&mut self, path: &Path) -> Result<&mut PathBuffer, BufferError> {
        self.buffers
            .get_mut(path)
            .ok_or_else(|| BufferError::NoActiveWrite { path: path.clone() })
    }
}

/// Path buffers for every device seen on the bus.
#[derive(Debug, Default, Clone)]
pub struct BufferStore {
    devices: HashMap<DeviceAddress, DeviceBuffers>,
}

impl BufferStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffers for `device`, created on first use.
    pub fn device_mut(&mut self, device: DeviceAddress) -> &mut DeviceBuffers {
        self.devices.entry(device).or_default()
    }

    pub fn device(&self, device: &DeviceAddress) -> Option<&DeviceBuffers> {
        self.devices.get(device)
    }

    pub fn read(&self, device: &DeviceAddress, path: &Path) -> Option<Arc<[u8]>> {
        self.devices.get(device).and_then(|d| d.read(path))
    }

    pub fn remove(&mut self, device: &DeviceAddress, path: &Path) -> bool {
        self.devices
            .get_mut(device)
            .map(|d| d.remove(path))
            .unwrap_or(false)
    }

    /// Forgets every buffer of `device`, e.g. after the device resets.
    pub fn remove_device(&mut self, device: &DeviceAddress) -> bool {
        self.devices.remove(device).is_some()
    }

    pub fn clear(&mut self) {
        self.devices.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path() -> Path {
        Path::new([2, 0, 0]).unwrap()
    }

    #[test]
    fn test_chunked_write_concatenates_fragments() {
        // Arrange
        let mut buffers = DeviceBuffers::new();
        let p = path();

        // Act
        buffers.write_begin(&p);
        buffers.write(&p, b"Kit").unwrap();
        buffers.write(&p, b"chen").unwrap();
        let published = buffers.write_end(&p).unwrap();

        // Assert
        assert_eq!(&*published, b"Kitchen");
        assert_eq!(buffers.read(&p).as_deref(), Some(&b"Kitchen"[..]));
        assert_eq!(buffers.get(&p).unwrap().state(), BufferState::Complete);
    }

    #[test]
    fn test_read_is_none_while_first_write_is_open() {
        let mut buffers = DeviceBuffers::new();
        let p = path();

        buffers.write_begin(&p);
        buffers.write(&p, &[1, 2]).unwrap();

        assert_eq!(buffers.read(&p), None);
    }

    #[test]
    fn test_read_keeps_previous_value_during_rewrite() {
        // Arrange
        let mut buffers = DeviceBuffers::new();
        let p = path();
        buffers.write_begin(&p);
        buffers.write(&p, b"old").unwrap();
        buffers.write_end(&p).unwrap();

        // Act – start a second transfer but do not finish it
        buffers.write_begin(&p);
        buffers.write(&p, b"ne").unwrap();

        // Assert
        assert_eq!(buffers.read(&p).as_deref(), Some(&b"old"[..]));
        assert_eq!(buffers.get(&p).unwrap().pending_len(), 2);
    }

    #[test]
    fn test_write_without_begin_is_no_active_write() {
        let mut buffers = DeviceBuffers::new();
        let result = buffers.write(&path(), &[1]);
        assert_eq!(result, Err(BufferError::NoActiveWrite { path: path() }));
    }

    #[test]
    fn test_write_after_end_is_no_active_write() {
        let mut buffer = PathBuffer::new(path());
        buffer.write_begin();
        buffer.write_end().unwrap();

        assert!(matches!(
            buffer.write(&[1]),
            Err(BufferError::NoActiveWrite { .. })
        ));
        assert!(matches!(
            buffer.write_end(),
            Err(BufferError::NoActiveWrite { .. })
        ));
    }

    #[test]
    fn test_write_begin_discards_unfinished_transfer() {
        let mut buffer = PathBuffer::new(path());
        buffer.write_begin();
        buffer.write(b"stale").unwrap();

        buffer.write_begin();
        buffer.write(b"fresh").unwrap();

        assert_eq!(&*buffer.write_end().unwrap(), b"fresh");
    }

    #[test]
    fn test_new_buffer_is_empty_without_timestamp() {
        let buffer = PathBuffer::new(path());
        assert_eq!(buffer.state(), BufferState::Empty);
        assert!(buffer.last_modified().is_none());
        assert!(buffer.read().is_none());
    }

    #[test]
    fn test_write_end_stamps_last_modified() {
        let before = SystemTime::now();
        let mut buffer = PathBuffer::new(path());
        buffer.write_begin();
        buffer.write_end().unwrap();
        assert!(buffer.last_modified().unwrap() >= before);
    }

    #[test]
    fn test_numbered_packets_publish_on_last() {
        // Arrange
        let mut buffers = DeviceBuffers::new();
        let p = path();

        // Act
        let first = buffers.write_packet(&p, 0, 3, b"Liv").unwrap();
        let second = buffers.write_packet(&p, 1, 3, b"ing ").unwrap();
        let last = buffers.write_packet(&p, 2, 3, b"Room").unwrap();

        // Assert
        assert!(first.is_none() && second.is_none());
        assert_eq!(last.as_deref(), Some(&b"Living Room"[..]));
    }

    #[test]
    fn test_skipped_packet_abandons_transfer() {
        // Arrange
        let mut buffers = DeviceBuffers::new();
        let p = path();
        buffers.write_packet(&p, 0, 1, b"old").unwrap();
        buffers.write_packet(&p, 0, 3, b"aa").unwrap();

        // Act – packet 1 never arrives
        let gap = buffers.write_packet(&p, 2, 3, b"cc");
        let after = buffers.write_packet(&p, 2, 3, b"cc");

        // Assert
        assert_eq!(
            gap,
            Err(BufferError::OutOfSequence {
                path: p.clone(),
                expected: 1,
                expected_count: 3,
                packet_number: 2,
                packet_count: 3,
            })
        );
        assert!(matches!(after, Err(BufferError::NoActiveWrite { .. })));
        assert_eq!(buffers.read(&p).as_deref(), Some(&b"old"[..]));
        assert_eq!(buffers.get(&p).unwrap().state(), BufferState::Complete);
    }

    #[test]
    fn test_changed_packet_count_abandons_transfer() {
        let mut buffer = PathBuffer::new(path());
        buffer.write_packet(0, 3, b"a").unwrap();

        let result = buffer.write_packet(1, 2, b"b");

        assert!(matches!(result, Err(BufferError::OutOfSequence { .. })));
        assert_eq!(buffer.state(), BufferState::Empty);
        assert_eq!(buffer.pending_len(), 0);
    }

    #[test]
    fn test_repeated_packet_is_out_of_sequence() {
        let mut buffer = PathBuffer::new(path());
        buffer.write_packet(0, 3, b"a").unwrap();
        buffer.write_packet(1, 3, b"b").unwrap();

        assert!(matches!(
            buffer.write_packet(1, 3, b"b"),
            Err(BufferError::OutOfSequence { expected: 2, .. })
        ));
    }

    #[test]
    fn test_store_separates_devices() {
        // Arrange
        let mut store = BufferStore::new();
        let a = DeviceAddress::controller(0);
        let b = DeviceAddress::controller(1);
        let p = path();

        // Act
        let dev = store.device_mut(a);
        dev.write_begin(&p);
        dev.write(&p, &[7]).unwrap();
        dev.write_end(&p).unwrap();

        // Assert
        assert_eq!(store.read(&a, &p).as_deref(), Some(&[7u8][..]));
        assert_eq!(store.read(&b, &p), None);
    }

    #[test]
    fn test_remove_discards_state() {
        let mut store = BufferStore::new();
        let a = DeviceAddress::controller(0);
        let p = path();
        let dev = store.device_mut(a);
        dev.write_begin(&p);
        dev.write_end(&p).unwrap();

        assert!(store.remove(&a, &p));
        assert!(!store.remove(&a, &p));
        assert_eq!(store.read(&a, &p), None);
    }

    #[test]
    fn test_remove_device_forgets_all_paths() {
        let mut store = BufferStore::new();
        let a = DeviceAddress::controller(0);
        store.device_mut(a).write_begin(&path());

        assert!(store.remove_device(&a));
        assert!(store.device(&a).is_none());
    }
}
