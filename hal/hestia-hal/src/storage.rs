//! Persistent storage abstractions
//!
//! Two kinds of storage back the runtime:
//!
//! - [`KvBackend`]: named configuration values (device identity, channel
//!   settings, change flags). Implementations typically sit on a
//!   wear-leveled flash map or a filesystem.
//! - [`StateMedium`]: a small byte-addressed area for frequently saved
//!   channel state (relay level, remaining timer). Typically EEPROM or a
//!   reserved flash sector.

use core::fmt::Write;

use heapless::String;

/// Maximum configuration key length in bytes
pub const MAX_KEY_LEN: usize = 16;

/// Errors from storage operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StorageError {
    /// Backend operation failed
    Backend,
    /// Key not found
    NotFound,
    /// Buffer too small for the data
    BufferTooSmall,
    /// Data corrupted or invalid
    Corrupted,
    /// Storage is full
    Full,
    /// Key does not fit in [`MAX_KEY_LEN`]
    KeyTooLong,
    /// No backend configured
    Unavailable,
}

/// Configuration key
///
/// Device-level keys are plain tags (`"guid"`, `"devicemode"`); channel keys
/// are prefixed with the channel number (`"3_fnc"`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConfigKey(String<MAX_KEY_LEN>);

impl ConfigKey {
    /// Create a device-level key
    pub fn new(tag: &str) -> Result<Self, StorageError> {
        let mut key = String::new();
        key.push_str(tag).map_err(|_| StorageError::KeyTooLong)?;
        Ok(Self(key))
    }

    /// Create a channel key in the `<channel>_<tag>` format
    pub fn channel(channel: u8, tag: &str) -> Result<Self, StorageError> {
        let mut key = String::new();
        write!(key, "{}_{}", channel, tag).map_err(|_| StorageError::KeyTooLong)?;
        Ok(Self(key))
    }

    /// Get the key text
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Check whether this key belongs to the given channel
    pub fn is_channel_key(&self, channel: u8) -> bool {
        let mut prefix: String<4> = String::new();
        if write!(prefix, "{}_", channel).is_err() {
            return false;
        }
        self.0.starts_with(prefix.as_str())
    }
}

/// Key-value configuration backend
///
/// Writes may be buffered by the implementation until [`KvBackend::commit`]
/// is called.
pub trait KvBackend {
    /// Prepare the backend for use
    fn init(&mut self) -> Result<(), StorageError> {
        Ok(())
    }

    /// Read a value by key into the provided buffer
    ///
    /// # Returns
    /// The number of bytes read, or [`StorageError::NotFound`].
    fn read(&mut self, key: &ConfigKey, buffer: &mut [u8]) -> Result<usize, StorageError>;

    /// Write a value by key
    fn write(&mut self, key: &ConfigKey, data: &[u8]) -> Result<(), StorageError>;

    /// Remove a key; removing a missing key is not an error
    fn remove(&mut self, key: &ConfigKey) -> Result<(), StorageError>;

    /// Erase all stored data
    fn erase_all(&mut self) -> Result<(), StorageError>;

    /// Make previous writes durable
    fn commit(&mut self) -> Result<(), StorageError> {
        Ok(())
    }
}

/// Byte-addressed state storage medium
pub trait StateMedium {
    /// Usable size in bytes
    fn capacity(&self) -> usize;

    /// Read `buffer.len()` bytes starting at `offset`
    fn read(&mut self, offset: usize, buffer: &mut [u8]) -> Result<(), StorageError>;

    /// Write `data` starting at `offset`
    fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), StorageError>;

    /// Make previous writes durable
    fn commit(&mut self) -> Result<(), StorageError> {
        Ok(())
    }
}

// Implement the sequential-storage Key trait when the feature is enabled
#[cfg(feature = "sequential-storage")]
impl sequential_storage::map::Key for ConfigKey {
    fn serialize_into(
        &self,
        buffer: &mut [u8],
    ) -> Result<usize, sequential_storage::map::SerializationError> {
        let bytes = self.0.as_bytes();
        if buffer.len() < bytes.len() + 1 {
            return Err(sequential_storage::map::SerializationError::BufferTooSmall);
        }
        buffer[0] = bytes.len() as u8;
        buffer[1..=bytes.len()].copy_from_slice(bytes);
        Ok(bytes.len() + 1)
    }

    fn deserialize_from(
        buffer: &[u8],
    ) -> Result<(Self, usize), sequential_storage::map::SerializationError> {
        if buffer.is_empty() {
            return Err(sequential_storage::map::SerializationError::BufferTooSmall);
        }
        let len = buffer[0] as usize;
        if buffer.len() < len + 1 {
            return Err(sequential_storage::map::SerializationError::BufferTooSmall);
        }
        let text = core::str::from_utf8(&buffer[1..=len])
            .map_err(|_| sequential_storage::map::SerializationError::InvalidFormat)?;
        match ConfigKey::new(text) {
            Ok(key) => Ok((key, len + 1)),
            Err(_) => Err(sequential_storage::map::SerializationError::InvalidFormat),
        }
    }
}
