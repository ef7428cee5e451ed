//! RAM-backed storage
//!
//! Handles are cheap clones sharing the same data, so a host simulation (or
//! a test) can keep one handle to inspect storage while the runtime owns
//! another, and "reboot" by building a fresh runtime over the same handle.

use alloc::collections::BTreeMap;
use alloc::rc::Rc;
use alloc::vec;
use alloc::vec::Vec;
use core::cell::RefCell;

use hestia_hal::{ConfigKey, KvBackend, StateMedium, StorageError};

#[derive(Debug, Default)]
struct KvInner {
    entries: BTreeMap<ConfigKey, Vec<u8>>,
    writes: usize,
    commits: usize,
    failing: bool,
}

/// In-memory key-value backend
#[derive(Debug, Clone, Default)]
pub struct MemoryKv {
    inner: Rc<RefCell<KvInner>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check whether a key is present in the backing map
    pub fn contains(&self, key: &str) -> bool {
        match ConfigKey::new(key) {
            Ok(key) => self.inner.borrow().entries.contains_key(&key),
            Err(_) => false,
        }
    }

    /// Raw encoded bytes for a key
    pub fn raw(&self, key: &str) -> Option<Vec<u8>> {
        let key = ConfigKey::new(key).ok()?;
        self.inner.borrow().entries.get(&key).cloned()
    }

    /// Number of keys written or removed
    pub fn write_count(&self) -> usize {
        self.inner.borrow().writes
    }

    /// Number of backend commits
    pub fn commit_count(&self) -> usize {
        self.inner.borrow().commits
    }

    /// Make every subsequent operation fail
    pub fn set_failing(&self, failing: bool) {
        self.inner.borrow_mut().failing = failing;
    }

    fn check(&self) -> Result<(), StorageError> {
        if self.inner.borrow().failing {
            Err(StorageError::Backend)
        } else {
            Ok(())
        }
    }
}

impl KvBackend for MemoryKv {
    fn init(&mut self) -> Result<(), StorageError> {
        self.check()
    }

    fn read(&mut self, key: &ConfigKey, buffer: &mut [u8]) -> Result<usize, StorageError> {
        self.check()?;
        let inner = self.inner.borrow();
        let data = inner.entries.get(key).ok_or(StorageError::NotFound)?;
        if data.len() > buffer.len() {
            return Err(StorageError::BufferTooSmall);
        }
        buffer[..data.len()].copy_from_slice(data);
        Ok(data.len())
    }

    fn write(&mut self, key: &ConfigKey, data: &[u8]) -> Result<(), StorageError> {
        self.check()?;
        let mut inner = self.inner.borrow_mut();
        inner.entries.insert(key.clone(), Vec::from(data));
        inner.writes += 1;
        Ok(())
    }

    fn remove(&mut self, key: &ConfigKey) -> Result<(), StorageError> {
        self.check()?;
        let mut inner = self.inner.borrow_mut();
        inner.entries.remove(key);
        inner.writes += 1;
        Ok(())
    }

    fn erase_all(&mut self) -> Result<(), StorageError> {
        self.check()?;
        self.inner.borrow_mut().entries.clear();
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        self.check()?;
        self.inner.borrow_mut().commits += 1;
        Ok(())
    }
}

#[derive(Debug)]
struct MediumInner {
    data: Vec<u8>,
    writes: usize,
}

/// In-memory byte-addressed state medium
///
/// Fresh media read as `0xFF`, like erased flash.
#[derive(Debug, Clone)]
pub struct MemoryMedium {
    inner: Rc<RefCell<MediumInner>>,
}

impl MemoryMedium {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Rc::new(RefCell::new(MediumInner {
                data: vec![0xFF; capacity],
                writes: 0,
            })),
        }
    }

    /// Copy of the whole medium
    pub fn snapshot(&self) -> Vec<u8> {
        self.inner.borrow().data.clone()
    }

    /// Number of write calls
    pub fn write_count(&self) -> usize {
        self.inner.borrow().writes
    }

    /// Overwrite a single byte, bypassing the write counter
    pub fn poke(&self, offset: usize, value: u8) {
        if let Some(byte) = self.inner.borrow_mut().data.get_mut(offset) {
            *byte = value;
        }
    }
}

impl StateMedium for MemoryMedium {
    fn capacity(&self) -> usize {
        self.inner.borrow().data.len()
    }

    fn read(&mut self, offset: usize, buffer: &mut [u8]) -> Result<(), StorageError> {
        let inner = self.inner.borrow();
        let end = offset.checked_add(buffer.len()).ok_or(StorageError::Full)?;
        let src = inner.data.get(offset..end).ok_or(StorageError::Full)?;
        buffer.copy_from_slice(src);
        Ok(())
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), StorageError> {
        let mut inner = self.inner.borrow_mut();
        let end = offset.checked_add(data.len()).ok_or(StorageError::Full)?;
        let dst = inner.data.get_mut(offset..end).ok_or(StorageError::Full)?;
        dst.copy_from_slice(data);
        inner.writes += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kv_shared_between_clones() {
        let kv = MemoryKv::new();
        let mut handle = kv.clone();
        let key = ConfigKey::new("x").unwrap();
        handle.write(&key, &[1, 2]).unwrap();
        assert!(kv.contains("x"));
        assert_eq!(kv.raw("x"), Some(vec![1, 2]));

        let mut small = [0u8; 1];
        assert_eq!(handle.read(&key, &mut small), Err(StorageError::BufferTooSmall));
    }

    #[test]
    fn test_kv_failing() {
        let mut kv = MemoryKv::new();
        kv.set_failing(true);
        assert_eq!(kv.init(), Err(StorageError::Backend));
    }

    #[test]
    fn test_medium_bounds() {
        let mut medium = MemoryMedium::new(8);
        assert_eq!(medium.write(6, &[0; 4]), Err(StorageError::Full));
        medium.write(4, &[1, 2, 3, 4]).unwrap();
        let mut out = [0u8; 4];
        medium.read(4, &mut out).unwrap();
        assert_eq!(out, [1, 2, 3, 4]);
        assert_eq!(medium.snapshot()[0], 0xFF);
    }
}
