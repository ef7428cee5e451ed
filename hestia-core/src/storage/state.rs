//! Persisted channel state
//!
//! Elements serialize their runtime state (relay level, remaining countdown)
//! into a single section, one element after another in registration order.
//! There are no per-element tags: a layout change is detected by a dry-run
//! save pass producing a section of a different size than the stored one.
//!
//! # Layout
//!
//! ```text
//! ┌───────┬─────────┬──────────┬──────────────┬────────────┬──────────────┐
//! │ magic │ version │ reserved │ section size │ section crc│ section ...  │
//! │ 4B    │ u8      │ u8       │ u16 LE       │ u32 LE     │ size bytes   │
//! └───────┴─────────┴──────────┴──────────────┴────────────┴──────────────┘
//! ```

use alloc::boxed::Box;
use alloc::vec::Vec;

use hestia_hal::{StateMedium, StorageError};

/// Header magic
pub const STATE_MAGIC: [u8; 4] = *b"HSTA";

/// Header layout version
pub const STATE_VERSION: u8 = 1;

/// Header size in bytes
pub const HEADER_SIZE: usize = 12;

/// Minimum interval between periodic state saves
pub const MIN_SAVE_PERIOD_MS: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    Idle,
    Load { cursor: usize },
    Save { dry_run: bool },
}

/// State section service
pub struct StateStorage {
    medium: Option<Box<dyn StateMedium>>,
    pass: Pass,
    /// Section as last read from or written to the medium
    stored: Vec<u8>,
    /// Section being built by the current save pass
    buffer: Vec<u8>,
    valid: bool,
    save_period_ms: u64,
    next_save_at: u64,
}

impl StateStorage {
    /// Create a state service over a medium
    pub fn new(medium: Box<dyn StateMedium>) -> Self {
        Self {
            medium: Some(medium),
            ..Self::unavailable()
        }
    }

    /// Create a state service without a medium; saves are discarded
    pub fn unavailable() -> Self {
        Self {
            medium: None,
            pass: Pass::Idle,
            stored: Vec::new(),
            buffer: Vec::new(),
            valid: false,
            save_period_ms: MIN_SAVE_PERIOD_MS,
            next_save_at: MIN_SAVE_PERIOD_MS + 1,
        }
    }

    pub fn is_available(&self) -> bool {
        self.medium.is_some()
    }

    /// Whether a stored section exists and matches the current layout
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Read and verify the stored section
    pub fn init(&mut self) -> bool {
        self.valid = false;
        self.stored.clear();
        let Some(medium) = self.medium.as_mut() else {
            return false;
        };
        match read_section(&mut **medium) {
            Ok(section) => {
                debug!("State section loaded ({} bytes)", section.len());
                self.stored = section;
                self.valid = true;
            }
            Err(StorageError::NotFound) => {
                info!("No stored state");
            }
            Err(e) => {
                warn!("Stored state rejected: {:?}", e);
            }
        }
        self.valid
    }

    /// Start a load pass
    ///
    /// Returns `false` when there is no valid stored state.
    pub fn prepare_load(&mut self) -> bool {
        if !self.valid {
            return false;
        }
        self.pass = Pass::Load { cursor: 0 };
        true
    }

    /// Read the next `out.len()` bytes of the section
    pub fn read_bytes(&mut self, out: &mut [u8]) -> bool {
        let Pass::Load { cursor } = &mut self.pass else {
            return false;
        };
        let end = *cursor + out.len();
        match self.stored.get(*cursor..end) {
            Some(src) => {
                out.copy_from_slice(src);
                *cursor = end;
                true
            }
            None => false,
        }
    }

    pub fn read_u8(&mut self) -> Option<u8> {
        let mut raw = [0u8; 1];
        self.read_bytes(&mut raw).then_some(raw[0])
    }

    pub fn read_u32(&mut self) -> Option<u32> {
        let mut raw = [0u8; 4];
        self.read_bytes(&mut raw).then(|| u32::from_le_bytes(raw))
    }

    pub fn finish_load(&mut self) {
        self.pass = Pass::Idle;
    }

    /// Start a save pass
    ///
    /// A dry run only measures the section to validate the stored layout.
    pub fn prepare_save(&mut self, dry_run: bool) {
        self.buffer.clear();
        self.pass = Pass::Save { dry_run };
    }

    /// Append bytes to the section being saved
    pub fn write_bytes(&mut self, data: &[u8]) -> bool {
        if !matches!(self.pass, Pass::Save { .. }) {
            return false;
        }
        self.buffer.extend_from_slice(data);
        true
    }

    pub fn write_u8(&mut self, value: u8) -> bool {
        self.write_bytes(&[value])
    }

    pub fn write_u32(&mut self, value: u32) -> bool {
        self.write_bytes(&value.to_le_bytes())
    }

    /// Complete a save pass
    ///
    /// Dry run: returns whether the stored section is valid and matches the
    /// measured size; a mismatch invalidates the stored state.
    ///
    /// Real pass: writes header and section when they differ from what is
    /// stored. Returns `false` if the medium rejected the write.
    pub fn finish_save(&mut self) -> bool {
        let Pass::Save { dry_run } = self.pass else {
            return false;
        };
        self.pass = Pass::Idle;

        if dry_run {
            if self.valid && self.buffer.len() != self.stored.len() {
                warn!(
                    "State layout changed ({} -> {} bytes), discarding stored state",
                    self.stored.len(),
                    self.buffer.len()
                );
                self.valid = false;
            }
            return self.valid;
        }

        let Some(medium) = self.medium.as_mut() else {
            return false;
        };
        if self.valid && self.buffer == self.stored {
            trace!("State unchanged");
            return true;
        }
        match write_section(&mut **medium, &self.buffer) {
            Ok(()) => {
                debug!("State saved ({} bytes)", self.buffer.len());
                core::mem::swap(&mut self.stored, &mut self.buffer);
                self.valid = true;
                true
            }
            Err(e) => {
                warn!("State save failed: {:?}", e);
                false
            }
        }
    }

    /// Invalidate the stored state
    pub fn erase(&mut self) -> bool {
        self.valid = false;
        self.stored.clear();
        let Some(medium) = self.medium.as_mut() else {
            return false;
        };
        let blank = [0xFFu8; HEADER_SIZE];
        medium
            .write(0, &blank)
            .and_then(|()| medium.commit())
            .is_ok()
    }

    /// Set the minimum interval between periodic saves
    pub fn set_save_period(&mut self, period_ms: u64) {
        self.save_period_ms = period_ms.max(MIN_SAVE_PERIOD_MS);
    }

    /// Check whether a periodic save may run now
    ///
    /// Returns `true` at most once per save period, and consumes the slot.
    pub fn save_state_allowed(&mut self, now_ms: u64) -> bool {
        if now_ms >= self.next_save_at {
            self.next_save_at = now_ms + self.save_period_ms + 1;
            return true;
        }
        false
    }

    /// Request a save no later than `delay_ms` from now
    ///
    /// Only ever moves the next save earlier.
    pub fn schedule_save(&mut self, delay_ms: u32, now_ms: u64) {
        let at = now_ms + delay_ms as u64;
        if at < self.next_save_at {
            self.next_save_at = at;
        }
    }
}

fn read_section(medium: &mut dyn StateMedium) -> Result<Vec<u8>, StorageError> {
    let mut header = [0u8; HEADER_SIZE];
    medium.read(0, &mut header)?;
    if header[0..4] != STATE_MAGIC {
        return Err(StorageError::NotFound);
    }
    if header[4] != STATE_VERSION {
        return Err(StorageError::Corrupted);
    }
    let size = u16::from_le_bytes([header[6], header[7]]) as usize;
    let crc = u32::from_le_bytes([header[8], header[9], header[10], header[11]]);
    if HEADER_SIZE + size > medium.capacity() {
        return Err(StorageError::Corrupted);
    }

    let mut section = alloc::vec![0u8; size];
    medium.read(HEADER_SIZE, &mut section)?;
    if crc32(&section) != crc {
        return Err(StorageError::Corrupted);
    }
    Ok(section)
}

fn write_section(medium: &mut dyn StateMedium, section: &[u8]) -> Result<(), StorageError> {
    let size = u16::try_from(section.len()).map_err(|_| StorageError::Full)?;
    if HEADER_SIZE + section.len() > medium.capacity() {
        return Err(StorageError::Full);
    }

    let mut header = [0u8; HEADER_SIZE];
    header[0..4].copy_from_slice(&STATE_MAGIC);
    header[4] = STATE_VERSION;
    header[6..8].copy_from_slice(&size.to_le_bytes());
    header[8..12].copy_from_slice(&crc32(section).to_le_bytes());

    // Section first so a torn write leaves a header that fails the CRC
    medium.write(HEADER_SIZE, section)?;
    medium.write(0, &header)?;
    medium.commit()
}

/// CRC-32 (IEEE) of a byte slice
fn crc32(data: &[u8]) -> u32 {
    const POLY: u32 = 0xEDB88320;
    let mut crc = 0xFFFF_FFFFu32;
    for &byte in data {
        crc ^= byte as u32;
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ POLY;
            } else {
                crc >>= 1;
            }
        }
    }
    !crc
}
