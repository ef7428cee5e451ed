//! Typed configuration store
//!
//! Values live in a RAM cache in front of a [`KvBackend`]. The first read of
//! a key goes to the backend; setters only update the cache and mark the
//! entry dirty; [`ConfigStore::commit`] writes dirty entries back and asks
//! the backend to make them durable.
//!
//! Accessors never fail loudly: a missing key, a type mismatch or an
//! unavailable backend reads as `None` and writes as `false`. Callers fall
//! back to their compiled defaults.
//!
//! Commits are usually requested with [`ConfigStore::save_with_delay`] and
//! performed by [`ConfigStore::save_if_needed`], which the runtime polls on
//! every tick. A burst of changes therefore costs one flash write.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;

use hestia_hal::{ConfigKey, KvBackend, StorageError};
use hestia_protocol::ConfigType;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::tags;

/// Maximum encoded size of a single value
pub const MAX_VALUE_SIZE: usize = 512;

/// Delay before a raised device config change flag becomes ready to send
pub const DEVICE_CONFIG_CHANGE_DELAY_MS: u64 = 1000;

/// A typed configuration value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoredValue {
    Str(String),
    Blob(Vec<u8>),
    I8(i8),
    U8(u8),
    I32(i32),
    U32(u32),
}

/// Anything that names a configuration key
///
/// `"guid"` is a device-level key, `(3, "fnc")` is the channel key `3_fnc`.
pub trait IntoConfigKey {
    fn into_config_key(self) -> Result<ConfigKey, StorageError>;
}

impl IntoConfigKey for &str {
    fn into_config_key(self) -> Result<ConfigKey, StorageError> {
        ConfigKey::new(self)
    }
}

impl IntoConfigKey for (u8, &str) {
    fn into_config_key(self) -> Result<ConfigKey, StorageError> {
        ConfigKey::channel(self.0, self.1)
    }
}

impl IntoConfigKey for &ConfigKey {
    fn into_config_key(self) -> Result<ConfigKey, StorageError> {
        Ok(self.clone())
    }
}

impl IntoConfigKey for ConfigKey {
    fn into_config_key(self) -> Result<ConfigKey, StorageError> {
        Ok(self)
    }
}

/// Cached state of one key
#[derive(Debug, Clone, PartialEq, Eq)]
enum Slot {
    /// Known to be missing from the backend
    Absent,
    /// Same as the backend
    Clean(StoredValue),
    /// Changed since the last commit
    Dirty(StoredValue),
    /// Erased since the last commit
    Removed,
}

impl Slot {
    fn value(&self) -> Option<&StoredValue> {
        match self {
            Slot::Clean(value) | Slot::Dirty(value) => Some(value),
            Slot::Absent | Slot::Removed => None,
        }
    }

    fn mark_clean(&mut self) {
        *self = match core::mem::replace(self, Slot::Absent) {
            Slot::Dirty(value) => Slot::Clean(value),
            Slot::Removed => Slot::Absent,
            other => other,
        };
    }
}

/// Device-wide "configuration changed" marker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DeviceConfigChange {
    /// Nothing to report
    Clear,
    /// Raised, still collecting related changes
    Pending,
    /// Ready to be reported to the server
    ReadyToSend,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingSave {
    requested_at: u64,
    delay_ms: u64,
}

/// Typed key/value configuration service
pub struct ConfigStore {
    backend: Option<Box<dyn KvBackend>>,
    cache: BTreeMap<ConfigKey, Slot>,
    pending_save: Option<PendingSave>,
    /// `None` until first read from storage
    device_change: Option<DeviceConfigChange>,
    device_change_raised_at: Option<u64>,
}

impl ConfigStore {
    /// Create a store over a backend
    pub fn new(backend: Box<dyn KvBackend>) -> Self {
        Self {
            backend: Some(backend),
            cache: BTreeMap::new(),
            pending_save: None,
            device_change: None,
            device_change_raised_at: None,
        }
    }

    /// Create a store without a backend; every accessor is a no-op
    pub fn unavailable() -> Self {
        Self {
            backend: None,
            cache: BTreeMap::new(),
            pending_save: None,
            device_change: None,
            device_change_raised_at: None,
        }
    }

    /// Check whether a backend is attached and usable
    pub fn is_available(&self) -> bool {
        self.backend.is_some()
    }

    /// Initialize the backend
    ///
    /// A backend that fails to initialize is dropped and the store behaves
    /// as [`ConfigStore::unavailable`].
    pub fn init(&mut self) -> bool {
        let Some(backend) = self.backend.as_mut() else {
            warn!("Config storage not available");
            return false;
        };
        match backend.init() {
            Ok(()) => {
                info!("Config storage ready");
                true
            }
            Err(e) => {
                warn!("Config storage init failed: {:?}", e);
                self.backend = None;
                false
            }
        }
    }

    fn lookup(&mut self, key: impl IntoConfigKey) -> Option<&StoredValue> {
        let key = key.into_config_key().ok()?;
        let backend = self.backend.as_mut()?;
        let slot = self
            .cache
            .entry(key)
            .or_insert_with_key(|key| read_value(&mut **backend, key));
        slot.value()
    }

    fn store(&mut self, key: impl IntoConfigKey, value: StoredValue) -> bool {
        if self.backend.is_none() {
            return false;
        }
        let key = match key.into_config_key() {
            Ok(key) => key,
            Err(e) => {
                warn!("Config key rejected: {:?}", e);
                return false;
            }
        };
        if let Some(current) = self.cache.get(&key).and_then(Slot::value) {
            if *current == value {
                return true;
            }
        }
        self.cache.insert(key, Slot::Dirty(value));
        true
    }

    /// Check whether a key holds a value of any type
    pub fn contains(&mut self, key: impl IntoConfigKey) -> bool {
        self.lookup(key).is_some()
    }

    pub fn get_string(&mut self, key: impl IntoConfigKey) -> Option<String> {
        match self.lookup(key)? {
            StoredValue::Str(text) => Some(text.clone()),
            _ => None,
        }
    }

    /// Read a fixed-size blob
    ///
    /// Succeeds only when the stored blob has exactly `out.len()` bytes.
    pub fn get_blob(&mut self, key: impl IntoConfigKey, out: &mut [u8]) -> bool {
        match self.lookup(key) {
            Some(StoredValue::Blob(data)) if data.len() == out.len() => {
                out.copy_from_slice(data);
                true
            }
            _ => false,
        }
    }

    pub fn get_i8(&mut self, key: impl IntoConfigKey) -> Option<i8> {
        match self.lookup(key)? {
            StoredValue::I8(v) => Some(*v),
            _ => None,
        }
    }

    pub fn get_u8(&mut self, key: impl IntoConfigKey) -> Option<u8> {
        match self.lookup(key)? {
            StoredValue::U8(v) => Some(*v),
            _ => None,
        }
    }

    pub fn get_i32(&mut self, key: impl IntoConfigKey) -> Option<i32> {
        match self.lookup(key)? {
            StoredValue::I32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn get_u32(&mut self, key: impl IntoConfigKey) -> Option<u32> {
        match self.lookup(key)? {
            StoredValue::U32(v) => Some(*v),
            _ => None,
        }
    }

    /// Read a structured value stored with [`ConfigStore::set_value`]
    pub fn get_value<T: DeserializeOwned>(&mut self, key: impl IntoConfigKey) -> Option<T> {
        match self.lookup(key)? {
            StoredValue::Blob(data) => postcard::from_bytes(data).ok(),
            _ => None,
        }
    }

    pub fn set_string(&mut self, key: impl IntoConfigKey, value: &str) -> bool {
        if value.len() > MAX_VALUE_SIZE - 8 {
            warn!("Config string too large: {} bytes", value.len());
            return false;
        }
        self.store(key, StoredValue::Str(String::from(value)))
    }

    pub fn set_blob(&mut self, key: impl IntoConfigKey, data: &[u8]) -> bool {
        if data.len() > MAX_VALUE_SIZE - 8 {
            warn!("Config blob too large: {} bytes", data.len());
            return false;
        }
        self.store(key, StoredValue::Blob(Vec::from(data)))
    }

    pub fn set_i8(&mut self, key: impl IntoConfigKey, value: i8) -> bool {
        self.store(key, StoredValue::I8(value))
    }

    pub fn set_u8(&mut self, key: impl IntoConfigKey, value: u8) -> bool {
        self.store(key, StoredValue::U8(value))
    }

    pub fn set_i32(&mut self, key: impl IntoConfigKey, value: i32) -> bool {
        self.store(key, StoredValue::I32(value))
    }

    pub fn set_u32(&mut self, key: impl IntoConfigKey, value: u32) -> bool {
        self.store(key, StoredValue::U32(value))
    }

    /// Store a structured value as a postcard-encoded blob
    pub fn set_value<T: Serialize>(&mut self, key: impl IntoConfigKey, value: &T) -> bool {
        match postcard::to_allocvec(value) {
            Ok(data) => self.set_blob(key, &data),
            Err(_) => false,
        }
    }

    /// Erase a single key at the next commit
    pub fn erase_key(&mut self, key: impl IntoConfigKey) -> bool {
        if self.backend.is_none() {
            return false;
        }
        match key.into_config_key() {
            Ok(key) => {
                self.cache.insert(key, Slot::Removed);
                true
            }
            Err(_) => false,
        }
    }

    /// Erase all keys immediately
    pub fn remove_all(&mut self) -> bool {
        let Some(backend) = self.backend.as_mut() else {
            return false;
        };
        self.cache.clear();
        self.pending_save = None;
        self.device_change = None;
        self.device_change_raised_at = None;
        match backend.erase_all().and_then(|()| backend.commit()) {
            Ok(()) => {
                info!("Config storage erased");
                true
            }
            Err(e) => {
                warn!("Config erase failed: {:?}", e);
                false
            }
        }
    }

    /// Write all changed entries to the backend
    pub fn commit(&mut self) -> bool {
        self.pending_save = None;
        let Some(backend) = self.backend.as_mut() else {
            return false;
        };

        let mut ok = true;
        let mut written = Vec::new();
        for (key, slot) in self.cache.iter() {
            let result = match slot {
                Slot::Dirty(value) => write_value(&mut **backend, key, value),
                Slot::Removed => backend.remove(key),
                Slot::Absent | Slot::Clean(_) => continue,
            };
            match result {
                Ok(()) => written.push(key.clone()),
                Err(e) => {
                    warn!("Failed to persist {}: {:?}", key.as_str(), e);
                    ok = false;
                }
            }
        }

        // Entries stay dirty until the backend confirms the commit
        if let Err(e) = backend.commit() {
            warn!("Config commit failed: {:?}", e);
            return false;
        }
        for key in &written {
            if let Some(slot) = self.cache.get_mut(key) {
                slot.mark_clean();
            }
        }
        debug!("Config committed ({} entries)", written.len());
        ok
    }

    /// Request a commit after `delay_ms`
    ///
    /// If a commit is already scheduled, the earlier request stands.
    pub fn save_with_delay(&mut self, delay_ms: u32, now_ms: u64) {
        if self.pending_save.is_none() {
            self.pending_save = Some(PendingSave {
                requested_at: now_ms,
                delay_ms: delay_ms as u64,
            });
        }
    }

    /// Check whether a delayed commit is scheduled
    pub fn is_save_pending(&self) -> bool {
        self.pending_save.is_some()
    }

    /// Perform a scheduled commit once its delay has elapsed
    ///
    /// Also promotes the device config change flag from pending to
    /// ready-to-send one second after it was raised. Returns `true` when a
    /// commit succeeded. A failed commit is retried after the same delay.
    pub fn save_if_needed(&mut self, now_ms: u64) -> bool {
        let mut committed = false;
        if let Some(pending) = self.pending_save {
            if now_ms.saturating_sub(pending.requested_at) > pending.delay_ms {
                committed = self.commit();
                if !committed && self.backend.is_some() {
                    self.pending_save = Some(PendingSave {
                        requested_at: now_ms,
                        delay_ms: pending.delay_ms,
                    });
                }
            }
        }

        if let Some(raised_at) = self.device_change_raised_at {
            if now_ms.saturating_sub(raised_at) > DEVICE_CONFIG_CHANGE_DELAY_MS {
                if self.device_change == Some(DeviceConfigChange::Pending) {
                    self.device_change = Some(DeviceConfigChange::ReadyToSend);
                }
                self.device_change_raised_at = None;
            }
        }
        committed
    }

    fn device_config_change(&mut self) -> DeviceConfigChange {
        if let Some(state) = self.device_change {
            return state;
        }
        // A flag left pending by the previous boot is ready immediately
        let state = match self.get_u8(tags::DEVICE_CONFIG_CHANGE).unwrap_or(0) {
            0 => DeviceConfigChange::Clear,
            _ => DeviceConfigChange::ReadyToSend,
        };
        self.device_change = Some(state);
        state
    }

    pub fn is_device_config_change_flag_set(&mut self) -> bool {
        self.device_config_change() != DeviceConfigChange::Clear
    }

    pub fn is_device_config_change_ready_to_send(&mut self) -> bool {
        self.device_config_change() == DeviceConfigChange::ReadyToSend
    }

    pub fn set_device_config_change_flag(&mut self, now_ms: u64) -> bool {
        self.device_change_raised_at = Some(now_ms);
        self.device_change = Some(DeviceConfigChange::Pending);
        self.set_u8(tags::DEVICE_CONFIG_CHANGE, 1)
    }

    /// Clear the device config change flag after it was reported
    ///
    /// A flag that is still pending is left untouched.
    pub fn clear_device_config_change_flag(&mut self) -> bool {
        if self.device_config_change() == DeviceConfigChange::ReadyToSend {
            self.device_change_raised_at = None;
            self.device_change = Some(DeviceConfigChange::Clear);
            return self.set_u8(tags::DEVICE_CONFIG_CHANGE, 0);
        }
        true
    }

    fn channel_change_flags(&mut self, channel: u8) -> u8 {
        self.get_u8((channel, tags::CHANNEL_CONFIG_CHANGE))
            .unwrap_or(0)
    }

    pub fn set_channel_config_change_flag(&mut self, channel: u8, config_type: ConfigType) -> bool {
        let flags = self.channel_change_flags(channel) | config_type.flag_bit();
        self.set_u8((channel, tags::CHANNEL_CONFIG_CHANGE), flags)
    }

    pub fn clear_channel_config_change_flag(&mut self, channel: u8, config_type: ConfigType) -> bool {
        let flags = self.channel_change_flags(channel) & !config_type.flag_bit();
        self.set_u8((channel, tags::CHANNEL_CONFIG_CHANGE), flags)
    }

    pub fn is_channel_config_change_flag_set(&mut self, channel: u8, config_type: ConfigType) -> bool {
        self.channel_change_flags(channel) & config_type.flag_bit() != 0
    }
}

fn read_value(backend: &mut dyn KvBackend, key: &ConfigKey) -> Slot {
    let mut buffer = [0u8; MAX_VALUE_SIZE];
    match backend.read(key, &mut buffer) {
        Ok(len) => match postcard::from_bytes::<StoredValue>(&buffer[..len]) {
            Ok(value) => Slot::Clean(value),
            Err(_) => {
                warn!("Config value {} is corrupted", key.as_str());
                Slot::Absent
            }
        },
        Err(StorageError::NotFound) => Slot::Absent,
        Err(e) => {
            warn!("Failed to read {}: {:?}", key.as_str(), e);
            Slot::Absent
        }
    }
}

fn write_value(
    backend: &mut dyn KvBackend,
    key: &ConfigKey,
    value: &StoredValue,
) -> Result<(), StorageError> {
    let data = postcard::to_allocvec(value).map_err(|_| StorageError::Corrupted)?;
    backend.write(key, &data)
}
