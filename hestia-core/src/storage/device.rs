//! Device-level configuration accessors

use alloc::string::String;

use super::config_store::ConfigStore;
use super::tags;
use crate::device::DeviceMode;

/// GUID and auth key size in bytes
pub const IDENTITY_SIZE: usize = 16;

impl ConfigStore {
    pub fn device_name(&mut self) -> Option<String> {
        self.get_string(tags::DEVICE_NAME)
    }

    pub fn set_device_name(&mut self, name: &str) -> bool {
        self.set_string(tags::DEVICE_NAME, name)
    }

    pub fn guid(&mut self) -> Option<[u8; IDENTITY_SIZE]> {
        let mut guid = [0u8; IDENTITY_SIZE];
        self.get_blob(tags::GUID, &mut guid).then_some(guid)
    }

    pub fn set_guid(&mut self, guid: &[u8; IDENTITY_SIZE]) -> bool {
        self.set_blob(tags::GUID, guid)
    }

    pub fn auth_key(&mut self) -> Option<[u8; IDENTITY_SIZE]> {
        let mut key = [0u8; IDENTITY_SIZE];
        self.get_blob(tags::AUTH_KEY, &mut key).then_some(key)
    }

    pub fn set_auth_key(&mut self, key: &[u8; IDENTITY_SIZE]) -> bool {
        self.set_blob(tags::AUTH_KEY, key)
    }

    /// Stored operating mode; unknown codes read as `None`
    pub fn device_mode(&mut self) -> Option<DeviceMode> {
        self.get_i32(tags::DEVICE_MODE).and_then(DeviceMode::from_i32)
    }

    pub fn set_device_mode(&mut self, mode: DeviceMode) -> bool {
        self.set_i32(tags::DEVICE_MODE, mode.as_i32())
    }

    pub fn sw_update_url(&mut self) -> Option<String> {
        self.get_string(tags::SW_UPDATE_URL)
    }

    pub fn set_sw_update_url(&mut self, url: &str) -> bool {
        self.set_string(tags::SW_UPDATE_URL, url)
    }

    pub fn is_sw_update_beta(&mut self) -> bool {
        self.get_u8(tags::SW_UPDATE_BETA).unwrap_or(0) != 0
    }

    pub fn set_sw_update_beta(&mut self, beta: bool) -> bool {
        self.set_u8(tags::SW_UPDATE_BETA, beta as u8)
    }

    pub fn wifi_ssid(&mut self) -> Option<String> {
        self.get_string(tags::WIFI_SSID)
    }

    pub fn set_wifi_ssid(&mut self, ssid: &str) -> bool {
        self.set_string(tags::WIFI_SSID, ssid)
    }

    pub fn wifi_password(&mut self) -> Option<String> {
        self.get_string(tags::WIFI_PASSWORD)
    }

    pub fn set_wifi_password(&mut self, password: &str) -> bool {
        self.set_string(tags::WIFI_PASSWORD, password)
    }

    pub fn server(&mut self) -> Option<String> {
        self.get_string(tags::SERVER)
    }

    pub fn set_server(&mut self, server: &str) -> bool {
        self.set_string(tags::SERVER, server)
    }

    pub fn email(&mut self) -> Option<String> {
        self.get_string(tags::EMAIL)
    }

    pub fn set_email(&mut self, email: &str) -> bool {
        self.set_string(tags::EMAIL, email)
    }

    /// Cloud protocol enabled; defaults to enabled
    pub fn is_cloud_protocol_enabled(&mut self) -> bool {
        self.get_u8(tags::CLOUD_PROTO_ENABLED).unwrap_or(1) != 0
    }

    pub fn set_cloud_protocol_enabled(&mut self, enabled: bool) -> bool {
        self.set_u8(tags::CLOUD_PROTO_ENABLED, enabled as u8)
    }

    /// MQTT protocol enabled; defaults to disabled
    pub fn is_mqtt_protocol_enabled(&mut self) -> bool {
        self.get_u8(tags::MQTT_PROTO_ENABLED).unwrap_or(0) != 0
    }

    pub fn set_mqtt_protocol_enabled(&mut self, enabled: bool) -> bool {
        self.set_u8(tags::MQTT_PROTO_ENABLED, enabled as u8)
    }

    /// Whether enough is configured to attempt a connection
    pub fn is_minimal_config_ready(&mut self) -> bool {
        let filled = |value: Option<String>| value.is_some_and(|v| !v.is_empty());
        filled(self.wifi_ssid())
            && filled(self.wifi_password())
            && filled(self.server())
            && filled(self.email())
    }

    /// Erase all configuration except the device identity
    pub fn reset_to_factory(&mut self) -> bool {
        let guid = self.guid();
        let auth_key = self.auth_key();
        if !self.remove_all() {
            return false;
        }
        if let Some(guid) = guid {
            self.set_guid(&guid);
        }
        if let Some(key) = auth_key {
            self.set_auth_key(&key);
        }
        self.commit()
    }
}
