//! Configuration key tags
//!
//! Device-level tags are used as keys directly; channel tags are prefixed
//! with the channel number (`<channel>_<tag>`).

// Device
pub const DEVICE_NAME: &str = "devicename";
pub const DEVICE_MODE: &str = "devicemode";
pub const GUID: &str = "guid";
pub const AUTH_KEY: &str = "authkey";
pub const DEVICE_CONFIG_CHANGE: &str = "devcfg_chng";
pub const SW_UPDATE_URL: &str = "swupdateurl";
pub const SW_UPDATE_BETA: &str = "swupdatebeta";

// Network and server
pub const WIFI_SSID: &str = "wifissid";
pub const WIFI_PASSWORD: &str = "wifipasswd";
pub const SERVER: &str = "server";
pub const EMAIL: &str = "email";
pub const CLOUD_PROTO_ENABLED: &str = "cloudproto";
pub const MQTT_PROTO_ENABLED: &str = "mqttproto";

// Channel
pub const CHANNEL_FUNCTION: &str = "fnc";
pub const CHANNEL_CONFIG_CHANGE: &str = "cfg_chng";
pub const MEASUREMENT_CONFIG: &str = "gpm_common";
