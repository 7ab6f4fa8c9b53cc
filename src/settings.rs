//! Persistent settings (spec §3, §6).
//!
//! Stored as flat `key=value` lines, one setting per line. Every numeric
//! setting is range-clamped both when loaded from storage (a corrupt or
//! hand-edited file must never produce an out-of-range value in memory)
//! and when updated at runtime (the command dispatcher rejects
//! out-of-range writes with `OutOfRange`, but clamps defensively anyway
//! since a future caller may not go through the dispatcher). Unknown keys
//! are silently ignored on load (spec §6); unset fields restore to
//! default.

use crate::error::SettingsError;

macro_rules! clamp_field {
    ($val:expr, $lo:expr, $hi:expr) => {
        if $val < $lo {
            $lo
        } else if $val > $hi {
            $hi
        } else {
            $val
        }
    };
}

/// Valid range for each clamped field, named so `parse`/updates agree on
/// the same bounds instead of duplicating magic numbers. Ranges are taken
/// verbatim from the documented key table.
pub mod ranges {
    pub const SCANNER_RSSI: (i16, i16) = (-120, -10);
    pub const BRUTER_POWER: (u8, u8) = (0, 7);
    pub const BRUTER_DELAY: (u16, u16) = (1, 1000);
    pub const BRUTER_REPEATS: (u8, u8) = (1, 10);
    pub const RADIO_POWER: (i8, i8) = (-30, 10);
    pub const BUTTON_ACTION: (u8, u8) = (0, 6);
    pub const BUTTON_PATH_TYPE: (u8, u8) = (0, 5);
    pub const NRF_PA_LEVEL: (u8, u8) = (0, 3);
    pub const NRF_DATA_RATE: (u8, u8) = (0, 2);
    pub const NRF_CHANNEL: (u8, u8) = (0, 125);
    pub const NRF_AUTO_RETRANSMIT: (u8, u8) = (0, 15);
    pub const CPU_TEMP_OFFSET_DECIC: (i16, i16) = (-500, 500);
    pub const DEVICE_NAME_MAX_LEN: usize = 20;
}

/// Button action + optional replay-file binding (spec §3: "button action
/// bindings with optional replay-file path+kind").
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ButtonBinding {
    pub action: u8,
    pub signal_path_type: u8,
    pub signal_path: String,
}

/// Mirrors the full tunable set spec §6 enumerates under the
/// `SettingsUpdate` command and `SettingsSync` notification.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistentSettings {
    pub serial_baud_rate: u32,
    pub scanner_rssi: i16,
    pub bruter_power: u8,
    pub bruter_delay: u16,
    pub bruter_repeats: u8,
    pub radio_power_mod1: i8,
    pub radio_power_mod2: i8,
    pub button1: ButtonBinding,
    pub button2: ButtonBinding,
    pub nrf_pa_level: u8,
    pub nrf_data_rate: u8,
    pub nrf_channel: u8,
    pub nrf_auto_retransmit: u8,
    pub cpu_temp_offset_decic: i16,
    pub device_name: String,
}

impl Default for PersistentSettings {
    fn default() -> Self {
        PersistentSettings {
            serial_baud_rate: 115_200,
            scanner_rssi: -80,
            bruter_power: 7,
            bruter_delay: 100,
            bruter_repeats: 1,
            radio_power_mod1: 10,
            radio_power_mod2: 10,
            button1: ButtonBinding::default(),
            button2: ButtonBinding::default(),
            nrf_pa_level: 3,
            nrf_data_rate: 0,
            nrf_channel: 76,
            nrf_auto_retransmit: 3,
            cpu_temp_offset_decic: 0,
            device_name: "RFTool".to_string(),
        }
    }
}

impl PersistentSettings {
    fn clamp(&mut self) {
        self.scanner_rssi = clamp_field!(self.scanner_rssi, ranges::SCANNER_RSSI.0, ranges::SCANNER_RSSI.1);
        self.bruter_power = clamp_field!(self.bruter_power, ranges::BRUTER_POWER.0, ranges::BRUTER_POWER.1);
        self.bruter_delay = clamp_field!(self.bruter_delay, ranges::BRUTER_DELAY.0, ranges::BRUTER_DELAY.1);
        self.bruter_repeats =
            clamp_field!(self.bruter_repeats, ranges::BRUTER_REPEATS.0, ranges::BRUTER_REPEATS.1);
        self.radio_power_mod1 = clamp_field!(self.radio_power_mod1, ranges::RADIO_POWER.0, ranges::RADIO_POWER.1);
        self.radio_power_mod2 = clamp_field!(self.radio_power_mod2, ranges::RADIO_POWER.0, ranges::RADIO_POWER.1);
        self.button1.action = clamp_field!(self.button1.action, ranges::BUTTON_ACTION.0, ranges::BUTTON_ACTION.1);
        self.button2.action = clamp_field!(self.button2.action, ranges::BUTTON_ACTION.0, ranges::BUTTON_ACTION.1);
        self.button1.signal_path_type =
            clamp_field!(self.button1.signal_path_type, ranges::BUTTON_PATH_TYPE.0, ranges::BUTTON_PATH_TYPE.1);
        self.button2.signal_path_type =
            clamp_field!(self.button2.signal_path_type, ranges::BUTTON_PATH_TYPE.0, ranges::BUTTON_PATH_TYPE.1);
        self.nrf_pa_level = clamp_field!(self.nrf_pa_level, ranges::NRF_PA_LEVEL.0, ranges::NRF_PA_LEVEL.1);
        self.nrf_data_rate = clamp_field!(self.nrf_data_rate, ranges::NRF_DATA_RATE.0, ranges::NRF_DATA_RATE.1);
        self.nrf_channel = clamp_field!(self.nrf_channel, ranges::NRF_CHANNEL.0, ranges::NRF_CHANNEL.1);
        self.nrf_auto_retransmit =
            clamp_field!(self.nrf_auto_retransmit, ranges::NRF_AUTO_RETRANSMIT.0, ranges::NRF_AUTO_RETRANSMIT.1);
        self.cpu_temp_offset_decic = clamp_field!(
            self.cpu_temp_offset_decic,
            ranges::CPU_TEMP_OFFSET_DECIC.0,
            ranges::CPU_TEMP_OFFSET_DECIC.1
        );
        if self.device_name.chars().count() > ranges::DEVICE_NAME_MAX_LEN {
            self.device_name = self.device_name.chars().take(ranges::DEVICE_NAME_MAX_LEN).collect();
        }
    }

    /// Parses `key=value` lines, ignoring blank lines and `#`-prefixed
    /// comments, then clamps the result. Unknown keys and unparsable
    /// values are skipped with a log line rather than failing the whole
    /// load — a single corrupt line must not lose every other setting.
    pub fn parse(text: &str) -> Self {
        let mut s = PersistentSettings::default();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                crate::log::warn!("settings: malformed line {:?}", line);
                continue;
            };
            let key = key.trim();
            let value = value.trim();
            let ok = match key {
                "serial_baud_rate" => value.parse().map(|v| s.serial_baud_rate = v).is_ok(),
                "scanner_rssi" => value.parse().map(|v| s.scanner_rssi = v).is_ok(),
                "bruter_power" => value.parse().map(|v| s.bruter_power = v).is_ok(),
                "bruter_delay" => value.parse().map(|v| s.bruter_delay = v).is_ok(),
                "bruter_repeats" => value.parse().map(|v| s.bruter_repeats = v).is_ok(),
                "radio_power_mod1" => value.parse().map(|v| s.radio_power_mod1 = v).is_ok(),
                "radio_power_mod2" => value.parse().map(|v| s.radio_power_mod2 = v).is_ok(),
                "button1_action" => value.parse().map(|v| s.button1.action = v).is_ok(),
                "button2_action" => value.parse().map(|v| s.button2.action = v).is_ok(),
                "button1_signal_path_type" => value.parse().map(|v| s.button1.signal_path_type = v).is_ok(),
                "button2_signal_path_type" => value.parse().map(|v| s.button2.signal_path_type = v).is_ok(),
                "button1_signal_path" => {
                    s.button1.signal_path = value.to_string();
                    true
                }
                "button2_signal_path" => {
                    s.button2.signal_path = value.to_string();
                    true
                }
                "nrf_pa_level" => value.parse().map(|v| s.nrf_pa_level = v).is_ok(),
                "nrf_data_rate" => value.parse().map(|v| s.nrf_data_rate = v).is_ok(),
                "nrf_channel" => value.parse().map(|v| s.nrf_channel = v).is_ok(),
                "nrf_auto_retransmit" => value.parse().map(|v| s.nrf_auto_retransmit = v).is_ok(),
                "cpu_temp_offset_decic" => value.parse().map(|v| s.cpu_temp_offset_decic = v).is_ok(),
                "device_name" => {
                    s.device_name = value.to_string();
                    true
                }
                _ => {
                    crate::log::warn!("settings: unknown key {:?}", key);
                    true
                }
            };
            if !ok {
                crate::log::warn!("settings: could not parse value for {:?}: {:?}", key, value);
            }
        }
        s.clamp();
        s
    }

    /// Serializes back to the same line-oriented format `parse` reads.
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("serial_baud_rate={}\n", self.serial_baud_rate));
        out.push_str(&format!("scanner_rssi={}\n", self.scanner_rssi));
        out.push_str(&format!("bruter_power={}\n", self.bruter_power));
        out.push_str(&format!("bruter_delay={}\n", self.bruter_delay));
        out.push_str(&format!("bruter_repeats={}\n", self.bruter_repeats));
        out.push_str(&format!("radio_power_mod1={}\n", self.radio_power_mod1));
        out.push_str(&format!("radio_power_mod2={}\n", self.radio_power_mod2));
        out.push_str(&format!("button1_action={}\n", self.button1.action));
        out.push_str(&format!("button2_action={}\n", self.button2.action));
        out.push_str(&format!("button1_signal_path_type={}\n", self.button1.signal_path_type));
        out.push_str(&format!("button2_signal_path_type={}\n", self.button2.signal_path_type));
        out.push_str(&format!("button1_signal_path={}\n", self.button1.signal_path));
        out.push_str(&format!("button2_signal_path={}\n", self.button2.signal_path));
        out.push_str(&format!("nrf_pa_level={}\n", self.nrf_pa_level));
        out.push_str(&format!("nrf_data_rate={}\n", self.nrf_data_rate));
        out.push_str(&format!("nrf_channel={}\n", self.nrf_channel));
        out.push_str(&format!("nrf_auto_retransmit={}\n", self.nrf_auto_retransmit));
        out.push_str(&format!("cpu_temp_offset_decic={}\n", self.cpu_temp_offset_decic));
        out.push_str(&format!("device_name={}\n", self.device_name));
        out
    }
}

/// Abstraction over wherever the settings file actually lives, so tests
/// can swap in an in-memory backend instead of real storage.
pub trait SettingsStore: Send + Sync {
    fn read(&self) -> Result<Option<String>, SettingsError>;
    fn write(&self, contents: &str) -> Result<(), SettingsError>;
}

/// Production [`SettingsStore`] backed by a [`crate::storage::StorageBackend`]
/// file, e.g. one path under `InternalFlash` (spec §4.1). A missing file
/// reads back as `Ok(None)` rather than an error, matching first-boot.
pub struct StorageSettingsStore {
    storage: std::sync::Arc<dyn crate::storage::StorageBackend>,
    path: String,
}

impl StorageSettingsStore {
    pub fn new(storage: std::sync::Arc<dyn crate::storage::StorageBackend>, path: impl Into<String>) -> Self {
        StorageSettingsStore { storage, path: path.into() }
    }
}

impl SettingsStore for StorageSettingsStore {
    fn read(&self) -> Result<Option<String>, SettingsError> {
        if !self.storage.exists(&self.path) {
            return Ok(None);
        }
        let bytes = self
            .storage
            .read(&self.path)
            .map_err(|e| SettingsError::Storage(e.to_string()))?;
        String::from_utf8(bytes)
            .map(Some)
            .map_err(|e| SettingsError::Storage(e.to_string()))
    }

    fn write(&self, contents: &str) -> Result<(), SettingsError> {
        self.storage
            .write(&self.path, contents.as_bytes())
            .map_err(|e| SettingsError::Storage(e.to_string()))
    }
}

/// Loads settings from `store`, falling back to defaults if nothing has
/// been saved yet or the read fails.
pub fn load(store: &dyn SettingsStore) -> PersistentSettings {
    match store.read() {
        Ok(Some(text)) => PersistentSettings::parse(&text),
        Ok(None) => PersistentSettings::default(),
        Err(e) => {
            crate::log::warn!("settings: failed to read store, using defaults: {}", e);
            PersistentSettings::default()
        }
    }
}

/// Persists `settings` back to `store`.
pub fn save(store: &dyn SettingsStore, settings: &PersistentSettings) -> Result<(), SettingsError> {
    store.write(&settings.serialize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct MemStore(Mutex<Option<String>>);

    impl SettingsStore for MemStore {
        fn read(&self) -> Result<Option<String>, SettingsError> {
            Ok(self.0.lock().unwrap().clone())
        }
        fn write(&self, contents: &str) -> Result<(), SettingsError> {
            *self.0.lock().unwrap() = Some(contents.to_string());
            Ok(())
        }
    }

    #[test]
    fn storage_settings_store_round_trips_through_a_mem_backend() {
        let backend: std::sync::Arc<dyn crate::storage::StorageBackend> =
            std::sync::Arc::new(crate::storage::MemBackend::new());
        let store = StorageSettingsStore::new(backend, "settings.txt");
        assert_eq!(store.read().unwrap(), None);
        let mut settings = PersistentSettings::default();
        settings.device_name = "rig-7".to_string();
        save(&store, &settings).unwrap();
        let loaded = load(&store);
        assert_eq!(loaded.device_name, "rig-7");
    }

    #[test]
    fn missing_file_yields_defaults() {
        let store = MemStore(Mutex::new(None));
        let s = load(&store);
        assert_eq!(s, PersistentSettings::default());
    }

    #[test]
    fn out_of_range_values_are_clamped_on_load() {
        let text = "scanner_rssi=-999\nbruter_power=255\n";
        let s = PersistentSettings::parse(text);
        assert_eq!(s.scanner_rssi, ranges::SCANNER_RSSI.0);
        assert_eq!(s.bruter_power, ranges::BRUTER_POWER.1);
    }

    #[test]
    fn unknown_key_is_ignored_without_losing_other_settings() {
        let text = "scanner_rssi=-90\nfrobnicate=true\nbruter_repeats=3\n";
        let s = PersistentSettings::parse(text);
        assert_eq!(s.scanner_rssi, -90);
        assert_eq!(s.bruter_repeats, 3);
    }

    #[test]
    fn round_trip_through_serialize_and_parse() {
        let mut s = PersistentSettings::default();
        s.scanner_rssi = -55;
        s.device_name = "Foo".to_string();
        s.button1.signal_path = "/DATA/SIGNALS/a.sub".to_string();
        let text = s.serialize();
        let parsed = PersistentSettings::parse(&text);
        assert_eq!(parsed, s);
    }

    #[test]
    fn save_then_load_round_trips_through_store() {
        let store = MemStore(Mutex::new(None));
        let mut s = PersistentSettings::default();
        s.bruter_delay = 777;
        save(&store, &s).unwrap();
        let loaded = load(&store);
        assert_eq!(loaded, s);
    }

    #[test]
    fn device_name_over_max_len_is_truncated() {
        let long = "x".repeat(50);
        let text = format!("device_name={}\n", long);
        let s = PersistentSettings::parse(&text);
        assert_eq!(s.device_name.len(), ranges::DEVICE_NAME_MAX_LEN);
    }

    #[test]
    fn device_name_truncation_does_not_split_a_multibyte_char() {
        let long = "\u{00e9}".repeat(50);
        let text = format!("device_name={}\n", long);
        let s = PersistentSettings::parse(&text);
        assert_eq!(s.device_name.chars().count(), ranges::DEVICE_NAME_MAX_LEN);
    }

    #[test]
    fn nrf_channel_clamped_to_documented_max() {
        let text = "nrf_channel=200\n";
        let s = PersistentSettings::parse(text);
        assert_eq!(s.nrf_channel, ranges::NRF_CHANNEL.1);
    }
}
