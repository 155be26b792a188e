use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_false")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "minutely", "never"
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            console_logging_enabled: default_true(),
            file_logging_enabled: default_false(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            rotation: default_rotation(),
            ansi_colors: default_true(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_prefix() -> String {
    "umbrella_link".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Service UUID the umbrella advertises.
    #[serde(default = "default_service_uuid")]
    pub ble_service_uuid: String,

    /// Overall deadline for one pairing attempt (scan plus handshake).
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default)]
    pub log_settings: LogSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ble_service_uuid: default_service_uuid(),
            connect_timeout_ms: default_connect_timeout_ms(),
            log_settings: LogSettings::default(),
        }
    }
}

fn default_service_uuid() -> String {
    "99f54e09-8916-4083-adce-bcd996e9510e".to_string()
}
fn default_connect_timeout_ms() -> u64 {
    5000
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        match Self::load_from_file(&settings_path) {
            Ok(settings) => Ok(Self {
                settings,
                settings_path,
            }),
            Err(_) => {
                // First run (or unreadable file): write the defaults out so
                // the user has a file to edit.
                let service = Self {
                    settings: Settings::default(),
                    settings_path,
                };
                service.save()?;
                Ok(service)
            }
        }
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("UmbrellaLink");
        fs::create_dir_all(&path)?;
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &PathBuf) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let s = Settings::default();
        assert_eq!(s.connect_timeout_ms, 5000);
        assert_eq!(
            s.ble_service_uuid,
            crate::infrastructure::bluetooth::protocol::SERVICE_UUID
        );
        assert_eq!(s.log_settings.level, "info");
    }

    #[test]
    fn test_save_then_load_round_trip() {
        let path = std::env::temp_dir().join("umbrella_link_settings_round_trip.json");
        let mut settings = Settings::default();
        settings.connect_timeout_ms = 777;
        let service = SettingsService {
            settings,
            settings_path: path.clone(),
        };
        service.save().unwrap();

        let loaded = SettingsService::load_from_file(&path).unwrap();
        assert_eq!(loaded.connect_timeout_ms, 777);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_partial_settings_fill_in_defaults() {
        let s: Settings = serde_json::from_str(r#"{"connect_timeout_ms": 1234}"#).unwrap();
        assert_eq!(s.connect_timeout_ms, 1234);
        assert_eq!(
            s.ble_service_uuid,
            crate::infrastructure::bluetooth::protocol::SERVICE_UUID
        );
        assert!(s.log_settings.console_logging_enabled);
    }
}
