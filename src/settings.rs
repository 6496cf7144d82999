use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::probe::ProbeLevel;
use crate::protocol::{parse_hotwords, MessageProfile, RecognitionMode, ServerType};
use crate::transport::Endpoint;

const SETTINGS_DIR_NAME: &str = "funasr-compat";
const SETTINGS_FILE_NAME: &str = "settings.json";

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Could not determine config directory")]
    NoConfigDir,
    #[error("Failed to create config directory {path:?}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Serialize settings: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Write settings {path:?}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,

    /// Recognition mode for new sessions.
    pub mode: RecognitionMode,

    /// Raw hot-word text, one `phrase [weight]` per line.
    pub hotwords: String,

    pub itn: bool,

    /// Send `svs_lang`/`svs_itn` even when the server is not known to be modern.
    pub send_vendor_fields: bool,
    pub svs_lang: String,
    pub svs_itn: bool,

    /// Server family hint. Usually left on `auto` and filled in by a probe.
    pub server_type: ServerType,

    pub probe_level: ProbeLevel,

    /// Outer bound for one probe.
    pub probe_timeout_ms: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 10095,
            use_tls: false,
            mode: RecognitionMode::TwoPass,
            hotwords: String::new(),
            itn: true,
            send_vendor_fields: false,
            svs_lang: "auto".to_string(),
            svs_itn: true,
            server_type: ServerType::Auto,
            probe_level: ProbeLevel::OfflineLight,
            probe_timeout_ms: 8000,
        }
    }
}

impl ClientSettings {
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.host.clone(), self.port, self.use_tls)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Start-message profile for a new session
    pub fn message_profile(&self) -> MessageProfile {
        MessageProfile {
            server_type: self.server_type,
            itn: self.itn,
            hotwords: parse_hotwords(&self.hotwords),
            send_vendor_fields: self.send_vendor_fields,
            svs_lang: self.svs_lang.clone(),
            svs_itn: self.svs_itn,
            ..MessageProfile::for_mode(self.mode)
        }
    }

    /// Apply `FUNASR_HOST` / `FUNASR_PORT` when set.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(
            std::env::var("FUNASR_HOST").ok(),
            std::env::var("FUNASR_PORT").ok(),
        );
    }

    fn apply_overrides(&mut self, host: Option<String>, port: Option<String>) {
        if let Some(host) = host.filter(|h| !h.trim().is_empty()) {
            self.host = host.trim().to_string();
        }
        if let Some(port) = port {
            match port.trim().parse::<u16>() {
                Ok(port) => self.port = port,
                Err(e) => log::warn!("Settings: ignoring FUNASR_PORT={:?}: {}", port, e),
            }
        }
    }
}

pub fn default_settings_path() -> Result<PathBuf, SettingsError> {
    let dir = dirs::config_dir().ok_or(SettingsError::NoConfigDir)?;
    Ok(dir.join(SETTINGS_DIR_NAME).join(SETTINGS_FILE_NAME))
}

pub fn load_settings(path: &Path) -> ClientSettings {
    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str::<ClientSettings>(&contents) {
            Ok(settings) => settings,
            Err(e) => {
                log::warn!("Settings: failed to parse {:?}: {}", path, e);
                ClientSettings::default()
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => ClientSettings::default(),
        Err(e) => {
            log::warn!("Settings: failed to read {:?}: {}", path, e);
            ClientSettings::default()
        }
    }
}

pub fn save_settings(path: &Path, settings: &ClientSettings) -> Result<(), SettingsError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|source| SettingsError::CreateDir {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let contents = serde_json::to_string_pretty(settings)?;

    // Write to a temp file in the same directory, then rename over the target.
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, &contents).map_err(|source| SettingsError::Write {
        path: tmp_path.clone(),
        source,
    })?;

    // Windows rename fails if the destination exists.
    if cfg!(windows) && path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                return Err(SettingsError::Write {
                    path: path.to_path_buf(),
                    source: e,
                });
            }
        }
    }

    std::fs::rename(&tmp_path, path).map_err(|source| SettingsError::Write {
        path: path.to_path_buf(),
        source,
    })?;

    log::debug!("Settings: saved {:?}", path);
    Ok(())
}
