//! 应用配置和持久化
//!
//! 设备名称、内容提供者选择等设置的存储和读取。核心对这些设置一无
//! 所知：它们在构造会话时被折算成显式参数传入。

use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// 应用设置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    /// 设备名称（peripheral 广播的 local name）
    pub device_name: String,
    /// 内容提供者选择：true 循环播放配置的 payload，false 上报 uptime
    pub use_sequence: bool,
    /// peripheral 推送间隔（秒）
    pub tick_secs: u64,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            device_name: get_default_device_name(),
            use_sequence: true,
            tick_secs: 20,
        }
    }
}

impl AppSettings {
    /// 获取配置文件路径
    fn config_path() -> PathBuf {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("blueear");
        config_dir.join("settings.toml")
    }

    /// 加载设置（文件不存在则使用默认值）
    pub fn load() -> Self {
        let path = Self::config_path();
        if path.exists() {
            match fs::read_to_string(&path) {
                Ok(content) => match toml::from_str(&content) {
                    Ok(settings) => {
                        debug!("loaded settings from {:?}", path);
                        return settings;
                    }
                    Err(e) => {
                        warn!("failed to parse settings: {}, using defaults", e);
                    }
                },
                Err(e) => {
                    warn!("failed to read settings file: {}, using defaults", e);
                }
            }
        }
        Self::default()
    }

    /// 保存设置
    pub fn save(&self) -> anyhow::Result<()> {
        let path = Self::config_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(&path, content)?;
        debug!("saved settings to {:?}", path);
        Ok(())
    }
}

/// 获取默认设备名称（主机名）
fn get_default_device_name() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "blueear".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = AppSettings::default();
        assert!(settings.use_sequence);
        assert_eq!(settings.tick_secs, 20);
        assert!(!settings.device_name.is_empty());
    }

    #[test]
    fn test_settings_toml_roundtrip() {
        let settings = AppSettings {
            device_name: "test-host".to_string(),
            use_sequence: false,
            tick_secs: 5,
        };
        let content = toml::to_string_pretty(&settings).unwrap();
        let parsed: AppSettings = toml::from_str(&content).unwrap();
        assert_eq!(parsed.device_name, "test-host");
        assert!(!parsed.use_sequence);
        assert_eq!(parsed.tick_secs, 5);
    }
}
