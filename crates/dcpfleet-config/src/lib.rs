pub mod error;
pub mod settings;

pub use error::*;
pub use settings::{
    OrchestratorSettings, ProvidersSettings, ReconcilerSettings, Settings, VultrSettings,
};

use std::path::PathBuf;

/// 設定ファイルのパスを直接指定する環境変数
pub const CONFIG_ENV: &str = "DCPFLEET_CONFIG";

const CANDIDATES: [&str; 2] = ["dcpfleet.yaml", ".dcpfleet.yaml"];

/// DCPFleetのグローバル設定ディレクトリを取得
pub fn get_config_dir() -> Result<PathBuf> {
    Ok(dirs::config_dir()
        .ok_or(ConfigError::ConfigDirNotFound)?
        .join("dcpfleet"))
}

/// dcpfleet.yaml を探す
///
/// 以下の優先順位で設定ファイルを検索:
/// 1. 環境変数 DCPFLEET_CONFIG (直接パス指定、存在しなければエラー)
/// 2. カレントディレクトリ: dcpfleet.yaml, .dcpfleet.yaml
/// 3. ./.dcpfleet/config.yaml
/// 4. ~/.config/dcpfleet/config.yaml (グローバル設定)
///
/// どれも見つからなければ `None` (デフォルト設定で動作)
pub fn find_config_file() -> Result<Option<PathBuf>> {
    // 1. 環境変数で直接指定
    if let Ok(config_path) = std::env::var(CONFIG_ENV)
        && !config_path.is_empty()
    {
        let path = PathBuf::from(config_path);
        if path.exists() {
            return Ok(Some(path));
        }
        return Err(ConfigError::ExplicitPathNotFound(path));
    }

    let current_dir = std::env::current_dir()?;

    // 2. カレントディレクトリで検索
    for filename in &CANDIDATES {
        let path = current_dir.join(filename);
        if path.exists() {
            return Ok(Some(path));
        }
    }

    // 3. ./.dcpfleet/config.yaml
    let project_config = current_dir.join(".dcpfleet").join("config.yaml");
    if project_config.exists() {
        return Ok(Some(project_config));
    }

    // 4. グローバル設定ファイル
    if let Some(config_dir) = dirs::config_dir() {
        let global_config = config_dir.join("dcpfleet").join("config.yaml");
        if global_config.exists() {
            return Ok(Some(global_config));
        }
    }

    Ok(None)
}
