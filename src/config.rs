//! 設定ファイル (TOML) と環境変数による設定

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use log::info;
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::postprocess::DEFAULT_CONFIDENCE_FLOOR;

/// 設定ファイルのパスを指定する環境変数
pub const CONFIG_ENV: &str = "TARGET_FINDER_CONFIG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    /// 呼び出し側が閾値を省略したときの下限
    pub default_threshold: f32,
    /// ラベル描画に使うTTFフォント
    pub font_path: Option<PathBuf>,
    /// 記載順が優先順位になります
    pub detectors: Vec<DetectorConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_body_size: usize,
    /// 最後に受信した画像を保存するパス (デバッグ用)
    pub debug_dump: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorConfig {
    pub name: String,
    /// 推論バックエンドのURL
    pub endpoint: String,
    /// モデル固有のコンフィデンス下限
    pub floor: f32,
    /// 空なら汎用検出器
    #[serde(default)]
    pub specialties: Vec<String>,
    /// trueなら読み込みに失敗したとき起動を中止します
    #[serde(default)]
    pub mandatory: bool,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// アップロード前に画像をこの辺長まで縮小します
    #[serde(default = "default_max_side")]
    pub max_side: u32,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_side() -> u32 {
    1280
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            max_body_size: 20 * 1024 * 1024,
            debug_dump: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            default_threshold: DEFAULT_CONFIDENCE_FLOOR,
            font_path: None,
            detectors: vec![
                DetectorConfig {
                    name: "general".to_string(),
                    endpoint: "http://127.0.0.1:9000".to_string(),
                    floor: 0.25,
                    specialties: vec![],
                    mandatory: true,
                    timeout_secs: default_timeout_secs(),
                    max_side: default_max_side(),
                },
                DetectorConfig {
                    name: "elevator".to_string(),
                    endpoint: "http://127.0.0.1:9001".to_string(),
                    floor: 0.4,
                    specialties: vec!["elevator".to_string()],
                    mandatory: false,
                    timeout_secs: default_timeout_secs(),
                    max_side: default_max_side(),
                },
            ],
        }
    }
}

impl Config {
    /// 設定を読み込みます。
    ///
    /// `path` が無ければ環境変数 `TARGET_FINDER_CONFIG` を見て、それも無ければデフォルト値を使います。
    /// 最後に環境変数による上書きを適用します。
    pub fn load(path: Option<&Path>) -> Result<Self, Error> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));

        let mut config = match path {
            Some(p) => {
                info!("loading config from {}", p.display());
                let content = std::fs::read_to_string(&p)
                    .map_err(|e| Error::config(format!("{}: {}", p.display(), e)))?;
                Self::from_toml_str(&content)?
            }
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(s: &str) -> Result<Self, Error> {
        toml::from_str(s).map_err(|e| Error::config(e.to_string()))
    }

    /// 環境変数などから値を上書きします。
    ///
    /// * `HOST`, `PORT`, `DEFAULT_THRESHOLD`
    /// * `DETECTOR_<NAME>_ENDPOINT`, `DETECTOR_<NAME>_FLOOR` (`<NAME>` は大文字、`-` は `_`)
    ///
    /// # Args
    /// * `lookup` - キーから値を取り出す関数
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("PORT").and_then(|s| s.parse().ok()) {
            self.server.port = port;
        }
        if let Some(t) = lookup("DEFAULT_THRESHOLD").and_then(|s| s.parse().ok()) {
            self.default_threshold = t;
        }
        for d in self.detectors.iter_mut() {
            let prefix = format!("DETECTOR_{}", d.name.to_uppercase().replace('-', "_"));
            if let Some(endpoint) = lookup(&format!("{prefix}_ENDPOINT")) {
                d.endpoint = endpoint;
            }
            if let Some(floor) = lookup(&format!("{prefix}_FLOOR")).and_then(|s| s.parse().ok()) {
                d.floor = floor;
            }
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        if !(0. ..=1.).contains(&self.default_threshold) {
            return Err(Error::config(format!(
                "default_threshold must be within [0, 1], got {}",
                self.default_threshold
            )));
        }
        let mut seen = HashSet::new();
        for d in &self.detectors {
            if d.name.trim().is_empty() {
                return Err(Error::config("detector name must not be empty"));
            }
            if !seen.insert(d.name.to_lowercase()) {
                return Err(Error::config(format!("duplicate detector name `{}`", d.name)));
            }
            if !(0. ..=1.).contains(&d.floor) {
                return Err(Error::config(format!(
                    "detector `{}`: floor must be within [0, 1], got {}",
                    d.name, d.floor
                )));
            }
            if d.specialties.iter().any(|s| s.trim().is_empty()) {
                return Err(Error::config(format!(
                    "detector `{}`: empty specialty label",
                    d.name
                )));
            }
        }
        Ok(())
    }
}
