//! 起動時に一度だけ構築される検出器レジストリ

use std::sync::Arc;

use anyhow::Result;
use log::{error, info, warn};

use crate::config::{Config, DetectorConfig};
use crate::detector::{Activation, Detector, DetectorDescriptor};
use crate::error::Error;
use crate::remote::RemoteDetector;
use crate::routing::{self, DisabledDetector, RegistryEntry, Route};

/// 設定されたすべての検出器を保持する構造体
///
/// 構築後は変更されず、`Arc` で全リクエストから共有されます。
#[derive(Debug)]
pub struct DetectorRegistry {
    entries: Vec<RegistryEntry>,
}

impl DetectorRegistry {
    /// 読み込み済みの検出器からレジストリを作成します。
    ///
    /// # Args
    /// * `descriptors` - 優先順位順の検出器
    pub fn new(descriptors: Vec<DetectorDescriptor>) -> Self {
        Self::from_entries(descriptors.into_iter().map(RegistryEntry::Enabled).collect())
    }

    /// 無効化された検出器を含むエントリからレジストリを作成します。
    pub fn from_entries(entries: Vec<RegistryEntry>) -> Self {
        for (label, winner, ignored) in routing::overlapping_specialties(&entries) {
            warn!(
                "label `{}` is claimed by both `{}` and `{}`; `{}` takes priority",
                label, winner, ignored, winner
            );
        }
        Self { entries }
    }

    /// 設定に従って推論バックエンドへ接続し、レジストリを作成します。
    pub fn from_config(config: &Config) -> Result<Self, Error> {
        Self::from_config_with(config, |c| {
            RemoteDetector::connect(c).map(|d| Arc::new(d) as Arc<dyn Detector>)
        })
    }

    /// `connect` で各検出器を読み込み、レジストリを作成します。
    ///
    /// 読み込みに失敗した検出器は、`mandatory` なら起動エラー、そうでなければ無効化されます。
    ///
    /// # Args
    /// * `config` - 設定
    /// * `connect` - 検出器の設定からモデルハンドルを作る関数
    pub fn from_config_with<F>(config: &Config, connect: F) -> Result<Self, Error>
    where
        F: Fn(&DetectorConfig) -> Result<Arc<dyn Detector>>,
    {
        let mut entries = Vec::with_capacity(config.detectors.len());
        for dc in &config.detectors {
            let activation = if dc.specialties.is_empty() {
                Activation::Generalist
            } else {
                Activation::specialist(&dc.specialties)
            };

            match connect(dc) {
                Ok(handle) => {
                    info!("detector `{}` ready (floor {})", dc.name, dc.floor);
                    entries.push(RegistryEntry::Enabled(DetectorDescriptor::new(
                        &dc.name, handle, dc.floor, activation,
                    )));
                }
                Err(e) if dc.mandatory => {
                    return Err(Error::DetectorLoad {
                        detector: dc.name.clone(),
                        reason: format!("{:#}", e),
                    });
                }
                Err(e) => {
                    error!("detector `{}` disabled: {:#}", dc.name, e);
                    entries.push(RegistryEntry::Disabled(DisabledDetector {
                        name: dc.name.clone(),
                        reason: format!("{:#}", e),
                        activation,
                    }));
                }
            }
        }
        Ok(Self::from_entries(entries))
    }

    /// `target` に対して実行する検出器を選びます。
    pub fn route(&self, target: &str) -> Route<'_> {
        routing::route(&self.entries, target)
    }

    pub fn entries(&self) -> &[RegistryEntry] {
        &self.entries
    }

    pub fn enabled_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e, RegistryEntry::Enabled(_)))
            .count()
    }
}
