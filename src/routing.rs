//! ターゲットラベルから実行する検出器を選ぶモジュール

use crate::detector::{Activation, DetectorDescriptor};

/// 起動時の読み込みに失敗し、永続的に無効化された検出器
#[derive(Debug, Clone, PartialEq)]
pub struct DisabledDetector {
    pub name: String,
    pub reason: String,
    pub activation: Activation,
}

/// レジストリの1エントリ。設定の順序が優先順位になります
#[derive(Debug, Clone)]
pub enum RegistryEntry {
    Enabled(DetectorDescriptor),
    Disabled(DisabledDetector),
}

impl RegistryEntry {
    pub fn name(&self) -> &str {
        match self {
            RegistryEntry::Enabled(d) => d.name(),
            RegistryEntry::Disabled(d) => &d.name,
        }
    }

    pub fn activation(&self) -> &Activation {
        match self {
            RegistryEntry::Enabled(d) => d.activation(),
            RegistryEntry::Disabled(d) => &d.activation,
        }
    }
}

/// ルーティングの結果
#[derive(Debug, Default)]
pub struct Route<'a> {
    /// 実行する検出器
    pub active: Vec<&'a DetectorDescriptor>,
    /// 本来実行すべきだったが無効化されている検出器
    pub blocked: Vec<&'a DisabledDetector>,
}

impl Route<'_> {
    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}

/// `target` に対して実行する検出器を選びます。
///
/// * ターゲットを担当する専門検出器があれば、優先順位が最も高い1つだけを使います。
/// * どの専門検出器も担当しないラベルなら、すべての汎用検出器を使います。
///
/// 選ばれた専門検出器が無効化されている場合、汎用検出器へは切り替えません。
///
/// # Args
/// * `entries` - 優先順位順のレジストリエントリ
/// * `target` - ターゲットラベル
///
/// # Return
/// * 実行する検出器と、無効化のため実行できなかった検出器
pub fn route<'a>(entries: &'a [RegistryEntry], target: &str) -> Route<'a> {
    let mut r = Route::default();

    if let Some(specialist) = entries.iter().find(|e| e.activation().claims(target)) {
        match specialist {
            RegistryEntry::Enabled(d) => r.active.push(d),
            RegistryEntry::Disabled(d) => r.blocked.push(d),
        }
        return r;
    }

    for entry in entries.iter().filter(|e| e.activation().is_generalist()) {
        match entry {
            RegistryEntry::Enabled(d) => r.active.push(d),
            RegistryEntry::Disabled(d) => r.blocked.push(d),
        }
    }
    r
}

/// 複数の専門検出器が担当しているラベルを列挙します。
///
/// # Return
/// * (ラベル, 優先される検出器, 無視される検出器)
pub fn overlapping_specialties(entries: &[RegistryEntry]) -> Vec<(String, String, String)> {
    let mut overlaps = vec![];
    for (i, entry) in entries.iter().enumerate() {
        let Activation::Specialist { labels } = entry.activation() else {
            continue;
        };
        for label in labels {
            if let Some(winner) = entries[..i].iter().find(|e| e.activation().claims(label)) {
                overlaps.push((
                    label.clone(),
                    winner.name().to_string(),
                    entry.name().to_string(),
                ));
            }
        }
    }
    overlaps
}
