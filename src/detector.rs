//! 検出器 (モデルハンドル) と、その設定を表すモジュール

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use image::DynamicImage;
use serde::Deserialize;

use crate::detection_result::{labels_match, normalize_label};

/// クラスIDからクラス名への対応表
pub type ClassNames = HashMap<u32, String>;

/// モデルが出力した生の検出結果1件。まだ検証されていない
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawPrediction {
    /// クラスID
    #[serde(default, alias = "class_id")]
    pub cls: Option<u32>,
    /// クラス名 (モデルが直接返す場合)
    #[serde(default)]
    pub label: Option<String>,
    /// コンフィデンス
    pub conf: f32,
    /// [x1, y1, x2, y2]
    pub xyxy: [f32; 4],
}

impl RawPrediction {
    /// リサイズした入力画像上の座標を元の画像の座標系に戻します。
    ///
    /// # Args
    /// * `scale_x` - 元画像の幅 / 入力画像の幅
    /// * `scale_y` - 元画像の高さ / 入力画像の高さ
    pub fn reverse_transform(&self, scale_x: f32, scale_y: f32) -> Self {
        let [x1, y1, x2, y2] = self.xyxy;
        Self {
            xyxy: [x1 * scale_x, y1 * scale_y, x2 * scale_x, y2 * scale_y],
            ..self.clone()
        }
    }
}

/// 1回の推論でモデルが返した出力
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawOutput {
    pub names: ClassNames,
    pub predictions: Vec<RawPrediction>,
}

/// 推論を行うモデルハンドル
///
/// 起動時に一度だけ作られ、リクエスト間で読み取り専用に共有されます。
pub trait Detector: Send + Sync {
    /// 画像1枚に対して推論を行います。
    fn predict(&self, img: &DynamicImage) -> Result<RawOutput>;
}

/// 検出器をどのターゲットラベルで動かすか
#[derive(Debug, Clone, PartialEq)]
pub enum Activation {
    /// 専門検出器が担当しないすべてのラベルで動く
    Generalist,
    /// 指定ラベルのみで動く (正規化済み)
    Specialist { labels: Vec<String> },
}

impl Activation {
    pub fn specialist<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Activation::Specialist {
            labels: labels
                .into_iter()
                .map(|l| normalize_label(l.as_ref()))
                .collect(),
        }
    }

    /// 専門検出器として `target` を担当しているか
    pub fn claims(&self, target: &str) -> bool {
        match self {
            Activation::Generalist => false,
            Activation::Specialist { labels } => labels.iter().any(|l| labels_match(l, target)),
        }
    }

    pub fn is_generalist(&self) -> bool {
        matches!(self, Activation::Generalist)
    }
}

/// 1つのモデルの設定
#[derive(Clone)]
pub struct DetectorDescriptor {
    name: String,
    handle: Arc<dyn Detector>,
    default_floor: f32,
    activation: Activation,
}

impl DetectorDescriptor {
    /// 新しい `DetectorDescriptor` を作成します。
    ///
    /// # Args
    /// * `name` - 検出器の名前 (診断情報やエラーに使われます)
    /// * `handle` - モデルハンドル
    /// * `default_floor` - このモデルのコンフィデンス下限
    /// * `activation` - 動作させるターゲットラベルの条件
    pub fn new(
        name: impl Into<String>,
        handle: Arc<dyn Detector>,
        default_floor: f32,
        activation: Activation,
    ) -> Self {
        Self {
            name: name.into(),
            handle,
            default_floor,
            activation,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn default_floor(&self) -> f32 {
        self.default_floor
    }

    pub fn activation(&self) -> &Activation {
        &self.activation
    }

    pub fn predict(&self, img: &DynamicImage) -> Result<RawOutput> {
        self.handle.predict(img)
    }
}

impl fmt::Debug for DetectorDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DetectorDescriptor")
            .field("name", &self.name)
            .field("default_floor", &self.default_floor)
            .field("activation", &self.activation)
            .finish()
    }
}
