//! 物体検出の結果を保持するモジュール

use serde::Serialize;

use crate::error::DecodeError;

/// ラベルを比較用に正規化します。
///
/// ルーティング・結果判定・テストはすべてこの関数を通してラベルを比較します。
pub fn normalize_label(label: &str) -> String {
    label.to_lowercase()
}

/// 2つのラベルが同じクラスを指しているか (大文字小文字を区別しない)
pub fn labels_match(a: &str, b: &str) -> bool {
    normalize_label(a) == normalize_label(b)
}

/// 元画像のピクセル座標系での軸平行バウンディングボックス
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(into = "[f32; 4]")]
pub struct BBox {
    /// バウンディングボックス左上のx
    pub x1: f32,
    /// バウンディングボックス左上のy
    pub y1: f32,
    /// バウンディングボックス右下のx
    pub x2: f32,
    /// バウンディングボックス右下のy
    pub y2: f32,
}

impl BBox {
    /// 座標を検証して新しいBBoxを作成します。
    ///
    /// # Args
    /// * `x1`, `y1`, `x2`, `y2` - 左上と右下の座標
    ///
    /// # Return
    /// * 有限かつ x1<=x2, y1<=y2 を満たすBBox
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Result<Self, DecodeError> {
        if ![x1, y1, x2, y2].iter().all(|v| v.is_finite()) {
            return Err(DecodeError::NonFinite);
        }
        if x1 > x2 || y1 > y2 {
            return Err(DecodeError::InvertedBox { x1, y1, x2, y2 });
        }
        Ok(Self { x1, y1, x2, y2 })
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// 2つのBBoxが重なっている面積
    pub fn intersection_area(&self, other: &BBox) -> f32 {
        let w = self.x2.min(other.x2) - self.x1.max(other.x1);
        let h = self.y2.min(other.y2) - self.y1.max(other.y1);
        if w <= 0. || h <= 0. {
            return 0.;
        }
        w * h
    }

    pub fn is_finite(&self) -> bool {
        [self.x1, self.y1, self.x2, self.y2]
            .iter()
            .all(|v| v.is_finite())
    }

    pub fn to_array(&self) -> [f32; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }
}

impl From<BBox> for [f32; 4] {
    fn from(b: BBox) -> Self {
        b.to_array()
    }
}

/// 1つの検出結果 (ラベル・コンフィデンス・バウンディングボックス)
///
/// 生成後は変更されません。値として受け渡されます。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionRecord {
    label: String,
    #[serde(rename = "conf")]
    confidence: f32,
    #[serde(rename = "box")]
    bbox: BBox,
}

impl DetectionRecord {
    /// 新しいDetectionRecordを作成します。
    ///
    /// # Args
    /// * `label` - クラス名 (空文字は不可)
    /// * `confidence` - コンフィデンス (0以上1以下)
    /// * `bbox` - バウンディングボックス
    ///
    /// # Return
    /// * 検証済みのDetectionRecord
    pub fn new(
        label: impl Into<String>,
        confidence: f32,
        bbox: BBox,
    ) -> Result<Self, DecodeError> {
        let label = label.into();
        if label.trim().is_empty() {
            return Err(DecodeError::EmptyLabel);
        }
        if !confidence.is_finite() {
            return Err(DecodeError::NonFinite);
        }
        if !(0. ..=1.).contains(&confidence) {
            return Err(DecodeError::ConfidenceOutOfRange(confidence));
        }
        Ok(Self {
            label,
            confidence,
            bbox,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn bbox(&self) -> &BBox {
        &self.bbox
    }

    /// ラベルが `target` と一致するか
    pub fn is_label(&self, target: &str) -> bool {
        labels_match(&self.label, target)
    }
}
