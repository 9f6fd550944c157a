//! モデルの生出力をDetectionRecordへ変換し、閾値で絞り込むモジュール

use log::warn;

use crate::detection_result::{BBox, DetectionRecord};
use crate::detector::{ClassNames, RawOutput, RawPrediction};
use crate::error::DecodeError;

/// 呼び出し側が閾値を指定しなかった場合のコンフィデンス下限
pub const DEFAULT_CONFIDENCE_FLOOR: f32 = 0.4;

/// 検出器に適用するコンフィデンス下限を求めます。
///
/// 呼び出し側は下限を引き上げることしかできず、モデル固有の下限を下回ることはありません。
///
/// # Args
/// * `detector_floor` - 検出器のデフォルト下限
/// * `request_floor` - 呼び出し側が指定した下限
pub fn effective_floor(detector_floor: f32, request_floor: f32) -> f32 {
    detector_floor.max(request_floor)
}

/// 下限未満のコンフィデンスを持つ検出結果を取り除きます。
pub fn filter_by_floor(records: Vec<DetectionRecord>, floor: f32) -> Vec<DetectionRecord> {
    records
        .into_iter()
        .filter(|d| d.confidence() >= floor)
        .collect()
}

/// 変換結果。検証に失敗した件数も保持します
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AdapterOutput {
    pub records: Vec<DetectionRecord>,
    pub skipped: usize,
}

/// 生の検出結果1件をDetectionRecordへ変換します。
///
/// ラベルはモデルが直接返したもの、クラス名表、クラスIDの文字列の順に決まります。
///
/// # Args
/// * `raw` - 生の検出結果
/// * `names` - クラスIDとクラス名の対応表
pub fn decode_prediction(
    raw: &RawPrediction,
    names: &ClassNames,
) -> Result<DetectionRecord, DecodeError> {
    let label = match (&raw.label, raw.cls) {
        (Some(label), _) => label.clone(),
        (None, Some(cls)) => names.get(&cls).cloned().unwrap_or_else(|| cls.to_string()),
        (None, None) => return Err(DecodeError::MissingClass),
    };
    let [x1, y1, x2, y2] = raw.xyxy;
    let bbox = BBox::new(x1, y1, x2, y2)?;
    DetectionRecord::new(label, raw.conf, bbox)
}

/// モデルの出力全体を変換します。変換できなかったものは件数として数えます。
pub fn decode_predictions(output: &RawOutput) -> AdapterOutput {
    let mut out = AdapterOutput::default();
    for raw in &output.predictions {
        match decode_prediction(raw, &output.names) {
            Ok(record) => out.records.push(record),
            Err(e) => {
                warn!("skipping malformed prediction {:?}: {}", raw, e);
                out.skipped += 1;
            }
        }
    }
    out
}
