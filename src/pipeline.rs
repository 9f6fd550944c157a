//! 1リクエスト分の検出処理
//!
//! ルーティング → 検出器ごとの推論と閾値処理 → 融合 → NMS → 結果判定 の順に同期的に実行します。

use std::sync::Arc;

use image::DynamicImage;
use log::{debug, warn};
use serde::Serialize;

use crate::detection_result::DetectionRecord;
use crate::error::{DetectorFailure, Error};
use crate::nms::{suppress, NMS_IOU_THRESHOLD};
use crate::postprocess::{decode_predictions, effective_floor, filter_by_floor};
use crate::registry::DetectorRegistry;

/// 検出リクエスト
#[derive(Debug, Clone)]
pub struct DetectionRequest {
    image: DynamicImage,
    target: String,
    threshold: Option<f32>,
}

impl DetectionRequest {
    /// 入力を検証してリクエストを作成します。
    ///
    /// # Args
    /// * `image` - デコード済みの画像
    /// * `target` - ターゲットラベル (前後の空白は除去されます)
    /// * `threshold` - 呼び出し側のコンフィデンス下限 (0以上1以下)
    pub fn new(image: DynamicImage, target: &str, threshold: Option<f32>) -> Result<Self, Error> {
        let target = target.trim();
        if target.is_empty() {
            return Err(Error::invalid_input("target label must not be empty"));
        }
        if let Some(t) = threshold {
            if !(0. ..=1.).contains(&t) {
                return Err(Error::invalid_input(format!(
                    "threshold must be within [0, 1], got {}",
                    t
                )));
            }
        }
        if image.width() == 0 || image.height() == 0 {
            return Err(Error::invalid_input("image is empty"));
        }
        Ok(Self {
            image,
            target: target.to_string(),
            threshold,
        })
    }

    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn threshold(&self) -> Option<f32> {
        self.threshold
    }
}

/// 検出器1つ分の実行結果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectorReport {
    pub detector: String,
    pub floor: f32,
    #[serde(flatten)]
    pub outcome: DetectorOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DetectorOutcome {
    Ok {
        /// 変換できた件数
        decoded: usize,
        /// 変換できなかった件数
        skipped: usize,
        /// 閾値を通過した件数
        passed: usize,
    },
    Failed {
        error: String,
    },
}

/// 判定に至った経緯
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Diagnostics {
    pub detectors: Vec<DetectorReport>,
    /// 変換できずに捨てた検出結果の合計
    pub skipped_records: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

/// 検出レスポンス
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionResponse {
    pub found: bool,
    pub detections: Vec<DetectionRecord>,
    pub diagnostics: Diagnostics,
}

/// 検出器ごとの結果を1つにまとめます。重複の除去はしません。
pub fn fuse(lists: Vec<Vec<DetectionRecord>>) -> Vec<DetectionRecord> {
    lists.into_iter().flatten().collect()
}

/// NMS後の検出結果から最終的なレスポンスを組み立てます。
///
/// 検出結果の並び替えや絞り込みは行いません。
pub fn assemble(
    kept: Vec<DetectionRecord>,
    target: &str,
    diagnostics: Diagnostics,
) -> DetectionResponse {
    let found = kept.iter().any(|d| d.is_label(target));
    DetectionResponse {
        found,
        detections: kept,
        diagnostics,
    }
}

/// 検出処理を行う構造体。レジストリを共有するだけなので `Send + Sync` です
#[derive(Debug, Clone)]
pub struct Pipeline {
    registry: Arc<DetectorRegistry>,
    default_threshold: f32,
}

impl Pipeline {
    /// 新しい `Pipeline` を作成します。
    ///
    /// # Args
    /// * `registry` - 検出器レジストリ
    /// * `default_threshold` - リクエストが閾値を指定しなかったときの下限
    pub fn new(registry: Arc<DetectorRegistry>, default_threshold: f32) -> Self {
        Self {
            registry,
            default_threshold,
        }
    }

    pub fn registry(&self) -> &DetectorRegistry {
        &self.registry
    }

    /// リクエストを処理します。
    ///
    /// 一部の検出器が失敗した場合、その検出器の寄与は空として扱います。
    /// 実行したすべての検出器が失敗した場合のみエラーになります。
    ///
    /// # Args
    /// * `req` - 検出リクエスト
    ///
    /// # Return
    /// * 検出レスポンス
    pub fn run(&self, req: &DetectionRequest) -> Result<DetectionResponse, Error> {
        let request_floor = req.threshold().unwrap_or(self.default_threshold);
        let route = self.registry.route(req.target());
        let mut diagnostics = Diagnostics::default();

        for d in &route.blocked {
            diagnostics.notes.push(format!(
                "detector `{}` is disabled ({}); results for `{}` are unavailable",
                d.name,
                d.reason,
                req.target()
            ));
        }
        if route.is_empty() {
            debug!("no detector routed for `{}`", req.target());
            return Ok(assemble(vec![], req.target(), diagnostics));
        }

        let mut lists = Vec::with_capacity(route.active.len());
        let mut failures = vec![];
        for desc in &route.active {
            let floor = effective_floor(desc.default_floor(), request_floor);
            match desc.predict(req.image()) {
                Ok(raw) => {
                    let decoded = decode_predictions(&raw);
                    let n_decoded = decoded.records.len();
                    let passed = filter_by_floor(decoded.records, floor);
                    debug!(
                        "{}: decoded {}, skipped {}, passed {} (floor {})",
                        desc.name(),
                        n_decoded,
                        decoded.skipped,
                        passed.len(),
                        floor
                    );
                    diagnostics.skipped_records += decoded.skipped;
                    diagnostics.detectors.push(DetectorReport {
                        detector: desc.name().to_string(),
                        floor,
                        outcome: DetectorOutcome::Ok {
                            decoded: n_decoded,
                            skipped: decoded.skipped,
                            passed: passed.len(),
                        },
                    });
                    lists.push(passed);
                }
                Err(e) => {
                    let reason = format!("{:#}", e);
                    warn!("detector `{}` failed: {}", desc.name(), reason);
                    diagnostics.detectors.push(DetectorReport {
                        detector: desc.name().to_string(),
                        floor,
                        outcome: DetectorOutcome::Failed {
                            error: reason.clone(),
                        },
                    });
                    failures.push(DetectorFailure {
                        detector: desc.name().to_string(),
                        reason,
                    });
                    lists.push(vec![]);
                }
            }
        }

        if failures.len() == route.active.len() {
            return Err(Error::AllDetectorsFailed { failures });
        }

        let kept = suppress(fuse(lists), NMS_IOU_THRESHOLD);
        Ok(assemble(kept, req.target(), diagnostics))
    }
}
