//! 同一ラベル間の Non-Maximum Suppression (NMS)

use crate::detection_result::{normalize_label, BBox, DetectionRecord};

/// 重複とみなすIoUの閾値
pub const NMS_IOU_THRESHOLD: f32 = 0.5;

/// 2つのBBoxのIntersection over Unionを計算します。
///
/// 和集合の面積が0以下の場合は0を返します。
pub fn iou(a: &BBox, b: &BBox) -> f32 {
    let inter = a.intersection_area(b);
    let union = a.area() + b.area() - inter;
    if union <= 0. {
        return 0.;
    }
    inter / union
}

/// 検出結果に貪欲法のNMSを適用します。
///
/// コンフィデンスの降順 (同値の場合は入力順) に走査し、
/// すでに残した同じラベルの検出結果とのIoUが閾値を超えるものを捨てます。
/// ラベルが異なる検出結果同士は重なっていても抑制しません。
///
/// # Args
/// * `candidates` - 融合済みの検出結果
/// * `iou_threshold` - 重複とみなすIoUの閾値
///
/// # Return
/// * 残った検出結果 (コンフィデンス降順)
pub fn suppress(candidates: Vec<DetectionRecord>, iou_threshold: f32) -> Vec<DetectionRecord> {
    let mut sorted = candidates;
    debug_assert!(
        sorted.iter().all(|d| d.bbox().is_finite() && d.confidence().is_finite()),
        "malformed detection record reached suppression"
    );
    // sort_by は安定ソートなので同値は到着順のまま
    sorted.sort_by(|a, b| b.confidence().total_cmp(&a.confidence()));

    let mut kept: Vec<(String, DetectionRecord)> = Vec::with_capacity(sorted.len());
    for cand in sorted {
        let label = normalize_label(cand.label());
        let duplicate = kept
            .iter()
            .filter(|(l, _)| *l == label)
            .any(|(_, k)| iou(k.bbox(), cand.bbox()) > iou_threshold);
        if !duplicate {
            kept.push((label, cand));
        }
    }
    kept.into_iter().map(|(_, d)| d).collect()
}
