//! 連続したフレームに対して検出処理を繰り返すモジュール

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use image::DynamicImage;
use log::{info, warn};

use crate::pipeline::{DetectionRequest, DetectionResponse, Pipeline};

/// フレームの供給元
pub trait FrameSource {
    /// 次のフレームを取得します。`None` なら終端です。
    fn next_frame(&mut self) -> Result<Option<DynamicImage>>;
}

/// 画像ファイルを順番に読み込むフレームソース
pub struct ImageSequence {
    paths: VecDeque<PathBuf>,
}

impl ImageSequence {
    pub fn new<I: IntoIterator<Item = PathBuf>>(paths: I) -> Self {
        Self {
            paths: paths.into_iter().collect(),
        }
    }
}

impl FrameSource for ImageSequence {
    fn next_frame(&mut self) -> Result<Option<DynamicImage>> {
        match self.paths.pop_front() {
            Some(p) => {
                let img = image::open(&p).with_context(|| format!("can't open {}", p.display()))?;
                Ok(Some(img))
            }
            None => Ok(None),
        }
    }
}

/// ループの打ち切り条件
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StreamLimits {
    pub max_frames: Option<u64>,
    pub max_duration: Option<Duration>,
}

/// ループが終了した理由
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    StopRequested,
    FrameBudget,
    TimeBudget,
    SourceExhausted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamSummary {
    pub frames: u64,
    /// 読み込みに失敗したか、すべての検出器が失敗したフレーム数
    pub failed_frames: u64,
    /// ターゲットが見つかったフレーム数
    pub found_frames: u64,
    pub reason: StopReason,
}

/// フレームごとに検出処理を行う協調的なループ
///
/// 停止フラグは各イテレーションの先頭で確認するため、処理中のフレームは必ず最後まで処理されます。
pub struct StreamLoop<'a> {
    pipeline: &'a Pipeline,
    target: String,
    threshold: Option<f32>,
    limits: StreamLimits,
    stop: Arc<AtomicBool>,
}

impl<'a> StreamLoop<'a> {
    /// 新しい `StreamLoop` を作成します。
    ///
    /// # Args
    /// * `pipeline` - 検出処理
    /// * `target` - ターゲットラベル
    /// * `threshold` - 呼び出し側のコンフィデンス下限
    /// * `limits` - 打ち切り条件
    /// * `stop` - 外部から立てる停止フラグ
    pub fn new(
        pipeline: &'a Pipeline,
        target: &str,
        threshold: Option<f32>,
        limits: StreamLimits,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            pipeline,
            target: target.to_string(),
            threshold,
            limits,
            stop,
        }
    }

    /// ループを実行します。
    ///
    /// # Args
    /// * `source` - フレームの供給元
    /// * `sink` - フレーム番号・画像・レスポンスを受け取るコールバック
    ///
    /// # Return
    /// * 処理の集計
    pub fn run<S, F>(&self, source: &mut S, mut sink: F) -> Result<StreamSummary>
    where
        S: FrameSource + ?Sized,
        F: FnMut(u64, &DynamicImage, &DetectionResponse) -> Result<()>,
    {
        let start = Instant::now();
        let mut frames = 0;
        let mut failed_frames = 0;
        let mut found_frames = 0;

        let reason = loop {
            if self.stop.load(Ordering::SeqCst) {
                break StopReason::StopRequested;
            }
            if self.limits.max_frames.is_some_and(|n| frames >= n) {
                break StopReason::FrameBudget;
            }
            if self.limits.max_duration.is_some_and(|d| start.elapsed() >= d) {
                break StopReason::TimeBudget;
            }

            let frame = match source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break StopReason::SourceExhausted,
                Err(e) => {
                    warn!("frame {}: {:#}", frames, e);
                    failed_frames += 1;
                    frames += 1;
                    continue;
                }
            };

            let t = Instant::now();
            let req = DetectionRequest::new(frame, &self.target, self.threshold)?;
            match self.pipeline.run(&req) {
                Ok(resp) => {
                    if resp.found {
                        found_frames += 1;
                    }
                    let ms = t.elapsed().as_secs_f64() * 1000.0;
                    info!(
                        "frame {}: found={} detections={} ({:.03}ms)",
                        frames,
                        resp.found,
                        resp.detections.len(),
                        ms
                    );
                    sink(frames, req.image(), &resp)?;
                }
                Err(e) => {
                    warn!("frame {}: {}", frames, e);
                    failed_frames += 1;
                }
            }
            frames += 1;
        };

        info!("stream stopped after {} frames: {:?}", frames, reason);
        Ok(StreamSummary {
            frames,
            failed_frames,
            found_frames,
            reason,
        })
    }
}
