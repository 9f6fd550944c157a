//! エラー型の定義

use std::fmt;

use thiserror::Error;

/// 検出器の出力1件をDetectionRecordへ変換できなかった理由
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    #[error("label is empty")]
    EmptyLabel,

    #[error("prediction has neither a label nor a class id")]
    MissingClass,

    #[error("confidence out of range: {0}")]
    ConfidenceOutOfRange(f32),

    #[error("non-finite value in prediction")]
    NonFinite,

    #[error("inverted box: [{x1}, {y1}, {x2}, {y2}]")]
    InvertedBox { x1: f32, y1: f32, x2: f32, y2: f32 },
}

/// 推論に失敗した検出器とその原因
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorFailure {
    pub detector: String,
    pub reason: String,
}

impl fmt::Display for DetectorFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.detector, self.reason)
    }
}

fn join_failures(failures: &[DetectorFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Error)]
pub enum Error {
    /// 呼び出し側の入力不備。検出器は一切実行されない
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("detector `{detector}` failed to load: {reason}")]
    DetectorLoad { detector: String, reason: String },

    #[error("all active detectors failed: {}", join_failures(.failures))]
    AllDetectorsFailed { failures: Vec<DetectorFailure> },

    #[error("config error: {0}")]
    Config(String),
}

impl Error {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// 呼び出し側の責任によるエラーかどうか
    pub fn is_client_error(&self) -> bool {
        matches!(self, Error::InvalidInput(_))
    }
}
