//! HTTP越しに推論バックエンドを呼び出す検出器

use std::io::Cursor;
use std::time::Duration;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::imageops::FilterType;
use image::{DynamicImage, ImageOutputFormat};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::config::DetectorConfig;
use crate::detector::{ClassNames, Detector, RawOutput, RawPrediction};

#[derive(Debug, Deserialize)]
struct InfoResponse {
    #[serde(default)]
    names: ClassNames,
}

#[derive(Serialize)]
struct PredictRequest {
    image: String,
}

#[derive(Debug, Deserialize)]
struct PredictResponse {
    #[serde(default)]
    names: Option<ClassNames>,
    #[serde(default)]
    predictions: Vec<RawPrediction>,
}

/// 外部の推論バックエンドをモデルハンドルとして扱う構造体
///
/// * `GET {endpoint}/info` - クラス名表 (起動時に1回)
/// * `POST {endpoint}/predict` - base64エンコードしたPNGを送り、生の検出結果を受け取る
pub struct RemoteDetector {
    name: String,
    endpoint: String,
    client: reqwest::blocking::Client,
    names: ClassNames,
    max_side: u32,
}

impl RemoteDetector {
    /// バックエンドに接続し、クラス名表を取得します。
    ///
    /// ここで失敗した場合は検出器の読み込み失敗として扱われます。
    ///
    /// # Args
    /// * `config` - 検出器の設定
    ///
    /// # Return
    /// * 新たな `RemoteDetector` インスタンス
    pub fn connect(config: &DetectorConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("failed to build http client")?;
        let endpoint = config.endpoint.trim_end_matches('/').to_string();

        let info: InfoResponse = client
            .get(format!("{endpoint}/info"))
            .send()
            .and_then(|r| r.error_for_status())
            .with_context(|| format!("model backend {endpoint} is not reachable"))?
            .json()
            .with_context(|| format!("model backend {endpoint} returned malformed info"))?;

        info!(
            "detector `{}` connected to {} ({} classes)",
            config.name,
            endpoint,
            info.names.len()
        );

        Ok(Self {
            name: config.name.clone(),
            endpoint,
            client,
            names: info.names,
            max_side: config.max_side.max(1),
        })
    }
}

/// 長辺が `max_side` を超える場合に縮小します。
///
/// # Return
/// * (送信する画像, x方向の逆変換倍率, y方向の逆変換倍率)
fn shrink_for_upload(img: &DynamicImage, max_side: u32) -> (DynamicImage, f32, f32) {
    if img.width() <= max_side && img.height() <= max_side {
        return (img.clone(), 1., 1.);
    }
    let resized = img.resize(max_side, max_side, FilterType::Triangle);
    let sx = img.width() as f32 / resized.width() as f32;
    let sy = img.height() as f32 / resized.height() as f32;
    (resized, sx, sy)
}

fn encode_png(img: &DynamicImage) -> Result<String> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageOutputFormat::Png)
        .context("failed to encode image")?;
    Ok(STANDARD.encode(buf))
}

impl Detector for RemoteDetector {
    fn predict(&self, img: &DynamicImage) -> Result<RawOutput> {
        let (input, sx, sy) = shrink_for_upload(img, self.max_side);
        let body = PredictRequest {
            image: encode_png(&input)?,
        };

        let resp: PredictResponse = self
            .client
            .post(format!("{}/predict", self.endpoint))
            .json(&body)
            .send()
            .and_then(|r| r.error_for_status())
            .with_context(|| format!("{}: inference request failed", self.name))?
            .json()
            .with_context(|| format!("{}: malformed inference response", self.name))?;

        debug!(
            "{}: {} raw predictions (scale {:.3}, {:.3})",
            self.name,
            resp.predictions.len(),
            sx,
            sy
        );

        Ok(RawOutput {
            names: resp.names.unwrap_or_else(|| self.names.clone()),
            predictions: resp
                .predictions
                .iter()
                .map(|p| p.reverse_transform(sx, sy))
                .collect(),
        })
    }
}
