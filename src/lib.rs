//! # target_finder
//!
//! 複数の物体検出モデルの出力を融合し、「画像の中に物体Xがあるか、どこにあるか」を判定するライブラリです。
//!
//! ## 主な機能
//!
//! 1. **ルーティング**: ターゲットラベルから実行する検出器を選びます。専門検出器が担当するラベルでは汎用検出器を使いません。
//! 2. **閾値処理**: 検出器ごとに `max(モデルの下限, 呼び出し側の下限)` で絞り込みます。
//! 3. **融合とNMS**: 全検出器の結果を結合し、同じラベルで重なっているものを取り除きます。
//! 4. **判定**: ターゲットラベルが残っているかで `found` を決めます。
//! 5. **HTTP API / CLI**: `POST /detect` と、画像・カメラに対するコマンドを提供します。
//!
//! ## Example
//! ```no_run
//! use std::sync::Arc;
//! use target_finder::config::Config;
//! use target_finder::pipeline::{DetectionRequest, Pipeline};
//! use target_finder::registry::DetectorRegistry;
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = Config::load(None)?;
//! let registry = Arc::new(DetectorRegistry::from_config(&config)?);
//! let pipeline = Pipeline::new(registry, config.default_threshold);
//!
//! let img = image::open("docs/test.jpg")?;
//! let resp = pipeline.run(&DetectionRequest::new(img, "elevator", Some(0.5))?)?;
//! println!("found: {}", resp.found);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod detection_result;
pub mod detector;
pub mod error;
pub mod img_proc;
pub mod logging;
pub mod nms;
pub mod pipeline;
pub mod postprocess;
pub mod registry;
pub mod remote;
pub mod routing;
pub mod server;
pub mod stream;

#[cfg(feature = "camera")]
pub mod camera;
