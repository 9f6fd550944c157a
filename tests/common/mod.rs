#![allow(dead_code)]

use std::io::Cursor;
use std::sync::Arc;

use anyhow::{bail, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::{DynamicImage, ImageOutputFormat, RgbImage};

use target_finder::detector::{
    Activation, ClassNames, Detector, DetectorDescriptor, RawOutput, RawPrediction,
};
use target_finder::pipeline::Pipeline;
use target_finder::registry::DetectorRegistry;

/// 決まった検出結果を返す検出器
pub struct FixedDetector {
    predictions: Vec<RawPrediction>,
    names: ClassNames,
}

impl FixedDetector {
    pub fn labeled(rows: &[(&str, f32, [f32; 4])]) -> Self {
        Self {
            predictions: rows
                .iter()
                .map(|&(label, conf, xyxy)| RawPrediction {
                    cls: None,
                    label: Some(label.to_string()),
                    conf,
                    xyxy,
                })
                .collect(),
            names: ClassNames::new(),
        }
    }

    pub fn with_classes(names: ClassNames, rows: &[(u32, f32, [f32; 4])]) -> Self {
        Self {
            predictions: rows
                .iter()
                .map(|&(cls, conf, xyxy)| RawPrediction {
                    cls: Some(cls),
                    label: None,
                    conf,
                    xyxy,
                })
                .collect(),
            names,
        }
    }
}

impl Detector for FixedDetector {
    fn predict(&self, _img: &DynamicImage) -> Result<RawOutput> {
        Ok(RawOutput {
            names: self.names.clone(),
            predictions: self.predictions.clone(),
        })
    }
}

/// 常に推論に失敗する検出器
pub struct FailingDetector(pub &'static str);

impl Detector for FailingDetector {
    fn predict(&self, _img: &DynamicImage) -> Result<RawOutput> {
        bail!("{}", self.0)
    }
}

pub fn descriptor(
    name: &str,
    detector: impl Detector + 'static,
    floor: f32,
    activation: Activation,
) -> DetectorDescriptor {
    DetectorDescriptor::new(name, Arc::new(detector), floor, activation)
}

pub fn pipeline(descriptors: Vec<DetectorDescriptor>, default_threshold: f32) -> Pipeline {
    Pipeline::new(Arc::new(DetectorRegistry::new(descriptors)), default_threshold)
}

pub fn blank_image() -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::new(320, 240))
}

pub fn png_base64(img: &DynamicImage) -> String {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageOutputFormat::Png)
        .unwrap();
    STANDARD.encode(buf)
}
