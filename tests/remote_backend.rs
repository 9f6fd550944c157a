mod common;

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::{DynamicImage, RgbImage};
use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use target_finder::config::{Config, DetectorConfig};
use target_finder::detector::{Activation, Detector};
use target_finder::error::Error;
use target_finder::pipeline::{DetectionRequest, DetectorOutcome, Pipeline};
use target_finder::registry::DetectorRegistry;
use target_finder::remote::RemoteDetector;
use target_finder::routing::RegistryEntry;

use common::*;

fn detector_config(name: &str, endpoint: String, max_side: u32, mandatory: bool) -> DetectorConfig {
    DetectorConfig {
        name: name.to_string(),
        endpoint,
        floor: 0.25,
        specialties: vec![],
        mandatory,
        timeout_secs: 5,
        max_side,
    }
}

async fn backend_with_info() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/info"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "names": { "0": "person", "39": "bottle" } })),
        )
        .mount(&server)
        .await;
    server
}

#[tokio::test(flavor = "multi_thread")]
async fn predictions_come_back_in_source_pixels() {
    let server = backend_with_info().await;
    Mock::given(method("POST"))
        .and(path("/predict"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "predictions": [{ "cls": 39, "conf": 0.9, "xyxy": [10.0, 20.0, 110.0, 70.0] }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    // 末尾のスラッシュは取り除かれる
    let cfg = detector_config("general", format!("{}/", server.uri()), 500, true);
    let out = tokio::task::spawn_blocking(move || {
        let remote = RemoteDetector::connect(&cfg).unwrap();
        remote
            .predict(&DynamicImage::ImageRgb8(RgbImage::new(2000, 1000)))
            .unwrap()
    })
    .await
    .unwrap();

    // 予測レスポンスにnamesが無いので、接続時のクラス名表が使われる
    assert_eq!(out.names.get(&39).map(String::as_str), Some("bottle"));
    assert_eq!(out.predictions.len(), 1);
    assert_eq!(out.predictions[0].cls, Some(39));
    assert_eq!(out.predictions[0].xyxy, [40., 80., 440., 280.]);

    let requests = server.received_requests().await.unwrap();
    let predict = requests
        .iter()
        .find(|r| r.url.path() == "/predict")
        .unwrap();
    let body: Value = serde_json::from_slice(&predict.body).unwrap();
    let png = STANDARD.decode(body["image"].as_str().unwrap()).unwrap();
    let uploaded = image::load_from_memory(&png).unwrap();
    assert_eq!((uploaded.width(), uploaded.height()), (500, 250));
}

#[tokio::test(flavor = "multi_thread")]
async fn names_in_predict_response_take_precedence() {
    let server = backend_with_info().await;
    Mock::given(method("POST"))
        .and(path("/predict"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "names": { "0": "elevator" },
            "predictions": [{ "class_id": 0, "conf": 0.7, "xyxy": [1.0, 2.0, 3.0, 4.0] }]
        })))
        .mount(&server)
        .await;

    let cfg = detector_config("elevator", server.uri(), 1280, true);
    let out = tokio::task::spawn_blocking(move || {
        let remote = RemoteDetector::connect(&cfg).unwrap();
        remote
            .predict(&DynamicImage::ImageRgb8(RgbImage::new(64, 48)))
            .unwrap()
    })
    .await
    .unwrap();

    assert_eq!(out.names.get(&0).map(String::as_str), Some("elevator"));
    assert_eq!(out.names.get(&39), None);
    assert_eq!(out.predictions[0].xyxy, [1., 2., 3., 4.]);
}

#[tokio::test(flavor = "multi_thread")]
async fn backend_error_status_is_a_per_detector_failure() {
    let server = backend_with_info().await;
    Mock::given(method("POST"))
        .and(path("/predict"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let cfg = detector_config("general", server.uri(), 1280, true);
    let resp = tokio::task::spawn_blocking(move || {
        let remote = RemoteDetector::connect(&cfg).unwrap();
        let p = Pipeline::new(
            Arc::new(DetectorRegistry::new(vec![
                descriptor("general", remote, 0.25, Activation::Generalist),
                descriptor(
                    "backup",
                    FixedDetector::labeled(&[("bottle", 0.8, [0., 0., 10., 10.])]),
                    0.25,
                    Activation::Generalist,
                ),
            ])),
            0.4,
        );
        p.run(&DetectionRequest::new(blank_image(), "bottle", None).unwrap())
            .unwrap()
    })
    .await
    .unwrap();

    assert!(resp.found);
    assert_eq!(resp.diagnostics.detectors[0].detector, "general");
    match &resp.diagnostics.detectors[0].outcome {
        DetectorOutcome::Failed { error } => {
            assert!(error.contains("inference request failed"));
            assert!(error.contains("500"));
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn unavailable_info_is_a_load_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/info"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let mandatory = Config {
        detectors: vec![detector_config("general", server.uri(), 1280, true)],
        ..Config::default()
    };
    let optional = Config {
        detectors: vec![detector_config("general", server.uri(), 1280, false)],
        ..Config::default()
    };

    let (mandatory, optional) = tokio::task::spawn_blocking(move || {
        (
            DetectorRegistry::from_config(&mandatory).map(|r| r.enabled_count()),
            DetectorRegistry::from_config(&optional).map(|r| {
                r.entries()
                    .iter()
                    .map(|e| match e {
                        RegistryEntry::Enabled(_) => None,
                        RegistryEntry::Disabled(d) => Some(d.reason.clone()),
                    })
                    .collect::<Vec<_>>()
            }),
        )
    })
    .await
    .unwrap();

    match mandatory {
        Err(Error::DetectorLoad { detector, reason }) => {
            assert_eq!(detector, "general");
            assert!(reason.contains("not reachable"));
        }
        other => panic!("unexpected result: {:?}", other),
    }
    let reasons = optional.unwrap();
    assert_eq!(reasons.len(), 1);
    assert!(reasons[0].as_ref().unwrap().contains("503"));
}
