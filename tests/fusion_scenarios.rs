mod common;

use target_finder::detection_result::labels_match;
use target_finder::detector::{Activation, ClassNames};
use target_finder::error::Error;
use target_finder::nms::{iou, NMS_IOU_THRESHOLD};
use target_finder::pipeline::{DetectionRequest, DetectorOutcome};
use target_finder::registry::DetectorRegistry;
use target_finder::routing::{DisabledDetector, RegistryEntry};

use common::*;

fn request(target: &str, threshold: Option<f32>) -> DetectionRequest {
    DetectionRequest::new(blank_image(), target, threshold).unwrap()
}

#[test]
fn overlapping_same_label_boxes_collapse_to_the_most_confident() {
    let p = pipeline(
        vec![descriptor(
            "elevator",
            FixedDetector::labeled(&[
                ("elevator", 0.9, [0., 0., 100., 100.]),
                ("elevator", 0.7, [0., 0., 100., 80.]),
            ]),
            0.25,
            Activation::Generalist,
        )],
        0.4,
    );

    let resp = p.run(&request("elevator", None)).unwrap();
    assert!(resp.found);
    assert_eq!(resp.detections.len(), 1);
    assert_eq!(resp.detections[0].confidence(), 0.9);
}

#[test]
fn different_labels_from_two_detectors_both_survive() {
    let full = [10., 10., 60., 60.];
    let p = pipeline(
        vec![
            descriptor(
                "general",
                FixedDetector::labeled(&[("person", 0.8, full)]),
                0.25,
                Activation::Generalist,
            ),
            descriptor(
                "signs",
                FixedDetector::labeled(&[("elevator", 0.6, full)]),
                0.25,
                Activation::Generalist,
            ),
        ],
        0.4,
    );

    let resp = p.run(&request("Elevator", None)).unwrap();
    assert!(resp.found);
    let labels: Vec<_> = resp.detections.iter().map(|d| d.label()).collect();
    assert_eq!(labels, vec!["person", "elevator"]);
}

#[test]
fn target_without_detector_is_not_found_rather_than_an_error() {
    let p = pipeline(
        vec![descriptor(
            "elevator",
            FixedDetector::labeled(&[("elevator", 0.9, [0., 0., 10., 10.])]),
            0.4,
            Activation::specialist(["elevator"]),
        )],
        0.4,
    );

    let resp = p.run(&request("bottle", None)).unwrap();
    assert!(!resp.found);
    assert!(resp.detections.is_empty());
    assert!(resp.diagnostics.detectors.is_empty());
}

#[test]
fn threshold_above_every_confidence_gives_empty_response() {
    let p = pipeline(
        vec![descriptor(
            "general",
            FixedDetector::labeled(&[
                ("bottle", 0.85, [0., 0., 10., 10.]),
                ("person", 0.7, [20., 20., 40., 40.]),
            ]),
            0.25,
            Activation::Generalist,
        )],
        0.4,
    );

    let resp = p.run(&request("bottle", Some(0.9))).unwrap();
    assert!(!resp.found);
    assert!(resp.detections.is_empty());
    assert_eq!(
        resp.diagnostics.detectors[0].outcome,
        DetectorOutcome::Ok {
            decoded: 2,
            skipped: 0,
            passed: 0
        }
    );
}

#[test]
fn one_failing_detector_degrades_gracefully() {
    let p = pipeline(
        vec![
            descriptor(
                "general",
                FailingDetector("backend timed out"),
                0.25,
                Activation::Generalist,
            ),
            descriptor(
                "backup",
                FixedDetector::labeled(&[
                    ("bottle", 0.8, [0., 0., 50., 50.]),
                    ("bottle", 0.6, [2., 2., 50., 50.]),
                    ("bottle", 0.3, [100., 100., 120., 120.]),
                ]),
                0.25,
                Activation::Generalist,
            ),
        ],
        0.4,
    );

    let resp = p.run(&request("bottle", None)).unwrap();
    assert!(resp.found);
    // 0.6 は NMS で、0.3 は閾値で落ちる
    assert_eq!(resp.detections.len(), 1);
    assert_eq!(resp.detections[0].confidence(), 0.8);

    match &resp.diagnostics.detectors[0].outcome {
        DetectorOutcome::Failed { error } => assert!(error.contains("backend timed out")),
        other => panic!("unexpected outcome: {:?}", other),
    }
}

#[test]
fn all_detectors_failing_names_each_of_them() {
    let p = pipeline(
        vec![
            descriptor("a", FailingDetector("boom"), 0.25, Activation::Generalist),
            descriptor("b", FailingDetector("bang"), 0.25, Activation::Generalist),
        ],
        0.4,
    );

    let err = p.run(&request("cup", None)).unwrap_err();
    match &err {
        Error::AllDetectorsFailed { failures } => {
            let names: Vec<_> = failures.iter().map(|f| f.detector.as_str()).collect();
            assert_eq!(names, vec!["a", "b"]);
        }
        other => panic!("unexpected error: {}", other),
    }
    assert!(!err.is_client_error());
}

#[test]
fn specialist_handles_its_label_instead_of_generalist() {
    let p = pipeline(
        vec![
            descriptor(
                "general",
                FixedDetector::labeled(&[("elevator", 0.95, [0., 0., 10., 10.])]),
                0.25,
                Activation::Generalist,
            ),
            descriptor(
                "elevator",
                FixedDetector::labeled(&[("elevator", 0.5, [50., 50., 90., 90.])]),
                0.4,
                Activation::specialist(["elevator"]),
            ),
        ],
        0.25,
    );

    let resp = p.run(&request("ELEVATOR", None)).unwrap();
    assert!(resp.found);
    assert_eq!(resp.detections.len(), 1);
    assert_eq!(resp.detections[0].confidence(), 0.5);
    assert_eq!(resp.diagnostics.detectors.len(), 1);
    assert_eq!(resp.diagnostics.detectors[0].detector, "elevator");
    assert_eq!(resp.diagnostics.detectors[0].floor, 0.4);
}

#[test]
fn disabled_specialist_yields_note_and_no_detections() {
    let registry = DetectorRegistry::from_entries(vec![
        RegistryEntry::Enabled(descriptor(
            "general",
            FixedDetector::labeled(&[("elevator", 0.95, [0., 0., 10., 10.])]),
            0.25,
            Activation::Generalist,
        )),
        RegistryEntry::Disabled(DisabledDetector {
            name: "elevator".into(),
            reason: "weights not found".into(),
            activation: Activation::specialist(["elevator"]),
        }),
    ]);
    let p = target_finder::pipeline::Pipeline::new(std::sync::Arc::new(registry), 0.4);

    let resp = p.run(&request("elevator", None)).unwrap();
    assert!(!resp.found);
    assert!(resp.detections.is_empty());
    assert_eq!(resp.diagnostics.notes.len(), 1);
    assert!(resp.diagnostics.notes[0].contains("weights not found"));
}

#[test]
fn class_ids_are_resolved_through_the_name_table() {
    let names = ClassNames::from([(0, "person".to_string()), (39, "bottle".to_string())]);
    let p = pipeline(
        vec![descriptor(
            "general",
            FixedDetector::with_classes(
                names,
                &[(39, 0.7, [0., 0., 10., 10.]), (0, 0.9, [20., 0., 40., 60.])],
            ),
            0.25,
            Activation::Generalist,
        )],
        0.4,
    );

    let resp = p.run(&request("Bottle", None)).unwrap();
    assert!(resp.found);
    assert_eq!(resp.detections[0].label(), "person");
    assert_eq!(resp.detections[1].label(), "bottle");
}

#[test]
fn response_invariants_hold_for_mixed_input() {
    let p = pipeline(
        vec![
            descriptor(
                "a",
                FixedDetector::labeled(&[
                    ("cup", 0.9, [0., 0., 20., 20.]),
                    ("cup", 0.85, [1., 1., 21., 21.]),
                    ("Cup", 0.5, [30., 30., 50., 50.]),
                    ("chair", 0.6, [0., 0., 20., 20.]),
                ]),
                0.25,
                Activation::Generalist,
            ),
            descriptor(
                "b",
                FixedDetector::labeled(&[
                    ("CUP", 0.88, [0., 0., 19., 19.]),
                    ("chair", 0.45, [100., 100., 140., 140.]),
                ]),
                0.3,
                Activation::Generalist,
            ),
        ],
        0.4,
    );

    for target in ["cup", "chair", "table"] {
        let resp = p.run(&request(target, None)).unwrap();
        let dets = &resp.detections;

        assert_eq!(resp.found, dets.iter().any(|d| labels_match(d.label(), target)));
        for w in dets.windows(2) {
            assert!(w[0].confidence() >= w[1].confidence());
        }
        for (i, a) in dets.iter().enumerate() {
            for b in dets.iter().skip(i + 1) {
                if labels_match(a.label(), b.label()) {
                    assert!(iou(a.bbox(), b.bbox()) <= NMS_IOU_THRESHOLD);
                }
            }
        }
    }
}
