//! rollcall-core — Face detection, recognition, and track association.
//!
//! SCRFD for face detection and ArcFace for embedding extraction, both via
//! ONNX Runtime on CPU, plus the IoU tracker that ties detections together
//! across frames for the attendance pipeline.

pub mod alignment;
pub mod detector;
pub mod recognizer;
pub mod tracker;
pub mod types;

pub use detector::FaceDetector;
pub use recognizer::FaceRecognizer;
pub use tracker::{IouTracker, TrackedFace};
pub use types::{BoundingBox, CosineMatcher, Embedding, GalleryEntry, MatchResult, Matcher};

use std::path::PathBuf;

/// Default directory for ONNX model files.
pub fn default_model_dir() -> PathBuf {
    PathBuf::from("/usr/share/rollcall/models")
}
