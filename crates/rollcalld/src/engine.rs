use crate::config::Config;
use rollcall_core::{
    BoundingBox, CosineMatcher, Embedding, FaceDetector, FaceRecognizer, GalleryEntry,
    IouTracker, Matcher,
};
use rollcall_hw::{Camera, Frame};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::mpsc as std_mpsc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// How long an enrollment waits for usable frames before giving up.
const ENROLL_DEADLINE: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera error: {0}")]
    Camera(#[from] rollcall_hw::CameraError),
    #[error("detector error: {0}")]
    Detector(#[from] rollcall_core::detector::DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] rollcall_core::recognizer::RecognizerError),
    #[error("snapshot dir: {0}")]
    SnapshotDir(#[from] std::io::Error),
    #[error("no face detected in any sampled frame")]
    NoFaceDetected,
    #[error("multiple faces in frame — enrollment needs exactly one person in view")]
    MultipleFaces,
    #[error("face already enrolled as {name} (similarity {similarity:.2})")]
    DuplicateFace { name: String, similarity: f32 },
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Events flowing from the inference thread to the recorder task.
#[derive(Debug)]
pub enum PipelineEvent {
    /// A tracked face matched an enrolled person. Emitted every frame the
    /// track is visible; the recorder's gates decide what to persist.
    Recognized {
        track_id: u64,
        person_id: String,
        name: String,
        similarity: f32,
    },
    /// A tracked face matched nobody. Emitted once per track.
    Unknown {
        track_id: u64,
        snapshot_path: Option<String>,
        embedding: Embedding,
    },
}

/// Result of an enrollment capture.
pub struct EnrollResult {
    pub embedding: Embedding,
    /// Detection confidence of the winning frame.
    pub quality_score: f32,
}

/// Messages sent from D-Bus handlers to the inference thread.
enum EngineRequest {
    Enroll {
        frames_count: usize,
        reply: oneshot::Sender<Result<EnrollResult, EngineError>>,
    },
    ReloadGallery {
        gallery: Vec<GalleryEntry>,
        reply: oneshot::Sender<usize>,
    },
}

/// Clone-safe handle to the inference thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Request enrollment: sample frames from the live stream, require
    /// exactly one face, pick the best detection, extract its embedding.
    pub async fn enroll(&self, frames_count: usize) -> Result<EnrollResult, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Enroll {
                frames_count,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Swap in a freshly loaded gallery. Clears the per-track identity cache
    /// so removed persons stop being recognized immediately.
    pub async fn reload_gallery(&self, gallery: Vec<GalleryEntry>) -> Result<usize, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::ReloadGallery {
                gallery,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }
}

/// Spawn the capture and inference threads.
///
/// Opens the camera and loads both ONNX models synchronously (fail-fast),
/// then starts the pipeline: the capture thread feeds a bounded frame queue
/// with `try_send` — when inference falls behind, frames are dropped at the
/// queue, never buffered unboundedly — and the inference thread consumes it.
pub fn spawn_engine(
    config: &Config,
    gallery: Vec<GalleryEntry>,
    events: mpsc::Sender<PipelineEvent>,
) -> Result<EngineHandle, EngineError> {
    let camera = Camera::open(&config.camera_device)?;
    tracing::info!(
        device = %config.camera_device,
        width = camera.width,
        height = camera.height,
        fourcc = ?camera.fourcc,
        "camera opened"
    );

    let detector = FaceDetector::load(&config.scrfd_model_path())?;
    tracing::info!(path = %config.scrfd_model_path(), "SCRFD detector loaded");

    let recognizer = FaceRecognizer::load(&config.arcface_model_path())?;
    tracing::info!(path = %config.arcface_model_path(), "ArcFace recognizer loaded");

    std::fs::create_dir_all(&config.snapshot_dir)?;

    let (frame_tx, frame_rx) = std_mpsc::sync_channel::<Frame>(config.frame_queue_capacity);
    let (req_tx, req_rx) = mpsc::channel::<EngineRequest>(4);

    let warmup = config.warmup_frames;
    std::thread::Builder::new()
        .name("rollcall-capture".into())
        .spawn(move || capture_loop(camera, frame_tx, warmup))
        .expect("failed to spawn capture thread");

    let mut pipeline = Pipeline {
        detector,
        recognizer,
        matcher: CosineMatcher,
        tracker: IouTracker::new(config.tracker_iou, 0.5, config.lost_track_buffer),
        gallery,
        identities: HashMap::new(),
        similarity_threshold: config.similarity_threshold,
        duplicate_threshold: config.duplicate_threshold,
        snapshot_dir: config.snapshot_dir.clone(),
        events,
    };

    std::thread::Builder::new()
        .name("rollcall-inference".into())
        .spawn(move || {
            tracing::info!("inference thread started");
            pipeline.run(frame_rx, req_rx);
            tracing::info!("inference thread exiting");
        })
        .expect("failed to spawn inference thread");

    Ok(EngineHandle { tx: req_tx })
}

/// Capture loop: owns the camera, pushes non-dark frames into the queue.
fn capture_loop(camera: Camera, frame_tx: std_mpsc::SyncSender<Frame>, warmup: usize) {
    let mut stream = match camera.start_stream() {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "failed to start capture stream");
            return;
        }
    };

    if warmup > 0 {
        tracing::info!(count = warmup, "discarding warmup frames");
        for _ in 0..warmup {
            let _ = stream.next_frame();
        }
    }

    loop {
        match stream.next_frame() {
            Ok(frame) => {
                if frame.is_dark {
                    tracing::trace!(seq = frame.sequence, "skipping dark frame");
                    continue;
                }
                match frame_tx.try_send(frame) {
                    Ok(()) => {}
                    // Inference is behind; dropping here keeps capture latency flat.
                    Err(std_mpsc::TrySendError::Full(_)) => {
                        tracing::trace!("frame queue full; dropping frame");
                    }
                    Err(std_mpsc::TrySendError::Disconnected(_)) => break,
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "camera capture failed; capture thread exiting");
                break;
            }
        }
    }
}

/// Identity resolution for a live track. Recognition runs once per track;
/// the result is reused for the track's lifetime.
enum TrackIdentity {
    Known {
        person_id: String,
        name: String,
        similarity: f32,
    },
    Unknown,
}

/// State owned by the inference thread.
struct Pipeline {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
    matcher: CosineMatcher,
    tracker: IouTracker,
    gallery: Vec<GalleryEntry>,
    identities: HashMap<u64, TrackIdentity>,
    similarity_threshold: f32,
    duplicate_threshold: f32,
    snapshot_dir: PathBuf,
    events: mpsc::Sender<PipelineEvent>,
}

impl Pipeline {
    fn run(
        &mut self,
        frame_rx: std_mpsc::Receiver<Frame>,
        mut req_rx: mpsc::Receiver<EngineRequest>,
    ) {
        loop {
            while let Ok(req) = req_rx.try_recv() {
                self.handle_request(req, &frame_rx);
            }

            match frame_rx.recv_timeout(Duration::from_millis(200)) {
                Ok(frame) => self.process_frame(&frame),
                Err(std_mpsc::RecvTimeoutError::Timeout) => continue,
                Err(std_mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    fn handle_request(&mut self, req: EngineRequest, frame_rx: &std_mpsc::Receiver<Frame>) {
        match req {
            EngineRequest::Enroll {
                frames_count,
                reply,
            } => {
                let result = self.run_enroll(frame_rx, frames_count);
                let _ = reply.send(result);
            }
            EngineRequest::ReloadGallery { gallery, reply } => {
                tracing::info!(entries = gallery.len(), "gallery reloaded");
                self.gallery = gallery;
                self.identities.clear();
                self.tracker.clear();
                let _ = reply.send(self.gallery.len());
            }
        }
    }

    /// One frame through detect → track → resolve identities → emit events.
    fn process_frame(&mut self, frame: &Frame) {
        let faces = match self.detector.detect(&frame.data, frame.width, frame.height) {
            Ok(faces) => faces,
            Err(e) => {
                tracing::warn!(error = %e, seq = frame.sequence, "detection failed; skipping frame");
                return;
            }
        };

        let tracked = self.tracker.update(&faces);

        // Drop cached identities for tracks the tracker no longer reports.
        let live: std::collections::HashSet<u64> = tracked.iter().map(|t| t.track_id).collect();
        self.identities.retain(|id, _| live.contains(id));

        for face in &tracked {
            match self.identities.get(&face.track_id) {
                Some(TrackIdentity::Known {
                    person_id,
                    name,
                    similarity,
                }) => {
                    self.emit(PipelineEvent::Recognized {
                        track_id: face.track_id,
                        person_id: person_id.clone(),
                        name: name.clone(),
                        similarity: *similarity,
                    });
                }
                Some(TrackIdentity::Unknown) => {}
                None => self.resolve_track(frame, face.track_id, &face.bbox),
            }
        }
    }

    /// First sighting of a track: extract an embedding and match it.
    fn resolve_track(&mut self, frame: &Frame, track_id: u64, bbox: &BoundingBox) {
        if bbox.landmarks.is_none() {
            return;
        }

        let embedding = match self
            .recognizer
            .extract(&frame.data, frame.width, frame.height, bbox)
        {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(error = %e, track_id, "embedding extraction failed");
                return;
            }
        };

        let result = self
            .matcher
            .compare(&embedding, &self.gallery, self.similarity_threshold);

        if result.matched {
            // person_id/name are always present on a positive match.
            let person_id = result.person_id.unwrap_or_default();
            let name = result.name.unwrap_or_default();
            tracing::info!(
                track_id,
                person_id = %person_id,
                name = %name,
                similarity = result.similarity,
                "face recognized"
            );
            self.identities.insert(
                track_id,
                TrackIdentity::Known {
                    person_id: person_id.clone(),
                    name: name.clone(),
                    similarity: result.similarity,
                },
            );
            self.emit(PipelineEvent::Recognized {
                track_id,
                person_id,
                name,
                similarity: result.similarity,
            });
        } else {
            tracing::info!(
                track_id,
                best_similarity = result.similarity,
                "unknown face"
            );
            let snapshot_path = self.save_snapshot(frame, bbox);
            self.identities.insert(track_id, TrackIdentity::Unknown);
            self.emit(PipelineEvent::Unknown {
                track_id,
                snapshot_path,
                embedding,
            });
        }
    }

    /// Save the face crop as a PNG for review. Failures are logged, never
    /// fatal — the sighting is still reported without a snapshot.
    fn save_snapshot(&self, frame: &Frame, bbox: &BoundingBox) -> Option<String> {
        let (data, w, h) = frame.crop(bbox.x, bbox.y, bbox.width, bbox.height)?;
        let img = image::RgbImage::from_raw(w, h, data)?;

        let path = self
            .snapshot_dir
            .join(format!("unknown-{}.png", uuid::Uuid::new_v4()));
        if let Err(e) = img.save(&path) {
            tracing::warn!(error = %e, path = %path.display(), "failed to save snapshot");
            return None;
        }
        Some(path.to_string_lossy().into_owned())
    }

    fn emit(&self, event: PipelineEvent) {
        if let Err(mpsc::error::TrySendError::Full(_)) = self.events.try_send(event) {
            // Recorder is behind; the gates make a dropped event harmless.
            tracing::trace!("event queue full; dropping event");
        }
    }

    /// Sample frames from the live stream and pick the enrollment face.
    fn run_enroll(
        &mut self,
        frame_rx: &std_mpsc::Receiver<Frame>,
        frames_count: usize,
    ) -> Result<EnrollResult, EngineError> {
        let deadline = Instant::now() + ENROLL_DEADLINE;
        let mut frames = Vec::with_capacity(frames_count);
        let mut detections = Vec::with_capacity(frames_count);

        while frames.len() < frames_count {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            let frame = match frame_rx.recv_timeout(remaining) {
                Ok(f) => f,
                Err(_) => break,
            };
            let faces = self.detector.detect(&frame.data, frame.width, frame.height)?;
            detections.push(faces);
            frames.push(frame);
        }

        let (frame_idx, face) = pick_enroll_face(&detections)?;
        let frame = &frames[frame_idx];

        tracing::info!(
            confidence = face.confidence,
            frame = frame_idx,
            "enroll: best face selected"
        );

        let embedding = self
            .recognizer
            .extract(&frame.data, frame.width, frame.height, &face)?;

        let result = self
            .matcher
            .compare(&embedding, &self.gallery, self.duplicate_threshold);
        if result.matched {
            return Err(EngineError::DuplicateFace {
                name: result.name.unwrap_or_default(),
                similarity: result.similarity,
            });
        }

        Ok(EnrollResult {
            embedding,
            quality_score: face.confidence,
        })
    }
}

/// Pick the enrollment face from per-frame detections.
///
/// Only frames containing exactly one face are eligible; the highest
/// confidence detection among them wins. Frames with several faces are not
/// eligible, and if those are the only frames with faces at all the
/// enrollment fails with a distinct error so the caller can tell the user to
/// step in front of the camera alone.
fn pick_enroll_face(per_frame: &[Vec<BoundingBox>]) -> Result<(usize, BoundingBox), EngineError> {
    let mut best: Option<(usize, BoundingBox)> = None;
    let mut multi_face_frames = 0usize;

    for (i, faces) in per_frame.iter().enumerate() {
        match faces.as_slice() {
            [] => {}
            [face] => {
                let better = best
                    .as_ref()
                    .map(|(_, b)| face.confidence > b.confidence)
                    .unwrap_or(true);
                if better {
                    best = Some((i, face.clone()));
                }
            }
            _ => multi_face_frames += 1,
        }
    }

    match best {
        Some(winner) => Ok(winner),
        None if multi_face_frames > 0 => Err(EngineError::MultipleFaces),
        None => Err(EngineError::NoFaceDetected),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face(confidence: f32) -> BoundingBox {
        BoundingBox {
            x: 100.0,
            y: 100.0,
            width: 80.0,
            height: 80.0,
            confidence,
            landmarks: None,
        }
    }

    #[test]
    fn test_pick_best_single_face() {
        let per_frame = vec![vec![face(0.7)], vec![face(0.9)], vec![face(0.8)]];
        let (idx, winner) = pick_enroll_face(&per_frame).unwrap();
        assert_eq!(idx, 1);
        assert_eq!(winner.confidence, 0.9);
    }

    #[test]
    fn test_empty_frames_are_skipped() {
        let per_frame = vec![vec![], vec![face(0.6)], vec![]];
        let (idx, _) = pick_enroll_face(&per_frame).unwrap();
        assert_eq!(idx, 1);
    }

    #[test]
    fn test_no_face_anywhere() {
        let per_frame: Vec<Vec<BoundingBox>> = vec![vec![], vec![]];
        assert!(matches!(
            pick_enroll_face(&per_frame),
            Err(EngineError::NoFaceDetected)
        ));
    }

    #[test]
    fn test_only_crowded_frames_is_an_error() {
        let per_frame = vec![vec![face(0.9), face(0.8)], vec![face(0.7), face(0.6)]];
        assert!(matches!(
            pick_enroll_face(&per_frame),
            Err(EngineError::MultipleFaces)
        ));
    }

    #[test]
    fn test_crowded_frames_ignored_when_clean_frame_exists() {
        let per_frame = vec![vec![face(0.95), face(0.9)], vec![face(0.6)]];
        let (idx, winner) = pick_enroll_face(&per_frame).unwrap();
        assert_eq!(idx, 1);
        assert_eq!(winner.confidence, 0.6);
    }
}
