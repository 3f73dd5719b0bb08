//! Frame-to-frame face track association.
//!
//! Greedy IoU tracker: detections are assigned to live tracks by best IoU,
//! unmatched confident detections open new tracks, and tracks unseen for a
//! buffer of updates are dropped. Track IDs let the attendance pipeline
//! recognize each face once and reuse the identity while the person stays
//! in frame.

use crate::types::BoundingBox;

/// A detection that has been associated with a track.
#[derive(Debug, Clone)]
pub struct TrackedFace {
    pub track_id: u64,
    pub bbox: BoundingBox,
}

struct TrackState {
    id: u64,
    bbox: BoundingBox,
    /// Consecutive updates without a matching detection.
    missed: u32,
}

/// Greedy IoU tracker.
pub struct IouTracker {
    tracks: Vec<TrackState>,
    next_id: u64,
    /// Minimum IoU for a detection to join an existing track.
    iou_threshold: f32,
    /// Minimum detection confidence to open a new track.
    activation_confidence: f32,
    /// Updates a track may go unmatched before it is dropped.
    lost_buffer: u32,
}

impl IouTracker {
    pub fn new(iou_threshold: f32, activation_confidence: f32, lost_buffer: u32) -> Self {
        Self {
            tracks: Vec::new(),
            next_id: 1,
            iou_threshold,
            activation_confidence,
            lost_buffer,
        }
    }

    /// Associate one frame's detections with tracks.
    ///
    /// Returns the tracked faces visible in this frame. A reappearing face
    /// whose track already expired gets a fresh ID.
    pub fn update(&mut self, detections: &[BoundingBox]) -> Vec<TrackedFace> {
        for track in &mut self.tracks {
            track.missed += 1;
        }

        // Candidate (track, detection) pairs above the IoU gate, best first.
        let mut candidates: Vec<(usize, usize, f32)> = Vec::new();
        for (ti, track) in self.tracks.iter().enumerate() {
            for (di, det) in detections.iter().enumerate() {
                let iou = track.bbox.iou(det);
                if iou >= self.iou_threshold {
                    candidates.push((ti, di, iou));
                }
            }
        }
        candidates.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));

        let mut track_taken = vec![false; self.tracks.len()];
        let mut det_taken = vec![false; detections.len()];
        let mut visible = Vec::new();

        for (ti, di, _) in candidates {
            if track_taken[ti] || det_taken[di] {
                continue;
            }
            track_taken[ti] = true;
            det_taken[di] = true;

            let track = &mut self.tracks[ti];
            track.bbox = detections[di].clone();
            track.missed = 0;
            visible.push(TrackedFace {
                track_id: track.id,
                bbox: detections[di].clone(),
            });
        }

        // Unmatched confident detections open new tracks.
        for (di, det) in detections.iter().enumerate() {
            if det_taken[di] || det.confidence < self.activation_confidence {
                continue;
            }
            let id = self.next_id;
            self.next_id += 1;
            self.tracks.push(TrackState {
                id,
                bbox: det.clone(),
                missed: 0,
            });
            visible.push(TrackedFace {
                track_id: id,
                bbox: det.clone(),
            });
        }

        let lost_buffer = self.lost_buffer;
        self.tracks.retain(|t| t.missed <= lost_buffer);

        visible
    }

    /// Forget all tracks (e.g., when the gallery changes).
    pub fn clear(&mut self) {
        self.tracks.clear();
    }

    /// Number of tracks currently alive (including briefly unseen ones).
    pub fn active_count(&self) -> usize {
        self.tracks.len()
    }
}
