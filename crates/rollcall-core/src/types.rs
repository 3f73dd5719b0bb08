use serde::{Deserialize, Serialize};

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    /// Intersection-over-Union with another box. Used by NMS and by the
    /// frame-to-frame tracker for detection/track association.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);

        let inter_w = (x2 - x1).max(0.0);
        let inter_h = (y2 - y1).max(0.0);
        let inter_area = inter_w * inter_h;

        let area_a = self.width * self.height;
        let area_b = other.width * other.height;
        let union_area = area_a + area_b - inter_area;

        if union_area > 0.0 {
            inter_area / union_area
        } else {
            0.0
        }
    }
}

/// Face embedding vector (512-dimensional for ArcFace).
///
/// Embeddings produced by the recognizer are L2-normalized, so cosine
/// similarity between two of them lives in [-1, 1].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    /// Build an embedding from raw model output, L2-normalizing the values.
    /// A zero vector is passed through unchanged.
    pub fn from_raw(raw: Vec<f32>, model_version: Option<String>) -> Self {
        let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
        let values = if norm > 0.0 {
            raw.iter().map(|x| x / norm).collect()
        } else {
            raw
        };
        Self { values, model_version }
    }

    /// Cosine similarity between two embeddings, in [-1, 1]. Higher = more
    /// similar. Divides by both norms so un-normalized inputs still compare
    /// correctly.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }

    /// Euclidean distance between two embeddings. Diagnostics only; matching
    /// uses cosine similarity.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// One enrolled identity: a person and their reference embedding.
///
/// Created at enrollment, replaced only by re-enrollment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GalleryEntry {
    pub person_id: String,
    pub name: String,
    pub embedding: Embedding,
}

/// Result of matching a probe embedding against the enrolled gallery.
#[derive(Debug, Clone)]
pub struct MatchResult {
    pub matched: bool,
    /// Cosine similarity of the best gallery entry, [-1, 1].
    pub similarity: f32,
    pub person_id: Option<String>,
    pub name: Option<String>,
}

impl MatchResult {
    /// A non-match with zero similarity (empty gallery, no usable probe).
    pub fn no_match() -> Self {
        Self {
            matched: false,
            similarity: 0.0,
            person_id: None,
            name: None,
        }
    }
}

/// Strategy for comparing a probe embedding against the enrolled gallery.
pub trait Matcher {
    fn compare(&self, probe: &Embedding, gallery: &[GalleryEntry], threshold: f32) -> MatchResult;
}

/// Cosine similarity matcher: full gallery scan, best match wins, and the
/// result counts as a match only when the best similarity strictly exceeds
/// the threshold.
pub struct CosineMatcher;

impl Matcher for CosineMatcher {
    fn compare(&self, probe: &Embedding, gallery: &[GalleryEntry], threshold: f32) -> MatchResult {
        let mut best_sim = f32::NEG_INFINITY;
        let mut best_idx: Option<usize> = None;

        for (i, entry) in gallery.iter().enumerate() {
            let sim = probe.similarity(&entry.embedding);
            if sim > best_sim {
                best_sim = sim;
                best_idx = Some(i);
            }
        }

        match best_idx {
            Some(idx) if best_sim > threshold => MatchResult {
                matched: true,
                similarity: best_sim,
                person_id: Some(gallery[idx].person_id.clone()),
                name: Some(gallery[idx].name.clone()),
            },
            Some(_) => MatchResult {
                matched: false,
                similarity: best_sim,
                person_id: None,
                name: None,
            },
            None => MatchResult::no_match(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn embedding(values: Vec<f32>) -> Embedding {
        Embedding { values, model_version: None }
    }

    fn entry(id: &str, name: &str, values: Vec<f32>) -> GalleryEntry {
        GalleryEntry {
            person_id: id.into(),
            name: name.into(),
            embedding: embedding(values),
        }
    }

    #[test]
    fn test_from_raw_normalizes() {
        let e = Embedding::from_raw(vec![3.0, 4.0], None);
        let norm: f32 = e.values.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
        assert!((e.values[0] - 0.6).abs() < 1e-6);
        assert!((e.values[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_from_raw_zero_vector_unchanged() {
        let e = Embedding::from_raw(vec![0.0, 0.0, 0.0], None);
        assert_eq!(e.values, vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_cosine_similarity_identical() {
        let a = embedding(vec![1.0, 0.0, 0.0]);
        let b = embedding(vec![1.0, 0.0, 0.0]);
        assert!((a.similarity(&b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = embedding(vec![1.0, 0.0]);
        let b = embedding(vec![0.0, 1.0]);
        assert!(a.similarity(&b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_opposite() {
        let a = embedding(vec![1.0, 0.0]);
        let b = embedding(vec![-1.0, 0.0]);
        assert!((a.similarity(&b) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_zero_vector() {
        let a = embedding(vec![0.0, 0.0]);
        let b = embedding(vec![1.0, 0.0]);
        assert_eq!(a.similarity(&b), 0.0);
    }

    #[test]
    fn test_euclidean_distance() {
        let a = embedding(vec![0.0, 0.0]);
        let b = embedding(vec![3.0, 4.0]);
        assert!((a.euclidean_distance(&b) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_identical() {
        let a = BoundingBox {
            x: 0.0, y: 0.0, width: 100.0, height: 100.0,
            confidence: 1.0, landmarks: None,
        };
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_disjoint() {
        let a = BoundingBox {
            x: 0.0, y: 0.0, width: 10.0, height: 10.0,
            confidence: 1.0, landmarks: None,
        };
        let b = BoundingBox {
            x: 20.0, y: 20.0, width: 10.0, height: 10.0,
            confidence: 1.0, landmarks: None,
        };
        assert!(a.iou(&b).abs() < 1e-6);
    }

    #[test]
    fn test_iou_partial() {
        let a = BoundingBox {
            x: 0.0, y: 0.0, width: 10.0, height: 10.0,
            confidence: 1.0, landmarks: None,
        };
        let b = BoundingBox {
            x: 5.0, y: 0.0, width: 10.0, height: 10.0,
            confidence: 1.0, landmarks: None,
        };
        // Overlap: 5x10 = 50, union: 100+100-50 = 150
        assert!((a.iou(&b) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_matcher_best_entry_wins() {
        let probe = embedding(vec![1.0, 0.0, 0.0]);
        let gallery = vec![
            entry("e-100", "Priya", vec![0.0, 1.0, 0.0]),
            entry("e-101", "Marcus", vec![0.0, 0.0, 1.0]),
            entry("e-102", "Aiko", vec![1.0, 0.0, 0.0]),
        ];

        let result = CosineMatcher.compare(&probe, &gallery, 0.6);
        assert!(result.matched);
        assert_eq!(result.person_id.as_deref(), Some("e-102"));
        assert_eq!(result.name.as_deref(), Some("Aiko"));
        assert!((result.similarity - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_matcher_below_threshold_reports_similarity() {
        let probe = embedding(vec![1.0, 0.2]);
        let gallery = vec![entry("e-100", "Priya", vec![0.2, 1.0])];

        let result = CosineMatcher.compare(&probe, &gallery, 0.6);
        assert!(!result.matched);
        assert!(result.person_id.is_none());
        // Best similarity is still surfaced for logging/diagnostics.
        assert!(result.similarity > 0.0 && result.similarity < 0.6);
    }

    #[test]
    fn test_matcher_threshold_is_exclusive() {
        // Similarity exactly at the threshold does not count as a match.
        let probe = embedding(vec![1.0, 0.0]);
        let gallery = vec![entry("e-100", "Priya", vec![1.0, 0.0])];

        let result = CosineMatcher.compare(&probe, &gallery, 1.0);
        assert!(!result.matched);
        assert!((result.similarity - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_matcher_empty_gallery() {
        let probe = embedding(vec![1.0, 0.0]);
        let result = CosineMatcher.compare(&probe, &[], 0.6);
        assert!(!result.matched);
        assert_eq!(result.similarity, 0.0);
    }
}
