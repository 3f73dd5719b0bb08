use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Daemon configuration.
///
/// Loaded from an optional TOML file (`ROLLCALL_CONFIG`), then overridden by
/// `ROLLCALL_*` environment variables. Every field has a default, so a bare
/// daemon start works without any file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// V4L2 device path.
    pub camera_device: String,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Path to the embedding encryption key file.
    pub key_path: PathBuf,
    /// Directory for unknown-face snapshots.
    pub snapshot_dir: PathBuf,
    /// Cosine similarity threshold for a positive match.
    pub similarity_threshold: f32,
    /// Similarity above which an enrollment is rejected as a duplicate of an
    /// already-enrolled person.
    pub duplicate_threshold: f32,
    /// Minimum seconds between raw detection log rows for the same person.
    pub raw_log_interval_secs: u64,
    /// Minimum seconds between attendance syncs for the same person.
    pub attendance_cooldown_secs: u64,
    /// Minimum seconds between unknown-face alerts.
    pub unknown_alert_cooldown_secs: u64,
    /// IoU threshold for associating a detection with an existing track.
    pub tracker_iou: f32,
    /// Updates a track survives unseen before it is dropped.
    pub lost_track_buffer: u32,
    /// Warmup frames to discard at startup (camera AGC/AE stabilization).
    pub warmup_frames: usize,
    /// Capacity of the capture→inference frame queue. Full queue drops frames.
    pub frame_queue_capacity: usize,
    /// Frames to sample per enrollment.
    pub frames_per_enroll: usize,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("rollcall");

        Self {
            camera_device: "/dev/video0".to_string(),
            model_dir: rollcall_core::default_model_dir(),
            db_path: data_dir.join("attendance.db"),
            key_path: data_dir.join("embeddings.key"),
            snapshot_dir: data_dir.join("unknown"),
            similarity_threshold: 0.6,
            duplicate_threshold: 0.5,
            raw_log_interval_secs: 90,
            attendance_cooldown_secs: 20,
            unknown_alert_cooldown_secs: 15,
            tracker_iou: 0.5,
            lost_track_buffer: 30,
            warmup_frames: 4,
            frame_queue_capacity: 4,
            frames_per_enroll: 5,
        }
    }
}

impl Config {
    /// Load configuration: TOML file if `ROLLCALL_CONFIG` is set, then
    /// environment overrides on top.
    pub fn load() -> anyhow::Result<Self> {
        let mut config = match std::env::var("ROLLCALL_CONFIG") {
            Ok(path) => {
                let config = Self::from_file(Path::new(&path))?;
                tracing::info!(path, "loaded config file");
                config
            }
            Err(_) => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }

    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("ROLLCALL_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        if let Ok(v) = std::env::var("ROLLCALL_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("ROLLCALL_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("ROLLCALL_KEY_PATH") {
            self.key_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("ROLLCALL_SNAPSHOT_DIR") {
            self.snapshot_dir = PathBuf::from(v);
        }
        self.similarity_threshold =
            env_f32("ROLLCALL_SIMILARITY_THRESHOLD", self.similarity_threshold);
        self.duplicate_threshold =
            env_f32("ROLLCALL_DUPLICATE_THRESHOLD", self.duplicate_threshold);
        self.raw_log_interval_secs =
            env_u64("ROLLCALL_RAW_LOG_INTERVAL_SECS", self.raw_log_interval_secs);
        self.attendance_cooldown_secs =
            env_u64("ROLLCALL_ATTENDANCE_COOLDOWN_SECS", self.attendance_cooldown_secs);
        self.unknown_alert_cooldown_secs = env_u64(
            "ROLLCALL_UNKNOWN_ALERT_COOLDOWN_SECS",
            self.unknown_alert_cooldown_secs,
        );
        self.tracker_iou = env_f32("ROLLCALL_TRACKER_IOU", self.tracker_iou);
        self.lost_track_buffer = env_u32("ROLLCALL_LOST_TRACK_BUFFER", self.lost_track_buffer);
        self.warmup_frames = env_usize("ROLLCALL_WARMUP_FRAMES", self.warmup_frames);
        self.frame_queue_capacity =
            env_usize("ROLLCALL_FRAME_QUEUE_CAPACITY", self.frame_queue_capacity);
        self.frames_per_enroll = env_usize("ROLLCALL_FRAMES_PER_ENROLL", self.frames_per_enroll);
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> String {
        self.model_dir
            .join("det_10g.onnx")
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the ArcFace recognition model.
    pub fn arcface_model_path(&self) -> String {
        self.model_dir
            .join("w600k_r50.onnx")
            .to_string_lossy()
            .into_owned()
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
