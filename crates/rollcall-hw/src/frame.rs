//! Frame type and pixel conversion — YUYV to RGB, luma, dark detection.

/// A captured RGB camera frame.
#[derive(Clone)]
pub struct Frame {
    /// Packed RGB24 pixel data (width * height * 3 bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: std::time::Instant,
    pub sequence: u32,
    pub is_dark: bool,
}

impl Frame {
    /// Copy out a face crop, clamped to frame bounds. Returns `None` when the
    /// clamped region is empty.
    pub fn crop(&self, x: f32, y: f32, w: f32, h: f32) -> Option<(Vec<u8>, u32, u32)> {
        let x1 = (x.max(0.0) as u32).min(self.width);
        let y1 = (y.max(0.0) as u32).min(self.height);
        let x2 = ((x + w).max(0.0) as u32).min(self.width);
        let y2 = ((y + h).max(0.0) as u32).min(self.height);
        if x2 <= x1 || y2 <= y1 {
            return None;
        }

        let cw = x2 - x1;
        let ch = y2 - y1;
        let mut out = Vec::with_capacity((cw * ch * 3) as usize);
        for row in y1..y2 {
            let start = ((row * self.width + x1) * 3) as usize;
            let end = start + (cw * 3) as usize;
            out.extend_from_slice(&self.data[start..end]);
        }
        Some((out, cw, ch))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid YUYV length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

/// Convert packed YUYV (4:2:2) to packed RGB24 using BT.601 coefficients.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V]; U and V are shared
/// between the pixel pair.
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }

    let mut rgb = Vec::with_capacity((width * height * 3) as usize);

    for quad in yuyv[..expected].chunks_exact(4) {
        let u = quad[1] as i32 - 128;
        let v = quad[3] as i32 - 128;

        for &y in [quad[0], quad[2]].iter() {
            let c = (y as i32 - 16).max(0);
            let r = (298 * c + 409 * v + 128) >> 8;
            let g = (298 * c - 100 * u - 208 * v + 128) >> 8;
            let b = (298 * c + 516 * u + 128) >> 8;
            rgb.push(r.clamp(0, 255) as u8);
            rgb.push(g.clamp(0, 255) as u8);
            rgb.push(b.clamp(0, 255) as u8);
        }
    }

    Ok(rgb)
}

/// Extract the luma plane from packed RGB24 (BT.601 weights).
pub fn rgb_to_luma(rgb: &[u8]) -> Vec<u8> {
    rgb.chunks_exact(3)
        .map(|px| {
            let y = 0.299 * px[0] as f32 + 0.587 * px[1] as f32 + 0.114 * px[2] as f32;
            y.round().clamp(0.0, 255.0) as u8
        })
        .collect()
}

/// Check if a frame is dark: more than `threshold_pct` of luma samples fall
/// in the darkest histogram bucket (0–31). Covers a blocked lens or lights
/// out; such frames carry nothing worth running inference on.
pub fn is_dark_frame(luma: &[u8], threshold_pct: f32) -> bool {
    if luma.is_empty() {
        return true;
    }
    let dark_count = luma.iter().filter(|&&p| p < 32).count();
    (dark_count as f32 / luma.len() as f32) > threshold_pct
}
