//! High-visibility clothing detection for person tracks.
//!
//! A person wears high-vis iff enough of the torso strip falls inside an
//! orange/yellow HSV gate. No model involved; reflective workwear is
//! designed to be exactly this easy to find.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::HighVisConfig;
use crate::shared::bbox::BBox;
use crate::shared::frame::Frame;

/// Fraction of the box height, from the top, inspected as the torso.
const TORSO_FRACTION: f64 = 0.45;

/// PPE inspection outcome for a person track.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Clothing {
    HighVis,
    None,
    Unknown,
}

impl Clothing {
    pub fn as_str(&self) -> &'static str {
        match self {
            Clothing::HighVis => "high-vis",
            Clothing::None => "none",
            Clothing::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Clothing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// HSV-coverage test over the upper torso region of a person box.
pub struct HighVisDetector {
    gate: HighVisConfig,
}

impl HighVisDetector {
    pub fn new(gate: HighVisConfig) -> Self {
        Self { gate }
    }

    /// Inspect the torso strip of `bbox` within `frame`.
    ///
    /// Returns `Unknown` for degenerate boxes (zero or negative area after
    /// clamping to the frame).
    pub fn detect(&self, frame: &Frame, bbox: &BBox) -> Clothing {
        let x1 = (bbox.x1.max(0.0) as u32).min(frame.width());
        let y1 = (bbox.y1.max(0.0) as u32).min(frame.height());
        let x2 = (bbox.x2.max(0.0) as u32).min(frame.width());
        let y2 = (bbox.y2.max(0.0) as u32).min(frame.height());

        if x2 <= x1 || y2 <= y1 {
            return Clothing::Unknown;
        }

        // Upper part of the box only: full width, torso-height strip.
        let torso_h = ((y2 - y1) as f64 * TORSO_FRACTION) as u32;
        let torso_y2 = y1 + torso_h.max(1);

        let mut hits: usize = 0;
        let mut total: usize = 0;
        for y in y1..torso_y2.min(frame.height()) {
            for x in x1..x2 {
                let [r, g, b] = frame.pixel(x, y);
                let (h, s, v) = rgb_to_hsv(r, g, b);
                total += 1;
                if h >= self.gate.h_min
                    && h <= self.gate.h_max
                    && s >= self.gate.s_min
                    && v >= self.gate.v_min
                {
                    hits += 1;
                }
            }
        }

        if total == 0 {
            return Clothing::Unknown;
        }

        if hits as f64 / (total as f64 + 1e-6) > self.gate.coverage {
            Clothing::HighVis
        } else {
            Clothing::None
        }
    }
}

/// RGB → HSV in the OpenCV 8-bit convention: H in [0, 180), S and V in
/// [0, 255]. The clothing gate thresholds are expressed on these scales.
pub fn rgb_to_hsv(r: u8, g: u8, b: u8) -> (f64, f64, f64) {
    let rf = r as f64 / 255.0;
    let gf = g as f64 / 255.0;
    let bf = b as f64 / 255.0;

    let max = rf.max(gf).max(bf);
    let min = rf.min(gf).min(bf);
    let delta = max - min;

    let hue_deg = if delta == 0.0 {
        0.0
    } else if max == rf {
        60.0 * (((gf - bf) / delta) % 6.0)
    } else if max == gf {
        60.0 * ((bf - rf) / delta + 2.0)
    } else {
        60.0 * ((rf - gf) / delta + 4.0)
    };
    let hue_deg = if hue_deg < 0.0 { hue_deg + 360.0 } else { hue_deg };

    let saturation = if max == 0.0 { 0.0 } else { delta / max };

    (hue_deg / 2.0, saturation * 255.0, max * 255.0)
}
