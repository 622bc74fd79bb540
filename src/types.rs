use std::time::Instant;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug)]
pub struct Frame {
    pub rgb: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: Instant,
}

impl Frame {
    pub fn from_rgb_image(image: image::RgbImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            rgb: image.into_raw(),
            width,
            height,
            timestamp: Instant::now(),
        }
    }
}

/// Per-pixel person/background classification, row-major, `1` = person.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SegmentationMask {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl SegmentationMask {
    pub fn empty(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; width as usize * height as usize],
        }
    }

    pub fn from_fn<F>(width: u32, height: u32, mut foreground: F) -> Self
    where
        F: FnMut(u32, u32) -> bool,
    {
        let mut data = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height {
            for x in 0..width {
                data.push(u8::from(foreground(x, y)));
            }
        }
        Self {
            width,
            height,
            data,
        }
    }

    pub fn get(&self, x: u32, y: u32) -> Option<u8> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.data
            .get(y as usize * self.width as usize + x as usize)
            .copied()
    }

    pub fn is_foreground(&self, x: u32, y: u32) -> bool {
        self.get(x, y) == Some(1)
    }

    pub fn foreground_count(&self) -> usize {
        self.data.iter().filter(|&&v| v == 1).count()
    }
}

/// Anatomical measurement lines, top to bottom.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Band {
    Shoulders,
    Chest,
    Waist,
    Hips,
}

impl Band {
    pub const ALL: [Band; 4] = [Band::Shoulders, Band::Chest, Band::Waist, Band::Hips];

    pub fn label(&self) -> &'static str {
        match self {
            Band::Shoulders => "Shoulders",
            Band::Chest => "Chest",
            Band::Waist => "Waist",
            Band::Hips => "Hips",
        }
    }
}

/// Pixel widths at each band plus derived ratios for one sampling cycle.
///
/// A ratio is present only when both of its operands are present and the
/// denominator is non-zero.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BodyMetrics {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shoulders: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chest: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waist: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hips: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waist_to_shoulder_ratio: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hip_to_waist_ratio: Option<f64>,
    #[serde(default)]
    pub is_valid_scan: bool,
}

impl BodyMetrics {
    pub fn measurement(&self, band: Band) -> Option<u32> {
        match band {
            Band::Shoulders => self.shoulders,
            Band::Chest => self.chest,
            Band::Waist => self.waist,
            Band::Hips => self.hips,
        }
    }

    pub(crate) fn set_measurement(&mut self, band: Band, value: u32) {
        let slot = match band {
            Band::Shoulders => &mut self.shoulders,
            Band::Chest => &mut self.chest,
            Band::Waist => &mut self.waist,
            Band::Hips => &mut self.hips,
        };
        *slot = Some(value);
    }

    pub fn present_count(&self) -> usize {
        Band::ALL
            .iter()
            .filter(|band| self.measurement(**band).is_some())
            .count()
    }

    pub fn summary_text(&self) -> String {
        let mut parts: Vec<String> = Band::ALL
            .iter()
            .map(|band| match self.measurement(*band) {
                Some(px) => format!("{} {px}px", band.label()),
                None => format!("{} --", band.label()),
            })
            .collect();
        parts.push(format!(
            "W/S {}",
            format_ratio(self.waist_to_shoulder_ratio)
        ));
        parts.push(format!("H/W {}", format_ratio(self.hip_to_waist_ratio)));
        if self.is_valid_scan {
            parts.push("valid".to_string());
        }
        parts.join(" | ")
    }
}

pub fn format_ratio(ratio: Option<f64>) -> String {
    ratio
        .map(|r| format!("{r:.2}"))
        .unwrap_or_else(|| "n/a".to_string())
}

/// Metrics plus the subject's vertical extent from the same mask.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Sample {
    pub metrics: BodyMetrics,
    pub subject_height: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_serialize_with_camel_case_and_skip_absent() {
        let metrics = BodyMetrics {
            shoulders: Some(60),
            waist: Some(40),
            waist_to_shoulder_ratio: Some(40.0 / 60.0),
            ..Default::default()
        };
        let value = serde_json::to_value(&metrics).unwrap();
        assert_eq!(value["shoulders"], 60);
        assert_eq!(value["waist"], 40);
        assert!(value.get("chest").is_none());
        assert!(value.get("hipToWaistRatio").is_none());
        assert!(value.get("waistToShoulderRatio").is_some());
        assert_eq!(value["isValidScan"], false);
    }

    #[test]
    fn metrics_accept_partial_json() {
        let metrics: BodyMetrics = serde_json::from_str(r#"{"shoulders": 120}"#).unwrap();
        assert_eq!(metrics.shoulders, Some(120));
        assert_eq!(metrics.present_count(), 1);
        assert!(!metrics.is_valid_scan);
    }

    #[test]
    fn mask_lookup_is_bounds_checked() {
        let mask = SegmentationMask::from_fn(4, 3, |x, y| x == 1 && y == 2);
        assert!(mask.is_foreground(1, 2));
        assert!(!mask.is_foreground(0, 0));
        assert_eq!(mask.get(4, 0), None);
        assert_eq!(mask.get(0, 3), None);
        assert_eq!(mask.foreground_count(), 1);
    }
}
