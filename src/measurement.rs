//! Body measurements from a person-segmentation mask.
//!
//! Each band is a horizontal line at a fixed fraction of the frame height.
//! A small window of rows around that line is scanned and the outermost
//! foreground columns give the band's pixel width. Bands with too few
//! foreground pixels (subject out of frame, occlusion, noisy mask) are left
//! absent instead of being reported as zero.

use serde::{Deserialize, Serialize};

use crate::{
    config::ConfigError,
    types::{Band, BodyMetrics, Sample, SegmentationMask},
};

#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
pub struct BandSpec {
    /// Target row as a fraction of frame height.
    pub fraction: f64,
    /// A band is accepted only when its window holds more foreground pixels
    /// than this.
    pub min_pixels: usize,
}

impl BandSpec {
    pub const fn new(fraction: f64, min_pixels: usize) -> Self {
        Self {
            fraction,
            min_pixels,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct MeasurementConfig {
    /// Shoulders, chest, waist, hips.
    pub bands: [BandSpec; 4],
    pub window_radius: u32,
    pub min_valid_bands: usize,
}

impl Default for MeasurementConfig {
    fn default() -> Self {
        Self {
            bands: [
                BandSpec::new(0.15, 15),
                BandSpec::new(0.25, 15),
                BandSpec::new(0.45, 15),
                BandSpec::new(0.65, 15),
            ],
            window_radius: 3,
            min_valid_bands: 3,
        }
    }
}

impl MeasurementConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (band, band_spec) in Band::ALL.iter().zip(self.bands.iter()) {
            if !(0.0..1.0).contains(&band_spec.fraction) {
                return Err(ConfigError::Invalid(format!(
                    "{} band fraction {} is outside [0, 1)",
                    band.label(),
                    band_spec.fraction
                )));
            }
        }
        if self
            .bands
            .windows(2)
            .any(|pair| pair[0].fraction >= pair[1].fraction)
        {
            return Err(ConfigError::Invalid(
                "band fractions must increase from shoulders to hips".to_string(),
            ));
        }
        if self.min_valid_bands > Band::ALL.len() {
            return Err(ConfigError::Invalid(format!(
                "min_valid_bands {} exceeds the number of bands",
                self.min_valid_bands
            )));
        }
        Ok(())
    }
}

/// Extracts metrics with the default band layout.
pub fn extract(mask: &[u8], width: u32, height: u32) -> BodyMetrics {
    extract_with(&MeasurementConfig::default(), mask, width, height)
}

pub fn extract_with(
    config: &MeasurementConfig,
    mask: &[u8],
    width: u32,
    height: u32,
) -> BodyMetrics {
    let mut metrics = BodyMetrics::default();

    for (band, band_spec) in Band::ALL.iter().zip(config.bands.iter()) {
        if let Some(px) = scan_band(mask, width, height, band_spec, config.window_radius) {
            metrics.set_measurement(*band, px);
        }
    }

    metrics.waist_to_shoulder_ratio = ratio(metrics.waist, metrics.shoulders);
    metrics.hip_to_waist_ratio = ratio(metrics.hips, metrics.waist);
    metrics.is_valid_scan = metrics.present_count() >= config.min_valid_bands;
    metrics
}

/// Metrics and subject height for a whole mask.
pub fn measure(config: &MeasurementConfig, mask: &SegmentationMask) -> Sample {
    Sample {
        metrics: extract_with(config, &mask.data, mask.width, mask.height),
        subject_height: subject_height(mask),
    }
}

fn scan_band(
    mask: &[u8],
    width: u32,
    height: u32,
    band_spec: &BandSpec,
    window_radius: u32,
) -> Option<u32> {
    let center = (height as f64 * band_spec.fraction).floor() as i64;
    let radius = window_radius as i64;
    let stride = width as usize;

    let mut left = width;
    let mut right = 0u32;
    let mut count = 0usize;

    for y in (center - radius)..=(center + radius) {
        if y < 0 || y >= height as i64 {
            continue;
        }
        let row_start = y as usize * stride;
        for x in 0..width {
            if mask.get(row_start + x as usize) == Some(&1) {
                left = left.min(x);
                right = right.max(x);
                count += 1;
            }
        }
    }

    (count > band_spec.min_pixels).then(|| right.saturating_sub(left))
}

fn ratio(numerator: Option<u32>, denominator: Option<u32>) -> Option<f64> {
    match (numerator, denominator) {
        (Some(n), Some(d)) if n > 0 && d > 0 => Some(n as f64 / d as f64),
        _ => None,
    }
}

/// Rows between the top-most and bottom-most foreground pixel.
pub fn subject_height(mask: &SegmentationMask) -> Option<u32> {
    let stride = mask.width as usize;
    if stride == 0 {
        return None;
    }
    let mut rows = mask
        .data
        .chunks(stride)
        .take(mask.height as usize)
        .enumerate()
        .filter(|(_, row)| row.contains(&1))
        .map(|(y, _)| y as u32);

    let top = rows.next()?;
    let bottom = rows.last().unwrap_or(top);
    Some(bottom - top)
}

#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct Calibration {
    /// Real height of the subject, used to derive pixels per inch.
    pub user_height_inches: Option<f32>,
    /// Multiplier applied after the pixel conversion.
    pub factor: f32,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            user_height_inches: None,
            factor: 1.0,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CalibratedMetrics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shoulders: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chest: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub waist: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hips: Option<f32>,
}

impl CalibratedMetrics {
    pub fn measurement(&self, band: Band) -> Option<f32> {
        match band {
            Band::Shoulders => self.shoulders,
            Band::Chest => self.chest,
            Band::Waist => self.waist,
            Band::Hips => self.hips,
        }
    }
}

impl Calibration {
    pub fn pixels_per_inch(&self, subject_height_px: Option<u32>) -> Option<f32> {
        let inches = self.user_height_inches?;
        let px = subject_height_px?;
        if px == 0 || inches <= 0.0 {
            return None;
        }
        Some(px as f32 / inches)
    }

    pub fn calibrate(
        &self,
        metrics: &BodyMetrics,
        subject_height_px: Option<u32>,
    ) -> CalibratedMetrics {
        let convert = |px: u32| match self.user_height_inches {
            Some(_) => self
                .pixels_per_inch(subject_height_px)
                .map(|ppi| px as f32 / ppi * self.factor),
            None => Some(px as f32 * self.factor),
        };

        CalibratedMetrics {
            shoulders: metrics.shoulders.and_then(&convert),
            chest: metrics.chest.and_then(&convert),
            waist: metrics.waist.and_then(&convert),
            hips: metrics.hips.and_then(&convert),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mask_with_rows(width: u32, height: u32, spans: &[(u32, u32, u32, u32)]) -> Vec<u8> {
        // (row_from, row_to, col_from, col_to), all inclusive
        SegmentationMask::from_fn(width, height, |x, y| {
            spans
                .iter()
                .any(|&(r0, r1, c0, c1)| (r0..=r1).contains(&y) && (c0..=c1).contains(&x))
        })
        .data
    }

    #[test]
    fn two_band_scenario() {
        let mask = mask_with_rows(100, 100, &[(12, 18, 20, 80), (42, 48, 30, 70)]);
        let metrics = extract(&mask, 100, 100);

        assert_eq!(metrics.shoulders, Some(60));
        assert_eq!(metrics.waist, Some(40));
        assert_eq!(metrics.chest, None);
        assert_eq!(metrics.hips, None);
        let ratio = metrics.waist_to_shoulder_ratio.unwrap();
        assert!((ratio - 0.667).abs() < 1e-3);
        assert_eq!(metrics.hip_to_waist_ratio, None);
        assert!(!metrics.is_valid_scan);
    }

    #[test]
    fn all_background_is_empty_and_invalid() {
        let mask = vec![0u8; 64 * 48];
        let metrics = extract(&mask, 64, 48);
        assert_eq!(metrics, BodyMetrics::default());
        assert!(!metrics.is_valid_scan);
    }

    #[test]
    fn full_foreground_spans_every_column() {
        let (width, height) = (40, 80);
        let mask = vec![1u8; (width * height) as usize];
        let metrics = extract(&mask, width, height);

        for band in Band::ALL {
            assert_eq!(metrics.measurement(band), Some(width - 1));
        }
        assert_eq!(metrics.waist_to_shoulder_ratio, Some(1.0));
        assert_eq!(metrics.hip_to_waist_ratio, Some(1.0));
        assert!(metrics.is_valid_scan);
    }

    #[test]
    fn three_bands_make_a_valid_scan() {
        let mask = mask_with_rows(
            100,
            100,
            &[(12, 18, 20, 80), (22, 28, 25, 75), (42, 48, 30, 70)],
        );
        let metrics = extract(&mask, 100, 100);
        assert_eq!(metrics.present_count(), 3);
        assert!(metrics.is_valid_scan);
        assert_eq!(metrics.hip_to_waist_ratio, None);
    }

    #[test]
    fn sparse_band_is_rejected() {
        // 7 rows x 2 pixels = 14, not above the threshold of 15
        let mask = mask_with_rows(100, 100, &[(12, 18, 10, 10), (12, 18, 90, 90)]);
        let metrics = extract(&mask, 100, 100);
        assert_eq!(metrics.shoulders, None);

        // one more row of two pixels at the window edge tips it over
        let mask = mask_with_rows(
            100,
            100,
            &[(12, 18, 10, 10), (12, 18, 90, 90), (15, 15, 50, 51)],
        );
        assert_eq!(extract(&mask, 100, 100).shoulders, Some(80));
    }

    #[test]
    fn pixels_outside_the_window_are_ignored() {
        // shoulders window is rows 12..=18; row 11 and 19 must not count
        let mask = mask_with_rows(
            100,
            100,
            &[(11, 11, 0, 99), (19, 19, 0, 99), (12, 18, 40, 60)],
        );
        assert_eq!(extract(&mask, 100, 100).shoulders, Some(20));
    }

    #[test]
    fn window_past_the_frame_edge_is_clipped() {
        let config = MeasurementConfig {
            bands: [
                BandSpec::new(0.0, 5),
                BandSpec::new(0.3, 5),
                BandSpec::new(0.6, 5),
                BandSpec::new(0.99, 5),
            ],
            ..Default::default()
        };
        let mask = vec![1u8; 10 * 10];
        let metrics = extract_with(&config, &mask, 10, 10);
        // rows -3..=3 clip to 0..=3, rows 6..=12 clip to 6..=9
        assert_eq!(metrics.shoulders, Some(9));
        assert_eq!(metrics.hips, Some(9));
    }

    #[test]
    fn zero_width_denominator_gives_no_ratio() {
        // a single column band: width 0 but enough pixels to be accepted
        let mut config = MeasurementConfig::default();
        config.bands[0].min_pixels = 3;
        let mask = mask_with_rows(100, 100, &[(12, 18, 50, 50), (42, 48, 30, 70)]);
        let metrics = extract_with(&config, &mask, 100, 100);

        assert_eq!(metrics.shoulders, Some(0));
        assert_eq!(metrics.waist, Some(40));
        assert_eq!(metrics.waist_to_shoulder_ratio, None);
    }

    #[test]
    fn zero_width_numerator_gives_no_ratio() {
        let mut config = MeasurementConfig::default();
        config.bands[2].min_pixels = 3;
        let mask = mask_with_rows(100, 100, &[(12, 18, 20, 80), (42, 48, 50, 50)]);
        let metrics = extract_with(&config, &mask, 100, 100);

        assert_eq!(metrics.shoulders, Some(60));
        assert_eq!(metrics.waist, Some(0));
        assert_eq!(metrics.waist_to_shoulder_ratio, None);
        assert_eq!(metrics.hip_to_waist_ratio, None);
    }

    #[test]
    fn ratios_are_never_non_finite() {
        for seed in 0u32..50 {
            let mask = SegmentationMask::from_fn(50, 50, |x, y| (x * 7 + y * 13 + seed) % 5 == 0);
            let metrics = extract(&mask.data, 50, 50);
            for ratio in [metrics.waist_to_shoulder_ratio, metrics.hip_to_waist_ratio]
                .into_iter()
                .flatten()
            {
                assert!(ratio.is_finite());
            }
            assert_eq!(
                metrics.waist_to_shoulder_ratio.is_some(),
                metrics.shoulders.is_some_and(|s| s != 0) && metrics.waist.is_some()
            );
        }
    }

    #[test]
    fn extraction_is_deterministic() {
        let mask = SegmentationMask::from_fn(120, 90, |x, y| (x + y) % 3 != 0 && x > 10);
        let first = extract(&mask.data, 120, 90);
        let second = extract(&mask.data, 120, 90);
        assert_eq!(first, second);
        assert_eq!(
            first.waist_to_shoulder_ratio.map(f64::to_bits),
            second.waist_to_shoulder_ratio.map(f64::to_bits)
        );
    }

    #[test]
    fn short_mask_buffer_reads_as_background() {
        let mask = vec![1u8; 100 * 20];
        let metrics = extract(&mask, 100, 100);
        assert_eq!(metrics.shoulders, Some(99));
        assert_eq!(metrics.waist, None);
    }

    #[test]
    fn subject_height_spans_foreground_rows() {
        let mask = SegmentationMask::from_fn(10, 50, |_, y| (5..=44).contains(&y));
        assert_eq!(subject_height(&mask), Some(39));
        assert_eq!(subject_height(&SegmentationMask::empty(10, 50)), None);
    }

    #[test]
    fn calibration_uses_subject_height() {
        let calibration = Calibration {
            user_height_inches: Some(70.0),
            factor: 1.0,
        };
        let metrics = BodyMetrics {
            shoulders: Some(100),
            waist: Some(70),
            ..Default::default()
        };
        // 350 px tall subject at 70 in -> 5 px per inch
        let calibrated = calibration.calibrate(&metrics, Some(350));
        assert_eq!(calibrated.shoulders, Some(20.0));
        assert_eq!(calibrated.waist, Some(14.0));
        assert_eq!(calibrated.chest, None);

        let unknown_height = calibration.calibrate(&metrics, None);
        assert_eq!(unknown_height, CalibratedMetrics::default());
    }

    #[test]
    fn calibration_without_height_scales_pixels() {
        let calibration = Calibration {
            user_height_inches: None,
            factor: 0.5,
        };
        let metrics = BodyMetrics {
            hips: Some(90),
            ..Default::default()
        };
        assert_eq!(calibration.calibrate(&metrics, None).hips, Some(45.0));
    }

    #[test]
    fn config_rejects_unordered_bands() {
        let mut config = MeasurementConfig::default();
        assert!(config.validate().is_ok());
        config.bands.swap(1, 2);
        assert!(config.validate().is_err());

        let mut config = MeasurementConfig::default();
        config.bands[3].fraction = 1.2;
        assert!(config.validate().is_err());
    }
}
