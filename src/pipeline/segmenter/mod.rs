mod common;
mod ort;

use std::path::PathBuf;

use serde::Deserialize;

use crate::{
    config::ConfigError,
    types::{Frame, SegmentationMask},
};

pub use self::common::{MaskLayout, decode_mask, prepare_input, working_size};
pub use self::ort::{OrtSegmenter, load_segmenter};

/// Turns a camera frame into a person/background mask.
pub trait Segmenter: Send + 'static {
    fn segment(&mut self, frame: &Frame) -> anyhow::Result<SegmentationMask>;
}

impl<S: Segmenter + ?Sized> Segmenter for Box<S> {
    fn segment(&mut self, frame: &Frame) -> anyhow::Result<SegmentationMask> {
        (**self).segment(frame)
    }
}

/// Resolution/accuracy trade-off of the selfie-segmentation model family.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelVariant {
    /// Square 256x256 input, best for portrait framing.
    #[default]
    General,
    /// 256x144 input, faster, suited to wide frames.
    Landscape,
}

impl ModelVariant {
    /// Model input as (width, height).
    pub fn input_size(&self) -> (u32, u32) {
        match self {
            ModelVariant::General => (256, 256),
            ModelVariant::Landscape => (256, 144),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ModelVariant::General => "general",
            ModelVariant::Landscape => "landscape",
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SegmenterConfig {
    pub variant: ModelVariant,
    /// Probability above which a pixel counts as person.
    pub threshold: f32,
    /// Mirror the mask so it matches a selfie-view preview.
    pub flip_horizontal: bool,
    /// Mask resolution relative to the camera frame.
    pub output_scale: f32,
    pub model_path: Option<PathBuf>,
    pub model_url: Option<String>,
    pub intra_threads: usize,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            variant: ModelVariant::General,
            threshold: 0.5,
            flip_horizontal: true,
            output_scale: 0.5,
            model_path: None,
            model_url: None,
            intra_threads: 2,
        }
    }
}

impl SegmenterConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(ConfigError::Invalid(format!(
                "segmentation.threshold must be within [0, 1], got {}",
                self.threshold
            )));
        }
        if !(self.output_scale > 0.0 && self.output_scale <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "segmentation.output_scale must be within (0, 1], got {}",
                self.output_scale
            )));
        }
        Ok(())
    }

    pub fn resolved_model_path(&self) -> PathBuf {
        self.model_path
            .clone()
            .unwrap_or_else(|| crate::model_download::default_model_path(self.variant))
    }
}
