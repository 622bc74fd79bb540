use std::path::Path;

use anyhow::{Context, Result, anyhow};
use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::Tensor;

use super::{
    Segmenter, SegmenterConfig,
    common::{self, MaskLayout},
};
use crate::{
    model_download::ensure_segmentation_model_ready,
    types::{Frame, SegmentationMask},
};

/// Person segmentation backed by ONNX Runtime.
pub struct OrtSegmenter {
    session: Session,
    cfg: SegmenterConfig,
}

impl OrtSegmenter {
    pub fn new(model_path: &Path, cfg: SegmenterConfig) -> Result<Self> {
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(cfg.intra_threads.max(1))?
            .commit_from_file(model_path)
            .with_context(|| {
                format!(
                    "failed to load segmentation model from {}",
                    model_path.display()
                )
            })?;

        Ok(Self { session, cfg })
    }

    pub fn config(&self) -> &SegmenterConfig {
        &self.cfg
    }
}

impl Segmenter for OrtSegmenter {
    fn segment(&mut self, frame: &Frame) -> Result<SegmentationMask> {
        let (model_w, model_h) = self.cfg.variant.input_size();
        let input = common::prepare_input(frame, model_w, model_h)?;
        let tensor = Tensor::from_array(input)?;

        let outputs = self
            .session
            .run(ort::inputs![tensor])
            .context("failed to run segmentation session")?;

        if outputs.len() < 1 {
            return Err(anyhow!("segmentation model returned no outputs"));
        }

        let raw = outputs[0].try_extract_array::<f32>()?;
        let flattened: Vec<f32> = raw.iter().copied().collect();
        let probabilities = common::person_channel(&flattened, model_w, model_h)?;

        let (out_w, out_h) =
            common::working_size(frame.width, frame.height, self.cfg.output_scale);
        common::decode_mask(
            &probabilities,
            &MaskLayout {
                model_w,
                model_h,
                out_w,
                out_h,
                threshold: self.cfg.threshold,
                flip_horizontal: self.cfg.flip_horizontal,
            },
        )
    }
}

/// Makes sure the model file is on disk, then opens a session for it.
pub fn load_segmenter(cfg: &SegmenterConfig) -> Result<OrtSegmenter> {
    let model_path = cfg.resolved_model_path();

    ensure_segmentation_model_ready(&model_path, cfg.model_url.as_deref(), |_evt| {})
        .with_context(|| {
            format!(
                "failed to prepare segmentation model at {}",
                model_path.display()
            )
        })?;

    let segmenter = OrtSegmenter::new(&model_path, cfg.clone())?;
    log::info!(
        "segmentation ORT backend ready using {} ({} variant)",
        model_path.display(),
        cfg.variant.label()
    );
    Ok(segmenter)
}
