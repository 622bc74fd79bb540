use anyhow::{Context, Result, anyhow};
use fast_image_resize as fir;
use ndarray::Array4;
use rayon::prelude::*;

use crate::types::{Frame, SegmentationMask};

/// How a model probability map maps back onto the working frame.
#[derive(Clone, Copy, Debug)]
pub struct MaskLayout {
    pub model_w: u32,
    pub model_h: u32,
    pub out_w: u32,
    pub out_h: u32,
    pub threshold: f32,
    pub flip_horizontal: bool,
}

/// Mask resolution for a frame at the given scale, never below 1x1.
pub fn working_size(frame_w: u32, frame_h: u32, scale: f32) -> (u32, u32) {
    let w = (frame_w as f32 * scale).round().max(1.0) as u32;
    let h = (frame_h as f32 * scale).round().max(1.0) as u32;
    (w, h)
}

/// Stretches the frame to the model input and normalizes to [0, 1], NHWC.
pub fn prepare_input(frame: &Frame, input_w: u32, input_h: u32) -> Result<Array4<f32>> {
    let expected_len = (frame.width as usize)
        .saturating_mul(frame.height as usize)
        .saturating_mul(3);
    if frame.rgb.len() != expected_len || expected_len == 0 {
        return Err(anyhow!(
            "frame buffer size mismatch: got {}, expected {}",
            frame.rgb.len(),
            expected_len
        ));
    }

    let resized = if frame.width == input_w && frame.height == input_h {
        frame.rgb.clone()
    } else {
        let src_image = fir::images::Image::from_vec_u8(
            frame.width,
            frame.height,
            frame.rgb.clone(),
            fir::PixelType::U8x3,
        )?;
        let mut dst_image = fir::images::Image::new(input_w, input_h, fir::PixelType::U8x3);
        let mut resizer = fir::Resizer::new();
        let resize_options = fir::ResizeOptions::new()
            .resize_alg(fir::ResizeAlg::Interpolation(fir::FilterType::Bilinear));
        resizer
            .resize(&src_image, &mut dst_image, Some(&resize_options))
            .context("fast resize failed")?;
        dst_image.into_vec()
    };

    let normalized: Vec<f32> = resized.par_iter().map(|&v| v as f32 / 255.0).collect();
    Array4::<f32>::from_shape_vec((1, input_h as usize, input_w as usize, 3), normalized)
        .map_err(|err| anyhow!("failed to build input tensor: {err}"))
}

/// Thresholds a row-major probability map and resamples it (nearest) to the
/// working resolution.
pub fn decode_mask(probabilities: &[f32], layout: &MaskLayout) -> Result<SegmentationMask> {
    let model_len = layout.model_w as usize * layout.model_h as usize;
    if model_len == 0 || probabilities.len() < model_len {
        return Err(anyhow!(
            "unexpected mask length: got {}, need {}",
            probabilities.len(),
            model_len
        ));
    }
    if layout.out_w == 0 || layout.out_h == 0 {
        return Err(anyhow!(
            "invalid mask size {}x{}",
            layout.out_w,
            layout.out_h
        ));
    }

    let out_w = layout.out_w as usize;
    let mut data = vec![0u8; out_w * layout.out_h as usize];
    data.par_chunks_mut(out_w).enumerate().for_each(|(y, row)| {
        let my = (y * layout.model_h as usize / layout.out_h as usize)
            .min(layout.model_h as usize - 1);
        for (x, value) in row.iter_mut().enumerate() {
            let sx = if layout.flip_horizontal {
                out_w - 1 - x
            } else {
                x
            };
            let mx = (sx * layout.model_w as usize / out_w).min(layout.model_w as usize - 1);
            let p = probabilities[my * layout.model_w as usize + mx];
            *value = u8::from(p > layout.threshold);
        }
    });

    Ok(SegmentationMask {
        width: layout.out_w,
        height: layout.out_h,
        data,
    })
}

/// Picks the person channel out of a model output tensor.
///
/// Single-channel outputs are person probabilities already; two-channel
/// outputs are (background, person) interleaved per pixel.
pub(crate) fn person_channel(raw: &[f32], model_w: u32, model_h: u32) -> Result<Vec<f32>> {
    let pixels = model_w as usize * model_h as usize;
    match raw.len() {
        len if len == pixels => Ok(raw.to_vec()),
        len if len == pixels * 2 => Ok(raw.iter().skip(1).step_by(2).copied().collect()),
        len => Err(anyhow!(
            "segmentation output has {len} values, expected {pixels} or {}",
            pixels * 2
        )),
    }
}
