use std::convert::TryFrom;

use anyhow::{Result, anyhow};
use nokhwa::{Buffer, utils::FrameFormat};
use rayon::prelude::*;
use yuv::{
    YuvBiPlanarImage, YuvConversionMode, YuvPackedImage, YuvRange, YuvStandardMatrix,
    yuv_nv12_to_rgb, yuyv422_to_rgb,
};
use zune_jpeg::{
    JpegDecoder,
    zune_core::{bytestream::ZCursor, colorspace::ColorSpace, options::DecoderOptions},
};

#[derive(Debug)]
pub struct RgbFrame {
    pub rgb: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Decodes whatever the driver hands us into packed 8-bit RGB.
pub fn convert_camera_frame(frame: &Buffer) -> Result<RgbFrame> {
    let resolution = frame.resolution();
    let (width, height) = (resolution.width_x, resolution.height_y);
    let data = frame.buffer();

    let rgb = match frame.source_frame_format() {
        FrameFormat::NV12 => nv12_to_rgb(data, width, height)?,
        FrameFormat::YUYV => yuyv_to_rgb(data, width, height)?,
        FrameFormat::MJPEG => return mjpeg_to_rgb(data),
        FrameFormat::RAWRGB => packed_to_rgb(data, width, height, 3, |src, dst| {
            dst.copy_from_slice(src);
        })?,
        FrameFormat::RAWBGR => packed_to_rgb(data, width, height, 3, |src, dst| {
            dst[0] = src[2];
            dst[1] = src[1];
            dst[2] = src[0];
        })?,
        FrameFormat::GRAY => packed_to_rgb(data, width, height, 1, |src, dst| {
            dst.fill(src[0]);
        })?,
    };

    Ok(RgbFrame { rgb, width, height })
}

fn ensure_len(kind: &str, data: &[u8], expected_len: usize) -> Result<()> {
    if data.len() < expected_len {
        return Err(anyhow!(
            "{kind} buffer too small: got {}, expected {}",
            data.len(),
            expected_len
        ));
    }
    Ok(())
}

fn nv12_to_rgb(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let y_plane_len = width as usize * height as usize;
    let uv_plane_len = y_plane_len / 2;
    ensure_len("NV12", data, y_plane_len + uv_plane_len)?;

    let image = YuvBiPlanarImage {
        y_plane: &data[..y_plane_len],
        y_stride: width,
        uv_plane: &data[y_plane_len..y_plane_len + uv_plane_len],
        uv_stride: width,
        width,
        height,
    };

    let mut rgb = vec![0u8; y_plane_len * 3];
    yuv_nv12_to_rgb(
        &image,
        &mut rgb,
        width * 3,
        YuvRange::Full,
        YuvStandardMatrix::Bt709,
        YuvConversionMode::Balanced,
    )
    .map_err(|err| anyhow!("NV12→RGB failed: {err:?}"))?;

    Ok(rgb)
}

fn yuyv_to_rgb(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let pixels = width as usize * height as usize;
    ensure_len("YUYV", data, pixels * 2)?;

    let packed = YuvPackedImage {
        yuy: data,
        yuy_stride: width * 2,
        width,
        height,
    };

    let mut rgb = vec![0u8; pixels * 3];
    yuyv422_to_rgb(
        &packed,
        &mut rgb,
        width * 3,
        YuvRange::Full,
        YuvStandardMatrix::Bt709,
    )
    .map_err(|err| anyhow!("YUYV422→RGB failed: {err:?}"))?;

    Ok(rgb)
}

fn mjpeg_to_rgb(data: &[u8]) -> Result<RgbFrame> {
    let options = DecoderOptions::default().jpeg_set_out_colorspace(ColorSpace::RGB);
    let mut decoder = JpegDecoder::new_with_options(ZCursor::new(data), options);
    let rgb = decoder
        .decode()
        .map_err(|err| anyhow!("MJPEG decode failed: {err:?}"))?;

    let info = decoder
        .info()
        .ok_or_else(|| anyhow!("MJPEG decoder reported no image info"))?;
    let width = info.width as u32;
    let height = info.height as u32;
    let expected_len = usize::try_from(u64::from(width) * u64::from(height) * 3)
        .map_err(|_| anyhow!("MJPEG dimensions do not fit usize"))?;
    ensure_len("MJPEG output", &rgb, expected_len)?;

    Ok(RgbFrame { rgb, width, height })
}

fn packed_to_rgb<F>(
    data: &[u8],
    width: u32,
    height: u32,
    src_channels: usize,
    convert: F,
) -> Result<Vec<u8>>
where
    F: Fn(&[u8], &mut [u8]) + Sync,
{
    let pixels = width as usize * height as usize;
    ensure_len("raw", data, pixels * src_channels)?;

    let mut rgb = vec![0u8; pixels * 3];
    rgb.par_chunks_mut(3)
        .zip(data.par_chunks_exact(src_channels))
        .for_each(|(dst, src)| convert(src, dst));
    Ok(rgb)
}
