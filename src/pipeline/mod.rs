#[cfg(feature = "camera-nokhwa")]
pub mod camera;
#[cfg(feature = "camera-nokhwa")]
pub mod rgb_converter;
pub mod sampler;
pub mod segmenter;

// Re-exports for convenience
#[cfg(feature = "camera-nokhwa")]
pub use camera::{CameraDevice, CameraStream, available_cameras, start_camera_stream};
pub use sampler::{SamplerHandle, run_cycle, start_sampler};
pub use segmenter::{OrtSegmenter, Segmenter, SegmenterConfig, load_segmenter};
