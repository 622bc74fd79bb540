pub mod completion;
pub mod config;
pub mod diet;
pub mod food;
pub mod measurement;
pub mod model_download;
pub mod pipeline;
pub mod server;
pub mod session;
pub mod types;
