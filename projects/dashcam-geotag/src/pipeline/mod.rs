// Per-file processing stages: reconstruction, sampling and frame output

pub mod crop;
pub mod diagnostics;
pub mod emitter;
pub mod exif;
pub mod geometry;
pub mod orchestrator;
pub mod reconstruct;
pub mod sampler;
pub mod types;
