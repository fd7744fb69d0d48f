pub mod ffmpeg;

pub use ffmpeg::{ConversionOutcome, FfmpegConverter, locate_ffmpeg};
