mod backend;
mod ffmpeg;

pub use backend::{
    CameraSpec, ExitSummary, SegmentProcess, SegmentWriter, IN_PROGRESS_SUFFIX, SEGMENT_EXTENSION,
};
pub use ffmpeg::FfmpegWriter;
