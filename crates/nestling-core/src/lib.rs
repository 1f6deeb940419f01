pub mod describe;
pub mod recording;
pub mod timeline;

pub use describe::synthesize_description;
pub use recording::{
    format_duration, AudioClip, CaptureOutcome, ProcessPipeline, Recorder, RecordingController,
    RecordingState, StubRecorder, PROCESSING_TIMEOUT,
};
pub use timeline::{resolve_event_time, to_timeline_event, ResolvedTime};
