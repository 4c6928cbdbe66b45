//! Audio: the playback task queue, task payloads, clip capture and
//! transcoding

pub mod capture;
pub mod queue;
pub mod task;
pub mod transcode;

pub use capture::{AudioCapture, CommandCapture, EncodedClip};
pub use queue::AudioTaskQueue;
pub use task::{AudioPlayer, AudioTask, HeadlessPlayer};
pub use transcode::{transcode_to_wav, TranscodeError};
