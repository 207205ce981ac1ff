//! Playback core: backend selection, process launching, volume mapping and
//! the supervisor that owns the audio output.

pub mod backend;
pub mod launcher;
pub mod supervisor;
pub mod volume;

pub use backend::{select_backend, BackendDescriptor, BackendKind, ExecutableProbe, SearchPath};
pub use launcher::{describe_strategy, Launcher, Outcome, ProcessLauncher, RunningProcess};
pub use supervisor::{PlaybackEvent, PlaybackMode, PlaybackRequest, PlaybackStatus, Supervisor};
pub use volume::{clamp_volume, parse_volume_setting, DEFAULT_VOLUME};
