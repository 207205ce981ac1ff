use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Serialize;

// --- Player backend selection --------------------------------------------
//
// The engine never decodes audio itself. At startup it looks for one of a
// fixed list of command-line players and commits to the first one it finds.
// The probe is behind a trait so selection can be tested with a fake PATH.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Mpv,
    Ffplay,
    Cvlc,
    Sox,
    Mpg123,
    /// ffmpeg decodes (and applies gain), aplay plays the raw stream.
    Pipeline,
    Aplay,
    None,
}

/// Gain-capable single-process players, in preference order.
const NATIVE_GAIN_PLAYERS: [(BackendKind, &str); 5] = [
    (BackendKind::Mpv, "mpv"),
    (BackendKind::Ffplay, "ffplay"),
    (BackendKind::Cvlc, "cvlc"),
    (BackendKind::Sox, "play"),
    (BackendKind::Mpg123, "mpg123"),
];

const PIPELINE_DECODER: &str = "ffmpeg";
const RAW_PLAYER: &str = "aplay";

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Mpv => "mpv",
            BackendKind::Ffplay => "ffplay",
            BackendKind::Cvlc => "cvlc",
            BackendKind::Sox => "sox",
            BackendKind::Mpg123 => "mpg123",
            BackendKind::Pipeline => "pipeline",
            BackendKind::Aplay => "aplay",
            BackendKind::None => "none",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mpv" => Ok(BackendKind::Mpv),
            "ffplay" => Ok(BackendKind::Ffplay),
            "cvlc" | "vlc" => Ok(BackendKind::Cvlc),
            "sox" | "play" => Ok(BackendKind::Sox),
            "mpg123" => Ok(BackendKind::Mpg123),
            "pipeline" | "ffmpeg" => Ok(BackendKind::Pipeline),
            "aplay" => Ok(BackendKind::Aplay),
            "none" => Ok(BackendKind::None),
            other => anyhow::bail!("unknown audio player backend: {other}"),
        }
    }
}

/// How a play request turns into OS processes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchStrategy {
    Single { program: PathBuf },
    /// Decoder stdout is wired into the player's stdin.
    Piped { decoder: PathBuf, player: PathBuf },
    Unavailable,
}

/// Resolved once at startup and never changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendDescriptor {
    pub kind: BackendKind,
    pub supports_native_gain: bool,
    pub strategy: LaunchStrategy,
}

impl BackendDescriptor {
    pub fn single(kind: BackendKind, program: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            supports_native_gain: kind != BackendKind::Aplay,
            strategy: LaunchStrategy::Single { program: program.into() },
        }
    }

    pub fn piped(decoder: impl Into<PathBuf>, player: impl Into<PathBuf>) -> Self {
        Self {
            kind: BackendKind::Pipeline,
            supports_native_gain: false,
            strategy: LaunchStrategy::Piped {
                decoder: decoder.into(),
                player: player.into(),
            },
        }
    }

    pub fn unavailable() -> Self {
        Self {
            kind: BackendKind::None,
            supports_native_gain: false,
            strategy: LaunchStrategy::Unavailable,
        }
    }

    pub fn is_available(&self) -> bool {
        !matches!(self.strategy, LaunchStrategy::Unavailable)
    }
}

/// "Does this executable exist, and where?"
pub trait ExecutableProbe {
    fn locate(&self, program: &str) -> Option<PathBuf>;
}

/// Looks programs up in the directories of `$PATH`.
#[derive(Debug, Clone, Default)]
pub struct SearchPath {
    dirs: Vec<PathBuf>,
}

impl SearchPath {
    pub fn from_env() -> Self {
        let dirs = std::env::var_os("PATH")
            .map(|p| std::env::split_paths(&p).collect())
            .unwrap_or_default();
        Self { dirs }
    }

    pub fn new(dirs: Vec<PathBuf>) -> Self {
        Self { dirs }
    }
}

impl ExecutableProbe for SearchPath {
    fn locate(&self, program: &str) -> Option<PathBuf> {
        self.dirs
            .iter()
            .map(|dir| dir.join(program))
            .find(|candidate| is_executable(candidate))
    }
}

// Any I/O error while probing just means "not here".
fn is_executable(path: &Path) -> bool {
    let Ok(meta) = std::fs::metadata(path) else {
        return false;
    };
    meta.is_file() && has_exec_bit(&meta)
}

#[cfg(unix)]
fn has_exec_bit(meta: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn has_exec_bit(_meta: &std::fs::Metadata) -> bool {
    true
}

/// Picks the playback backend.
///
/// Order: the gain-capable players, then ffmpeg→aplay, then bare aplay
/// (volume accepted but not applied), then nothing. `only` restricts the
/// search to a single kind, which must still be present on the host.
pub fn select_backend(probe: &dyn ExecutableProbe, only: Option<BackendKind>) -> BackendDescriptor {
    let wanted = |kind: BackendKind| only.map_or(true, |k| k == kind);

    for (kind, program) in NATIVE_GAIN_PLAYERS {
        if !wanted(kind) {
            continue;
        }
        if let Some(path) = probe.locate(program) {
            return BackendDescriptor::single(kind, path);
        }
    }

    let raw_player = probe.locate(RAW_PLAYER);

    if wanted(BackendKind::Pipeline) {
        if let (Some(decoder), Some(player)) = (probe.locate(PIPELINE_DECODER), raw_player.clone()) {
            return BackendDescriptor::piped(decoder, player);
        }
    }

    if wanted(BackendKind::Aplay) {
        if let Some(player) = raw_player {
            return BackendDescriptor::single(BackendKind::Aplay, player);
        }
    }

    BackendDescriptor::unavailable()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    struct FakePath(HashSet<&'static str>);

    impl FakePath {
        fn with(programs: &[&'static str]) -> Self {
            Self(programs.iter().copied().collect())
        }
    }

    impl ExecutableProbe for FakePath {
        fn locate(&self, program: &str) -> Option<PathBuf> {
            self.0
                .contains(program)
                .then(|| PathBuf::from("/usr/bin").join(program))
        }
    }

    #[test]
    fn prefers_first_gain_capable_player() {
        let probe = FakePath::with(&["mpg123", "ffplay", "aplay", "ffmpeg"]);
        let backend = select_backend(&probe, None);
        assert_eq!(backend.kind, BackendKind::Ffplay);
        assert!(backend.supports_native_gain);
        assert_eq!(
            backend.strategy,
            LaunchStrategy::Single { program: "/usr/bin/ffplay".into() }
        );
    }

    #[test]
    fn sox_is_found_through_its_play_binary() {
        let backend = select_backend(&FakePath::with(&["play"]), None);
        assert_eq!(backend.kind, BackendKind::Sox);
    }

    #[test]
    fn falls_back_to_ffmpeg_aplay_pipeline() {
        let backend = select_backend(&FakePath::with(&["ffmpeg", "aplay"]), None);
        assert_eq!(backend.kind, BackendKind::Pipeline);
        assert!(!backend.supports_native_gain);
        assert_eq!(
            backend.strategy,
            LaunchStrategy::Piped {
                decoder: "/usr/bin/ffmpeg".into(),
                player: "/usr/bin/aplay".into(),
            }
        );
    }

    #[test]
    fn bare_aplay_has_no_gain() {
        let backend = select_backend(&FakePath::with(&["aplay"]), None);
        assert_eq!(backend.kind, BackendKind::Aplay);
        assert!(!backend.supports_native_gain);
        assert!(backend.is_available());
    }

    #[test]
    fn ffmpeg_alone_is_not_enough() {
        let backend = select_backend(&FakePath::with(&["ffmpeg"]), None);
        assert_eq!(backend.kind, BackendKind::None);
        assert!(!backend.is_available());
    }

    #[test]
    fn forced_kind_skips_preferred_players() {
        let probe = FakePath::with(&["mpv", "aplay"]);
        assert_eq!(select_backend(&probe, Some(BackendKind::Aplay)).kind, BackendKind::Aplay);
        assert_eq!(select_backend(&probe, Some(BackendKind::Cvlc)).kind, BackendKind::None);
        assert_eq!(select_backend(&probe, Some(BackendKind::None)).kind, BackendKind::None);
    }

    #[test]
    fn kind_names_round_trip_through_from_str() {
        for (kind, _) in NATIVE_GAIN_PLAYERS {
            assert_eq!(kind.as_str().parse::<BackendKind>().unwrap(), kind);
        }
        assert_eq!("Pipeline".parse::<BackendKind>().unwrap(), BackendKind::Pipeline);
        assert!("winamp".parse::<BackendKind>().is_err());
    }

    #[cfg(unix)]
    #[test]
    fn search_path_requires_the_executable_bit() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::TempDir::new().unwrap();
        let exe = dir.path().join("mpv");
        std::fs::write(&exe, "#!/bin/sh\n").unwrap();
        std::fs::write(dir.path().join("aplay"), "not executable").unwrap();
        std::fs::set_permissions(&exe, std::fs::Permissions::from_mode(0o755)).unwrap();

        let probe = SearchPath::new(vec![dir.path().join("missing"), dir.path().to_path_buf()]);
        assert_eq!(probe.locate("mpv"), Some(exe));
        assert_eq!(probe.locate("aplay"), None);
        assert_eq!(probe.locate("ffplay"), None);
    }
}
