use super::backend::{BackendDescriptor, BackendKind};

pub const DEFAULT_VOLUME: u8 = 80;

/// mpg123's `-f` scale factor for unity gain.
const MPG123_FULL_SCALE: u32 = 32768;

/// Application volume is 0..=100 and independent of the ALSA mixer.
pub fn clamp_volume(volume: i64) -> u8 {
    volume.clamp(0, 100) as u8
}

/// Parses the stored `volume` setting; missing or garbage means the default.
pub fn parse_volume_setting(value: Option<&str>) -> u8 {
    value
        .and_then(|v| v.trim().parse::<i64>().ok())
        .map(clamp_volume)
        .unwrap_or(DEFAULT_VOLUME)
}

/// Backend arguments for one play.
///
/// `player` goes to the process that produces sound (the only process for
/// single-stage backends). `filter` goes to the decode stage of the pipeline
/// and is empty otherwise.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvocationArgs {
    pub player: Vec<String>,
    pub filter: Vec<String>,
}

fn args(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn multiplier(volume: u8) -> String {
    format!("{:.2}", f32::from(volume) / 100.0)
}

/// Maps a 0..=100 level to backend flags. Pure; never touches the mixer.
pub fn build_invocation_args(backend: &BackendDescriptor, volume: i64) -> InvocationArgs {
    let volume = clamp_volume(volume);

    match backend.kind {
        BackendKind::Mpv => InvocationArgs {
            player: vec![
                "--no-video".into(),
                "--really-quiet".into(),
                format!("--volume={volume}"),
            ],
            filter: Vec::new(),
        },
        BackendKind::Ffplay => {
            let mut player = args(&["-nodisp", "-autoexit", "-hide_banner", "-loglevel", "error"]);
            player.extend(["-volume".to_string(), volume.to_string()]);
            InvocationArgs { player, filter: Vec::new() }
        }
        BackendKind::Cvlc => {
            let mut player = args(&["--play-and-exit", "--intf", "dummy", "--quiet"]);
            player.extend(["--gain".to_string(), multiplier(volume)]);
            InvocationArgs { player, filter: Vec::new() }
        }
        BackendKind::Sox => InvocationArgs {
            player: vec!["-q".into(), "-v".into(), multiplier(volume)],
            filter: Vec::new(),
        },
        BackendKind::Mpg123 => {
            let scale = u32::from(volume) * MPG123_FULL_SCALE / 100;
            InvocationArgs {
                player: vec!["-q".into(), "-f".into(), scale.to_string()],
                filter: Vec::new(),
            }
        }
        BackendKind::Pipeline => InvocationArgs {
            player: args(&["-q"]),
            filter: vec!["-af".into(), format!("volume={}", multiplier(volume))],
        },
        BackendKind::Aplay => InvocationArgs {
            player: args(&["-q"]),
            filter: Vec::new(),
        },
        BackendKind::None => InvocationArgs::default(),
    }
}
