use std::collections::VecDeque;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::backend::{BackendDescriptor, LaunchStrategy};
use super::volume::build_invocation_args;
use crate::error::PlaybackError;

/// How long a player gets to exit after SIGTERM before it is force-killed.
const TERM_GRACE: Duration = Duration::from_secs(2);

const STDERR_TAIL_LINES: usize = 20;

/// How one launch ended. Resolved exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Finished,
    /// Ended because `kill()` was requested. Never an error.
    Stopped,
    Failed(String),
}

/// Requests termination of a running launch.
#[derive(Debug)]
pub struct KillHandle {
    tx: Option<oneshot::Sender<()>>,
}

impl KillHandle {
    /// Best-effort and idempotent; the exit is reported through the outcome.
    pub fn kill(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Caller's side of a launch: a kill switch plus the pending outcome.
#[derive(Debug)]
pub struct RunningProcess {
    pub handle: KillHandle,
    pub outcome: oneshot::Receiver<Outcome>,
}

/// Launcher's side of a launch: watch for kill requests, report the outcome.
#[derive(Debug)]
pub struct ProcessMonitor {
    pub kill: oneshot::Receiver<()>,
    pub outcome: oneshot::Sender<Outcome>,
}

impl RunningProcess {
    pub fn channel() -> (RunningProcess, ProcessMonitor) {
        let (kill_tx, kill_rx) = oneshot::channel();
        let (outcome_tx, outcome_rx) = oneshot::channel();
        (
            RunningProcess {
                handle: KillHandle { tx: Some(kill_tx) },
                outcome: outcome_rx,
            },
            ProcessMonitor {
                kill: kill_rx,
                outcome: outcome_tx,
            },
        )
    }
}

/// Starts playback of one file. Implementations must not block; waiting for
/// the process happens in the background and is reported via the outcome.
pub trait Launcher: Send + Sync {
    fn backend(&self) -> &BackendDescriptor;

    fn launch(&self, path: &Path, volume: u8) -> Result<RunningProcess, PlaybackError>;
}

/// Spawns the selected backend as OS processes.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    backend: BackendDescriptor,
}

impl ProcessLauncher {
    pub fn new(backend: BackendDescriptor) -> Self {
        Self { backend }
    }
}

impl Launcher for ProcessLauncher {
    fn backend(&self) -> &BackendDescriptor {
        &self.backend
    }

    fn launch(&self, path: &Path, volume: u8) -> Result<RunningProcess, PlaybackError> {
        if !self.backend.is_available() {
            return Err(PlaybackError::NoPlayerAvailable);
        }
        if !path.is_file() {
            return Err(PlaybackError::Launch(format!(
                "audio file not found: {}",
                path.display()
            )));
        }

        let args = build_invocation_args(&self.backend, i64::from(volume));
        match &self.backend.strategy {
            LaunchStrategy::Single { program } => spawn_single(program, &args.player, path),
            LaunchStrategy::Piped { decoder, player } => {
                spawn_pipeline(decoder, &args.filter, player, &args.player, path)
            }
            LaunchStrategy::Unavailable => Err(PlaybackError::NoPlayerAvailable),
        }
    }
}

fn program_label(program: &Path) -> String {
    program
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| program.display().to_string())
}

fn spawn_error(program: &Path, e: std::io::Error) -> PlaybackError {
    PlaybackError::Launch(format!("failed to start {}: {e}", program.display()))
}

fn spawn_single(program: &Path, args: &[String], path: &Path) -> Result<RunningProcess, PlaybackError> {
    let mut child = Command::new(program)
        .args(args)
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| spawn_error(program, e))?;

    let stderr = capture_stderr(&mut child);
    let (running, monitor) = RunningProcess::channel();
    tokio::spawn(supervise_single(program_label(program), child, stderr, monitor));
    Ok(running)
}

fn spawn_pipeline(
    decoder: &Path,
    filter: &[String],
    player: &Path,
    player_args: &[String],
    path: &Path,
) -> Result<RunningProcess, PlaybackError> {
    let mut decode = Command::new(decoder)
        .args(["-hide_banner", "-loglevel", "error", "-nostdin", "-i"])
        .arg(path)
        .args(filter)
        .args(["-f", "wav", "pipe:1"])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| spawn_error(decoder, e))?;

    let pcm: Stdio = decode
        .stdout
        .take()
        .ok_or_else(|| PlaybackError::Launch("decoder stdout unavailable".into()))
        .and_then(|out| {
            TryInto::<Stdio>::try_into(out)
                .map_err(|e| PlaybackError::Launch(format!("decoder stdout unusable: {e}")))
        })?;

    let spawned = Command::new(player)
        .args(player_args)
        .stdin(pcm)
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn();
    let mut play = match spawned {
        Ok(child) => child,
        Err(e) => {
            let _ = decode.start_kill();
            return Err(spawn_error(player, e));
        }
    };

    let stages = Pipeline {
        decoder_label: program_label(decoder),
        decoder_stderr: capture_stderr(&mut decode),
        decoder: decode,
        player_label: program_label(player),
        player_stderr: capture_stderr(&mut play),
        player: play,
    };
    let (running, monitor) = RunningProcess::channel();
    tokio::spawn(supervise_pipeline(stages, monitor));
    Ok(running)
}

// --- Exit supervision ------------------------------------------------------

fn capture_stderr(child: &mut Child) -> Option<JoinHandle<VecDeque<String>>> {
    let stderr = child.stderr.take()?;
    Some(tokio::spawn(async move {
        let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line.trim().is_empty() {
                continue;
            }
            if tail.len() >= STDERR_TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(line);
        }
        tail
    }))
}

async fn stderr_summary(task: Option<JoinHandle<VecDeque<String>>>) -> Option<String> {
    let task = task?;
    let tail = match tokio::time::timeout(Duration::from_secs(1), task).await {
        Ok(Ok(tail)) => tail,
        _ => return None,
    };
    tail.back().map(|s| s.trim().to_string())
}

/// `None` for a clean exit, otherwise a description of what went wrong.
async fn describe_exit(
    label: &str,
    status: std::io::Result<ExitStatus>,
    stderr: Option<JoinHandle<VecDeque<String>>>,
) -> Option<String> {
    match status {
        Ok(status) if status.success() => None,
        Ok(status) => Some(match stderr_summary(stderr).await {
            Some(line) => format!("{label} exited with {status}: {line}"),
            None => format!("{label} exited with {status}"),
        }),
        Err(e) => Some(format!("waiting for {label} failed: {e}")),
    }
}

#[cfg(unix)]
fn send_sigterm(child: &Child) -> bool {
    let Some(pid) = child.id() else {
        return false;
    };
    // SAFETY: `pid` is our own child and has not been reaped yet (id() is
    // None after a successful wait).
    unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) == 0 }
}

#[cfg(not(unix))]
fn send_sigterm(_child: &Child) -> bool {
    false
}

async fn terminate(child: &mut Child) {
    if send_sigterm(child) && tokio::time::timeout(TERM_GRACE, child.wait()).await.is_ok() {
        return;
    }
    let _ = child.kill().await;
}

async fn supervise_single(
    label: String,
    mut child: Child,
    stderr: Option<JoinHandle<VecDeque<String>>>,
    monitor: ProcessMonitor,
) {
    let ProcessMonitor { mut kill, outcome } = monitor;

    let result = tokio::select! {
        status = child.wait() => match describe_exit(&label, status, stderr).await {
            Some(failure) => Outcome::Failed(failure),
            None => Outcome::Finished,
        },
        Ok(()) = &mut kill => {
            terminate(&mut child).await;
            Outcome::Stopped
        }
    };

    let _ = outcome.send(result);
}

struct Pipeline {
    decoder_label: String,
    decoder: Child,
    decoder_stderr: Option<JoinHandle<VecDeque<String>>>,
    player_label: String,
    player: Child,
    player_stderr: Option<JoinHandle<VecDeque<String>>>,
}

// The pipeline is done when the player exits. Either stage failing on its own
// is an error; the first failure observed is the one reported.
async fn supervise_pipeline(stages: Pipeline, monitor: ProcessMonitor) {
    let Pipeline {
        decoder_label,
        mut decoder,
        decoder_stderr,
        player_label,
        mut player,
        player_stderr,
    } = stages;
    let ProcessMonitor { mut kill, outcome } = monitor;

    let mut decoder_stderr = decoder_stderr;
    let mut stopped = false;
    let mut kill_closed = false;
    let mut decoder_done = false;
    // Exit statuses are only recorded inside the loop so a kill request is
    // never held up by stderr collection.
    let mut early_decoder_exit: Option<std::io::Result<ExitStatus>> = None;
    let force_kill = tokio::time::sleep(TERM_GRACE);
    tokio::pin!(force_kill);
    let mut forced = false;

    let player_status = loop {
        tokio::select! {
            status = player.wait() => break status,
            status = decoder.wait(), if !decoder_done => {
                decoder_done = true;
                early_decoder_exit = Some(status);
            }
            request = &mut kill, if !kill_closed => {
                kill_closed = true;
                if request.is_ok() {
                    stopped = true;
                    send_sigterm(&decoder);
                    send_sigterm(&player);
                    force_kill
                        .as_mut()
                        .reset(tokio::time::Instant::now() + TERM_GRACE);
                }
            }
            () = &mut force_kill, if stopped && !forced => {
                forced = true;
                let _ = decoder.start_kill();
                let _ = player.start_kill();
            }
        }
    };

    let mut late_decoder_exit = None;
    if !decoder_done {
        match tokio::time::timeout(TERM_GRACE, decoder.wait()).await {
            Ok(status) => late_decoder_exit = Some(status),
            Err(_) => {
                let _ = decoder.kill().await;
            }
        }
    }

    let result = if stopped {
        Outcome::Stopped
    } else {
        // Decoder failures seen before the player exited win over the
        // player's own exit; a decoder that fails afterwards comes last.
        let mut failure = None;
        if let Some(status) = early_decoder_exit {
            failure = describe_exit(&decoder_label, status, decoder_stderr.take()).await;
        }
        if failure.is_none() {
            failure = describe_exit(&player_label, player_status, player_stderr).await;
        }
        if failure.is_none() {
            if let Some(status) = late_decoder_exit {
                failure = describe_exit(&decoder_label, status, decoder_stderr.take()).await;
            }
        }
        failure.map_or(Outcome::Finished, Outcome::Failed)
    };
    let _ = outcome.send(result);
}

/// Human-readable command line shape, for the startup log.
pub fn describe_strategy(backend: &BackendDescriptor) -> String {
    match &backend.strategy {
        LaunchStrategy::Single { program } => program.display().to_string(),
        LaunchStrategy::Piped { decoder, player } => {
            format!("{} | {}", decoder.display(), player.display())
        }
        LaunchStrategy::Unavailable => "none".to_string(),
    }
}
