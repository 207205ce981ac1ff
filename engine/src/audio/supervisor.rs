use std::collections::VecDeque;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Weak};

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

use super::backend::BackendDescriptor;
use super::launcher::{KillHandle, Launcher, Outcome};
use super::volume::clamp_volume;
use crate::error::PlaybackError;

// --- Playback supervisor ---------------------------------------------------
//
// Owns the one audio output. Every state change happens under `state`; the
// lock is never held while a process is spawned or waited on. Process exits
// come back as `Completion` messages and are applied by a single task, one at
// a time, in arrival order.

/// How a new play request treats whatever is already playing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackMode {
    /// Append to the queue; play when the output is free.
    #[default]
    Queue,
    /// Stop everything (and drop the queue), then play now.
    Interrupt,
    /// Play now if idle, otherwise refuse.
    Block,
}

impl PlaybackMode {
    pub fn as_str(self) -> &'static str {
        match self {
            PlaybackMode::Queue => "queue",
            PlaybackMode::Interrupt => "interrupt",
            PlaybackMode::Block => "block",
        }
    }

    /// Reads the stored `playback_mode` setting; anything unusable is `Queue`.
    pub fn from_setting(value: Option<&str>) -> Self {
        match value.map(str::parse::<PlaybackMode>) {
            Some(Ok(mode)) => mode,
            Some(Err(e)) => {
                warn!("{e}; using queue mode");
                PlaybackMode::Queue
            }
            None => PlaybackMode::Queue,
        }
    }
}

impl fmt::Display for PlaybackMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlaybackMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "queue" => Ok(PlaybackMode::Queue),
            "interrupt" => Ok(PlaybackMode::Interrupt),
            "block" => Ok(PlaybackMode::Block),
            other => Err(format!("invalid playback mode: {other:?}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackRequest {
    pub path: String,
    pub mode: PlaybackMode,
    pub volume: u8,
}

impl PlaybackRequest {
    pub fn new(path: impl Into<String>, mode: PlaybackMode, volume: i64) -> Self {
        Self {
            path: path.into(),
            mode,
            volume: clamp_volume(volume),
        }
    }
}

/// Point-in-time view for pollers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackStatus {
    pub is_playing: bool,
    pub current_sound: Option<String>,
    pub queue_length: usize,
    pub queue: Vec<String>,
}

/// Lifecycle notifications, published after the state change they describe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEvent {
    Playing { path: String },
    Finished { path: String },
    Stopped { path: String },
    Failed { path: String, error: String },
}

struct CurrentPlayback {
    launch: u64,
    path: String,
    /// `None` while the process is still being spawned.
    handle: Option<KillHandle>,
}

struct PlaybackState {
    current: Option<CurrentPlayback>,
    queue: VecDeque<String>,
    volume: u8,
    stopped_manually: bool,
    next_launch: u64,
}

struct Completion {
    launch: u64,
    path: String,
    outcome: Outcome,
}

struct Inner {
    launcher: Arc<dyn Launcher>,
    state: Mutex<PlaybackState>,
    events: broadcast::Sender<PlaybackEvent>,
    completions: mpsc::UnboundedSender<Completion>,
}

/// The single owner of the audio output.
///
/// Build one per process at startup and hand clones to whoever needs it;
/// clones share the same state. Must be created inside a tokio runtime.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

impl Supervisor {
    pub fn new(launcher: Arc<dyn Launcher>, volume: u8) -> Self {
        let (completions, rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(64);

        let inner = Arc::new(Inner {
            launcher,
            state: Mutex::new(PlaybackState {
                current: None,
                queue: VecDeque::new(),
                volume: volume.min(100),
                stopped_manually: false,
                next_launch: 0,
            }),
            events,
            completions,
        });

        tokio::spawn(apply_completions(Arc::downgrade(&inner), rx));
        Self { inner }
    }

    pub fn backend(&self) -> &BackendDescriptor {
        self.inner.launcher.backend()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.inner.events.subscribe()
    }

    /// Returns once the request has been queued or its process has started.
    pub async fn play(&self, request: PlaybackRequest) -> Result<(), PlaybackError> {
        if !self.backend().is_available() {
            return Err(PlaybackError::NoPlayerAvailable);
        }

        let PlaybackRequest { path, mode, volume } = request;
        let inner = &self.inner;

        match mode {
            PlaybackMode::Queue => {
                {
                    let mut st = inner.state.lock().await;
                    st.volume = volume;
                    st.queue.push_back(path);
                }
                inner.advance_queue().await;
                Ok(())
            }
            PlaybackMode::Interrupt => {
                let launch = {
                    let mut st = inner.state.lock().await;
                    st.volume = volume;
                    inner.stop_locked(&mut st);
                    inner.begin(&mut st, &path)
                };
                inner.launch_or_advance(launch, &path, volume).await
            }
            PlaybackMode::Block => {
                let launch = {
                    let mut st = inner.state.lock().await;
                    if st.current.is_some() {
                        return Err(PlaybackError::AlreadyPlaying);
                    }
                    st.volume = volume;
                    inner.begin(&mut st, &path)
                };
                inner.launch_or_advance(launch, &path, volume).await
            }
        }
    }

    /// Kills whatever is playing and empties the queue. The state returns to
    /// idle once the process exit has been observed.
    pub async fn stop(&self) {
        let mut st = self.inner.state.lock().await;
        self.inner.stop_locked(&mut st);
    }

    pub async fn status(&self) -> PlaybackStatus {
        let st = self.inner.state.lock().await;
        PlaybackStatus {
            is_playing: st.current.is_some(),
            current_sound: st.current.as_ref().map(|c| c.path.clone()),
            queue_length: st.queue.len(),
            queue: st.queue.iter().cloned().collect(),
        }
    }

    /// Level used for queued items that start later.
    pub async fn set_volume(&self, volume: i64) {
        self.inner.state.lock().await.volume = clamp_volume(volume);
    }

    #[cfg(test)]
    pub(crate) async fn volume(&self) -> u8 {
        self.inner.state.lock().await.volume
    }
}

impl Inner {
    fn emit(&self, event: PlaybackEvent) {
        let _ = self.events.send(event);
    }

    fn stop_locked(&self, st: &mut PlaybackState) {
        if st.current.is_some() {
            st.stopped_manually = true;
        }
        if let Some(handle) = st.current.as_mut().and_then(|c| c.handle.as_mut()) {
            handle.kill();
        }
        st.queue.clear();
    }

    /// Commits `path` as the current item before anything is spawned.
    fn begin(&self, st: &mut PlaybackState, path: &str) -> u64 {
        let launch = st.next_launch;
        st.next_launch += 1;
        st.stopped_manually = false;
        st.current = Some(CurrentPlayback {
            launch,
            path: path.to_string(),
            handle: None,
        });
        launch
    }

    async fn launch(&self, launch: u64, path: &str, volume: u8) -> Result<(), PlaybackError> {
        let result = self.launcher.launch(Path::new(path), volume);

        let mut st = self.state.lock().await;
        let still_current = st.current.as_ref().is_some_and(|c| c.launch == launch);

        match result {
            Ok(running) => {
                let mut handle = running.handle;
                // stop() or an interrupt arrived while we were spawning.
                let cancelled = !still_current || st.stopped_manually;
                if cancelled {
                    handle.kill();
                }
                if let Some(current) = st.current.as_mut().filter(|c| c.launch == launch) {
                    current.handle = Some(handle);
                }
                drop(st);

                if cancelled {
                    debug!("playback of {path} cancelled while starting");
                } else {
                    info!("playback started: {path} (volume {volume})");
                    self.emit(PlaybackEvent::Playing { path: path.to_string() });
                }
                self.watch(launch, path.to_string(), running.outcome);
                Ok(())
            }
            Err(e) => {
                if still_current {
                    st.current = None;
                    st.stopped_manually = false;
                }
                drop(st);

                warn!("playback of {path} could not start: {e}");
                self.emit(PlaybackEvent::Failed {
                    path: path.to_string(),
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Launch for a direct (Block/Interrupt) play. Queue submits that
    /// arrived during a failed spawn found the output busy, so they are
    /// picked up here.
    async fn launch_or_advance(&self, launch: u64, path: &str, volume: u8) -> Result<(), PlaybackError> {
        let result = self.launch(launch, path, volume).await;
        if result.is_err() {
            self.advance_queue().await;
        }
        result
    }

    fn watch(&self, launch: u64, path: String, outcome: oneshot::Receiver<Outcome>) {
        let completions = self.completions.clone();
        tokio::spawn(async move {
            let outcome = outcome
                .await
                .unwrap_or_else(|_| Outcome::Failed("player monitor went away".into()));
            let _ = completions.send(Completion { launch, path, outcome });
        });
    }

    /// Starts queued items until one launches or the queue is empty. Launch
    /// failures are logged and skipped.
    async fn advance_queue(&self) {
        loop {
            let (launch, path, volume) = {
                let mut st = self.state.lock().await;
                if st.current.is_some() {
                    return;
                }
                let Some(path) = st.queue.pop_front() else {
                    return;
                };
                let launch = self.begin(&mut st, &path);
                (launch, path, st.volume)
            };

            match self.launch(launch, &path, volume).await {
                Ok(()) => return,
                Err(e) => warn!("skipping queued sound {path}: {e}"),
            }
        }
    }

    async fn complete(&self, completion: Completion) {
        let Completion { launch, path, outcome } = completion;

        let was_manual = {
            let mut st = self.state.lock().await;
            if st.current.as_ref().map(|c| c.launch) != Some(launch) {
                debug!("late exit of replaced playback {path}: {outcome:?}");
                None
            } else {
                let was_manual = st.stopped_manually;
                st.current = None;
                st.stopped_manually = false;
                Some(was_manual)
            }
        };

        let event = match (outcome, was_manual) {
            (_, Some(true)) | (Outcome::Stopped, _) => {
                info!("playback stopped: {path}");
                PlaybackEvent::Stopped { path }
            }
            (Outcome::Finished, _) => {
                info!("playback finished: {path}");
                PlaybackEvent::Finished { path }
            }
            (Outcome::Failed(error), _) => {
                warn!("playback of {path} failed: {error}");
                PlaybackEvent::Failed { path, error }
            }
        };
        self.emit(event);

        if was_manual.is_some() {
            self.advance_queue().await;
        }
    }
}

async fn apply_completions(inner: Weak<Inner>, mut rx: mpsc::UnboundedReceiver<Completion>) {
    while let Some(completion) = rx.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.complete(completion).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::backend::BackendKind;
    use crate::audio::launcher::RunningProcess;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    /// Launches that only end when the test (or a kill) ends them.
    struct FakeLauncher {
        backend: BackendDescriptor,
        launched: StdMutex<Vec<(String, u8)>>,
        finishers: StdMutex<HashMap<String, oneshot::Sender<Outcome>>>,
        refuse: Vec<String>,
        /// Spawns of these block the calling thread for `SLOW_SPAWN`.
        slow: Vec<String>,
        live: Arc<StdMutex<(usize, usize)>>,
    }

    const SLOW_SPAWN: Duration = Duration::from_millis(300);

    fn owned(paths: &[&str]) -> Vec<String> {
        paths.iter().map(|p| p.to_string()).collect()
    }

    impl FakeLauncher {
        fn new() -> Arc<Self> {
            Self::slow_and_refusing(&[], &[])
        }

        fn refusing(paths: &[&str]) -> Arc<Self> {
            Self::slow_and_refusing(&[], paths)
        }

        fn slow_and_refusing(slow: &[&str], refuse: &[&str]) -> Arc<Self> {
            Self::build(BackendDescriptor::single(BackendKind::Mpv, "mpv"), owned(refuse), owned(slow))
        }

        fn without_backend() -> Arc<Self> {
            Self::build(BackendDescriptor::unavailable(), Vec::new(), Vec::new())
        }

        fn build(backend: BackendDescriptor, refuse: Vec<String>, slow: Vec<String>) -> Arc<Self> {
            Arc::new(Self {
                backend,
                launched: StdMutex::new(Vec::new()),
                finishers: StdMutex::new(HashMap::new()),
                refuse,
                slow,
                live: Arc::new(StdMutex::new((0, 0))),
            })
        }

        fn finish(&self, path: &str, outcome: Outcome) {
            let tx = self
                .finishers
                .lock()
                .unwrap()
                .remove(path)
                .unwrap_or_else(|| panic!("{path} is not running"));
            tx.send(outcome).unwrap();
        }

        fn launched(&self) -> Vec<String> {
            self.launched.lock().unwrap().iter().map(|(p, _)| p.clone()).collect()
        }

        fn max_live(&self) -> usize {
            self.live.lock().unwrap().1
        }

        fn now_live(&self) -> usize {
            self.live.lock().unwrap().0
        }
    }

    impl Launcher for FakeLauncher {
        fn backend(&self) -> &BackendDescriptor {
            &self.backend
        }

        fn launch(&self, path: &Path, volume: u8) -> Result<RunningProcess, PlaybackError> {
            let path = path.to_string_lossy().to_string();
            if self.slow.contains(&path) {
                std::thread::sleep(SLOW_SPAWN);
            }
            if self.refuse.contains(&path) {
                return Err(PlaybackError::Launch(format!("cannot decode {path}")));
            }
            self.launched.lock().unwrap().push((path.clone(), volume));

            {
                let mut live = self.live.lock().unwrap();
                live.0 += 1;
                live.1 = live.1.max(live.0);
            }

            let (running, monitor) = RunningProcess::channel();
            let (finish_tx, finish_rx) = oneshot::channel();
            self.finishers.lock().unwrap().insert(path, finish_tx);

            let live = self.live.clone();
            tokio::spawn(async move {
                let mut kill = monitor.kill;
                let outcome = tokio::select! {
                    Ok(outcome) = finish_rx => outcome,
                    Ok(()) = &mut kill => Outcome::Stopped,
                    else => Outcome::Stopped,
                };
                live.lock().unwrap().0 -= 1;
                let _ = monitor.outcome.send(outcome);
            });
            Ok(running)
        }
    }

    async fn wait_for(events: &mut broadcast::Receiver<PlaybackEvent>, want: PlaybackEvent) -> Vec<PlaybackEvent> {
        let mut seen = Vec::new();
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
                .await
                .unwrap_or_else(|_| panic!("timed out waiting for {want:?}, saw {seen:?}"))
                .expect("event channel closed");
            seen.push(event.clone());
            if event == want {
                return seen;
            }
        }
    }

    fn playing(path: &str) -> PlaybackEvent {
        PlaybackEvent::Playing { path: path.into() }
    }

    fn queued(path: &str) -> PlaybackRequest {
        PlaybackRequest::new(path, PlaybackMode::Queue, 80)
    }

    async fn wait_until_playing(sup: &Supervisor) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !sup.status().await.is_playing {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("nothing started");
    }

    #[tokio::test]
    async fn queue_plays_in_submission_order_one_at_a_time() {
        let launcher = FakeLauncher::new();
        let sup = Supervisor::new(launcher.clone(), 80);
        let mut events = sup.subscribe();

        for path in ["a.wav", "b.wav", "c.wav"] {
            sup.play(queued(path)).await.unwrap();
        }

        let status = sup.status().await;
        assert!(status.is_playing);
        assert_eq!(status.current_sound.as_deref(), Some("a.wav"));
        assert_eq!(status.queue, vec!["b.wav", "c.wav"]);
        assert_eq!(status.queue_length, 2);

        launcher.finish("a.wav", Outcome::Finished);
        wait_for(&mut events, playing("b.wav")).await;
        let status = sup.status().await;
        assert_eq!(status.current_sound.as_deref(), Some("b.wav"));
        assert_eq!(status.queue, vec!["c.wav"]);

        launcher.finish("b.wav", Outcome::Finished);
        wait_for(&mut events, playing("c.wav")).await;
        launcher.finish("c.wav", Outcome::Finished);
        wait_for(&mut events, PlaybackEvent::Finished { path: "c.wav".into() }).await;

        let status = sup.status().await;
        assert!(!status.is_playing);
        assert_eq!(status.current_sound, None);
        assert_eq!(status.queue_length, 0);
        assert_eq!(launcher.launched(), vec!["a.wav", "b.wav", "c.wav"]);
        assert_eq!(launcher.max_live(), 1);
    }

    #[tokio::test]
    async fn stop_clears_queue_and_reports_stopped_not_failed() {
        let launcher = FakeLauncher::new();
        let sup = Supervisor::new(launcher.clone(), 80);
        let mut events = sup.subscribe();

        sup.play(queued("a.wav")).await.unwrap();
        sup.play(queued("b.wav")).await.unwrap();
        sup.stop().await;

        assert_eq!(sup.status().await.queue_length, 0);

        let seen = wait_for(&mut events, PlaybackEvent::Stopped { path: "a.wav".into() }).await;
        assert!(!seen.iter().any(|e| matches!(e, PlaybackEvent::Failed { .. })));

        let status = sup.status().await;
        assert!(!status.is_playing);
        assert_eq!(status.current_sound, None);
        assert!(status.queue.is_empty());
        assert_eq!(launcher.launched(), vec!["a.wav"]);
    }

    #[tokio::test]
    async fn stop_while_idle_is_harmless() {
        let sup = Supervisor::new(FakeLauncher::new(), 80);
        sup.stop().await;
        sup.stop().await;
        let status = sup.status().await;
        assert!(!status.is_playing);
        assert_eq!(status.queue_length, 0);
    }

    #[tokio::test]
    async fn block_refuses_while_playing_without_touching_state() {
        let launcher = FakeLauncher::new();
        let sup = Supervisor::new(launcher.clone(), 80);

        sup.play(PlaybackRequest::new("a.wav", PlaybackMode::Block, 80))
            .await
            .unwrap();
        let before = sup.status().await;

        let err = sup
            .play(PlaybackRequest::new("b.wav", PlaybackMode::Block, 30))
            .await
            .unwrap_err();
        assert_eq!(err, PlaybackError::AlreadyPlaying);
        assert_eq!(sup.status().await, before);
        assert_eq!(before.current_sound.as_deref(), Some("a.wav"));
        assert_eq!(sup.volume().await, 80);
        assert_eq!(launcher.launched(), vec!["a.wav"]);
    }

    #[tokio::test]
    async fn block_plays_again_once_idle() {
        let launcher = FakeLauncher::new();
        let sup = Supervisor::new(launcher.clone(), 80);
        let mut events = sup.subscribe();

        sup.play(PlaybackRequest::new("a.wav", PlaybackMode::Block, 80))
            .await
            .unwrap();
        launcher.finish("a.wav", Outcome::Finished);
        wait_for(&mut events, PlaybackEvent::Finished { path: "a.wav".into() }).await;

        sup.play(PlaybackRequest::new("b.wav", PlaybackMode::Block, 80))
            .await
            .unwrap();
        assert_eq!(sup.status().await.current_sound.as_deref(), Some("b.wav"));
    }

    #[tokio::test]
    async fn interrupt_replaces_current_and_drops_queue() {
        let launcher = FakeLauncher::new();
        let sup = Supervisor::new(launcher.clone(), 80);
        let mut events = sup.subscribe();

        sup.play(queued("a.wav")).await.unwrap();
        sup.play(queued("b.wav")).await.unwrap();
        sup.play(PlaybackRequest::new("c.wav", PlaybackMode::Interrupt, 80))
            .await
            .unwrap();

        let status = sup.status().await;
        assert_eq!(status.current_sound.as_deref(), Some("c.wav"));
        assert!(status.queue.is_empty());

        // The killed clip's exit arrives after the replacement started.
        wait_for(&mut events, PlaybackEvent::Stopped { path: "a.wav".into() }).await;
        let status = sup.status().await;
        assert!(status.is_playing);
        assert_eq!(status.current_sound.as_deref(), Some("c.wav"));
        assert_eq!(launcher.launched(), vec!["a.wav", "c.wav"]);
    }

    #[tokio::test]
    async fn interrupt_while_idle_just_plays() {
        let sup = Supervisor::new(FakeLauncher::new(), 80);
        sup.play(PlaybackRequest::new("a.wav", PlaybackMode::Interrupt, 80))
            .await
            .unwrap();
        assert_eq!(sup.status().await.current_sound.as_deref(), Some("a.wav"));
    }

    #[tokio::test]
    async fn no_backend_rejects_every_mode() {
        let launcher = FakeLauncher::without_backend();
        let sup = Supervisor::new(launcher.clone(), 80);

        for mode in [PlaybackMode::Queue, PlaybackMode::Interrupt, PlaybackMode::Block] {
            let err = sup
                .play(PlaybackRequest::new("a.wav", mode, 80))
                .await
                .unwrap_err();
            assert_eq!(err, PlaybackError::NoPlayerAvailable);
        }

        let status = sup.status().await;
        assert!(!status.is_playing);
        assert_eq!(status.queue_length, 0);
        assert!(launcher.launched().is_empty());
    }

    #[tokio::test]
    async fn launch_error_surfaces_to_block_and_interrupt_callers() {
        let sup = Supervisor::new(FakeLauncher::refusing(&["bad.wav"]), 80);

        for mode in [PlaybackMode::Interrupt, PlaybackMode::Block] {
            let err = sup
                .play(PlaybackRequest::new("bad.wav", mode, 80))
                .await
                .unwrap_err();
            assert!(matches!(err, PlaybackError::Launch(_)));
            assert!(!sup.status().await.is_playing);
        }
    }

    #[tokio::test]
    async fn queue_skips_items_that_fail_to_launch() {
        let launcher = FakeLauncher::refusing(&["bad.wav"]);
        let sup = Supervisor::new(launcher.clone(), 80);
        let mut events = sup.subscribe();

        sup.play(queued("a.wav")).await.unwrap();
        sup.play(queued("bad.wav")).await.unwrap();
        sup.play(queued("c.wav")).await.unwrap();

        launcher.finish("a.wav", Outcome::Finished);
        let seen = wait_for(&mut events, playing("c.wav")).await;
        assert!(seen
            .iter()
            .any(|e| matches!(e, PlaybackEvent::Failed { path, .. } if path == "bad.wav")));
        assert_eq!(sup.status().await.current_sound.as_deref(), Some("c.wav"));
    }

    #[tokio::test]
    async fn playback_failure_during_drain_moves_on() {
        let launcher = FakeLauncher::new();
        let sup = Supervisor::new(launcher.clone(), 80);
        let mut events = sup.subscribe();

        sup.play(queued("a.wav")).await.unwrap();
        sup.play(queued("b.wav")).await.unwrap();
        launcher.finish("a.wav", Outcome::Failed("aplay exited with exit status: 1".into()));

        let seen = wait_for(&mut events, playing("b.wav")).await;
        assert!(seen.contains(&PlaybackEvent::Failed {
            path: "a.wav".into(),
            error: "aplay exited with exit status: 1".into(),
        }));
    }

    #[tokio::test]
    async fn queue_submitted_after_stop_plays_once_old_process_exits() {
        let launcher = FakeLauncher::new();
        let sup = Supervisor::new(launcher.clone(), 80);
        let mut events = sup.subscribe();

        sup.play(queued("a.wav")).await.unwrap();
        sup.stop().await;
        sup.play(queued("b.wav")).await.unwrap();

        wait_for(&mut events, playing("b.wav")).await;
        let status = sup.status().await;
        assert_eq!(status.current_sound.as_deref(), Some("b.wav"));
        assert!(status.queue.is_empty());
    }

    #[tokio::test]
    async fn items_queued_behind_a_block_play_still_drain() {
        let launcher = FakeLauncher::new();
        let sup = Supervisor::new(launcher.clone(), 80);
        let mut events = sup.subscribe();

        sup.play(PlaybackRequest::new("a.wav", PlaybackMode::Block, 80))
            .await
            .unwrap();
        sup.play(queued("b.wav")).await.unwrap();
        assert_eq!(sup.status().await.queue, vec!["b.wav"]);

        launcher.finish("a.wav", Outcome::Finished);
        wait_for(&mut events, playing("b.wav")).await;
    }

    #[tokio::test]
    async fn volume_is_clamped_and_used_for_later_queue_items() {
        let launcher = FakeLauncher::new();
        let sup = Supervisor::new(launcher.clone(), 80);
        let mut events = sup.subscribe();

        sup.play(PlaybackRequest::new("a.wav", PlaybackMode::Queue, 150))
            .await
            .unwrap();
        sup.play(queued("b.wav")).await.unwrap();
        sup.set_volume(-5).await;
        assert_eq!(sup.volume().await, 0);

        launcher.finish("a.wav", Outcome::Finished);
        wait_for(&mut events, playing("b.wav")).await;

        let launched = launcher.launched.lock().unwrap().clone();
        assert_eq!(launched, vec![("a.wav".to_string(), 100), ("b.wav".to_string(), 0)]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn queue_submitted_while_a_direct_launch_fails_still_plays() {
        let launcher = FakeLauncher::slow_and_refusing(&["slow-bad.wav"], &["slow-bad.wav"]);
        let sup = Supervisor::new(launcher.clone(), 80);
        let mut events = sup.subscribe();

        let block = tokio::spawn({
            let sup = sup.clone();
            async move {
                sup.play(PlaybackRequest::new("slow-bad.wav", PlaybackMode::Block, 80))
                    .await
            }
        });
        wait_until_playing(&sup).await;

        // Output is busy with the failing spawn, so this only queues.
        sup.play(queued("b.wav")).await.unwrap();

        let err = block.await.unwrap().unwrap_err();
        assert!(matches!(err, PlaybackError::Launch(_)));

        let seen = wait_for(&mut events, playing("b.wav")).await;
        assert!(seen
            .iter()
            .any(|e| matches!(e, PlaybackEvent::Failed { path, .. } if path == "slow-bad.wav")));
        let status = sup.status().await;
        assert_eq!(status.current_sound.as_deref(), Some("b.wav"));
        assert!(status.queue.is_empty());
        assert_eq!(launcher.launched(), vec!["b.wav"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_queue_submits_each_play_once_one_at_a_time() {
        const N: usize = 8;
        let launcher = FakeLauncher::new();
        let sup = Supervisor::new(launcher.clone(), 80);
        let mut events = sup.subscribe();

        let submits: Vec<_> = (0..N)
            .map(|i| {
                let sup = sup.clone();
                tokio::spawn(async move { sup.play(queued(&format!("{i}.wav"))).await })
            })
            .collect();
        for submit in submits {
            submit.await.unwrap().unwrap();
        }

        let mut started = 0;
        let mut last = String::new();
        while started < N {
            let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
                .await
                .expect("queue stalled")
                .unwrap();
            if let PlaybackEvent::Playing { path } = event {
                started += 1;
                launcher.finish(&path, Outcome::Finished);
                last = path;
            }
        }
        wait_for(&mut events, PlaybackEvent::Finished { path: last }).await;

        let mut launched = launcher.launched();
        assert_eq!(launched.len(), N);
        launched.sort();
        launched.dedup();
        assert_eq!(launched.len(), N);
        assert_eq!(launcher.max_live(), 1);

        let status = sup.status().await;
        assert!(!status.is_playing);
        assert_eq!(status.queue_length, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn stop_during_slow_spawn_kills_on_arrival_without_playing() {
        let launcher = FakeLauncher::slow_and_refusing(&["slow.wav"], &[]);
        let sup = Supervisor::new(launcher.clone(), 80);
        let mut events = sup.subscribe();

        let play = tokio::spawn({
            let sup = sup.clone();
            async move { sup.play(queued("slow.wav")).await }
        });
        wait_until_playing(&sup).await;
        sup.stop().await;

        play.await.unwrap().unwrap();
        let seen = wait_for(&mut events, PlaybackEvent::Stopped { path: "slow.wav".into() }).await;
        assert_eq!(seen, vec![PlaybackEvent::Stopped { path: "slow.wav".into() }]);

        assert_eq!(launcher.launched(), vec!["slow.wav"]);
        assert_eq!(launcher.now_live(), 0);
        let status = sup.status().await;
        assert!(!status.is_playing);
        assert_eq!(status.current_sound, None);
    }

    #[test]
    fn playback_mode_setting_defaults_to_queue() {
        assert_eq!(PlaybackMode::from_setting(None), PlaybackMode::Queue);
        assert_eq!(PlaybackMode::from_setting(Some("shuffle")), PlaybackMode::Queue);
        assert_eq!(PlaybackMode::from_setting(Some("block")), PlaybackMode::Block);
        assert_eq!(PlaybackMode::from_setting(Some("interrupt")), PlaybackMode::Interrupt);
    }

    #[test]
    fn status_serializes_in_camel_case() {
        let status = PlaybackStatus {
            is_playing: true,
            current_sound: Some("/uploads/a.wav".into()),
            queue_length: 1,
            queue: vec!["/uploads/b.wav".into()],
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["isPlaying"], true);
        assert_eq!(json["currentSound"], "/uploads/a.wav");
        assert_eq!(json["queueLength"], 1);
        assert_eq!(json["queue"][0], "/uploads/b.wav");
    }
}
