//! Audio feedback.
//!
//! A cycle plays exactly one cue. `Error` loops until stopped; `Cap` and `Ok` play once.

use anyhow::{anyhow, Result};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::config::AudioSettings;
use crate::resolve::SortCategory;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SoundCue {
    Error,
    Cap,
    Ok,
}

impl SoundCue {
    pub fn for_category(category: SortCategory) -> Self {
        match category {
            SortCategory::Error => SoundCue::Error,
            SortCategory::NoCap => SoundCue::Cap,
            SortCategory::Blue | SortCategory::Yellow | SortCategory::Green => SoundCue::Ok,
        }
    }

    pub fn loops(self) -> bool {
        self == SoundCue::Error
    }
}

pub trait AudioSink: Send + Sync {
    /// Start `cue`, replacing whatever is playing.
    fn play(&self, cue: SoundCue);

    /// Stop playback, including a looping cue. No-op when silent.
    fn stop(&self);
}

pub fn open_audio(settings: &AudioSettings) -> Result<Arc<dyn AudioSink>> {
    if !settings.enabled {
        log::info!("audio disabled");
        return Ok(Arc::new(SilentAudio));
    }
    Ok(Arc::new(CommandAudio::new(settings)?))
}

// ----------------------------------------------------------------------------
// External player
// ----------------------------------------------------------------------------

struct ActivePlayback {
    cue: SoundCue,
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Plays sound files through an external command line player (`mpg123 -q` by default).
pub struct CommandAudio {
    program: String,
    args: Vec<String>,
    error_sound: PathBuf,
    cap_sound: PathBuf,
    ok_sound: PathBuf,
    active: Mutex<Option<ActivePlayback>>,
}

impl CommandAudio {
    pub fn new(settings: &AudioSettings) -> Result<Self> {
        let mut parts = settings.player.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| anyhow!("audio player command must not be empty"))?;
        Ok(Self {
            program,
            args: parts.collect(),
            error_sound: settings.error_sound.clone(),
            cap_sound: settings.cap_sound.clone(),
            ok_sound: settings.ok_sound.clone(),
            active: Mutex::new(None),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Option<ActivePlayback>> {
        self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn sound_path(&self, cue: SoundCue) -> &PathBuf {
        match cue {
            SoundCue::Error => &self.error_sound,
            SoundCue::Cap => &self.cap_sound,
            SoundCue::Ok => &self.ok_sound,
        }
    }

    /// Cue currently playing, if any.
    pub fn playing(&self) -> Option<SoundCue> {
        self.lock()
            .as_ref()
            .filter(|active| !active.handle.is_finished())
            .map(|active| active.cue)
    }

    fn halt(active: ActivePlayback) {
        active.stop.store(true, Ordering::SeqCst);
        if active.handle.join().is_err() {
            log::warn!("audio: playback thread panicked");
        }
    }
}

impl AudioSink for CommandAudio {
    fn play(&self, cue: SoundCue) {
        let mut active = self.lock();
        if let Some(previous) = active.take() {
            Self::halt(previous);
        }

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg(self.sound_path(cue))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let spawned = std::thread::Builder::new()
            .name("audio".to_string())
            .spawn(move || playback_loop(command, cue, thread_stop));
        match spawned {
            Ok(handle) => *active = Some(ActivePlayback { cue, stop, handle }),
            Err(err) => log::warn!("audio: failed to start playback thread: {}", err),
        }
    }

    fn stop(&self) {
        if let Some(active) = self.lock().take() {
            Self::halt(active);
        }
    }
}

impl Drop for CommandAudio {
    fn drop(&mut self) {
        self.stop();
    }
}

fn playback_loop(mut command: Command, cue: SoundCue, stop: Arc<AtomicBool>) {
    loop {
        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(err) => {
                log::warn!("audio: failed to start player for {:?}: {}", cue, err);
                return;
            }
        };
        match wait_or_stop(&mut child, &stop) {
            Some(status) if status.success() => {}
            Some(status) => {
                log::warn!("audio: player exited with {} for {:?}", status, cue);
                return;
            }
            None => return,
        }
        if !cue.loops() || stop.load(Ordering::SeqCst) {
            return;
        }
    }
}

/// Wait for the child to exit; kill it if `stop` is raised first.
fn wait_or_stop(child: &mut Child, stop: &AtomicBool) -> Option<std::process::ExitStatus> {
    loop {
        if stop.load(Ordering::SeqCst) {
            let _ = child.kill();
            let _ = child.wait();
            return None;
        }
        match child.try_wait() {
            Ok(Some(status)) => return Some(status),
            Ok(None) => std::thread::sleep(Duration::from_millis(20)),
            Err(err) => {
                log::warn!("audio: lost track of player process: {}", err);
                let _ = child.kill();
                return None;
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Silent and recording sinks
// ----------------------------------------------------------------------------

pub struct SilentAudio;

impl AudioSink for SilentAudio {
    fn play(&self, cue: SoundCue) {
        log::debug!("audio (silent): {:?}", cue);
    }

    fn stop(&self) {}
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AudioEvent {
    Play(SoundCue),
    Stop,
}

/// Sink that records every call; clones share the log.
#[derive(Clone, Default)]
pub struct RecordingAudio {
    events: Arc<Mutex<Vec<AudioEvent>>>,
}

impl RecordingAudio {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AudioEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn plays(&self) -> Vec<SoundCue> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                AudioEvent::Play(cue) => Some(cue),
                AudioEvent::Stop => None,
            })
            .collect()
    }

    fn record(&self, event: AudioEvent) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event);
    }
}

impl AudioSink for RecordingAudio {
    fn play(&self, cue: SoundCue) {
        self.record(AudioEvent::Play(cue));
    }

    fn stop(&self) {
        self.record(AudioEvent::Stop);
    }
}
