//! Verse-by-verse playback over a single audio output.

use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{Notice, ReaderError};
use crate::model::AudioList;

/// Downloaded audio for one verse.
#[derive(Debug, Clone)]
pub struct AudioClip {
    pub url: String,
    pub bytes: Vec<u8>,
}

/// The one audio resource a [`Player`] drives.
pub trait AudioOutput {
    fn load(&mut self, clip: AudioClip) -> Result<(), ReaderError>;
    fn play(&mut self) -> Result<(), ReaderError>;
    fn pause(&mut self);
    /// Stops and unloads the current source.
    fn stop(&mut self);
    fn duration(&self) -> Option<Duration>;
    fn seek(&mut self, offset: Duration) -> Result<(), ReaderError>;
    /// True once a loaded source has played to its end.
    fn is_finished(&self) -> bool;
}

/// Output used when no audio device is compiled in. Accepts everything and
/// never reaches the end of a clip.
#[derive(Debug, Default)]
pub struct SilentOutput {
    current: Option<String>,
}

impl AudioOutput for SilentOutput {
    fn load(&mut self, clip: AudioClip) -> Result<(), ReaderError> {
        debug!(url = %clip.url, bytes = clip.bytes.len(), "silent output loaded clip");
        self.current = Some(clip.url);
        Ok(())
    }

    fn play(&mut self) -> Result<(), ReaderError> {
        if let Some(url) = &self.current {
            info!(%url, "playing (no audio device)");
        }
        Ok(())
    }

    fn pause(&mut self) {}

    fn stop(&mut self) {
        self.current = None;
    }

    fn duration(&self) -> Option<Duration> {
        None
    }

    fn seek(&mut self, _offset: Duration) -> Result<(), ReaderError> {
        Ok(())
    }

    fn is_finished(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayState {
    Idle,
    Playing,
    Paused,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Toggle {
    Paused,
    Resumed,
    /// Nothing is loaded; the caller should start the verse at this index.
    NeedsSource(usize),
    Failed(Notice),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Play(usize),
    EndOfChapter,
}

pub struct Player<O> {
    output: O,
    state: PlayState,
    index: usize,
    loaded: bool,
    reciter: String,
    audio: Option<AudioList>,
}

impl<O: AudioOutput> Player<O> {
    pub fn new(output: O, reciter: impl Into<String>) -> Self {
        Self {
            output,
            state: PlayState::Idle,
            index: 0,
            loaded: false,
            reciter: reciter.into(),
            audio: None,
        }
    }

    pub fn state(&self) -> PlayState {
        self.state
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn reciter(&self) -> &str {
        &self.reciter
    }

    pub fn output(&self) -> &O {
        &self.output
    }

    pub fn output_mut(&mut self) -> &mut O {
        &mut self.output
    }

    /// The installed audio list, if it was fetched for `chapter` and the
    /// active reciter.
    pub fn audio_list_for(&self, chapter: u32) -> Option<&AudioList> {
        self.audio
            .as_ref()
            .filter(|list| list.is_for(chapter, &self.reciter))
    }

    pub fn install_audio_list(&mut self, list: AudioList) {
        self.audio = Some(list);
    }

    /// Loads `clip` and starts it as the verse at `index`. On failure the
    /// player stays idle.
    pub fn start(&mut self, index: usize, clip: AudioClip) -> Result<(), Notice> {
        self.stop();
        let blocked = |err: ReaderError| Notice::PlaybackBlocked {
            reason: err.to_string(),
        };
        self.output.load(clip).map_err(blocked)?;
        self.loaded = true;
        if let Err(err) = self.output.play() {
            self.stop();
            return Err(blocked(err));
        }
        self.index = index;
        self.state = PlayState::Playing;
        Ok(())
    }

    pub fn toggle(&mut self) -> Toggle {
        match self.state {
            PlayState::Playing => {
                self.output.pause();
                self.state = PlayState::Paused;
                Toggle::Paused
            }
            PlayState::Paused => match self.output.play() {
                Ok(()) => {
                    self.state = PlayState::Playing;
                    Toggle::Resumed
                }
                Err(err) => {
                    self.stop();
                    Toggle::Failed(Notice::PlaybackBlocked {
                        reason: err.to_string(),
                    })
                }
            },
            PlayState::Idle => Toggle::NeedsSource(self.index),
        }
    }

    pub fn next_step(&self, verse_count: usize) -> Step {
        if self.index + 1 < verse_count {
            Step::Play(self.index + 1)
        } else {
            Step::EndOfChapter
        }
    }

    pub fn previous_index(&self) -> Option<usize> {
        self.index.checked_sub(1)
    }

    /// Seeks to `percent` of the loaded clip. Returns the applied offset, or
    /// `None` when nothing is loaded or the duration is unknown.
    pub fn seek(&mut self, percent: f64) -> Option<Duration> {
        if !self.loaded || !percent.is_finite() {
            return None;
        }
        let duration = self.output.duration()?;
        let offset = duration.mul_f64(percent.clamp(0.0, 100.0) / 100.0);
        match self.output.seek(offset) {
            Ok(()) => Some(offset),
            Err(err) => {
                debug!(error = %err, "seek rejected by output");
                None
            }
        }
    }

    /// Switches reciter, stopping playback and dropping the audio list.
    pub fn set_reciter(&mut self, reciter: impl Into<String>) {
        self.stop();
        self.audio = None;
        self.reciter = reciter.into();
    }

    pub fn stop(&mut self) {
        if self.loaded {
            self.output.stop();
        }
        self.loaded = false;
        self.state = PlayState::Idle;
    }

    /// Stops playback and points at the given verse without playing it.
    pub fn cue(&mut self, index: usize) {
        self.stop();
        self.index = index;
    }

    /// Detects a natural end of the playing clip and moves to idle.
    pub fn take_finished(&mut self) -> bool {
        if self.state == PlayState::Playing && self.output.is_finished() {
            self.output.stop();
            self.loaded = false;
            self.state = PlayState::Idle;
            true
        } else {
            false
        }
    }
}
