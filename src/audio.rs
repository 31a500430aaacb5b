//! Audio device output using rodio.

use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink, Source};
use std::io::Cursor;
use std::time::Duration;

use crate::error::ReaderError;
use crate::player::{AudioClip, AudioOutput};

/// Plays decoded clips on the default output device. One sink per clip.
pub struct RodioOutput {
    _stream: OutputStream,
    handle: OutputStreamHandle,
    sink: Option<Sink>,
    duration: Option<Duration>,
}

impl RodioOutput {
    pub fn try_default() -> Result<Self, ReaderError> {
        let (stream, handle) = OutputStream::try_default()
            .map_err(|e| ReaderError::Audio(format!("failed to open audio device: {e}")))?;
        Ok(Self {
            _stream: stream,
            handle,
            sink: None,
            duration: None,
        })
    }
}

impl AudioOutput for RodioOutput {
    fn load(&mut self, clip: AudioClip) -> Result<(), ReaderError> {
        self.stop();
        let decoder = Decoder::new(Cursor::new(clip.bytes))
            .map_err(|e| ReaderError::Audio(format!("cannot decode {}: {e}", clip.url)))?;
        let duration = decoder.total_duration();
        let sink = Sink::try_new(&self.handle)
            .map_err(|e| ReaderError::Audio(format!("failed to create audio sink: {e}")))?;
        // Held paused until play() so load and start stay separate steps.
        sink.pause();
        sink.append(decoder);
        self.sink = Some(sink);
        self.duration = duration;
        Ok(())
    }

    fn play(&mut self) -> Result<(), ReaderError> {
        let sink = self
            .sink
            .as_ref()
            .ok_or_else(|| ReaderError::Audio("no clip loaded".to_string()))?;
        sink.play();
        Ok(())
    }

    fn pause(&mut self) {
        if let Some(sink) = &self.sink {
            sink.pause();
        }
    }

    fn stop(&mut self) {
        if let Some(sink) = self.sink.take() {
            sink.stop();
        }
        self.duration = None;
    }

    fn duration(&self) -> Option<Duration> {
        self.duration
    }

    fn seek(&mut self, offset: Duration) -> Result<(), ReaderError> {
        let sink = self
            .sink
            .as_ref()
            .ok_or_else(|| ReaderError::Audio("no clip loaded".to_string()))?;
        sink.try_seek(offset)
            .map_err(|e| ReaderError::Audio(format!("seek failed: {e:?}")))
    }

    fn is_finished(&self) -> bool {
        self.sink.as_ref().is_some_and(Sink::empty)
    }
}
