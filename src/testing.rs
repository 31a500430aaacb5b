//! In-memory doubles shared by the unit tests.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use crate::api::{ContentSource, EditionChapter, EditionVerse};
use crate::error::{ReaderError, Result};
use crate::model::{AudioList, ChapterSummary};
use crate::store::{KeyValueStore, MemoryStore};

pub(crate) fn verse_count(chapter: u32) -> u32 {
    if chapter == 1 { 7 } else { chapter % 10 + 3 }
}

#[derive(Default)]
pub(crate) struct FakeSource {
    pub index_requests: AtomicUsize,
    pub edition_requests: AtomicUsize,
    pub audio_requests: AtomicUsize,
    pub blob_requests: AtomicUsize,
    pub fail_editions: AtomicBool,
    pub fail_index: AtomicBool,
    delays: Mutex<HashMap<u32, Duration>>,
    silent_verses: Mutex<HashSet<(u32, u32)>>,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays both edition fetches of `chapter`.
    pub fn delay(&self, chapter: u32, delay: Duration) {
        self.delays.lock().insert(chapter, delay);
    }

    /// Leaves the audio slot of `chapter:position` empty.
    pub fn without_audio(&self, chapter: u32, position: u32) {
        self.silent_verses.lock().insert((chapter, position));
    }

    pub fn editions(&self) -> usize {
        self.edition_requests.load(Ordering::SeqCst)
    }

    pub fn audio_lists(&self) -> usize {
        self.audio_requests.load(Ordering::SeqCst)
    }

    pub fn blobs(&self) -> usize {
        self.blob_requests.load(Ordering::SeqCst)
    }

    pub fn audio_url(chapter: u32, reciter: &str, position: u32) -> String {
        format!("https://audio.test/{reciter}/{chapter}/{position}.mp3")
    }
}

fn unavailable(path: String) -> ReaderError {
    ReaderError::Status {
        status: 503,
        url: path,
    }
}

impl ContentSource for FakeSource {
    async fn fetch_chapter_index(&self) -> Result<Vec<ChapterSummary>> {
        self.index_requests.fetch_add(1, Ordering::SeqCst);
        if self.fail_index.load(Ordering::SeqCst) {
            return Err(unavailable("surah".to_string()));
        }
        Ok((1..=3)
            .map(|number| ChapterSummary {
                number,
                name: format!("سورة {number}"),
                english_name: ["Al-Faatiha", "Al-Baqara", "Aal-i-Imraan"][number as usize - 1]
                    .to_string(),
                english_name_translation: String::new(),
                verse_count: verse_count(number),
                revelation_type: String::new(),
            })
            .collect())
    }

    async fn fetch_edition(&self, chapter: u32, edition: &str) -> Result<EditionChapter> {
        self.edition_requests.fetch_add(1, Ordering::SeqCst);
        let delay = self.delays.lock().get(&chapter).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_editions.load(Ordering::SeqCst) {
            return Err(unavailable(format!("surah/{chapter}/{edition}")));
        }
        Ok(EditionChapter {
            number: chapter,
            name: format!("سورة {chapter}"),
            english_name: format!("Chapter {chapter}"),
            verses: (1..=verse_count(chapter))
                .map(|position| EditionVerse {
                    position,
                    text: format!("{edition} {chapter}:{position}"),
                })
                .collect(),
        })
    }

    async fn fetch_audio_list(&self, chapter: u32, reciter: &str) -> Result<AudioList> {
        self.audio_requests.fetch_add(1, Ordering::SeqCst);
        let silent = self.silent_verses.lock().clone();
        Ok(AudioList {
            chapter,
            reciter: reciter.to_string(),
            urls: (1..=verse_count(chapter))
                .map(|position| {
                    (!silent.contains(&(chapter, position)))
                        .then(|| Self::audio_url(chapter, reciter, position))
                })
                .collect(),
        })
    }

    async fn fetch_blob(&self, url: &str) -> Result<Vec<u8>> {
        self.blob_requests.fetch_add(1, Ordering::SeqCst);
        Ok(url.as_bytes().to_vec())
    }
}

/// Reads like a [`MemoryStore`] but refuses every write.
#[derive(Default)]
pub(crate) struct ReadOnlyStore {
    inner: MemoryStore,
}

impl KeyValueStore for ReadOnlyStore {
    fn get(&self, key: &str) -> io::Result<Option<String>> {
        self.inner.get(key)
    }

    fn set(&self, _key: &str, _value: &str) -> io::Result<()> {
        Err(io::Error::other("storage quota exceeded"))
    }

    fn remove(&self, key: &str) -> io::Result<()> {
        self.inner.remove(key)
    }

    fn keys(&self) -> io::Result<Vec<String>> {
        self.inner.keys()
    }

    fn clear(&self) -> io::Result<()> {
        self.inner.clear()
    }
}
