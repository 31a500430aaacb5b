//! Local persistence: a string key-value store plus the chapter cache,
//! bookmark list and audio blob cache layered on top of it.

use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use percent_encoding::{NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, ErrorKind};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::Result;
use crate::model::{BookmarkTag, Chapter, ChapterSummary};

pub const CACHE_SCHEMA_VERSION: &str = "v1";
pub const BOOKMARKS_KEY: &str = "bookmarks";
pub const AUDIO_CACHE_NAME: &str = "og-audio-cache-v1";
const CHAPTER_KEY_PREFIX: &str = "chapter:";

/// String keys to JSON string values, with no expiry.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> io::Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> io::Result<()>;
    fn remove(&self, key: &str) -> io::Result<()>;
    fn keys(&self) -> io::Result<Vec<String>>;
    fn clear(&self) -> io::Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> io::Result<Option<String>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> io::Result<()> {
        self.entries
            .write()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> io::Result<()> {
        self.entries.write().remove(key);
        Ok(())
    }

    fn keys(&self) -> io::Result<Vec<String>> {
        Ok(self.entries.read().keys().cloned().collect())
    }

    fn clear(&self) -> io::Result<()> {
        self.entries.write().clear();
        Ok(())
    }
}

/// One `<percent-encoded key>.json` file per entry under `root`. Clones share
/// one write lock, so a write and its rename never interleave with another.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let encoded = utf8_percent_encode(key, NON_ALPHANUMERIC).to_string();
        self.root.join(format!("{encoded}.json"))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> io::Result<Option<String>> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn set(&self, key: &str, value: &str) -> io::Result<()> {
        let _guard = self.write_lock.lock();
        fs::create_dir_all(&self.root)?;
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &path)
    }

    fn remove(&self, key: &str) -> io::Result<()> {
        let _guard = self.write_lock.lock();
        match fs::remove_file(self.path_for(key)) {
            Err(err) if err.kind() != ErrorKind::NotFound => Err(err),
            _ => Ok(()),
        }
    }

    fn keys(&self) -> io::Result<Vec<String>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err),
        };
        let mut keys = Vec::new();
        for entry in entries {
            let name = entry?.file_name();
            let Some(stem) = name.to_str().and_then(|name| name.strip_suffix(".json")) else {
                continue;
            };
            if let Ok(key) = percent_decode_str(stem).decode_utf8() {
                keys.push(key.into_owned());
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn clear(&self) -> io::Result<()> {
        for key in self.keys()? {
            self.remove(&key)?;
        }
        Ok(())
    }
}

pub fn chapter_key(chapter: u32) -> String {
    format!("{CHAPTER_KEY_PREFIX}{chapter}:{CACHE_SCHEMA_VERSION}")
}

fn index_key() -> String {
    format!("chapters:{CACHE_SCHEMA_VERSION}")
}

fn recency_key() -> String {
    format!("chapters:recency:{CACHE_SCHEMA_VERSION}")
}

fn chapter_from_key(key: &str) -> Option<u32> {
    let rest = key.strip_prefix(CHAPTER_KEY_PREFIX)?;
    let (id, version) = rest.split_once(':')?;
    if version != CACHE_SCHEMA_VERSION {
        return None;
    }
    id.parse().ok()
}

/// Chapter cache keyed by `chapter:<id>:v1`. Reads never fail: any read or
/// parse problem is a miss. Writes are best effort.
///
/// With a budget, the least recently opened chapter is evicted once more
/// than `budget` chapters are cached.
pub struct ChapterCache {
    store: Arc<dyn KeyValueStore>,
    recency: Option<Mutex<LruCache<u32, ()>>>,
}

impl ChapterCache {
    pub fn new(store: Arc<dyn KeyValueStore>, budget: Option<usize>) -> Self {
        let recency = budget
            .and_then(NonZeroUsize::new)
            .map(|cap| Mutex::new(load_recency(store.as_ref(), cap)));
        Self { store, recency }
    }

    pub fn load(&self, chapter: u32) -> Option<Chapter> {
        let key = chapter_key(chapter);
        let raw = match self.store.get(&key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(err) => {
                debug!(chapter, error = %err, "chapter cache read failed; treating as miss");
                return None;
            }
        };
        match serde_json::from_str::<Chapter>(&raw) {
            Ok(cached) if cached.number == chapter => {
                self.touch(chapter);
                Some(cached)
            }
            Ok(cached) => {
                debug!(chapter, found = cached.number, "chapter cache entry mismatched");
                None
            }
            Err(err) => {
                debug!(chapter, error = %err, "chapter cache entry unreadable; treating as miss");
                None
            }
        }
    }

    pub fn store(&self, chapter: &Chapter) {
        let key = chapter_key(chapter.number);
        let written = serde_json::to_string(chapter)
            .map_err(io::Error::from)
            .and_then(|raw| self.store.set(&key, &raw));
        match written {
            Ok(()) => self.touch(chapter.number),
            Err(err) => {
                warn!(chapter = chapter.number, error = %err, "chapter cache write skipped")
            }
        }
    }

    pub fn load_index(&self) -> Option<Vec<ChapterSummary>> {
        let raw = match self.store.get(&index_key()) {
            Ok(raw) => raw?,
            Err(err) => {
                debug!(error = %err, "chapter index cache read failed");
                return None;
            }
        };
        serde_json::from_str(&raw)
            .map_err(|err| debug!(error = %err, "chapter index cache unreadable"))
            .ok()
    }

    pub fn store_index(&self, chapters: &[ChapterSummary]) {
        let written = serde_json::to_string(chapters)
            .map_err(io::Error::from)
            .and_then(|raw| self.store.set(&index_key(), &raw));
        if let Err(err) = written {
            warn!(error = %err, "chapter index cache write skipped");
        }
    }

    /// Drops the in-memory recency order after the backing store was wiped.
    pub fn forget_all(&self) {
        if let Some(recency) = &self.recency {
            recency.lock().clear();
        }
    }

    fn touch(&self, chapter: u32) {
        let Some(recency) = &self.recency else {
            return;
        };
        let mut guard = recency.lock();
        if let Some((evicted, ())) = guard.push(chapter, ()) {
            if evicted != chapter {
                debug!(chapter = evicted, "evicting least recently opened chapter");
                if let Err(err) = self.store.remove(&chapter_key(evicted)) {
                    warn!(chapter = evicted, error = %err, "failed to evict cached chapter");
                }
            }
        }
        let order: Vec<u32> = guard.iter().map(|(id, _)| *id).collect();
        drop(guard);
        let written = serde_json::to_string(&order)
            .map_err(io::Error::from)
            .and_then(|raw| self.store.set(&recency_key(), &raw));
        if let Err(err) = written {
            warn!(error = %err, "failed to persist chapter recency");
        }
    }
}

fn load_recency(store: &dyn KeyValueStore, cap: NonZeroUsize) -> LruCache<u32, ()> {
    // Persisted most recent first.
    let persisted: Vec<u32> = store
        .get(&recency_key())
        .ok()
        .flatten()
        .and_then(|raw| serde_json::from_str(&raw).ok())
        .unwrap_or_default();
    let cached: Vec<u32> = store
        .keys()
        .unwrap_or_default()
        .iter()
        .filter_map(|key| chapter_from_key(key))
        .filter(|id| !persisted.contains(id))
        .collect();

    // Untracked entries count as oldest. Whatever falls past the budget is deleted.
    let mut lru = LruCache::new(cap);
    for id in cached.iter().chain(persisted.iter().rev()) {
        if let Some((evicted, ())) = lru.push(*id, ()) {
            debug!(chapter = evicted, "cached chapter over budget at startup");
            if let Err(err) = store.remove(&chapter_key(evicted)) {
                warn!(chapter = evicted, error = %err, "failed to evict cached chapter");
            }
        }
    }
    lru
}

/// Ordered, duplicate-free bookmark list stored under one key.
pub struct BookmarkStore {
    store: Arc<dyn KeyValueStore>,
    write_lock: Mutex<()>,
}

impl BookmarkStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
        }
    }

    pub fn list(&self) -> Vec<BookmarkTag> {
        let raw = match self.store.get(BOOKMARKS_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(err) => {
                debug!(error = %err, "bookmark read failed");
                return Vec::new();
            }
        };
        let entries: Vec<String> = match serde_json::from_str(&raw) {
            Ok(entries) => entries,
            Err(err) => {
                debug!(error = %err, "bookmark list unreadable");
                return Vec::new();
            }
        };
        entries
            .iter()
            .filter_map(|entry| entry.parse().ok())
            .collect()
    }

    /// Appends `tag` unless it is already present. Returns whether it was added.
    pub fn add(&self, tag: BookmarkTag) -> Result<bool> {
        let _guard = self.write_lock.lock();
        let mut tags = self.list();
        if tags.contains(&tag) {
            return Ok(false);
        }
        tags.push(tag);
        self.store
            .set(BOOKMARKS_KEY, &serde_json::to_string(&tags)?)?;
        Ok(true)
    }

    pub fn clear(&self) -> Result<()> {
        let _guard = self.write_lock.lock();
        self.store.remove(BOOKMARKS_KEY)?;
        Ok(())
    }

    /// Pretty-printed JSON array of tag strings.
    pub fn export_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.list())?)
    }
}

/// Opaque audio blobs keyed by URL. A cache without a directory stores nothing.
#[derive(Debug, Clone)]
pub struct AudioCache {
    dir: Option<PathBuf>,
}

impl AudioCache {
    pub fn in_dir(data_dir: &Path) -> Self {
        Self {
            dir: Some(data_dir.join(AUDIO_CACHE_NAME)),
        }
    }

    pub fn disabled() -> Self {
        Self { dir: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.dir.is_some()
    }

    fn path_for(&self, url: &str) -> Option<PathBuf> {
        let dir = self.dir.as_ref()?;
        Some(dir.join(utf8_percent_encode(url, NON_ALPHANUMERIC).to_string()))
    }

    pub fn contains(&self, url: &str) -> bool {
        self.path_for(url).is_some_and(|path| path.is_file())
    }

    pub fn get(&self, url: &str) -> Option<Vec<u8>> {
        fs::read(self.path_for(url)?).ok()
    }

    pub fn put(&self, url: &str, bytes: &[u8]) -> io::Result<()> {
        let Some(path) = self.path_for(url) else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, bytes)
    }

    pub fn clear(&self) -> io::Result<()> {
        match &self.dir {
            Some(dir) => match fs::remove_dir_all(dir) {
                Err(err) if err.kind() != ErrorKind::NotFound => Err(err),
                _ => Ok(()),
            },
            None => Ok(()),
        }
    }
}
