use std::sync::Arc;
use tracing::{debug, info};

use crate::api::{ContentSource, merge_editions};
use crate::config::ReaderConfig;
use crate::error::{ReaderError, Result};
use crate::model::{AudioList, BookmarkTag, Chapter, ChapterSummary};
use crate::player::AudioClip;
use crate::store::{AudioCache, BookmarkStore, ChapterCache, KeyValueStore};

pub const CHAPTER_COUNT: u32 = 114;

/// Content and persistence behind every surface: cached chapter loading,
/// audio lookup and bookmarks.
pub struct Reader<S> {
    source: S,
    store: Arc<dyn KeyValueStore>,
    chapters: ChapterCache,
    bookmarks: BookmarkStore,
    audio_cache: AudioCache,
    text_edition: String,
    translation_edition: String,
    prefetch_audio: bool,
}

impl<S: ContentSource> Reader<S> {
    pub fn new(
        source: S,
        store: Arc<dyn KeyValueStore>,
        audio_cache: AudioCache,
        config: &ReaderConfig,
    ) -> Self {
        Self {
            source,
            chapters: ChapterCache::new(store.clone(), config.cache_budget),
            bookmarks: BookmarkStore::new(store.clone()),
            store,
            audio_cache,
            text_edition: config.text_edition.clone(),
            translation_edition: config.translation_edition.clone(),
            prefetch_audio: config.prefetch_audio,
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn bookmarks(&self) -> &BookmarkStore {
        &self.bookmarks
    }

    pub fn audio_cache(&self) -> &AudioCache {
        &self.audio_cache
    }

    pub async fn chapter_index(&self) -> Result<Vec<ChapterSummary>> {
        if let Some(index) = self.chapters.load_index() {
            debug!(chapters = index.len(), "chapter index served from cache");
            return Ok(index);
        }
        let index = self.source.fetch_chapter_index().await?;
        self.chapters.store_index(&index);
        Ok(index)
    }

    /// Returns the cached chapter, or fetches the original and translated
    /// editions concurrently, merges them by verse position and caches the
    /// result. Either fetch failing fails the whole open.
    pub async fn open_chapter(&self, number: u32) -> Result<Chapter> {
        if number == 0 || number > CHAPTER_COUNT {
            return Err(ReaderError::ChapterNotFound(number));
        }
        if let Some(chapter) = self.chapters.load(number) {
            debug!(chapter = number, "chapter served from cache");
            return Ok(chapter);
        }
        let (original, translation) = tokio::try_join!(
            self.source.fetch_edition(number, &self.text_edition),
            self.source.fetch_edition(number, &self.translation_edition),
        )?;
        let chapter = merge_editions(original, translation);
        info!(chapter = number, verses = chapter.len(), "chapter fetched");
        self.chapters.store(&chapter);
        Ok(chapter)
    }

    pub async fn audio_list(&self, chapter: u32, reciter: &str) -> Result<AudioList> {
        self.source.fetch_audio_list(chapter, reciter).await
    }

    /// Best-effort copy of the first verse's audio into the audio cache.
    pub async fn warm_audio(&self, list: &AudioList) {
        if !self.prefetch_audio || !self.audio_cache.is_enabled() {
            return;
        }
        let Some(url) = list.first() else {
            return;
        };
        if self.audio_cache.contains(url) {
            return;
        }
        match self.source.fetch_blob(url).await {
            Ok(bytes) => {
                if let Err(err) = self.audio_cache.put(url, &bytes) {
                    debug!(%url, error = %err, "audio prefetch not stored");
                }
            }
            Err(err) => debug!(%url, error = %err, "audio prefetch failed"),
        }
    }

    /// Audio bytes for `url`, from the audio cache when present.
    pub async fn audio_clip(&self, url: &str) -> Result<AudioClip> {
        let bytes = match self.audio_cache.get(url) {
            Some(bytes) => bytes,
            None => self.source.fetch_blob(url).await?,
        };
        Ok(AudioClip {
            url: url.to_string(),
            bytes,
        })
    }

    pub fn add_bookmark(&self, tag: BookmarkTag) -> Result<bool> {
        self.bookmarks.add(tag)
    }

    /// Wipes chapter cache, bookmarks and audio cache.
    pub fn clear_all(&self) -> Result<()> {
        self.store.clear()?;
        self.chapters.forget_all();
        self.audio_cache.clear()?;
        info!("cache and bookmarks cleared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, chapter_key};
    use crate::testing::{FakeSource, ReadOnlyStore};
    use std::sync::atomic::Ordering;

    fn reader_with(store: Arc<dyn KeyValueStore>, config: &ReaderConfig) -> Reader<FakeSource> {
        Reader::new(FakeSource::new(), store, AudioCache::disabled(), config)
    }

    fn reader() -> (Reader<FakeSource>, Arc<dyn KeyValueStore>) {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        (reader_with(store.clone(), &ReaderConfig::default()), store)
    }

    #[tokio::test]
    async fn second_open_is_served_from_cache() {
        let (reader, store) = reader();
        let first = reader.open_chapter(1).await.unwrap();
        assert_eq!(reader.source().editions(), 2);
        assert_eq!(first.len(), 7);
        let positions: Vec<u32> = first.verses.iter().map(|verse| verse.position).collect();
        assert_eq!(positions, (1..=7).collect::<Vec<_>>());
        assert!(store.get("chapter:1:v1").unwrap().is_some());

        let second = reader.open_chapter(1).await.unwrap();
        assert_eq!(reader.source().editions(), 2, "no new edition fetches");
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn merged_verses_pair_original_and_translation() {
        let (reader, _) = reader();
        let chapter = reader.open_chapter(1).await.unwrap();
        assert_eq!(chapter.verses[2].text, "quran-uthmani 1:3");
        assert_eq!(
            chapter.verses[2].translation.as_deref(),
            Some("en.saheeh 1:3")
        );
    }

    #[tokio::test]
    async fn fetch_failure_fails_the_open_and_caches_nothing() {
        let (reader, store) = reader();
        reader.source().fail_editions.store(true, Ordering::SeqCst);
        assert!(reader.open_chapter(2).await.is_err());
        assert!(store.get(&chapter_key(2)).unwrap().is_none());
    }

    #[tokio::test]
    async fn out_of_range_chapter_is_rejected_without_fetching() {
        let (reader, _) = reader();
        assert!(matches!(
            reader.open_chapter(115).await,
            Err(ReaderError::ChapterNotFound(115))
        ));
        assert!(matches!(
            reader.open_chapter(0).await,
            Err(ReaderError::ChapterNotFound(0))
        ));
        assert_eq!(reader.source().editions(), 0);
    }

    #[tokio::test]
    async fn corrupt_cache_entry_is_refetched_and_replaced() {
        let (reader, store) = reader();
        store.set(&chapter_key(1), "not json at all").unwrap();
        let chapter = reader.open_chapter(1).await.unwrap();
        assert_eq!(reader.source().editions(), 2);
        let cached: Chapter =
            serde_json::from_str(&store.get(&chapter_key(1)).unwrap().unwrap()).unwrap();
        assert_eq!(cached, chapter);
    }

    #[tokio::test]
    async fn storage_write_failure_does_not_fail_open() {
        let store: Arc<dyn KeyValueStore> = Arc::new(ReadOnlyStore::default());
        let reader = reader_with(store, &ReaderConfig::default());
        assert_eq!(reader.open_chapter(1).await.unwrap().len(), 7);
        reader.open_chapter(1).await.unwrap();
        assert_eq!(reader.source().editions(), 4, "nothing was cached");
    }

    #[tokio::test]
    async fn chapter_budget_evicts_oldest_open() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let config = ReaderConfig {
            cache_budget: Some(2),
            ..ReaderConfig::default()
        };
        let reader = reader_with(store.clone(), &config);
        for chapter in [1, 2, 3] {
            reader.open_chapter(chapter).await.unwrap();
        }
        assert!(store.get(&chapter_key(1)).unwrap().is_none());
        assert!(store.get(&chapter_key(2)).unwrap().is_some());
        assert!(store.get(&chapter_key(3)).unwrap().is_some());
    }

    #[tokio::test]
    async fn chapter_index_is_cached_after_first_fetch() {
        let (reader, _) = reader();
        let first = reader.chapter_index().await.unwrap();
        reader.source().fail_index.store(true, Ordering::SeqCst);
        let second = reader.chapter_index().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(reader.source().index_requests.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn warm_audio_prefetches_only_first_verse() {
        let dir = tempfile::tempdir().unwrap();
        let reader = Reader::new(
            FakeSource::new(),
            Arc::new(MemoryStore::new()),
            AudioCache::in_dir(dir.path()),
            &ReaderConfig::default(),
        );
        let list = reader.audio_list(1, "ar.alafasy").await.unwrap();
        reader.warm_audio(&list).await;
        reader.warm_audio(&list).await;
        assert_eq!(reader.source().blobs(), 1);
        assert!(reader.audio_cache().contains(list.url(0).unwrap()));
        assert!(!reader.audio_cache().contains(list.url(1).unwrap()));

        let clip = reader.audio_clip(list.url(0).unwrap()).await.unwrap();
        assert_eq!(reader.source().blobs(), 1, "served from audio cache");
        assert_eq!(clip.bytes, list.url(0).unwrap().as_bytes());
    }

    #[tokio::test]
    async fn clear_all_wipes_chapters_and_bookmarks() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let reader = Reader::new(
            FakeSource::new(),
            store.clone(),
            AudioCache::in_dir(dir.path()),
            &ReaderConfig::default(),
        );
        reader.open_chapter(1).await.unwrap();
        reader.add_bookmark(BookmarkTag::new(1, 1)).unwrap();
        let list = reader.audio_list(1, "ar.alafasy").await.unwrap();
        reader.warm_audio(&list).await;

        reader.clear_all().unwrap();
        assert!(store.keys().unwrap().is_empty());
        assert!(reader.bookmarks().list().is_empty());
        assert!(!reader.audio_cache().contains(list.url(0).unwrap()));
        reader.open_chapter(1).await.unwrap();
        assert_eq!(reader.source().editions(), 4);
    }
}
