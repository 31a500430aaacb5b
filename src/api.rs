//! Client for the Al-Quran Cloud REST API.
//!
//! Every endpoint answers with a JSON envelope whose `data` field carries the
//! payload. Failures are not retried.

use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::future::Future;
use tracing::{debug, warn};

use crate::error::{ReaderError, Result};
use crate::model::{AudioList, Chapter, ChapterSummary, Verse};

pub const DEFAULT_API_BASE: &str = "https://api.alquran.cloud/v1";
pub const DEFAULT_TEXT_EDITION: &str = "quran-uthmani";
pub const DEFAULT_TRANSLATION_EDITION: &str = "en.saheeh";
pub const DEFAULT_USER_AGENT: &str = concat!("ogechina-rs/", env!("CARGO_PKG_VERSION"));

/// Read-only access to chapter content. Implemented over HTTP by
/// [`CloudClient`] and by in-memory fakes in tests.
pub trait ContentSource: Send + Sync {
    fn fetch_chapter_index(&self) -> impl Future<Output = Result<Vec<ChapterSummary>>> + Send;

    /// One chapter in a single text edition (original script or translation).
    fn fetch_edition(
        &self,
        chapter: u32,
        edition: &str,
    ) -> impl Future<Output = Result<EditionChapter>> + Send;

    fn fetch_audio_list(
        &self,
        chapter: u32,
        reciter: &str,
    ) -> impl Future<Output = Result<AudioList>> + Send;

    fn fetch_blob(&self, url: &str) -> impl Future<Output = Result<Vec<u8>>> + Send;
}

/// A chapter as delivered by one edition endpoint, before merging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditionChapter {
    pub number: u32,
    pub name: String,
    pub english_name: String,
    pub verses: Vec<EditionVerse>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditionVerse {
    pub position: u32,
    pub text: String,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SurahPayload {
    number: u32,
    name: String,
    english_name: String,
    #[serde(default)]
    english_name_translation: String,
    number_of_ayahs: u32,
    #[serde(default)]
    revelation_type: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EditionPayload {
    number: u32,
    name: String,
    english_name: String,
    ayahs: Vec<AyahPayload>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AyahPayload {
    number_in_surah: u32,
    #[serde(default)]
    text: String,
    #[serde(default)]
    audio: Option<String>,
}

pub(crate) fn decode_envelope<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    let envelope: Envelope<T> = serde_json::from_slice(body)?;
    Ok(envelope.data)
}

pub(crate) fn decode_chapter_index(body: &[u8]) -> Result<Vec<ChapterSummary>> {
    let rows: Vec<SurahPayload> = decode_envelope(body)?;
    Ok(rows
        .into_iter()
        .map(|row| ChapterSummary {
            number: row.number,
            name: row.name,
            english_name: row.english_name,
            english_name_translation: row.english_name_translation,
            verse_count: row.number_of_ayahs,
            revelation_type: row.revelation_type,
        })
        .collect())
}

pub(crate) fn decode_edition(body: &[u8]) -> Result<EditionChapter> {
    let payload: EditionPayload = decode_envelope(body)?;
    Ok(EditionChapter {
        number: payload.number,
        name: payload.name,
        english_name: payload.english_name,
        verses: payload
            .ayahs
            .into_iter()
            .map(|ayah| EditionVerse {
                position: ayah.number_in_surah,
                text: ayah.text,
            })
            .collect(),
    })
}

pub(crate) fn decode_audio_list(body: &[u8], chapter: u32, reciter: &str) -> Result<AudioList> {
    let payload: EditionPayload = decode_envelope(body)?;
    // Slots are bounded by the number of verses actually delivered.
    let mut urls = vec![None; payload.ayahs.len()];
    for ayah in payload.ayahs {
        let slot = (ayah.number_in_surah as usize).checked_sub(1);
        match slot.and_then(|slot| urls.get_mut(slot)) {
            Some(entry) => *entry = ayah.audio.filter(|url| !url.is_empty()),
            None => debug!(
                chapter,
                position = ayah.number_in_surah,
                "audio entry outside chapter; skipped"
            ),
        }
    }
    Ok(AudioList {
        chapter,
        reciter: reciter.to_string(),
        urls,
    })
}

/// Joins the original and translated editions by verse position.
///
/// Original verses with no translated counterpart keep `translation: None`;
/// translated verses with no original are dropped.
pub fn merge_editions(original: EditionChapter, translation: EditionChapter) -> Chapter {
    let mut translated: HashMap<u32, String> = translation
        .verses
        .into_iter()
        .map(|verse| (verse.position, verse.text))
        .collect();

    let verses: Vec<Verse> = original
        .verses
        .into_iter()
        .map(|verse| {
            let translation = translated.remove(&verse.position);
            if translation.is_none() {
                warn!(
                    chapter = original.number,
                    position = verse.position,
                    "translation missing for verse"
                );
            }
            Verse {
                position: verse.position,
                text: verse.text,
                translation,
            }
        })
        .collect();

    if !translated.is_empty() {
        let mut orphans: Vec<u32> = translated.into_keys().collect();
        orphans.sort_unstable();
        warn!(
            chapter = original.number,
            ?orphans,
            "translation verses without an original counterpart were dropped"
        );
    }

    Chapter {
        number: original.number,
        name: original.name,
        english_name: original.english_name,
        verses,
    }
}

#[derive(Debug, Clone)]
pub struct CloudClient {
    http: reqwest::Client,
    base: String,
}

impl CloudClient {
    pub fn new(base: impl Into<String>, user_agent: &str) -> Result<Self> {
        let http = reqwest::Client::builder().user_agent(user_agent).build()?;
        let base = base.into().trim_end_matches('/').to_string();
        Ok(Self { http, base })
    }

    async fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        debug!(%url, "GET");
        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ReaderError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response.bytes().await?.to_vec())
    }

    async fn get_api(&self, path: &str) -> Result<Vec<u8>> {
        let url = format!("{}/{}", self.base, path);
        self.get_bytes(&url).await
    }
}

impl ContentSource for CloudClient {
    async fn fetch_chapter_index(&self) -> Result<Vec<ChapterSummary>> {
        let body = self.get_api("surah").await?;
        decode_chapter_index(&body)
    }

    async fn fetch_edition(&self, chapter: u32, edition: &str) -> Result<EditionChapter> {
        let body = self.get_api(&format!("surah/{chapter}/{edition}")).await?;
        decode_edition(&body)
    }

    async fn fetch_audio_list(&self, chapter: u32, reciter: &str) -> Result<AudioList> {
        let body = self.get_api(&format!("surah/{chapter}/{reciter}")).await?;
        decode_audio_list(&body, chapter, reciter)
    }

    async fn fetch_blob(&self, url: &str) -> Result<Vec<u8>> {
        self.get_bytes(url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INDEX_BODY: &str = r#"{
        "code": 200,
        "status": "OK",
        "data": [
            {"number": 1, "name": "سُورَةُ ٱلْفَاتِحَةِ", "englishName": "Al-Faatiha",
             "englishNameTranslation": "The Opening", "numberOfAyahs": 7, "revelationType": "Meccan"},
            {"number": 2, "name": "سُورَةُ البَقَرَةِ", "englishName": "Al-Baqara",
             "englishNameTranslation": "The Cow", "numberOfAyahs": 286, "revelationType": "Medinan"}
        ]
    }"#;

    fn edition(positions: &[u32], prefix: &str) -> EditionChapter {
        EditionChapter {
            number: 1,
            name: "الفاتحة".to_string(),
            english_name: "Al-Faatiha".to_string(),
            verses: positions
                .iter()
                .map(|&position| EditionVerse {
                    position,
                    text: format!("{prefix}{position}"),
                })
                .collect(),
        }
    }

    #[test]
    fn decodes_chapter_index_envelope() {
        let rows = decode_chapter_index(INDEX_BODY.as_bytes()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].english_name, "Al-Faatiha");
        assert_eq!(rows[0].verse_count, 7);
        assert_eq!(rows[1].revelation_type, "Medinan");
    }

    #[test]
    fn undecodable_body_is_a_decode_error() {
        let err = decode_chapter_index(b"<html>down</html>").unwrap_err();
        assert!(matches!(err, ReaderError::Decode(_)));
    }

    #[test]
    fn decodes_edition_verses_by_number_in_surah() {
        let body = r#"{"data": {"number": 112, "name": "الإخلاص", "englishName": "Al-Ikhlaas",
            "ayahs": [{"number": 6222, "numberInSurah": 1, "text": "قل"},
                      {"number": 6223, "numberInSurah": 2, "text": "الله"}]}}"#;
        let chapter = decode_edition(body.as_bytes()).unwrap();
        assert_eq!(chapter.number, 112);
        assert_eq!(chapter.verses[1].position, 2);
        assert_eq!(chapter.verses[1].text, "الله");
    }

    #[test]
    fn audio_list_slots_follow_verse_positions() {
        let body = r#"{"data": {"number": 1, "name": "x", "englishName": "x",
            "ayahs": [{"numberInSurah": 2, "audio": "https://cdn/2.mp3"},
                      {"numberInSurah": 1, "audio": "https://cdn/1.mp3"},
                      {"numberInSurah": 3}]}}"#;
        let list = decode_audio_list(body.as_bytes(), 1, "ar.alafasy").unwrap();
        assert!(list.is_for(1, "ar.alafasy"));
        assert_eq!(list.url(0), Some("https://cdn/1.mp3"));
        assert_eq!(list.url(1), Some("https://cdn/2.mp3"));
        assert_eq!(list.url(2), None);
    }

    #[test]
    fn audio_list_ignores_out_of_range_positions() {
        let body = r#"{"data": {"number": 1, "name": "x", "englishName": "x",
            "ayahs": [{"numberInSurah": 1, "audio": "https://cdn/1.mp3"},
                      {"numberInSurah": 4000000000, "audio": "https://cdn/huge.mp3"},
                      {"numberInSurah": 0, "audio": "https://cdn/0.mp3"}]}}"#;
        let list = decode_audio_list(body.as_bytes(), 1, "ar.alafasy").unwrap();
        assert_eq!(list.urls.len(), 3);
        assert_eq!(list.url(0), Some("https://cdn/1.mp3"));
        assert!(list.urls[1..].iter().all(Option::is_none));
    }

    #[test]
    fn merge_aligns_by_position_not_index() {
        let original = edition(&[1, 2, 3, 4], "ar");
        let translation = edition(&[1, 2, 4], "en");
        let chapter = merge_editions(original, translation);
        assert_eq!(chapter.len(), 4);
        assert_eq!(chapter.verses[1].translation.as_deref(), Some("en2"));
        assert_eq!(chapter.verses[2].translation, None);
        assert_eq!(chapter.verses[3].translation.as_deref(), Some("en4"));
    }

    #[test]
    fn merge_drops_orphan_translations() {
        let chapter = merge_editions(edition(&[1, 2], "ar"), edition(&[1, 2, 3], "en"));
        assert_eq!(chapter.len(), 2);
        assert!(chapter.verses.iter().all(|verse| verse.translation.is_some()));
    }
}
