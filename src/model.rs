use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::ReaderError;

/// Index entry for one chapter as listed by the content API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChapterSummary {
    pub number: u32,
    pub name: String,
    pub english_name: String,
    #[serde(default)]
    pub english_name_translation: String,
    pub verse_count: u32,
    #[serde(default)]
    pub revelation_type: String,
}

/// A fully merged chapter. Written to the cache whole and never patched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chapter {
    pub number: u32,
    pub name: String,
    pub english_name: String,
    pub verses: Vec<Verse>,
}

impl Chapter {
    pub fn len(&self) -> usize {
        self.verses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.verses.is_empty()
    }

    /// Zero-based index of the verse at `position`, if present.
    pub fn index_of(&self, position: u32) -> Option<usize> {
        self.verses.iter().position(|verse| verse.position == position)
    }

    pub fn title(&self) -> String {
        format!("{}. {} — {}", self.number, self.name, self.english_name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Verse {
    /// 1-based position within the chapter.
    pub position: u32,
    pub text: String,
    /// `None` when the translation edition had no verse at this position.
    pub translation: Option<String>,
}

impl Verse {
    pub fn translation_text(&self) -> &str {
        self.translation.as_deref().unwrap_or("")
    }
}

/// Per-verse audio URLs for one (chapter, reciter) pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AudioList {
    pub chapter: u32,
    pub reciter: String,
    pub urls: Vec<Option<String>>,
}

impl AudioList {
    pub fn is_for(&self, chapter: u32, reciter: &str) -> bool {
        self.chapter == chapter && self.reciter == reciter
    }

    pub fn url(&self, index: usize) -> Option<&str> {
        self.urls.get(index).and_then(|url| url.as_deref())
    }

    pub fn first(&self) -> Option<&str> {
        self.url(0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Reciter {
    pub id: String,
    pub name: String,
}

impl Reciter {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

pub fn default_reciters() -> Vec<Reciter> {
    vec![
        Reciter::new("ar.alafasy", "Mishary Alafasy"),
        Reciter::new("ar.abdulbasitmurattal", "Abdul Basit (Murattal)"),
        Reciter::new("ar.minshawi", "Mohamed Minshawi"),
        Reciter::new("ar.husary", "Mahmoud Al-Husary"),
        Reciter::new("ar.sudais", "Abdurrahman As-Sudais"),
    ]
}

/// `"<chapter>:<position>"` key identifying a saved verse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BookmarkTag {
    pub chapter: u32,
    pub position: u32,
}

impl BookmarkTag {
    pub fn new(chapter: u32, position: u32) -> Self {
        Self { chapter, position }
    }
}

impl fmt::Display for BookmarkTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.chapter, self.position)
    }
}

impl FromStr for BookmarkTag {
    type Err = ReaderError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || ReaderError::InvalidTag(value.to_string());
        let (chapter, position) = value.trim().split_once(':').ok_or_else(invalid)?;
        let chapter = chapter.parse::<u32>().map_err(|_| invalid())?;
        let position = position.parse::<u32>().map_err(|_| invalid())?;
        if chapter == 0 || position == 0 {
            return Err(invalid());
        }
        Ok(Self { chapter, position })
    }
}

impl Serialize for BookmarkTag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for BookmarkTag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
