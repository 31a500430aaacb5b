//! Quran reader client for the Al-Quran Cloud API: chapter index,
//! bilingual verses, per-verse recitation playback, bookmarks and an
//! offline cache.

pub mod api;
#[cfg(feature = "audio")]
pub mod audio;
pub mod config;
pub mod error;
pub mod model;
pub mod player;
pub mod reader;
pub mod render;
pub mod search;
pub mod session;
pub mod store;
#[cfg(test)]
mod testing;
#[cfg(feature = "web")]
pub mod web;

pub use api::{CloudClient, ContentSource};
pub use config::ReaderConfig;
pub use error::{Notice, ReaderError, Result};
pub use model::{AudioList, BookmarkTag, Chapter, ChapterSummary, Reciter, Verse};
pub use player::{AudioOutput, PlayState, Player, SilentOutput};
pub use reader::Reader;
pub use search::Filter;
pub use session::{Command, Event, Session};
pub use store::{AudioCache, FileStore, KeyValueStore, MemoryStore};
