use serde::Serialize;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("unexpected status {status} from {url}")]
    Status { status: u16, url: String },
    #[error("could not decode response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("storage error: {0}")]
    Store(#[from] std::io::Error),
    #[error("chapter {0} does not exist")]
    ChapterNotFound(u32),
    #[error("invalid bookmark tag {0:?}, expected <chapter>:<verse>")]
    InvalidTag(String),
    #[error("audio error: {0}")]
    Audio(String),
}

pub type Result<T, E = ReaderError> = std::result::Result<T, E>;

/// Terminal, user-facing outcome of an action that could not complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "notice", rename_all = "snake_case")]
pub enum Notice {
    IndexUnavailable,
    ChapterUnavailable { chapter: u32 },
    AudioUnavailable { chapter: u32, position: u32 },
    PlaybackBlocked { reason: String },
    EndOfChapter { chapter: u32 },
    NoChapterOpen,
    BookmarkNotSaved { tag: String },
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::IndexUnavailable => write!(f, "Unable to load surah list. Check network."),
            Notice::ChapterUnavailable { chapter } => {
                write!(f, "Failed to load surah {chapter}. Possibly offline.")
            }
            Notice::AudioUnavailable { chapter, position } => write!(
                f,
                "Audio not available for this reciter/surah ({chapter}:{position})."
            ),
            Notice::PlaybackBlocked { reason } => write!(f, "Audio playback blocked: {reason}"),
            Notice::EndOfChapter { chapter } => write!(f, "End of surah {chapter}"),
            Notice::NoChapterOpen => write!(f, "Open a surah first."),
            Notice::BookmarkNotSaved { tag } => write!(f, "Could not save bookmark {tag}."),
        }
    }
}

impl std::error::Error for Notice {}
