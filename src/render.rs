//! Pure projections from loaded data into view rows.
//!
//! Every row carries its interaction bindings, filtered or not, so a surface
//! only has to dispatch the [`Action`] of whatever the user activates.

use serde::Serialize;

use crate::model::{BookmarkTag, Chapter, ChapterSummary};
use crate::search::Filter;

pub const EMPTY_BOOKMARKS: &str = "No bookmarks";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "target", rename_all = "snake_case")]
pub enum Action {
    /// Play the verse at this zero-based index of the open chapter.
    Play(usize),
    Bookmark(BookmarkTag),
    OpenChapter(u32),
    /// Open the tagged chapter and move to the tagged verse.
    Navigate(BookmarkTag),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerseRow {
    pub index: usize,
    pub position: u32,
    pub text: String,
    pub translation_line: String,
    pub highlighted: bool,
    pub play: Action,
    pub bookmark: Action,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChapterView {
    pub number: u32,
    pub title: String,
    pub query: Option<String>,
    pub total_verses: usize,
    pub rows: Vec<VerseRow>,
}

pub fn render_chapter(chapter: &Chapter, filter: &Filter, current: Option<usize>) -> ChapterView {
    let rows = chapter
        .verses
        .iter()
        .enumerate()
        .filter(|(_, verse)| filter.matches_verse(verse))
        .map(|(index, verse)| VerseRow {
            index,
            position: verse.position,
            text: verse.text.clone(),
            translation_line: format!("{}. {}", verse.position, verse.translation_text()),
            highlighted: current == Some(index),
            play: Action::Play(index),
            bookmark: Action::Bookmark(BookmarkTag::new(chapter.number, verse.position)),
        })
        .collect();
    ChapterView {
        number: chapter.number,
        title: chapter.title(),
        query: filter.query().map(str::to_string),
        total_verses: chapter.len(),
        rows,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChapterRow {
    pub number: u32,
    pub label: String,
    pub name: String,
    pub meta: String,
    pub visible: bool,
    pub open: Action,
}

/// One row per chapter; the filter only toggles `visible`.
pub fn render_index(chapters: &[ChapterSummary], filter: &Filter) -> Vec<ChapterRow> {
    chapters
        .iter()
        .map(|chapter| ChapterRow {
            number: chapter.number,
            label: format!("{}. {}", chapter.number, chapter.english_name),
            name: chapter.name.clone(),
            meta: format!("{} ayahs", chapter.verse_count),
            visible: filter.matches_chapter(chapter),
            open: Action::OpenChapter(chapter.number),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookmarkEntry {
    pub tag: BookmarkTag,
    pub label: String,
    pub navigate: Action,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookmarkView {
    pub entries: Vec<BookmarkEntry>,
    pub placeholder: Option<&'static str>,
}

pub fn render_bookmarks(tags: &[BookmarkTag]) -> BookmarkView {
    BookmarkView {
        entries: tags
            .iter()
            .map(|tag| BookmarkEntry {
                tag: *tag,
                label: tag.to_string(),
                navigate: Action::Navigate(*tag),
            })
            .collect(),
        placeholder: tags.is_empty().then_some(EMPTY_BOOKMARKS),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Verse;

    fn fatiha() -> Chapter {
        let translations = [
            "In the name of Allah, the Entirely Merciful, the Especially Merciful.",
            "[All] praise is [due] to Allah, Lord of the worlds -",
            "The Entirely Merciful, the Especially Merciful,",
        ];
        Chapter {
            number: 1,
            name: "سُورَةُ ٱلْفَاتِحَةِ".to_string(),
            english_name: "Al-Faatiha".to_string(),
            verses: translations
                .iter()
                .enumerate()
                .map(|(idx, text)| Verse {
                    position: idx as u32 + 1,
                    text: format!("arabic {}", idx + 1),
                    translation: Some(text.to_string()),
                })
                .collect(),
        }
    }

    #[test]
    fn chapter_rows_bind_play_and_bookmark() {
        let view = render_chapter(&fatiha(), &Filter::none(), Some(1));
        assert_eq!(view.title, "1. سُورَةُ ٱلْفَاتِحَةِ — Al-Faatiha");
        assert_eq!(view.rows.len(), 3);
        let row = &view.rows[1];
        assert_eq!(row.play, Action::Play(1));
        assert_eq!(row.bookmark, Action::Bookmark(BookmarkTag::new(1, 2)));
        assert!(row.translation_line.starts_with("2. [All] praise"));
        assert!(row.highlighted);
        assert!(!view.rows[0].highlighted);
    }

    #[test]
    fn filtered_rows_keep_their_bindings() {
        let chapter = fatiha();
        let view = render_chapter(&chapter, &Filter::parse("lord"), None);
        assert_eq!(view.rows.len(), 1);
        assert_eq!(view.total_verses, 3);
        assert_eq!(view.query.as_deref(), Some("lord"));
        let row = &view.rows[0];
        assert_eq!(row.play, Action::Play(1));
        assert_eq!(row.bookmark, Action::Bookmark(BookmarkTag::new(1, 2)));

        let full = render_chapter(&chapter, &Filter::none(), None);
        assert_eq!(full.rows[1], *row);
    }

    #[test]
    fn missing_translation_renders_position_only() {
        let mut chapter = fatiha();
        chapter.verses[0].translation = None;
        let view = render_chapter(&chapter, &Filter::none(), None);
        assert_eq!(view.rows[0].translation_line, "1. ");
    }

    #[test]
    fn index_filter_only_hides_rows() {
        let chapters = vec![
            ChapterSummary {
                number: 1,
                name: "الفاتحة".to_string(),
                english_name: "Al-Faatiha".to_string(),
                english_name_translation: "The Opening".to_string(),
                verse_count: 7,
                revelation_type: "Meccan".to_string(),
            },
            ChapterSummary {
                number: 2,
                name: "البقرة".to_string(),
                english_name: "Al-Baqara".to_string(),
                english_name_translation: "The Cow".to_string(),
                verse_count: 286,
                revelation_type: "Medinan".to_string(),
            },
        ];
        let rows = render_index(&chapters, &Filter::parse("baqara"));
        assert_eq!(rows.len(), 2);
        assert!(!rows[0].visible);
        assert!(rows[1].visible);
        assert_eq!(rows[1].meta, "286 ayahs");
        assert_eq!(rows[1].open, Action::OpenChapter(2));
    }

    #[test]
    fn empty_bookmarks_show_placeholder() {
        let view = render_bookmarks(&[]);
        assert!(view.entries.is_empty());
        assert_eq!(view.placeholder, Some(EMPTY_BOOKMARKS));

        let view = render_bookmarks(&[BookmarkTag::new(1, 1)]);
        assert_eq!(view.placeholder, None);
        assert_eq!(view.entries[0].label, "1:1");
    }
}
