use crate::model::{ChapterSummary, Verse};

/// Case-insensitive substring filter. An empty query matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    needle: Option<String>,
}

impl Filter {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            Self::none()
        } else {
            Self {
                needle: Some(trimmed.to_lowercase()),
            }
        }
    }

    pub fn none() -> Self {
        Self { needle: None }
    }

    pub fn is_active(&self) -> bool {
        self.needle.is_some()
    }

    pub fn query(&self) -> Option<&str> {
        self.needle.as_deref()
    }

    fn contains(&self, haystack: &str) -> bool {
        match &self.needle {
            Some(needle) => haystack.to_lowercase().contains(needle.as_str()),
            None => true,
        }
    }

    pub fn matches_verse(&self, verse: &Verse) -> bool {
        !self.is_active()
            || self.contains(&verse.text)
            || verse
                .translation
                .as_deref()
                .is_some_and(|text| self.contains(text))
    }

    pub fn matches_chapter(&self, chapter: &ChapterSummary) -> bool {
        !self.is_active() || self.contains(&chapter.english_name) || self.contains(&chapter.name)
    }
}

/// Zero-based indices of matching verses, in chapter order.
pub fn matching_verses(verses: &[Verse], filter: &Filter) -> Vec<usize> {
    verses
        .iter()
        .enumerate()
        .filter(|(_, verse)| filter.matches_verse(verse))
        .map(|(index, _)| index)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verse(position: u32, text: &str, translation: Option<&str>) -> Verse {
        Verse {
            position,
            text: text.to_string(),
            translation: translation.map(str::to_string),
        }
    }

    fn summary(name: &str, english_name: &str) -> ChapterSummary {
        ChapterSummary {
            number: 1,
            name: name.to_string(),
            english_name: english_name.to_string(),
            english_name_translation: String::new(),
            verse_count: 7,
            revelation_type: String::new(),
        }
    }

    #[test]
    fn blank_query_disables_filter() {
        assert!(!Filter::parse("   ").is_active());
        assert_eq!(Filter::parse("  Mercy ").query(), Some("mercy"));
    }

    #[test]
    fn verse_match_is_case_insensitive_on_translation() {
        let verses = vec![
            verse(1, "بِسْمِ ٱللَّهِ", Some("In the name of Allah, the Most Merciful")),
            verse(2, "ٱلْحَمْدُ لِلَّهِ", Some("All praise is due to Allah")),
            verse(3, "ٱلرَّحْمَٰنِ", None),
        ];
        assert_eq!(matching_verses(&verses, &Filter::parse("MERCIFUL")), vec![0]);
        assert_eq!(matching_verses(&verses, &Filter::parse("allah")), vec![0, 1]);
        assert_eq!(matching_verses(&verses, &Filter::none()), vec![0, 1, 2]);
    }

    #[test]
    fn verse_match_checks_original_text() {
        let verses = vec![verse(1, "ٱلرَّحْمَٰنِ ٱلرَّحِيمِ", None)];
        assert_eq!(matching_verses(&verses, &Filter::parse("ٱلرَّحِيمِ")), vec![0]);
    }

    #[test]
    fn chapter_match_uses_both_names() {
        let chapter = summary("سُورَةُ البَقَرَةِ", "Al-Baqara");
        assert!(Filter::parse("baq").matches_chapter(&chapter));
        assert!(Filter::parse("البَقَرَةِ").matches_chapter(&chapter));
        assert!(!Filter::parse("imran").matches_chapter(&chapter));
    }
}
