//! Sentence segmentation: raw text → ordered translation units.
//!
//! Three pure functions, no I/O:
//!
//! - [`split_sentences`] cuts text into paragraphs on blank lines, keeps short
//!   single-line paragraphs (titles, headings) whole, and splits the rest on a
//!   language-specific sentence boundary.
//! - [`detect_language`] guesses the language from code-point statistics.
//! - [`merge_cross_boundary`] glues a sentence that runs across a page break
//!   back together before splitting, remembering which pages contributed.
//!
//! ## Boundary rules
//!
//! Latin and Cyrillic scripts split after `.`, `!` or `?` followed by
//! whitespace and an uppercase letter of the language's alphabet, so
//! abbreviations before a lowercase word ("e.g. this") stay intact. Chinese
//! has no inter-sentence whitespace and splits right after each run of
//! `。！？`; the terminators stay attached to their sentence.
//!
//! The `regex` crate has no look-around, so the upper-case look-ahead is a
//! character test on the text following each candidate match.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Paragraphs shorter than this (in characters) may be treated as titles.
const TITLE_MAX_CHARS: usize = 100;

const TERMINATORS: &[char] = &['.', '!', '?', '。', '！', '？'];

// ── Language ─────────────────────────────────────────────────────────────────

/// Languages with dedicated segmentation rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    En,
    De,
    Ru,
    Zh,
}

impl Language {
    /// Map a language code to its rule set. Unknown codes use English rules.
    pub fn from_code(code: &str) -> Self {
        match code.trim().to_ascii_lowercase().as_str() {
            "de" => Language::De,
            "ru" => Language::Ru,
            "zh" => Language::Zh,
            _ => Language::En,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Language::En => "en",
            Language::De => "de",
            Language::Ru => "ru",
            Language::Zh => "zh",
        }
    }

    /// Whether `c` may begin a new sentence in this language.
    fn is_sentence_start(self, c: char) -> bool {
        match self {
            Language::En => c.is_ascii_uppercase(),
            Language::De => c.is_ascii_uppercase() || matches!(c, 'Ä' | 'Ö' | 'Ü' | 'ẞ'),
            Language::Ru => matches!(c, 'А'..='Я' | 'Ё'),
            Language::Zh => true,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

// ── Splitting ────────────────────────────────────────────────────────────────

static RE_PARAGRAPH_BREAK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n\n+").unwrap());
static RE_LATIN_BOUNDARY: Lazy<Regex> = Lazy::new(|| Regex::new(r"[.!?]\s+").unwrap());
static RE_CJK_TERMINATORS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[。！？]+").unwrap());

/// Split `text` into sentence units using the rules for `language`.
///
/// Empty units are dropped and order is preserved.
pub fn split_sentences(text: &str, language: Language) -> Vec<String> {
    let normalised = text.replace("\r\n", "\n");
    let mut sentences = Vec::new();

    for paragraph in RE_PARAGRAPH_BREAK.split(&normalised) {
        let paragraph = paragraph.trim();
        if paragraph.is_empty() {
            continue;
        }

        if is_title(paragraph) {
            sentences.push(paragraph.to_string());
            continue;
        }

        let pieces = match language {
            Language::Zh => split_cjk(paragraph),
            latin => split_latin(paragraph, latin),
        };
        sentences.extend(
            pieces
                .into_iter()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        );
    }

    sentences
}

/// Short, single-line, and not ending in a terminator.
fn is_title(paragraph: &str) -> bool {
    !paragraph.contains('\n')
        && paragraph.chars().count() < TITLE_MAX_CHARS
        && !ends_with_terminator(paragraph)
}

fn ends_with_terminator(text: &str) -> bool {
    text.trim_end()
        .chars()
        .next_back()
        .is_some_and(|c| TERMINATORS.contains(&c))
}

fn split_latin(paragraph: &str, language: Language) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut start = 0;

    for m in RE_LATIN_BOUNDARY.find_iter(paragraph) {
        let next = paragraph[m.end()..].chars().next();
        if next.is_some_and(|c| language.is_sentence_start(c)) {
            // The terminator is a single ASCII byte.
            pieces.push(&paragraph[start..m.start() + 1]);
            start = m.end();
        }
    }
    pieces.push(&paragraph[start..]);
    pieces
}

fn split_cjk(paragraph: &str) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut start = 0;

    for m in RE_CJK_TERMINATORS.find_iter(paragraph) {
        pieces.push(&paragraph[start..m.end()]);
        start = m.end();
    }
    pieces.push(&paragraph[start..]);
    pieces
}

// ── Language detection ───────────────────────────────────────────────────────

/// Guess the language of `text` from the share of CJK, Cyrillic and German
/// specific characters. Empty text is English.
pub fn detect_language(text: &str) -> Language {
    let mut total = 0usize;
    let mut cjk = 0usize;
    let mut cyrillic = 0usize;
    let mut german = 0usize;

    for c in text.chars() {
        total += 1;
        match c {
            '\u{4e00}'..='\u{9fff}' => cjk += 1,
            '\u{0400}'..='\u{04ff}' => cyrillic += 1,
            'ä' | 'ö' | 'ü' | 'ß' | 'Ä' | 'Ö' | 'Ü' | 'ẞ' => german += 1,
            _ => {}
        }
    }

    if total == 0 {
        return Language::En;
    }

    let share = |n: usize| n as f64 / total as f64;
    if share(cjk) > 0.3 {
        Language::Zh
    } else if share(cyrillic) > 0.3 {
        Language::Ru
    } else if share(german) > 0.05 {
        Language::De
    } else {
        Language::En
    }
}

// ── Cross-page merge ─────────────────────────────────────────────────────────

/// Text of one page, as produced by recognition or document decomposition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageText {
    /// 1-based page number.
    pub page_number: usize,
    pub text: String,
}

impl PageText {
    pub fn new(page_number: usize, text: impl Into<String>) -> Self {
        Self {
            page_number,
            text: text.into(),
        }
    }
}

/// A run of text with the pages it was taken from, in merge order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub text: String,
    pub page_numbers: Vec<usize>,
}

/// Join page texts whose running segment has not reached a sentence
/// terminator at the page break.
///
/// Pages with blank text are skipped; every other page contributes to exactly
/// one segment.
pub fn merge_cross_boundary(pages: &[PageText]) -> Vec<Segment> {
    let mut segments: Vec<Segment> = Vec::new();
    let mut current: Option<Segment> = None;

    for page in pages {
        let text = page.text.trim();
        if text.is_empty() {
            continue;
        }

        match current.as_mut() {
            Some(seg) if !ends_with_terminator(&seg.text) => {
                seg.text.push(' ');
                seg.text.push_str(text);
                seg.page_numbers.push(page.page_number);
            }
            _ => {
                if let Some(done) = current.take() {
                    segments.push(done);
                }
                current = Some(Segment {
                    text: text.to_string(),
                    page_numbers: vec![page.page_number],
                });
            }
        }
    }

    segments.extend(current);
    segments
}

/// Merge pages across boundaries, then split every segment into sentences.
/// Each sentence inherits the page numbers of the segment it came from.
pub fn segment_pages(pages: &[PageText], language: Language) -> Vec<Segment> {
    merge_cross_boundary(pages)
        .into_iter()
        .flat_map(|seg| {
            split_sentences(&seg.text, language)
                .into_iter()
                .map(move |text| Segment {
                    text,
                    page_numbers: seg.page_numbers.clone(),
                })
        })
        .collect()
}
