//! Deterministic cleanup of recognized page text.
//!
//! Vision models return Markdown with small, predictable defects: an outer
//! code fence, CRLF line endings, zero-width characters, runs of blank lines.
//! Grounding OCR models (DeepSeek-OCR) additionally interleave layout markup
//! with the text:
//!
//! ```text
//! <|ref|>title<|/ref|><|det|>[[12, 40, 300, 80]]<|/det|>
//! title
//! Annual Report
//! ```
//!
//! [`clean_recognized_text`] strips all of it so the segmenter sees prose only.
//!
//! ## Rule order
//!
//! Line endings are normalised before any line-anchored rule runs, and the
//! blank-line collapse runs last because every removal rule can leave empty
//! lines behind.

use once_cell::sync::Lazy;
use regex::Regex;

/// Clean raw recognition output. `grounding` enables the layout-markup rules.
pub fn clean_recognized_text(raw: &str, grounding: bool) -> String {
    let s = normalise_line_endings(raw);
    let s = strip_outer_fence(&s);
    let s = if grounding {
        let s = strip_ref_det_pairs(&s);
        let s = strip_coordinates(&s);
        let s = strip_special_tokens(&s);
        strip_layout_labels(&s)
    } else {
        s
    };
    let s = trim_line_ends(&s);
    let s = remove_invisible_chars(&s);
    collapse_blank_lines(&s).trim().to_string()
}

// ── Generic rules ────────────────────────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

static RE_OUTER_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:markdown|md|text)?\n(.*)\n```$").unwrap());

fn strip_outer_fence(input: &str) -> String {
    let trimmed = input.trim();
    match RE_OUTER_FENCE.captures(trimmed) {
        Some(caps) => caps[1].to_string(),
        None => input.to_string(),
    }
}

fn trim_line_ends(input: &str) -> String {
    input.lines().map(str::trim_end).collect::<Vec<_>>().join("\n")
}

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        ['\u{200B}', '\u{200C}', '\u{200D}', '\u{2060}', '\u{FEFF}', '\u{00AD}'],
        "",
    )
}

static RE_BLANK_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_RUN.replace_all(input, "\n\n").into_owned()
}

// ── Grounding markup ─────────────────────────────────────────────────────────

static RE_REF_DET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<\|ref\|>.*?</?\|/?ref\|><\|det\|>.*?</?\|/?det\|>[ \t]*\n?").unwrap()
});

static RE_COORDINATES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[\[\d+,\s*\d+,\s*\d+,\s*\d+\]\]").unwrap());

static RE_SPECIAL_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"<\|[^|]+\|>").unwrap());

static RE_LAYOUT_LABEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^(?:title|sub_title|text|image|caption|header|footer|table|figure)[ \t]*\n")
        .unwrap()
});

fn strip_ref_det_pairs(input: &str) -> String {
    RE_REF_DET.replace_all(input, "").into_owned()
}

fn strip_coordinates(input: &str) -> String {
    RE_COORDINATES.replace_all(input, "").into_owned()
}

fn strip_special_tokens(input: &str) -> String {
    RE_SPECIAL_TOKEN.replace_all(input, "").into_owned()
}

fn strip_layout_labels(input: &str) -> String {
    RE_LAYOUT_LABEL.replace_all(input, "").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removes_grounding_markup() {
        let raw = "<|ref|>title<|/ref|><|det|>[[12, 40, 300, 80]]<|/det|>\ntitle\nAnnual Report\n\n\n\n<|ref|>text<|/ref|><|det|>[[1, 2, 3, 4]]<|/det|>\ntext\nRevenue grew.";
        assert_eq!(clean_recognized_text(raw, true), "Annual Report\n\nRevenue grew.");
    }

    #[test]
    fn stray_tokens_and_boxes_are_removed() {
        let raw = "Total<|grounding|> [[10, 20, 30, 40]]sum";
        assert_eq!(clean_recognized_text(raw, true), "Total sum");
    }

    #[test]
    fn generic_models_keep_label_words() {
        let raw = "title\nA real line";
        assert_eq!(clean_recognized_text(raw, false), "title\nA real line");
        assert_eq!(clean_recognized_text(raw, true), "A real line");
    }

    #[test]
    fn strips_fence_and_normalises_whitespace() {
        let raw = "```markdown\r\n# Heading   \r\nBody\u{200B} text\r\n```";
        assert_eq!(clean_recognized_text(raw, false), "# Heading\nBody text");
    }

    #[test]
    fn collapses_blank_runs_to_one_blank_line() {
        assert_eq!(collapse_blank_lines("a\n\n\n\n\nb"), "a\n\nb");
        assert_eq!(collapse_blank_lines("a\n\nb"), "a\n\nb");
    }
}
