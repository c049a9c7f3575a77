//! Prompt text for the recognition and translation backends.
//!
//! Every prompt lives here so a wording change touches one file and the unit
//! tests can inspect prompts without a backend. Prompt assembly is kept apart
//! from correction matching: [`translation_system_prompt`] takes plain
//! [`PromptExample`] pairs and knows nothing about how they were chosen.

use crate::correction::PromptExample;
use std::fmt::Write as _;

// ── Recognition ──────────────────────────────────────────────────────────────

/// Instruction for grounding OCR models (DeepSeek-OCR). Their output carries
/// layout markup that [`crate::pipeline::cleanup`] strips.
pub const GROUNDING_OCR_PROMPT: &str = "<|grounding|>Convert the document to markdown.";

/// Instruction for general-purpose vision models.
pub const GENERIC_OCR_PROMPT: &str = "Please extract all text from this image and format it as Markdown. \
Preserve the structure and formatting as much as possible. \
Output only the extracted content, without commentary and without wrapping it in code fences.";

/// Whether `model` is a grounding OCR model.
pub fn is_grounding_model(model: &str) -> bool {
    let m = model.to_ascii_lowercase();
    m.contains("deepseek") && m.contains("ocr")
}

/// Recognition instruction for `model`.
pub fn recognition_prompt(model: &str) -> &'static str {
    if is_grounding_model(model) {
        GROUNDING_OCR_PROMPT
    } else {
        GENERIC_OCR_PROMPT
    }
}

// ── Translation ──────────────────────────────────────────────────────────────

/// Most examples rendered into one prompt, whatever the token budget allows.
pub const MAX_PROMPT_EXAMPLES: usize = 10;

/// Display name of a language code; unknown codes are used verbatim.
pub fn language_name(code: &str) -> &str {
    match code {
        "en" => "English",
        "zh" => "Chinese",
        "de" => "German",
        "ru" => "Russian",
        other => other,
    }
}

/// System prompt for translating from `source` to `target`, with up to
/// `max_examples` prior corrections the model must stay consistent with.
pub fn translation_system_prompt(
    source: &str,
    target: &str,
    examples: &[PromptExample],
    max_examples: usize,
) -> String {
    let mut prompt = format!(
        "You are a professional translator. Translate the following {} text to {}.\n\n\
         Requirements:\n\
         1. Provide accurate and natural translations\n\
         2. Preserve the original meaning and tone\n\
         3. Use appropriate terminology for the context\n\
         4. Only output the translation, no explanations\n",
        language_name(source),
        language_name(target),
    );

    let shown = &examples[..examples.len().min(max_examples)];
    if !shown.is_empty() {
        prompt.push_str("\n\nPrevious corrections to follow:\n");
        for (i, ex) in shown.iter().enumerate() {
            // Writing to a String cannot fail.
            let _ = writeln!(prompt, "{}. \"{}\" → \"{}\"", i + 1, ex.source, ex.translation);
        }
        prompt.push_str("\nPlease maintain consistency with these corrections.\n");
    }
    prompt
}

/// Single-turn request body text for dialects without a system role.
pub fn single_turn_prompt(system_prompt: &str, text: &str) -> String {
    format!("{system_prompt}\n\nText to translate:\n{text}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deepseek_models_get_grounding_prompt() {
        assert_eq!(recognition_prompt("deepseek-ai/DeepSeek-OCR"), GROUNDING_OCR_PROMPT);
        assert_eq!(recognition_prompt("gpt-4.1-nano"), GENERIC_OCR_PROMPT);
        assert!(!is_grounding_model("deepseek-chat"));
    }

    #[test]
    fn prompt_names_languages_and_keeps_unknown_codes() {
        let p = translation_system_prompt("zh", "fr", &[], MAX_PROMPT_EXAMPLES);
        assert!(p.contains("Translate the following Chinese text to fr."));
        assert!(p.contains("4. Only output the translation"));
        assert!(!p.contains("Previous corrections"));
    }

    #[test]
    fn examples_are_numbered_and_capped() {
        let examples: Vec<_> = (0..12)
            .map(|i| PromptExample {
                source: format!("s{i}"),
                translation: format!("t{i}"),
            })
            .collect();
        let p = translation_system_prompt("en", "de", &examples, MAX_PROMPT_EXAMPLES);
        assert!(p.contains("1. \"s0\" → \"t0\""));
        assert!(p.contains("10. \"s9\" → \"t9\""));
        assert!(!p.contains("s10"));
        assert!(p.ends_with("Please maintain consistency with these corrections.\n"));
    }

    #[test]
    fn single_turn_layout() {
        assert_eq!(single_turn_prompt("P", "Hallo"), "P\n\nText to translate:\nHallo");
    }
}
