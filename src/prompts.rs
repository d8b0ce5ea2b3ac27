//! System prompts and page-boundary markers for VLM text extraction.
//!
//! Callers can override the default via
//! [`crate::config::PipelineConfig::system_prompt`]; the multi-page addendum
//! is appended regardless, because the page-boundary marker is part of the
//! output contract rather than a style preference.

/// Default system prompt for extracting the text of one or more page images.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are a meticulous transcription engine. Extract the complete text of the page image(s) you are given.

Follow these rules precisely:

1. TEXT PRESERVATION
   - Transcribe ALL visible text exactly as written, in natural reading order
   - Keep the original language; do not translate or summarise
   - Preserve paragraph breaks and list structure with plain line breaks

2. TABLES AND FIGURES
   - Transcribe table cells row by row, separating cells with " | "
   - For figures, transcribe any labels or captions; do not describe the image

3. WHAT TO IGNORE
   - Page numbers, running headers and footers
   - Decorative elements that carry no text

4. OUTPUT FORMAT
   - Output ONLY the extracted text
   - Do NOT wrap the output in code fences
   - Do NOT add commentary, explanations or apologies"#;

/// Appended to the system prompt whenever a request carries more than one page.
pub const MULTI_PAGE_SUFFIX: &str = r#"

5. PAGE BOUNDARIES
   The images are consecutive pages of the same document, in order.
   Before the text of EACH page write a line of the form
   === PAGE <number> ===
   using the page numbers listed in the user message."#;

/// Prefix of the page-boundary marker line.
pub const PAGE_MARKER_PREFIX: &str = "=== PAGE";

/// Marker line introducing the text of page `page` (1-indexed).
pub fn page_marker(page: usize) -> String {
    format!("=== PAGE {page} ===")
}

/// Marker line used when a multi-page response could not be split per page.
pub fn range_marker(first: usize, last: usize) -> String {
    format!("=== PAGES {first}-{last} ===")
}

/// User-turn text listing the pages attached to the request.
pub fn user_instruction(first: usize, last: usize) -> String {
    if first == last {
        format!("Page {first}.")
    } else {
        let pages: Vec<String> = (first..=last).map(|p| p.to_string()).collect();
        format!("Pages {} (one image per page, in this order).", pages.join(", "))
    }
}

/// Full system prompt for a request spanning `page_count` pages.
pub fn system_prompt(custom: Option<&str>, page_count: usize) -> String {
    let base = custom.unwrap_or(DEFAULT_SYSTEM_PROMPT);
    if page_count > 1 {
        format!("{base}{MULTI_PAGE_SUFFIX}")
    } else {
        base.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_page_prompt_has_no_marker_rule() {
        let p = system_prompt(None, 1);
        assert!(!p.contains("PAGE BOUNDARIES"));
    }

    #[test]
    fn multi_page_prompt_keeps_custom_base() {
        let p = system_prompt(Some("Extract text."), 3);
        assert!(p.starts_with("Extract text."));
        assert!(p.contains("=== PAGE <number> ==="));
    }

    #[test]
    fn markers() {
        assert_eq!(page_marker(7), "=== PAGE 7 ===");
        assert_eq!(range_marker(3, 4), "=== PAGES 3-4 ===");
        assert!(page_marker(1).starts_with(PAGE_MARKER_PREFIX));
        assert_eq!(user_instruction(2, 2), "Page 2.");
        assert_eq!(
            user_instruction(3, 5),
            "Pages 3, 4, 5 (one image per page, in this order)."
        );
    }
}
