//! Post-processing: deterministic cleanup of VLM-extracted text.
//!
//! Even well-prompted models wrap output in code fences, emit CRLF line
//! endings or sprinkle zero-width characters. These passes are pure
//! `&str → String` functions applied in a fixed order, so re-running
//! finalisation on the same checkpoint yields byte-identical output.
//!
//! Rules (applied in order):
//! 1. Strip outer code fences
//! 2. Normalise line endings (CRLF → LF)
//! 3. Trim trailing whitespace per line
//! 4. Collapse 3+ consecutive blank lines down to 2
//! 5. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
//! 6. Ensure the text ends with exactly one newline
//!
//! [`normalise_batch_text`] then rewrites page-boundary markers into their
//! canonical form so downstream consumers can address per-page text.

use crate::pipeline::source::PageRange;
use crate::prompts::{page_marker, range_marker};
use once_cell::sync::Lazy;
use regex::Regex;

/// Apply all cleanup rules to raw model output.
pub fn clean_text(input: &str) -> String {
    let s = strip_code_fences(input);
    let s = normalise_line_endings(&s);
    let s = trim_trailing_whitespace(&s);
    let s = collapse_blank_lines(&s);
    let s = remove_invisible_chars(&s);
    ensure_final_newline(&s)
}

/// Clean `raw` and lay it out as one marked section per page of `range`.
///
/// Each page section is `=== PAGE n ===` followed by the page text; sections
/// are separated by a blank line. When a multi-page response does not carry
/// exactly one marker per page in order, the text cannot be attributed and is
/// kept whole under `=== PAGES a-b ===`.
pub fn normalise_batch_text(range: PageRange, raw: &str) -> String {
    let cleaned = clean_text(raw);

    if range.first == range.last {
        let body = strip_leading_marker(&cleaned, range.first);
        return section(&page_marker(range.first), &body);
    }

    match split_on_markers(&cleaned) {
        Some(sections)
            if sections.len() == range.len()
                && sections
                    .iter()
                    .zip(range.pages())
                    .all(|((page, _), expected)| *page == expected) =>
        {
            sections
                .iter()
                .map(|(page, body)| section(&page_marker(*page), body))
                .collect::<Vec<_>>()
                .join("\n")
        }
        _ => section(&range_marker(range.first, range.last), &cleaned),
    }
}

fn section(marker: &str, body: &str) -> String {
    format!("{marker}\n{}", ensure_final_newline(body))
}

static RE_PAGE_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^=== PAGE (\d+) ===[ \t]*$").unwrap());

/// Split text at marker lines. `None` if there is non-blank text before the
/// first marker or no marker at all.
fn split_on_markers(text: &str) -> Option<Vec<(usize, String)>> {
    let markers: Vec<(usize, usize, usize)> = RE_PAGE_MARKER
        .captures_iter(text)
        .filter_map(|caps| {
            let m = caps.get(0)?;
            let page = caps[1].parse().ok()?;
            Some((page, m.start(), m.end()))
        })
        .collect();

    let (_, first_start, _) = *markers.first()?;
    if !text[..first_start].trim().is_empty() {
        return None;
    }

    let mut sections = Vec::with_capacity(markers.len());
    for (i, (page, _, end)) in markers.iter().enumerate() {
        let next_start = markers.get(i + 1).map(|m| m.1).unwrap_or(text.len());
        let body = text[*end..next_start].trim_matches('\n');
        sections.push((*page, body.to_string()));
    }
    Some(sections)
}

fn strip_leading_marker(text: &str, page: usize) -> String {
    let marker = page_marker(page);
    match text.trim_start().strip_prefix(&marker) {
        Some(rest) => rest.trim_start_matches([' ', '\t']).trim_start_matches('\n').to_string(),
        None => text.to_string(),
    }
}

// ── Rule 1: Strip outer code fences ──────────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:text|plaintext|markdown)?\r?\n(.*)\r?\n```\s*$").unwrap());

fn strip_code_fences(input: &str) -> String {
    if let Some(caps) = RE_OUTER_FENCES.captures(input.trim()) {
        caps[1].to_string()
    } else {
        input.to_string()
    }
}

// ── Rule 2: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 3: Trim trailing whitespace per line ────────────────────────────────

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 4: Collapse excessive blank lines ───────────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{4,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n\n").to_string()
}

// ── Rule 5: Remove invisible Unicode characters ──────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Rule 6: Ensure text ends with single newline ─────────────────────────────

fn ensure_final_newline(input: &str) -> String {
    let trimmed = input.trim_end();
    if trimmed.is_empty() {
        String::from("\n")
    } else {
        format!("{}\n", trimmed)
    }
}
