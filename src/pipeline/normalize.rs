//! Normalisation: deterministic cleanup of text extracted from markup.
//!
//! Markup-to-text conversion leaves small artefacts behind, mostly spacing
//! that came from inline tags or hard-wrapped source files:
//!
//! - `it' s` or `John 's` when an apostrophe sat next to a tag boundary
//! - `Note:    see below` from column-aligned source text
//! - `end.   Next` from double-spaced typewriter conventions
//! - runs of blank lines where block elements were nested
//!
//! Four regex rules fix these. Rules 1–3 only ever touch horizontal
//! whitespace (spaces and tabs), so the line structure the paginator relies on
//! is left alone until rule 4.
//!
//! ## Rule Order
//!
//! Apostrophes first so a contraction never ends up split across a collapsed
//! colon or period run; blank lines last because nothing earlier can create
//! or remove a newline.

use once_cell::sync::Lazy;
use regex::Regex;

/// Apply all normalisation rules to extracted text.
///
/// Pure and idempotent: `normalize(&normalize(s)) == normalize(s)`.
///
/// Rules (applied in order):
/// 1. Rejoin contractions and possessives split by spacing around an apostrophe
/// 2. Collapse horizontal whitespace after a colon to one space
/// 3. Collapse two or more horizontal spaces after a period to one space
/// 4. Collapse two or more blank lines into exactly one
pub fn normalize(raw: &str) -> String {
    let s = join_apostrophes(raw);
    let s = collapse_after_colon(&s);
    let s = collapse_after_period(&s);
    collapse_blank_lines(&s)
}

// ── Rule 1: Contractions and possessives ─────────────────────────────────────

static RE_APOSTROPHE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\w)[ \t]*(['’])[ \t]*(s|t|d|m|ll|re|ve)\b").unwrap()
});

fn join_apostrophes(input: &str) -> String {
    RE_APOSTROPHE.replace_all(input, "$1$2$3").into_owned()
}

// ── Rule 2: Colon spacing ────────────────────────────────────────────────────

static RE_COLON: Lazy<Regex> = Lazy::new(|| Regex::new(r":[ \t]+").unwrap());

fn collapse_after_colon(input: &str) -> String {
    RE_COLON.replace_all(input, ": ").into_owned()
}

// ── Rule 3: Period spacing ───────────────────────────────────────────────────

static RE_PERIOD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\.[ \t]{2,}").unwrap());

fn collapse_after_period(input: &str) -> String {
    RE_PERIOD.replace_all(input, ". ").into_owned()
}

// ── Rule 4: Blank lines ──────────────────────────────────────────────────────

/// Three or more newlines, possibly separated by whitespace-only lines.
static RE_BLANK_LINES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n[ \t]*\n(?:[ \t]*\n)+").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n").into_owned()
}

// ── Tests ────────────────────────────────────────────────────────────────────
