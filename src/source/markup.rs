//! Markup to plain text.
//!
//! A regex pass rather than a real HTML parser: chapter files in the wild are
//! frequently not well-formed XML, and we only need readable text, not a DOM.

use once_cell::sync::Lazy;
use html_escape::decode_html_entities;
use regex::Regex;

static RE_INVISIBLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?is)<!--.*?-->|<script\b[^>]*>.*?</script\s*>|<style\b[^>]*>.*?</style\s*>|<head\b[^>]*>.*?</head\s*>",
    )
    .unwrap()
});

/// Opening or closing tags that end a line of text.
static RE_BLOCK_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)</?(?:p|div|h[1-6]|br|hr|li|ul|ol|tr|table|blockquote|pre|section|article|aside|header|footer|nav|figure|figcaption|dd|dt|dl)\b[^>]*>",
    )
    .unwrap()
});

static RE_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]*>").unwrap());

static RE_HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<h[1-3]\b[^>]*>(.*?)</h[1-3]\s*>").unwrap());

/// Strip markup down to text.
///
/// Block elements become line breaks, inline elements vanish, entities are
/// decoded. Every line is trimmed with inner whitespace collapsed, and at
/// most one blank line separates two text lines.
pub fn plain_text(markup: &str) -> String {
    let visible = RE_INVISIBLE.replace_all(markup, "");
    let broken = RE_BLOCK_TAG.replace_all(&visible, "\n");
    let untagged = RE_TAG.replace_all(&broken, "");
    let decoded = decode_entities(&untagged);

    let mut out = String::with_capacity(decoded.len());
    let mut pending_blank = false;
    for line in decoded.split('\n') {
        let line = collapse_whitespace(line);
        if line.is_empty() {
            pending_blank = !out.is_empty();
            continue;
        }
        if !out.is_empty() {
            out.push('\n');
            if pending_blank {
                out.push('\n');
            }
        }
        out.push_str(&line);
        pending_blank = false;
    }
    out
}

/// Text content of every `h1`–`h3` element, trimmed, empty ones skipped.
pub fn headings(markup: &str) -> Vec<String> {
    RE_HEADING
        .captures_iter(markup)
        .filter_map(|caps| {
            let inner = RE_TAG.replace_all(&caps[1], " ");
            let text = collapse_whitespace(&decode_entities(&inner));
            (!text.is_empty()).then_some(text)
        })
        .collect()
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Decode character references. Unknown names are left as written.
pub fn decode_entities(input: &str) -> String {
    decode_html_entities(input).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inline_tags_vanish() {
        assert_eq!(plain_text("<p>Hello <b>World</b>!</p>"), "Hello World!");
    }

    #[test]
    fn test_script_style_head_dropped() {
        let html = "<html><head><title>T</title><style>p{}</style></head>\
                    <body><script>alert('x')</script><p>kept</p><!-- note --></body></html>";
        assert_eq!(plain_text(html), "kept");
    }

    #[test]
    fn test_paragraphs_separated_by_one_blank_line() {
        let html = "<h1>Title</h1>\n\n<p>One\n   two</p>\n<div><p>Three</p></div>";
        assert_eq!(plain_text(html), "Title\n\nOne\ntwo\n\nThree");
    }

    #[test]
    fn test_br_breaks_line() {
        assert_eq!(plain_text("<p>roses<br/>violets</p>"), "roses\nviolets");
    }

    #[test]
    fn test_entities_decoded_after_tags() {
        assert_eq!(plain_text("<p>a &lt;b&gt; &amp; c&#39;s &#x2014; d&nbsp;e</p>"), "a <b> & c's — d e");
        assert_eq!(plain_text("<p>&bogus; stays</p>"), "&bogus; stays");
        assert_eq!(
            plain_text("<p>Caf&eacute; &trade; &euro;5 na&iuml;ve</p>"),
            "Café ™ €5 naïve"
        );
    }

    #[test]
    fn test_headings_extracted_in_order() {
        let html = r#"<h1 class="t">Part <em>One</em></h1><p>x</p><h2>The&nbsp;Sea</h2><h4>skip</h4><h3>  </h3>"#;
        assert_eq!(headings(html), vec!["Part One", "The Sea"]);
    }

    #[test]
    fn test_empty_markup() {
        assert_eq!(plain_text(""), "");
        assert_eq!(plain_text("<div>   </div>"), "");
    }
}
