//! Structure-preserving find & replace over HTML
//!
//! Only reference-carrying attribute values and text outside script/style are
//! scanned (see [`crate::html::scan_targets`]). Everything else is copied
//! byte-for-byte. Mappings apply in list order, and a span claimed by one
//! mapping is never rescanned by a later one, so replacements do not cascade.
//!
//! Matching happens on raw markup. When `find` contains characters markup
//! escapes (`&`, `<`, `>`, `"`), its escaped form is matched first and the
//! replacement is written escaped. A match never splits a character
//! reference such as `&amp;` or `&#39;`.

use crate::html::{self, Location, Quote};
use crate::types::{RewriteOptions, UrlMapping};
use regex::{Regex, RegexBuilder};
use std::collections::HashSet;
use std::ops::Range;
use std::sync::OnceLock;

/// One match recorded by [`Rewriter::rewrite`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Change {
    /// Where the match was found
    pub location: Location,
    /// Index of the mapping that matched
    pub mapping_index: usize,
    /// Matched text as it appears in the markup
    pub original: String,
    /// Text written (or that would be written, in preview mode)
    pub replacement: String,
    /// Whether the output contains the replacement
    pub applied: bool,
}

/// Output of [`Rewriter::rewrite`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rewrite {
    /// Rewritten document (identical to the input in preview mode)
    pub html: String,
    /// Matches in document order; mapping order within one span
    pub changes: Vec<Change>,
}

impl Rewrite {
    /// Whether the output differs from the input
    pub fn is_modified(&self) -> bool {
        self.changes.iter().any(|c| c.applied && c.original != c.replacement)
    }
}

/// A needle compiled from one mapping
#[derive(Debug)]
struct Needle {
    mapping_index: usize,
    pattern: Regex,
    /// Text written for attribute values and text outside quoting concerns
    replacement: String,
    /// The needle is the escaped form of `find`
    escaped: bool,
    /// First/last char of `find` are word chars
    word_start: bool,
    word_end: bool,
}

/// Compiled mapping list
///
/// Build once per execution, then call [`Rewriter::rewrite`] for each document.
#[derive(Debug)]
pub struct Rewriter {
    needles: Vec<Needle>,
    options: RewriteOptions,
}

impl Rewriter {
    /// Compile `mappings`; empty `find` values are skipped
    pub fn new(mappings: &[UrlMapping], options: RewriteOptions) -> Result<Self, regex::Error> {
        let mut needles = Vec::new();

        for (mapping_index, mapping) in mappings.iter().enumerate() {
            if mapping.find.is_empty() {
                continue;
            }

            let escaped_find = html::escape(&mapping.find);
            let mut variants = Vec::with_capacity(2);
            if escaped_find != mapping.find {
                variants.push((escaped_find, html::escape(&mapping.replace), true));
            }
            variants.push((mapping.find.clone(), mapping.replace.clone(), false));

            for (find, replacement, escaped) in variants {
                let pattern = RegexBuilder::new(&regex::escape(&find))
                    .case_insensitive(!options.case_sensitive)
                    .build()?;
                needles.push(Needle {
                    mapping_index,
                    pattern,
                    replacement,
                    escaped,
                    word_start: find.chars().next().is_some_and(is_word_char),
                    word_end: find.chars().next_back().is_some_and(is_word_char),
                });
            }
        }

        Ok(Self { needles, options })
    }

    /// Whether there is nothing to look for
    pub fn is_empty(&self) -> bool {
        self.needles.is_empty()
    }

    /// Find (and unless in preview mode, replace) every occurrence in `input`
    ///
    /// `input` is never modified; the result carries a new document.
    pub fn rewrite(&self, input: &str) -> Rewrite {
        if self.needles.is_empty() || input.is_empty() {
            return Rewrite {
                html: input.to_string(),
                changes: Vec::new(),
            };
        }

        let mut changes = Vec::new();
        let mut output = String::with_capacity(input.len());
        let mut copied = 0;

        for target in html::scan_targets(input) {
            let segment = &input[target.span.clone()];
            let pieces = self.rewrite_segment(segment, &target.location, &mut changes);

            output.push_str(&input[copied..target.span.start]);
            for piece in pieces {
                match piece {
                    Piece::Original(range) => output.push_str(&segment[range]),
                    Piece::Replaced { original, text } => {
                        if self.options.preview_mode {
                            output.push_str(&segment[original]);
                        } else {
                            output.push_str(&text);
                        }
                    }
                }
            }
            copied = target.span.end;
        }
        output.push_str(&input[copied..]);

        Rewrite {
            html: output,
            changes,
        }
    }

    fn rewrite_segment(
        &self,
        segment: &str,
        location: &Location,
        changes: &mut Vec<Change>,
    ) -> Vec<Piece> {
        let mut pieces = vec![Piece::Original(0..segment.len())];
        let references: Vec<Range<usize>> = char_reference_pattern()
            .find_iter(segment)
            .map(|m| m.range())
            .collect();

        // Needles of one mapping are adjacent; each mapping sees the pieces
        // left unclaimed by the mappings before it.
        for needle in &self.needles {
            let mut next = Vec::with_capacity(pieces.len());
            for piece in pieces {
                let Piece::Original(range) = piece else {
                    next.push(piece);
                    continue;
                };

                let mut cursor = range.start;
                for found in self.matches(needle, segment, range.clone(), &references) {
                    if found.start > cursor {
                        next.push(Piece::Original(cursor..found.start));
                    }
                    let original = segment[found.clone()].to_string();
                    let text = written_replacement(needle, location);
                    changes.push(Change {
                        location: location.clone(),
                        mapping_index: needle.mapping_index,
                        original,
                        replacement: text.clone(),
                        applied: !self.options.preview_mode,
                    });
                    next.push(Piece::Replaced {
                        original: found.clone(),
                        text,
                    });
                    cursor = found.end;
                }
                if cursor < range.end {
                    next.push(Piece::Original(cursor..range.end));
                }
            }
            pieces = next;
        }

        pieces
    }

    /// Non-overlapping matches of `needle` inside `segment[range]`
    fn matches(
        &self,
        needle: &Needle,
        segment: &str,
        range: Range<usize>,
        references: &[Range<usize>],
    ) -> Vec<Range<usize>> {
        let haystack = &segment[..range.end];
        let mut found = Vec::new();
        let mut at = range.start;

        while at <= haystack.len() {
            let Some(m) = needle.pattern.find_at(haystack, at) else {
                break;
            };
            let rejected = splits_reference(references, m.range())
                || (self.options.whole_word && !is_whole_word(needle, segment, m.range()));
            if rejected {
                // Retry one char further so overlapping candidates are considered
                at = m.start() + segment[m.start()..].chars().next().map_or(1, char::len_utf8);
                continue;
            }
            found.push(m.range());
            at = if m.end() > m.start() { m.end() } else { m.end() + 1 };
        }

        found
    }
}

#[derive(Debug)]
enum Piece {
    Original(Range<usize>),
    Replaced { original: Range<usize>, text: String },
}

fn written_replacement(needle: &Needle, location: &Location) -> String {
    if needle.escaped {
        return needle.replacement.clone();
    }
    match location {
        Location::Attribute { quote, .. } => escape_for_attribute(&needle.replacement, *quote),
        Location::Text { .. } => needle
            .replacement
            .replace('<', "&lt;")
            .replace('>', "&gt;"),
    }
}

/// Keep a raw replacement from terminating its attribute value
fn escape_for_attribute(value: &str, quote: Quote) -> String {
    match quote {
        Quote::Double => value.replace('"', "&quot;"),
        Quote::Single => value.replace('\'', "&#39;"),
        Quote::None => value
            .replace('"', "&quot;")
            .replace('\'', "&#39;")
            .replace('>', "&gt;")
            .replace(' ', "&#32;"),
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// A match is a whole word unless a word-char edge of the needle touches another word char
///
/// Neighbors outside the piece (already claimed by a previous mapping) are
/// still read from the original segment.
fn is_whole_word(needle: &Needle, segment: &str, m: Range<usize>) -> bool {
    let before = segment[..m.start].chars().next_back();
    let after = segment[m.end..].chars().next();

    let start_ok = !needle.word_start || !before.is_some_and(is_word_char);
    let end_ok = !needle.word_end || !after.is_some_and(is_word_char);
    start_ok && end_ok
}

/// Whether either end of `m` falls strictly inside a character reference
fn splits_reference(references: &[Range<usize>], m: Range<usize>) -> bool {
    references.iter().any(|r| {
        (r.start < m.start && m.start < r.end) || (r.start < m.end && m.end < r.end)
    })
}

#[allow(clippy::expect_used)]
fn char_reference_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"&(?:#[0-9]+|#[xX][0-9a-fA-F]+|[A-Za-z][A-Za-z0-9]*);")
            .expect("character reference pattern is valid")
    })
}

#[allow(clippy::expect_used)]
fn url_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"https?://[^\s<>"{}|\\^`\[\]]+"#).expect("URL pattern is valid")
    })
}

/// Distinct absolute URLs in reference attributes and text, in first-seen order
pub fn extract_urls(input: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut urls = Vec::new();

    for target in html::scan_targets(input) {
        let raw = &input[target.span];
        match target.location {
            Location::Attribute { .. } => {
                let value = html::unescape(raw.trim());
                if value.starts_with("http://")
                    || value.starts_with("https://")
                    || value.starts_with("//")
                {
                    if seen.insert(value.clone()) {
                        urls.push(value);
                    }
                }
            }
            Location::Text { .. } => {
                let text = html::unescape(raw);
                for m in url_pattern().find_iter(&text) {
                    let url = m.as_str().to_string();
                    if seen.insert(url.clone()) {
                        urls.push(url);
                    }
                }
            }
        }
    }

    urls
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn opts(case_sensitive: bool, whole_word: bool, preview_mode: bool) -> RewriteOptions {
        RewriteOptions {
            case_sensitive,
            whole_word,
            preview_mode,
        }
    }

    fn run(html: &str, mappings: &[(&str, &str)], options: RewriteOptions) -> Rewrite {
        let mappings: Vec<UrlMapping> = mappings
            .iter()
            .map(|(f, r)| UrlMapping::new(*f, *r))
            .collect();
        Rewriter::new(&mappings, options).unwrap().rewrite(html)
    }

    #[test]
    fn replaces_href_and_restores_with_inverse() {
        let original = r#"<a href="http://a.com">x</a>"#;
        let mapping = UrlMapping::new("http://a.com", "http://b.com");

        let forward = Rewriter::new(std::slice::from_ref(&mapping), RewriteOptions::default())
            .unwrap()
            .rewrite(original);
        assert_eq!(forward.html, r#"<a href="http://b.com">x</a>"#);
        assert_eq!(forward.changes.len(), 1);
        assert!(forward.changes[0].applied);
        assert_eq!(forward.changes[0].original, "http://a.com");
        assert_eq!(forward.changes[0].replacement, "http://b.com");

        let back = Rewriter::new(&[mapping.inverse()], RewriteOptions::default())
            .unwrap()
            .rewrite(&forward.html);
        assert_eq!(back.html, original);
    }

    #[test]
    fn case_insensitive_matches_other_case() {
        let result = run("<p>abc</p>", &[("ABC", "xyz")], opts(false, false, false));
        assert_eq!(result.html, "<p>xyz</p>");

        let result = run("<p>abc</p>", &[("ABC", "xyz")], opts(true, false, false));
        assert_eq!(result.html, "<p>abc</p>");
        assert!(result.changes.is_empty());
    }

    #[test]
    fn whole_word_skips_embedded_matches() {
        let html = "<p>category cat</p>";

        let result = run(html, &[("cat", "dog")], opts(true, true, false));
        assert_eq!(result.html, "<p>category dog</p>");
        assert_eq!(result.changes.len(), 1);

        let result = run(html, &[("cat", "dog")], opts(true, false, false));
        assert_eq!(result.html, "<p>dogegory dog</p>");
        assert_eq!(result.changes.len(), 2);
    }

    #[test]
    fn whole_word_url_with_path_suffix() {
        // A URL followed by a path segment is still a match: '/' is not a word char
        let html = r#"<a href="http://a.com/page">x</a><a href="http://a.community">y</a>"#;
        let result = run(html, &[("http://a.com", "http://b.com")], opts(true, true, false));
        assert_eq!(
            result.html,
            r#"<a href="http://b.com/page">x</a><a href="http://a.community">y</a>"#
        );
    }

    #[test]
    fn preview_mode_is_idempotent_and_does_not_mutate() {
        let html = r#"<p>See http://a.com and <img src="http://a.com/i.png"></p>"#;
        let options = opts(false, false, true);

        let first = run(html, &[("http://a.com", "http://b.com")], options);
        let second = run(&first.html, &[("http://a.com", "http://b.com")], options);

        assert_eq!(first.html, html);
        assert_eq!(second.html, html);
        assert_eq!(first.changes, second.changes);
        assert_eq!(first.changes.len(), 2);
        assert!(first.changes.iter().all(|c| !c.applied));
        assert!(!first.is_modified());
    }

    #[test]
    fn mappings_do_not_cascade() {
        let result = run(
            "<p>http://a.com</p>",
            &[("http://a.com", "http://b.com"), ("http://b.com", "http://c.com")],
            opts(true, false, false),
        );
        assert_eq!(result.html, "<p>http://b.com</p>");
        assert_eq!(result.changes.len(), 1);
        assert_eq!(result.changes[0].mapping_index, 0);
    }

    #[test]
    fn earlier_mapping_wins_overlap() {
        let result = run(
            "<p>http://a.com/x</p>",
            &[("a.com/x", "one"), ("http://a.com", "two")],
            opts(true, false, false),
        );
        assert_eq!(result.html, "<p>http://one</p>");
        assert_eq!(result.changes.len(), 1);
    }

    #[test]
    fn untargeted_markup_is_byte_identical() {
        let html = "<DIV  class = 'keep'   title=\"http://a.com\"><!-- http://a.com --><script>go('http://a.com')</script>\
                    <p>http://a.com</p></DIV>";
        let result = run(html, &[("http://a.com", "http://b.com")], opts(true, false, false));
        assert_eq!(
            result.html,
            html.replace("<p>http://a.com</p>", "<p>http://b.com</p>")
        );
        assert_eq!(result.changes.len(), 1);
    }

    #[test]
    fn all_reference_attributes_are_scanned() {
        let html = r#"<form action="http://a.com/f"><button formaction="http://a.com/b"></button></form><video poster="http://a.com/p"></video><td background="http://a.com/bg"></td><div data-api-endpoint="http://a.com/api"></div>"#;
        let result = run(html, &[("http://a.com", "http://b.com")], opts(true, false, false));
        assert!(!result.html.contains("http://a.com"));
        assert_eq!(result.changes.len(), 5);
    }

    #[test]
    fn escaped_find_matches_entity_form() {
        let html = r#"<a href="http://a.com/?x=1&amp;y=2">x</a>"#;
        let result = run(
            html,
            &[("http://a.com/?x=1&y=2", "http://b.com/?x=1&y=3")],
            opts(true, false, false),
        );
        assert_eq!(result.html, r#"<a href="http://b.com/?x=1&amp;y=3">x</a>"#);
        assert_eq!(result.changes.len(), 1);
    }

    #[test]
    fn ampersand_find_keeps_existing_entities_intact() {
        let result = run("<p>Tom &amp; Jerry</p>", &[("&", "and")], opts(true, false, false));
        assert_eq!(result.html, "<p>Tom and Jerry</p>");
        assert_eq!(result.changes.len(), 1);
        assert_eq!(result.changes[0].original, "&amp;");

        let result = run(
            r#"<p>R&amp;D &#38; Q&A</p><a href="http://a.com/?x=1&amp;y=2">x</a>"#,
            &[("&", "+")],
            opts(true, false, false),
        );
        assert_eq!(
            result.html,
            r#"<p>R+D &#38; Q+A</p><a href="http://a.com/?x=1+y=2">x</a>"#
        );
    }

    #[test]
    fn raw_match_never_splits_a_character_reference() {
        let result = run("<p>fish&amp;chips</p>", &[("h&amp", "X")], opts(true, false, false));
        assert_eq!(result.html, "<p>fish&amp;chips</p>");
        assert!(result.changes.is_empty());
    }

    #[test]
    fn replacement_cannot_break_out_of_attribute_or_text() {
        let result = run(
            r#"<a href="old">old</a>"#,
            &[("old", r#"new"><script>"#)],
            opts(true, false, false),
        );
        assert_eq!(
            result.html,
            r#"<a href="new&quot;><script>">new"&gt;&lt;script&gt;</a>"#
        );
    }

    #[test]
    fn multiple_occurrences_in_one_span() {
        let result = run(
            "<p>http://a.com and HTTP://A.COM</p>",
            &[("http://a.com", "http://b.com")],
            opts(false, false, false),
        );
        assert_eq!(result.html, "<p>http://b.com and http://b.com</p>");
        assert_eq!(result.changes[1].original, "HTTP://A.COM");
    }

    #[test]
    fn empty_mappings_are_a_no_op() {
        let rewriter = Rewriter::new(&[], RewriteOptions::default()).unwrap();
        assert!(rewriter.is_empty());
        let result = rewriter.rewrite("<p>x</p>");
        assert_eq!(result.html, "<p>x</p>");
        assert!(result.changes.is_empty());
    }

    #[test]
    fn extract_urls_collects_distinct_urls() {
        let html = r#"<a href="https://a.com/x">https://a.com/x</a> <img src="/local.png">
            <p>see http://b.org/page?q=1&amp;r=2, then //cdn.test/lib.js</p>
            <script>var s = "http://hidden.test";</script><a href="//cdn.test/lib.js">c</a>"#;

        let urls = extract_urls(html);
        assert_eq!(
            urls,
            [
                "https://a.com/x",
                "http://b.org/page?q=1&r=2,",
                "//cdn.test/lib.js"
            ]
        );
    }
}
