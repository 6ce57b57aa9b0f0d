//! Span-preserving HTML tokenizer
//!
//! Produces a flat token list whose spans index into the original input, so
//! callers can splice edits into the source without re-serializing markup.
//! It is lenient: anything that does not parse as a tag is text.

use std::ops::Range;

/// Attributes that carry references to other resources
pub const URL_ATTRIBUTES: [&str; 7] = [
    "href",
    "src",
    "data-api-endpoint",
    "action",
    "formaction",
    "poster",
    "background",
];

/// Elements whose content is not markup
const RAW_TEXT_ELEMENTS: [&str; 4] = ["script", "style", "textarea", "title"];

/// Raw text elements whose content is never scanned
const NON_CONTENT_ELEMENTS: [&str; 2] = ["script", "style"];

const VOID_ELEMENTS: [&str; 14] = [
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

/// How an attribute value is delimited
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Quote {
    /// `name="value"`
    Double,
    /// `name='value'`
    Single,
    /// `name=value`
    None,
}

/// One attribute of a start tag
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attribute {
    /// Lowercased attribute name
    pub name: String,
    /// Span of the raw value, excluding quotes (`None` for `<input disabled>`)
    pub value: Option<Range<usize>>,
    /// Value delimiter
    pub quote: Quote,
}

/// A lexical unit of the input
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Token {
    /// Character data between tags
    Text(Range<usize>),
    /// `<name attr=...>`
    StartTag {
        /// Lowercased tag name
        name: String,
        /// Attributes in source order
        attrs: Vec<Attribute>,
        /// Whether the tag ended with `/>`
        self_closing: bool,
        /// Span of the whole tag
        span: Range<usize>,
    },
    /// `</name>`
    EndTag {
        /// Lowercased tag name
        name: String,
        /// Span of the whole tag
        span: Range<usize>,
    },
    /// Content of a script, style, textarea or title element
    RawText {
        /// Lowercased name of the enclosing element
        parent: String,
        /// Span of the content
        span: Range<usize>,
    },
    /// `<!-- ... -->`
    Comment(Range<usize>),
    /// `<!DOCTYPE ...>`, `<?...>` and other declarations
    Declaration(Range<usize>),
}

/// Where a scannable span sits in the document
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Location {
    /// Value of a reference-carrying attribute
    Attribute {
        /// Element carrying the attribute
        element: String,
        /// Attribute name
        name: String,
        /// Value delimiter
        quote: Quote,
    },
    /// Text content
    Text {
        /// Innermost open element, if any
        parent: Option<String>,
    },
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Location::Attribute { element, name, .. } => write!(f, "<{element} {name}>"),
            Location::Text { parent: Some(parent) } => write!(f, "text in <{parent}>"),
            Location::Text { parent: None } => f.write_str("text"),
        }
    }
}

/// A span of the input that may contain references
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Target {
    /// Byte range in the input
    pub span: Range<usize>,
    /// Kind of span
    pub location: Location,
}

/// Tokenize `input`
pub fn tokenize(input: &str) -> Vec<Token> {
    Tokenizer::new(input).run()
}

/// Spans worth scanning: URL attribute values and text outside script/style
///
/// Targets are returned in document order and never overlap.
pub fn scan_targets(input: &str) -> Vec<Target> {
    let mut targets = Vec::new();
    let mut open: Vec<String> = Vec::new();

    for token in tokenize(input) {
        match token {
            Token::Text(span) if !span.is_empty() => targets.push(Target {
                span,
                location: Location::Text {
                    parent: open.last().cloned(),
                },
            }),
            Token::RawText { parent, span } => {
                if !NON_CONTENT_ELEMENTS.contains(&parent.as_str()) && !span.is_empty() {
                    targets.push(Target {
                        span,
                        location: Location::Text {
                            parent: Some(parent),
                        },
                    });
                }
            }
            Token::StartTag {
                name,
                attrs,
                self_closing,
                ..
            } => {
                for attr in attrs {
                    if let Some(value) = attr.value
                        && !value.is_empty()
                        && URL_ATTRIBUTES.contains(&attr.name.as_str())
                    {
                        targets.push(Target {
                            span: value,
                            location: Location::Attribute {
                                element: name.clone(),
                                name: attr.name,
                                quote: attr.quote,
                            },
                        });
                    }
                }
                if !self_closing && !VOID_ELEMENTS.contains(&name.as_str()) {
                    open.push(name);
                }
            }
            Token::EndTag { name, .. } => {
                if let Some(pos) = open.iter().rposition(|n| *n == name) {
                    open.truncate(pos);
                }
            }
            _ => {}
        }
    }

    targets
}

/// Escape text for inclusion in markup
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// Decode the handful of entities [`escape`] produces, plus `&#39;`
pub fn unescape(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&amp;", "&")
}

struct Tokenizer<'a> {
    input: &'a str,
    bytes: &'a [u8],
    pos: usize,
    text_start: usize,
    tokens: Vec<Token>,
}

impl<'a> Tokenizer<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            bytes: input.as_bytes(),
            pos: 0,
            text_start: 0,
            tokens: Vec::new(),
        }
    }

    fn run(mut self) -> Vec<Token> {
        while self.pos < self.bytes.len() {
            if self.bytes[self.pos] != b'<' {
                self.pos += 1;
                continue;
            }

            let start = self.pos;
            let rest = &self.bytes[start..];
            if rest.starts_with(b"<!--") {
                let end = find(self.bytes, b"-->", start + 4).map_or(self.bytes.len(), |i| i + 3);
                self.emit(Token::Comment(start..end), start, end);
            } else if rest.starts_with(b"<!") || rest.starts_with(b"<?") {
                let end = find(self.bytes, b">", start + 2).map_or(self.bytes.len(), |i| i + 1);
                self.emit(Token::Declaration(start..end), start, end);
            } else if rest.starts_with(b"</") && rest.get(2).is_some_and(u8::is_ascii_alphabetic) {
                match self.end_tag(start) {
                    Some((token, end)) => self.emit(token, start, end),
                    None => self.pos += 1,
                }
            } else if rest.get(1).is_some_and(u8::is_ascii_alphabetic) {
                match self.start_tag(start) {
                    Some((token, end)) => {
                        let raw_parent = match &token {
                            Token::StartTag {
                                name, self_closing, ..
                            } if !self_closing && RAW_TEXT_ELEMENTS.contains(&name.as_str()) => {
                                Some(name.clone())
                            }
                            _ => None,
                        };
                        self.emit(token, start, end);
                        if let Some(parent) = raw_parent {
                            self.raw_text(parent);
                        }
                    }
                    None => self.pos += 1,
                }
            } else {
                self.pos += 1;
            }
        }

        self.flush_text(self.bytes.len());
        self.tokens
    }

    fn flush_text(&mut self, until: usize) {
        if until > self.text_start {
            self.tokens.push(Token::Text(self.text_start..until));
        }
    }

    fn emit(&mut self, token: Token, start: usize, end: usize) {
        self.flush_text(start);
        self.tokens.push(token);
        self.pos = end;
        self.text_start = end;
    }

    /// Consume element content up to (not including) its end tag
    fn raw_text(&mut self, parent: String) {
        let start = self.pos;
        let closing = format!("</{parent}");
        let end = find_ascii_case_insensitive(self.bytes, closing.as_bytes(), start)
            .unwrap_or(self.bytes.len());
        if end > start {
            self.tokens.push(Token::RawText {
                parent,
                span: start..end,
            });
        }
        self.pos = end;
        self.text_start = end;
    }

    fn name_at(&self, from: usize) -> (String, usize) {
        let mut end = from;
        while end < self.bytes.len() && !is_name_terminator(self.bytes[end]) {
            end += 1;
        }
        (self.input[from..end].to_ascii_lowercase(), end)
    }

    fn end_tag(&self, start: usize) -> Option<(Token, usize)> {
        let (name, after) = self.name_at(start + 2);
        let end = find(self.bytes, b">", after)? + 1;
        Some((
            Token::EndTag {
                name,
                span: start..end,
            },
            end,
        ))
    }

    fn start_tag(&self, start: usize) -> Option<(Token, usize)> {
        let (name, mut i) = self.name_at(start + 1);
        let mut attrs = Vec::new();
        let len = self.bytes.len();

        loop {
            while i < len && (self.bytes[i].is_ascii_whitespace() || self.bytes[i] == b'/') {
                if self.bytes[i] == b'/' && self.bytes.get(i + 1) == Some(&b'>') {
                    return Some((
                        Token::StartTag {
                            name,
                            attrs,
                            self_closing: true,
                            span: start..i + 2,
                        },
                        i + 2,
                    ));
                }
                i += 1;
            }
            if i >= len {
                return None;
            }
            if self.bytes[i] == b'>' {
                return Some((
                    Token::StartTag {
                        name,
                        attrs,
                        self_closing: false,
                        span: start..i + 1,
                    },
                    i + 1,
                ));
            }

            // Attribute name; a stray '=' or quote is consumed as part of it
            let name_start = i;
            i += 1;
            while i < len && !is_name_terminator(self.bytes[i]) && self.bytes[i] != b'=' {
                i += 1;
            }
            let attr_name = self.input[name_start..i].to_ascii_lowercase();

            let mut j = i;
            while j < len && self.bytes[j].is_ascii_whitespace() {
                j += 1;
            }
            if j >= len || self.bytes[j] != b'=' {
                attrs.push(Attribute {
                    name: attr_name,
                    value: None,
                    quote: Quote::None,
                });
                continue;
            }

            i = j + 1;
            while i < len && self.bytes[i].is_ascii_whitespace() {
                i += 1;
            }
            if i >= len {
                return None;
            }

            let (value, quote) = match self.bytes[i] {
                q @ (b'"' | b'\'') => {
                    let close = find(self.bytes, &[q], i + 1)?;
                    let quote = if q == b'"' { Quote::Double } else { Quote::Single };
                    let value = i + 1..close;
                    i = close + 1;
                    (value, quote)
                }
                _ => {
                    let value_start = i;
                    while i < len && !self.bytes[i].is_ascii_whitespace() && self.bytes[i] != b'>' {
                        i += 1;
                    }
                    (value_start..i, Quote::None)
                }
            };
            attrs.push(Attribute {
                name: attr_name,
                value: Some(value),
                quote,
            });
        }
    }
}

fn is_name_terminator(b: u8) -> bool {
    b.is_ascii_whitespace() || b == b'/' || b == b'>'
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from > haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|i| i + from)
}

fn find_ascii_case_insensitive(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from > haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w.eq_ignore_ascii_case(needle))
        .map(|i| i + from)
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn texts(input: &str) -> Vec<(&str, Location)> {
        scan_targets(input)
            .into_iter()
            .map(|t| (&input[t.span], t.location))
            .collect()
    }

    #[test]
    fn tokenizes_tags_text_and_comments() {
        let html = "<p class=x>Hi <b>there</b><!-- note --></p>";
        let tokens = tokenize(html);

        assert!(matches!(&tokens[0], Token::StartTag { name, .. } if name == "p"));
        assert_eq!(tokens[1], Token::Text(11..14));
        assert!(matches!(&tokens[2], Token::StartTag { name, .. } if name == "b"));
        assert!(matches!(&tokens[5], Token::Comment(span) if &html[span.clone()] == "<!-- note -->"));
        assert!(matches!(&tokens[6], Token::EndTag { name, .. } if name == "p"));
    }

    #[test]
    fn attribute_value_spans_exclude_quotes() {
        let html = r#"<a HREF="http://a.com" data-x='y' target=_blank disabled>"#;
        let Token::StartTag { attrs, .. } = &tokenize(html)[0] else {
            panic!("expected start tag");
        };

        assert_eq!(attrs[0].name, "href");
        assert_eq!(&html[attrs[0].value.clone().unwrap()], "http://a.com");
        assert_eq!(attrs[0].quote, Quote::Double);
        assert_eq!(&html[attrs[1].value.clone().unwrap()], "y");
        assert_eq!(attrs[1].quote, Quote::Single);
        assert_eq!(&html[attrs[2].value.clone().unwrap()], "_blank");
        assert_eq!(attrs[2].quote, Quote::None);
        assert_eq!(attrs[3].name, "disabled");
        assert!(attrs[3].value.is_none());
    }

    #[test]
    fn quoted_values_may_contain_angle_brackets() {
        let html = r#"<img alt="a > b" src="/x.png">tail"#;
        let targets = texts(html);
        assert_eq!(targets[0].0, "/x.png");
        assert_eq!(targets[1].0, "tail");
    }

    #[test]
    fn script_and_style_content_is_not_scanned() {
        let html = "<script src=\"http://a.com/s.js\">var u = 'http://a.com';</script>\
                    <style>body { background: url(http://a.com/bg.png) }</style><p>http://a.com</p>";
        let targets = texts(html);

        let values: Vec<&str> = targets.iter().map(|(s, _)| *s).collect();
        assert_eq!(values, ["http://a.com/s.js", "http://a.com"]);
        assert_eq!(
            targets[1].1,
            Location::Text {
                parent: Some("p".to_string())
            }
        );
    }

    #[test]
    fn only_reference_attributes_are_targets() {
        let html = r#"<a title="http://a.com" href="http://a.com">x</a><form action="/go"></form><video poster="p.png"></video>"#;
        let attrs: Vec<String> = scan_targets(html)
            .into_iter()
            .filter_map(|t| match t.location {
                Location::Attribute { name, .. } => Some(name),
                _ => None,
            })
            .collect();
        assert_eq!(attrs, ["href", "action", "poster"]);
    }

    #[test]
    fn stray_less_than_is_text() {
        let html = "a < b and 1<2 <p>ok</p>";
        let targets = texts(html);
        assert_eq!(targets[0].0, "a < b and 1<2 ");
        assert_eq!(targets[1].0, "ok");
    }

    #[test]
    fn unterminated_tag_is_text() {
        let html = "before <a href=\"http://a.com";
        let tokens = tokenize(html);
        assert_eq!(tokens, vec![Token::Text(0..html.len())]);
    }

    #[test]
    fn text_parent_tracks_void_and_self_closing_elements() {
        let html = "<div>one<br>two<img src=x />three</div>four";
        let parents: Vec<Option<String>> = scan_targets(html)
            .into_iter()
            .filter_map(|t| match t.location {
                Location::Text { parent } => Some(parent),
                _ => None,
            })
            .collect();
        assert_eq!(
            parents,
            [
                Some("div".to_string()),
                Some("div".to_string()),
                Some("div".to_string()),
                None
            ]
        );
    }

    #[test]
    fn escape_and_unescape_are_inverse_for_markup_characters() {
        let raw = r#"a&b <c> "d""#;
        assert_eq!(escape(raw), "a&amp;b &lt;c&gt; &quot;d&quot;");
        assert_eq!(unescape(&escape(raw)), raw);
        assert_eq!(unescape("plain"), "plain");
    }

    #[test]
    fn multibyte_text_keeps_char_boundaries() {
        let html = "<p>café → http://a.com</p>";
        let targets = texts(html);
        assert_eq!(targets[0].0, "café → http://a.com");
    }
}
