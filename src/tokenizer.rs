// The tokenizer boundary. xmlparser does the character-level work; this
// adapter feeds it complete markup only, so input can arrive in arbitrary
// chunks, and adds the well-formedness checks a tokenizer is expected to
// report (matching close tags, unique attributes, entities).

use std::borrow::Cow;

use xmlparser::{ElementEnd, StrSpan, Token};

use crate::encoding::require_utf8;
use crate::entity::decode_entities;
use crate::error::Error;

/// Receiver of raw tokenizer events.
///
/// Names are qualified names exactly as they appear in the input; values
/// have their entities decoded.
pub trait TokenSink {
    /// A start tag with its attributes in document order.
    fn start_element(&mut self, qname: &str, attributes: Vec<(String, String)>);
    /// An end tag, or the end of an empty element tag.
    fn end_element(&mut self, qname: &str);
    /// Character data.
    fn text(&mut self, chars: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scan {
    Text,
    Tag { quote: Option<u8> },
    Comment,
    Cdata,
    Pi,
}

/// Chunked XML tokenizer.
#[derive(Debug)]
pub struct Tokenizer {
    buffer: String,
    scan: Scan,
    scan_pos: usize,
    complete_end: usize,
    open: Vec<String>,
    prolog: bool,
    // the root element has been closed; only misc markup may follow
    root_closed: bool,
}

impl Default for Tokenizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Tokenizer {
    pub fn new() -> Self {
        Tokenizer {
            buffer: String::new(),
            scan: Scan::Text,
            scan_pos: 0,
            complete_end: 0,
            open: Vec::new(),
            prolog: true,
            root_closed: false,
        }
    }

    /// Number of elements currently open.
    pub fn depth(&self) -> usize {
        self.open.len()
    }

    /// Tokenize as much of the input seen so far as forms complete markup.
    pub fn feed(&mut self, chunk: &str, sink: &mut impl TokenSink) -> Result<(), Error> {
        self.buffer.push_str(chunk);
        if self.prolog && !self.declaration(false)? {
            return Ok(());
        }
        self.scan(false);
        let end = self.complete_end;
        if end > 0 {
            self.tokenize(end, sink)?;
        }
        Ok(())
    }

    /// Tokenize the remaining input and check that nothing is left open.
    pub fn finish(&mut self, sink: &mut impl TokenSink) -> Result<(), Error> {
        if self.prolog {
            self.declaration(true)?;
        }
        self.scan(true);
        if self.scan != Scan::Text {
            return Err(Error::UnexpectedEndOfInput);
        }
        let end = self.buffer.len();
        if end > 0 {
            self.tokenize(end, sink)?;
        }
        match self.open.pop() {
            Some(name) => Err(Error::UnclosedTag(name)),
            None => Ok(()),
        }
    }

    // consume an optional leading XML declaration. returns false while
    // more input is needed to decide.
    fn declaration(&mut self, last: bool) -> Result<bool, Error> {
        let trimmed = self.buffer.trim_start();
        let offset = self.buffer.len() - trimmed.len();
        const OPEN: &str = "<?xml";
        if trimmed.len() <= OPEN.len() && OPEN.starts_with(trimmed) && !last {
            return Ok(false);
        }
        let is_declaration = trimmed.starts_with(OPEN)
            && trimmed[OPEN.len()..]
                .chars()
                .next()
                .map_or(false, |c| c.is_whitespace() || c == '?');
        if is_declaration {
            let Some(close) = trimmed.find("?>") else {
                return if last {
                    Err(Error::UnexpectedEndOfInput)
                } else {
                    Ok(false)
                };
            };
            let end = offset + close + 2;
            let mut tokens = xmlparser::Tokenizer::from(&self.buffer[offset..end]);
            if let Some(token) = tokens.next() {
                if let Token::Declaration {
                    encoding: Some(encoding),
                    ..
                } = token?
                {
                    require_utf8(encoding.as_str())?;
                }
            }
            self.buffer.drain(..end);
        }
        self.prolog = false;
        Ok(true)
    }

    // advance the markup scanner over new input, recording where the last
    // complete piece of markup ends
    fn scan(&mut self, last: bool) {
        let bytes = self.buffer.as_bytes();
        let mut i = self.scan_pos;
        while i < bytes.len() {
            let b = bytes[i];
            match self.scan {
                Scan::Text => {
                    if b == b'<' {
                        let rest = &bytes[i..];
                        if rest.starts_with(b"<!--") {
                            self.scan = Scan::Comment;
                            i += 4;
                            continue;
                        }
                        if rest.starts_with(b"<![CDATA[") {
                            self.scan = Scan::Cdata;
                            i += 9;
                            continue;
                        }
                        let undecided = rest.len() < 2
                            || is_partial(rest, b"<!--")
                            || is_partial(rest, b"<![CDATA[");
                        if undecided && !last {
                            break;
                        }
                        if rest.starts_with(b"<?") {
                            self.scan = Scan::Pi;
                            i += 2;
                            continue;
                        }
                        self.scan = Scan::Tag { quote: None };
                    }
                }
                Scan::Tag { quote: Some(q) } => {
                    if b == q {
                        self.scan = Scan::Tag { quote: None };
                    }
                }
                Scan::Tag { quote: None } => match b {
                    b'"' | b'\'' => self.scan = Scan::Tag { quote: Some(b) },
                    b'>' => {
                        self.scan = Scan::Text;
                        self.complete_end = i + 1;
                    }
                    _ => {}
                },
                Scan::Comment | Scan::Cdata | Scan::Pi => {
                    let terminator: &[u8] = match self.scan {
                        Scan::Comment => b"-->",
                        Scan::Cdata => b"]]>",
                        _ => b"?>",
                    };
                    if b == b'>' && bytes[..=i].ends_with(terminator) {
                        self.scan = Scan::Text;
                        self.complete_end = i + 1;
                    }
                }
            }
            i += 1;
        }
        self.scan_pos = i;
    }

    fn tokenize(&mut self, end: usize, sink: &mut impl TokenSink) -> Result<(), Error> {
        let buffer = std::mem::take(&mut self.buffer);
        let result = self.dispatch(&buffer, end, sink);
        self.buffer = buffer;
        self.buffer.drain(..end);
        self.scan_pos -= end.min(self.scan_pos);
        self.complete_end = 0;
        result
    }

    fn dispatch(
        &mut self,
        text: &str,
        until: usize,
        sink: &mut impl TokenSink,
    ) -> Result<(), Error> {
        let mut qname = "";
        let mut attributes: Vec<(String, String)> = Vec::new();
        for token in xmlparser::Tokenizer::from_fragment(text, 0..until) {
            match token? {
                Token::ElementStart { prefix, local, .. } => {
                    if self.root_closed {
                        return Err(junk_after_root());
                    }
                    qname = qualified(text, prefix, local);
                    attributes.clear();
                }
                Token::Attribute {
                    prefix,
                    local,
                    value,
                    ..
                } => {
                    let name = qualified(text, prefix, local);
                    if attributes.iter().any(|(n, _)| n == name) {
                        return Err(Error::DuplicateAttribute(name.to_string()));
                    }
                    let value = decode_entities(value.as_str())?;
                    attributes.push((name.to_string(), value.into_owned()));
                }
                Token::ElementEnd { end, .. } => match end {
                    ElementEnd::Open => {
                        sink.start_element(qname, std::mem::take(&mut attributes));
                        self.open.push(qname.to_string());
                    }
                    ElementEnd::Empty => {
                        sink.start_element(qname, std::mem::take(&mut attributes));
                        sink.end_element(qname);
                        self.root_closed = self.open.is_empty();
                    }
                    ElementEnd::Close(prefix, local) => {
                        let found = qualified(text, prefix, local);
                        match self.open.pop() {
                            Some(expected) if expected == found => {
                                sink.end_element(found);
                                self.root_closed = self.open.is_empty();
                            }
                            Some(expected) => {
                                return Err(Error::InvalidCloseTag {
                                    expected,
                                    found: found.to_string(),
                                })
                            }
                            None => return Err(Error::UnexpectedCloseTag(found.to_string())),
                        }
                    }
                },
                Token::Text { text: chars } => {
                    if self.open.is_empty() {
                        if is_whitespace(chars.as_str()) {
                            continue;
                        }
                        return Err(text_outside_root(self.root_closed));
                    }
                    let chars: Cow<str> = decode_entities(chars.as_str())?;
                    sink.text(&chars);
                }
                Token::Cdata { text: chars, .. } => {
                    if self.open.is_empty() {
                        return Err(text_outside_root(self.root_closed));
                    }
                    sink.text(chars.as_str());
                }
                // comments and processing instructions carry no content
                _ => {}
            }
        }
        Ok(())
    }
}

fn junk_after_root() -> Error {
    Error::MalformedInput("junk after document element".to_string())
}

fn text_outside_root(root_closed: bool) -> Error {
    if root_closed {
        junk_after_root()
    } else {
        Error::MalformedInput("text before document element".to_string())
    }
}

fn is_whitespace(chars: &str) -> bool {
    chars.chars().all(|c| matches!(c, ' ' | '\t' | '\r' | '\n'))
}

fn is_partial(rest: &[u8], pattern: &[u8]) -> bool {
    rest.len() < pattern.len() && pattern.starts_with(rest)
}

fn qualified<'a>(text: &'a str, prefix: StrSpan<'a>, local: StrSpan<'a>) -> &'a str {
    if prefix.as_str().is_empty() {
        local.as_str()
    } else {
        &text[prefix.start()..local.end()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct Recorder(Vec<String>);

    impl TokenSink for Recorder {
        fn start_element(&mut self, qname: &str, attributes: Vec<(String, String)>) {
            let attributes: Vec<String> = attributes
                .iter()
                .map(|(k, v)| format!(" {}={}", k, v))
                .collect();
            self.0.push(format!("<{}{}>", qname, attributes.concat()));
        }

        fn end_element(&mut self, qname: &str) {
            self.0.push(format!("</{}>", qname));
        }

        fn text(&mut self, chars: &str) {
            self.0.push(chars.to_string());
        }
    }

    fn tokenize_chunks(chunks: &[&str]) -> Result<Vec<String>, Error> {
        let mut tokenizer = Tokenizer::new();
        let mut recorder = Recorder::default();
        for chunk in chunks {
            tokenizer.feed(chunk, &mut recorder)?;
        }
        tokenizer.finish(&mut recorder)?;
        Ok(recorder.0)
    }

    #[test]
    fn test_whole_document() {
        assert_eq!(
            tokenize_chunks(&[r#"<a x="1"><b/>text</a>"#]).unwrap(),
            ["<a x=1>", "<b>", "</b>", "text", "</a>"]
        );
    }

    #[test]
    fn test_split_everywhere() {
        let xml = r#"<?xml version="1.0"?><a:doc xmlns:a="urn:a" v='x>y'>t &amp; u<!-- c > d --><![CDATA[<raw>]]></a:doc>"#;
        let whole = tokenize_chunks(&[xml]).unwrap();
        for i in 1..xml.len() {
            let (head, tail) = xml.split_at(i);
            assert_eq!(tokenize_chunks(&[head, tail]).unwrap(), whole, "split at {}", i);
        }
        assert_eq!(
            whole,
            [
                "<a:doc xmlns:a=urn:a v=x>y>",
                "t & u",
                "<raw>",
                "</a:doc>"
            ]
        );
    }

    #[test]
    fn test_byte_at_a_time() {
        let xml = "<a><b>hi</b><c/></a>";
        let chunks: Vec<&str> = (0..xml.len()).map(|i| &xml[i..i + 1]).collect();
        assert_eq!(
            tokenize_chunks(&chunks).unwrap(),
            ["<a>", "<b>", "hi", "</b>", "<c>", "</c>", "</a>"]
        );
    }

    #[test]
    fn test_text_waits_for_next_markup() {
        let mut tokenizer = Tokenizer::new();
        let mut recorder = Recorder::default();
        tokenizer.feed("<a>hel", &mut recorder).unwrap();
        assert_eq!(recorder.0, ["<a>"]);
        tokenizer.feed("lo</a>", &mut recorder).unwrap();
        assert_eq!(recorder.0, ["<a>", "hello", "</a>"]);
    }

    #[test]
    fn test_mismatched_close_tag() {
        let err = tokenize_chunks(&["<a><b></a>"]).unwrap_err();
        assert!(matches!(err, Error::InvalidCloseTag { ref expected, ref found }
            if expected == "b" && found == "a"));
    }

    #[test]
    fn test_unclosed_tag_at_end() {
        let err = tokenize_chunks(&["<a>"]).unwrap_err();
        assert!(matches!(err, Error::UnclosedTag(name) if name == "a"));
    }

    #[test]
    fn test_truncated_markup_at_end() {
        let err = tokenize_chunks(&["<a><b"]).unwrap_err();
        assert!(matches!(err, Error::UnexpectedEndOfInput));
    }

    #[test]
    fn test_duplicate_attribute() {
        let err = tokenize_chunks(&[r#"<a x="1" x="2"/>"#]).unwrap_err();
        assert!(matches!(err, Error::DuplicateAttribute(name) if name == "x"));
    }

    #[test]
    fn test_non_utf8_declaration() {
        let err = tokenize_chunks(&[r#"<?xml version="1.0" encoding="ISO-8859-1"?><a/>"#])
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedEncoding(_)));
    }

    #[test]
    fn test_second_root_is_junk() {
        let err = tokenize_chunks(&["<a/>", "<b/>"]).unwrap_err();
        assert!(matches!(err, Error::MalformedInput(msg) if msg == "junk after document element"));
    }

    #[test]
    fn test_text_outside_root() {
        assert!(matches!(
            tokenize_chunks(&["<a></a>trailing"]),
            Err(Error::MalformedInput(_))
        ));
        assert!(matches!(
            tokenize_chunks(&["leading<a/>"]),
            Err(Error::MalformedInput(_))
        ));
        assert!(matches!(
            tokenize_chunks(&["<a/><![CDATA[x]]>"]),
            Err(Error::MalformedInput(_))
        ));
    }

    #[test]
    fn test_misc_after_root_is_allowed() {
        assert_eq!(
            tokenize_chunks(&["<a/>\n<!-- done -->\n<?pi x?>\n"]).unwrap(),
            ["<a>", "</a>"]
        );
    }

    #[test]
    fn test_processing_instruction_is_not_declaration() {
        assert_eq!(
            tokenize_chunks(&[r#"<?xml-stylesheet href="s.css"?><a/>"#]).unwrap(),
            ["<a>", "</a>"]
        );
    }
}
