use xostream::{decode_str, DecodeHandler, Decoder, Error, Node};

#[derive(Debug, Default)]
struct Events {
    nodes: usize,
    completes: usize,
    errors: Vec<String>,
    closes: usize,
}

impl DecodeHandler for Events {
    fn node(&mut self, node: Node, _depth: usize) -> Option<Node> {
        self.nodes += 1;
        Some(node)
    }

    fn complete(&mut self, _root: Option<Node>) {
        self.completes += 1;
    }

    fn error(&mut self, error: &Error) {
        self.errors.push(error.to_string());
    }

    fn close(&mut self) {
        self.closes += 1;
    }
}

#[test]
fn test_mismatched_close_tag_reports_one_error() {
    let mut decoder = Decoder::new(Events::default());
    let err = decoder.write("<a><b></a>").unwrap_err();
    assert!(err.is_malformed_input());
    // further input is rejected without events
    assert!(matches!(decoder.write("</b></a>"), Err(Error::Closed)));
    assert!(matches!(decoder.end(None), Err(Error::Closed)));
    let events = decoder.into_handler();
    assert_eq!(events.errors, ["invalid close tag: expected </b>, found </a>"]);
    assert_eq!(events.nodes, 0);
    assert_eq!(events.completes, 0);
    assert_eq!(events.closes, 1);
}

#[test]
fn test_nodes_before_error_stay_valid() {
    let mut decoder = Decoder::new(Events::default());
    decoder.write("<a><b/><c>").unwrap();
    assert!(decoder.write("</b>").is_err());
    let events = decoder.into_handler();
    assert_eq!(events.nodes, 1);
    assert_eq!(events.errors.len(), 1);
}

#[test]
fn test_error_in_later_chunk() {
    let mut decoder = Decoder::new(Events::default());
    decoder.write("<a>").unwrap();
    decoder.write("<b x='1' x='2'/>").unwrap_err();
    assert_eq!(decoder.handler().errors, ["duplicate attribute x"]);
}

#[test]
fn test_unexpected_close_tag() {
    let err = decode_str("<a/></a>").unwrap_err();
    assert!(matches!(err, Error::UnexpectedCloseTag(name) if name == "a"));
}

#[test]
fn test_unclosed_at_end() {
    let mut decoder = Decoder::new(Events::default());
    decoder.write("<a><b>").unwrap();
    let err = decoder.end(None).unwrap_err();
    assert!(matches!(err, Error::UnclosedTag(name) if name == "b"));
    assert_eq!(decoder.handler().errors.len(), 1);
    assert_eq!(decoder.handler().closes, 1);
}

#[test]
fn test_truncated_markup() {
    let err = decode_str("<a><b").unwrap_err();
    assert!(matches!(err, Error::UnexpectedEndOfInput));
    assert!(err.is_malformed_input());
}

#[test]
fn test_invalid_entity() {
    let err = decode_str("<a>&nbsp;</a>").unwrap_err();
    assert!(matches!(err, Error::InvalidEntity(entity) if entity == "nbsp"));
}

#[test]
fn test_xmlparser_error() {
    let err = decode_str("<a><1/></a>").unwrap_err();
    assert!(matches!(err, Error::MalformedInput(_)));
}

#[test]
fn test_unsupported_encoding_declaration() {
    let err = decode_str(r#"<?xml version="1.0" encoding="ISO-8859-1"?><a/>"#).unwrap_err();
    assert!(matches!(err, Error::UnsupportedEncoding(_)));
    assert!(!err.is_malformed_input());
}

#[test]
fn test_unbound_prefix_is_not_an_error() {
    // compatibility fallback: the prefix stands in for the namespace
    let node = decode_str("<foo:bar/>").unwrap();
    assert_eq!(node.namespace(), "foo");
}

#[test]
fn test_second_root_element() {
    let mut decoder = Decoder::new(Events::default());
    let err = decoder.write("<a/><b/>junk").unwrap_err();
    assert!(err.is_malformed_input());
    assert!(matches!(decoder.end(None), Err(Error::Closed)));
    let events = decoder.into_handler();
    assert_eq!(events.completes, 1);
    assert_eq!(events.errors, ["malformed input: junk after document element"]);
    assert_eq!(events.closes, 1);
}

#[test]
fn test_text_after_root_element() {
    let mut decoder = Decoder::new(Events::default());
    decoder.write("<a><b/></a>").unwrap();
    let err = decoder.end(Some("trailing")).unwrap_err();
    assert!(matches!(err, Error::MalformedInput(_)));
    assert_eq!(decoder.handler().errors.len(), 1);
    assert_eq!(decoder.handler().closes, 1);
}

#[test]
fn test_whitespace_and_comments_after_root_element() {
    let node = decode_str("<a/>\n<!-- bye -->\n").unwrap();
    assert_eq!(node.local_name(), "a");
}
