use xostream::{
    decode_str, DecodeHandler, Decoder, Node, NodeKind, ObjectType, Property, Registry,
    XML_NAMESPACE,
};

#[derive(Debug, Default)]
struct Recorder(Vec<String>);

impl DecodeHandler for Recorder {
    fn node_open(&mut self, node: &Node) {
        self.0.push(format!("nodeOpen {}", node.local_name()));
    }

    fn node_text(&mut self, node: &Node) {
        self.0
            .push(format!("nodeText {} {}", node.local_name(), node.text().unwrap_or_default()));
    }

    fn node(&mut self, node: Node, _depth: usize) -> Option<Node> {
        self.0.push(format!(
            "node {{{}}}{} {}",
            node.namespace(),
            node.local_name(),
            node.text().unwrap_or_default()
        ));
        Some(node)
    }

    fn complete(&mut self, _root: Option<Node>) {
        self.0.push("complete".to_string());
    }
}

fn decode_chunks(chunks: &[&str]) -> Vec<String> {
    let mut decoder = Decoder::new(Recorder::default());
    for chunk in chunks {
        decoder.write(chunk).unwrap();
    }
    decoder.end(None).unwrap();
    decoder.into_handler().0
}

#[test]
fn test_decode_message() {
    let events = decode_chunks(&[r#"<msg xmlns="ns1"><body>hi</body></msg>"#]);
    assert_eq!(
        events,
        [
            "nodeOpen msg",
            "nodeOpen body",
            "nodeText body hi",
            "node {ns1}body hi",
            "node {ns1}msg ",
            "complete"
        ]
    );
}

#[test]
fn test_chunk_boundaries_do_not_matter() {
    let xml = r#"<?xml version="1.0" encoding="UTF-8"?><s:stream xmlns:s="urn:s" xmlns="jabber:client"><message to='a&amp;b'><body>x &lt; y</body></message><!-- ping --><iq/></s:stream>"#;
    let whole = decode_chunks(&[xml]);
    for i in 1..xml.len() {
        let (head, tail) = xml.split_at(i);
        assert_eq!(decode_chunks(&[head, tail]), whole, "split at {}", i);
    }
    assert_eq!(
        whole.iter().filter(|e| e.starts_with("node ")).count(),
        4
    );
}

#[test]
fn test_unbound_prefix_fallback() {
    let events = decode_chunks(&["<foo:bar/>"]);
    assert_eq!(events[1], "node {foo}bar ");
}

#[test]
fn test_xml_prefix_is_bound() {
    let node = decode_str(r#"<a xml:lang="en"/>"#).unwrap();
    let lang = node.attribute("lang", XML_NAMESPACE).unwrap();
    assert_eq!(lang.value(), Some("en"));
    assert_eq!(lang.prefix(), Some("xml"));
}

#[test]
fn test_default_namespace_reset() {
    let node = decode_str(r#"<a xmlns="urn:a"><b xmlns=""><c/></b></a>"#).unwrap();
    let b = node.elements("b", "").next().unwrap();
    assert_eq!(b.elements("c", "").count(), 1);
}

#[test]
fn test_unprefixed_attribute_takes_default_namespace() {
    let node = decode_str(r#"<a xmlns="urn:a" id="1"/>"#).unwrap();
    assert_eq!(node.attribute("id", "urn:a").and_then(Node::value), Some("1"));
    assert!(node.attribute("id", "").is_none());
}

#[test]
fn test_named_accessors_from_decoded_children() {
    let node = decode_str("<list><item>1</item><item>2</item><other/></list>").unwrap();
    match node.get("item") {
        Some(Property::Elements(items)) => {
            let texts: Vec<_> = items.iter().map(|i| i.text().unwrap_or_default()).collect();
            assert_eq!(texts, ["1", "2"]);
        }
        other => panic!("unexpected {:?}", other),
    }
    assert!(node.has_property("other"));
}

#[derive(Debug)]
struct Message;

impl ObjectType for Message {
    fn local_name(&self) -> &str {
        "message"
    }

    fn namespace(&self) -> &str {
        "jabber:client"
    }

    fn create(&self) -> Node {
        let mut node = Node::new_element("message", "jabber:client");
        node.define_elements(&["body"], None, None);
        node.define_attributes(&["to", "from"], None, None);
        node
    }

    fn complete(&self, node: &mut Node) -> bool {
        node.elements("body", "jabber:client").next().is_some()
    }
}

#[test]
fn test_registered_type_and_completion_hook() {
    let mut decoder = Decoder::new(Recorder::default());
    decoder.register(Message);
    decoder
        .write(r#"<stream xmlns="jabber:client"><message to="juliet"><body>hi</body></message><message/></stream>"#)
        .unwrap();
    decoder.end(None).unwrap();
    let events = decoder.into_handler().0;
    let messages: Vec<_> = events
        .iter()
        .filter(|e| e.starts_with("node {jabber:client}message"))
        .collect();
    // the message without a body is rejected by the hook
    assert_eq!(messages.len(), 1);
    assert_eq!(events.iter().filter(|e| *e == "nodeOpen message").count(), 2);
}

#[test]
fn test_registered_node_keeps_declared_properties() {
    struct Keep(Vec<Node>);

    impl DecodeHandler for Keep {
        fn node(&mut self, node: Node, depth: usize) -> Option<Node> {
            if depth == 1 {
                self.0.push(node);
                return None;
            }
            Some(node)
        }
    }

    let mut registry = Registry::new();
    registry.register(Message);
    let mut decoder = Decoder::new(Keep(Vec::new())).with_registry(registry);
    decoder
        .write(r#"<stream xmlns="jabber:client"><message to="juliet" from="romeo"><body>hi</body></message></stream>"#)
        .unwrap();
    decoder.end(None).unwrap();
    let stanzas = decoder.into_handler().0;
    let message = &stanzas[0];
    assert!(matches!(message.kind(), NodeKind::Registered(_)));
    assert_eq!(message.prefix(), Some(""));
    assert_eq!(message.get("to"), Some(Property::Attribute(Some("juliet"))));
    assert_eq!(message.get("from"), Some(Property::Attribute(Some("romeo"))));
    assert_eq!(message.attributes().len(), 2);
}
