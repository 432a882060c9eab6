use std::cell::Cell;
use std::collections::VecDeque;
use std::rc::Rc;

use encoding_rs::{DecoderResult, UTF_8};
use tracing::{debug, trace, trace_span, Span};

use crate::dispatch::{DispatchHandler, Dispatcher};
use crate::encoding::{announced_charset, require_utf8};
use crate::error::Error;
use crate::node::{Content, Node};
use crate::registry::{ObjectType, Registry};
use crate::tokenizer::Tokenizer;

/// Receiver of decoder events.
///
/// All methods have no-op defaults.
pub trait DecodeHandler {
    /// An element was opened. Its attributes and content are not known yet.
    fn node_open(&mut self, _node: &Node) {}

    /// Text was appended to an open element.
    fn node_text(&mut self, _node: &Node) {}

    /// An element is complete.
    ///
    /// `depth` is the number of elements still open around it, so the root
    /// is reported at depth 0. Return the node to keep it in its parent's
    /// children, or `None` to take it out of the tree.
    fn node(&mut self, node: Node, _depth: usize) -> Option<Node> {
        Some(node)
    }

    /// The root element closed. `root` is `None` if [`DecodeHandler::node`]
    /// took it.
    fn complete(&mut self, _root: Option<Node>) {}

    /// A fatal error. Called at most once per decoder.
    fn error(&mut self, _error: &Error) {}

    /// The decoder shut down and will not report anything else.
    fn close(&mut self) {}
}

impl DecodeHandler for () {}

/// Decoder parameters.
#[derive(Debug, Clone)]
pub struct DecodeParameters {
    /// Trim leading and trailing whitespace of text content.
    ///
    /// Whitespace-only text between elements is dropped either way.
    pub trim_whitespace: bool,
}

impl Default for DecodeParameters {
    fn default() -> Self {
        DecodeParameters {
            trim_whitespace: true,
        }
    }
}

/// Requests a pause from inside a [`DecodeHandler`] callback.
///
/// The decoder is borrowed while it runs a callback, so it cannot be
/// paused directly. The request takes effect once the chunk being
/// tokenized is done.
#[derive(Debug, Clone, Default)]
pub struct PauseHandle(Rc<Cell<bool>>);

impl PauseHandle {
    pub fn pause(&self) {
        self.0.set(true);
    }

    fn take(&self) -> bool {
        self.0.replace(false)
    }
}

#[derive(Debug)]
enum Building {
    Element(Node),
    // attribute nodes are only made once their value is known
    Attribute {
        local_name: String,
        namespace: String,
        prefix: String,
        seen_text: bool,
    },
}

/// Builds nodes from dispatcher events.
#[derive(Debug)]
pub(crate) struct TreeBuilder<H> {
    handler: H,
    registry: Registry,
    stack: Vec<Building>,
}

impl<H: DecodeHandler> TreeBuilder<H> {
    fn new(handler: H) -> Self {
        TreeBuilder {
            handler,
            registry: Registry::new(),
            stack: Vec::new(),
        }
    }
}

impl<H: DecodeHandler> DispatchHandler for TreeBuilder<H> {
    fn element_open(
        &mut self,
        local_name: &str,
        namespace: &str,
        prefix: &str,
        is_attribute: bool,
    ) {
        if is_attribute {
            self.stack.push(Building::Attribute {
                local_name: local_name.to_string(),
                namespace: namespace.to_string(),
                prefix: prefix.to_string(),
                seen_text: false,
            });
            return;
        }
        let node = self.registry.create(local_name, namespace, prefix);
        self.handler.node_open(&node);
        self.stack.push(Building::Element(node));
    }

    fn text(&mut self, value: &str) {
        match self.stack.as_mut_slice() {
            [.., Building::Element(owner), Building::Attribute {
                local_name,
                namespace,
                prefix,
                seen_text,
            }] => {
                *seen_text = true;
                owner
                    .define_attribute(
                        local_name.as_str(),
                        Some(namespace.as_str()),
                        Some(prefix.as_str()),
                    )
                    .set_value(value);
            }
            [.., Building::Element(node)] => {
                node.children_mut().push(Content::Text(value.to_string()));
                self.handler.node_text(node);
            }
            _ => {}
        }
    }

    fn element_close(&mut self) {
        match self.stack.pop() {
            Some(Building::Attribute {
                local_name,
                namespace,
                prefix,
                seen_text: false,
            }) => {
                if let Some(Building::Element(owner)) = self.stack.last_mut() {
                    owner.define_attribute(
                        &local_name,
                        Some(namespace.as_str()),
                        Some(prefix.as_str()),
                    );
                }
            }
            Some(Building::Attribute { .. }) | None => {}
            Some(Building::Element(mut node)) => {
                let depth = self.stack.len();
                let kept = if node.complete() {
                    self.handler.node(node, depth)
                } else {
                    Some(node)
                };
                match self.stack.last_mut() {
                    Some(Building::Element(parent)) => {
                        if let Some(node) = kept {
                            parent.push_element(node);
                        }
                    }
                    Some(Building::Attribute { .. }) => {}
                    None => self.handler.complete(kept),
                }
            }
        }
    }
}

#[derive(Debug)]
enum Chunk {
    Text(String),
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Open,
    // end() was called; queued input is still processed
    Ending,
    Failed,
    Closed,
}

/// Streaming XML decoder.
///
/// Input is written in chunks of any size. Events are delivered to the
/// [`DecodeHandler`] as soon as the markup that causes them is complete.
///
/// ```rust
/// use xostream::{DecodeHandler, Decoder, Node};
///
/// #[derive(Default)]
/// struct Bodies(Vec<String>);
///
/// impl DecodeHandler for Bodies {
///     fn node(&mut self, node: Node, _depth: usize) -> Option<Node> {
///         if node.local_name() == "body" {
///             self.0.push(node.text().unwrap_or_default().into_owned());
///         }
///         Some(node)
///     }
/// }
///
/// let mut decoder = Decoder::new(Bodies::default());
/// decoder.write(r#"<msg xmlns="ns1"><bo"#)?;
/// decoder.write("dy>hi</body></msg>")?;
/// decoder.end(None)?;
/// assert_eq!(decoder.handler().0, ["hi"]);
/// # Ok::<(), xostream::Error>(())
/// ```
pub struct Decoder<H: DecodeHandler> {
    tokenizer: Tokenizer,
    dispatcher: Dispatcher<TreeBuilder<H>>,
    queue: VecDeque<Chunk>,
    paused: bool,
    pause_handle: PauseHandle,
    state: State,
    utf8: Option<encoding_rs::Decoder>,
    span: Span,
}

impl<H: DecodeHandler> Decoder<H> {
    pub fn new(handler: H) -> Self {
        Self::with_parameters(handler, DecodeParameters::default())
    }

    pub fn with_parameters(handler: H, parameters: DecodeParameters) -> Self {
        let mut dispatcher = Dispatcher::new(TreeBuilder::new(handler));
        if !parameters.trim_whitespace {
            dispatcher = dispatcher.keep_whitespace();
        }
        Decoder {
            tokenizer: Tokenizer::new(),
            dispatcher,
            queue: VecDeque::new(),
            paused: false,
            pause_handle: PauseHandle::default(),
            state: State::Open,
            utf8: None,
            span: trace_span!("decoder"),
        }
    }

    /// Use these object types instead of the current registry.
    pub fn with_registry(mut self, registry: Registry) -> Self {
        self.dispatcher.handler_mut().registry = registry;
        self
    }

    /// Log under `span` instead of the default `decoder` span.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Register an object type for elements decoded from now on.
    pub fn register<T: ObjectType + 'static>(&mut self, object_type: T) {
        self.dispatcher.handler_mut().registry.register(object_type);
    }

    pub fn handler(&self) -> &H {
        &self.dispatcher.handler().handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.dispatcher.handler_mut().handler
    }

    pub fn into_handler(self) -> H {
        self.dispatcher.into_handler().handler
    }

    /// A handle a [`DecodeHandler`] can keep to pause this decoder.
    pub fn pause_handle(&self) -> PauseHandle {
        self.pause_handle.clone()
    }

    /// Only UTF-8 is supported; any other label is rejected.
    pub fn set_encoding(&self, label: &str) -> Result<(), Error> {
        require_utf8(label)
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Number of elements currently open.
    pub fn depth(&self) -> usize {
        self.tokenizer.depth()
    }

    /// Decode a chunk of text.
    ///
    /// Returns `Ok(true)` if all input written so far has been processed,
    /// `Ok(false)` if some of it is queued because the decoder is paused.
    pub fn write(&mut self, chunk: &str) -> Result<bool, Error> {
        self.check_open()?;
        self.queue.push_back(Chunk::Text(chunk.to_string()));
        self.flush()
    }

    /// Decode a chunk of UTF-8 bytes.
    ///
    /// A multi-byte sequence may be split across chunks. The charset of the
    /// first chunk is sniffed and must be UTF-8.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<bool, Error> {
        self.check_open()?;
        let text = self.decode_bytes(bytes, false)?;
        self.write(&text)
    }

    /// Decode an optional last chunk and finish the document.
    ///
    /// Reports an error if elements are left open or markup is cut off.
    /// The handler's `close` is called once the remaining input is done.
    pub fn end(&mut self, chunk: Option<&str>) -> Result<(), Error> {
        self.check_open()?;
        let mut rest = String::new();
        if self.utf8.is_some() {
            rest = self.decode_bytes(&[], true)?;
        }
        if let Some(chunk) = chunk {
            rest.push_str(chunk);
        }
        if !rest.is_empty() {
            self.queue.push_back(Chunk::Text(rest));
        }
        self.queue.push_back(Chunk::End);
        self.state = State::Ending;
        self.flush().map(|_| ())
    }

    /// Stop tokenizing. Chunks written while paused are queued.
    pub fn pause(&mut self) {
        if !self.paused {
            trace!(parent: &self.span, "pause");
        }
        self.paused = true;
    }

    /// Process queued chunks in order until the queue is empty or a pause
    /// is requested again.
    pub fn resume(&mut self) -> Result<bool, Error> {
        match self.state {
            State::Open | State::Ending => {}
            State::Failed | State::Closed => return Err(Error::Closed),
        }
        trace!(parent: &self.span, queued = self.queue.len(), "resume");
        self.paused = false;
        self.pause_handle.take();
        self.flush()
    }

    /// Shut the decoder down immediately, discarding queued input.
    pub fn destroy(&mut self) {
        if matches!(self.state, State::Open | State::Ending) {
            trace!(parent: &self.span, "destroy");
            self.shutdown();
        }
    }

    fn check_open(&self) -> Result<(), Error> {
        match self.state {
            State::Open => Ok(()),
            _ => Err(Error::Closed),
        }
    }

    fn flush(&mut self) -> Result<bool, Error> {
        while !self.paused {
            let Some(chunk) = self.queue.pop_front() else {
                break;
            };
            let result = match chunk {
                Chunk::Text(text) => {
                    trace!(parent: &self.span, chunk = %text, "decode");
                    self.tokenizer.feed(&text, &mut self.dispatcher)
                }
                Chunk::End => {
                    let result = self.tokenizer.finish(&mut self.dispatcher);
                    if result.is_ok() {
                        self.shutdown();
                    }
                    result
                }
            };
            if let Err(error) = result {
                return Err(self.fail(error));
            }
            if self.pause_handle.take() {
                self.pause();
            }
        }
        Ok(self.queue.is_empty())
    }

    fn fail(&mut self, error: Error) -> Error {
        debug!(parent: &self.span, %error, "decode failed");
        self.dispatcher.fail();
        self.queue.clear();
        self.state = State::Failed;
        let builder = self.dispatcher.handler_mut();
        builder.handler.error(&error);
        builder.handler.close();
        error
    }

    fn shutdown(&mut self) {
        self.state = State::Closed;
        self.queue.clear();
        self.dispatcher.handler_mut().handler.close();
    }

    fn decode_bytes(&mut self, mut bytes: &[u8], last: bool) -> Result<String, Error> {
        if self.utf8.is_none() {
            if let Some(encoding) = announced_charset(bytes) {
                if encoding != UTF_8 {
                    let error = Error::UnsupportedEncoding(encoding.name().to_string());
                    return Err(self.fail(error));
                }
            }
        }
        let decoder = self.utf8.get_or_insert_with(|| UTF_8.new_decoder());
        let mut text = String::new();
        loop {
            if let Some(needed) = decoder.max_utf8_buffer_length_without_replacement(bytes.len()) {
                text.reserve(needed);
            }
            let (result, read) =
                decoder.decode_to_string_without_replacement(bytes, &mut text, last);
            match result {
                DecoderResult::InputEmpty => return Ok(text),
                DecoderResult::OutputFull => {
                    bytes = &bytes[read..];
                    text.reserve(bytes.len().max(4));
                }
                DecoderResult::Malformed(..) => {
                    let error = Error::MalformedInput("invalid UTF-8 sequence".to_string());
                    return Err(self.fail(error));
                }
            }
        }
    }
}

#[derive(Debug, Default)]
struct KeepRoot(Option<Node>);

impl DecodeHandler for KeepRoot {
    fn complete(&mut self, root: Option<Node>) {
        self.0 = root;
    }
}

/// Decode a complete document into its root node.
pub fn decode_str(xml: &str) -> Result<Node, Error> {
    let mut decoder = Decoder::new(KeepRoot::default());
    decoder.write(xml)?;
    decoder.end(None)?;
    decoder
        .into_handler()
        .0
        .ok_or(Error::UnexpectedEndOfInput)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct Log(Vec<String>);

    impl DecodeHandler for Log {
        fn node_open(&mut self, node: &Node) {
            self.0.push(format!("open {}", node.local_name()));
        }

        fn node_text(&mut self, node: &Node) {
            self.0.push(format!("text {}", node.local_name()));
        }

        fn node(&mut self, node: Node, depth: usize) -> Option<Node> {
            self.0.push(format!("node {} {}", node.local_name(), depth));
            Some(node)
        }

        fn complete(&mut self, root: Option<Node>) {
            let name = root.as_ref().map_or("-", |root| root.local_name());
            self.0.push(format!("complete {}", name));
        }

        fn error(&mut self, _error: &Error) {
            self.0.push("error".to_string());
        }

        fn close(&mut self) {
            self.0.push("close".to_string());
        }
    }

    #[test]
    fn test_event_order() {
        let mut decoder = Decoder::new(Log::default());
        decoder
            .write(r#"<msg xmlns="ns1" id="7"><body>hi</body></msg>"#)
            .unwrap();
        decoder.end(None).unwrap();
        assert_eq!(
            decoder.handler().0,
            [
                "open msg",
                "open body",
                "text body",
                "node body 1",
                "node msg 0",
                "complete msg",
                "close"
            ]
        );
    }

    #[test]
    fn test_attribute_values() {
        let root = decode_str(r#"<a xmlns:x="urn:x" x:id="1" empty=""/>"#).unwrap();
        assert_eq!(root.attribute("id", "urn:x").and_then(Node::value), Some("1"));
        assert_eq!(root.attribute("empty", "").and_then(Node::value), Some(""));
        assert_eq!(root.attributes()[0].prefix(), Some("x"));
    }

    #[test]
    fn test_children_keep_order() {
        let root = decode_str("<p>one<b>two</b>three</p>").unwrap();
        let shape: Vec<String> = root
            .children()
            .iter()
            .map(|child| match child {
                Content::Element(node) => format!("<{}>", node.local_name()),
                Content::Text(text) => text.clone(),
                Content::Empty => String::new(),
            })
            .collect();
        assert_eq!(shape, ["one", "<b>", "three"]);
        assert!(root.has_property("b"));
    }

    #[test]
    fn test_detach_completed_nodes() {
        #[derive(Default)]
        struct Stanzas {
            taken: Vec<Node>,
            root: Option<Node>,
        }

        impl DecodeHandler for Stanzas {
            fn node(&mut self, node: Node, depth: usize) -> Option<Node> {
                if depth == 1 {
                    self.taken.push(node);
                    None
                } else {
                    Some(node)
                }
            }

            fn complete(&mut self, root: Option<Node>) {
                self.root = root;
            }
        }

        let mut decoder = Decoder::new(Stanzas::default());
        decoder
            .write("<stream><iq><query/></iq><message/></stream>")
            .unwrap();
        decoder.end(None).unwrap();
        let stanzas = decoder.into_handler();
        assert_eq!(stanzas.taken.len(), 2);
        assert_eq!(stanzas.taken[0].children().len(), 1);
        assert!(stanzas.root.unwrap().children().is_empty());
    }

    #[test]
    fn test_error_is_reported_once() {
        let mut decoder = Decoder::new(Log::default());
        assert!(decoder.write("<a><b></a>").is_err());
        assert!(matches!(decoder.write("<c/>"), Err(Error::Closed)));
        assert!(matches!(decoder.end(None), Err(Error::Closed)));
        decoder.destroy();
        assert_eq!(decoder.handler().0, ["open a", "open b", "error", "close"]);
    }

    #[test]
    fn test_pause_queues_chunks() {
        let mut decoder = Decoder::new(Log::default());
        decoder.pause();
        assert!(!decoder.write("<a>").unwrap());
        assert!(!decoder.write("<b/>").unwrap());
        assert!(decoder.handler().0.is_empty());
        assert!(decoder.resume().unwrap());
        assert_eq!(decoder.handler().0, ["open a", "open b", "node b 1"]);
    }

    #[test]
    fn test_pause_from_handler_takes_effect_after_chunk() {
        struct Pauser {
            handle: PauseHandle,
            nodes: usize,
        }

        impl DecodeHandler for Pauser {
            fn node(&mut self, node: Node, _depth: usize) -> Option<Node> {
                self.nodes += 1;
                self.handle.pause();
                Some(node)
            }
        }

        let mut decoder = Decoder::new(Pauser {
            handle: PauseHandle::default(),
            nodes: 0,
        });
        let handle = decoder.pause_handle();
        decoder.handler_mut().handle = handle;
        decoder.write("<a><b/><c/>").unwrap();
        // both nodes of the first chunk are reported
        assert_eq!(decoder.handler().nodes, 2);
        assert!(decoder.is_paused());
        assert!(!decoder.write("<d/>").unwrap());
        assert_eq!(decoder.handler().nodes, 2);
        decoder.resume().unwrap();
        assert_eq!(decoder.handler().nodes, 3);
    }

    #[test]
    fn test_end_while_paused_finishes_on_resume() {
        let mut decoder = Decoder::new(Log::default());
        decoder.write("<a>").unwrap();
        decoder.pause();
        decoder.end(Some("</a>")).unwrap();
        assert_eq!(decoder.handler().0, ["open a"]);
        decoder.resume().unwrap();
        assert_eq!(
            decoder.handler().0,
            ["open a", "node a 0", "complete a", "close"]
        );
        assert!(matches!(decoder.resume(), Err(Error::Closed)));
    }

    #[test]
    fn test_write_bytes_split_code_point() {
        let bytes = "<a>é</a>".as_bytes();
        let mut decoder = Decoder::new(());
        // split inside the two-byte sequence
        decoder.write_bytes(&bytes[..4]).unwrap();
        decoder.write_bytes(&bytes[4..]).unwrap();
        decoder.end(None).unwrap();
    }

    #[test]
    fn test_write_bytes_rejects_latin1() {
        let mut decoder = Decoder::new(Log::default());
        let err = decoder
            .write_bytes(b"<?xml version=\"1.0\" encoding=\"iso-8859-1\"?><a/>")
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedEncoding(_)));
        assert_eq!(decoder.handler().0, ["error", "close"]);
    }

    #[test]
    fn test_set_encoding() {
        let decoder = Decoder::new(());
        assert!(decoder.set_encoding("utf8").is_ok());
        assert!(matches!(
            decoder.set_encoding("utf-16"),
            Err(Error::UnsupportedEncoding(_))
        ));
    }

    #[test]
    fn test_keep_whitespace() {
        let xml = "<a> x <b>\n</b></a>";
        let mut decoder = Decoder::with_parameters(
            KeepRoot::default(),
            DecodeParameters {
                trim_whitespace: false,
            },
        );
        decoder.write(xml).unwrap();
        decoder.end(None).unwrap();
        let kept = decoder.into_handler().0.unwrap();
        assert_eq!(kept.text().as_deref(), Some(" x "));
        // whitespace-only text is dropped either way
        assert_eq!(kept.elements("b", "").next().unwrap().text(), None);
        let trimmed = decode_str(xml).unwrap();
        assert_eq!(trimmed.text().as_deref(), Some("x"));
    }

    #[test]
    fn test_decode_str_without_root() {
        assert!(matches!(decode_str(""), Err(Error::UnexpectedEndOfInput)));
    }
}
