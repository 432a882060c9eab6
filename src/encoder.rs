use std::collections::VecDeque;
use std::mem;

use tracing::{debug, trace, trace_span, Span};

use crate::encoding::require_utf8;
use crate::entity::escape;
use crate::error::Error;
use crate::namespace::XML_NAMESPACE;
use crate::node::{NamespaceHint, Node};
use crate::walk::Walk;

/// The declaration written by [`Encoder::xml_decl`].
pub const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;

/// What a [`Sink`] wants after accepting a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Keep sending.
    Continue,
    /// Hold further chunks until [`Encoder::resume`].
    Pause,
}

/// Consumer of encoded output.
pub trait Sink {
    /// Accept a chunk of XML text.
    fn data(&mut self, chunk: &str) -> Flow;

    /// The document is complete.
    fn end(&mut self) {}

    /// The encoder shut down. Called once, after `end` if the document was
    /// completed.
    fn close(&mut self) {}
}

impl Sink for String {
    fn data(&mut self, chunk: &str) -> Flow {
        self.push_str(chunk);
        Flow::Continue
    }
}

impl Sink for Vec<String> {
    fn data(&mut self, chunk: &str) -> Flow {
        self.push(chunk.to_string());
        Flow::Continue
    }
}

/// Encoder parameters.
#[derive(Debug, Clone)]
pub struct EncodeParameters {
    /// Generated prefixes are this followed by a counter: `ns1`, `ns2`, ...
    pub prefix_base: String,
}

impl Default for EncodeParameters {
    fn default() -> Self {
        EncodeParameters {
            prefix_base: "ns".to_string(),
        }
    }
}

// opened, but not written until we know whether it has content
#[derive(Debug)]
struct Pending {
    local_name: String,
    namespace: String,
    prefix: Option<String>,
    is_attribute: bool,
    hints: Vec<NamespaceHint>,
}

#[derive(Debug)]
struct Written {
    qname: String,
    is_attribute: bool,
    // the start tag has not been closed with '>' yet
    empty: bool,
    // (prefix, namespace) declared on this element
    decls: Vec<(String, String)>,
}

/// The low-level writer behind [`Encoder`].
///
/// Elements are queued as pending until content, an attribute or a child
/// arrives, so an element that stays empty is written as `<x/>`.
#[derive(Debug)]
pub(crate) struct Writer<S> {
    sink: S,
    pending: Vec<Pending>,
    written: Vec<Written>,
    counter: usize,
    prefix_base: String,
    paused: bool,
    backlog: VecDeque<String>,
    span: Span,
}

impl<S: Sink> Writer<S> {
    pub(crate) fn new(sink: S, parameters: &EncodeParameters) -> Self {
        Writer {
            sink,
            pending: Vec::new(),
            written: Vec::new(),
            counter: 0,
            prefix_base: parameters.prefix_base.clone(),
            paused: false,
            backlog: VecDeque::new(),
            span: trace_span!("encoder"),
        }
    }

    pub(crate) fn into_sink(self) -> S {
        self.sink
    }

    pub(crate) fn start_element(
        &mut self,
        local_name: &str,
        namespace: &str,
        prefix: Option<&str>,
        is_attribute: bool,
    ) -> Result<(), Error> {
        match self.innermost() {
            // attributes hold text only
            Some((true, _)) => {
                let owner = self.innermost_name();
                return Err(Error::InvalidAttributeAssignment(owner));
            }
            Some((false, empty)) if is_attribute && !empty => {
                return Err(Error::MisplacedAttribute(local_name.to_string()));
            }
            None if is_attribute => {
                return Err(Error::MisplacedAttribute(local_name.to_string()));
            }
            _ => {}
        }
        self.pending.push(Pending {
            local_name: local_name.to_string(),
            namespace: namespace.to_string(),
            prefix: prefix.map(str::to_string),
            is_attribute,
            hints: Vec::new(),
        });
        Ok(())
    }

    pub(crate) fn hint_namespace(
        &mut self,
        namespace: &str,
        prefix: Option<&str>,
    ) -> Result<(), Error> {
        match self.pending.last_mut() {
            Some(pending) if !pending.is_attribute => {
                pending.hints.push(NamespaceHint {
                    namespace: namespace.to_string(),
                    prefix: prefix.map(str::to_string),
                });
                Ok(())
            }
            _ => Err(Error::NoOpenElement),
        }
    }

    pub(crate) fn text(&mut self, text: &str) -> Result<(), Error> {
        if self.innermost().is_none() {
            return Err(Error::NoOpenElement);
        }
        let mut out = self.flush_pending();
        if let Some(top) = self.written.last_mut() {
            if top.empty && !top.is_attribute {
                out.push('>');
            }
            top.empty = false;
        }
        out.push_str(&escape(text));
        self.data(out);
        Ok(())
    }

    pub(crate) fn end_element(&mut self) -> Result<(), Error> {
        let mut out = self.flush_pending();
        let Some(top) = self.written.pop() else {
            return Err(Error::NoOpenElement);
        };
        if top.is_attribute {
            out.push('"');
        } else if top.empty {
            out.push_str("/>");
        } else {
            out.push_str("</");
            out.push_str(&top.qname);
            out.push('>');
        }
        self.data(out);
        Ok(())
    }

    pub(crate) fn raw(&mut self, chunk: &str) {
        self.data(chunk.to_string());
    }

    /// Whether an element is open, pending or written.
    pub(crate) fn depth(&self) -> usize {
        self.pending.len() + self.written.len()
    }

    pub(crate) fn is_paused(&self) -> bool {
        self.paused
    }

    pub(crate) fn is_drained(&self) -> bool {
        self.backlog.is_empty()
    }

    pub(crate) fn pause(&mut self) {
        self.paused = true;
    }

    /// Hand backlogged chunks to the sink until it pauses again.
    pub(crate) fn resume(&mut self) {
        self.paused = false;
        while !self.paused {
            let Some(chunk) = self.backlog.pop_front() else {
                break;
            };
            self.send(&chunk);
        }
    }

    fn data(&mut self, chunk: String) {
        if chunk.is_empty() {
            return;
        }
        if self.paused {
            self.backlog.push_back(chunk);
        } else {
            self.send(&chunk);
        }
    }

    fn send(&mut self, chunk: &str) {
        trace!(parent: &self.span, chunk, "data");
        if self.sink.data(chunk) == Flow::Pause {
            trace!(parent: &self.span, "sink paused");
            self.paused = true;
        }
    }

    // (is_attribute, empty) of the innermost open element or attribute
    fn innermost(&self) -> Option<(bool, bool)> {
        match self.pending.last() {
            Some(pending) => Some((pending.is_attribute, true)),
            None => self.written.last().map(|w| (w.is_attribute, w.empty)),
        }
    }

    fn innermost_name(&self) -> String {
        match self.pending.last() {
            Some(pending) => pending.local_name.clone(),
            None => self
                .written
                .last()
                .map(|w| w.qname.clone())
                .unwrap_or_default(),
        }
    }

    // write the start of everything pending
    fn flush_pending(&mut self) -> String {
        let mut out = String::new();
        for pending in mem::take(&mut self.pending) {
            if pending.is_attribute {
                let (prefix, decl) =
                    self.resolve_attribute(&pending.namespace, pending.prefix.as_deref());
                let qname = qualify(&prefix, &pending.local_name);
                out.push_str(&decl);
                out.push(' ');
                out.push_str(&qname);
                out.push_str("=\"");
                self.written.push(Written {
                    qname,
                    is_attribute: true,
                    empty: true,
                    decls: Vec::new(),
                });
                continue;
            }
            if let Some(parent) = self.written.last_mut() {
                if parent.empty && !parent.is_attribute {
                    out.push('>');
                    parent.empty = false;
                }
            }
            self.written.push(Written {
                qname: String::new(),
                is_attribute: false,
                empty: true,
                decls: Vec::new(),
            });
            let mut decls = String::new();
            for hint in &pending.hints {
                decls.push_str(&self.apply_hint(hint, &pending.namespace));
            }
            let (prefix, decl) =
                self.resolve_element(&pending.namespace, pending.prefix.as_deref());
            decls.push_str(&decl);
            let qname = qualify(&prefix, &pending.local_name);
            out.push('<');
            out.push_str(&qname);
            out.push_str(&decls);
            if let Some(element) = self.written.last_mut() {
                element.qname = qname;
            }
        }
        out
    }

    // the namespace bound to `prefix` in the written elements
    fn bound(&self, prefix: &str) -> Option<&str> {
        if prefix == "xml" {
            return Some(XML_NAMESPACE);
        }
        self.written
            .iter()
            .rev()
            .flat_map(|w| w.decls.iter())
            .find(|(p, _)| p == prefix)
            .map(|(_, ns)| ns.as_str())
    }

    // a prefix in scope for `namespace` that no inner declaration shadows
    fn prefix_for(&self, namespace: &str) -> Option<String> {
        self.written
            .iter()
            .rev()
            .flat_map(|w| w.decls.iter())
            .find(|(p, ns)| ns == namespace && self.bound(p) == Some(namespace))
            .map(|(p, _)| p.clone())
    }

    fn declared_here(&self, prefix: &str) -> bool {
        self.written
            .last()
            .map_or(false, |w| w.decls.iter().any(|(p, _)| p == prefix))
    }

    fn fresh_prefix(&mut self) -> String {
        loop {
            self.counter += 1;
            let prefix = format!("{}{}", self.prefix_base, self.counter);
            if self.bound(&prefix).is_none() {
                return prefix;
            }
        }
    }

    // record a declaration on the innermost written element
    fn declare(&mut self, prefix: &str, namespace: &str) -> String {
        if let Some(element) = self.written.last_mut() {
            element
                .decls
                .push((prefix.to_string(), namespace.to_string()));
        }
        let value = escape(namespace);
        if prefix.is_empty() {
            format!(" xmlns=\"{}\"", value)
        } else {
            format!(" xmlns:{}=\"{}\"", prefix, value)
        }
    }

    fn usable(&self, prefix: &str) -> bool {
        prefix != "xml" && !prefix.starts_with("xmlns") && !self.declared_here(prefix)
    }

    fn apply_hint(&mut self, hint: &NamespaceHint, element_namespace: &str) -> String {
        if hint.namespace.is_empty()
            || hint.namespace == XML_NAMESPACE
            || self.prefix_for(&hint.namespace).is_some()
        {
            return String::new();
        }
        // the default namespace belongs to the element itself
        let prefix = match hint.prefix.as_deref() {
            Some("") if hint.namespace != element_namespace => self.fresh_prefix(),
            Some(prefix) if self.usable(prefix) => prefix.to_string(),
            _ => self.fresh_prefix(),
        };
        self.declare(&prefix, &hint.namespace)
    }

    fn resolve_element(&mut self, namespace: &str, preferred: Option<&str>) -> (String, String) {
        if namespace == XML_NAMESPACE {
            return ("xml".to_string(), String::new());
        }
        if namespace.is_empty() {
            let in_default = self.bound("").map_or(false, |ns| !ns.is_empty());
            let decl = if in_default {
                self.declare("", "")
            } else {
                String::new()
            };
            return (String::new(), decl);
        }
        if let Some(prefix) = preferred {
            if self.bound(prefix) == Some(namespace) {
                return (prefix.to_string(), String::new());
            }
        }
        if let Some(prefix) = self.prefix_for(namespace) {
            return (prefix, String::new());
        }
        let prefix = match preferred {
            Some(prefix) if self.usable(prefix) => prefix.to_string(),
            _ => self.fresh_prefix(),
        };
        let decl = self.declare(&prefix, namespace);
        (prefix, decl)
    }

    fn resolve_attribute(&mut self, namespace: &str, preferred: Option<&str>) -> (String, String) {
        if namespace.is_empty() {
            return (String::new(), String::new());
        }
        if namespace == XML_NAMESPACE {
            return ("xml".to_string(), String::new());
        }
        let preferred = preferred.filter(|prefix| !prefix.is_empty());
        if let Some(prefix) = preferred {
            if self.bound(prefix) == Some(namespace) {
                return (prefix.to_string(), String::new());
            }
        }
        // an unprefixed attribute takes its element's default namespace
        if let Some(prefix) = self.prefix_for(namespace) {
            return (prefix, String::new());
        }
        // never redeclare the default namespace: it would move the element
        let prefix = match preferred {
            Some(prefix) if self.usable(prefix) && self.bound(prefix).is_none() => {
                prefix.to_string()
            }
            _ => self.fresh_prefix(),
        };
        let decl = self.declare(&prefix, namespace);
        (prefix, decl)
    }
}

fn qualify(prefix: &str, local_name: &str) -> String {
    if prefix.is_empty() {
        local_name.to_string()
    } else {
        format!("{}:{}", prefix, local_name)
    }
}

// output waiting behind a suspended walk, replayed in order
#[derive(Debug)]
enum Job {
    Walk {
        root: Node,
        walk: Walk,
    },
    Declaration,
    Start {
        local_name: String,
        namespace: String,
        prefix: Option<String>,
        is_attribute: bool,
    },
    Hint {
        namespace: String,
        prefix: Option<String>,
    },
    Text(String),
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Open,
    // complete() was called; waiting for queued output to drain
    Completing,
    Closed,
}

/// Streaming XML encoder.
///
/// Structural calls ([`Encoder::start_element`], [`Encoder::text`],
/// [`Encoder::end_element`]) and node trees ([`Encoder::write`]) are turned
/// into chunks of text for a [`Sink`]. Namespace declarations are generated
/// as needed and reused by descendants.
///
/// When the sink returns [`Flow::Pause`], further chunks are held back in
/// order and node walks stop at the next node boundary. Calls made while a
/// walk is suspended are queued behind it. [`Encoder::resume`] continues
/// where output stopped, so the sink sees the same text as it would
/// without pausing.
///
/// ```rust
/// use xostream::{Encoder, Node};
///
/// let message = Node::new_element("message", "jabber:client")
///     .with_prefix("")
///     .with_child(Node::new_element("body", "jabber:client").with_text("hi"));
///
/// let mut encoder = Encoder::new(String::new());
/// encoder.write(&message)?;
/// assert_eq!(
///     encoder.sink(),
///     r#"<message xmlns="jabber:client"><body>hi</body></message>"#
/// );
/// # Ok::<(), xostream::Error>(())
/// ```
#[derive(Debug)]
pub struct Encoder<S: Sink> {
    writer: Writer<S>,
    jobs: VecDeque<Job>,
    state: State,
}

impl<S: Sink> Encoder<S> {
    pub fn new(sink: S) -> Self {
        Self::with_parameters(sink, EncodeParameters::default())
    }

    pub fn with_parameters(sink: S, parameters: EncodeParameters) -> Self {
        Encoder {
            writer: Writer::new(sink, &parameters),
            jobs: VecDeque::new(),
            state: State::Open,
        }
    }

    /// Log under `span` instead of the default `encoder` span.
    pub fn with_span(mut self, span: Span) -> Self {
        self.writer.span = span;
        self
    }

    pub fn sink(&self) -> &S {
        &self.writer.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.writer.sink
    }

    pub fn into_sink(self) -> S {
        self.writer.into_sink()
    }

    /// Only UTF-8 is supported; any other label is rejected.
    pub fn set_encoding(&self, label: &str) -> Result<(), Error> {
        require_utf8(label)
    }

    /// Number of chunks held back while paused.
    pub fn backlog_len(&self) -> usize {
        self.writer.backlog.len()
    }

    pub fn is_paused(&self) -> bool {
        self.writer.is_paused()
    }

    /// Whether all output so far has been handed to the sink.
    pub fn is_drained(&self) -> bool {
        self.jobs.is_empty() && self.writer.is_drained()
    }

    /// Number of elements opened and not yet ended, not counting calls
    /// queued behind a suspended walk.
    pub fn depth(&self) -> usize {
        self.writer.depth()
    }

    /// Write the XML declaration.
    pub fn xml_decl(&mut self) -> Result<(), Error> {
        self.direct(Job::Declaration)
    }

    /// Open an element, or an attribute of the innermost element.
    ///
    /// A `prefix` of `None` lets the encoder reuse a prefix in scope or
    /// generate one. Attributes must come before the element's content.
    pub fn start_element(
        &mut self,
        local_name: &str,
        namespace: &str,
        prefix: Option<&str>,
        is_attribute: bool,
    ) -> Result<(), Error> {
        self.direct(Job::Start {
            local_name: local_name.to_string(),
            namespace: namespace.to_string(),
            prefix: prefix.map(str::to_string),
            is_attribute,
        })
    }

    /// Ask for `namespace` to be declared on the element just started.
    pub fn hint_namespace(&mut self, namespace: &str, prefix: Option<&str>) -> Result<(), Error> {
        self.direct(Job::Hint {
            namespace: namespace.to_string(),
            prefix: prefix.map(str::to_string),
        })
    }

    /// Text of the innermost element, or the value of an attribute.
    pub fn text(&mut self, text: &str) -> Result<(), Error> {
        self.direct(Job::Text(text.to_string()))
    }

    /// Close the innermost element or attribute.
    pub fn end_element(&mut self) -> Result<(), Error> {
        self.direct(Job::End)
    }

    /// Stream a node tree.
    ///
    /// Returns `Ok(true)` if everything was handed to the sink. Otherwise
    /// the rest is written on [`Encoder::resume`], after anything queued
    /// earlier; the node is cloned if its walk has to wait. A walk that
    /// fails closes the encoder.
    pub fn write(&mut self, node: &Node) -> Result<bool, Error> {
        self.check_open()?;
        let mut walk = Walk::new();
        if self.jobs.is_empty() && self.start_walk(node, &mut walk)? {
            return Ok(self.writer.is_drained());
        }
        self.jobs.push_back(Job::Walk {
            root: node.clone(),
            walk,
        });
        Ok(false)
    }

    /// Stream a node tree the encoder may keep.
    pub fn write_owned(&mut self, node: Node) -> Result<bool, Error> {
        self.check_open()?;
        let mut walk = Walk::new();
        if self.jobs.is_empty() && self.start_walk(&node, &mut walk)? {
            return Ok(self.writer.is_drained());
        }
        self.jobs.push_back(Job::Walk { root: node, walk });
        Ok(false)
    }

    /// Write the declaration and `node`, then complete the stream.
    pub fn write_document(&mut self, node: &Node) -> Result<(), Error> {
        self.xml_decl()?;
        self.write(node)?;
        self.complete()
    }

    /// Hold back output until [`Encoder::resume`].
    pub fn pause(&mut self) {
        trace!(parent: &self.writer.span, "pause");
        self.writer.pause();
    }

    /// Hand held-back output to the sink, then replay queued walks and
    /// calls, until everything is written or the sink pauses again.
    ///
    /// Returns whether everything was written. An error from a queued call
    /// closes the encoder.
    pub fn resume(&mut self) -> Result<bool, Error> {
        if self.state == State::Closed {
            return Err(Error::Closed);
        }
        trace!(parent: &self.writer.span, backlog = self.writer.backlog.len(), "resume");
        self.writer.resume();
        while !self.writer.is_paused() {
            let Some(mut job) = self.jobs.pop_front() else {
                break;
            };
            match self.replay(&mut job) {
                Ok(true) => {}
                Ok(false) => self.jobs.push_front(job),
                Err(error) => return Err(self.fail(error)),
            }
        }
        self.try_finish();
        Ok(self.is_drained())
    }

    /// Finish the stream. No further writes are accepted.
    ///
    /// The sink's `end` and `close` are called once queued output has been
    /// written, which may be on a later [`Encoder::resume`].
    pub fn complete(&mut self) -> Result<(), Error> {
        self.check_open()?;
        self.state = State::Completing;
        self.try_finish();
        Ok(())
    }

    /// Shut the encoder down immediately, discarding queued output.
    pub fn destroy(&mut self) {
        if self.state == State::Closed {
            return;
        }
        trace!(parent: &self.writer.span, "destroy");
        self.shutdown();
    }

    // apply a structural call now, or queue it behind a suspended walk
    fn direct(&mut self, mut job: Job) -> Result<(), Error> {
        self.check_open()?;
        if self.jobs.is_empty() {
            self.replay(&mut job).map(|_| ())
        } else {
            trace!(parent: &self.writer.span, queued = self.jobs.len(), "queue call");
            self.jobs.push_back(job);
            Ok(())
        }
    }

    // returns false if output paused before the job was done
    fn replay(&mut self, job: &mut Job) -> Result<bool, Error> {
        match job {
            Job::Walk { root, walk } => self.run(root, walk),
            Job::Declaration => {
                self.writer.raw(XML_DECLARATION);
                Ok(true)
            }
            Job::Start {
                local_name,
                namespace,
                prefix,
                is_attribute,
            } => {
                self.writer
                    .start_element(local_name, namespace, prefix.as_deref(), *is_attribute)?;
                Ok(true)
            }
            Job::Hint { namespace, prefix } => {
                self.writer.hint_namespace(namespace, prefix.as_deref())?;
                Ok(true)
            }
            Job::Text(text) => {
                self.writer.text(text)?;
                Ok(true)
            }
            Job::End => {
                self.writer.end_element()?;
                Ok(true)
            }
        }
    }

    fn start_walk(&mut self, root: &Node, walk: &mut Walk) -> Result<bool, Error> {
        self.run(root, walk).map_err(|error| self.fail(error))
    }

    // step a walk until it is done or output pauses
    fn run(&mut self, root: &Node, walk: &mut Walk) -> Result<bool, Error> {
        while !self.writer.is_paused() {
            if walk.step(root, &mut self.writer)? {
                return Ok(true);
            }
        }
        Ok(walk.is_done())
    }

    // a walk stopped halfway; the output so far cannot be continued
    fn fail(&mut self, error: Error) -> Error {
        debug!(parent: &self.writer.span, %error, "encode failed");
        if self.state != State::Closed {
            self.shutdown();
        }
        error
    }

    fn shutdown(&mut self) {
        self.state = State::Closed;
        self.jobs.clear();
        self.writer.backlog.clear();
        self.writer.sink.close();
    }

    fn try_finish(&mut self) {
        if self.state == State::Completing && self.is_drained() {
            self.state = State::Closed;
            self.writer.sink.end();
            self.writer.sink.close();
        }
    }

    fn check_open(&self) -> Result<(), Error> {
        match self.state {
            State::Open => Ok(()),
            _ => Err(Error::Closed),
        }
    }
}

/// Encode a node tree to a string.
pub fn encode_to_string(node: &Node) -> Result<String, Error> {
    let mut encoder = Encoder::new(String::new());
    encoder.write(node)?;
    Ok(encoder.into_sink())
}

impl Node {
    /// Serialize this node and its descendants.
    pub fn to_xml(&self) -> Result<String, Error> {
        encode_to_string(self)
    }
}
