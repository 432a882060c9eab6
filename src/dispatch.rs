use crate::namespace::{split_qname, ScopeStack};
use crate::tokenizer::TokenSink;

/// Receiver of namespace-resolved events.
pub trait DispatchHandler {
    /// An element, or an attribute when `is_attribute` is set, was opened.
    fn element_open(&mut self, local_name: &str, namespace: &str, prefix: &str, is_attribute: bool);
    /// Text content of the innermost open element or attribute.
    fn text(&mut self, value: &str);
    /// The innermost open element or attribute was closed.
    fn element_close(&mut self);
}

/// Turns raw tokenizer events into namespace-qualified ones.
///
/// Every element gets a scope frame for its `xmlns` declarations, which
/// are removed from the attribute set. Each remaining attribute is emitted
/// as its own open, text and close triple right after its element opens.
#[derive(Debug)]
pub struct Dispatcher<H> {
    scopes: ScopeStack,
    handler: H,
    trim_whitespace: bool,
    failed: bool,
}

impl<H: DispatchHandler> Dispatcher<H> {
    pub fn new(handler: H) -> Self {
        Dispatcher {
            scopes: ScopeStack::new(),
            handler,
            trim_whitespace: true,
            failed: false,
        }
    }

    /// Keep surrounding whitespace of text content.
    ///
    /// Whitespace-only text is still dropped.
    pub fn keep_whitespace(mut self) -> Self {
        self.trim_whitespace = false;
        self
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    pub fn into_handler(self) -> H {
        self.handler
    }

    /// Number of open scope frames.
    pub fn depth(&self) -> usize {
        self.scopes.depth()
    }

    /// Mark the dispatcher unusable; later events are ignored.
    pub fn fail(&mut self) {
        self.failed = true;
    }

    pub fn is_failed(&self) -> bool {
        self.failed
    }

    pub fn open(&mut self, qname: &str, attributes: Vec<(String, String)>) {
        if self.failed {
            return;
        }
        let frame = self.scopes.push();
        let mut remaining = Vec::with_capacity(attributes.len());
        for (name, value) in attributes {
            if name == "xmlns" {
                frame.bind("", &value);
            } else if let Some(prefix) = name.strip_prefix("xmlns:") {
                frame.bind(prefix, &value);
            } else {
                remaining.push((name, value));
            }
        }

        self.emit_open(qname, false);
        for (name, value) in remaining {
            self.emit_open(&name, true);
            self.handler.text(&value);
            self.handler.element_close();
        }
    }

    pub fn close(&mut self, _qname: &str) {
        if self.failed {
            return;
        }
        self.handler.element_close();
        self.scopes.pop();
    }

    pub fn text(&mut self, chars: &str) {
        if self.failed {
            return;
        }
        let value = if self.trim_whitespace {
            chars.trim()
        } else if chars.trim().is_empty() {
            ""
        } else {
            chars
        };
        if !value.is_empty() {
            self.handler.text(value);
        }
    }

    fn emit_open(&mut self, qname: &str, is_attribute: bool) {
        let (prefix, local_name) = split_qname(qname);
        let namespace = if prefix.is_empty() {
            self.scopes.default_namespace()
        } else {
            self.scopes.resolve(prefix)
        };
        self.handler
            .element_open(local_name, namespace, prefix, is_attribute);
    }
}

impl<H: DispatchHandler> TokenSink for Dispatcher<H> {
    fn start_element(&mut self, qname: &str, attributes: Vec<(String, String)>) {
        self.open(qname, attributes);
    }

    fn end_element(&mut self, qname: &str) {
        self.close(qname);
    }

    fn text(&mut self, chars: &str) {
        Dispatcher::text(self, chars);
    }
}
