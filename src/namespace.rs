/// The namespace bound to the reserved `xml` prefix.
pub const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";

/// Prefix to namespace URI bindings declared on one element.
///
/// The empty prefix holds the default namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeFrame {
    bindings: Vec<(String, String)>,
}

impl ScopeFrame {
    /// A frame that inherits only the parent's default namespace.
    pub fn inherit(parent: Option<&ScopeFrame>) -> Self {
        let mut frame = ScopeFrame::default();
        if let Some(default) = parent.and_then(|p| p.get("")) {
            frame.bind("", default);
        }
        frame
    }

    /// Bind `prefix` to `namespace`, replacing an earlier binding.
    pub fn bind(&mut self, prefix: &str, namespace: &str) {
        if let Some(entry) = self.bindings.iter_mut().find(|(p, _)| p == prefix) {
            entry.1 = namespace.to_string();
        } else {
            self.bindings
                .push((prefix.to_string(), namespace.to_string()));
        }
    }

    /// The namespace bound to `prefix` in this frame only.
    pub fn get(&self, prefix: &str) -> Option<&str> {
        self.bindings
            .iter()
            .find(|(p, _)| p == prefix)
            .map(|(_, ns)| ns.as_str())
    }

    /// The default namespace of this frame.
    pub fn default_namespace(&self) -> Option<&str> {
        self.get("")
    }
}

/// Stack of [`ScopeFrame`]s, one per open element.
#[derive(Debug, Clone, Default)]
pub struct ScopeStack {
    frames: Vec<ScopeFrame>,
}

impl ScopeStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a frame for a newly opened element and return it for
    /// declarations.
    pub fn push(&mut self) -> &mut ScopeFrame {
        let frame = ScopeFrame::inherit(self.frames.last());
        self.frames.push(frame);
        // just pushed
        let last = self.frames.len() - 1;
        &mut self.frames[last]
    }

    pub fn pop(&mut self) -> Option<ScopeFrame> {
        self.frames.pop()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// The default namespace in effect, or the empty string.
    pub fn default_namespace(&self) -> &str {
        self.frames
            .last()
            .and_then(ScopeFrame::default_namespace)
            .unwrap_or("")
    }

    /// Resolve `prefix` from the innermost frame outward.
    ///
    /// An unbound prefix resolves to the prefix string itself. This is a
    /// compatibility fallback for loose input, not namespace semantics.
    pub fn resolve<'a>(&'a self, prefix: &'a str) -> &'a str {
        self.frames
            .iter()
            .rev()
            .find_map(|frame| frame.get(prefix))
            .unwrap_or(if prefix == "xml" {
                XML_NAMESPACE
            } else {
                prefix
            })
    }
}

/// Split a qualified name into `(prefix, local_name)`.
///
/// A name without a colon has the empty prefix.
pub fn split_qname(qname: &str) -> (&str, &str) {
    qname.split_once(':').unwrap_or(("", qname))
}
