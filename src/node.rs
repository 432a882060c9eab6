use std::borrow::Cow;
use std::fmt;
use std::rc::Rc;

use ahash::HashMap;

use crate::error::Error;
use crate::registry::ObjectType;

/// An entry in the children of an element.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Content {
    /// A child element.
    Element(Node),
    /// A text segment.
    Text(String),
    /// A placeholder that serializes to nothing.
    Empty,
}

impl From<Node> for Content {
    fn from(node: Node) -> Self {
        Content::Element(node)
    }
}

impl From<String> for Content {
    fn from(text: String) -> Self {
        Content::Text(text)
    }
}

impl From<&str> for Content {
    fn from(text: &str) -> Self {
        Content::Text(text.to_string())
    }
}

impl<T: Into<Content>> From<Option<T>> for Content {
    fn from(value: Option<T>) -> Self {
        value.map_or(Content::Empty, Into::into)
    }
}

/// A namespace an element wants declared on itself, so that descendants
/// in that namespace do not each declare it again.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NamespaceHint {
    /// The namespace URI.
    pub namespace: String,
    /// The preferred prefix; `None` lets the encoder generate one.
    pub prefix: Option<String>,
}

/// The value behind a named accessor, see [`Node::get`].
#[derive(Debug, Clone, PartialEq)]
pub enum Property<'a> {
    /// All child elements with the accessor's name and namespace, in order.
    Elements(Vec<&'a Node>),
    /// The value of the accessor's attribute, if it has one.
    Attribute(Option<&'a str>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Accessor {
    Elements {
        namespace: String,
        prefix: Option<String>,
    },
    Attribute {
        namespace: String,
    },
}

/// Whether a node was built by a registered [`ObjectType`].
#[derive(Clone, Default)]
pub enum NodeKind {
    /// A plain node.
    #[default]
    Generic,
    /// A node created by a registered object type.
    Registered(Rc<dyn ObjectType>),
}

impl fmt::Debug for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::Generic => write!(f, "Generic"),
            NodeKind::Registered(object_type) => write!(
                f,
                "Registered({{{}}}{})",
                object_type.namespace(),
                object_type.local_name()
            ),
        }
    }
}

/// An XML element or attribute.
///
/// Elements own an ordered list of [`Content`] and a list of attribute
/// nodes. Attributes hold a single optional value. A `prefix` of `None`
/// means the encoder picks one; `Some("")` asks for the default namespace.
///
/// Nodes keep a table of named accessors, one per child name seen or
/// declared, which [`Node::get`] and [`Node::set`] go through.
///
/// ```rust
/// use xostream::{Node, Property};
///
/// let mut message = Node::new_element("message", "jabber:client").with_prefix("");
/// message.define_elements(&["body"], None, None);
/// message.define_attribute("to", None, None);
///
/// message.set("body", "hello")?;
/// message.set("to", "juliet@example.com")?;
///
/// match message.get("body") {
///     Some(Property::Elements(bodies)) => {
///         assert_eq!(bodies[0].text().as_deref(), Some("hello"));
///     }
///     _ => unreachable!(),
/// }
/// assert_eq!(
///     message.get("to"),
///     Some(Property::Attribute(Some("juliet@example.com")))
/// );
/// # Ok::<(), xostream::Error>(())
/// ```
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Node {
    local_name: String,
    namespace: String,
    prefix: Option<String>,
    is_attribute: bool,
    children: Vec<Content>,
    value: Option<String>,
    attributes: Vec<Node>,
    namespace_hints: Vec<NamespaceHint>,
    #[cfg_attr(feature = "serde", serde(skip))]
    accessors: HashMap<String, Accessor>,
    #[cfg_attr(feature = "serde", serde(skip))]
    kind: NodeKind,
}

impl Node {
    pub fn new(
        local_name: impl Into<String>,
        namespace: impl Into<String>,
        prefix: Option<&str>,
        is_attribute: bool,
    ) -> Self {
        Node {
            local_name: local_name.into(),
            namespace: namespace.into(),
            prefix: prefix.map(str::to_string),
            is_attribute,
            children: Vec::new(),
            value: None,
            attributes: Vec::new(),
            namespace_hints: Vec::new(),
            accessors: HashMap::default(),
            kind: NodeKind::Generic,
        }
    }

    /// An element without a prefix preference.
    pub fn new_element(local_name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self::new(local_name, namespace, None, false)
    }

    /// A detached attribute without a prefix preference.
    pub fn new_attribute(local_name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self::new(local_name, namespace, None, true)
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Append text, or set the value of an attribute.
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        if self.is_attribute {
            self.value = Some(text.into());
        } else {
            self.children.push(Content::Text(text.into()));
        }
        self
    }

    /// Append a child element. An attribute node is set as an attribute
    /// instead.
    pub fn with_child(mut self, child: Node) -> Self {
        debug_assert!(!self.is_attribute, "attributes have no children");
        if child.is_attribute {
            self.set_attribute_node(child);
        } else {
            self.push_element(child);
        }
        self
    }

    /// Set an attribute in this element's namespace, defining it if needed.
    pub fn with_attribute(mut self, name: &str, value: impl Into<String>) -> Self {
        self.define_attribute(name, None, None).value = Some(value.into());
        self
    }

    pub fn local_name(&self) -> &str {
        &self.local_name
    }

    /// The namespace URI; empty if the node is in no namespace.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    pub fn set_prefix(&mut self, prefix: Option<String>) {
        self.prefix = prefix;
    }

    pub fn is_attribute(&self) -> bool {
        self.is_attribute
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub(crate) fn set_kind(&mut self, kind: NodeKind) {
        self.kind = kind;
    }

    pub fn children(&self) -> &[Content] {
        &self.children
    }

    pub fn children_mut(&mut self) -> &mut Vec<Content> {
        &mut self.children
    }

    pub fn attributes(&self) -> &[Node] {
        &self.attributes
    }

    pub fn namespace_hints(&self) -> &[NamespaceHint] {
        &self.namespace_hints
    }

    /// Ask for `namespace` to be declared on this element.
    ///
    /// A later hint for the same namespace replaces the prefix.
    pub fn add_namespace_hint(&mut self, namespace: &str, prefix: Option<&str>) {
        let prefix = prefix.map(str::to_string);
        match self
            .namespace_hints
            .iter_mut()
            .find(|hint| hint.namespace == namespace)
        {
            Some(hint) => hint.prefix = prefix,
            None => self.namespace_hints.push(NamespaceHint {
                namespace: namespace.to_string(),
                prefix,
            }),
        }
    }

    /// The stored value of an attribute node.
    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    pub(crate) fn set_value(&mut self, value: impl Into<String>) {
        self.value = Some(value.into());
    }

    /// Text content.
    ///
    /// For an attribute this is its value. For an element it is the
    /// concatenation of its text children, or `None` if it has none.
    pub fn text(&self) -> Option<Cow<'_, str>> {
        if self.is_attribute {
            return self.value.as_deref().map(Cow::Borrowed);
        }
        let mut texts = self.children.iter().filter_map(|child| match child {
            Content::Text(text) => Some(text.as_str()),
            _ => None,
        });
        let first = texts.next()?;
        match texts.next() {
            None => Some(Cow::Borrowed(first)),
            Some(second) => {
                let mut joined = String::from(first);
                joined.push_str(second);
                texts.for_each(|text| joined.push_str(text));
                Some(Cow::Owned(joined))
            }
        }
    }

    /// Add content.
    ///
    /// Elements append it to their children; the first child element with
    /// a given name also declares an accessor for that name. Attribute
    /// nodes are rejected as children. Attributes replace their value with
    /// text, are cleared by [`Content::Empty`], and reject elements.
    pub fn push(&mut self, content: impl Into<Content>) -> Result<&mut Self, Error> {
        let content = content.into();
        if self.is_attribute {
            match content {
                Content::Element(_) => {
                    return Err(Error::InvalidAttributeAssignment(self.local_name.clone()))
                }
                Content::Text(text) => self.value = Some(text),
                Content::Empty => self.value = None,
            }
            return Ok(self);
        }
        match content {
            Content::Element(node) if node.is_attribute => {
                return Err(Error::AttributeAsChild(node.local_name))
            }
            Content::Element(node) => self.push_element(node),
            other => self.children.push(other),
        }
        Ok(self)
    }

    // replaces an attribute with the same name and namespace
    fn set_attribute_node(&mut self, attribute: Node) {
        match self.attribute_index(&attribute.local_name, &attribute.namespace) {
            Some(index) => self.attributes[index] = attribute,
            None => self.attributes.push(attribute),
        }
    }

    pub(crate) fn push_element(&mut self, node: Node) {
        if !self.accessors.contains_key(&node.local_name) {
            self.accessors.insert(
                node.local_name.clone(),
                Accessor::Elements {
                    namespace: node.namespace.clone(),
                    prefix: None,
                },
            );
        }
        self.children.push(Content::Element(node));
    }

    /// Declare element accessors for `names`.
    ///
    /// The namespace defaults to this node's namespace. A foreign namespace
    /// is also added as a namespace hint.
    pub fn define_elements(
        &mut self,
        names: &[&str],
        namespace: Option<&str>,
        prefix: Option<&str>,
    ) {
        let namespace = namespace.unwrap_or(&self.namespace).to_string();
        for name in names {
            self.accessors.insert(
                name.to_string(),
                Accessor::Elements {
                    namespace: namespace.clone(),
                    prefix: prefix.map(str::to_string),
                },
            );
        }
        if !namespace.is_empty() && namespace != self.namespace {
            self.add_namespace_hint(&namespace, prefix);
        }
    }

    /// Declare an attribute and its accessor, returning the attribute node.
    ///
    /// Namespace and prefix default to this node's. Attributes are unique by
    /// name and namespace: declaring an existing one returns it unchanged.
    pub fn define_attribute(
        &mut self,
        name: &str,
        namespace: Option<&str>,
        prefix: Option<&str>,
    ) -> &mut Node {
        let namespace = namespace.unwrap_or(&self.namespace).to_string();
        if !namespace.is_empty() && namespace != self.namespace {
            self.add_namespace_hint(&namespace, prefix);
        }
        let prefix = prefix.map(str::to_string).or_else(|| self.prefix.clone());
        self.accessors.insert(
            name.to_string(),
            Accessor::Attribute {
                namespace: namespace.clone(),
            },
        );
        let index = match self.attribute_index(name, &namespace) {
            Some(index) => index,
            None => {
                self.attributes
                    .push(Node::new(name, namespace, prefix.as_deref(), true));
                self.attributes.len() - 1
            }
        };
        &mut self.attributes[index]
    }

    /// Declare several attributes; returns the last one.
    pub fn define_attributes(
        &mut self,
        names: &[&str],
        namespace: Option<&str>,
        prefix: Option<&str>,
    ) -> Option<&mut Node> {
        let (last, init) = names.split_last()?;
        for name in init {
            self.define_attribute(name, namespace, prefix);
        }
        Some(self.define_attribute(last, namespace, prefix))
    }

    fn attribute_index(&self, name: &str, namespace: &str) -> Option<usize> {
        self.attributes
            .iter()
            .position(|a| a.local_name == name && a.namespace == namespace)
    }

    pub fn attribute(&self, name: &str, namespace: &str) -> Option<&Node> {
        self.attribute_index(name, namespace)
            .map(|index| &self.attributes[index])
    }

    pub fn attribute_mut(&mut self, name: &str, namespace: &str) -> Option<&mut Node> {
        self.attribute_index(name, namespace)
            .map(move |index| &mut self.attributes[index])
    }

    /// Child elements with this name and namespace, in document order.
    pub fn elements<'a>(
        &'a self,
        name: &'a str,
        namespace: &'a str,
    ) -> impl Iterator<Item = &'a Node> + 'a {
        self.children.iter().filter_map(move |child| match child {
            Content::Element(node) if node.local_name == name && node.namespace == namespace => {
                Some(node)
            }
            _ => None,
        })
    }

    /// Append a new child element that wraps `value`.
    ///
    /// Without a prefix the child takes this node's prefix.
    pub fn set_element(
        &mut self,
        name: &str,
        namespace: &str,
        prefix: Option<&str>,
        value: impl Into<Content>,
    ) -> Result<(), Error> {
        if self.is_attribute {
            return Err(Error::InvalidAttributeAssignment(self.local_name.clone()));
        }
        let prefix = prefix.or(self.prefix.as_deref());
        let mut child = Node::new(name, namespace, prefix, false);
        child.push(value)?;
        self.push_element(child);
        Ok(())
    }

    /// Whether an accessor is declared under `name`.
    pub fn has_property(&self, name: &str) -> bool {
        self.accessors.contains_key(name)
    }

    /// Read through the accessor declared under `name`.
    pub fn get(&self, name: &str) -> Option<Property<'_>> {
        let (name, accessor) = self.accessors.get_key_value(name)?;
        match accessor {
            Accessor::Elements { namespace, .. } => {
                Some(Property::Elements(self.elements(name, namespace).collect()))
            }
            Accessor::Attribute { namespace } => Some(Property::Attribute(
                self.attribute(name, namespace).and_then(Node::value),
            )),
        }
    }

    /// Write through the accessor declared under `name`.
    ///
    /// Element accessors append a new child wrapping `value`; attribute
    /// accessors set the attribute's value.
    pub fn set(&mut self, name: &str, value: impl Into<Content>) -> Result<(), Error> {
        match self.accessors.get(name).cloned() {
            Some(Accessor::Elements { namespace, prefix }) => {
                self.set_element(name, &namespace, prefix.as_deref(), value)
            }
            Some(Accessor::Attribute { namespace }) => {
                match self.attribute_mut(name, &namespace) {
                    Some(attribute) => attribute.push(value).map(|_| ()),
                    None => Err(Error::UnknownProperty(name.to_string())),
                }
            }
            None => Err(Error::UnknownProperty(name.to_string())),
        }
    }

    // completion hook of the node's object type; true unless it rejects
    pub(crate) fn complete(&mut self) -> bool {
        match &self.kind {
            NodeKind::Generic => true,
            NodeKind::Registered(object_type) => {
                let object_type = Rc::clone(object_type);
                object_type.complete(self)
            }
        }
    }
}

/// Structural equality: names, namespaces, attributes, ordered children
/// and text. Prefixes, hints and accessors are presentation and do not
/// take part.
impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.local_name == other.local_name
            && self.namespace == other.namespace
            && self.is_attribute == other.is_attribute
            && self.value == other.value
            && self.attributes == other.attributes
            && self.children == other.children
    }
}
