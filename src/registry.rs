use std::fmt;
use std::rc::Rc;

use ahash::HashMap;

use crate::node::{Node, NodeKind};

/// A registered object type.
///
/// The decoder builds a node through [`ObjectType::create`] whenever it
/// opens an element with this type's name and namespace, and asks
/// [`ObjectType::complete`] about the node once its close tag is seen.
///
/// ```rust
/// use xostream::{Node, ObjectType};
///
/// #[derive(Debug)]
/// struct Message;
///
/// impl ObjectType for Message {
///     fn local_name(&self) -> &str {
///         "message"
///     }
///
///     fn namespace(&self) -> &str {
///         "jabber:client"
///     }
///
///     fn create(&self) -> Node {
///         let mut node = Node::new_element("message", "jabber:client");
///         node.define_elements(&["body", "subject"], None, None);
///         node
///     }
///
///     // drop messages without a body
///     fn complete(&self, node: &mut Node) -> bool {
///         node.elements("body", "jabber:client").next().is_some()
///     }
/// }
/// ```
pub trait ObjectType: fmt::Debug {
    /// The local name this type is registered under.
    fn local_name(&self) -> &str;

    /// The namespace URI this type is registered under.
    fn namespace(&self) -> &str;

    /// Construct a fresh node of this type.
    fn create(&self) -> Node {
        Node::new_element(self.local_name(), self.namespace())
    }

    /// Completion hook, called when the node's close tag is decoded.
    ///
    /// Return `false` to reject the node: no `node` event is reported for
    /// it, but it stays attached to its parent.
    fn complete(&self, _node: &mut Node) -> bool {
        true
    }
}

/// Object types keyed by namespace URI and local name.
#[derive(Debug, Default, Clone)]
pub struct Registry {
    types: HashMap<String, HashMap<String, Rc<dyn ObjectType>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a type. A type registered earlier under the same name is
    /// replaced.
    pub fn register<T: ObjectType + 'static>(&mut self, object_type: T) {
        let object_type: Rc<dyn ObjectType> = Rc::new(object_type);
        self.types
            .entry(object_type.namespace().to_string())
            .or_default()
            .insert(object_type.local_name().to_string(), object_type);
    }

    pub fn lookup(&self, namespace: &str, local_name: &str) -> Option<&Rc<dyn ObjectType>> {
        self.types.get(namespace)?.get(local_name)
    }

    pub fn len(&self) -> usize {
        self.types.values().map(|names| names.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Create the node for an opened element: the registered type if there
    /// is one, a generic node otherwise.
    pub fn create(&self, local_name: &str, namespace: &str, prefix: &str) -> Node {
        match self.lookup(namespace, local_name) {
            Some(object_type) => {
                let mut node = object_type.create();
                if node.prefix().is_none() {
                    node.set_prefix(Some(prefix.to_string()));
                }
                node.set_kind(NodeKind::Registered(Rc::clone(object_type)));
                node
            }
            None => Node::new(local_name, namespace, Some(prefix), false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Iq;

    impl ObjectType for Iq {
        fn local_name(&self) -> &str {
            "iq"
        }

        fn namespace(&self) -> &str {
            "jabber:client"
        }
    }

    #[test]
    fn test_lookup_by_namespace_and_name() {
        let mut registry = Registry::new();
        registry.register(Iq);
        assert_eq!(registry.len(), 1);
        assert!(registry.lookup("jabber:client", "iq").is_some());
        assert!(registry.lookup("jabber:server", "iq").is_none());
        assert!(registry.lookup("jabber:client", "message").is_none());
    }

    #[test]
    fn test_create_registered_and_generic() {
        let mut registry = Registry::new();
        registry.register(Iq);
        let iq = registry.create("iq", "jabber:client", "");
        assert!(matches!(iq.kind(), NodeKind::Registered(_)));
        assert_eq!(iq.prefix(), Some(""));
        let other = registry.create("presence", "jabber:client", "c");
        assert!(matches!(other.kind(), NodeKind::Generic));
        assert_eq!(other.prefix(), Some("c"));
    }
}
