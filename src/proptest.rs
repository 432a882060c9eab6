//! Proptest support for xostream
//!
//! Proptests allow you to test for *properties* of your code that must hold
//! for arbitrary data. This module generates arbitrary node trees that
//! survive an encode and decode round trip unchanged.
//!
//! This can be enabled by adding the `proptest` feature to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! xostream = { version = "0.1", features = ["proptest"] }
//! ```
//!
//! See the [`proptest`](https://docs.rs/proptest/latest/proptest/)
//! documentation for more information.

use proptest::prelude::*;

use crate::node::{Content, Node};

const NAMESPACES: &[&str] = &["", "http://example.com/x", "http://example.com/y"];
const PREFIXES: &[&str] = &["x", "y", "z"];
const ELEMENT_NAMES: &[&str] = &["a", "b", "c", "d", "e"];
const ATTRIBUTE_NAMES: &[&str] = &["q", "r", "s"];
// the decoder trims text, so no whitespace at the edges
const TEXT: &str = "[a-zé<>&'\"]([a-zé <>&'\"]{0,8}[a-zé<>&'\"])?";
const ATTRIBUTE_VALUE: &str = "[a-zé <>&'\"]{0,10}";

fn arb_attribute() -> impl Strategy<Value = (String, String, String)> {
    (
        prop::sample::select(ATTRIBUTE_NAMES),
        prop::sample::select(NAMESPACES),
        ATTRIBUTE_VALUE,
    )
        .prop_map(|(name, namespace, value)| (name.to_string(), namespace.to_string(), value))
}

fn arb_element_head() -> impl Strategy<Value = (String, String, Option<String>)> {
    (
        prop::sample::select(ELEMENT_NAMES),
        prop::sample::select(NAMESPACES),
        prop::option::of(prop::sample::select(PREFIXES)),
    )
        .prop_map(|(name, namespace, prefix)| {
            (name.to_string(), namespace.to_string(), prefix.map(str::to_string))
        })
}

fn arb_content() -> impl Strategy<Value = Content> {
    let leaf = TEXT.prop_map(Content::Text);

    leaf.prop_recursive(
        6,  // levels deep
        64, // maximum size of 64 nodes
        6,  // up to 6 items per collection
        |inner| {
            (
                arb_element_head(),
                prop::collection::vec(inner, 0..6),
                prop::collection::vec(arb_attribute(), 0..3),
            )
                .prop_map(|(head, children, attributes)| {
                    Content::Element(build(head, children, attributes))
                })
        },
    )
}

fn build(
    (name, namespace, prefix): (String, String, Option<String>),
    children: Vec<Content>,
    attributes: Vec<(String, String, String)>,
) -> Node {
    let mut node = Node::new(name, namespace, prefix.as_deref(), false);
    for (name, namespace, value) in attributes {
        if node.attribute(&name, &namespace).is_none() {
            node.define_attribute(&name, Some(namespace.as_str()), None)
                .set_value(value);
        }
    }
    for child in children {
        match child {
            // adjacent text decodes as one segment
            Content::Text(text) => match node.children_mut().last_mut() {
                Some(Content::Text(last)) => last.push_str(&text),
                _ => node.children_mut().push(Content::Text(text)),
            },
            Content::Element(child) => node.push_element(child),
            Content::Empty => {}
        }
    }
    node
}

/// Generate a random element tree.
///
/// Elements and attributes are spread over a few namespaces, some with
/// preferred prefixes. Text never has whitespace at its edges and never
/// follows other text directly, so the tree decodes back to an equal tree.
///
/// Example:
///
/// ```notrust
/// use proptest::prelude::*;
/// use xostream::proptest::arb_node;
/// use xostream::{decode_str, encode_to_string};
///
/// proptest! {
///   #[test]
///   fn test_roundtrip(node in arb_node()) {
///     let xml = encode_to_string(&node).unwrap();
///     prop_assert_eq!(decode_str(&xml).unwrap(), node);
///   }
/// }
/// ```
pub fn arb_node() -> impl Strategy<Value = Node> {
    (
        arb_element_head(),
        prop::collection::vec(arb_content(), 0..6),
        prop::collection::vec(arb_attribute(), 0..3),
    )
        .prop_map(|(head, children, attributes)| build(head, children, attributes))
}
