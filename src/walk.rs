use crate::encoder::{Sink, Writer};
use crate::error::Error;
use crate::node::{Content, Node};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Open,
    // attribute nodes only
    Value,
    Attributes(usize),
    Children(usize),
    Close,
}

#[derive(Debug, Clone, Copy)]
struct Frame {
    // index into the parent's children; `None` for the root
    child: Option<usize>,
    phase: Phase,
}

/// A resumable depth-first walk over a node tree.
///
/// The walk holds no reference to the tree; every [`Walk::step`] is given
/// the root and finds its place again by following child indices. Each step
/// writes at most one node boundary, so a walk can stop between any two
/// siblings and continue later in exactly the same order.
#[derive(Debug, Clone)]
pub(crate) struct Walk {
    frames: Vec<Frame>,
}

impl Walk {
    pub(crate) fn new() -> Self {
        Walk {
            frames: vec![Frame {
                child: None,
                phase: Phase::Open,
            }],
        }
    }

    pub(crate) fn is_done(&self) -> bool {
        self.frames.is_empty()
    }

    /// Write the next piece of `root`. Returns `true` once the walk is done.
    pub(crate) fn step<S: Sink>(
        &mut self,
        root: &Node,
        writer: &mut Writer<S>,
    ) -> Result<bool, Error> {
        let Some(node) = self.current(root) else {
            // the tree no longer has the shape the walk was started on
            self.frames.clear();
            return Ok(true);
        };
        let Some(frame) = self.frames.last_mut() else {
            return Ok(true);
        };
        match frame.phase {
            Phase::Open => {
                writer.start_element(
                    node.local_name(),
                    node.namespace(),
                    node.prefix(),
                    node.is_attribute(),
                )?;
                if node.is_attribute() {
                    frame.phase = Phase::Value;
                } else {
                    for hint in node.namespace_hints() {
                        writer.hint_namespace(&hint.namespace, hint.prefix.as_deref())?;
                    }
                    frame.phase = Phase::Attributes(0);
                }
            }
            Phase::Value => {
                writer.text(node.value().unwrap_or(""))?;
                frame.phase = Phase::Close;
            }
            Phase::Attributes(i) => match node.attributes().get(i) {
                Some(attribute) => {
                    writer.start_element(
                        attribute.local_name(),
                        attribute.namespace(),
                        attribute.prefix(),
                        true,
                    )?;
                    writer.text(attribute.value().unwrap_or(""))?;
                    writer.end_element()?;
                    frame.phase = Phase::Attributes(i + 1);
                }
                None => frame.phase = Phase::Children(0),
            },
            Phase::Children(i) => match node.children().get(i) {
                Some(Content::Element(_)) => {
                    frame.phase = Phase::Children(i + 1);
                    self.frames.push(Frame {
                        child: Some(i),
                        phase: Phase::Open,
                    });
                }
                Some(Content::Text(text)) => {
                    // empty text would turn <x/> into <x></x>
                    if !text.is_empty() {
                        writer.text(text)?;
                    }
                    frame.phase = Phase::Children(i + 1);
                }
                Some(Content::Empty) => frame.phase = Phase::Children(i + 1),
                None => frame.phase = Phase::Close,
            },
            Phase::Close => {
                writer.end_element()?;
                self.frames.pop();
            }
        }
        Ok(self.is_done())
    }

    fn current<'a>(&self, root: &'a Node) -> Option<&'a Node> {
        self.frames
            .iter()
            .filter_map(|frame| frame.child)
            .try_fold(root, |node, index| match node.children().get(index) {
                Some(Content::Element(child)) => Some(child),
                _ => None,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::EncodeParameters;

    fn walk_all(root: &Node) -> (String, usize) {
        let mut writer = Writer::new(String::new(), &EncodeParameters::default());
        let mut walk = Walk::new();
        let mut steps = 0;
        while !walk.step(root, &mut writer).unwrap() {
            steps += 1;
        }
        (writer.into_sink(), steps + 1)
    }

    #[test]
    fn test_walk_writes_tree() {
        let root = Node::new_element("a", "")
            .with_attribute("id", "1")
            .with_child(Node::new_element("b", "").with_text("x"))
            .with_text("y");
        let (xml, steps) = walk_all(&root);
        assert_eq!(xml, r#"<a id="1"><b>x</b>y</a>"#);
        assert_eq!(steps, 12);
    }

    #[test]
    fn test_walk_attribute_node() {
        let attribute = Node::new_attribute("id", "").with_text("1");
        let mut writer = Writer::new(String::new(), &EncodeParameters::default());
        writer.start_element("a", "", None, false).unwrap();
        let mut walk = Walk::new();
        while !walk.step(&attribute, &mut writer).unwrap() {}
        writer.end_element().unwrap();
        assert_eq!(writer.into_sink(), r#"<a id="1"/>"#);
    }

    #[test]
    fn test_walk_skips_empty_content() {
        let mut root = Node::new_element("a", "");
        root.push(Content::Empty).unwrap();
        root.push("").unwrap();
        assert_eq!(walk_all(&root).0, "<a/>");
    }
}
