#![forbid(unsafe_code)]

//! Streaming, namespace-aware XML codec.
//!
//! A [`Decoder`] turns chunks of XML text into a tree of [`Node`]s,
//! reporting each element to a [`DecodeHandler`] as soon as it is
//! complete. An [`Encoder`] turns nodes, or direct element and text calls,
//! back into chunks of XML text for a [`Sink`], declaring namespaces only
//! where they are needed.
//!
//! Both sides can be paused and resumed without reordering anything.

mod decoder;
mod dispatch;
mod encoder;
mod encoding;
mod entity;
mod error;
mod namespace;
mod node;
mod registry;
mod tokenizer;
mod walk;

#[cfg(feature = "proptest")]
pub mod proptest;

pub use decoder::{decode_str, DecodeHandler, DecodeParameters, Decoder, PauseHandle};
pub use dispatch::{DispatchHandler, Dispatcher};
pub use encoder::{encode_to_string, EncodeParameters, Encoder, Flow, Sink, XML_DECLARATION};
pub use error::Error;
pub use namespace::{split_qname, ScopeFrame, ScopeStack, XML_NAMESPACE};
pub use node::{Content, NamespaceHint, Node, NodeKind, Property};
pub use registry::{ObjectType, Registry};
pub use tokenizer::{TokenSink, Tokenizer};
