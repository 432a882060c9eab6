/// Errors raised while decoding or encoding XML.
///
/// The tokenizer variants ([`Error::is_malformed_input`]) are fatal to a
/// [`Decoder`](crate::Decoder). The remaining variants are rejected
/// synchronously at the call that caused them, except when an
/// [`Encoder`](crate::Encoder) replays queued output; errors there close it.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The tokenizer reported a well-formedness error.
    #[error("malformed input: {0}")]
    MalformedInput(String),
    /// A close tag does not match the element that is open.
    #[error("invalid close tag: expected </{expected}>, found </{found}>")]
    InvalidCloseTag {
        /// The name of the open element.
        expected: String,
        /// The name in the close tag.
        found: String,
    },
    /// A close tag was found while no element is open.
    #[error("close tag </{0}> without open element")]
    UnexpectedCloseTag(String),
    /// Input ended while an element was still open.
    #[error("unclosed element <{0}> at end of input")]
    UnclosedTag(String),
    /// Input ended in the middle of markup.
    #[error("unexpected end of input")]
    UnexpectedEndOfInput,
    /// The same attribute appears twice in a start tag.
    #[error("duplicate attribute {0}")]
    DuplicateAttribute(String),
    /// An entity reference without a closing `;`.
    #[error("unclosed entity: &{0}")]
    UnclosedEntity(String),
    /// An entity reference that is not predefined or a character reference.
    #[error("invalid entity: &{0};")]
    InvalidEntity(String),
    /// Only UTF-8 is supported.
    #[error("unsupported encoding: {0}")]
    UnsupportedEncoding(String),
    /// An element cannot be the value of an attribute.
    #[error("cannot assign an element to attribute {0}")]
    InvalidAttributeAssignment(String),
    /// An attribute node was added where a child element belongs.
    #[error("attribute {0} cannot be a child element")]
    AttributeAsChild(String),
    /// No accessor was declared under this name.
    #[error("unknown property {0}")]
    UnknownProperty(String),
    /// `end_element` without a matching `start_element`.
    #[error("no open element to close")]
    NoOpenElement,
    /// An attribute was started after the element got content.
    #[error("attribute {0} after element content")]
    MisplacedAttribute(String),
    /// The stream was completed or destroyed.
    #[error("stream is closed")]
    Closed,
}

impl Error {
    /// Whether this is a well-formedness failure reported by the tokenizer.
    pub fn is_malformed_input(&self) -> bool {
        matches!(
            self,
            Error::MalformedInput(_)
                | Error::InvalidCloseTag { .. }
                | Error::UnexpectedCloseTag(_)
                | Error::UnclosedTag(_)
                | Error::UnexpectedEndOfInput
                | Error::DuplicateAttribute(_)
                | Error::UnclosedEntity(_)
                | Error::InvalidEntity(_)
        )
    }
}

impl From<xmlparser::Error> for Error {
    #[inline]
    fn from(e: xmlparser::Error) -> Self {
        Error::MalformedInput(e.to_string())
    }
}
