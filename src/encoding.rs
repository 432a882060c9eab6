use encoding_rs::{Encoding, UTF_8};

use crate::error::Error;

/// The charset announced at the start of a byte stream.
///
/// Only a byte order mark or an XML declaration is looked at; `None` means
/// the stream announces nothing and is read as UTF-8.
pub(crate) fn announced_charset(bytes: &[u8]) -> Option<&'static Encoding> {
    let announces = matches!(bytes.first(), Some(0xEF | 0xFE | 0xFF | 0x00))
        || bytes.starts_with(b"<?xml");
    if !announces {
        return None;
    }
    let mut cursor = std::io::Cursor::new(bytes);
    let labels = xhtmlchardet::detect(&mut cursor, None).ok()?;
    labels
        .first()
        .and_then(|label| Encoding::for_label(label.as_bytes()))
}

/// Accept a charset label only if it names UTF-8.
pub(crate) fn require_utf8(label: &str) -> Result<(), Error> {
    match Encoding::for_label(label.trim().as_bytes()) {
        Some(encoding) if encoding == UTF_8 => Ok(()),
        _ => Err(Error::UnsupportedEncoding(label.to_string())),
    }
}
