use std::borrow::Cow;

use crate::error::Error;

/// Replace predefined entities and character references with the characters
/// they stand for. Borrows the input when there is nothing to replace.
pub(crate) fn decode_entities(content: &str) -> Result<Cow<'_, str>, Error> {
    if !content.contains('&') {
        return Ok(Cow::Borrowed(content));
    }
    let mut result = String::with_capacity(content.len());
    let mut chars = content.chars();
    while let Some(c) = chars.next() {
        if c != '&' {
            result.push(c);
            continue;
        }
        let mut entity = String::new();
        let mut is_complete = false;
        for c in chars.by_ref() {
            if c == ';' {
                is_complete = true;
                break;
            }
            entity.push(c);
        }
        if !is_complete {
            return Err(Error::UnclosedEntity(entity));
        }
        match entity.as_str() {
            "amp" => result.push('&'),
            "apos" => result.push('\''),
            "gt" => result.push('>'),
            "lt" => result.push('<'),
            "quot" => result.push('"'),
            _ => result.push(character_reference(&entity)?),
        }
    }
    Ok(Cow::Owned(result))
}

fn character_reference(entity: &str) -> Result<char, Error> {
    let code = if let Some(hex) = entity
        .strip_prefix("#x")
        .or_else(|| entity.strip_prefix("#X"))
    {
        u32::from_str_radix(hex, 16).ok()
    } else if let Some(decimal) = entity.strip_prefix('#') {
        decimal.parse::<u32>().ok()
    } else {
        None
    };
    code.and_then(char::from_u32)
        .ok_or_else(|| Error::InvalidEntity(entity.to_string()))
}

/// Escape all five XML special characters, every occurrence.
pub(crate) fn escape(content: &str) -> Cow<'_, str> {
    if !content.contains(['&', '\'', '>', '<', '"']) {
        return Cow::Borrowed(content);
    }
    let mut result = String::with_capacity(content.len() + 8);
    for c in content.chars() {
        match c {
            '&' => result.push_str("&amp;"),
            '\'' => result.push_str("&apos;"),
            '>' => result.push_str("&gt;"),
            '<' => result.push_str("&lt;"),
            '"' => result.push_str("&quot;"),
            _ => result.push(c),
        }
    }
    Cow::Owned(result)
}
