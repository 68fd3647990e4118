//! Template body text and the splice that concatenates merged sections
//!
//! A body is treated as `PREFIX CONTENT SUFFIX`: the prefix runs up to and
//! including the first `>`, the suffix starts at the last `<`. Every text
//! produced by [`splice`] keeps that shape, so the opening and closing tags
//! of the body appear exactly once no matter how many sections are merged.

use crate::error::{Error, Result};

/// Serialized body of a template document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateBody {
    text: String,
}

impl TemplateBody {
    /// Wrap serialized body text
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// Current serialized text
    pub fn raw_text(&self) -> &str {
        &self.text
    }

    /// Replace the serialized text
    pub fn replace(&mut self, new_text: String) {
        self.text = new_text;
    }

    /// Decompose the current text
    pub fn parts(&self) -> Result<BodyParts<'_>> {
        split_body(&self.text)
    }
}

/// The three pieces of a body text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BodyParts<'a> {
    /// Opening tag, up to and including the first `>`
    pub prefix: &'a str,
    /// Everything between the opening and the closing tag
    pub content: &'a str,
    /// Closing tag, from the last `<` to the end
    pub suffix: &'a str,
}

/// Split body text into prefix, content and suffix
pub fn split_body(text: &str) -> Result<BodyParts<'_>> {
    let open_end = text
        .find('>')
        .map(|i| i + 1)
        .ok_or_else(|| Error::MalformedBody("no '>' closing the opening tag".to_string()))?;
    let close_start = text
        .rfind('<')
        .ok_or_else(|| Error::MalformedBody("no '<' starting the closing tag".to_string()))?;
    if close_start < open_end {
        return Err(Error::MalformedBody(
            "closing tag starts before the opening tag ends".to_string(),
        ));
    }

    Ok(BodyParts {
        prefix: &text[..open_end],
        content: &text[open_end..close_start],
        suffix: &text[close_start..],
    })
}

/// Add one merged section to the body text.
///
/// The first section replaces the template content; later sections are
/// appended to what is already there, with nothing inserted in between.
pub fn splice(current: &str, section: &str, is_first: bool) -> Result<String> {
    let parts = split_body(current)?;
    let kept = if is_first { "" } else { parts.content };

    let mut text =
        String::with_capacity(parts.prefix.len() + kept.len() + section.len() + parts.suffix.len());
    text.push_str(parts.prefix);
    text.push_str(kept);
    text.push_str(section);
    text.push_str(parts.suffix);
    Ok(text)
}
