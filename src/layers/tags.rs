//! Tag-stream tokenizer for the markup we prompt the model to emit.
//!
//! Model output is prose with tag-like markup mixed in, so this is not an XML
//! parser. Anything that does not lex as a tag is skipped one character at a
//! time, and close tags are never checked against open ones here; that is left
//! to the consumers.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagKind {
    Open,
    Close,
    SelfClosing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag<'a> {
    pub kind: TagKind,
    pub name: &'a str,
    pub attrs: Vec<(&'a str, &'a str)>,
    /// Byte offset of the `<`.
    pub start: usize,
    /// Byte offset just past the `>`.
    pub end: usize,
}

impl<'a> Tag<'a> {
    pub fn is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }

    pub fn attr(&self, key: &str) -> Option<&'a str> {
        self.attrs
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| *v)
    }
}

pub struct TagStream<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> TagStream<'a> {
    pub fn new(text: &'a str) -> Self {
        Self { text, pos: 0 }
    }
}

impl<'a> Iterator for TagStream<'a> {
    type Item = Tag<'a>;

    fn next(&mut self) -> Option<Tag<'a>> {
        while self.pos < self.text.len() {
            // Only a '<' can start a tag, so jump straight to the next one.
            let offset = self.text[self.pos..].find('<')?;
            self.pos += offset;
            if let Some(tag) = lex_tag(self.text, self.pos) {
                self.pos = tag.end;
                return Some(tag);
            }
            self.pos += 1;
        }
        None
    }
}

fn is_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b':' | b'.')
}

fn skip_ws(bytes: &[u8], mut i: usize) -> usize {
    while bytes.get(i).is_some_and(|b| b.is_ascii_whitespace()) {
        i += 1;
    }
    i
}

fn lex_tag(text: &str, start: usize) -> Option<Tag<'_>> {
    let bytes = text.as_bytes();
    let mut i = start + 1;
    let closing = bytes.get(i) == Some(&b'/');
    if closing {
        i += 1;
    }

    let name_start = i;
    if !bytes.get(i)?.is_ascii_alphabetic() {
        return None;
    }
    while bytes.get(i).copied().is_some_and(is_name_byte) {
        i += 1;
    }
    let name = &text[name_start..i];

    if closing {
        i = skip_ws(bytes, i);
        return (bytes.get(i) == Some(&b'>')).then(|| Tag {
            kind: TagKind::Close,
            name,
            attrs: Vec::new(),
            start,
            end: i + 1,
        });
    }

    let mut attrs = Vec::new();
    loop {
        let after_ws = skip_ws(bytes, i);
        let (kind, end) = match *bytes.get(after_ws)? {
            b'>' => (TagKind::Open, after_ws + 1),
            b'/' if bytes.get(after_ws + 1) == Some(&b'>') => (TagKind::SelfClosing, after_ws + 2),
            _ => {
                // attributes must be separated from what precedes them
                if after_ws == i {
                    return None;
                }
                i = after_ws;
                let key_start = i;
                if !bytes[i].is_ascii_alphabetic() {
                    return None;
                }
                while bytes.get(i).copied().is_some_and(is_name_byte) {
                    i += 1;
                }
                let key = &text[key_start..i];
                i = skip_ws(bytes, i);
                if *bytes.get(i)? != b'=' {
                    return None;
                }
                i = skip_ws(bytes, i + 1);
                let quote = *bytes.get(i)?;
                if quote != b'"' && quote != b'\'' {
                    return None;
                }
                let value_start = i + 1;
                let value_len = text[value_start..].find(quote as char)?;
                attrs.push((key, &text[value_start..value_start + value_len]));
                i = value_start + value_len + 1;
                continue;
            }
        };
        return Some(Tag {
            kind,
            name,
            attrs,
            start,
            end,
        });
    }
}

/// Inner text of every `<name>...</name>` element, trimmed.
///
/// Matching is non-greedy: an element ends at the first close tag with the
/// same name, and a second open tag before it is treated as content.
pub fn elements<'a>(text: &'a str, name: &str) -> Vec<&'a str> {
    let mut found = Vec::new();
    let mut open_end = None;
    for tag in TagStream::new(text).filter(|t| t.is(name)) {
        match (tag.kind, open_end) {
            (TagKind::Open, None) => open_end = Some(tag.end),
            (TagKind::Close, Some(from)) => {
                found.push(text[from..tag.start].trim());
                open_end = None;
            }
            (TagKind::SelfClosing, None) => found.push(""),
            _ => {}
        }
    }
    found
}

/// First `<name>...</name>` element with non-empty content.
pub fn element<'a>(text: &'a str, name: &str) -> Option<&'a str> {
    elements(text, name).into_iter().find(|s| !s.is_empty())
}

pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
