//! Structured field paths.
//!
//! Paths are kept as token sequences in memory and only rendered as JSON
//! Pointers (RFC 6901) at the serialization boundary.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::patch::PatchError;

/// One step of a [`FieldPath`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PathToken {
    /// Object member.
    Field(String),
    /// Array element.
    Index(usize),
    /// One past the end of an array (`-`); only meaningful for `add`.
    Append,
}

/// Location of a value inside an instance document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct FieldPath(Vec<PathToken>);

impl FieldPath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn from_tokens(tokens: Vec<PathToken>) -> Self {
        Self(tokens)
    }

    pub fn field(mut self, name: impl Into<String>) -> Self {
        self.0.push(PathToken::Field(name.into()));
        self
    }

    pub fn index(mut self, index: usize) -> Self {
        self.0.push(PathToken::Index(index));
        self
    }

    pub fn append(mut self) -> Self {
        self.0.push(PathToken::Append);
        self
    }

    pub fn tokens(&self) -> &[PathToken] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Split into the parent path and the final token.
    pub fn split_last(&self) -> Option<(FieldPath, &PathToken)> {
        let (last, parent) = self.0.split_last()?;
        Some((FieldPath(parent.to_vec()), last))
    }

    /// Render as a JSON Pointer.
    pub fn to_pointer(&self) -> String {
        let mut out = String::new();
        for token in &self.0 {
            out.push('/');
            match token {
                PathToken::Field(name) => {
                    out.push_str(&name.replace('~', "~0").replace('/', "~1"));
                }
                PathToken::Index(i) => out.push_str(&i.to_string()),
                PathToken::Append => out.push('-'),
            }
        }
        out
    }

    /// Parse a JSON Pointer. Purely numeric segments become indices.
    pub fn parse(pointer: &str) -> Result<Self, PatchError> {
        if pointer.is_empty() {
            return Ok(Self::root());
        }
        let Some(rest) = pointer.strip_prefix('/') else {
            return Err(PatchError::InvalidPath(pointer.to_string()));
        };
        let mut tokens = Vec::new();
        for segment in rest.split('/') {
            tokens.push(parse_segment(segment, pointer)?);
        }
        Ok(Self(tokens))
    }
}

fn parse_segment(segment: &str, pointer: &str) -> Result<PathToken, PatchError> {
    if segment == "-" {
        return Ok(PathToken::Append);
    }
    let is_index = !segment.is_empty()
        && segment.bytes().all(|b| b.is_ascii_digit())
        && (segment == "0" || !segment.starts_with('0'));
    if is_index {
        return segment
            .parse()
            .map(PathToken::Index)
            .map_err(|_| PatchError::InvalidPath(pointer.to_string()));
    }
    // "~" must be followed by 0 or 1.
    let mut name = String::with_capacity(segment.len());
    let mut chars = segment.chars();
    while let Some(c) = chars.next() {
        if c == '~' {
            match chars.next() {
                Some('0') => name.push('~'),
                Some('1') => name.push('/'),
                _ => return Err(PatchError::InvalidPath(pointer.to_string())),
            }
        } else {
            name.push(c);
        }
    }
    Ok(PathToken::Field(name))
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_pointer())
    }
}

impl FromStr for FieldPath {
    type Err = PatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<FieldPath> for String {
    fn from(path: FieldPath) -> Self {
        path.to_pointer()
    }
}

impl TryFrom<String> for FieldPath {
    type Error = PatchError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_only_when_rendered() {
        let path = FieldPath::root().field("a/b").field("c~d").index(3).append();
        assert_eq!(path.tokens()[0], PathToken::Field("a/b".into()));
        assert_eq!(path.to_pointer(), "/a~1b/c~0d/3/-");
    }

    #[test]
    fn parse_inverts_render() {
        let path = FieldPath::root().field("site").field("a/b").index(10);
        assert_eq!(FieldPath::parse(&path.to_pointer()).unwrap(), path);
    }

    #[test]
    fn leading_zero_segment_is_a_field_name() {
        let path = FieldPath::parse("/items/007").unwrap();
        assert_eq!(path.tokens()[1], PathToken::Field("007".into()));
    }

    #[test]
    fn rejects_pointer_without_leading_slash() {
        assert!(matches!(
            FieldPath::parse("site/address"),
            Err(PatchError::InvalidPath(_))
        ));
        assert!(FieldPath::parse("/bad~2escape").is_err());
    }

    #[test]
    fn serializes_as_pointer_string() {
        let path = FieldPath::root().field("notes");
        assert_eq!(serde_json::to_string(&path).unwrap(), "\"/notes\"");
        let back: FieldPath = serde_json::from_str("\"/notes\"").unwrap();
        assert_eq!(back, path);
    }
}
