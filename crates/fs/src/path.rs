//! Validated relative paths.
//!
//! A [`Path`] is a `/`-separated sequence of tokens relative to an implicit
//! root. The empty value is the root itself. Paths are never absolute and
//! never contain a `..` token, which rules out traversal outside the storage
//! root by construction.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The root path value.
pub const ROOT: &str = "";

/// The canonical path separator, regardless of platform.
pub const SEPARATOR: char = '/';

/// Errors produced when constructing or extending a [`Path`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    /// The value does not satisfy the path grammar.
    #[error("invalid path: {0:?}")]
    InvalidPath(String),
    /// A composition token embeds the separator character.
    #[error("invalid path token, it contains the separator character: {0:?}")]
    InvalidPathToken(String),
}

/// An immutable, validated relative path.
///
/// Valid values are either the root `""` or tokens of word characters, dots,
/// and dashes joined by exactly one separator: no leading or trailing `/`,
/// no empty tokens, no `..`.
///
/// # Examples
///
/// ```
/// use fs::Path;
///
/// let mut path = Path::new("docs")?;
/// path.append(["guide", "intro.md"])?;
/// assert_eq!(path.value(), "docs/guide/intro.md");
/// # Ok::<(), fs::PathError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "PathRepr", into = "PathRepr")]
pub struct Path {
    value: String,
}

/// Wire shape of a path: `{"Value": "..."}`, matching the serialized form
/// used by existing clients.
#[derive(Serialize, Deserialize)]
struct PathRepr {
    #[serde(rename = "Value", default)]
    value: String,
}

impl From<Path> for PathRepr {
    fn from(path: Path) -> Self {
        Self { value: path.value }
    }
}

impl TryFrom<PathRepr> for Path {
    type Error = PathError;

    fn try_from(repr: PathRepr) -> Result<Self, Self::Error> {
        Self::new(repr.value)
    }
}

impl Path {
    /// Validates `value` and wraps it into a `Path`.
    pub fn new(value: impl Into<String>) -> Result<Self, PathError> {
        let value = value.into();
        if !is_valid(&value) {
            return Err(PathError::InvalidPath(value));
        }
        Ok(Self { value })
    }

    /// Returns the root path.
    #[must_use]
    pub fn root() -> Self {
        Self {
            value: String::from(ROOT),
        }
    }

    /// Composes a path from independent tokens.
    ///
    /// Tokens must not embed the separator; they are joined with exactly one
    /// separator each. An empty token sequence produces the root.
    pub fn from_tokens<I, S>(tokens: I) -> Result<Self, PathError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut value = String::new();
        for token in tokens {
            let token = token.as_ref();
            if token.contains(SEPARATOR) {
                return Err(PathError::InvalidPathToken(token.to_owned()));
            }
            if !value.is_empty() {
                value.push(SEPARATOR);
            }
            value.push_str(token);
        }
        Self::new(value)
    }

    /// Appends tokens to this path, composing with the current value.
    ///
    /// Appending to the root yields the composed tokens without a leading
    /// separator.
    pub fn append<I, S>(&mut self, tokens: I) -> Result<(), PathError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let end = Self::from_tokens(tokens)?;
        let value = if self.is_root() {
            end.value
        } else if end.is_root() {
            return Ok(());
        } else {
            let mut value = self.value.clone();
            value.push(SEPARATOR);
            value.push_str(&end.value);
            value
        };
        *self = Self::new(value)?;
        Ok(())
    }

    /// Returns true iff this path is the root.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.value == ROOT
    }

    /// Returns the underlying path value.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

fn is_valid(value: &str) -> bool {
    if value.is_empty() {
        return true;
    }
    if value.starts_with(SEPARATOR) {
        return false;
    }
    value.split(SEPARATOR).all(is_valid_token)
}

fn is_valid_token(token: &str) -> bool {
    !token.is_empty()
        && token != ".."
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_root_and_relative_values() {
        assert!(Path::new("").is_ok());
        assert!(Path::new("fs").is_ok());
        assert!(Path::new("fs/file-1.txt").is_ok());
        assert!(Path::new("a/b_c/d.e-f").is_ok());
    }

    #[test]
    fn rejects_absolute_and_traversal_values() {
        assert!(Path::new("/etc/passwd").is_err());
        assert!(Path::new("../secret").is_err());
        assert!(Path::new("a/../b").is_err());
        assert!(Path::new("a//b").is_err());
        assert!(Path::new("a/").is_err());
        assert!(Path::new("a b").is_err());
    }

    #[test]
    fn round_trips_valid_values() {
        for value in ["", "fs", "fs/dir/file.txt", "a-b/c.d"] {
            let path = Path::new(value).expect("valid path");
            assert_eq!(path.value(), value);
        }
    }

    #[test]
    fn composes_from_tokens() {
        let path = Path::from_tokens(["fs", "dir"]).expect("composed path");
        assert_eq!(path.value(), "fs/dir");

        let path = Path::from_tokens(["fs", "dir", "file.txt"]).expect("composed path");
        assert_eq!(path.value(), "fs/dir/file.txt");
    }

    #[test]
    fn empty_composition_is_root() {
        let path = Path::from_tokens::<_, &str>([]).expect("root path");
        assert!(path.is_root());
        assert_eq!(path.value(), ROOT);
    }

    #[test]
    fn rejects_tokens_containing_the_separator() {
        let error = Path::from_tokens(["fs", "/dir", "file.txt"]).unwrap_err();
        assert!(matches!(error, PathError::InvalidPathToken(_)));
    }

    #[test]
    fn composition_round_trips_split_values() {
        let value = "fs/dir/file.txt";
        let path = Path::from_tokens(value.split(SEPARATOR)).expect("composed path");
        assert_eq!(path.value(), value);
    }

    #[test]
    fn appends_to_root_without_leading_separator() {
        let mut path = Path::root();
        path.append(["fs", "dir", "file.txt"]).expect("append");
        assert_eq!(path.value(), "fs/dir/file.txt");
    }

    #[test]
    fn appends_to_non_root_value() {
        let mut path = Path::new("usr1/general").expect("valid path");
        path.append(["fs", "dir", "file.txt"]).expect("append");
        assert_eq!(path.value(), "usr1/general/fs/dir/file.txt");
    }

    #[test]
    fn appending_nothing_keeps_the_value() {
        let mut path = Path::new("docs").expect("valid path");
        path.append::<_, &str>([]).expect("append");
        assert_eq!(path.value(), "docs");
    }

    #[test]
    fn serializes_as_value_object() {
        let path = Path::new("docs/a.txt").expect("valid path");
        let json = serde_json::to_string(&path).expect("serialize");
        assert_eq!(json, r#"{"Value":"docs/a.txt"}"#);
    }

    #[test]
    fn deserialization_validates() {
        let error = serde_json::from_str::<Path>(r#"{"Value":"../x"}"#).unwrap_err();
        assert!(error.to_string().contains("invalid path"));
    }
}
