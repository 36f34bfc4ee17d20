//! Document identity.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};

/// Stable identity of a document.
///
/// Files on disk use `file://` URIs; in-memory documents may use any other
/// scheme (`memory:///model.dmodel`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentUri(Url);

impl DocumentUri {
    /// Parse a URI string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidUri`] if `uri` is not an absolute URI.
    pub fn parse(uri: &str) -> Result<Self> {
        Url::parse(uri)
            .map(Self)
            .map_err(|e| Error::InvalidUri(format!("{uri}: {e}")))
    }

    /// URI of a file on disk.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidUri`] if `path` is not absolute.
    pub fn from_file_path(path: &Path) -> Result<Self> {
        Url::from_file_path(path)
            .map(Self)
            .map_err(|()| Error::InvalidUri(path.display().to_string()))
    }

    /// The file path, for `file://` URIs.
    #[must_use]
    pub fn to_file_path(&self) -> Option<PathBuf> {
        if !self.is_file() {
            return None;
        }
        self.0.to_file_path().ok()
    }

    /// Returns `true` for `file://` URIs.
    #[must_use]
    pub fn is_file(&self) -> bool {
        self.0.scheme() == "file"
    }

    /// The last path segment.
    #[must_use]
    pub fn file_name(&self) -> &str {
        self.0.path().rsplit('/').next().unwrap_or_default()
    }

    /// File extension including the leading dot (`".dmodel"`), if any.
    #[must_use]
    pub fn extension(&self) -> Option<&str> {
        let name = self.file_name();
        name.rfind('.').filter(|&dot| dot > 0).map(|dot| &name[dot..])
    }

    /// The URI as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for DocumentUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_str())
    }
}

impl FromStr for DocumentUri {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl From<Url> for DocumentUri {
    fn from(url: Url) -> Self {
        Self(url)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("memory:///models/shop.dmodel", Some(".dmodel"))]
    #[case("file:///tmp/README", None)]
    #[case("file:///tmp/.hidden", None)]
    #[case("file:///tmp/archive.tar.gz", Some(".gz"))]
    fn extension_of(#[case] uri: &str, #[case] expected: Option<&str>) {
        let uri = DocumentUri::parse(uri).unwrap();
        assert_eq!(uri.extension(), expected);
    }

    #[test]
    fn memory_uris_have_no_file_path() {
        let uri = DocumentUri::parse("memory:///a.dmodel").unwrap();

        assert!(!uri.is_file());
        assert!(uri.to_file_path().is_none());
        assert_eq!(uri.file_name(), "a.dmodel");
    }

    #[test]
    fn file_uris_round_trip_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.dmodel");

        let uri = DocumentUri::from_file_path(&path).unwrap();

        assert!(uri.is_file());
        assert_eq!(uri.to_file_path(), Some(path));
    }

    #[test]
    fn relative_paths_are_rejected() {
        let result = DocumentUri::from_file_path(Path::new("relative/a.dmodel"));
        assert!(matches!(result, Err(Error::InvalidUri(_))));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(matches!(DocumentUri::parse("not a uri"), Err(Error::InvalidUri(_))));
    }
}
