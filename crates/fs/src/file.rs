//! Typed wrappers over [`Path`]: files, directories, file metadata, and the
//! rooted [`OsFile`] that is allowed to reach the OS file system.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::path::{Path, PathError, SEPARATOR};

/// A file in the store. Structurally a [`Path`]; semantically distinct from
/// [`Directory`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct File {
    #[serde(flatten)]
    path: Path,
}

impl File {
    #[must_use]
    pub fn new(path: Path) -> Self {
        Self { path }
    }

    /// Parses a file from its string path value.
    pub fn from_value(value: impl Into<String>) -> Result<Self, PathError> {
        Ok(Self {
            path: Path::new(value)?,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn value(&self) -> &str {
        self.path.value()
    }

    /// Binds this file to an OS storage root.
    #[must_use]
    pub fn to_os_file(&self, root: impl Into<String>) -> OsFile {
        OsFile::new(self.clone(), root)
    }
}

/// A directory in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Directory {
    #[serde(flatten)]
    path: Path,
}

impl Directory {
    #[must_use]
    pub fn new(path: Path) -> Self {
        Self { path }
    }

    pub fn from_value(value: impl Into<String>) -> Result<Self, PathError> {
        Ok(Self {
            path: Path::new(value)?,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Binds this directory to an OS storage root.
    #[must_use]
    pub fn to_os_file(&self, root: impl Into<String>) -> OsFile {
        OsFile::new(File::new(self.path.clone()), root)
    }
}

/// A [`File`] paired with its size in bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    #[serde(rename = "File")]
    pub file: File,
    #[serde(rename = "Size", default)]
    pub size: u64,
}

impl FileInfo {
    #[must_use]
    pub fn new(file: File, size: u64) -> Self {
        Self { file, size }
    }
}

/// A file bound to an OS storage root.
///
/// The only entity permitted to touch the OS file system; every operation in
/// [`crate::storage`] takes one. The root is stored with platform separators
/// translated to `/` so composed paths stay canonical.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OsFile {
    file: File,
    root: String,
}

impl OsFile {
    #[must_use]
    pub fn new(file: File, root: impl Into<String>) -> Self {
        let root = root.into().replace('\\', "/");
        Self { file, root }
    }

    #[must_use]
    pub fn file(&self) -> &File {
        &self.file
    }

    #[must_use]
    pub fn root(&self) -> &str {
        &self.root
    }

    /// The absolute OS path: `root + "/" + value`.
    #[must_use]
    pub fn os_path(&self) -> PathBuf {
        if self.file.path().is_root() {
            return PathBuf::from(&self.root);
        }
        let mut path = String::with_capacity(self.root.len() + 1 + self.file.value().len());
        path.push_str(&self.root);
        path.push(SEPARATOR);
        path.push_str(self.file.value());
        PathBuf::from(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_and_directory_share_the_path_shape() {
        let file = File::from_value("fs/file-1.txt").expect("valid file");
        let dir = Directory::from_value("fs").expect("valid directory");
        assert_eq!(file.value(), "fs/file-1.txt");
        assert_eq!(dir.path().value(), "fs");
    }

    #[test]
    fn os_file_concatenates_root_and_value() {
        let file = File::from_value("docs/a.txt").expect("valid file");
        let os_file = file.to_os_file("/srv/store");
        assert_eq!(os_file.os_path(), PathBuf::from("/srv/store/docs/a.txt"));
    }

    #[test]
    fn os_file_translates_platform_separators_in_the_root() {
        let file = File::from_value("a.txt").expect("valid file");
        let os_file = file.to_os_file(r"C:\store\root");
        assert_eq!(os_file.os_path(), PathBuf::from("C:/store/root/a.txt"));
    }

    #[test]
    fn root_file_resolves_to_the_root_directory() {
        let file = File::new(Path::root());
        let os_file = file.to_os_file("/srv/store");
        assert_eq!(os_file.os_path(), PathBuf::from("/srv/store"));
    }

    #[test]
    fn file_serializes_like_its_path() {
        let file = File::from_value("a/b.txt").expect("valid file");
        let json = serde_json::to_string(&file).expect("serialize");
        assert_eq!(json, r#"{"Value":"a/b.txt"}"#);
    }

    #[test]
    fn file_info_serializes_with_wire_names() {
        let info = FileInfo::new(File::from_value("a.bin").expect("valid file"), 11);
        let json = serde_json::to_value(&info).expect("serialize");
        assert_eq!(
            json,
            serde_json::json!({"File": {"Value": "a.bin"}, "Size": 11})
        );
    }

    #[test]
    fn file_info_size_defaults_to_zero() {
        let info: FileInfo =
            serde_json::from_str(r#"{"File":{"Value":"a.bin"}}"#).expect("deserialize");
        assert_eq!(info.size, 0);
    }
}
