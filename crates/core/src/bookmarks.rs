use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Bookmark {
    pub name: String,
    pub query: String,
}

impl Bookmark {
    #[must_use]
    pub fn new(name: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            query: query.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum BookmarksError {
    #[error("failed to read bookmarks file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse bookmarks file at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to create config directory at {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize bookmarks: {source}")]
    Serialize {
        #[source]
        source: toml::ser::Error,
    },
    #[error("failed to write bookmarks file at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct BookmarksDocument {
    #[serde(default)]
    bookmarks: Vec<Bookmark>,
}

impl BookmarksDocument {
    /// Later entries win for a repeated name; first-seen position is kept.
    fn normalize(&mut self) {
        let mut unique: Vec<Bookmark> = Vec::with_capacity(self.bookmarks.len());
        for bookmark in self.bookmarks.drain(..) {
            if let Some(existing) = unique.iter_mut().find(|b| b.name == bookmark.name) {
                *existing = bookmark;
            } else {
                unique.push(bookmark);
            }
        }
        self.bookmarks = unique;
    }
}

/// Named queries persisted in `bookmarks.toml`, in insertion order.
#[derive(Debug, Clone)]
pub struct FileBookmarksStore {
    path: PathBuf,
    bookmarks: Vec<Bookmark>,
}

impl FileBookmarksStore {
    pub fn load_from_path(path: impl Into<PathBuf>) -> Result<Self, BookmarksError> {
        let path = path.into();
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == ErrorKind::NotFound => String::new(),
            Err(source) => return Err(BookmarksError::Read { path, source }),
        };

        let mut document = if raw.trim().is_empty() {
            BookmarksDocument::default()
        } else {
            toml::from_str::<BookmarksDocument>(&raw).map_err(|source| BookmarksError::Parse {
                path: path.clone(),
                source,
            })?
        };
        document.normalize();
        tracing::debug!(path = %path.display(), count = document.bookmarks.len(), "bookmarks loaded");

        Ok(Self {
            path,
            bookmarks: document.bookmarks,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn all(&self) -> &[Bookmark] {
        &self.bookmarks
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.bookmarks
            .iter()
            .find(|bookmark| bookmark.name == name)
            .map(|bookmark| bookmark.query.as_str())
    }

    pub fn set(&mut self, name: impl Into<String>, query: impl Into<String>) {
        let bookmark = Bookmark::new(name, query);
        match self.bookmarks.iter_mut().find(|b| b.name == bookmark.name) {
            Some(existing) => existing.query = bookmark.query,
            None => self.bookmarks.push(bookmark),
        }
    }

    /// Returns whether anything was removed; absent names are a no-op.
    pub fn delete(&mut self, name: &str) -> bool {
        let original_len = self.bookmarks.len();
        self.bookmarks.retain(|bookmark| bookmark.name != name);
        self.bookmarks.len() != original_len
    }

    pub fn reset(&mut self) {
        self.bookmarks.clear();
    }

    pub fn persist(&self) -> Result<(), BookmarksError> {
        if let Some(parent_dir) = self.path.parent() {
            fs::create_dir_all(parent_dir).map_err(|source| BookmarksError::CreateDir {
                path: parent_dir.to_path_buf(),
                source,
            })?;
        }

        let rendered = toml::to_string_pretty(&BookmarksDocument {
            bookmarks: self.bookmarks.clone(),
        })
        .map_err(|source| BookmarksError::Serialize { source })?;

        fs::write(&self.path, rendered).map_err(|source| BookmarksError::Write {
            path: self.path.clone(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use tempfile::TempDir;

    use super::{Bookmark, FileBookmarksStore};

    fn temp_bookmarks_path(temp_dir: &TempDir) -> PathBuf {
        temp_dir.path().join("bookmarks.toml")
    }

    #[test]
    fn missing_bookmarks_file_loads_empty_store() {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let path = temp_bookmarks_path(&temp_dir);

        let store = FileBookmarksStore::load_from_path(path).expect("failed to load store");
        assert!(store.all().is_empty());
    }

    #[test]
    fn set_then_all_contains_bookmark_and_delete_removes_it() {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let mut store = FileBookmarksStore::load_from_path(temp_bookmarks_path(&temp_dir))
            .expect("failed to load store");

        store.set("active users", "SELECT * FROM users WHERE active");
        assert!(store
            .all()
            .contains(&Bookmark::new("active users", "SELECT * FROM users WHERE active")));

        assert!(store.delete("active users"));
        assert!(store.all().iter().all(|b| b.name != "active users"));
        assert!(!store.delete("active users"));
    }

    #[test]
    fn set_overwrites_existing_name_in_place() {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let mut store = FileBookmarksStore::load_from_path(temp_bookmarks_path(&temp_dir))
            .expect("failed to load store");

        store.set("b", "SELECT 2");
        store.set("a", "SELECT 1");
        store.set("b", "SELECT 22");

        let names: Vec<_> = store.all().iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["b", "a"]);
        assert_eq!(store.get("b"), Some("SELECT 22"));
    }

    #[test]
    fn persist_reload_and_reset() {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let path = temp_bookmarks_path(&temp_dir);

        let mut store = FileBookmarksStore::load_from_path(&path).expect("failed to load store");
        store.set("users", "SELECT * FROM users");
        store.set("orders", "SELECT * FROM orders");
        store.persist().expect("failed to persist store");

        let mut reloaded = FileBookmarksStore::load_from_path(&path).expect("failed to reload");
        assert_eq!(reloaded.all().len(), 2);
        assert_eq!(reloaded.get("orders"), Some("SELECT * FROM orders"));

        reloaded.reset();
        reloaded.persist().expect("failed to persist reset");

        let reloaded = FileBookmarksStore::load_from_path(path).expect("failed final reload");
        assert!(reloaded.all().is_empty());
    }

    #[test]
    fn repeated_names_on_disk_collapse_to_last_value() {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let path = temp_bookmarks_path(&temp_dir);
        std::fs::write(
            &path,
            "[[bookmarks]]\nname = \"q\"\nquery = \"SELECT 1\"\n\n\
             [[bookmarks]]\nname = \"q\"\nquery = \"SELECT 2\"\n",
        )
        .expect("failed to write bookmarks");

        let store = FileBookmarksStore::load_from_path(path).expect("failed to load store");
        assert_eq!(store.all(), &[Bookmark::new("q", "SELECT 2")]);
    }
}
