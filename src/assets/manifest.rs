//! Upload manifests.
//!
//! A manifest is validated and resolved (keys derived, sizes read) before the
//! synchronizer talks to the object store.

use md5::{Digest, Md5};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::{AssetError, Result};

/// Content of a manifest entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetSource {
    /// A local file.
    Path(PathBuf),
    /// In-memory content.
    Bytes(Vec<u8>),
}

/// An entry of an upload manifest, as supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FileEntry {
    /// Object key; derived from the file name when absent.
    pub key: Option<String>,
    /// Content.
    pub source: Option<AssetSource>,
}

impl FileEntry {
    /// Entry for a local file.
    #[must_use]
    pub fn file(key: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            key: Some(key.into()),
            source: Some(AssetSource::Path(path.into())),
        }
    }

    /// Entry for in-memory content.
    #[must_use]
    pub fn bytes(key: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            key: Some(key.into()),
            source: Some(AssetSource::Bytes(bytes)),
        }
    }
}

/// A validated manifest entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFile {
    /// Object key.
    pub key: String,
    /// Content.
    pub source: AssetSource,
    /// Size in bytes.
    pub size: u64,
}

impl ResolvedFile {
    /// Reads the content.
    ///
    /// # Errors
    ///
    /// Returns an error if the local file cannot be read.
    pub async fn read(&self) -> Result<Vec<u8>> {
        match &self.source {
            AssetSource::Bytes(bytes) => Ok(bytes.clone()),
            AssetSource::Path(path) => tokio::fs::read(path).await.map_err(|source| {
                AssetError::Read {
                    path: path.clone(),
                    source,
                }
                .into()
            }),
        }
    }
}

/// Validates every entry, then resolves keys and sizes.
///
/// Nothing is read from disk unless every entry is well formed.
///
/// # Errors
///
/// Returns [`AssetError::InvalidManifest`] for the first malformed entry, or
/// [`AssetError::Read`] if a local file cannot be inspected.
pub async fn resolve(files: Vec<FileEntry>) -> Result<Vec<ResolvedFile>> {
    let mut keyed = Vec::with_capacity(files.len());

    for (index, entry) in files.into_iter().enumerate() {
        let (key, source) = match (entry.key, entry.source) {
            (None, None) => {
                return Err(AssetError::manifest(index, "entry has neither a key nor a source").into());
            }
            (Some(key), None) => {
                return Err(AssetError::manifest(index, format!("entry '{key}' has no source")).into());
            }
            (key, Some(source)) => (key, source),
        };

        let key = match (key, &source) {
            (Some(key), _) if key.trim_matches('/').is_empty() => {
                return Err(AssetError::manifest(index, "entry has an empty key").into());
            }
            (Some(key), _) => key.trim_start_matches('/').to_string(),
            (None, AssetSource::Path(path)) => path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .ok_or_else(|| {
                    AssetError::manifest(index, format!("{} has no file name", path.display()))
                })?,
            (None, AssetSource::Bytes(_)) => {
                return Err(AssetError::manifest(index, "in-memory entry needs a key").into());
            }
        };

        keyed.push((key, source));
    }

    let mut resolved = Vec::with_capacity(keyed.len());
    for (key, source) in keyed {
        let size = match &source {
            AssetSource::Bytes(bytes) => bytes.len() as u64,
            AssetSource::Path(path) => tokio::fs::metadata(path)
                .await
                .map_err(|source| AssetError::Read {
                    path: path.clone(),
                    source,
                })?
                .len(),
        };
        resolved.push(ResolvedFile { key, source, size });
    }

    Ok(resolved)
}

/// Expands a folder into manifest entries keyed under `prefix`.
///
/// Entries are sorted by path.
///
/// # Errors
///
/// Returns [`AssetError::Walk`] if the folder cannot be walked.
pub fn expand_folder(folder: &Path, prefix: &str) -> Result<Vec<FileEntry>> {
    let prefix = normalize_prefix(prefix);
    let mut entries = Vec::new();

    for entry in WalkDir::new(folder).sort_by_file_name() {
        let entry = entry.map_err(|e| AssetError::Walk {
            path: folder.to_path_buf(),
            message: e.to_string(),
        })?;

        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(folder)
            .map_err(|e| AssetError::Walk {
                path: folder.to_path_buf(),
                message: e.to_string(),
            })?;

        let relative = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        entries.push(FileEntry::file(format!("{prefix}{relative}"), entry.path()));
    }

    Ok(entries)
}

/// Normalizes a key prefix.
///
/// Backslashes become `/`, repeated separators collapse, the leading `/` is
/// dropped, and a non-empty prefix ends with `/`.
#[must_use]
pub fn normalize_prefix(prefix: &str) -> String {
    let joined = prefix
        .replace('\\', "/")
        .split('/')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("/");

    if joined.is_empty() {
        joined
    } else {
        format!("{joined}/")
    }
}

/// Longest common prefix of the keys, cut back to the last `/`.
#[must_use]
pub fn common_prefix<'a>(keys: impl IntoIterator<Item = &'a str>) -> String {
    let mut keys = keys.into_iter();
    let Some(first) = keys.next() else {
        return String::new();
    };

    let mut len = first.len();
    for key in keys {
        len = first
            .bytes()
            .zip(key.bytes())
            .take(len)
            .take_while(|(a, b)| a == b)
            .count();
    }
    while !first.is_char_boundary(len) {
        len -= 1;
    }

    first[..len]
        .rfind('/')
        .map_or_else(String::new, |slash| first[..=slash].to_string())
}

/// Lowercase hex MD5 of `bytes`, as used by single-part object ETags.
#[must_use]
pub fn md5_hex(bytes: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// True if a remote ETag equals the local MD5.
#[must_use]
pub fn etag_matches(etag: &str, md5: &str) -> bool {
    etag.trim_matches('"').eq_ignore_ascii_case(md5)
}

/// Content type derived from the key's extension.
#[must_use]
pub fn content_type(key: &str) -> String {
    mime_guess::from_path(key)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

/// Serializes tags as a URL-encoded `k=v&k2=v2` string.
#[must_use]
pub fn tagging(tags: &BTreeMap<String, String>) -> Option<String> {
    if tags.is_empty() {
        return None;
    }

    Some(
        tags.iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_prefix() {
        assert_eq!(normalize_prefix("assets-prefix"), "assets-prefix/");
        assert_eq!(normalize_prefix("/a//b\\c/"), "a/b/c/");
        assert_eq!(normalize_prefix(""), "");
        assert_eq!(normalize_prefix("//"), "");
    }

    #[test]
    fn test_common_prefix() {
        assert_eq!(
            common_prefix(["site/css/app.css", "site/js/app.js"]),
            "site/"
        );
        assert_eq!(common_prefix(["site/index.html"]), "site/");
        assert_eq!(common_prefix(["a.txt", "b.txt"]), "");
        assert_eq!(common_prefix(["site/a", "sites/b"]), "");
        assert_eq!(common_prefix(std::iter::empty()), "");
    }

    #[test]
    fn test_md5_and_etag() {
        let md5 = md5_hex(b"hello");
        assert_eq!(md5, "5d41402abc4b2a76b9719d911017c592");
        assert!(etag_matches("\"5D41402ABC4B2A76B9719D911017C592\"", &md5));
        assert!(!etag_matches("\"abc-2\"", &md5));
    }

    #[test]
    fn test_content_type() {
        assert_eq!(content_type("site/index.html"), "text/html");
        assert_eq!(content_type("app/template.json"), "application/json");
        assert_eq!(content_type("bundle/blob"), "application/octet-stream");
    }

    #[test]
    fn test_tagging_is_url_encoded() {
        let tags = BTreeMap::from([
            (String::from("stack-deploy:project"), String::from("shop")),
            (String::from("owner"), String::from("team a&b")),
        ]);
        assert_eq!(
            tagging(&tags).as_deref(),
            Some("owner=team%20a%26b&stack-deploy%3Aproject=shop")
        );
        assert_eq!(tagging(&BTreeMap::new()), None);
    }

    #[tokio::test]
    async fn test_entry_without_key_or_source_fails() {
        let files = vec![
            FileEntry::bytes("a.txt", b"a".to_vec()),
            FileEntry::default(),
        ];
        let err = resolve(files).await.unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("#1"));
    }

    #[tokio::test]
    async fn test_key_is_derived_from_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logo.png");
        std::fs::write(&path, [1_u8, 2, 3]).unwrap();

        let resolved = resolve(vec![FileEntry {
            key: None,
            source: Some(AssetSource::Path(path)),
        }])
        .await
        .unwrap();

        assert_eq!(resolved[0].key, "logo.png");
        assert_eq!(resolved[0].size, 3);
    }

    #[tokio::test]
    async fn test_missing_file_is_a_read_error() {
        let err = resolve(vec![FileEntry::file("x", "/definitely/not/here")])
            .await
            .unwrap_err();
        assert!(!err.is_configuration());
        assert!(matches!(err, crate::error::DeployError::Asset(AssetError::Read { .. })));
    }

    #[test]
    fn test_expand_folder() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("css")).unwrap();
        std::fs::write(dir.path().join("index.html"), "<html/>").unwrap();
        std::fs::write(dir.path().join("css").join("app.css"), "body{}").unwrap();

        let entries = expand_folder(dir.path(), "/site//").unwrap();
        let keys: Vec<_> = entries.iter().filter_map(|e| e.key.as_deref()).collect();
        assert_eq!(keys, ["site/css/app.css", "site/index.html"]);
    }
}
