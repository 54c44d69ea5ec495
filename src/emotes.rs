//! On-disk cache of server emotes.
//!
//! Each server gets its own directory under the cache root, holding one file
//! per emote named `<name>.<ext>`. Names arrive from the network, so they are
//! sanitized before they touch the filesystem and the resolved path must stay
//! inside the server's directory.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tracing::{debug, warn};

use crate::error::EmoteError;
use crate::update::Update;

const TYPES: &[(&str, &str)] = &[
    ("image/png", "png"),
    ("image/gif", "gif"),
    ("image/jpeg", "jpg"),
    ("image/webp", "webp"),
    ("image/svg+xml", "svg"),
];

fn extension_for(content_type: &str) -> Option<&'static str> {
    TYPES
        .iter()
        .find(|(mime, _)| mime.eq_ignore_ascii_case(content_type))
        .map(|(_, ext)| *ext)
}

fn content_type_for(extension: &str) -> Option<&'static str> {
    let extension = extension.to_ascii_lowercase();
    match extension.as_str() {
        "jpeg" => Some("image/jpeg"),
        ext => TYPES.iter().find(|(_, e)| *e == ext).map(|(mime, _)| *mime),
    }
}

/// Strip anything that could escape a directory. `None` if nothing is left.
fn sanitize_name(name: &str) -> Option<String> {
    let sanitized: String = name
        .chars()
        .filter(|c| !c.is_control() && !matches!(c, '/' | '\\' | ':'))
        .collect();
    let sanitized = sanitized.trim_start_matches('.').trim();
    if sanitized.is_empty() {
        return None;
    }
    Some(sanitized.chars().take(128).collect())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Emote {
    pub name: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

#[derive(Debug)]
pub struct EmoteCache {
    dir: PathBuf,
    emotes: BTreeMap<String, Emote>,
}

impl EmoteCache {
    /// Open (creating if needed) the cache for `host` under `root` and load
    /// every emote file found there. Unreadable files are skipped.
    pub fn open(root: &Path, host: &str) -> Result<Self, EmoteError> {
        let host_dir = sanitize_name(host).ok_or_else(|| EmoteError::InvalidName(host.into()))?;
        let dir = root.join(host_dir);
        fs::create_dir_all(&dir)?;

        let mut emotes = BTreeMap::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            let (Some(name), Some(content_type)) = (
                path.file_stem().and_then(|s| s.to_str()),
                path.extension()
                    .and_then(|s| s.to_str())
                    .and_then(content_type_for),
            ) else {
                continue;
            };
            match fs::read(&path) {
                Ok(data) => {
                    emotes.insert(
                        name.to_string(),
                        Emote {
                            name: name.to_string(),
                            content_type: content_type.to_string(),
                            data,
                        },
                    );
                }
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable emote"),
            }
        }
        debug!(dir = %dir.display(), count = emotes.len(), "loaded emotes");
        Ok(Self { dir, emotes })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Looks `name` up the same way [`EmoteCache::store`] files it.
    pub fn get(&self, name: &str) -> Option<&Emote> {
        self.emotes.get(&sanitize_name(name)?)
    }

    /// Raw image bytes for `name`.
    pub fn fetch(&self, name: &str) -> Result<&[u8], EmoteError> {
        self.get(name)
            .map(|emote| emote.data.as_slice())
            .ok_or_else(|| EmoteError::NotFound(name.to_string()))
    }

    /// Known emote names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.emotes.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.emotes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.emotes.is_empty()
    }

    /// Write an emote to disk and memory, replacing any previous version.
    pub fn store(&mut self, name: &str, content_type: &str, data: Vec<u8>) -> Result<(), EmoteError> {
        let name = sanitize_name(name).ok_or_else(|| EmoteError::InvalidName(name.into()))?;
        let extension = extension_for(content_type)
            .ok_or_else(|| EmoteError::UnsupportedType(content_type.to_string()))?;
        let path = self.path_for(&name, extension)?;

        if let Some(old) = self.emotes.get(&name) {
            if let Some(old_ext) = extension_for(&old.content_type).filter(|e| *e != extension) {
                let _ = fs::remove_file(self.path_for(&name, old_ext)?);
            }
        }
        fs::write(&path, &data)?;
        self.emotes.insert(
            name.clone(),
            Emote {
                name,
                content_type: content_type.to_ascii_lowercase(),
                data,
            },
        );
        Ok(())
    }

    /// Store the emote carried by a server `emote` update. Returns its name.
    pub fn store_update(&mut self, update: &Update) -> Result<String, EmoteError> {
        let (Some(name), Some(content_type), Some(payload)) = (
            update.get_str("name"),
            update.get_str("content-type"),
            update.get_str("payload"),
        ) else {
            return Err(EmoteError::MissingPayload);
        };
        let data = STANDARD.decode(payload)?;
        self.store(name, content_type, data)?;
        Ok(name.to_string())
    }

    /// Forget an emote and delete its file. Returns whether it was cached.
    pub fn evict(&mut self, name: &str) -> Result<bool, EmoteError> {
        let Some(emote) = sanitize_name(name).and_then(|key| self.emotes.remove(&key)) else {
            return Ok(false);
        };
        if let Some(extension) = extension_for(&emote.content_type) {
            match fs::remove_file(self.path_for(&emote.name, extension)?) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(true)
    }

    fn path_for(&self, name: &str, extension: &str) -> Result<PathBuf, EmoteError> {
        let path = self.dir.join(format!("{}.{}", name, extension));
        if path.parent() != Some(self.dir.as_path()) {
            return Err(EmoteError::InvalidName(name.to_string()));
        }
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::update::Kind;
    use tempfile::TempDir;

    #[test]
    fn sanitize_strips_traversal() {
        assert_eq!(sanitize_name("wave"), Some("wave".into()));
        assert_eq!(sanitize_name("../../etc/passwd"), Some("etcpasswd".into()));
        assert_eq!(sanitize_name("C:\\x"), Some("Cx".into()));
        assert_eq!(sanitize_name(".."), None);
        assert_eq!(sanitize_name(""), None);
    }

    #[test]
    fn store_then_reopen() {
        let root = TempDir::new().unwrap();
        let mut cache = EmoteCache::open(root.path(), "chat.example").unwrap();
        assert!(cache.is_empty());

        cache.store("wave", "image/png", vec![1, 2, 3]).unwrap();
        assert_eq!(cache.fetch("wave").unwrap(), &[1u8, 2, 3][..]);
        assert!(root.path().join("chat.example/wave.png").exists());

        let reopened = EmoteCache::open(root.path(), "chat.example").unwrap();
        assert_eq!(reopened.names(), vec!["wave"]);
        assert_eq!(reopened.get("wave").unwrap().content_type, "image/png");
    }

    #[test]
    fn replacing_changes_file_type() {
        let root = TempDir::new().unwrap();
        let mut cache = EmoteCache::open(root.path(), "host").unwrap();
        cache.store("spin", "image/png", vec![1]).unwrap();
        cache.store("spin", "image/gif", vec![2]).unwrap();
        assert!(!cache.dir().join("spin.png").exists());
        assert!(cache.dir().join("spin.gif").exists());
        assert_eq!(cache.fetch("spin").unwrap(), &[2u8][..]);
    }

    #[test]
    fn store_update_decodes_payload() {
        let root = TempDir::new().unwrap();
        let mut cache = EmoteCache::open(root.path(), "host").unwrap();
        let update = Update::new(Kind::Emote)
            .with("name", "hi")
            .with("content-type", "image/png")
            .with("payload", "aGVsbG8=");
        assert_eq!(cache.store_update(&update).unwrap(), "hi");
        assert_eq!(cache.fetch("hi").unwrap(), b"hello");

        let bad = Update::new(Kind::Emote)
            .with("name", "x")
            .with("content-type", "image/png")
            .with("payload", "***");
        assert!(matches!(cache.store_update(&bad), Err(EmoteError::Payload(_))));
        assert!(matches!(
            cache.store_update(&Update::new(Kind::Emote)),
            Err(EmoteError::MissingPayload)
        ));
    }

    #[test]
    fn rejects_unknown_types_and_missing_names() {
        let root = TempDir::new().unwrap();
        let mut cache = EmoteCache::open(root.path(), "host").unwrap();
        assert!(matches!(
            cache.store("x", "text/html", vec![]),
            Err(EmoteError::UnsupportedType(_))
        ));
        assert!(matches!(cache.fetch("nope"), Err(EmoteError::NotFound(_))));
    }

    #[test]
    fn evict_removes_file() {
        let root = TempDir::new().unwrap();
        let mut cache = EmoteCache::open(root.path(), "host").unwrap();
        cache.store("wave", "image/png", vec![1]).unwrap();
        assert!(cache.evict("wave").unwrap());
        assert!(!cache.evict("wave").unwrap());
        assert!(!cache.dir().join("wave.png").exists());
        assert!(cache.is_empty());
    }

    #[test]
    fn lookups_use_the_stored_name() {
        let root = TempDir::new().unwrap();
        let mut cache = EmoteCache::open(root.path(), "host").unwrap();
        cache.store("a/b", "image/png", vec![7]).unwrap();
        assert_eq!(cache.names(), vec!["ab"]);
        assert_eq!(cache.fetch("a/b").unwrap(), &[7u8][..]);
        assert_eq!(cache.get("ab").unwrap().name, "ab");
        assert!(cache.evict("a/b").unwrap());
        assert!(!cache.dir().join("ab.png").exists());
        assert!(matches!(cache.fetch("/"), Err(EmoteError::NotFound(_))));
    }
}
