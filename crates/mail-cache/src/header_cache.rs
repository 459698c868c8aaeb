//! 4.D Header Cache: a keyed store of serialised message headers. POP
//! has no mailbox paths, so it keeps one file per account at
//! `<cache_root>/<host>/neomutt.hcache`, keyed by UID.

use std::collections::HashMap;
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use mail_core::error::{MailError, MailResult};
use serde::{Deserialize, Serialize};

const MAGIC: &[u8; 8] = b"MHDRC001";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CachedHeader {
    pub from: String,
    pub to: String,
    pub cc: String,
    pub subject: String,
    pub message_id: String,
    pub references: String,
    pub in_reply_to: String,
    pub date: String,
    pub body_len: u64,
    /// Raw `MessageFlags` bits, kept untyped here so this crate
    /// doesn't need to pull in bitflags just to (de)serialize them.
    pub flags_bits: u16,
}

pub struct HeaderCache {
    path: PathBuf,
    entries: HashMap<String, CachedHeader>,
    dirty: bool,
}

impl HeaderCache {
    /// Opens (creating if absent) the single hcache file for
    /// `cache_root/host`. A corrupt or version-mismatched file starts
    /// an empty cache rather than failing the account load — cache
    /// errors are non-fatal (spec §7).
    pub fn open(cache_root: &Path, host: &str) -> MailResult<HeaderCache> {
        let dir = cache_root.join(host);
        fs::create_dir_all(&dir).map_err(|e| MailError::CacheError(e.to_string()))?;
        let path = dir.join("neomutt.hcache");
        let entries = match fs::read(&path) {
            Ok(bytes) => decode(&bytes).unwrap_or_default(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                tracing::warn!("header cache {} unreadable: {e}", path.display());
                HashMap::new()
            }
        };
        Ok(HeaderCache {
            path,
            entries,
            dirty: false,
        })
    }

    pub fn fetch(&self, key: &str) -> Option<&CachedHeader> {
        self.entries.get(key)
    }

    pub fn store(&mut self, key: &str, header: CachedHeader) {
        self.entries.insert(key.to_string(), header);
        self.dirty = true;
    }

    pub fn delete(&mut self, key: &str) {
        if self.entries.remove(key).is_some() {
            self.dirty = true;
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Rewrite the whole file. Single-writer-per-process (§5), so a
    /// full rewrite on flush is sufficient; no locking protocol beyond
    /// that is implemented.
    pub fn flush(&mut self) -> MailResult<()> {
        if !self.dirty {
            return Ok(());
        }
        let mut bytes = MAGIC.to_vec();
        bytes.extend(
            bincode::serialize(&self.entries)
                .map_err(|e| MailError::CacheError(e.to_string()))?,
        );
        let tmp = self.path.with_extension("tmp");
        let mut f = fs::File::create(&tmp).map_err(|e| MailError::CacheError(e.to_string()))?;
        f.write_all(&bytes)
            .map_err(|e| MailError::CacheError(e.to_string()))?;
        drop(f);
        fs::rename(&tmp, &self.path).map_err(|e| MailError::CacheError(e.to_string()))?;
        self.dirty = false;
        Ok(())
    }
}

impl Drop for HeaderCache {
    fn drop(&mut self) {
        if self.dirty {
            if let Err(e) = self.flush() {
                tracing::warn!("failed to flush header cache on drop: {e}");
            }
        }
    }
}

fn decode(bytes: &[u8]) -> Option<HashMap<String, CachedHeader>> {
    if bytes.len() < MAGIC.len() || &bytes[..MAGIC.len()] != MAGIC {
        return None;
    }
    bincode::deserialize(&bytes[MAGIC.len()..]).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample() -> CachedHeader {
        CachedHeader {
            from: "a@example.com".into(),
            to: "b@example.com".into(),
            cc: String::new(),
            subject: "hi".into(),
            message_id: "<1@example.com>".into(),
            references: String::new(),
            in_reply_to: String::new(),
            date: "Mon, 1 Jan 2024 00:00:00 +0000".into(),
            body_len: 42,
            flags_bits: 0,
        }
    }

    #[test]
    fn store_fetch_and_flush_round_trip() {
        let dir = tempdir().unwrap();
        {
            let mut hc = HeaderCache::open(dir.path(), "mail.example.com").unwrap();
            hc.store("UID1", sample());
            hc.flush().unwrap();
        }
        let hc = HeaderCache::open(dir.path(), "mail.example.com").unwrap();
        assert_eq!(hc.fetch("UID1"), Some(&sample()));
    }

    #[test]
    fn delete_removes_an_entry() {
        let dir = tempdir().unwrap();
        let mut hc = HeaderCache::open(dir.path(), "mail.example.com").unwrap();
        hc.store("UID1", sample());
        hc.delete("UID1");
        assert!(hc.fetch("UID1").is_none());
    }

    #[test]
    fn corrupt_file_starts_empty_instead_of_failing() {
        let dir = tempdir().unwrap();
        let host_dir = dir.path().join("mail.example.com");
        fs::create_dir_all(&host_dir).unwrap();
        fs::write(host_dir.join("neomutt.hcache"), b"not a real cache file").unwrap();
        let hc = HeaderCache::open(dir.path(), "mail.example.com").unwrap();
        assert!(hc.is_empty());
    }
}
