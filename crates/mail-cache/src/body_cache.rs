//! 4.C Body Cache: a content-addressed on-disk cache, keyed by a
//! caller-supplied message id (the server UID for POP).

use std::fs::{self, File, OpenOptions};
use std::io::Read;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};

use mail_core::error::{MailError, MailResult};

/// Visitor for `BodyCache::list`, replacing the callback-with-void-data
/// idiom per the core's redesign notes (§9): the context is just
/// `Self`, and "abort on nonzero return" becomes `ControlFlow::Break`.
pub trait BodyCacheVisitor {
    fn visit(&mut self, id: &str) -> ControlFlow<()>;
}

impl<F: FnMut(&str) -> ControlFlow<()>> BodyCacheVisitor for F {
    fn visit(&mut self, id: &str) -> ControlFlow<()> {
        self(id)
    }
}

/// `<cache_root>/<url-encoded-host>[<url-encoded-mailbox>]/`.
#[derive(Debug, Clone)]
pub struct BodyCache {
    root: PathBuf,
}

impl BodyCache {
    /// Returns `None` if `cache_root` is unset or not a directory —
    /// callers degrade to fetching remotely (§4.C, §7 cache errors are
    /// non-fatal).
    pub fn open(cache_root: &Path, host: &str, mailbox: Option<&str>) -> Option<BodyCache> {
        if !cache_root.is_dir() {
            return None;
        }
        let mut dir = cache_root.join(sanitize_segment(host));
        if let Some(mailbox) = mailbox {
            for segment in mailbox.split('/').filter(|s| !s.is_empty()) {
                dir.push(sanitize_segment(segment));
            }
        }
        Some(BodyCache { root: dir })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, id: &str) -> MailResult<PathBuf> {
        if id.is_empty() {
            return Err(MailError::CacheError("empty cache id".into()));
        }
        Ok(self.root.join(sanitize_segment(id)))
    }

    fn ensure_dir(&self) -> MailResult<()> {
        if self.root.exists() {
            if !self.root.is_dir() {
                return Err(MailError::CacheError(format!(
                    "{} exists and is not a directory",
                    self.root.display()
                )));
            }
            return Ok(());
        }
        fs::create_dir_all(&self.root).map_err(|e| MailError::CacheError(e.to_string()))?;
        set_private_mode(&self.root);
        Ok(())
    }

    /// A readable handle to the committed entry, or `None` if absent.
    pub fn get(&self, id: &str) -> MailResult<Option<File>> {
        let path = self.entry_path(id)?;
        match File::open(&path) {
            Ok(f) => Ok(Some(f)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(MailError::CacheError(e.to_string())),
        }
    }

    pub fn get_bytes(&self, id: &str) -> MailResult<Option<Vec<u8>>> {
        match self.get(id)? {
            Some(mut f) => {
                let mut buf = Vec::new();
                f.read_to_end(&mut buf)
                    .map_err(|e| MailError::CacheError(e.to_string()))?;
                Ok(Some(buf))
            }
            None => Ok(None),
        }
    }

    /// A write handle addressing `<dir>/<id>.tmp`, created lazily.
    /// Truncated on open; invisible to `get`/`list` until `commit`.
    pub fn put(&self, id: &str) -> MailResult<File> {
        self.ensure_dir()?;
        let tmp = self.tmp_path(id)?;
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp)
            .map_err(|e| MailError::CacheError(e.to_string()))
    }

    pub fn put_bytes(&self, id: &str, data: &[u8]) -> MailResult<()> {
        use std::io::Write;
        let mut f = self.put(id)?;
        f.write_all(data)
            .map_err(|e| MailError::CacheError(e.to_string()))?;
        drop(f);
        self.commit(id)
    }

    /// Appends `.tmp` to the entry's file name rather than using
    /// `PathBuf::with_extension`, which replaces an existing extension
    /// instead of appending one — an id containing a dot (e.g. a
    /// Dovecot-style `"1456789.12345.imap"` UID) would otherwise
    /// collide with another id sharing the same pre-dot stem.
    fn tmp_path(&self, id: &str) -> MailResult<PathBuf> {
        let path = self.entry_path(id)?;
        let mut name = path
            .file_name()
            .ok_or_else(|| MailError::CacheError(format!("{id} has no file name")))?
            .to_os_string();
        name.push(".tmp");
        Ok(path.with_file_name(name))
    }

    /// Atomic rename from `.tmp` to `<id>`. Fails if `.tmp` is absent.
    pub fn commit(&self, id: &str) -> MailResult<()> {
        let tmp = self.tmp_path(id)?;
        let dest = self.entry_path(id)?;
        if !tmp.exists() {
            return Err(MailError::CacheError(format!(
                "no staged write for {id}"
            )));
        }
        fs::rename(&tmp, &dest).map_err(|e| MailError::CacheError(e.to_string()))
    }

    pub fn del(&self, id: &str) -> MailResult<()> {
        let path = self.entry_path(id)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(MailError::CacheError(e.to_string())),
        }
    }

    /// Ok iff the entry is a regular, non-empty file.
    pub fn exists(&self, id: &str) -> MailResult<()> {
        let path = self.entry_path(id)?;
        let meta = fs::metadata(&path).map_err(|e| MailError::CacheError(e.to_string()))?;
        if meta.is_file() && meta.len() > 0 {
            Ok(())
        } else {
            Err(MailError::CacheError(format!("{id} is not a usable entry")))
        }
    }

    /// Iterate committed entries (excluding `.tmp` staging files),
    /// invoking `visitor` for each id. Returns the number processed,
    /// or `-1` on a directory-open/close failure.
    pub fn list(&self, visitor: &mut dyn BodyCacheVisitor) -> i64 {
        let entries = match fs::read_dir(&self.root) {
            Ok(e) => e,
            Err(_) => return -1,
        };
        let mut count = 0i64;
        for entry in entries {
            let Ok(entry) = entry else { return -1 };
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.ends_with(".tmp") {
                continue;
            }
            count += 1;
            if visitor.visit(name).is_break() {
                break;
            }
        }
        count
    }
}

fn sanitize_segment(raw: &str) -> String {
    raw.chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}

#[cfg(unix)]
fn set_private_mode(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Ok(meta) = fs::metadata(path) {
        let mut perms = meta.permissions();
        perms.set_mode(0o700);
        let _ = fs::set_permissions(path, perms);
    }
}

#[cfg(not(unix))]
fn set_private_mode(_path: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use tempfile::tempdir;

    #[test]
    fn put_is_invisible_until_commit() {
        let dir = tempdir().unwrap();
        let cache = BodyCache::open(dir.path(), "host.example", Some("INBOX")).unwrap();
        let mut f = cache.put("M1").unwrap();
        f.write_all(b"hello").unwrap();
        drop(f);

        assert!(cache.exists("M1").is_err());
        assert!(cache.get("M1").unwrap().is_none());

        cache.commit("M1").unwrap();

        cache.exists("M1").unwrap();
        let bytes = cache.get_bytes("M1").unwrap().unwrap();
        assert_eq!(bytes, b"hello");
        assert!(!cache.tmp_path("M1").unwrap().exists());
    }

    #[test]
    fn commit_without_a_staged_write_fails() {
        let dir = tempdir().unwrap();
        let cache = BodyCache::open(dir.path(), "host.example", None).unwrap();
        assert!(cache.commit("ghost").is_err());
    }

    #[test]
    fn list_counts_committed_entries_and_skips_tmp() {
        let dir = tempdir().unwrap();
        let cache = BodyCache::open(dir.path(), "host.example", None).unwrap();
        cache.put_bytes("a", b"1").unwrap();
        cache.put_bytes("b", b"2").unwrap();
        let _ = cache.put("c").unwrap(); // left as .tmp, never committed

        let mut seen = Vec::new();
        let count = cache.list(&mut |id: &str| {
            seen.push(id.to_string());
            ControlFlow::Continue(())
        });
        assert_eq!(count, 2);
        seen.sort();
        assert_eq!(seen, vec!["a", "b"]);
    }

    #[test]
    fn open_returns_none_for_a_missing_cache_root() {
        assert!(BodyCache::open(Path::new("/does/not/exist"), "h", None).is_none());
    }

    #[test]
    fn id_with_path_separators_is_sanitised() {
        let dir = tempdir().unwrap();
        let cache = BodyCache::open(dir.path(), "host.example", None).unwrap();
        cache.put_bytes("a/b", b"x").unwrap();
        assert!(cache.exists("a/b").is_ok());
        assert!(!dir.path().join("host.example").join("a").exists());
    }

    #[test]
    fn ids_sharing_a_pre_dot_stem_do_not_collide() {
        let dir = tempdir().unwrap();
        let cache = BodyCache::open(dir.path(), "host.example", None).unwrap();
        cache.put_bytes("report.v1", b"one").unwrap();
        cache.put_bytes("report.v2", b"two").unwrap();
        assert_eq!(cache.get_bytes("report.v1").unwrap().unwrap(), b"one");
        assert_eq!(cache.get_bytes("report.v2").unwrap().unwrap(), b"two");
    }

    #[test]
    fn dotted_id_stages_to_its_own_tmp_file() {
        let dir = tempdir().unwrap();
        let cache = BodyCache::open(dir.path(), "host.example", None).unwrap();
        let tmp = cache.tmp_path("1456789.12345.imap").unwrap();
        assert_eq!(
            tmp.file_name().unwrap().to_str().unwrap(),
            "1456789.12345.imap.tmp"
        );
    }
}
