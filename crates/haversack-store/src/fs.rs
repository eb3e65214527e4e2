//! Filesystem implementation of the ChunkStore trait.
//!
//! This is the primary storage backend. The layout is one numeric directory
//! per era under the storage root, one file per chunk named by the escaped
//! `(format, uri)` pair, and a root-level `era` state file tracking the
//! current era. Blocking file I/O is wrapped in `tokio::spawn_blocking`.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use haversack_core::Era;

use crate::error::{Result, StoreError};
use crate::traits::{ChunkInfo, ChunkStore, StoredMessage};

/// Name of the state file holding the current era number.
const ERA_STATE_FILE: &str = "era";

/// Separator between the escaped format and uri in a chunk file name.
/// Never produced by the escaper, so splitting is unambiguous.
const NAME_SEPARATOR: char = '#';

/// Filesystem-backed chunk store.
///
/// The current-era pointer and all file mutations are guarded by one mutex,
/// so rollover and append serialize: an append lands wholly in one era.
pub struct FsChunkStore {
    root: PathBuf,
    state: Arc<Mutex<FsState>>,
}

struct FsState {
    current: Era,
}

impl FsChunkStore {
    /// Open a store rooted at the given directory.
    ///
    /// Creates the root and the era-zero state on first use.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let root = path.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;

        let state_path = root.join(ERA_STATE_FILE);
        let current = match fs::read_to_string(&state_path) {
            Ok(text) => {
                let n: u32 = text.trim().parse().map_err(|_| {
                    StoreError::Corrupt(format!("bad era state file: {text:?}"))
                })?;
                Era::new(n)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                write_era_state(&root, Era::ZERO)?;
                Era::ZERO
            }
            Err(e) => return Err(e.into()),
        };
        fs::create_dir_all(era_dir(&root, current))?;

        Ok(Self {
            root,
            state: Arc::new(Mutex::new(FsState { current })),
        })
    }

    /// The storage root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Run a closure on the blocking pool with the store's root and state.
    async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Path, &Mutex<FsState>) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let root = self.root.clone();
        let state = Arc::clone(&self.state);
        tokio::task::spawn_blocking(move || f(&root, &state))
            .await
            .map_err(|e| StoreError::Internal(format!("spawn_blocking failed: {e}")))?
    }
}

#[async_trait]
impl ChunkStore for FsChunkStore {
    async fn current_era(&self) -> Result<Era> {
        self.blocking(|_, state| Ok(lock(state)?.current)).await
    }

    async fn eras(&self) -> Result<Vec<Era>> {
        self.blocking(|root, state| {
            let current = lock(state)?.current;
            let mut eras = Vec::new();
            for entry in fs::read_dir(root)? {
                let entry = entry?;
                if !entry.file_type()?.is_dir() {
                    continue;
                }
                if let Some(n) = entry
                    .file_name()
                    .to_str()
                    .and_then(|name| name.parse::<u32>().ok())
                {
                    eras.push(Era::new(n));
                }
            }
            eras.push(current);
            eras.sort_unstable();
            eras.dedup();
            Ok(eras)
        })
        .await
    }

    async fn rollover_era(&self) -> Result<Era> {
        self.blocking(|root, state| {
            let mut state = lock(state)?;
            let next = state.current.next();
            fs::create_dir_all(era_dir(root, next))?;
            write_era_state(root, next)?;
            state.current = next;
            Ok(next)
        })
        .await
    }

    async fn open_or_create_chunk(&self, format: &str, uri: &str, era: Era) -> Result<ChunkInfo> {
        let format = format.to_owned();
        let uri = uri.to_owned();
        self.blocking(move |root, state| {
            let current = lock(state)?.current;
            let path = chunk_path(root, era, &format, &uri);

            if path.is_file() {
                let count = read_records(&path)?.len() as u64;
                return Ok(ChunkInfo {
                    format,
                    uri,
                    era,
                    message_count: count,
                });
            }

            if era != current {
                return Err(StoreError::Unavailable(format!(
                    "era {era} is frozen, cannot create chunk {format}|{uri}"
                )));
            }

            fs::create_dir_all(era_dir(root, era))?;
            File::create(&path)?;
            Ok(ChunkInfo {
                format,
                uri,
                era,
                message_count: 0,
            })
        })
        .await
    }

    async fn append_message(
        &self,
        format: &str,
        uri: &str,
        message: StoredMessage,
    ) -> Result<ChunkInfo> {
        let format = format.to_owned();
        let uri = uri.to_owned();
        self.blocking(move |root, state| {
            // Hold the state lock across the write so a concurrent rollover
            // cannot move the current era mid-append.
            let state = lock(state)?;
            let era = state.current;
            let path = chunk_path(root, era, &format, &uri);
            fs::create_dir_all(era_dir(root, era))?;

            let existing = read_records(&path)?.len() as u64;
            append_record(&path, &message)?;

            Ok(ChunkInfo {
                format,
                uri,
                era,
                message_count: existing + 1,
            })
        })
        .await
    }

    async fn list_chunks(&self, era: Era) -> Result<Vec<ChunkInfo>> {
        self.blocking(move |root, _| {
            let dir = era_dir(root, era);
            let entries = match fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
                Err(e) => return Err(e.into()),
            };

            let mut chunks = Vec::new();
            for entry in entries {
                let entry = entry?;
                let name = entry.file_name();
                let Some(name) = name.to_str() else {
                    continue;
                };
                let Some((format, uri)) = parse_chunk_file_name(name) else {
                    tracing::debug!(era = %era, file = name, "skipping non-chunk file");
                    continue;
                };
                let count = read_records(&entry.path())?.len() as u64;
                chunks.push(ChunkInfo {
                    format,
                    uri,
                    era,
                    message_count: count,
                });
            }
            chunks.sort_by(|a, b| (&a.format, &a.uri).cmp(&(&b.format, &b.uri)));
            Ok(chunks)
        })
        .await
    }

    async fn read_messages(
        &self,
        format: &str,
        uri: &str,
        era: Era,
        after: u64,
    ) -> Result<Vec<StoredMessage>> {
        let format = format.to_owned();
        let uri = uri.to_owned();
        self.blocking(move |root, _| {
            let path = chunk_path(root, era, &format, &uri);
            let records = read_records(&path)?;
            Ok(records.into_iter().skip(after as usize).collect())
        })
        .await
    }

    async fn message_count(&self, format: &str, uri: &str, era: Era) -> Result<u64> {
        let format = format.to_owned();
        let uri = uri.to_owned();
        self.blocking(move |root, _| {
            let path = chunk_path(root, era, &format, &uri);
            Ok(read_records(&path)?.len() as u64)
        })
        .await
    }
}

fn lock<'a>(state: &'a Mutex<FsState>) -> Result<std::sync::MutexGuard<'a, FsState>> {
    state
        .lock()
        .map_err(|e| StoreError::Internal(format!("state mutex poisoned: {e}")))
}

fn era_dir(root: &Path, era: Era) -> PathBuf {
    root.join(era.as_u32().to_string())
}

fn chunk_path(root: &Path, era: Era, format: &str, uri: &str) -> PathBuf {
    era_dir(root, era).join(chunk_file_name(format, uri))
}

fn write_era_state(root: &Path, era: Era) -> Result<()> {
    let tmp = root.join(format!("{ERA_STATE_FILE}.tmp"));
    fs::write(&tmp, era.as_u32().to_string())?;
    fs::rename(&tmp, root.join(ERA_STATE_FILE))?;
    Ok(())
}

/// Escape a name component so it is safe as part of a file name.
///
/// Alphanumerics plus `._-` pass through; every other byte becomes `%XX`.
fn escape_component(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for &b in s.as_bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'.' | b'_' | b'-' => out.push(b as char),
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

fn unescape_component(s: &str) -> Option<String> {
    let mut out = Vec::with_capacity(s.len());
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = bytes.get(i + 1..i + 3)?;
            let hex = std::str::from_utf8(hex).ok()?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

fn chunk_file_name(format: &str, uri: &str) -> String {
    format!(
        "{}{}{}",
        escape_component(format),
        NAME_SEPARATOR,
        escape_component(uri)
    )
}

fn parse_chunk_file_name(name: &str) -> Option<(String, String)> {
    let (format, uri) = name.split_once(NAME_SEPARATOR)?;
    Some((unescape_component(format)?, unescape_component(uri)?))
}

/// Read every complete message record from a chunk file.
///
/// Record framing: u32 big-endian length, CBOR `StoredMessage` body.
/// A truncated trailing record (torn write) is ignored; a full-length record
/// that fails to parse is corruption.
fn read_records(path: &Path) -> Result<Vec<StoredMessage>> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut data = Vec::new();
    file.read_to_end(&mut data)?;

    let mut records = Vec::new();
    let mut offset = 0;
    while offset + 4 <= data.len() {
        let len = u32::from_be_bytes(
            data[offset..offset + 4]
                .try_into()
                .map_err(|_| StoreError::Corrupt("bad record header".into()))?,
        ) as usize;
        let start = offset + 4;
        let Some(body) = data.get(start..start + len) else {
            tracing::debug!(path = %path.display(), "ignoring torn trailing record");
            break;
        };
        let message: StoredMessage = ciborium::from_reader(body)
            .map_err(|e| StoreError::Corrupt(format!("bad record at offset {offset}: {e}")))?;
        records.push(message);
        offset = start + len;
    }
    Ok(records)
}

/// Append one message record to a chunk file with a single write call.
fn append_record(path: &Path, message: &StoredMessage) -> Result<()> {
    let mut body = Vec::new();
    ciborium::into_writer(message, &mut body)
        .map_err(|e| StoreError::Serialization(e.to_string()))?;

    let mut record = Vec::with_capacity(4 + body.len());
    record.extend_from_slice(&(body.len() as u32).to_be_bytes());
    record.extend_from_slice(&body);

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(&record)?;
    file.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use haversack_core::PeerId;
    use tempfile::TempDir;

    fn msg(payload: &str) -> StoredMessage {
        StoredMessage::local(payload.as_bytes().to_vec(), PeerId::new("alice"))
    }

    #[test]
    fn test_escape_roundtrip() {
        for s in ["app/test", "uri://x?q=1", "plain", "with space", "ünïcode"] {
            let escaped = escape_component(s);
            assert!(!escaped.contains('/'));
            assert!(!escaped.contains('#'));
            assert_eq!(unescape_component(&escaped).unwrap(), s);
        }
    }

    #[test]
    fn test_chunk_file_name_roundtrip() {
        let name = chunk_file_name("app/test", "uri://x");
        let (format, uri) = parse_chunk_file_name(&name).unwrap();
        assert_eq!(format, "app/test");
        assert_eq!(uri, "uri://x");
    }

    #[tokio::test]
    async fn test_append_and_read_back() {
        let dir = TempDir::new().unwrap();
        let store = FsChunkStore::open(dir.path()).unwrap();

        store
            .append_message("app/test", "uri://x", msg("hello"))
            .await
            .unwrap();
        store
            .append_message("app/test", "uri://x", msg("world"))
            .await
            .unwrap();

        let messages = store
            .read_messages("app/test", "uri://x", Era::ZERO, 0)
            .await
            .unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].payload.as_ref(), b"hello");
        assert_eq!(messages[1].payload.as_ref(), b"world");
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = FsChunkStore::open(dir.path()).unwrap();
            store
                .append_message("app/test", "uri://x", msg("persisted"))
                .await
                .unwrap();
            store.rollover_era().await.unwrap();
        }

        let store = FsChunkStore::open(dir.path()).unwrap();
        assert_eq!(store.current_era().await.unwrap(), Era(1));
        let messages = store
            .read_messages("app/test", "uri://x", Era::ZERO, 0)
            .await
            .unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].payload.as_ref(), b"persisted");
    }

    #[tokio::test]
    async fn test_rollover_routes_appends_to_new_era() {
        let dir = TempDir::new().unwrap();
        let store = FsChunkStore::open(dir.path()).unwrap();

        store
            .append_message("app/test", "uri://x", msg("old"))
            .await
            .unwrap();
        store.rollover_era().await.unwrap();
        store
            .append_message("app/test", "uri://x", msg("new"))
            .await
            .unwrap();

        let old = store
            .read_messages("app/test", "uri://x", Era::ZERO, 0)
            .await
            .unwrap();
        assert_eq!(old.len(), 1);
        let new = store
            .read_messages("app/test", "uri://x", Era(1), 0)
            .await
            .unwrap();
        assert_eq!(new.len(), 1);
        assert_eq!(new[0].payload.as_ref(), b"new");
    }

    #[tokio::test]
    async fn test_frozen_era_create_unavailable() {
        let dir = TempDir::new().unwrap();
        let store = FsChunkStore::open(dir.path()).unwrap();
        store.rollover_era().await.unwrap();

        let err = store
            .open_or_create_chunk("app/test", "uri://x", Era::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_list_chunks() {
        let dir = TempDir::new().unwrap();
        let store = FsChunkStore::open(dir.path()).unwrap();

        store
            .append_message("app/a", "uri://1", msg("x"))
            .await
            .unwrap();
        store
            .append_message("app/b", "uri://2", msg("y"))
            .await
            .unwrap();

        let chunks = store.list_chunks(Era::ZERO).await.unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].format, "app/a");
        assert_eq!(chunks[1].format, "app/b");
        assert!(chunks.iter().all(|c| c.message_count == 1));
    }

    #[tokio::test]
    async fn test_torn_trailing_record_ignored() {
        let dir = TempDir::new().unwrap();
        let store = FsChunkStore::open(dir.path()).unwrap();
        store
            .append_message("app/test", "uri://x", msg("whole"))
            .await
            .unwrap();

        // Simulate a torn write: a record header promising more bytes than exist.
        let path = chunk_path(dir.path(), Era::ZERO, "app/test", "uri://x");
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&100u32.to_be_bytes()).unwrap();
        file.write_all(b"short").unwrap();

        let messages = store
            .read_messages("app/test", "uri://x", Era::ZERO, 0)
            .await
            .unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].payload.as_ref(), b"whole");
    }
}
