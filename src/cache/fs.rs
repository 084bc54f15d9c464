//! Durable cache storage on the local filesystem.
//!
//! ## Layout
//!
//! ```text
//! <root>/
//!   generations.json        {"generations": ["shell-v1", "shell-v2"]}
//!   <sha256(name)>/         one directory per generation
//!     <sha256(key)>.http    request key line, then the response in HTTP/1.1 wire format
//! ```
//!
//! The manifest keeps generation names in creation order. Every file is
//! written to a temporary sibling and renamed into place, so readers never
//! observe a half-written entry.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{Cache, CacheError, CacheStorage, RequestKey, ensure_storable, is_matchable};
use crate::http::{Headers, Request, Response, StatusCode};

const MANIFEST_FILE: &str = "generations.json";
const ENTRY_EXTENSION: &str = "http";

#[derive(Debug, Default, Serialize, Deserialize)]
struct Manifest {
    generations: Vec<String>,
}

/// Cache storage persisted under a root directory.
///
/// Cloning yields another handle to the same root; manifest updates through
/// any handle are serialized.
#[derive(Debug, Clone)]
pub struct FsStorage {
    root: Arc<PathBuf>,
    manifest_lock: Arc<Mutex<()>>,
}

impl FsStorage {
    /// Opens (creating if necessary) a storage rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Io`] if the root directory cannot be created.
    pub async fn open_root(root: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self {
            root: Arc::new(root),
            manifest_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn generation_dir(&self, name: &str) -> PathBuf {
        self.root.join(digest(name))
    }

    async fn read_manifest(&self) -> Result<Manifest, CacheError> {
        match tokio::fs::read(self.root.join(MANIFEST_FILE)).await {
            Ok(raw) => Ok(serde_json::from_slice(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Manifest::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_manifest(&self, manifest: &Manifest) -> Result<(), CacheError> {
        let raw = serde_json::to_vec_pretty(manifest)?;
        write_atomic(&self.root.join(MANIFEST_FILE), &raw).await
    }

    fn handle(&self, name: &str) -> FsCache {
        FsCache {
            name: name.to_owned(),
            dir: self.generation_dir(name),
        }
    }
}

#[async_trait]
impl CacheStorage for FsStorage {
    type Cache = FsCache;

    async fn open(&self, name: &str) -> Result<FsCache, CacheError> {
        let _guard = self.manifest_lock.lock().await;
        let mut manifest = self.read_manifest().await?;
        let cache = self.handle(name);
        tokio::fs::create_dir_all(&cache.dir).await?;
        if !manifest.generations.iter().any(|g| g == name) {
            debug!(generation = name, dir = %cache.dir.display(), "creating cache generation");
            manifest.generations.push(name.to_owned());
            self.write_manifest(&manifest).await?;
        }
        Ok(cache)
    }

    async fn keys(&self) -> Result<Vec<String>, CacheError> {
        let _guard = self.manifest_lock.lock().await;
        Ok(self.read_manifest().await?.generations)
    }

    async fn delete(&self, name: &str) -> Result<bool, CacheError> {
        let _guard = self.manifest_lock.lock().await;
        let mut manifest = self.read_manifest().await?;
        let Some(pos) = manifest.generations.iter().position(|g| g == name) else {
            return Ok(false);
        };

        match tokio::fs::remove_dir_all(self.generation_dir(name)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(generation = name, "generation directory already missing");
            }
            Err(e) => return Err(e.into()),
        }

        manifest.generations.remove(pos);
        self.write_manifest(&manifest).await?;
        Ok(true)
    }

    async fn match_any(&self, request: &Request) -> Result<Option<Response>, CacheError> {
        if !is_matchable(request) {
            return Ok(None);
        }
        let names = self.keys().await?;
        for name in &names {
            if let Some(response) = self.handle(name).match_request(request).await? {
                return Ok(Some(response));
            }
        }
        Ok(None)
    }
}

/// A handle to one on-disk generation.
#[derive(Debug, Clone)]
pub struct FsCache {
    name: String,
    dir: PathBuf,
}

impl FsCache {
    fn entry_path(&self, key: &RequestKey) -> PathBuf {
        self.dir
            .join(digest(key.as_str()))
            .with_extension(ENTRY_EXTENSION)
    }

    async fn ensure_live(&self) -> Result<(), CacheError> {
        if tokio::fs::try_exists(&self.dir).await? {
            Ok(())
        } else {
            Err(CacheError::Deleted {
                name: self.name.clone(),
            })
        }
    }

    /// Request keys of every entry file in the generation.
    #[cfg(test)]
    async fn keys(&self) -> Result<Vec<RequestKey>, CacheError> {
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut keys = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if !entry.file_type().await?.is_file()
                || path.extension().and_then(|e| e.to_str()) != Some(ENTRY_EXTENSION)
            {
                continue;
            }
            let raw = tokio::fs::read(&path).await?;
            let (key, _) = decode_entry(&path, &raw)?;
            keys.push(key);
        }
        keys.sort();
        Ok(keys)
    }
}

#[async_trait]
impl Cache for FsCache {
    fn name(&self) -> &str {
        &self.name
    }

    async fn match_request(&self, request: &Request) -> Result<Option<Response>, CacheError> {
        if !is_matchable(request) {
            return Ok(None);
        }
        let key = RequestKey::of(request);
        let path = self.entry_path(&key);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let (stored, response) = decode_entry(&path, &raw)?;
        if stored != key {
            warn!(generation = %self.name, key = %key, stored = %stored, "entry file holds another key");
            return Ok(None);
        }
        Ok(Some(response))
    }

    async fn put(&self, request: &Request, response: Response) -> Result<(), CacheError> {
        ensure_storable(request, &response)?;
        self.ensure_live().await?;
        let key = RequestKey::of(request);
        let path = self.entry_path(&key);
        debug!(generation = %self.name, key = %key, status = %response.status(), "cache put");
        write_atomic(&path, &encode_entry(&key, &response)).await
    }

    async fn put_all(&self, entries: Vec<(Request, Response)>) -> Result<(), CacheError> {
        for (request, response) in &entries {
            ensure_storable(request, response)?;
        }
        self.ensure_live().await?;

        // Stage every entry before publishing any of them.
        let mut staged = Vec::with_capacity(entries.len());
        for (request, response) in &entries {
            let key = RequestKey::of(request);
            let path = self.entry_path(&key);
            let tmp = temp_path(&path);
            if let Err(e) = tokio::fs::write(&tmp, encode_entry(&key, response)).await {
                discard(&staged).await;
                let _ = tokio::fs::remove_file(&tmp).await;
                return Err(e.into());
            }
            staged.push((tmp, path));
        }
        for (published, (tmp, path)) in staged.iter().enumerate() {
            if let Err(e) = tokio::fs::rename(tmp, path).await {
                warn!(generation = %self.name, error = %e, "publishing precache failed, rolling back");
                for (_, path) in &staged[..published] {
                    let _ = tokio::fs::remove_file(path).await;
                }
                discard(&staged[published..]).await;
                return Err(e.into());
            }
        }
        Ok(())
    }
}

fn digest(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

/// Unique per write, so concurrent puts of the same key never share a temp file.
fn temp_path(path: &Path) -> PathBuf {
    static NEXT: AtomicU64 = AtomicU64::new(0);
    let n = NEXT.fetch_add(1, Ordering::Relaxed);
    path.with_extension(format!("{n}.tmp"))
}

async fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), CacheError> {
    let tmp = temp_path(path);
    tokio::fs::write(&tmp, contents).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

async fn discard(staged: &[(PathBuf, PathBuf)]) {
    for (tmp, _) in staged {
        let _ = tokio::fs::remove_file(tmp).await;
    }
}

fn encode_entry(key: &RequestKey, response: &Response) -> Bytes {
    let wire = response.to_wire();
    let mut buf = BytesMut::with_capacity(key.as_str().len() + 2 + wire.len());
    buf.put(key.as_str().as_bytes());
    buf.put(&b"\r\n"[..]);
    buf.put(wire);
    buf.freeze()
}

/// Number of header lines in a response head, so the parse buffer always
/// fits every stored header.
fn header_count(wire: &[u8]) -> usize {
    let head_end = wire
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .unwrap_or(wire.len());
    wire[..head_end]
        .windows(2)
        .filter(|w| *w == b"\r\n")
        .count()
}

fn decode_entry(path: &Path, raw: &[u8]) -> Result<(RequestKey, Response), CacheError> {
    let corrupt = |reason: String| CacheError::Corrupt {
        path: path.to_owned(),
        reason,
    };

    let split = raw
        .windows(2)
        .position(|w| w == b"\r\n")
        .ok_or_else(|| corrupt("missing request key line".into()))?;
    let key = std::str::from_utf8(&raw[..split])
        .map_err(|e| corrupt(format!("request key is not UTF-8: {e}")))?;
    let wire = &raw[split + 2..];

    let mut headers = vec![httparse::EMPTY_HEADER; header_count(wire)];
    let mut parsed = httparse::Response::new(&mut headers);
    let body_offset = match parsed.parse(wire) {
        Ok(httparse::Status::Complete(offset)) => offset,
        Ok(httparse::Status::Partial) => return Err(corrupt("truncated response head".into())),
        Err(e) => return Err(corrupt(format!("malformed response head: {e}"))),
    };
    let status = parsed
        .code
        .map(StatusCode::from_u16)
        .ok_or_else(|| corrupt("missing status code".into()))?;

    let mut header_map = Headers::with_capacity(parsed.headers.len());
    for header in parsed.headers.iter() {
        let value = std::str::from_utf8(header.value)
            .map_err(|e| corrupt(format!("header {} is not UTF-8: {e}", header.name)))?;
        header_map.insert(header.name, value);
    }

    let body = &wire[body_offset..];
    let declared: usize = header_map
        .get(crate::http::header_names::CONTENT_LENGTH)
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| corrupt("missing Content-Length".into()))?;
    if body.len() != declared {
        return Err(corrupt(format!(
            "body is {} bytes, Content-Length says {declared}",
            body.len()
        )));
    }

    Ok((
        RequestKey::from_raw(key),
        Response::from_parts(status, header_map, Bytes::copy_from_slice(body)),
    ))
}
