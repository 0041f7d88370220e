use crate::corpus::Corpus;
use crate::error::{FuseError, Result};
use crate::InvertedIndex;
use lazy_static::lazy_static;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{create_dir_all, File};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const FORMAT_VERSION: u32 = 1;

lazy_static! {
    static ref BUILD_LOCKS: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>> = Mutex::new(HashMap::new());
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MetaFile {
    pub num_docs: u32,
    pub num_terms: usize,
    pub created_at: String,
    pub version: u32,
}

#[derive(Debug, Clone)]
pub struct IndexPaths {
    pub root: PathBuf,
}

impl IndexPaths {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }
    fn postings(&self) -> PathBuf { self.root.join("postings.bin") }
    fn postings_tmp(&self) -> PathBuf { self.root.join("postings.bin.tmp") }
    fn meta(&self) -> PathBuf { self.root.join("meta.json") }
}

pub fn save_meta(paths: &IndexPaths, meta: &MetaFile) -> Result<()> {
    create_dir_all(&paths.root)?;
    let mut f = File::create(paths.meta())?;
    let json = serde_json::to_string_pretty(meta)?;
    f.write_all(json.as_bytes())?;
    Ok(())
}

pub fn load_meta(paths: &IndexPaths) -> Result<Option<MetaFile>> {
    let mut f = match File::open(paths.meta()) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut buf = String::new();
    f.read_to_string(&mut buf)?;
    Ok(Some(serde_json::from_str(&buf)?))
}

fn remove_if_present(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Drop the meta file, write the posting blob through a temp file and rename, then write the
/// meta file last. A directory without `meta.json` is never considered a complete index, so an
/// interrupted rewrite leaves an absent artifact rather than a half-written one.
pub fn persist(index: &InvertedIndex, paths: &IndexPaths) -> Result<()> {
    create_dir_all(&paths.root)?;
    remove_if_present(&paths.meta())?;
    let bytes = bincode::serialize(index)?;
    let tmp = paths.postings_tmp();
    let mut f = File::create(&tmp)?;
    f.write_all(&bytes)?;
    f.sync_all()?;
    std::fs::rename(&tmp, paths.postings())?;
    let meta = MetaFile {
        num_docs: index.num_docs,
        num_terms: index.num_terms(),
        created_at: time::OffsetDateTime::now_utc().format(&time::format_description::well_known::Rfc3339).unwrap_or_else(|_| "".into()),
        version: FORMAT_VERSION,
    };
    save_meta(paths, &meta)?;
    tracing::info!(root = %paths.root.display(), num_docs = meta.num_docs, num_terms = meta.num_terms, "persisted index");
    Ok(())
}

/// `Ok(None)` when no complete artifact of the current format exists at `paths`.
pub fn load(paths: &IndexPaths) -> Result<Option<InvertedIndex>> {
    let meta = match load_meta(paths)? {
        Some(meta) => meta,
        None => return Ok(None),
    };
    if meta.version != FORMAT_VERSION {
        tracing::warn!(found = meta.version, expected = FORMAT_VERSION, "index format mismatch, ignoring artifact");
        return Ok(None);
    }
    let mut f = match File::open(paths.postings()) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut buf = Vec::new();
    f.read_to_end(&mut buf)?;
    let index: InvertedIndex = bincode::deserialize(&buf)?;
    tracing::debug!(root = %paths.root.display(), num_docs = index.num_docs, "loaded index");
    Ok(Some(index))
}

/// Like [`load`], but an absent artifact is an [`FuseError::IndexNotFound`] error.
pub fn load_required(paths: &IndexPaths) -> Result<InvertedIndex> {
    load(paths)?.ok_or_else(|| FuseError::IndexNotFound(paths.root.display().to_string()))
}

/// Remove the artifact so the next [`get_or_build`] rebuilds it.
pub fn invalidate(paths: &IndexPaths) -> Result<()> {
    for file in [paths.meta(), paths.postings(), paths.postings_tmp()] {
        remove_if_present(&file)?;
    }
    tracing::info!(root = %paths.root.display(), "invalidated index");
    Ok(())
}

fn build_lock(paths: &IndexPaths) -> Arc<Mutex<()>> {
    BUILD_LOCKS.lock().entry(paths.root.clone()).or_default().clone()
}

/// Load the index at `paths`, building and persisting it from `corpus` when absent or when the
/// posting blob no longer decodes. Callers on the same location are serialized, so at most one
/// of them builds.
pub fn get_or_build(paths: &IndexPaths, corpus: &Corpus) -> Result<InvertedIndex> {
    let lock = build_lock(paths);
    let _guard = lock.lock();
    match load(paths) {
        Ok(Some(index)) => return Ok(index),
        Ok(None) => tracing::info!(root = %paths.root.display(), "no index found, building"),
        Err(FuseError::Codec(e)) => tracing::warn!(root = %paths.root.display(), error = %e, "unreadable index, rebuilding"),
        Err(e) => return Err(e),
    }
    let index = InvertedIndex::build(corpus);
    persist(&index, paths)?;
    Ok(index)
}
