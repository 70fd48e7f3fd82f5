//! File-backed [`ClusterState`]: one JSON document per run id in a shared directory.
//!
//! Patches are serialized across processes with `flock()` on `<run_id>.lock`
//! and published by writing a temp file and renaming it over the document, so
//! readers never observe a partial write.

#![allow(missing_docs)]

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;

use crate::core::errors::{EraserError, Result};
use crate::state::ClusterState;
use crate::state::document::{ImageJob, StateSection, merge_patch};

#[derive(Debug, Clone)]
pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    #[must_use]
    pub fn document_path(&self, run_id: &str) -> PathBuf {
        self.dir.join(format!("{run_id}.json"))
    }

    fn lock_path(&self, run_id: &str) -> PathBuf {
        self.dir.join(format!("{run_id}.lock"))
    }

    #[cfg(unix)]
    fn acquire_lock(&self, run_id: &str) -> Result<nix::fcntl::Flock<File>> {
        let lock_path = self.lock_path(run_id);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .mode(0o600)
            .open(&lock_path)
            .map_err(|e| EraserError::io(&lock_path, e))?;

        nix::fcntl::Flock::lock(file, nix::fcntl::FlockArg::LockExclusive).map_err(|(_file, e)| {
            EraserError::state_io("lock", run_id, format!("flock {}: {e}", lock_path.display()))
        })
    }

    #[cfg(not(unix))]
    fn acquire_lock(&self, _run_id: &str) -> Result<()> {
        Ok(())
    }

    fn read_raw(&self, run_id: &str) -> Result<Option<Value>> {
        let path = self.document_path(run_id);
        match fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| EraserError::state_io("read", run_id, format!("{}: {e}", path.display()))),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(EraserError::io(&path, source)),
        }
    }

    fn write_atomic(&self, run_id: &str, doc: &Value) -> Result<()> {
        let path = self.document_path(run_id);
        let tmp = self
            .dir
            .join(format!(".{run_id}.json.tmp-{}", std::process::id()));
        let body = serde_json::to_vec_pretty(doc)?;

        let mut file = File::create(&tmp).map_err(|e| EraserError::io(&tmp, e))?;
        file.write_all(&body).map_err(|e| EraserError::io(&tmp, e))?;
        file.sync_all().map_err(|e| EraserError::io(&tmp, e))?;
        drop(file);

        fs::rename(&tmp, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            EraserError::io(&path, e)
        })
    }
}

#[async_trait]
impl ClusterState for FileStateStore {
    async fn get(&self, run_id: &str) -> Result<ImageJob> {
        let doc = self.read_raw(run_id)?.ok_or_else(|| {
            EraserError::state_io(
                "get",
                run_id,
                format!("no record at {}", self.document_path(run_id).display()),
            )
        })?;
        serde_json::from_value(doc).map_err(|e| EraserError::state_io("get", run_id, e))
    }

    async fn patch_merge(&self, run_id: &str, section: StateSection, patch: &Value) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| EraserError::io(&self.dir, e))?;
        let _lock = self.acquire_lock(run_id)?;

        let mut doc = match (self.read_raw(run_id)?, section) {
            (Some(doc), _) => doc,
            (None, StateSection::Spec) => Value::Object(serde_json::Map::new()),
            (None, StateSection::Status) => {
                return Err(EraserError::state_io(
                    "patch",
                    run_id,
                    "record does not exist; status patches need a published spec",
                ));
            }
        };
        merge_patch(&mut doc, &section.wrap(patch));
        self.write_atomic(run_id, &doc)
    }
}
