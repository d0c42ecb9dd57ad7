//! Save transaction: backup, patch-or-rewrite, atomic replace.
//!
//! The transaction is an explicit state machine
//! (`Idle → HashPending → BackingUp → Patching → Replacing → Done`, with
//! error exits to `Failed`) so the crash-safety argument is visible in the
//! states themselves: the backup exists before the source is mutated, and
//! the final rename is the single observable commit point.

use std::collections::HashMap;
use std::ffi::OsString;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::thread::{self, JoinHandle};

use tracing::{debug, info, warn};

use crate::copy::{CancelToken, DEFAULT_CHUNK_SIZE, ProgressCallback, report};
use crate::error::{FatalError, PatchError, SaveError};
use crate::fallback::rewrite_file;
use crate::hash::payload_sha256;
use crate::header::read_metadata;
use crate::keys;
use crate::patch::{merge_metadata, patch_file};

/// Suffix of the temp file built next to the source.
pub const TEMP_SUFFIX: &str = ".tmp";
/// Suffix of the pre-mutation backup.
pub const BACKUP_SUFFIX: &str = ".bak";

/// A requested metadata save.
#[derive(Debug, Clone)]
pub struct SaveRequest {
    pub source: PathBuf,
    /// Field → new value. An empty string clears the field but keeps the
    /// key; fields absent from the map are left untouched.
    pub edits: HashMap<String, String>,
    /// Keep the `.bak` file after a successful save.
    pub keep_backup: bool,
    pub chunk_size: usize,
}

impl SaveRequest {
    pub fn new(source: impl Into<PathBuf>, edits: HashMap<String, String>) -> Self {
        Self { source: source.into(), edits, keep_backup: false, chunk_size: DEFAULT_CHUNK_SIZE }
    }
}

/// States of the save state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveState {
    Idle,
    HashPending,
    BackingUp,
    Patching,
    Replacing,
    Done,
    Failed,
}

/// Asynchronous notifications delivered to the caller.
#[derive(Debug)]
pub enum SaveEvent {
    Progress { percent: u8, stage: String },
    Finished { path: PathBuf },
    /// `backup` names the `.bak` file when one survives for manual
    /// recovery.
    Failed { error: SaveError, backup: Option<PathBuf> },
}

/// One metadata save against one source file.
///
/// The transaction exclusively owns `source + ".tmp"` and `source + ".bak"`
/// for its duration. No filesystem lock is taken; callers must not run two
/// transactions against the same path concurrently (the single-slot
/// [`Saver`] enforces this per editor session).
#[derive(Debug)]
pub struct SaveTransaction {
    request: SaveRequest,
    temp_path: PathBuf,
    backup_path: PathBuf,
    state: SaveState,
    cancel: CancelToken,
}

impl SaveTransaction {
    pub fn new(request: SaveRequest) -> Self {
        let temp_path = sibling(&request.source, TEMP_SUFFIX);
        let backup_path = sibling(&request.source, BACKUP_SUFFIX);
        Self { request, temp_path, backup_path, state: SaveState::Idle, cancel: CancelToken::new() }
    }

    pub fn state(&self) -> SaveState {
        self.state
    }

    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    pub fn backup_path(&self) -> &Path {
        &self.backup_path
    }

    /// Token for cooperative cancellation, effective at the next chunk or
    /// tensor boundary.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Run the transaction to completion on the current thread, returning
    /// the saved path.
    ///
    /// On failure the temp file is removed; the source and backup are left
    /// exactly as the failing state found them.
    pub fn run(mut self, progress: Option<&ProgressCallback>) -> Result<PathBuf, SaveError> {
        match self.run_inner(progress) {
            Ok(()) => {
                self.transition(SaveState::Done);
                Ok(self.request.source.clone())
            }
            Err(error) => {
                self.transition(SaveState::Failed);
                if self.temp_path.exists()
                    && let Err(e) = fs::remove_file(&self.temp_path)
                {
                    warn!(path = %self.temp_path.display(), "could not remove temp file: {e}");
                }
                Err(error)
            }
        }
    }

    fn run_inner(&mut self, progress: Option<&ProgressCallback>) -> Result<(), SaveError> {
        let source = self.request.source.clone();

        self.transition(SaveState::HashPending);
        self.ensure_integrity_hash(progress);

        self.transition(SaveState::BackingUp);
        report(progress, 0, "Creating backup...");
        fs::copy(&source, &self.backup_path)
            .map_err(|e| SaveError::Backup { path: self.backup_path.clone(), source: e })?;

        self.transition(SaveState::Patching);
        let patched = patch_file(
            &source,
            &self.temp_path,
            &self.request.edits,
            self.request.chunk_size,
            &self.cancel,
            progress,
        );
        match patched {
            Ok(()) => debug!("fast path succeeded"),
            Err(PatchError::Cancelled) => return Err(SaveError::Cancelled),
            Err(e) => {
                warn!("structural patch failed, trying full rewrite: {e}");
                if self.temp_path.exists() {
                    fs::remove_file(&self.temp_path)
                        .map_err(|e| SaveError::Fatal(FatalError::Io(e)))?;
                }
                match rewrite_file(&source, &self.temp_path, &self.request.edits, &self.cancel, progress)
                {
                    Ok(()) => {}
                    Err(FatalError::Cancelled) => return Err(SaveError::Cancelled),
                    Err(e) => return Err(SaveError::Fatal(e)),
                }
            }
        }

        self.transition(SaveState::Replacing);
        report(progress, 100, "Finalizing save...");
        self.replace_source()?;

        if !self.request.keep_backup
            && let Err(e) = fs::remove_file(&self.backup_path)
        {
            // The rename already committed; a stale .bak is not worth
            // failing the save over.
            warn!(path = %self.backup_path.display(), "could not remove backup: {e}");
        }
        Ok(())
    }

    /// Insert `modelspec.hash_sha256` into the pending edits when the
    /// merged metadata would lack it. Skipped with a warning when the
    /// source header cannot be read; the patching state decides such a
    /// file's fate.
    fn ensure_integrity_hash(&mut self, progress: Option<&ProgressCallback>) {
        let source = &self.request.source;
        let already_present = match read_metadata(source) {
            Ok(existing) => {
                merge_metadata(&existing, &self.request.edits).contains_key(keys::HASH_SHA256)
            }
            Err(e) => {
                warn!("could not read existing metadata: {e}");
                self.request.edits.contains_key(keys::HASH_SHA256)
            }
        };
        if already_present {
            return;
        }
        report(progress, 0, "Computing file hash...");
        match payload_sha256(source) {
            Ok(digest) => {
                self.request.edits.insert(keys::HASH_SHA256.to_string(), digest);
            }
            Err(e) => warn!("skipping integrity hash: {e}"),
        }
    }

    fn replace_source(&self) -> Result<(), SaveError> {
        let replace_err =
            |e| SaveError::Replace { path: self.request.source.clone(), source: e };
        // Flush the finished temp file to disk before it becomes "the
        // file".
        File::open(&self.temp_path).and_then(|f| f.sync_all()).map_err(replace_err)?;
        // Rename-over is the atomic commit point.
        fs::rename(&self.temp_path, &self.request.source).map_err(replace_err)?;
        info!(path = %self.request.source.display(), "metadata saved");
        Ok(())
    }

    fn transition(&mut self, next: SaveState) {
        debug!(from = ?self.state, to = ?next, "save state transition");
        self.state = next;
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Single-slot background executor: at most one save in flight.
///
/// The controlling surface never blocks; it receives progress, completion,
/// and error notifications over the handle's channel. A second submission
/// while one is active is rejected with [`SaveError::SaveInProgress`], not
/// queued.
#[derive(Debug, Default)]
pub struct Saver {
    busy: Arc<AtomicBool>,
}

impl Saver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Spawn a worker thread for `request` and return a handle delivering
    /// [`SaveEvent`]s.
    pub fn submit(&self, request: SaveRequest) -> Result<SaveHandle, SaveError> {
        if self.busy.swap(true, Ordering::SeqCst) {
            return Err(SaveError::SaveInProgress);
        }
        let (sender, events) = mpsc::channel();
        let transaction = SaveTransaction::new(request);
        let cancel = transaction.cancel_token();
        let backup_path = transaction.backup_path().to_path_buf();
        let busy = Arc::clone(&self.busy);
        let worker = thread::spawn(move || {
            let progress_sender = sender.clone();
            let progress: ProgressCallback = Arc::new(move |percent, stage: &str| {
                let _ = progress_sender
                    .send(SaveEvent::Progress { percent, stage: stage.to_string() });
            });
            let event = match transaction.run(Some(&progress)) {
                Ok(path) => SaveEvent::Finished { path },
                Err(error) => {
                    let backup = backup_path.exists().then_some(backup_path);
                    SaveEvent::Failed { error, backup }
                }
            };
            let _ = sender.send(event);
            busy.store(false, Ordering::SeqCst);
        });
        Ok(SaveHandle { events, cancel, worker })
    }
}

/// Handle to an in-flight save.
#[derive(Debug)]
pub struct SaveHandle {
    events: Receiver<SaveEvent>,
    cancel: CancelToken,
    worker: JoinHandle<()>,
}

impl SaveHandle {
    /// Event stream for the caller's dispatch loop.
    pub fn events(&self) -> &Receiver<SaveEvent> {
        &self.events
    }

    /// Request cooperative cancellation.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Block until the worker finishes, returning every event it emitted
    /// that has not been consumed yet.
    pub fn join(self) -> Vec<SaveEvent> {
        let _ = self.worker.join();
        self.events.try_iter().collect()
    }
}
