//! Incremental, throttled writer for one channel's dump file.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tracing::{debug, warn};

use crate::debounce::Debouncer;
use crate::error::Result;

struct WriterState {
    pending: String,
    file: Option<BufWriter<File>>,
    bytes_written: u64,
    error: Option<io::Error>,
}

impl WriterState {
    fn flush_pending(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        // After the first failure nothing more is written; the error is
        // reported once from `finish`.
        if self.error.is_some() {
            self.pending.clear();
            return;
        }
        let Some(file) = self.file.as_mut() else {
            self.pending.clear();
            return;
        };

        let chunk = std::mem::take(&mut self.pending);
        match file.write_all(chunk.as_bytes()).and_then(|_| file.flush()) {
            Ok(()) => self.bytes_written += chunk.len() as u64,
            Err(err) => {
                warn!("Failed to write dump chunk: {}", err);
                self.error = Some(err);
            }
        }
    }
}

fn lock(state: &Mutex<WriterState>) -> MutexGuard<'_, WriterState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Written { path: PathBuf, bytes: u64 },
    /// Nothing was fetched, the empty file was deleted.
    Removed { path: PathBuf },
}

/// Owns one open output file. Appended text is buffered and written at most
/// once per throttle window.
pub struct IncrementalWriter {
    path: PathBuf,
    state: Arc<Mutex<WriterState>>,
    flush_timer: Debouncer,
}

impl IncrementalWriter {
    /// Create (or truncate) the file at `path`. The parent directory must
    /// already exist.
    pub fn create<P: AsRef<Path>>(path: P, throttle: Duration) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)?;

        Ok(Self {
            path,
            state: Arc::new(Mutex::new(WriterState {
                pending: String::new(),
                file: Some(BufWriter::new(file)),
                bytes_written: 0,
                error: None,
            })),
            flush_timer: Debouncer::new(throttle),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Queue text and (re)arm the flush timer.
    pub fn append(&self, chunk: &str) {
        if chunk.is_empty() {
            return;
        }
        lock(&self.state).pending.push_str(chunk);

        let state = Arc::clone(&self.state);
        self.flush_timer.schedule(move || lock(&state).flush_pending());
    }

    pub fn bytes_written(&self) -> u64 {
        lock(&self.state).bytes_written
    }

    /// Write whatever is still pending, close the file and, if `fetched` is
    /// zero, delete it.
    pub fn finish(self, fetched: u64) -> Result<WriteOutcome> {
        self.flush_timer.cancel();

        let (bytes, error) = {
            let mut state = lock(&self.state);
            state.flush_pending();
            if let Some(mut file) = state.file.take() {
                if let Err(err) = file.flush() {
                    state.error.get_or_insert(err);
                }
            }
            (state.bytes_written, state.error.take())
        };

        if let Some(err) = error {
            return Err(err.into());
        }

        if fetched == 0 {
            fs::remove_file(&self.path)?;
            debug!(path = %self.path.display(), "Removed empty dump file");
            return Ok(WriteOutcome::Removed { path: self.path });
        }

        Ok(WriteOutcome::Written {
            path: self.path,
            bytes,
        })
    }
}
