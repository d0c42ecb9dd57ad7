//! Buffered byte-range copy with stepped progress reporting and cooperative
//! cancellation.

use std::io::{ErrorKind, Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;

/// Default copy chunk size (32 MiB).
pub const DEFAULT_CHUNK_SIZE: usize = 32 * 1024 * 1024;

/// Progress callback: stepped percentage plus a stage message.
pub type ProgressCallback = Arc<dyn Fn(u8, &str) + Send + Sync>;

/// Cooperative cancellation flag, checked once per chunk or tensor.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Error)]
pub enum CopyError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("copy cancelled")]
    Cancelled,
}

/// Copy `reader` to `writer` until EOF in fixed-size chunks.
///
/// Progress is reported as percent of `total_bytes`, floored to the nearest
/// 2% step and delivered at most once per step transition, so a sink never
/// sees more than ~50 calls regardless of file size. A `total_bytes` of
/// zero completes trivially without reporting. Errors propagate
/// immediately; discarding partial output is the caller's job.
pub fn copy_chunked<R, W>(
    reader: &mut R,
    writer: &mut W,
    total_bytes: u64,
    chunk_size: usize,
    cancel: &CancelToken,
    mut on_step: impl FnMut(u8),
) -> Result<u64, CopyError>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    let mut buf = vec![0u8; chunk_size.max(1)];
    let mut copied: u64 = 0;
    let mut last_step: i32 = -1;
    loop {
        if cancel.is_cancelled() {
            return Err(CopyError::Cancelled);
        }
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(CopyError::Io(e)),
        };
        writer.write_all(&buf[..n])?;
        copied += n as u64;
        if total_bytes > 0 {
            let percent = (copied.min(total_bytes) * 100 / total_bytes) as i32;
            let step = percent - percent % 2;
            if step > last_step {
                last_step = step;
                on_step(step as u8);
            }
        }
    }
    Ok(copied)
}

/// Forward a progress report to an optional sink.
pub(crate) fn report(progress: Option<&ProgressCallback>, percent: u8, stage: &str) {
    if let Some(cb) = progress {
        cb(percent, stage);
    }
}
