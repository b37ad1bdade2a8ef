//! Retrying file decorator
//!
//! Wraps any [`StorageFile`] and retries individual operations that fail with
//! a transient error kind (`Interrupted`, `WouldBlock`, `TimedOut`). Every
//! other error is returned to the caller unchanged on the first attempt.
//!
//! Retrying an individual positioned write is safe because it rewrites the
//! same bytes at the same offset.

use std::io;

use tracing::debug;

use crate::error::ConfigError;
use crate::file::StorageFile;

/// Default number of attempts per operation
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Upper bound on per-operation I/O attempts
pub const MAX_RETRY_ATTEMPTS: u32 = 16;

/// Reject configured attempt counts above [`MAX_RETRY_ATTEMPTS`].
pub fn validate_retry_attempts(attempts: u32) -> Result<(), ConfigError> {
    if attempts > MAX_RETRY_ATTEMPTS {
        return Err(ConfigError::TooManyRetryAttempts {
            attempts,
            max: MAX_RETRY_ATTEMPTS,
        });
    }
    Ok(())
}

/// File decorator retrying transient I/O failures.
#[derive(Debug)]
pub struct RetryingFile<F> {
    inner: F,
    max_attempts: u32,
}

impl<F: StorageFile> RetryingFile<F> {
    /// Wrap `inner`, allowing up to `max_attempts` tries per operation.
    ///
    /// A value of 0 is treated as 1.
    pub fn new(inner: F, max_attempts: u32) -> Self {
        RetryingFile {
            inner,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Maximum attempts per operation
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Unwrap the decorated file
    pub fn into_inner(self) -> F {
        self.inner
    }

    fn retry<T>(
        &mut self,
        op: &'static str,
        mut f: impl FnMut(&mut F) -> io::Result<T>,
    ) -> io::Result<T> {
        let mut attempt = 1;
        loop {
            match f(&mut self.inner) {
                Ok(value) => return Ok(value),
                Err(e) if is_transient(&e) && attempt < self.max_attempts => {
                    debug!(op, attempt, error = %e, "Retrying transient I/O failure");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Box `file`, wrapping it in a [`RetryingFile`] when `max_attempts > 1`.
pub fn with_retries<F: StorageFile + 'static>(file: F, max_attempts: u32) -> Box<dyn StorageFile> {
    if max_attempts > 1 {
        Box::new(RetryingFile::new(file, max_attempts))
    } else {
        Box::new(file)
    }
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

impl<F: StorageFile> StorageFile for RetryingFile<F> {
    fn read_exact_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        self.retry("read", |f| f.read_exact_at(offset, buf))
    }

    fn write_all_at(&mut self, offset: u64, data: &[u8]) -> io::Result<()> {
        self.retry("write", |f| f.write_all_at(offset, data))
    }

    fn sync(&mut self) -> io::Result<()> {
        self.retry("sync", |f| f.sync())
    }

    fn len(&mut self) -> io::Result<u64> {
        self.retry("len", |f| f.len())
    }

    fn set_len(&mut self, len: u64) -> io::Result<()> {
        self.retry("set_len", |f| f.set_len(len))
    }
}
