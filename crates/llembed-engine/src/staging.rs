//! In-memory staging of model bytes.
//!
//! A [`StagingArea`] owns a private copy of a model file so that a session can
//! be built from the `memory:` source without a filesystem path. Backends only
//! borrow the bytes for the duration of a load.

use llembed_core::StagingError;
use tracing::{debug, info};

/// Owned buffer holding a staged model.
#[derive(Debug, Default)]
pub struct StagingArea {
    buffer: Option<Box<[u8]>>,
}

impl StagingArea {
    /// Create an empty staging area.
    #[must_use]
    pub const fn new() -> Self {
        Self { buffer: None }
    }

    /// Copy `bytes` into a fresh buffer, replacing any staged model.
    ///
    /// The previous buffer is released before the copy is allocated, so on
    /// failure nothing remains staged.
    pub fn supply(&mut self, bytes: &[u8]) -> Result<(), StagingError> {
        self.release();

        if bytes.is_empty() {
            return Err(StagingError::Empty);
        }

        let mut copy = Vec::new();
        copy.try_reserve_exact(bytes.len())
            .map_err(|_| StagingError::Allocation { size: bytes.len() })?;
        copy.extend_from_slice(bytes);

        info!("Staged {} bytes of model data in memory", bytes.len());
        self.buffer = Some(copy.into_boxed_slice());
        Ok(())
    }

    /// Drop the staged buffer, if any.
    pub fn release(&mut self) {
        if let Some(old) = self.buffer.take() {
            debug!("Releasing {} staged bytes", old.len());
        }
    }

    /// The staged bytes, if a buffer has been supplied.
    #[must_use]
    pub fn bytes(&self) -> Option<&[u8]> {
        self.buffer.as_deref()
    }

    #[must_use]
    pub fn is_staged(&self) -> bool {
        self.buffer.is_some()
    }

    /// Size of the staged buffer in bytes (zero when empty).
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.as_ref().map_or(0, |b| b.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
