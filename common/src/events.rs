//! Observer surface for transfer progress and auditing.
//!
//! State machines report lifecycle events through the [`Observer`] trait;
//! every hook has a no-op default so callers implement only what they need.
//! Handlers must not fail - errors travel exclusively through the `error`
//! parameter of the `end_*` hooks.

use serde::{Deserialize, Serialize};

/// Which side of the transfer an event belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub enum Op {
    Send,
    Receive,
}

impl std::fmt::Display for Op {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Op::Send => write!(f, "send"),
            Op::Receive => write!(f, "receive"),
        }
    }
}

/// Progress/audit hooks offered by callers of the transfer state machines.
///
/// `start_*` fires strictly before any payload I/O for the entry, `end_*`
/// strictly after; folder events bracket the events of the folder's
/// children.
pub trait Observer: Send + Sync {
    fn start_folder(&self, _op: Op, _path: &std::path::Path, _mode: u32) {}
    fn end_folder(
        &self,
        _op: Op,
        _path: &std::path::Path,
        _mode: u32,
        _error: Option<&dyn std::error::Error>,
    ) {
    }
    fn start_file(&self, _op: Op, _path: &std::path::Path, _size: u64, _mode: u32) {}
    fn end_file(
        &self,
        _op: Op,
        _path: &std::path::Path,
        _size: u64,
        _mode: u32,
        _error: Option<&dyn std::error::Error>,
    ) {
    }
}

/// The absent observer.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopObserver;

impl Observer for NoopObserver {}

/// Shared no-op instance for callers that do not observe.
pub static NOOP_OBSERVER: NoopObserver = NoopObserver;

#[derive(Copy, Clone, Debug, Default, Deserialize, Serialize)]
pub struct Summary {
    pub files_transferred: usize,
    pub folders_transferred: usize,
    pub bytes_transferred: u64,
    pub errors: usize,
}

impl std::ops::Add for Summary {
    type Output = Self;
    fn add(self, other: Self) -> Self {
        Self {
            files_transferred: self.files_transferred + other.files_transferred,
            folders_transferred: self.folders_transferred + other.folders_transferred,
            bytes_transferred: self.bytes_transferred + other.bytes_transferred,
            errors: self.errors + other.errors,
        }
    }
}

impl std::fmt::Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "files transferred: {}\n\
            folders transferred: {}\n\
            bytes transferred: {}\n\
            errors: {}",
            self.files_transferred,
            self.folders_transferred,
            bytesize::ByteSize(self.bytes_transferred),
            self.errors
        )
    }
}

/// Observer tallying completed entries into a [`Summary`].
#[derive(Debug, Default)]
pub struct Counters {
    files: std::sync::atomic::AtomicUsize,
    folders: std::sync::atomic::AtomicUsize,
    bytes: std::sync::atomic::AtomicU64,
    errors: std::sync::atomic::AtomicUsize,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn summary(&self) -> Summary {
        let order = std::sync::atomic::Ordering::Relaxed;
        Summary {
            files_transferred: self.files.load(order),
            folders_transferred: self.folders.load(order),
            bytes_transferred: self.bytes.load(order),
            errors: self.errors.load(order),
        }
    }
}

impl Observer for Counters {
    fn end_folder(
        &self,
        _op: Op,
        _path: &std::path::Path,
        _mode: u32,
        error: Option<&dyn std::error::Error>,
    ) {
        let order = std::sync::atomic::Ordering::Relaxed;
        if error.is_some() {
            self.errors.fetch_add(1, order);
        } else {
            self.folders.fetch_add(1, order);
        }
    }

    fn end_file(
        &self,
        _op: Op,
        _path: &std::path::Path,
        size: u64,
        _mode: u32,
        error: Option<&dyn std::error::Error>,
    ) {
        let order = std::sync::atomic::Ordering::Relaxed;
        if error.is_some() {
            self.errors.fetch_add(1, order);
        } else {
            self.files.fetch_add(1, order);
            self.bytes.fetch_add(size, order);
        }
    }
}
