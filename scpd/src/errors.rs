//! Failure taxonomy of the transfer engine.

pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can abort a transfer.
///
/// Stream and filesystem I/O surface as [`Error::Io`] / [`Error::Fs`];
/// channel closure shows up as whichever of `Io` or `UnexpectedEof` the next
/// stream operation produces. The engine never retries - recovery policy
/// belongs to the caller.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Fs(#[from] anyhow::Error),
    #[error("unexpected end of stream")]
    UnexpectedEof,
    #[error("malformed header: {0}")]
    MalformedHeader(String),
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    #[error("peer rejected transfer: {0}")]
    PeerRejected(String),
    #[error("cannot determine whether {0:?} exists")]
    AccessIndeterminate(std::path::PathBuf),
    #[error("{0:?}: no such file or directory")]
    NotFound(std::path::PathBuf),
    #[error("{0:?}: not a directory")]
    NotADirectory(std::path::PathBuf),
    #[error("{0:?}: is a directory")]
    IsADirectory(std::path::PathBuf),
    #[error("cannot write to {0:?}")]
    CannotWrite(std::path::PathBuf),
    #[error("{0:?}: permission denied")]
    NotWritable(std::path::PathBuf),
}

impl Error {
    /// Whether an in-band `0x02` report to the peer still makes sense.
    ///
    /// Rejections we received from the peer must not be echoed back, and a
    /// stream that already failed or ended cannot carry a report.
    pub(crate) fn reportable(&self) -> bool {
        !matches!(
            self,
            Error::Io(_) | Error::UnexpectedEof | Error::PeerRejected(_)
        )
    }
}
