//! The source side of a transfer: `scp -f` semantics.
//!
//! Walks the local filesystem and emits records to the peer. Glob patterns
//! expand against their base directory; entries a non-recursive transfer
//! cannot express degrade to in-band warnings rather than aborting the
//! whole exchange, matching the reference behavior.

use async_recursion::async_recursion;
use serde::{Deserialize, Serialize};
use std::os::unix::fs::MetadataExt;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::errors::{Error, Result};
use crate::pathres;
use crate::wire;

#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct Settings {
    /// Descend into directories and emit `D`/`E` scopes.
    pub recursive: bool,
    /// Emit `T` preambles and real permission bits (`-p`).
    pub preserve: bool,
    /// Copy buffer size for payload streaming.
    pub buffer_size: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            recursive: false,
            preserve: false,
            buffer_size: wire::DEFAULT_COPY_BUFFER_SIZE,
        }
    }
}

/// Sender state machine driving the source side of a channel.
pub struct Sender<'a, R, W> {
    wire: wire::Wire<R, W>,
    settings: Settings,
    observer: &'a dyn common::events::Observer,
}

impl<'a, R, W> Sender<'a, R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(input: R, output: W, settings: Settings) -> Self {
        Self::with_observer(input, output, settings, &common::events::NOOP_OBSERVER)
    }

    pub fn with_observer(
        input: R,
        output: W,
        settings: Settings,
        observer: &'a dyn common::events::Observer,
    ) -> Self {
        Self {
            wire: wire::Wire::new(input, output),
            settings,
            observer,
        }
    }

    /// Expand and transmit every source pattern.
    #[tracing::instrument(skip_all, fields(patterns = ?patterns))]
    pub async fn run(mut self, patterns: &[String]) -> Result<()> {
        let result = self.send_all(patterns).await;
        if let Err(error) = &result {
            tracing::debug!("send failed: {:#}", error);
            if error.reportable() {
                let _ = self.wire.send_error(&error.to_string()).await;
            }
        }
        result
    }

    async fn send_all(&mut self, patterns: &[String]) -> Result<()> {
        // the peer signals readiness before the first record
        self.wire.read_ack(false).await?;
        for pattern in patterns {
            self.send_pattern(pattern).await?;
        }
        Ok(())
    }

    async fn send_pattern(&mut self, pattern: &str) -> Result<()> {
        let Some((base, leaf_pattern)) = pathres::split_glob(pattern) else {
            return self.send_literal(pattern).await;
        };
        tracing::debug!("expanding {:?} under {:?}", leaf_pattern, base);
        let matcher = pathres::compile_leaf(&leaf_pattern)?;
        let mut entries = match tokio::fs::read_dir(&base).await {
            Ok(entries) => entries,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(base));
            }
            Err(error) => return Err(error.into()),
        };
        let mut matched = false;
        while let Some(entry) = entries.next_entry().await? {
            let entry_name = entry.file_name();
            if !matcher.is_match(std::path::Path::new(&entry_name)) {
                continue;
            }
            matched = true;
            let entry_path = entry.path();
            let display_name = entry_name.to_string_lossy().into_owned();
            match tokio::fs::metadata(&entry_path).await {
                Ok(metadata) if metadata.is_file() => {
                    self.send_file(&entry_path, &metadata).await?;
                }
                Ok(metadata) if metadata.is_dir() => {
                    if self.settings.recursive {
                        self.send_dir(&entry_path, &metadata).await?;
                    } else {
                        self.wire
                            .send_warning(&format!("{display_name} not a regular file"))
                            .await?;
                    }
                }
                Ok(_) => {
                    self.wire
                        .send_warning(&format!("{display_name} unknown file type"))
                        .await?;
                }
                Err(error) => {
                    tracing::debug!("cannot classify {:?}: {}", entry_path, error);
                    self.wire
                        .send_warning(&format!("{display_name} unknown file type"))
                        .await?;
                }
            }
        }
        if !matched {
            // an unmatched pattern keeps the exchange alive; the peer sees
            // an advisory and moves on
            self.wire
                .send_warning(&format!("{pattern} no such file or directory"))
                .await?;
        }
        Ok(())
    }

    async fn send_literal(&mut self, pattern: &str) -> Result<()> {
        let path = pathres::resolve_local(None, pattern);
        let Some(metadata) = pathres::stat(&path).await? else {
            return Err(Error::NotFound(path));
        };
        if metadata.is_file() {
            self.send_file(&path, &metadata).await
        } else if metadata.is_dir() {
            if self.settings.recursive {
                self.send_dir(&path, &metadata).await
            } else {
                Err(Error::IsADirectory(path))
            }
        } else {
            Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{path:?}: not a regular file"),
            )))
        }
    }

    async fn send_file(&mut self, path: &std::path::Path, metadata: &std::fs::Metadata) -> Result<()> {
        let size = metadata.len();
        let mode = if self.settings.preserve {
            common::attrs::mode_bits(metadata)
        } else {
            common::attrs::DEFAULT_FILE_MODE
        };
        tracing::debug!("sending file {:?} ({} bytes)", path, size);
        self.observer
            .start_file(common::events::Op::Send, path, size, mode);
        let result = self.send_file_data(path, metadata, size, mode).await;
        self.observer.end_file(
            common::events::Op::Send,
            path,
            size,
            mode,
            result
                .as_ref()
                .err()
                .map(|error| error as &dyn std::error::Error),
        );
        result
    }

    async fn send_file_data(
        &mut self,
        path: &std::path::Path,
        metadata: &std::fs::Metadata,
        size: u64,
        mode: u32,
    ) -> Result<()> {
        if self.settings.preserve {
            self.wire
                .write_header(&wire::Header::Times {
                    mtime: metadata.mtime(),
                    atime: metadata.atime(),
                })
                .await?;
            self.wire.read_ack(false).await?;
        }
        self.wire
            .write_header(&wire::Header::File {
                mode,
                size,
                name: pathres::leaf_name(path),
            })
            .await?;
        self.wire.read_ack(false).await?;
        let mut file = tokio::fs::File::open(path).await?;
        self.wire
            .send_payload(&mut file, size, self.settings.buffer_size)
            .await?;
        drop(file);
        // payload terminator doubles as our success byte
        self.wire.send_ack().await?;
        self.wire.read_ack(false).await?;
        Ok(())
    }

    #[async_recursion]
    async fn send_dir(&mut self, path: &std::path::Path, metadata: &std::fs::Metadata) -> Result<()> {
        let mode = if self.settings.preserve {
            common::attrs::mode_bits(metadata)
        } else {
            common::attrs::DEFAULT_DIR_MODE
        };
        tracing::debug!("sending directory {:?}", path);
        self.observer
            .start_folder(common::events::Op::Send, path, mode);
        let result = self.send_dir_contents(path, metadata, mode).await;
        self.observer.end_folder(
            common::events::Op::Send,
            path,
            mode,
            result
                .as_ref()
                .err()
                .map(|error| error as &dyn std::error::Error),
        );
        result
    }

    async fn send_dir_contents(
        &mut self,
        path: &std::path::Path,
        metadata: &std::fs::Metadata,
        mode: u32,
    ) -> Result<()> {
        if self.settings.preserve {
            self.wire
                .write_header(&wire::Header::Times {
                    mtime: metadata.mtime(),
                    atime: metadata.atime(),
                })
                .await?;
            self.wire.read_ack(false).await?;
        }
        self.wire
            .write_header(&wire::Header::Directory {
                mode,
                name: pathres::leaf_name(path),
            })
            .await?;
        self.wire.read_ack(false).await?;
        let mut entries = tokio::fs::read_dir(path).await?;
        while let Some(entry) = entries.next_entry().await? {
            let entry_path = entry.path();
            match tokio::fs::metadata(&entry_path).await {
                Ok(child) if child.is_file() => self.send_file(&entry_path, &child).await?,
                Ok(child) if child.is_dir() => self.send_dir(&entry_path, &child).await?,
                Ok(_) => tracing::debug!("skipping {:?}: not a regular file", entry_path),
                Err(error) => {
                    tracing::debug!("skipping {:?}: {}", entry_path, error);
                }
            }
        }
        self.wire.write_header(&wire::Header::EndDirectory).await?;
        self.wire.read_ack(false).await?;
        Ok(())
    }
}
