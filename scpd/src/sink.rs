//! The sink side of a transfer: `scp -t` semantics.
//!
//! Consumes records from the peer and writes the local filesystem. The only
//! mutable state between records is the buffered time preamble; the
//! directory stack is implicit in the recursion, so `D`/`E` balance holds by
//! construction and a stream that ends inside a directory scope is an error.

use async_recursion::async_recursion;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::errors::{Error, Result};
use crate::pathres;
use crate::wire;

#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct Settings {
    /// Accept `D`/`E` records and recreate directory trees.
    pub recursive: bool,
    /// The target must already exist as a directory (`-d`).
    pub must_be_directory: bool,
    /// Apply peer-supplied permission bits to received entries (`-p`).
    pub preserve: bool,
    /// Copy buffer size for payload streaming.
    pub buffer_size: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            recursive: false,
            must_be_directory: false,
            preserve: false,
            buffer_size: wire::DEFAULT_COPY_BUFFER_SIZE,
        }
    }
}

/// Receiver state machine driving the sink side of a channel.
pub struct Receiver<'a, R, W> {
    wire: wire::Wire<R, W>,
    settings: Settings,
    observer: &'a dyn common::events::Observer,
    pending_times: Option<(i64, i64)>,
}

impl<'a, R, W> Receiver<'a, R, W>
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
            pending_times: None,
        }
    }

    /// Run the transfer against `target` until the peer closes the channel.
    ///
    /// Failures are reported to the peer in-band where the channel still
    /// permits it, then propagated.
    #[tracing::instrument(skip_all, fields(target = ?target))]
    pub async fn run(mut self, target: &std::path::Path) -> Result<()> {
        let result = self.receive(target).await;
        if let Err(error) = &result {
            tracing::debug!("receive failed: {:#}", error);
            if error.reportable() {
                let _ = self.wire.send_error(&error.to_string()).await;
            }
        }
        result
    }

    async fn receive(&mut self, target: &std::path::Path) -> Result<()> {
        if self.settings.must_be_directory {
            match pathres::stat(target).await? {
                None => return Err(Error::NotFound(target.to_path_buf())),
                Some(metadata) if !metadata.is_dir() => {
                    return Err(Error::NotADirectory(target.to_path_buf()));
                }
                Some(_) => {}
            }
        }
        self.receive_into(target, false).await
    }

    /// Acknowledge readiness (equally: the enclosing `D` header) and consume
    /// records until the scope closes.
    #[async_recursion]
    async fn receive_into(&mut self, target: &std::path::Path, nested: bool) -> Result<()> {
        self.wire.send_ack().await?;
        loop {
            let Some(discriminator) = self.wire.read_ack(true).await? else {
                if nested {
                    // stream ended before the balancing E
                    return Err(Error::UnexpectedEof);
                }
                return Ok(());
            };
            match discriminator {
                b'C' => {
                    let line = self.read_record_line(discriminator).await?;
                    self.receive_file(target, &line).await?;
                }
                b'D' => {
                    let line = self.read_record_line(discriminator).await?;
                    if !self.settings.recursive {
                        return Err(Error::ProtocolViolation(format!(
                            "directory record in non-recursive transfer: {line:?}"
                        )));
                    }
                    self.receive_dir(target, &line).await?;
                }
                b'T' => {
                    let line = self.read_record_line(discriminator).await?;
                    let wire::Header::Times { mtime, atime } = wire::Header::parse(&line)? else {
                        return Err(Error::MalformedHeader(line));
                    };
                    // consecutive T records replace each other; last wins
                    self.pending_times = Some((mtime, atime));
                    self.wire.send_ack().await?;
                }
                b'E' => {
                    self.wire.read_line(false).await?;
                    self.wire.send_ack().await?;
                    return Ok(());
                }
                other => {
                    // stray acknowledgement echoes from legacy peers;
                    // ignoring them has been relied upon for interop
                    tracing::debug!("ignoring unexpected byte {:#04x}", other);
                }
            }
        }
    }

    async fn read_record_line(&mut self, discriminator: u8) -> Result<String> {
        let rest = self.wire.read_line(false).await?.unwrap_or_default();
        Ok(format!("{}{}", discriminator as char, rest))
    }

    async fn receive_file(&mut self, target: &std::path::Path, line: &str) -> Result<()> {
        let wire::Header::File { mode, size, name } = wire::Header::parse(line)? else {
            return Err(Error::MalformedHeader(line.to_string()));
        };
        let times = self.pending_times.take();
        let destination =
            pathres::arbitrate_destination(target, &name, pathres::TargetKind::File).await?;
        match pathres::stat(&destination).await? {
            Some(metadata) if metadata.is_dir() => {
                return Err(Error::IsADirectory(destination));
            }
            Some(_) => {
                if !common::attrs::is_writable(&destination).await? {
                    return Err(Error::NotWritable(destination));
                }
            }
            None => {}
        }
        tracing::debug!("receiving file {:?} ({} bytes)", destination, size);
        self.observer
            .start_file(common::events::Op::Receive, &destination, size, mode);
        let result = self.receive_file_data(&destination, mode, size, times).await;
        self.observer.end_file(
            common::events::Op::Receive,
            &destination,
            size,
            mode,
            result
                .as_ref()
                .err()
                .map(|error| error as &dyn std::error::Error),
        );
        result
    }

    async fn receive_file_data(
        &mut self,
        destination: &std::path::Path,
        mode: u32,
        size: u64,
        times: Option<(i64, i64)>,
    ) -> Result<()> {
        let mut file = tokio::fs::File::create(destination).await?;
        self.wire.send_ack().await?;
        self.wire
            .recv_payload(&mut file, size, self.settings.buffer_size)
            .await?;
        file.flush().await?;
        // release the handle before touching metadata, or the timestamps
        // would get clobbered
        drop(file);
        self.wire.read_payload_terminator().await?;
        if self.settings.preserve {
            common::attrs::set_permissions(destination, mode).await?;
            if let Some((mtime, atime)) = times {
                common::attrs::set_times(destination, mtime, atime).await?;
            }
        }
        self.wire.send_ack().await?;
        Ok(())
    }

    async fn receive_dir(&mut self, target: &std::path::Path, line: &str) -> Result<()> {
        let wire::Header::Directory { mode, name } = wire::Header::parse(line)? else {
            return Err(Error::MalformedHeader(line.to_string()));
        };
        let times = self.pending_times.take();
        let destination =
            pathres::arbitrate_destination(target, &name, pathres::TargetKind::Directory).await?;
        match pathres::stat(&destination).await? {
            Some(metadata) if !metadata.is_dir() => {
                return Err(Error::NotADirectory(destination));
            }
            Some(_) => {}
            None => tokio::fs::create_dir(&destination).await?,
        }
        tracing::debug!("receiving directory {:?}", destination);
        self.observer
            .start_folder(common::events::Op::Receive, &destination, mode);
        let result = self
            .receive_dir_contents(target, &destination, mode, times)
            .await;
        self.observer.end_folder(
            common::events::Op::Receive,
            &destination,
            mode,
            result
                .as_ref()
                .err()
                .map(|error| error as &dyn std::error::Error),
        );
        result
    }

    async fn receive_dir_contents(
        &mut self,
        target: &std::path::Path,
        destination: &std::path::Path,
        mode: u32,
        times: Option<(i64, i64)>,
    ) -> Result<()> {
        if self.settings.preserve {
            // legacy dialect quirk: directory attributes land on the
            // original target path, not the resolved destination
            common::attrs::set_permissions(target, mode).await?;
            if let Some((mtime, atime)) = times {
                common::attrs::set_times(target, mtime, atime).await?;
            }
        }
        // the recursion's entry acknowledgement answers our D header; the
        // balancing E is acknowledged inside before the call returns
        self.receive_into(destination, true).await
    }
}
