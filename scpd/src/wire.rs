//! Half-duplex framing over the peer channel.
//!
//! [`Wire`] is the sole accessor of the channel's byte streams. It reads and
//! writes the single-byte acknowledgement codes, the newline-terminated
//! control headers and the length-framed payloads; everything above it deals
//! in [`Header`] values and exact byte counts.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::errors::{Error, Result};

/// Acknowledgement: success.
pub const OK: u8 = 0x00;
/// Acknowledgement: advisory warning, followed by a diagnostic line.
pub const WARNING: u8 = 0x01;
/// Acknowledgement: fatal error, followed by a diagnostic line.
pub const ERROR: u8 = 0x02;

/// Smallest copy buffer the codec will work with.
pub const MIN_COPY_BUFFER_SIZE: usize = 127;
/// Largest copy buffer the codec will allocate.
pub const MAX_COPY_BUFFER_SIZE: usize = 1 << 20;
/// Copy buffer used when the caller does not care.
pub const DEFAULT_COPY_BUFFER_SIZE: usize = 8192;

/// A control record as it appears on the wire, sans trailing newline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Header {
    /// `C<mode> <size> <name>` - regular file announcement.
    File { mode: u32, size: u64, name: String },
    /// `D<mode> 0 <name>` - directory announcement.
    Directory { mode: u32, name: String },
    /// `E` - closes the most recent unmatched directory.
    EndDirectory,
    /// `T<mtime> 0 <atime> 0` - timestamps attaching to the next `C`/`D`.
    Times { mtime: i64, atime: i64 },
}

impl Header {
    pub fn encode(&self) -> String {
        match self {
            Header::File { mode, size, name } => {
                format!("C{} {} {}", common::attrs::format_octal(*mode), size, name)
            }
            Header::Directory { mode, name } => {
                format!("D{} 0 {}", common::attrs::format_octal(*mode), name)
            }
            Header::EndDirectory => "E".to_string(),
            Header::Times { mtime, atime } => format!("T{mtime} 0 {atime} 0"),
        }
    }

    /// Parse a full header line, discriminator included.
    pub fn parse(line: &str) -> Result<Header> {
        match line.as_bytes().first() {
            Some(b'C') => {
                let (mode, size, name) = parse_file_fields(line)?;
                Ok(Header::File { mode, size, name })
            }
            Some(b'D') => {
                let (mode, size, name) = parse_file_fields(line)?;
                if size != 0 {
                    return Err(Error::MalformedHeader(format!(
                        "directory record with nonzero size: {line:?}"
                    )));
                }
                Ok(Header::Directory { mode, name })
            }
            Some(b'E') => Ok(Header::EndDirectory),
            Some(b'T') => parse_times_fields(line),
            _ => Err(Error::MalformedHeader(format!(
                "unrecognized record: {line:?}"
            ))),
        }
    }
}

/// Column parse of `C`/`D` lines: mode is chars 1-4, size runs from column 6
/// to the next space, the remainder is the name.
fn parse_file_fields(line: &str) -> Result<(u32, u64, String)> {
    let malformed = || Error::MalformedHeader(format!("bad file record: {line:?}"));
    if line.len() < 6 || line.as_bytes()[5] != b' ' {
        return Err(malformed());
    }
    let mode_field = line.get(1..5).ok_or_else(malformed)?;
    let mode = common::attrs::parse_octal(mode_field).map_err(|_| malformed())?;
    let rest = line.get(6..).ok_or_else(malformed)?;
    let (size_field, name) = rest.split_once(' ').ok_or_else(malformed)?;
    let size: i64 = size_field.parse().map_err(|_| malformed())?;
    // negative sizes show up from broken peers; tolerated as empty payloads
    let size = if size < 0 {
        tracing::warn!("negative size in record {:?}", line);
        0
    } else {
        size as u64
    };
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return Err(Error::MalformedHeader(format!(
            "unacceptable entry name: {name:?}"
        )));
    }
    Ok((mode, size, name.to_string()))
}

fn parse_times_fields(line: &str) -> Result<Header> {
    let malformed = || Error::MalformedHeader(format!("bad time record: {line:?}"));
    let fields: Vec<&str> = line[1..].split(' ').collect();
    if fields.len() != 4 {
        return Err(malformed());
    }
    let mtime: i64 = fields[0].parse().map_err(|_| malformed())?;
    let atime: i64 = fields[2].parse().map_err(|_| malformed())?;
    // fields 1 and 3 are the sub-second components; this dialect always
    // writes 0 there and ignores whatever arrives
    Ok(Header::Times { mtime, atime })
}

/// Borrowing view exposing at most `remaining` bytes of a reader.
///
/// Dropping the view leaves the underlying stream open and positioned right
/// after the last byte read, so the payload terminator that follows a framed
/// payload stays in the stream for the acknowledgement discipline.
pub struct LimitedReader<'a, R> {
    inner: &'a mut R,
    remaining: u64,
}

impl<'a, R: AsyncRead + Unpin> LimitedReader<'a, R> {
    pub fn new(inner: &'a mut R, limit: u64) -> Self {
        Self {
            inner,
            remaining: limit,
        }
    }

    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    pub async fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let want = std::cmp::min(self.remaining, buf.len() as u64) as usize;
        if want == 0 {
            return Ok(0);
        }
        let count = self.inner.read(&mut buf[..want]).await?;
        self.remaining -= count as u64;
        Ok(count)
    }
}

fn copy_buffer(requested: usize, len: u64) -> Vec<u8> {
    let clamped = requested.clamp(MIN_COPY_BUFFER_SIZE, MAX_COPY_BUFFER_SIZE);
    let size = std::cmp::min(clamped as u64, std::cmp::max(len, 1)) as usize;
    vec![0u8; size]
}

/// Synchronous, half-duplex framer over the channel streams.
#[derive(Debug)]
pub struct Wire<R, W> {
    input: R,
    output: W,
}

impl<R: AsyncRead + Unpin, W: AsyncWrite + Unpin> Wire<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    async fn read_byte(&mut self) -> Result<Option<u8>> {
        let mut byte = [0u8; 1];
        if self.input.read(&mut byte).await? == 0 {
            return Ok(None);
        }
        Ok(Some(byte[0]))
    }

    /// Signal success to the peer.
    pub async fn send_ack(&mut self) -> Result<()> {
        self.output.write_all(&[OK]).await?;
        self.output.flush().await?;
        Ok(())
    }

    /// Emit an advisory `0x01` diagnostic; the transfer continues.
    pub async fn send_warning(&mut self, text: &str) -> Result<()> {
        self.send_diagnostic(WARNING, text).await
    }

    /// Emit a fatal `0x02` diagnostic.
    pub async fn send_error(&mut self, text: &str) -> Result<()> {
        self.send_diagnostic(ERROR, text).await
    }

    async fn send_diagnostic(&mut self, code: u8, text: &str) -> Result<()> {
        self.output.write_all(&[code]).await?;
        // a newline inside the text would desynchronize the line framing
        let text = text.replace('\n', " ");
        self.output.write_all(text.as_bytes()).await?;
        self.output.write_all(b"\n").await?;
        self.output.flush().await?;
        Ok(())
    }

    /// Read one acknowledgement byte.
    ///
    /// `0x01` consumes and logs the trailing diagnostic line; `0x02`
    /// consumes the line and fails with [`Error::PeerRejected`]. Every other
    /// byte is returned as-is - callers dispatching on record
    /// discriminators rely on that, and unknown bytes are deliberately
    /// accepted for interoperability with peers that echo stray
    /// acknowledgements. End-of-stream yields `None` when `allow_eof` is
    /// set and fails otherwise.
    pub async fn read_ack(&mut self, allow_eof: bool) -> Result<Option<u8>> {
        let Some(code) = self.read_byte().await? else {
            if allow_eof {
                return Ok(None);
            }
            return Err(Error::UnexpectedEof);
        };
        match code {
            OK => {}
            WARNING => {
                let line = self.read_line(false).await?.unwrap_or_default();
                tracing::warn!("received warning: {}", line);
            }
            ERROR => {
                let line = self.read_line(false).await?.unwrap_or_default();
                return Err(Error::PeerRejected(line));
            }
            _ => {}
        }
        Ok(Some(code))
    }

    /// Read bytes up to the next newline, lossily decoded.
    ///
    /// End-of-stream before any byte yields `None` when `allow_eof` is set;
    /// end-of-stream mid-line always fails.
    pub async fn read_line(&mut self, allow_eof: bool) -> Result<Option<String>> {
        let mut bytes = Vec::new();
        loop {
            match self.read_byte().await? {
                Some(b'\n') => break,
                Some(byte) => bytes.push(byte),
                None => {
                    if allow_eof && bytes.is_empty() {
                        return Ok(None);
                    }
                    return Err(Error::UnexpectedEof);
                }
            }
        }
        Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
    }

    /// Write a control record and its newline; never retries.
    pub async fn write_header(&mut self, header: &Header) -> Result<()> {
        tracing::debug!("sending header {:?}", header);
        self.output.write_all(header.encode().as_bytes()).await?;
        self.output.write_all(b"\n").await?;
        self.output.flush().await?;
        Ok(())
    }

    /// Copy exactly `len` payload bytes from the peer into `dst`.
    ///
    /// The trailing payload terminator is left in the stream.
    pub async fn recv_payload<D: AsyncWrite + Unpin>(
        &mut self,
        dst: &mut D,
        len: u64,
        buffer_size: usize,
    ) -> Result<u64> {
        let mut reader = LimitedReader::new(&mut self.input, len);
        let mut buf = copy_buffer(buffer_size, len);
        let mut copied = 0u64;
        loop {
            let count = reader.read(&mut buf).await?;
            if count == 0 {
                break;
            }
            dst.write_all(&buf[..count]).await?;
            copied += count as u64;
        }
        if copied != len {
            return Err(Error::UnexpectedEof);
        }
        Ok(copied)
    }

    /// Copy exactly `len` bytes from `src` to the peer.
    pub async fn send_payload<S: AsyncRead + Unpin>(
        &mut self,
        src: &mut S,
        len: u64,
        buffer_size: usize,
    ) -> Result<u64> {
        let mut reader = LimitedReader::new(src, len);
        let mut buf = copy_buffer(buffer_size, len);
        let mut copied = 0u64;
        loop {
            let count = reader.read(&mut buf).await?;
            if count == 0 {
                break;
            }
            self.output.write_all(&buf[..count]).await?;
            copied += count as u64;
        }
        if copied != len {
            return Err(Error::UnexpectedEof);
        }
        self.output.flush().await?;
        Ok(copied)
    }

    /// Consume the single byte the sender writes after a payload.
    ///
    /// `0x00` is the normal terminator; a `0x01` there is advisory like any
    /// other warning, anything else is a peer-side abort.
    pub async fn read_payload_terminator(&mut self) -> Result<()> {
        match self.read_byte().await? {
            Some(OK) => Ok(()),
            Some(WARNING) => {
                let line = self.read_line(false).await?.unwrap_or_default();
                tracing::warn!("received warning: {}", line);
                Ok(())
            }
            Some(ERROR) => {
                let line = self.read_line(false).await?.unwrap_or_default();
                Err(Error::PeerRejected(line))
            }
            Some(byte) => Err(Error::ProtocolViolation(format!(
                "unexpected byte {byte:#04x} after payload"
            ))),
            None => Err(Error::UnexpectedEof),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wire_over(input: &[u8]) -> Wire<&[u8], Vec<u8>> {
        Wire::new(input, Vec::new())
    }

    #[test]
    fn header_encoding_is_byte_exact() {
        assert_eq!(
            Header::File {
                mode: 0o644,
                size: 11,
                name: "out.txt".to_string()
            }
            .encode(),
            "C0644 11 out.txt"
        );
        assert_eq!(
            Header::Directory {
                mode: 0o755,
                name: "scp".to_string()
            }
            .encode(),
            "D0755 0 scp"
        );
        assert_eq!(Header::EndDirectory.encode(), "E");
        assert_eq!(
            Header::Times {
                mtime: 1700000000,
                atime: 1700000100
            }
            .encode(),
            "T1700000000 0 1700000100 0"
        );
    }

    #[test]
    fn header_parse_round_trip() {
        for header in [
            Header::File {
                mode: 0o640,
                size: 0,
                name: "empty".to_string(),
            },
            Header::Directory {
                mode: 0o700,
                name: "nested".to_string(),
            },
            Header::Times {
                mtime: 12345,
                atime: 67890,
            },
            Header::EndDirectory,
        ] {
            assert_eq!(Header::parse(&header.encode()).unwrap(), header);
        }
    }

    #[test]
    fn file_header_parses_names_with_spaces() {
        match Header::parse("C0644 5 hello world.txt").unwrap() {
            Header::File { mode, size, name } => {
                assert_eq!(mode, 0o644);
                assert_eq!(size, 5);
                assert_eq!(name, "hello world.txt");
            }
            other => panic!("expected file header, got {:?}", other),
        }
    }

    #[test]
    fn file_header_ignores_setuid_bits() {
        match Header::parse("C7777 11 out.txt").unwrap() {
            Header::File { mode, .. } => assert_eq!(mode, 0o777),
            other => panic!("expected file header, got {:?}", other),
        }
    }

    #[test]
    fn negative_size_is_tolerated_as_zero() {
        match Header::parse("C0644 -1 out.txt").unwrap() {
            Header::File { size, .. } => assert_eq!(size, 0),
            other => panic!("expected file header, got {:?}", other),
        }
    }

    #[test]
    fn directory_header_with_nonzero_size_is_malformed() {
        match Header::parse("D0755 5 scp") {
            Err(Error::MalformedHeader(_)) => {}
            other => panic!("expected MalformedHeader, got {:?}", other),
        }
    }

    #[test]
    fn bad_records_are_malformed() {
        for line in [
            "C064a 11 out.txt",
            "C0644_11 out.txt",
            "C0644 11",
            "C0644 eleven out.txt",
            "T1 2 3",
            "X0644 11 out.txt",
            "",
        ] {
            match Header::parse(line) {
                Err(Error::MalformedHeader(_)) => {}
                other => panic!("expected MalformedHeader for {:?}, got {:?}", line, other),
            }
        }
    }

    #[test]
    fn unsafe_names_are_rejected() {
        for line in ["C0644 1 ..", "C0644 1 .", "C0644 1 a/b", "D0755 0 .."] {
            match Header::parse(line) {
                Err(Error::MalformedHeader(_)) => {}
                other => panic!("expected MalformedHeader for {:?}, got {:?}", line, other),
            }
        }
    }

    #[tokio::test]
    async fn ack_codes() {
        let mut wire = wire_over(&[0x00]);
        assert_eq!(wire.read_ack(false).await.unwrap(), Some(OK));

        // warnings consume their line and continue
        let mut wire = wire_over(b"\x01disk is getting full\n\x00");
        assert_eq!(wire.read_ack(false).await.unwrap(), Some(WARNING));
        assert_eq!(wire.read_ack(false).await.unwrap(), Some(OK));

        // errors surface the peer's diagnostic
        let mut wire = wire_over(b"\x02no space left\n");
        match wire.read_ack(false).await {
            Err(Error::PeerRejected(text)) => assert_eq!(text, "no space left"),
            other => panic!("expected PeerRejected, got {:?}", other),
        }

        // unknown bytes are tolerated
        let mut wire = wire_over(&[b'C']);
        assert_eq!(wire.read_ack(false).await.unwrap(), Some(b'C'));

        // eof is legal only when allowed
        let mut wire = wire_over(&[]);
        assert_eq!(wire.read_ack(true).await.unwrap(), None);
        let mut wire = wire_over(&[]);
        match wire.read_ack(false).await {
            Err(Error::UnexpectedEof) => {}
            other => panic!("expected UnexpectedEof, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn limited_reader_leaves_terminator_in_stream() {
        let mut wire = wire_over(b"0123456789\n\x00");
        let mut dst = Vec::new();
        let copied = wire.recv_payload(&mut dst, 11, 4096).await.unwrap();
        assert_eq!(copied, 11);
        assert_eq!(dst, b"0123456789\n");
        wire.read_payload_terminator().await.unwrap();
    }

    #[tokio::test]
    async fn recv_payload_of_truncated_stream_fails() {
        let mut wire = wire_over(b"0123");
        let mut dst = Vec::new();
        match wire.recv_payload(&mut dst, 11, 4096).await {
            Err(Error::UnexpectedEof) => {}
            other => panic!("expected UnexpectedEof, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn zero_length_payload_copies_nothing() {
        let mut wire = wire_over(b"\x00");
        let mut dst = Vec::new();
        assert_eq!(wire.recv_payload(&mut dst, 0, 4096).await.unwrap(), 0);
        assert!(dst.is_empty());
        wire.read_payload_terminator().await.unwrap();
    }

    #[tokio::test]
    async fn payload_copies_with_tiny_buffers() {
        let payload = vec![0xabu8; 5000];
        let mut wire = Wire::new(payload.as_slice(), Vec::new());
        let mut dst = Vec::new();
        // requested buffer below the floor gets clamped up, not rejected
        let copied = wire.recv_payload(&mut dst, 5000, 1).await.unwrap();
        assert_eq!(copied, 5000);
        assert_eq!(dst, payload);
    }

    #[tokio::test]
    async fn send_payload_writes_exact_count() {
        let mut wire = Wire::new(b"".as_slice(), Vec::new());
        let mut src: &[u8] = b"0123456789\nEXTRA";
        let copied = wire.send_payload(&mut src, 11, 256).await.unwrap();
        assert_eq!(copied, 11);
        assert_eq!(wire.output, b"0123456789\n");
    }

    #[tokio::test]
    async fn diagnostics_are_line_framed() {
        let mut wire = Wire::new(b"".as_slice(), Vec::new());
        wire.send_warning("multi\nline").await.unwrap();
        assert_eq!(wire.output, b"\x01multi line\n");
    }

    #[tokio::test]
    async fn payload_terminator_rejects_garbage() {
        let mut wire = wire_over(&[0x42]);
        match wire.read_payload_terminator().await {
            Err(Error::ProtocolViolation(_)) => {}
            other => panic!("expected ProtocolViolation, got {:?}", other),
        }
    }
}
