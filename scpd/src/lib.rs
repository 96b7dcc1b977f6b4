//! Remote-side engine for the classic rcp/scp wire protocol.
//!
//! The engine drives one end of an already-established, authenticated byte
//! channel (typically an SSH "exec" session running `scp -t` or `scp -f`)
//! and implements both roles: the sink, which consumes records and writes
//! the local filesystem, and the source, which walks the local filesystem
//! and emits records.
//!
//! # Wire Flow
//!
//! ```text
//! Source                              Sink
//!   |  <-------------------- 0x00 --  |  ready
//!   |  -- T<mtime> 0 <atime> 0 \n ->  |  (preserve only)
//!   |  <-------------------- 0x00 --  |
//!   |  -- C<mode> <size> <name> \n->  |
//!   |  <-------------------- 0x00 --  |
//!   |  -- <size bytes> 0x00 ------->  |  payload + terminator
//!   |  <-------------------- 0x00 --  |
//!   |  -- D<mode> 0 <name> \n ----->  |  recursion opens...
//!   |  <-------------------- 0x00 --  |
//!   |     ...nested records...        |
//!   |  -- E \n ------------------->   |  ...and E closes it
//!   |  <-------------------- 0x00 --  |
//! ```
//!
//! Any acknowledgement byte may instead be `0x01 <text> \n` (advisory
//! warning, logged) or `0x02 <text> \n` (fatal rejection). The exchange is
//! strictly half-duplex; a transfer is a single sequential task owning both
//! stream halves.

pub mod command;
pub mod errors;
pub mod pathres;
pub mod sink;
pub mod source;
pub mod wire;

pub use errors::{Error, Result};
