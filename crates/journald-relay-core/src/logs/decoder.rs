//! Framed log-record decoder.
//!
//! The container runtime writes log records to the FIFO as a 4-byte
//! big-endian length followed by a protobuf-encoded record. The reader keeps
//! one scratch buffer for the frame bytes and clears the output record before
//! each decode, so a long-lived stream does not reallocate per record.

use prost::Message;
use tokio::io::{AsyncRead, AsyncReadExt};

/// One framed record from the container runtime.
///
/// All fields are optional on the wire; a zero-length frame decodes to the
/// all-default record (stdout, time 0, empty line, not partial).
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LogRecord {
    /// `stdout` or `stderr`; empty means stdout.
    #[prost(string, tag = "1")]
    pub source: ::prost::alloc::string::String,
    /// Nanoseconds since epoch on the producer clock.
    #[prost(int64, tag = "2")]
    pub time_nano: i64,
    /// Raw line bytes, no terminator guarantee.
    #[prost(bytes = "vec", tag = "3")]
    pub line: ::prost::alloc::vec::Vec<u8>,
    /// True when this record is one fragment of a larger message.
    #[prost(bool, tag = "4")]
    pub partial: bool,
    #[prost(message, optional, tag = "5")]
    pub partial_metadata: ::core::option::Option<PartialLogMetadata>,
}

/// Grouping metadata for fragmented messages.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PartialLogMetadata {
    /// Marks the final fragment of the group.
    #[prost(bool, tag = "1")]
    pub last: bool,
    /// Groups fragments of one logical message.
    #[prost(string, tag = "2")]
    pub id: ::prost::alloc::string::String,
    /// Intra-group sequence number.
    #[prost(int32, tag = "3")]
    pub ordinal: i32,
}

/// Errors from the framed stream.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("reading log stream: {0}")]
    Io(#[from] std::io::Error),

    #[error("stream ended mid-frame")]
    TruncatedFrame,

    #[error("malformed log record: {0}")]
    Malformed(#[from] prost::DecodeError),
}

/// Reads length-prefixed protobuf log records from a byte stream.
pub struct FrameReader<R> {
    reader: R,
    len_buf: [u8; 4],
    frame_buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        FrameReader {
            reader,
            len_buf: [0; 4],
            frame_buf: vec![0; 1024],
        }
    }

    /// Reads and decodes the next record into `record`.
    ///
    /// Returns `Ok(false)` on a clean end of stream (no length byte read).
    /// End of stream inside the length prefix or the frame body is an error.
    pub async fn read_record(&mut self, record: &mut LogRecord) -> Result<bool, DecodeError> {
        let mut filled = 0;
        while filled < self.len_buf.len() {
            let n = self.reader.read(&mut self.len_buf[filled..]).await?;
            if n == 0 {
                if filled == 0 {
                    return Ok(false);
                }
                return Err(DecodeError::TruncatedFrame);
            }
            filled += n;
        }

        let size = u32::from_be_bytes(self.len_buf) as usize;
        record.clear();
        if size == 0 {
            return Ok(true);
        }

        if self.frame_buf.len() < size {
            self.frame_buf.resize(size, 0);
        }
        let frame = &mut self.frame_buf[..size];
        self.reader
            .read_exact(frame)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::UnexpectedEof => DecodeError::TruncatedFrame,
                _ => DecodeError::Io(e),
            })?;

        record.merge(&frame[..])?;
        Ok(true)
    }
}

/// Encodes a record as one frame: 4-byte big-endian length plus protobuf
/// body.
pub fn encode_frame(record: &LogRecord) -> Vec<u8> {
    let body = record.encode_to_vec();
    let mut frame = Vec::with_capacity(4 + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&body);
    frame
}
