//! Wire protocol
//!
//! Stream messages are framed with a fixed-width decimal length header;
//! datagrams carry raw unframed text (empty for heartbeats). The typed
//! messages here cover every channel: endpoint advertisement and
//! registration, unit dispatch, and unit results.

use std::fmt;
use std::str::FromStr;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{QuadraError, Result};

/// Width of the decimal length header on every stream frame
pub const FRAME_HEADER_LEN: usize = 5;

/// Largest payload representable by the header
pub const MAX_FRAME_LEN: usize = 99_999;

/// Encode a payload as a length-prefixed frame
pub fn encode_frame(payload: &str) -> Result<Vec<u8>> {
    if payload.len() > MAX_FRAME_LEN {
        return Err(QuadraError::FrameTooLarge {
            length: payload.len(),
            max: MAX_FRAME_LEN,
        });
    }
    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    frame.extend_from_slice(format!("{:0width$}", payload.len(), width = FRAME_HEADER_LEN).as_bytes());
    frame.extend_from_slice(payload.as_bytes());
    Ok(frame)
}

/// Write one framed message to a stream
pub async fn write_frame<W>(writer: &mut W, payload: &str) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(payload)?;
    writer.write_all(&frame).await?;
    Ok(())
}

/// Read one framed message from a stream
///
/// Returns `Ok(None)` on a clean disconnect (zero bytes at a frame
/// boundary). A stream that closes mid-frame or a non-numeric header is
/// a framing error.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<String>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; FRAME_HEADER_LEN];
    let mut filled = 0;
    while filled < FRAME_HEADER_LEN {
        let n = reader.read(&mut header[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(QuadraError::FramingError {
                reason: format!("stream closed after {} header bytes", filled),
            });
        }
        filled += n;
    }

    let text = std::str::from_utf8(&header).map_err(|_| QuadraError::FramingError {
        reason: "header is not valid ASCII".into(),
    })?;
    let length: usize = text.parse().map_err(|_| QuadraError::FramingError {
        reason: format!("header {:?} is not a non-negative integer", text),
    })?;

    let mut payload = vec![0u8; length];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => QuadraError::FramingError {
                reason: format!("stream closed before {} payload bytes", length),
            },
            _ => QuadraError::Io(e),
        })?;

    String::from_utf8(payload)
        .map(Some)
        .map_err(|_| QuadraError::InvalidMessage {
            reason: "payload is not valid UTF-8".into(),
        })
}

/// A `"<host>:<port>"` network endpoint
///
/// Carried by the coordinator's discovery broadcast and by worker
/// registration datagrams.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for Endpoint {
    type Err = QuadraError;

    fn from_str(s: &str) -> Result<Self> {
        let fields: Vec<&str> = s.split(':').collect();
        if fields.len() != 2 {
            return Err(QuadraError::InvalidMessage {
                reason: format!("expected 2 colon-delimited fields, got {:?}", s),
            });
        }
        if fields[0].is_empty() {
            return Err(QuadraError::InvalidMessage {
                reason: format!("empty host in {:?}", s),
            });
        }
        let port = fields[1].parse().map_err(|_| QuadraError::InvalidMessage {
            reason: format!("port {:?} is not a valid number", fields[1]),
        })?;
        Ok(Endpoint::new(fields[0], port))
    }
}

/// A `"<request_id> <unit_index>"` dispatch, coordinator to worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitDispatch {
    pub request_id: u64,
    pub unit_index: i64,
}

impl fmt::Display for UnitDispatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.request_id, self.unit_index)
    }
}

impl FromStr for UnitDispatch {
    type Err = QuadraError;

    fn from_str(s: &str) -> Result<Self> {
        let fields: Vec<&str> = s.split_whitespace().collect();
        if fields.len() != 2 {
            return Err(QuadraError::InvalidMessage {
                reason: format!("expected 2 fields, got {:?}", s),
            });
        }
        Ok(UnitDispatch {
            request_id: parse_field(fields[0], "request_id")?,
            unit_index: parse_field(fields[1], "unit_index")?,
        })
    }
}

/// A `"<request_id> <unit_index> <unit_value>"` result, worker to coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitResult {
    pub request_id: u64,
    pub unit_index: i64,
    pub value: i64,
}

impl fmt::Display for UnitResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.request_id, self.unit_index, self.value)
    }
}

impl FromStr for UnitResult {
    type Err = QuadraError;

    fn from_str(s: &str) -> Result<Self> {
        let fields: Vec<&str> = s.split_whitespace().collect();
        if fields.len() != 3 {
            return Err(QuadraError::InvalidMessage {
                reason: format!("expected 3 fields, got {:?}", s),
            });
        }
        Ok(UnitResult {
            request_id: parse_field(fields[0], "request_id")?,
            unit_index: parse_field(fields[1], "unit_index")?,
            value: parse_field(fields[2], "unit_value")?,
        })
    }
}

fn parse_field<T: FromStr>(field: &str, name: &str) -> Result<T> {
    field.parse().map_err(|_| QuadraError::InvalidMessage {
        reason: format!("{} {:?} is not a valid number", name, field),
    })
}
