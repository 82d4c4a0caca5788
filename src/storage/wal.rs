use std::io::{Read, Write};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::core::error::{Error, Result};
use crate::core::types::{Etag, Fields};

/// Upper bound for a single encoded entry.
const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Durable record of one committed mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub sequence: u64,
    pub id: String,
    pub collection: String,
    pub prior_etag: Option<Etag>,
    pub operation: LogOperation,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LogOperation {
    Put { body: Fields, etag: Etag },
    Delete,
}

/// In-memory write log, one entry per mutation, ordered by sequence.
///
/// Frames written by [`WriteLog::write_to`] are `len: u32 LE | crc32: u32 LE | bincode entry`.
#[derive(Debug, Default)]
pub struct WriteLog {
    entries: Vec<LogEntry>,
}

impl WriteLog {
    pub fn new() -> Self {
        WriteLog::default()
    }

    pub fn append(&mut self, entry: LogEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        for entry in &self.entries {
            write_frame(writer, entry)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Read every frame until a clean end of input.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Vec<LogEntry>> {
        let mut entries = Vec::new();

        loop {
            let mut len_buf = [0u8; 4];
            match read_up_to(reader, &mut len_buf)? {
                0 => break,
                4 => {}
                partial => {
                    return Err(Error::Corruption(format!(
                        "log ends inside a frame header ({} of 4 bytes) after {} entries",
                        partial,
                        entries.len()
                    )));
                }
            }

            let len = u32::from_le_bytes(len_buf) as usize;
            if len > MAX_FRAME_LEN {
                return Err(Error::Corruption(format!(
                    "log frame of {} bytes after {} entries",
                    len,
                    entries.len()
                )));
            }

            let mut crc_buf = [0u8; 4];
            let mut data = vec![0u8; len];
            reader
                .read_exact(&mut crc_buf)
                .and_then(|_| reader.read_exact(&mut data))
                .map_err(|e| match e.kind() {
                    std::io::ErrorKind::UnexpectedEof => {
                        Error::Corruption(format!("truncated log frame after {} entries", entries.len()))
                    }
                    _ => Error::Io(e),
                })?;

            if crc32fast::hash(&data) != u32::from_le_bytes(crc_buf) {
                return Err(Error::Corruption(format!(
                    "checksum mismatch in log frame {}",
                    entries.len()
                )));
            }

            entries.push(bincode::deserialize::<LogEntry>(&data)?);
        }

        Ok(entries)
    }
}

fn write_frame<W: Write>(writer: &mut W, entry: &LogEntry) -> Result<()> {
    let data = bincode::serialize(entry)?;
    let len = data.len() as u32;

    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&crc32fast::hash(&data).to_le_bytes())?;
    writer.write_all(&data)?;
    Ok(())
}

/// Fill `buf` until it is full or the input ends. Returns the bytes read.
fn read_up_to<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}
