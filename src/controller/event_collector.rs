//! Binary event decoder for the kernel input-event stream
//!
//! The device node yields fixed-width `struct input_event` records in native
//! layout:
//!
//! ```text
//! | tv_sec: long | tv_usec: long | type: u16 | code: u16 | value: i32 |
//! ```
//!
//! Only `EV_KEY` records are surfaced; everything else (sync reports, misc
//! scan codes) is consumed and dropped transparently.

use chrono::{DateTime, Local};
use std::fs::File;
use std::io::{self, Read};
use std::mem::size_of;
use std::os::raw::c_long;
use std::path::{Path, PathBuf};
use tracing::{debug, info, trace};

/// Event class of key transitions
pub const EV_KEY: u16 = 0x01;

const TIME_FIELD_SIZE: usize = size_of::<c_long>();

/// Size of one record on this platform
pub const EVENT_SIZE: usize = 2 * TIME_FIELD_SIZE + 2 + 2 + 4;

#[derive(Debug, thiserror::Error)]
pub enum CollectorError {
    #[error("Failed to open input device {}: {source}", path.display())]
    DeviceOpen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Truncated input record: expected {expected} bytes, got {got}")]
    TruncatedRecord { expected: usize, got: usize },

    #[error("Input device reached end of stream")]
    EndOfStream,

    #[error("Failed to read input device: {0}")]
    Read(#[source] io::Error),

    #[error("Input device is closed")]
    Closed,
}

/// One undecoded record, any event class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputRecord {
    pub seconds: i64,
    pub microseconds: i64,
    pub class: u16,
    pub code: u16,
    pub value: i32,
}

impl InputRecord {
    pub fn key(seconds: i64, microseconds: i64, code: u16, value: i32) -> Self {
        Self {
            seconds,
            microseconds,
            class: EV_KEY,
            code,
            value,
        }
    }

    pub fn decode(buf: &[u8; EVENT_SIZE]) -> Self {
        let (sec, rest) = buf.split_at(TIME_FIELD_SIZE);
        let (usec, rest) = rest.split_at(TIME_FIELD_SIZE);
        Self {
            seconds: read_long(sec),
            microseconds: read_long(usec),
            class: u16::from_ne_bytes([rest[0], rest[1]]),
            code: u16::from_ne_bytes([rest[2], rest[3]]),
            value: i32::from_ne_bytes([rest[4], rest[5], rest[6], rest[7]]),
        }
    }

    /// Native byte layout, as the kernel would write it
    pub fn to_bytes(&self) -> [u8; EVENT_SIZE] {
        let mut buf = [0u8; EVENT_SIZE];
        let mut offset = 0;
        for field in [
            &(self.seconds as c_long).to_ne_bytes()[..],
            &(self.microseconds as c_long).to_ne_bytes()[..],
            &self.class.to_ne_bytes()[..],
            &self.code.to_ne_bytes()[..],
            &self.value.to_ne_bytes()[..],
        ] {
            buf[offset..offset + field.len()].copy_from_slice(field);
            offset += field.len();
        }
        buf
    }
}

fn read_long(bytes: &[u8]) -> i64 {
    let mut raw = [0u8; TIME_FIELD_SIZE];
    raw.copy_from_slice(bytes);
    c_long::from_ne_bytes(raw) as i64
}

/// Decoded key record
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawEvent {
    /// Seconds since the epoch, microsecond resolution. Observability only.
    pub timestamp: f64,
    pub key_code: u16,
    pub state_code: i32,
}

impl RawEvent {
    /// `None` unless the record is of the key class
    pub fn from_record(record: &InputRecord) -> Option<Self> {
        (record.class == EV_KEY).then(|| Self {
            timestamp: record.seconds as f64 + record.microseconds as f64 / 1_000_000.0,
            key_code: record.code,
            state_code: record.value,
        })
    }

    pub fn local_time(&self) -> Option<DateTime<Local>> {
        let seconds = self.timestamp.trunc() as i64;
        let nanos = (self.timestamp.fract() * 1_000_000_000.0).round() as u32;
        DateTime::from_timestamp(seconds, nanos.min(999_999_999)).map(|t| t.with_timezone(&Local))
    }
}

/// Blocking reader over an input-event byte stream
///
/// Owns its handle exclusively. Any read failure closes the reader; a closed
/// reader never reopens.
pub struct EventReader<R> {
    source: Option<R>,
    records_read: u64,
}

impl EventReader<File> {
    pub fn open(path: &Path) -> Result<Self, CollectorError> {
        let file = File::open(path).map_err(|source| CollectorError::DeviceOpen {
            path: path.to_path_buf(),
            source,
        })?;
        info!("Opened input device {}", path.display());
        Ok(Self::new(file))
    }
}

impl<R: Read> EventReader<R> {
    pub fn new(source: R) -> Self {
        Self {
            source: Some(source),
            records_read: 0,
        }
    }

    /// Block until the next key record arrives
    pub fn read_event(&mut self) -> Result<RawEvent, CollectorError> {
        loop {
            let record = self.read_record()?;
            match RawEvent::from_record(&record) {
                Some(event) => return Ok(event),
                None => trace!(
                    "Skipping record class {:#04x} code {}",
                    record.class,
                    record.code
                ),
            }
        }
    }

    /// Key events until the stream ends or fails
    ///
    /// A clean end of stream finishes the sequence; any other failure is
    /// yielded once and then the sequence is over.
    pub fn events(&mut self) -> Events<'_, R> {
        Events { reader: self }
    }

    /// Release the handle. Calling it again is a no-op.
    pub fn close(&mut self) {
        if self.source.take().is_some() {
            debug!("Closed input stream after {} records", self.records_read);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.source.is_none()
    }

    pub fn records_read(&self) -> u64 {
        self.records_read
    }

    fn read_record(&mut self) -> Result<InputRecord, CollectorError> {
        let source = self.source.as_mut().ok_or(CollectorError::Closed)?;

        let mut buf = [0u8; EVENT_SIZE];
        let mut filled = 0;
        while filled < EVENT_SIZE {
            match source.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.close();
                    return Err(CollectorError::Read(e));
                }
            }
        }

        match filled {
            EVENT_SIZE => {
                self.records_read += 1;
                Ok(InputRecord::decode(&buf))
            }
            0 => {
                self.close();
                Err(CollectorError::EndOfStream)
            }
            got => {
                self.close();
                Err(CollectorError::TruncatedRecord {
                    expected: EVENT_SIZE,
                    got,
                })
            }
        }
    }
}

pub struct Events<'a, R> {
    reader: &'a mut EventReader<R>,
}

impl<R: Read> Iterator for Events<'_, R> {
    type Item = Result<RawEvent, CollectorError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.reader.is_closed() {
            return None;
        }
        match self.reader.read_event() {
            Ok(event) => Some(Ok(event)),
            Err(CollectorError::EndOfStream) => None,
            Err(e) => Some(Err(e)),
        }
    }
}
