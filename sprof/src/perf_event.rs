//! The wire format of the sampling event stream.
//!
//! Every record starts with an 8-byte header whose `size` covers the whole
//! record, so unknown record kinds can be skipped without understanding
//! them. Records are in the producing kernel's native byte order.

use std::io::{self, Read};
use std::path::PathBuf;

use byteorder::{NativeEndian, ReadBytesExt};
use log::warn;

pub const PERF_RECORD_MMAP: u32 = 1;
pub const PERF_RECORD_SAMPLE: u32 = 9;

pub const PERF_MAX_STACK_DEPTH: u64 = 127;

/// Call-chain context markers. The kernel encodes them as small negative
/// numbers, far above any user-space address.
pub const PERF_CONTEXT_HV: u64 = -32i64 as u64;
pub const PERF_CONTEXT_KERNEL: u64 = -128i64 as u64;
pub const PERF_CONTEXT_USER: u64 = -512i64 as u64;
pub const PERF_CONTEXT_GUEST: u64 = -2048i64 as u64;
pub const PERF_CONTEXT_GUEST_KERNEL: u64 = -2176i64 as u64;
pub const PERF_CONTEXT_GUEST_USER: u64 = -2560i64 as u64;

/// Anything above the user-space address ceiling is a context marker, not
/// an address.
pub const PERF_CONTEXT_MAX: u64 = !0xffff;

const HEADER_SIZE: usize = 8;

#[derive(Debug, Clone, Copy)]
pub struct EventHeader {
    pub kind: u32,
    pub misc: u16,
    /// Total record length, header included.
    pub size: u16,
}

/// A new file mapping in the profiled process's address space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MmapEvent {
    pub pid: u32,
    pub tid: u32,
    pub address: u64,
    pub length: u64,
    pub page_offset: u64,
    pub file_name: PathBuf,
}

/// One sampling interrupt: the interrupted instruction pointer and the
/// recorded call-chain, leaf outward, interleaved with context markers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleEvent {
    pub ip: u64,
    pub callchain: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventRecord {
    Mmap(MmapEvent),
    Sample(SampleEvent),
    Unknown { kind: u32 },
}

/// Pulls records off a byte stream one at a time.
pub struct RecordReader<R: Read> {
    source: R,
}

impl<R: Read> RecordReader<R> {
    pub fn new(source: R) -> Self {
        RecordReader { source }
    }

    /// Reads the next record. `Ok(None)` on a clean end of stream; a stream
    /// that breaks off mid-record also ends iteration, after a warning, so
    /// that everything read so far stays usable.
    pub fn next_record(&mut self) -> io::Result<Option<EventRecord>> {
        let header = match self.read_header()? {
            Some(header) => header,
            None => return Ok(None),
        };

        let payload_len = match usize::from(header.size).checked_sub(HEADER_SIZE) {
            Some(len) => len,
            None => {
                warn!(
                    "event record of kind {} declares impossible size {}",
                    header.kind, header.size
                );
                return Ok(None);
            }
        };

        let mut payload = vec![0; payload_len];
        if let Err(err) = self.source.read_exact(&mut payload) {
            if err.kind() == io::ErrorKind::UnexpectedEof {
                warn!("event stream truncated inside a record of kind {}", header.kind);
                return Ok(None);
            }
            return Err(err);
        }

        let record = match header.kind {
            PERF_RECORD_MMAP => match parse_mmap(&payload) {
                Some(event) => EventRecord::Mmap(event),
                None => {
                    warn!("malformed memory-map record, skipping");
                    EventRecord::Unknown { kind: header.kind }
                }
            },
            PERF_RECORD_SAMPLE => EventRecord::Sample(parse_sample(&payload)),
            kind => EventRecord::Unknown { kind },
        };
        Ok(Some(record))
    }

    fn read_header(&mut self) -> io::Result<Option<EventHeader>> {
        let mut bytes = [0u8; HEADER_SIZE];
        let mut filled = 0;
        while filled < bytes.len() {
            match self.source.read(&mut bytes[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
        if filled == 0 {
            return Ok(None);
        }
        if filled < bytes.len() {
            warn!("event stream truncated inside a record header");
            return Ok(None);
        }

        let mut bytes = &bytes[..];
        Ok(Some(EventHeader {
            kind: bytes.read_u32::<NativeEndian>()?,
            misc: bytes.read_u16::<NativeEndian>()?,
            size: bytes.read_u16::<NativeEndian>()?,
        }))
    }
}

fn parse_mmap(mut payload: &[u8]) -> Option<MmapEvent> {
    let pid = payload.read_u32::<NativeEndian>().ok()?;
    let tid = payload.read_u32::<NativeEndian>().ok()?;
    let address = payload.read_u64::<NativeEndian>().ok()?;
    let length = payload.read_u64::<NativeEndian>().ok()?;
    let page_offset = payload.read_u64::<NativeEndian>().ok()?;

    // The file name is NUL-terminated and padded out to the record size.
    let name_len = payload
        .iter()
        .position(|&byte| byte == 0)
        .unwrap_or(payload.len());
    let file_name = PathBuf::from(String::from_utf8_lossy(&payload[..name_len]).into_owned());

    Some(MmapEvent {
        pid,
        tid,
        address,
        length,
        page_offset,
        file_name,
    })
}

fn parse_sample(mut payload: &[u8]) -> SampleEvent {
    let ip = payload.read_u64::<NativeEndian>().unwrap_or(0);
    let claimed = payload.read_u64::<NativeEndian>().unwrap_or(0);
    // Do not trust the declared length beyond what the record holds.
    let count = claimed.min(payload.len() as u64 / 8);

    let mut callchain = Vec::with_capacity(count as usize);
    for _ in 0..count {
        callchain.push(payload.read_u64::<NativeEndian>().unwrap_or(0));
    }
    SampleEvent { ip, callchain }
}
