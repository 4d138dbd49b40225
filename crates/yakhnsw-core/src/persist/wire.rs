//! Primitive encoding shared by the binary formats
//!
//! Little-endian throughout. Counts and lengths are LEB128 varints, `u32`
//! and `f32` are fixed 4 bytes, `f64` fixed 8 bytes, byte strings are
//! varint-length-prefixed.

use std::io::{self, Read, Write};

use crate::error::{HnswError, Result};

/// Upper bound on any single pre-allocation driven by a length read from input
const MAX_PREALLOC: usize = 1 << 16;

/// Longest varint accepted (ceil(64 / 7))
const MAX_VARINT_BYTES: usize = 10;

/// Vec capacity for `count` items read from untrusted input
pub(crate) fn capacity(count: usize) -> usize {
    count.min(MAX_PREALLOC)
}

pub(crate) struct WireWriter<W> {
    inner: W,
}

impl<W: Write> WireWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn bytes(&mut self, raw: &[u8]) -> Result<()> {
        self.inner.write_all(raw)?;
        Ok(())
    }

    pub fn varint(&mut self, mut value: u64) -> Result<()> {
        let mut buf = [0u8; MAX_VARINT_BYTES];
        let mut n = 0;
        loop {
            let mut byte = (value & 0x7F) as u8;
            value >>= 7;
            if value != 0 {
                byte |= 0x80;
            }
            buf[n] = byte;
            n += 1;
            if value == 0 {
                break;
            }
        }
        self.bytes(&buf[..n])
    }

    pub fn count(&mut self, len: usize) -> Result<()> {
        self.varint(len as u64)
    }

    pub fn u32(&mut self, value: u32) -> Result<()> {
        self.bytes(&value.to_le_bytes())
    }

    pub fn f32(&mut self, value: f32) -> Result<()> {
        self.bytes(&value.to_le_bytes())
    }

    pub fn f64(&mut self, value: f64) -> Result<()> {
        self.bytes(&value.to_le_bytes())
    }

    pub fn bool(&mut self, value: bool) -> Result<()> {
        self.bytes(&[value as u8])
    }

    pub fn prefixed(&mut self, raw: &[u8]) -> Result<()> {
        self.count(raw.len())?;
        self.bytes(raw)
    }

    pub fn string(&mut self, s: &str) -> Result<()> {
        self.prefixed(s.as_bytes())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.inner.flush()?;
        Ok(())
    }
}

pub(crate) struct WireReader<R> {
    inner: R,
}

impl<R: Read> WireReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    fn fill(&mut self, buf: &mut [u8], what: &str) -> Result<()> {
        self.inner.read_exact(buf).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => {
                HnswError::protocol(format!("unexpected end of input while reading {what}"))
            }
            _ => HnswError::Io(e),
        })
    }

    pub fn exact<const N: usize>(&mut self, what: &str) -> Result<[u8; N]> {
        let mut buf = [0u8; N];
        self.fill(&mut buf, what)?;
        Ok(buf)
    }

    pub fn bytes(&mut self, len: usize, what: &str) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(len.min(MAX_PREALLOC));
        let read = (&mut self.inner).take(len as u64).read_to_end(&mut out)?;
        if read != len {
            return Err(HnswError::protocol(format!(
                "unexpected end of input while reading {what}: wanted {len} bytes, got {read}"
            )));
        }
        Ok(out)
    }

    pub fn varint(&mut self, what: &str) -> Result<u64> {
        let mut value = 0u64;
        for i in 0..MAX_VARINT_BYTES {
            let [byte] = self.exact::<1>(what)?;
            let bits = (byte & 0x7F) as u64;
            if i == MAX_VARINT_BYTES - 1 && bits > 1 {
                return Err(HnswError::protocol(format!("varint overflow in {what}")));
            }
            value |= bits << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(HnswError::protocol(format!("varint too long in {what}")))
    }

    pub fn count(&mut self, what: &str) -> Result<usize> {
        let v = self.varint(what)?;
        usize::try_from(v).map_err(|_| HnswError::protocol(format!("{what} {v} out of range")))
    }

    pub fn u32(&mut self, what: &str) -> Result<u32> {
        Ok(u32::from_le_bytes(self.exact(what)?))
    }

    pub fn f32(&mut self, what: &str) -> Result<f32> {
        Ok(f32::from_le_bytes(self.exact(what)?))
    }

    pub fn f64(&mut self, what: &str) -> Result<f64> {
        Ok(f64::from_le_bytes(self.exact(what)?))
    }

    pub fn bool(&mut self, what: &str) -> Result<bool> {
        match self.exact::<1>(what)? {
            [0] => Ok(false),
            [1] => Ok(true),
            [other] => Err(HnswError::protocol(format!(
                "invalid boolean {other} for {what}"
            ))),
        }
    }

    pub fn prefixed(&mut self, what: &str) -> Result<Vec<u8>> {
        let len = self.count(what)?;
        self.bytes(len, what)
    }

    pub fn string(&mut self, what: &str) -> Result<String> {
        let raw = self.prefixed(what)?;
        String::from_utf8(raw).map_err(|_| HnswError::protocol(format!("{what} is not valid UTF-8")))
    }

    /// Succeeds only when no bytes remain
    pub fn finish(mut self) -> Result<()> {
        let mut byte = [0u8; 1];
        match self.inner.read(&mut byte)? {
            0 => Ok(()),
            _ => Err(HnswError::protocol("trailing bytes after end of data")),
        }
    }
}
