use std::io::{Read, Seek, SeekFrom};

use byteorder::{BigEndian, LittleEndian, ReadBytesExt};

use crate::error::{Error, Result};

/// Marker trait for anything the reader can operate on.
pub trait ReadSeek: Read + Seek {}
impl<T: Read + Seek> ReadSeek for T {}

/// Random-access, byte-oriented cursor over a seekable stream.
///
/// Every read advances the cursor. Positional reads — "peek at offset X
/// without moving" — are expressed via [`BinaryReader::at`], which saves the
/// cursor, seeks, runs the closure, and restores the cursor regardless of
/// whether the closure succeeded.
pub struct BinaryReader<R> {
    inner: R,
}

impl<R: ReadSeek> BinaryReader<R> {
    pub fn new(inner: R) -> Self {
        BinaryReader { inner }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    pub fn tell(&mut self) -> Result<u64> {
        Ok(self.inner.stream_position()?)
    }

    pub fn seek(&mut self, abs: u64) -> Result<()> {
        self.inner.seek(SeekFrom::Start(abs))?;
        Ok(())
    }

    pub fn skip(&mut self, rel: i64) -> Result<()> {
        self.inner.seek(SeekFrom::Current(rel))?;
        Ok(())
    }

    /// Seeks forward to the next multiple of `n` (rounds up; `n` is a power
    /// of two in every format this reader handles).
    pub fn align(&mut self, n: u64) -> Result<()> {
        if n == 0 {
            return Ok(());
        }
        let pos = self.tell()?;
        let aligned = pos.div_ceil(n) * n;
        if aligned != pos {
            self.seek(aligned)?;
        }
        Ok(())
    }

    /// Runs `f` with the cursor at `offset`, then restores the original
    /// cursor position. This is the generic form of the "positional read"
    /// contract every operation must support.
    pub fn at<T>(&mut self, offset: u64, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let back = self.tell()?;
        self.seek(offset)?;
        let result = f(self);
        self.seek(back)?;
        result
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; n];
        let offset = self.tell()?;
        self.inner.read_exact(&mut buf).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                Error::UnexpectedEof { offset, wanted: n }
            } else {
                Error::Io(e)
            }
        })?;
        Ok(buf)
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut buf = [0u8; N];
        let offset = self.tell()?;
        self.inner.read_exact(&mut buf).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                Error::UnexpectedEof { offset, wanted: N }
            } else {
                Error::Io(e)
            }
        })?;
        Ok(buf)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.inner.read_u8()?)
    }

    pub fn read_i8(&mut self) -> Result<i8> {
        Ok(self.inner.read_i8()?)
    }

    pub fn read_u16_le(&mut self) -> Result<u16> {
        Ok(self.inner.read_u16::<LittleEndian>()?)
    }

    pub fn read_u16_be(&mut self) -> Result<u16> {
        Ok(self.inner.read_u16::<BigEndian>()?)
    }

    pub fn read_i16_le(&mut self) -> Result<i16> {
        Ok(self.inner.read_i16::<LittleEndian>()?)
    }

    pub fn read_i16_be(&mut self) -> Result<i16> {
        Ok(self.inner.read_i16::<BigEndian>()?)
    }

    pub fn read_u32_le(&mut self) -> Result<u32> {
        Ok(self.inner.read_u32::<LittleEndian>()?)
    }

    pub fn read_u32_be(&mut self) -> Result<u32> {
        Ok(self.inner.read_u32::<BigEndian>()?)
    }

    pub fn read_i32_le(&mut self) -> Result<i32> {
        Ok(self.inner.read_i32::<LittleEndian>()?)
    }

    pub fn read_i32_be(&mut self) -> Result<i32> {
        Ok(self.inner.read_i32::<BigEndian>()?)
    }

    pub fn read_u64_le(&mut self) -> Result<u64> {
        Ok(self.inner.read_u64::<LittleEndian>()?)
    }

    pub fn read_u64_be(&mut self) -> Result<u64> {
        Ok(self.inner.read_u64::<BigEndian>()?)
    }

    pub fn read_i64_le(&mut self) -> Result<i64> {
        Ok(self.inner.read_i64::<LittleEndian>()?)
    }

    pub fn read_i64_be(&mut self) -> Result<i64> {
        Ok(self.inner.read_i64::<BigEndian>()?)
    }

    pub fn read_f32_le(&mut self) -> Result<f32> {
        Ok(self.inner.read_f32::<LittleEndian>()?)
    }

    pub fn read_f32_be(&mut self) -> Result<f32> {
        Ok(self.inner.read_f32::<BigEndian>()?)
    }

    pub fn read_f64_le(&mut self) -> Result<f64> {
        Ok(self.inner.read_f64::<LittleEndian>()?)
    }

    pub fn read_f64_be(&mut self) -> Result<f64> {
        Ok(self.inner.read_f64::<BigEndian>()?)
    }

    /// Reads bytes until the first NUL, consuming the NUL, and decodes the
    /// bytes before it as UTF-8. Reads in fixed-size chunks to avoid a
    /// syscall per byte on unbuffered sources.
    pub fn read_cstring(&mut self) -> Result<String> {
        let start = self.tell()?;
        let mut collected = Vec::new();
        let mut chunk = [0u8; 16];
        loop {
            let n = self.inner.read(&mut chunk)?;
            if n == 0 {
                return Err(Error::UnexpectedEof {
                    offset: start,
                    wanted: 1,
                });
            }
            if let Some(nul_pos) = chunk[..n].iter().position(|&b| b == 0) {
                collected.extend_from_slice(&chunk[..nul_pos]);
                let consumed = nul_pos + 1;
                let overshoot = (n - consumed) as i64;
                if overshoot != 0 {
                    self.inner.seek(SeekFrom::Current(-overshoot))?;
                }
                break;
            }
            collected.extend_from_slice(&chunk[..n]);
        }
        String::from_utf8(collected).map_err(|e| Error::InvalidUtf8 {
            offset: start,
            source: e,
        })
    }

    /// Reads a little-endian unsigned length prefix of `prefix_width` bytes
    /// (1, 2, 4, or 8) followed by that many UTF-8 bytes.
    pub fn read_lp_string(&mut self, prefix_width: u8) -> Result<String> {
        let offset = self.tell()?;
        let len: u64 = match prefix_width {
            1 => self.read_u8()? as u64,
            2 => self.read_u16_le()? as u64,
            4 => self.read_u32_le()? as u64,
            8 => self.read_u64_le()?,
            other => {
                return Err(Error::MalformedSchema {
                    reason: format!("unsupported length-prefix width {other}"),
                })
            }
        };
        let bytes = self.read_bytes(len as usize)?;
        String::from_utf8(bytes).map_err(|e| Error::InvalidUtf8 { offset, source: e })
    }
}
