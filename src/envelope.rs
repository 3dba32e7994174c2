use std::io::Cursor;

use tracing::debug;

use crate::cipher::CipherPrimitive;
use crate::error::{Error, Result};
use crate::object::Asset;
use crate::reader::BinaryReader;

bitflags::bitflags! {
    /// Bits of the UnityFS container header's flag word. Compression type
    /// is the low 6 bits as a small integer, not a combinable flag, but is
    /// masked out with the same bitflags machinery the rest of the header
    /// flags use.
    pub struct BundleFlags: u32 {
        const COMPRESSION_MASK = 0x3f;
        const DIRECTORY_AT_END = 0x80;
    }
}

const ENCRYPTED_MAGIC: [u8; 5] = [0x7E, 0x08, 0x9D, 0x2F, 0xC0];
const UNITYFS_MAGIC: &[u8] = b"UnityFS\0";
const UNITYRAW_MAGIC: &[u8] = b"UnityRaw\0";
const UNITYRAW_ORIGIN: usize = 0x70;

/// Result of a single probe's attempt to recognize and peel one envelope
/// layer off a byte buffer.
pub enum ProbeOutcome {
    /// This probe doesn't recognize the buffer; try the next one.
    NotMine(Vec<u8>),
    /// This probe peeled off a layer; restart the pipeline from the top on
    /// the returned buffer (the unwrapped bytes may need a different probe,
    /// or the same one again).
    Unwrapped(Vec<u8>),
    /// This probe recognized a terminal container and produced assets.
    Terminal(Vec<Asset>),
}

/// One envelope layer's recognizer. Probes never recurse into each other —
/// the [`Pipeline`] owns the control flow of trying them in order and
/// restarting after an unwrap.
pub trait EnvelopeProbe {
    fn name(&self) -> &'static str;
    fn probe(&self, buf: Vec<u8>, cipher: Option<&dyn CipherPrimitive>) -> Result<ProbeOutcome>;
}

/// Detects the proprietary stream cipher's envelope by its ciphertext-side
/// magic (valid cleartext always starts with `Unity`, so a 5-byte prefix
/// that looks like neither a UnityFS nor a UnityRaw magic, but matches this
/// constant, is assumed encrypted).
pub struct EncryptedProbe;

impl EnvelopeProbe for EncryptedProbe {
    fn name(&self) -> &'static str {
        "encrypted"
    }

    fn probe(&self, buf: Vec<u8>, cipher: Option<&dyn CipherPrimitive>) -> Result<ProbeOutcome> {
        if buf.len() >= 5 && buf[..5] == ENCRYPTED_MAGIC {
            let cipher = cipher.ok_or(Error::CipherUnavailable)?;
            let mut decrypted = buf;
            cipher.decrypt(&mut decrypted);
            Ok(ProbeOutcome::Unwrapped(decrypted))
        } else {
            Ok(ProbeOutcome::NotMine(buf))
        }
    }
}

/// Detects and unpacks the `UnityFS` container: a compressed directory
/// header describing per-file blocks, each independently decompressed into
/// its own [`Asset`].
pub struct UnityFsProbe;

impl EnvelopeProbe for UnityFsProbe {
    fn name(&self) -> &'static str {
        "unityfs"
    }

    fn probe(&self, buf: Vec<u8>, _cipher: Option<&dyn CipherPrimitive>) -> Result<ProbeOutcome> {
        if buf.len() < UNITYFS_MAGIC.len() || &buf[..UNITYFS_MAGIC.len()] != UNITYFS_MAGIC {
            return Ok(ProbeOutcome::NotMine(buf));
        }
        Ok(ProbeOutcome::Terminal(decode_unityfs(&buf)?))
    }
}

/// Detects the bare `UnityRaw` container: a fixed 0x70-byte header
/// followed directly by one asset stream.
pub struct UnityRawProbe;

impl EnvelopeProbe for UnityRawProbe {
    fn name(&self) -> &'static str {
        "unityraw"
    }

    fn probe(&self, buf: Vec<u8>, _cipher: Option<&dyn CipherPrimitive>) -> Result<ProbeOutcome> {
        if buf.len() < UNITYRAW_MAGIC.len() || &buf[..UNITYRAW_MAGIC.len()] != UNITYRAW_MAGIC {
            return Ok(ProbeOutcome::NotMine(buf));
        }
        if buf.len() < UNITYRAW_ORIGIN {
            return Err(Error::UnexpectedEof {
                offset: buf.len() as u64,
                wanted: UNITYRAW_ORIGIN - buf.len(),
            });
        }
        let body = buf[UNITYRAW_ORIGIN..].to_vec();
        let mut reader = BinaryReader::new(Cursor::new(body.clone()));
        let asset = Asset::read(&mut reader, body)?;
        Ok(ProbeOutcome::Terminal(vec![asset]))
    }
}

struct BlockInfo {
    compressed_size: u32,
    flags: u16,
}

fn decode_unityfs(buf: &[u8]) -> Result<Vec<Asset>> {
    let mut reader = BinaryReader::new(Cursor::new(buf.to_vec()));
    // 8-byte magic, already matched by the probe, then 9 more bytes (a
    // format-version byte and reserved padding) before stream_version.
    reader.seek((UNITYFS_MAGIC.len() + 9) as u64)?;

    let _stream_version = reader.read_u32_be()?;
    let _creator = reader.read_cstring()?;
    let _revision = reader.read_cstring()?;
    let file_size = reader.read_u64_be()?;
    let compressed_dir_size = reader.read_u32_be()?;
    let decompressed_dir_size = reader.read_u32_be()?;
    let flags = reader.read_u32_be()?;

    let header_size = reader.tell()?;
    let (data_base, dir_bytes) = if flags & BundleFlags::DIRECTORY_AT_END.bits() == 0 {
        let dh = reader.read_bytes(compressed_dir_size as usize)?;
        (header_size + compressed_dir_size as u64, dh)
    } else {
        reader.seek(file_size - compressed_dir_size as u64)?;
        let dh = reader.read_bytes(compressed_dir_size as usize)?;
        (header_size, dh)
    };

    // LZMA directory headers (ctype 1/2) aren't handled: surface
    // UnsupportedCompression rather than guessing at a framing this crate
    // has never seen in the wild.
    let dir_ctype = flags & BundleFlags::COMPRESSION_MASK.bits();
    let directory = match dir_ctype {
        0 => dir_bytes,
        3 => lz4_flex::block::decompress(&dir_bytes, decompressed_dir_size as usize).map_err(|_| {
            Error::MalformedSchema {
                reason: "lz4 directory header decode failed".to_string(),
            }
        })?,
        other => {
            return Err(Error::UnsupportedCompression {
                code: other,
                context: "directory header",
            })
        }
    };

    let mut dir_reader = BinaryReader::new(Cursor::new(directory));
    dir_reader.skip(16)?;
    let block_count = dir_reader.read_u32_be()?;
    let mut blocks = Vec::with_capacity(block_count as usize);
    for _ in 0..block_count {
        let _decompressed_size = dir_reader.read_u32_be()?;
        let compressed_size = dir_reader.read_u32_be()?;
        let flags = dir_reader.read_u16_be()?;
        blocks.push(BlockInfo {
            compressed_size,
            flags,
        });
    }

    let file_count = dir_reader.read_u32_be()?;
    let mut assets = Vec::with_capacity(file_count as usize);
    debug!(file_count, block_count, "unpacking unityfs container");

    for i in 0..file_count as usize {
        let offset = dir_reader.read_u64_be()?;
        let _size = dir_reader.read_u64_be()?;
        let _file_flags = dir_reader.read_u32_be()?;
        let _name = dir_reader.read_cstring()?;

        let block = blocks.get(i).ok_or_else(|| Error::MalformedSchema {
            reason: format!("file entry {i} has no matching block info"),
        })?;

        let abs_offset = data_base + offset;
        let raw = reader.at(abs_offset, |r| r.read_bytes(block.compressed_size as usize))?;

        let file_ctype = block.flags as u32 & BundleFlags::COMPRESSION_MASK.bits();
        let decompressed = match file_ctype {
            0 => raw,
            1 => {
                let split = raw.len().min(5);
                let (first5, rest) = raw.split_at(split);
                // The original bundle doesn't carry the uncompressed size
                // in this sub-stream; patching in the "unknown size" LZMA
                // sentinel lets the decoder read to end-of-stream instead.
                lzma_alone_decompress(first5, None, rest)?
            }
            other => {
                return Err(Error::UnsupportedCompression {
                    code: other,
                    context: "per-file block",
                })
            }
        };

        let mut asset_reader = BinaryReader::new(Cursor::new(decompressed.clone()));
        assets.push(Asset::read(&mut asset_reader, decompressed)?);
    }

    Ok(assets)
}

/// Reassembles an LZMA_ALONE header (1 property byte + 4-byte dictionary
/// size + 8-byte uncompressed size) from a truncated prefix and decodes.
/// `uncompressed_size: None` patches in the all-ones "size unknown"
/// sentinel so the decoder reads until its end-of-stream marker instead.
fn lzma_alone_decompress(first5: &[u8], uncompressed_size: Option<u64>, rest: &[u8]) -> Result<Vec<u8>> {
    let mut header = Vec::with_capacity(13 + rest.len());
    header.extend_from_slice(first5);
    header.resize(5, 0);
    match uncompressed_size {
        Some(n) => header.extend_from_slice(&n.to_le_bytes()),
        None => header.extend_from_slice(&[0xFF; 8]),
    }
    header.extend_from_slice(rest);

    let mut cursor = Cursor::new(header);
    let mut out = Vec::new();
    lzma_rs::lzma_decompress(&mut cursor, &mut out).map_err(|_| Error::MalformedSchema {
        reason: "lzma stream decode failed".to_string(),
    })?;
    Ok(out)
}

/// Ordered sequence of [`EnvelopeProbe`]s, re-entered from the top after
/// every successful unwrap until a probe reports a terminal container or
/// all probes decline the buffer.
pub struct Pipeline {
    probes: Vec<Box<dyn EnvelopeProbe>>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Pipeline::new(vec![
            Box::new(EncryptedProbe),
            Box::new(UnityFsProbe),
            Box::new(UnityRawProbe),
        ])
    }
}

impl Pipeline {
    pub fn new(probes: Vec<Box<dyn EnvelopeProbe>>) -> Self {
        Pipeline { probes }
    }

    /// Runs the buffer through the probe chain, looping back to the first
    /// probe after every unwrap, until a terminal container yields assets
    /// or every probe has declined.
    pub fn run(&self, buf: Vec<u8>, cipher: Option<&dyn CipherPrimitive>) -> Result<Vec<Asset>> {
        let mut current = buf;
        let mut tried = 0usize;

        'restart: loop {
            for probe in &self.probes {
                tried += 1;
                match probe.probe(current, cipher)? {
                    ProbeOutcome::NotMine(returned) => {
                        current = returned;
                        continue;
                    }
                    ProbeOutcome::Unwrapped(next) => {
                        debug!(probe = probe.name(), "unwrapped envelope layer");
                        current = next;
                        continue 'restart;
                    }
                    ProbeOutcome::Terminal(assets) => return Ok(assets),
                }
            }
            return Err(Error::UnknownEnvelope { tried });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct XorCipher(u8);
    impl CipherPrimitive for XorCipher {
        fn decrypt(&self, buf: &mut [u8]) {
            for b in buf {
                *b ^= self.0;
            }
        }
    }

    #[test]
    fn pipeline_reports_unknown_envelope_when_no_probe_matches() {
        let pipeline = Pipeline::default();
        let err = pipeline.run(vec![0u8; 16], None).unwrap_err();
        assert!(matches!(err, Error::UnknownEnvelope { tried: 3 }));
    }

    #[test]
    fn encrypted_probe_without_cipher_errors() {
        let mut buf = ENCRYPTED_MAGIC.to_vec();
        buf.extend_from_slice(&[0u8; 8]);
        let pipeline = Pipeline::default();
        let err = pipeline.run(buf, None).unwrap_err();
        assert!(matches!(err, Error::CipherUnavailable));
    }

    #[test]
    fn encrypted_probe_unwraps_then_restarts_pipeline() {
        let mut cleartext = UNITYRAW_MAGIC.to_vec();
        cleartext.resize(UNITYRAW_ORIGIN, 0);
        let key = 0x42u8;
        let ciphertext: Vec<u8> = cleartext.iter().map(|b| b ^ key).collect();

        // The first 5 bytes of ciphertext must match the encrypted magic
        // for the probe to recognize it.
        let mut buf = ENCRYPTED_MAGIC.to_vec();
        buf.extend_from_slice(&ciphertext[5..]);

        let cipher = XorCipher(key);
        // Decrypting buf (which starts with ENCRYPTED_MAGIC, i.e. cleartext
        // XORed with key at the first 5 bytes too) reproduces cleartext.
        let mut reconstructed = buf.clone();
        cipher.decrypt(&mut reconstructed);
        assert_eq!(&reconstructed[..UNITYRAW_MAGIC.len()], UNITYRAW_MAGIC);

        let pipeline = Pipeline::default();
        let assets = pipeline.run(buf, Some(&cipher as &dyn CipherPrimitive));
        // Past the magic the body is all zero bytes, so Asset::read will
        // fail deeper in (no valid header) — what matters here is that we
        // got past "no probe recognized" and into actual asset parsing.
        assert!(!matches!(assets, Err(Error::UnknownEnvelope { .. })));
        assert!(!matches!(assets, Err(Error::CipherUnavailable)));
    }

    #[test]
    fn unityraw_probe_rejects_buffer_shorter_than_origin() {
        let probe = UnityRawProbe;
        let mut buf = UNITYRAW_MAGIC.to_vec();
        buf.extend_from_slice(&[0u8; 4]);
        let err = probe.probe(buf, None).unwrap_err();
        assert!(matches!(err, Error::UnexpectedEof { .. }));
    }

    #[test]
    fn unityfs_probe_declines_non_matching_magic() {
        let probe = UnityFsProbe;
        match probe.probe(vec![0u8; 16], None).unwrap() {
            ProbeOutcome::NotMine(_) => {}
            _ => panic!("expected NotMine"),
        }
    }
}
