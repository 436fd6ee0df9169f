//! Compressor and encryptor plug-in interfaces, and the composition pipeline
//! applied at block boundaries:
//! `page-image -> compress? -> encrypt? -> write block`, reversed on read.
//!
//! Compression/encryption *algorithms* are treated as opaque byte-stream
//! transformers; what's in scope is the trait seam and a couple of concrete
//! transformers so the pipeline is exercisable end to end.

use crate::error::{Error, Result};

/// Worst-case expansion a transformer may apply, used to size scratch buffers.
pub trait Sizing {
    fn max_expansion(&self, src_len: usize) -> usize;
}

/// Block compressor. `compress` may legitimately fail to shrink the input;
/// callers fall back to storing the block uncompressed and record that in
/// the block header's `COMPRESSED` flag.
pub trait Compressor: Sizing + Send + Sync {
    /// Returns `Ok(Some(n))` with the compressed length on success, or
    /// `Ok(None)` if compression did not shrink the input (the
    /// `compression_failed` case).
    fn compress(&self, src: &[u8], dst: &mut [u8]) -> Result<Option<usize>>;
    fn decompress(&self, src: &[u8], dst: &mut [u8]) -> Result<usize>;
    fn name(&self) -> &'static str;
}

/// Block encryptor, keyed per connection.
pub trait Encryptor: Sizing + Send + Sync {
    fn encrypt(&self, keyid: &str, src: &[u8], dst: &mut [u8]) -> Result<usize>;
    fn decrypt(&self, keyid: &str, src: &[u8], dst: &mut [u8]) -> Result<usize>;
    fn name(&self) -> &'static str;
}

/// No-op compressor, grounded in the upstream `ext/encryptors/nop` shape
/// (an identity transform used as the default when no codec is configured).
#[derive(Debug, Default)]
pub struct NopCompressor;

impl Sizing for NopCompressor {
    fn max_expansion(&self, src_len: usize) -> usize {
        src_len
    }
}

impl Compressor for NopCompressor {
    fn compress(&self, _src: &[u8], _dst: &mut [u8]) -> Result<Option<usize>> {
        Ok(None)
    }

    fn decompress(&self, src: &[u8], dst: &mut [u8]) -> Result<usize> {
        if dst.len() < src.len() {
            return Err(Error::InvalidArgument("decompress buffer too small".into()));
        }
        dst[..src.len()].copy_from_slice(src);
        Ok(src.len())
    }

    fn name(&self) -> &'static str {
        "none"
    }
}

/// Snappy-backed compressor (the `snap` crate), a concrete stand-in for the
/// pluggable `block_compressor` configuration option.
#[derive(Debug, Default)]
pub struct SnappyCompressor;

impl Sizing for SnappyCompressor {
    fn max_expansion(&self, src_len: usize) -> usize {
        snap::raw::max_compress_len(src_len)
    }
}

impl Compressor for SnappyCompressor {
    fn compress(&self, src: &[u8], dst: &mut [u8]) -> Result<Option<usize>> {
        let mut encoder = snap::raw::Encoder::new();
        let n = encoder
            .compress(src, dst)
            .map_err(|e| Error::InvalidArgument(format!("snappy compress failed: {e}")))?;
        if n >= src.len() {
            // Compression did not help; caller stores the block uncompressed.
            Ok(None)
        } else {
            Ok(Some(n))
        }
    }

    fn decompress(&self, src: &[u8], dst: &mut [u8]) -> Result<usize> {
        let mut decoder = snap::raw::Decoder::new();
        decoder
            .decompress(src, dst)
            .map_err(|e| Error::CorruptFile(format!("snappy decompress failed: {e}")))
    }

    fn name(&self) -> &'static str {
        "snappy"
    }
}

/// No-op encryptor, grounded in `ext/encryptors/nop/nop_encrypt.c`: identity
/// transform with a fixed-size "keyid length" sizing overhead of zero.
#[derive(Debug, Default)]
pub struct NopEncryptor;

impl Sizing for NopEncryptor {
    fn max_expansion(&self, src_len: usize) -> usize {
        src_len
    }
}

impl Encryptor for NopEncryptor {
    fn encrypt(&self, _keyid: &str, src: &[u8], dst: &mut [u8]) -> Result<usize> {
        if dst.len() < src.len() {
            return Err(Error::InvalidArgument("encrypt buffer too small".into()));
        }
        dst[..src.len()].copy_from_slice(src);
        Ok(src.len())
    }

    fn decrypt(&self, _keyid: &str, src: &[u8], dst: &mut [u8]) -> Result<usize> {
        self.encrypt(_keyid, src, dst)
    }

    fn name(&self) -> &'static str {
        "none"
    }
}

/// Per-table codec configuration: which compressor/encryptor to run at
/// block boundaries, and the encryption keyid (`encryption=(name,keyid)`).
pub struct Codec {
    pub compressor: Box<dyn Compressor>,
    pub encryptor: Option<Box<dyn Encryptor>>,
    pub keyid: String,
}

impl Default for Codec {
    fn default() -> Self {
        Self {
            compressor: Box::new(NopCompressor),
            encryptor: None,
            keyid: String::new(),
        }
    }
}

impl Codec {
    /// Runs `page-image -> compress? -> encrypt?`, returning the transformed
    /// bytes and flags to record in the block header.
    pub fn encode(&self, image: &[u8]) -> Result<(Vec<u8>, bool, bool)> {
        let mut scratch = vec![0u8; self.compressor.max_expansion(image.len())];
        let compressed = match self.compressor.compress(image, &mut scratch)? {
            Some(n) => {
                scratch.truncate(n);
                Some(scratch)
            }
            None => None,
        };
        let (bytes, was_compressed) = match compressed {
            Some(c) => (c, true),
            None => (image.to_vec(), false),
        };

        if let Some(enc) = &self.encryptor {
            let mut out = vec![0u8; enc.max_expansion(bytes.len())];
            let n = enc.encrypt(&self.keyid, &bytes, &mut out)?;
            out.truncate(n);
            Ok((out, was_compressed, true))
        } else {
            Ok((bytes, was_compressed, false))
        }
    }

    /// Reverses [`Codec::encode`]: `decrypt? -> decompress?`.
    pub fn decode(&self, bytes: &[u8], compressed: bool, encrypted: bool, orig_len: usize) -> Result<Vec<u8>> {
        let decrypted = if encrypted {
            let enc = self
                .encryptor
                .as_ref()
                .ok_or_else(|| Error::CorruptFile("block encrypted but no encryptor configured".into()))?;
            let mut out = vec![0u8; bytes.len().max(orig_len)];
            let n = enc.decrypt(&self.keyid, bytes, &mut out)?;
            out.truncate(n);
            out
        } else {
            bytes.to_vec()
        };

        if compressed {
            let mut out = vec![0u8; orig_len];
            let n = self.compressor.decompress(&decrypted, &mut out)?;
            out.truncate(n);
            Ok(out)
        } else {
            Ok(decrypted)
        }
    }
}
