//! Compression and encryption boundaries of binary blocks.
//!
//! Transforms are looked up by the id written in a [`BinaryBlock`](crate::BinaryBlock) when a
//! binary encoding is bound, so an unknown id is a configuration error rather than a
//! per-record one.

use std::{
    collections::HashMap,
    fmt,
    io::{Read, Write},
    sync::Arc,
};

use flate2::{
    Compression,
    read::{DeflateDecoder, GzDecoder, ZlibDecoder},
    write::{DeflateEncoder, GzEncoder, ZlibEncoder},
};

use crate::error::Error;

pub trait Compressor: Send + Sync + fmt::Debug {
    fn id(&self) -> &str;
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, Error>;
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, Error>;
}

/// An encryption scheme. None is built in; register one with
/// [`TransformRegistry::register_cipher`].
pub trait Cipher: Send + Sync + fmt::Debug {
    fn id(&self) -> &str;
    fn encrypt(&self, data: &[u8]) -> Result<Vec<u8>, Error>;
    fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, Error>;
}

macro_rules! flate_compressor {
    ($name:ident, $id:literal, $enc:ident, $dec:ident) => {
        #[derive(Debug, Clone, Copy, Default)]
        pub struct $name;

        impl Compressor for $name {
            fn id(&self) -> &str {
                $id
            }

            fn compress(&self, data: &[u8]) -> Result<Vec<u8>, Error> {
                let mut encoder = $enc::new(Vec::with_capacity(data.len() / 2), Compression::default());
                encoder.write_all(data)?;
                Ok(encoder.finish()?)
            }

            fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, Error> {
                let mut out = Vec::with_capacity(data.len() * 2);
                $dec::new(data).read_to_end(&mut out)?;
                Ok(out)
            }
        }
    };
}

flate_compressor!(Deflate, "deflate", DeflateEncoder, DeflateDecoder);
flate_compressor!(Zlib, "zlib", ZlibEncoder, ZlibDecoder);
flate_compressor!(Gzip, "gzip", GzEncoder, GzDecoder);

#[cfg(feature = "zstd")]
#[derive(Debug, Clone, Copy, Default)]
pub struct Zstd;

#[cfg(feature = "zstd")]
impl Compressor for Zstd {
    fn id(&self) -> &str {
        "zstd"
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, Error> {
        Ok(zstd::encode_all(data, 0)?)
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, Error> {
        Ok(zstd::decode_all(data)?)
    }
}

/// Transforms available to binary encodings, keyed by id.
#[derive(Clone, Debug)]
pub struct TransformRegistry {
    compressors: HashMap<String, Arc<dyn Compressor>>,
    ciphers: HashMap<String, Arc<dyn Cipher>>,
}

impl Default for TransformRegistry {
    fn default() -> Self {
        let mut registry = TransformRegistry {
            compressors: HashMap::new(),
            ciphers: HashMap::new(),
        };
        registry.register_compressor(Deflate);
        registry.register_compressor(Zlib);
        registry.register_compressor(Gzip);
        #[cfg(feature = "zstd")]
        registry.register_compressor(Zstd);
        registry
    }
}

impl TransformRegistry {
    /// A registry without any transform.
    pub fn empty() -> Self {
        TransformRegistry {
            compressors: HashMap::new(),
            ciphers: HashMap::new(),
        }
    }

    pub fn register_compressor(&mut self, compressor: impl Compressor + 'static) -> &mut Self {
        self.compressors
            .insert(compressor.id().to_string(), Arc::new(compressor));
        self
    }

    pub fn register_cipher(&mut self, cipher: impl Cipher + 'static) -> &mut Self {
        self.ciphers.insert(cipher.id().to_string(), Arc::new(cipher));
        self
    }

    pub fn compressor(&self, id: &str) -> Result<Arc<dyn Compressor>, Error> {
        self.compressors
            .get(id)
            .cloned()
            .ok_or_else(|| Error::InvalidEncoding(format!("unknown compression `{id}`")))
    }

    pub fn cipher(&self, id: &str) -> Result<Arc<dyn Cipher>, Error> {
        self.ciphers
            .get(id)
            .cloned()
            .ok_or_else(|| Error::InvalidEncoding(format!("unknown encryption `{id}`")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flate_round_trip() {
        let data: Vec<u8> = (0..2048).map(|i| (i % 7) as u8).collect();
        let registry = TransformRegistry::default();
        for id in ["deflate", "zlib", "gzip"] {
            let c = registry.compressor(id).unwrap();
            let packed = c.compress(&data).unwrap();
            assert!(packed.len() < data.len());
            assert_eq!(c.decompress(&packed).unwrap(), data);
        }
    }

    #[cfg(feature = "zstd")]
    #[test]
    fn test_zstd_round_trip() {
        let data = b"swe swe swe swe swe swe swe".repeat(10);
        let c = TransformRegistry::default().compressor("zstd").unwrap();
        assert_eq!(c.decompress(&c.compress(&data).unwrap()).unwrap(), data);
    }

    #[test]
    fn test_unknown_ids() {
        let registry = TransformRegistry::default();
        assert!(matches!(
            registry.compressor("lzma"),
            Err(Error::InvalidEncoding(_))
        ));
        assert!(registry.cipher("aes").is_err());
    }
}
