use image::DynamicImage;
use image_hasher::{HashAlg, Hasher, HasherConfig};
use std::path::Path;
use thiserror::Error;

use crate::core::fingerprint::Fingerprint;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode {path}: {source}")]
    Image {
        path: String,
        #[source]
        source: image::ImageError,
    },
}

/// Perceptual hash codec: a DCT-preprocessed mean hash (classic pHash).
///
/// The transform is deterministic and invariant to the source file format;
/// minor resizes and recompressions move only a few bits, structural changes
/// move many. Output length is always `hash_size * hash_size` bits.
pub struct HashCodec {
    hasher: Hasher,
    bits: u32,
}

impl HashCodec {
    pub const MIN_HASH_SIZE: u32 = 2;
    pub const MAX_HASH_SIZE: u32 = 64;
    pub const DEFAULT_HASH_SIZE: u32 = 8;

    pub fn new(hash_size: u32) -> Self {
        let hasher = HasherConfig::new()
            .hash_size(hash_size, hash_size)
            .hash_alg(HashAlg::Mean)
            .preproc_dct()
            .to_hasher();

        Self {
            hasher,
            bits: hash_size * hash_size,
        }
    }

    /// Fingerprint a decoded image.
    pub fn compute(&self, image: &DynamicImage) -> Fingerprint {
        let hash = self.hasher.hash_image(image);
        Fingerprint::from_bytes(self.bits, hash.as_bytes())
    }

    /// Decode an image file, classifying read and decode failures separately.
    pub fn decode(path: &Path) -> Result<DynamicImage, DecodeError> {
        let reader = image::ImageReader::open(path).map_err(|source| DecodeError::Io {
            path: path.display().to_string(),
            source,
        })?;

        reader.decode().map_err(|source| DecodeError::Image {
            path: path.display().to_string(),
            source,
        })
    }
}
