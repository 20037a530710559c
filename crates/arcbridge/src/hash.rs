/// Digest computed over each extracted file as its bytes are written.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum HashStrategy {
    #[default]
    None,
    #[cfg(feature = "sha256")]
    Sha256,
    #[cfg(feature = "blake3")]
    Blake3,
}

impl HashStrategy {
    pub(crate) fn hasher(self) -> Option<ContentHasher> {
        match self {
            Self::None => None,
            #[cfg(feature = "sha256")]
            Self::Sha256 => {
                use sha2::Digest;
                Some(ContentHasher::Sha256(sha2::Sha256::new()))
            }
            #[cfg(feature = "blake3")]
            Self::Blake3 => Some(ContentHasher::Blake3(Box::new(blake3::Hasher::new()))),
        }
    }

    /// Hex digest of `content`.
    pub fn compute_from_bytes(self, content: &[u8]) -> Option<String> {
        let mut hasher = self.hasher()?;
        hasher.update(content);
        Some(hasher.finalize())
    }
}

/// Incremental state of a [`HashStrategy`].
pub(crate) enum ContentHasher {
    #[cfg(feature = "sha256")]
    Sha256(sha2::Sha256),
    #[cfg(feature = "blake3")]
    Blake3(Box<blake3::Hasher>),
}

impl ContentHasher {
    pub(crate) fn update(&mut self, bytes: &[u8]) {
        match self {
            #[cfg(feature = "sha256")]
            Self::Sha256(hasher) => {
                use sha2::Digest;
                hasher.update(bytes);
            }
            #[cfg(feature = "blake3")]
            Self::Blake3(hasher) => {
                hasher.update(bytes);
            }
            #[cfg(not(any(feature = "sha256", feature = "blake3")))]
            _ => {
                let _ = bytes;
            }
        }
    }

    pub(crate) fn finalize(self) -> String {
        match self {
            #[cfg(feature = "sha256")]
            Self::Sha256(hasher) => {
                use sha2::Digest;
                hex::encode(hasher.finalize())
            }
            #[cfg(feature = "blake3")]
            Self::Blake3(hasher) => hasher.finalize().to_hex().to_string(),
            #[cfg(not(any(feature = "sha256", feature = "blake3")))]
            _ => String::new(),
        }
    }
}
