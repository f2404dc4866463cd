//! Operating-system entropy for signing secrets.
//! Failure to read the OS random source is never papered over with a weaker
//! generator: callers receive `EntropyError` and must abort provisioning.

use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;
use zeroize::Zeroizing;

/// Smallest amount of raw entropy accepted for a signing secret.
pub const MIN_SECRET_BYTES: usize = 16;

#[derive(Debug, Error)]
pub enum EntropyError {
    #[error("os random source unavailable: {0}")]
    Unavailable(String),
    #[error("requested {requested} random bytes; at least {MIN_SECRET_BYTES} are required")]
    TooShort { requested: usize },
}

/// Source of cryptographically secure random bytes.
pub trait EntropySource: Send + Sync {
    fn fill(&self, buf: &mut [u8]) -> Result<(), EntropyError>;
}

/// Default source backed by the operating system RNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsEntropy;

impl EntropySource for OsEntropy {
    fn fill(&self, buf: &mut [u8]) -> Result<(), EntropyError> {
        OsRng
            .try_fill_bytes(buf)
            .map_err(|e| EntropyError::Unavailable(format!("{e}")))
    }
}

/// Draws `len` random bytes from `source`. The buffer is wiped when dropped.
pub fn random_bytes(source: &dyn EntropySource, len: usize) -> Result<Zeroizing<Vec<u8>>, EntropyError> {
    if len < MIN_SECRET_BYTES {
        return Err(EntropyError::TooShort { requested: len });
    }
    let mut bytes = Zeroizing::new(vec![0u8; len]);
    source.fill(bytes.as_mut_slice())?;
    Ok(bytes)
}
