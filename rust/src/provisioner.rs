//! Signing-secret provisioning.
//!
//! `SecretProvisioner::ensure_secret` makes sure a signing secret exists before
//! any token is issued or verified. A secret found in the option store is used
//! as-is and never overwritten. When none exists, fresh OS entropy is encoded
//! and written with an insert-if-absent call; if a concurrent writer got there
//! first, its value is adopted instead. The resolved secret is cached for the
//! life of the provisioner, so the store is consulted once per boot.

use std::fmt;
use std::sync::{Arc, Mutex};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use zeroize::Zeroize;

use crate::crypto::entropy::{random_bytes, EntropyError, EntropySource, OsEntropy, MIN_SECRET_BYTES};
use crate::crypto::integrity::fingerprint;
use crate::crypto::legacy::phc_encode;
use crate::notices::OperatorNotices;
use crate::registry::Registration;
use crate::store::{OptionStore, StoreError};

/// Option key the secret has always been stored under.
pub const DEFAULT_SECRET_KEY: &str = "my_jwt_key";
pub const DEFAULT_SECRET_BYTES: usize = 32;

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("entropy error: {0}")]
    Entropy(#[from] EntropyError),
    #[error("secret encoding failed: {0}")]
    Encoding(String),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// How freshly generated random bytes are turned into the stored string.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SecretEncoding {
    /// URL-safe base64 of the random bytes.
    #[default]
    Raw,
    /// Argon2id PHC string over the random bytes, as older installs stored it.
    Argon2Phc,
}

#[derive(Debug, Clone)]
pub struct ProvisionerOptions {
    pub secret_key: String,
    pub secret_bytes: usize,
    pub encoding: SecretEncoding,
    /// Operator-pinned secret. Takes precedence over the store and is never
    /// written to it.
    pub override_secret: Option<String>,
}

impl Default for ProvisionerOptions {
    fn default() -> Self {
        Self {
            secret_key: DEFAULT_SECRET_KEY.to_string(),
            secret_bytes: DEFAULT_SECRET_BYTES,
            encoding: SecretEncoding::Raw,
            override_secret: None,
        }
    }
}

/// Opaque signing secret. The value is wiped on drop and redacted in `Debug`.
#[derive(Clone, PartialEq, Eq)]
pub struct SigningSecret {
    value: String,
}

impl SigningSecret {
    pub fn new(value: impl Into<String>) -> Self {
        Self { value: value.into() }
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.value.as_bytes()
    }

    /// Short digest prefix, safe to log.
    pub fn fingerprint(&self) -> String {
        fingerprint(self.value.as_bytes(), 12)
    }
}

impl fmt::Debug for SigningSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningSecret")
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

impl Drop for SigningSecret {
    fn drop(&mut self) {
        self.value.zeroize();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretSource {
    Override,
    Stored,
    Generated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretOutcome {
    Active {
        secret: SigningSecret,
        source: SecretSource,
    },
    /// Another module owns JWT authentication; nothing was provisioned.
    Deferred { holder: String },
}

impl SecretOutcome {
    pub fn secret(&self) -> Option<&SigningSecret> {
        match self {
            SecretOutcome::Active { secret, .. } => Some(secret),
            SecretOutcome::Deferred { .. } => None,
        }
    }
}

/// Built once by the host during startup and shared by reference afterwards.
pub struct SecretProvisioner {
    store: Arc<dyn OptionStore>,
    registration: Registration,
    notices: Arc<OperatorNotices>,
    options: ProvisionerOptions,
    entropy: Box<dyn EntropySource>,
    active: Mutex<Option<(SigningSecret, SecretSource)>>,
}

impl SecretProvisioner {
    pub fn new(
        store: Arc<dyn OptionStore>,
        registration: Registration,
        notices: Arc<OperatorNotices>,
        options: ProvisionerOptions,
    ) -> Self {
        Self {
            store,
            registration,
            notices,
            options,
            entropy: Box::new(OsEntropy),
            active: Mutex::new(None),
        }
    }

    /// Replaces the OS entropy source.
    pub fn with_entropy(mut self, entropy: Box<dyn EntropySource>) -> Self {
        self.entropy = entropy;
        self
    }

    pub fn options(&self) -> &ProvisionerOptions {
        &self.options
    }

    pub fn ensure_secret(&self) -> Result<SecretOutcome, ProvisionError> {
        if let Registration::Conflict { holder } = &self.registration {
            self.notices.raise_provider_conflict(holder);
            return Ok(SecretOutcome::Deferred {
                holder: holder.clone(),
            });
        }

        let mut active = match self.active.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some((secret, source)) = active.as_ref() {
            return Ok(SecretOutcome::Active {
                secret: secret.clone(),
                source: *source,
            });
        }

        let (secret, source) = self.resolve()?;
        *active = Some((secret.clone(), source));
        Ok(SecretOutcome::Active { secret, source })
    }

    fn resolve(&self) -> Result<(SigningSecret, SecretSource), ProvisionError> {
        if let Some(pinned) = self.options.override_secret.as_deref().filter(|v| !v.is_empty()) {
            info!("using operator-pinned signing secret");
            return Ok((SigningSecret::new(pinned), SecretSource::Override));
        }

        let key = self.options.secret_key.as_str();
        match retry_once("get", || self.store.get(key))? {
            Some(value) if !value.is_empty() => {
                let secret = SigningSecret::new(value);
                debug!(key, fingerprint = %secret.fingerprint(), "reusing stored signing secret");
                return Ok((secret, SecretSource::Stored));
            }
            Some(_) => warn!(key, "stored signing secret is empty; replacing it"),
            None => {}
        }

        let fresh = SigningSecret::new(self.generate()?);
        match retry_once("add", || self.store.add(key, fresh.as_str()))? {
            None => {
                info!(key, fingerprint = %fresh.fingerprint(), "generated signing secret");
                Ok((fresh, SecretSource::Generated))
            }
            Some(existing) => {
                let secret = SigningSecret::new(existing);
                debug!(key, fingerprint = %secret.fingerprint(), "signing secret written concurrently; adopting it");
                Ok((secret, SecretSource::Stored))
            }
        }
    }

    fn generate(&self) -> Result<String, ProvisionError> {
        let len = self.options.secret_bytes.max(MIN_SECRET_BYTES);
        let bytes = random_bytes(self.entropy.as_ref(), len)?;
        match self.options.encoding {
            SecretEncoding::Raw => Ok(URL_SAFE_NO_PAD.encode(bytes.as_slice())),
            SecretEncoding::Argon2Phc => {
                phc_encode(&bytes).map_err(|e| ProvisionError::Encoding(format!("{e}")))
            }
        }
    }
}

impl fmt::Debug for SecretProvisioner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretProvisioner")
            .field("registration", &self.registration)
            .field("secret_key", &self.options.secret_key)
            .field("encoding", &self.options.encoding)
            .finish_non_exhaustive()
    }
}

fn retry_once<T>(op: &str, mut call: impl FnMut() -> Result<T, StoreError>) -> Result<T, StoreError> {
    match call() {
        Ok(value) => Ok(value),
        Err(first) => {
            warn!(op, error = %first, "option store call failed; retrying once");
            call()
        }
    }
}
