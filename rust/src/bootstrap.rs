//! Startup wiring. The host calls `Bootstrap::start` once, before any token is
//! signed or verified, and keeps the returned `AuthContext` for the life of the
//! process.

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::config::MobileAuthConfig;
use crate::notices::{Notice, NoticeError, OperatorNotices};
use crate::provisioner::{ProvisionError, SecretOutcome, SecretProvisioner};
use crate::registry::{ProviderRegistry, JWT_AUTH_CAPABILITY};
use crate::store::{FileStore, OptionStore};
use crate::tokens::TokenCodec;

/// Owner name this crate claims the JWT capability under.
pub const PROVIDER_NAME: &str = "dt-mobile-app";

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("authentication bootstrap failed: {0}")]
    Provision(#[from] ProvisionError),
    #[error("notice error: {0}")]
    Notice(#[from] NoticeError),
}

pub struct AuthContext {
    store: Arc<dyn OptionStore>,
    notices: Arc<OperatorNotices>,
    provisioner: SecretProvisioner,
    outcome: SecretOutcome,
    codec: Option<TokenCodec>,
}

impl AuthContext {
    pub fn store(&self) -> &Arc<dyn OptionStore> {
        &self.store
    }

    pub fn provisioner(&self) -> &SecretProvisioner {
        &self.provisioner
    }

    pub fn outcome(&self) -> &SecretOutcome {
        &self.outcome
    }

    /// `None` when another provider owns JWT authentication.
    pub fn codec(&self) -> Option<&TokenCodec> {
        self.codec.as_ref()
    }

    pub fn provider_conflict(&self) -> bool {
        self.notices.provider_conflict()
    }

    /// Notices for one admin page load.
    pub fn admin_notices(&self) -> Result<Vec<Notice>, BootstrapError> {
        Ok(self.notices.take_for_page_load(self.store.as_ref())?)
    }
}

pub struct Bootstrap;

impl Bootstrap {
    /// Opens the file store named in `config` and starts against it.
    pub fn start(config: &MobileAuthConfig, registry: &ProviderRegistry) -> Result<AuthContext, BootstrapError> {
        let store: Arc<dyn OptionStore> = Arc::new(FileStore::open(&config.store_path));
        Self::start_with_store(config, registry, store)
    }

    pub fn start_with_store(
        config: &MobileAuthConfig,
        registry: &ProviderRegistry,
        store: Arc<dyn OptionStore>,
    ) -> Result<AuthContext, BootstrapError> {
        let notices = Arc::new(OperatorNotices::new());
        let registration = registry.claim(JWT_AUTH_CAPABILITY, PROVIDER_NAME);
        if registration.is_conflict() {
            let holder = registry.holder(JWT_AUTH_CAPABILITY).unwrap_or_default();
            warn!(holder = %holder, "jwt authentication deferred to another provider");
        }
        let provisioner = SecretProvisioner::new(
            Arc::clone(&store),
            registration,
            Arc::clone(&notices),
            config.provisioner_options(),
        );

        let outcome = provisioner.ensure_secret()?;
        let codec = match &outcome {
            SecretOutcome::Active { secret, source } => {
                info!(?source, issuer = %config.issuer, "jwt authentication ready");
                Some(TokenCodec::new(secret.clone(), config.issuer.clone(), config.token_ttl()))
            }
            SecretOutcome::Deferred { .. } => None,
        };

        Ok(AuthContext {
            store,
            notices,
            provisioner,
            outcome,
            codec,
        })
    }
}
