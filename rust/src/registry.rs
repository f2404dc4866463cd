//! Capability registry. The host builds one at startup and every module that
//! wants to provide a capability claims it here; the first owner wins.

use std::collections::HashMap;
use std::sync::Mutex;

/// Capability name claimed by the JWT authentication provider.
pub const JWT_AUTH_CAPABILITY: &str = "jwt-auth";

/// Outcome of a capability claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    Claimed,
    Conflict { holder: String },
}

impl Registration {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Registration::Conflict { .. })
    }
}

#[derive(Debug, Default)]
pub struct ProviderRegistry {
    holders: Mutex<HashMap<String, String>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `capability` for `owner`. Re-claiming by the current holder is
    /// not a conflict.
    pub fn claim(&self, capability: &str, owner: &str) -> Registration {
        let mut holders = match self.holders.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match holders.get(capability) {
            Some(holder) if holder != owner => Registration::Conflict {
                holder: holder.clone(),
            },
            Some(_) => Registration::Claimed,
            None => {
                holders.insert(capability.to_string(), owner.to_string());
                Registration::Claimed
            }
        }
    }

    pub fn holder(&self, capability: &str) -> Option<String> {
        let holders = match self.holders.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        holders.get(capability).cloned()
    }
}
