//! Signing-secret provisioning and JWT bootstrap for the mobile app extension.
//! The host builds one `AuthContext` at startup; everything the token layer
//! needs (the persisted secret, provider registration, operator notices)
//! flows through it explicitly rather than through globals.

pub mod bootstrap;
pub mod config;
pub mod crypto;
pub mod notices;
pub mod provisioner;
pub mod registry;
pub mod store;
pub mod tokens;
