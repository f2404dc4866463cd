//! Cryptographic primitives used by secret provisioning: OS entropy, the
//! legacy Argon2id secret shape, and digest fingerprints.

pub mod entropy;
pub mod integrity;
pub mod legacy;
