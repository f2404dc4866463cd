//! Legacy secret shape: the PHC string of a salted Argon2id hash over random
//! bytes. Installations provisioned before raw secrets became the default
//! still store this shape; the `argon2-phc` encoding produces it for new ones.

use argon2::password_hash::{Error as PhcError, SaltString};
use argon2::{Algorithm, Argon2, Params, PasswordHasher, Version};
use rand::rngs::OsRng;

/// 19 MiB, 3 passes, 1 lane.
const ARGON2_MEMORY_KIB: u32 = 19 * 1024;
const ARGON2_PASSES: u32 = 3;
const ARGON2_LANES: u32 = 1;

/// Hashes `bytes` under a fresh salt and returns the `$argon2id$...` string.
pub fn phc_encode(bytes: &[u8]) -> Result<String, PhcError> {
    let params = Params::new(ARGON2_MEMORY_KIB, ARGON2_PASSES, ARGON2_LANES, None)?;
    let hasher = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
    let salt = SaltString::generate(&mut OsRng);
    Ok(hasher.hash_password(bytes, &salt)?.to_string())
}
