//! Authentication protocol: `SHA256("Basic " + base64(user:pass))` compared
//! in constant time against the configured admin/limited digests.
use {
    serde::Deserialize,
    sha2::{Digest, Sha256},
};

#[derive(Debug, Deserialize)]
pub struct AuthenticateParams {
    pub username: String,
    pub passphrase: String,
}

/// Outcome of a successful authentication attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthResult {
    Admin,
    Limited,
}

/// Hashes `"Basic " + base64(username:passphrase)` the way the wire protocol
/// describes (spec.md §6) and compares it in constant time against the two
/// configured digests. Admin is checked first so a credential pair matching
/// both (degenerate config) resolves to admin.
pub fn authenticate(
    username: &str,
    passphrase: &str,
    admin_hash: Option<&[u8; 32]>,
    limited_hash: Option<&[u8; 32]>,
) -> Option<AuthResult> {
    let digest = hash_credentials(username, passphrase);

    if let Some(admin) = admin_hash {
        if constant_time_eq(&digest, admin) {
            return Some(AuthResult::Admin);
        }
    }

    if let Some(limited) = limited_hash {
        if constant_time_eq(&digest, limited) {
            return Some(AuthResult::Limited);
        }
    }

    None
}

pub(crate) fn hash_credentials(username: &str, passphrase: &str) -> [u8; 32] {
    let login = format!("{}:{}", username, passphrase);
    let basic = format!("Basic {}", base64::encode(login.as_bytes()));

    let mut hasher = Sha256::new();
    hasher.update(basic.as_bytes());
    hasher.finalize().into()
}

/// Byte-for-byte comparison that does not short-circuit on the first
/// mismatch, so timing does not leak how many leading bytes matched.
fn constant_time_eq(a: &[u8; 32], b: &[u8; 32]) -> bool {
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
