//! Stable identifiers derived from strings.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use sha2::{Digest, Sha256};

/// Hash `input` into a URL- and filesystem-safe identifier.
///
/// Used both for job keys (hash of the source URL) and for conversion output
/// directories (hash of the downloaded file name).
pub fn key_from_str(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}
