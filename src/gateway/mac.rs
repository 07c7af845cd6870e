//! `CheckMacValue` computation.
//!
//! The gateway recomputes this value on its side, so every step here (field
//! order, escaping, case) has to match it exactly.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

pub const CHECK_MAC_FIELD: &str = "CheckMacValue";

/// Signs a parameter set with the merchant's hash key and IV.
///
/// Any `CheckMacValue` entry in `fields` is ignored. Keys are sorted
/// byte-wise, so the input order does not matter.
pub fn compute_mac<I, K, V>(fields: I, hash_key: &str, hash_iv: &str) -> String
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut pairs: Vec<(K, V)> = fields
        .into_iter()
        .filter(|(k, _)| k.as_ref() != CHECK_MAC_FIELD)
        .collect();
    pairs.sort_by(|a, b| a.0.as_ref().cmp(b.0.as_ref()));

    let joined = pairs
        .iter()
        .map(|(k, v)| format!("{}={}", k.as_ref(), v.as_ref()))
        .collect::<Vec<_>>()
        .join("&");
    let raw = format!("HashKey={hash_key}&{joined}&HashIV={hash_iv}");

    let digest = Sha256::digest(gateway_encode(&raw).as_bytes());
    digest.iter().map(|b| format!("{b:02X}")).collect()
}

/// Constant-time, case-sensitive comparison of two MAC strings.
pub fn mac_matches(expected: &str, received: &str) -> bool {
    expected.len() == received.len() && bool::from(expected.as_bytes().ct_eq(received.as_bytes()))
}

/// Form-urlencodes `raw` the way the gateway's .NET stack does, then lower-cases it.
///
/// `!`, `(` and `)` stay literal; `-`, `_`, `.`, `*` and alphanumerics are
/// never escaped; space becomes `+`.
fn gateway_encode(raw: &str) -> String {
    let encoded: String = url::form_urlencoded::byte_serialize(raw.as_bytes()).collect();
    encoded
        .to_lowercase()
        .replace("%21", "!")
        .replace("%28", "(")
        .replace("%29", ")")
}
