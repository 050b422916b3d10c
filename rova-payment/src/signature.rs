//! HMAC signing of gateway parameter sets.
//!
//! Every message exchanged with the payment gateway carries a detached
//! signature over a canonical rendering of its parameters. Both sides
//! build the same canonical string, so a single flipped character in
//! any value invalidates the whole message.

use std::collections::BTreeMap;

use hmac::{Hmac, Mac};
use sha2::Sha512;
use url::form_urlencoded;

type HmacSha512 = Hmac<Sha512>;

/// Query parameter carrying the hex-encoded signature.
pub const SIGNATURE_PARAM: &str = "pay_signature";
/// Query parameter naming the signature algorithm.
pub const SIGNATURE_ALG_PARAM: &str = "pay_signature_alg";
/// The only algorithm this codec speaks.
pub const SIGNATURE_ALG: &str = "HmacSHA512";

#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    #[error("message carries no signature")]
    Missing,
    #[error("signature is not valid hex")]
    Malformed,
    #[error("signature does not match message contents")]
    Mismatch,
}

/// Signs and verifies gateway parameter sets with a shared merchant secret.
pub struct SignatureCodec {
    secret: Vec<u8>,
}

impl SignatureCodec {
    pub fn new(secret: &str) -> Self {
        Self {
            secret: secret.as_bytes().to_vec(),
        }
    }

    /// Renders parameters into the canonical signing string: entries sorted
    /// byte-wise by name, empty values dropped, then form-urlencoded
    /// (spaces become `+`). Signature fields must already be stripped.
    pub fn canonicalize(params: &BTreeMap<String, String>) -> String {
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        for (name, value) in params {
            if value.is_empty() {
                continue;
            }
            serializer.append_pair(name, value);
        }
        serializer.finish()
    }

    /// Computes the lowercase hex HMAC-SHA512 signature for the given
    /// parameters.
    pub fn sign(&self, params: &BTreeMap<String, String>) -> String {
        let canonical = Self::canonicalize(params);
        let mut mac = HmacSha512::new_from_slice(&self.secret)
            .expect("hmac accepts keys of any length");
        mac.update(canonical.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Checks a received signature against the parameters it claims to
    /// cover. Comparison happens in constant time regardless of where the
    /// first difference sits.
    pub fn verify(
        &self,
        params: &BTreeMap<String, String>,
        provided: &str,
    ) -> Result<(), SignatureError> {
        if provided.is_empty() {
            return Err(SignatureError::Missing);
        }
        let digest = hex::decode(provided).map_err(|_| SignatureError::Malformed)?;
        let canonical = Self::canonicalize(params);
        let mut mac = HmacSha512::new_from_slice(&self.secret)
            .expect("hmac accepts keys of any length");
        mac.update(canonical.as_bytes());
        mac.verify_slice(&digest)
            .map_err(|_| SignatureError::Mismatch)
    }
}

/// Removes the signature and algorithm fields from an inbound parameter
/// set, returning the signature value if one was present. The remaining
/// map is what the signature is expected to cover.
pub fn strip_signature(params: &mut BTreeMap<String, String>) -> Option<String> {
    params.remove(SIGNATURE_ALG_PARAM);
    params.remove(SIGNATURE_PARAM)
}
