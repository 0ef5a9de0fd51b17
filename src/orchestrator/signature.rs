//! Approval signatures: hex(HMAC-SHA256(secret, canonical_plan + ":" + approver)).

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{OrchestratorError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Signs and verifies plan approvals with the server secret.
#[derive(Clone)]
pub struct ApprovalSigner {
    secret: Vec<u8>,
}

impl ApprovalSigner {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
        }
    }

    fn mac(&self, canonical_plan: &str, approver: &str) -> Result<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.secret).map_err(|_| {
            OrchestratorError::Storage("invalid approval secret".to_string())
        })?;
        mac.update(canonical_plan.as_bytes());
        mac.update(b":");
        mac.update(approver.as_bytes());
        Ok(mac)
    }

    /// Hex signature over the given canonical plan bytes.
    pub fn sign(&self, canonical_plan: &str, approver: &str) -> Result<String> {
        let mac = self.mac(canonical_plan, approver)?;
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Constant-time check of `signature` against the canonical plan bytes.
    /// Anything that is not valid hex is simply a mismatch.
    pub fn verify(&self, canonical_plan: &str, approver: &str, signature: &str) -> Result<bool> {
        let Ok(provided) = hex::decode(signature.trim()) else {
            return Ok(false);
        };
        let mac = self.mac(canonical_plan, approver)?;
        Ok(mac.verify_slice(&provided).is_ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAN: &str = r#"{"actions":[],"plan_id":"plan_abc","status":"pending_approval"}"#;

    #[test]
    fn signature_is_lowercase_hex_sha256() {
        let signer = ApprovalSigner::new("secret");
        let sig = signer.sign(PLAN, "alice").unwrap();
        assert_eq!(sig.len(), 64);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert!(signer.verify(PLAN, "alice", &sig).unwrap());
    }

    #[test]
    fn message_is_plan_colon_approver() {
        let signer = ApprovalSigner::new("secret");
        let mut mac = HmacSha256::new_from_slice(b"secret").unwrap();
        mac.update(format!("{}:{}", PLAN, "alice").as_bytes());
        let expected = hex::encode(mac.finalize().into_bytes());
        assert_eq!(signer.sign(PLAN, "alice").unwrap(), expected);
    }

    #[test]
    fn any_change_invalidates() {
        let signer = ApprovalSigner::new("secret");
        let sig = signer.sign(PLAN, "alice").unwrap();
        assert!(!signer.verify(&format!("{} ", PLAN), "alice", &sig).unwrap());
        assert!(!signer.verify(PLAN, "bob", &sig).unwrap());
        assert!(!ApprovalSigner::new("other").verify(PLAN, "alice", &sig).unwrap());
        assert!(!signer.verify(PLAN, "alice", "not-hex").unwrap());
        assert!(!signer.verify(PLAN, "alice", &sig[..32]).unwrap());
    }
}
