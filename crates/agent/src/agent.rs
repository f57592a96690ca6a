//! Short-lived Ed25519 agents

use caplife_core::{Result, Signer};
use ed25519_dalek::{Signature, Signer as _, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;

/// Prefix of every ephemeral agent's controller id
pub const EPHEMERAL_CONTROLLER_PREFIX: &str = "urn:ephemeral:ed25519:";

/// A freshly generated key pair that receives delegated capabilities
///
/// The private key never leaves the process; when the agent is dropped the
/// capabilities delegated to it become unusable.
pub struct EphemeralAgent {
    signing_key: SigningKey,
    controller: String,
    verification_method: String,
}

impl EphemeralAgent {
    /// Generate a new agent from the OS random number generator
    pub fn generate() -> Self {
        let mut csprng = OsRng;
        Self::from_signing_key(SigningKey::generate(&mut csprng))
    }

    pub fn from_signing_key(signing_key: SigningKey) -> Self {
        let public_key = hex::encode(signing_key.verifying_key().to_bytes());
        let controller = format!("{EPHEMERAL_CONTROLLER_PREFIX}{public_key}");
        let verification_method = format!("{controller}#{public_key}");
        Self {
            signing_key,
            controller,
            verification_method,
        }
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Check a signature produced by this agent
    pub fn verify(&self, data: &[u8], signature: &[u8]) -> bool {
        let Ok(signature) = Signature::from_slice(signature) else {
            return false;
        };
        self.verifying_key().verify(data, &signature).is_ok()
    }
}

impl Signer for EphemeralAgent {
    fn id(&self) -> &str {
        &self.verification_method
    }

    fn controller(&self) -> &str {
        &self.controller
    }

    fn sign(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(self.signing_key.sign(data).to_bytes().to_vec())
    }
}

impl std::fmt::Debug for EphemeralAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EphemeralAgent")
            .field("controller", &self.controller)
            .finish_non_exhaustive()
    }
}
