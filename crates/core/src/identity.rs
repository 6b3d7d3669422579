use ed25519_dalek::{Signer, Verifier};

use crate::error::CoreError;
use crate::ids::{EntryId, Signature, WriterId};

/// Signing identity of one writer (a person editing a catalog copy).
///
/// The public key doubles as the writer id recorded on every change entry.
pub struct WriterIdentity {
    signing_key: ed25519_dalek::SigningKey,
    display_name: String,
}

impl WriterIdentity {
    pub fn generate(display_name: impl Into<String>) -> Self {
        let mut rng = rand::thread_rng();
        Self {
            signing_key: ed25519_dalek::SigningKey::generate(&mut rng),
            display_name: display_name.into(),
        }
    }

    pub fn from_secret_bytes(bytes: &[u8; 32], display_name: impl Into<String>) -> Self {
        Self {
            signing_key: ed25519_dalek::SigningKey::from_bytes(bytes),
            display_name: display_name.into(),
        }
    }

    pub fn secret_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    pub fn writer_id(&self) -> WriterId {
        WriterId::from_bytes(self.signing_key.verifying_key().to_bytes())
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature::from_bytes(self.signing_key.sign(message).to_bytes())
    }
}

pub fn verify_signature(
    writer: &WriterId,
    entry_id: &EntryId,
    message: &[u8],
    signature: &Signature,
) -> Result<(), CoreError> {
    let invalid = || CoreError::InvalidSignature {
        entry_id: entry_id.to_string(),
    };
    let verifying_key =
        ed25519_dalek::VerifyingKey::from_bytes(writer.as_bytes()).map_err(|_| invalid())?;
    let sig = ed25519_dalek::Signature::from_bytes(signature.as_bytes());
    verifying_key.verify(message, &sig).map_err(|_| invalid())
}
