// SPDX-License-Identifier: MIT OR Apache-2.0
//! reach-poee
//!
//! Proof-of-execution: ed25519-signed delegation envelopes and the
//! execution proofs that close the loop on them, per spec.md §4.18. Both
//! struct families are signed over the canonical hash of the struct with
//! `signature` cleared. [`verify_proof_integrity`] ties a proof back to the
//! envelope it claims to answer: matching delegation id, matching envelope
//! hash, and a valid signature.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::RngCore;
use reach_core::NodeId;
use reach_error::{ErrorCode, ReachError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

/// A signed handoff of pack execution from one node to another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelegationEnvelope {
    /// Unique id for this delegation.
    pub delegation_id: String,
    /// Node handing off execution.
    pub origin_node: NodeId,
    /// Node the pack is delegated to.
    pub target_node: NodeId,
    /// Id of the pack being delegated.
    pub pack_id: String,
    /// Content hash of the pack being delegated.
    pub pack_hash: String,
    /// Delegation hop depth at the point this envelope was issued.
    pub depth: u32,
    /// Spec version the origin is running.
    pub spec_version: String,
    /// When the envelope was issued.
    pub issued_at: DateTime<Utc>,
    /// Hex ed25519 signature over this envelope's own canonical hash, with
    /// this field cleared.
    #[serde(default)]
    pub signature: String,
}

impl DelegationEnvelope {
    fn content_hash(&self) -> Result<String, ReachError> {
        let mut unsigned = self.clone();
        unsigned.signature = String::new();
        reach_hash::hash(&unsigned)
            .map_err(|e| ReachError::new(ErrorCode::Internal, "failed to canonicalize delegation envelope for hashing").with_source(e))
    }

    /// Sign this envelope's content hash, filling in [`Self::signature`].
    ///
    /// # Errors
    /// Propagates canonicalization failures.
    pub fn sign(mut self, signing_key: &SigningKey) -> Result<Self, ReachError> {
        let hash = self.content_hash()?;
        self.signature = hex::encode(signing_key.sign(hash.as_bytes()).to_bytes());
        Ok(self)
    }

    /// Verify this envelope's signature against `verifying_key`.
    ///
    /// # Errors
    /// [`ErrorCode::SignatureInvalid`] if the hash doesn't match the
    /// signature, or the signature is malformed.
    pub fn verify_signature(&self, verifying_key: &VerifyingKey) -> Result<(), ReachError> {
        let hash = self.content_hash()?;
        verify_hex_signature(verifying_key, hash.as_bytes(), &self.signature)
    }
}

/// A signed attestation that the work named by a [`DelegationEnvelope`] was
/// carried out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionProof {
    /// The delegation this proof answers.
    pub delegation_id: String,
    /// Canonical hash of the [`DelegationEnvelope`] this proof answers.
    pub envelope_hash: String,
    /// Node that actually executed the pack.
    pub executing_node: NodeId,
    /// Content hash of the execution's output.
    pub output_hash: String,
    /// When execution completed.
    pub completed_at: DateTime<Utc>,
    /// Hex ed25519 signature over this proof's own canonical hash, with
    /// this field cleared.
    #[serde(default)]
    pub signature: String,
}

impl ExecutionProof {
    fn content_hash(&self) -> Result<String, ReachError> {
        let mut unsigned = self.clone();
        unsigned.signature = String::new();
        reach_hash::hash(&unsigned)
            .map_err(|e| ReachError::new(ErrorCode::Internal, "failed to canonicalize execution proof for hashing").with_source(e))
    }

    /// Sign this proof's content hash, filling in [`Self::signature`].
    ///
    /// # Errors
    /// Propagates canonicalization failures.
    pub fn sign(mut self, signing_key: &SigningKey) -> Result<Self, ReachError> {
        let hash = self.content_hash()?;
        self.signature = hex::encode(signing_key.sign(hash.as_bytes()).to_bytes());
        Ok(self)
    }

    /// Verify this proof's signature against `verifying_key`.
    ///
    /// # Errors
    /// [`ErrorCode::SignatureInvalid`] if the hash doesn't match the
    /// signature, or the signature is malformed.
    pub fn verify_signature(&self, verifying_key: &VerifyingKey) -> Result<(), ReachError> {
        let hash = self.content_hash()?;
        verify_hex_signature(verifying_key, hash.as_bytes(), &self.signature)
    }
}

fn verify_hex_signature(verifying_key: &VerifyingKey, message: &[u8], signature_hex: &str) -> Result<(), ReachError> {
    let sig_bytes: [u8; 64] = hex::decode(signature_hex)
        .map_err(|_| ReachError::new(ErrorCode::SignatureInvalid, "malformed signature hex"))?
        .try_into()
        .map_err(|_| ReachError::new(ErrorCode::SignatureInvalid, "signature is not 64 bytes"))?;
    verifying_key
        .verify(message, &Signature::from_bytes(&sig_bytes))
        .map_err(|e| ReachError::new(ErrorCode::SignatureInvalid, "proof-of-execution signature verification failed").with_source(e))
}

/// Verify that `proof` genuinely answers `envelope` and carries a valid
/// signature under `pubkey`: matching delegation id, matching envelope
/// hash, and signature validity, in that order.
///
/// # Errors
/// [`ErrorCode::InvalidArgument`] on delegation-id mismatch,
/// [`ErrorCode::SpecMismatch`] on envelope-hash mismatch, or
/// [`ErrorCode::SignatureInvalid`] on a bad signature.
pub fn verify_proof_integrity(proof: &ExecutionProof, envelope: &DelegationEnvelope, pubkey: &VerifyingKey) -> Result<(), ReachError> {
    if proof.delegation_id != envelope.delegation_id {
        return Err(ReachError::new(ErrorCode::InvalidArgument, "execution proof delegation id does not match envelope"));
    }
    let envelope_hash = envelope.content_hash()?;
    if proof.envelope_hash != envelope_hash {
        return Err(ReachError::new(ErrorCode::SpecMismatch, "execution proof envelope hash does not match envelope"));
    }
    proof.verify_signature(pubkey)
}

/// An ed25519 keypair persisted as `.reach/keys/poee_key.pem`: a
/// JSON-encoded `{signing_key_hex}` document, mode 0600.
#[derive(Debug, Serialize, Deserialize)]
struct PoeeKeyFile {
    signing_key_hex: String,
}

/// Loaded or freshly generated PoEE signing material.
pub struct PoeeKeypair {
    signing_key: SigningKey,
}

impl PoeeKeypair {
    /// Generate a fresh keypair from OS randomness.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { signing_key: SigningKey::from_bytes(&bytes) }
    }

    /// Load a keypair from `path`, generating and persisting a fresh one if
    /// the file doesn't exist yet.
    ///
    /// # Errors
    /// [`ErrorCode::StorageReadFailed`] if the file exists but can't be read
    /// or parsed; propagates [`Self::save`]'s errors for a freshly generated
    /// keypair.
    pub fn load_or_generate(path: impl Into<PathBuf>) -> Result<Self, ReachError> {
        let path = path.into();
        match std::fs::read_to_string(&path) {
            Ok(contents) => {
                let file: PoeeKeyFile = serde_json::from_str(&contents)
                    .map_err(|e| ReachError::new(ErrorCode::StorageReadFailed, format!("failed to parse {}", path.display())).with_source(e))?;
                let bytes: [u8; 32] = hex::decode(&file.signing_key_hex)
                    .map_err(|_| ReachError::new(ErrorCode::StorageReadFailed, "malformed PoEE signing key hex"))?
                    .try_into()
                    .map_err(|_| ReachError::new(ErrorCode::StorageReadFailed, "PoEE signing key is not 32 bytes"))?;
                Ok(Self { signing_key: SigningKey::from_bytes(&bytes) })
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let keypair = Self::generate();
                keypair.save(&path)?;
                Ok(keypair)
            }
            Err(e) => Err(ReachError::new(ErrorCode::StorageReadFailed, format!("failed to read {}", path.display())).with_source(e)),
        }
    }

    /// The verifying (public) half of this keypair.
    #[must_use]
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// The signing (private) half of this keypair.
    #[must_use]
    pub fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }

    /// Persist this keypair to `path` via temp-file + rename, at mode 0600.
    ///
    /// # Errors
    /// [`ErrorCode::StorageWriteFailed`] on any I/O failure.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ReachError> {
        let path = path.as_ref();
        let file = PoeeKeyFile { signing_key_hex: hex::encode(self.signing_key.to_bytes()) };
        let json = serde_json::to_string_pretty(&file)
            .map_err(|e| ReachError::new(ErrorCode::StorageWriteFailed, "failed to serialize PoEE keypair").with_source(e))?;

        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)
                    .map_err(|e| ReachError::new(ErrorCode::StorageWriteFailed, "failed to create PoEE key directory").with_source(e))?;
            }
        }
        let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .map_err(|e| ReachError::new(ErrorCode::StorageWriteFailed, "failed to create temp file").with_source(e))?;
        use std::io::Write;
        tmp.write_all(json.as_bytes())
            .map_err(|e| ReachError::new(ErrorCode::StorageWriteFailed, "failed to write temp file").with_source(e))?;

        #[cfg(unix)]
        {
            let mut perms = tmp
                .as_file()
                .metadata()
                .map_err(|e| ReachError::new(ErrorCode::StorageWriteFailed, "failed to stat temp file").with_source(e))?
                .permissions();
            perms.set_mode(0o600);
            tmp.as_file()
                .set_permissions(perms)
                .map_err(|e| ReachError::new(ErrorCode::StorageWriteFailed, "failed to chmod temp file").with_source(e))?;
        }

        tmp.persist(path).map_err(|e| ReachError::new(ErrorCode::StorageWriteFailed, "failed to persist PoEE keypair").with_source(e))?;
        Ok(())
    }
}
