// SPDX-License-Identifier: MIT OR Apache-2.0
//! reach-receipt
//!
//! Execution receipts: HMAC-signed, canonical-hash-backed audit records of
//! one pack execution, per spec.md §4.16. `generate_receipt` canonicalizes
//! inputs/outputs, hashes them, composes the receipt, then signs its
//! content hash with HMAC-SHA256. `verify_receipt` recomputes both in
//! constant time; `verify_receipt_chain` additionally requires
//! non-decreasing timestamps.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reach_error::{ErrorCode, ReachError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// A signed audit record of one pack execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReceipt {
    /// Autonomous-loop run id this receipt belongs to.
    pub run_id: String,
    /// Content id (hash) of the pack that was executed.
    pub pack_content_id: String,
    /// When the receipt was generated.
    pub timestamp: DateTime<Utc>,
    /// Canonical SHA-256 hash of the execution inputs.
    pub input_hash: String,
    /// Canonical SHA-256 hash of the execution outputs.
    pub output_hash: String,
    /// Canonical hash of this receipt with `receipt_hash`/`signature` cleared.
    #[serde(default)]
    pub receipt_hash: String,
    /// Hex HMAC-SHA256 of `receipt_hash` under the node's receipt secret.
    #[serde(default)]
    pub signature: String,
}

impl ExecutionReceipt {
    fn content_hash(&self) -> Result<String, ReachError> {
        let mut unsigned = self.clone();
        unsigned.receipt_hash = String::new();
        unsigned.signature = String::new();
        reach_hash::hash(&unsigned)
            .map_err(|e| ReachError::new(ErrorCode::Internal, "failed to canonicalize receipt for hashing").with_source(e))
    }
}

fn hmac_hex(secret: &[u8], message: &str) -> Result<String, ReachError> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| ReachError::new(ErrorCode::Internal, "invalid HMAC key length").with_source(e))?;
    mac.update(message.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Build and sign a new receipt for one execution.
///
/// # Errors
/// Propagates failures canonicalizing `inputs`/`outputs`/the receipt itself,
/// or an invalid (zero-length, for the underlying HMAC implementation) secret.
pub fn generate_receipt(
    run_id: impl Into<String>,
    pack_content_id: impl Into<String>,
    inputs: &Value,
    outputs: &Value,
    secret: &[u8],
    now: DateTime<Utc>,
) -> Result<ExecutionReceipt, ReachError> {
    let input_hash = reach_hash::hash(inputs)
        .map_err(|e| ReachError::new(ErrorCode::Internal, "failed to hash receipt inputs").with_source(e))?;
    let output_hash = reach_hash::hash(outputs)
        .map_err(|e| ReachError::new(ErrorCode::Internal, "failed to hash receipt outputs").with_source(e))?;

    let mut receipt = ExecutionReceipt {
        run_id: run_id.into(),
        pack_content_id: pack_content_id.into(),
        timestamp: now,
        input_hash,
        output_hash,
        receipt_hash: String::new(),
        signature: String::new(),
    };
    receipt.receipt_hash = receipt.content_hash()?;
    receipt.signature = hmac_hex(secret, &receipt.receipt_hash)?;
    Ok(receipt)
}

/// Verify a receipt's content hash and HMAC signature.
///
/// # Errors
/// - [`ErrorCode::SignatureInvalid`] if the content hash was tampered with,
///   the signature is malformed hex, or the HMAC comparison fails.
pub fn verify_receipt(receipt: &ExecutionReceipt, secret: &[u8]) -> Result<(), ReachError> {
    let recomputed_hash = receipt.content_hash()?;
    if recomputed_hash != receipt.receipt_hash {
        return Err(ReachError::new(ErrorCode::SignatureInvalid, "receipt content hash mismatch"));
    }

    let expected_sig =
        hex::decode(&receipt.signature).map_err(|_| ReachError::new(ErrorCode::SignatureInvalid, "malformed receipt signature hex"))?;
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| ReachError::new(ErrorCode::Internal, "invalid HMAC key length").with_source(e))?;
    mac.update(receipt.receipt_hash.as_bytes());
    mac.verify_slice(&expected_sig).map_err(|_| ReachError::new(ErrorCode::SignatureInvalid, "receipt HMAC verification failed"))
}

/// Verify every receipt in `chain` and that timestamps are non-decreasing.
///
/// # Errors
/// The first [`verify_receipt`] failure, or [`ErrorCode::InvalidArgument`]
/// if a later receipt's timestamp precedes an earlier one's.
pub fn verify_receipt_chain(chain: &[ExecutionReceipt], secret: &[u8]) -> Result<(), ReachError> {
    let mut previous: Option<&ExecutionReceipt> = None;
    for receipt in chain {
        verify_receipt(receipt, secret)?;
        if let Some(prev) = previous {
            if receipt.timestamp < prev.timestamp {
                return Err(ReachError::new(ErrorCode::InvalidArgument, "receipt chain timestamps are not non-decreasing"));
            }
        }
        previous = Some(receipt);
    }
    Ok(())
}
