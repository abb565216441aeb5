//! Plan fingerprints.
//!
//! A fingerprint is the blake3 digest of a plan's canonical JSON, keyed by
//! the kind of plan so an operator plan and an execution plan with the same
//! serialized form still get different digests.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// What a fingerprint was taken of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FingerprintDomain {
    OperatorPlan,
    ExecutionPlan,
}

impl FingerprintDomain {
    fn context(self) -> &'static str {
        match self {
            FingerprintDomain::OperatorPlan => "polyplan operator-plan fingerprint v1",
            FingerprintDomain::ExecutionPlan => "polyplan execution-plan fingerprint v1",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Stream `value` as JSON straight into a domain-keyed hasher.
    pub fn of<T: Serialize>(domain: FingerprintDomain, value: &T) -> Result<Self> {
        let mut hasher = blake3::Hasher::new_derive_key(domain.context());
        serde_json::to_writer(&mut hasher, value)?;
        Ok(Self(*hasher.finalize().as_bytes()))
    }

    pub fn to_hex(&self) -> String {
        blake3::Hash::from(self.0).to_hex().to_string()
    }

    /// First 12 hex chars, for log lines.
    pub fn short(&self) -> String {
        let mut hex = self.to_hex();
        hex.truncate(12);
        hex
    }

    /// Whether `hex` (as recorded on a lineage graph) names this fingerprint.
    pub fn matches_hex(&self, hex: &str) -> bool {
        blake3::Hash::from_hex(hex).map_or(false, |h| *h.as_bytes() == self.0)
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_values_share_a_fingerprint() {
        let a = Fingerprint::of(FingerprintDomain::OperatorPlan, &vec!["scan", "filter"]).unwrap();
        let b = Fingerprint::of(FingerprintDomain::OperatorPlan, &vec!["scan", "filter"]).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_hex().len(), 64);
        assert_eq!(a.short().len(), 12);
        assert!(a.matches_hex(&a.to_hex()));
        assert!(!a.matches_hex("not hex"));
    }

    #[test]
    fn domains_keep_plan_kinds_apart() {
        let value = ("source", 3);
        let logical = Fingerprint::of(FingerprintDomain::OperatorPlan, &value).unwrap();
        let physical = Fingerprint::of(FingerprintDomain::ExecutionPlan, &value).unwrap();
        assert_ne!(logical, physical);
    }
}
