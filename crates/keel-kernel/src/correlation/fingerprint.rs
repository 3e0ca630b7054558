use sha2::{Digest, Sha256};

use super::Observation;

/// Digest of an external observation: the source's own generation, the owner
/// generation it is attributed to, and the normalized triple.
///
/// Depends only on the observed object, so two racing projections of the same
/// state agree regardless of processing order.
pub fn fingerprint(source_generation: u64, owner_generation: u64, observation: &Observation) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_generation.to_be_bytes());
    hasher.update(owner_generation.to_be_bytes());
    hasher.update(format!("{:?}", observation.status).as_bytes());
    hasher.update([0]);
    hasher.update(observation.reason.as_bytes());
    hasher.update([0]);
    hasher.update(observation.message.as_bytes());
    hex::encode(hasher.finalize())
}
