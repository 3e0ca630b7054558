use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Condition types written by the control plane.
pub mod types {
    pub const DECLARED: &str = "Declared";
    pub const CHILDREN_READY: &str = "ChildrenReady";
    pub const BUILD_SUCCEEDED: &str = "BuildSucceeded";
    pub const WORKLOAD_READY: &str = "WorkloadReady";
    pub const DATABASE_READY: &str = "DatabaseReady";
    pub const CACHE_READY: &str = "CacheReady";
    pub const CERTIFICATE_READY: &str = "CertificateReady";
    /// Set on a deployment once its promotion decision was made for the current generation.
    pub const PROMOTED: &str = "Promoted";

    /// Condition types reported by external subsystems on their own objects.
    pub const EXTERNAL_SUCCEEDED: &str = "Succeeded";
    pub const EXTERNAL_READY: &str = "Ready";
}

pub mod reasons {
    pub const CRASH_LOOP_BACK_OFF: &str = "CrashLoopBackOff";
    pub const PODS_READY: &str = "PodsReady";
    pub const PODS_NOT_READY: &str = "PodsNotReady";
    pub const DEPLOYING: &str = "Deploying";
    /// The workload has not reported on its latest spec yet.
    pub const ROLLING_OUT: &str = "RollingOut";
    pub const PENDING: &str = "Pending";
    pub const VALID: &str = "Valid";
    pub const CHILDREN_PRESENT: &str = "ChildrenPresent";
    pub const CHILDREN_MISSING: &str = "ChildrenMissing";
    pub const WILDCARD_CERTIFICATE: &str = "WildcardCertificate";
    pub const TLS_DISABLED: &str = "TlsDisabled";
    pub const PROMOTED: &str = "Promoted";
    pub const NOT_PROMOTED: &str = "CurrentDeploymentKept";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: ConditionStatus,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
    /// Generation of the owning resource this condition was observed for.
    #[serde(default)]
    pub observed_generation: u64,
    #[serde(default)]
    pub last_transition_ns: u64,
}

impl Condition {
    pub fn new(condition_type: &str, status: ConditionStatus, reason: &str, message: impl Into<String>) -> Self {
        Self {
            condition_type: condition_type.to_string(),
            status,
            reason: reason.to_string(),
            message: message.into(),
            observed_generation: 0,
            last_transition_ns: 0,
        }
    }

    pub fn observed_at(mut self, generation: u64) -> Self {
        self.observed_generation = generation;
        self
    }

    fn same_observation(&self, other: &Condition) -> bool {
        self.status == other.status
            && self.reason == other.reason
            && self.message == other.message
            && self.observed_generation == other.observed_generation
    }
}

/// Ordered set of conditions with at most one entry per type.
///
/// Serialized as a plain list. Replacing a condition keeps its position.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<Condition>", into = "Vec<Condition>")]
pub struct ConditionSet {
    entries: IndexMap<String, Condition>,
}

impl ConditionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, condition_type: &str) -> Option<&Condition> {
        self.entries.get(condition_type)
    }

    pub fn status_of(&self, condition_type: &str) -> Option<ConditionStatus> {
        self.get(condition_type).map(|c| c.status)
    }

    pub fn is_true(&self, condition_type: &str) -> bool {
        self.status_of(condition_type) == Some(ConditionStatus::True)
    }

    /// Inserts or replaces the condition of the same type at `now_ns`.
    ///
    /// The transition time only moves when the status flips. Returns whether
    /// anything observable changed.
    pub fn upsert(&mut self, mut condition: Condition, now_ns: u64) -> bool {
        match self.entries.get_mut(&condition.condition_type) {
            Some(existing) if existing.same_observation(&condition) => false,
            Some(existing) => {
                condition.last_transition_ns = if existing.status == condition.status {
                    existing.last_transition_ns
                } else {
                    now_ns
                };
                *existing = condition;
                true
            }
            None => {
                condition.last_transition_ns = now_ns;
                self.entries.insert(condition.condition_type.clone(), condition);
                true
            }
        }
    }

    pub fn remove(&mut self, condition_type: &str) -> Option<Condition> {
        self.entries.shift_remove(condition_type)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Condition> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Conditions observed for `generation`; anything older reads as absent.
    pub fn current_for(&self, generation: u64) -> ConditionSet {
        self.iter()
            .filter(|c| c.observed_generation == generation)
            .cloned()
            .collect::<Vec<_>>()
            .into()
    }

    /// True when any condition carries a reason that no retry can recover from.
    pub fn has_unrecoverable(&self) -> bool {
        self.iter().any(|c| c.reason == reasons::CRASH_LOOP_BACK_OFF)
    }
}

impl From<Vec<Condition>> for ConditionSet {
    fn from(list: Vec<Condition>) -> Self {
        let mut entries = IndexMap::with_capacity(list.len());
        for condition in list {
            entries.insert(condition.condition_type.clone(), condition);
        }
        Self { entries }
    }
}

impl From<ConditionSet> for Vec<Condition> {
    fn from(set: ConditionSet) -> Self {
        set.entries.into_values().collect()
    }
}
