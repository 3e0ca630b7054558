use keel_types::{ConditionStatus, ExternalObject, Kind, labels, reasons, types};

use super::{Observation, Projector};

const CRASH_LOOP_RESTARTS: u32 = 3;

/// Mirrors a build pipeline run's `Succeeded` condition onto its deployment.
pub struct PipelineRunProjector;

impl Projector for PipelineRunProjector {
    fn source_kind(&self) -> Kind {
        Kind::PipelineRun
    }

    fn owner_kind(&self) -> Kind {
        Kind::Deployment
    }

    fn owner_label(&self) -> &'static str {
        labels::DEPLOYMENT
    }

    fn condition_type(&self) -> &'static str {
        types::BUILD_SUCCEEDED
    }

    fn observe(&self, source: &ExternalObject) -> Observation {
        mirror_condition(source, types::EXTERNAL_SUCCEEDED, "waiting for pipeline run to start")
    }
}

/// Derives runtime readiness of a deployment from its workload replicas.
pub struct WorkloadProjector;

impl Projector for WorkloadProjector {
    fn source_kind(&self) -> Kind {
        Kind::Workload
    }

    fn owner_kind(&self) -> Kind {
        Kind::Deployment
    }

    fn owner_label(&self) -> &'static str {
        labels::DEPLOYMENT
    }

    fn condition_type(&self) -> &'static str {
        types::WORKLOAD_READY
    }

    fn observe(&self, source: &ExternalObject) -> Observation {
        let status = &source.status;
        if status.observed_generation < source.meta.generation {
            return Observation::new(
                ConditionStatus::Unknown,
                reasons::ROLLING_OUT,
                format!("waiting for generation {} to roll out", source.meta.generation),
            );
        }
        if let Some(container) = status.containers.iter().find(|c| {
            c.restart_count >= CRASH_LOOP_RESTARTS || c.waiting_reason.as_deref() == Some(reasons::CRASH_LOOP_BACK_OFF)
        }) {
            return Observation::new(
                ConditionStatus::False,
                reasons::CRASH_LOOP_BACK_OFF,
                format!(
                    "container {} is crash looping ({} restarts)",
                    container.name, container.restart_count
                ),
            );
        }
        if status.ready_replicas > 0 {
            return Observation::new(
                ConditionStatus::True,
                reasons::PODS_READY,
                format!("{}/{} pods ready", status.ready_replicas, status.replicas),
            );
        }
        if status.unavailable_replicas > 0 {
            return Observation::new(
                ConditionStatus::Unknown,
                reasons::PODS_NOT_READY,
                format!("{} pods unavailable", status.unavailable_replicas),
            );
        }
        Observation::new(ConditionStatus::Unknown, reasons::DEPLOYING, "waiting for pods")
    }
}

/// Mirrors the `Ready` condition of a cluster or certificate onto its owner.
pub struct ReadyProjector {
    source: Kind,
    owner: Kind,
    owner_label: &'static str,
    condition: &'static str,
}

pub const DATABASE_PROJECTOR: ReadyProjector = ReadyProjector {
    source: Kind::DatabaseCluster,
    owner: Kind::Deployment,
    owner_label: labels::DEPLOYMENT,
    condition: types::DATABASE_READY,
};

pub const CACHE_PROJECTOR: ReadyProjector = ReadyProjector {
    source: Kind::CacheCluster,
    owner: Kind::Deployment,
    owner_label: labels::DEPLOYMENT,
    condition: types::CACHE_READY,
};

pub const CERTIFICATE_PROJECTOR: ReadyProjector = ReadyProjector {
    source: Kind::Certificate,
    owner: Kind::Domain,
    owner_label: labels::DOMAIN,
    condition: types::CERTIFICATE_READY,
};

impl Projector for ReadyProjector {
    fn source_kind(&self) -> Kind {
        self.source
    }

    fn owner_kind(&self) -> Kind {
        self.owner
    }

    fn owner_label(&self) -> &'static str {
        self.owner_label
    }

    fn condition_type(&self) -> &'static str {
        self.condition
    }

    fn observe(&self, source: &ExternalObject) -> Observation {
        mirror_condition(source, types::EXTERNAL_READY, "waiting for first status report")
    }
}

fn mirror_condition(source: &ExternalObject, condition_type: &str, waiting: &str) -> Observation {
    match source.status.condition(condition_type) {
        Some(c) if c.reason.is_empty() => Observation::new(c.status, default_reason(c.status), c.message.clone()),
        Some(c) => Observation::new(c.status, &c.reason, c.message.clone()),
        None => Observation::new(ConditionStatus::Unknown, reasons::PENDING, waiting),
    }
}

fn default_reason(status: ConditionStatus) -> &'static str {
    match status {
        ConditionStatus::True => "Ready",
        ConditionStatus::False => "NotReady",
        ConditionStatus::Unknown => reasons::PENDING,
    }
}
