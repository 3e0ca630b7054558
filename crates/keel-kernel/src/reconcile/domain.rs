use keel_store::{ListParams, Store};
use keel_types::{
    Condition, ConditionStatus, DomainType, Kind, ManagedResource, ObjectKey, Variant, reasons, types, validate,
};

use super::{Engine, KindPlan, spec_mismatch};
use crate::{children, error::ReconcileError, identity};

pub(super) fn plan<S: Store>(
    engine: &Engine<S>,
    resource: &ManagedResource,
) -> Result<KindPlan, ReconcileError> {
    let key = resource.meta.key();
    let Some(spec) = resource.as_domain() else {
        return Err(spec_mismatch(resource));
    };
    if !validate::is_valid_host(&spec.host) {
        return Err(ReconcileError::invalid(&key, format!("invalid host '{}'", spec.host)));
    }
    if let Some(port) = spec.port
        && !validate::is_valid_port(u32::from(port))
    {
        return Err(ReconcileError::invalid(&key, format!("invalid port {port}")));
    }

    // Host and default-domain claims: the earlier domain keeps them.
    let domains: Vec<ManagedResource> = engine.store().list(&ListParams::kind(Kind::Domain))?;
    for other in domains.iter().filter(|d| {
        !d.meta.deletion_requested && !identity::same_object(d, resource) && identity::precedes(d, resource)
    }) {
        let Some(other_spec) = other.as_domain() else {
            continue;
        };
        if other_spec.host.eq_ignore_ascii_case(&spec.host) {
            return Err(ReconcileError::HostConflict {
                key,
                host: spec.host.clone(),
                existing: other.meta.key(),
            });
        }
        if spec.is_default
            && other_spec.is_default
            && other.meta.namespace == resource.meta.namespace
            && other.meta.parent == resource.meta.parent
        {
            return Err(ReconcileError::invalid(
                &key,
                format!("application already has default domain {}", other.meta.name),
            ));
        }
    }

    if let Some(deployment) = &spec.deployment {
        let target = ObjectKey::new(Kind::Deployment, resource.meta.namespace.clone(), deployment.clone());
        if engine.store().get::<ManagedResource>(&target)?.is_none() {
            return Err(ReconcileError::MissingReference { key, missing: target });
        }
    }

    let mut plan = KindPlan::new(Variant::Domain);
    match (spec.domain_type, spec.tls) {
        (DomainType::Default, _) => plan.conditions.push(Condition::new(
            types::CERTIFICATE_READY,
            ConditionStatus::True,
            reasons::WILDCARD_CERTIFICATE,
            "covered by the wildcard certificate",
        )),
        (DomainType::Custom, false) => plan.conditions.push(Condition::new(
            types::CERTIFICATE_READY,
            ConditionStatus::True,
            reasons::TLS_DISABLED,
            "TLS disabled",
        )),
        (DomainType::Custom, true) => {
            let Some(identifier) = resource.identifier() else {
                return Err(ReconcileError::invalid(&key, "missing identifier"));
            };
            plan.children.push(children::external_child(
                Kind::Certificate,
                resource,
                children::child_name("cert", identifier),
                engine.renderer().certificate(resource),
            ));
            // Issuance may never report back; check again later.
            let issued = resource
                .status
                .conditions
                .current_for(resource.meta.generation)
                .is_true(types::CERTIFICATE_READY);
            if !issued {
                plan.requeue_after = Some(engine.config().pending_recheck);
            }
        }
    }
    Ok(plan)
}
