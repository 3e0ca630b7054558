use keel_store::{ListParams, Store};
use keel_types::{
    ApplicationVariant, Condition, ConditionStatus, ExternalObject, Kind, ManagedResource, ObjectKey, ResourceSpec, labels,
    reasons, types,
};

use super::{Engine, KindPlan, spec_mismatch};
use crate::{
    children::{self, ChildPlan},
    error::ReconcileError,
};

/// Children of a deployment depend on its application's variant. A git build
/// gets a pipeline run per generation; the workload and its route follow once
/// that build succeeded. Runtime children are stamped with the generation
/// they were rendered for, and runs of earlier generations are superseded.
pub(super) fn plan<S: Store>(
    engine: &Engine<S>,
    resource: &ManagedResource,
    parent: Option<&ManagedResource>,
) -> Result<KindPlan, ReconcileError> {
    let key = resource.meta.key();
    let Some(spec) = resource.as_deployment() else {
        return Err(spec_mismatch(resource));
    };
    let Some(application) = parent else {
        return Err(ReconcileError::invalid(&key, "a Deployment requires a parent Application"));
    };
    let Some(app_spec) = application.as_application() else {
        return Err(ReconcileError::invalid(&key, "parent is not an Application"));
    };
    let Some(identifier) = resource.identifier() else {
        return Err(ReconcileError::invalid(&key, "missing identifier"));
    };

    let renderer = engine.renderer();
    let config = engine.config();
    let generation = resource.meta.generation;
    let mut plan = KindPlan::new(app_spec.variant.phase_variant());
    let runtime = |plan: &mut KindPlan| {
        plan.children.push(children::rendered_child(
            Kind::Workload,
            resource,
            children::child_name("workload", identifier),
            renderer.workload(resource, application, config),
        ));
        plan.children.push(children::rendered_child(
            Kind::ServiceRoute,
            resource,
            children::child_name("svc", identifier),
            renderer.service_route(resource, application, config),
        ));
    };

    match &app_spec.variant {
        ApplicationVariant::GitRepository { .. } => {
            if spec.commit_sha.as_deref().is_none_or(|sha| sha.trim().is_empty()) {
                return Err(ReconcileError::invalid(&key, "git deployments require a commit sha"));
            }
            plan.children.push(pipeline_run(resource, application, identifier, engine));
            let built = resource
                .status
                .conditions
                .current_for(generation)
                .is_true(types::BUILD_SUCCEEDED);
            if built {
                runtime(&mut plan);
            }
        }
        ApplicationVariant::ImageFromRegistry { .. } => runtime(&mut plan),
        ApplicationVariant::DatabaseCluster { .. } => plan.children.push(children::external_child(
            Kind::DatabaseCluster,
            resource,
            children::child_name("db", identifier),
            renderer.database_cluster(resource, application),
        )),
        ApplicationVariant::CacheCluster { .. } => plan.children.push(children::external_child(
            Kind::CacheCluster,
            resource,
            children::child_name("cache", identifier),
            renderer.cache_cluster(resource, application),
        )),
    }
    plan.obsolete = superseded_runs(engine, resource, identifier)?;
    Ok(plan)
}

/// Pipeline runs of this deployment rendered for an earlier generation.
fn superseded_runs<S: Store>(
    engine: &Engine<S>,
    deployment: &ManagedResource,
    identifier: &str,
) -> Result<Vec<ObjectKey>, ReconcileError> {
    let params = ListParams::kind(Kind::PipelineRun)
        .in_namespace(deployment.meta.namespace.clone())
        .with_label(labels::DEPLOYMENT, identifier);
    let runs: Vec<ExternalObject> = engine.store().list(&params)?;
    Ok(runs
        .into_iter()
        .filter(|run| children::rendered_generation(&run.meta).is_some_and(|g| g < deployment.meta.generation))
        .map(|run| run.meta.key())
        .collect())
}

/// Pipeline runs are scoped to one generation so a stale run never reports
/// for a newer revision.
fn pipeline_run<S: Store>(
    deployment: &ManagedResource,
    application: &ManagedResource,
    identifier: &str,
    engine: &Engine<S>,
) -> ChildPlan {
    let generation = deployment.meta.generation;
    let name = format!("{}-g{generation}", children::child_name("build", identifier));
    let body = engine.renderer().pipeline_run(deployment, application);
    children::rendered_child(Kind::PipelineRun, deployment, name, body)
}

/// Makes a succeeded deployment its application's current one when it asks
/// to be promoted or nothing is current yet. Decided once per generation and
/// recorded as the `Promoted` condition.
pub(super) fn promote<S: Store>(
    engine: &Engine<S>,
    deployment: &mut ManagedResource,
    parent: Option<&ManagedResource>,
    now_ns: u64,
) -> Result<(), ReconcileError> {
    let generation = deployment.meta.generation;
    if deployment
        .status
        .conditions
        .get(types::PROMOTED)
        .is_some_and(|c| c.observed_generation == generation)
    {
        return Ok(());
    }
    let Some(parent) = parent else {
        return Ok(());
    };
    let Some(mut application) = engine.store().get::<ManagedResource>(&parent.meta.key())? else {
        return Ok(());
    };
    let Some(current) = application.as_application().map(|a| a.current_deployment.clone()) else {
        return Ok(());
    };

    let name = deployment.meta.name.clone();
    let wants = deployment.as_deployment().is_some_and(|d| d.promote);
    let condition = if current.as_deref() == Some(name.as_str()) {
        Condition::new(types::PROMOTED, ConditionStatus::True, reasons::PROMOTED, "already current")
    } else if wants || current.is_none() {
        if let ResourceSpec::Application(spec) = &mut application.spec {
            spec.current_deployment = Some(name.clone());
        }
        engine.store().update(&application)?;
        log::info!("{} promoted {name}", application.meta.key());
        Condition::new(
            types::PROMOTED,
            ConditionStatus::True,
            reasons::PROMOTED,
            format!("current deployment of {}", application.meta.name),
        )
    } else {
        Condition::new(
            types::PROMOTED,
            ConditionStatus::False,
            reasons::NOT_PROMOTED,
            format!("{} stays current", current.unwrap_or_default()),
        )
    };
    deployment.status.conditions.upsert(condition.observed_at(generation), now_ns);
    Ok(())
}
