//! The per-resource control loop shared by every managed kind.
//!
//! One call to [`Engine::reconcile`] is one pass: load, hand off to the
//! cascade if deleting, validate, ensure metadata, ensure children, recompute
//! the phase and persist. Every write is version checked and every pass is
//! re-derivable from what the store holds now, so a pass may be interrupted
//! or repeated at any point.

mod application;
mod deployment;
mod domain;
mod environment;
mod project;

use std::{sync::Arc, time::Duration};

use keel_store::{ListParams, Store, StoreError};
use keel_types::{
    Condition, ConditionStatus, ExternalObject, Kind, ManagedResource, ObjectKey, Phase, Variant, labels, reasons,
    types,
};

use crate::{
    children::{self, ChildPlan, ChildRenderer, TemplateRenderer},
    clock::{Clock, SystemClock},
    config::OperatorConfig,
    correlation::{self, MirrorResult, ProjectionOutcome},
    error::{ErrorClass, ReconcileError},
    finalizer::finalizer_for,
    identity::check_identity,
    notify::{NoopSink, TransitionEvent, TransitionSink},
    phase::next_phase,
};

/// What the host should do with a key after a successful pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Done,
    /// Run again right away; this pass persisted a change it must observe first.
    Requeue,
    RequeueAfter(Duration),
}

/// Everything a kind contributes to one pass.
#[derive(Debug)]
pub(crate) struct KindPlan {
    pub variant: Variant,
    pub children: Vec<ChildPlan>,
    /// Conditions the engine itself asserts, e.g. a wildcard certificate.
    pub conditions: Vec<Condition>,
    /// Children an earlier generation required and this one replaced.
    pub obsolete: Vec<ObjectKey>,
    pub requeue_after: Option<Duration>,
}

impl KindPlan {
    pub fn new(variant: Variant) -> Self {
        Self {
            variant,
            children: Vec::new(),
            conditions: Vec::new(),
            obsolete: Vec::new(),
            requeue_after: None,
        }
    }
}

enum Admission {
    Admitted(Option<ManagedResource>),
    ParentDeleting,
}

enum ChildPresence {
    Present(Option<ExternalObject>),
    Deleting,
}

pub struct Engine<S> {
    store: Arc<S>,
    config: OperatorConfig,
    renderer: Arc<dyn ChildRenderer>,
    sink: Arc<dyn TransitionSink>,
    clock: Arc<dyn Clock>,
}

impl<S> Clone for Engine<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            config: self.config.clone(),
            renderer: self.renderer.clone(),
            sink: self.sink.clone(),
            clock: self.clock.clone(),
        }
    }
}

impl<S: Store> Engine<S> {
    pub fn new(store: Arc<S>, config: OperatorConfig) -> Self {
        Self {
            store,
            config,
            renderer: Arc::new(TemplateRenderer),
            sink: Arc::new(NoopSink),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn TransitionSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn ChildRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &OperatorConfig {
        &self.config
    }

    pub(crate) fn renderer(&self) -> &dyn ChildRenderer {
        self.renderer.as_ref()
    }

    /// Mirrors one external object onto its owner.
    pub fn project(&self, key: &ObjectKey) -> Result<ProjectionOutcome, ReconcileError> {
        correlation::project(self.store.as_ref(), key, self.clock.now_ns())
    }

    /// One reconcile pass for `key`. External kinds are routed to their projector.
    pub fn reconcile(&self, key: &ObjectKey) -> Result<Action, ReconcileError> {
        if !key.kind.is_managed() {
            self.project(key)?;
            return Ok(Action::Done);
        }
        let Some(resource) = self.store.get::<ManagedResource>(key)? else {
            log::debug!("{key} is gone");
            return Ok(Action::Done);
        };
        if resource.meta.deletion_requested {
            return self.finalize(resource).map(|state| state.action(&self.config));
        }

        let parent = match self.admit(&resource) {
            Ok(Admission::Admitted(parent)) => parent,
            Ok(Admission::ParentDeleting) => {
                log::debug!("{key} waits while its parent is deleted");
                return Ok(Action::RequeueAfter(self.config.cascade_recheck));
            }
            Err(err) => return self.reject(resource, err),
        };
        if self.ensure_metadata(&resource, parent.as_ref())? {
            return Ok(Action::Requeue);
        }

        let mut resource = resource;
        if self.restart_if_advanced(&mut resource)? {
            return Ok(Action::Requeue);
        }
        let plan = match self.plan(&resource, parent.as_ref()) {
            Ok(plan) => plan,
            Err(err) => return self.reject(resource, err),
        };
        self.converge(resource, parent.as_ref(), plan)
    }

    /// Every managed resource across all namespaces.
    pub fn population(&self) -> Result<Vec<ManagedResource>, StoreError> {
        let mut population = Vec::new();
        for kind in Kind::MANAGED {
            population.extend(self.store.list::<ManagedResource>(&ListParams::kind(kind))?);
        }
        Ok(population)
    }

    fn admit(&self, resource: &ManagedResource) -> Result<Admission, ReconcileError> {
        check_identity(resource, &self.population()?)?;
        let parent = self.resolve_parent(resource)?;
        if parent.as_ref().is_some_and(|p| p.meta.deletion_requested) {
            return Ok(Admission::ParentDeleting);
        }
        Ok(Admission::Admitted(parent))
    }

    fn resolve_parent(&self, resource: &ManagedResource) -> Result<Option<ManagedResource>, ReconcileError> {
        let key = resource.meta.key();
        let Some(expected) = resource.kind().parent_kind() else {
            return Ok(None);
        };
        let Some(parent_ref) = &resource.meta.parent else {
            return Err(ReconcileError::invalid(&key, format!("a {} requires a parent {expected}", key.kind)));
        };
        if parent_ref.kind != expected {
            return Err(ReconcileError::invalid(
                &key,
                format!("parent must be a {expected}, not a {}", parent_ref.kind),
            ));
        }
        let parent_key = ObjectKey::new(expected, resource.meta.namespace.clone(), parent_ref.name.clone());
        match self.store.get::<ManagedResource>(&parent_key)? {
            Some(parent) => Ok(Some(parent)),
            None => Err(ReconcileError::MissingReference {
                key,
                missing: parent_key,
            }),
        }
    }

    /// Declaration errors are written onto the resource; all errors go back to the caller.
    fn reject(&self, mut resource: ManagedResource, err: ReconcileError) -> Result<Action, ReconcileError> {
        if err.class() != ErrorClass::Declaration {
            return Err(err);
        }
        let now = self.clock.now_ns();
        let before = resource.status.clone();
        let message = err.to_string();
        resource.status.conditions.upsert(
            Condition::new(types::DECLARED, ConditionStatus::False, err.reason(), message.clone())
                .observed_at(resource.meta.generation),
            now,
        );
        resource.status.message = message;
        if !resource.status.same_state(&before) {
            resource.status.last_reconcile_ns = now;
            self.store.update_status(&resource)?;
        }
        log::warn!("{} rejected: {err}", resource.meta.key());
        Err(err)
    }

    /// Adds the finalizer and ancestry labels in one write. Returns whether it wrote.
    fn ensure_metadata(
        &self,
        resource: &ManagedResource,
        parent: Option<&ManagedResource>,
    ) -> Result<bool, ReconcileError> {
        let mut updated = resource.clone();
        let mut changed = updated.meta.add_finalizer(&finalizer_for(resource.kind()));
        if let Some(parent) = parent {
            for (label, value) in children::ancestry_of(parent) {
                if updated.meta.label(label) != Some(value.as_str()) {
                    updated.meta.labels.insert(label.to_string(), value);
                    changed = true;
                }
            }
        }
        if !changed {
            return Ok(false);
        }
        self.store.update(&updated)?;
        log::debug!("{} metadata updated", resource.meta.key());
        Ok(true)
    }

    /// A new generation restarts the phase machine from `Pending`.
    fn restart_if_advanced(&self, resource: &mut ManagedResource) -> Result<bool, ReconcileError> {
        let generation = resource.meta.generation;
        if resource.status.observed_generation == generation {
            return Ok(false);
        }
        let previous = resource.status.phase;
        resource.status.observed_generation = generation;
        if previous == Phase::Pending {
            return Ok(false);
        }
        resource.status.phase = Phase::Pending;
        resource.status.last_reconcile_ns = self.clock.now_ns();
        let written = self.store.update_status(resource)?;
        log::debug!("{} restarted at generation {generation}", written.meta.key());
        self.emit(&written, previous);
        Ok(true)
    }

    fn plan(&self, resource: &ManagedResource, parent: Option<&ManagedResource>) -> Result<KindPlan, ReconcileError> {
        match resource.kind() {
            Kind::Project => project::plan(resource),
            Kind::Environment => environment::plan(resource),
            Kind::Application => application::plan(self, resource),
            Kind::Deployment => deployment::plan(self, resource, parent),
            Kind::Domain => domain::plan(self, resource),
            other => Err(ReconcileError::invalid(
                &resource.meta.key(),
                format!("{other} is not a managed kind"),
            )),
        }
    }

    fn ensure_child(&self, child: &ChildPlan) -> Result<ChildPresence, StoreError> {
        let key = child.key();
        match child {
            ChildPlan::Managed(desired) => {
                if let Some(existing) = self.store.get::<ManagedResource>(&key)? {
                    return Ok(presence(existing.meta.deletion_requested, None));
                }
                match self.store.create(desired) {
                    Ok(_) | Err(StoreError::AlreadyExists(_)) => {
                        log::debug!("created {key}");
                        Ok(ChildPresence::Present(None))
                    }
                    Err(err) => Err(err),
                }
            }
            ChildPlan::External(desired) => {
                if let Some(existing) = self.store.get::<ExternalObject>(&key)? {
                    if !existing.meta.deletion_requested
                        && children::rendered_generation(&desired.meta) > children::rendered_generation(&existing.meta)
                    {
                        return self.roll_forward(existing, desired).map(|o| ChildPresence::Present(Some(o)));
                    }
                    let deleting = existing.meta.deletion_requested;
                    return Ok(presence(deleting, Some(existing)));
                }
                match self.store.create(desired) {
                    Ok(created) => {
                        log::debug!("created {key}");
                        Ok(ChildPresence::Present(Some(created)))
                    }
                    Err(StoreError::AlreadyExists(_)) => Ok(ChildPresence::Present(self.store.get(&key)?)),
                    Err(err) => Err(err),
                }
            }
        }
    }

    /// Re-renders an external child for a newer owner generation. A changed
    /// body bumps the child's own generation.
    fn roll_forward(&self, mut existing: ExternalObject, desired: &ExternalObject) -> Result<ExternalObject, StoreError> {
        existing.spec = desired.spec.clone();
        if let Some(rendered) = desired.meta.label(labels::OWNER_GENERATION) {
            existing
                .meta
                .labels
                .insert(labels::OWNER_GENERATION.to_string(), rendered.to_string());
        }
        let updated = self.store.update(&existing)?;
        log::debug!(
            "rolled {} forward to generation {}",
            updated.meta.key(),
            updated.meta.generation
        );
        Ok(updated)
    }

    fn converge(
        &self,
        mut resource: ManagedResource,
        parent: Option<&ManagedResource>,
        plan: KindPlan,
    ) -> Result<Action, ReconcileError> {
        let key = resource.meta.key();
        let now = self.clock.now_ns();
        let generation = resource.meta.generation;
        let before = resource.status.clone();

        let mut missing = Vec::new();
        let mut sources = Vec::new();
        for child in &plan.children {
            match self.ensure_child(child)? {
                ChildPresence::Present(Some(external)) => {
                    if let Some(projector) = correlation::projector_for(external.kind())
                        && projector.owner_kind() == resource.kind()
                        && apply_projection_if_owned(projector, &external, &mut resource, now) == MirrorResult::Changed
                    {
                        log::debug!("{key} picked up {}", external.source_key());
                    }
                    sources.push(external.source_key());
                }
                ChildPresence::Present(None) => {}
                ChildPresence::Deleting => missing.push(child.key()),
            }
        }
        for stale in &plan.obsolete {
            match self.store.delete(stale) {
                Ok(()) => log::debug!("{key} removed superseded {stale}"),
                Err(StoreError::NotFound(_)) => {}
                Err(err) => return Err(err.into()),
            }
        }
        // Markers of sources this generation no longer plans.
        resource
            .status
            .processed_markers
            .retain(|source, _| sources.contains(source));

        let children_ready = if missing.is_empty() {
            Condition::new(
                types::CHILDREN_READY,
                ConditionStatus::True,
                reasons::CHILDREN_PRESENT,
                format!("{} required children present", plan.children.len()),
            )
        } else {
            let names: Vec<String> = missing.iter().map(ToString::to_string).collect();
            Condition::new(
                types::CHILDREN_READY,
                ConditionStatus::False,
                reasons::CHILDREN_MISSING,
                format!("waiting to recreate {}", names.join(", ")),
            )
        };
        let declared = Condition::new(types::DECLARED, ConditionStatus::True, reasons::VALID, "");
        for condition in [declared, children_ready].into_iter().chain(plan.conditions) {
            resource.status.conditions.upsert(condition.observed_at(generation), now);
        }
        if resource.status.bound_identifier.is_none() {
            resource.status.bound_identifier = resource.identifier().map(str::to_string);
        }
        resource.status.observed_generation = generation;
        resource.status.message.clear();

        let previous = resource.status.phase;
        let current = resource.status.conditions.current_for(generation);
        let mut next = next_phase(&current, plan.variant);
        if next == Phase::Succeeded && !current.is_true(types::CHILDREN_READY) {
            next = Phase::Deploying;
        }
        if previous.is_terminal() && before.observed_generation == generation {
            next = previous;
        }
        resource.status.phase = next;

        if resource.kind() == Kind::Deployment && next == Phase::Succeeded {
            deployment::promote(self, &mut resource, parent, now)?;
        }

        if !resource.status.same_state(&before) {
            resource.status.last_reconcile_ns = now;
            let written = self.store.update_status(&resource)?;
            if previous != next {
                log::debug!("{key} {previous} -> {next}");
                self.emit(&written, previous);
            }
        }

        if !missing.is_empty() {
            return Ok(Action::RequeueAfter(self.config.cascade_recheck));
        }
        Ok(plan.requeue_after.map_or(Action::Done, Action::RequeueAfter))
    }

    fn emit(&self, resource: &ManagedResource, previous: Phase) {
        let event = TransitionEvent {
            key: resource.meta.key(),
            identifier: resource.identifier().map(str::to_string),
            slug: resource.slug().map(str::to_string),
            previous,
            next: resource.status.phase,
            generation: resource.meta.generation,
            at_ns: self.clock.now_ns(),
        };
        if let Err(err) = self.sink.notify(&event) {
            log::warn!("transition notification for {} dropped: {err}", event.key);
        }
    }
}

/// The `ResourceSpec` variant does not match the resource kind.
fn spec_mismatch(resource: &ManagedResource) -> ReconcileError {
    ReconcileError::invalid(
        &resource.meta.key(),
        format!("spec for a {} does not match kind {}", resource.spec.kind(), resource.kind()),
    )
}

fn presence(deleting: bool, external: Option<ExternalObject>) -> ChildPresence {
    if deleting {
        ChildPresence::Deleting
    } else {
        ChildPresence::Present(external)
    }
}

/// Inline projection of a child the engine just ensured; skipped when the
/// child belongs to an earlier incarnation of an owner with the same name.
fn apply_projection_if_owned(
    projector: &dyn correlation::Projector,
    source: &ExternalObject,
    owner: &mut ManagedResource,
    now_ns: u64,
) -> MirrorResult {
    if let Some(owner_ref) = source.meta.owner_of_kind(owner.kind())
        && owner.meta.uid.as_deref() != Some(owner_ref.uid.as_str())
    {
        return MirrorResult::Unchanged;
    }
    correlation::apply_projection(projector, source, owner, now_ns)
}
