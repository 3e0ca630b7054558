//! Identifier and slug invariants over the managed population.
//!
//! Identifiers are unique across every managed kind. Slugs are unique among
//! resources of one kind that share a namespace and a declared parent. When
//! two resources collide, the one created first keeps the name and the later
//! one is rejected, so re-validating an accepted resource never flips it.

use std::fmt;

use keel_types::{ManagedResource, ObjectKey, ParentRef, validate};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityField {
    Identifier,
    Slug,
}

impl fmt::Display for IdentityField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentityField::Identifier => f.write_str("identifier"),
            IdentityField::Slug => f.write_str("slug"),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IdentityViolation {
    #[error("{key} is missing its {field}")]
    IdentityIncomplete { key: ObjectKey, field: IdentityField },
    #[error("{key} has malformed {field} '{value}'")]
    IdentityMalformed {
        key: ObjectKey,
        field: IdentityField,
        value: String,
    },
    #[error("identifier {identifier} of {key} is already used by {existing}")]
    IdentityConflict {
        key: ObjectKey,
        identifier: String,
        existing: ObjectKey,
    },
    #[error("slug '{slug}' of {key} is already used by {existing} under the same parent")]
    SlugConflict {
        key: ObjectKey,
        slug: String,
        existing: ObjectKey,
    },
    #[error("identifier of {key} changed from {bound} to {current}")]
    IdentityChanged {
        key: ObjectKey,
        bound: String,
        current: String,
    },
}

impl IdentityViolation {
    pub fn reason(&self) -> &'static str {
        match self {
            IdentityViolation::IdentityIncomplete { .. } => "IdentityIncomplete",
            IdentityViolation::IdentityMalformed { .. } => "IdentityMalformed",
            IdentityViolation::IdentityConflict { .. } => "IdentityConflict",
            IdentityViolation::SlugConflict { .. } => "SlugConflict",
            IdentityViolation::IdentityChanged { .. } => "IdentityChanged",
        }
    }

    pub fn key(&self) -> &ObjectKey {
        match self {
            IdentityViolation::IdentityIncomplete { key, .. }
            | IdentityViolation::IdentityMalformed { key, .. }
            | IdentityViolation::IdentityConflict { key, .. }
            | IdentityViolation::SlugConflict { key, .. }
            | IdentityViolation::IdentityChanged { key, .. } => key,
        }
    }
}

/// Same object, possibly an older revision of it.
pub(crate) fn same_object(a: &ManagedResource, b: &ManagedResource) -> bool {
    match (&a.meta.uid, &b.meta.uid) {
        (Some(x), Some(y)) => x == y,
        _ => a.meta.key() == b.meta.key(),
    }
}

/// Whether `other` was admitted before `candidate`. Unstored candidates come last.
///
/// Equal creation times fall back to the full key and then the uid, so any two
/// distinct stored objects are strictly ordered.
pub(crate) fn precedes(other: &ManagedResource, candidate: &ManagedResource) -> bool {
    if candidate.meta.uid.is_none() {
        return true;
    }
    if other.meta.uid.is_none() {
        return false;
    }
    admission_order(other) < admission_order(candidate)
}

fn admission_order(res: &ManagedResource) -> (u64, ObjectKey, Option<&str>) {
    (res.meta.created_at_ns, res.meta.key(), res.meta.uid.as_deref())
}

fn slug_scope(res: &ManagedResource) -> (keel_types::Kind, &str, Option<&ParentRef>) {
    (res.meta.kind, res.meta.namespace.as_str(), res.meta.parent.as_ref())
}

/// Checks one resource against the rest of the population.
///
/// `population` may include the candidate itself; it is skipped by uid, or by
/// key when the store has not assigned one yet.
pub fn check_identity(candidate: &ManagedResource, population: &[ManagedResource]) -> Result<(), IdentityViolation> {
    let key = candidate.meta.key();
    let identifier = candidate.identifier().ok_or_else(|| IdentityViolation::IdentityIncomplete {
        key: key.clone(),
        field: IdentityField::Identifier,
    })?;
    let slug = candidate.slug().ok_or_else(|| IdentityViolation::IdentityIncomplete {
        key: key.clone(),
        field: IdentityField::Slug,
    })?;
    if !validate::is_valid_identifier(identifier) {
        return Err(IdentityViolation::IdentityMalformed {
            key,
            field: IdentityField::Identifier,
            value: identifier.to_string(),
        });
    }
    if !validate::is_valid_slug(slug) {
        return Err(IdentityViolation::IdentityMalformed {
            key,
            field: IdentityField::Slug,
            value: slug.to_string(),
        });
    }
    if let Some(bound) = candidate.status.bound_identifier.as_deref()
        && bound != identifier
    {
        return Err(IdentityViolation::IdentityChanged {
            key,
            bound: bound.to_string(),
            current: identifier.to_string(),
        });
    }

    let scope = slug_scope(candidate);
    for other in population
        .iter()
        .filter(|o| !same_object(o, candidate) && precedes(o, candidate))
    {
        if other.identifier() == Some(identifier) {
            return Err(IdentityViolation::IdentityConflict {
                key,
                identifier: identifier.to_string(),
                existing: other.meta.key(),
            });
        }
        if slug_scope(other) == scope && other.slug() == Some(slug) {
            return Err(IdentityViolation::SlugConflict {
                key,
                slug: slug.to_string(),
                existing: other.meta.key(),
            });
        }
    }
    Ok(())
}

/// Every violation in a population, one per offending resource.
pub fn check_population(population: &[ManagedResource]) -> Vec<IdentityViolation> {
    population
        .iter()
        .filter_map(|res| check_identity(res, population).err())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_types::{Kind, ObjectMeta, ProjectSpec, ResourceSpec, EnvironmentSpec, labels};

    const ID_A: &str = "00000000-0000-4000-8000-00000000000a";
    const ID_B: &str = "00000000-0000-4000-8000-00000000000b";

    fn stored(kind_spec: ResourceSpec, name: &str, id: &str, slug: &str, seq: u64) -> ManagedResource {
        let mut meta = ObjectMeta::new(Kind::Project, "default", name)
            .with_label(labels::IDENTIFIER, id)
            .with_label(labels::SLUG, slug);
        meta.uid = Some(format!("uid-{name}"));
        meta.created_at_ns = seq;
        ManagedResource::new(meta, kind_spec)
    }

    fn project(name: &str, id: &str, slug: &str, seq: u64) -> ManagedResource {
        stored(ResourceSpec::Project(ProjectSpec::default()), name, id, slug, seq)
    }

    fn environment(name: &str, id: &str, slug: &str, parent: &str, seq: u64) -> ManagedResource {
        let mut res = stored(ResourceSpec::Environment(EnvironmentSpec::default()), name, id, slug, seq);
        res.meta.parent = Some(ParentRef {
            kind: Kind::Project,
            name: parent.into(),
        });
        res
    }

    #[test]
    fn missing_and_malformed_identity() {
        let mut res = project("p", ID_A, "p", 1);
        res.meta.labels.remove(labels::SLUG);
        assert!(matches!(
            check_identity(&res, &[]),
            Err(IdentityViolation::IdentityIncomplete {
                field: IdentityField::Slug,
                ..
            })
        ));

        let res = project("p", "not-a-uuid", "p", 1);
        assert!(matches!(
            check_identity(&res, &[]),
            Err(IdentityViolation::IdentityMalformed {
                field: IdentityField::Identifier,
                ..
            })
        ));

        let res = project("p", ID_A, "Bad_Slug", 1);
        assert!(matches!(
            check_identity(&res, &[]),
            Err(IdentityViolation::IdentityMalformed {
                field: IdentityField::Slug,
                ..
            })
        ));
    }

    #[test]
    fn revalidating_self_never_conflicts() {
        let res = project("p", ID_A, "p", 1);
        let mut older_revision = res.clone();
        older_revision.meta.resource_version = 1;
        assert_eq!(check_identity(&res, &[older_revision, res.clone()]), Ok(()));
    }

    #[test]
    fn identifier_conflict_spans_kinds() {
        let first = project("p", ID_A, "p", 1);
        let second = environment("e", ID_A, "e", "p", 2);
        let err = check_identity(&second, &[first.clone(), second.clone()]).unwrap_err();
        assert_eq!(err.reason(), "IdentityConflict");
        assert_eq!(check_identity(&first, &[first.clone(), second]), Ok(()));
    }

    #[test]
    fn slug_scope_is_kind_and_parent() {
        let a = environment("a", ID_A, "staging", "p1", 1);
        let b = environment("b", ID_B, "staging", "p1", 2);
        assert!(matches!(
            check_identity(&b, &[a.clone(), b.clone()]),
            Err(IdentityViolation::SlugConflict { .. })
        ));

        let c = environment("c", ID_B, "staging", "p2", 2);
        assert_eq!(check_identity(&c, &[a.clone(), c.clone()]), Ok(()));

        let project_with_same_slug = project("staging", ID_B, "staging", 2);
        assert_eq!(check_identity(&project_with_same_slug, &[a, project_with_same_slug.clone()]), Ok(()));
    }

    #[test]
    fn unstored_candidate_loses_to_everything() {
        let existing = project("p", ID_A, "p", 5);
        let mut incoming = project("q", ID_B, "p", 0);
        incoming.meta.uid = None;
        assert!(matches!(
            check_identity(&incoming, &[existing]),
            Err(IdentityViolation::SlugConflict { .. })
        ));
    }

    #[test]
    fn bound_identifier_is_immutable() {
        let mut res = project("p", ID_B, "p", 1);
        res.status.bound_identifier = Some(ID_A.into());
        assert_eq!(check_identity(&res, &[]).unwrap_err().reason(), "IdentityChanged");
    }

    #[test]
    fn same_name_in_two_namespaces_rejects_exactly_one() {
        let mut first = project("acme", ID_A, "acme", 0);
        first.meta.namespace = "a".into();
        let mut second = project("acme", ID_A, "acme", 0);
        second.meta.namespace = "b".into();
        second.meta.uid = Some("uid-acme-b".into());
        let population = [first.clone(), second.clone()];

        let violations = check_population(&population);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].reason(), "IdentityConflict");
        assert_eq!(violations[0].key(), &second.meta.key());
        assert_eq!(check_identity(&first, &population), Ok(()));
    }

    #[test]
    fn population_reports_only_later_member() {
        let a = project("a", ID_A, "same", 1);
        let b = project("b", ID_B, "same", 2);
        let violations = check_population(&[a, b]);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].key().name, "b");
    }
}
