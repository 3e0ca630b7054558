use std::collections::HashSet;

use keel_kernel::{ProjectionOutcome, check_population, enumerate_children, finalizer_for, next_phase};
use keel_store::{ListParams, Store};
use keel_testkit::TestWorld;
use keel_testkit::fixtures::*;
use keel_testkit::signals;
use keel_types::{
    Condition, ConditionSet, ConditionStatus, ContainerState, Kind, ManagedResource, Object, Phase, Variant, labels,
    reasons, types,
};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

const TRIALS: u64 = 200;

/// Projects and environments with identifiers and slugs drawn from small pools,
/// so collisions are common.
fn random_population(rng: &mut StdRng) -> Vec<ManagedResource> {
    let projects = rng.gen_range(1..4);
    let environments = rng.gen_range(0..6);
    let mut population = Vec::new();
    for i in 0..projects {
        let mut res = project(&format!("p{i}"), rng.gen_range(1..8));
        res.meta.labels.insert(labels::SLUG.into(), format!("s{}", rng.gen_range(0..4)));
        population.push(res);
    }
    for i in 0..environments {
        let parent = format!("p{}", rng.gen_range(0..projects));
        let mut res = environment(&format!("e{i}"), &parent, rng.gen_range(1..8));
        res.meta.labels.insert(labels::SLUG.into(), format!("s{}", rng.gen_range(0..4)));
        population.push(res);
    }
    population
}

fn has_collision(population: &[ManagedResource]) -> bool {
    let mut identifiers = HashSet::new();
    let mut slugs = HashSet::new();
    for res in population {
        if !identifiers.insert(res.identifier().map(str::to_string)) {
            return true;
        }
        let scope = (
            res.kind(),
            res.meta.namespace.clone(),
            res.meta.parent.as_ref().map(|p| p.name.clone()),
            res.slug().map(str::to_string),
        );
        if !slugs.insert(scope) {
            return true;
        }
    }
    false
}

#[test]
fn checker_accepts_exactly_the_collision_free_populations() {
    let mut rng = StdRng::seed_from_u64(7);
    let mut clean = 0;
    for _ in 0..TRIALS {
        let population = random_population(&mut rng);
        let violations = check_population(&population);
        assert_eq!(
            violations.is_empty(),
            !has_collision(&population),
            "population {:?} gave {violations:?}",
            population.iter().map(|r| r.key()).collect::<Vec<_>>()
        );
        if violations.is_empty() {
            clean += 1;
        }
    }
    assert!(clean > 0, "generator never produced a clean population");
}

#[test]
fn constructed_collisions_are_always_rejected() {
    let mut rng = StdRng::seed_from_u64(11);
    for _ in 0..TRIALS {
        let population: Vec<ManagedResource> = (0..rng.gen_range(2..6))
            .map(|i| project(&format!("p{i}"), i + 1))
            .collect();
        assert!(check_population(&population).is_empty());

        let mut collided = population.clone();
        let a = rng.gen_range(0..collided.len());
        let b = (a + rng.gen_range(1..collided.len())) % collided.len();
        if rng.gen_bool(0.5) {
            let identifier = collided[a].identifier().unwrap().to_string();
            collided[b].meta.labels.insert(labels::IDENTIFIER.into(), identifier);
        } else {
            let slug = collided[a].slug().unwrap().to_string();
            collided[b].meta.labels.insert(labels::SLUG.into(), slug);
        }
        assert!(!check_population(&collided).is_empty());
    }
}

const CONDITION_TYPES: [&str; 6] = [
    types::BUILD_SUCCEEDED,
    types::WORKLOAD_READY,
    types::DATABASE_READY,
    types::CACHE_READY,
    types::CHILDREN_READY,
    types::CERTIFICATE_READY,
];

fn random_conditions(rng: &mut StdRng) -> ConditionSet {
    let mut set = ConditionSet::new();
    for condition_type in CONDITION_TYPES {
        let status = match rng.gen_range(0..4) {
            0 => continue,
            1 => ConditionStatus::True,
            2 => ConditionStatus::False,
            _ => ConditionStatus::Unknown,
        };
        let reason = if rng.gen_ratio(1, 10) { reasons::CRASH_LOOP_BACK_OFF } else { "Observed" };
        set.upsert(Condition::new(condition_type, status, reason, ""), 0);
    }
    set
}

#[test]
fn phase_machine_is_total_and_deterministic() {
    let mut rng = StdRng::seed_from_u64(3);
    for _ in 0..5_000 {
        let conditions = random_conditions(&mut rng);
        for variant in Variant::ALL {
            let phase = next_phase(&conditions, variant);
            assert!(Phase::ALL.contains(&phase));
            assert_eq!(phase, next_phase(&conditions, variant));
            if conditions.has_unrecoverable() {
                assert_eq!(phase, Phase::Failed);
            }
            if phase == Phase::Succeeded {
                assert!(conditions.is_true(variant.readiness_condition()));
            }
        }
    }
}

/// No resource that has let go of its finalizer still has children, and no
/// child outlives its parent.
fn assert_cascade_safe(world: &TestWorld) {
    for kind in Kind::MANAGED {
        for res in world.store.list::<ManagedResource>(&ListParams::kind(kind)).unwrap() {
            if res.meta.deletion_requested && !res.meta.has_finalizer(&finalizer_for(kind)) {
                assert!(
                    enumerate_children(world.store.as_ref(), &res).unwrap().is_empty(),
                    "{} released its finalizer with children present",
                    res.key()
                );
            }
            if let Some(parent) = res.meta.parent_key() {
                assert!(world.store.contains(&parent), "{} outlived {parent}", res.key());
            }
        }
    }
}

#[test]
fn cascade_never_releases_a_parent_early() {
    let mut rng = StdRng::seed_from_u64(5);
    for trial in 0..40 {
        let mut world = TestWorld::new();
        let root = world.apply(project("acme", 1));
        let mut n = 2;
        let mut held = Vec::new();
        for e in 0..rng.gen_range(1..4) {
            let env_name = format!("env-{e}");
            let env = world.apply(environment(&env_name, "acme", n));
            n += 1;
            held.push(env);
            for a in 0..rng.gen_range(0..3) {
                let app = world.apply(application(&format!("app-{e}-{a}"), &env_name, image(), n));
                n += 1;
                held.push(app);
            }
        }
        world.settle();

        // Some resources are held by another controller.
        held.shuffle(&mut rng);
        held.truncate(rng.gen_range(0..=held.len()));
        for key in &held {
            let mut res = world.get(key).unwrap();
            res.meta.add_finalizer("example.com/hold");
            world.store.update(&res).unwrap();
        }
        world.settle();

        world.delete(&root);
        for key in held {
            if rng.gen_bool(0.3) {
                world.store.fail_next_writes(rng.gen_range(1..3));
            }
            world.settle();
            world.store.fail_next_writes(0);
            assert_cascade_safe(&world);

            let mut res = world.get(&key).unwrap();
            res.meta.remove_finalizer("example.com/hold");
            world.store.update(&res).unwrap();
            world.advance(std::time::Duration::from_secs(5));
            assert_cascade_safe(&world);
        }
        world.settle();
        world.advance(std::time::Duration::from_secs(5));
        assert!(world.store.is_empty(), "trial {trial} left {:?}", world.store.keys());
    }
}

#[test]
fn repeated_observations_write_once() {
    let mut rng = StdRng::seed_from_u64(9);
    let mut world = TestWorld::new();
    world.apply(project("acme", 1));
    world.apply(environment("prod", "acme", 2));
    world.apply(application("web", "prod", image(), 3));
    let dep = world.apply(deployment("web-1", "web", None, 10));
    world.settle();
    let workload = workload_key(10);

    for _ in 0..50 {
        let replicas = rng.gen_range(0..4);
        let ready = rng.gen_range(0..=replicas);
        let restarts = if rng.gen_ratio(1, 5) { 4 } else { 0 };
        signals::update(world.store.as_ref(), &workload, |obj| {
            obj.status.replicas = replicas;
            obj.status.ready_replicas = ready;
            obj.status.unavailable_replicas = replicas - ready;
            obj.status.containers = vec![ContainerState {
                name: "app".into(),
                restart_count: restarts,
                waiting_reason: None,
            }];
        })
        .unwrap();

        world.engine.project(&workload).unwrap();
        let before = world.get(&dep).unwrap();
        assert_eq!(world.engine.project(&workload).unwrap(), ProjectionOutcome::Unchanged);
        let after = world.get(&dep).unwrap();
        assert_eq!(before, after);
        assert_eq!(after.status.processed_markers.len(), 1);
    }
}
