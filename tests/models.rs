//! Entity validation and referential integrity tests.

mod common;

use anvil::core::error::TrackerError;
use anvil::models::{prefix, Entity, Job, Param, Subnet};
use anvil::storage::stack::DataStack;
use anvil::tracker::Services;
use common::*;
use std::net::Ipv4Addr;
use uuid::Uuid;

// ============================================================================
// BootEnv / Machine reference closure
// ============================================================================

#[test]
fn bootenv_delete_refused_while_a_machine_uses_it() {
    let dt = mk_tracker();
    let m = seed_machine(&dt, "one.example.com");
    let mut d = dt.lock_all();

    let env = dt.fetch_one(&d, prefix::BOOTENVS, "available").unwrap();
    let err = dt.remove(&mut d, &env).unwrap_err();
    assert!(err.to_string().contains("StillInUseError"));
    assert!(err.to_string().contains("is using BootEnv"));

    let machine_ent = dt.fetch_one(&d, prefix::MACHINES, &m.key()).unwrap();
    dt.remove(&mut d, &machine_ent).unwrap();
    dt.remove(&mut d, &env).unwrap();
}

#[test]
fn machine_with_missing_bootenv_saves_but_is_unavailable() {
    let dt = mk_tracker();
    let mut d = dt.lock_all();
    let saved = dt
        .create(&mut d, Entity::Machine(machine("lost.example.com", "nope")))
        .unwrap();
    let v = saved.validation();
    assert!(v.validated);
    assert!(!v.available);
    assert!(v.errors.iter().any(|e| e.contains("does not exist")));
}

#[test]
fn machine_cannot_use_an_only_unknown_bootenv() {
    let dt = mk_tracker();
    let mut d = dt.lock_all();
    dt.create(&mut d, Entity::Template(template("t", "x")))
        .unwrap();
    let mut env = bootenv("unknown-only", "t");
    env.only_unknown = true;
    dt.create(&mut d, Entity::BootEnv(env)).unwrap();
    let saved = dt
        .create(
            &mut d,
            Entity::Machine(machine("m.example.com", "unknown-only")),
        )
        .unwrap();
    assert!(!saved.validation().available);
    assert!(saved
        .validation()
        .errors
        .iter()
        .any(|e| e.contains("OnlyUnknown")));
}

#[test]
fn machine_names_are_unique() {
    let dt = mk_tracker();
    seed_machine(&dt, "dup.example.com");
    let mut d = dt.lock_all();
    let err = dt
        .create(&mut d, Entity::Machine(machine("dup.example.com", "available")))
        .unwrap_err();
    assert!(err.to_string().contains("duplicate Name"));
}

#[test]
fn bootenv_names_reject_path_separators() {
    let dt = mk_tracker();
    let mut d = dt.lock_all();
    dt.create(&mut d, Entity::Template(template("t", "x")))
        .unwrap();
    for bad in ["a/b", "a\\b"] {
        let err = dt
            .create(&mut d, Entity::BootEnv(bootenv(bad, "t")))
            .unwrap_err();
        assert!(err.to_string().contains("must not contain"), "{bad}");
    }
}

#[test]
fn bootenv_with_missing_template_is_unavailable() {
    let dt = mk_tracker();
    let mut d = dt.lock_all();
    let saved = dt
        .create(&mut d, Entity::BootEnv(bootenv("dangling", "missing")))
        .unwrap();
    assert!(!saved.validation().available);
    assert!(saved
        .validation()
        .errors
        .iter()
        .any(|e| e.contains("Template does not exist: missing")));
}

#[test]
fn template_delete_refused_while_referenced() {
    let dt = mk_tracker();
    let mut d = dt.lock_all();
    dt.create(&mut d, Entity::Template(template("shared", "x")))
        .unwrap();
    dt.create(&mut d, Entity::BootEnv(bootenv("user", "shared")))
        .unwrap();
    let tmpl = dt.fetch_one(&d, prefix::TEMPLATES, "shared").unwrap();
    let err = dt.remove(&mut d, &tmpl).unwrap_err();
    assert!(err.to_string().contains("is using template"));
}

// ============================================================================
// Profiles and params
// ============================================================================

#[test]
fn global_profile_is_undeletable() {
    let dt = mk_tracker();
    let mut d = dt.lock_all();
    dt.create(&mut d, Entity::Profile(profile("global", "k", "v")))
        .unwrap();
    let global = dt.fetch_one(&d, prefix::PROFILES, "global").unwrap();
    let err = dt.remove(&mut d, &global).unwrap_err();
    assert!(err.to_string().contains("global profile"));
}

#[test]
fn profile_delete_refused_while_a_machine_uses_it() {
    let dt = mk_tracker();
    let m = seed_machine(&dt, "pm.example.com");
    let mut d = dt.lock_all();
    dt.create(&mut d, Entity::Profile(profile("stage1", "k", "v")))
        .unwrap();
    let mut with_profile = m.clone();
    with_profile.profiles.push("stage1".to_string());
    dt.save(&mut d, Entity::Machine(with_profile)).unwrap();

    let p = dt.fetch_one(&d, prefix::PROFILES, "stage1").unwrap();
    let err = dt.remove(&mut d, &p).unwrap_err();
    assert!(err.to_string().contains("is using profile"));
}

#[test]
fn profile_values_validate_against_param_schemas() {
    let dt = mk_tracker();
    let mut d = dt.lock_all();
    dt.create(
        &mut d,
        Entity::Param(Param {
            name: "port".to_string(),
            schema: serde_json::json!({"type": "integer", "minimum": 1}),
            ..Default::default()
        }),
    )
    .unwrap();

    let mut bad = profile("net", "port", "not-a-number");
    let saved = dt.create(&mut d, Entity::Profile(bad.clone())).unwrap();
    assert!(!saved.validation().available);
    assert!(saved
        .validation()
        .errors
        .iter()
        .any(|e| e.contains("invalid value")));

    bad.params
        .insert("port".to_string(), serde_json::json!(8080));
    let fixed = dt.save(&mut d, Entity::Profile(bad)).unwrap();
    assert!(fixed.validation().available);
}

// ============================================================================
// Subnets, reservations, leases
// ============================================================================

#[test]
fn subnet_validation_enforces_lease_time_floors() {
    let dt = mk_tracker();
    let mut d = dt.lock_all();

    let mut s = subnet_124("mac");
    s.active_lease_time = 59;
    assert!(dt.create(&mut d, Entity::Subnet(s)).is_err());

    let mut s = subnet_124("mac");
    s.reserved_lease_time = 300;
    assert!(dt.create(&mut d, Entity::Subnet(s)).is_err());

    let mut s = subnet_124("mac");
    s.subnet = "not-a-cidr".to_string();
    assert!(dt.create(&mut d, Entity::Subnet(s)).is_err());

    dt.create(&mut d, Entity::Subnet(subnet_124("mac"))).unwrap();
}

#[test]
fn reservations_reject_network_and_broadcast_addresses() {
    let dt = mk_tracker();
    let mut d = dt.lock_all();
    dt.create(&mut d, Entity::Subnet(subnet_124("mac"))).unwrap();

    for bad in [Ipv4Addr::new(192, 168, 124, 0), Ipv4Addr::new(192, 168, 124, 255)] {
        let err = dt
            .create(&mut d, Entity::Reservation(reservation(bad, "mac", "aa")))
            .unwrap_err();
        assert!(
            err.to_string().contains("network or broadcast"),
            "{bad} should have been rejected"
        );
    }
    dt.create(
        &mut d,
        Entity::Reservation(reservation(Ipv4Addr::new(192, 168, 124, 10), "mac", "aa")),
    )
    .unwrap();
}

#[test]
fn reservation_upsert_runs_the_subnet_checks() {
    use anvil::models::Action;

    let dt = mk_tracker();
    {
        let mut d = dt.lock_all();
        dt.create(&mut d, Entity::Subnet(subnet_124("mac"))).unwrap();
    }

    // A save that creates the key runs the create hooks, so the Save
    // lock set has to carry subnets along.
    let mut d = dt.lock_for(prefix::RESERVATIONS, Action::Save);
    dt.save(
        &mut d,
        Entity::Reservation(reservation(Ipv4Addr::new(192, 168, 124, 10), "mac", "aa")),
    )
    .unwrap();
    let err = dt
        .save(
            &mut d,
            Entity::Reservation(reservation(Ipv4Addr::new(192, 168, 124, 255), "mac", "bb")),
        )
        .unwrap_err();
    assert!(err.to_string().contains("network or broadcast"));
}

#[test]
fn reservation_identity_is_immutable_and_unique() {
    let dt = mk_tracker();
    let mut d = dt.lock_all();
    dt.create(&mut d, Entity::Subnet(subnet_124("mac"))).unwrap();
    dt.create(
        &mut d,
        Entity::Reservation(reservation(Ipv4Addr::new(192, 168, 124, 10), "mac", "aa")),
    )
    .unwrap();

    // Same identity at another address is refused.
    let err = dt
        .create(
            &mut d,
            Entity::Reservation(reservation(Ipv4Addr::new(192, 168, 124, 11), "mac", "aa")),
        )
        .unwrap_err();
    assert!(err.to_string().contains("already has Strategy"));

    // Token and strategy cannot change in place.
    let mut changed = reservation(Ipv4Addr::new(192, 168, 124, 10), "mac", "bb");
    let err = dt.update(&mut d, Entity::Reservation(changed.clone())).unwrap_err();
    assert!(err.to_string().contains("Token cannot change"));
    changed.token = "aa".to_string();
    changed.strategy = "token".to_string();
    let err = dt.update(&mut d, Entity::Reservation(changed)).unwrap_err();
    assert!(err.to_string().contains("Strategy cannot change"));
}

#[test]
fn lease_lifecycle_contract() {
    let dt = mk_tracker();
    let mut d = dt.lock_all();

    // No subnet, no reservation: no lease.
    let err = dt
        .create(
            &mut d,
            Entity::Lease(lease(Ipv4Addr::new(192, 168, 124, 10), "token", "token", fresh())),
        )
        .unwrap_err();
    assert!(err.to_string().contains("not in any subnet range"));

    dt.create(&mut d, Entity::Subnet(subnet_124("noop"))).unwrap();

    // Bad addresses and empty identity parts are refused.
    assert!(dt
        .create(
            &mut d,
            Entity::Lease(lease(Ipv4Addr::new(127, 0, 0, 1), "token", "token", fresh())),
        )
        .is_err());
    assert!(dt
        .create(
            &mut d,
            Entity::Lease(lease(Ipv4Addr::new(192, 168, 124, 10), "token", "", fresh())),
        )
        .is_err());

    dt.create(
        &mut d,
        Entity::Lease(lease(Ipv4Addr::new(192, 168, 124, 10), "token", "token", fresh())),
    )
    .unwrap();

    // Same address again, and same identity elsewhere, both refused.
    assert!(matches!(
        dt.create(
            &mut d,
            Entity::Lease(lease(Ipv4Addr::new(192, 168, 124, 10), "token", "token", fresh())),
        ),
        Err(TrackerError::AlreadyExists { .. })
    ));
    assert!(dt
        .create(
            &mut d,
            Entity::Lease(lease(Ipv4Addr::new(192, 168, 124, 11), "token", "token", fresh())),
        )
        .is_err());

    // Identity cannot change in place; expiry can.
    let mut l = lease(Ipv4Addr::new(192, 168, 124, 10), "token", "token2", fresh());
    assert!(dt.update(&mut d, Entity::Lease(l.clone())).is_err());
    l.token = "token".to_string();
    dt.update(&mut d, Entity::Lease(l)).unwrap();
}

// ============================================================================
// Jobs
// ============================================================================

fn job_tracker() -> (anvil::tracker::DataTracker, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let services = Services {
        log_root: dir.path().to_path_buf(),
        ..Default::default()
    };
    let stack = DataStack::new(
        mem_store("BackingStore"),
        None,
        None,
        mem_store("BasicStore"),
    );
    (mk_tracker_with(stack, services), dir)
}

fn seed_job(dt: &anvil::tracker::DataTracker, machine_uuid: Uuid) -> Job {
    let mut d = dt.lock_all();
    dt.create(
        &mut d,
        Entity::Task(anvil::models::Task {
            name: "drive-wipe".to_string(),
            ..Default::default()
        }),
    )
    .unwrap();
    let job = Job {
        uuid: Uuid::new_v4(),
        machine: machine_uuid,
        task: "drive-wipe".to_string(),
        boot_env: "available".to_string(),
        ..Default::default()
    };
    dt.create(&mut d, Entity::Job(job))
        .unwrap()
        .into_job()
        .unwrap()
}

#[test]
fn job_requires_live_references() {
    let (dt, _logs) = job_tracker();
    let mut d = dt.lock_all();
    let job = Job {
        uuid: Uuid::new_v4(),
        machine: Uuid::new_v4(),
        task: "ghost-task".to_string(),
        boot_env: "ghost-env".to_string(),
        ..Default::default()
    };
    let err = dt.create(&mut d, Entity::Job(job)).unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("Machine") && msg.contains("does not exist"));
    assert!(msg.contains("Task ghost-task does not exist"));
    assert!(msg.contains("Bootenv ghost-env does not exist"));
}

#[test]
fn job_state_transitions_stamp_times() {
    let (dt, _logs) = job_tracker();
    let m = seed_machine(&dt, "job.example.com");
    let mut job = seed_job(&dt, m.uuid);
    assert!(job.start_time.is_none());

    let mut d = dt.lock_all();
    job.state = "running".to_string();
    let job = dt
        .save(&mut d, Entity::Job(job))
        .unwrap()
        .into_job()
        .unwrap();
    assert!(job.start_time.is_some());
    assert!(job.end_time.is_none());

    let mut job2 = job.clone();
    job2.state = "finished".to_string();
    let job2 = dt
        .save(&mut d, Entity::Job(job2))
        .unwrap()
        .into_job()
        .unwrap();
    assert!(job2.end_time.is_some());
}

#[test]
fn job_failure_marks_the_machine_not_runnable() {
    let (dt, _logs) = job_tracker();
    let m = seed_machine(&dt, "failing.example.com");
    let mut job = seed_job(&dt, m.uuid);

    let mut d = dt.lock_all();
    job.state = "failed".to_string();
    dt.save(&mut d, Entity::Job(job)).unwrap();

    let machine = dt
        .fetch_one(&d, prefix::MACHINES, &m.key())
        .unwrap()
        .into_machine()
        .unwrap();
    assert!(!machine.runnable);
}

#[test]
fn only_terminal_jobs_can_be_deleted() {
    let (dt, _logs) = job_tracker();
    let m = seed_machine(&dt, "delete.example.com");
    let job = seed_job(&dt, m.uuid);

    let mut d = dt.lock_all();
    let ent = dt.fetch_one(&d, prefix::JOBS, &job.key()).unwrap();
    let err = dt.remove(&mut d, &ent).unwrap_err();
    assert!(err.to_string().contains("not in a deletable state"));

    let mut done = job.clone();
    done.state = "finished".to_string();
    dt.save(&mut d, Entity::Job(done)).unwrap();
    let ent = dt.fetch_one(&d, prefix::JOBS, &job.key()).unwrap();
    dt.remove(&mut d, &ent).unwrap();
}

#[test]
fn job_log_gets_created_and_appended() {
    let (dt, logs) = job_tracker();
    let m = seed_machine(&dt, "log.example.com");
    let job = seed_job(&dt, m.uuid);
    assert!(!job.log_path.is_empty());
    job.log("line two\n").unwrap();
    let contents = std::fs::read_to_string(&job.log_path).unwrap();
    assert!(contents.starts_with(&format!("Log for Job: {}", job.uuid)));
    assert!(contents.ends_with("line two\n"));
    drop(logs);
}

// ============================================================================
// Subnet model helpers used by the engine
// ============================================================================

#[test]
fn unknown_pick_strategy_is_rejected() {
    let dt = mk_tracker();
    let mut d = dt.lock_all();
    let mut s: Subnet = subnet_124("mac");
    s.pick_strategy = "spin-the-wheel".to_string();
    let err = dt.create(&mut d, Entity::Subnet(s)).unwrap_err();
    assert!(err.to_string().contains("Unknown pick strategy"));
}
