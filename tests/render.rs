//! Template renderer scenarios.

mod common;

use anvil::models::{prefix, Entity, TemplateInfo};
use anvil::tracker::DataTracker;
use common::*;

fn vfs_body(dt: &DataTracker, path: &str) -> Option<String> {
    dt.services()
        .vfs
        .open(path)
        .map(|b| String::from_utf8(b).unwrap())
}

const INCLUDED: &str = r#"Machine:
Name = {{.Machine.Name}}
HexAddress = {{.Machine.HexAddress}}
ShortName = {{.Machine.ShortName}}
FooParam = {{.Param "foo"}}"#;

const MAIN: &str = r#"{{template "included" .}}

BootEnv:
Name = {{.Env.Name}}

{{if .ParamExists "fred"}}{{.Param "fred"}}{{end}}
BootParams = {{.BootParams}}"#;

fn seed_render_world(dt: &DataTracker) -> anvil::models::Machine {
    let mut d = dt.lock_all();
    dt.save(&mut d, Entity::Profile(profile("global", "foo", "bar")))
        .unwrap();
    dt.create(&mut d, Entity::Template(template("included", INCLUDED)))
        .unwrap();
    dt.create(&mut d, Entity::Template(template("main", MAIN)))
        .unwrap();
    dt.create(&mut d, Entity::BootEnv(bootenv("default", "main")))
        .unwrap();
    dt.create(&mut d, Entity::Machine(machine("Test Name", "default")))
        .unwrap()
        .into_machine()
        .unwrap()
}

#[test]
fn machine_save_renders_its_artifacts_into_the_vfs() {
    let dt = mk_tracker();
    let m = seed_render_world(&dt);
    assert!(m.validation.available);

    let body = vfs_body(&dt, &format!("/machines/{}/file", m.uuid)).unwrap();
    let expected = format!(
        "Machine:\nName = Test Name\nHexAddress = C0A87C0B\nShortName = Test Name\nFooParam = bar\n\nBootEnv:\nName = default\n\n\nBootParams = default"
    );
    assert_eq!(body, expected);
}

/// Scenario: the global profile supplies `test=foreal`; profile `test`
/// supplies `test=fred`. Without the profile the machine renders the
/// global value; with it, the profile value.
#[test]
fn parameter_resolution_prefers_profiles_over_global() {
    let dt = mk_tracker();
    let mut d = dt.lock_all();
    dt.save(&mut d, Entity::Profile(profile("global", "test", "foreal")))
        .unwrap();
    dt.create(&mut d, Entity::Profile(profile("test", "test", "fred")))
        .unwrap();
    dt.create(&mut d, Entity::Template(template("show", "{{.Param \"test\"}}")))
        .unwrap();
    dt.create(&mut d, Entity::BootEnv(bootenv("env", "show")))
        .unwrap();
    let m = dt
        .create(&mut d, Entity::Machine(machine("param.example.com", "env")))
        .unwrap()
        .into_machine()
        .unwrap();
    drop(d);

    let path = format!("/machines/{}/file", m.uuid);
    assert_eq!(vfs_body(&dt, &path).unwrap(), "foreal");

    let mut with_profile = m.clone();
    with_profile.profiles.push("test".to_string());
    let mut d = dt.lock_all();
    dt.save(&mut d, Entity::Machine(with_profile)).unwrap();
    drop(d);
    assert_eq!(vfs_body(&dt, &path).unwrap(), "fred");
}

#[test]
fn machine_params_beat_profiles() {
    let dt = mk_tracker();
    let mut d = dt.lock_all();
    dt.save(&mut d, Entity::Profile(profile("global", "test", "foreal")))
        .unwrap();
    dt.create(&mut d, Entity::Template(template("show", "{{.Param \"test\"}}")))
        .unwrap();
    dt.create(&mut d, Entity::BootEnv(bootenv("env", "show")))
        .unwrap();
    let mut m = machine("local.example.com", "env");
    m.params
        .insert("test".to_string(), serde_json::json!("machine-local"));
    let m = dt
        .create(&mut d, Entity::Machine(m))
        .unwrap()
        .into_machine()
        .unwrap();
    drop(d);
    assert_eq!(
        vfs_body(&dt, &format!("/machines/{}/file", m.uuid)).unwrap(),
        "machine-local"
    );
}

#[test]
fn param_defaults_are_the_last_resort() {
    let dt = mk_tracker();
    let mut d = dt.lock_all();
    dt.create(
        &mut d,
        Entity::Param(anvil::models::Param {
            name: "test".to_string(),
            schema: serde_json::json!({"type": "string", "default": "fallback"}),
            ..Default::default()
        }),
    )
    .unwrap();
    dt.create(&mut d, Entity::Template(template("show", "{{.Param \"test\"}}")))
        .unwrap();
    dt.create(&mut d, Entity::BootEnv(bootenv("env", "show")))
        .unwrap();
    let m = dt
        .create(&mut d, Entity::Machine(machine("d.example.com", "env")))
        .unwrap()
        .into_machine()
        .unwrap();
    drop(d);
    assert_eq!(
        vfs_body(&dt, &format!("/machines/{}/file", m.uuid)).unwrap(),
        "fallback"
    );
}

#[test]
fn missing_required_params_degrade_the_machine() {
    let dt = mk_tracker();
    let mut d = dt.lock_all();
    dt.create(&mut d, Entity::Template(template("t", "{{.Param \"need\"}}")))
        .unwrap();
    let mut env = bootenv("strict", "t");
    env.required_params.push("need".to_string());
    dt.create(&mut d, Entity::BootEnv(env)).unwrap();
    let m = dt
        .create(&mut d, Entity::Machine(machine("incomplete.example.com", "strict")))
        .unwrap()
        .into_machine()
        .unwrap();
    assert!(!m.validation.available);
    assert!(m
        .validation
        .errors
        .iter()
        .any(|e| e.contains("missing required machine params")));
    drop(d);
    assert!(vfs_body(&dt, &format!("/machines/{}/file", m.uuid)).is_none());
}

#[test]
fn bootenv_change_swaps_the_rendered_set() {
    let dt = mk_tracker();
    let mut d = dt.lock_all();
    dt.create(&mut d, Entity::Template(template("one", "first")))
        .unwrap();
    dt.create(&mut d, Entity::Template(template("two", "second")))
        .unwrap();
    dt.create(&mut d, Entity::BootEnv(bootenv("env-one", "one")))
        .unwrap();
    let mut env2 = bootenv("env-two", "two");
    env2.templates[0].path = "machines/{{.Machine.UUID}}/other".to_string();
    dt.create(&mut d, Entity::BootEnv(env2)).unwrap();

    let m = dt
        .create(&mut d, Entity::Machine(machine("swap.example.com", "env-one")))
        .unwrap()
        .into_machine()
        .unwrap();
    drop(d);
    let first_path = format!("/machines/{}/file", m.uuid);
    let second_path = format!("/machines/{}/other", m.uuid);
    assert_eq!(vfs_body(&dt, &first_path).unwrap(), "first");
    assert!(vfs_body(&dt, &second_path).is_none());

    let mut moved = m.clone();
    moved.boot_env = "env-two".to_string();
    let mut d = dt.lock_all();
    dt.save(&mut d, Entity::Machine(moved)).unwrap();
    drop(d);
    assert!(vfs_body(&dt, &first_path).is_none());
    assert_eq!(vfs_body(&dt, &second_path).unwrap(), "second");
}

#[test]
fn machine_delete_deregisters_everything() {
    let dt = mk_tracker();
    let m = seed_render_world(&dt);
    let path = format!("/machines/{}/file", m.uuid);
    assert!(vfs_body(&dt, &path).is_some());

    let mut d = dt.lock_all();
    let ent = dt.fetch_one(&d, prefix::MACHINES, &m.key()).unwrap();
    dt.remove(&mut d, &ent).unwrap();
    drop(d);
    assert!(vfs_body(&dt, &path).is_none());
    assert!(dt.services().vfs.is_empty());
}

#[test]
fn reregistration_is_idempotent() {
    let dt = mk_tracker();
    let m = seed_render_world(&dt);
    let before = dt.services().vfs.paths();
    let body_before = vfs_body(&dt, &before[0]);

    // Saving the machine again re-renders and re-registers.
    let mut d = dt.lock_all();
    let ent = dt.fetch_one(&d, prefix::MACHINES, &m.key()).unwrap();
    dt.save(&mut d, ent).unwrap();
    drop(d);

    assert_eq!(dt.services().vfs.paths(), before);
    assert_eq!(vfs_body(&dt, &before[0]), body_before);
}

#[test]
fn job_actions_render_placed_and_executed_entries() {
    let dt = mk_tracker();
    let m = seed_render_world(&dt);
    let mut d = dt.lock_all();
    dt.create(&mut d, Entity::Template(template("wipe", "wipefs -a {{.Param \"disk\"}}")))
        .unwrap();
    dt.create(
        &mut d,
        Entity::Task(anvil::models::Task {
            name: "drive-wipe".to_string(),
            templates: vec![
                TemplateInfo {
                    name: "script".to_string(),
                    id: "wipe".to_string(),
                    path: String::new(),
                },
                TemplateInfo {
                    name: "marker".to_string(),
                    id: "wipe".to_string(),
                    path: "machines/{{.Machine.UUID}}/wiped".to_string(),
                },
            ],
            ..Default::default()
        }),
    )
    .unwrap();

    let mut with_param = m.clone();
    with_param
        .params
        .insert("disk".to_string(), serde_json::json!("/dev/sda"));
    dt.save(&mut d, Entity::Machine(with_param)).unwrap();

    let job = anvil::models::Job {
        uuid: uuid::Uuid::new_v4(),
        machine: m.uuid,
        task: "drive-wipe".to_string(),
        boot_env: "default".to_string(),
        ..Default::default()
    };
    let actions =
        anvil::models::job::render_actions(&job, &d, dt.services()).unwrap();
    assert_eq!(actions.len(), 2);
    assert_eq!(actions[0].name, "script");
    assert!(actions[0].path.is_empty());
    assert_eq!(actions[0].content, "wipefs -a /dev/sda");
    assert_eq!(actions[1].name, "marker");
    assert_eq!(actions[1].path, format!("machines/{}/wiped", m.uuid));
}

#[test]
fn multi_entry_bootenvs_render_every_artifact() {
    let dt = mk_tracker();
    let mut d = dt.lock_all();
    dt.create(&mut d, Entity::Template(template("cfg", "config for {{.Machine.ShortName}}")))
        .unwrap();
    dt.create(&mut d, Entity::Template(template("boot", "boot for {{.Machine.ShortName}}")))
        .unwrap();
    let mut env = bootenv("multi", "cfg");
    env.templates.push(TemplateInfo {
        name: "boot".to_string(),
        id: "boot".to_string(),
        path: "machines/{{.Machine.UUID}}/boot".to_string(),
    });
    dt.create(&mut d, Entity::BootEnv(env)).unwrap();
    let m = dt
        .create(&mut d, Entity::Machine(machine("multi.example.com", "multi")))
        .unwrap()
        .into_machine()
        .unwrap();
    drop(d);
    assert_eq!(
        vfs_body(&dt, &format!("/machines/{}/file", m.uuid)).unwrap(),
        "config for multi"
    );
    assert_eq!(
        vfs_body(&dt, &format!("/machines/{}/boot", m.uuid)).unwrap(),
        "boot for multi"
    );
}
