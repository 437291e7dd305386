//! Per-machine template rendering.
//!
//! Rendering takes a machine and its chosen BootEnv (or a Task) and
//! materialises the owned template entries: each entry's path is
//! itself a template, executed against the same data as the body. The
//! results land in the [`vfs::VirtualFs`] so the TFTP and static-HTTP
//! collaborators serve exactly what was rendered.

pub mod template;
pub mod vfs;

use crate::core::error::{ModelError, TEMPLATE_RENDER_ERROR};
use crate::models::{prefix, BootEnv, Machine, Task, TemplateInfo, GLOBAL_PROFILE};
use crate::tracker::locks::LockedStores;
use crate::tracker::Services;
use self::template::{Arg, Compiled, Context, TplValue};
use serde_json::Value;

/// One materialised artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedTemplate {
    /// Rooted path in the virtual filesystem.
    pub path: String,
    /// Rendered body.
    pub body: String,
}

/// The parameter and helper bundle handed to template execution.
pub struct RenderData<'a, 't> {
    machine: Option<&'a Machine>,
    env: Option<&'a BootEnv>,
    d: &'a LockedStores<'t>,
    svc: &'a Services,
}

impl<'a, 't> RenderData<'a, 't> {
    /// Build render data for a machine/env pair. Either side may be
    /// absent; helpers that need the missing side fail at execution.
    pub fn new(
        d: &'a LockedStores<'t>,
        svc: &'a Services,
        machine: Option<&'a Machine>,
        env: Option<&'a BootEnv>,
    ) -> Self {
        Self {
            machine,
            env,
            d,
            svc,
        }
    }

    /// Parameter resolution: machine params, then the machine's
    /// profiles in order, then the global profile, then the Param's
    /// declared default.
    pub fn param(&self, key: &str) -> Option<Value> {
        if let Some(m) = self.machine {
            if let Some(v) = m.params.get(key) {
                return Some(v.clone());
            }
            for pname in &m.profiles {
                if let Some(v) = self
                    .d
                    .store(prefix::PROFILES)
                    .find(pname)
                    .and_then(|e| e.as_profile())
                    .and_then(|p| p.get_param(key))
                {
                    return Some(v.clone());
                }
            }
        }
        if let Some(v) = self
            .d
            .store(prefix::PROFILES)
            .find(GLOBAL_PROFILE)
            .and_then(|e| e.as_profile())
            .and_then(|p| p.get_param(key))
        {
            return Some(v.clone());
        }
        self.d
            .store(prefix::PARAMS)
            .find(key)
            .and_then(|e| e.as_param())
            .and_then(|p| p.default_value())
            .cloned()
    }

    /// Whether [`RenderData::param`] would resolve.
    pub fn param_exists(&self, key: &str) -> bool {
        self.param(key).is_some()
    }

    /// Scheme, host, or path of a URL.
    pub fn parse_url(&self, segment: &str, raw: &str) -> Result<String, String> {
        let rest = raw
            .split_once("://")
            .ok_or_else(|| format!("parse {raw}: missing scheme"))?;
        let (scheme, tail) = rest;
        if tail.contains('%') {
            // Reject the malformed escapes templates historically hit.
            let bytes = tail.as_bytes();
            for (i, b) in bytes.iter().enumerate() {
                if *b == b'%'
                    && !(bytes.get(i + 1).is_some_and(u8::is_ascii_hexdigit)
                        && bytes.get(i + 2).is_some_and(u8::is_ascii_hexdigit))
                {
                    return Err(format!("parse {raw}: invalid URL escape"));
                }
            }
        }
        let (host, path) = match tail.find('/') {
            Some(i) => (&tail[..i], &tail[i..]),
            None => (tail, ""),
        };
        match segment {
            "scheme" => Ok(scheme.to_string()),
            "host" => Ok(host.to_string()),
            "path" => Ok(path.to_string()),
            other => Err(format!("No idea how to get URL part {other} from {raw}")),
        }
    }

    /// Expand the BootEnv's boot-parameter template.
    pub fn boot_params(&self) -> Result<String, String> {
        let env = self.env.ok_or("BootParams requires a boot environment")?;
        let tmpl = template::parse(&env.boot_params).map_err(|e| e.to_string())?;
        tmpl.execute(self).map_err(|e| e.to_string())
    }

    /// Issue a bearer token scoped to this machine, or to machine
    /// registration when rendering for an unknown machine.
    pub fn generate_token(&self) -> String {
        match self.machine {
            Some(m) => self.svc.tokens.known_machine_token(m.uuid),
            None => self.svc.tokens.unknown_machine_token(),
        }
    }

    fn machine_field(&self, field: &str) -> Result<TplValue, String> {
        let m = self.machine.ok_or("no machine in render data")?;
        Ok(match field {
            "Name" => TplValue::Str(m.name.clone()),
            "UUID" | "Uuid" => TplValue::Str(m.uuid.to_string()),
            "Address" => TplValue::Str(
                m.address.map(|a| a.to_string()).unwrap_or_default(),
            ),
            "HexAddress" => TplValue::Str(m.hex_address()),
            "ShortName" => TplValue::Str(m.short_name().to_string()),
            "Path" => TplValue::Str(m.path()),
            other => return Err(format!("unknown machine field {other}")),
        })
    }

    fn env_field(&self, field: &str, args: &[Arg]) -> Result<TplValue, String> {
        let env = self.env.ok_or("no boot environment in render data")?;
        Ok(match (field, args) {
            ("Name", _) => TplValue::Str(env.name.clone()),
            ("Kernel", _) => TplValue::Str(env.kernel.clone()),
            ("PathFor", [Arg::Str(proto), Arg::Str(file)]) => {
                TplValue::Str(env.path_for(proto, file, &self.svc.file_url))
            }
            ("JoinInitrds", [Arg::Str(proto)]) => {
                TplValue::Str(env.join_initrds(proto, &self.svc.file_url))
            }
            (other, _) => return Err(format!("unknown env field {other}")),
        })
    }
}

impl Context for RenderData<'_, '_> {
    fn call(&self, path: &[String], args: &[Arg]) -> Result<TplValue, String> {
        match path[0].as_str() {
            "Machine" => match path.get(1) {
                Some(f) => self.machine_field(f),
                None => Err("Machine needs a field".to_string()),
            },
            "Env" => match path.get(1) {
                Some(f) => self.env_field(f, args),
                None => Err("Env needs a field".to_string()),
            },
            "Param" => match args {
                [Arg::Str(k)] => self
                    .param(k)
                    .map(TplValue::Json)
                    .ok_or_else(|| format!("No such machine parameter {k}")),
                _ => Err("Param takes one string argument".to_string()),
            },
            "ParamExists" => match args {
                [Arg::Str(k)] => Ok(TplValue::Bool(self.param_exists(k))),
                _ => Err("ParamExists takes one string argument".to_string()),
            },
            "ParseUrl" => match args {
                [Arg::Str(seg), Arg::Str(raw)] => {
                    self.parse_url(seg, raw).map(TplValue::Str)
                }
                _ => Err("ParseUrl takes a segment and a URL".to_string()),
            },
            "BootParams" => self.boot_params().map(TplValue::Str),
            "GenerateToken" => Ok(TplValue::Str(self.generate_token())),
            "ProvisionerAddress" | "DataTrackerAddress" => {
                Ok(TplValue::Str(self.svc.our_address.clone()))
            }
            "ProvisionerURL" | "DataTrackerURL" => {
                Ok(TplValue::Str(self.svc.file_url.clone()))
            }
            "ApiURL" => Ok(TplValue::Str(self.svc.api_url.clone())),
            "CommandURL" => Ok(TplValue::Str(self.svc.command_url.clone())),
            other => Err(format!("unknown render helper {other}")),
        }
    }

    fn include(&self, id: &str) -> Result<Compiled, String> {
        let tmpl = self
            .d
            .store(prefix::TEMPLATES)
            .find(id)
            .and_then(|e| e.as_template())
            .ok_or_else(|| format!("Template does not exist: {id}"))?;
        template::parse(&tmpl.contents).map_err(|e| e.to_string())
    }
}

/// Render one set of template entries against prepared render data.
fn render_entries(
    rd: &RenderData<'_, '_>,
    entries: &[TemplateInfo],
    required: &[String],
    owner: &str,
    e: &mut ModelError,
) -> Vec<RenderedTemplate> {
    let missing: Vec<&String> = required.iter().filter(|p| !rd.param_exists(p)).collect();
    if !missing.is_empty() {
        e.errorf(format!(
            "missing required machine params for {owner}:\n {missing:?}"
        ));
        return Vec::new();
    }

    let mut out = Vec::new();
    for ti in entries {
        let body = match rd.include(&ti.id) {
            Ok(tmpl) => match tmpl.execute(rd) {
                Ok(b) => b,
                Err(err) => {
                    e.errorf(format!("Error rendering template {}: {err}", ti.id));
                    continue;
                }
            },
            Err(err) => {
                e.errorf(err);
                continue;
            }
        };
        let path = if ti.path.is_empty() {
            String::new()
        } else {
            let path_tmpl = match template::parse(&ti.path) {
                Ok(t) => t,
                Err(err) => {
                    e.errorf(format!(
                        "Error rendering template {} path {}: {err}",
                        ti.name, ti.path
                    ));
                    continue;
                }
            };
            match path_tmpl.execute(rd) {
                Ok(p) => format!("/{}", p.trim_start_matches('/')),
                Err(err) => {
                    e.errorf(format!(
                        "Error rendering template {} path {}: {err}",
                        ti.name, ti.path
                    ));
                    continue;
                }
            }
        };
        out.push(RenderedTemplate { path, body });
    }
    out
}

/// Render every artifact a machine's BootEnv owns.
///
/// The lock set must cover bootenvs, params, profiles, and templates.
pub fn render_machine(
    d: &LockedStores<'_>,
    svc: &Services,
    machine: &Machine,
    env: &BootEnv,
) -> Result<Vec<RenderedTemplate>, ModelError> {
    let mut e = ModelError::new(TEMPLATE_RENDER_ERROR, 422, prefix::MACHINES, &machine.key());
    let rd = RenderData::new(d, svc, Some(machine), Some(env));
    let out = render_entries(&rd, &env.templates, &env.required_params, &machine.name, &mut e);
    e.or_ok()?;
    Ok(out)
}

/// Render a task's actions for a job's machine.
pub fn render_task(
    d: &LockedStores<'_>,
    svc: &Services,
    machine: &Machine,
    env: Option<&BootEnv>,
    task: &Task,
) -> Result<Vec<crate::models::JobAction>, ModelError> {
    let mut e = ModelError::new(TEMPLATE_RENDER_ERROR, 422, prefix::TASKS, &task.name);
    let rd = RenderData::new(d, svc, Some(machine), env);
    let rendered = render_entries(&rd, &task.templates, &task.required_params, &task.name, &mut e);
    e.or_ok()?;
    Ok(task
        .templates
        .iter()
        .zip(rendered)
        .map(|(ti, rt)| crate::models::JobAction {
            name: ti.name.clone(),
            path: rt.path.trim_start_matches('/').to_string(),
            content: rt.body,
        })
        .collect())
}

/// Put a machine's rendered set into the virtual filesystem.
pub fn register_rendered(
    fs: &vfs::VirtualFs,
    machine: &Machine,
    env_name: &str,
    set: &[RenderedTemplate],
) {
    for rt in set {
        if !rt.path.is_empty() {
            fs.register(machine.uuid, env_name, &rt.path, rt.body.as_bytes().to_vec());
        }
    }
}
