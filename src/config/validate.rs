// src/config/validate.rs

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::duration::parse_duration;
use crate::config::model::{ConfigFile, ConfigSection, RawConfigFile, Settings};
use crate::errors::{JobdagError, Result};
use crate::invocation::extract;
use crate::model::Variables;
use crate::template::substitute;
use crate::types::JobId;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = JobdagError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        let settings = validate_settings(&raw.config)?;
        let variables: Variables = raw.variables.clone().into();
        ensure_has_jobs(&raw)?;
        validate_jobs(&raw, &variables)?;
        let order = validate_dag(&raw)?;
        Ok(ConfigFile::new_unchecked(settings, variables, raw.job, order))
    }
}

fn ensure_has_jobs(cfg: &RawConfigFile) -> Result<()> {
    if cfg.job.is_empty() {
        return Err(JobdagError::Validation(
            "config must contain at least one [job.<id>] section".to_string(),
        ));
    }
    Ok(())
}

fn duration_field(field: &str, value: &str) -> Result<std::time::Duration> {
    parse_duration(value)
        .map_err(|e| JobdagError::Validation(format!("[config].{field}: {e}")))
}

fn validate_settings(section: &ConfigSection) -> Result<Settings> {
    if section.history_limit == 0 {
        return Err(JobdagError::Validation(
            "[config].history_limit must be >= 1 (got 0)".to_string(),
        ));
    }

    let chain_step_timeout = section
        .chain_step_timeout
        .as_deref()
        .map(|s| duration_field("chain_step_timeout", s))
        .transpose()?;

    Ok(Settings {
        grace_period: duration_field("grace_period", &section.grace_period)?,
        interrupt_grace_period: duration_field(
            "interrupt_grace_period",
            &section.interrupt_grace_period,
        )?,
        interrupt_commands: section.interrupt_commands.clone(),
        store: section.store,
        state_file: section.state_file.clone(),
        chain_step_timeout,
        history_limit: section.history_limit,
    })
}

fn validate_jobs(cfg: &RawConfigFile, variables: &Variables) -> Result<()> {
    for (id, job) in cfg.job.iter() {
        if job.executable.trim().is_empty() {
            return Err(JobdagError::Validation(format!(
                "job '{id}' has an empty executable"
            )));
        }

        for dep in job.after.iter() {
            if dep == id {
                return Err(JobdagError::Validation(format!(
                    "job '{id}' cannot depend on itself in `after`"
                )));
            }
            if !cfg.job.contains_key(dep) {
                return Err(JobdagError::Validation(format!(
                    "job '{id}' has unknown dependency '{dep}' in `after`"
                )));
            }
        }

        for (i, arg) in job.arg.iter().enumerate() {
            let Some(from) = arg.from_output.as_ref() else {
                continue;
            };
            let label = if arg.name.is_empty() {
                format!("{id}.arg{i}")
            } else {
                arg.name.clone()
            };

            if from.job == *id {
                return Err(JobdagError::Validation(format!(
                    "argument '{label}' of job '{id}' cannot read its own output"
                )));
            }
            if !cfg.job.contains_key(&from.job) {
                return Err(JobdagError::Validation(format!(
                    "argument '{label}' of job '{id}' reads output of unknown job '{}'",
                    from.job
                )));
            }
            if from.regex.is_empty() {
                return Err(JobdagError::Validation(format!(
                    "argument '{label}' of job '{id}' has an empty regex"
                )));
            }

            // Patterns that still reference unknown variables are checked
            // when the job runs.
            let pattern = substitute(&from.regex, variables);
            if !pattern.contains("{{") {
                extract::compile(&label, &pattern)?;
            }
        }
    }
    Ok(())
}

/// Topological order over explicit and implicit edges. Fails on cycles.
fn validate_dag(cfg: &RawConfigFile) -> Result<Vec<JobId>> {
    // Edge direction: dep -> job.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for id in cfg.job.keys() {
        graph.add_node(id.as_str());
    }

    for (id, job) in cfg.job.iter() {
        for dep in job.after.iter().map(String::as_str).chain(job.output_sources()) {
            graph.add_edge(dep, id.as_str(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(order) => Ok(order.into_iter().map(str::to_string).collect()),
        Err(cycle) => {
            let node = cycle.node_id();
            Err(JobdagError::Validation(format!(
                "cycle detected in job graph involving job '{node}'"
            )))
        }
    }
}
