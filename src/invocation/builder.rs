// src/invocation/builder.rs

use std::collections::HashMap;

use serde::Serialize;
use tracing::debug;

use crate::errors::{JobdagError, Result};
use crate::invocation::extract;
use crate::model::{Argument, ArgumentSource, Job, Variables};
use crate::template::substitute;
use crate::types::{JobId, JobStatus};

/// Snapshot of all jobs, keyed by id, as seen by the builder.
pub type JobTable = HashMap<JobId, Job>;

/// The value one enabled argument resolved to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedArgument {
    pub argument_id: String,
    pub name: String,
    pub value: String,
    pub from_output: bool,
}

/// A value to be recorded in argument history once the run goes ahead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    pub job_id: JobId,
    pub argument_name: String,
    pub value: String,
}

/// Fully materialised invocation of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Invocation {
    pub command_line: String,
    /// Substituted working directory; empty when the job has none.
    pub working_directory: String,
    pub values: Vec<ResolvedArgument>,
    pub history: Vec<HistoryEntry>,
}

/// Build the command line for `job`.
///
/// Pure: the result depends only on the job definition, the state of the
/// jobs in `jobs`, and `variables`. Any failure aborts the whole build, so a
/// partial command line is never produced. History is returned rather than
/// written so the caller decides when the run actually goes ahead.
pub fn build(job: &Job, jobs: &JobTable, variables: &Variables) -> Result<Invocation> {
    let executable = substitute(&job.definition.executable, variables);
    if executable.trim().is_empty() {
        return Err(JobdagError::Validation(format!(
            "job '{}' has no executable",
            job.label()
        )));
    }

    ensure_dependencies_succeeded(job, jobs)?;

    let working_directory = substitute(&job.definition.working_directory, variables);

    let mut tokens: Vec<String> = Vec::new();
    let mut values: Vec<ResolvedArgument> = Vec::new();
    let mut history: Vec<HistoryEntry> = Vec::new();

    for arg in job.definition.arguments.iter().filter(|a| a.enabled) {
        let name = substitute(&arg.name, variables);

        let value = match &arg.source {
            ArgumentSource::Literal { value } => {
                let value = substitute(value, variables);
                if !value.is_empty() {
                    history.push(HistoryEntry {
                        job_id: job.id.clone(),
                        argument_name: name.clone(),
                        value: value.clone(),
                    });
                }
                value
            }
            ArgumentSource::FromOutput { source_job, regex } => resolve_from_output(
                job,
                &name,
                source_job,
                &substitute(regex, variables),
                jobs,
            )?,
        };

        if let Some(token) = render_token(arg, &name, &value) {
            tokens.push(token);
        }

        values.push(ResolvedArgument {
            argument_id: arg.id.clone(),
            name,
            value,
            from_output: arg.is_from_output(),
        });
    }

    let command_line = if tokens.is_empty() {
        executable
    } else {
        format!("{} {}", executable, tokens.join(" "))
    };

    debug!(job = %job.id, command = %command_line, "built invocation");

    Ok(Invocation {
        command_line,
        working_directory,
        values,
        history,
    })
}

/// Every effective dependency must exist and have last finished with
/// `success`.
fn ensure_dependencies_succeeded(job: &Job, jobs: &JobTable) -> Result<()> {
    for dep in job.effective_dependencies() {
        match jobs.get(&dep) {
            Some(dep_job) if dep_job.status == JobStatus::Success => {}
            Some(dep_job) => {
                return Err(JobdagError::DependencyNotSatisfied {
                    job: job.id.clone(),
                    dependency: dep_job.label().to_string(),
                });
            }
            None => {
                return Err(JobdagError::Validation(format!(
                    "dependency '{}' of job '{}' not found",
                    dep,
                    job.label()
                )));
            }
        }
    }
    Ok(())
}

fn resolve_from_output(
    job: &Job,
    argument: &str,
    source_job: &str,
    regex: &str,
    jobs: &JobTable,
) -> Result<String> {
    if source_job.is_empty() {
        return Err(JobdagError::Validation(format!(
            "argument '{argument}' is missing a source job"
        )));
    }

    let source = jobs.get(source_job).ok_or_else(|| {
        JobdagError::Validation(format!(
            "source job '{source_job}' of argument '{argument}' not found"
        ))
    })?;

    if source.status != JobStatus::Success {
        return Err(JobdagError::DependencyNotSatisfied {
            job: job.id.clone(),
            dependency: source.label().to_string(),
        });
    }

    if regex.is_empty() {
        return Err(JobdagError::Validation(format!(
            "argument '{argument}' is missing a regex pattern"
        )));
    }

    let re = extract::compile(argument, regex)?;
    extract::extract(&re, &source.captured_stdout()).ok_or_else(|| JobdagError::Extraction {
        argument: argument.to_string(),
        source_job: source.label().to_string(),
    })
}

/// Positional: value only (nothing when empty). Named: `name` alone when the
/// value is empty, otherwise `name + joiner + value`.
fn render_token(arg: &Argument, name: &str, value: &str) -> Option<String> {
    if arg.positional {
        return (!value.is_empty()).then(|| value.to_string());
    }
    if value.is_empty() {
        (!name.is_empty()).then(|| name.to_string())
    } else {
        Some(format!("{}{}{}", name, arg.joiner, value))
    }
}
