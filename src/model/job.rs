// src/model/job.rs

use serde::{Deserialize, Serialize};

use crate::model::argument::Argument;
use crate::types::{JobId, JobStatus, OutputStream};

/// One captured line of process output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputLine {
    pub stream: OutputStream,
    pub content: String,
}

impl OutputLine {
    pub fn stdout(content: impl Into<String>) -> Self {
        Self {
            stream: OutputStream::Stdout,
            content: content.into(),
        }
    }

    pub fn stderr(content: impl Into<String>) -> Self {
        Self {
            stream: OutputStream::Stderr,
            content: content.into(),
        }
    }
}

/// The user-editable part of a job.
///
/// This is what create/update requests carry; run state is never part of it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct JobDefinition {
    pub name: String,

    /// Executable template (may contain `{{var}}` tokens and fixed flags).
    pub executable: String,

    /// Working directory template; empty means the user's home directory.
    #[serde(default)]
    pub working_directory: String,

    #[serde(default)]
    pub arguments: Vec<Argument>,

    /// Explicitly declared dependencies, in declaration order.
    #[serde(default)]
    pub dependencies: Vec<JobId>,
}

impl JobDefinition {
    pub fn new(name: impl Into<String>, executable: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            executable: executable.into(),
            ..Self::default()
        }
    }

    /// Dependencies inferred from enabled `FromOutput` arguments.
    pub fn implicit_dependencies(&self) -> Vec<JobId> {
        let mut deps: Vec<JobId> = Vec::new();
        for source in self.arguments.iter().filter_map(|a| a.implicit_source()) {
            if !deps.iter().any(|d| d == source) {
                deps.push(source.to_string());
            }
        }
        deps
    }

    /// Explicit ∪ implicit dependencies, explicit first, each once.
    pub fn effective_dependencies(&self) -> Vec<JobId> {
        let mut deps: Vec<JobId> = Vec::new();
        for dep in self
            .dependencies
            .iter()
            .cloned()
            .chain(self.implicit_dependencies())
        {
            if !deps.contains(&dep) {
                deps.push(dep);
            }
        }
        deps
    }
}

/// A job: its definition plus the state left behind by the last run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,

    #[serde(flatten)]
    pub definition: JobDefinition,

    #[serde(default)]
    pub status: JobStatus,

    #[serde(default)]
    pub return_code: Option<i32>,

    /// Captured output of the last run, in arrival order.
    #[serde(default)]
    pub output: Vec<OutputLine>,

    /// The command line materialised for the last run.
    #[serde(default)]
    pub generated_command: String,
}

impl Job {
    pub fn new(id: impl Into<JobId>, definition: JobDefinition) -> Self {
        Self {
            id: id.into(),
            definition,
            status: JobStatus::Idle,
            return_code: None,
            output: Vec::new(),
            generated_command: String::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    /// Display name, falling back to the id for unnamed jobs.
    pub fn label(&self) -> &str {
        if self.definition.name.is_empty() {
            &self.id
        } else {
            &self.definition.name
        }
    }

    pub fn effective_dependencies(&self) -> Vec<JobId> {
        self.definition.effective_dependencies()
    }

    /// Stdout lines of the last run joined with `\n`.
    pub fn captured_stdout(&self) -> String {
        self.output
            .iter()
            .filter(|line| line.stream == OutputStream::Stdout)
            .map(|line| line.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Replace the definition while keeping run state.
    pub fn apply_definition(&mut self, definition: JobDefinition) {
        self.definition = definition;
    }

    /// Drop everything the last run left behind.
    pub fn reset_run_state(&mut self) {
        self.return_code = None;
        self.output.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_dependencies_merge_explicit_and_implicit_without_duplicates() {
        let mut def = JobDefinition::new("deploy", "deploy.sh");
        def.dependencies = vec!["build".into(), "login".into()];
        def.arguments = vec![
            Argument::from_output("--token", "login", "(\\w+)"),
            Argument::from_output("--host", "discover", "(\\S+)"),
            Argument::from_output("--off", "ignored", "x").disabled(),
        ];

        assert_eq!(def.implicit_dependencies(), vec!["login", "discover"]);
        assert_eq!(
            def.effective_dependencies(),
            vec!["build", "login", "discover"]
        );
    }

    #[test]
    fn captured_stdout_skips_stderr_lines() {
        let mut job = Job::new("a", JobDefinition::new("a", "echo"));
        job.output = vec![
            OutputLine::stdout("one"),
            OutputLine::stderr("warning"),
            OutputLine::stdout("two"),
        ];
        assert_eq!(job.captured_stdout(), "one\ntwo");
    }
}
