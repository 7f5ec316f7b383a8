// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::model::{Argument, ArgumentSource, JobDefinition, Variables};
use crate::store::file::STATE_FILE_PATH;
use crate::store::DEFAULT_HISTORY_LIMIT;
use crate::types::{JobId, StoreMode};

/// Job file as read from TOML, before validation.
///
/// ```toml
/// [config]
/// grace_period = "2s"
/// interrupt_commands = ["ping"]
///
/// [variables]
/// host = "example.org"
///
/// [job.login]
/// executable = "./login.sh"
///
/// [job.fetch]
/// executable = "curl"
/// after = ["login"]
///
/// [[job.fetch.arg]]
/// name = "-H"
/// from_output = { job = "login", regex = "token: (\\w+)" }
///
/// [[job.fetch.arg]]
/// value = "https://{{host}}/api"
/// positional = true
/// ```
///
/// All sections are optional apart from at least one job.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfigFile {
    #[serde(default)]
    pub config: ConfigSection,

    #[serde(default)]
    pub variables: BTreeMap<String, String>,

    /// Jobs from `[job.<id>]`, keyed by job id.
    #[serde(default)]
    pub job: BTreeMap<JobId, JobConfig>,
}

/// Validated job file.
///
/// Only constructed through `TryFrom<RawConfigFile>` (see `validate.rs`),
/// so durations are parsed, references resolve and the graph is acyclic.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub settings: Settings,
    pub variables: Variables,
    pub jobs: BTreeMap<JobId, JobConfig>,
    /// Job ids with every dependency before its dependents.
    pub order: Vec<JobId>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        settings: Settings,
        variables: Variables,
        jobs: BTreeMap<JobId, JobConfig>,
        order: Vec<JobId>,
    ) -> Self {
        Self {
            settings,
            variables,
            jobs,
            order,
        }
    }

    /// Definitions in dependency order.
    pub fn definitions(&self) -> Vec<(JobId, JobDefinition)> {
        self.order
            .iter()
            .filter_map(|id| self.jobs.get(id).map(|job| (id.clone(), job.to_definition(id))))
            .collect()
    }
}

/// `[config]` section as written.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigSection {
    /// Time between SIGTERM and SIGKILL.
    #[serde(default = "default_grace_period")]
    pub grace_period: String,

    /// Time between SIGINT and SIGKILL for `interrupt_commands`.
    #[serde(default = "default_interrupt_grace_period")]
    pub interrupt_grace_period: String,

    /// Executables that are stopped with SIGINT (they print a summary on
    /// interrupt) and get the longer grace period.
    #[serde(default = "default_interrupt_commands")]
    pub interrupt_commands: Vec<String>,

    #[serde(default)]
    pub store: StoreMode,

    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,

    /// Optional upper bound on how long a chain waits for one job.
    #[serde(default)]
    pub chain_step_timeout: Option<String>,

    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

fn default_grace_period() -> String {
    "2s".to_string()
}

fn default_interrupt_grace_period() -> String {
    "30s".to_string()
}

fn default_interrupt_commands() -> Vec<String> {
    vec!["ping".to_string()]
}

fn default_state_file() -> PathBuf {
    PathBuf::from(STATE_FILE_PATH)
}

fn default_history_limit() -> usize {
    DEFAULT_HISTORY_LIMIT
}

impl Default for ConfigSection {
    fn default() -> Self {
        Self {
            grace_period: default_grace_period(),
            interrupt_grace_period: default_interrupt_grace_period(),
            interrupt_commands: default_interrupt_commands(),
            store: StoreMode::default(),
            state_file: default_state_file(),
            chain_step_timeout: None,
            history_limit: default_history_limit(),
        }
    }
}

/// Typed `[config]` values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub grace_period: Duration,
    pub interrupt_grace_period: Duration,
    pub interrupt_commands: Vec<String>,
    pub store: StoreMode,
    pub state_file: PathBuf,
    pub chain_step_timeout: Option<Duration>,
    pub history_limit: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(2),
            interrupt_grace_period: Duration::from_secs(30),
            interrupt_commands: default_interrupt_commands(),
            store: StoreMode::default(),
            state_file: default_state_file(),
            chain_step_timeout: None,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

/// `[job.<id>]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobConfig {
    /// Display name; defaults to the job id.
    #[serde(default)]
    pub name: Option<String>,

    pub executable: String,

    #[serde(default)]
    pub working_directory: String,

    /// Explicit dependencies.
    #[serde(default)]
    pub after: Vec<JobId>,

    /// `[[job.<id>.arg]]` entries, in argv order.
    #[serde(default)]
    pub arg: Vec<ArgConfig>,
}

impl JobConfig {
    pub fn new(executable: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
            ..Self::default()
        }
    }

    /// Ids of jobs referenced by enabled `from_output` arguments.
    pub fn output_sources(&self) -> impl Iterator<Item = &str> {
        self.arg
            .iter()
            .filter(|a| a.enabled)
            .filter_map(|a| a.from_output.as_ref().map(|f| f.job.as_str()))
    }

    /// Argument ids are derived from the position so re-reading the file
    /// keeps them (and their history) stable.
    pub fn to_definition(&self, id: &str) -> JobDefinition {
        let arguments = self
            .arg
            .iter()
            .enumerate()
            .map(|(i, a)| a.to_argument(format!("{id}.arg{i}")))
            .collect();

        JobDefinition {
            name: self.name.clone().unwrap_or_else(|| id.to_string()),
            executable: self.executable.clone(),
            working_directory: self.working_directory.clone(),
            arguments,
            dependencies: self.after.clone(),
        }
    }
}

/// `[[job.<id>.arg]]` entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArgConfig {
    #[serde(default)]
    pub name: String,

    /// Ignored when `from_output` is set.
    #[serde(default)]
    pub value: String,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub positional: bool,

    #[serde(default)]
    pub joiner: Option<String>,

    #[serde(default)]
    pub from_output: Option<FromOutputConfig>,
}

fn default_true() -> bool {
    true
}

impl Default for ArgConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            value: String::new(),
            enabled: true,
            positional: false,
            joiner: None,
            from_output: None,
        }
    }
}

impl ArgConfig {
    fn to_argument(&self, id: String) -> Argument {
        let source = match &self.from_output {
            Some(f) => ArgumentSource::FromOutput {
                source_job: f.job.clone(),
                regex: f.regex.clone(),
            },
            None => ArgumentSource::Literal {
                value: self.value.clone(),
            },
        };
        Argument {
            id,
            name: self.name.clone(),
            source,
            enabled: self.enabled,
            positional: self.positional,
            joiner: self
                .joiner
                .clone()
                .unwrap_or_else(crate::model::argument::default_joiner),
        }
    }
}

/// `from_output = { job = "...", regex = "..." }`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FromOutputConfig {
    pub job: JobId,
    pub regex: String,
}
