#![allow(dead_code)]

use jobdag::config::{
    ArgConfig, ConfigFile, ConfigSection, FromOutputConfig, JobConfig, RawConfigFile,
};
use jobdag::model::{Argument, Job, JobDefinition, OutputLine};
use jobdag::types::{JobId, JobStatus, StoreMode};

/// Builder for `Job` values (definition plus run state).
pub struct JobBuilder {
    id: JobId,
    definition: JobDefinition,
    status: JobStatus,
    return_code: Option<i32>,
    output: Vec<OutputLine>,
}

impl JobBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            definition: JobDefinition::new(id, "true"),
            status: JobStatus::Idle,
            return_code: None,
            output: Vec::new(),
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.definition.name = name.to_string();
        self
    }

    pub fn executable(mut self, executable: &str) -> Self {
        self.definition.executable = executable.to_string();
        self
    }

    pub fn working_directory(mut self, dir: &str) -> Self {
        self.definition.working_directory = dir.to_string();
        self
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.definition.dependencies.push(dep.to_string());
        self
    }

    pub fn arg(mut self, arg: Argument) -> Self {
        self.definition.arguments.push(arg);
        self
    }

    pub fn status(mut self, status: JobStatus) -> Self {
        self.status = status;
        self
    }

    pub fn return_code(mut self, code: i32) -> Self {
        self.return_code = Some(code);
        self
    }

    pub fn stdout(mut self, line: &str) -> Self {
        self.output.push(OutputLine::stdout(line));
        self
    }

    pub fn stderr(mut self, line: &str) -> Self {
        self.output.push(OutputLine::stderr(line));
        self
    }

    pub fn definition(self) -> JobDefinition {
        self.definition
    }

    pub fn build(self) -> Job {
        let mut job = Job::new(self.id, self.definition);
        job.status = self.status;
        job.return_code = self.return_code;
        job.output = self.output;
        job
    }
}

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile {
                config: ConfigSection {
                    store: StoreMode::Memory,
                    ..ConfigSection::default()
                },
                ..RawConfigFile::default()
            },
        }
    }

    pub fn with_job(mut self, id: &str, job: JobConfig) -> Self {
        self.config.job.insert(id.to_string(), job);
        self
    }

    pub fn with_variable(mut self, name: &str, value: &str) -> Self {
        self.config
            .variables
            .insert(name.to_string(), value.to_string());
        self
    }

    pub fn grace_period(mut self, value: &str) -> Self {
        self.config.config.grace_period = value.to_string();
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `JobConfig`.
pub struct JobConfigBuilder {
    job: JobConfig,
}

impl JobConfigBuilder {
    pub fn new(executable: &str) -> Self {
        Self {
            job: JobConfig::new(executable),
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.job.name = Some(name.to_string());
        self
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.job.after.push(dep.to_string());
        self
    }

    pub fn working_directory(mut self, dir: &str) -> Self {
        self.job.working_directory = dir.to_string();
        self
    }

    pub fn arg(mut self, name: &str, value: &str) -> Self {
        self.job.arg.push(ArgConfig {
            name: name.to_string(),
            value: value.to_string(),
            ..ArgConfig::default()
        });
        self
    }

    pub fn positional(mut self, value: &str) -> Self {
        self.job.arg.push(ArgConfig {
            value: value.to_string(),
            positional: true,
            ..ArgConfig::default()
        });
        self
    }

    pub fn from_output(mut self, name: &str, job: &str, regex: &str) -> Self {
        self.job.arg.push(ArgConfig {
            name: name.to_string(),
            from_output: Some(FromOutputConfig {
                job: job.to_string(),
                regex: regex.to_string(),
            }),
            ..ArgConfig::default()
        });
        self
    }

    pub fn build(self) -> JobConfig {
        self.job
    }
}
