// src/model/argument.rs

use serde::{Deserialize, Serialize};

use crate::types::JobId;

/// Where an argument's value comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ArgumentSource {
    /// A stored template value.
    Literal {
        #[serde(default)]
        value: String,
    },
    /// Extracted at run time from the captured stdout of another job.
    ///
    /// The resolved value is the first capture group of `regex`, or the
    /// whole match when the pattern has no group.
    FromOutput { source_job: JobId, regex: String },
}

impl Default for ArgumentSource {
    fn default() -> Self {
        ArgumentSource::Literal {
            value: String::new(),
        }
    }
}

/// One parameter of a job.
///
/// Order inside [`crate::model::Job::arguments`] is argv order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Argument {
    pub id: String,

    /// Template string; empty for purely positional arguments.
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub source: ArgumentSource,

    /// Disabled arguments contribute nothing: no argv token, no history,
    /// no implicit dependency.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Positional arguments emit only their value.
    #[serde(default)]
    pub positional: bool,

    /// Inserted between name and value for named arguments.
    #[serde(default = "default_joiner")]
    pub joiner: String,
}

fn default_enabled() -> bool {
    true
}

pub fn default_joiner() -> String {
    " ".to_string()
}

impl Argument {
    /// A named argument with a literal value (`--flag value`).
    pub fn named(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            id: new_argument_id(),
            name: name.into(),
            source: ArgumentSource::Literal {
                value: value.into(),
            },
            enabled: true,
            positional: false,
            joiner: default_joiner(),
        }
    }

    /// A positional argument with a literal value.
    pub fn positional(value: impl Into<String>) -> Self {
        Self {
            positional: true,
            ..Self::named("", value)
        }
    }

    /// A named argument whose value is extracted from another job's stdout.
    pub fn from_output(
        name: impl Into<String>,
        source_job: impl Into<JobId>,
        regex: impl Into<String>,
    ) -> Self {
        Self {
            source: ArgumentSource::FromOutput {
                source_job: source_job.into(),
                regex: regex.into(),
            },
            ..Self::named(name, "")
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_joiner(mut self, joiner: impl Into<String>) -> Self {
        self.joiner = joiner.into();
        self
    }

    pub fn as_positional(mut self) -> Self {
        self.positional = true;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn is_from_output(&self) -> bool {
        matches!(self.source, ArgumentSource::FromOutput { .. })
    }

    /// The job this argument implicitly depends on, if any.
    ///
    /// Only enabled `FromOutput` arguments with a non-empty source count.
    pub fn implicit_source(&self) -> Option<&str> {
        if !self.enabled {
            return None;
        }
        match &self.source {
            ArgumentSource::FromOutput { source_job, .. } if !source_job.is_empty() => {
                Some(source_job.as_str())
            }
            _ => None,
        }
    }
}

fn new_argument_id() -> String {
    format!("arg-{}", uuid::Uuid::new_v4())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_from_output_argument_has_no_implicit_source() {
        let arg = Argument::from_output("--token", "login", "token: (\\w+)");
        assert_eq!(arg.implicit_source(), Some("login"));
        assert_eq!(arg.disabled().implicit_source(), None);
    }

    #[test]
    fn missing_fields_take_defaults_when_deserialized() {
        let arg: Argument = serde_json::from_str(r#"{"id":"a1","name":"-v"}"#).unwrap();
        assert!(arg.enabled);
        assert!(!arg.positional);
        assert_eq!(arg.joiner, " ");
        assert_eq!(arg.source, ArgumentSource::default());
    }
}
