use crate::error::TaskError;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;

pub const DEFAULT_TASK_FILE: &str = "tasks.json";
const ENV_PREFIX: &str = "TASK_CLI";

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Config {
    /// Where the task collection is stored.
    #[serde(default = "default_file")]
    pub file: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            file: default_file(),
        }
    }
}

fn default_file() -> PathBuf {
    PathBuf::from(DEFAULT_TASK_FILE)
}

impl Config {
    /// Loads configuration from `TASK_CLI_*` environment variables.
    pub fn from_env() -> Result<Self, TaskError> {
        Self::from_environment(config::Environment::with_prefix(ENV_PREFIX))
    }

    /// Same as [`Config::from_env`] but reads the given variables instead of the process environment.
    pub fn from_vars(vars: HashMap<String, String>) -> Result<Self, TaskError> {
        Self::from_environment(config::Environment::with_prefix(ENV_PREFIX).source(Some(vars)))
    }

    fn from_environment(environment: config::Environment) -> Result<Self, TaskError> {
        let settings = config::Config::builder()
            .add_source(environment)
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// A path given on the command line wins over the environment.
    pub fn with_file_override(mut self, file: Option<PathBuf>) -> Self {
        if let Some(file) = file {
            self.file = file;
        }
        self
    }
}
