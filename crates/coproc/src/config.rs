//! Process configuration captured before start

use std::collections::HashMap;
use std::path::PathBuf;

use crate::quote;

/// Configuration snapshot for spawning a child process.
///
/// Built up before `run()` and frozen once the process starts.
#[derive(Debug, Clone, Default)]
pub struct ProcessConfig {
    /// Executable to run.
    pub command: String,
    /// Command arguments, stored unquoted.
    pub args: Vec<String>,
    /// Working directory (`None` inherits the parent's).
    pub working_dir: Option<PathBuf>,
    /// Environment variables: overrides on top of the ambient environment,
    /// or the entire child environment when `env_clear` is set.
    pub env: HashMap<String, String>,
    /// Replace the ambient environment instead of extending it.
    pub env_clear: bool,
}

impl ProcessConfig {
    /// Create a new configuration for `command`.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Self::default()
        }
    }

    /// Set command arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Set the working directory.
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Add one environment variable on top of the ambient environment.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Replace the entire child environment with `envs`.
    pub fn envs(mut self, envs: HashMap<String, String>) -> Self {
        self.env = envs;
        self.env_clear = true;
        self
    }

    /// The assembled, shell-safe command line. Used for diagnostics only;
    /// spawning always passes the argv vector directly.
    pub fn command_line(&self) -> String {
        quote::join(
            std::iter::once(self.command.as_str()).chain(self.args.iter().map(String::as_str)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults() {
        let config = ProcessConfig::new("cat");
        assert_eq!(config.command, "cat");
        assert!(config.args.is_empty());
        assert!(config.working_dir.is_none());
        assert!(config.env.is_empty());
        assert!(!config.env_clear);
    }

    #[test]
    fn envs_replaces_and_marks_clear() {
        let mut envs = HashMap::new();
        envs.insert("ONLY".to_string(), "this".to_string());
        let config = ProcessConfig::new("env").env("DROPPED", "x").envs(envs);
        assert!(config.env_clear);
        assert_eq!(config.env.len(), 1);
        assert_eq!(config.env.get("ONLY").map(String::as_str), Some("this"));
    }

    #[test]
    fn command_line_quotes_unsafe_arguments() {
        let config = ProcessConfig::new("sh").args(["-c", "echo $HOME"]);
        assert_eq!(config.command_line(), "sh -c 'echo $HOME'");
    }
}
