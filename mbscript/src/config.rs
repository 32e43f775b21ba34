//! Bridge configuration.
//!
//! # TOML Example
//!
//! ```toml
//! [shared]
//! log_level = "info"
//! service_name = "mbscript"
//!
//! [channel]
//! namespace = "ModbusTools.Server"
//!
//! [interpreter]
//! candidates = ["python3", "python"]
//!
//! [session]
//! timeout_start_ms = 1000
//! timeout_stop_ms = 1000
//! poll_interval_us = 1000
//! import_paths = []
//! runtime_dir = "/tmp/mbscript"
//! ```

use crate::error::ScriptResult;
use crate::interpreter;
use crate::program::ProgramTemplate;
use mbscript_common::config::{ConfigError, SharedConfig};
use mbscript_common::consts::{
    DEFAULT_POLL_INTERVAL_US, DEFAULT_RUNTIME_DIR, DEFAULT_TIMEOUT_START_MS,
    DEFAULT_TIMEOUT_STOP_MS,
};
use mbscript_common::shm::consts::DEFAULT_NAMESPACE;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration file of the `mbscript` binary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Settings shared by every binary.
    #[serde(default)]
    pub shared: SharedConfig,
    /// Channel naming.
    #[serde(default)]
    pub channel: ChannelConfig,
    /// Interpreter selection.
    #[serde(default)]
    pub interpreter: InterpreterConfig,
    /// Session timing and paths.
    #[serde(default)]
    pub session: SessionSettings,
}

impl BridgeConfig {
    /// Reject values no session can run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;
        if self.channel.namespace.is_empty() {
            return Err(invalid("channel.namespace cannot be empty"));
        }
        if self.session.timeout_start_ms == 0 {
            return Err(invalid("session.timeout_start_ms must be greater than zero"));
        }
        if self.session.timeout_stop_ms == 0 {
            return Err(invalid("session.timeout_stop_ms must be greater than zero"));
        }
        if self.session.poll_interval_us == 0 {
            return Err(invalid("session.poll_interval_us must be greater than zero"));
        }
        Ok(())
    }

    /// Resolve the interpreter and build the per-session settings.
    pub fn session_config(&self) -> ScriptResult<SessionConfig> {
        let interpreter = interpreter::resolve(&self.interpreter)?;
        Ok(SessionConfig {
            interpreter,
            timeout_start: Duration::from_millis(self.session.timeout_start_ms),
            timeout_stop: Duration::from_millis(self.session.timeout_stop_ms),
            poll_interval: Duration::from_micros(self.session.poll_interval_us),
            import_paths: self.session.import_paths.clone(),
            runtime_dir: self.session.runtime_dir.clone(),
            env: self
                .session
                .env
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            template: ProgramTemplate::default(),
        })
    }
}

fn invalid(msg: &str) -> ConfigError {
    ConfigError::ValidationError(msg.to_string())
}

/// `[channel]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Prefix of every channel name.
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
        }
    }
}

/// `[interpreter]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterpreterConfig {
    /// Explicit interpreter path; skips the search when set.
    #[serde(default)]
    pub executable: Option<PathBuf>,
    /// Names looked up on `PATH`, in order.
    #[serde(default = "default_candidates")]
    pub candidates: Vec<String>,
}

fn default_candidates() -> Vec<String> {
    vec!["python3".to_string(), "python".to_string()]
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            executable: None,
            candidates: default_candidates(),
        }
    }
}

/// `[session]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Time the child gets to report running, in milliseconds.
    #[serde(default = "default_timeout_start_ms")]
    pub timeout_start_ms: u64,
    /// Time the child gets to exit after the run bit clears, in milliseconds.
    #[serde(default = "default_timeout_stop_ms")]
    pub timeout_stop_ms: u64,
    /// Cooperative loop tick, in microseconds.
    #[serde(default = "default_poll_interval_us")]
    pub poll_interval_us: u64,
    /// Extra import paths appended after the host's roots.
    #[serde(default)]
    pub import_paths: Vec<PathBuf>,
    /// Directory for generated programs.
    #[serde(default = "default_runtime_dir")]
    pub runtime_dir: PathBuf,
    /// Extra environment for the child.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

fn default_timeout_start_ms() -> u64 {
    DEFAULT_TIMEOUT_START_MS
}

fn default_timeout_stop_ms() -> u64 {
    DEFAULT_TIMEOUT_STOP_MS
}

fn default_poll_interval_us() -> u64 {
    DEFAULT_POLL_INTERVAL_US
}

fn default_runtime_dir() -> PathBuf {
    PathBuf::from(DEFAULT_RUNTIME_DIR)
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            timeout_start_ms: DEFAULT_TIMEOUT_START_MS,
            timeout_stop_ms: DEFAULT_TIMEOUT_STOP_MS,
            poll_interval_us: DEFAULT_POLL_INTERVAL_US,
            import_paths: Vec::new(),
            runtime_dir: default_runtime_dir(),
            env: BTreeMap::new(),
        }
    }
}

/// Resolved settings one session runs with.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Interpreter executable.
    pub interpreter: PathBuf,
    /// Start handshake deadline.
    pub timeout_start: Duration,
    /// Grace period before the child is killed.
    pub timeout_stop: Duration,
    /// Loop tick.
    pub poll_interval: Duration,
    /// Extra import paths.
    pub import_paths: Vec<PathBuf>,
    /// Directory for generated programs.
    pub runtime_dir: PathBuf,
    /// Extra child environment.
    pub env: Vec<(String, String)>,
    /// Template used for [`crate::program::ScriptSources::Program`].
    pub template: ProgramTemplate,
}

impl SessionConfig {
    /// Default timings for `interpreter`.
    pub fn new(interpreter: impl Into<PathBuf>) -> Self {
        Self {
            interpreter: interpreter.into(),
            timeout_start: Duration::from_millis(DEFAULT_TIMEOUT_START_MS),
            timeout_stop: Duration::from_millis(DEFAULT_TIMEOUT_STOP_MS),
            poll_interval: Duration::from_micros(DEFAULT_POLL_INTERVAL_US),
            import_paths: Vec::new(),
            runtime_dir: default_runtime_dir(),
            env: Vec::new(),
            template: ProgramTemplate::default(),
        }
    }

    /// Set the start timeout.
    pub fn with_timeout_start(mut self, timeout: Duration) -> Self {
        self.timeout_start = timeout;
        self
    }

    /// Set the stop timeout.
    pub fn with_timeout_stop(mut self, timeout: Duration) -> Self {
        self.timeout_stop = timeout;
        self
    }

    /// Set the loop tick.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the runtime directory.
    pub fn with_runtime_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.runtime_dir = dir.into();
        self
    }

    /// Add one child environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mbscript_common::config::{ConfigLoader, LogLevel};
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn empty_file_gives_defaults() {
        let config = BridgeConfig::from_toml("").unwrap();
        assert_eq!(config.channel.namespace, "ModbusTools.Server");
        assert_eq!(config.interpreter.candidates, ["python3", "python"]);
        assert!(config.interpreter.executable.is_none());
        assert_eq!(config.session.timeout_start_ms, 1000);
        assert_eq!(config.session.timeout_stop_ms, 1000);
        assert_eq!(config.session.poll_interval_us, 1000);
        assert_eq!(config.session.runtime_dir, PathBuf::from("/tmp/mbscript"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn full_file_parses() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[shared]
log_level = "debug"
service_name = "sim"

[channel]
namespace = "Lab"

[interpreter]
executable = "/usr/bin/python3"

[session]
timeout_start_ms = 250
timeout_stop_ms = 50
poll_interval_us = 500
import_paths = ["/opt/lib"]
runtime_dir = "/var/run/mbscript"

[session.env]
PYTHONDONTWRITEBYTECODE = "1"
"#
        )
        .unwrap();

        let config = BridgeConfig::load(file.path()).unwrap();
        assert_eq!(config.shared.log_level, LogLevel::Debug);
        assert_eq!(config.channel.namespace, "Lab");
        assert_eq!(
            config.interpreter.executable,
            Some(PathBuf::from("/usr/bin/python3"))
        );

        let session = config.session_config().unwrap();
        assert_eq!(session.interpreter, PathBuf::from("/usr/bin/python3"));
        assert_eq!(session.timeout_start, Duration::from_millis(250));
        assert_eq!(session.timeout_stop, Duration::from_millis(50));
        assert_eq!(session.poll_interval, Duration::from_micros(500));
        assert_eq!(session.import_paths, [PathBuf::from("/opt/lib")]);
        assert_eq!(
            session.env,
            [("PYTHONDONTWRITEBYTECODE".to_string(), "1".to_string())]
        );
    }

    #[test]
    fn zero_timeouts_are_rejected() {
        for toml in [
            "[session]\ntimeout_start_ms = 0",
            "[session]\ntimeout_stop_ms = 0",
            "[session]\npoll_interval_us = 0",
            "[channel]\nnamespace = \"\"",
            "[shared]\nservice_name = \"\"",
        ] {
            let config = BridgeConfig::from_toml(toml).unwrap();
            assert!(
                matches!(config.validate(), Err(ConfigError::ValidationError(_))),
                "{toml} should be rejected"
            );
        }
    }

    #[test]
    fn wrong_types_are_parse_errors() {
        let result = BridgeConfig::from_toml("[session]\ntimeout_start_ms = \"soon\"");
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn builder_overrides_defaults() {
        let config = SessionConfig::new("/bin/true")
            .with_timeout_start(Duration::from_millis(10))
            .with_timeout_stop(Duration::from_millis(20))
            .with_poll_interval(Duration::from_micros(100))
            .with_env("A", "b");
        assert_eq!(config.timeout_start, Duration::from_millis(10));
        assert_eq!(config.timeout_stop, Duration::from_millis(20));
        assert_eq!(config.poll_interval, Duration::from_micros(100));
        assert_eq!(config.env, [("A".to_string(), "b".to_string())]);
    }
}
