//! Configuration types.
//!
//! The bridge is configured from a single YAML file:
//!
//! ```yaml
//! server: https://api.telegram.org
//! user: opsbot
//! password: "123456:ABC..."
//! contacts:
//!   - ^alice$
//! rules:
//!   - regexp: ^uptime$
//!     binaryFilepath: /usr/bin/uptime
//! ```
//!
//! `CHATOPS_PASSWORD` and `CHATOPS_SERVER` override the file so the secret
//! can stay out of it.
//!
//! The `server`/`user`/`password` triple describes an account on a chat
//! network. With the Telegram transport they are the Bot API base URL, the
//! bot's username and its token. `user` is only compared against the name
//! the token authenticates as, and a mismatch is logged as a warning. It is
//! not an access check: who may run commands is decided by `contacts` alone.

use std::path::{Path, PathBuf};

use secrecy::SecretString;
use serde::{Deserialize, Deserializer};

use crate::error::ConfigError;
use crate::pipeline::{RuleSet, SenderFilter};

/// Default config file location, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "./chatops.config.yaml";

/// Which transport carries the chat session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Telegram,
    Cli,
}

/// What the session loop does with a message when all dispatch slots are busy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// Stop receiving until a slot frees up.
    #[default]
    Block,
    /// Accept the message and let its dispatch wait for a slot.
    Queue,
    /// Drop the message with a warning.
    Drop,
}

/// Dispatch concurrency settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchConfig {
    /// Maximum simultaneously running dispatches. Unset means unbounded:
    /// every accepted message spawns a process immediately, so a flood of
    /// matching messages can exhaust processes or memory.
    #[serde(default)]
    pub max_concurrent: Option<usize>,
    #[serde(default)]
    pub overflow: OverflowPolicy,
}

/// One `regexp` → `binaryFilepath` rule as written in the file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleConfig {
    pub regexp: String,
    pub binary_filepath: PathBuf,
}

/// Bridge configuration.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotConfig {
    /// Transport endpoint (Telegram: Bot API base URL).
    #[serde(default)]
    pub server: String,
    /// Account identity (Telegram: bot username; CLI: local sender name).
    #[serde(default)]
    pub user: String,
    /// Account secret (Telegram: bot token).
    #[serde(default, deserialize_with = "deserialize_secret")]
    pub password: Option<SecretString>,
    /// Sender allow-list patterns.
    #[serde(default)]
    pub contacts: Vec<String>,
    /// Ordered dispatch rules.
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
    #[serde(default)]
    pub transport: TransportKind,
    /// Send an acknowledgement before running a matched command.
    #[serde(default)]
    pub acknowledge: bool,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    /// Working directory for executed programs. Unset inherits the bridge's.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

impl BotConfig {
    /// Read, parse and validate the config file, applying environment
    /// overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_yaml(&data)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse YAML without validation or overrides.
    pub fn from_yaml(data: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(data)?)
    }

    /// Replace values with those found by `lookup` (normally the process
    /// environment).
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(password) = lookup("CHATOPS_PASSWORD").filter(|s| !s.is_empty()) {
            self.password = Some(SecretString::from(password));
        }
        if let Some(server) = lookup("CHATOPS_SERVER").filter(|s| !s.is_empty()) {
            self.server = server;
        }
    }

    /// Check cross-field requirements.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.transport == TransportKind::Telegram && self.password.is_none() {
            return Err(ConfigError::MissingRequired {
                key: "password".into(),
                hint: "Set it in the config file or via CHATOPS_PASSWORD.".into(),
            });
        }
        if let Some(dir) = &self.working_dir {
            if !dir.is_dir() {
                return Err(ConfigError::InvalidValue {
                    key: "workingDir".into(),
                    message: format!("{} is not a directory", dir.display()),
                });
            }
        }
        if self.dispatch.max_concurrent == Some(0) {
            return Err(ConfigError::InvalidValue {
                key: "dispatch.maxConcurrent".into(),
                message: "must be at least 1 (omit it for no limit)".into(),
            });
        }
        Ok(())
    }

    /// Compile rules and contacts. Any malformed pattern is rejected here,
    /// before a session is opened.
    pub fn compile(&self) -> Result<(RuleSet, SenderFilter), ConfigError> {
        let rules = RuleSet::compile(
            self.rules
                .iter()
                .map(|r| (r.regexp.as_str(), r.binary_filepath.clone())),
        )?;
        let filter = SenderFilter::new(&self.contacts)?;
        Ok((rules, filter))
    }
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.map(SecretString::from))
}

#[cfg(test)]
mod tests {
    use super::*;

    use secrecy::ExposeSecret;

    const EXAMPLE: &str = r#"
server: https://api.telegram.org
user: opsbot
password: "123:ABC"
contacts:
  - alice@example.com
rules:
  - regexp: ^ping$
    binaryFilepath: /bin/echo
  - regexp: ^uptime
    binaryFilepath: /usr/bin/uptime
"#;

    #[test]
    fn parses_minimal_layout() {
        let config = BotConfig::from_yaml(EXAMPLE).unwrap();
        assert_eq!(config.server, "https://api.telegram.org");
        assert_eq!(config.user, "opsbot");
        assert_eq!(config.password.as_ref().unwrap().expose_secret(), "123:ABC");
        assert_eq!(config.contacts, vec!["alice@example.com"]);
        assert_eq!(config.rules.len(), 2);
        assert_eq!(config.rules[0].regexp, "^ping$");
        assert_eq!(config.rules[0].binary_filepath, PathBuf::from("/bin/echo"));
    }

    #[test]
    fn optional_keys_default() {
        let config = BotConfig::from_yaml(EXAMPLE).unwrap();
        assert_eq!(config.transport, TransportKind::Telegram);
        assert!(!config.acknowledge);
        assert_eq!(config.dispatch, DispatchConfig::default());
        assert_eq!(config.dispatch.max_concurrent, None);
        assert_eq!(config.dispatch.overflow, OverflowPolicy::Block);
        assert_eq!(config.working_dir, None);
    }

    #[test]
    fn working_dir_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = format!("transport: cli\nworkingDir: {}\n", dir.path().display());
        let config = BotConfig::from_yaml(&yaml).unwrap();
        assert_eq!(config.working_dir.as_deref(), Some(dir.path()));
        assert!(config.validate().is_ok());

        let missing = dir.path().join("gone");
        let yaml = format!("transport: cli\nworkingDir: {}\n", missing.display());
        let config = BotConfig::from_yaml(&yaml).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref key, .. }) if key == "workingDir"
        ));
    }

    #[test]
    fn parses_extended_keys() {
        let yaml = r#"
transport: cli
acknowledge: true
contacts: [local-user]
dispatch:
  maxConcurrent: 4
  overflow: drop
"#;
        let config = BotConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.transport, TransportKind::Cli);
        assert!(config.acknowledge);
        assert_eq!(config.dispatch.max_concurrent, Some(4));
        assert_eq!(config.dispatch.overflow, OverflowPolicy::Drop);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn debug_output_redacts_password() {
        let config = BotConfig::from_yaml(EXAMPLE).unwrap();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("123:ABC"));
    }

    #[test]
    fn malformed_yaml_is_parse_error() {
        let err = BotConfig::from_yaml("rules: [unterminated").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn unknown_transport_is_parse_error() {
        let err = BotConfig::from_yaml("transport: carrier-pigeon").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn telegram_requires_password() {
        let config = BotConfig::from_yaml("contacts: [alice]").unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingRequired { ref key, .. }) if key == "password"
        ));
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let yaml = "transport: cli\ndispatch:\n  maxConcurrent: 0\n";
        let config = BotConfig::from_yaml(yaml).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn overrides_replace_password_and_server() {
        let mut config = BotConfig::from_yaml("user: opsbot").unwrap();
        config.apply_overrides(|key| match key {
            "CHATOPS_PASSWORD" => Some("from-env".to_string()),
            "CHATOPS_SERVER" => Some("http://localhost:8081".to_string()),
            _ => None,
        });
        assert_eq!(config.password.as_ref().unwrap().expose_secret(), "from-env");
        assert_eq!(config.server, "http://localhost:8081");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn empty_override_is_ignored() {
        let mut config = BotConfig::from_yaml(EXAMPLE).unwrap();
        config.apply_overrides(|_| Some(String::new()));
        assert_eq!(config.password.as_ref().unwrap().expose_secret(), "123:ABC");
        assert_eq!(config.server, "https://api.telegram.org");
    }

    #[test]
    fn compile_builds_rules_and_filter() {
        let config = BotConfig::from_yaml(EXAMPLE).unwrap();
        let (rules, filter) = config.compile().unwrap();
        assert_eq!(rules.len(), 2);
        assert!(filter.allows("alice@example.com"));
        assert!(!filter.allows("bob@example.com"));
    }

    #[test]
    fn compile_rejects_bad_contact() {
        let yaml = "transport: cli\ncontacts: ['(alice']\n";
        let config = BotConfig::from_yaml(yaml).unwrap();
        assert!(matches!(
            config.compile(),
            Err(ConfigError::InvalidContactPattern { .. })
        ));
    }

    #[test]
    fn compile_rejects_bad_rule() {
        let yaml = "transport: cli\nrules:\n  - regexp: '*oops'\n    binaryFilepath: /bin/true\n";
        let config = BotConfig::from_yaml(yaml).unwrap();
        assert!(matches!(
            config.compile(),
            Err(ConfigError::InvalidRulePattern { index: 0, .. })
        ));
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge.yaml");
        std::fs::write(&path, "transport: cli\ncontacts: [local-user]\n").unwrap();
        let config = BotConfig::load(&path).unwrap();
        assert_eq!(config.transport, TransportKind::Cli);
        assert_eq!(config.contacts, vec!["local-user"]);
    }

    #[test]
    fn load_missing_file_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = BotConfig::load(&dir.path().join("absent.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
