//! Configuration management for gatekeep
//!
//! Supports loading configuration from:
//! - Built-in defaults
//! - Config file (gatekeep.toml, /etc/gatekeep/config)
//! - Environment variables (GATEKEEP_*, `__` between sections)
//!
//! The challenge seed never lives in a file; it is read from
//! `GATEKEEP_CHALLENGE_SEED`. Initial account configurations and bypass
//! policies are JSON files referenced from here.

use crate::crypto::{parse_address, Address};
use crate::errors::{GatekeepError, Result};
use crate::guardian::{GuardianMode, GuardianSettings};
use crate::ledger::{load_initial_config, AccountSetup};
use crate::security::ChallengeSeed;
use crate::vault::{Participant, PermLevel, Permissions};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Environment variable holding the hex challenge seed
pub const CHALLENGE_SEED_ENV: &str = "GATEKEEP_CHALLENGE_SEED";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub guardian: GuardianConfig,

    /// Accounts the guardian watches
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,

    pub ledger: LedgerConfig,

    pub logging: LoggingConfig,
}

/// Guardian agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardianConfig {
    /// Seconds between ticks
    pub poll_interval_secs: u64,

    /// `normal` or `auto_cancel`
    pub mode: String,

    /// Address the guardian submits as
    pub identity_address: String,

    /// Permission names of the guardian participant
    pub identity_permissions: Vec<String>,

    pub identity_level: u8,

    /// Permissions and level given to devices added immediately
    pub operator_permissions: Vec<String>,

    pub operator_level: u8,

    /// Lifetime of a verification code bucket
    pub challenge_bucket_secs: u64,

    pub notice_capacity: usize,

    pub command_capacity: usize,
}

impl Default for GuardianConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 15,
            mode: "normal".to_string(),
            identity_address: "0x0000000000000000000000000000000000000000".to_string(),
            identity_permissions: vec!["WATCHDOG".to_string()],
            identity_level: 1,
            operator_permissions: vec!["OWNER".to_string()],
            operator_level: 1,
            challenge_bucket_secs: 300,
            notice_capacity: 256,
            command_capacity: 32,
        }
    }
}

/// A watched account
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountConfig {
    pub address: String,

    /// Out-of-band recipient (phone number, email, ...)
    pub recipient: String,

    /// Identity subject allowed to enroll new devices
    #[serde(default)]
    pub owner_subject: Option<String>,

    /// Deployer of the account; defaults to the account address
    #[serde(default)]
    pub creator: Option<String>,

    /// Native balance the account starts with
    #[serde(default)]
    pub deposit: u64,

    /// JSON `InitialConfig` submitted by the creator at startup
    #[serde(default)]
    pub setup_file: Option<String>,
}

/// In-process ledger host
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// JSON bypass policy file registered with every account
    #[serde(default)]
    pub policy_file: Option<String>,

    /// JSON-lines command source: a path, or `-` for stdin
    #[serde(default)]
    pub command_feed: Option<String>,
}

/// A watched account with its addresses parsed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedAccount {
    pub address: Address,
    pub recipient: String,
    pub owner_subject: Option<String>,
    pub creator: Address,
    pub deposit: u128,
    pub setup_file: Option<PathBuf>,
}

impl WatchedAccount {
    /// Deployment setup, reading the initial configuration file if any
    pub fn setup(&self) -> Result<AccountSetup> {
        let initial_config = self
            .setup_file
            .as_deref()
            .map(load_initial_config)
            .transpose()?;
        Ok(AccountSetup {
            creator: self.creator,
            deposit: self.deposit,
            initial_config,
        })
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (json, pretty)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        // Start with defaults
        builder = builder.add_source(config::Config::try_from(&Config::default())?);

        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        } else {
            builder = builder
                .add_source(config::File::with_name("gatekeep").required(false))
                .add_source(config::File::with_name("/etc/gatekeep/config").required(false));
        }

        // GATEKEEP_GUARDIAN__POLL_INTERVAL_SECS, etc.
        builder = builder.add_source(
            config::Environment::with_prefix("GATEKEEP")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| GatekeepError::ConfigError(e.to_string()))?;

        config
            .try_deserialize()
            .map_err(|e| GatekeepError::ConfigError(e.to_string()))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.guardian.poll_interval_secs == 0 {
            return Err(GatekeepError::ConfigError(
                "guardian.poll_interval_secs must be positive".to_string(),
            ));
        }
        if self.guardian.challenge_bucket_secs == 0 {
            return Err(GatekeepError::ConfigError(
                "guardian.challenge_bucket_secs must be positive".to_string(),
            ));
        }
        if self.guardian.notice_capacity == 0 || self.guardian.command_capacity == 0 {
            return Err(GatekeepError::ConfigError(
                "guardian channel capacities must be positive".to_string(),
            ));
        }
        self.guardian.mode.parse::<GuardianMode>()?;
        self.guardian_settings()?;

        for account in &self.accounts {
            if account.recipient.trim().is_empty() {
                return Err(GatekeepError::ConfigError(format!(
                    "account {} has no recipient",
                    account.address
                )));
            }
            if let Some(path) = &account.setup_file {
                if !Path::new(path).exists() {
                    return Err(GatekeepError::ConfigError(format!(
                        "account {} setup file not found: {}",
                        account.address, path
                    )));
                }
            }
        }
        self.watched_accounts()?;

        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            return Err(GatekeepError::ConfigError(format!(
                "unknown log format: {}",
                self.logging.format
            )));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.guardian.poll_interval_secs)
    }

    pub fn guardian_settings(&self) -> Result<GuardianSettings> {
        let g = &self.guardian;
        let identity = Participant::new(
            Address(parse_address(&g.identity_address)?),
            Permissions::from_names(&g.identity_permissions)?,
            g.identity_level,
        )?;
        let operator_perm_level = PermLevel::new(
            Permissions::from_names(&g.operator_permissions)?,
            g.operator_level,
        )?;

        Ok(GuardianSettings {
            identity,
            operator_perm_level,
            mode: g.mode.parse()?,
            notice_capacity: g.notice_capacity,
        })
    }

    pub fn watched_accounts(&self) -> Result<Vec<WatchedAccount>> {
        self.accounts
            .iter()
            .map(|a| {
                let address = Address(parse_address(&a.address)?);
                let creator = match &a.creator {
                    Some(creator) => Address(parse_address(creator)?),
                    None => address,
                };
                Ok(WatchedAccount {
                    address,
                    recipient: a.recipient.clone(),
                    owner_subject: a.owner_subject.clone(),
                    creator,
                    deposit: u128::from(a.deposit),
                    setup_file: a.setup_file.as_ref().map(PathBuf::from),
                })
            })
            .collect()
    }

    /// Challenge seed from the environment, or a random one
    pub fn challenge_seed() -> Result<ChallengeSeed> {
        match env::var(CHALLENGE_SEED_ENV) {
            Ok(hex_seed) => ChallengeSeed::from_hex(&hex_seed),
            Err(_) => {
                warn!(
                    "{} not set, using a random seed; codes will not survive a restart",
                    CHALLENGE_SEED_ENV
                );
                Ok(ChallengeSeed::random())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.guardian.poll_interval_secs, 15);
        assert_eq!(config.poll_interval(), Duration::from_secs(15));
        assert!(config.accounts.is_empty());
        config.validate().unwrap();
    }

    #[test]
    fn test_guardian_settings() {
        let mut config = Config::default();
        config.guardian.identity_address = "0x1111111111111111111111111111111111111111".to_string();
        config.guardian.identity_level = 3;
        config.guardian.mode = "auto_cancel".to_string();

        let settings = config.guardian_settings().unwrap();
        assert_eq!(settings.identity.address, Address::repeat_byte(0x11));
        assert_eq!(settings.identity.level(), 3);
        assert_eq!(settings.identity.permissions(), Permissions::WATCHDOG);
        assert_eq!(settings.operator_perm_level.permissions(), Permissions::OWNER);
        assert_eq!(settings.mode, GuardianMode::AutoCancel);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.guardian.poll_interval_secs = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.accounts.push(AccountConfig {
            address: "0x1234".to_string(),
            recipient: "+15550100".to_string(),
            ..Default::default()
        });
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.accounts.push(AccountConfig {
            address: "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa".to_string(),
            recipient: "+15550100".to_string(),
            setup_file: Some("does-not-exist-setup.json".to_string()),
            ..Default::default()
        });
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.guardian.mode = "sleepy".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.logging.format = "xml".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_watched_accounts() {
        let mut config = Config::default();
        config.accounts.push(AccountConfig {
            address: "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa".to_string(),
            recipient: "+15550100".to_string(),
            owner_subject: Some("alice@example.com".to_string()),
            deposit: 500,
            ..Default::default()
        });
        config.accounts.push(AccountConfig {
            address: "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb".to_string(),
            recipient: "+15550101".to_string(),
            creator: Some("0xc0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0".to_string()),
            ..Default::default()
        });

        let watched = config.watched_accounts().unwrap();
        assert_eq!(watched[0].address, Address::repeat_byte(0xAA));
        assert_eq!(watched[0].creator, Address::repeat_byte(0xAA));
        assert_eq!(watched[0].owner_subject.as_deref(), Some("alice@example.com"));
        assert_eq!(watched[1].creator, Address::repeat_byte(0xC0));

        let setup = watched[0].setup().unwrap();
        assert_eq!(setup.deposit, 500);
        assert!(setup.initial_config.is_none());
    }

    #[test]
    fn test_setup_file_is_read() {
        let path = env::temp_dir().join(format!("gatekeep-setup-{}.json", std::process::id()));
        std::fs::write(
            &path,
            r#"{ "participants": [], "delays": [60], "required_approvals": [0] }"#,
        )
        .unwrap();

        let watched = WatchedAccount {
            address: Address::repeat_byte(0xAA),
            recipient: "+15550100".to_string(),
            owner_subject: None,
            creator: Address::repeat_byte(0xC0),
            deposit: 0,
            setup_file: Some(path.clone()),
        };
        let setup = watched.setup().unwrap();
        std::fs::remove_file(&path).unwrap();

        let initial = setup.initial_config.unwrap();
        assert_eq!(initial.delays, vec![60]);
        assert!(initial.participants.is_empty());
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let config = Config::load(Some("does-not-exist-gatekeep")).unwrap();
        assert_eq!(config.guardian.challenge_bucket_secs, 300);
        assert_eq!(config.logging.format, "pretty");
    }
}
