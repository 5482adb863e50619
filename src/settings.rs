use std::path::PathBuf;

use clap::{Parser, Subcommand};
use thiserror::Error;

/// Errors that make the process refuse to start.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("only one of --expires-after-push-days and --expires-after-pull-days can be set")]
    ConflictingExpiry,

    // Waiting on https://github.com/aws/containers-roadmap/issues/921 for
    // `sinceImagePulled` support in ECR lifecycle policies.
    #[error("pull-based expiry is not implemented")]
    PullExpiryUnimplemented,

    #[error("the oracle provider requires --config-file (instance principal authentication is not supported)")]
    MissingOciConfig,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Shared secret required in the `Authorization: Bearer` header.
    /// Set to an empty string to disable authentication.
    #[arg(long, env = "BINDERHUB_AUTH_TOKEN", hide_env_values = true)]
    pub auth_token: String,

    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0")]
    pub listen_host: String,

    /// Port to listen on
    #[arg(long, default_value_t = 8080)]
    pub listen_port: u16,

    #[command(subcommand)]
    pub provider: ProviderCommand,
}

#[derive(Subcommand, Debug)]
pub enum ProviderCommand {
    /// Serve repositories from an Amazon ECR registry
    Amazon {
        /// Registry ID, defaults to the caller's own registry
        #[arg(long, env = "AWS_REGISTRY_ID")]
        registry_id: Option<String>,
        /// Expire images this many days after they were pushed (0 disables)
        #[arg(long, env = "AWS_ECR_EXPIRES_AFTER_PUSH_DAYS", default_value_t = 0)]
        expires_after_push_days: u32,
        /// Expire images this many days after they were last pulled (0 disables)
        #[arg(long, env = "AWS_ECR_EXPIRES_AFTER_PULL_DAYS", default_value_t = 0)]
        expires_after_pull_days: u32,
    },
    /// Serve repositories from an OCI Artifacts registry
    Oracle {
        /// Path to an OCI configuration file with API-key credentials
        #[arg(long, env = "OCI_CONFIG_FILE")]
        config_file: Option<PathBuf>,
        /// Compartment OCID, defaults to the tenancy
        #[arg(long, env = "OCI_COMPARTMENT_ID")]
        compartment_id: Option<String>,
    },
}

/// Validated runtime configuration, immutable after startup.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub auth_token: String,
    pub listen_host: String,
    pub listen_port: u16,
    pub provider: ProviderSettings,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProviderSettings {
    Amazon(EcrSettings),
    Oracle(OciSettings),
}

#[derive(Debug, Clone, PartialEq)]
pub struct EcrSettings {
    pub registry_id: Option<String>,
    pub expires_after_push_days: u32,
    pub expires_after_pull_days: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OciSettings {
    pub config_file: PathBuf,
    pub compartment_id: Option<String>,
}

/// Reject mutually exclusive or unimplemented expiry day counts.
pub fn validate_expiry(push_days: u32, pull_days: u32) -> Result<(), ConfigError> {
    if push_days > 0 && pull_days > 0 {
        return Err(ConfigError::ConflictingExpiry);
    }
    if pull_days > 0 {
        return Err(ConfigError::PullExpiryUnimplemented);
    }
    Ok(())
}

impl Settings {
    pub fn from_cli(cli: Cli) -> Result<Self, ConfigError> {
        let provider = match cli.provider {
            ProviderCommand::Amazon {
                registry_id,
                expires_after_push_days,
                expires_after_pull_days,
            } => {
                validate_expiry(expires_after_push_days, expires_after_pull_days)?;
                ProviderSettings::Amazon(EcrSettings {
                    // An empty environment variable means "unset"
                    registry_id: registry_id.filter(|id| !id.is_empty()),
                    expires_after_push_days,
                    expires_after_pull_days,
                })
            }
            ProviderCommand::Oracle {
                config_file,
                compartment_id,
            } => ProviderSettings::Oracle(OciSettings {
                config_file: config_file.ok_or(ConfigError::MissingOciConfig)?,
                compartment_id: compartment_id.filter(|id| !id.is_empty()),
            }),
        };

        Ok(Self {
            auth_token: cli.auth_token,
            listen_host: cli.listen_host,
            listen_port: cli.listen_port,
            provider,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(
            ["registry-helper", "--auth-token", "secret"]
                .iter()
                .chain(args)
                .copied(),
        )
    }

    #[test]
    fn amazon_defaults() {
        let cli = parse(&["amazon"]).unwrap();
        let settings = Settings::from_cli(cli).unwrap();
        match settings.provider {
            ProviderSettings::Amazon(ecr) => {
                assert_eq!(ecr.registry_id, None);
                assert_eq!(ecr.expires_after_push_days, 0);
                assert_eq!(ecr.expires_after_pull_days, 0);
            }
            other => panic!("unexpected provider: {other:?}"),
        }
        assert_eq!(settings.auth_token, "secret");
        assert_eq!(settings.listen_port, 8080);
    }

    #[test]
    fn conflicting_expiry_is_rejected() {
        let cli = parse(&[
            "amazon",
            "--expires-after-push-days",
            "7",
            "--expires-after-pull-days",
            "7",
        ])
        .unwrap();
        assert_eq!(Settings::from_cli(cli), Err(ConfigError::ConflictingExpiry));
    }

    #[test]
    fn pull_expiry_is_unimplemented() {
        let cli = parse(&["amazon", "--expires-after-pull-days", "7"]).unwrap();
        assert_eq!(
            Settings::from_cli(cli),
            Err(ConfigError::PullExpiryUnimplemented)
        );
    }

    #[test]
    fn push_expiry_is_accepted() {
        let cli = parse(&["amazon", "--expires-after-push-days", "30"]).unwrap();
        let settings = Settings::from_cli(cli).unwrap();
        match settings.provider {
            ProviderSettings::Amazon(ecr) => assert_eq!(ecr.expires_after_push_days, 30),
            other => panic!("unexpected provider: {other:?}"),
        }
    }

    #[test]
    fn negative_expiry_is_a_parse_error() {
        let err = parse(&["amazon", "--expires-after-push-days", "-1"]).unwrap_err();
        assert_ne!(err.kind(), ErrorKind::DisplayHelp);
    }

    #[test]
    fn oracle_requires_config_file() {
        // Only run the "missing" assertion when the environment fallback is unset
        if std::env::var_os("OCI_CONFIG_FILE").is_none() {
            let cli = parse(&["oracle"]).unwrap();
            assert_eq!(Settings::from_cli(cli), Err(ConfigError::MissingOciConfig));
        }

        let cli = parse(&["oracle", "--config-file", "/etc/oci/config"]).unwrap();
        let settings = Settings::from_cli(cli).unwrap();
        match settings.provider {
            ProviderSettings::Oracle(oci) => {
                assert_eq!(oci.config_file, PathBuf::from("/etc/oci/config"));
                assert_eq!(oci.compartment_id, None);
            }
            other => panic!("unexpected provider: {other:?}"),
        }
    }

    #[test]
    fn empty_auth_token_is_allowed() {
        let cli =
            Cli::try_parse_from(["registry-helper", "--auth-token", "", "amazon"]).unwrap();
        let settings = Settings::from_cli(cli).unwrap();
        assert_eq!(settings.auth_token, "");
    }
}
