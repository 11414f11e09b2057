//! Configuration management for the sync runner.

use hubsync_engine::kinds::{ContactConfig, DealConfig};
use hubsync_engine::transport::{CONTACT_BATCH_SIZE, DEFAULT_BATCH_SIZE};
use hubsync_engine::{BatchPolicy, EntityKind};
use std::collections::BTreeSet;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_API_BASE: &str = "https://api.hubapi.com";
pub const DEFAULT_PROVIDER_DOMAINS: &str = "gmail.com,yahoo.com,hotmail.com,outlook.com";

/// Where pushes go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploaderMode {
    /// Writes to the live CRM.
    Live,
    /// Dry run: payloads are logged, nothing is written.
    Console,
}

impl FromStr for UploaderMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "live" => Ok(Self::Live),
            "console" => Ok(Self::Console),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Workflow {
    /// Download everything and push pending changes.
    Sync,
    /// Create companies for contact email domains and link them.
    GenerateCompanies,
    /// Classify related license sets into deal events.
    ClassifyEvents,
}

impl FromStr for Workflow {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sync" => Ok(Self::Sync),
            "generate-companies" => Ok(Self::GenerateCompanies),
            "classify-events" => Ok(Self::ClassifyEvents),
            _ => Err(()),
        }
    }
}

/// Runner configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Private-app bearer token
    pub access_token: Option<String>,
    pub api_base: String,
    pub uploader: UploaderMode,
    pub workflow: Workflow,
    /// Directory holding workflow input files
    pub data_dir: PathBuf,
    pub http_timeout: Duration,
    pub batch_size: usize,
    pub contact_batch_size: usize,
    pub association_batch_size: usize,
    pub deal: DealConfig,
    pub contact: ContactConfig,
    /// Free-mail domains never treated as company domains
    pub provider_domains: BTreeSet<String>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through `lookup`, which returns a variable's value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &'static str| lookup(name).filter(|v| !v.trim().is_empty());
        let required = |name: &'static str| var(name).ok_or(ConfigError::MissingVar(name));
        let parsed = |name: &'static str, default: &str| -> Result<usize, ConfigError> {
            let value = var(name).unwrap_or_else(|| default.to_string());
            value
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or(ConfigError::InvalidVar { name, value })
        };

        let uploader = match var("HUBSYNC_UPLOADER") {
            Some(value) => value
                .parse()
                .map_err(|_| ConfigError::InvalidVar {
                    name: "HUBSYNC_UPLOADER",
                    value,
                })?,
            None => UploaderMode::Console,
        };

        let workflow = match var("HUBSYNC_WORKFLOW") {
            Some(value) => value
                .parse()
                .map_err(|_| ConfigError::InvalidVar {
                    name: "HUBSYNC_WORKFLOW",
                    value,
                })?,
            None => Workflow::Sync,
        };

        let mut deal = DealConfig::new(
            required("HUBSPOT_PIPELINE_MPAC")?,
            required("HUBSPOT_DEALSTAGE_EVAL")?,
            required("HUBSPOT_DEALSTAGE_CLOSED_WON")?,
            required("HUBSPOT_DEALSTAGE_CLOSED_LOST")?,
        );
        deal.app_attr = var("HUBSPOT_DEAL_APP_ATTR");
        deal.deployment_attr = var("HUBSPOT_DEAL_DEPLOYMENT_ATTR");

        let contact = ContactConfig {
            deployment_attr: var("HUBSPOT_CONTACT_DEPLOYMENT_ATTR"),
        };

        let provider_domains = var("HUBSYNC_PROVIDER_DOMAINS")
            .unwrap_or_else(|| DEFAULT_PROVIDER_DOMAINS.to_string())
            .split(',')
            .map(|d| d.trim().to_lowercase())
            .filter(|d| !d.is_empty())
            .collect();

        Ok(Self {
            access_token: var("HUBSPOT_ACCESS_TOKEN"),
            api_base: var("HUBSPOT_API_BASE")
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string())
                .trim_end_matches('/')
                .to_string(),
            uploader,
            workflow,
            data_dir: PathBuf::from(var("HUBSYNC_DATA_DIR").unwrap_or_else(|| "data".into())),
            http_timeout: Duration::from_secs(parsed("HUBSYNC_HTTP_TIMEOUT_SECS", "30")? as u64),
            batch_size: parsed("HUBSYNC_BATCH_SIZE", &DEFAULT_BATCH_SIZE.to_string())?,
            contact_batch_size: parsed(
                "HUBSYNC_CONTACT_BATCH_SIZE",
                &CONTACT_BATCH_SIZE.to_string(),
            )?,
            association_batch_size: parsed(
                "HUBSYNC_ASSOCIATION_BATCH_SIZE",
                &DEFAULT_BATCH_SIZE.to_string(),
            )?,
            deal,
            contact,
            provider_domains,
        })
    }

    /// Batch sizes for pushing `kind`.
    pub fn batch_policy(&self, kind: EntityKind) -> BatchPolicy {
        let entity_batch_size = match kind {
            EntityKind::Contact => self.contact_batch_size,
            _ => self.batch_size,
        };
        BatchPolicy {
            entity_batch_size,
            association_batch_size: self.association_batch_size,
        }
    }

    /// Token required by workflows that talk to the CRM.
    pub fn require_access_token(&self) -> Result<&str, ConfigError> {
        self.access_token
            .as_deref()
            .ok_or(ConfigError::MissingVar("HUBSPOT_ACCESS_TOKEN"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    MissingVar(&'static str),

    #[error("Invalid {name} value: {value:?}")]
    InvalidVar { name: &'static str, value: String },
}

/// Minimal valid configuration for tests.
#[cfg(test)]
pub(crate) fn test_config() -> Config {
    Config::from_lookup(|name| {
        let value = match name {
            "HUBSPOT_PIPELINE_MPAC" => "mpac",
            "HUBSPOT_DEALSTAGE_EVAL" => "eval",
            "HUBSPOT_DEALSTAGE_CLOSED_WON" => "won",
            "HUBSPOT_DEALSTAGE_CLOSED_LOST" => "lost",
            _ => return None,
        };
        Some(value.to_string())
    })
    .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use hubsync_engine::kinds::DealStage;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let mut vars: HashMap<String, String> = [
            ("HUBSPOT_PIPELINE_MPAC", "100"),
            ("HUBSPOT_DEALSTAGE_EVAL", "1"),
            ("HUBSPOT_DEALSTAGE_CLOSED_WON", "2"),
            ("HUBSPOT_DEALSTAGE_CLOSED_LOST", "3"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        vars.extend(pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())));
        move |name: &str| vars.get(name).cloned()
    }

    #[test]
    fn defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();

        assert_eq!(config.api_base, DEFAULT_API_BASE);
        assert_eq!(config.uploader, UploaderMode::Console);
        assert_eq!(config.workflow, Workflow::Sync);
        assert_eq!(config.data_dir, PathBuf::from("data"));
        assert_eq!(config.http_timeout, Duration::from_secs(30));
        assert_eq!(config.deal.pipeline, "100");
        assert_eq!(config.deal.stage_of("2"), Some(DealStage::ClosedWon));
        assert_eq!(config.deal.stage_id(DealStage::ClosedLost), "3");
        assert_eq!(config.deal.app_attr, None);
        assert!(config.provider_domains.contains("gmail.com"));
        assert_eq!(config.batch_policy(EntityKind::Contact).entity_batch_size, 10);
        assert_eq!(config.batch_policy(EntityKind::Deal).entity_batch_size, 100);
        assert!(config.require_access_token().is_err());
    }

    #[test]
    fn overrides() {
        let config = Config::from_lookup(lookup(&[
            ("HUBSPOT_ACCESS_TOKEN", "pat-123"),
            ("HUBSPOT_API_BASE", "http://localhost:9000/"),
            ("HUBSYNC_UPLOADER", "live"),
            ("HUBSYNC_WORKFLOW", "generate-companies"),
            ("HUBSYNC_CONTACT_BATCH_SIZE", "5"),
            ("HUBSPOT_DEAL_APP_ATTR", "marketplace_app"),
            ("HUBSYNC_PROVIDER_DOMAINS", "Proton.me, gmx.de"),
        ]))
        .unwrap();

        assert_eq!(config.require_access_token().unwrap(), "pat-123");
        assert_eq!(config.api_base, "http://localhost:9000");
        assert_eq!(config.uploader, UploaderMode::Live);
        assert_eq!(config.workflow, Workflow::GenerateCompanies);
        assert_eq!(config.batch_policy(EntityKind::Contact).entity_batch_size, 5);
        assert_eq!(config.deal.app_attr.as_deref(), Some("marketplace_app"));
        assert_eq!(
            config.provider_domains,
            ["proton.me", "gmx.de"]
                .iter()
                .map(|s| s.to_string())
                .collect::<BTreeSet<String>>()
        );
    }

    #[test]
    fn missing_pipeline_is_an_error() {
        let result = Config::from_lookup(|_| None);
        assert!(matches!(
            result,
            Err(ConfigError::MissingVar("HUBSPOT_PIPELINE_MPAC"))
        ));
    }

    #[test]
    fn invalid_values_are_errors() {
        assert!(matches!(
            Config::from_lookup(lookup(&[("HUBSYNC_UPLOADER", "s3")])),
            Err(ConfigError::InvalidVar { name: "HUBSYNC_UPLOADER", .. })
        ));
        assert!(matches!(
            Config::from_lookup(lookup(&[("HUBSYNC_BATCH_SIZE", "0")])),
            Err(ConfigError::InvalidVar { .. })
        ));
    }
}
