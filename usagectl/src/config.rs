//! Application configuration management.
//!
//! Configuration is loaded once at startup from a YAML file with environment variable overrides and
//! then passed by reference into the job. The file path defaults to `usagectl.yaml` but can be
//! specified via `-f` or the `USAGECTL_CONFIG` environment variable. A missing file is not an error;
//! every value has a default except the store endpoint and key.
//!
//! ## Loading Priority
//!
//! Sources are merged in the following order (later sources override earlier ones):
//!
//! 1. **YAML config file** - base configuration
//! 2. **Environment variables** - variables prefixed with `USAGECTL_` override YAML values
//! 3. **COSMOSDB_ENDPOINT / COSMOSDB_KEY** - override `store.endpoint` and `store.key`
//!
//! For nested values, use double underscores. For example, `USAGECTL_JOB__MAX_RECORDS_ADD=500`
//! sets `job.max_records_add`.
//!
//! ## Example
//!
//! ```yaml
//! store:
//!   endpoint: https://my-account.documents.azure.com:443/
//!   database: db_conversation_history
//!   container: conversations
//!   page_size: 100
//!   request_timeout: 30s
//! job:
//!   actor_id: "121"
//!   role: assistant
//!   document_type: message
//!   max_records_add: 100
//!   max_records_remove: 1000
//! ```
//!
//! ```bash
//! export COSMOSDB_ENDPOINT="https://my-account.documents.azure.com:443/"
//! export COSMOSDB_KEY="<primary key>"
//! ```

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Deserializer};
use serde_json::{Value, json};
use std::fmt;
use std::time::Duration;
use url::Url;

use crate::errors::Error;
use crate::migration::{Execution, Mode, Operation};
use crate::store::cosmos::auth;

/// Command line arguments.
///
/// Without flags the tool previews the Add operation and writes nothing.
#[derive(Parser, Debug, Clone, Default)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "USAGECTL_CONFIG", default_value = "usagectl.yaml")]
    pub config: String,

    /// Persist changes instead of previewing them
    #[arg(long, visible_aliases = ["run", "apply"])]
    pub execute: bool,

    /// Undo a previous add: remove `usage` from documents this actor updated
    #[arg(long, conflicts_with = "remove")]
    pub revert: bool,

    /// Remove `usage` from every document that has it
    #[arg(long)]
    pub remove: bool,

    /// Upper bound on documents processed in this run (overrides the per-operation default)
    #[arg(long)]
    pub max_records: Option<usize>,

    /// Apply without asking for confirmation
    #[arg(short = 'y', long)]
    pub yes: bool,

    /// Validate configuration and exit without connecting to the store
    #[arg(long)]
    pub validate: bool,
}

impl Args {
    /// The mode selected by the flags.
    pub fn mode(&self) -> Mode {
        let operation = if self.revert {
            Operation::Revert
        } else if self.remove {
            Operation::Remove
        } else {
            Operation::Add
        };
        let execution = if self.execute { Execution::Apply } else { Execution::Preview };
        Mode::new(operation, execution)
    }
}

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Document store connection
    pub store: StoreConfig,
    /// Migration job parameters
    pub job: JobConfig,
}

/// Cosmos DB connection settings.
#[derive(Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Account endpoint, e.g. `https://my-account.documents.azure.com:443/`
    pub endpoint: Option<Url>,
    /// Base64 primary or secondary master key
    pub key: String,
    pub database: String,
    pub container: String,
    /// Top-level attribute holding the partition key. Documents without it are addressed by id.
    pub partition_key_path: String,
    /// Documents requested per query page
    pub page_size: usize,
    /// Timeout for each individual request
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            key: String::new(),
            database: "db_conversation_history".to_string(),
            container: "conversations".to_string(),
            partition_key_path: "_partitionKey".to_string(),
            page_size: 100,
            request_timeout: Duration::from_secs(30),
        }
    }
}

// The master key must never end up in logs
impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("endpoint", &self.endpoint.as_ref().map(Url::as_str))
            .field("key", &if self.key.is_empty() { "<unset>" } else { "<redacted>" })
            .field("database", &self.database)
            .field("container", &self.container)
            .field("partition_key_path", &self.partition_key_path)
            .field("page_size", &self.page_size)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

/// Migration job parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JobConfig {
    /// Written to `updatedBy` by the Add operation; Revert only touches documents carrying it
    #[serde(deserialize_with = "string_or_number")]
    pub actor_id: String,
    /// Written to `updatedBy` by the Revert operation
    pub revert_actor_id: Value,
    /// Only messages with this role are candidates for Add and Revert
    pub role: String,
    /// When set, Add and Revert candidates must also have `type` equal to this value
    pub document_type: Option<String>,
    /// Bound for a single Add run
    pub max_records_add: usize,
    /// Bound for a single Remove or Revert run
    pub max_records_remove: usize,
    /// Explicit bound for any operation, overriding the two above
    pub max_records: Option<usize>,
    /// Log progress every this many documents
    pub progress_interval: usize,
    /// Candidates described in detail when previewing
    pub preview_sample: usize,
    /// Changed documents re-read and checked after applying
    pub spot_check_sample: usize,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            actor_id: "121".to_string(),
            revert_actor_id: json!(-1),
            role: "assistant".to_string(),
            document_type: Some("message".to_string()),
            max_records_add: 100,
            max_records_remove: 1000,
            max_records: None,
            progress_interval: 10,
            preview_sample: 3,
            spot_check_sample: 5,
        }
    }
}

impl JobConfig {
    /// Upper bound on documents processed for this operation.
    pub fn max_records_for(&self, operation: Operation) -> usize {
        self.max_records.unwrap_or(match operation {
            Operation::Add => self.max_records_add,
            Operation::Remove | Operation::Revert => self.max_records_remove,
        })
    }
}

/// Accept `121` as well as `"121"`; environment overrides arrive as numbers.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Int(i64),
        Float(f64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s,
        Raw::Int(i) => i.to_string(),
        Raw::Float(f) => f.to_string(),
    })
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let mut config: Self = Self::figment(args).extract()?;

        if let Some(max_records) = args.max_records {
            config.job.max_records = Some(max_records);
        }

        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            .merge(Yaml::file(&args.config))
            .merge(Env::prefixed("USAGECTL_").ignore(&["CONFIG"]).split("__"))
            .merge(Env::raw().only(&["COSMOSDB_ENDPOINT"]).map(|_| "store.endpoint".into()))
            .merge(Env::raw().only(&["COSMOSDB_KEY"]).map(|_| "store.key".into()))
    }

    /// Validate the configuration for consistency and required fields
    pub fn validate(&self) -> Result<(), Error> {
        let invalid = |message: &str| Error::Config {
            message: message.to_string(),
        };

        let Some(endpoint) = &self.store.endpoint else {
            return Err(invalid(
                "store.endpoint is not set. Set COSMOSDB_ENDPOINT or add store.endpoint to the config file.",
            ));
        };
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(Error::Config {
                message: format!("store.endpoint must be an http(s) URL, got {endpoint}"),
            });
        }

        if self.store.key.trim().is_empty() {
            return Err(invalid("store.key is not set. Set COSMOSDB_KEY or add store.key to the config file."));
        }
        if auth::decode_key(&self.store.key).is_none() {
            return Err(invalid("store.key is not a valid base64 master key"));
        }

        if self.store.database.trim().is_empty() {
            return Err(invalid("store.database cannot be empty"));
        }
        if self.store.container.trim().is_empty() {
            return Err(invalid("store.container cannot be empty"));
        }
        if self.store.page_size == 0 {
            return Err(invalid("store.page_size must be at least 1"));
        }

        if self.job.actor_id.trim().is_empty() {
            return Err(invalid("job.actor_id cannot be empty"));
        }
        if self.job.role.trim().is_empty() {
            return Err(invalid("job.role cannot be empty"));
        }
        if self.job.max_records_add == 0 || self.job.max_records_remove == 0 || self.job.max_records == Some(0) {
            return Err(invalid("max_records bounds must be at least 1"));
        }
        if self.job.progress_interval == 0 {
            return Err(invalid("job.progress_interval must be at least 1"));
        }

        Ok(())
    }
}
