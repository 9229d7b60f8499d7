use crate::domain::entities::{
    Destination, PipelineOptions, RunConfig, TerminationMode, MIN_PART_SIZE,
};
use crate::domain::errors::{ExportError, Result};
use crate::infrastructure::oracle::record_store::TableSource;
use clap::Parser;
use serde::Deserialize;
use std::fs::File;
use std::io::Read;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub source: SourceConfig,
    #[serde(default)]
    pub export: ExportConfig,
    pub destination: DestinationConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub username: String,
    pub password: Option<String>,
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub service: String,
    pub connection_string: Option<String>,
    pub pool_size: Option<u32>,
}

impl DatabaseConfig {
    pub fn get_connection_string(&self) -> String {
        self.connection_string
            .clone()
            .unwrap_or_else(|| format!("//{}:{}/{}", self.host, self.port, self.service))
    }

    /// The configured password, else `ORACLE_PASSWORD` from the environment.
    pub fn resolve_password(&self) -> String {
        self.password
            .clone()
            .or_else(|| std::env::var("ORACLE_PASSWORD").ok())
            .unwrap_or_default()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    pub schema: String,
    pub table: String,
    #[serde(default = "default_id_column")]
    pub id_column: String,
    pub columns: Option<Vec<String>>,
    #[serde(default)]
    pub termination: TerminationMode,
    pub prefetch_rows: Option<u32>,
}

impl SourceConfig {
    pub fn table_source(&self) -> TableSource {
        TableSource {
            schema: self.schema.clone(),
            table: self.table.clone(),
            id_column: self.id_column.clone(),
            columns: self.columns.clone(),
            prefetch_rows: self.prefetch_rows.unwrap_or(5000),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ExportConfig {
    pub page_size: usize,
    pub compress: bool,
    pub compression_level: u32,
    pub delimiter: String,
    pub file_block_size: usize,
    pub max_source_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for ExportConfig {
    fn default() -> Self {
        let opts = PipelineOptions::default();
        Self {
            page_size: 10_000,
            compress: true,
            compression_level: opts.compression_level,
            delimiter: (opts.delimiter as char).to_string(),
            file_block_size: opts.file_block_size,
            max_source_retries: opts.max_source_retries,
            retry_backoff_ms: opts.retry_backoff_ms,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DestinationConfig {
    File {
        path: PathBuf,
    },
    /// Multipart upload into an object store rooted at `store_root`.
    Remote {
        bucket: String,
        key: String,
        store_root: PathBuf,
        #[serde(default = "default_part_size")]
        part_size: usize,
        max_concurrent_parts: Option<usize>,
    },
}

fn default_port() -> u16 {
    1521
}

fn default_id_column() -> String {
    "id".to_string()
}

fn default_part_size() -> usize {
    MIN_PART_SIZE
}

#[derive(Parser, Debug, Default)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Path to configuration file (YAML or JSON)
    #[arg(short, long)]
    pub config: Option<String>,

    // Overrides for ad-hoc runs
    #[arg(long)]
    pub username: Option<String>,
    #[arg(long)]
    pub password: Option<String>,
    #[arg(long)]
    pub host: Option<String>,
    #[arg(long)]
    pub port: Option<u16>,
    #[arg(long)]
    pub service: Option<String>,
    #[arg(long)]
    pub schema: Option<String>,
    #[arg(long)]
    pub table: Option<String>,
    #[arg(long)]
    pub id_column: Option<String>,
    /// Write to this local file instead of the configured destination
    #[arg(short, long)]
    pub output: Option<PathBuf>,
    #[arg(long)]
    pub page_size: Option<usize>,
    /// Write plain CSV instead of gzip
    #[arg(long)]
    pub no_compress: bool,
    /// Stop on `ceil(count / page size)` pages instead of the first empty page
    #[arg(long)]
    pub count_termination: bool,
}

impl AppConfig {
    pub fn from_file(path: &str) -> Result<Self> {
        let mut file = File::open(path)?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;

        let config: AppConfig = if path.ends_with(".json") {
            serde_json::from_str(&contents)
                .map_err(|e| ExportError::ConfigError(format!("{}: {}", path, e)))?
        } else {
            serde_yaml::from_str(&contents)
                .map_err(|e| ExportError::ConfigError(format!("{}: {}", path, e)))?
        };

        Ok(config)
    }

    /// A config for an ad-hoc run with no file: everything comes from flags.
    pub fn from_cli(args: &CliArgs) -> Result<Self> {
        let missing = |flag: &str| ExportError::ConfigError(format!("--{} is required without --config", flag));
        Ok(Self {
            database: DatabaseConfig {
                username: args.username.clone().ok_or_else(|| missing("username"))?,
                password: args.password.clone(),
                host: args.host.clone().unwrap_or_else(|| "localhost".to_string()),
                port: args.port.unwrap_or_else(default_port),
                service: args.service.clone().ok_or_else(|| missing("service"))?,
                connection_string: None,
                pool_size: None,
            },
            source: SourceConfig {
                schema: args.schema.clone().ok_or_else(|| missing("schema"))?,
                table: args.table.clone().ok_or_else(|| missing("table"))?,
                id_column: default_id_column(),
                columns: None,
                termination: TerminationMode::EmptyPage,
                prefetch_rows: None,
            },
            export: ExportConfig::default(),
            destination: DestinationConfig::File {
                path: args.output.clone().ok_or_else(|| missing("output"))?,
            },
        })
    }

    pub fn merge_cli(&mut self, args: &CliArgs) {
        if let Some(u) = &args.username { self.database.username = u.clone(); }
        if let Some(p) = &args.password { self.database.password = Some(p.clone()); }
        if let Some(h) = &args.host { self.database.host = h.clone(); }
        if let Some(p) = args.port { self.database.port = p; }
        if let Some(s) = &args.service { self.database.service = s.clone(); }
        if let Some(s) = &args.schema { self.source.schema = s.clone(); }
        if let Some(t) = &args.table { self.source.table = t.clone(); }
        if let Some(c) = &args.id_column { self.source.id_column = c.clone(); }
        if let Some(o) = &args.output { self.destination = DestinationConfig::File { path: o.clone() }; }
        if let Some(n) = args.page_size { self.export.page_size = n; }
        if args.no_compress { self.export.compress = false; }
        if args.count_termination { self.source.termination = TerminationMode::Count; }
    }

    pub fn validate(&self) -> Result<()> {
        if self.database.username.trim().is_empty() {
            return Err(ExportError::ConfigError("database.username is required".into()));
        }
        if self.database.connection_string.is_none() && self.database.service.trim().is_empty() {
            return Err(ExportError::ConfigError(
                "database needs either connection_string or service".into(),
            ));
        }
        if self.database.pool_size == Some(0) {
            return Err(ExportError::ConfigError("database.pool_size must be at least 1".into()));
        }
        if self.source.schema.trim().is_empty() || self.source.table.trim().is_empty() {
            return Err(ExportError::ConfigError("source.schema and source.table are required".into()));
        }
        self.to_run_config()?.validate(MIN_PART_SIZE)
    }

    /// The settings of one export run.
    pub fn to_run_config(&self) -> Result<RunConfig> {
        let delimiter = match self.export.delimiter.as_bytes() {
            [b] if b.is_ascii() => *b,
            _ => {
                return Err(ExportError::ConfigError(format!(
                    "delimiter must be a single ASCII character, got {:?}",
                    self.export.delimiter
                )))
            }
        };

        // Record field names are lower case, whatever case the table uses.
        let mut options = PipelineOptions {
            id_column: self.source.id_column.to_lowercase(),
            columns: self
                .source
                .columns
                .as_ref()
                .map(|cols| cols.iter().map(|c| c.to_lowercase()).collect()),
            termination: self.source.termination,
            delimiter,
            compression_level: self.export.compression_level,
            file_block_size: self.export.file_block_size,
            max_source_retries: self.export.max_source_retries,
            retry_backoff_ms: self.export.retry_backoff_ms,
            ..PipelineOptions::default()
        };

        let destination = match &self.destination {
            DestinationConfig::File { path } => Destination::File { path: path.clone() },
            DestinationConfig::Remote {
                bucket,
                key,
                part_size,
                max_concurrent_parts,
                ..
            } => {
                options.part_size = *part_size;
                if let Some(n) = max_concurrent_parts {
                    options.max_concurrent_parts = *n;
                }
                Destination::Remote {
                    bucket: bucket.clone(),
                    key: key.clone(),
                }
            }
        };

        Ok(RunConfig::new(self.export.page_size, destination, self.export.compress).with_options(options))
    }
}
