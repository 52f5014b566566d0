//! TOML configuration.
//!
//! Every section and key is optional; missing values take the defaults
//! below. [`load_config`] validates the result before anything runs.
//!
//! ```toml
//! [db]
//! path = "./data/csvault.sqlite"
//!
//! [import]
//! delimiter = ","        # sniffed per file when absent
//! quote = "\""
//! trim = true
//! header = "auto"        # auto | present | absent
//! column_tolerance = 1
//! table_prefix = "csv_"
//! batch_size = 500
//! recursive = false
//! exclude_globs = []
//!
//! [search]
//! workers = 1
//! limit = 50
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use csvault_core::import::ImportOptions;
use csvault_core::recovery::{HeaderMode, ParseOptions};
use csvault_core::search::SearchOptions;
use csvault_core::table::DEFAULT_TABLE_PREFIX;

/// Config file used when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "./config/csvault.toml";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub import: ImportConfig,
    #[serde(default)]
    pub search: SearchConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/csvault.sqlite")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ImportConfig {
    /// Single character; sniffed per file when absent.
    #[serde(default)]
    pub delimiter: Option<String>,
    #[serde(default = "default_quote")]
    pub quote: String,
    #[serde(default = "default_true")]
    pub trim: bool,
    #[serde(default)]
    pub header: HeaderMode,
    #[serde(default = "default_column_tolerance")]
    pub column_tolerance: usize,
    #[serde(default = "default_table_prefix")]
    pub table_prefix: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub recursive: bool,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            delimiter: None,
            quote: default_quote(),
            trim: true,
            header: HeaderMode::Auto,
            column_tolerance: default_column_tolerance(),
            table_prefix: default_table_prefix(),
            batch_size: default_batch_size(),
            recursive: false,
            exclude_globs: Vec::new(),
        }
    }
}

fn default_quote() -> String {
    "\"".to_string()
}
fn default_true() -> bool {
    true
}
fn default_column_tolerance() -> usize {
    1
}
fn default_table_prefix() -> String {
    DEFAULT_TABLE_PREFIX.to_string()
}
fn default_batch_size() -> usize {
    500
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            limit: default_limit(),
        }
    }
}

fn default_workers() -> usize {
    1
}
fn default_limit() -> usize {
    50
}

impl ImportConfig {
    /// Engine options for one run. Call on a validated config.
    pub fn to_options(&self, dry_run: bool) -> Result<ImportOptions> {
        let delimiter = match &self.delimiter {
            Some(d) => Some(single_byte("import.delimiter", d)?),
            None => None,
        };
        Ok(ImportOptions {
            parse: ParseOptions {
                delimiter,
                quote: single_byte("import.quote", &self.quote)?,
                trim: self.trim,
                header: self.header,
                column_tolerance: self.column_tolerance,
            },
            table_prefix: self.table_prefix.clone(),
            batch_size: self.batch_size,
            dry_run,
        })
    }
}

impl SearchConfig {
    pub fn to_options(&self, tables: Option<Vec<String>>) -> SearchOptions {
        SearchOptions {
            workers: self.workers,
            tables,
        }
    }
}

fn single_byte(key: &str, value: &str) -> Result<u8> {
    match value.as_bytes() {
        [b] if b.is_ascii() => Ok(*b),
        _ => anyhow::bail!("{} must be a single ASCII character, got {:?}", key, value),
    }
}

/// Load the config at `path`, or the defaults when `path` is the default
/// location and no file exists there.
pub fn load_or_default(path: &Path) -> Result<Config> {
    if path == Path::new(DEFAULT_CONFIG_PATH) && !path.exists() {
        let config = Config::default();
        validate(&config)?;
        return Ok(config);
    }
    load_config(path)
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    let import = &config.import;

    let quote = single_byte("import.quote", &import.quote)?;
    if matches!(quote, b'\n' | b'\r') {
        anyhow::bail!("import.quote must not be a line break");
    }
    if let Some(d) = &import.delimiter {
        let delimiter = single_byte("import.delimiter", d)?;
        if matches!(delimiter, b'\n' | b'\r') {
            anyhow::bail!("import.delimiter must not be a line break");
        }
        if delimiter == quote {
            anyhow::bail!("import.delimiter and import.quote must differ");
        }
    }

    if import.batch_size == 0 {
        anyhow::bail!("import.batch_size must be > 0");
    }

    let prefix_ok = import
        .table_prefix
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !import
            .table_prefix
            .starts_with(|c: char| c.is_ascii_digit());
    if !prefix_ok {
        anyhow::bail!(
            "import.table_prefix must start with a letter or '_' and contain only [A-Za-z0-9_], got '{}'",
            import.table_prefix
        );
    }

    for glob in &import.exclude_globs {
        globset::Glob::new(glob)
            .with_context(|| format!("Invalid glob in import.exclude_globs: '{}'", glob))?;
    }

    if config.search.workers == 0 {
        anyhow::bail!("search.workers must be > 0");
    }
    if config.search.limit == 0 {
        anyhow::bail!("search.limit must be > 0");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_config(content: &str) -> (TempDir, PathBuf) {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("csvault.toml");
        std::fs::write(&path, content).unwrap();
        (tmp, path)
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let (_tmp, path) = write_config("");
        let config = load_config(&path).unwrap();
        assert_eq!(config.db.path, PathBuf::from("./data/csvault.sqlite"));
        assert_eq!(config.import.table_prefix, "csv_");
        assert_eq!(config.import.column_tolerance, 1);
        assert_eq!(config.import.header, HeaderMode::Auto);
        assert_eq!(config.search.workers, 1);

        let options = config.import.to_options(false).unwrap();
        assert_eq!(options.parse.delimiter, None);
        assert_eq!(options.parse.quote, b'"');
        assert_eq!(options.batch_size, 500);
    }

    #[test]
    fn test_full_config() {
        let (_tmp, path) = write_config(
            r#"
[db]
path = "/tmp/x.sqlite"

[import]
delimiter = ";"
header = "absent"
table_prefix = ""
recursive = true
exclude_globs = ["**/tmp/**"]

[search]
workers = 4
limit = 10
"#,
        );
        let config = load_config(&path).unwrap();
        assert!(config.import.recursive);
        assert_eq!(config.import.header, HeaderMode::Absent);
        let options = config.import.to_options(true).unwrap();
        assert_eq!(options.parse.delimiter, Some(b';'));
        assert!(options.dry_run);
        assert_eq!(config.search.to_options(None).workers, 4);
    }

    #[test]
    fn test_rejects_invalid_values() {
        for bad in [
            "[import]\ndelimiter = \",,\"",
            "[import]\ndelimiter = \"\\\"\"",
            "[import]\ndelimiter = \"\\n\"",
            "[import]\nbatch_size = 0",
            "[import]\ntable_prefix = \"1x\"",
            "[import]\ntable_prefix = \"a-b\"",
            "[import]\nheader = \"maybe\"",
            "[search]\nworkers = 0",
        ] {
            let (_tmp, path) = write_config(bad);
            assert!(load_config(&path).is_err(), "accepted: {}", bad);
        }
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        assert!(load_or_default(Path::new("/nonexistent/csvault.toml")).is_err());
    }
}
