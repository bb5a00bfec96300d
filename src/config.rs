//! Sorter configuration and file filtering rules.
//!
//! This module loads the sorter's settings from a TOML file. It covers:
//! - Source and destination paths
//! - The category table (flat and nested categories, in declaration order)
//! - Retry policy for locked files
//! - Directory provisioning mode
//! - Logging level and log file
//! - Exclusion filters (exact names, globs, extensions, regexes)
//!
//! # Configuration File Format
//!
//! ```toml
//! [paths]
//! source = "~/Downloads"
//! destination = "~/Documents/_SortedFiles"
//!
//! [retry]
//! max_attempts = 3
//! backoff_secs = 60
//!
//! [sorting]
//! provisioning = "eager"
//!
//! [logging]
//! level = "info"
//! file = "~/Documents/_SortedFiles/file_sorter.log"
//!
//! [categories]
//! Images = [".png", ".jpg", ".jpeg"]
//! Documents = { PDF = [".pdf"], Text = [".txt"] }
//!
//! [filters]
//! enable_hidden_files = false
//!
//! [filters.exclude]
//! filenames = ["desktop.ini"]
//! patterns = ["*.crdownload", "*.part"]
//! extensions = ["tmp"]
//! regex = []
//!
//! [filters.include]
//! patterns = []
//! ```
//!
//! Categories keep the order they are written in, and the first matching
//! category wins. A nested category written as a `[categories.Name]` header
//! always comes after every key of the `[categories]` table itself, so use
//! inline tables when a nested category must be checked before a flat one.

use crate::category_table::{CategoryTable, TableError};
use crate::mover::{DEFAULT_BACKOFF, DEFAULT_MAX_ATTEMPTS, RetryPolicy};
use glob::Pattern;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// File name of the per-directory configuration file.
pub const LOCAL_CONFIG_FILE: &str = ".file-sorter.toml";

/// File name of the log written under the destination root by default.
pub const DEFAULT_LOG_FILE: &str = "file_sorter.log";

/// Errors that can occur during configuration loading and filtering.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Configuration file not found at the specified path.
    #[error("Configuration file not found: {}", .0.display())]
    ConfigNotFound(PathBuf),
    /// Invalid TOML syntax or structure.
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),
    /// The `[categories]` section does not describe a valid table.
    #[error("Invalid category table: {0}")]
    InvalidCategories(String),
    /// Invalid glob pattern provided.
    #[error("Invalid glob pattern '{0}': expected *.ext or dir/**")]
    InvalidGlobPattern(String),
    /// Invalid regex pattern provided with the actual error reason.
    #[error("Invalid regex pattern '{pattern}': {reason}")]
    InvalidRegexPattern {
        /// The regex pattern that failed to compile.
        pattern: String,
        /// The reason why the pattern is invalid.
        reason: String,
    },
    /// No destination configured and no home directory to default to.
    #[error("No destination configured and $HOME is not set")]
    HomeNotFound,
    /// IO error while reading configuration.
    #[error("IO error reading configuration: {0}")]
    IoError(String),
}

impl From<TableError> for ConfigError {
    fn from(err: TableError) -> Self {
        ConfigError::InvalidCategories(err.to_string())
    }
}

/// When category directories are created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provisioning {
    /// Create every category directory before processing any file.
    #[default]
    Eager,
    /// Create a category directory the first time a file needs it.
    Lazy,
}

/// Root of the TOML configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SorterConfig {
    #[serde(default)]
    pub paths: PathSettings,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub sorting: SortingSettings,

    #[serde(default)]
    pub logging: LoggingSettings,

    /// Category name to either a suffix array or a table of subcategories.
    /// `None` selects [`CategoryTable::default`].
    #[serde(default)]
    pub categories: Option<toml::Table>,

    #[serde(default)]
    pub filters: FilterRules,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PathSettings {
    pub source: Option<PathBuf>,
    pub destination: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Total attempts for a move hitting a permission-class error.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Pause between attempts, in seconds.
    #[serde(default = "default_backoff_secs")]
    pub backoff_secs: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_secs: default_backoff_secs(),
        }
    }
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_backoff_secs() -> u64 {
    DEFAULT_BACKOFF.as_secs()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SortingSettings {
    #[serde(default)]
    pub provisioning: Provisioning,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log file path. Defaults to `file_sorter.log` under the destination.
    pub file: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Rules for dropping entries from the source listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterRules {
    /// Whether to include hidden files (starting with "."). Defaults to false.
    #[serde(default = "default_enable_hidden_files")]
    pub enable_hidden_files: bool,

    /// Rules for excluding files.
    #[serde(default)]
    pub exclude: ExcludeRules,

    /// Rules for including files (whitelist, overrides exclude rules).
    #[serde(default)]
    pub include: IncludeRules,
}

impl Default for FilterRules {
    fn default() -> Self {
        Self {
            enable_hidden_files: default_enable_hidden_files(),
            exclude: ExcludeRules::default(),
            include: IncludeRules::default(),
        }
    }
}

fn default_enable_hidden_files() -> bool {
    false
}

/// Rules for excluding files from sorting.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExcludeRules {
    /// Exact filenames to exclude (e.g., "desktop.ini", "Thumbs.db").
    #[serde(default)]
    pub filenames: Vec<String>,

    /// Glob patterns to exclude (e.g., "*.part", "*.crdownload").
    #[serde(default)]
    pub patterns: Vec<String>,

    /// File extensions to exclude, without the dot (e.g., "tmp").
    #[serde(default)]
    pub extensions: Vec<String>,

    /// Regex patterns matched against the file name.
    #[serde(default)]
    pub regex: Vec<String>,
}

/// Rules for including files, overriding exclude rules (whitelist).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IncludeRules {
    #[serde(default)]
    pub patterns: Vec<String>,
}

impl SorterConfig {
    /// Load configuration from a file, with fallback to defaults.
    ///
    /// Attempts to load configuration in the following order:
    /// 1. If `config_path` is provided, load from that file
    /// 2. Look for `.file-sorter.toml` in the current directory
    /// 3. Look for `~/.config/file-sorter/config.toml` in home directory
    /// 4. Fall back to default configuration
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration file is explicitly provided but cannot be read,
    /// or if any discovered file is not valid TOML.
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = config_path {
            return Self::load_from_file(path);
        }

        let local_config = PathBuf::from(LOCAL_CONFIG_FILE);
        if local_config.exists() {
            return Self::load_from_file(&local_config);
        }

        if let Some(home) = home_dir() {
            let home_config = home.join(".config").join("file-sorter").join("config.toml");
            if home_config.exists() {
                return Self::load_from_file(&home_config);
            }
        }

        tracing::debug!("no configuration file found, using defaults");
        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ConfigNotFound` if file does not exist.
    /// Returns `ConfigError::ConfigInvalid` if TOML parsing fails.
    /// Returns `ConfigError::IoError` if file cannot be read.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::ConfigNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
        let config = Self::from_toml(&content)?;
        tracing::debug!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ConfigInvalid(e.to_string()))
    }

    /// Build the category table, preserving declaration order.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidCategories` when a value is neither an
    /// array of suffixes nor a table of subcategory suffix arrays, or when
    /// the resulting table fails validation.
    pub fn category_table(&self) -> Result<CategoryTable, ConfigError> {
        let Some(categories) = &self.categories else {
            return Ok(CategoryTable::default());
        };

        let mut builder = CategoryTable::builder();
        for (name, value) in categories {
            builder = match value {
                toml::Value::Array(items) => builder.flat(name, suffix_list(name, items)?),
                toml::Value::Table(subcategories) => {
                    let mut nested = Vec::with_capacity(subcategories.len());
                    for (sub_name, sub_value) in subcategories {
                        let toml::Value::Array(items) = sub_value else {
                            return Err(ConfigError::InvalidCategories(format!(
                                "'{}.{}' must be an array of suffixes",
                                name, sub_name
                            )));
                        };
                        nested.push((sub_name.clone(), suffix_list(sub_name, items)?));
                    }
                    builder.nested(name, nested)
                }
                _ => {
                    return Err(ConfigError::InvalidCategories(format!(
                        "'{}' must be an array of suffixes or a table of subcategories",
                        name
                    )));
                }
            };
        }

        Ok(builder.build()?)
    }

    /// The retry policy for locked files.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry.max_attempts,
            Duration::from_secs(self.retry.backoff_secs),
        )
    }

    /// The configured source directory, with `~/` expanded.
    pub fn source(&self) -> Option<PathBuf> {
        self.paths.source.as_deref().map(expand_home)
    }

    /// The configured destination root, or `~/Documents/_SortedFiles`.
    pub fn destination(&self) -> Result<PathBuf, ConfigError> {
        match self.paths.destination.as_deref() {
            Some(path) => Ok(expand_home(path)),
            None => home_dir()
                .map(|home| home.join("Documents").join("_SortedFiles"))
                .ok_or(ConfigError::HomeNotFound),
        }
    }

    /// Compile the filter rules for matching.
    pub fn compile_filters(&self) -> Result<CompiledFilters, ConfigError> {
        CompiledFilters::new(&self.filters)
    }
}

fn suffix_list(name: &str, items: &[toml::Value]) -> Result<Vec<String>, ConfigError> {
    items
        .iter()
        .map(|item| {
            item.as_str().map(str::to_string).ok_or_else(|| {
                ConfigError::InvalidCategories(format!("'{}' suffixes must be strings", name))
            })
        })
        .collect()
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

/// Expands a leading `~` to the home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~")
        && let Some(home) = home_dir()
    {
        return home.join(rest);
    }
    path.to_path_buf()
}

/// Compiled, optimized filter structures for efficient file matching.
///
/// Glob and regex patterns are parsed once so that checking an entry does
/// not reparse them.
#[derive(Debug)]
pub struct CompiledFilters {
    enable_hidden_files: bool,
    exclude_filenames: HashSet<String>,
    exclude_extensions: HashSet<String>,
    exclude_patterns: Vec<Pattern>,
    exclude_regexes: Vec<Regex>,
    include_patterns: Vec<Pattern>,
}

impl CompiledFilters {
    /// Create compiled filters from filter rules.
    ///
    /// # Errors
    ///
    /// Returns an error if any glob or regex patterns are invalid.
    pub fn new(rules: &FilterRules) -> Result<Self, ConfigError> {
        let exclude_patterns = compile_globs(&rules.exclude.patterns)?;
        let include_patterns = compile_globs(&rules.include.patterns)?;

        let exclude_regexes = rules
            .exclude
            .regex
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|e| ConfigError::InvalidRegexPattern {
                    pattern: pattern.clone(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            enable_hidden_files: rules.enable_hidden_files,
            exclude_filenames: rules.exclude.filenames.iter().cloned().collect(),
            exclude_extensions: rules
                .exclude
                .extensions
                .iter()
                .map(|ext| ext.trim_start_matches('.').to_lowercase())
                .collect(),
            exclude_patterns,
            exclude_regexes,
            include_patterns,
        })
    }

    /// Filters that keep every entry, hidden files included.
    pub fn allow_all() -> Self {
        Self {
            enable_hidden_files: true,
            exclude_filenames: HashSet::new(),
            exclude_extensions: HashSet::new(),
            exclude_patterns: Vec::new(),
            exclude_regexes: Vec::new(),
            include_patterns: Vec::new(),
        }
    }

    /// Check if a source entry should be sorted (not excluded).
    ///
    /// Only the file name is matched. Checks run in this order:
    /// 1. Include patterns (whitelist) - if matched, always include
    /// 2. Hidden file filter - if hidden and disabled, exclude
    /// 3. Exact filename match - if matched, exclude
    /// 4. File extension match - if matched, exclude
    /// 5. Glob pattern match - if matched, exclude
    /// 6. Regex pattern match - if matched, exclude
    /// 7. Default: include
    pub fn should_include(&self, file_name: &str) -> bool {
        if self.include_patterns.iter().any(|p| p.matches(file_name)) {
            return true;
        }

        if !self.enable_hidden_files && file_name.starts_with('.') {
            return false;
        }

        if self.exclude_filenames.contains(file_name) {
            return false;
        }

        if let Some(ext) = Path::new(file_name).extension()
            && self
                .exclude_extensions
                .contains(&ext.to_string_lossy().to_lowercase())
        {
            return false;
        }

        if self.exclude_patterns.iter().any(|p| p.matches(file_name)) {
            return false;
        }

        !self.exclude_regexes.iter().any(|r| r.is_match(file_name))
    }
}

impl Default for CompiledFilters {
    fn default() -> Self {
        // The default rules contain no patterns, so compilation cannot fail.
        Self::new(&FilterRules::default()).unwrap_or_else(|_| Self::allow_all())
    }
}

fn compile_globs(patterns: &[String]) -> Result<Vec<Pattern>, ConfigError> {
    patterns
        .iter()
        .map(|pattern| {
            Pattern::new(pattern).map_err(|_| ConfigError::InvalidGlobPattern(pattern.clone()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::category_table::{CategoryPath, Resolution};

    #[test]
    fn test_default_config() {
        let config = SorterConfig::default();
        assert!(!config.filters.enable_hidden_files);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.backoff_secs, 60);
        assert_eq!(config.sorting.provisioning, Provisioning::Eager);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.category_table().unwrap(), CategoryTable::default());
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = SorterConfig::from_toml("").unwrap();
        assert_eq!(config.retry_policy(), RetryPolicy::default());
        assert!(config.categories.is_none());
    }

    #[test]
    fn test_parse_full_config() {
        let config = SorterConfig::from_toml(
            r#"
[paths]
source = "/data/incoming"
destination = "/data/sorted"

[retry]
max_attempts = 5
backoff_secs = 2

[sorting]
provisioning = "lazy"

[logging]
level = "debug"
file = "/var/log/sorter.log"
"#,
        )
        .unwrap();

        assert_eq!(config.source(), Some(PathBuf::from("/data/incoming")));
        assert_eq!(config.destination().unwrap(), PathBuf::from("/data/sorted"));
        assert_eq!(
            config.retry_policy(),
            RetryPolicy::new(5, Duration::from_secs(2))
        );
        assert_eq!(config.sorting.provisioning, Provisioning::Lazy);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(
            config.logging.file,
            Some(PathBuf::from("/var/log/sorter.log"))
        );
    }

    #[test]
    fn test_categories_keep_declaration_order() {
        let config = SorterConfig::from_toml(
            r#"
[categories]
Archives = [".gz"]
Documents = { PDF = [".pdf"], Text = [".txt"] }
Tarballs = [".tar.gz"]
"#,
        )
        .unwrap();
        let table = config.category_table().unwrap();

        let paths: Vec<String> = table.category_paths().map(|p| p.to_string()).collect();
        assert_eq!(
            paths,
            vec!["Archives", "Documents/PDF", "Documents/Text", "Tarballs"]
        );
        assert_eq!(
            table.resolve("backup.tar.gz"),
            Resolution::Matched(CategoryPath::new("Archives"))
        );
        assert_eq!(
            table.resolve("notes.TXT"),
            Resolution::Matched(CategoryPath::nested("Documents", "Text"))
        );
    }

    #[test]
    fn test_nested_category_from_table_header() {
        let config = SorterConfig::from_toml(
            r#"
[categories]
Images = [".png"]

[categories.Scripts]
Python = [".py"]
Other = [".sh"]
"#,
        )
        .unwrap();
        let table = config.category_table().unwrap();
        assert_eq!(
            table.resolve("deploy.sh"),
            Resolution::Matched(CategoryPath::nested("Scripts", "Other"))
        );
    }

    #[test]
    fn test_invalid_category_value() {
        let config = SorterConfig::from_toml(
            r#"
[categories]
Images = ".png"
"#,
        )
        .unwrap();
        assert!(matches!(
            config.category_table(),
            Err(ConfigError::InvalidCategories(_))
        ));
    }

    #[test]
    fn test_invalid_subcategory_value() {
        let config = SorterConfig::from_toml(
            r#"
[categories]
Documents = { PDF = ".pdf" }
"#,
        )
        .unwrap();
        assert!(matches!(
            config.category_table(),
            Err(ConfigError::InvalidCategories(_))
        ));
    }

    #[test]
    fn test_invalid_toml() {
        let result = SorterConfig::from_toml("[retry\nmax_attempts = ");
        assert!(matches!(result, Err(ConfigError::ConfigInvalid(_))));
    }

    #[test]
    fn test_missing_explicit_config_file() {
        let result = SorterConfig::load(Some(Path::new("/definitely/not/here.toml")));
        assert!(matches!(result, Err(ConfigError::ConfigNotFound(_))));
    }

    #[test]
    fn test_hidden_file_excluded_by_default() {
        let filters = SorterConfig::default().compile_filters().unwrap();
        assert!(!filters.should_include(".DS_Store"));
        assert!(filters.should_include("photo.png"));
    }

    #[test]
    fn test_allow_all_keeps_hidden_files() {
        assert!(CompiledFilters::allow_all().should_include(".hidden.png"));
    }

    #[test]
    fn test_exclude_rules() {
        let rules = FilterRules {
            enable_hidden_files: true,
            exclude: ExcludeRules {
                filenames: vec!["Thumbs.db".to_string()],
                patterns: vec!["*.crdownload".to_string()],
                extensions: vec![".TMP".to_string()],
                regex: vec![r"^~\$".to_string()],
            },
            include: IncludeRules::default(),
        };
        let filters = CompiledFilters::new(&rules).unwrap();

        assert!(!filters.should_include("Thumbs.db"));
        assert!(!filters.should_include("movie.mp4.crdownload"));
        assert!(!filters.should_include("scratch.tmp"));
        assert!(!filters.should_include("~$report.docx"));
        assert!(filters.should_include("report.docx"));
    }

    #[test]
    fn test_include_overrides_exclude() {
        let rules = FilterRules {
            enable_hidden_files: false,
            exclude: ExcludeRules::default(),
            include: IncludeRules {
                patterns: vec![".important*".to_string()],
            },
        };
        let filters = CompiledFilters::new(&rules).unwrap();

        assert!(filters.should_include(".important.txt"));
        assert!(!filters.should_include(".other"));
    }

    #[test]
    fn test_invalid_patterns_return_error() {
        let mut rules = FilterRules::default();
        rules.exclude.regex = vec!["[invalid(".to_string()];
        assert!(matches!(
            CompiledFilters::new(&rules),
            Err(ConfigError::InvalidRegexPattern { .. })
        ));

        let mut rules = FilterRules::default();
        rules.exclude.patterns = vec!["[invalid".to_string()];
        assert!(matches!(
            CompiledFilters::new(&rules),
            Err(ConfigError::InvalidGlobPattern(_))
        ));
    }

    #[test]
    fn test_expand_home_leaves_plain_paths() {
        assert_eq!(
            expand_home(Path::new("/srv/files")),
            PathBuf::from("/srv/files")
        );
    }
}
