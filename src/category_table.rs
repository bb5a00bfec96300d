/// Category table and resolver for sorting files by name suffix.
///
/// This module maps file names to destination categories (and optional
/// subcategories) using ordered, case-insensitive suffix rules.
///
/// # Examples
///
/// ```
/// use file_sorter::category_table::{CategoryPath, CategoryTable, Resolution};
///
/// let table = CategoryTable::builder()
///     .flat("Images", [".png", ".jpg"])
///     .nested("Documents", [("PDF", vec![".pdf"]), ("Text", vec![".txt"])])
///     .build()
///     .unwrap();
///
/// assert_eq!(
///     table.resolve("photo.PNG"),
///     Resolution::Matched(CategoryPath::new("Images"))
/// );
/// assert_eq!(
///     table.resolve("report.pdf"),
///     Resolution::Matched(CategoryPath::nested("Documents", "PDF"))
/// );
/// assert_eq!(table.resolve("unknown.xyz"), Resolution::Unclassified);
/// ```
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while building a category table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TableError {
    /// A category or subcategory name cannot be used as a directory name.
    #[error("invalid category name '{name}': must be a single, non-empty path segment")]
    InvalidName { name: String },
    /// A rule carries an empty suffix, which would match every file.
    #[error("category '{category}' has an empty suffix")]
    EmptySuffix { category: String },
    /// A category or subcategory has no suffixes at all.
    #[error("category '{category}' has no suffixes")]
    NoSuffixes { category: String },
    /// The same category path was declared twice.
    #[error("category '{path}' is declared more than once")]
    Duplicate { path: String },
}

/// Destination of a classified file, relative to the destination root.
///
/// Always one segment (`Images`) or two (`Documents/PDF`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct CategoryPath {
    category: String,
    subcategory: Option<String>,
}

impl CategoryPath {
    /// A top-level category.
    pub fn new(category: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            subcategory: None,
        }
    }

    /// A subcategory nested under `category`.
    pub fn nested(category: impl Into<String>, subcategory: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            subcategory: Some(subcategory.into()),
        }
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn subcategory(&self) -> Option<&str> {
        self.subcategory.as_deref()
    }

    /// Returns the path segments in order, category first.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.category.as_str()).chain(self.subcategory.as_deref())
    }

    /// Joins this category path under `root`.
    ///
    /// # Examples
    ///
    /// ```
    /// use file_sorter::category_table::CategoryPath;
    /// use std::path::Path;
    ///
    /// let path = CategoryPath::nested("Documents", "PDF");
    /// assert_eq!(path.to_path(Path::new("/sorted")), Path::new("/sorted/Documents/PDF"));
    /// ```
    pub fn to_path(&self, root: &Path) -> PathBuf {
        self.segments().fold(root.to_path_buf(), |acc, segment| acc.join(segment))
    }
}

impl fmt::Display for CategoryPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.subcategory {
            Some(sub) => write!(f, "{}/{}", self.category, sub),
            None => write!(f, "{}", self.category),
        }
    }
}

/// Result of resolving a file name against a [`CategoryTable`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The first matching rule's destination.
    Matched(CategoryPath),
    /// No rule matched. This is an expected outcome, not an error.
    Unclassified,
}

impl Resolution {
    pub fn category_path(&self) -> Option<&CategoryPath> {
        match self {
            Resolution::Matched(path) => Some(path),
            Resolution::Unclassified => None,
        }
    }
}

/// A single suffix rule.
///
/// A nested category is represented by consecutive rules sharing the same
/// `category`, one per subcategory, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryRule {
    path: CategoryPath,
    suffixes: Vec<String>,
}

impl CategoryRule {
    pub fn path(&self) -> &CategoryPath {
        &self.path
    }

    /// The normalized (lowercase, dot-prefixed) suffixes of this rule.
    pub fn suffixes(&self) -> &[String] {
        &self.suffixes
    }

    fn matches(&self, lowered_name: &str) -> bool {
        self.suffixes
            .iter()
            .any(|suffix| lowered_name.ends_with(suffix.as_str()))
    }
}

/// Two rules that share a suffix. The earlier rule always wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuffixOverlap {
    pub suffix: String,
    pub winner: CategoryPath,
    pub shadowed: CategoryPath,
}

/// Ordered, immutable set of category rules.
///
/// Rules are evaluated in declaration order and the first rule whose suffix
/// set matches the file name wins. Overlapping suffixes are a configuration
/// hazard: they are reported by [`CategoryTable::overlaps`], never merged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryTable {
    rules: Vec<CategoryRule>,
}

impl CategoryTable {
    /// Starts building a table.
    pub fn builder() -> CategoryTableBuilder {
        CategoryTableBuilder::default()
    }

    pub fn rules(&self) -> &[CategoryRule] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Resolves a file name to its destination category.
    ///
    /// Matching is a case-insensitive suffix comparison on the file name.
    /// A nested category matches only through one of its subcategories;
    /// there is no fallback to the parent directory.
    ///
    /// # Examples
    ///
    /// ```
    /// use file_sorter::category_table::{CategoryPath, CategoryTable, Resolution};
    ///
    /// let table = CategoryTable::default();
    /// assert_eq!(
    ///     table.resolve("data.CSV"),
    ///     Resolution::Matched(CategoryPath::nested("Datasets", "CSV"))
    /// );
    /// assert_eq!(table.resolve("README"), Resolution::Unclassified);
    /// ```
    pub fn resolve(&self, file_name: &str) -> Resolution {
        let lowered = file_name.to_lowercase();
        self.rules
            .iter()
            .find(|rule| rule.matches(&lowered))
            .map(|rule| Resolution::Matched(rule.path.clone()))
            .unwrap_or(Resolution::Unclassified)
    }

    /// Every distinct destination in declaration order.
    pub fn category_paths(&self) -> impl Iterator<Item = &CategoryPath> {
        self.rules.iter().map(|rule| &rule.path)
    }

    /// Lists suffixes declared by more than one rule.
    pub fn overlaps(&self) -> Vec<SuffixOverlap> {
        let mut first_owner: HashMap<&str, &CategoryPath> = HashMap::new();
        let mut overlaps = Vec::new();

        for rule in &self.rules {
            for suffix in &rule.suffixes {
                match first_owner.get(suffix.as_str()) {
                    Some(winner) => overlaps.push(SuffixOverlap {
                        suffix: suffix.clone(),
                        winner: (*winner).clone(),
                        shadowed: rule.path.clone(),
                    }),
                    None => {
                        first_owner.insert(suffix, &rule.path);
                    }
                }
            }
        }

        overlaps
    }
}

impl Default for CategoryTable {
    /// The stock table: media, documents, installers, datasets and scripts.
    fn default() -> Self {
        let built = Self::builder()
            .flat("Images", [".png", ".jpg", ".jpeg"])
            .flat("Videos", [".mp4", ".mov", ".avi"])
            .flat("GIFs", [".gif"])
            .flat("Documents", [".pdf", ".docx", ".txt"])
            .flat("Audio", [".mp3", ".wav", ".ogg"])
            .flat("Installers", [".exe", ".msi", ".zip", ".rar"])
            .nested(
                "Datasets",
                [("CSV", vec![".csv"]), ("Other", vec![".xlsx", ".xls"])],
            )
            .nested(
                "Scripts",
                [
                    ("Python", vec![".py"]),
                    ("Other", vec![".sh", ".bat", ".ps1", ".js", ".rb", ".php"]),
                ],
            )
            .flat("JNotebooks", [".ipynb"])
            .build();

        // The stock rules are all valid; an empty table is the only safe fallback.
        built.unwrap_or(Self { rules: Vec::new() })
    }
}

/// Builder collecting rules in declaration order.
///
/// Validation happens once, in [`CategoryTableBuilder::build`].
#[derive(Debug, Default)]
pub struct CategoryTableBuilder {
    pending: Vec<(CategoryPath, Vec<String>)>,
    empty_nested: Vec<String>,
}

impl CategoryTableBuilder {
    /// Adds a top-level category matching any of `suffixes`.
    pub fn flat<I, S>(mut self, category: &str, suffixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.pending.push((
            CategoryPath::new(category),
            suffixes.into_iter().map(|s| s.as_ref().to_string()).collect(),
        ));
        self
    }

    /// Adds a category whose files are split into subcategories.
    pub fn nested<I, N, S>(mut self, category: &str, subcategories: I) -> Self
    where
        I: IntoIterator<Item = (N, Vec<S>)>,
        N: AsRef<str>,
        S: AsRef<str>,
    {
        let before = self.pending.len();
        for (name, suffixes) in subcategories {
            self.pending.push((
                CategoryPath::nested(category, name.as_ref()),
                suffixes.iter().map(|s| s.as_ref().to_string()).collect(),
            ));
        }
        if self.pending.len() == before {
            self.empty_nested.push(category.to_string());
        }
        self
    }

    /// Validates names and suffixes and produces the immutable table.
    pub fn build(self) -> Result<CategoryTable, TableError> {
        for category in &self.empty_nested {
            validate_segment(category)?;
            tracing::warn!(category = %category, "nested category has no subcategories and will never match");
        }

        let mut rules: Vec<CategoryRule> = Vec::with_capacity(self.pending.len());
        for (path, raw_suffixes) in self.pending {
            for segment in path.segments() {
                validate_segment(segment)?;
            }
            if rules.iter().any(|rule| rule.path == path) {
                return Err(TableError::Duplicate {
                    path: path.to_string(),
                });
            }
            if raw_suffixes.is_empty() {
                return Err(TableError::NoSuffixes {
                    category: path.to_string(),
                });
            }

            let suffixes = raw_suffixes
                .iter()
                .map(|raw| {
                    normalize_suffix(raw).ok_or_else(|| TableError::EmptySuffix {
                        category: path.to_string(),
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;

            rules.push(CategoryRule { path, suffixes });
        }

        let table = CategoryTable { rules };
        for overlap in table.overlaps() {
            tracing::warn!(
                suffix = %overlap.suffix,
                winner = %overlap.winner,
                shadowed = %overlap.shadowed,
                "suffix declared by more than one category; the first declaration wins"
            );
        }
        Ok(table)
    }
}

/// Lowercases a suffix and prefixes a dot when missing.
fn normalize_suffix(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "." {
        return None;
    }
    let lowered = trimmed.to_lowercase();
    if lowered.starts_with('.') {
        Some(lowered)
    } else {
        Some(format!(".{}", lowered))
    }
}

fn validate_segment(name: &str) -> Result<(), TableError> {
    let invalid = name.trim().is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\'])
        || name.contains('\0');
    if invalid {
        Err(TableError::InvalidName {
            name: name.to_string(),
        })
    } else {
        Ok(())
    }
}
