/// Destination directory provisioning.
///
/// Creates category and subcategory directories under the destination root.
/// Creation is idempotent, and a category whose directory cannot be created
/// stays failed for the rest of the run without stopping other categories.
use crate::category_table::{CategoryPath, CategoryTable};
use crate::logging::EventKind;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// A category directory could not be created.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Failed to create directory {}: {reason}", path.display())]
pub struct ProvisionError {
    pub path: PathBuf,
    pub reason: String,
}

/// Ensures category directories exist, once per category per run.
#[derive(Debug)]
pub struct DirectoryProvisioner {
    root: PathBuf,
    ensured: HashSet<CategoryPath>,
    failed: HashMap<CategoryPath, ProvisionError>,
}

impl DirectoryProvisioner {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ensured: HashSet::new(),
            failed: HashMap::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Ensures the directory for `category` exists and returns its path.
    ///
    /// Intermediate directories (the category above a subcategory, and the
    /// root itself) are created as needed. Calling this again for the same
    /// category is a no-op; a category that failed once keeps returning the
    /// same error.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use file_sorter::category_table::CategoryPath;
    /// use file_sorter::provisioner::DirectoryProvisioner;
    ///
    /// let mut provisioner = DirectoryProvisioner::new("/sorted");
    /// let dir = provisioner.ensure(&CategoryPath::nested("Documents", "PDF"))?;
    /// assert!(dir.ends_with("Documents/PDF"));
    /// # Ok::<(), file_sorter::provisioner::ProvisionError>(())
    /// ```
    pub fn ensure(&mut self, category: &CategoryPath) -> Result<PathBuf, ProvisionError> {
        let dir = category.to_path(&self.root);

        if let Some(err) = self.failed.get(category) {
            return Err(err.clone());
        }
        if self.ensured.contains(category) {
            return Ok(dir);
        }

        let existed = dir.is_dir();
        match fs::create_dir_all(&dir) {
            Ok(()) => {
                tracing::info!(
                    event = EventKind::CreatedDir.as_str(),
                    category = %category,
                    path = %dir.display(),
                    existed,
                    "ensured category directory"
                );
                self.ensured.insert(category.clone());
                Ok(dir)
            }
            Err(e) => {
                tracing::error!(
                    event = EventKind::Failed.as_str(),
                    category = %category,
                    path = %dir.display(),
                    error = %e,
                    "failed to create category directory; files for this category will fail"
                );
                let err = ProvisionError {
                    path: dir,
                    reason: e.to_string(),
                };
                self.failed.insert(category.clone(), err.clone());
                Err(err)
            }
        }
    }

    /// Ensures every category of `table` up front.
    ///
    /// Returns the number of categories that could not be provisioned.
    pub fn ensure_all(&mut self, table: &CategoryTable) -> usize {
        table
            .category_paths()
            .filter(|category| self.ensure(category).is_err())
            .count()
    }

    /// The recorded failure for `category`, if provisioning it failed.
    pub fn failure(&self, category: &CategoryPath) -> Option<&ProvisionError> {
        self.failed.get(category)
    }
}
