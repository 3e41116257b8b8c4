//! Template sources: where indicator query text comes from
//!
//! Templates are opaque text keyed by indicator id. The registry only needs
//! to look one up by id and to enumerate the ids a source knows about.

use cqi_common::{Error, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// File extension of on-disk templates
pub const TEMPLATE_EXTENSION: &str = "sql";

/// Keyed text store supplying indicator templates
pub trait TemplateSource: Send + Sync {
    /// Load the template for `indicator_id`; `Ok(None)` when the source has none
    fn load_template(&self, indicator_id: &str) -> Result<Option<String>>;

    /// Every id this source can supply, sorted
    fn list_ids(&self) -> Result<Vec<String>>;
}

/// Directory of `<indicator_id>.sql` files
pub struct FileTemplateSource {
    dir: PathBuf,
}

impl FileTemplateSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, indicator_id: &str) -> Result<PathBuf> {
        // Ids become file names; refuse anything that could escape the directory
        if indicator_id.is_empty()
            || indicator_id.contains(['/', '\\'])
            || indicator_id.starts_with('.')
        {
            return Err(Error::InvalidInput(format!(
                "Invalid indicator id: {:?}",
                indicator_id
            )));
        }
        Ok(self
            .dir
            .join(format!("{}.{}", indicator_id, TEMPLATE_EXTENSION)))
    }
}

impl TemplateSource for FileTemplateSource {
    fn load_template(&self, indicator_id: &str) -> Result<Option<String>> {
        let path = self.path_for(indicator_id)?;
        match std::fs::read_to_string(&path) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Io(e)),
        }
    }

    fn list_ids(&self) -> Result<Vec<String>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut ids = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(TEMPLATE_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }
}

/// In-memory template map (tests, embedded deployments)
#[derive(Default)]
pub struct MemoryTemplateSource {
    templates: BTreeMap<String, String>,
}

impl MemoryTemplateSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_template(mut self, indicator_id: impl Into<String>, text: impl Into<String>) -> Self {
        self.templates.insert(indicator_id.into(), text.into());
        self
    }

    pub fn insert(&mut self, indicator_id: impl Into<String>, text: impl Into<String>) {
        self.templates.insert(indicator_id.into(), text.into());
    }
}

impl TemplateSource for MemoryTemplateSource {
    fn load_template(&self, indicator_id: &str) -> Result<Option<String>> {
        Ok(self.templates.get(indicator_id).cloned())
    }

    fn list_ids(&self) -> Result<Vec<String>> {
        Ok(self.templates.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_source_loads_and_lists() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("1_percentage_died.sql"), "SELECT 1").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let source = FileTemplateSource::new(dir.path());
        assert_eq!(source.list_ids().unwrap(), vec!["1_percentage_died".to_string()]);
        assert_eq!(
            source.load_template("1_percentage_died").unwrap().as_deref(),
            Some("SELECT 1")
        );
        assert!(source.load_template("2_percentage_lost_to_followup").unwrap().is_none());
    }

    #[test]
    fn test_file_source_rejects_path_traversal() {
        let source = FileTemplateSource::new("/tmp");
        assert!(source.load_template("../etc/passwd").is_err());
    }

    #[test]
    fn test_missing_directory_lists_nothing() {
        let source = FileTemplateSource::new("/nonexistent/cqi/templates");
        assert!(source.list_ids().unwrap().is_empty());
    }
}
