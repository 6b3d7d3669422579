use std::path::{Path, PathBuf};

use iocat_core::{ChangeEntry, ImageKey, Mutation, WriterIdentity};
use iocat_engine::{Catalog, CatalogConfig, ConflictReport, EngineError, ImageRecord};

/// One device holding its own copy of a catalog file.
pub struct TestPeer {
    pub name: String,
    pub catalog: Catalog,
}

impl TestPeer {
    /// Start a brand-new catalog at `dir/<name>.iocat`.
    pub fn create(dir: &Path, name: &str) -> Result<Self, EngineError> {
        let path = dir.join(format!("{name}.iocat"));
        let catalog = Catalog::create(&path, WriterIdentity::generate(name), config(name))?;
        Ok(Self {
            name: name.to_string(),
            catalog,
        })
    }

    /// Take a byte copy of `source` and open it as a new writer.
    pub fn copy_of(dir: &Path, name: &str, source: &Path) -> Result<Self, EngineError> {
        let path = dir.join(format!("{name}.iocat"));
        std::fs::copy(source, &path)?;
        Self::open(&path, name)
    }

    pub fn open(path: &Path, name: &str) -> Result<Self, EngineError> {
        let catalog = Catalog::open(path, WriterIdentity::generate(name), config(name))?;
        Ok(Self {
            name: name.to_string(),
            catalog,
        })
    }

    pub fn path(&self) -> PathBuf {
        self.catalog.path().to_path_buf()
    }

    pub fn add(&mut self, key: &str) -> Result<ChangeEntry, EngineError> {
        self.catalog.add_image(ImageKey::new(key)?)
    }

    pub fn tag(&mut self, key: &str, tags: &[&str]) -> Result<ChangeEntry, EngineError> {
        self.catalog
            .apply(Mutation::add_tags(ImageKey::new(key)?, tags.iter().copied()))
    }

    pub fn untag(&mut self, key: &str, tags: &[&str]) -> Result<ChangeEntry, EngineError> {
        self.catalog
            .apply(Mutation::remove_tags(ImageKey::new(key)?, tags.iter().copied()))
    }

    pub fn rename(&mut self, key: &str, name: Option<&str>) -> Result<ChangeEntry, EngineError> {
        self.catalog
            .apply(Mutation::set_filename(ImageKey::new(key)?, name))
    }

    pub fn remove(&mut self, key: &str) -> Result<ChangeEntry, EngineError> {
        self.catalog.remove_image(&ImageKey::new(key)?)
    }

    pub fn record(&self, key: &str) -> Option<&ImageRecord> {
        ImageKey::new(key).ok().and_then(|k| self.catalog.record(&k))
    }

    /// Sorted tags of a live image, empty if it is absent.
    pub fn tags(&self, key: &str) -> Vec<String> {
        self.record(key)
            .map(|r| r.tags.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn sync_with(&mut self, other: &Path) -> Result<ConflictReport, EngineError> {
        self.catalog.sync_with(other)
    }
}

fn config(name: &str) -> CatalogConfig {
    CatalogConfig {
        writer_name: name.to_string(),
        ..CatalogConfig::default()
    }
}
