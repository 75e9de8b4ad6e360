//! Source-id keyed data source constructors

use super::{
    BinanceHistoricalSource, DataSource, DataSourceError, FileDataSource, FileSourceConfig,
    RemoteSourceConfig,
};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Builds a ready-to-connect data source
pub type DataSourceConstructor =
    Arc<dyn Fn() -> Result<Arc<dyn DataSource>, DataSourceError> + Send + Sync>;

/// Explicit registry owned by the application layer
#[derive(Clone, Default)]
pub struct DataSourceRegistry {
    constructors: BTreeMap<String, DataSourceConstructor>,
}

impl DataSourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `file` and `binance` built from the given settings
    pub fn with_defaults(file: FileSourceConfig, remote: RemoteSourceConfig) -> Self {
        let mut registry = Self::new();
        registry.register("file", move || {
            Ok(Arc::new(FileDataSource::new(file.clone())) as Arc<dyn DataSource>)
        });
        registry.register("binance", move || {
            Ok(Arc::new(BinanceHistoricalSource::new(remote.clone())?) as Arc<dyn DataSource>)
        });
        registry
    }

    /// Register (or replace) a constructor
    pub fn register<F>(&mut self, id: impl Into<String>, constructor: F)
    where
        F: Fn() -> Result<Arc<dyn DataSource>, DataSourceError> + Send + Sync + 'static,
    {
        self.constructors.insert(id.into(), Arc::new(constructor));
    }

    pub fn create(&self, id: &str) -> Result<Arc<dyn DataSource>, DataSourceError> {
        let constructor = self
            .constructors
            .get(id)
            .ok_or_else(|| DataSourceError::UnknownSource(id.to_string()))?;
        constructor()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.constructors.contains_key(id)
    }

    pub fn ids(&self) -> Vec<&str> {
        self.constructors.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::InMemoryDataSource;

    #[test]
    fn test_defaults_registered() {
        let registry =
            DataSourceRegistry::with_defaults(FileSourceConfig::default(), RemoteSourceConfig::default());
        assert_eq!(registry.ids(), vec!["binance", "file"]);
        let file = registry.create("file").unwrap();
        assert_eq!(file.name(), "file");
    }

    #[test]
    fn test_custom_and_unknown() {
        let mut registry = DataSourceRegistry::new();
        registry.register("memory", || {
            Ok(Arc::new(InMemoryDataSource::new("memory", Vec::new())) as Arc<dyn DataSource>)
        });
        assert!(registry.contains("memory"));
        assert_eq!(registry.create("memory").unwrap().name(), "memory");
        assert!(matches!(
            registry.create("parquet"),
            Err(DataSourceError::UnknownSource(_))
        ));
    }
}
