use super::{LogDataSource, LogProvider};
use anyhow::{Result, anyhow};
use serde::Deserialize;
use std::{collections::BTreeMap, path::PathBuf, sync::Arc};

/// options a provider factory picks from, unused ones are ignored
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SourceOptions {
    pub file_name: Option<PathBuf>,
    pub command: Option<String>,
    pub arguments: Vec<String>,
    pub working_directory: Option<PathBuf>,
    /// `host:port` to listen on
    pub address: Option<String>,
    pub lines: Vec<String>,
}

type ProviderFactory = Box<dyn Fn(&SourceOptions) -> Result<Box<dyn LogProvider>> + Send + Sync>;

/// named provider factories
#[derive(Default)]
pub struct SourceRegistry {
    factories: BTreeMap<String, ProviderFactory>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// replaces any factory registered under the same name
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&SourceOptions) -> Result<Box<dyn LogProvider>> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Box::new(factory));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(|name| name.as_str())
    }

    pub fn create_provider(&self, name: &str, options: &SourceOptions) -> Result<Box<dyn LogProvider>> {
        let factory = self.factories.get(name).ok_or_else(|| {
            let known: Vec<_> = self.names().collect();
            anyhow!("unknown log source '{}', expected one of: {}", name, known.join(", "))
        })?;
        factory(options)
    }

    pub fn create_source(&self, name: &str, options: &SourceOptions) -> Result<Arc<LogDataSource>> {
        Ok(LogDataSource::from_boxed(self.create_provider(name, options)?))
    }
}
