//! Peer locators.
//!
//! A locator answers "which peers might hold this UAID" when a notification
//! arrives for a device that is not connected locally. Only the static-list
//! flavor exists here. Locator flavors are registered explicitly by the
//! composition root in `main.rs` rather than through init-time side
//! effects, so wiring stays visible in one place.

use crate::config::LocatorSection;
use nudge_core::{PushError, PushResult};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

/// The peer location interface.
pub trait Locator: Send + Sync {
    /// Peer contact points for the given key.
    fn contacts(&self, key: &str) -> PushResult<Vec<String>>;

    /// Upper bound on parallel fan-out to peers.
    fn max_parallel(&self) -> usize;

    /// Release any resources held by the locator.
    fn close(&self) -> PushResult<()>;
}

/// `[locator.static]` settings.
#[derive(Debug, Clone, Deserialize)]
pub struct StaticLocatorConf {
    /// Peer contact points, returned verbatim.
    #[serde(default)]
    pub contacts: Vec<String>,
    /// Bounds parallel fan-out to peers.
    #[serde(default = "default_bucket_size")]
    pub bucket_size: usize,
}

impl Default for StaticLocatorConf {
    fn default() -> Self {
        Self {
            contacts: Vec::new(),
            bucket_size: default_bucket_size(),
        }
    }
}

fn default_bucket_size() -> usize {
    10
}

/// A locator with a fixed peer list from configuration.
pub struct StaticLocator {
    contacts: Vec<String>,
    bucket_size: usize,
}

impl StaticLocator {
    pub fn new(conf: StaticLocatorConf) -> Self {
        Self {
            contacts: conf.contacts,
            bucket_size: conf.bucket_size,
        }
    }
}

impl Locator for StaticLocator {
    fn contacts(&self, _key: &str) -> PushResult<Vec<String>> {
        Ok(self.contacts.clone())
    }

    fn max_parallel(&self) -> usize {
        self.bucket_size
    }

    fn close(&self) -> PushResult<()> {
        Ok(())
    }
}

type LocatorBuilder = Box<dyn Fn(&LocatorSection) -> PushResult<Arc<dyn Locator>> + Send + Sync>;

/// Named locator constructors, filled in by the composition root.
#[derive(Default)]
pub struct LocatorRegistry {
    builders: HashMap<String, LocatorBuilder>,
}

impl LocatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a locator flavor under a name.
    pub fn register<F>(&mut self, name: &str, builder: F)
    where
        F: Fn(&LocatorSection) -> PushResult<Arc<dyn Locator>> + Send + Sync + 'static,
    {
        self.builders.insert(name.to_owned(), Box::new(builder));
    }

    /// Build the locator named by the configuration.
    pub fn build(&self, name: &str, section: &LocatorSection) -> PushResult<Arc<dyn Locator>> {
        let builder = self
            .builders
            .get(name)
            .ok_or_else(|| PushError::Other(format!("unknown locator: {name}")))?;
        builder(section)
    }
}
