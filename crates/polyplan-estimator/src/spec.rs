//! Load-profile specification sources.
//!
//! A source resolves a key such as `distributed.filter.main` to a declared
//! `CostModel`. Sources may be remote or slow; the estimator reads through
//! `CachedSpecSource` so each key is fetched at most once.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use tracing::{debug, trace};

use crate::error::{EstimatorError, Result};
use crate::model::CostModel;

pub trait SpecSource: Send + Sync {
    /// `Ok(None)` means the key is not declared anywhere.
    fn lookup(&self, key: &str) -> Result<Option<CostModel>>;
}

/// Specifications held in memory, typically parsed from a YAML document
/// mapping keys to models.
#[derive(Debug, Clone, Default)]
pub struct InMemorySpecSource {
    specs: BTreeMap<String, CostModel>,
}

impl InMemorySpecSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_yaml_str(s: &str) -> Result<Self> {
        let specs: BTreeMap<String, CostModel> = serde_yaml::from_str(s)?;
        Self::from_map(specs)
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        let specs: BTreeMap<String, CostModel> = serde_json::from_str(s)?;
        Self::from_map(specs)
    }

    fn from_map(specs: BTreeMap<String, CostModel>) -> Result<Self> {
        for (key, model) in &specs {
            model.validate(key)?;
        }
        debug!(count = specs.len(), "loaded cost specifications");
        Ok(Self { specs })
    }

    pub fn insert(&mut self, key: impl Into<String>, model: CostModel) -> Result<()> {
        let key = key.into();
        model.validate(&key)?;
        self.specs.insert(key, model);
        Ok(())
    }

    /// Overlay `other` on top of `self`; keys in `other` win.
    pub fn merge(mut self, other: InMemorySpecSource) -> Self {
        self.specs.extend(other.specs);
        self
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.specs.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

impl SpecSource for InMemorySpecSource {
    fn lookup(&self, key: &str) -> Result<Option<CostModel>> {
        Ok(self.specs.get(key).cloned())
    }
}

/// Read-through cache over another source. Negative lookups are cached too.
pub struct CachedSpecSource<S> {
    inner: S,
    cache: RwLock<HashMap<String, Option<CostModel>>>,
    fetches: AtomicU64,
}

impl<S: SpecSource> CachedSpecSource<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            cache: RwLock::new(HashMap::new()),
            fetches: AtomicU64::new(0),
        }
    }

    /// Number of lookups forwarded to the inner source.
    pub fn fetches(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }

    pub fn invalidate(&self) {
        let mut cache = self.cache.write().unwrap_or_else(|p| p.into_inner());
        cache.clear();
    }
}

impl<S: SpecSource> SpecSource for CachedSpecSource<S> {
    fn lookup(&self, key: &str) -> Result<Option<CostModel>> {
        {
            let cache = self.cache.read().unwrap_or_else(|p| p.into_inner());
            if let Some(hit) = cache.get(key) {
                trace!(key, "spec cache hit");
                return Ok(hit.clone());
            }
        }
        self.fetches.fetch_add(1, Ordering::Relaxed);
        let fetched = self
            .inner
            .lookup(key)
            .map_err(|e| EstimatorError::Source(format!("{key}: {e}")))?;
        let mut cache = self.cache.write().unwrap_or_else(|p| p.into_inner());
        cache.insert(key.to_string(), fetched.clone());
        Ok(fetched)
    }
}

impl<S: SpecSource + ?Sized> SpecSource for std::sync::Arc<S> {
    fn lookup(&self, key: &str) -> Result<Option<CostModel>> {
        (**self).lookup(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"
local.filter.main:
  model: linear
  per_row_ms: 0.001
distributed.filter.main:
  model: piecewise
  points:
    - { rows: 0, ms: 5.0 }
    - { rows: 1000, ms: 6.0 }
"#;

    #[test]
    fn yaml_document_parses_both_models() {
        let src = InMemorySpecSource::from_yaml_str(DOC).unwrap();
        assert_eq!(src.len(), 2);
        assert!(matches!(
            src.lookup("distributed.filter.main").unwrap(),
            Some(CostModel::Piecewise { .. })
        ));
        assert!(src.lookup("nope").unwrap().is_none());
    }

    #[test]
    fn cache_fetches_each_key_once() {
        let cached = CachedSpecSource::new(InMemorySpecSource::from_yaml_str(DOC).unwrap());
        for _ in 0..3 {
            cached.lookup("local.filter.main").unwrap();
            cached.lookup("missing").unwrap();
        }
        assert_eq!(cached.fetches(), 2);
        cached.invalidate();
        cached.lookup("local.filter.main").unwrap();
        assert_eq!(cached.fetches(), 3);
    }

    #[test]
    fn invalid_model_is_rejected_on_load() {
        let doc = "k:\n  model: linear\n  per_row_ms: -1\n";
        assert!(matches!(
            InMemorySpecSource::from_yaml_str(doc),
            Err(EstimatorError::InvalidModel { .. })
        ));
    }
}
