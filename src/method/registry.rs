//! Lookup of transformation methods by name.

use super::{FilterMethod, FsaMethod, FusionMethod, MethodParams, MethodSetup, TransformMethod};
use crate::error::ConfigurationError;
use rustc_hash::FxHashMap;

/// Builds a method from its parameters, validating them completely.
pub type MethodFactory =
    fn(&MethodParams, &MethodSetup<'_>) -> Result<Box<dyn TransformMethod>, ConfigurationError>;

/// Named method factories.
///
/// # Examples
///
/// ```
/// use tracekit::method::{MethodParams, MethodRegistry, MethodSetup};
/// use tracekit::types::TraceModel;
/// use tracekit::EngineConfig;
///
/// let registry = MethodRegistry::default();
/// let model = TraceModel::new("http://example.org/m");
/// let config = EngineConfig::default();
/// let setup = MethodSetup { model: &model, source_count: 1, config: &config };
///
/// let params = MethodParams::new().with("after", "10").with("before", "20");
/// let method = registry.build("filter", &params, &setup).unwrap();
/// assert_eq!(method.name(), "filter");
/// assert!(registry.build("sparql", &MethodParams::new(), &setup).is_err());
/// ```
#[derive(Debug, Clone)]
pub struct MethodRegistry {
    factories: FxHashMap<String, MethodFactory>,
}

impl MethodRegistry {
    /// Registry without any method.
    pub fn empty() -> Self {
        Self {
            factories: FxHashMap::default(),
        }
    }

    /// Register (or replace) a method.
    pub fn register(&mut self, name: impl Into<String>, factory: MethodFactory) -> &mut Self {
        self.factories.insert(name.into(), factory);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered method names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn build(
        &self,
        name: &str,
        params: &MethodParams,
        setup: &MethodSetup<'_>,
    ) -> Result<Box<dyn TransformMethod>, ConfigurationError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| ConfigurationError::UnknownMethod(name.to_string()))?;
        factory(params, setup)
    }
}

impl Default for MethodRegistry {
    /// Registry holding the built-in methods `filter`, `fsa` and `fusion`.
    fn default() -> Self {
        let mut registry = Self::empty();
        registry
            .register(FilterMethod::NAME, FilterMethod::factory)
            .register(FsaMethod::NAME, FsaMethod::factory)
            .register(FusionMethod::NAME, FusionMethod::factory);
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::types::TraceModel;

    #[test]
    fn test_builtins_are_registered() {
        let registry = MethodRegistry::default();
        assert_eq!(registry.names(), vec!["filter", "fsa", "fusion"]);
    }

    #[test]
    fn test_unknown_method() {
        let registry = MethodRegistry::empty();
        let model = TraceModel::new("http://m");
        let config = EngineConfig::default();
        let setup = MethodSetup {
            model: &model,
            source_count: 1,
            config: &config,
        };
        let err = registry.build("filter", &MethodParams::new(), &setup).unwrap_err();
        assert_eq!(err, ConfigurationError::UnknownMethod("filter".to_string()));
    }
}
