use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};

use super::engine::AnalysisEngine;
use super::stub::{NullEngine, StubEngine};

/// Name-keyed set of analysis engines.
#[derive(Default)]
pub struct EngineRegistry {
    engines: HashMap<String, Arc<dyn AnalysisEngine>>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in engines (`stub`, `null`).
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(StubEngine::new());
        registry.register(NullEngine);
        registry
    }

    /// Register an engine under its `name()`, replacing any previous one.
    pub fn register<E: AnalysisEngine + 'static>(&mut self, engine: E) {
        self.engines
            .insert(engine.name().to_string(), Arc::new(engine));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn AnalysisEngine>> {
        self.engines.get(name).cloned()
    }

    /// Engine by name, with the registered names in the error.
    pub fn select(&self, name: &str) -> Result<Arc<dyn AnalysisEngine>> {
        self.get(name).ok_or_else(|| {
            anyhow!(
                "unknown analysis engine '{}' (registered: {})",
                name,
                self.list().join(", ")
            )
        })
    }

    /// Registered engine names, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<_> = self.engines.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_registry_lists_stub_and_null() {
        let registry = EngineRegistry::with_builtin();
        assert_eq!(registry.list(), vec!["null", "stub"]);
        assert!(EngineRegistry::new().get("stub").is_none());
    }

    #[test]
    fn select_reports_unknown_engines() {
        let registry = EngineRegistry::with_builtin();
        assert_eq!(registry.select("null").unwrap().name(), "null");

        let err = registry.select("yolo").err().expect("unknown engine");
        let message = err.to_string();
        assert!(message.contains("yolo"));
        assert!(message.contains("null, stub"));
    }
}
