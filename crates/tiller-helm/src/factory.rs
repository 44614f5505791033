//! Explicit kind-name to constructor table.
//!
//! The application registers every behavior kind it supports before
//! building the registry. The helm never discovers kinds on its own.

use std::collections::BTreeMap;

use crate::behavior::Behavior;

/// Constructor for one behavior kind.
pub type BehaviorConstructor = fn() -> Box<dyn Behavior>;

/// Table of known behavior kinds.
#[derive(Debug, Clone, Default)]
pub struct BehaviorFactory {
    constructors: BTreeMap<String, BehaviorConstructor>,
}

impl BehaviorFactory {
    /// Create an empty factory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `kind`. A second registration replaces the first.
    pub fn register(&mut self, kind: &str, constructor: BehaviorConstructor) {
        self.constructors.insert(kind.to_owned(), constructor);
    }

    /// Builder form of [`BehaviorFactory::register`].
    #[must_use]
    pub fn with(mut self, kind: &str, constructor: BehaviorConstructor) -> Self {
        self.register(kind, constructor);
        self
    }

    /// Whether `kind` is registered.
    pub fn knows(&self, kind: &str) -> bool {
        self.constructors.contains_key(kind)
    }

    /// Registered kind names, sorted.
    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }

    /// Fresh behavior of `kind` with default parameters.
    pub fn create(&self, kind: &str) -> Option<Box<dyn Behavior>> {
        self.constructors.get(kind).map(|construct| construct())
    }
}
