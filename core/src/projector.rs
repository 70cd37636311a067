//! Dispatches facts to a projection's handlers.
//!
//! Handler tables are built once, at construction, from an explicit
//! function the application provides (`handlers()`), rather than
//! discovered by scanning annotated methods at runtime.

use std::collections::HashMap;

use crate::error::{CoreError, Result};
use crate::fact::{Fact, FactSpec, VersionRange};

type HandlerFn<P> = Box<dyn Fn(&mut P, &Fact) -> Result<()> + Send + Sync>;

struct ExactHandler<P> {
    spec: FactSpec,
    handler: HandlerFn<P>,
}

struct RangeHandler<P> {
    spec: FactSpec,
    handler: HandlerFn<P>,
}

/// A builder the application uses to register handlers, one call per
/// `(namespace, type, version)` or `(namespace, type, version range)` it
/// cares about.
pub struct HandlerTable<P> {
    exact: Vec<ExactHandler<P>>,
    ranged: Vec<RangeHandler<P>>,
}

impl<P> Default for HandlerTable<P> {
    fn default() -> Self {
        Self {
            exact: Vec::new(),
            ranged: Vec::new(),
        }
    }
}

impl<P> HandlerTable<P> {
    /// Start an empty handler table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for an exact `(namespace, type, version)`
    /// triple. Exact handlers always win over a range handler that would
    /// also match.
    #[must_use]
    pub fn on_exact(
        mut self,
        namespace: impl Into<String>,
        r#type: impl Into<String>,
        version: u32,
        handler: impl Fn(&mut P, &Fact) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        let spec = FactSpec::exact(namespace, r#type, version);
        self.exact.push(ExactHandler {
            spec,
            handler: Box::new(handler),
        });
        self
    }

    /// Register a handler for a version range, scanned in declaration
    /// order when no exact handler matches.
    #[must_use]
    pub fn on_range(
        mut self,
        namespace: impl Into<String>,
        r#type: impl Into<String>,
        version: VersionRange,
        handler: impl Fn(&mut P, &Fact) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        let spec = FactSpec {
            version,
            ..FactSpec::exact(namespace, r#type, 0)
        };
        self.ranged.push(RangeHandler {
            spec,
            handler: Box::new(handler),
        });
        self
    }
}

/// Dispatches incoming facts to a projection's registered handlers.
pub struct Projector<P> {
    exact: HashMap<(String, String, u32), HandlerFn<P>>,
    ranged: Vec<RangeHandler<P>>,
    specs: Vec<FactSpec>,
}

impl<P> Projector<P> {
    /// Build a projector from a handler table.
    #[must_use]
    pub fn new(table: HandlerTable<P>) -> Self {
        let mut specs = Vec::with_capacity(table.exact.len() + table.ranged.len());
        let mut exact = HashMap::with_capacity(table.exact.len());
        for entry in table.exact {
            let key = (
                entry.spec.namespace.clone(),
                entry.spec.r#type.clone(),
                match entry.spec.version {
                    VersionRange::Exact(v) => v,
                    VersionRange::AtLeast(v) => v,
                },
            );
            specs.push(entry.spec);
            exact.insert(key, entry.handler);
        }
        let ranged: Vec<_> = table.ranged;
        for entry in &ranged {
            specs.push(entry.spec.clone());
        }

        Self { exact, ranged, specs }
    }

    /// The fact specs this projector's subscription should request.
    #[must_use]
    pub fn fact_specs(&self) -> &[FactSpec] {
        &self.specs
    }

    /// Apply `fact` to `projection`, dispatching to whichever handler
    /// matches. An exact `(namespace, type, version)` handler always
    /// wins over a version-range handler that would also match.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnhandledFact`] if no handler matches.
    pub fn apply(&self, projection: &mut P, fact: &Fact) -> Result<()> {
        let key = (fact.namespace.clone(), fact.r#type.clone(), fact.version);
        if let Some(handler) = self.exact.get(&key) {
            return handler(projection, fact);
        }
        for entry in &self.ranged {
            if entry.spec.matches(fact) {
                return (entry.handler)(projection, fact);
            }
        }
        Err(CoreError::unhandled_fact(&fact.namespace, &fact.r#type, fact.version))
    }
}
