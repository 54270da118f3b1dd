//! Services
//!
//! A read-only, typed lookup that a host supplies when it builds a scope.
//! Producers reach it through `Context::service::<S>()` to obtain API
//! clients, clocks, or anything else they need without the graph knowing
//! what those are.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Immutable map from service type to instance.
#[derive(Clone, Default)]
pub struct Services {
    entries: Arc<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl Services {
    pub fn builder() -> ServicesBuilder {
        ServicesBuilder::default()
    }

    pub fn get<S: Send + Sync + 'static>(&self) -> Option<Arc<S>> {
        self.entries
            .get(&TypeId::of::<S>())
            .cloned()
            .and_then(|entry| entry.downcast::<S>().ok())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for Services {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Services")
            .field("len", &self.entries.len())
            .finish()
    }
}

/// Builder for [`Services`].
#[derive(Default)]
pub struct ServicesBuilder {
    entries: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl ServicesBuilder {
    /// Register a service. A later registration of the same type wins.
    pub fn with<S: Send + Sync + 'static>(self, service: S) -> Self {
        self.with_shared(Arc::new(service))
    }

    /// Register a service that is already shared.
    pub fn with_shared<S: Send + Sync + 'static>(mut self, service: Arc<S>) -> Self {
        self.entries.insert(TypeId::of::<S>(), service);
        self
    }

    pub fn build(self) -> Services {
        Services {
            entries: Arc::new(self.entries),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Clock(u64);

    #[test]
    fn lookup_by_type() {
        let services = Services::builder().with(Clock(7)).with("api").build();

        assert_eq!(services.len(), 2);
        assert_eq!(services.get::<Clock>().map(|clock| clock.0), Some(7));
        assert_eq!(services.get::<&'static str>().as_deref(), Some(&"api"));
        assert!(services.get::<String>().is_none());
    }
}
