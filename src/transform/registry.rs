// ----------------------------------------------------------------------------
// 3.5 Transform Registry
// ----------------------------------------------------------------------------
// Populated once during startup through the builder, then frozen into a
// read-only map that tasks share without locking.
// ----------------------------------------------------------------------------

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use super::{Transform, TransformId, TransformSpec};
use crate::error::{EtlError, RegistryError, RegistryResult};

/// Mutable registration phase of the registry.
#[derive(Default)]
pub struct TransformRegistryBuilder {
    entries: HashMap<TransformId, Arc<dyn Transform>>,
}

impl TransformRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `id` to `transform`. Fails if `id` is already bound.
    pub fn register<T>(&mut self, id: impl Into<TransformId>, transform: T) -> RegistryResult<()>
    where
        T: Transform + 'static,
    {
        self.register_arc(id, Arc::new(transform))
    }

    pub fn register_arc(
        &mut self,
        id: impl Into<TransformId>,
        transform: Arc<dyn Transform>,
    ) -> RegistryResult<()> {
        let id = id.into();
        if self.entries.contains_key(&id) {
            return Err(RegistryError::DuplicateIdentifier(id.to_string()));
        }
        debug!(target: "metrics_etl::registry", transform = %id, kind = transform.name(), "Transform registered");
        self.entries.insert(id, transform);
        Ok(())
    }

    /// Instantiate a configured transform and bind it to `id`.
    pub fn register_spec(
        &mut self,
        id: impl Into<TransformId>,
        spec: &TransformSpec,
    ) -> Result<(), EtlError> {
        let transform = spec.instantiate()?;
        self.register_arc(id, transform)?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// End the registration phase.
    pub fn freeze(self) -> TransformRegistry {
        TransformRegistry {
            entries: Arc::new(self.entries),
        }
    }
}

/// Read-only transform lookup shared by every task.
#[derive(Clone)]
pub struct TransformRegistry {
    entries: Arc<HashMap<TransformId, Arc<dyn Transform>>>,
}

impl TransformRegistry {
    /// Look up the transform bound to `id`.
    pub fn lookup(&self, id: &str) -> RegistryResult<Arc<dyn Transform>> {
        self.entries
            .get(&TransformId::from(id))
            .cloned()
            .ok_or_else(|| RegistryError::UnknownTransform(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(&TransformId::from(id))
    }

    /// Registered identifiers, sorted.
    pub fn ids(&self) -> Vec<&TransformId> {
        let mut ids: Vec<_> = self.entries.keys().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for TransformRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformRegistry")
            .field("ids", &self.ids())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::{register_builtins, ScaleTransform, BUILTIN_TRANSFORMS};

    #[test]
    fn test_duplicate_identifier_rejected() {
        let mut builder = TransformRegistryBuilder::new();
        builder.register("double", ScaleTransform::new(2.0).unwrap()).unwrap();

        let err = builder
            .register("double", ScaleTransform::new(3.0).unwrap())
            .unwrap_err();
        assert_eq!(err, RegistryError::DuplicateIdentifier("double".into()));
        assert_eq!(builder.len(), 1);
    }

    #[test]
    fn test_unknown_lookup() {
        let registry = TransformRegistryBuilder::new().freeze();
        let err = registry.lookup("lastdatapoint").err().unwrap();
        assert_eq!(err, RegistryError::UnknownTransform("lastdatapoint".into()));
    }

    #[test]
    fn test_builtins_registered_once() {
        let mut builder = TransformRegistryBuilder::new();
        register_builtins(&mut builder).unwrap();
        assert_eq!(builder.len(), BUILTIN_TRANSFORMS.len());

        // A second plugin pass must not silently shadow the first.
        let err = register_builtins(&mut builder).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateIdentifier(_)));

        let registry = builder.freeze();
        for id in BUILTIN_TRANSFORMS {
            assert!(registry.contains(id), "missing builtin {id}");
        }
    }

    #[test]
    fn test_configured_id_cannot_shadow_builtin() {
        let mut builder = TransformRegistryBuilder::new();
        register_builtins(&mut builder).unwrap();
        let err = builder
            .register_spec("max", &TransformSpec::Scale { factor: 2.0 })
            .unwrap_err();
        assert!(matches!(
            err,
            EtlError::Registry(RegistryError::DuplicateIdentifier(ref id)) if id == "max"
        ));
    }

    #[test]
    fn test_frozen_registry_shared_across_threads() {
        let mut builder = TransformRegistryBuilder::new();
        register_builtins(&mut builder).unwrap();
        let registry = builder.freeze();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || registry.lookup("lastdatapoint").is_ok())
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap());
        }
        assert_eq!(registry.ids().first().map(|id| id.as_str()), Some("average"));
    }
}
