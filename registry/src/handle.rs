use crate::snapshot::RegistryConfig;
use crate::{Error, Registry};
use parking_lot::RwLock;
use std::sync::Arc;

/// Shared access to one registry: a single writer, any number of readers.
///
/// Mutations contend on `try_write`; losing the race surfaces as
/// [`Error::Conflict`], which the caller may retry. Readers block only for
/// the duration of a lock acquisition and walk away with `Arc`s to
/// immutable snapshots.
#[derive(Clone)]
pub struct RegistryHandle {
    inner: Arc<RwLock<Registry>>,
}

impl RegistryHandle {
    pub fn new(registry: Registry) -> Self {
        Self {
            inner: Arc::new(RwLock::new(registry)),
        }
    }

    /// Runs one mutating transition under the exclusive writer lock.
    ///
    /// Nothing intermediate is published: the closure either commits by
    /// returning `Ok` or the registry stays as it was.
    pub fn mutate<R>(
        &self,
        f: impl FnOnce(&mut Registry) -> Result<R, Error>,
    ) -> Result<R, Error> {
        let mut guard = self.inner.try_write().ok_or(Error::Conflict)?;

        f(&mut guard)
    }

    /// Read-only access to the model.
    pub fn read<R>(&self, f: impl FnOnce(&Registry) -> R) -> R {
        f(&self.inner.read())
    }

    /// The committed snapshot, if any; cheap to call from any thread.
    pub fn current_config(&self) -> Option<Arc<RegistryConfig>> {
        self.inner.read().current_config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CellSpec, UserSpec};
    use std::collections::BTreeSet;
    use uvn_model::{Email, UvnSettings};

    fn handle() -> RegistryHandle {
        let registry = Registry::create(
            "lab".parse().unwrap(),
            Some("registry.example".to_owned()),
            UserSpec {
                email: "op@example.com".parse().unwrap(),
                display_name: "Operator".to_owned(),
                password: "hunter2".to_owned(),
            },
            UvnSettings::default(),
        )
        .unwrap();

        RegistryHandle::new(registry)
    }

    fn op() -> Email {
        "op@example.com".parse().unwrap()
    }

    #[test]
    fn contended_writes_surface_as_conflict() {
        let handle = handle();
        let reader = handle.clone();

        // A held read guard blocks the writer; single-writer means the
        // mutation must fail fast, not queue.
        let _guard = reader.inner.read();

        let err = handle
            .mutate(|registry| {
                registry.define_cell(
                    &op(),
                    CellSpec {
                        name: "a".parse().unwrap(),
                        address: Some("a.example".to_owned()),
                        allowed_lans: BTreeSet::new(),
                        owner: op(),
                    },
                )
            })
            .unwrap_err();

        assert_eq!(err, Error::Conflict);
    }

    #[test]
    fn readers_keep_their_snapshot_across_mutations() {
        let handle = handle();

        handle
            .mutate(|registry| {
                registry.define_cell(
                    &op(),
                    CellSpec {
                        name: "a".parse().unwrap(),
                        address: Some("a.example".to_owned()),
                        allowed_lans: BTreeSet::new(),
                        owner: op(),
                    },
                )?;
                registry.redeploy(&op())
            })
            .unwrap();

        let snapshot = handle.current_config().unwrap();

        handle
            .mutate(|registry| {
                registry.define_cell(
                    &op(),
                    CellSpec {
                        name: "b".parse().unwrap(),
                        address: None,
                        allowed_lans: BTreeSet::new(),
                        owner: op(),
                    },
                )?;
                registry.redeploy(&op())
            })
            .unwrap();

        let newer = handle.current_config().unwrap();

        assert_ne!(snapshot.config_id, newer.config_id);
        assert!(snapshot.verify(), "old snapshot stays intact");
    }
}
