//! Shared constraint engine context
//!
//! A [`Runtime`] owns the engine every lineage bound against it uses. Binding
//! takes the engine exclusively; validation and translation share it, and
//! only for the duration of each individual engine call.

use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::engine::{ConstraintEngine, StructuralEngine};

/// Engine context shared by all lineages bound against it
pub struct Runtime {
    engine: RwLock<Box<dyn ConstraintEngine>>,
}

impl Runtime {
    /// Wrap an engine in a new shareable runtime.
    pub fn new(engine: impl ConstraintEngine + 'static) -> Arc<Self> {
        Arc::new(Self {
            engine: RwLock::new(Box::new(engine)),
        })
    }

    /// Runtime backed by the built-in [`StructuralEngine`]
    pub fn structural() -> Arc<Self> {
        Self::new(StructuralEngine::new())
    }

    /// Held for the whole of a bind. Poisoning is ignored: engines keep no
    /// state between calls.
    pub(crate) fn exclusive(&self) -> RwLockWriteGuard<'_, Box<dyn ConstraintEngine>> {
        self.engine.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Held per engine call during validation and translation.
    pub(crate) fn shared(&self) -> RwLockReadGuard<'_, Box<dyn ConstraintEngine>> {
        self.engine.read().unwrap_or_else(|e| e.into_inner())
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Constraint;
    use serde_json::json;

    #[test]
    fn test_shared_guards_coexist() {
        let rt = Runtime::structural();
        let a = rt.shared();
        let b = rt.shared();
        let c = Constraint::parse(&json!({"a": "string"})).unwrap();
        assert!(a.check(&c).is_empty());
        assert!(b.subsumes(&c, &c).is_ok());
    }

    #[test]
    fn test_runtime_is_shareable_across_threads() {
        let rt = Runtime::structural();
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let rt = Arc::clone(&rt);
                std::thread::spawn(move || {
                    let c = Constraint::parse(&json!({"n": "int"})).unwrap();
                    rt.shared().unify(&c, &json!({"n": i}))
                })
            })
            .collect();
        for h in handles {
            assert!(h.join().unwrap().is_object());
        }
        drop(rt.exclusive());
    }
}
