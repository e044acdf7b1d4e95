use crate::compiler::CompiledExpr;
use crate::profile::ExpressionDef;
use crate::program::LinkedProgram;
use crate::typer::TypedExpr;
use crate::types::TypeRep;
use foldhash::{HashMap, HashMapExt};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Lock helper: a panic while holding one of the cache locks must not wedge
/// every later compile.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The per-profile compiled utilities block: binding names and types for the
/// typer scope, typed initializers for splicing into program preludes.
/// Compiled at most once per process per profile identity and shared by
/// every expression of that profile.
pub(crate) struct ProfileUtils {
    pub defs: Vec<(String, TypedExpr)>,
}

impl ProfileUtils {
    pub(crate) fn empty() -> ProfileUtils {
        ProfileUtils { defs: Vec::new() }
    }

    pub(crate) fn bindings(&self) -> Vec<(String, TypeRep)> {
        self.defs.iter().map(|(n, t)| (n.clone(), t.ty.clone())).collect()
    }
}

/// One installed artifact: the linked program and the unit it was generated
/// under.
pub(crate) struct ArtifactEntry {
    pub artifact: Arc<LinkedProgram>,
    pub unit: String,
}

/// The two-level artifact cache (C7).
///
/// The outer level maps definitions to callable wrappers, so repeated
/// compiles of one definition observe the same callable. The inner level
/// owns the linked artifacts; wrappers hold only weak references into it and
/// re-resolve (possibly recompiling) when their artifact has been evicted.
pub(crate) struct ExprCache {
    pub outer: Mutex<HashMap<ExpressionDef, Arc<CompiledExpr>>>,
    pub inner: Mutex<HashMap<ExpressionDef, ArtifactEntry>>,
}

impl ExprCache {
    pub(crate) fn new() -> ExprCache {
        ExprCache { outer: Mutex::new(HashMap::new()), inner: Mutex::new(HashMap::new()) }
    }

    pub(crate) fn artifact(&self, def: &ExpressionDef) -> Option<Arc<LinkedProgram>> {
        lock(&self.inner).get(def).map(|e| e.artifact.clone())
    }

    pub(crate) fn install(&self, def: ExpressionDef, artifact: Arc<LinkedProgram>, unit: String) {
        lock(&self.inner).insert(def, ArtifactEntry { artifact, unit });
    }

    /// Removes the artifact for one definition, returning its unit name so
    /// the caller can drop the unit's in-memory classfiles. Outstanding
    /// callables keep working; their next evaluation re-resolves.
    pub(crate) fn evict(&self, def: &ExpressionDef) -> Option<String> {
        lock(&self.inner).remove(def).map(|e| e.unit)
    }

    pub(crate) fn clear(&self) {
        lock(&self.inner).clear();
        lock(&self.outer).clear();
    }
}
