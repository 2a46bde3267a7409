use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

use super::{ScriptCompiler, ScriptDefinition, ScriptSource, StringScriptFactory};
use crate::errors::Result;

/// Thread-safe cache of compiled scripts, keyed by inline code or stored id.
///
/// Filled while mappings load, invalidated when they are replaced. Clones share
/// the same entries.
#[derive(Clone)]
pub struct ScriptCache {
    compiler: Arc<dyn ScriptCompiler>,
    inner: Arc<RwLock<HashMap<ScriptSource, Arc<dyn StringScriptFactory>>>>,
}

impl ScriptCache {
    pub fn new<C: ScriptCompiler + 'static>(compiler: C) -> Self {
        Self { compiler: Arc::new(compiler), inner: Arc::default() }
    }

    /// Return the cached factory or compile and remember it. Compilation
    /// failures are not cached.
    pub fn get_or_compile(&self, script: &ScriptDefinition) -> Result<Arc<dyn StringScriptFactory>> {
        if let Some(f) = self.get(script.source()) {
            return Ok(f);
        }
        let compiled = self.compiler.compile(script)?;
        debug!(script = script.id_or_code(), "compiled script");
        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        Ok(map.entry(script.source().clone()).or_insert(compiled).clone())
    }

    pub fn get(&self, source: &ScriptSource) -> Option<Arc<dyn StringScriptFactory>> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(source)
            .cloned()
    }

    /// Drop one entry, e.g. after a stored script was replaced.
    pub fn invalidate(&self, source: &ScriptSource) -> bool {
        let removed = self
            .inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(source)
            .is_some();
        if removed {
            debug!(?source, "invalidated compiled script");
        }
        removed
    }

    pub fn clear(&self) {
        self.inner.write().unwrap_or_else(PoisonError::into_inner).clear();
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
