//! Process-wide layer factory registry.
//!
//! Factories register by name during initialization; afterwards the map is
//! effectively read-only and concurrent `create` calls are safe.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use crate::error::{Error, Result};

use super::{Layer, LayerContext};

/// Constructor for one layer kind within a compute context.
pub type LayerFactory = fn(&LayerContext) -> Arc<dyn Layer>;

fn factories() -> &'static RwLock<HashMap<String, LayerFactory>> {
    static FACTORIES: OnceLock<RwLock<HashMap<String, LayerFactory>>> = OnceLock::new();
    FACTORIES.get_or_init(Default::default)
}

/// Register a factory under `name`; the latest registration wins.
pub fn register(name: &str, factory: LayerFactory) {
    factories()
        .write()
        .unwrap()
        .insert(name.to_string(), factory);
}

/// Construct a layer by registered name.
pub fn create(name: &str, ctx: &LayerContext) -> Result<Arc<dyn Layer>> {
    let factory = factories()
        .read()
        .unwrap()
        .get(name)
        .copied()
        .ok_or_else(|| Error::NotFound(format!("layer factory:{name}")))?;
    Ok(factory(ctx))
}

/// Names with a registered factory, unordered.
pub fn registered_names() -> Vec<String> {
    factories().read().unwrap().keys().cloned().collect()
}
