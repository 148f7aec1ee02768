//! Loading a validator rule set from a shared library.
//!
//! The library must export `create_plugin`, a factory returning a boxed
//! [`ValidatorPlugin`]. Loading happens once at startup and failure is
//! fatal; the library handle is kept alive for the process lifetime so
//! the plugin's vtable never outlives its code.

use std::path::Path;

use libloading::{Library, Symbol};
use tracing::info;

use crate::domain::{
    Error, OsmNode, OsmRelation, OsmWay, ValidationStatus, ValidatorPlugin,
};

/// Factory symbol every validator library must export.
pub const PLUGIN_ENTRY_POINT: &[u8] = b"create_plugin";

type PluginCreate = unsafe extern "C" fn() -> *mut Box<dyn ValidatorPlugin>;

/// A validator loaded from a shared library.
///
/// Field order matters: the plugin must drop before the library that
/// holds its code.
pub struct LoadedValidator {
    plugin: Box<dyn ValidatorPlugin>,
    _library: Library,
}

impl LoadedValidator {
    /// Load a validator library and invoke its factory.
    ///
    /// # Errors
    ///
    /// Returns a plugin error when the library cannot be opened, does
    /// not export [`PLUGIN_ENTRY_POINT`], or its factory returns null.
    #[expect(
        unsafe_code,
        reason = "dynamic loading crosses a C ABI boundary by design"
    )]
    pub fn load(path: &Path) -> Result<Self, Error> {
        // SAFETY: library initialisers run on load; the path comes from
        // the operator's configuration.
        let library = unsafe { Library::new(path) }.map_err(|err| {
            Error::plugin(format!("cannot load {}: {err}", path.display()))
        })?;
        let plugin = {
            // SAFETY: the entry point contract fixes the symbol's type.
            let create: Symbol<'_, PluginCreate> =
                unsafe { library.get(PLUGIN_ENTRY_POINT) }.map_err(|err| {
                    Error::plugin(format!(
                        "{} exports no create_plugin: {err}",
                        path.display()
                    ))
                })?;
            // SAFETY: the entry-point contract transfers ownership of a
            // boxed plugin allocated by the library.
            let raw = unsafe { create() };
            if raw.is_null() {
                return Err(Error::plugin(format!(
                    "create_plugin in {} returned null",
                    path.display()
                )));
            }
            // SAFETY: non-null, checked above, and owned by us per the
            // entry-point contract.
            *unsafe { Box::from_raw(raw) }
        };
        info!(path = %path.display(), "validator plugin loaded");
        Ok(Self {
            plugin,
            _library: library,
        })
    }
}

impl ValidatorPlugin for LoadedValidator {
    fn check_node(&self, node: &OsmNode) -> ValidationStatus {
        self.plugin.check_node(node)
    }

    fn check_way(&self, way: &OsmWay) -> ValidationStatus {
        self.plugin.check_way(way)
    }

    fn check_relation(&self, relation: &OsmRelation) -> ValidationStatus {
        self.plugin.check_relation(relation)
    }
}
