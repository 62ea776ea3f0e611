//! Connection plugins.
//!
//! A [`PluginRegistry`] maps names to initializers. Each
//! [`Connection`] runs every initializer once at construction; the plugin it
//! returns is owned by that connection and told about every status change
//! before the user's status callback runs. Initializers get `&mut
//! Connection`, so a plugin can install handlers (e.g. to answer pings).

use std::{any::Any, fmt, rc::Rc};

use crate::{connection::Connection, env::Environment, status::Status};

/// Extension attached to a connection
pub trait Plugin: Any {
    /// Called on every status transition, before the status callback
    fn status_changed(&mut self, _status: Status, _condition: Option<&str>) {}

    /// Upcast for [`Connection::plugin`]
    fn as_any(&self) -> &dyn Any;

    /// Upcast for [`Connection::plugin_mut`]
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Builds a plugin for a new connection
pub type PluginInit<E> = Rc<dyn Fn(&mut Connection<E>) -> Box<dyn Plugin>>;

/// Named plugin initializers, applied in registration order
pub struct PluginRegistry<E: Environment> {
    entries: Vec<(String, PluginInit<E>)>,
}

impl<E: Environment> PluginRegistry<E> {
    /// Empty registry
    #[must_use]
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Register an initializer; a second registration under the same name
    /// replaces the first
    pub fn register<F>(&mut self, name: impl Into<String>, init: F)
    where
        F: Fn(&mut Connection<E>) -> Box<dyn Plugin> + 'static,
    {
        let name = name.into();
        let init: PluginInit<E> = Rc::new(init);
        match self.entries.iter_mut().find(|(registered, _)| *registered == name) {
            Some(entry) => entry.1 = init,
            None => self.entries.push((name, init)),
        }
    }

    /// Registered names, in order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    /// True if nothing is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn entries(&self) -> impl Iterator<Item = (&str, &PluginInit<E>)> {
        self.entries.iter().map(|(name, init)| (name.as_str(), init))
    }
}

impl<E: Environment> Default for PluginRegistry<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Environment> Clone for PluginRegistry<E> {
    fn clone(&self) -> Self {
        Self { entries: self.entries.clone() }
    }
}

impl<E: Environment> fmt::Debug for PluginRegistry<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
