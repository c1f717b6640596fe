//! Capabilities registered on a [`Connection`] under a name.

use std::any::Any;

use crate::{Connection, Status};

/// Downcasting support for plugins, implemented for every `'static` type.
pub trait AsAny: Any {
    /// Upcast to `&dyn Any`.
    fn as_any(&self) -> &dyn Any;
    /// Upcast to `&mut dyn Any`.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// An extension of a connection, typically a namespaced sub-API.
pub trait Plugin: AsAny + Send {
    /// Called once, when the plugin is registered.
    fn init(&mut self, _conn: &mut Connection) {}

    /// Called on every status change, before the connection callback.
    fn status_changed(&mut self, _status: Status, _condition: Option<&str>) {}
}
