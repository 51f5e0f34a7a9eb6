//! `capabilities` crate — the `Capability` trait and the external interfaces
//! a Task step reaches through it.
//!
//! Every capability, built-in or host-supplied, must implement
//! [`Capability`]. The engine crate dispatches Task steps through this trait
//! object, looked up by name in a [`CapabilityRegistry`].

pub mod builtin;
pub mod error;
pub mod events;
pub mod mock;
pub mod poll;
pub mod registry;
pub mod store;
pub mod traits;

pub use error::{CapabilityError, EventError, StoreError};
pub use events::{EventSink, TracingEventSink};
pub use registry::CapabilityRegistry;
pub use store::{ContextStore, InMemoryContextStore};
pub use traits::{Capability, InvocationContext};
