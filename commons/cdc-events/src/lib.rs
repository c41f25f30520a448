//! Maps raw change records into domain events and routes them to the
//! handlers registered for each `(source, type)` pair.

pub mod event;
pub mod handler;
pub mod processor;

pub use event::{DomainEvent, EventType};
pub use handler::{EventHandler, HandlerRegistry, handler_fn};
pub use processor::{EventProcessor, ProcessError, ProcessorConfig};
