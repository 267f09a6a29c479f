//! Durable state for the Mintage service: the metadata-store (binder)
//! adapter and the registration queue.

pub mod binder;
pub mod queue;

pub use binder::{Binder, FileBinder};
pub use queue::{QueueEntry, QueueStatus, RegistrationOp, RegistrationQueue};
