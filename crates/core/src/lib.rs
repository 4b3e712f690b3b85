pub mod errors;
pub mod models;
pub mod traits;

pub use errors::*;
pub use models::{
    Delivery, FailureNotice, MessageOrigin, ModelProfile, OutboundMessage, RegistrationKind,
    RegistrationMessage, Task, TaskGroups, TaskView, WorkItem, Worker, WorkerSnapshot,
};
pub use traits::{DurationLookup, MatchingStrategy, MessageQueue, ModelTypeLookup};
