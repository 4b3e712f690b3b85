pub mod in_memory_queue;
pub mod lookup;
pub mod message_queue;
pub mod message_queue_factory;
pub mod observability;

pub use in_memory_queue::InMemoryMessageQueue;
pub use lookup::{HttpDurationLookup, ProfileTypeLookup, MAX_DURATION_SECONDS};
pub use message_queue::RabbitMQMessageQueue;
pub use message_queue_factory::MessageQueueFactory;
pub use observability::{init_metrics, DispatcherMetrics};
