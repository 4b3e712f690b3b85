pub mod app_config;
pub mod dispatcher;
pub mod lookup;
pub mod message_queue;
pub mod observability;

pub use app_config::*;
pub use dispatcher::*;
pub use lookup::*;
pub use message_queue::*;
pub use observability::*;
