pub mod lookup;
pub mod message_queue;
pub mod scheduler;

pub use lookup::*;
pub use message_queue::*;
pub use scheduler::*;
