pub mod ca_poller;
pub mod error;
pub mod transport;

pub use ca_poller::spawn_ca_poller;
pub use error::TransportError;
pub use transport::{CompletedTask, RedfishTransport, Task, TaskTemplate};
