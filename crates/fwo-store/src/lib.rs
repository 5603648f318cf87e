pub mod error;
pub mod etcd;
pub mod memory;
pub mod store;

pub use error::StoreError;
pub use etcd::EtcdStore;
pub use memory::MemoryStore;
pub use store::StateStore;
