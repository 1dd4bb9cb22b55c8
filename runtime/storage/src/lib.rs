pub mod memory;
pub mod rocks;
pub mod store;
pub mod types;

pub use memory::MemoryStore;
pub use rocks::RocksStore;
pub use store::KvStore;
pub use types::*;
