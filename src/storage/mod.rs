pub mod file;
pub mod keyed;
pub mod memory;
pub mod traits;

pub use file::FileIdentStore;
pub use keyed::KeyedLocks;
pub use memory::MemoryIdentStore;
pub use traits::{IdentStore, LastKnownRecord, StoreError};
