mod lock;
mod store;

pub use lock::{MemoryDistributedLock, MemoryLockGuard};
pub use store::MemoryStateStore;
