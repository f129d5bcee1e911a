mod heap;
mod id_pool;

pub use heap::HeapFile;
pub use id_pool::IdPool;
