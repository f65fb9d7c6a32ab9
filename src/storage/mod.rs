pub mod json;
pub mod memory;
pub mod traits;

pub use json::JsonFileStore;
pub use memory::InMemoryStore;
pub use traits::RecordStore;
