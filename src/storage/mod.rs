//! Storage implementations

pub mod evaluate;
pub mod in_memory;

pub use in_memory::InMemoryDataSource;
