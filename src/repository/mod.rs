//! Repositories and the read/write surfaces they share with decorators

mod base;
mod traits;

pub use base::{Repository, Scope};
pub use traits::{ReadRepository, WriteRepository};
