pub mod backoff;
pub mod directory;
pub mod managed;
#[cfg(test)]
pub(crate) mod memory_store;
pub mod multipart;
pub mod object_store;
pub mod relay;
pub mod spaces;
pub mod transfer;
