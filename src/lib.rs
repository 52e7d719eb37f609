pub mod record;
pub mod document;
pub mod store;
pub mod provision;
pub mod repository;
pub mod target;
pub mod layer;

#[cfg(feature = "mongodb")]
pub mod mongo;

pub mod memory;
pub mod config;
pub mod env;
pub mod backend;
pub mod init;

pub use bson;
