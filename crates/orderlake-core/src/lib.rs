pub mod aggregates;
pub mod analysis;
pub mod checkpoint;
pub mod config;
pub mod db;
pub mod dimensions;
pub mod error;
#[cfg(feature = "runtime")]
pub mod lock;
pub mod object_store;
pub mod partitioned;
pub mod schema;
pub mod source;
pub mod sync;
