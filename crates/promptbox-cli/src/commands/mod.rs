pub mod add;
pub mod backup;
pub mod common;
pub mod delete;
pub mod device;
pub mod edit;
pub mod list;
pub mod migrate;
pub mod purge;
pub mod sync;
