pub mod memory;
mod register;
pub mod scylladb;

pub use register::MetadataConfigs;
