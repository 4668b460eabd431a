pub mod backends;
pub mod template;

pub use template::StorageBackend;
