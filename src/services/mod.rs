pub mod access;
pub mod catalog;
pub mod log_tailer;

pub use access::{AccessPolicy, CatalogAccessPolicy};
pub use catalog::{effective_environment_id, ConfigResolver, StaticCatalog};
pub use log_tailer::{LogStream, LogTailer};
