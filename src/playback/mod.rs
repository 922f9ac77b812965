pub mod indexer;
pub mod timeline;
