//! Sync layer: the Solr record store over HTTP and the mapping document loader.

mod error;
pub mod mapping;
pub mod solr;

pub use error::SyncError;
pub use mapping::{MappingLoadError, MappingSource, load_mapping};
pub use solr::{ClientOptions, RecordStore, SolrClient, update_document};
