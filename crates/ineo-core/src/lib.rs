pub mod mapping;
pub mod record;

pub use mapping::{EntryKind, MappingError, MappingTable, Provider, TriState, parse_mapping};
pub use record::{Record, RecordError, UpdatePayload, fields};
