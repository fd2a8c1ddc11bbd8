//! Source collaborator contracts, row normalization and the bundled sources.

mod normalize;
mod sources;

pub use normalize::{
    flatten_platform_object, parse_price, parse_stock, CatalogItem, ColumnMapping, KnownField,
    MappedColumn, NormalizeError, Normalizer, SourceRow,
};
pub use sources::{
    decode_row, row_from_json, HttpPageSource, JsonFileSource, MemorySource, SourceCollaborator, SourceError,
    SourcePage,
};

pub const CRATE_NAME: &str = "catlink-adapters";
