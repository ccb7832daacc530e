// Clause translation - caller JSON to validated storage-shaped queries
pub mod order_by;
pub mod payload;
pub mod projection;
pub mod translate;
pub mod types;
pub mod where_clause;

pub use order_by::OrderByTranslator;
pub use payload::PayloadValidator;
pub use projection::ProjectionTranslator;
pub use translate::Translator;
pub use types::{
    ClauseSet, FilterNode, FilterOp, Projection, RelationProjection, SortDirection, SortKey,
};
pub use where_clause::WhereTranslator;
