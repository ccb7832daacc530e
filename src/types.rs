/// Shared types used across the codebase
use serde::{Deserialize, Serialize};

/// Broker verbs supported throughout the system
/// Used by clause translation (projection rules differ per verb) and logging
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Verb {
    FetchMany,
    FetchById,
    FetchPaginated,
    Count,
    Aggregate,
    CreateOne,
    CreateMany,
    UpdateOne,
    UpdateMany,
    DeleteOne,
    DeleteMany,
    Upsert,
}

impl Verb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::FetchMany => "fetchMany",
            Verb::FetchById => "fetchById",
            Verb::FetchPaginated => "fetchPaginated",
            Verb::Count => "count",
            Verb::Aggregate => "aggregate",
            Verb::CreateOne => "createOne",
            Verb::CreateMany => "createMany",
            Verb::UpdateOne => "updateOne",
            Verb::UpdateMany => "updateMany",
            Verb::DeleteOne => "deleteOne",
            Verb::DeleteMany => "deleteMany",
            Verb::Upsert => "upsert",
        }
    }

    /// True for verbs that never write
    pub fn is_read(&self) -> bool {
        matches!(
            self,
            Verb::FetchMany
                | Verb::FetchById
                | Verb::FetchPaginated
                | Verb::Count
                | Verb::Aggregate
        )
    }
}
