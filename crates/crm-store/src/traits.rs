use async_trait::async_trait;

use crate::error::StoreResult;
use crate::filter::{Filter, Join, Row};

/// Table-oriented record store.
///
/// All implementations must satisfy these invariants:
/// - Filters are exact-match conjunctions; there is no fuzzy matching.
/// - Each call is its own unit of work. A successful write is permanent.
/// - `update` and `delete` refuse empty filters.
/// - Affected-row counts are exact: a write that matches nothing returns 0
///   rather than an error, which is what makes merge retries idempotent.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Rows of `table` matching `filter`, each with `joins` embedded.
    async fn select(&self, table: &str, filter: &Filter, joins: &[Join]) -> StoreResult<Vec<Row>>;

    /// Insert a row and return it as stored (including generated keys).
    async fn insert(&self, table: &str, row: Row) -> StoreResult<Row>;

    /// Merge `patch` into every matching row. Returns the number affected.
    async fn update(&self, table: &str, filter: &Filter, patch: &Row) -> StoreResult<u64>;

    /// Delete every matching row. Returns the number removed.
    async fn delete(&self, table: &str, filter: &Filter) -> StoreResult<u64>;

    /// First matching row, if any.
    ///
    /// Default implementation calls `select()`. Backends may override to
    /// stop after the first hit.
    async fn select_one(
        &self,
        table: &str,
        filter: &Filter,
        joins: &[Join],
    ) -> StoreResult<Option<Row>> {
        Ok(self.select(table, filter, joins).await?.into_iter().next())
    }
}
