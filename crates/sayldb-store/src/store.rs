//! Read-side store facade used by live queries.
//!
//! Sessions and live collections never talk to a concrete store directly;
//! they go through `QueryStore` so the sync subsystem works over any backend
//! that can answer filtered, sorted, paginated reads.

use crate::filter::{Filter, SortOrder};
use async_trait::async_trait;
use sayldb_commons::{EntityTypeId, Result, Row, Version};

/// Pagination and projection options for a find.
#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    /// Field names to project. The primary key and version are always
    /// included regardless; an empty projection means the full row.
    pub projection: Option<Vec<String>>,
    pub sort: Vec<SortOrder>,
    pub skip: usize,
    /// 0 means no limit.
    pub limit: usize,
}

impl ReadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn project(mut self, fields: Vec<String>) -> Self {
        self.projection = Some(fields);
        self
    }

    pub fn sort(mut self, sort: Vec<SortOrder>) -> Self {
        self.sort = sort;
        self
    }

    pub fn page(mut self, skip: usize, limit: usize) -> Self {
        self.skip = skip;
        self.limit = limit;
        self
    }
}

/// One row plus its mutation version.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionedRow {
    pub row: Row,
    pub version: Version,
}

/// Read-only query interface over one store backend.
#[async_trait]
pub trait QueryStore: Send + Sync {
    /// Rows matching `filter`, sorted, paginated and projected per `options`.
    async fn find(
        &self,
        entity_type: &EntityTypeId,
        filter: &Filter,
        options: &ReadOptions,
    ) -> Result<Vec<VersionedRow>>;

    /// First row matching `filter`, or `None`.
    async fn find_one(
        &self,
        entity_type: &EntityTypeId,
        filter: &Filter,
    ) -> Result<Option<VersionedRow>> {
        let options = ReadOptions::new().page(0, 1);
        Ok(self.find(entity_type, filter, &options).await?.pop())
    }

    /// Number of rows matching `filter`, ignoring pagination.
    async fn count(&self, entity_type: &EntityTypeId, filter: &Filter) -> Result<usize>;
}
