use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
    num::NonZeroUsize,
    rc::Rc,
    sync::Arc,
};

use backend_spi::{BackendError, DashboardBackend};
use futures::{
    future::{LocalBoxFuture, Shared},
    FutureExt,
};
use lru::LruCache;
use serde::Serialize;
use sha2::{Digest, Sha256};
use shared::domain::{
    CatalogAttribute, CatalogMeasure, ExecutionDefinition, ExecutionResult, Insight, ObjRef,
};
use thiserror::Error;
use tracing::{debug, warn};

use crate::store::{DashboardStore, Mutation};

/// Read-only request whose result may be memoized.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Query {
    Insight { insight: ObjRef },
    AttributeMetadata { display_form: ObjRef },
    Measure { measure: ObjRef },
    CatalogAttributes,
    Execution { definition: ExecutionDefinition },
}

impl Query {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Insight { .. } => "insight",
            Self::AttributeMetadata { .. } => "attribute_metadata",
            Self::Measure { .. } => "measure",
            Self::CatalogAttributes => "catalog_attributes",
            Self::Execution { .. } => "execution",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult {
    Insight(Insight),
    Attribute(CatalogAttribute),
    Measure(CatalogMeasure),
    CatalogAttributes(Vec<CatalogAttribute>),
    Execution(ExecutionResult),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("failed to fingerprint query: {0}")]
    Fingerprint(String),
    #[error("{query} query produced an unexpected result")]
    UnexpectedResult { query: &'static str },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueryStats {
    pub hits: u64,
    pub misses: u64,
    pub coalesced: u64,
}

type QueryFuture = Shared<LocalBoxFuture<'static, Result<QueryResult, QueryError>>>;

struct QueryState {
    cache: RefCell<LruCache<String, QueryResult>>,
    in_flight: RefCell<HashMap<String, QueryFuture>>,
    hits: Cell<u64>,
    misses: Cell<u64>,
    coalesced: Cell<u64>,
}

/// Deterministic cache key: hex SHA-256 of the query's JSON encoding.
pub fn fingerprint(query: &Query) -> Result<String, QueryError> {
    let encoded =
        serde_json::to_vec(query).map_err(|err| QueryError::Fingerprint(err.to_string()))?;
    Ok(format!("{:x}", Sha256::digest(&encoded)))
}

/// Memoizing query runner: at most one backend fetch per fingerprint is in flight, successes
/// land in a bounded LRU and failures are never cached.
///
/// Catalog lookups read through the store's catalog cache, and fetched metadata is merged
/// back into it.
pub struct QueryService {
    backend: Arc<dyn DashboardBackend>,
    store: Rc<DashboardStore>,
    state: Rc<QueryState>,
}

impl QueryService {
    pub fn new(
        backend: Arc<dyn DashboardBackend>,
        store: Rc<DashboardStore>,
        capacity: NonZeroUsize,
    ) -> Self {
        Self {
            backend,
            store,
            state: Rc::new(QueryState {
                cache: RefCell::new(LruCache::new(capacity)),
                in_flight: RefCell::new(HashMap::new()),
                hits: Cell::new(0),
                misses: Cell::new(0),
                coalesced: Cell::new(0),
            }),
        }
    }

    pub async fn run_query(&self, query: Query) -> Result<QueryResult, QueryError> {
        if let Some(result) = self.from_catalog(&query) {
            self.state.hits.set(self.state.hits.get() + 1);
            debug!(query = query.name(), "query answered from catalog cache");
            return Ok(result);
        }

        let key = fingerprint(&query)?;
        if let Some(result) = self.state.cache.borrow_mut().get(&key).cloned() {
            self.state.hits.set(self.state.hits.get() + 1);
            debug!(query = query.name(), fingerprint = %key, "query cache hit");
            return Ok(result);
        }

        let pending = self.state.in_flight.borrow().get(&key).cloned();
        let fetch = match pending {
            Some(fetch) => {
                self.state.coalesced.set(self.state.coalesced.get() + 1);
                debug!(query = query.name(), fingerprint = %key, "query coalesced");
                fetch
            }
            None => {
                self.state.misses.set(self.state.misses.get() + 1);
                debug!(query = query.name(), fingerprint = %key, "query cache miss");
                let fetch = self.start_fetch(key.clone(), query);
                self.state
                    .in_flight
                    .borrow_mut()
                    .insert(key, fetch.clone());
                fetch
            }
        };
        fetch.await
    }

    fn from_catalog(&self, query: &Query) -> Option<QueryResult> {
        let state = self.store.get_state();
        match query {
            Query::AttributeMetadata { display_form } => state
                .catalog
                .attribute_by_display_form(display_form)
                .cloned()
                .map(QueryResult::Attribute),
            Query::Measure { measure } => state
                .catalog
                .measure(measure)
                .cloned()
                .map(QueryResult::Measure),
            _ => None,
        }
    }

    fn start_fetch(&self, key: String, query: Query) -> QueryFuture {
        let backend = self.backend.clone();
        let state = Rc::downgrade(&self.state);
        let store = Rc::downgrade(&self.store);
        async move {
            let result = fetch(backend.as_ref(), &query).await;
            if let (Ok(value), Some(store)) = (&result, store.upgrade()) {
                if let Some(mutation) = catalog_update(value) {
                    if let Err(err) = store.apply(mutation) {
                        warn!(query = query.name(), error = %err, "could not cache catalog metadata");
                    }
                }
            }
            if let Some(state) = state.upgrade() {
                state.in_flight.borrow_mut().remove(&key);
                let mut cache = state.cache.borrow_mut();
                match &result {
                    Ok(value) => {
                        cache.put(key, value.clone());
                    }
                    Err(_) => {
                        cache.pop(&key);
                    }
                }
            }
            result
        }
        .boxed_local()
        .shared()
    }

    pub async fn insight(&self, insight: &ObjRef) -> Result<Insight, QueryError> {
        match self
            .run_query(Query::Insight {
                insight: insight.clone(),
            })
            .await?
        {
            QueryResult::Insight(insight) => Ok(insight),
            _ => Err(QueryError::UnexpectedResult { query: "insight" }),
        }
    }

    pub async fn attribute_metadata(
        &self,
        display_form: &ObjRef,
    ) -> Result<CatalogAttribute, QueryError> {
        match self
            .run_query(Query::AttributeMetadata {
                display_form: display_form.clone(),
            })
            .await?
        {
            QueryResult::Attribute(attribute) => Ok(attribute),
            _ => Err(QueryError::UnexpectedResult {
                query: "attribute_metadata",
            }),
        }
    }

    pub async fn measure_metadata(&self, measure: &ObjRef) -> Result<CatalogMeasure, QueryError> {
        match self
            .run_query(Query::Measure {
                measure: measure.clone(),
            })
            .await?
        {
            QueryResult::Measure(measure) => Ok(measure),
            _ => Err(QueryError::UnexpectedResult { query: "measure" }),
        }
    }

    pub async fn catalog_attributes(&self) -> Result<Vec<CatalogAttribute>, QueryError> {
        match self.run_query(Query::CatalogAttributes).await? {
            QueryResult::CatalogAttributes(attributes) => Ok(attributes),
            _ => Err(QueryError::UnexpectedResult {
                query: "catalog_attributes",
            }),
        }
    }

    /// Drops the memoized result; an in-flight fetch for the same query still completes.
    pub fn invalidate(&self, query: &Query) -> Result<(), QueryError> {
        let key = fingerprint(query)?;
        self.state.cache.borrow_mut().pop(&key);
        Ok(())
    }

    pub fn clear(&self) {
        self.state.cache.borrow_mut().clear();
    }

    pub fn stats(&self) -> QueryStats {
        QueryStats {
            hits: self.state.hits.get(),
            misses: self.state.misses.get(),
            coalesced: self.state.coalesced.get(),
        }
    }

    pub fn cached_len(&self) -> usize {
        self.state.cache.borrow().len()
    }
}

async fn fetch(backend: &dyn DashboardBackend, query: &Query) -> Result<QueryResult, QueryError> {
    let result = match query {
        Query::Insight { insight } => QueryResult::Insight(backend.get_insight(insight).await?),
        Query::AttributeMetadata { display_form } => {
            QueryResult::Attribute(backend.get_attribute_by_display_form(display_form).await?)
        }
        Query::Measure { measure } => QueryResult::Measure(backend.get_measure(measure).await?),
        Query::CatalogAttributes => {
            QueryResult::CatalogAttributes(backend.get_catalog_attributes().await?)
        }
        Query::Execution { definition } => {
            QueryResult::Execution(backend.execute(definition).await?)
        }
    };
    Ok(result)
}

/// Point lookups of catalog metadata, as a store mutation. The full listing is not written
/// back here; initialization hydrates the catalog with it.
fn catalog_update(result: &QueryResult) -> Option<Mutation> {
    let (attributes, measures) = match result {
        QueryResult::Attribute(attribute) => (vec![attribute.clone()], Vec::new()),
        QueryResult::Measure(measure) => (Vec::new(), vec![measure.clone()]),
        QueryResult::CatalogAttributes(_)
        | QueryResult::Insight(_)
        | QueryResult::Execution(_) => return None,
    };
    Some(Mutation::CacheCatalog {
        attributes,
        measures,
    })
}

#[cfg(test)]
#[path = "tests/query_tests.rs"]
mod tests;
