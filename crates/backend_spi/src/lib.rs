use async_trait::async_trait;
use shared::{
    domain::{
        CatalogAttribute, CatalogMeasure, DashboardDefinition, ExecutionDefinition,
        ExecutionResult, Insight, ObjRef,
    },
    error::{ApiError, ErrorCode},
};
use thiserror::Error;

mod memory;
pub use memory::{BackendFixtures, BackendOperation, InMemoryBackend};

/// Failure of a backend capability. Cloneable so one result can be shared by coalesced callers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("not authorized: {0}")]
    Unauthorized(String),
    #[error("rejected by backend: {0}")]
    Validation(String),
    #[error("conflicting update: {0}")]
    Conflict(String),
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

impl BackendError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::Unauthorized(_) => ErrorCode::Unauthorized,
            Self::Validation(_) => ErrorCode::Validation,
            Self::Conflict(_) => ErrorCode::Conflict,
            Self::Unavailable(_) => ErrorCode::Unavailable,
        }
    }

    pub fn not_found(object: &ObjRef) -> Self {
        Self::NotFound(object.to_string())
    }
}

impl From<&BackendError> for ApiError {
    fn from(value: &BackendError) -> Self {
        ApiError::new(value.code(), value.to_string())
    }
}

impl From<BackendError> for ApiError {
    fn from(value: BackendError) -> Self {
        ApiError::from(&value)
    }
}

/// Asynchronous capabilities the engine consumes. Latency is unspecified and any call may fail.
#[async_trait]
pub trait DashboardBackend: Send + Sync {
    async fn get_dashboard(&self, dashboard: &ObjRef) -> Result<DashboardDefinition, BackendError>;
    async fn get_insight(&self, insight: &ObjRef) -> Result<Insight, BackendError>;
    async fn get_catalog_attributes(&self) -> Result<Vec<CatalogAttribute>, BackendError>;
    async fn get_attribute_by_display_form(
        &self,
        display_form: &ObjRef,
    ) -> Result<CatalogAttribute, BackendError>;
    async fn get_measure(&self, measure: &ObjRef) -> Result<CatalogMeasure, BackendError>;
    /// Updates the dashboard in place, or creates it when the descriptor has no ref yet.
    async fn save_dashboard(
        &self,
        dashboard: &DashboardDefinition,
    ) -> Result<DashboardDefinition, BackendError>;
    /// Always creates a new dashboard, ignoring any ref already on the descriptor.
    async fn create_dashboard(
        &self,
        dashboard: &DashboardDefinition,
    ) -> Result<DashboardDefinition, BackendError>;
    async fn execute(
        &self,
        definition: &ExecutionDefinition,
    ) -> Result<ExecutionResult, BackendError>;
}

pub struct MissingBackend;

#[async_trait]
impl DashboardBackend for MissingBackend {
    async fn get_dashboard(&self, dashboard: &ObjRef) -> Result<DashboardDefinition, BackendError> {
        Err(BackendError::Unavailable(format!(
            "no backend configured to load dashboard {dashboard}"
        )))
    }

    async fn get_insight(&self, insight: &ObjRef) -> Result<Insight, BackendError> {
        Err(BackendError::Unavailable(format!(
            "no backend configured to load insight {insight}"
        )))
    }

    async fn get_catalog_attributes(&self) -> Result<Vec<CatalogAttribute>, BackendError> {
        Err(BackendError::Unavailable(
            "no backend configured to load the catalog".to_string(),
        ))
    }

    async fn get_attribute_by_display_form(
        &self,
        display_form: &ObjRef,
    ) -> Result<CatalogAttribute, BackendError> {
        Err(BackendError::Unavailable(format!(
            "no backend configured to resolve display form {display_form}"
        )))
    }

    async fn get_measure(&self, measure: &ObjRef) -> Result<CatalogMeasure, BackendError> {
        Err(BackendError::Unavailable(format!(
            "no backend configured to resolve measure {measure}"
        )))
    }

    async fn save_dashboard(
        &self,
        _dashboard: &DashboardDefinition,
    ) -> Result<DashboardDefinition, BackendError> {
        Err(BackendError::Unavailable(
            "no backend configured to save dashboards".to_string(),
        ))
    }

    async fn create_dashboard(
        &self,
        _dashboard: &DashboardDefinition,
    ) -> Result<DashboardDefinition, BackendError> {
        Err(BackendError::Unavailable(
            "no backend configured to create dashboards".to_string(),
        ))
    }

    async fn execute(
        &self,
        _definition: &ExecutionDefinition,
    ) -> Result<ExecutionResult, BackendError> {
        Err(BackendError::Unavailable(
            "no backend configured to run executions".to_string(),
        ))
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
