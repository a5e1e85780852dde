use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    sync::{Mutex, MutexGuard},
    time::Duration,
};

use async_trait::async_trait;
use serde::Deserialize;
use shared::domain::{
    CatalogAttribute, CatalogMeasure, DashboardDefinition, ExecutionDefinition, ExecutionResult,
    Insight, ObjRef,
};
use tracing::debug;

use crate::{BackendError, DashboardBackend};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendOperation {
    GetDashboard,
    GetInsight,
    GetCatalogAttributes,
    GetAttributeByDisplayForm,
    GetMeasure,
    SaveDashboard,
    CreateDashboard,
    Execute,
}

/// Seed data for [`InMemoryBackend`], loadable from JSON.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BackendFixtures {
    #[serde(default)]
    pub dashboards: Vec<DashboardDefinition>,
    #[serde(default)]
    pub insights: Vec<Insight>,
    #[serde(default)]
    pub attributes: Vec<CatalogAttribute>,
    #[serde(default)]
    pub measures: Vec<CatalogMeasure>,
}

#[derive(Default)]
struct MemoryState {
    dashboards: BTreeMap<ObjRef, DashboardDefinition>,
    insights: HashMap<ObjRef, Insight>,
    attributes: Vec<CatalogAttribute>,
    measures: HashMap<ObjRef, CatalogMeasure>,
    calls: HashMap<BackendOperation, u32>,
    failures: HashMap<BackendOperation, VecDeque<BackendError>>,
    next_dashboard_id: u32,
}

/// Backend held entirely in memory, with per-operation call counters and scripted failures.
#[derive(Default)]
pub struct InMemoryBackend {
    state: Mutex<MemoryState>,
    latency: Option<Duration>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fixtures(fixtures: BackendFixtures) -> Self {
        let mut backend = Self::new();
        for dashboard in fixtures.dashboards {
            backend = backend.with_dashboard(dashboard);
        }
        for insight in fixtures.insights {
            backend = backend.with_insight(insight);
        }
        for attribute in fixtures.attributes {
            backend = backend.with_attribute(attribute);
        }
        for measure in fixtures.measures {
            backend = backend.with_measure(measure);
        }
        backend
    }

    /// Stores `dashboard` under its descriptor ref; dashboards without one get a generated ref.
    pub fn with_dashboard(self, mut dashboard: DashboardDefinition) -> Self {
        {
            let mut state = self.lock();
            let dashboard_ref = match dashboard.descriptor.dashboard_ref.clone() {
                Some(dashboard_ref) => dashboard_ref,
                None => state.next_ref(),
            };
            dashboard.descriptor.dashboard_ref = Some(dashboard_ref.clone());
            state.dashboards.insert(dashboard_ref, dashboard);
        }
        self
    }

    pub fn with_insight(self, insight: Insight) -> Self {
        self.lock()
            .insights
            .insert(insight.insight_ref.clone(), insight);
        self
    }

    pub fn with_attribute(self, attribute: CatalogAttribute) -> Self {
        self.lock().attributes.push(attribute);
        self
    }

    pub fn with_measure(self, measure: CatalogMeasure) -> Self {
        self.lock()
            .measures
            .insert(measure.measure.clone(), measure);
        self
    }

    /// Every call sleeps this long before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// The next call of `operation` fails with `error`; queued failures are consumed in order.
    pub fn fail_next(&self, operation: BackendOperation, error: BackendError) {
        self.lock()
            .failures
            .entry(operation)
            .or_default()
            .push_back(error);
    }

    pub fn calls(&self, operation: BackendOperation) -> u32 {
        self.lock().calls.get(&operation).copied().unwrap_or(0)
    }

    pub fn dashboard(&self, dashboard: &ObjRef) -> Option<DashboardDefinition> {
        self.lock().dashboards.get(dashboard).cloned()
    }

    pub fn dashboard_count(&self) -> usize {
        self.lock().dashboards.len()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn enter(&self, operation: BackendOperation) -> Result<(), BackendError> {
        let scripted = {
            let mut state = self.lock();
            *state.calls.entry(operation).or_insert(0) += 1;
            state
                .failures
                .get_mut(&operation)
                .and_then(VecDeque::pop_front)
        };
        debug!(operation = ?operation, "in-memory backend call");
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        match scripted {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl MemoryState {
    fn next_ref(&mut self) -> ObjRef {
        self.next_dashboard_id += 1;
        ObjRef::identifier(format!("dashboard-{}", self.next_dashboard_id))
    }

    fn store_new(&mut self, dashboard: &DashboardDefinition) -> DashboardDefinition {
        let mut created = dashboard.clone();
        let dashboard_ref = self.next_ref();
        created.descriptor.dashboard_ref = Some(dashboard_ref.clone());
        self.dashboards.insert(dashboard_ref, created.clone());
        created
    }
}

#[async_trait]
impl DashboardBackend for InMemoryBackend {
    async fn get_dashboard(&self, dashboard: &ObjRef) -> Result<DashboardDefinition, BackendError> {
        self.enter(BackendOperation::GetDashboard).await?;
        self.lock()
            .dashboards
            .get(dashboard)
            .cloned()
            .ok_or_else(|| BackendError::not_found(dashboard))
    }

    async fn get_insight(&self, insight: &ObjRef) -> Result<Insight, BackendError> {
        self.enter(BackendOperation::GetInsight).await?;
        self.lock()
            .insights
            .get(insight)
            .cloned()
            .ok_or_else(|| BackendError::not_found(insight))
    }

    async fn get_catalog_attributes(&self) -> Result<Vec<CatalogAttribute>, BackendError> {
        self.enter(BackendOperation::GetCatalogAttributes).await?;
        Ok(self.lock().attributes.clone())
    }

    async fn get_attribute_by_display_form(
        &self,
        display_form: &ObjRef,
    ) -> Result<CatalogAttribute, BackendError> {
        self.enter(BackendOperation::GetAttributeByDisplayForm)
            .await?;
        self.lock()
            .attributes
            .iter()
            .find(|attribute| attribute.has_display_form(display_form))
            .cloned()
            .ok_or_else(|| BackendError::not_found(display_form))
    }

    async fn get_measure(&self, measure: &ObjRef) -> Result<CatalogMeasure, BackendError> {
        self.enter(BackendOperation::GetMeasure).await?;
        self.lock()
            .measures
            .get(measure)
            .cloned()
            .ok_or_else(|| BackendError::not_found(measure))
    }

    async fn save_dashboard(
        &self,
        dashboard: &DashboardDefinition,
    ) -> Result<DashboardDefinition, BackendError> {
        self.enter(BackendOperation::SaveDashboard).await?;
        let mut state = self.lock();
        match dashboard.descriptor.dashboard_ref.clone() {
            Some(dashboard_ref) => {
                if !state.dashboards.contains_key(&dashboard_ref) {
                    return Err(BackendError::not_found(&dashboard_ref));
                }
                state.dashboards.insert(dashboard_ref, dashboard.clone());
                Ok(dashboard.clone())
            }
            None => Ok(state.store_new(dashboard)),
        }
    }

    async fn create_dashboard(
        &self,
        dashboard: &DashboardDefinition,
    ) -> Result<DashboardDefinition, BackendError> {
        self.enter(BackendOperation::CreateDashboard).await?;
        Ok(self.lock().store_new(dashboard))
    }

    async fn execute(
        &self,
        definition: &ExecutionDefinition,
    ) -> Result<ExecutionResult, BackendError> {
        self.enter(BackendOperation::Execute).await?;
        if definition.measures.is_empty() {
            return Err(BackendError::Validation(
                "execution needs at least one measure".to_string(),
            ));
        }
        let headers = definition
            .attributes
            .iter()
            .chain(definition.measures.iter())
            .map(ObjRef::key)
            .collect();
        let scale = (definition.filters.len() + 1) as f64;
        let row = definition
            .measures
            .iter()
            .enumerate()
            .map(|(index, _)| (index as f64 + 1.0) * 10.0 / scale)
            .collect();
        Ok(ExecutionResult {
            headers,
            data: vec![row],
        })
    }
}
