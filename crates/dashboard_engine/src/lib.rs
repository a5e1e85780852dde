pub mod bus;
pub mod config;
pub mod correlation;
pub mod engine;
pub mod events;
mod handlers;
pub mod layout;
pub mod query;
pub mod saga;
pub mod store;
pub mod undo;

pub use bus::HandlerRegistry;
pub use config::{EngineConfig, EngineConfigError};
pub use correlation::{CancelSignal, CorrelationRegistry};
pub use engine::{DashboardEngine, EngineBuilder};
pub use events::{EventBus, Subscription};
pub use layout::{ItemPath, LayoutFacade};
pub use query::{Query, QueryError, QueryResult, QueryService, QueryStats};
pub use saga::{delegated_outcome, CommandHandler, HandlerError, SagaContext};
pub use store::{DashboardState, DashboardStore, Mutation, ReducerError, Slice};
pub use undo::{Inverse, UndoBlocked, UndoEntry, UndoLedger};
