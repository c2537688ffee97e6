// Per-team status workflow: final statuses, transition matrix, reversion policy

pub mod engine;
pub mod store;

pub use engine::{WorkflowEngine, WorkflowSettings};
pub use store::{
    InMemoryWorkflowStore, TransitionMatrix, TransitionRule, WorkflowConfiguration, WorkflowStore,
};
