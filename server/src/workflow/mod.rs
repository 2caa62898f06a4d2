pub mod active;
pub mod engine;
pub mod nodes;
pub mod state;

pub use engine::{ResumeOutcome, WorkflowEngine};
pub use state::{DraftDecision, NodeOutcome, ResumePayload, UserDecision, WorkflowState, WorkflowStep};
