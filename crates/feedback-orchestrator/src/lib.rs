//! The durable orchestrator: workflow state machine, journal, and the
//! signal/timer race for human approval (SPEC_FULL.md §4.1, §5).

pub mod engine;
pub mod journal;
pub mod state;

pub use engine::{Activities, Engine};
pub use journal::JournalManager;
pub use state::{DescribeResponse, WorkflowInstance};
