pub mod orchestrator;

pub use orchestrator::{RunOutcome, RunState, ScanOrchestrator, Upstreams};
