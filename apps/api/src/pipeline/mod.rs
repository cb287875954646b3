// Refinement pipeline: reviewer → swot → refiner → judge → finalizer.
// All provider calls go through the Stage Invoker; only the orchestrator touches RunState.

pub mod handlers;
pub mod invoker;
pub mod orchestrator;
pub mod prompts;
pub mod schemas;

#[cfg(test)]
pub(crate) mod testing;

pub use invoker::{CallPolicy, StageInvoker};
pub use orchestrator::Orchestrator;
