//! Pipeline execution: the step sequencer, the per-step executor seam, and
//! the terminal artifact producers fired on job completion.

pub mod artifacts;
pub mod executor;
pub mod sequencer;

pub use executor::{SimulatedStepExecutor, StepExecutor};
pub use sequencer::StepSequencer;
