// Wizard engine: per-attempt step storage, step validators and the state machine.

pub mod controller;
pub mod store;
pub mod validation;

pub use controller::{SubmitOutcome, WizardController};
pub use store::{FileStepStore, MemoryStepStore, StepStore};
