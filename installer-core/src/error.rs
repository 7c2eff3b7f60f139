// Public error taxonomy of the wizard engine.
//
// Step-level errors are turned into user-facing messages by the controller; they never carry
// secrets or raw driver output (that goes to the log, masked).

use crate::models::steps::StepNumber;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WizardError {
    /// Missing or malformed required field. Recoverable on the same step.
    #[error("{message}")]
    Validation { step: StepNumber, message: String },

    /// External precondition not met (database unreachable, directory unwritable).
    #[error("{message}")]
    Precondition { step: StepNumber, message: String },

    /// A configuration artifact already exists and no override was requested.
    #[error("The application is already installed. Use force to reinstall.")]
    AlreadyInstalled,

    #[error("Step {requested} is not reachable yet; continue from step {allowed}.")]
    StepNotReachable {
        requested: StepNumber,
        allowed: StepNumber,
    },

    #[error("Unknown step {0}.")]
    UnknownStep(StepNumber),

    /// A finalization run for the same attempt is already executing.
    #[error("Installation is already in progress.")]
    InstallInProgress,

    #[error("Wizard state could not be stored: {0}")]
    Store(String),
}

impl WizardError {
    pub fn validation(step: StepNumber, message: impl Into<String>) -> Self {
        WizardError::Validation {
            step,
            message: message.into(),
        }
    }

    pub fn precondition(step: StepNumber, message: impl Into<String>) -> Self {
        WizardError::Precondition {
            step,
            message: message.into(),
        }
    }

    /// Errors the operator fixes by re-submitting the same step.
    pub fn is_step_error(&self) -> bool {
        matches!(
            self,
            WizardError::Validation { .. } | WizardError::Precondition { .. }
        )
    }
}

impl From<anyhow::Error> for WizardError {
    fn from(e: anyhow::Error) -> Self {
        WizardError::Store(format!("{:#}", e))
    }
}

/// Fatal failure inside the Finalizer: no usable configuration artifact exists.
#[derive(Debug, Error)]
pub enum FinalizeError {
    #[error("Configuration is incomplete: {0}")]
    IncompleteConfig(String),

    #[error("Failed to write configuration: {0}")]
    WriteConfig(String),

    #[error("Failed to persist generated secrets: {0}")]
    Secrets(String),
}
