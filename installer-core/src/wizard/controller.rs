// WizardController
//
// Owns step ordering. A step's fields reach the StepStore only after its validator (and, for
// steps 1 and 2, its external precondition) passed. The terminal step runs the Finalizer behind
// a per-attempt gate so a double submit cannot run the sequence twice at once.

use super::store::StepStore;
use super::validation::{retain_owned, validate_fields};
use crate::database::connection::ConnectionParams;
use crate::error::WizardError;
use crate::finalize::Finalizer;
use crate::installation::layout::InstallLayout;
use crate::models::responses::{ActionKind, Checklist, FinalizationResult, StepView};
use crate::models::state::{AttemptId, InstallationAttempt, WizardState};
use crate::models::steps::{self, FieldSet, StepDefinition, StepKind, StepNumber};
use crate::preflight::PreconditionChecker;
use crate::utils::logging::is_secret_field;
use log::{info, warn};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

#[derive(Debug)]
pub enum SubmitOutcome {
    /// Fields stored; the operator continues at `next`.
    Advanced {
        attempt: AttemptId,
        next: StepNumber,
    },
    /// Validator or precondition failed; nothing was stored for the step.
    Rejected {
        attempt: AttemptId,
        step: StepNumber,
        error: WizardError,
        checklist: Option<Checklist>,
    },
    /// The terminal step ran the Finalizer. `state` is `Completed` or `Failed`.
    Finalized {
        attempt: AttemptId,
        result: FinalizationResult,
        state: WizardState,
    },
}

#[derive(Debug, Default)]
struct FinalizeGate {
    running: Mutex<HashSet<AttemptId>>,
}

struct GateGuard<'a> {
    gate: &'a FinalizeGate,
    id: AttemptId,
}

impl FinalizeGate {
    fn try_begin(&self, id: &AttemptId) -> Option<GateGuard<'_>> {
        let mut running = self.running.lock().unwrap_or_else(|p| p.into_inner());
        if !running.insert(id.clone()) {
            return None;
        }
        Some(GateGuard {
            gate: self,
            id: id.clone(),
        })
    }
}

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        let mut running = self.gate.running.lock().unwrap_or_else(|p| p.into_inner());
        running.remove(&self.id);
    }
}

pub struct WizardController {
    store: Arc<dyn StepStore>,
    checker: Arc<PreconditionChecker>,
    finalizer: Arc<Finalizer>,
    layout: InstallLayout,
    gate: FinalizeGate,
}

impl WizardController {
    pub fn new(
        store: Arc<dyn StepStore>,
        checker: Arc<PreconditionChecker>,
        finalizer: Arc<Finalizer>,
        layout: InstallLayout,
    ) -> Self {
        Self {
            store,
            checker,
            finalizer,
            layout,
            gate: FinalizeGate::default(),
        }
    }

    /// Entry guard plus implicit attempt creation.
    ///
    /// An existing artifact refuses entry unless `force` is set or the live attempt already
    /// owns the artifact (a retry after a partial finalization). `force` over an artifact the
    /// live attempt does not own starts a fresh attempt.
    pub async fn enter(
        &self,
        id: Option<&AttemptId>,
        force: bool,
    ) -> Result<InstallationAttempt, WizardError> {
        let live = match id {
            Some(id) => self.store.load(id).await?,
            None => None,
        };
        let installed = self.layout.artifact_exists().await;

        if let Some(attempt) = live {
            if !installed || attempt.may_overwrite_artifact() {
                return Ok(attempt);
            }
            if !force {
                return Err(WizardError::AlreadyInstalled);
            }
            info!(
                "[PHASE: wizard] [STEP: enter] Forced reinstall over existing artifact; resetting attempt {}",
                attempt.id
            );
            self.store.clear(&attempt.id).await?;
        } else if installed && !force {
            return Err(WizardError::AlreadyInstalled);
        }

        let mut attempt =
            InstallationAttempt::new(id.cloned().unwrap_or_else(AttemptId::generate));
        attempt.forced = installed && force;
        self.store.save(&attempt).await?;
        info!(
            "[PHASE: wizard] [STEP: enter] Started attempt {} (forced={})",
            attempt.id, attempt.forced
        );
        Ok(attempt)
    }

    /// Whether step `n` may be displayed for this attempt (no skipping ahead).
    pub async fn can_show(&self, id: &AttemptId, n: StepNumber) -> Result<bool, WizardError> {
        match self.store.load(id).await? {
            Some(attempt) => Ok(attempt.can_reach(n)),
            None => Ok(n == 1),
        }
    }

    /// View of step `n` (default: the attempt's current step). Stored secrets are blanked.
    pub async fn show(
        &self,
        id: Option<&AttemptId>,
        n: Option<StepNumber>,
        force: bool,
    ) -> Result<StepView, WizardError> {
        let attempt = self.enter(id, force).await?;
        let n = n.unwrap_or(attempt.current_step);
        let def = steps::step(n).ok_or(WizardError::UnknownStep(n))?;
        ensure_reachable(&attempt, n)?;

        let fields: FieldSet = attempt
            .steps
            .get(&n)
            .map(|f| {
                f.iter()
                    .map(|(k, v)| {
                        let shown = if is_secret_field(k) {
                            String::new()
                        } else {
                            v.clone()
                        };
                        (k.clone(), shown)
                    })
                    .collect()
            })
            .unwrap_or_default();

        let checklist = if def.kind == StepKind::Requirements {
            Some(self.checker.check_environment().await)
        } else {
            None
        };

        Ok(StepView {
            step: n,
            kind: def.kind,
            title: def.title.to_string(),
            is_terminal: def.is_terminal,
            required: def.required.iter().map(|s| s.to_string()).collect(),
            optional: def.optional.iter().map(|s| s.to_string()).collect(),
            fields,
            state: WizardState::of(&attempt),
            error: attempt.error_for(n).map(str::to_string),
            checklist,
        })
    }

    /// Submit step `n`. Step-level failures come back as `Rejected`, never as `Err`.
    pub async fn submit(
        &self,
        id: Option<&AttemptId>,
        n: StepNumber,
        form: &FieldSet,
        force: bool,
    ) -> Result<SubmitOutcome, WizardError> {
        let def = steps::step(n).ok_or(WizardError::UnknownStep(n))?;

        // Checked before the entry guard: a running finalization has already written the
        // artifact, and the second caller must hear "in progress", not "installed".
        let _gate = match (def.is_terminal, id) {
            (true, Some(id)) => Some(
                self.gate
                    .try_begin(id)
                    .ok_or(WizardError::InstallInProgress)?,
            ),
            _ => None,
        };

        let mut attempt = self.enter(id, force).await?;
        ensure_reachable(&attempt, n)?;
        let submitted = retain_owned(def, form);

        if let Err((error, checklist)) = self.check_step(def, &submitted).await {
            warn!(
                "[PHASE: wizard] [STEP: {}] Rejected for attempt {}: {}",
                def.kind.as_str(),
                attempt.id,
                error
            );
            attempt.reject_step(n, error.to_string());
            self.store.save(&attempt).await?;
            return Ok(SubmitOutcome::Rejected {
                attempt: attempt.id,
                step: n,
                error,
                checklist,
            });
        }

        if def.is_terminal {
            return self.finalize(attempt).await;
        }

        attempt.accept_step(n, submitted);
        self.store.save(&attempt).await?;
        info!(
            "[PHASE: wizard] [STEP: {}] Accepted for attempt {}; next step {}",
            def.kind.as_str(),
            attempt.id,
            attempt.current_step
        );
        Ok(SubmitOutcome::Advanced {
            next: n.saturating_add(1),
            attempt: attempt.id,
        })
    }

    pub async fn state(&self, id: &AttemptId) -> Result<WizardState, WizardError> {
        match self.store.load(id).await? {
            Some(attempt) => Ok(WizardState::of(&attempt)),
            None if self.layout.artifact_exists().await => Ok(WizardState::Completed),
            None => Ok(WizardState::Step(1)),
        }
    }

    /// Drop everything stored for the attempt.
    pub async fn abandon(&self, id: &AttemptId) -> Result<(), WizardError> {
        self.store.clear(id).await?;
        info!("[PHASE: wizard] [STEP: abandon] Attempt {} abandoned", id);
        Ok(())
    }

    async fn check_step(
        &self,
        def: &StepDefinition,
        submitted: &FieldSet,
    ) -> Result<(), (WizardError, Option<Checklist>)> {
        let n = def.number;
        validate_fields(def, submitted).map_err(|m| (WizardError::validation(n, m), None))?;

        match def.kind {
            StepKind::Requirements => {
                let checklist = self.checker.check_environment().await;
                if !checklist.all_passed() {
                    let message = format!(
                        "Some requirements are not met: {}",
                        checklist.failed_labels().join(", ")
                    );
                    return Err((WizardError::precondition(n, message), Some(checklist)));
                }
            }
            StepKind::Database => {
                let params = ConnectionParams::from_fields(submitted)
                    .map_err(|m| (WizardError::validation(n, m), None))?;
                self.checker.probe_database(&params).await.map_err(|e| {
                    (
                        WizardError::precondition(
                            n,
                            format!("Database connection failed: {}", e.user_message),
                        ),
                        None,
                    )
                })?;
            }
            _ => {}
        }
        Ok(())
    }

    async fn finalize(
        &self,
        mut attempt: InstallationAttempt,
    ) -> Result<SubmitOutcome, WizardError> {
        let n = attempt.current_step;
        info!(
            "[PHASE: wizard] [STEP: finalize] Running finalization for attempt {}",
            attempt.id
        );
        let result = self.finalizer.run(&attempt.steps).await;

        if result
            .outcome(ActionKind::WriteConfig)
            .map(|o| o.succeeded)
            .unwrap_or(false)
        {
            attempt.owns_artifact = true;
        }

        if result.success {
            // Durable artifacts exist now; the transient attempt state is no longer needed.
            self.store.clear(&attempt.id).await?;
            for warning in result.warnings() {
                warn!("[PHASE: wizard] [STEP: finalize] {}", warning);
            }
            return Ok(SubmitOutcome::Finalized {
                attempt: attempt.id,
                result,
                state: WizardState::Completed,
            });
        }

        let reason = result
            .failure_reason()
            .unwrap_or_else(|| "Installation did not complete.".to_string());
        attempt.reject_step(n, reason.clone());
        self.store.save(&attempt).await?;
        Ok(SubmitOutcome::Finalized {
            attempt: attempt.id,
            result,
            state: WizardState::Failed(reason),
        })
    }
}

fn ensure_reachable(attempt: &InstallationAttempt, n: StepNumber) -> Result<(), WizardError> {
    if attempt.can_reach(n) {
        Ok(())
    } else {
        Err(WizardError::StepNotReachable {
            requested: n,
            allowed: attempt.current_step,
        })
    }
}
