// /install endpoint
//
// GET  /install?step=n[&force=1]  -> render step n if reachable
// POST /install?step=n[&force=1]  -> submit step n; redirect to n+1 or re-render with an error
//
// Framework-agnostic: the host maps `InstallRequest` in and `InstallResponse` out.

use crate::error::WizardError;
use crate::models::requests::{InstallRequest, Method};
use crate::models::responses::InstallResponse;
use crate::models::state::AttemptId;
use crate::models::steps::StepNumber;
use crate::wizard::{SubmitOutcome, WizardController};
use log::{info, warn};
use std::time::Instant;

pub const ALREADY_INSTALLED_MESSAGE: &str =
    "The application is already installed. Add ?force=1 to reinstall.";

pub fn step_location(step: StepNumber) -> String {
    format!("/install?step={}", step)
}

fn error_response(attempt: Option<&AttemptId>, e: WizardError) -> InstallResponse {
    match e {
        WizardError::AlreadyInstalled => InstallResponse::AlreadyInstalled {
            message: ALREADY_INSTALLED_MESSAGE.to_string(),
        },
        WizardError::StepNotReachable { allowed, .. } => match attempt {
            Some(id) => InstallResponse::Redirect {
                attempt: id.clone(),
                step: allowed,
                location: step_location(allowed),
            },
            None => InstallResponse::Error {
                status: 409,
                message: e.to_string(),
            },
        },
        WizardError::UnknownStep(_) => InstallResponse::Error {
            status: 404,
            message: e.to_string(),
        },
        WizardError::InstallInProgress => InstallResponse::Error {
            status: 409,
            message: e.to_string(),
        },
        WizardError::Validation { .. } | WizardError::Precondition { .. } => {
            InstallResponse::Error {
                status: 422,
                message: e.to_string(),
            }
        }
        WizardError::Store(_) => InstallResponse::Error {
            status: 500,
            message: e.to_string(),
        },
    }
}

async fn render(
    controller: &WizardController,
    id: &AttemptId,
    step: Option<StepNumber>,
    force: bool,
) -> Result<InstallResponse, WizardError> {
    let view = controller.show(Some(id), step, force).await?;
    Ok(InstallResponse::Render {
        attempt: id.clone(),
        view,
        finalization: None,
    })
}

async fn handle_get(
    controller: &WizardController,
    req: &InstallRequest,
) -> Result<InstallResponse, WizardError> {
    let attempt = controller.enter(req.attempt.as_ref(), req.force).await?;
    render(controller, &attempt.id, req.step, req.force).await
}

async fn handle_post(
    controller: &WizardController,
    req: &InstallRequest,
) -> Result<InstallResponse, WizardError> {
    let Some(step) = req.step else {
        return Ok(InstallResponse::Error {
            status: 400,
            message: "Missing step parameter.".to_string(),
        });
    };

    // Only a brand-new visitor needs an attempt created up front; an existing one goes straight
    // to submit so a running finalization is reported as such.
    let id = match &req.attempt {
        Some(id) => id.clone(),
        None => controller.enter(None, req.force).await?.id,
    };

    match controller
        .submit(Some(&id), step, &req.form, req.force)
        .await?
    {
        SubmitOutcome::Advanced { attempt, next } => Ok(InstallResponse::Redirect {
            attempt,
            step: next,
            location: step_location(next),
        }),
        SubmitOutcome::Rejected {
            attempt,
            step,
            checklist,
            ..
        } => {
            let mut view = controller.show(Some(&attempt), Some(step), req.force).await?;
            if checklist.is_some() {
                view.checklist = checklist;
            }
            Ok(InstallResponse::Render {
                attempt,
                view,
                finalization: None,
            })
        }
        SubmitOutcome::Finalized {
            attempt, result, ..
        } if result.success => Ok(InstallResponse::Completed {
            attempt,
            summary: result.summary(),
            warnings: result.warnings(),
            result,
        }),
        SubmitOutcome::Finalized {
            attempt, result, ..
        } => {
            let view = controller.show(Some(&attempt), Some(step), req.force).await?;
            Ok(InstallResponse::Render {
                attempt,
                view,
                finalization: Some(result),
            })
        }
    }
}

/// Handle one `/install` request. Never fails: every error becomes a response.
pub async fn handle(controller: &WizardController, req: InstallRequest) -> InstallResponse {
    let started = Instant::now();
    info!(
        "[PHASE: wizard] [STEP: request] {:?} /install (step={:?}, force={}, attempt={:?})",
        req.method,
        req.step,
        req.force,
        req.attempt.as_ref().map(AttemptId::as_str)
    );

    let result = match req.method {
        Method::Get => handle_get(controller, &req).await,
        Method::Post => handle_post(controller, &req).await,
    };
    let response = result.unwrap_or_else(|e| {
        if e.is_step_error() {
            info!("[PHASE: wizard] [STEP: request] {}", e);
        } else {
            warn!("[PHASE: wizard] [STEP: request] {}", e);
        }
        error_response(req.attempt.as_ref(), e)
    });

    info!(
        "[PHASE: wizard] [STEP: request] -> {} (duration_ms={})",
        response.status(),
        started.elapsed().as_millis()
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::state::WizardState;
    use crate::models::steps::{FieldSet, STEP_COUNT};
    use crate::test_support::{harness, sample_steps, StubRunner};

    fn attempt_of(r: &InstallResponse) -> AttemptId {
        match r {
            InstallResponse::Render { attempt, .. }
            | InstallResponse::Redirect { attempt, .. }
            | InstallResponse::Completed { attempt, .. } => attempt.clone(),
            other => panic!("no attempt in {:?}", other),
        }
    }

    #[tokio::test]
    async fn first_visit_renders_step_one_with_checklist() {
        let h = harness(StubRunner::ok());
        let r = handle(&h.controller, InstallRequest::get(None, None)).await;
        let InstallResponse::Render { view, .. } = &r else {
            panic!("expected render, got {:?}", r);
        };
        assert_eq!(view.step, 1);
        assert!(view.checklist.as_ref().unwrap().all_passed());
        assert_eq!(r.status(), 200);
    }

    #[tokio::test]
    async fn post_redirects_forward_or_rerenders_with_error() {
        let h = harness(StubRunner::ok());
        let r = handle(
            &h.controller,
            InstallRequest::post(None, 1, FieldSet::new()),
        )
        .await;
        let id = attempt_of(&r);
        assert!(matches!(
            r,
            InstallResponse::Redirect { step: 2, ref location, .. } if location == "/install?step=2"
        ));

        let mut bad = sample_steps()[&2].clone();
        bad.remove("db_host");
        let r = handle(&h.controller, InstallRequest::post(Some(id.clone()), 2, bad)).await;
        let InstallResponse::Render { view, .. } = r else {
            panic!("expected re-render");
        };
        assert_eq!(view.step, 2);
        assert_eq!(view.error.as_deref(), Some("The db host field is required."));
    }

    #[tokio::test]
    async fn skipping_ahead_redirects_to_the_allowed_step() {
        let h = harness(StubRunner::ok());
        let id = attempt_of(&handle(&h.controller, InstallRequest::get(None, None)).await);
        let r = handle(&h.controller, InstallRequest::get(Some(id), Some(4))).await;
        assert!(matches!(r, InstallResponse::Redirect { step: 1, .. }));
    }

    #[tokio::test]
    async fn full_flow_then_guard_then_force() {
        let h = harness(StubRunner::ok());
        let mut id: Option<AttemptId> = None;
        for n in 1..STEP_COUNT {
            let form = sample_steps().get(&n).cloned().unwrap_or_default();
            let r = handle(&h.controller, InstallRequest::post(id.clone(), n, form)).await;
            assert!(matches!(r, InstallResponse::Redirect { .. }), "step {}: {:?}", n, r);
            id = Some(attempt_of(&r));
        }
        let r = handle(
            &h.controller,
            InstallRequest::post(id.clone(), STEP_COUNT, FieldSet::new()),
        )
        .await;
        assert!(matches!(r, InstallResponse::Completed { .. }), "{:?}", r);

        let r = handle(&h.controller, InstallRequest::get(None, Some(1))).await;
        assert_eq!(
            r,
            InstallResponse::AlreadyInstalled {
                message: ALREADY_INSTALLED_MESSAGE.to_string()
            }
        );

        let r = handle(
            &h.controller,
            InstallRequest::get(None, Some(1)).with_force(true),
        )
        .await;
        let InstallResponse::Render { view, .. } = r else {
            panic!("expected render");
        };
        assert_eq!(view.state, WizardState::Step(1));
    }

    #[tokio::test]
    async fn failed_finalization_rerenders_terminal_step() {
        let h = harness(StubRunner::ok());
        h.admins.fail_next(1);
        let mut id: Option<AttemptId> = None;
        for n in 1..STEP_COUNT {
            let form = sample_steps().get(&n).cloned().unwrap_or_default();
            id = Some(attempt_of(
                &handle(&h.controller, InstallRequest::post(id.clone(), n, form)).await,
            ));
        }
        let r = handle(
            &h.controller,
            InstallRequest::post(id, STEP_COUNT, FieldSet::new()),
        )
        .await;
        let InstallResponse::Render {
            view, finalization, ..
        } = r
        else {
            panic!("expected render");
        };
        assert_eq!(view.step, STEP_COUNT);
        assert!(matches!(view.state, WizardState::Failed(_)));
        assert!(!finalization.unwrap().success);
    }

    #[tokio::test]
    async fn post_without_step_is_a_bad_request() {
        let h = harness(StubRunner::ok());
        let mut req = InstallRequest::post(None, 1, FieldSet::new());
        req.step = None;
        assert_eq!(handle(&h.controller, req).await.status(), 400);
    }
}
