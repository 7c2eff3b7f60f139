// Waslne installation wizard engine
// Library entry point: module tree, logging setup, and the CLI run modes.

pub mod api;
pub mod database;
pub mod envfile;
pub mod error;
pub mod finalize;
pub mod installation;
pub mod models;
pub mod preflight;
pub mod security;
pub mod settings;
pub mod utils;
pub mod wizard;

#[cfg(test)]
pub(crate) mod test_support;

use anyhow::{Context, Result};
use log::{error, info};
use models::requests::WizardAnswers;
use models::responses::{ApiResponse, Checklist, FinalizationSummary};
use models::state::AttemptId;
use models::steps::{self as step_catalogue, STEP_COUNT};
use settings::InstallerSettings;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use wizard::{SubmitOutcome, WizardController};

/// Initialize logging system with dual format (JSON + human-readable)
fn init_logging(log_dir: &Path, with_console: bool) -> Result<(), Box<dyn std::error::Error>> {
    std::fs::create_dir_all(log_dir)?;

    let timestamp = chrono::Utc::now().format("%Y-%m-%d-%H%M%S");

    // JSON log file for structured parsing
    let json_log_file = log_dir.join(format!("installer-{}.log", timestamp));

    // Human-readable log file (.txt)
    let txt_log_file = log_dir.join(format!("installer-{}.txt", timestamp));

    let mut dispatch = fern::Dispatch::new()
        .level(log::LevelFilter::Debug)
        .level_for("sqlx", log::LevelFilter::Warn);

    if with_console {
        dispatch = dispatch.chain(
            fern::Dispatch::new()
                .level(log::LevelFilter::Info)
                .format(move |out, message, record| {
                    let timestamp_local = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
                    let message_str = format!("{}", message);
                    let (phase, step, cleaned_message) =
                        utils::logging::parse_log_metadata(&message_str);
                    let txt_line = utils::logging::format_human_readable_log(
                        &timestamp_local.to_string(),
                        record.level(),
                        record.target(),
                        &cleaned_message,
                        phase.as_deref(),
                        step.as_deref(),
                    );
                    out.finish(format_args!("{}", txt_line));
                })
                // stdout is reserved for the result of a run
                .chain(std::io::stderr()),
        );
    }

    dispatch = dispatch
        .chain(
            fern::Dispatch::new()
                .format(move |out, message, record| {
                    let timestamp_utc = chrono::Utc::now().to_rfc3339();
                    let message_str = format!("{}", message);
                    let (phase, step, cleaned_message) =
                        utils::logging::parse_log_metadata(&message_str);
                    let json_line = utils::logging::format_json_log(
                        &timestamp_utc,
                        record.level(),
                        record.target(),
                        &cleaned_message,
                        phase.as_deref(),
                        step.as_deref(),
                        None,
                    );
                    out.finish(format_args!("{}\n", json_line));
                })
                .chain(fern::log_file(json_log_file)?),
        )
        .chain(
            fern::Dispatch::new()
                .format(move |out, message, record| {
                    let timestamp_local = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
                    let message_str = format!("{}", message);
                    let (phase, step, cleaned_message) =
                        utils::logging::parse_log_metadata(&message_str);
                    let txt_line = utils::logging::format_human_readable_log(
                        &timestamp_local.to_string(),
                        record.level(),
                        record.target(),
                        &cleaned_message,
                        phase.as_deref(),
                        step.as_deref(),
                    );
                    out.finish(format_args!("{}\n", txt_line));
                })
                .chain(fern::log_file(txt_log_file)?),
        );

    dispatch.apply()?;

    log::info!(
        "[PHASE: initialization] Logging initialized, log directory: {:?}",
        log_dir
    );
    Ok(())
}

/// Fully wired production collaborators.
pub struct Installer {
    pub settings: InstallerSettings,
    pub app_root: PathBuf,
    pub checker: Arc<preflight::PreconditionChecker>,
    pub controller: WizardController,
}

impl Installer {
    pub fn build(settings: InstallerSettings) -> Result<Self> {
        let app_root = utils::path_resolver::resolve_app_root(&settings.app_root)?;
        let state_dir =
            utils::path_resolver::resolve_state_folder(settings.state_dir.as_deref(), &app_root)?;
        info!(
            "[PHASE: initialization] [STEP: wiring] app_root={:?}, state_dir={:?}",
            app_root, state_dir
        );

        let layout = installation::layout::InstallLayout::new(&app_root, &settings.artifact_name);

        // Secret protector (encryption-at-rest for secret step fields)
        let protector = Arc::new(security::secret_protector::SecretProtector::new(
            security::secret_protector::default_key_path(&state_dir),
        ));
        let store = Arc::new(wizard::FileStepStore::new(&state_dir, protector));

        let runtime = Arc::new(preflight::PhpRuntimeProbe::new(
            settings.php_binary.clone(),
            settings.cache_timeout(),
        ));
        let connector = Arc::new(database::connection::MySqlConnector::new(
            settings.db_probe_timeout(),
            settings.db_probe_retries,
        ));
        let checker = Arc::new(preflight::PreconditionChecker::new(
            &settings,
            layout.clone(),
            runtime,
            connector,
        ));

        let admins = Arc::new(database::admin::MySqlAdminAccounts::new(
            database::connection::MySqlConnector::new(
                settings.db_probe_timeout(),
                settings.db_probe_retries,
            ),
            settings.db_probe_timeout(),
        ));
        let runner = Arc::new(finalize::commands::ArtisanRunner::new(
            settings.php_binary.clone(),
            &app_root,
            settings.migration_timeout(),
            settings.cache_timeout(),
        ));
        let finalizer = Arc::new(finalize::Finalizer::new(
            layout.clone(),
            runner,
            admins,
            settings.permission_dirs.clone(),
        ));

        let controller = WizardController::new(store, checker.clone(), finalizer, layout);
        Ok(Self {
            settings,
            app_root,
            checker,
            controller,
        })
    }
}

fn load_and_init(settings_file: Option<&Path>, with_console: bool) -> Result<InstallerSettings> {
    let settings = InstallerSettings::load(settings_file)?;
    let app_root = utils::path_resolver::resolve_app_root(&settings.app_root)?;
    let log_dir = utils::path_resolver::resolve_log_folder(settings.log_dir.as_deref(), &app_root)?;
    if let Err(e) = init_logging(&log_dir, with_console) {
        eprintln!("Failed to initialize logging: {}", e);
    }
    info!(
        "[PHASE: initialization] Installer starting at {}",
        chrono::Utc::now()
    );
    Ok(settings)
}

fn block_on<F: std::future::Future<Output = Result<i32>>>(what: &str, fut: F) -> Result<i32> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .with_context(|| format!("Failed to create async runtime for {}", what))?
        .block_on(fut)
}

/// Checklist wrapped for machine consumers.
pub fn checklist_report(checklist: Checklist) -> ApiResponse<Checklist> {
    if checklist.all_passed() {
        return ApiResponse::ok_with_message(checklist, "All requirements are met.");
    }
    let failed = checklist.failed_labels().join(", ");
    ApiResponse::fail_with_data(checklist, format!("Requirements not met: {}", failed))
}

async fn check_environment(installer: &Installer, json: bool) -> Result<i32> {
    let checklist = installer.checker.check_environment().await;
    let code = if checklist.all_passed() { 0 } else { 1 };
    if json {
        let report = checklist_report(checklist);
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to encode checklist")?
        );
        return Ok(code);
    }
    for item in &checklist.items {
        let mark = if item.passed { "PASS" } else { "FAIL" };
        match &item.detail {
            Some(d) => println!("[{}] {} ({})", mark, item.label, d),
            None => println!("[{}] {}", mark, item.label),
        }
    }
    Ok(code)
}

/// `--check`: print the environment checklist (`json` wraps it in an `ApiResponse`).
/// Exit code 0 when every item passed.
pub fn run_check(settings_file: Option<&Path>, json: bool) -> i32 {
    let result = load_and_init(settings_file, !json)
        .and_then(Installer::build)
        .and_then(|installer| block_on("environment check", check_environment(&installer, json)));
    result.unwrap_or_else(|e| {
        error!("[PHASE: preflight] [STEP: check] Check failed: {:#}", e);
        eprintln!("Installer error: {:#}", e);
        1
    })
}

async fn drive_steps(
    installer: &Installer,
    answers: &WizardAnswers,
    attempt: AttemptId,
    force: bool,
) -> Result<i32> {
    let controller = &installer.controller;
    let attempt = controller.enter(Some(&attempt), force).await?.id;
    info!(
        "[PHASE: wizard] [STEP: unattended] Driving attempt {} (force={})",
        attempt, force
    );

    for n in 1..=STEP_COUNT {
        let def = step_catalogue::step(n).ok_or(error::WizardError::UnknownStep(n))?;
        let form = answers.fields_for(def.kind)?;
        match controller.submit(Some(&attempt), n, &form, force).await? {
            SubmitOutcome::Advanced { .. } => {}
            SubmitOutcome::Rejected {
                step,
                error,
                checklist,
                ..
            } => {
                eprintln!("Step {} ({}) rejected: {}", step, def.title, error);
                if let Some(checklist) = checklist {
                    for label in checklist.failed_labels() {
                        eprintln!("  - {}", label);
                    }
                }
                eprintln!("Attempt id for a later resume: {}", attempt);
                return Ok(1);
            }
            SubmitOutcome::Finalized { result, .. } => {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&result)
                        .context("Failed to encode finalization result")?
                );
                for warning in result.warnings() {
                    eprintln!("warning: {}", warning);
                }
                return Ok(match result.summary() {
                    FinalizationSummary::Failed => {
                        if let Some(reason) = result.failure_reason() {
                            eprintln!("Installation failed: {}", reason);
                        }
                        1
                    }
                    _ => 0,
                });
            }
        }
    }
    Ok(1)
}

/// `--answers <file>`: drive steps 1..N from a TOML answers file and print the
/// FinalizationResult as JSON. Exit code 0 on success, 1 on failure.
pub fn run_unattended(
    settings_file: Option<&Path>,
    answers_file: &Path,
    force: bool,
    attempt: Option<&str>,
) -> i32 {
    let result = (|| -> Result<i32> {
        let settings = load_and_init(settings_file, true)?;
        let text = std::fs::read_to_string(answers_file)
            .with_context(|| format!("Failed to read answers file {:?}", answers_file))?;
        let answers = WizardAnswers::from_toml_str(&text)?;
        let attempt = match attempt {
            Some(raw) => AttemptId::parse(raw).map_err(anyhow::Error::msg)?,
            None => AttemptId::generate(),
        };
        let installer = Installer::build(settings)?;
        block_on(
            "unattended install",
            drive_steps(&installer, &answers, attempt, force),
        )
    })();

    result.unwrap_or_else(|e| {
        error!("[PHASE: wizard] [STEP: unattended] Run failed: {:#}", e);
        eprintln!("Installer error: {:#}", e);
        1
    })
}
