use std::path::PathBuf;

const USAGE: &str = "Usage:
  installer-core --check [--json] [--config <installer.toml>]
  installer-core --answers <answers.toml> [--force] [--attempt <id>] [--config <installer.toml>]";

/// Value following `flag`, if the flag is present. `Err` when the value is missing.
fn flag_value(args: &[String], flag: &str) -> Result<Option<PathBuf>, String> {
    match args.iter().position(|a| a == flag) {
        None => Ok(None),
        Some(i) => match args.get(i + 1).filter(|v| !v.starts_with("--")) {
            Some(v) => Ok(Some(PathBuf::from(v))),
            None => Err(format!("{} requires a value", flag)),
        },
    }
}

fn usage_error(message: &str) -> ! {
    eprintln!("{}\n\n{}", message, USAGE);
    std::process::exit(2);
}

fn main() {
    let args: Vec<String> = std::env::args().collect();

    let config = flag_value(&args, "--config").unwrap_or_else(|e| usage_error(&e));

    // Environment checklist only. Exits 0 when every item passed.
    if args.iter().any(|a| a == "--check") {
        let json = args.iter().any(|a| a == "--json");
        std::process::exit(installer_core::run_check(config.as_deref(), json));
    }

    // Unattended install from an answers file. Prints the finalization result as JSON.
    let answers = flag_value(&args, "--answers").unwrap_or_else(|e| usage_error(&e));
    if let Some(answers) = answers {
        let force = args.iter().any(|a| a == "--force");
        let attempt = flag_value(&args, "--attempt")
            .unwrap_or_else(|e| usage_error(&e))
            .map(|p| p.to_string_lossy().to_string());
        std::process::exit(installer_core::run_unattended(
            config.as_deref(),
            &answers,
            force,
            attempt.as_deref(),
        ));
    }

    usage_error("No mode selected.");
}
