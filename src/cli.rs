use crate::classifier::{Observation, WindowEvent};
use crate::config::loader::{GuardConfig, StorageSettings};
use crate::config::types::GuardError;
use crate::config::validator::validate_config;
use crate::ledger::SessionKey;
use crate::observability::{audit, metrics};
use crate::service::IntegrityService;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (defaults to ./examguard.json when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every probe and report the environment classification
    CheckEnv {
        /// Subject to charge with an environment violation
        #[arg(long)]
        subject: Option<String>,
        /// Session for the violation (defaults to SYSTEM_CHECK)
        #[arg(long)]
        session: Option<String>,
    },
    /// Pre-exam gate: stop at the first positive probe (exit code 1 when compromised)
    Verdict,
    /// Pre-session room scan of one camera frame
    Scan {
        #[arg(long)]
        subject: String,
        #[arg(long)]
        test_id: String,
        /// Image file to scan
        #[arg(long)]
        image: PathBuf,
    },
    /// Classify and score one live observation
    Observe {
        #[arg(long)]
        subject: String,
        #[arg(long)]
        session: String,
        /// Camera frame
        #[arg(long)]
        image: Option<PathBuf>,
        /// Microphone level
        #[arg(long)]
        audio: Option<f64>,
        /// Window focus transition
        #[arg(long, value_enum)]
        window: Option<WindowArg>,
    },
    /// Log a window focus loss
    WindowEvent {
        #[arg(long)]
        subject: String,
        #[arg(long)]
        test_id: String,
    },
    /// Per-category counts and score of one session
    Stats {
        #[arg(long)]
        subject: String,
        #[arg(long)]
        test_id: String,
    },
    /// Check the configuration and print errors and warnings
    ValidateConfig {
        /// Fail on the first set of errors
        #[arg(long)]
        strict: bool,
    },
    /// Run a diagnostic pass and print process metrics (Prometheus text)
    Metrics,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum WindowArg {
    Lost,
    Gained,
}

impl From<WindowArg> for WindowEvent {
    fn from(arg: WindowArg) -> Self {
        match arg {
            WindowArg::Lost => WindowEvent::FocusLost,
            WindowArg::Gained => WindowEvent::FocusGained,
        }
    }
}

#[cfg(unix)]
extern "C" fn signal_handler(sig: i32) {
    // only async-signal-safe calls here
    let msg = b"examguard: signal received, exiting\n";
    unsafe {
        libc::write(2, msg.as_ptr() as *const libc::c_void, msg.len());
        libc::_exit(128 + sig);
    }
}

#[cfg(unix)]
fn setup_signal_handlers() {
    unsafe {
        libc::signal(libc::SIGTERM, signal_handler as usize);
        libc::signal(libc::SIGINT, signal_handler as usize);
    }
}

#[cfg(not(unix))]
fn setup_signal_handlers() {}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn read_image(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("reading image {}", path.display()))
}

pub fn run() -> Result<()> {
    setup_signal_handlers();
    env_logger::init();

    match dispatch(Cli::parse()) {
        Ok(()) => Ok(()),
        Err(err) => match err.downcast_ref::<GuardError>() {
            Some(guard) => {
                eprintln!("Error: {}", guard);
                std::process::exit(guard.exit_code());
            }
            None => Err(err),
        },
    }
}

/// Run one command line given as `args` (program name first). Errors are
/// returned rather than turned into exit codes.
pub fn run_from<I, T>(args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    dispatch(Cli::try_parse_from(args)?)
}

/// Command line defaults layered over the loaded configuration
fn apply_cli_defaults(config: &mut GuardConfig) {
    if config.storage.event_log.is_none() {
        config.storage.event_log = Some(StorageSettings::default_event_log());
    }
}

fn dispatch(cli: Cli) -> Result<()> {
    let mut config = GuardConfig::load(cli.config.as_deref())?;
    apply_cli_defaults(&mut config);

    if let Commands::ValidateConfig { strict } = cli.command {
        return validate(&config, strict);
    }

    audit::init_audit_logger(config.audit.path.clone())?;
    let validation = validate_config(&config, true)?;
    for warning in &validation.warnings {
        log::warn!("config: {}", warning);
        audit::events::configuration_warning(warning);
    }

    let service = IntegrityService::from_config(&config)?;
    execute(&service, cli.command)
}

fn validate(config: &GuardConfig, strict: bool) -> Result<()> {
    let result = validate_config(config, strict)?;
    for error in &result.errors {
        eprintln!("error: {}", error);
    }
    for warning in &result.warnings {
        eprintln!("warning: {}", warning);
    }
    if result.is_valid() {
        eprintln!("Configuration is valid");
        Ok(())
    } else {
        // EX_CONFIG
        std::process::exit(78);
    }
}

fn execute(service: &IntegrityService, command: Commands) -> Result<()> {
    match command {
        Commands::CheckEnv { subject, session } => {
            let check = service.check_environment(subject.as_deref(), session.as_deref());
            print_json(&check)
        }
        Commands::Verdict => {
            let verdict = service.gate();
            print_json(&verdict)?;
            if verdict.compromised {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Scan {
            subject,
            test_id,
            image,
        } => {
            let frame = read_image(&image)?;
            let verdict = service.pre_session_scan(&subject, &test_id, &frame)?;
            print_json(&verdict)
        }
        Commands::Observe {
            subject,
            session,
            image,
            audio,
            window,
        } => {
            let mut observation = Observation::new(&SessionKey::new(subject, session));
            if let Some(path) = image {
                observation = observation.with_image(read_image(&path)?);
            }
            if let Some(level) = audio {
                observation = observation.with_audio_level(level);
            }
            if let Some(window) = window {
                observation = observation.with_window_event(window.into());
            }
            let response = service.observe(&observation)?;
            print_json(&response)
        }
        Commands::WindowEvent { subject, test_id } => {
            print_json(&service.window_event(&subject, &test_id)?)
        }
        Commands::Stats { subject, test_id } => {
            print_json(&service.session_stats(&subject, &test_id)?)
        }
        Commands::Metrics => {
            service.coordinator().diagnostic_report();
            print!("{}", metrics::get_metrics().export_prometheus());
            Ok(())
        }
        Commands::ValidateConfig { strict } => validate(service.config(), strict),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults_to_file_store() {
        let mut config = GuardConfig::default();
        apply_cli_defaults(&mut config);
        assert_eq!(
            config.storage.event_log,
            Some(StorageSettings::default_event_log())
        );
    }

    #[test]
    fn test_cli_keeps_configured_event_log() {
        let mut config = GuardConfig::default();
        config.storage.event_log = Some(PathBuf::from("/var/lib/examguard/events.jsonl"));
        apply_cli_defaults(&mut config);
        assert_eq!(
            config.storage.event_log,
            Some(PathBuf::from("/var/lib/examguard/events.jsonl"))
        );
    }

    #[test]
    fn test_window_argument_parsing() {
        let cli = Cli::try_parse_from([
            "examguard",
            "observe",
            "--subject",
            "alice",
            "--session",
            "T-1",
            "--window",
            "lost",
        ])
        .unwrap();
        match cli.command {
            Commands::Observe { window, .. } => {
                assert_eq!(window.map(WindowEvent::from), Some(WindowEvent::FocusLost))
            }
            _ => panic!("expected observe"),
        }
    }
}
