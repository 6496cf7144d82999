use clap::Parser;
use serde_json::Value;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use funasr_compat::settings::default_settings_path;
use funasr_compat::{
    load_settings, save_settings, ClientSettings, ProbeGate, ProbeLevel, ServerProber,
    ServerType, WsConnector,
};

/// Exit code when the server could not be reached
const EXIT_UNREACHABLE: u8 = 2;

fn parse_level(value: &str) -> Result<ProbeLevel, String> {
    ProbeLevel::from_name(value)
        .ok_or_else(|| format!("unknown level '{}' (connect, offline, 2pass)", value))
}

#[derive(Parser, Debug)]
#[command(
    name = "funasr-probe",
    about = "Probe a FunASR-style ASR server for supported recognition modes"
)]
struct CliArgs {
    /// Settings file (defaults to the user config directory)
    #[arg(long)]
    settings: Option<PathBuf>,

    #[arg(long)]
    host: Option<String>,

    #[arg(long)]
    port: Option<u16>,

    /// Connect with wss://
    #[arg(long)]
    tls: bool,

    /// connect, offline or 2pass
    #[arg(long, value_parser = parse_level)]
    level: Option<ProbeLevel>,

    /// Outer timeout for the whole probe
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Store the inferred server type in the settings file
    #[arg(long)]
    save: bool,
}

fn resolve_settings(args: &CliArgs) -> (Option<PathBuf>, ClientSettings) {
    let path = match &args.settings {
        Some(path) => Some(path.clone()),
        None => match default_settings_path() {
            Ok(path) => Some(path),
            Err(e) => {
                log::warn!("Settings: {}", e);
                None
            }
        },
    };

    let mut settings = path.as_deref().map(load_settings).unwrap_or_default();
    settings.apply_env_overrides();

    if let Some(host) = &args.host {
        settings.host = host.clone();
    }
    if let Some(port) = args.port {
        settings.port = port;
    }
    if args.tls {
        settings.use_tls = true;
    }
    if let Some(level) = args.level {
        settings.probe_level = level;
    }
    if let Some(timeout_ms) = args.timeout_ms {
        settings.probe_timeout_ms = timeout_ms;
    }

    (path, settings)
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file if present (for development convenience)
    let _ = dotenvy::dotenv();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .format_target(false)
        .init();

    let args = CliArgs::parse();
    let (path, mut settings) = resolve_settings(&args);

    let endpoint = settings.endpoint();
    let timeout = settings.probe_timeout();
    log::info!("funasr-probe: probing {}", endpoint);

    let gate = ProbeGate::new();
    let ticket = gate.issue();
    let mut prober = ServerProber::new(endpoint, Arc::new(WsConnector::new()))
        .with_server_type(settings.server_type);

    let caps = prober
        .probe_with_cancel(settings.probe_level, timeout, ticket.cancellation())
        .await;
    let reachable = caps.reachable;
    let inferred = caps.server_type;

    if !gate.apply(ticket.token(), caps) {
        log::error!("funasr-probe: probe result was superseded");
        return ExitCode::FAILURE;
    }
    let Some(caps) = gate.current() else {
        return ExitCode::FAILURE;
    };

    match serde_json::to_string_pretty(&Value::Object(caps.to_dict())) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            log::error!("funasr-probe: failed to serialize report: {}", e);
            return ExitCode::FAILURE;
        }
    }

    if args.save && inferred != ServerType::Auto {
        settings.server_type = inferred;
        match path {
            Some(path) => match save_settings(&path, &settings) {
                Ok(()) => log::info!("funasr-probe: saved server type to {:?}", path),
                Err(e) => log::error!("funasr-probe: {}", e),
            },
            None => log::error!("funasr-probe: no settings path to save to"),
        }
    }

    if reachable {
        ExitCode::SUCCESS
    } else {
        if let Some(error) = &caps.error {
            log::error!("funasr-probe: {}", error);
        }
        ExitCode::from(EXIT_UNREACHABLE)
    }
}
