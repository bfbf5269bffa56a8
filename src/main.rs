use std::path::Path;
use std::process::ExitCode;

use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use thiserror::Error;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use ctap_conformance::notify::{self, DiscordWebhook, Notification, NotificationKind};
use ctap_conformance::{Config, ConfigError};

const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
const VERSION: &str = env!("CARGO_PKG_VERSION");

const CONFIG_ARG: &str = "config";
const VID_ARG: &str = "vid";
const PID_ARG: &str = "pid";
const TIMEOUT_ARG: &str = "timeout_ms";
const ROUNDS_ARG: &str = "rounds";
const STRICT_ARG: &str = "strict";

const WEBHOOK_URL_ARG: &str = "webhook_url";
const KIND_ARG: &str = "kind";
const RELEASE_VERSION_ARG: &str = "release_version";
const CHANGELOG_ARG: &str = "changelog";
const DOWNLOAD_URL_ARG: &str = "download_url";
const COMMIT_ARG: &str = "commit";
const ERROR_LOG_ARG: &str = "error_log";
const PRODUCT_ARG: &str = "product";

#[derive(Debug, Error)]
enum Error {
    #[error("{0}")]
    Config(#[from] ConfigError),

    #[error("Invalid {name} {value:?}, expected a 16-bit hex value")]
    HexId { name: &'static str, value: String },

    #[error("{0}")]
    UnknownNotificationKind(#[from] notify::UnknownNotificationKind),

    #[error("{0}")]
    Delivery(#[from] notify::DeliveryError),

    #[error("No HID backend is available on this platform")]
    #[cfg_attr(target_os = "linux", allow(dead_code))]
    Unsupported,
}

fn cli() -> Command {
    Command::new("ctap-conformance")
        .version(VERSION)
        .about(DESCRIPTION)
        .subcommand_required(true)
        .subcommand(
            Command::new("test")
                .about("Run the CTAP1/CTAP2 conformance stages against a connected authenticator")
                .arg(Arg::new(CONFIG_ARG)
                    .short('c')
                    .long("config")
                    .num_args(1)
                    .value_parser(clap::builder::NonEmptyStringValueParser::new())
                    .help("JSON configuration file"))
                .arg(Arg::new(VID_ARG)
                    .long("vid")
                    .num_args(1)
                    .help("Vendor id to select, in hex (default cafe)"))
                .arg(Arg::new(PID_ARG)
                    .long("pid")
                    .num_args(1)
                    .help("Product id to select, in hex (default 4000)"))
                .arg(Arg::new(TIMEOUT_ARG)
                    .long("timeout-ms")
                    .num_args(1)
                    .value_parser(value_parser!(u64).range(1..))
                    .help("Per-transaction transport timeout in milliseconds"))
                .arg(Arg::new(ROUNDS_ARG)
                    .long("rounds")
                    .num_args(1)
                    .value_parser(value_parser!(u32).range(1..))
                    .help("Number of Authenticate calls against the registered key handle"))
                .arg(Arg::new(STRICT_ARG)
                    .long("strict")
                    .action(ArgAction::SetTrue)
                    .help("Exit non-zero when any stage fails")),
        )
        .subcommand(
            Command::new("notify")
                .about("Post a release or build failure notification to a webhook")
                .arg(Arg::new(WEBHOOK_URL_ARG)
                    .long("webhook-url")
                    .env("DISCORD_WEBHOOK_URL")
                    .num_args(1))
                .arg(Arg::new(KIND_ARG)
                    .long("type")
                    .env("NOTIFICATION_TYPE")
                    .num_args(1)
                    .default_value("release"))
                .arg(Arg::new(RELEASE_VERSION_ARG)
                    .long("release-version")
                    .env("VERSION")
                    .num_args(1)
                    .default_value("unknown"))
                .arg(Arg::new(CHANGELOG_ARG)
                    .long("changelog")
                    .env("CHANGELOG")
                    .num_args(1)
                    .default_value(""))
                .arg(Arg::new(DOWNLOAD_URL_ARG)
                    .long("download-url")
                    .env("DOWNLOAD_URL")
                    .num_args(1)
                    .default_value(""))
                .arg(Arg::new(COMMIT_ARG)
                    .long("commit")
                    .env("COMMIT_SHA")
                    .num_args(1)
                    .default_value("unknown"))
                .arg(Arg::new(ERROR_LOG_ARG)
                    .long("error-log")
                    .env("ERROR_LOG")
                    .num_args(1)
                    .default_value(""))
                .arg(Arg::new(PRODUCT_ARG)
                    .long("product")
                    .env("PRODUCT_NAME")
                    .num_args(1)
                    .default_value("Security Token")),
        )
}

fn main() -> ExitCode {
    let args = match cli().try_get_matches() {
        Ok(args) => args,
        Err(err) => {
            let _ = err.print();
            return if err.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let result = match args.subcommand() {
        Some(("test", args)) => run_test(args),
        Some(("notify", args)) => run_notify(args),
        _ => Ok(1),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(ref err) => {
            error!(error = %err, "Error encountered, exiting");
            ExitCode::FAILURE
        }
    }
}

fn parse_hex_id(name: &'static str, value: &str) -> Result<u16, Error> {
    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value);
    u16::from_str_radix(digits, 16).map_err(|_| Error::HexId {
        name,
        value: String::from(value),
    })
}

fn load_config(args: &ArgMatches) -> Result<Config, Error> {
    let mut config = match args.get_one::<String>(CONFIG_ARG) {
        Some(path) => Config::load(Path::new(path))?,
        None => Config::default(),
    };
    if let Some(vid) = args.get_one::<String>(VID_ARG) {
        config.vendor_id = parse_hex_id("vendor id", vid)?;
    }
    if let Some(pid) = args.get_one::<String>(PID_ARG) {
        config.product_id = parse_hex_id("product id", pid)?;
    }
    if let Some(timeout_ms) = args.get_one::<u64>(TIMEOUT_ARG) {
        config.transaction_timeout_ms = *timeout_ms;
    }
    if let Some(rounds) = args.get_one::<u32>(ROUNDS_ARG) {
        config.authentication_rounds = *rounds;
    }
    config.validate()?;
    Ok(config)
}

#[cfg(target_os = "linux")]
fn run_test(args: &ArgMatches) -> Result<u8, Error> {
    use ctap_conformance::hid::HidTransport;
    use ctap_conformance::Harness;

    let config = load_config(args)?;
    info!(version = VERSION, "Starting conformance session");

    let transport = HidTransport::new(config.transaction_timeout(), config.exchange_ceiling());
    let report = Harness::new(&transport, &config).run();
    println!("{}", report);

    Ok(report.exit_code(args.get_flag(STRICT_ARG)))
}

#[cfg(not(target_os = "linux"))]
fn run_test(args: &ArgMatches) -> Result<u8, Error> {
    load_config(args)?;
    Err(Error::Unsupported)
}

fn run_notify(args: &ArgMatches) -> Result<u8, Error> {
    let value = |name: &str| args.get_one::<String>(name).cloned().unwrap_or_default();

    let url = match args.get_one::<String>(WEBHOOK_URL_ARG) {
        Some(url) if !url.is_empty() => url.clone(),
        _ => {
            warn!("DISCORD_WEBHOOK_URL not set, skipping notification");
            return Ok(0);
        }
    };

    let notification = match value(KIND_ARG).parse::<NotificationKind>()? {
        NotificationKind::Release => Notification::Release {
            version: value(RELEASE_VERSION_ARG),
            changelog: value(CHANGELOG_ARG),
            download_url: value(DOWNLOAD_URL_ARG),
            commit: value(COMMIT_ARG),
        },
        NotificationKind::BuildFailure => Notification::BuildFailure {
            version: value(RELEASE_VERSION_ARG),
            error_log: value(ERROR_LOG_ARG),
        },
    };

    let webhook = DiscordWebhook::new(url)?;
    notify::send(&webhook, &notification, &value(PRODUCT_ARG))?;
    Ok(0)
}
