//! Handle Check CLI Application
//!
//! A command-line interface that checks which web services have an account for
//! a given username. This CLI is a thin driver around the handle-check-lib library:
//! it resolves configuration, runs one report per identifier and prints it.

use clap::builder::styling::{AnsiColor, Effects, Styles};
use clap::Parser;
use futures_util::StreamExt;
use handle_check_lib::{load_env_config, ConfigManager, FileConfig};
use handle_check_lib::{
    parse_timeout_string, AccountChecker, AggregateReport, AnonMode, ProbeConfig, ProxyPool,
    Registry, ServiceReport, Verdict,
};
use std::process;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const STYLES: Styles = Styles::styled()
    .header(AnsiColor::Yellow.on_default().effects(Effects::BOLD))
    .usage(AnsiColor::Yellow.on_default().effects(Effects::BOLD))
    .literal(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .placeholder(AnsiColor::Cyan.on_default());

/// CLI arguments for handle-check
#[derive(Parser, Debug)]
#[command(name = "handle-check")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Check which web services have an account for a username")]
#[command(
    long_about = "Probe every service in a registry for a username and report where the account exists.\n\nSupports custom registries, proxy lists with retries, and routing through Tor."
)]
#[command(styles = STYLES)]
pub struct Args {
    /// Usernames to check
    #[arg(value_name = "USERNAMES", help_heading = "Targets")]
    pub identifiers: Vec<String>,

    /// Registry file or http(s) URL (defaults to the embedded registry)
    #[arg(long = "registry", value_name = "FILE|URL", help_heading = "Targets")]
    pub registry: Option<String>,

    /// Only check the named service (repeatable)
    #[arg(long = "site", value_name = "NAME", action = clap::ArgAction::Append, help_heading = "Targets")]
    pub sites: Vec<String>,

    /// Send every probe through this proxy (e.g. socks5://127.0.0.1:1080)
    #[arg(long = "proxy", value_name = "URL", help_heading = "Network")]
    pub proxy: Option<String>,

    /// File with proxies to rotate through on proxy failures
    #[arg(long = "proxy-list", value_name = "FILE", help_heading = "Network")]
    pub proxy_list: Option<String>,

    /// Route every probe through Tor
    #[arg(long = "tor", help_heading = "Network")]
    pub tor: bool,

    /// Route every probe through Tor with a new identity after each probe (slow)
    #[arg(long = "unique-tor", help_heading = "Network")]
    pub unique_tor: bool,

    /// Retries after a proxy failure (default: 3)
    #[arg(long = "retries", value_name = "N", help_heading = "Network")]
    pub retries: Option<u32>,

    /// Timeout per request, e.g. "10s" or "1m" (default: 10s)
    #[arg(long = "timeout", value_name = "DURATION", help_heading = "Network")]
    pub timeout: Option<String>,

    /// Max concurrent probes (default: 20, max: 500)
    #[arg(short = 'c', long = "concurrency", value_name = "N", help_heading = "Network")]
    pub concurrency: Option<usize>,

    /// Output results in JSON format
    #[arg(short = 'j', long = "json", help_heading = "Output")]
    pub json: bool,

    /// Only print services where the account exists
    #[arg(long = "print-found", help_heading = "Output")]
    pub print_found: bool,

    /// Use a specific config file instead of automatic discovery
    #[arg(long = "config", value_name = "FILE", help_heading = "Configuration")]
    pub config: Option<String>,

    /// Show configuration and progress details
    #[arg(short = 'v', long = "verbose", help_heading = "Debugging")]
    pub verbose: bool,

    /// Show per-probe debug logs
    #[arg(short = 'd', long = "debug", help_heading = "Debugging")]
    pub debug: bool,
}

/// Everything a run needs after config files, environment and flags are merged.
#[derive(Debug, Clone, Default)]
struct RunSettings {
    /// Registry file or URL, `None` for the embedded registry
    registry: Option<String>,
    /// Proxy list file, loaded into the pool once everything is merged
    proxy_list: Option<String>,
    probe: ProbeConfig,
}

impl RunSettings {
    /// Apply one configuration layer's choice of route.
    ///
    /// Tor and proxies are exclusive, so a layer that picks one replaces
    /// whichever route a lower layer picked. A layer that names both is left
    /// for `ProbeConfig::validate` to reject.
    fn apply_route(
        &mut self,
        mode: Option<AnonMode>,
        proxy: Option<String>,
        proxy_list: Option<String>,
    ) {
        let picks_proxy = proxy.is_some() || proxy_list.is_some();
        let picks_tor = matches!(mode, Some(m) if m != AnonMode::Off);

        if picks_proxy {
            self.probe.proxy = proxy;
            self.proxy_list = proxy_list;
            if !picks_tor {
                self.probe.anon_mode = AnonMode::Off;
            }
        }
        if let Some(mode) = mode {
            self.probe.anon_mode = mode;
            if picks_tor && !picks_proxy {
                self.probe.proxy = None;
                self.proxy_list = None;
            }
        }
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    init_logging(&args);

    if let Err(e) = validate_args(&args) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }

    if let Err(e) = run_handle_check(args).await {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

/// Install the tracing subscriber. Logs go to stderr so stdout stays parseable.
///
/// `RUST_LOG` wins over the verbosity flags.
fn init_logging(args: &Args) {
    let level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else {
        "warn"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Validate command line arguments for logical consistency
fn validate_args(args: &Args) -> Result<(), String> {
    if args.identifiers.is_empty() {
        return Err("You must specify at least one username".to_string());
    }

    if args.proxy.is_some() && args.proxy_list.is_some() {
        return Err("Cannot specify both --proxy and --proxy-list".to_string());
    }

    if args.tor && args.unique_tor {
        return Err("Cannot specify both --tor and --unique-tor".to_string());
    }

    if (args.tor || args.unique_tor) && (args.proxy.is_some() || args.proxy_list.is_some()) {
        return Err("Tor and proxies cannot be used together".to_string());
    }

    if let Some(concurrency) = args.concurrency {
        if concurrency == 0 || concurrency > 500 {
            return Err("Concurrency must be between 1 and 500".to_string());
        }
    }

    if let Some(timeout) = &args.timeout {
        if parse_timeout_string(timeout).is_none() {
            return Err(format!(
                "Invalid timeout '{}'. Use a format like '5s', '30s' or '2m'",
                timeout
            ));
        }
    }

    Ok(())
}

/// Main handle checking logic
async fn run_handle_check(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let settings = build_settings(&args)?;
    let probe = finalize_probe_config(&settings)?;

    let registry = match &settings.registry {
        Some(source) => {
            tracing::info!(source = %source, "loading registry");
            Registry::load_source(source).await?
        }
        None => Registry::builtin()?,
    };
    let registry = if args.sites.is_empty() {
        registry
    } else {
        registry.select(&args.sites)?
    };

    tracing::info!(
        services = registry.len(),
        concurrency = probe.concurrency,
        timeout_secs = probe.timeout.as_secs(),
        retries = probe.max_retries,
        proxies = probe.proxy_pool.len(),
        anon_mode = %probe.anon_mode,
        "starting run"
    );

    let checker = AccountChecker::with_config(registry, probe)?;

    if args.json {
        let reports = checker.check_identifiers(&args.identifiers).await?;
        let json = match reports.as_slice() {
            [single] => serde_json::to_string_pretty(single)?,
            many => serde_json::to_string_pretty(many)?,
        };
        println!("{}", json);
        return Ok(());
    }

    let mut stream = checker.check_identifiers_stream(&args.identifiers);
    while let Some(report) = stream.next().await {
        print_report(&report?, args.print_found);
    }

    Ok(())
}

/// Build run settings with proper precedence.
///
/// Configuration precedence (highest to lowest):
/// 1. CLI arguments (explicit user input)
/// 2. Environment variables (HC_*)
/// 3. Local config file (./handle-check.toml)
/// 4. Global config file (~/.handle-check.toml)
/// 5. XDG config file (~/.config/handle-check/config.toml)
/// 6. Built-in defaults
fn build_settings(args: &Args) -> Result<RunSettings, Box<dyn std::error::Error>> {
    let mut settings = RunSettings::default();
    let config_manager = ConfigManager::new(args.verbose);

    // Step 1: Determine config file path and load config files
    if let Some(explicit_config_path) = &args.config {
        tracing::info!(path = %explicit_config_path, "using config file from --config");
        let file_config = config_manager
            .load_file(explicit_config_path)
            .map_err(|e| {
                format!(
                    "Failed to load config file '{}': {}",
                    explicit_config_path, e
                )
            })?;
        settings = merge_file_config(settings, file_config)?;
    } else if let Ok(env_config_path) = std::env::var("HC_CONFIG") {
        tracing::info!(path = %env_config_path, "using config file from HC_CONFIG");
        let file_config = config_manager
            .load_file(&env_config_path)
            .map_err(|e| format!("Failed to load config file '{}': {}", env_config_path, e))?;
        settings = merge_file_config(settings, file_config)?;
    } else {
        match config_manager.discover_and_load() {
            Ok(file_config) => {
                settings = merge_file_config(settings, file_config)?;
            }
            Err(e) => {
                tracing::info!(error = %e, "config discovery skipped");
            }
        }
    }

    // Step 2: Apply environment variables (HC_*)
    settings = apply_environment_config(settings, args.verbose);

    // Step 3: Apply CLI arguments (highest precedence)
    settings = apply_cli_args(settings, args);

    Ok(settings)
}

/// Merge a loaded config file into the run settings.
fn merge_file_config(
    mut settings: RunSettings,
    file_config: FileConfig,
) -> Result<RunSettings, Box<dyn std::error::Error>> {
    if let Some(defaults) = file_config.defaults {
        if let Some(concurrency) = defaults.concurrency {
            settings.probe.concurrency = concurrency;
        }
        if let Some(timeout) = defaults.timeout.as_deref().and_then(parse_timeout_string) {
            settings.probe.timeout = Duration::from_secs(timeout);
        }
        if let Some(retries) = defaults.retries {
            settings.probe.max_retries = retries;
        }
        if let Some(mode) = defaults.tor_mode {
            settings.probe.anon_mode = mode.parse()?;
        }
        if let Some(user_agent) = defaults.user_agent {
            settings.probe.user_agent = user_agent;
        }
        settings.registry = defaults.registry.or(settings.registry);
        settings.probe.proxy = defaults.proxy.or(settings.probe.proxy);
        settings.proxy_list = defaults.proxy_list.or(settings.proxy_list);
    }

    if let Some(tor) = file_config.tor {
        settings.probe.tor = tor.apply(settings.probe.tor);
    }

    Ok(settings)
}

/// Apply HC_* environment variables over the file settings.
///
/// Uses the library's load_env_config() for validation and proper handling.
fn apply_environment_config(mut settings: RunSettings, verbose: bool) -> RunSettings {
    let env_config = load_env_config(verbose);

    if let Some(concurrency) = env_config.concurrency {
        settings.probe.concurrency = concurrency;
    }
    if let Some(timeout) = env_config.timeout.as_deref().and_then(parse_timeout_string) {
        settings.probe.timeout = Duration::from_secs(timeout);
    }
    if let Some(retries) = env_config.retries {
        settings.probe.max_retries = retries;
    }

    settings.apply_route(
        env_config.tor_mode,
        env_config.proxy,
        env_config.proxy_list,
    );
    settings.registry = env_config.registry.or(settings.registry);

    settings
}

/// Apply CLI arguments to the settings (highest precedence).
fn apply_cli_args(mut settings: RunSettings, args: &Args) -> RunSettings {
    if let Some(concurrency) = args.concurrency {
        settings.probe.concurrency = concurrency;
    }
    if let Some(timeout) = args.timeout.as_deref().and_then(parse_timeout_string) {
        settings.probe.timeout = Duration::from_secs(timeout);
    }
    if let Some(retries) = args.retries {
        settings.probe.max_retries = retries;
    }

    let mode = if args.unique_tor {
        Some(AnonMode::RotatePerProbe)
    } else if args.tor {
        Some(AnonMode::Shared)
    } else {
        None
    };
    settings.apply_route(mode, args.proxy.clone(), args.proxy_list.clone());

    if args.registry.is_some() {
        settings.registry = args.registry.clone();
    }

    settings
}

/// Load the proxy list and produce the final, validated probe configuration.
fn finalize_probe_config(settings: &RunSettings) -> Result<ProbeConfig, Box<dyn std::error::Error>> {
    let mut probe = settings.probe.clone();
    if let Some(path) = &settings.proxy_list {
        let pool = ProxyPool::from_file(path)?;
        if pool.is_empty() {
            return Err(format!("Proxy list '{}' contains no proxies", path).into());
        }
        tracing::info!(path = %path, proxies = pool.len(), "loaded proxy list");
        probe = probe.with_proxy_pool(pool);
    }
    probe.validate()?;
    Ok(probe)
}

/// Print one report in the plain line format.
fn print_report(report: &AggregateReport, print_found: bool) {
    println!("[*] Checking username {} on:", report.identifier());
    for (name, entry) in report.iter() {
        if let Some(line) = format_entry(name, entry, print_found) {
            println!("{}", line);
        }
    }
    println!("Total Websites : {}", report.total_exists());
}

/// Render one service line, or `None` when it is filtered out.
fn format_entry(name: &str, entry: &ServiceReport, print_found: bool) -> Option<String> {
    match entry.verdict {
        Verdict::Exists => Some(format!("[+] {}: {}", name, entry.url_user)),
        _ if print_found => None,
        Verdict::NotExists => Some(format!("[-] {}: Not Found!", name)),
        Verdict::Illegal => Some(format!(
            "[-] {}: Illegal Username Format For This Site!",
            name
        )),
        Verdict::Indeterminate => Some(format!(
            "[?] {}: {}",
            name,
            entry.error.as_deref().unwrap_or("Unknown response")
        )),
    }
}
