//! Command-line surface of the `mintage` binary.

use clap::{Parser, Subcommand};

use mintage_domain::config::{Config, ConfigSeverity};

/// Mintage — a persistent-identifier management service.
#[derive(Debug, Parser)]
#[command(name = "mintage", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the service (default when no subcommand is given).
    Serve,
    /// Mint a fresh identifier under a registered prefix.
    Mint {
        /// Qualified prefix, e.g. `ark:/13030/fk4` or `urn:uuid:`.
        prefix: String,
        /// Target URL (defaults to the service resolver).
        #[arg(long)]
        target: Option<String>,
        #[arg(long, default_value = "admin")]
        user: String,
        #[arg(long)]
        group: Option<String>,
    },
    /// Create a specific identifier.
    Create {
        /// Qualified identifier, e.g. `doi:10.5060/FOO`.
        id: String,
        #[arg(long)]
        target: Option<String>,
        #[arg(long, default_value = "admin")]
        user: String,
        #[arg(long)]
        group: Option<String>,
    },
    /// Fetch an identifier's metadata.
    Get {
        id: String,
    },
    /// Set metadata elements: `mintage set <id> NAME VALUE [NAME VALUE]...`
    Set {
        id: String,
        /// Alternating element names and values.
        #[arg(required = true)]
        elements: Vec<String>,
        #[arg(long, default_value = "admin")]
        user: String,
        #[arg(long)]
        group: Option<String>,
    },
    /// Delete an identifier.
    Delete {
        id: String,
        #[arg(long, default_value = "admin")]
        user: String,
        #[arg(long)]
        group: Option<String>,
    },
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Run diagnostic checks against the current configuration.
    Doctor,
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

// ── Config loading helper ─────────────────────────────────────────────

/// Load the configuration from the path in `MINTAGE_CONFIG` (default
/// `config.toml`). Returns the parsed [`Config`] and the path used.
pub fn load_config() -> anyhow::Result<(Config, String)> {
    let config_path = std::env::var("MINTAGE_CONFIG").unwrap_or_else(|_| "config.toml".into());

    let config = if std::path::Path::new(&config_path).exists() {
        let raw = std::fs::read_to_string(&config_path)
            .map_err(|e| anyhow::anyhow!("reading {config_path}: {e}"))?;
        toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {config_path}: {e}"))?
    } else {
        Config::default()
    };

    Ok((config, config_path))
}

/// Print validation results. Returns `false` when any error was found.
pub fn validate(config: &Config, config_path: &str) -> bool {
    let issues = config.validate();
    if issues.is_empty() {
        println!("{config_path}: configuration OK");
        return true;
    }
    for issue in &issues {
        println!("{issue}");
    }
    !issues
        .iter()
        .any(|i| i.severity == ConfigSeverity::Error)
}

/// Dump the resolved configuration as TOML.
pub fn show(config: &Config) {
    match toml::to_string_pretty(config) {
        Ok(s) => println!("{s}"),
        Err(e) => eprintln!("failed to serialize configuration: {e}"),
    }
}

// ── Doctor ────────────────────────────────────────────────────────────

/// Diagnostic checks: configuration, state directory, shoulders, registrar
/// and mail credentials. Returns `false` when any check fails.
pub fn doctor(config: &Config, config_path: &str) -> bool {
    let mut passed = true;
    let mut check = |name: &str, ok: bool, detail: String| {
        println!("{} {name}: {detail}", if ok { "ok  " } else { "FAIL" });
        passed &= ok;
    };

    let issues = config.validate();
    let errors = issues
        .iter()
        .filter(|i| i.severity == ConfigSeverity::Error)
        .count();
    check(
        "config",
        errors == 0,
        format!("{config_path} ({} issue(s))", issues.len()),
    );

    let state_ok = std::fs::create_dir_all(&config.bind_noid).is_ok();
    check(
        "state directory",
        state_ok,
        config.bind_noid.display().to_string(),
    );

    for (key, shoulder) in &config.prefixes {
        let has_minter = !shoulder.minter.is_empty() || shoulder.prefix == "urn:uuid:";
        check(
            &format!("shoulder {key}"),
            has_minter,
            if has_minter {
                shoulder.prefix.clone()
            } else {
                format!("{} has no minter", shoulder.prefix)
            },
        );
    }

    if config.registrar.enabled {
        check(
            "registrar credentials",
            !config.registrar.username.is_empty() && !config.registrar.password.is_empty(),
            config.registrar.real_server.clone(),
        );
    }
    if config.mail.enabled {
        check(
            "mail from address",
            config
                .mail
                .from_address
                .parse::<lettre::message::Mailbox>()
                .is_ok(),
            config.mail.from_address.clone(),
        );
    }

    passed
}
