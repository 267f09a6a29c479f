use clap::Parser;
use tracing_subscriber::EnvFilter;

use mintage_domain::config::{Config, ConfigSeverity};
use mintage_domain::metadata::ElementMap;
use mintage_gateway::cli::{self, Cli, Command, ConfigCommand};
use mintage_gateway::state::AppState;
use mintage_gateway::status::spawn_status_reporter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        // Default to serve when no subcommand is given.
        None | Some(Command::Serve) => {
            init_tracing(true);
            let (config, config_path) = cli::load_config()?;
            run_server(config, config_path).await
        }
        Some(Command::Mint {
            prefix,
            target,
            user,
            group,
        }) => {
            run_operation(|state| async move {
                let caller = state.directory.caller(&user, group.as_deref())?;
                Ok(state
                    .coordinator
                    .mint_identifier(&caller, &prefix, target.as_deref())
                    .await)
            })
            .await
        }
        Some(Command::Create {
            id,
            target,
            user,
            group,
        }) => {
            run_operation(|state| async move {
                let caller = state.directory.caller(&user, group.as_deref())?;
                Ok(state
                    .coordinator
                    .create_identifier(&caller, &id, target.as_deref())
                    .await)
            })
            .await
        }
        Some(Command::Get { id }) => {
            run_operation(|state| async move { Ok(state.coordinator.get_metadata(&id).await) })
                .await
        }
        Some(Command::Set {
            id,
            elements,
            user,
            group,
        }) => {
            let map = pair_elements(&elements)?;
            run_operation(|state| async move {
                let caller = state.directory.caller(&user, group.as_deref())?;
                Ok(state
                    .coordinator
                    .set_metadata(&caller, &id, &map, true)
                    .await)
            })
            .await
        }
        Some(Command::Delete { id, user, group }) => {
            run_operation(|state| async move {
                let caller = state.directory.caller(&user, group.as_deref())?;
                Ok(state.coordinator.delete_identifier(&caller, &id).await)
            })
            .await
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            let (config, config_path) = cli::load_config()?;
            if !cli::validate(&config, &config_path) {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            let (config, _config_path) = cli::load_config()?;
            cli::show(&config);
            Ok(())
        }
        Some(Command::Doctor) => {
            let (config, config_path) = cli::load_config()?;
            if !cli::doctor(&config, &config_path) {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Version) => {
            println!("mintage {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Structured tracing: JSON for the server, terse for one-shot commands.
fn init_tracing(json: bool) {
    let builder = tracing_subscriber::fmt().with_env_filter(
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(if json { "info" } else { "warn" })),
    );
    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

/// Run one coordinator operation offline and print the client-observable
/// response string.
async fn run_operation<F, Fut>(op: F) -> anyhow::Result<()>
where
    F: FnOnce(AppState) -> Fut,
    Fut: std::future::Future<
        Output = mintage_domain::Result<mintage_gateway::coordinator::Outcome>,
    >,
{
    init_tracing(false);
    let (config, _config_path) = cli::load_config()?;
    let state = AppState::build(config)?;
    let outcome = match op(state).await {
        Ok(outcome) => outcome,
        Err(e) if e.is_bad_request() => {
            mintage_gateway::coordinator::Outcome::BadRequest(e.to_string())
        }
        Err(e) => return Err(e.into()),
    };
    println!("{}", outcome.render());
    if !outcome.is_success() {
        std::process::exit(1);
    }
    Ok(())
}

/// Pair up `NAME VALUE` arguments into an element map.
fn pair_elements(args: &[String]) -> anyhow::Result<ElementMap> {
    if args.len() % 2 != 0 {
        anyhow::bail!("elements must be NAME VALUE pairs (got {} arguments)", args.len());
    }
    let mut map = ElementMap::new();
    for pair in args.chunks(2) {
        map.insert(pair[0].clone(), pair[1].clone());
    }
    Ok(map)
}

/// Start the service: registration daemon, status reporter, SIGHUP-driven
/// configuration reload.
async fn run_server(config: Config, config_path: String) -> anyhow::Result<()> {
    tracing::info!(config = %config_path, "mintage starting");

    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    let state = AppState::build(config)?;
    state.spawn_registration_daemon()?;
    let interval = state.config.read().status_reporting_interval;
    spawn_status_reporter(
        interval,
        state.locks.clone(),
        state.binder.clone(),
        state.queue.clone(),
        state.datacite.clone(),
    );
    let identifiers = state.binder.count().await.unwrap_or(0);
    tracing::info!(identifiers, "mintage ready");

    wait_for_shutdown(&state).await
}

#[cfg(unix)]
async fn wait_for_shutdown(state: &AppState) -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = signal(SignalKind::hangup())?;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down");
                return Ok(());
            }
            _ = hangup.recv() => {
                match cli::load_config() {
                    Ok((new_config, path)) => {
                        tracing::info!(config = %path, "SIGHUP: reloading configuration");
                        if let Err(e) = state.reload(new_config) {
                            tracing::error!(error = %e, "reload failed; previous snapshot kept");
                        }
                    }
                    Err(e) => tracing::error!(error = %e, "reload failed; previous snapshot kept"),
                }
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown(_state: &AppState) -> anyhow::Result<()> {
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    Ok(())
}
