//! quotabar - Track quota and usage of AI coding tools

use chrono::Local;
use clap::Parser;
use quotabar::{
    ManagerEvent, ManagerService, QuotabarError, Result, UsageManager,
    cli::{AddArgs, Cli, Command, ConfigArgs, SecretCommand},
    config_store::{
        self, ConfigStore, JsonFilePreferences, NOTIFY_ON_RESTORE_KEY, SHOW_REMAINING_KEY,
    },
    manager::ManagerState,
    registry::{ProviderContext, ProviderRegistry},
    sorting::{self, SortMode},
};
use quotabar_core::config::ProviderConfigMap;
use quotabar_core::detection::SystemProbe;
use quotabar_core::secrets::{FileSecretStore, SecretStore};
use quotabar_provider_codex::WorkspaceCache;
use quotabar_terminal::{OutputFormatter, StatusEntry, TypeEntry, get_formatter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const SECRETS_FILE: &str = "secrets.json";
const PREFERENCES_FILE: &str = "preferences.json";
const WORKSPACES_FILE: &str = "codex-workspaces.json";

fn open_store(dir: &Path) -> ConfigStore {
    ConfigStore::new(Arc::new(JsonFilePreferences::new(dir.join(PREFERENCES_FILE))))
}

/// Build and start a manager over the on-disk configuration
fn open_manager(dir: &Path) -> Result<UsageManager> {
    let secrets: Arc<dyn SecretStore> = Arc::new(FileSecretStore::new(dir.join(SECRETS_FILE)));
    let workspaces = Arc::new(WorkspaceCache::load(dir.join(WORKSPACES_FILE)));
    let context = ProviderContext::new(secrets).with_workspace_cache(workspaces);

    let mut manager = UsageManager::new(ProviderRegistry::builtin(), context, open_store(dir));
    manager.detect_and_start(&SystemProbe::new())?;
    Ok(manager)
}

fn status_entries<'a>(state: &'a ManagerState, mode: SortMode) -> Vec<StatusEntry<'a>> {
    sorting::sorted_instances(&state.instances, &state.snapshots, mode)
        .into_iter()
        .map(|config| StatusEntry {
            config,
            snapshot: state.snapshot(&config.id),
            error: state.error(&config.id),
            loading: state.is_loading(&config.id),
        })
        .collect()
}

fn print_status(formatter: &dyn OutputFormatter, state: &ManagerState, mode: SortMode) {
    println!("{}", formatter.format_status(&status_entries(state, mode)));
}

/// Run a fetch returned by a mutation and merge its result
async fn run_fetch(manager: &mut UsageManager, job: Option<quotabar::FetchJob>) {
    if let Some(job) = job {
        let (id, result) = job.run().await;
        manager.apply_outcome(id, result);
    }
}

async fn watch(manager: UsageManager, formatter: &dyn OutputFormatter, json: bool) -> Result<()> {
    let notify_on_restore = manager.store().notify_on_restore();
    let interval = manager.store().poll_interval();
    let (service, handle) = ManagerService::new(manager);
    let mut events = handle.subscribe();
    let task = tokio::spawn(service.run());
    let clear_screen = !json && is_terminal::is_terminal(std::io::stdout());

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(ManagerEvent::CycleCompleted(_)) => {
                    let state = handle.state().await?;
                    if clear_screen {
                        print!("\x1B[2J\x1B[1;1H"); // Clear screen and move cursor to top-left
                    }
                    if !json {
                        println!(
                            "quotabar - Last updated: {}",
                            Local::now().format("%Y-%m-%d %H:%M:%S")
                        );
                        println!(
                            "Poll interval: {}s | Press Ctrl+C to exit",
                            interval.as_secs()
                        );
                    }
                    print_status(formatter, &state, state.sort_mode);
                }
                Ok(ManagerEvent::TokensRestored { id }) if notify_on_restore => {
                    let state = handle.state().await?;
                    let label = state
                        .instances
                        .iter()
                        .find(|c| c.id == id.as_str())
                        .map_or(id.as_str(), |c| c.label.as_str());
                    println!("{label} is available again");
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Missed {} manager events", skipped);
                }
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                if !json {
                    println!("\nExiting watch mode...");
                }
                break;
            }
        }
    }

    handle.shutdown().await?;
    task.await
        .map_err(|e| QuotabarError::Io(std::io::Error::other(format!("manager task failed: {e}"))))?;
    Ok(())
}

async fn add(manager: &mut UsageManager, args: AddArgs) -> Result<()> {
    let descriptor = manager
        .registry()
        .get(&args.type_id)
        .ok_or_else(|| QuotabarError::UnknownProviderType(args.type_id.clone()))?;
    for (key, _) in &args.values {
        if descriptor.field(key).is_none() {
            return Err(QuotabarError::InvalidArgument(format!(
                "{} has no setting named {}",
                args.type_id, key
            )));
        }
    }
    if let Some(missing) = descriptor
        .config_fields
        .iter()
        .find(|f| f.required && !f.is_secret() && !args.values.iter().any(|(k, _)| k == f.key))
    {
        return Err(QuotabarError::InvalidArgument(format!(
            "{} requires --set {}=...",
            args.type_id, missing.key
        )));
    }
    let secret_fields: Vec<&'static str> = descriptor
        .config_fields
        .iter()
        .filter(|f| f.is_secret())
        .map(|f| f.key)
        .collect();

    let values: ProviderConfigMap = args.values.into_iter().collect();
    let (id, job) = manager.add_instance(&args.type_id, args.label.as_deref(), values)?;
    println!("Added {id}");
    if let Some(config) = manager.config(id.as_str()) {
        for key in secret_fields {
            println!(
                "Store its secret with: quotabar secret set {}",
                config.secret_reference(key)
            );
        }
    }
    run_fetch(manager, job).await;
    Ok(())
}

fn configure(store: &ConfigStore, args: ConfigArgs, json: bool) -> Result<()> {
    if let Some(secs) = args.interval {
        store.set_poll_interval(Duration::from_secs(secs))?;
    }
    if let Some(mode) = args.sort {
        store.set_sort_mode(mode)?;
    }
    if let Some(show) = args.show_remaining {
        store.set_flag(SHOW_REMAINING_KEY, show)?;
    }
    if let Some(notify) = args.notify_on_restore {
        store.set_flag(NOTIFY_ON_RESTORE_KEY, notify)?;
    }

    if json {
        let mut prefs = serde_json::Map::new();
        prefs.insert(
            config_store::POLL_INTERVAL_KEY.into(),
            store.poll_interval().as_secs().into(),
        );
        prefs.insert(
            config_store::SORT_MODE_KEY.into(),
            store.sort_mode().as_str().into(),
        );
        prefs.insert(
            config_store::SHOW_PERCENTAGE_KEY.into(),
            store.show_percentage().into(),
        );
        prefs.insert(SHOW_REMAINING_KEY.into(), store.show_remaining().into());
        prefs.insert(NOTIFY_ON_RESTORE_KEY.into(), store.notify_on_restore().into());
        println!("{}", serde_json::to_string_pretty(&prefs)?);
    } else {
        println!("Poll interval:      {}s", store.poll_interval().as_secs());
        println!("Sort mode:          {}", store.sort_mode());
        println!("Show remaining:     {}", store.show_remaining());
        println!("Notify on restore:  {}", store.notify_on_restore());
    }
    Ok(())
}

fn secret(dir: &Path, command: SecretCommand) -> Result<()> {
    let store = FileSecretStore::new(dir.join(SECRETS_FILE));
    match command {
        SecretCommand::Set { key, value } => {
            let value = match value {
                Some(v) => v,
                None => {
                    let mut line = String::new();
                    std::io::stdin().read_line(&mut line)?;
                    line.trim_end_matches(['\r', '\n']).to_string()
                }
            };
            if value.is_empty() {
                return Err(QuotabarError::InvalidArgument("empty secret".to_string()));
            }
            store.save(&key, &value)?;
            println!("Stored {key}");
        }
        SecretCommand::Delete { key } => {
            store.delete(&key)?;
            println!("Deleted {key}");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging. The --verbose flag overrides RUST_LOG.
    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::new("quotabar=info")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("quotabar=warn"))
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let dir: PathBuf = config_store::config_dir()
        .ok_or_else(|| QuotabarError::Config("cannot determine config directory".to_string()))?;
    info!("Using config directory {}", dir.display());

    let show_remaining = cli.remaining || open_store(&dir).show_remaining();
    let formatter = get_formatter(cli.json, show_remaining);

    match cli.command.unwrap_or(Command::Status { sort: None }) {
        Command::Status { sort } => {
            let mut manager = open_manager(&dir)?;
            manager.poll_cycle().await;
            let state = manager.state();
            print_status(formatter.as_ref(), &state, sort.unwrap_or(state.sort_mode));
        }
        Command::Watch => {
            let manager = open_manager(&dir)?;
            watch(manager, formatter.as_ref(), cli.json).await?;
        }
        Command::Types => {
            let manager = open_manager(&dir)?;
            let types: Vec<TypeEntry> = manager
                .registry()
                .iter()
                .map(|d| TypeEntry {
                    type_id: d.type_id.to_string(),
                    name: d.name.to_string(),
                    category: d.category.to_string(),
                    multiple_instances: d.supports_multiple_instances,
                    detected: manager.detected().contains(d.type_id),
                    config_keys: d.config_fields.iter().map(|f| f.key.to_string()).collect(),
                })
                .collect();
            println!("{}", formatter.format_types(&types));
        }
        Command::Instances => {
            let manager = open_manager(&dir)?;
            println!("{}", formatter.format_instances(manager.configs()));
        }
        Command::Add(args) => {
            let mut manager = open_manager(&dir)?;
            add(&mut manager, args).await?;
            print_status(formatter.as_ref(), &manager.state(), SortMode::Manual);
        }
        Command::Remove { id } => {
            let mut manager = open_manager(&dir)?;
            if manager.config(&id).is_none() {
                return Err(QuotabarError::InstanceNotFound(id));
            }
            manager.remove_instance(&id)?;
            println!("Removed {id}");
        }
        Command::Enable { id } => {
            let mut manager = open_manager(&dir)?;
            let job = manager.set_enabled(&id, true)?;
            run_fetch(&mut manager, job).await;
            println!("Enabled {id}");
        }
        Command::Disable { id } => {
            let mut manager = open_manager(&dir)?;
            manager.set_enabled(&id, false)?;
            println!("Disabled {id}");
        }
        Command::Reorder { ids } => {
            let mut manager = open_manager(&dir)?;
            manager.reorder_instances(&ids)?;
            println!("{}", formatter.format_instances(manager.configs()));
        }
        Command::Config(args) => {
            configure(&open_store(&dir), args, cli.json)?;
        }
        Command::Secret(command) => {
            secret(&dir, command)?;
        }
    }

    Ok(())
}
