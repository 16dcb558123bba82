use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use colored::Colorize;
use log::{debug, info, warn};

use azml_core::config::{self, Config, DEFAULT_CONFIG_FILE};
use azml_core::differ::create_plan;
use azml_core::effect::Effect;
use azml_core::interpreter::{EffectOutcome, Interpreter};
use azml_core::plan::Plan;
use azml_core::provider::Provider;
use azml_core::resource::{Resource, ResourceId, State, Value};
use azml_core::schema::ResourceSchema;
use azml_provider_azureml::resources;
use azml_provider_azureml::{AzureMlProvider, ProviderConfig};
use azml_state::{
    BackendConfig, LocalBackend, LockInfo, ResourceState, StateBackend, StateFile,
    create_backend,
};

mod display;

use display::{print_plan, print_schema};

#[derive(Parser)]
#[command(name = "azml")]
#[command(about = "Manage Azure Machine Learning resources from a JSON configuration", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the configuration file
    Validate {
        #[arg(default_value = DEFAULT_CONFIG_FILE)]
        file: PathBuf,
    },
    /// Show execution plan without applying changes
    Plan {
        #[arg(default_value = DEFAULT_CONFIG_FILE)]
        file: PathBuf,
    },
    /// Apply changes to reach the desired state
    Apply {
        #[arg(default_value = DEFAULT_CONFIG_FILE)]
        file: PathBuf,
    },
    /// Destroy every resource tracked in state
    Destroy {
        #[arg(default_value = DEFAULT_CONFIG_FILE)]
        file: PathBuf,

        /// Skip confirmation prompt (auto-approve)
        #[arg(long)]
        auto_approve: bool,
    },
    /// Bring an existing Azure object under management
    Import {
        /// Name of the resource in the configuration
        name: String,
        /// ARM resource ID of the existing object
        arm_id: String,
        #[arg(long, short, default_value = DEFAULT_CONFIG_FILE)]
        file: PathBuf,
    },
    /// Show the schema of one resource type, or list all types
    Schema { resource_type: Option<String> },
    /// Remove a state lock left behind by an interrupted run
    ForceUnlock {
        lock_id: String,
        #[arg(long, short, default_value = DEFAULT_CONFIG_FILE)]
        file: PathBuf,
    },
    /// Generate shell completions
    Completions { shell: Shell },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Validate { file } => run_validate(&file),
        Commands::Plan { file } => run_plan(&file).await,
        Commands::Apply { file } => run_apply(&file).await,
        Commands::Destroy { file, auto_approve } => run_destroy(&file, auto_approve).await,
        Commands::Import { name, arm_id, file } => run_import(&file, &name, &arm_id).await,
        Commands::Schema { resource_type } => run_schema(resource_type.as_deref()),
        Commands::ForceUnlock { lock_id, file } => run_force_unlock(&file, &lock_id).await,
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "azml", &mut std::io::stdout());
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

// =============================================================================
// Setup
// =============================================================================

fn get_schemas() -> HashMap<String, ResourceSchema> {
    resources::handlers()
        .into_iter()
        .map(|h| (h.resource_type().to_string(), h.schema()))
        .collect()
}

fn load(file: &Path) -> Result<Config, String> {
    config::load_config(file).map_err(|e| e.to_string())
}

fn build_provider(config: &Config) -> Result<AzureMlProvider, String> {
    let settings = ProviderConfig::from_json(&config.provider)
        .map_err(|e| e.to_string())?
        .with_process_env();
    AzureMlProvider::from_config(&settings).map_err(|e| e.to_string())
}

async fn open_backend(config: &Config) -> Result<Box<dyn StateBackend>, String> {
    let backend_config = config
        .backend
        .as_ref()
        .map(BackendConfig::from)
        .unwrap_or_else(|| BackendConfig::local(LocalBackend::DEFAULT_STATE_FILE));
    create_backend(&backend_config)
        .await
        .map_err(|e| format!("Failed to open state backend: {}", e))
}

/// Read the state file, or start a new one
async fn read_state(backend: &dyn StateBackend) -> Result<StateFile, String> {
    Ok(backend
        .read_state()
        .await
        .map_err(|e| format!("Failed to read state: {}", e))?
        .unwrap_or_default())
}

async fn write_state(backend: &dyn StateBackend, state: &mut StateFile) -> Result<(), String> {
    state.increment_serial();
    backend
        .write_state(state)
        .await
        .map_err(|e| format!("Failed to write state: {}", e))
}

/// Run `body` while holding the state lock; the lock is released even on failure
async fn with_lock<T, F, Fut>(
    backend: &dyn StateBackend,
    operation: &str,
    body: F,
) -> Result<T, String>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<T, String>>,
{
    let lock: LockInfo = backend
        .acquire_lock(operation)
        .await
        .map_err(|e| format!("Failed to acquire state lock: {}", e))?;
    debug!("Holding lock {}", lock.id);

    let result = body().await;

    if let Err(e) = backend.release_lock(&lock).await {
        warn!("Failed to release state lock {}: {}", lock.id, e);
        if result.is_ok() {
            return Err(format!(
                "Failed to release state lock: {} (run `azml force-unlock {}`)",
                e, lock.id
            ));
        }
    }
    result
}

// =============================================================================
// Validation
// =============================================================================

fn validate_resources(desired: &[Resource]) -> Result<(), String> {
    let mut all_errors = Vec::new();

    for resource in desired {
        let Some(handler) = resources::handler(&resource.id.resource_type) else {
            all_errors.push(format!("{}: unknown resource type", resource.id));
            continue;
        };
        if let Err(errors) = handler.schema().validate(&resource.attributes) {
            for error in errors {
                all_errors.push(format!("{}: {}", resource.id, error));
            }
        }
        if let Err(e) = handler.validate(&resource.attributes) {
            all_errors.push(format!("{}: {}", resource.id, e.message));
        }
    }

    if all_errors.is_empty() {
        Ok(())
    } else {
        Err(all_errors.join("\n"))
    }
}

fn run_validate(file: &Path) -> Result<(), String> {
    let config = load(file)?;

    println!("{}", "Validating...".cyan());

    validate_resources(&config.resources)?;

    println!(
        "{}",
        format!(
            "✓ {} resources validated successfully.",
            config.resources.len()
        )
        .green()
        .bold()
    );

    for resource in &config.resources {
        println!("  • {}", resource.id);
    }

    Ok(())
}

// =============================================================================
// Refresh and reference resolution
// =============================================================================

/// Re-read every tracked resource
///
/// Attributes ARM never returns are carried over from the stored state.
async fn refresh_states(
    provider: &AzureMlProvider,
    state_file: &StateFile,
    schemas: &HashMap<String, ResourceSchema>,
) -> Result<HashMap<ResourceId, State>, String> {
    let mut states = HashMap::new();
    for (id, prior) in state_file.states() {
        let mut state = provider
            .read(&id, prior.identifier.as_deref())
            .await
            .map_err(|e| format!("Failed to refresh {}: {}", id, e))?;
        if state.exists {
            if let Some(schema) = schemas.get(&id.resource_type) {
                state.preserve_from(&prior.attributes, &schema.write_only_attributes());
            }
            states.insert(id, state);
        } else {
            info!("{} was deleted outside of azml", id);
        }
    }
    Ok(states)
}

/// Value of `${binding.attribute}` from known states
///
/// `id` resolves to the ARM ID of the referenced resource.
fn lookup_reference(
    config: &Config,
    states: &HashMap<ResourceId, State>,
    binding: &str,
    attribute: &str,
) -> Option<Value> {
    let resource = config.resource(binding)?;
    if let Some(state) = states.get(&resource.id) {
        if attribute == "id" {
            return state.identifier.clone().map(Value::String);
        }
        if let Some(value) = state.attributes.get(attribute) {
            return Some(value.clone());
        }
    }
    resource
        .attributes
        .get(attribute)
        .filter(|v| !matches!(v, Value::ResourceRef(..)))
        .cloned()
}

fn resolve_resources(config: &Config, states: &HashMap<ResourceId, State>) -> Vec<Resource> {
    let lookup = |binding: &str, attr: &str| lookup_reference(config, states, binding, attr);
    config
        .resources
        .iter()
        .map(|r| config::resolve_resource(r, &lookup))
        .collect()
}

/// Resolve the desired side of an effect against the latest states
fn resolve_effect(
    effect: &Effect,
    config: &Config,
    states: &HashMap<ResourceId, State>,
) -> Result<Effect, String> {
    let lookup = |binding: &str, attr: &str| lookup_reference(config, states, binding, attr);
    let resolve = |r: &Resource| -> Result<Resource, String> {
        let resolved = config::resolve_resource(r, &lookup);
        if config::has_references(&resolved) {
            let pending: Vec<String> = config::dependencies(&resolved).into_iter().collect();
            return Err(format!(
                "{} still refers to unknown values of {}",
                r.id,
                pending.join(", ")
            ));
        }
        Ok(resolved)
    };

    Ok(match effect {
        Effect::Create(r) => Effect::Create(resolve(r)?),
        Effect::Update {
            id,
            from,
            to,
            changed_attributes,
        } => Effect::Update {
            id: id.clone(),
            from: from.clone(),
            to: resolve(to)?,
            changed_attributes: changed_attributes.clone(),
        },
        Effect::Replace {
            id,
            from,
            to,
            changed_attributes,
        } => Effect::Replace {
            id: id.clone(),
            from: from.clone(),
            to: resolve(to)?,
            changed_attributes: changed_attributes.clone(),
        },
        other => other.clone(),
    })
}

fn build_plan(
    config: &Config,
    states: &HashMap<ResourceId, State>,
    schemas: &HashMap<String, ResourceSchema>,
) -> Plan {
    let resources = resolve_resources(config, states);
    create_plan(&resources, states, schemas)
}

// =============================================================================
// Commands
// =============================================================================

async fn run_plan(file: &Path) -> Result<(), String> {
    let config = load(file)?;
    validate_resources(&config.resources)?;

    let schemas = get_schemas();
    let provider = build_provider(&config)?;
    let backend = open_backend(&config).await?;
    let state_file = read_state(backend.as_ref()).await?;

    let states = refresh_states(&provider, &state_file, &schemas).await?;
    let plan = build_plan(&config, &states, &schemas);
    print_plan(&plan, &schemas);
    Ok(())
}

async fn run_apply(file: &Path) -> Result<(), String> {
    let config = load(file)?;
    validate_resources(&config.resources)?;

    let schemas = get_schemas();
    let provider = build_provider(&config)?;
    let backend = open_backend(&config).await?;

    with_lock(backend.as_ref(), "apply", || {
        apply(&config, provider, backend.as_ref(), &schemas)
    })
    .await
}

async fn apply(
    config: &Config,
    provider: AzureMlProvider,
    backend: &dyn StateBackend,
    schemas: &HashMap<String, ResourceSchema>,
) -> Result<(), String> {
    let mut state_file = read_state(backend).await?;
    let mut states = refresh_states(&provider, &state_file, schemas).await?;
    forget_missing(&mut state_file, &states);

    let plan = build_plan(config, &states, schemas);
    if plan.is_empty() {
        write_state(backend, &mut state_file).await?;
        println!("{}", "No changes needed.".green());
        return Ok(());
    }

    print_plan(&plan, schemas);
    println!();
    println!("{}", "Applying changes...".cyan().bold());
    println!();

    let interpreter = Interpreter::new(provider);
    let mut success_count = 0;
    let mut failure: Option<String> = None;

    for effect in plan.effects() {
        let effect = match resolve_effect(effect, config, &states) {
            Ok(effect) => effect,
            Err(e) => {
                println!("  {} {} - {}", "✗".red(), effect, e);
                failure = Some(e);
                break;
            }
        };

        // Delete then create, so state never points at the deleted object
        let steps = match &effect {
            Effect::Replace { id, from, to, .. } => {
                let mut steps = Vec::new();
                if let Some(identifier) = &from.identifier {
                    steps.push(Effect::Delete {
                        id: id.clone(),
                        identifier: identifier.clone(),
                    });
                }
                steps.push(Effect::Create(to.clone()));
                steps
            }
            _ => vec![effect.clone()],
        };

        for step in &steps {
            match interpreter.execute(step).await {
                Ok(outcome) => {
                    let provider = interpreter.provider().name();
                    record_outcome(&mut state_file, &mut states, step, &outcome, provider);
                    write_state(backend, &mut state_file).await?;
                }
                Err(e) => {
                    println!("  {} {} - {}", "✗".red(), step, e);
                    failure = Some(e.to_string());
                    break;
                }
            }
        }
        if failure.is_some() {
            break;
        }
        println!("  {} {}", "✓".green(), effect);
        success_count += 1;
    }

    println!();
    match failure {
        None => {
            println!(
                "{}",
                format!("Apply complete! {} changes applied.", success_count)
                    .green()
                    .bold()
            );
            Ok(())
        }
        Some(e) => {
            println!(
                "{}",
                format!("Apply failed after {} successful changes.", success_count)
                    .red()
                    .bold()
            );
            Err(e)
        }
    }
}

/// Drop state entries whose remote object no longer exists
fn forget_missing(state_file: &mut StateFile, states: &HashMap<ResourceId, State>) {
    state_file
        .resources
        .retain(|r| states.contains_key(&r.resource_id()));
}

fn record_outcome(
    state_file: &mut StateFile,
    states: &mut HashMap<ResourceId, State>,
    effect: &Effect,
    outcome: &EffectOutcome,
    provider: &str,
) {
    let id = effect.resource_id();
    match outcome.state() {
        Some(state) => {
            state_file.upsert_resource(ResourceState::from_state(state, provider));
            states.insert(id.clone(), state.clone());
        }
        None => {
            state_file.remove_resource(&id.resource_type, &id.name);
            states.remove(id);
        }
    }
}

/// Order tracked resources for deletion: dependents before their dependencies
fn destroy_order(config: &Config, states: &HashMap<ResourceId, State>) -> Vec<ResourceId> {
    let mut order: Vec<ResourceId> = Vec::new();
    let mut seen: HashSet<ResourceId> = HashSet::new();

    // Untracked by configuration: no known dependencies, delete first
    let mut orphans: Vec<&ResourceId> = states
        .keys()
        .filter(|id| config.resource(&id.name).is_none_or(|r| r.id != **id))
        .collect();
    orphans.sort();
    for id in orphans {
        seen.insert(id.clone());
        order.push(id.clone());
    }

    for resource in config.resources.iter().rev() {
        if states.contains_key(&resource.id) && seen.insert(resource.id.clone()) {
            order.push(resource.id.clone());
        }
    }
    order
}

async fn run_destroy(file: &Path, auto_approve: bool) -> Result<(), String> {
    let config = load(file)?;
    let schemas = get_schemas();
    let provider = build_provider(&config)?;
    let backend = open_backend(&config).await?;

    with_lock(backend.as_ref(), "destroy", || {
        destroy(&config, provider, backend.as_ref(), &schemas, auto_approve)
    })
    .await
}

async fn destroy(
    config: &Config,
    provider: AzureMlProvider,
    backend: &dyn StateBackend,
    schemas: &HashMap<String, ResourceSchema>,
    auto_approve: bool,
) -> Result<(), String> {
    let mut state_file = read_state(backend).await?;
    let mut states = refresh_states(&provider, &state_file, schemas).await?;
    forget_missing(&mut state_file, &states);

    let to_destroy = destroy_order(config, &states);
    if to_destroy.is_empty() {
        write_state(backend, &mut state_file).await?;
        println!("{}", "No resources to destroy.".green());
        return Ok(());
    }

    println!("{}", "Destroy Plan:".red().bold());
    println!();
    for id in &to_destroy {
        println!("  {} {}", "-".red().bold(), id);
    }
    println!();
    println!("Plan: {} to destroy.", to_destroy.len().to_string().red());
    println!();

    if !auto_approve && !confirm()? {
        println!();
        println!("{}", "Destroy cancelled.".yellow());
        return Ok(());
    }

    println!("{}", "Destroying resources...".red().bold());
    println!();

    let interpreter = Interpreter::new(provider);
    let mut success_count = 0;
    for id in to_destroy {
        let Some(identifier) = states.get(&id).and_then(|s| s.identifier.clone()) else {
            continue;
        };
        let effect = Effect::Delete { id, identifier };
        match interpreter.execute(&effect).await {
            Ok(outcome) => {
                let provider = interpreter.provider().name();
                record_outcome(&mut state_file, &mut states, &effect, &outcome, provider);
                write_state(backend, &mut state_file).await?;
                println!("  {} {}", "✓".green(), effect);
                success_count += 1;
            }
            Err(e) => {
                println!("  {} {} - {}", "✗".red(), effect, e);
                println!();
                println!(
                    "{}",
                    format!("Destroy failed after {} resources.", success_count)
                        .red()
                        .bold()
                );
                return Err(e.to_string());
            }
        }
    }

    println!();
    println!(
        "{}",
        format!("Destroy complete! {} resources destroyed.", success_count)
            .green()
            .bold()
    );
    Ok(())
}

fn confirm() -> Result<bool, String> {
    println!(
        "{}",
        "Do you really want to destroy all resources?"
            .yellow()
            .bold()
    );
    println!(
        "  {}",
        "This action cannot be undone. Type 'yes' to confirm.".yellow()
    );
    print!("\n  Enter a value: ");
    std::io::Write::flush(&mut std::io::stdout()).map_err(|e| e.to_string())?;

    let mut input = String::new();
    std::io::stdin()
        .read_line(&mut input)
        .map_err(|e| e.to_string())?;
    Ok(input.trim() == "yes")
}

async fn run_import(file: &Path, name: &str, arm_id: &str) -> Result<(), String> {
    let config = load(file)?;
    let resource = config
        .resource(name)
        .ok_or_else(|| format!("No resource named '{}' in {}", name, file.display()))?;
    let id = resource.id.clone();

    let provider = build_provider(&config)?;
    let backend = open_backend(&config).await?;

    with_lock(backend.as_ref(), "import", || async {
        let mut state_file = read_state(backend.as_ref()).await?;
        if let Some(existing) = state_file.find_resource(&id.resource_type, &id.name) {
            return Err(format!(
                "{} is already managed (ID {})",
                id,
                existing.identifier.as_deref().unwrap_or("unknown")
            ));
        }

        let states = state_file.states();
        let lookup = |binding: &str, attr: &str| lookup_reference(&config, &states, binding, attr);
        let resolved = config::resolve_resource(resource, &lookup);

        let state = provider
            .import_resource(&id, arm_id, &resolved.attributes)
            .await
            .map_err(|e| e.to_string())?;
        state_file.upsert_resource(ResourceState::from_state(&state, provider.name()));
        write_state(backend.as_ref(), &mut state_file).await?;

        println!("{} {} imported from {}", "✓".green(), id, arm_id);
        Ok(())
    })
    .await
}

fn run_schema(resource_type: Option<&str>) -> Result<(), String> {
    match resource_type {
        Some(resource_type) => {
            let handler = resources::handler(resource_type)
                .ok_or_else(|| format!("Unknown resource type: {}", resource_type))?;
            print_schema(&handler.schema());
        }
        None => {
            for handler in resources::handlers() {
                let schema = handler.schema();
                println!(
                    "  {} {}",
                    handler.resource_type().cyan(),
                    schema.description.as_deref().unwrap_or_default().dimmed()
                );
            }
        }
    }
    Ok(())
}

async fn run_force_unlock(file: &Path, lock_id: &str) -> Result<(), String> {
    let config = load(file)?;
    let backend = open_backend(&config).await?;
    backend
        .force_unlock(lock_id)
        .await
        .map_err(|e| format!("Failed to unlock: {}", e))?;
    println!("{}", format!("Lock {} released.", lock_id).green());
    Ok(())
}
