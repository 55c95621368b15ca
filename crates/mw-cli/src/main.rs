use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use mw_core::{EnvError, ObservationKind, SuiteFamily, TaskInfo};
use mw_runtime::{ClientConfig, EnvClient, McpServersConfig, ToolCatalog, ToolDescriptor};
use mw_tasks::{info, DeviceController, LocalController, TaskLoadError, TaskRegistry};
use serde_json::{json, Value};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mw", version, about = "Mobile-world evaluation harness CLI")]
struct Cli {
    /// Emit one JSON document on stdout instead of text.
    #[arg(long, global = true)]
    json: bool,
    #[arg(long, short, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum FamilyArg {
    #[value(name = "mobile_world")]
    MobileWorld,
    #[value(name = "android_world")]
    AndroidWorld,
}

impl From<FamilyArg> for SuiteFamily {
    fn from(value: FamilyArg) -> Self {
        match value {
            FamilyArg::MobileWorld => SuiteFamily::MobileWorld,
            FamilyArg::AndroidWorld => SuiteFamily::AndroidWorld,
        }
    }
}

#[derive(Args, Clone)]
struct RegistryArgs {
    #[arg(long, value_enum, default_value = "mobile_world")]
    family: FamilyArg,
    /// Directory of task definition units (defaults to MW_TASK_SET_PATH, then tasks/<family>).
    #[arg(long)]
    task_set: Option<PathBuf>,
}

impl RegistryArgs {
    fn load(&self) -> TaskRegistry {
        TaskRegistry::for_suite_family(self.family.into(), self.task_set.as_deref())
    }
}

#[derive(Args, Clone)]
struct EndpointArgs {
    /// Environment server URL (overrides MW_ENV_URL).
    #[arg(long)]
    url: Option<String>,
    /// Device id (overrides MW_DEVICE).
    #[arg(long)]
    device: Option<String>,
}

impl EndpointArgs {
    fn connect(&self) -> Result<EnvClient> {
        let mut config = ClientConfig::from_env()?;
        if let Some(url) = self.url.as_ref() {
            config.base_url = url.clone();
        }
        if let Some(device) = self.device.as_ref() {
            config.device = device.clone();
        }
        EnvClient::connect(config)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect local task definitions and tool catalogs.
    Info {
        #[command(subcommand)]
        command: InfoCommand,
    },
    /// Talk to a running environment server.
    Env {
        #[command(flatten)]
        endpoint: EndpointArgs,
        #[command(subcommand)]
        command: EnvCommand,
    },
    /// Summarize finished runs under a log directory.
    Results {
        log_root: PathBuf,
        /// Only these task directories.
        #[arg(long = "task")]
        tasks: Vec<String>,
    },
    /// Run a task's local checker against an answer.
    Check {
        name: String,
        #[arg(long)]
        answer: String,
        #[arg(long, default_value = mw_core::DEFAULT_DEVICE)]
        device: String,
        #[command(flatten)]
        registry: RegistryArgs,
    },
}

#[derive(Subcommand)]
enum InfoCommand {
    Tasks {
        #[arg(long)]
        filter: Option<String>,
        #[command(flatten)]
        registry: RegistryArgs,
    },
    Task {
        name: String,
        #[command(flatten)]
        registry: RegistryArgs,
    },
    Apps {
        #[arg(long)]
        filter: Option<String>,
        #[command(flatten)]
        registry: RegistryArgs,
    },
    App {
        name: String,
        #[command(flatten)]
        registry: RegistryArgs,
    },
    Stats {
        #[arg(long)]
        filter: Option<String>,
        #[command(flatten)]
        registry: RegistryArgs,
    },
    Tools {
        #[arg(long)]
        filter: Option<String>,
        /// MCP server config (defaults to MW_MCP_CONFIG).
        #[arg(long)]
        mcp_config: Option<PathBuf>,
    },
    Tool {
        name: String,
        #[arg(long)]
        mcp_config: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum EnvCommand {
    Health,
    Tasks {
        #[arg(long)]
        enable_mcp: bool,
    },
    Switch {
        #[arg(value_enum)]
        family: FamilyArg,
    },
    Goal {
        task: String,
    },
    Metadata {
        task: String,
    },
    Score {
        task: String,
    },
    /// Save the current screen as PNG.
    Observe {
        #[arg(long, default_value = "screenshot")]
        kind: String,
        #[arg(long)]
        out: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let json_mode = cli.json;
    match run_command(cli.command, json_mode) {
        Ok(Some(payload)) => {
            emit_json(&payload);
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(err) => {
            if json_mode {
                let (code, details) = error_code_and_details(&err);
                emit_json(&json_error(code, err.to_string(), details));
                std::process::exit(1);
            }
            Err(err)
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run_command(command: Commands, json: bool) -> Result<Option<Value>> {
    match command {
        Commands::Info { command } => run_info(command, json),
        Commands::Env { endpoint, command } => run_env(&endpoint, command, json),
        Commands::Results { log_root, tasks } => {
            let allow_list = if tasks.is_empty() {
                None
            } else {
                Some(tasks.as_slice())
            };
            let results = mw_runtime::scan_finished_results(&log_root, allow_list)?;
            let summary = mw_runtime::summarize(&results);
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "results",
                    "log_root": log_root.display().to_string(),
                    "results": results,
                    "summary": summary,
                })));
            }
            for result in &results {
                println!(
                    "{}: {}{}",
                    result.task,
                    format_score(result.score),
                    result
                        .reason
                        .as_deref()
                        .map(|r| format!(" ({})", r))
                        .unwrap_or_default()
                );
            }
            println!(
                "finished: {} scored: {} successes: {} mean_score: {}",
                summary.count,
                summary.scored,
                summary.successes,
                format_score(summary.mean_score)
            );
            Ok(None)
        }
        Commands::Check {
            name,
            answer,
            device,
            registry,
        } => {
            let registry = registry.load();
            let task = registry.get(&name)?;
            let mut controller = LocalController::new(device);
            let mut run = task.start();
            let relevant_information = run
                .initialize(&mut controller)?
                .relevant_information
                .clone();
            controller.record_answer(answer);
            let score = run.evaluate(&controller)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "check",
                    "task": name,
                    "source": task.source().describe(),
                    "device": controller.device_id(),
                    "relevant_information": relevant_information,
                    "score": score,
                })));
            }
            println!("task: {}", name);
            println!("source: {}", task.source().describe());
            println!("score: {}", score.score);
            println!("reason: {}", score.reason);
            Ok(None)
        }
    }
}

fn run_info(command: InfoCommand, json: bool) -> Result<Option<Value>> {
    match command {
        InfoCommand::Tasks { filter, registry } => {
            let tasks = info::list_tasks(&registry.load(), filter.as_deref());
            if json {
                return Ok(Some(json!({"ok": true, "command": "info tasks", "tasks": tasks})));
            }
            for task in &tasks {
                print_task_line(task);
            }
            println!("total: {}", tasks.len());
        }
        InfoCommand::Task { name, registry } => {
            let registry = registry.load();
            let task = info::get_task_info(&registry, &name)?;
            let source = registry.get(&name)?.source().describe();
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "info task",
                    "task": task,
                    "source": source,
                })));
            }
            println!("name: {}", task.name);
            println!("type: {}", task.kind_label());
            println!("goal: {}", task.goal.as_deref().unwrap_or("-"));
            println!("apps: {}", join_or_dash(&task.app_names));
            println!("tags: {}", join_or_dash(&task.tags));
            println!("source: {}", source);
        }
        InfoCommand::Apps { filter, registry } => {
            let apps = info::list_apps(&registry.load(), filter.as_deref());
            if json {
                return Ok(Some(json!({"ok": true, "command": "info apps", "apps": apps})));
            }
            for app in &apps {
                println!(
                    "{}: tasks={} single_app={} cross_app={}",
                    app.name,
                    app.tasks.len(),
                    app.single_app_task_count,
                    app.cross_app_task_count
                );
            }
        }
        InfoCommand::App { name, registry } => {
            let app = info::get_app_info(&registry.load(), &name)?;
            if json {
                return Ok(Some(json!({"ok": true, "command": "info app", "app": app})));
            }
            println!("name: {}", app.name);
            println!("single_app_tasks: {}", app.single_app_task_count);
            println!("cross_app_tasks: {}", app.cross_app_task_count);
            for task in &app.tasks {
                println!("  {}", task);
            }
        }
        InfoCommand::Stats { filter, registry } => {
            let stats = info::task_statistics(&registry.load(), filter.as_deref());
            if json {
                return Ok(Some(json!({"ok": true, "command": "info stats", "statistics": stats})));
            }
            println!("total_tasks: {}", stats.total_tasks);
            println!("single_app_tasks: {}", stats.single_app_tasks);
            println!("cross_app_tasks: {}", stats.cross_app_tasks);
            println!("tasks_without_apps: {}", stats.tasks_without_apps);
            for (tag, count) in stats.tags_by_count() {
                println!("  {}: {}", tag, count);
            }
        }
        InfoCommand::Tools { filter, mcp_config } => {
            let catalog = load_catalog(mcp_config)?;
            let tools = mw_runtime::tools::list_tools(&catalog, filter.as_deref());
            if json {
                return Ok(Some(json!({"ok": true, "command": "info tools", "tools": tools})));
            }
            for tool in &tools {
                println!(
                    "{} [{}]: {}",
                    tool.name,
                    tool.provider,
                    tool.description.as_deref().unwrap_or("-")
                );
            }
            println!("total: {}", tools.len());
        }
        InfoCommand::Tool { name, mcp_config } => {
            let catalog = load_catalog(mcp_config)?;
            let tool = mw_runtime::tools::get_tool_info(&catalog, &name)?;
            if json {
                return Ok(Some(json!({"ok": true, "command": "info tool", "tool": tool})));
            }
            print_tool(&tool);
        }
    }
    Ok(None)
}

fn run_env(endpoint: &EndpointArgs, command: EnvCommand, json: bool) -> Result<Option<Value>> {
    let mut client = endpoint.connect()?;
    let payload = match command {
        EnvCommand::Health => {
            let healthy = client.health();
            if !json {
                println!("healthy: {}", healthy);
            }
            json!({"ok": true, "command": "env health", "healthy": healthy})
        }
        EnvCommand::Tasks { enable_mcp } => {
            let tasks = client.get_suite_task_list(enable_mcp)?;
            if !json {
                for task in &tasks {
                    println!("{}", task);
                }
            }
            json!({"ok": true, "command": "env tasks", "tasks": tasks})
        }
        EnvCommand::Switch { family } => {
            let result = client.switch_suite_family(family.into())?;
            if !json {
                println!("switched: {}", result.switched);
                println!("avd_name: {}", result.avd_name.as_deref().unwrap_or("-"));
                println!(
                    "emulator_device_id: {}",
                    result.emulator_device_id.as_deref().unwrap_or("-")
                );
            }
            json!({"ok": true, "command": "env switch", "result": result})
        }
        EnvCommand::Goal { task } => {
            let goal = client.get_task_goal(&task)?;
            if !json {
                println!("{}", goal);
            }
            json!({"ok": true, "command": "env goal", "task": task, "goal": goal})
        }
        EnvCommand::Metadata { task } => {
            let metadata = client.get_task_metadata(&task)?;
            if !json {
                println!("apps: {}", join_or_dash(&metadata.apps));
                println!("tags: {}", join_or_dash(&metadata.tags));
            }
            json!({"ok": true, "command": "env metadata", "task": task, "metadata": metadata})
        }
        EnvCommand::Score { task } => {
            let score = client.get_task_score(&task)?;
            if !json {
                println!("score: {}", score.score);
                println!("reason: {}", score.reason);
            }
            json!({"ok": true, "command": "env score", "task": task, "score": score})
        }
        EnvCommand::Observe { kind, out } => {
            let observation = client.get_observation(kind.parse::<ObservationKind>()?)?;
            observation.screenshot.save_png(&out)?;
            if !json {
                println!(
                    "saved {}x{} screenshot to {}",
                    observation.screenshot.width(),
                    observation.screenshot.height(),
                    out.display()
                );
            }
            json!({
                "ok": true,
                "command": "env observe",
                "path": out.display().to_string(),
                "width": observation.screenshot.width(),
                "height": observation.screenshot.height(),
            })
        }
    };
    client.close();
    Ok(if json { Some(payload) } else { None })
}

fn load_catalog(mcp_config: Option<PathBuf>) -> Result<ToolCatalog> {
    let config = match mcp_config {
        Some(path) => McpServersConfig::load(&path)?,
        None => McpServersConfig::from_env()?.ok_or_else(|| {
            anyhow!(
                "no MCP server config; pass --mcp-config or set {}",
                mw_core::MW_MCP_CONFIG
            )
        })?,
    };
    tracing::debug!(servers = config.servers.len(), "loading tool catalog");
    Ok(ToolCatalog::load(config.providers()?)?)
}

fn print_task_line(task: &TaskInfo) {
    println!(
        "{} [{}] apps={} tags={}",
        task.name,
        task.kind_label(),
        join_or_dash(&task.app_names),
        join_or_dash(&task.tags)
    );
}

fn print_tool(tool: &ToolDescriptor) {
    println!("name: {}", tool.name);
    println!("provider: {}", tool.provider);
    println!("description: {}", tool.description.as_deref().unwrap_or("-"));
    for (param, spec) in &tool.parameters {
        println!(
            "  {}: {}{}{}",
            param,
            spec.kind,
            if spec.required { " (required)" } else { "" },
            spec.description
                .as_deref()
                .map(|d| format!(" {}", d))
                .unwrap_or_default()
        );
    }
}

fn join_or_dash(items: &[String]) -> String {
    if items.is_empty() {
        "-".to_string()
    } else {
        items.join(", ")
    }
}

fn format_score(score: Option<f64>) -> String {
    score
        .map(|s| format!("{:.2}", s))
        .unwrap_or_else(|| "-".to_string())
}

fn emit_json(value: &Value) {
    match serde_json::to_string(value) {
        Ok(s) => println!("{}", s),
        Err(_) => println!(
            "{{\"ok\":false,\"error\":{{\"code\":\"serialization_error\",\"message\":\"failed to serialize JSON payload\",\"details\":{{}}}}}}"
        ),
    }
}

fn json_error(code: &str, message: String, details: Value) -> Value {
    json!({
        "ok": false,
        "error": {
            "code": code,
            "message": message,
            "details": details
        }
    })
}

fn error_code_and_details(err: &anyhow::Error) -> (&'static str, Value) {
    if let Some(env_err) = err.downcast_ref::<EnvError>() {
        let details = if env_err.available().is_empty() {
            json!({})
        } else {
            json!({ "available": env_err.available() })
        };
        return (env_err.kind().as_str(), details);
    }
    if let Some(load_err) = err.downcast_ref::<TaskLoadError>() {
        return (load_err.kind().as_str(), json!({}));
    }
    ("command_failed", json!({}))
}
