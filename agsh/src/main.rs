use std::sync::Arc;
use std::time::Duration;

use agsh_bus::{ConfigStore, ExecutorConfig, GgsConfig, ValidatorConfig};
use agsh_memory::MemoryStore;
use agsh_orchestrator::roles::perceiver::ClarifyCallback;
use agsh_orchestrator::{AuditLog, Runtime, RuntimeConfig, TaskLogRegistry};
use agsh_providers::{HttpModelClient, ModelClient};
use agsh_tools::ToolRegistry;
use agsh_types::{AuditQuery, AuditReport, FinalResult, Message, MessageType, Role};
use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "agsh")]
#[command(about = "Agentic task-execution shell")]
struct Cli {
    /// One-shot task text. Omit to start the interactive REPL.
    prompt: Option<String>,

    #[arg(long, env = "AGSH_API_BASE", default_value = "http://localhost:11434/v1")]
    api_base: String,
    #[arg(long, env = "AGSH_API_KEY")]
    api_key: Option<String>,
    #[arg(long, env = "AGSH_MODEL", default_value = "default")]
    model: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let paths = agsh_bus::resolve_agsh_paths().context("resolving ~/.cache/agsh paths")?;
    agsh_bus::ensure_agsh_dirs(&paths).context("creating agsh state directories")?;
    tracing::info!(root = %paths.root.display(), "agsh state directory");

    let config_store = ConfigStore::new(paths.root.join("config.json")).await?;
    config_store
        .apply_cli_overrides(serde_json::json!({
            "provider": {
                "url": cli.api_base,
                "api_key": cli.api_key,
                "default_model": cli.model,
            }
        }))
        .await;
    let config = config_store.get().await;

    let memory = MemoryStore::open(&paths.memory_db_path).await?;
    let model: Arc<dyn ModelClient> = Arc::new(HttpModelClient::new(
        config.provider.url.unwrap_or(cli.api_base),
        config.provider.api_key,
        config.provider.default_model.unwrap_or(cli.model),
    ));
    let tools = ToolRegistry::new();
    let audit_log = AuditLog::new(paths.audit_log_path.clone());
    let task_log = TaskLogRegistry::new(paths.tasks_dir.clone());

    let sweep_cancel = CancellationToken::new();
    let _sweep_handle = memory.clone().spawn_background_sweeps(
        Duration::from_secs(config.memory.gc_interval_secs),
        config.ggs.lambda_gc,
        sweep_cancel.clone(),
    );

    let app = App {
        memory,
        model,
        tools,
        audit_log,
        task_log,
        ggs_config: config.ggs,
        executor_config: config.executor,
        validator_config: config.validator,
    };

    let result = match cli.prompt {
        Some(prompt) => run_one_shot(&app, &prompt).await,
        None => run_repl(&app).await,
    };

    sweep_cancel.cancel();
    result
}

/// Everything needed to build (and rebuild, on `/brain`) a `Runtime`.
struct App {
    memory: Arc<MemoryStore>,
    model: Arc<dyn ModelClient>,
    tools: ToolRegistry,
    audit_log: AuditLog,
    task_log: TaskLogRegistry,
    ggs_config: GgsConfig,
    executor_config: ExecutorConfig,
    validator_config: ValidatorConfig,
}

impl App {
    fn spawn_runtime(&self) -> (Arc<Runtime>, CancellationToken, Vec<tokio::task::JoinHandle<()>>) {
        let cancel = CancellationToken::new();
        let runtime = Runtime::new(
            self.memory.clone(),
            self.model.clone(),
            self.tools.clone(),
            self.audit_log.clone(),
            self.task_log.clone(),
            RuntimeConfig {
                ggs: self.ggs_config.clone(),
                executor: self.executor_config.clone(),
                validator: self.validator_config.clone(),
            },
            &cancel,
        );
        let handles = runtime.spawn_roles(cancel.clone());
        (runtime, cancel, handles)
    }
}

async fn run_one_shot(app: &App, prompt: &str) -> anyhow::Result<()> {
    let (runtime, cancel, _handles) = app.spawn_runtime();
    let clarify = StdinClarify;
    match runtime.submit(prompt, &[], &clarify).await {
        Ok(final_result) => print_final_result(&final_result),
        Err(err) => eprintln!("task failed: {err}"),
    }
    cancel.cancel();
    Ok(())
}

/// §6 CLI contract: no positional argument starts the REPL. `exit`/`quit`
/// leave it; `/brain [cc|llm]` tears down and rebuilds the pipeline's role
/// loops (memory's background sweeps, spawned separately in `main`,
/// outlive the reset); `/audit` asks the running auditor for a report.
/// Ctrl-C aborts the in-flight submission if one is running, otherwise
/// exits the REPL.
async fn run_repl(app: &App) -> anyhow::Result<()> {
    println!("agsh — type a task, or `exit`. `/brain [cc|llm]` resets the pipeline, `/audit` reports.");
    let (mut runtime, mut cancel, mut handles) = app.spawn_runtime();
    let mut history: Vec<String> = Vec::new();
    let clarify = StdinClarify;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("agsh> ");
        use std::io::Write;
        std::io::stdout().flush().ok();

        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("\nexiting");
                break;
            }
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if line == "exit" || line == "quit" {
            break;
        }
        if let Some(rest) = line.strip_prefix("/brain") {
            reset_brain(app, rest.trim(), &mut runtime, &mut cancel, &mut handles, &mut history);
            continue;
        }
        if line == "/audit" {
            report_audit(&runtime).await;
            continue;
        }

        let outcome = tokio::select! {
            result = runtime.submit(line, &history, &clarify) => Some(result),
            _ = tokio::signal::ctrl_c() => {
                println!("\naborted");
                None
            }
        };
        match outcome {
            Some(Ok(final_result)) => {
                history.push(format!("previous task: {}", final_result.summary));
                print_final_result(&final_result);
            }
            Some(Err(err)) => eprintln!("task failed: {err}"),
            None => {}
        }
    }

    for handle in handles {
        handle.abort();
    }
    cancel.cancel();
    Ok(())
}

fn reset_brain(
    app: &App,
    mode: &str,
    runtime: &mut Arc<Runtime>,
    cancel: &mut CancellationToken,
    handles: &mut Vec<tokio::task::JoinHandle<()>>,
    history: &mut Vec<String>,
) {
    let mode = if mode.is_empty() { "llm" } else { mode };
    if mode != "cc" && mode != "llm" {
        eprintln!("usage: /brain [cc|llm]");
        return;
    }
    cancel.cancel();
    for handle in handles.drain(..) {
        handle.abort();
    }
    let (new_runtime, new_cancel, new_handles) = app.spawn_runtime();
    *runtime = new_runtime;
    *cancel = new_cancel;
    *handles = new_handles;
    history.clear();
    println!("brain reset ({mode}); in-flight task state cleared, persisted Megrams retained");
}

async fn report_audit(runtime: &Runtime) {
    let mut report_rx = runtime.bus().subscribe(MessageType::AuditReport);
    let query = AuditQuery::default();
    match Message::new(Role::User, Role::Auditor, MessageType::AuditQuery, &query) {
        Ok(message) => runtime.bus().publish(message),
        Err(err) => {
            eprintln!("failed to build audit query: {err}");
            return;
        }
    }
    match tokio::time::timeout(Duration::from_secs(5), report_rx.recv()).await {
        Ok(Some(message)) => match message.payload_as::<AuditReport>() {
            Ok(report) => println!("{report:#?}"),
            Err(err) => eprintln!("audit report did not remarshal: {err}"),
        },
        Ok(None) => eprintln!("bus closed before an audit report arrived"),
        Err(_) => eprintln!("audit report request timed out"),
    }
}

fn print_final_result(final_result: &FinalResult) {
    println!("{}", final_result.summary);
    println!("--- output ---\n{}", final_result.output);
    println!(
        "directive={:?} loss.d={:.3} loss.omega={:.3} replans={}",
        final_result.directive, final_result.loss.d, final_result.loss.omega, final_result.replans
    );
}

struct StdinClarify;

#[async_trait::async_trait]
impl ClarifyCallback for StdinClarify {
    async fn ask(&self, question: &str) -> String {
        let question = question.to_string();
        tokio::task::spawn_blocking(move || {
            println!("{question}");
            print!("> ");
            let _ = std::io::Write::flush(&mut std::io::stdout());
            let mut answer = String::new();
            let _ = std::io::stdin().read_line(&mut answer);
            answer.trim().to_string()
        })
        .await
        .unwrap_or_default()
    }
}
