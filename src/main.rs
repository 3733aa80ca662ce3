//! nodestep CLI - deliver and run scripts on nodes

use std::path::PathBuf;
use std::sync::Arc;

use clap::{ArgGroup, Parser, Subcommand};
use colored::Colorize;
use tokio::io::AsyncReadExt;

use nodestep::config::EngineConfig;
use nodestep::error::{FixSuggestion, NodestepError};
use nodestep::event_log::OutputStream;
use nodestep::node::{FILE_COPIER_ATTRIBUTE, NODE_EXECUTOR_ATTRIBUTE};
use nodestep::{
    ExecutionContext, Framework, NodeDispatcher, NodeOutcome, ParallelDispatcher, ScriptCommand,
    ScriptStepExecutor, SequentialDispatcher, StepDefinition, StepExecutionItem, StepExecutor,
    StepResult,
};

#[derive(Parser)]
#[command(name = "nodestep")]
#[command(about = "nodestep - deliver and run scripts on nodes")]
#[command(version)]
struct Cli {
    /// Config file (default: ~/.config/nodestep/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a script on the local node
    #[command(group(ArgGroup::new("source").required(true).args(["file", "inline", "stdin"])))]
    Run {
        /// Script file on this machine
        #[arg(long)]
        file: Option<PathBuf>,

        /// Inline script text
        #[arg(long)]
        inline: Option<String>,

        /// Read the script from standard input
        #[arg(long)]
        stdin: bool,

        /// OS family of the target node (unix, linux, windows, ...)
        #[arg(long)]
        os_family: Option<String>,

        /// Node executor provider for this run
        #[arg(long)]
        node_executor: Option<String>,

        /// File copier provider for this run
        #[arg(long)]
        file_copier: Option<String>,

        /// Arguments passed to the script
        #[arg(last = true)]
        args: Vec<String>,
    },

    /// Run a step definition (.yaml)
    Step {
        /// Path to the step file
        file: PathBuf,

        /// Dispatch nodes concurrently (bounded by thread_count)
        #[arg(long)]
        parallel: bool,

        /// Stop at the first failed node (sequential dispatch only)
        #[arg(long)]
        stop_on_failure: bool,
    },

    /// List registered transport providers
    Providers,
}

#[tokio::main]
async fn main() {
    // Load .env file (ignore if not present)
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    let result = match load_framework(cli.config.as_deref()) {
        Ok(framework) => match cli.command {
            Commands::Run {
                file,
                inline,
                stdin,
                os_family,
                node_executor,
                file_copier,
                args,
            } => {
                let source = ScriptInput { file, inline, stdin };
                let overrides = NodeOverrides {
                    os_family,
                    node_executor,
                    file_copier,
                };
                run_script(framework, source, overrides, args).await
            }
            Commands::Step {
                file,
                parallel,
                stop_on_failure,
            } => run_step(framework, &file, parallel, stop_on_failure).await,
            Commands::Providers => {
                list_providers(&framework);
                Ok(())
            }
        },
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        eprintln!("{} {}", "Error:".red().bold(), e);
        if let Some(suggestion) = e.fix_suggestion() {
            eprintln!("  {} {}", "Fix:".yellow(), suggestion);
        }
        let code = match e {
            NodestepError::ScriptFailed {
                exit_code: Some(code),
            } if code > 0 => code,
            _ => 1,
        };
        std::process::exit(code);
    }
}

fn load_framework(path: Option<&std::path::Path>) -> Result<Arc<Framework>, NodestepError> {
    let config = match path {
        Some(path) => EngineConfig::load_from(path)?,
        None => EngineConfig::load()?,
    };
    let config = config.with_env()?;
    Ok(Arc::new(Framework::new(config)))
}

struct ScriptInput {
    file: Option<PathBuf>,
    inline: Option<String>,
    stdin: bool,
}

struct NodeOverrides {
    os_family: Option<String>,
    node_executor: Option<String>,
    file_copier: Option<String>,
}

async fn run_script(
    framework: Arc<Framework>,
    input: ScriptInput,
    overrides: NodeOverrides,
    args: Vec<String>,
) -> Result<(), NodestepError> {
    let command = if let Some(file) = input.file {
        ScriptCommand::server_file(file)
    } else if input.stdin {
        let mut bytes = Vec::new();
        tokio::io::stdin().read_to_end(&mut bytes).await?;
        ScriptCommand::stream(bytes)
    } else {
        ScriptCommand::content(input.inline.unwrap_or_default())
    };
    let command = command.with_args(args);

    let mut node = framework.local_node();
    if let Some(family) = overrides.os_family {
        node = node.with_os_family(family);
    }
    if let Some(name) = overrides.node_executor {
        node = node.with_attribute(NODE_EXECUTOR_ATTRIBUTE, name);
    }
    if let Some(name) = overrides.file_copier {
        node = node.with_attribute(FILE_COPIER_ATTRIBUTE, name);
    }

    let ctx = ExecutionContext::builder(Arc::clone(&framework))
        .project("cli")
        .build();
    let item = StepExecutionItem::dispatch("run", command, vec![node]);
    let result = ScriptStepExecutor::new().execute_workflow_step(&ctx, &item).await?;

    print_output(&ctx, &result, false);
    into_exit(result)
}

async fn run_step(
    framework: Arc<Framework>,
    file: &std::path::Path,
    parallel: bool,
    stop_on_failure: bool,
) -> Result<(), NodestepError> {
    // Read and parse (async to not block runtime)
    let yaml = tokio::fs::read_to_string(file).await?;
    let definition: StepDefinition = serde_yaml::from_str(&yaml)?;
    let item = StepExecutionItem::from(definition);

    let dispatcher: Arc<dyn NodeDispatcher> = if parallel {
        Arc::new(ParallelDispatcher::new())
    } else {
        Arc::new(SequentialDispatcher::new(!stop_on_failure))
    };
    let executor = ScriptStepExecutor::new().with_dispatcher(dispatcher);

    let ctx = ExecutionContext::builder(framework).project("cli").build();

    println!(
        "{} Running step: {}",
        "→".cyan(),
        item.label().cyan().bold()
    );

    let result = executor.execute_workflow_step(&ctx, &item).await?;

    print_output(&ctx, &result, true);
    for node_result in result.node_results() {
        match &node_result.outcome {
            NodeOutcome::Completed(r) if r.is_success() => {
                println!("  {} {} {}", "✓".green(), node_result.node.bold(), r)
            }
            NodeOutcome::Completed(r) => println!("  {} {} {}", "✗".red(), node_result.node.bold(), r),
            NodeOutcome::Faulted(e) => println!("  {} {} {}", "✗".red(), node_result.node.bold(), e),
        }
    }

    into_exit(result)
}

/// Print captured output, prefixed with the node name when several nodes ran
fn print_output(ctx: &ExecutionContext, result: &StepResult, prefixed: bool) {
    for node_result in result.node_results() {
        let node = node_result.node.as_str();
        for line in ctx.listener().output_lines(node, OutputStream::Stdout) {
            if prefixed {
                println!("{} {}", format!("[{}]", node).dimmed(), line);
            } else {
                println!("{}", line);
            }
        }
        for line in ctx.listener().output_lines(node, OutputStream::Stderr) {
            if prefixed {
                eprintln!("{} {}", format!("[{}]", node).dimmed(), line);
            } else {
                eprintln!("{}", line);
            }
        }
    }
}

/// First fault or failure of the step, if any
fn into_exit(result: StepResult) -> Result<(), NodestepError> {
    if result.is_success() {
        return Ok(());
    }
    match result.node_results().iter().find(|r| !r.outcome.is_success()) {
        Some(failed) => match &failed.outcome {
            NodeOutcome::Faulted(e) => Err(NodestepError::NodeFaulted(Arc::clone(e))),
            NodeOutcome::Completed(r) => Err(NodestepError::ScriptFailed {
                exit_code: r.exit_code(),
            }),
        },
        None => Err(NodestepError::ScriptFailed { exit_code: None }),
    }
}

fn list_providers(framework: &Framework) {
    let config = framework.config();

    println!("{}", "File copiers:".cyan().bold());
    for name in framework.file_copiers().names() {
        let marker = if name == config.providers.file_copier { " (default)" } else { "" };
        println!("  {}{}", name, marker.dimmed());
    }

    println!("{}", "Node executors:".cyan().bold());
    for name in framework.node_executors().names() {
        let marker = if name == config.providers.node_executor { " (default)" } else { "" };
        println!("  {}{}", name, marker.dimmed());
    }
}
