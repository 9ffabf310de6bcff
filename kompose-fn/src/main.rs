use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use kompose::stream;
use kompose::{
    AnthropicClient, ComposeFunction, FunctionConfig, ReplyResolver, RunFunctionRequest,
    ToolConfigResolver,
};

#[derive(Parser)]
#[command(name = "kompose-fn")]
#[command(version)]
#[command(about = "Compose resources by asking a language model")]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true, env = "KOMPOSE_CONFIG")]
    config: Option<PathBuf>,

    /// Model identifier, overrides the configuration
    #[arg(long, global = true, env = "KOMPOSE_MODEL")]
    model: Option<String>,

    /// Model API base URL, overrides the configuration
    #[arg(long, global = true, env = "ANTHROPIC_BASE_URL")]
    base_url: Option<String>,

    /// Deadline for the model call, in seconds
    #[arg(long, global = true)]
    timeout_seconds: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the function on a request and print the response
    Run(RequestArgs),
    /// Print the prompt a request would send, without calling the model
    Render(RequestArgs),
    /// Resolve a raw model reply into resources
    Resolve(ResolveArgs),
}

#[derive(Parser)]
struct RequestArgs {
    /// Request JSON file (stdin when omitted)
    #[arg(long)]
    request: Option<PathBuf>,
}

#[derive(Parser)]
struct ResolveArgs {
    /// Reply text file (stdin when omitted)
    #[arg(long)]
    reply: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = Format::Yaml)]
    format: Format,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Yaml,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries only the output.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(
                    "kompose=info"
                        .parse::<tracing_subscriber::filter::Directive>()
                        .context("invalid log directive")?,
                ),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match cli.command {
        Commands::Run(args) => {
            let request = read_request(args.request.as_deref())?;
            let client = AnthropicClient::new(config.base_url.clone())
                .context("cannot create model client")?;
            let tool_servers = ToolConfigResolver::new().resolve();
            tracing::info!(count = tool_servers.len(), "resolved tool servers");
            let function = ComposeFunction::new(config, Arc::new(client))
                .context("cannot create function")?
                .with_tool_servers(tool_servers);
            let response = function.run(&request).await;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Commands::Render(args) => {
            let request = read_request(args.request.as_deref())?;
            let client = AnthropicClient::new(config.base_url.clone())
                .context("cannot create model client")?;
            let function = ComposeFunction::new(config, Arc::new(client))
                .context("cannot create function")?;
            let prompt = function
                .render_prompt(&request)
                .context("cannot render prompt")?;
            if let Some(system) = &prompt.system {
                eprintln!("[system]\n{}\n", system);
            }
            print!("{}", prompt.user);
        }
        Commands::Resolve(args) => {
            let reply = read_input(args.reply.as_deref())?;
            let set = ReplyResolver::new()
                .with_duplicate_policy(config.duplicate_policy)
                .resolve(&reply)
                .context("cannot resolve reply")?;
            match args.format {
                Format::Yaml => print!("{}", stream::serialize(&set)?),
                Format::Json => {
                    let mut documents = serde_json::Map::new();
                    for (id, doc) in &set {
                        documents.insert(id.clone(), serde_json::to_value(doc)?);
                    }
                    println!("{}", serde_json::to_string_pretty(&documents)?);
                }
            }
        }
    }
    Ok(())
}

fn load_config(cli: &Cli) -> Result<FunctionConfig> {
    let mut config = match &cli.config {
        Some(path) => FunctionConfig::load(path)
            .with_context(|| format!("cannot load config {}", path.display()))?,
        None => FunctionConfig::default(),
    };
    if let Some(model) = &cli.model {
        config.model = model.clone();
    }
    if let Some(base_url) = &cli.base_url {
        config.base_url = Some(base_url.clone());
    }
    if let Some(timeout) = cli.timeout_seconds {
        config.timeout_seconds = timeout;
    }
    Ok(config)
}

fn read_request(path: Option<&Path>) -> Result<RunFunctionRequest> {
    let text = read_input(path)?;
    serde_json::from_str(&text).context("cannot parse request JSON")
}

fn read_input(path: Option<&Path>) -> Result<String> {
    match path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("cannot read {}", path.display())),
        None => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .context("cannot read stdin")?;
            Ok(text)
        }
    }
}
