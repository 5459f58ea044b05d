use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::info;

use agentboard::config::{ConfigError, SyncConfig, ws_url};
use agentboard::net::api::{ApiError, HttpApi, RemoteApi};
use agentboard::net::types::{
    AgentQueryRequest, ConnectionRecord, CreateAgentRequest, MessageBroadcastRequest, WorkflowRequest,
};
use agentboard::services::sync::{SyncClient, SyncError};
use agentboard::state::canvas::{CanvasState, DEFAULT_SOURCE_HANDLE, DEFAULT_TARGET_HANDLE, Edge, Position};

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("signal handler failed: {0}")]
    Signal(#[from] std::io::Error),
    #[error("state channel closed")]
    Closed,
}

#[derive(Parser, Debug)]
#[command(name = "agentboard", about = "Agent orchestration board sync client")]
struct Cli {
    #[arg(long, env = "AGENTBOARD_BASE_URL")]
    base_url: Option<String>,

    #[arg(long, env = "AGENTBOARD_LAYOUT_PATH")]
    layout_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load, subscribe and print every state transition until Ctrl-C.
    Watch,
    /// List agents with their positions.
    Agents,
    Create {
        name: String,
        #[arg(long, env = "OPENAI_API_KEY")]
        api_key: String,
        #[arg(long, default_value = "gpt-3.5-turbo")]
        model: String,
        #[arg(long)]
        prompt: Option<String>,
    },
    Delete {
        agent_id: String,
    },
    Start {
        agent_id: String,
    },
    Stop {
        agent_id: String,
    },
    /// Connect two agents.
    Link {
        source: String,
        target: String,
        #[arg(long, default_value = DEFAULT_SOURCE_HANDLE)]
        source_handle: String,
        #[arg(long, default_value = DEFAULT_TARGET_HANDLE)]
        target_handle: String,
    },
    Unlink {
        edge_id: String,
    },
    Move {
        agent_id: String,
        x: f64,
        y: f64,
    },
    Query {
        agent_id: String,
        query: String,
    },
    /// Send a message to every agent `from_agent` is connected to.
    Broadcast {
        from_agent: String,
        message: String,
    },
    /// Run a workflow across agents in the given order.
    Workflow {
        #[arg(long)]
        message: String,
        #[arg(required = true)]
        agents: Vec<String>,
    },
    History {
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    Health,
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let mut config = SyncConfig::from_env()?;
    if let Some(base_url) = cli.base_url.as_deref() {
        config.base_url = base_url.trim_end_matches('/').to_owned();
        config.stream.url = ws_url(&config.base_url)?;
    }
    if let Some(path) = cli.layout_path {
        config.layout_path = path;
    }

    if matches!(cli.command, Command::Health) {
        let api = HttpApi::from_config(&config)?;
        return print_json(&api.health().await?);
    }

    let client = SyncClient::from_config(&config)?;
    client.load().await?;
    run(&client, cli.command).await
}

async fn run(client: &SyncClient, command: Command) -> Result<(), CliError> {
    match command {
        Command::Watch => watch(client).await,
        Command::Agents => {
            print_agents(&client.snapshot());
            Ok(())
        }
        Command::Create { name, api_key, model, prompt } => {
            let mut request = CreateAgentRequest::new(name, api_key).with_model(model);
            if let Some(prompt) = prompt {
                request = request.with_prompt(prompt);
            }
            let node = client.create_agent(request).await?;
            println!("{}\t{}\t{}", node.id, node.status, node.label);
            Ok(())
        }
        Command::Delete { agent_id } => Ok(client.delete_agent(&agent_id).await?),
        Command::Start { agent_id } => Ok(client.start_agent(&agent_id).await?),
        Command::Stop { agent_id } => Ok(client.stop_agent(&agent_id).await?),
        Command::Link { source, target, source_handle, target_handle } => {
            let edge = client.create_edge(&source, Some(&source_handle), &target, Some(&target_handle)).await?;
            println!("{}", edge.id);
            Ok(())
        }
        Command::Unlink { edge_id } => Ok(client.delete_edge(&edge_id).await?),
        Command::Move { agent_id, x, y } => Ok(client.move_agent(&agent_id, Position::new(x, y))?),
        Command::Query { agent_id, query } => {
            let reply = client.query_agent(&agent_id, AgentQueryRequest { query, context: None }).await?;
            print_json(&reply)
        }
        Command::Broadcast { from_agent, message } => {
            let result = client.broadcast_message(MessageBroadcastRequest { from_agent, message, context: None }).await?;
            print_json(&serde_json::to_value(result)?)
        }
        Command::Workflow { message, agents } => {
            let connections = workflow_connections(&client.snapshot(), &agents);
            let request = WorkflowRequest {
                workflow_id: uuid::Uuid::new_v4().to_string(),
                agents,
                connections,
                initial_message: message,
                context: None,
            };
            let result = client.execute_workflow(request).await?;
            print_json(&serde_json::to_value(result)?)
        }
        Command::History { limit } => print_json(&Value::Array(client.message_history(limit).await?)),
        Command::Health => Ok(()),
    }
}

async fn watch(client: &SyncClient) -> Result<(), CliError> {
    let mut rx = client.watch();
    print_summary(&rx.borrow_and_update());
    client.subscribe();

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                info!("interrupted; closing stream");
                client.unsubscribe();
                client.stream().shutdown().await;
                return Ok(());
            }
            changed = rx.changed() => {
                changed.map_err(|_| CliError::Closed)?;
                let state = rx.borrow_and_update().clone();
                print_summary(&state);
                client.stream_health()?;
            }
        }
    }
}

/// Edges whose endpoints are both part of the workflow.
fn workflow_connections(state: &CanvasState, agents: &[String]) -> Vec<ConnectionRecord> {
    state
        .edges
        .iter()
        .filter(|edge| !edge.is_placeholder() && agents.contains(&edge.source) && agents.contains(&edge.target))
        .map(Edge::to_record)
        .collect()
}

fn print_summary(state: &CanvasState) {
    let link = if state.connected { "connected" } else { "disconnected" };
    let error = state.error.as_deref().unwrap_or("-");
    println!("[{link}] agents={} edges={} error={error}", state.agents.len(), state.edges.len());
}

fn print_agents(state: &CanvasState) {
    for agent in &state.agents {
        println!(
            "{}\t{}\t{}\t{}\t({:.0}, {:.0})",
            agent.id, agent.status, agent.label, agent.model, agent.position.x, agent.position.y
        );
    }
}

fn print_json(value: &Value) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}
