//! Interactive terminal for the venue-booking assistant.
//!
//! Usage:
//!   OPENAI_API_KEY=sk-... cargo run --example chat
//!   OPENAI_API_KEY=sk-... cargo run --example chat -- --model gpt-4o --user alice
//!   QDRANT_URL=http://localhost:6334 cargo run --example chat --features qdrant
//!
//! Settings are also read from a `.env` file. Without Qdrant a handful of
//! sample venues are embedded at startup and searched in memory.
//!
//! Type /help for commands.

use std::collections::BTreeMap;
use std::io::{self, BufRead, Write};
use std::sync::Arc;

use clap::Parser;
use futures::StreamExt;
use serde_json::{json, Value};
use venue_agent::search::{
    EmbeddingProvider, InMemoryVenueIndex, InMemoryVenueStore, OpenAiEmbedder, SearchVenuesTool,
    VenueIndex, VenueStore, SEARCH_VENUES_TOOL,
};
use venue_agent::{
    AgentError, Assistant, FrameStream, ReactRuntime, SessionKey, Settings, ToolRegistry,
};

#[derive(Parser)]
#[command(name = "chat", about = "Chat with the venue-booking assistant")]
struct Cli {
    /// Chat model (overrides OPENAI_MODEL)
    #[arg(long)]
    model: Option<String>,

    /// User id passed to the runtime
    #[arg(long, default_value = "demo-user")]
    user: String,

    /// Organization id passed to the runtime
    #[arg(long, default_value = "demo-org")]
    org: String,

    /// Continue an existing thread instead of starting a new one
    #[arg(long)]
    session: Option<String>,
}

const HELP: &str = "\
commands:
  <message>         stream a reply
  /stream <msg>     stream a reply
  /invoke <msg>     wait for the full reply
  /resume           answer the pending questions
  /session          show the current thread
  /new              start a new thread
  /quit             leave";

fn sample_venues() -> Vec<(&'static str, Value)> {
    vec![
        (
            "v-loft-austin",
            json!({"name": "Warehouse Loft", "city": "Austin", "capacity": 120,
                   "style": "industrial", "description": "Exposed brick loft with a rooftop deck downtown."}),
        ),
        (
            "v-barn-austin",
            json!({"name": "Red Oak Barn", "city": "Austin", "capacity": 200,
                   "style": "rustic", "description": "Restored barn on ten acres, string lights and a lawn."}),
        ),
        (
            "v-gallery-denver",
            json!({"name": "Gallery 9", "city": "Denver", "capacity": 80,
                   "style": "modern", "description": "White-walled art gallery for receptions and launches."}),
        ),
        (
            "v-garden-denver",
            json!({"name": "Cherry Creek Garden", "city": "Denver", "capacity": 150,
                   "style": "garden", "description": "Outdoor garden with a covered pavilion for weddings."}),
        ),
    ]
}

type SearchBackend = (Arc<dyn VenueIndex>, Arc<dyn VenueStore>);

async fn in_memory_backend(embedder: &dyn EmbeddingProvider) -> Result<SearchBackend, AgentError> {
    let venues = sample_venues();
    let texts: Vec<String> = venues
        .iter()
        .map(|(_, doc)| venue_agent::search::prepare_text(&doc.to_string()))
        .collect();
    let vectors = embedder
        .embed_batch(&texts)
        .await
        .map_err(|e| AgentError::Tool(e.to_string()))?;

    let mut index = InMemoryVenueIndex::new();
    let mut store = InMemoryVenueStore::new();
    for ((id, doc), vector) in venues.into_iter().zip(vectors) {
        let metadata = json!({"city": doc["city"], "style": doc["style"]});
        index = index.with_venue(id, vector, metadata);
        store = store.with_venue(id, doc);
    }
    let index: Arc<dyn VenueIndex> = Arc::new(index);
    let store: Arc<dyn VenueStore> = Arc::new(store);
    Ok((index, store))
}

#[cfg(feature = "qdrant")]
async fn search_backend(
    settings: &Settings,
    embedder: &dyn EmbeddingProvider,
) -> Result<SearchBackend, AgentError> {
    if let Some(url) = &settings.qdrant_url {
        let index = venue_agent::search::QdrantVenueIndex::new(
            url,
            &settings.venue_collection,
            settings.embedding_dimensions,
        )
        .await
        .map_err(|e| AgentError::Config(e.to_string()))?;
        let qdrant = Arc::new(index);
        let index: Arc<dyn VenueIndex> = qdrant.clone();
        let store: Arc<dyn VenueStore> = qdrant;
        return Ok((index, store));
    }
    in_memory_backend(embedder).await
}

#[cfg(not(feature = "qdrant"))]
async fn search_backend(
    settings: &Settings,
    embedder: &dyn EmbeddingProvider,
) -> Result<SearchBackend, AgentError> {
    if settings.qdrant_url.is_some() {
        eprintln!("note: QDRANT_URL is set but the qdrant feature is off, using sample venues");
    }
    in_memory_backend(embedder).await
}

async fn build_assistant(settings: &Settings) -> Result<Assistant, AgentError> {
    let mut embedder = OpenAiEmbedder::new(
        &settings.openai_base_url,
        &settings.embedding_model,
        settings.embedding_dimensions,
    );
    if let Some(key) = &settings.openai_api_key {
        embedder = embedder.with_api_key(key.clone());
    }
    let embedder: Arc<dyn EmbeddingProvider> = Arc::new(embedder);

    let (index, store) = search_backend(settings, embedder.as_ref()).await?;
    let search = SearchVenuesTool::new(embedder, index, store);
    let tools = ToolRegistry::new().add(SEARCH_VENUES_TOOL, SearchVenuesTool::schema(), search);

    let runtime = ReactRuntime::from_settings(settings, tools)?;
    Ok(Assistant::new(Arc::new(runtime)))
}

fn new_session(cli: &Cli) -> SessionKey {
    SessionKey::new(uuid::Uuid::new_v4().to_string(), &cli.user, &cli.org)
}

/// Print frames as they arrive. Returns the questions of the last
/// interrupt, if the run paused on one.
async fn print_frames(mut frames: FrameStream) -> Option<Vec<String>> {
    let mut questions = None;
    while let Some(frame) = frames.next().await {
        println!("\x1b[2mid: {}\x1b[0m {}", frame.id(), frame.data());
        if frame.is_error() {
            continue;
        }
        let Ok(data) = serde_json::from_str::<Value>(frame.data()) else {
            continue;
        };
        if data["category"] == "interrupt" {
            questions = Some(
                data["content"]["questions"]
                    .as_array()
                    .map(|qs| {
                        qs.iter()
                            .filter_map(Value::as_str)
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default(),
            );
        }
    }
    questions
}

fn prompt_line(lines: &mut impl Iterator<Item = io::Result<String>>, label: &str) -> Option<String> {
    eprint!("{label}");
    io::stderr().flush().ok();
    match lines.next() {
        Some(Ok(line)) => Some(line.trim().to_string()),
        _ => None,
    }
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let mut settings = Settings::from_env().unwrap_or_else(|e| {
        eprintln!("error: {e}");
        std::process::exit(1);
    });
    if let Some(model) = &cli.model {
        settings.openai_model = model.clone();
    }

    let assistant = build_assistant(&settings).await.unwrap_or_else(|e| {
        eprintln!("error: {e}");
        std::process::exit(1);
    });

    let mut session = match &cli.session {
        Some(thread) => SessionKey::new(thread.clone(), &cli.user, &cli.org),
        None => new_session(&cli),
    };
    let mut pending: Option<Vec<String>> = None;

    eprintln!("venue-agent chat");
    eprintln!("model: {}", settings.openai_model);
    eprintln!("session: {}", session.thread_id);
    eprintln!("---");

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();

    loop {
        let Some(line) = prompt_line(&mut lines, "\x1b[1;36myou>\x1b[0m ") else {
            break;
        };
        if line.is_empty() {
            continue;
        }

        let (command, rest) = match line.split_once(' ') {
            Some((cmd, rest)) if cmd.starts_with('/') => (cmd, rest.trim()),
            _ if line.starts_with('/') => (line.as_str(), ""),
            _ => ("/stream", line.as_str()),
        };

        match command {
            "/help" => eprintln!("{HELP}"),
            "/quit" | "/q" => break,
            "/session" => {
                eprintln!(
                    "thread: {}  user: {}  org: {}",
                    session.thread_id, session.user_id, session.organization_id
                );
                if let Some(questions) = &pending {
                    eprintln!("waiting on {} question(s), use /resume", questions.len());
                }
            }
            "/new" => {
                session = new_session(&cli);
                pending = None;
                eprintln!("new session: {}", session.thread_id);
            }
            "/stream" if !rest.is_empty() => {
                pending = print_frames(assistant.stream(rest, session.clone())).await;
            }
            "/invoke" if !rest.is_empty() => {
                let response = assistant.invoke(rest, &session).await;
                eprint!("\x1b[1;32magent>\x1b[0m ");
                println!("{}", response.message);
            }
            "/resume" => {
                let Some(questions) = pending.take() else {
                    eprintln!("nothing to resume");
                    continue;
                };
                let mut answers = BTreeMap::new();
                for question in questions {
                    let Some(answer) = prompt_line(&mut lines, &format!("  {question} ")) else {
                        break;
                    };
                    answers.insert(question, answer);
                }
                pending = print_frames(assistant.resume(answers, session.clone())).await;
            }
            "/stream" | "/invoke" => eprintln!("usage: {command} <message>"),
            other => eprintln!("unknown command {other}, try /help"),
        }

        if let Some(questions) = &pending {
            eprintln!("\x1b[33m  [{} question(s) pending, /resume to answer]\x1b[0m", questions.len());
        }
    }

    eprintln!("bye.");
}
