//! gptlov - terminal client for the GPT-Lov answer backend
//!
//! Asks questions over the streaming chat endpoint and prints the answer
//! as it arrives, together with progress narration and cited sources.

use gptlov_client::{
    ClientConfig, ControllerHandle, HttpTransport, KeyValueStore, SessionState, SqliteStore,
    Status, StreamingController,
};
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::{wrappers::WatchStream, StreamExt};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gptlov_client=warn,gptlov=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    let config = ClientConfig::from_env();
    tracing::info!(endpoint = %config.endpoint, "Starting gptlov");

    let store: Option<Arc<dyn KeyValueStore>> = match SqliteStore::open(&config.history_path) {
        Ok(store) => Some(Arc::new(store)),
        Err(e) => {
            tracing::warn!(
                path = %config.history_path.display(),
                error = %e,
                "History store unavailable, history will not be saved"
            );
            None
        }
    };

    let transport = HttpTransport::new(&config)?;
    match transport.health_check().await {
        Ok(true) => tracing::info!("Backend is healthy"),
        Ok(false) => tracing::warn!("Backend reported an unhealthy status"),
        Err(e) => tracing::warn!(error = %e, "Backend health check failed"),
    }

    let handle = StreamingController::spawn(config, transport, store);

    let question: Vec<String> = std::env::args().skip(1).collect();
    if !question.is_empty() {
        let state = ask(&handle, &question.join(" "), true).await?;
        return if state.status == Status::Error {
            Err("no answer".into())
        } else {
            Ok(())
        };
    }

    repl(&handle).await
}

async fn repl(handle: &ControllerHandle) -> Result<(), Box<dyn std::error::Error>> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut fresh = true;

    loop {
        print!("\n{} ", if fresh { "Spørsmål>" } else { "Oppfølging>" });
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();

        match line {
            "" => {}
            "exit" | "quit" => break,
            "/new" => {
                handle.reset().await?;
                fresh = true;
                println!("Ny samtale.");
            }
            "/history" => {
                let state = handle.state();
                if state.history.is_empty() {
                    println!("Ingen tidligere spørsmål.");
                }
                for (i, question) in state.history.iter().enumerate() {
                    println!("{:>3}. {question}", i + 1);
                }
            }
            "/sources" => print_sources(&handle.state(), None),
            question => {
                ask(handle, question, fresh).await?;
                fresh = false;
            }
        }
    }
    Ok(())
}

/// Ask and echo the answer until the stream settles
async fn ask(
    handle: &ControllerHandle,
    question: &str,
    fresh: bool,
) -> Result<SessionState, Box<dyn std::error::Error>> {
    let mut updates = WatchStream::from_changes(handle.subscribe());
    if fresh {
        handle.search(question).await?;
    } else {
        handle.ask(question).await?;
    }

    let current = handle.state();
    let mut render = Render::new(&current);
    render.update(&current);

    while !render.settled {
        let Some(state) = updates.next().await else {
            break;
        };
        render.update(&state);
    }
    println!();

    let state = handle.state();
    if let Some(turn) = state.conversation.last().filter(|t| !t.is_human) {
        print_sources(&state, Some(&turn.sources));
    }
    Ok(state)
}

/// Prints what changed between snapshots of one answer
struct Render {
    turn_id: Option<u64>,
    printed: usize,
    narrated: usize,
    settled: bool,
}

impl Render {
    fn new(state: &SessionState) -> Self {
        Self {
            turn_id: state.conversation.last().filter(|t| !t.is_human).map(|t| t.id),
            printed: 0,
            narrated: 0,
            settled: false,
        }
    }

    fn update(&mut self, state: &SessionState) {
        if state.status_messages.len() < self.narrated {
            self.narrated = 0;
        }
        for message in state.status_messages.iter().skip(self.narrated) {
            if state.status != Status::Error {
                eprintln!("  · {message}");
            }
        }
        self.narrated = state.status_messages.len();

        if let Some(turn) = self.turn_id.and_then(|id| state.turn(id)) {
            if turn.content.len() < self.printed {
                // retry cleared the partial answer
                println!();
                self.printed = 0;
            }
            if let Some(delta) = turn.content.get(self.printed..) {
                print!("{delta}");
                let _ = std::io::stdout().flush();
            }
            self.printed = turn.content.len();
        }

        match state.status {
            Status::Streaming => {}
            Status::Error => {
                if let Some(error) = &state.error {
                    eprintln!("\n{error}");
                }
                self.settled = true;
            }
            Status::Idle | Status::Done => self.settled = true,
        }
    }
}

fn print_sources(state: &SessionState, only: Option<&[String]>) {
    let names: Vec<&String> = match only {
        Some(names) => names.iter().collect(),
        None => state.sources.keys().collect(),
    };
    if names.is_empty() {
        return;
    }

    println!("\nKilder:");
    for name in names {
        let Some(source) = state.sources.get(name) else {
            continue;
        };
        match &source.url {
            Some(url) => println!("  - {name} <{url}>"),
            None => println!("  - {name}"),
        }
        if let Some(category) = &source.category {
            println!("    {category}");
        }
        if let Some(updated) = source.updated_at {
            println!("    Oppdatert {}", updated.format("%Y-%m-%d"));
        }
    }
}
