use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use claire_client::shell::{self, TranscriptPrinter};
use claire_client::{
    AudioState, Config, DeviceOutput, ExchangeState, Interrupted, RagClient, Role,
    SessionDirectory, SessionUpdate, Speaker, SpeechClient, SubmitOutcome, TurnController,
    build_http_client,
};

/// ClAire - ask questions about your notes and hear the answers
#[derive(Parser)]
#[command(name = "claire", version, about)]
struct Cli {
    /// Backend base URL
    #[arg(long, env = "CLAIRE_API_URL")]
    api_url: Option<String>,

    /// Config file (defaults to <config dir>/claire/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Never read answers aloud
    #[arg(long)]
    disable_voice: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List sessions
    Sessions,
    /// Show a session and its conversations
    Show { session: String },
    /// Create a session
    Create {
        name: String,
        #[arg(short, long)]
        description: Option<String>,
    },
    /// Rename a session or change its description
    Rename {
        session: String,
        #[arg(short, long)]
        name: Option<String>,
        #[arg(short, long)]
        description: Option<String>,
    },
    /// Delete a session
    Delete { session: String },
    /// Delete every session
    DeleteAll {
        /// Required; there is no undo
        #[arg(long)]
        yes: bool,
    },
    /// Add a conversation to a session from a text file, or stdin with "-"
    Add { session: String, file: PathBuf },
    /// Print a conversation's text
    Read { session: String, conversation: String },
    /// Delete a conversation
    Remove { session: String, conversation: String },
    /// Ask a single question
    Ask {
        session: String,
        query: String,
        /// Print the answer only once it is complete
        #[arg(long)]
        no_stream: bool,
    },
    /// Interactive chat about a session (/speak, /stop, /quit)
    Chat {
        session: String,
        #[arg(long)]
        no_stream: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn,claire_client=info",
        1 => "info,claire_client=debug",
        2 => "debug",
        _ => "trace",
    };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(api_url) = cli.api_url.as_deref() {
        config = config.with_api_url(api_url)?;
    }
    if cli.disable_voice {
        config = config.without_voice();
    }
    tracing::debug!(?config, "loaded configuration");

    let client = build_http_client(config.connect_timeout)?;
    let directory = SessionDirectory::new(
        client.clone(),
        &config.api_url,
        config.content_cache_entries,
    );
    let mut stdout = std::io::stdout();

    match cli.command {
        Command::Sessions => {
            let sessions = directory.list_sessions().await?;
            shell::write_sessions(&mut stdout, &sessions)?;
        }
        Command::Show { session } => {
            let session = directory.get_session(&session).await?;
            shell::write_session(&mut stdout, &session)?;
        }
        Command::Create { name, description } => {
            let session = directory
                .create_session(&name, description.as_deref())
                .await?;
            println!("Created session {} ({})", session.name, session.session_id);
        }
        Command::Rename {
            session,
            name,
            description,
        } => {
            let update = SessionUpdate { name, description };
            if update.is_empty() {
                anyhow::bail!("nothing to change: pass --name and/or --description");
            }
            let session = directory.update_session(&session, &update).await?;
            println!("Updated session {} ({})", session.name, session.session_id);
        }
        Command::Delete { session } => {
            directory.delete_session(&session).await?;
            println!("Deleted session {session}");
        }
        Command::DeleteAll { yes } => {
            if !yes {
                anyhow::bail!("refusing to delete every session without --yes");
            }
            let message = directory.delete_all_sessions().await?;
            println!("{message}");
        }
        Command::Add { session, file } => {
            let text = if file.as_os_str() == "-" {
                std::io::read_to_string(std::io::stdin())?
            } else {
                std::fs::read_to_string(&file)?
            };
            let conversation = directory.add_conversation(&session, &text).await?;
            println!(
                "Added conversation {} [{}]",
                conversation.conversation_id, conversation.status
            );
        }
        Command::Read {
            session,
            conversation,
        } => {
            let text = directory
                .conversation_content(&session, &conversation)
                .await?;
            println!("{text}");
        }
        Command::Remove {
            session,
            conversation,
        } => {
            directory.delete_conversation(&session, &conversation).await?;
            println!("Deleted conversation {conversation}");
        }
        Command::Ask {
            session,
            query,
            no_stream,
        } => {
            let controller = build_controller(&config, client, no_stream);
            ask(&controller, &session, &query).await?;
        }
        Command::Chat { session, no_stream } => {
            let controller = build_controller(&config, client, no_stream);
            chat(&controller, &session).await?;
        }
    }

    Ok(())
}

fn build_controller(
    config: &Config,
    client: reqwest::Client,
    no_stream: bool,
) -> Arc<TurnController> {
    let answers = Arc::new(RagClient::new(client.clone(), &config.api_url));
    let mut controller =
        TurnController::new(answers).with_streaming(config.streaming && !no_stream);

    if config.voice.enabled {
        let synthesizer = Arc::new(SpeechClient::with_voice(
            client,
            &config.api_url,
            &config.voice.voice_id,
        ));
        let output = Arc::new(DeviceOutput::new());
        controller = controller.with_speaker(Speaker::new(synthesizer, output));
    }

    Arc::new(controller)
}

/// Print snapshots as they are published until `stop` fires
fn spawn_renderer(controller: &TurnController, stop: CancellationToken) -> JoinHandle<()> {
    let rx = controller.subscribe();

    tokio::spawn(async move {
        let mut printer = TranscriptPrinter::new(std::io::stdout());
        let mut snapshots = WatchStream::new(rx.clone());

        loop {
            tokio::select! {
                () = stop.cancelled() => break,
                next = snapshots.next() => match next {
                    Some(snapshot) => {
                        if let Err(e) = printer.render(&snapshot) {
                            tracing::warn!(error = %e, "failed to write transcript");
                        }
                    }
                    None => break,
                },
            }
        }

        let last = rx.borrow().clone();
        if let Err(e) = printer.render(&last) {
            tracing::warn!(error = %e, "failed to write transcript");
        }
    })
}

/// Route Ctrl-C to the controller until `quit` fires
///
/// A press cancels the streaming answer, else stops the audio. With nothing
/// left to stop it cancels `quit`.
fn spawn_interrupts(controller: Arc<TurnController>, quit: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = quit.cancelled() => break,
                signal = tokio::signal::ctrl_c() => {
                    if let Err(e) = signal {
                        tracing::warn!(error = %e, "failed to listen for Ctrl-C");
                        break;
                    }

                    match controller.interrupt().await {
                        Interrupted::Exchange => tracing::info!("cancelling answer"),
                        Interrupted::Audio => tracing::info!("audio stopped"),
                        Interrupted::Nothing => {
                            quit.cancel();
                            break;
                        }
                    }
                }
            }
        }
    })
}

async fn ask(controller: &Arc<TurnController>, session: &str, query: &str) -> anyhow::Result<()> {
    controller.select_session(Some(session)).await;

    let stop = CancellationToken::new();
    let renderer = spawn_renderer(controller, stop.clone());
    let quit = CancellationToken::new();
    let interrupts = spawn_interrupts(Arc::clone(controller), quit.clone());

    let outcome = controller.submit(query).await;

    // Let the answer finish playing; Ctrl-C cuts it short
    let mut rx = controller.subscribe();
    tokio::select! {
        _ = rx.wait_for(|s| s.audio == AudioState::Idle && s.phase == ExchangeState::Idle) => {}
        () = quit.cancelled() => {}
    }
    controller.shutdown().await;

    quit.cancel();
    interrupts.await?;
    stop.cancel();
    renderer.await?;

    match outcome {
        SubmitOutcome::Failed { error, .. } => anyhow::bail!("answer failed: {error}"),
        SubmitOutcome::Ignored => anyhow::bail!("empty question"),
        _ => Ok(()),
    }
}

/// Read stdin lines on a plain thread
///
/// A blocking read parked on the runtime's pool would hold up shutdown
/// after Ctrl-C; a detached thread does not.
fn spawn_stdin_lines() -> std::io::Result<mpsc::UnboundedReceiver<std::io::Result<String>>> {
    let (tx, rx) = mpsc::unbounded_channel();

    std::thread::Builder::new()
        .name("claire-stdin".to_string())
        .spawn(move || {
            for line in std::io::stdin().lines() {
                if tx.send(line).is_err() {
                    break;
                }
            }
        })?;

    Ok(rx)
}

async fn chat(controller: &Arc<TurnController>, session: &str) -> anyhow::Result<()> {
    controller.select_session(Some(session)).await;

    let stop = CancellationToken::new();
    let renderer = spawn_renderer(controller, stop.clone());
    let quit = CancellationToken::new();
    let interrupts = spawn_interrupts(Arc::clone(controller), quit.clone());
    let mut lines = spawn_stdin_lines()?;

    loop {
        let line = tokio::select! {
            () = quit.cancelled() => break,
            line = lines.recv() => match line {
                Some(line) => line?,
                None => break,
            },
        };
        let line = line.trim();

        match line {
            "" => {}
            "/quit" | "/exit" => break,
            "/stop" => {
                controller.stop_audio().await;
            }
            "/speak" => {
                let last = controller
                    .snapshot()
                    .turns
                    .iter()
                    .rev()
                    .find(|t| t.role == Role::Assistant && t.complete && !t.failed)
                    .map(|t| t.id);

                match last {
                    Some(id) if controller.speak_turn(id).await => {}
                    Some(_) => eprintln!("voice output is disabled"),
                    None => eprintln!("no answer to read yet"),
                }
            }
            query => {
                if controller.submit(query).await == SubmitOutcome::Rejected {
                    eprintln!("still answering the previous question");
                }
            }
        }
    }

    controller.shutdown().await;
    quit.cancel();
    interrupts.await?;
    stop.cancel();
    renderer.await?;
    Ok(())
}
