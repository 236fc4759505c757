use anyhow::Result;
use confab::config::ConfabConfig;
use confab::gateway::Gateways;
use confab::history::MemoryTurnLog;
use confab::pipeline::InputPayload;
use confab::profile::{PersonalityProfile, StaticProfileStore};
use confab::session::{SessionEvent, SessionManager};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "confab=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting confab conversation core demo");

    let profiles = StaticProfileStore::new();
    let profile = PersonalityProfile::new("default", "You are a concise voice assistant.")
        .with_voice("en-default")
        .with_greeting("Hello! How can I help?");
    profiles.register(profile.clone());

    let manager = SessionManager::new(
        ConfabConfig::default(),
        Gateways::loopback(),
        Arc::new(profiles),
        Arc::new(MemoryTurnLog::new()),
    )?;

    let session_id = manager.start_session("default", false).await?;
    if let Some(greeting) = &profile.greeting {
        println!("[assistant] {greeting}");
    }

    let mut events = manager.subscribe(session_id)?;
    let printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                SessionEvent::StateChanged { from, to } => {
                    info!("state: {from} -> {to}");
                }
                SessionEvent::ResponseDelta { text, .. } => {
                    print!("{text}");
                }
                SessionEvent::OutputChunk { seq, audio, .. } => {
                    info!("audio chunk {seq}: {} bytes", audio.len());
                }
                SessionEvent::TurnCompleted { .. } => {
                    println!();
                    break;
                }
                SessionEvent::TurnFailed { cause, detail, .. } => {
                    println!();
                    eprintln!("turn failed ({cause}): {detail}");
                    break;
                }
                _ => {}
            }
        }
    });

    manager
        .submit_input(session_id, InputPayload::Text("What's the weather like?".into()))
        .await?;

    printer.await?;
    manager.close_session(session_id).await?;
    info!("demo finished");
    Ok(())
}
