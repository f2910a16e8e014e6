use civic_chat::config::ChatConfig;
use civic_chat::models::{Message, WordLimit};
use civic_chat::services::{
    ChatDeps, ChatSession, ChatSnapshot, CitationPolicy, FileLedgerStorage, HttpGateway,
    RestStore, TurnOutcome, UsageBus, UsageMeter,
};
use service_core::observability::init_tracing;
use service_core::retry::RetryConfig;
use std::io::Write;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;

fn startup_error(what: &str, e: impl std::fmt::Display) -> std::io::Error {
    tracing::error!("{}: {}", what, e);
    std::io::Error::other(format!("{}: {}", what, e))
}

/// Print whatever part of the reply has not been printed yet.
fn print_progress(
    updates: &mut watch::Receiver<ChatSnapshot>,
    message_id: &str,
    printed: &mut String,
) -> std::io::Result<()> {
    let text = {
        let snapshot = updates.borrow_and_update();
        snapshot
            .messages
            .iter()
            .find(|m| m.id == message_id)
            .map(|m| m.display_text().to_string())
    };

    if let Some(text) = text {
        if let Some(rest) = text.strip_prefix(printed.as_str()).filter(|r| !r.is_empty()) {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(rest.as_bytes())?;
            stdout.flush()?;
            *printed = text;
        }
    }
    Ok(())
}

fn print_final(message: &Message, printed: &str) -> std::io::Result<()> {
    let mut stdout = std::io::stdout().lock();
    match message.content.strip_prefix(printed) {
        Some(rest) => stdout.write_all(rest.as_bytes())?,
        // The reply was replaced, e.g. by an apology after a failed stream.
        None => write!(stdout, "\n{}", message.content)?,
    }
    writeln!(stdout)?;

    if !message.citations.is_empty() {
        writeln!(stdout, "\nSources:")?;
        for citation in &message.citations {
            writeln!(stdout, "  - {} <{}>", citation.title, citation.url)?;
        }
    }
    if let Some(report) = &message.citation_report {
        for warning in &report.warnings {
            writeln!(stdout, "  ! {}", warning)?;
        }
    }
    stdout.flush()
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let config = ChatConfig::load().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        std::io::Error::other(format!("Configuration error: {}", e))
    })?;

    init_tracing(
        "civic-chat",
        &config.common.log_level,
        config.common.log_format,
    );

    let prompt = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    if prompt.trim().is_empty() {
        eprintln!("usage: civic-chat <question>");
        return Err(std::io::Error::other("no question given"));
    }

    let gateway = HttpGateway::new(&config.backend, config.gateway.clone())
        .map_err(|e| startup_error("Failed to create gateway client", e))?;
    tracing::info!(
        endpoint = %gateway.endpoint(),
        model = %config.gateway.model,
        "Initialized gateway client"
    );

    let store = RestStore::new(&config.backend)
        .map_err(|e| startup_error("Failed to create store client", e))?;

    let storage = FileLedgerStorage::new(&config.usage.storage_dir)
        .map_err(|e| startup_error("Failed to open usage storage", e))?;
    let meter = Arc::new(UsageMeter::new(
        Arc::new(storage),
        UsageBus::shared(),
        config.user.profile(),
        &config.usage.admin_emails,
    ));
    let ledger = meter
        .load()
        .await
        .map_err(|e| startup_error("Failed to load usage ledger", e))?;
    tracing::info!(
        user_id = %config.user.user_id,
        words_used = ledger.words_used,
        limit = ?meter.limit(),
        "Loaded usage ledger"
    );

    let citations = CitationPolicy::new(&config.citations)
        .map_err(|e| startup_error("Failed to build citation policy", e))?;

    let session = ChatSession::open(
        ChatDeps {
            gateway: Arc::new(gateway),
            store: Arc::new(store),
            meter: Arc::clone(&meter),
            citations,
            retry: RetryConfig::default(),
        },
        config.user.user_id.clone(),
        None,
        config.chat.clone(),
    );
    if let Err(e) = session.initialize().await {
        tracing::warn!(error = %e, "Session initialization failed");
    }

    let mut updates = session.subscribe();
    let turn = match session.send(&prompt).await {
        Ok(turn) => turn,
        Err(e) => {
            eprintln!("{}", e);
            session.close().await;
            return Err(std::io::Error::other(e.to_string()));
        }
    };
    let message_id = turn.message_id().to_string();

    let mut printed = String::new();
    let wait = turn.wait();
    tokio::pin!(wait);
    let outcome = loop {
        tokio::select! {
            outcome = &mut wait => break outcome,
            changed = updates.changed() => {
                if changed.is_err() {
                    break TurnOutcome::Cancelled;
                }
                print_progress(&mut updates, &message_id, &mut printed)?;
            }
            interrupted = signal::ctrl_c() => {
                if interrupted.is_ok() {
                    tracing::info!("Interrupted, stopping reply");
                    session.stop().await;
                }
            }
        }
    };

    if let Some(message) = session.messages().into_iter().find(|m| m.id == message_id) {
        print_final(&message, &printed)?;
    }

    match meter.remaining() {
        WordLimit::Limited(words) => tracing::info!(?outcome, remaining = words, "Reply finished"),
        WordLimit::Unlimited => tracing::info!(?outcome, "Reply finished"),
    }

    session.close().await;
    Ok(())
}
