use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

use fluey::config::{AppConfig, APP_NAME};
use fluey::services::{ChatEvent, Database, SessionController};

const HELP: &str = "\
/new            start an empty chat
/list           list chats, newest first
/open <n>       switch to chat n from /list
/retry          retry the last failed reply
/fail <text>    send text and force the reply to fail
/stop           stop the reply in progress
/toggle         switch between live and simulated replies
/delete         delete the current chat
/clear          delete every chat
/quit           exit";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let db = Arc::new(Database::new().await?);
    let controller = SessionController::bootstrap(&AppConfig::from_env(), db).await;

    tokio::spawn(render_replies(controller.clone()));

    println!(
        "{} ({:?} replies). Type /help for commands.",
        APP_NAME,
        controller.response_source()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let (command, arg) = line.split_once(' ').unwrap_or((line, ""));
        match command {
            "/quit" => break,
            "/help" => println!("{}", HELP),
            "/new" => {
                controller.create_session(None).await;
            }
            "/list" => {
                let active = controller.active_session_id();
                for (i, session) in controller.sessions().iter().enumerate() {
                    let marker = if active.as_deref() == Some(session.id.as_str()) {
                        "*"
                    } else {
                        " "
                    };
                    println!(
                        "{} {:>2}. {} ({} messages)",
                        marker,
                        i + 1,
                        session.title,
                        session.messages.len()
                    );
                }
            }
            "/open" => {
                let picked = arg
                    .trim()
                    .parse::<usize>()
                    .ok()
                    .and_then(|n| controller.sessions().get(n.wrapping_sub(1)).cloned());
                match picked {
                    Some(session) => {
                        if let Some(current) = controller.active_session_id() {
                            controller.detach(&current).await;
                        }
                        for message in &session.messages {
                            let who = if message.is_user { "you" } else { "ai" };
                            println!("{}> {}", who, message.text);
                        }
                        controller.attach(&session.id).await;
                    }
                    None => println!("No such chat"),
                }
            }
            "/retry" => {
                let failed = controller.active_session_id().and_then(|id| {
                    controller
                        .messages(&id)
                        .into_iter()
                        .rev()
                        .find(|m| m.failed)
                        .map(|m| (id, m.id))
                });
                match failed {
                    Some((session_id, message_id)) => {
                        spawn_retry(&controller, session_id, message_id);
                    }
                    None => println!("Nothing to retry"),
                }
            }
            "/stop" => {
                if let Some(id) = controller.active_session_id() {
                    controller.stop_generation(&id).await;
                }
            }
            "/toggle" => {
                let source = controller.toggle_response_source().await;
                println!("Now using {:?} replies", source);
            }
            "/clear" => {
                controller.clear_all_sessions().await;
                println!("All chats deleted");
            }
            "/delete" => {
                if let Some(id) = controller.active_session_id() {
                    controller.delete_session(&id).await;
                }
            }
            "/fail" => send(&controller, arg, true).await,
            _ if command.starts_with('/') => println!("Unknown command, try /help"),
            _ => send(&controller, line, false).await,
        }
    }

    Ok(())
}

/// First message of a fresh chat goes through the attach path, like the
/// home screen does.
async fn send(controller: &SessionController, text: &str, force_fail: bool) {
    let session_id = match controller.active_session_id() {
        Some(id) => id,
        None if !force_fail => {
            let id = controller.create_session(Some(text)).await;
            let controller = controller.clone();
            tokio::spawn(async move { controller.attach(&id).await });
            return;
        }
        None => controller.create_session(None).await,
    };

    if controller.is_streaming(&session_id) {
        println!("Still replying, /stop first");
        return;
    }

    let controller = controller.clone();
    let text = text.to_string();
    tokio::spawn(async move { controller.send_message(&session_id, &text, force_fail).await });
}

fn spawn_retry(controller: &SessionController, session_id: String, message_id: String) {
    let controller = controller.clone();
    tokio::spawn(async move { controller.retry(&session_id, &message_id).await });
}

/// Print assistant text as it streams in.
async fn render_replies(controller: SessionController) {
    let mut events = controller.subscribe();
    let mut printed: HashMap<String, usize> = HashMap::new();
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!("Renderer skipped {} events", skipped);
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        match event {
            ChatEvent::MessageUpdated {
                session_id,
                message,
            } if !message.is_user => {
                let done = printed.entry(message.id.clone()).or_insert(0);
                if *done == 0 && !message.text.is_empty() {
                    print!("ai> ");
                }
                if let Some(delta) = message.text.get(*done..) {
                    print!("{}", delta);
                    *done = message.text.len();
                }
                if message.failed {
                    println!("[reply failed, /retry to try again]");
                    printed.remove(&message.id);
                } else if !message.is_streaming {
                    match controller.last_response(&session_id) {
                        Some(response) => println!("\n  (via {})", response.provider_label()),
                        None => println!(),
                    }
                    printed.remove(&message.id);
                }
                let _ = std::io::stdout().flush();
            }
            ChatEvent::TitleUpdated { title, .. } => println!("[{}]", title),
            _ => {}
        }
    }
}
