//! Operator console: one command per line on the master's stdin.

use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::{info, warn};

use idlebot_common::models::{parse_game_list, AccountSnapshot};
use idlebot_core::orchestrator::OrchestratorHandle;
use idlebot_core::repositories::AccountRepository;

const HELP: &str = "\
Commands:
  list
  add <user> <password> [game ids...]
  start <user>
  stop <user>
  code <user> <code>
  settings <user> [games=<ids,...>] [title=<text>|none] [secret=<b64>|none] [offline=on|off] [accept=on|off]
  help
  quit

In title=, underscores stand for spaces (title=Just_idling).";

/// What the caller should do after a command ran.
#[derive(Debug, PartialEq, Eq)]
pub enum ConsoleOutcome {
    Reply(String),
    Quit,
}

/// Parses and executes one console line.
pub async fn handle_command(
    line: &str,
    orchestrator: &OrchestratorHandle,
    repo: &dyn AccountRepository,
) -> ConsoleOutcome {
    let args: Vec<&str> = line.split_whitespace().collect();
    let Some((cmd, rest)) = args.split_first() else {
        return ConsoleOutcome::Reply(String::new());
    };

    let reply = match (cmd.to_lowercase().as_str(), rest) {
        ("quit" | "exit", _) => return ConsoleOutcome::Quit,
        ("help", _) => HELP.to_string(),
        ("list", _) => match orchestrator.list_accounts().await {
            Ok(accounts) if accounts.is_empty() => "No accounts.".to_string(),
            Ok(accounts) => accounts.iter().map(format_snapshot).collect::<Vec<_>>().join("\n"),
            Err(e) => format!("Error: {}", e),
        },
        ("add", [user, password, games @ ..]) => {
            let game_list = parse_game_list(&games.join(" "));
            match orchestrator.add_account(user, password, game_list).await {
                Ok(()) => format!("Added '{}' and started its worker.", user),
                Err(e) => format!("Error adding '{}': {}", user, e),
            }
        }
        ("start", [user]) => match orchestrator.start(user).await {
            Ok(()) => format!("Start sent to '{}'.", user),
            Err(e) => format!("Error: {}", e),
        },
        ("stop", [user]) => match orchestrator.stop(user).await {
            Ok(()) => format!("Stop sent to '{}'.", user),
            Err(e) => format!("Error: {}", e),
        },
        ("code", [user, code]) => match orchestrator.supply_challenge_code(user, code).await {
            Ok(()) => format!("Code forwarded to '{}'.", user),
            Err(e) => format!("Error: {}", e),
        },
        ("settings", [user, assignments @ ..]) => {
            update_settings(orchestrator, repo, user, assignments).await
        }
        _ => format!("Unrecognized or incomplete command: '{}'. Type 'help'.", line.trim()),
    };
    ConsoleOutcome::Reply(reply)
}

async fn update_settings(
    orchestrator: &OrchestratorHandle,
    repo: &dyn AccountRepository,
    user: &str,
    assignments: &[&str],
) -> String {
    let record = match repo.get(user).await {
        Ok(Some(record)) => record,
        Ok(None) => return format!("Unknown account '{}'.", user),
        Err(e) => return format!("Error: {}", e),
    };

    let mut settings = record.settings;
    let mut game_list = record.game_list;
    for assignment in assignments {
        let Some((key, value)) = assignment.split_once('=') else {
            return format!("Expected key=value, got '{}'.", assignment);
        };
        let cleared = value.is_empty() || value == "none";
        match key {
            "games" => game_list = parse_game_list(value),
            "title" if cleared => settings.custom_activity_title = None,
            "title" => settings.custom_activity_title = Some(value.replace('_', " ")),
            "secret" if cleared => settings.shared_secret = None,
            "secret" => settings.shared_secret = Some(value.to_string()),
            "offline" => settings.appear_offline = value == "on",
            "accept" => settings.auto_accept_relations = value == "on",
            other => return format!("Unknown setting '{}'.", other),
        }
    }

    match orchestrator.update_settings(user, settings, game_list).await {
        Ok(()) => format!("Saved settings for '{}'. Stop and start it to apply.", user),
        Err(e) => format!("Error: {}", e),
    }
}

fn format_snapshot(s: &AccountSnapshot) -> String {
    let since = s
        .session_start_time
        .map(|t| format!(" since {}", t.format("%Y-%m-%d %H:%M:%S UTC")))
        .unwrap_or_default();
    let games = s.owned_games.as_ref().map(Vec::len).unwrap_or(0);
    let worker = s.worker_id.map(|id| format!("#{}", id)).unwrap_or_else(|| "-".to_string());
    format!("{:<20} {:<28} worker={} owned={}{}", s.username, s.status.to_string(), worker, games, since)
}

/// Reads commands from stdin until `quit`, EOF, or shutdown.
pub async fn run_console(
    orchestrator: OrchestratorHandle,
    repo: Arc<dyn AccountRepository>,
    quit_tx: watch::Sender<bool>,
) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("idlebot console ready. Type 'help' for commands.");

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                info!("[Console] stdin closed");
                break;
            }
            Err(e) => {
                warn!("[Console] read failed: {}", e);
                break;
            }
        };

        match handle_command(&line, &orchestrator, repo.as_ref()).await {
            ConsoleOutcome::Quit => {
                let _ = quit_tx.send(true);
                break;
            }
            ConsoleOutcome::Reply(reply) if reply.is_empty() => {}
            ConsoleOutcome::Reply(reply) => println!("{}", reply),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use idlebot_common::models::WorkerTuning;
    use idlebot_core::orchestrator::{InProcessSpawner, Orchestrator};
    use idlebot_core::test_utils::{setup_test_repository, test_encryptor, FakeConnector};

    async fn console() -> (OrchestratorHandle, Arc<dyn AccountRepository>) {
        let repo: Arc<dyn AccountRepository> = setup_test_repository().await.unwrap();
        let spawner = Arc::new(InProcessSpawner::new(Arc::new(FakeConnector::default())));
        let (orchestrator, handle) =
            Orchestrator::new(repo.clone(), test_encryptor(), spawner, WorkerTuning::default());
        orchestrator.spawn();
        (handle, repo)
    }

    async fn reply(line: &str, handle: &OrchestratorHandle, repo: &Arc<dyn AccountRepository>) -> String {
        match handle_command(line, handle, repo.as_ref()).await {
            ConsoleOutcome::Reply(text) => text,
            ConsoleOutcome::Quit => panic!("unexpected quit for '{line}'"),
        }
    }

    #[tokio::test]
    async fn add_then_list_shows_running_account() {
        let (handle, repo) = console().await;
        let added = reply("add alice hunter2 730 440", &handle, &repo).await;
        assert!(added.starts_with("Added 'alice'"), "{added}");

        let mut listing = String::new();
        for _ in 0..50 {
            listing = reply("list", &handle, &repo).await;
            if listing.contains("running") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(listing.contains("alice") && listing.contains("running"), "{listing}");
        assert!(!listing.contains("hunter2"));
    }

    #[tokio::test]
    async fn settings_merge_with_stored_values() {
        let (handle, repo) = console().await;
        reply("add bob pw 730", &handle, &repo).await;
        let saved = reply("settings bob offline=on title=Just_idling", &handle, &repo).await;
        assert!(saved.starts_with("Saved"), "{saved}");

        let record = repo.get("bob").await.unwrap().unwrap();
        assert!(record.settings.appear_offline);
        assert_eq!(record.settings.custom_activity_title.as_deref(), Some("Just idling"));
        assert_eq!(record.game_list.len(), 1);
    }

    #[tokio::test]
    async fn code_without_challenge_is_an_error() {
        let (handle, repo) = console().await;
        reply("add carol pw", &handle, &repo).await;
        let text = reply("code carol ABCDE", &handle, &repo).await;
        assert!(text.starts_with("Error"), "{text}");
    }

    #[tokio::test]
    async fn quit_and_unknown_commands() {
        let (handle, repo) = console().await;
        assert_eq!(handle_command("quit", &handle, repo.as_ref()).await, ConsoleOutcome::Quit);
        let text = reply("frobnicate", &handle, &repo).await;
        assert!(text.contains("Unrecognized"));
        assert!(reply("start", &handle, &repo).await.contains("incomplete"));
        assert!(reply("help", &handle, &repo).await.contains("underscores stand for spaces"));
    }
}
