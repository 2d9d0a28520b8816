use std::collections::HashMap;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;

use mojolink_lib::config::{AUTH_MODE_ENV, CONNECT_TIMEOUT_ENV, TOKEN_ENV, URL_ENV};
use mojolink_lib::{init_tracing, Message, SessionConfig, SessionManager, SessionSnapshot};

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(error) = run().await {
        eprintln!("mojolink failed: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), String> {
    let mut overrides: HashMap<&'static str, String> = HashMap::new();
    let mut prompt: Option<String> = None;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--help" || arg == "-h" {
            print_help();
            return Ok(());
        }

        let (flag, inline) = match arg.split_once('=') {
            Some((flag, value)) if flag.starts_with("--") => (flag.to_string(), Some(value.to_string())),
            _ => (arg.clone(), None),
        };

        if flag == "--query-auth" {
            overrides.insert(AUTH_MODE_ENV, "query".to_string());
            continue;
        }

        let key = match flag.as_str() {
            "--url" => Some(URL_ENV),
            "--token" => Some(TOKEN_ENV),
            "--timeout" => Some(CONNECT_TIMEOUT_ENV),
            "--prompt" => None,
            _ => return Err(format!("unknown argument: {arg}")),
        };
        let value = match inline {
            Some(value) => value,
            None => args
                .next()
                .ok_or_else(|| format!("{flag} requires a value"))?,
        };
        match key {
            Some(key) => {
                overrides.insert(key, value);
            }
            None => prompt = Some(value),
        }
    }

    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            tracing::warn!("ignoring unreadable .env file: {e}");
        }
    }
    let mut config = SessionConfig::from_lookup(|key| {
        overrides
            .get(key)
            .cloned()
            .or_else(|| std::env::var(key).ok())
    })
    .map_err(|error| format!("{error} (pass --url or set {URL_ENV})"))?
    .with_auto_connect(true);
    if let Some(prompt) = prompt {
        config = config.with_initial_prompt(prompt);
    }

    let mut manager = SessionManager::websocket();
    let printer = tokio::spawn(print_updates(manager.watch()));

    manager
        .init(config)
        .await
        .map_err(|error| format!("could not connect: {error}"))?;
    println!("Connected. Type a message, /clear, /reconnect or /quit.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.map_err(|error| format!("failed to read stdin: {error}"))?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };
        let line = line.trim();

        match line {
            "" => {}
            "/quit" => break,
            "/clear" => manager.clear_messages(),
            "/reconnect" => {
                manager.disconnect();
                if let Err(error) = manager.connect().await {
                    eprintln!("reconnect failed: {error}");
                }
            }
            text => {
                if let Err(error) = manager.send_user_text(text) {
                    eprintln!("not sent: {error}");
                }
            }
        }
    }

    manager.teardown();
    drop(manager);
    if let Err(e) = printer.await {
        tracing::debug!("printer task ended abnormally: {e}");
    }
    Ok(())
}

/// Print new log entries and connection changes until the manager goes away.
async fn print_updates(mut updates: watch::Receiver<SessionSnapshot>) {
    let mut cursor = LogCursor::default();
    let mut connected = false;
    let mut last_error: Option<String> = None;

    while updates.changed().await.is_ok() {
        let snapshot = updates.borrow_and_update().clone();

        if snapshot.is_connected != connected {
            connected = snapshot.is_connected;
            println!("[{}]", if connected { "connected" } else { "disconnected" });
        }
        if snapshot.error.is_some() && snapshot.error != last_error {
            println!("[error] {}", snapshot.error.as_deref().unwrap_or_default());
        }
        last_error = snapshot.error.clone();

        let (cleared, fresh) = cursor.advance(&snapshot);
        if cleared {
            println!("[log cleared]");
        }
        for message in fresh {
            let who = if message.is_from_user() { "you" } else { message.kind() };
            println!("{who:>18} | {}", message.display_text());
            if let Some(url) = message.preview_url() {
                println!("{:>18} | preview: {url}", "");
            }
        }
    }
}

/// Position in the message log of the last snapshot printed.
#[derive(Debug, Default)]
struct LogCursor {
    printed: usize,
    clear_count: u64,
}

impl LogCursor {
    /// Entries not printed yet, and whether the log was cleared since the
    /// previous call. Snapshots may coalesce a clear with later appends.
    fn advance<'a>(&mut self, snapshot: &'a SessionSnapshot) -> (bool, &'a [Message]) {
        let cleared = snapshot.clear_count != self.clear_count;
        if cleared {
            self.clear_count = snapshot.clear_count;
            self.printed = 0;
        }
        let start = self.printed.min(snapshot.messages.len());
        self.printed = snapshot.messages.len();
        (cleared, &snapshot.messages[start..])
    }
}

fn print_help() {
    println!("MojoCode agent terminal client");
    println!();
    println!("Usage:");
    println!("  cargo run --bin mojolink -- [options]");
    println!();
    println!("Options:");
    println!("  --url <ws-url>          Agent endpoint (default: ${URL_ENV})");
    println!("  --token <token>         Auth token (default: ${TOKEN_ENV})");
    println!("  --timeout <secs>        Handshake timeout (default: 15)");
    println!("  --prompt <text>         Send this prompt once connected");
    println!("  --query-auth            Send the token as a query parameter");
    println!();
    println!("Commands:");
    println!("  /clear      Clear the message log");
    println!("  /reconnect  Drop and re-open the connection");
    println!("  /quit       Disconnect and exit");
}
