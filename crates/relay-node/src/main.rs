//! # Relay Node
//!
//! Runs a lobby server and a client on two connected in-memory endpoints.
//!
//! ## Startup Sequence
//!
//! 1. Initialize logging from `RELAY_*` environment variables
//! 2. Load and validate `RelayConfig`
//! 3. Connect the endpoints and spawn their dispatch loops
//! 4. Serve `enter` on the server, watch `status` on the client
//! 5. Join the lobby, then close both endpoints

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use parking_lot::Mutex;
use relay_bus::InMemoryTransport;
use relay_core::{spawn_expiry_task, ChannelRegistry, RelayConfig, ReplyEnvelope};
use relay_telemetry::{init_logging, relay_span, TelemetryConfig};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::oneshot;
use tracing::{info, warn};

/// Lobby capacity.
const MAX_PLAYERS: usize = 4;

#[derive(Debug, Serialize, Deserialize)]
struct Enter {
    name: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Welcome {
    seat: usize,
    players: Vec<String>,
}

/// Players currently seated.
#[derive(Default)]
struct Lobby {
    players: Mutex<Vec<String>>,
}

impl Lobby {
    fn seat(&self, name: &str) -> std::result::Result<Welcome, String> {
        let mut players = self.players.lock();
        if players.iter().any(|p| p == name) {
            return Err(format!("{name} is already seated"));
        }
        if players.len() >= MAX_PLAYERS {
            return Err("lobby is full".to_string());
        }
        players.push(name.to_string());
        Ok(Welcome {
            seat: players.len(),
            players: players.clone(),
        })
    }
}

/// Answer `enter` requests: seat the player or fail when full or duplicate.
///
/// Every change is announced on `status`.
fn serve_lobby(registry: &ChannelRegistry) -> Result<()> {
    let lobby = registry.add_request("enter")?;
    let status = registry.add_watcher("status")?;
    let lobby_state = Arc::new(Lobby::default());

    lobby.on_request("enter", move |engine, request| {
        let _span = relay_span!(
            "serve",
            subject = %request.subject,
            correlation_id = %request.correlation_id
        )
        .entered();

        let enter = match request.data_as::<Enter>() {
            Ok(enter) => enter,
            Err(e) => {
                engine.respond_fail(&request, format!("invalid enter request: {e}"));
                return;
            }
        };

        match lobby_state.seat(&enter.name) {
            Ok(welcome) => {
                info!(name = %enter.name, seat = welcome.seat, "Player seated");
                status.emit(json!({"players": welcome.players.len()}));
                engine.respond_success(&request, json!(welcome));
            }
            Err(reason) => {
                warn!(name = %enter.name, %reason, "Player rejected");
                engine.respond_fail(&request, reason);
            }
        }
    });
    Ok(())
}

/// Send `enter` and wait for the reply.
async fn join(registry: &ChannelRegistry, name: &str, wait: Duration) -> Result<ReplyEnvelope> {
    let (tx, rx) = oneshot::channel();
    let _handle = registry
        .request("enter")
        .context("enter request not registered")?
        .send_typed("enter", &Enter { name: name.to_string() })?
        .done(move |reply| {
            let _ = tx.send(reply.clone());
        });

    tokio::time::timeout(wait, rx)
        .await
        .context("no reply to enter")?
        .context("enter request dropped")
}

// Single-threaded: callbacks are bound before any dispatch loop can run.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    init_logging(&TelemetryConfig::from_env())?;

    let config = RelayConfig::from_env();
    config.validate()?;
    info!(
        separator = %config.reply_separator,
        timeout = ?config.request_timeout,
        "Relay configuration loaded"
    );

    let (client, server) = InMemoryTransport::pair("client", "server");
    let client_loop = tokio::spawn(client.clone().run());
    let server_loop = tokio::spawn(server.clone().run());

    let server_registry = ChannelRegistry::new(server.clone(), config.clone());
    serve_lobby(&server_registry)?;

    let client_registry = ChannelRegistry::new(client.clone(), config.clone());
    client_registry
        .add_watcher("status")?
        .listen(|payload| info!(status = %payload, "Lobby status"))
        .error(|payload| warn!(status = %payload, "Lobby status failure"));
    let enter = client_registry.add_request("enter")?;
    let _sweeper = spawn_expiry_task(&enter);

    let wait = config.request_timeout.unwrap_or(Duration::from_secs(5));
    for name in ["bob", "alice", "bob"] {
        let reply = join(&client_registry, name, wait).await?;
        match reply.outcome() {
            relay_core::Outcome::Success => {
                let welcome: Welcome = reply.data_as()?;
                info!(name, seat = welcome.seat, players = ?welcome.players, "Joined lobby");
            }
            relay_core::Outcome::Failure => {
                warn!(name, reason = ?reply.message, "Join refused");
            }
        }
    }

    let stats = enter.stats();
    info!(
        sent = stats.total_sent.load(std::sync::atomic::Ordering::Relaxed),
        pending = enter.pending_count(),
        "Shutting down"
    );

    client.close();
    server.close();
    client_loop.await?;
    server_loop.await?;

    if enter.pending_count() > 0 {
        bail!("{} requests left unanswered", enter.pending_count());
    }
    Ok(())
}
