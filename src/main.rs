//! Coworld Peer
//!
//! Joins the shared world on the local network, wanders around with a
//! random-walk intent and logs who else is there. Leaves cleanly on Ctrl+C or
//! SIGTERM.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use rand::Rng;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use coworld::game::motion::{LocalMotion, MoveIntent};
use coworld::game::peer::DEFAULT_DISPLAY_NAME;
use coworld::{PeerConfig, SyncEngine, UdpTransport, WorldObject, PROTOCOL_VERSION, VERSION};

/// How often the roster is logged
const ROSTER_INTERVAL: Duration = Duration::from_secs(5);

/// How long one wander direction is held
const WANDER_INTERVAL: Duration = Duration::from_secs(2);

/// How often the wanderer drops an object where it stands
const SPAWN_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration; logging verbosity depends on it
    let config = PeerConfig::load().await?;

    // Initialize logging
    init_logging(config.log_filter());

    info!("Coworld peer v{} (protocol v{})", VERSION, PROTOCOL_VERSION);
    if config.config_path.exists() {
        info!(
            "Configuration loaded from: {}",
            config.config_path.display()
        );
    } else {
        warn!(
            "Config file not found at {}, using defaults",
            config.config_path.display()
        );
    }

    let display_name = config
        .display_name
        .clone()
        .or_else(|| std::env::args().nth(1))
        .unwrap_or_else(|| DEFAULT_DISPLAY_NAME.to_string());

    let transport = Arc::new(UdpTransport::open(&config)?);
    let mut engine = SyncEngine::new(transport, config);

    let peer_id = engine.join(&display_name)?;
    info!(peer_id = %peer_id, name = %display_name, "Joined shared world");

    // Create shutdown channel
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let mut shutdown_rx = shutdown_tx.subscribe();
    tokio::spawn(wait_for_shutdown(shutdown_tx));

    let mut wanderer = Wanderer::default();
    engine
        .run_with(&mut shutdown_rx, |engine, dt| wanderer.frame(engine, dt))
        .await;

    info!("Peer shutdown complete. Goodbye!");
    Ok(())
}

/// Initialize the logging/tracing system
fn init_logging(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_level(true)
        .init();
}

/// Random-walk driver for the local pose
#[derive(Default)]
struct Wanderer {
    motion: LocalMotion,
    intent: MoveIntent,
    since_turn: Duration,
    since_spawn: Duration,
    since_roster: Duration,
}

impl Wanderer {
    fn frame(&mut self, engine: &mut SyncEngine, dt: Duration) {
        self.since_turn += dt;
        if self.since_turn >= WANDER_INTERVAL {
            self.since_turn = Duration::ZERO;
            self.intent = random_intent();
        }

        self.motion.step(&self.intent, dt);
        if let Err(e) = engine.set_local_pose(self.motion.position, self.motion.heading) {
            debug!(error = %e, "Pose not recorded");
        }

        self.since_spawn += dt;
        if self.since_spawn >= SPAWN_INTERVAL {
            self.since_spawn = Duration::ZERO;
            self.drop_object(engine);
        }

        self.since_roster += dt;
        if self.since_roster >= ROSTER_INTERVAL {
            self.since_roster = Duration::ZERO;
            log_roster(engine);
        }
    }

    fn drop_object(&self, engine: &mut SyncEngine) {
        let Some(owner) = engine.local_peer_id().cloned() else {
            return;
        };
        let mut position = self.motion.position;
        position.y = 0.5;

        let object = WorldObject::random_at(position, owner);
        if let Err(e) = engine.create_object(object) {
            debug!(error = %e, "Object not created");
        }
    }
}

fn random_intent() -> MoveIntent {
    let mut rng = rand::thread_rng();
    MoveIntent {
        forward: rng.gen_range(-1.0..=1.0),
        right: rng.gen_range(-1.0..=1.0),
        jump: rng.gen_bool(0.1),
        yaw: rng.gen_range(-std::f64::consts::PI..std::f64::consts::PI),
    }
}

fn log_roster(engine: &SyncEngine) {
    let store = engine.store();
    info!("World: {}", store.info());
    for peer in store.remote_peers() {
        let rendered = engine
            .interpolator()
            .pose(&peer.id)
            .map(|pose| pose.position)
            .unwrap_or(peer.position);
        info!(
            peer_id = %peer.id,
            name = %peer.display_name,
            position = %rendered,
            "Remote peer"
        );
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn wait_for_shutdown(shutdown_tx: broadcast::Sender<()>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }

    // Signal the engine loop to leave and stop
    let _ = shutdown_tx.send(());
}
