//! Tether daemon
//!
//! Runs the connection controller on the console transport: pairing codes
//! are typed back on stdin, and every other line becomes an inbound message.
//!
//! ## Usage
//!
//! ```bash
//! # Pair and run with a file-backed session
//! tether --phone 0683913716
//!
//! # SQLite session store, owner notified when online
//! tether --phone 0683913716 --store sqlite --owner 27821234567@s.whatsapp.net
//!
//! # Everything from the environment
//! TETHER_PHONE=0683913716 TETHER_AUTO_READ=true tether
//! ```
//!
//! Exit codes: 0 on shutdown, 3 when logged out, 1 on failure.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tether::transport::console::ConsoleTransport;
use tether::{
    ConnectionController, LogDispatcher, ReadyNotifier, Settings, StoreKind, Supervisor,
};
use tether_core::BackoffPolicy;

#[derive(Parser, Debug)]
#[command(name = "tether")]
#[command(about = "Keeps one messaging session paired and connected")]
struct Args {
    /// Display name used in the ready notice
    #[arg(long, env = "TETHER_BOT_NAME", default_value = "Tether")]
    bot_name: String,

    /// Address that receives the ready notice
    #[arg(long, env = "TETHER_OWNER")]
    owner: Option<String>,

    /// Phone number to pair
    #[arg(long, env = "TETHER_PHONE")]
    phone: String,

    /// Session storage directory
    #[arg(long, env = "TETHER_SESSION_DIR", default_value = "session")]
    session_dir: PathBuf,

    /// Session storage backend
    #[arg(long, env = "TETHER_STORE", value_enum, default_value_t = StoreKind::File)]
    store: StoreKind,

    /// Mark dispatched messages as read
    #[arg(long, env = "TETHER_AUTO_READ")]
    auto_read: bool,

    /// Show the typing indicator while dispatching
    #[arg(long, env = "TETHER_AUTO_TYPING")]
    auto_typing: bool,

    /// Generic disconnects tolerated before the session is wiped
    #[arg(long, env = "TETHER_MAX_CONNECTION_ATTEMPTS", default_value_t = 5)]
    max_connection_attempts: u32,

    /// Pairing-code requests per cycle
    #[arg(long, env = "TETHER_MAX_PAIRING_ATTEMPTS", default_value_t = 3)]
    max_pairing_attempts: u32,

    #[arg(long, env = "TETHER_RECONNECT_BASE_MS", default_value_t = 3_000)]
    reconnect_base_ms: u64,

    #[arg(long, env = "TETHER_RECONNECT_STEP_MS", default_value_t = 2_000)]
    reconnect_step_ms: u64,

    #[arg(long, env = "TETHER_RECONNECT_CAP_MS", default_value_t = 30_000)]
    reconnect_cap_ms: u64,

    /// Delay before reconnecting with a wiped session
    #[arg(long, env = "TETHER_FRESH_SESSION_DELAY_MS", default_value_t = 3_000)]
    fresh_session_delay_ms: u64,

    #[arg(long, env = "TETHER_PAIRING_STEP_MS", default_value_t = 5_000)]
    pairing_step_ms: u64,

    /// Wait after pairing attempts are exhausted
    #[arg(long, env = "TETHER_PAIRING_COOLDOWN_MS", default_value_t = 60_000)]
    pairing_cooldown_ms: u64,

    /// Bound on every network and storage call
    #[arg(long, env = "TETHER_OPERATION_TIMEOUT_MS", default_value_t = 30_000)]
    operation_timeout_ms: u64,

    /// Controller restarts after internal faults
    #[arg(long, env = "TETHER_MAX_RESTARTS", default_value_t = 5)]
    max_restarts: u32,
}

impl Args {
    fn into_settings(self) -> Settings {
        let defaults = Settings::default();
        let mut lifecycle = defaults.lifecycle.clone();
        lifecycle.max_connection_attempts = self.max_connection_attempts;
        lifecycle.max_pairing_attempts = self.max_pairing_attempts;
        lifecycle.reconnect = BackoffPolicy::new(
            Duration::from_millis(self.reconnect_base_ms),
            Duration::from_millis(self.reconnect_step_ms),
            Duration::from_millis(self.reconnect_cap_ms),
        );
        lifecycle.pairing_retry = BackoffPolicy::multiplicative(
            Duration::from_millis(self.pairing_step_ms),
            lifecycle.pairing_retry.cap,
        );
        lifecycle.fresh_session_delay = Duration::from_millis(self.fresh_session_delay_ms);
        lifecycle.pairing_cooldown = Duration::from_millis(self.pairing_cooldown_ms);

        Settings {
            bot_name: self.bot_name,
            owner: self.owner,
            phone: self.phone,
            session_dir: self.session_dir,
            store: self.store,
            auto_read: self.auto_read,
            auto_typing: self.auto_typing,
            lifecycle,
            operation_timeout: Duration::from_millis(self.operation_timeout_ms),
            max_restarts: self.max_restarts,
            ..defaults
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("tether=info".parse()?))
        .init();

    let settings = Args::parse().into_settings();
    settings.validate().context("invalid configuration")?;

    info!(
        session_dir = %settings.session_dir.display(),
        store = ?settings.store,
        "starting tether"
    );

    let store = settings.open_store().context("failed to open session store")?;
    let transport = Arc::new(ConsoleTransport::stdio());
    let dispatcher = Arc::new(ReadyNotifier::new(
        LogDispatcher,
        settings.owner.clone(),
        settings.bot_name.clone(),
    ));

    let supervisor = Supervisor::from_settings(&settings);
    let status = supervisor
        .run(
            |shutdown| {
                let controller = ConnectionController::new(
                    transport.clone(),
                    store.clone(),
                    dispatcher.clone(),
                    &settings,
                    shutdown,
                );
                async move { controller?.run().await }
            },
            tether::shutdown_signal(),
        )
        .await;

    info!(code = status.code(), "tether exiting");
    std::process::exit(status.code());
}
