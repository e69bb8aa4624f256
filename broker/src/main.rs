mod command;
mod config;
mod session;

use command::{CommandDispatcher, TimeoutTracker};
use config::BrokerConfig;
use session::{LiveSession, SessionManager};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let config = BrokerConfig::from_env();
    let listener = TcpListener::bind(&config.bind_addr).await?;
    info!("Live broker listening on {}", config.bind_addr);

    let sessions = Arc::new(SessionManager::new());
    let dispatcher = Arc::new(CommandDispatcher::new(
        config.broker_id.clone(),
        sessions.clone(),
        config.command_max_age,
    ));

    let tracker = TimeoutTracker::new(
        dispatcher.clone(),
        sessions.clone(),
        config.sweep_interval,
        config.heartbeat_timeout,
    );
    tokio::spawn(async move { tracker.run().await });

    loop {
        let (socket, addr) = listener.accept().await?;
        info!("Connection from: {}", addr);

        let sessions = sessions.clone();
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move {
            handle_connection(socket, addr, sessions, dispatcher).await;
        });
    }
}

async fn handle_connection(
    socket: TcpStream,
    addr: SocketAddr,
    sessions: Arc<SessionManager>,
    dispatcher: Arc<CommandDispatcher>,
) {
    let mut session = LiveSession::new(socket, addr);
    let mut registered = false;

    while let Some(envelope) = session.recv().await {
        if !registered {
            if session.client_id().is_empty() {
                debug!("Ignoring envelope without client id from {}", addr);
                continue;
            }
            sessions.register(session.handle.clone()).await;
            registered = true;
            info!("Client {} registered from {}", session.client_id(), addr);
        }

        dispatcher.handle_envelope(&session.handle, envelope).await;
    }

    if registered && sessions.unregister(&session.handle).await {
        let orphaned = dispatcher.drop_origin(session.client_id()).await;
        info!(
            "Client {} disconnected after {:?} ({} pending commands dropped)",
            session.client_id(),
            session.handle.connected_at.elapsed(),
            orphaned
        );
    } else {
        info!("Connection from {} closed", addr);
    }
}
