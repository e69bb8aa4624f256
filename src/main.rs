use anyhow::Context;
use serde_json::json;
use std::time::Duration;
use things_live::transport::{TcpTransport, TcpTransportConfig};
use things_live::{ClientConfig, Command, EventFactory, HandlerResult, LiveClient, ResponseFactory};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const FEATURE_ID: &str = "temp-sensor";
const PROPERTY: &str = "temperature";
const EXPECTED_SIGNALS: usize = 2;
const WAIT: Duration = Duration::from_secs(10);

fn connect(client_id: &str, broker_addr: &str) -> LiveClient {
    let (transport, events) = TcpTransport::connect(TcpTransportConfig {
        client_id: client_id.into(),
        broker_addr: broker_addr.into(),
        ..Default::default()
    });
    LiveClient::new(ClientConfig::new(client_id), transport, events)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let broker_addr =
        std::env::var("THINGS_LIVE_BROKER").unwrap_or_else(|_| "127.0.0.1:8080".into());
    let thing_id = format!("org.example:live_{}", uuid::Uuid::new_v4());

    info!("Live demo starting");
    info!("  broker: {}", broker_addr);
    info!("  thing:  {}", thing_id);

    let backend = connect("demo-backend", &broker_addr);
    let device = connect("demo-device", &broker_addr);

    // One signal from the handler, one from the backend's response
    let (signal_tx, mut signal_rx) = mpsc::unbounded_channel::<&'static str>();

    let handler_signal = signal_tx.clone();
    device
        .for_id(thing_id.clone())
        .for_feature(FEATURE_ID)
        .handle_modify_feature_property_commands(move |cmd: Command| -> HandlerResult {
            info!(
                "Device got {} {} = {:?}",
                cmd.command_type().label(),
                cmd.property_pointer(),
                cmd.property_value()
            );
            let _ = handler_signal.send("handler");
            Ok(cmd
                .answer()
                .with_response(ResponseFactory::modified)
                .with_event(EventFactory::modified)
                .build())
        })
        .await;

    tokio::time::timeout(WAIT, async {
        backend.start_consumption().await?;
        device.start_consumption().await
    })
    .await
    .context("timed out starting live consumption")??;
    info!("Both clients consuming live messages");

    let put = backend
        .for_feature(thing_id.clone(), FEATURE_ID)
        .put_property(PROPERTY, json!(23.21))
        .await;
    match put.wait().await {
        Ok(response) if response.is_success() => {
            info!("Put {} succeeded with status {}", PROPERTY, response.status());
            let _ = signal_tx.send("response");
        }
        Ok(response) => warn!(
            "Put {} answered with status {}: {}",
            PROPERTY,
            response.status(),
            response.message()
        ),
        Err(e) => error!("Put {} failed: {}", PROPERTY, e),
    }

    let received = tokio::time::timeout(WAIT, async {
        let mut count = 0;
        while count < EXPECTED_SIGNALS {
            match signal_rx.recv().await {
                Some(_) => count += 1,
                None => break,
            }
        }
        count
    })
    .await
    .unwrap_or(0);

    if received == EXPECTED_SIGNALS {
        info!("Received all expected events!");
    } else {
        error!("Did not receive all expected events within {:?}", WAIT);
    }

    backend.shutdown().await;
    device.shutdown().await;
    Ok(())
}
