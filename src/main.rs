//! CLI for popmqtt
//!
//! Subcommands:
//! - `pub`: connect, publish one message, disconnect
//! - `sub`: connect, subscribe, print incoming messages until Ctrl-C

use std::sync::Arc;

use clap::Parser;
use popmqtt::config::load_config;
use popmqtt::{QoS, Session, SessionOptions, SessionState};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "popmqtt")]
enum Command {
    /// Publish a single message at QoS 0
    Pub {
        #[arg(long)]
        topic: String,
        #[arg(long)]
        message: String,
        /// Broker URL, overrides the configured one (e.g. tcp://127.0.0.1:1883)
        #[arg(long)]
        url: Option<String>,
    },
    /// Subscribe to a topic filter and print what arrives
    Sub {
        #[arg(long)]
        topic: String,
        #[arg(long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=2))]
        qos: u8,
        /// Broker URL, overrides the configured one (e.g. tcp://127.0.0.1:1883)
        #[arg(long)]
        url: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cmd = Command::parse();

    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };
    popmqtt::utils::logging::init(&config.log.level);

    let options = SessionOptions::from(&config.client);
    let result = match cmd {
        Command::Pub {
            topic,
            message,
            url,
        } => {
            let url = url.unwrap_or(config.client.url);
            let session = Session::with_options(&config.client.client_id, options);
            run_pub(session, &url, &topic, message).await
        }
        Command::Sub { topic, qos, url } => {
            let url = url.unwrap_or(config.client.url);
            let session = Session::with_options(&config.client.client_id, options);
            run_sub(session, &url, &topic, qos).await
        }
    };

    if let Err(e) = result {
        error!("{e}");
        std::process::exit(1);
    }
}

/// Runs `session.connect` on its own task and waits for the handshake.
async fn start(
    session: Session,
    url: &str,
) -> popmqtt::Result<(
    Arc<Session>,
    CancellationToken,
    tokio::task::JoinHandle<popmqtt::Result<()>>,
)> {
    let session = Arc::new(session);
    let cancel = CancellationToken::new();
    let driver = {
        let session = session.clone();
        let cancel = cancel.clone();
        let url = url.to_string();
        tokio::spawn(async move { session.connect(cancel, &url).await })
    };

    if session.ready().await != SessionState::Connected {
        // the driver holds the real reason
        return match driver.await {
            Ok(Err(e)) => Err(e),
            _ => Err(popmqtt::Error::NotConnected),
        };
    }
    Ok((session, cancel, driver))
}

async fn run_pub(
    session: Session,
    url: &str,
    topic: &str,
    message: String,
) -> popmqtt::Result<()> {
    let (session, cancel, driver) = start(session, url).await?;

    session.publish(topic, message).await?;
    info!("published to {topic}");
    session.disconnect().await?;

    cancel.cancel();
    let _ = driver.await;
    Ok(())
}

async fn run_sub(mut session: Session, url: &str, topic: &str, qos: u8) -> popmqtt::Result<()> {
    // clap has already limited qos to 0..=2
    let qos = QoS::try_from(qos).unwrap_or_default();
    session.on_publish(|publish| {
        println!(
            "{} {}",
            publish.topic,
            String::from_utf8_lossy(&publish.payload)
        );
    });

    let (session, cancel, mut driver) = start(session, url).await?;
    let packet_id = session.subscribe(topic, qos).await?;
    info!("subscribed to {topic} (packet id {packet_id})");

    let finished = tokio::select! {
        _ = tokio::signal::ctrl_c() => None,
        res = &mut driver => Some(res),
    };
    match finished {
        None => {
            info!("Shutdown signal received. Exiting gracefully.");
            let _ = session.disconnect().await;
            cancel.cancel();
            let _ = driver.await;
            Ok(())
        }
        Some(res) => {
            info!("broker closed the connection");
            match res {
                Ok(result) => result,
                Err(_) => Ok(()),
            }
        }
    }
}
