//! Interactive client: establish a session and exchange plain-text
//! messages from stdin.
//!
//! ```sh
//! cargo run --example connect -- net.tcp://localhost:55321 alice@example.org secret
//! ```

use std::io::BufRead;
use std::sync::Arc;

use lime_client::{ClientChannel, ClientChannelConfig};
use lime_transport::{TcpTransport, TcpTransportConfig, TracingTraceWriter, Transport};
use lime_wire::{
    new_envelope_id, Authentication, Identity, Message, Node, SessionCompression,
    SessionEncryption, SessionState,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lime=debug".into()),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let uri = args
        .next()
        .unwrap_or_else(|| "net.tcp://localhost:55321".to_string());
    let identity = Identity::parse(&args.next().unwrap_or_else(|| "samples@take.io".to_string()))?;
    let password = args.next().unwrap_or_else(|| "123456".to_string());

    let transport = TcpTransport::new(TcpTransportConfig::default())
        .with_trace_writer(Arc::new(TracingTraceWriter));
    transport.open(&uri).await?;

    let client = ClientChannel::new(transport, ClientChannelConfig::default());
    let session = client
        .establish_session(
            SessionCompression::None,
            SessionEncryption::Tls,
            identity,
            Authentication::plain(&password),
            Some("rust-sample"),
        )
        .await?;

    if session.state != SessionState::Established {
        eprintln!(
            "session not established: {} ({})",
            session.state,
            session
                .reason
                .map(|r| r.to_string())
                .unwrap_or_else(|| "no reason".to_string())
        );
        return Ok(());
    }
    println!(
        "session {} established, local node {}",
        client.session_id().unwrap_or_default(),
        client
            .local_node()
            .map(|n| n.to_string())
            .unwrap_or_default()
    );

    client.add_message_listener(
        |message| {
            println!(
                "message from {}: {}",
                message
                    .from
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_default(),
                message.content
            );
        },
        false,
    )?;
    client.add_notification_listener(
        |notification| {
            println!(
                "notification for {}: {:?}",
                notification.id.as_deref().unwrap_or("?"),
                notification.event
            );
        },
        false,
    )?;

    println!("type '<destination> <text>' to send, 'exit' to quit");
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        let line = line.trim();
        if line.eq_ignore_ascii_case("exit") {
            break;
        }
        let Some((to, text)) = line.split_once(' ') else {
            continue;
        };
        let mut message = Message::plain_text(text);
        message.id = Some(new_envelope_id());
        message.to = Some(Node::parse(to)?);
        client.send_message(message).await?;
    }

    client.send_finishing_session().await?;
    let finished = client.receive_finished_session().await?;
    println!("session {}", finished.state);
    client.close().await?;
    Ok(())
}
