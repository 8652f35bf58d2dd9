use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

use parley_core::esm::{Connection, EsmSession, TransportEvent};
use parley_core::{ConnectionState, Intent, SessionId};

use super::{LineCommand, describe_outcome, parse_line, render_entry};
use crate::config::ParleyConfig;

const HELP: &str = "Comandos: /to ID (destinatário), /time, /quit. Outras linhas são enviadas.";

/// Interactive ESM client: connect, print the log as it grows, send stdin lines.
pub async fn session_command(
    config: &ParleyConfig,
    session_id: Option<String>,
    to: Option<String>,
    endpoint: Option<String>,
) -> Result<()> {
    let mut gateway = config.file.gateway.clone();
    if let Some(endpoint) = endpoint {
        gateway.endpoint = endpoint;
    }
    let options = gateway.to_options();
    let session_id = session_id
        .map(SessionId::new)
        .unwrap_or_else(SessionId::generate);
    let self_label = config.file.identity.self_label.clone();

    let (connection, mut events) = Connection::connect(&options, &session_id)
        .with_context(|| format!("Cannot connect to {}", options.endpoint))?;
    let mut session = EsmSession::with_label(session_id, self_label.clone(), connection);
    if let Some(to) = to {
        session.handle_intent(Intent::SetRecipient(to));
    }

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut rendered = 0usize;
    let mut time_shown = false;

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    println!("Desconectado.");
                    break;
                };
                match &event {
                    TransportEvent::StateChanged(ConnectionState::Connecting) => println!("Conectando..."),
                    TransportEvent::StateChanged(ConnectionState::Connected) => {
                        println!("Conectado. Seu ID: {}", session.session_id());
                    }
                    TransportEvent::StateChanged(ConnectionState::Disconnected) => println!("Desconectado."),
                    _ => {}
                }
                let is_time = matches!(event, TransportEvent::Time { .. });
                session.handle_event(event);
                // later ticks are available through /time
                if is_time && !time_shown {
                    if let Some(time) = session.view().server_time {
                        println!("Hora do servidor: {time}");
                        time_shown = true;
                    }
                }
            }
            line = stdin.next_line() => {
                let line = line.context("Failed to read stdin")?;
                let Some(line) = line else { break };
                match parse_line(&line) {
                    None => {}
                    Some(LineCommand::To(id)) => {
                        session.handle_intent(Intent::SetRecipient(id.clone()));
                        println!("Destinatário: {id}");
                    }
                    Some(LineCommand::Time) => match session.view().server_time {
                        Some(time) => println!("Hora do servidor: {time}"),
                        None => println!("Hora do servidor ainda não recebida"),
                    },
                    Some(LineCommand::Quit) => break,
                    Some(LineCommand::Draft(text)) => {
                        session.handle_intent(Intent::SetDraft(text));
                        if let Some(outcome) = session.handle_intent(Intent::Send) {
                            if let Some(problem) = describe_outcome(&outcome) {
                                eprintln!("{problem}");
                            }
                        }
                    }
                    Some(LineCommand::Help | LineCommand::List | LineCommand::Open(_) | LineCommand::Unknown(_)) => {
                        println!("{HELP}");
                    }
                }
            }
        }

        for entry in &session.messages()[rendered..] {
            println!("{}", render_entry(entry, &self_label));
        }
        rendered = session.messages().len();
    }

    session.transport_mut().disconnect().await;
    info!("session ended");
    Ok(())
}
