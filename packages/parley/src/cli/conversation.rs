use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use parley_core::pcs::{ConversationId, ConversationStore, PcsConversation};
use parley_core::{Intent, Message};

use super::{LineCommand, describe_outcome, parse_line, render_entry};
use crate::config::ParleyConfig;

const HELP: &str = "Comandos: /open ID, /list, /quit. Outras linhas são enviadas.";

/// Interactive PCS client on the local store: re-render the full log on
/// every snapshot, persist stdin lines.
pub async fn conversation_command(
    config: &ParleyConfig,
    chat_id: String,
    identity: Option<String>,
) -> Result<()> {
    let identity = identity
        .or_else(|| config.file.identity.account.clone())
        .context("No identity: pass --as or set identity.account in config.toml")?;
    let conversation = ConversationId::parse(chat_id)?;
    let self_label = config.file.identity.self_label.clone();

    let store = ConversationStore::open(&config.db_url(), config.file.store.to_options())
        .await
        .context("Failed to open conversation store")?;
    let mut convo = PcsConversation::new(store, identity);
    convo.open(conversation);

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            change = convo.next_snapshot(), if convo.conversation().is_some() => {
                let Some(change) = change else {
                    println!("Assinatura encerrada.");
                    break;
                };
                if change.is_visible() {
                    if let Some(id) = convo.conversation() {
                        print_log(&id.collection_path(), convo.messages(), &self_label);
                    }
                }
            }
            line = stdin.next_line() => {
                let line = line.context("Failed to read stdin")?;
                let Some(line) = line else { break };
                match parse_line(&line) {
                    None => {}
                    Some(LineCommand::Open(id)) => {
                        convo.handle_intent(Intent::SetRecipient(id)).await;
                    }
                    Some(LineCommand::List) => match convo.list_conversations().await {
                        Ok(list) if list.is_empty() => println!("Nenhuma conversa."),
                        Ok(list) => {
                            for summary in list {
                                println!(
                                    "{}  ({} mensagens, última {})",
                                    summary.id,
                                    summary.message_count,
                                    summary.latest_at.format("%Y-%m-%d %H:%M:%S")
                                );
                            }
                        }
                        Err(e) => warn!("Failed to list conversations: {}", e),
                    },
                    Some(LineCommand::Quit) => break,
                    Some(LineCommand::Draft(text)) => {
                        convo.handle_intent(Intent::SetDraft(text)).await;
                        if let Some(outcome) = convo.handle_intent(Intent::Send).await {
                            if let Some(problem) = describe_outcome(&outcome) {
                                eprintln!("{problem}");
                            }
                        }
                    }
                    Some(LineCommand::Help | LineCommand::To(_) | LineCommand::Time | LineCommand::Unknown(_)) => {
                        println!("{HELP}");
                    }
                }
            }
        }
    }

    convo.close();
    convo.store().close().await;
    info!("conversation ended");
    Ok(())
}

fn print_log(path: &str, messages: &[Message], self_label: &str) {
    println!("── {path} ──");
    for entry in messages {
        println!("{}", render_entry(entry, self_label));
    }
}
