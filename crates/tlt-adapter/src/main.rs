//! Adapter binary: long-polls the chat platform, forwards CloudEvents to
//! ingress, and applies the agent's outbound actions.

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use serde_json::Map;
use tlt_adapter::chat::{ChatClient, ChatEvent, ChatSettings};
use tlt_adapter::classify::{ClassifyOutcome, Classifier};
use tlt_adapter::ingest;
use tlt_adapter::ingress::{IngressClient, SubmitOutcome, prose_for};
use tlt_adapter::poller::{ActionApplier, poll_loop};
use tlt_core::config::Config;
use tlt_core::logging;
use tlt_types::events::{PhotoVibeCheckData, PromotionImageData};
use tlt_types::{CloudEvent, ErrorKind};

const UPDATE_POLL_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() {
    let config = match Config::load() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err:#}");
            std::process::exit(2);
        }
    };
    let _guard = logging::init(config.debug, None);
    if let Err(err) = run(config).await {
        tracing::error!(error = %format!("{err:#}"), "adapter failed");
        std::process::exit(1);
    }
}

async fn run(config: Config) -> Result<()> {
    let settings = ChatSettings::from_config(&config)?;
    let client = ChatClient::new(settings);
    let ingress = IngressClient::new(config.chat.ingress_url.clone());
    let mut classifier = Classifier::new();

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let poller = tokio::spawn(poll_loop(
        ingress.clone(),
        ActionApplier::new(client.clone()),
        config.snapshot_poll_interval(),
        shutdown_rx,
    ));

    tracing::info!("adapter started; polling for updates");
    let mut offset: Option<i64> = None;
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        let current_offset = offset;
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("shutting down adapter");
                break;
            }
            updates = client.get_updates(current_offset, UPDATE_POLL_TIMEOUT) => {
                let updates = match updates {
                    Ok(updates) => updates,
                    Err(err) => {
                        tracing::warn!(error = %format!("{err:#}"), "update polling failed");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                        continue;
                    }
                };
                for update in updates {
                    offset = Some(update.update_id + 1);
                    handle_update(
                        &client,
                        &ingress,
                        &mut classifier,
                        &config.data_root,
                        update.event,
                    )
                    .await;
                }
            }
        }
    }

    let _ = shutdown_tx.send(true);
    let _ = poller.await;
    Ok(())
}

async fn handle_update(
    client: &ChatClient,
    ingress: &IngressClient,
    classifier: &mut Classifier,
    data_root: &Path,
    event: ChatEvent,
) {
    let reply = ReplyTarget::from_event(&event);
    match classifier.classify(&event) {
        Ok(ClassifyOutcome::Emit(cloudevent)) => {
            submit(client, ingress, &reply, cloudevent).await;
        }
        Ok(ClassifyOutcome::EmitPhoto {
            promotion,
            guild_id,
            channel_id,
            event_id,
            user_id,
            user_name,
            message_content,
            attachment,
        }) => {
            let event_id = event_id.unwrap_or_else(|| "unassigned".to_string());
            let local_path = match ingest::download_attachment(
                client, data_root, &guild_id, &event_id, &user_id, promotion, &attachment,
            )
            .await
            {
                Ok(path) => path,
                Err(err) => {
                    tracing::warn!(error = %format!("{err:#}"), "attachment download failed");
                    reply
                        .notify(client, "I couldn't save that image, please try again.")
                        .await;
                    return;
                }
            };

            let built = if promotion {
                CloudEvent::promotion_image(PromotionImageData {
                    guild_id,
                    channel_id,
                    user_id,
                    user_name,
                    event_id,
                    image_url: attachment.url.clone(),
                    local_path: local_path.to_string_lossy().into_owned(),
                    filename: attachment.filename.clone(),
                    content_type: attachment
                        .content_type
                        .clone()
                        .unwrap_or_else(|| "application/octet-stream".to_string()),
                    size: attachment.size.unwrap_or_default(),
                    event_data: Map::new(),
                    metadata: Map::new(),
                })
            } else {
                let mut metadata = Map::new();
                metadata.insert(
                    "local_path".to_string(),
                    serde_json::json!(local_path.to_string_lossy()),
                );
                CloudEvent::photo_vibe_check(PhotoVibeCheckData {
                    guild_id,
                    channel_id,
                    user_id,
                    user_name,
                    event_id: Some(event_id),
                    photo_url: attachment.url.clone(),
                    filename: attachment.filename.clone(),
                    content_type: attachment.content_type.clone(),
                    size: attachment.size,
                    message_content,
                    metadata,
                })
            };
            match built {
                Ok(cloudevent) => submit(client, ingress, &reply, cloudevent).await,
                Err(err) => {
                    tracing::warn!(error = %err, "photo event failed validation");
                    reply.notify(client, prose_for(ErrorKind::ValidationError)).await;
                }
            }
        }
        Ok(ClassifyOutcome::Moderate {
            guild_id,
            channel_id,
            message_id,
            user_id,
        }) => {
            if let Err(err) = client
                .delete_message(&guild_id, &channel_id, &message_id)
                .await
            {
                tracing::warn!(error = %format!("{err:#}"), "moderation delete failed");
            }
            // Notice is best-effort; a closed DM channel is not an error.
            let _ = client
                .send_private_notice(&user_id, "Event threads accept emoji reactions only.")
                .await;
        }
        Ok(ClassifyOutcome::Ignore) => {}
        Err(err) => {
            tracing::debug!(error = %err, "classification rejected input");
            reply.notify(client, prose_for(ErrorKind::ValidationError)).await;
        }
    }
}

async fn submit(
    client: &ChatClient,
    ingress: &IngressClient,
    reply: &ReplyTarget,
    cloudevent: CloudEvent,
) {
    match ingress.submit(&cloudevent).await {
        Ok(SubmitOutcome::Accepted { task_id }) => {
            tracing::info!(task_id = %task_id, event_type = %cloudevent.event_type, "event accepted");
            reply.acknowledge(client, &task_id).await;
        }
        Ok(SubmitOutcome::Refused { kind, message }) => {
            tracing::warn!(%kind, message = %message, "event refused");
            reply.notify(client, prose_for(kind)).await;
        }
        Err(err) => {
            tracing::error!(error = %format!("{err:#}"), "ingress unreachable");
            reply
                .notify(client, prose_for(ErrorKind::InternalError))
                .await;
        }
    }
}

/// Where acknowledgements and error prose go for one chat event.
struct ReplyTarget {
    guild_id: Option<String>,
    channel_id: Option<String>,
    message_id: Option<String>,
    user_id: Option<String>,
}

impl ReplyTarget {
    fn from_event(event: &ChatEvent) -> Self {
        match event {
            ChatEvent::SlashCommand {
                guild_id,
                channel_id,
                user_id,
                ..
            }
            | ChatEvent::GuildCommand {
                guild_id,
                channel_id,
                user_id,
                ..
            } => Self {
                guild_id: Some(guild_id.clone()),
                channel_id: Some(channel_id.clone()),
                message_id: None,
                user_id: Some(user_id.clone()),
            },
            ChatEvent::ReactionAdded {
                guild_id,
                channel_id,
                user_id,
                message_id,
                ..
            }
            | ChatEvent::ReactionRemoved {
                guild_id,
                channel_id,
                user_id,
                message_id,
                ..
            }
            | ChatEvent::ChannelMessage {
                guild_id,
                channel_id,
                user_id,
                message_id,
                ..
            } => Self {
                guild_id: Some(guild_id.clone()),
                channel_id: Some(channel_id.clone()),
                message_id: Some(message_id.clone()),
                user_id: Some(user_id.clone()),
            },
            ChatEvent::DirectMessage { user_id, .. } => Self {
                guild_id: None,
                channel_id: None,
                message_id: None,
                user_id: Some(user_id.clone()),
            },
            ChatEvent::TimerCallback { guild_id, channel_id, .. } => Self {
                guild_id: Some(guild_id.clone()),
                channel_id: Some(channel_id.clone()),
                message_id: None,
                user_id: None,
            },
        }
    }

    /// Confirms acceptance: a reaction on the source message when possible,
    /// otherwise a short reply naming the task.
    async fn acknowledge(&self, client: &ChatClient, task_id: &str) {
        match (&self.guild_id, &self.channel_id, &self.message_id) {
            (Some(guild), Some(channel), Some(message)) => {
                client.react(guild, channel, message, "✅").await;
            }
            (Some(guild), Some(channel), None) => {
                if let Err(err) = client
                    .send_message(guild, channel, &format!("On it (task {task_id})."), None)
                    .await
                {
                    tracing::debug!(error = %format!("{err:#}"), "ack reply failed");
                }
            }
            _ => {
                if let Some(user_id) = &self.user_id {
                    let _ = client
                        .send_private_notice(user_id, &format!("On it (task {task_id})."))
                        .await;
                }
            }
        }
    }

    /// Delivers an error or status notice, best-effort.
    async fn notify(&self, client: &ChatClient, text: &str) {
        match (&self.guild_id, &self.channel_id) {
            (Some(guild), Some(channel)) => {
                if let Err(err) = client
                    .send_message(guild, channel, text, self.message_id.as_deref())
                    .await
                {
                    tracing::debug!(error = %format!("{err:#}"), "notice failed");
                }
            }
            _ => {
                if let Some(user_id) = &self.user_id {
                    let _ = client.send_private_notice(user_id, text).await;
                }
            }
        }
    }
}
