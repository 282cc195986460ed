//! Fixed classification table: chat events to CloudEvents.

use std::collections::HashMap;

use serde_json::{Map, Value};
use tlt_types::events::{
    ChatMessageData, CreateEventData, EventRefData, GuildMembershipData, ListEventsData,
    RsvpEventData, TimerTriggerData, UpdateEventData,
};
use tlt_types::{CloudEvent, ValidationError};

use crate::chat::{Attachment, ChatEvent};

/// Guild tag used for direct-message photo submissions.
pub const DM_GUILD: &str = "dm_channel";

/// Marker a message must carry to count as a promotion upload outside a
/// planning thread.
const PROMOTION_MARKER: &str = "!promotion-upload";

/// Live-session mapping from an event post to its thread and event.
///
/// Authoritative only while the session lives; it is reconstructed by
/// re-reading event metadata after a restart.
#[derive(Debug, Clone)]
pub struct EventPostRef {
    pub event_id: String,
    pub thread_id: String,
    pub guild_id: String,
}

/// What one chat event classified into.
#[derive(Debug)]
pub enum ClassifyOutcome {
    /// Forward this CloudEvent to ingress.
    Emit(CloudEvent),
    /// Download the attachment to guild data first, then emit.
    EmitPhoto {
        promotion: bool,
        guild_id: String,
        channel_id: String,
        event_id: Option<String>,
        user_id: String,
        user_name: String,
        message_content: Option<String>,
        attachment: Attachment,
    },
    /// Delete the message and attempt a private notice.
    Moderate {
        guild_id: String,
        channel_id: String,
        message_id: String,
        user_id: String,
    },
    /// Classification miss; nothing to do.
    Ignore,
}

/// Stateful classifier holding the event-post and thread mappings.
#[derive(Debug, Default)]
pub struct Classifier {
    /// message-id of an event post -> its event/thread.
    event_posts: HashMap<String, EventPostRef>,
    /// thread-id -> the same ref, for thread-scoped rules.
    threads: HashMap<String, EventPostRef>,
}

impl Classifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or refreshes) the mapping for an event post.
    pub fn register_event_post(&mut self, message_id: &str, post: EventPostRef) {
        self.threads.insert(post.thread_id.clone(), post.clone());
        self.event_posts.insert(message_id.to_string(), post);
    }

    /// Rebuilds the mapping for one event from its persisted record, for
    /// sessions that restart after the create-event command was seen.
    pub fn hydrate_from_event_record(&mut self, guild_id: &str, event_id: &str, record: &Value) {
        let metadata = record
            .get("event_manager_data")
            .and_then(|data| data.get("metadata"));
        let message_id = metadata
            .and_then(|m| m.get("chat_message_id"))
            .and_then(Value::as_str);
        let thread_id = metadata
            .and_then(|m| m.get("chat_thread_id"))
            .and_then(Value::as_str);
        if let (Some(message_id), Some(thread_id)) = (message_id, thread_id) {
            self.register_event_post(
                message_id,
                EventPostRef {
                    event_id: event_id.to_string(),
                    thread_id: thread_id.to_string(),
                    guild_id: guild_id.to_string(),
                },
            );
        }
    }

    /// Classifies one chat event per the fixed table.
    ///
    /// # Errors
    /// Returns a [`ValidationError`] when a factory rejects the derived
    /// payload (a malformed command, not a classification miss).
    pub fn classify(&mut self, event: &ChatEvent) -> Result<ClassifyOutcome, ValidationError> {
        match event {
            ChatEvent::SlashCommand {
                guild_id,
                channel_id,
                user_id,
                user_name,
                command,
                options,
            } => self.classify_command(guild_id, channel_id, user_id, user_name, command, options),
            ChatEvent::ReactionAdded {
                guild_id,
                channel_id,
                user_id,
                message_id,
                emoji,
            } => self.classify_reaction(guild_id, channel_id, user_id, message_id, emoji, "add"),
            ChatEvent::ReactionRemoved {
                guild_id,
                channel_id,
                user_id,
                message_id,
                emoji,
            } => self.classify_reaction(guild_id, channel_id, user_id, message_id, emoji, "remove"),
            ChatEvent::DirectMessage {
                user_id,
                user_name,
                text,
                attachments,
            } => Ok(self.classify_direct_message(user_id, user_name, text.as_deref(), attachments)),
            ChatEvent::ChannelMessage {
                guild_id,
                channel_id,
                thread_id,
                user_id,
                user_name,
                message_id,
                text,
                attachments,
            } => self.classify_channel_message(
                guild_id,
                channel_id,
                thread_id.as_deref(),
                user_id,
                user_name,
                message_id,
                text.as_deref(),
                attachments,
            ),
            ChatEvent::GuildCommand {
                guild_id,
                guild_name,
                channel_id,
                channel_name,
                user_id,
                user_name,
                action,
            } => {
                let data = GuildMembershipData {
                    guild_id: guild_id.clone(),
                    guild_name: guild_name.clone(),
                    user_id: user_id.clone(),
                    user_name: user_name.clone(),
                    channel_id: channel_id.clone(),
                    channel_name: channel_name.clone(),
                    metadata: Map::new(),
                };
                match action.as_str() {
                    "join" => Ok(ClassifyOutcome::Emit(CloudEvent::register_guild(data)?)),
                    "leave" => Ok(ClassifyOutcome::Emit(CloudEvent::deregister_guild(data)?)),
                    _ => Ok(ClassifyOutcome::Ignore),
                }
            }
            ChatEvent::TimerCallback {
                guild_id,
                channel_id,
                event_id,
                timer_type,
                scheduled_time,
            } => {
                let scheduled_time = chrono::DateTime::parse_from_rfc3339(scheduled_time)
                    .map_err(|err| ValidationError::invalid("scheduled_time", err.to_string()))?
                    .with_timezone(&chrono::Utc);
                let data = TimerTriggerData {
                    event_id: event_id.clone(),
                    timer_type: timer_type.clone(),
                    scheduled_time,
                    metadata: Map::new(),
                };
                Ok(ClassifyOutcome::Emit(CloudEvent::timer_trigger(
                    guild_id, channel_id, data,
                )?))
            }
        }
    }

    fn classify_command(
        &mut self,
        guild_id: &str,
        channel_id: &str,
        user_id: &str,
        user_name: &str,
        command: &str,
        options: &Map<String, Value>,
    ) -> Result<ClassifyOutcome, ValidationError> {
        let text_option = |key: &str| -> Option<String> {
            options
                .get(key)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        match command {
            "create-event" => {
                let mut event_data = Map::new();
                for key in ["topic", "location", "time", "message_id", "thread_id"] {
                    if let Some(value) = options.get(key).filter(|v| !v.is_null()) {
                        event_data.insert(key.to_string(), value.clone());
                    }
                }
                let mut interaction_data = Map::new();
                interaction_data.insert("user_id".to_string(), Value::String(user_id.into()));
                interaction_data.insert("user_name".to_string(), Value::String(user_name.into()));
                interaction_data.insert("guild_id".to_string(), Value::String(guild_id.into()));
                interaction_data.insert("channel_id".to_string(), Value::String(channel_id.into()));

                // An event post with both ids becomes resolvable for RSVP
                // reactions and promotion uploads.
                if let (Some(message_id), Some(thread_id)) =
                    (text_option("message_id"), text_option("thread_id"))
                {
                    self.register_event_post(
                        &message_id,
                        EventPostRef {
                            event_id: message_id.clone(),
                            thread_id,
                            guild_id: guild_id.to_string(),
                        },
                    );
                }

                Ok(ClassifyOutcome::Emit(CloudEvent::create_event(
                    guild_id,
                    channel_id,
                    CreateEventData {
                        event_data,
                        interaction_data,
                        metadata: Map::new(),
                    },
                )?))
            }
            "update-event" => {
                let event_id =
                    text_option("event_id").ok_or_else(|| ValidationError::missing("event_id"))?;
                let update_data = options
                    .get("update_data")
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default();
                Ok(ClassifyOutcome::Emit(CloudEvent::update_event(
                    guild_id,
                    channel_id,
                    UpdateEventData {
                        event_id,
                        update_type: text_option("update_type")
                            .unwrap_or_else(|| "details".to_string()),
                        update_data,
                        user_id: Some(user_id.to_string()),
                        metadata: Map::new(),
                    },
                )?))
            }
            "delete-event" | "event-info" => {
                let data = EventRefData {
                    guild_id: guild_id.to_string(),
                    channel_id: channel_id.to_string(),
                    user_id: user_id.to_string(),
                    user_name: user_name.to_string(),
                    event_id: text_option("event_id")
                        .ok_or_else(|| ValidationError::missing("event_id"))?,
                    metadata: Map::new(),
                };
                let cloudevent = if command == "delete-event" {
                    CloudEvent::delete_event(data)?
                } else {
                    CloudEvent::event_info(data)?
                };
                Ok(ClassifyOutcome::Emit(cloudevent))
            }
            "list-events" => Ok(ClassifyOutcome::Emit(CloudEvent::list_events(
                ListEventsData {
                    guild_id: guild_id.to_string(),
                    channel_id: channel_id.to_string(),
                    user_id: user_id.to_string(),
                    user_name: user_name.to_string(),
                    metadata: Map::new(),
                },
            )?)),
            _ => Ok(ClassifyOutcome::Ignore),
        }
    }

    fn classify_reaction(
        &self,
        guild_id: &str,
        channel_id: &str,
        user_id: &str,
        message_id: &str,
        emoji: &str,
        rsvp_type: &str,
    ) -> Result<ClassifyOutcome, ValidationError> {
        // Only reactions on known event posts are RSVPs.
        let Some(post) = self.event_posts.get(message_id) else {
            return Ok(ClassifyOutcome::Ignore);
        };
        Ok(ClassifyOutcome::Emit(CloudEvent::rsvp_event(
            channel_id,
            RsvpEventData {
                guild_id: guild_id.to_string(),
                event_id: post.event_id.clone(),
                user_id: user_id.to_string(),
                rsvp_type: rsvp_type.to_string(),
                emoji: Some(emoji.to_string()),
                metadata: Map::new(),
            },
        )?))
    }

    fn classify_direct_message(
        &self,
        user_id: &str,
        user_name: &str,
        text: Option<&str>,
        attachments: &[Attachment],
    ) -> ClassifyOutcome {
        let Some(attachment) = attachments.iter().find(|a| a.is_image()) else {
            return ClassifyOutcome::Ignore;
        };
        ClassifyOutcome::EmitPhoto {
            promotion: false,
            guild_id: DM_GUILD.to_string(),
            channel_id: format!("dm-{user_id}"),
            event_id: text.and_then(parse_event_ref),
            user_id: user_id.to_string(),
            user_name: user_name.to_string(),
            message_content: text.map(str::to_string),
            attachment: attachment.clone(),
        }
    }

    #[allow(clippy::too_many_arguments, reason = "mirrors the wire event shape")]
    fn classify_channel_message(
        &self,
        guild_id: &str,
        channel_id: &str,
        thread_id: Option<&str>,
        user_id: &str,
        user_name: &str,
        message_id: &str,
        text: Option<&str>,
        attachments: &[Attachment],
    ) -> Result<ClassifyOutcome, ValidationError> {
        let event_thread = thread_id.and_then(|id| self.threads.get(id));
        let image = attachments.iter().find(|a| a.is_image());
        let wants_promotion =
            text.is_some_and(|t| t.contains(PROMOTION_MARKER)) || event_thread.is_some();

        if let Some(attachment) = image {
            if wants_promotion {
                return Ok(ClassifyOutcome::EmitPhoto {
                    promotion: true,
                    guild_id: guild_id.to_string(),
                    channel_id: channel_id.to_string(),
                    event_id: event_thread
                        .map(|post| post.event_id.clone())
                        .or_else(|| text.and_then(parse_event_ref)),
                    user_id: user_id.to_string(),
                    user_name: user_name.to_string(),
                    message_content: text.map(str::to_string),
                    attachment: attachment.clone(),
                });
            }
            return Ok(ClassifyOutcome::Ignore);
        }

        let Some(text) = text.filter(|t| !t.trim().is_empty()) else {
            return Ok(ClassifyOutcome::Ignore);
        };

        // Moderation rule: RSVP threads accept emoji only.
        if event_thread.is_some() && !is_emoji_only(text) {
            return Ok(ClassifyOutcome::Moderate {
                guild_id: guild_id.to_string(),
                channel_id: channel_id.to_string(),
                message_id: message_id.to_string(),
                user_id: user_id.to_string(),
            });
        }
        if event_thread.is_some() {
            return Ok(ClassifyOutcome::Ignore);
        }

        Ok(ClassifyOutcome::Emit(CloudEvent::chat_message(
            ChatMessageData {
                guild_id: guild_id.to_string(),
                channel_id: channel_id.to_string(),
                user_id: user_id.to_string(),
                message_id: Some(message_id.to_string()),
                content: text.to_string(),
                message_type: "message".to_string(),
                metadata: Map::new(),
            },
        )?))
    }
}

/// Parses an `event:<id>` reference out of free text.
fn parse_event_ref(text: &str) -> Option<String> {
    let start = text.find("event:")? + "event:".len();
    let id: String = text[start..]
        .chars()
        .take_while(char::is_ascii_alphanumeric)
        .collect();
    (!id.is_empty()).then_some(id)
}

/// Whether the text is emoji (and whitespace) only.
fn is_emoji_only(text: &str) -> bool {
    text.chars().all(|c| {
        c.is_whitespace()
            || matches!(c,
                '\u{200D}'                  // zero-width joiner
                | '\u{FE0E}' | '\u{FE0F}'   // variation selectors
                | '\u{1F000}'..='\u{1FAFF}' // emoji blocks
                | '\u{2600}'..='\u{27BF}'   // symbols and dingbats
                | '\u{2B00}'..='\u{2BFF}'   // arrows and stars
                | '\u{1F3FB}'..='\u{1F3FF}' // skin tones
            )
    })
}
