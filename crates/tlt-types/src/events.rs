//! CloudEvent envelope, the closed event-type set, and per-type factories.
//!
//! Every event in the system travels as a [`CloudEvent`] whose `type` belongs
//! to the reserved `com.tlt.chat.*` namespace. Factories validate required
//! payload fields, stamp a v4 id and the current UTC time, and compose the
//! `/chat/<guild>/<channel>` source URI.

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// CloudEvents specification version carried by every envelope.
pub const SPEC_VERSION: &str = "1.0";

/// Default data content type.
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Closed set of event types in the `com.tlt.chat.*` namespace.
///
/// Unrecognised type strings fail deserialization, which ingress surfaces as
/// a validation error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "com.tlt.chat.create-event")]
    CreateEvent,
    #[serde(rename = "com.tlt.chat.update-event")]
    UpdateEvent,
    #[serde(rename = "com.tlt.chat.delete-event")]
    DeleteEvent,
    #[serde(rename = "com.tlt.chat.list-events")]
    ListEvents,
    #[serde(rename = "com.tlt.chat.event-info")]
    EventInfo,
    #[serde(rename = "com.tlt.chat.rsvp-event")]
    RsvpEvent,
    #[serde(rename = "com.tlt.chat.register-guild")]
    RegisterGuild,
    #[serde(rename = "com.tlt.chat.deregister-guild")]
    DeregisterGuild,
    #[serde(rename = "com.tlt.chat.photo-vibe-check")]
    PhotoVibeCheck,
    #[serde(rename = "com.tlt.chat.promotion-image")]
    PromotionImage,
    #[serde(rename = "com.tlt.chat.vibe-action")]
    VibeAction,
    #[serde(rename = "com.tlt.chat.save-event-to-guild-data")]
    SaveEventToGuildData,
    #[serde(rename = "com.tlt.chat.timer-trigger")]
    TimerTrigger,
    #[serde(rename = "com.tlt.chat.message")]
    ChatMessage,
}

impl EventType {
    /// Full reverse-DNS wire string for this type.
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::CreateEvent => "com.tlt.chat.create-event",
            EventType::UpdateEvent => "com.tlt.chat.update-event",
            EventType::DeleteEvent => "com.tlt.chat.delete-event",
            EventType::ListEvents => "com.tlt.chat.list-events",
            EventType::EventInfo => "com.tlt.chat.event-info",
            EventType::RsvpEvent => "com.tlt.chat.rsvp-event",
            EventType::RegisterGuild => "com.tlt.chat.register-guild",
            EventType::DeregisterGuild => "com.tlt.chat.deregister-guild",
            EventType::PhotoVibeCheck => "com.tlt.chat.photo-vibe-check",
            EventType::PromotionImage => "com.tlt.chat.promotion-image",
            EventType::VibeAction => "com.tlt.chat.vibe-action",
            EventType::SaveEventToGuildData => "com.tlt.chat.save-event-to-guild-data",
            EventType::TimerTrigger => "com.tlt.chat.timer-trigger",
            EventType::ChatMessage => "com.tlt.chat.message",
        }
    }

    /// All members of the closed set.
    pub fn all() -> &'static [EventType] {
        &[
            EventType::CreateEvent,
            EventType::UpdateEvent,
            EventType::DeleteEvent,
            EventType::ListEvents,
            EventType::EventInfo,
            EventType::RsvpEvent,
            EventType::RegisterGuild,
            EventType::DeregisterGuild,
            EventType::PhotoVibeCheck,
            EventType::PromotionImage,
            EventType::VibeAction,
            EventType::SaveEventToGuildData,
            EventType::TimerTrigger,
            EventType::ChatMessage,
        ]
    }

    /// Payload fields the envelope must carry for this type.
    pub fn required_fields(self) -> &'static [&'static str] {
        match self {
            EventType::CreateEvent => &["event_data", "interaction_data"],
            EventType::UpdateEvent => &["event_id", "update_type", "update_data"],
            EventType::DeleteEvent | EventType::EventInfo => {
                &["guild_id", "channel_id", "user_id", "user_name", "event_id"]
            }
            EventType::ListEvents => &["guild_id", "channel_id", "user_id", "user_name"],
            EventType::RsvpEvent => &["guild_id", "event_id", "user_id", "rsvp_type"],
            EventType::RegisterGuild | EventType::DeregisterGuild => &[
                "guild_id",
                "guild_name",
                "user_id",
                "user_name",
                "channel_id",
                "channel_name",
            ],
            EventType::PhotoVibeCheck => &[
                "guild_id",
                "channel_id",
                "user_id",
                "user_name",
                "photo_url",
                "filename",
            ],
            EventType::PromotionImage => &[
                "guild_id",
                "channel_id",
                "user_id",
                "user_name",
                "event_id",
                "image_url",
                "local_path",
                "filename",
            ],
            EventType::VibeAction => &[
                "guild_id",
                "channel_id",
                "user_id",
                "user_name",
                "event_id",
                "action",
            ],
            EventType::SaveEventToGuildData => {
                &["event_id", "guild_id", "event_data", "user_id", "user_name"]
            }
            EventType::TimerTrigger => &["event_id", "timer_type", "scheduled_time"],
            EventType::ChatMessage => &["guild_id", "channel_id", "user_id", "content"],
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validation failure naming the offending field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn missing(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: "required field is missing or empty".to_string(),
        }
    }

    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid field '{}': {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Timestamps serialise as ISO-8601 with an explicit UTC offset and second
/// resolution.
mod rfc3339_utc {
    use super::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S: Serializer>(time: &DateTime<Utc>, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&time.to_rfc3339_opts(SecondsFormat::Secs, false))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(de)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|t| t.with_timezone(&Utc))
            .map_err(de::Error::custom)
    }
}

/// CloudEvents v1.0 envelope.
///
/// Field declaration order is the canonical JSON key order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudEvent {
    pub specversion: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub source: String,
    pub id: String,
    #[serde(with = "rfc3339_utc")]
    pub time: DateTime<Utc>,
    #[serde(default = "default_content_type")]
    pub datacontenttype: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub data: Value,
}

fn default_content_type() -> String {
    CONTENT_TYPE_JSON.to_string()
}

/// Composes the `/chat/<guild>/<channel>` source URI.
pub fn chat_source(guild_id: &str, channel_id: &str) -> String {
    format!("/chat/{guild_id}/{channel_id}")
}

/// Splits a `/chat/<guild>/<channel>` source URI into its identifiers.
pub fn parse_chat_source(source: &str) -> Option<(&str, &str)> {
    let rest = source.strip_prefix("/chat/")?;
    let (guild, channel) = rest.split_once('/')?;
    if guild.is_empty() || channel.is_empty() || channel.contains('/') {
        return None;
    }
    Some((guild, channel))
}

impl CloudEvent {
    fn stamped(event_type: EventType, source: String, subject: String, data: Value) -> Self {
        Self {
            specversion: SPEC_VERSION.to_string(),
            event_type,
            source,
            id: Uuid::new_v4().to_string(),
            time: Utc::now(),
            datacontenttype: CONTENT_TYPE_JSON.to_string(),
            subject: Some(subject),
            data,
        }
    }

    /// Overrides the stamped identifier.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Overrides the stamped timestamp.
    #[must_use]
    pub fn with_time(mut self, time: DateTime<Utc>) -> Self {
        self.time = time;
        self
    }

    /// Overrides the derived subject.
    #[must_use]
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Guild identifier parsed from the source URI.
    pub fn guild_id(&self) -> Option<&str> {
        parse_chat_source(&self.source).map(|(guild, _)| guild)
    }

    /// Channel identifier parsed from the source URI.
    pub fn channel_id(&self) -> Option<&str> {
        parse_chat_source(&self.source).map(|(_, channel)| channel)
    }

    /// Checks the envelope against its per-type contract.
    ///
    /// # Errors
    /// Returns a [`ValidationError`] naming the first offending field when the
    /// spec version, source form, content type, or payload contract fails.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.specversion != SPEC_VERSION {
            return Err(ValidationError::invalid(
                "specversion",
                format!("expected \"{SPEC_VERSION}\", got \"{}\"", self.specversion),
            ));
        }
        if parse_chat_source(&self.source).is_none() {
            return Err(ValidationError::invalid(
                "source",
                "must be of the form /chat/<guild>/<channel>",
            ));
        }
        if self.datacontenttype != CONTENT_TYPE_JSON {
            return Err(ValidationError::invalid(
                "datacontenttype",
                format!("unsupported content type \"{}\"", self.datacontenttype),
            ));
        }
        let Some(data) = self.data.as_object() else {
            return Err(ValidationError::invalid("data", "payload must be an object"));
        };
        for field in self.event_type.required_fields() {
            match data.get(*field) {
                None | Some(Value::Null) => return Err(ValidationError::missing(*field)),
                Some(Value::String(s)) if s.is_empty() => {
                    return Err(ValidationError::missing(*field));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// Serialises the envelope to canonical JSON (fixed key order).
    ///
    /// # Errors
    /// Returns a [`ValidationError`] on the `data` field if serialisation
    /// fails, which only happens for non-JSON-safe payload values.
    pub fn to_canonical_json(&self) -> Result<String, ValidationError> {
        serde_json::to_string(self).map_err(|e| ValidationError::invalid("data", e.to_string()))
    }
}

fn to_payload<T: Serialize>(payload: &T) -> Result<Value, ValidationError> {
    serde_json::to_value(payload).map_err(|e| ValidationError::invalid("data", e.to_string()))
}

fn require(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::missing(field));
    }
    Ok(())
}

fn empty_map() -> Map<String, Value> {
    Map::new()
}

/// Payload for `com.tlt.chat.create-event`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateEventData {
    pub event_data: Map<String, Value>,
    pub interaction_data: Map<String, Value>,
    #[serde(default = "empty_map")]
    pub metadata: Map<String, Value>,
}

/// Payload for `com.tlt.chat.update-event`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateEventData {
    pub event_id: String,
    pub update_type: String,
    pub update_data: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default = "empty_map")]
    pub metadata: Map<String, Value>,
}

/// Payload for `com.tlt.chat.delete-event` and `com.tlt.chat.event-info`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventRefData {
    pub guild_id: String,
    pub channel_id: String,
    pub user_id: String,
    pub user_name: String,
    pub event_id: String,
    #[serde(default = "empty_map")]
    pub metadata: Map<String, Value>,
}

/// Payload for `com.tlt.chat.list-events`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListEventsData {
    pub guild_id: String,
    pub channel_id: String,
    pub user_id: String,
    pub user_name: String,
    #[serde(default = "empty_map")]
    pub metadata: Map<String, Value>,
}

/// Payload for `com.tlt.chat.rsvp-event`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RsvpEventData {
    pub guild_id: String,
    pub event_id: String,
    pub user_id: String,
    /// `add` or `remove`.
    pub rsvp_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emoji: Option<String>,
    #[serde(default = "empty_map")]
    pub metadata: Map<String, Value>,
}

/// Payload for guild register / deregister events.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuildMembershipData {
    pub guild_id: String,
    pub guild_name: String,
    pub user_id: String,
    pub user_name: String,
    pub channel_id: String,
    pub channel_name: String,
    #[serde(default = "empty_map")]
    pub metadata: Map<String, Value>,
}

/// Payload for `com.tlt.chat.photo-vibe-check`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhotoVibeCheckData {
    /// Guild id, or `dm_channel` for direct submissions.
    pub guild_id: String,
    pub channel_id: String,
    pub user_id: String,
    pub user_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    pub photo_url: String,
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_content: Option<String>,
    #[serde(default = "empty_map")]
    pub metadata: Map<String, Value>,
}

/// Payload for `com.tlt.chat.promotion-image`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromotionImageData {
    pub guild_id: String,
    pub channel_id: String,
    pub user_id: String,
    pub user_name: String,
    pub event_id: String,
    pub image_url: String,
    pub local_path: String,
    pub filename: String,
    pub content_type: String,
    pub size: u64,
    #[serde(default = "empty_map")]
    pub event_data: Map<String, Value>,
    #[serde(default = "empty_map")]
    pub metadata: Map<String, Value>,
}

/// Payload for `com.tlt.chat.vibe-action`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VibeActionData {
    pub guild_id: String,
    pub channel_id: String,
    pub user_id: String,
    pub user_name: String,
    pub event_id: String,
    /// Action tag, e.g. `generate_event_slideshow` or `vibe_bit`.
    pub action: String,
    #[serde(default = "empty_map")]
    pub event_data: Map<String, Value>,
    #[serde(default = "empty_map")]
    pub metadata: Map<String, Value>,
}

/// Payload for `com.tlt.chat.save-event-to-guild-data`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SaveEventData {
    pub event_id: String,
    pub guild_id: String,
    pub event_data: Map<String, Value>,
    pub user_id: String,
    pub user_name: String,
    #[serde(default = "empty_map")]
    pub metadata: Map<String, Value>,
}

/// Payload for `com.tlt.chat.timer-trigger`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerTriggerData {
    pub event_id: String,
    pub timer_type: String,
    #[serde(with = "rfc3339_utc")]
    pub scheduled_time: DateTime<Utc>,
    #[serde(default = "empty_map")]
    pub metadata: Map<String, Value>,
}

/// Payload for `com.tlt.chat.message`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatMessageData {
    pub guild_id: String,
    pub channel_id: String,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    pub content: String,
    #[serde(default = "default_message_type")]
    pub message_type: String,
    #[serde(default = "empty_map")]
    pub metadata: Map<String, Value>,
}

fn default_message_type() -> String {
    "message".to_string()
}

impl CloudEvent {
    /// Factory for `create-event`.
    ///
    /// # Errors
    /// Returns a [`ValidationError`] when a required field is absent.
    pub fn create_event(
        guild_id: &str,
        channel_id: &str,
        data: CreateEventData,
    ) -> Result<Self, ValidationError> {
        require("guild_id", guild_id)?;
        require("channel_id", channel_id)?;
        if data.event_data.is_empty() {
            return Err(ValidationError::missing("event_data"));
        }
        if data.interaction_data.is_empty() {
            return Err(ValidationError::missing("interaction_data"));
        }
        let user = data
            .interaction_data
            .get("user_id")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        let subject = format!("event-creation-{user}");
        Ok(Self::stamped(
            EventType::CreateEvent,
            chat_source(guild_id, channel_id),
            subject,
            to_payload(&data)?,
        ))
    }

    /// Factory for `update-event`.
    ///
    /// # Errors
    /// Returns a [`ValidationError`] when a required field is absent.
    pub fn update_event(
        guild_id: &str,
        channel_id: &str,
        data: UpdateEventData,
    ) -> Result<Self, ValidationError> {
        require("guild_id", guild_id)?;
        require("channel_id", channel_id)?;
        require("event_id", &data.event_id)?;
        require("update_type", &data.update_type)?;
        let subject = format!("event-{}-update", data.event_id);
        Ok(Self::stamped(
            EventType::UpdateEvent,
            chat_source(guild_id, channel_id),
            subject,
            to_payload(&data)?,
        ))
    }

    /// Factory for `delete-event`.
    ///
    /// # Errors
    /// Returns a [`ValidationError`] when a required field is absent.
    pub fn delete_event(data: EventRefData) -> Result<Self, ValidationError> {
        data.validate()?;
        let subject = format!("delete-event-{}", data.event_id);
        Ok(Self::stamped(
            EventType::DeleteEvent,
            chat_source(&data.guild_id, &data.channel_id),
            subject,
            to_payload(&data)?,
        ))
    }

    /// Factory for `event-info`.
    ///
    /// # Errors
    /// Returns a [`ValidationError`] when a required field is absent.
    pub fn event_info(data: EventRefData) -> Result<Self, ValidationError> {
        data.validate()?;
        let subject = format!("event-info-{}", data.event_id);
        Ok(Self::stamped(
            EventType::EventInfo,
            chat_source(&data.guild_id, &data.channel_id),
            subject,
            to_payload(&data)?,
        ))
    }

    /// Factory for `list-events`.
    ///
    /// # Errors
    /// Returns a [`ValidationError`] when a required field is absent.
    pub fn list_events(data: ListEventsData) -> Result<Self, ValidationError> {
        require("guild_id", &data.guild_id)?;
        require("channel_id", &data.channel_id)?;
        require("user_id", &data.user_id)?;
        let subject = format!("list-events-{}", data.user_id);
        Ok(Self::stamped(
            EventType::ListEvents,
            chat_source(&data.guild_id, &data.channel_id),
            subject,
            to_payload(&data)?,
        ))
    }

    /// Factory for `rsvp-event`.
    ///
    /// # Errors
    /// Returns a [`ValidationError`] when a required field is absent.
    pub fn rsvp_event(channel_id: &str, data: RsvpEventData) -> Result<Self, ValidationError> {
        require("guild_id", &data.guild_id)?;
        require("channel_id", channel_id)?;
        require("event_id", &data.event_id)?;
        require("user_id", &data.user_id)?;
        require("rsvp_type", &data.rsvp_type)?;
        let subject = format!("rsvp-{}-{}-{}", data.event_id, data.user_id, data.rsvp_type);
        Ok(Self::stamped(
            EventType::RsvpEvent,
            chat_source(&data.guild_id, channel_id),
            subject,
            to_payload(&data)?,
        ))
    }

    /// Factory for `register-guild`.
    ///
    /// # Errors
    /// Returns a [`ValidationError`] when a required field is absent.
    pub fn register_guild(data: GuildMembershipData) -> Result<Self, ValidationError> {
        data.validate()?;
        let subject = format!("register-guild-{}", data.guild_id);
        Ok(Self::stamped(
            EventType::RegisterGuild,
            chat_source(&data.guild_id, &data.channel_id),
            subject,
            to_payload(&data)?,
        ))
    }

    /// Factory for `deregister-guild`.
    ///
    /// # Errors
    /// Returns a [`ValidationError`] when a required field is absent.
    pub fn deregister_guild(data: GuildMembershipData) -> Result<Self, ValidationError> {
        data.validate()?;
        let subject = format!("deregister-guild-{}", data.guild_id);
        Ok(Self::stamped(
            EventType::DeregisterGuild,
            chat_source(&data.guild_id, &data.channel_id),
            subject,
            to_payload(&data)?,
        ))
    }

    /// Factory for `photo-vibe-check`.
    ///
    /// # Errors
    /// Returns a [`ValidationError`] when a required field is absent.
    pub fn photo_vibe_check(data: PhotoVibeCheckData) -> Result<Self, ValidationError> {
        require("guild_id", &data.guild_id)?;
        require("channel_id", &data.channel_id)?;
        require("user_id", &data.user_id)?;
        require("photo_url", &data.photo_url)?;
        require("filename", &data.filename)?;
        let subject = format!("photo-vibe-check-{}-{}", data.user_id, data.filename);
        Ok(Self::stamped(
            EventType::PhotoVibeCheck,
            chat_source(&data.guild_id, &data.channel_id),
            subject,
            to_payload(&data)?,
        ))
    }

    /// Factory for `promotion-image`.
    ///
    /// # Errors
    /// Returns a [`ValidationError`] when a required field is absent.
    pub fn promotion_image(data: PromotionImageData) -> Result<Self, ValidationError> {
        require("guild_id", &data.guild_id)?;
        require("channel_id", &data.channel_id)?;
        require("user_id", &data.user_id)?;
        require("event_id", &data.event_id)?;
        require("image_url", &data.image_url)?;
        require("local_path", &data.local_path)?;
        require("filename", &data.filename)?;
        let subject = format!(
            "promotion-image-{}-{}-{}",
            data.user_id, data.event_id, data.filename
        );
        Ok(Self::stamped(
            EventType::PromotionImage,
            chat_source(&data.guild_id, &data.channel_id),
            subject,
            to_payload(&data)?,
        ))
    }

    /// Factory for `vibe-action`.
    ///
    /// # Errors
    /// Returns a [`ValidationError`] when a required field is absent.
    pub fn vibe_action(data: VibeActionData) -> Result<Self, ValidationError> {
        require("guild_id", &data.guild_id)?;
        require("channel_id", &data.channel_id)?;
        require("user_id", &data.user_id)?;
        require("event_id", &data.event_id)?;
        require("action", &data.action)?;
        let subject = format!(
            "vibe-action-{}-{}-{}",
            data.user_id, data.action, data.event_id
        );
        Ok(Self::stamped(
            EventType::VibeAction,
            chat_source(&data.guild_id, &data.channel_id),
            subject,
            to_payload(&data)?,
        ))
    }

    /// Factory for `save-event-to-guild-data`.
    ///
    /// # Errors
    /// Returns a [`ValidationError`] when a required field is absent.
    pub fn save_event_to_guild_data(
        channel_id: &str,
        data: SaveEventData,
    ) -> Result<Self, ValidationError> {
        require("event_id", &data.event_id)?;
        require("guild_id", &data.guild_id)?;
        require("user_id", &data.user_id)?;
        let subject = format!("save-event-{}-{}", data.guild_id, data.event_id);
        Ok(Self::stamped(
            EventType::SaveEventToGuildData,
            chat_source(&data.guild_id, channel_id),
            subject,
            to_payload(&data)?,
        ))
    }

    /// Factory for `timer-trigger`.
    ///
    /// # Errors
    /// Returns a [`ValidationError`] when a required field is absent.
    pub fn timer_trigger(
        guild_id: &str,
        channel_id: &str,
        data: TimerTriggerData,
    ) -> Result<Self, ValidationError> {
        require("guild_id", guild_id)?;
        require("channel_id", channel_id)?;
        require("event_id", &data.event_id)?;
        require("timer_type", &data.timer_type)?;
        let subject = format!("timer-{}-{}", data.event_id, data.timer_type);
        Ok(Self::stamped(
            EventType::TimerTrigger,
            chat_source(guild_id, channel_id),
            subject,
            to_payload(&data)?,
        ))
    }

    /// Factory for `message`.
    ///
    /// # Errors
    /// Returns a [`ValidationError`] when a required field is absent.
    pub fn chat_message(data: ChatMessageData) -> Result<Self, ValidationError> {
        require("guild_id", &data.guild_id)?;
        require("channel_id", &data.channel_id)?;
        require("user_id", &data.user_id)?;
        require("content", &data.content)?;
        let subject = format!("message-{}", data.user_id);
        Ok(Self::stamped(
            EventType::ChatMessage,
            chat_source(&data.guild_id, &data.channel_id),
            subject,
            to_payload(&data)?,
        ))
    }
}

impl EventRefData {
    fn validate(&self) -> Result<(), ValidationError> {
        require("guild_id", &self.guild_id)?;
        require("channel_id", &self.channel_id)?;
        require("user_id", &self.user_id)?;
        require("event_id", &self.event_id)
    }
}

impl GuildMembershipData {
    fn validate(&self) -> Result<(), ValidationError> {
        require("guild_id", &self.guild_id)?;
        require("guild_name", &self.guild_name)?;
        require("user_id", &self.user_id)?;
        require("channel_id", &self.channel_id)
    }
}
