//! Domain models as exchanged with the chat backend.
//!
//! Field names follow the JSON the backend produces (`createdBy`, `isPost`,
//! ...). Decoding is lenient where the backend is known to be sloppy:
//! `null` collections decode as empty, unknown status strings as offline.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

use crate::{ChannelId, MessageId};

/// Reactions on a message: emoji → usernames that reacted with it.
///
/// A username appears at most once per emoji, and an emoji whose user list
/// would become empty is removed instead.
pub type Reactions = BTreeMap<String, Vec<String>>;

/// Enforce the [`Reactions`] shape: drop repeated usernames (keeping the
/// first occurrence) and remove emojis left without users.
pub fn normalize_reactions(reactions: &mut Reactions) {
    for users in reactions.values_mut() {
        let mut seen = std::collections::HashSet::new();
        users.retain(|user| seen.insert(user.clone()));
    }
    reactions.retain(|_, users| !users.is_empty());
}

/// Presence status of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum UserStatus {
    /// Active.
    Online,
    /// Connected but idle.
    Away,
    /// Not connected. Also the fallback for anything unrecognized.
    #[default]
    Offline,
}

impl UserStatus {
    /// Parse a wire status string. Unrecognized values become `Offline`.
    pub fn parse(value: &str) -> Self {
        match value {
            "online" => Self::Online,
            "away" => Self::Away,
            _ => Self::Offline,
        }
    }

    /// The wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Away => "away",
            Self::Offline => "offline",
        }
    }

    /// `true` for every status except `Offline`.
    pub fn is_online(&self) -> bool {
        !matches!(self, Self::Offline)
    }
}

impl fmt::Display for UserStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for UserStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for UserStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Option::<String>::deserialize(deserializer)?;
        Ok(value.map(|s| Self::parse(&s)).unwrap_or_default())
    }
}

/// A user row in the directory.
///
/// `is_online` is not stored; it is always derived from `status`, so the
/// two can never disagree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "UserWire", into = "UserWire")]
pub struct User {
    /// Backend-assigned id. Empty when the row was created from a presence
    /// event before the directory was loaded.
    pub id: String,
    /// Unique key of the user.
    pub username: String,
    /// Email address, when the backend disclosed it.
    pub email: Option<String>,
    /// Current presence status.
    pub status: UserStatus,
}

impl User {
    /// Create a user row known only by username and status.
    pub fn new(username: impl Into<String>, status: UserStatus) -> Self {
        Self {
            id: String::new(),
            username: username.into(),
            email: None,
            status,
        }
    }

    /// Set the backend id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Set the email address.
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Whether the user counts as online (`status != offline`).
    pub fn is_online(&self) -> bool {
        self.status.is_online()
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserWire {
    #[serde(default)]
    id: String,
    username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    email: Option<String>,
    #[serde(default)]
    is_online: bool,
    #[serde(default)]
    status: UserStatus,
}

impl From<UserWire> for User {
    fn from(wire: UserWire) -> Self {
        // isOnline on the wire is ignored; status is authoritative.
        Self {
            id: wire.id,
            username: wire.username,
            email: wire.email,
            status: wire.status,
        }
    }
}

impl From<User> for UserWire {
    fn from(user: User) -> Self {
        Self {
            is_online: user.is_online(),
            id: user.id,
            username: user.username,
            email: user.email,
            status: user.status,
        }
    }
}

/// One entry of a presence event: `{username, status}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPresence {
    /// Whose status changed.
    pub username: String,
    /// The new status. Missing or unknown values decode as offline.
    #[serde(default)]
    pub status: UserStatus,
}

impl UserPresence {
    /// Create a presence entry.
    pub fn new(username: impl Into<String>, status: UserStatus) -> Self {
        Self {
            username: username.into(),
            status,
        }
    }
}

/// A chat channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    /// Backend-assigned id.
    pub id: ChannelId,
    /// Unique channel name; also the addressing key on the wire.
    pub name: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Member usernames.
    #[serde(default, deserialize_with = "null_as_default")]
    pub members: Vec<String>,
    /// Creator username (`system` for the built-in channels).
    #[serde(default)]
    pub created_by: String,
    /// Creation time as sent by the backend. Informational only.
    #[serde(default)]
    pub created_at: String,
    /// Private flag. Carried through, not interpreted.
    #[serde(default)]
    pub is_private: bool,
    /// Local display position. Never sent to or read from the backend.
    #[serde(skip)]
    pub order: Option<usize>,
}

impl Channel {
    /// Create a channel with the given id and name and empty metadata.
    pub fn new(id: impl Into<ChannelId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            members: Vec::new(),
            created_by: String::new(),
            created_at: String::new(),
            is_private: false,
            order: None,
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the creator.
    pub fn with_creator(mut self, creator: impl Into<String>) -> Self {
        self.created_by = creator.into();
        self
    }
}

/// A chat message or post.
///
/// Immutable after creation except for `reactions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Unique within the channel.
    pub id: MessageId,
    /// Author username.
    pub user: String,
    /// Message body.
    pub text: String,
    /// Name of the channel the message belongs to.
    pub channel: String,
    /// Send time as reported by the backend. Not authoritative; never used
    /// for ordering.
    #[serde(default)]
    pub timestamp: String,
    /// Emoji reactions.
    #[serde(default, deserialize_with = "normalized_reactions")]
    pub reactions: Reactions,
    /// Whether this is a pinned-style post rather than a plain message.
    #[serde(default)]
    pub is_post: bool,
}

impl Message {
    /// Create a plain message with no reactions.
    pub fn new(
        id: impl Into<MessageId>,
        user: impl Into<String>,
        channel: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            user: user.into(),
            text: text.into(),
            channel: channel.into(),
            timestamp: String::new(),
            reactions: Reactions::new(),
            is_post: false,
        }
    }

    /// Replace the reactions.
    pub fn with_reactions(mut self, reactions: Reactions) -> Self {
        self.reactions = reactions;
        self
    }

    /// Mark as a post.
    pub fn as_post(mut self) -> Self {
        self.is_post = true;
        self
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn normalized_reactions<'de, D>(deserializer: D) -> Result<Reactions, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<BTreeMap<String, Option<Vec<String>>>> = Option::deserialize(deserializer)?;
    let mut reactions: Reactions = raw
        .unwrap_or_default()
        .into_iter()
        .map(|(emoji, users)| (emoji, users.unwrap_or_default()))
        .collect();
    normalize_reactions(&mut reactions);
    Ok(reactions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // ===========================================
    // Status Tests
    // ===========================================

    #[test]
    fn unknown_status_normalizes_to_offline() {
        assert_eq!(UserStatus::parse("online"), UserStatus::Online);
        assert_eq!(UserStatus::parse("away"), UserStatus::Away);
        assert_eq!(UserStatus::parse("busy"), UserStatus::Offline);
        assert_eq!(UserStatus::parse(""), UserStatus::Offline);

        let status: UserStatus = serde_json::from_value(json!("dnd")).unwrap();
        assert_eq!(status, UserStatus::Offline);
        let status: UserStatus = serde_json::from_value(json!(null)).unwrap();
        assert_eq!(status, UserStatus::Offline);
    }

    #[test]
    fn away_counts_as_online() {
        assert!(UserStatus::Online.is_online());
        assert!(UserStatus::Away.is_online());
        assert!(!UserStatus::Offline.is_online());
    }

    // ===========================================
    // User Tests
    // ===========================================

    #[test]
    fn user_is_online_follows_status_not_wire_flag() {
        let user: User = serde_json::from_value(json!({
            "id": "u1",
            "username": "alice",
            "isOnline": true,
            "status": "offline"
        }))
        .unwrap();

        assert_eq!(user.status, UserStatus::Offline);
        assert!(!user.is_online());
    }

    #[test]
    fn user_serializes_derived_is_online() {
        let user = User::new("bob", UserStatus::Away).with_id("u2");
        let value = serde_json::to_value(&user).unwrap();

        assert_eq!(value["username"], "bob");
        assert_eq!(value["status"], "away");
        assert_eq!(value["isOnline"], true);
        assert!(value.get("email").is_none());
    }

    // ===========================================
    // Message / Channel Tests
    // ===========================================

    #[test]
    fn message_decodes_backend_shape() {
        let message: Message = serde_json::from_value(json!({
            "id": "m1",
            "user": "alice",
            "text": "hi",
            "channel": "general",
            "timestamp": "2024-01-01T00:00:00Z",
            "reactions": {"👍": ["bob"]},
            "isPost": true
        }))
        .unwrap();

        assert_eq!(message.id, MessageId::new("m1"));
        assert!(message.is_post);
        assert_eq!(message.reactions["👍"], vec!["bob".to_string()]);
    }

    #[test]
    fn null_reactions_decode_as_empty() {
        let message: Message = serde_json::from_value(json!({
            "id": "m1",
            "user": "alice",
            "text": "hi",
            "channel": "general",
            "reactions": null
        }))
        .unwrap();

        assert!(message.reactions.is_empty());
        assert!(!message.is_post);
    }

    #[test]
    fn reactions_are_deduplicated_and_pruned() {
        let message: Message = serde_json::from_value(json!({
            "id": "m1",
            "user": "alice",
            "text": "hi",
            "channel": "general",
            "reactions": {
                "👍": ["bob", "carol", "bob"],
                "🎉": [],
                "🔥": null
            }
        }))
        .unwrap();

        assert_eq!(message.reactions.len(), 1);
        assert_eq!(message.reactions["👍"], vec!["bob", "carol"]);
    }

    #[test]
    fn normalize_keeps_first_seen_order() {
        let mut reactions = Reactions::new();
        reactions.insert("👍".into(), vec!["carol".into(), "bob".into(), "carol".into()]);
        reactions.insert("👀".into(), Vec::new());

        normalize_reactions(&mut reactions);

        assert_eq!(reactions.len(), 1);
        assert_eq!(reactions["👍"], vec!["carol", "bob"]);
    }

    #[test]
    fn channel_order_is_never_serialized() {
        let mut channel = Channel::new("c1", "general").with_creator("system");
        channel.order = Some(3);

        let value = serde_json::to_value(&channel).unwrap();
        assert!(value.get("order").is_none());
        assert_eq!(value["createdBy"], "system");

        let back: Channel = serde_json::from_value(value).unwrap();
        assert_eq!(back.order, None);
    }

    #[test]
    fn channel_null_members_decode_as_empty() {
        let channel: Channel = serde_json::from_value(json!({
            "id": "c1",
            "name": "general",
            "members": null
        }))
        .unwrap();
        assert!(channel.members.is_empty());
    }
}
