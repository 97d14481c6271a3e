//! Value Objects for domain models.
//!
//! Value Objects are immutable objects that represent values in the domain.
//! They are compared by their value, not by identity.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::error::ValueObjectError;

const MAX_USER_ID_LEN: usize = 100;
const MAX_ROOM_ID_LEN: usize = 100;
const MAX_MESSAGE_TEXT_LEN: usize = 10000;

/// User identifier value object.
///
/// Represents the identity a connection is opened for, and the author of
/// a message.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    /// Create a new UserId.
    ///
    /// # Arguments
    ///
    /// * `id` - The user identifier string
    ///
    /// # Returns
    ///
    /// A Result containing the UserId or an error if validation fails
    pub fn new(id: impl Into<String>) -> Result<Self, ValueObjectError> {
        let id = id.into();
        if id.is_empty() {
            return Err(ValueObjectError::UserIdEmpty);
        }
        let len = id.chars().count();
        if len > MAX_USER_ID_LEN {
            return Err(ValueObjectError::UserIdTooLong {
                max: MAX_USER_ID_LEN,
                actual: len,
            });
        }
        if id.chars().any(char::is_control) {
            return Err(ValueObjectError::UserIdInvalidCharacter);
        }
        Ok(Self(id))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Convert to owned String.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl TryFrom<String> for UserId {
    type Error = ValueObjectError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<UserId> for String {
    fn from(value: UserId) -> Self {
        value.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Room identifier value object.
///
/// Rooms opened from a participant set get a derived id (see
/// [`RoomIdFactory`](super::factory::RoomIdFactory)); ids received from the
/// server are accepted as-is.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomId(String);

impl RoomId {
    /// Create a new RoomId.
    ///
    /// # Arguments
    ///
    /// * `id` - The room identifier string
    ///
    /// # Returns
    ///
    /// A Result containing the RoomId or an error if validation fails
    pub fn new(id: impl Into<String>) -> Result<Self, ValueObjectError> {
        let id = id.into();
        if id.is_empty() {
            return Err(ValueObjectError::RoomIdEmpty);
        }
        let len = id.chars().count();
        if len > MAX_ROOM_ID_LEN {
            return Err(ValueObjectError::RoomIdTooLong {
                max: MAX_ROOM_ID_LEN,
                actual: len,
            });
        }
        Ok(Self(id))
    }

    /// Wrap a UUID (always valid).
    pub fn from_uuid(uuid: uuid::Uuid) -> Self {
        Self(uuid.to_string())
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Convert to owned String.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl TryFrom<String> for RoomId {
    type Error = ValueObjectError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<RoomId> for String {
    fn from(value: RoomId) -> Self {
        value.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Client-generated message identifier.
///
/// Present on every message from the moment it is created; correlates an
/// outgoing send with its `message_ack`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalId(uuid::Uuid);

impl LocalId {
    /// Generate a fresh random LocalId (UUID v4).
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Parse a LocalId from its textual form.
    pub fn parse(value: &str) -> Result<Self, ValueObjectError> {
        uuid::Uuid::parse_str(value)
            .map(Self)
            .map_err(|_| ValueObjectError::LocalIdInvalidFormat(value.to_string()))
    }

    /// Get the inner UUID.
    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Message text value object.
///
/// Represents the text body of a chat message with validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MessageText(String);

impl MessageText {
    /// Create a new MessageText.
    ///
    /// # Arguments
    ///
    /// * `text` - The message text
    ///
    /// # Returns
    ///
    /// A Result containing the MessageText or an error if validation fails
    pub fn new(text: impl Into<String>) -> Result<Self, ValueObjectError> {
        let text = text.into();
        if text.is_empty() {
            return Err(ValueObjectError::MessageTextEmpty);
        }
        let len = text.chars().count();
        if len > MAX_MESSAGE_TEXT_LEN {
            return Err(ValueObjectError::MessageTextTooLong {
                max: MAX_MESSAGE_TEXT_LEN,
                actual: len,
            });
        }
        Ok(Self(text))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Convert to owned String.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl TryFrom<String> for MessageText {
    type Error = ValueObjectError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<MessageText> for String {
    fn from(value: MessageText) -> Self {
        value.0
    }
}

impl fmt::Display for MessageText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Timestamp value object.
///
/// Represents a Unix timestamp in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Create a new Timestamp.
    ///
    /// # Arguments
    ///
    /// * `value` - Unix timestamp in milliseconds
    ///
    /// # Returns
    ///
    /// A Timestamp instance
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Current wall-clock time.
    pub fn now() -> Self {
        Self(chatlink_shared::time::current_timestamp_millis())
    }

    /// Get the inner i64 value.
    pub fn value(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_id_new_success() {
        // テスト項目: 有効なユーザー ID を作成できる
        // given (前提条件):
        let id = "alice".to_string();

        // when (操作):
        let result = UserId::new(id);

        // then (期待する結果):
        assert!(result.is_ok());
        assert_eq!(result.unwrap().as_str(), "alice");
    }

    #[test]
    fn test_user_id_new_empty_fails() {
        // テスト項目: 空のユーザー ID は作成できない
        // when (操作):
        let result = UserId::new("");

        // then (期待する結果):
        assert_eq!(result.unwrap_err(), ValueObjectError::UserIdEmpty);
    }

    #[test]
    fn test_user_id_new_too_long_fails() {
        // テスト項目: 101 文字以上のユーザー ID は作成できない
        // given (前提条件):
        let id = "a".repeat(101);

        // when (操作):
        let result = UserId::new(id);

        // then (期待する結果):
        assert_eq!(
            result.unwrap_err(),
            ValueObjectError::UserIdTooLong {
                max: 100,
                actual: 101
            }
        );
    }

    #[test]
    fn test_user_id_rejects_control_characters() {
        // テスト項目: 制御文字（改行など）を含むユーザー ID は作成できない
        // when (操作):
        let result = UserId::new("ali\nce");

        // then (期待する結果):
        assert_eq!(result.unwrap_err(), ValueObjectError::UserIdInvalidCharacter);
    }

    #[test]
    fn test_user_id_deserialize_validates() {
        // テスト項目: JSON からの復元時もバリデーションが行われる
        // when (操作):
        let ok: Result<UserId, _> = serde_json::from_str("\"bob\"");
        let err: Result<UserId, _> = serde_json::from_str("\"\"");

        // then (期待する結果):
        assert_eq!(ok.unwrap().as_str(), "bob");
        assert!(err.is_err());
    }

    #[test]
    fn test_room_id_new_empty_fails() {
        // テスト項目: 空のルーム ID は作成できない
        // when (操作):
        let result = RoomId::new("");

        // then (期待する結果):
        assert_eq!(result.unwrap_err(), ValueObjectError::RoomIdEmpty);
    }

    #[test]
    fn test_local_id_parse_roundtrip() {
        // テスト項目: LocalId は文字列表現から復元できる
        // given (前提条件):
        let id = LocalId::generate();

        // when (操作):
        let parsed = LocalId::parse(&id.to_string());

        // then (期待する結果):
        assert_eq!(parsed.unwrap(), id);
        assert!(LocalId::parse("not-a-uuid").is_err());
    }

    #[test]
    fn test_local_id_generate_uniqueness() {
        // テスト項目: LocalId は毎回異なる値になる
        // then (期待する結果):
        assert_ne!(LocalId::generate(), LocalId::generate());
    }

    #[test]
    fn test_message_text_new_empty_fails() {
        // テスト項目: 空のメッセージ本文は作成できない
        // when (操作):
        let result = MessageText::new("");

        // then (期待する結果):
        assert_eq!(result.unwrap_err(), ValueObjectError::MessageTextEmpty);
    }

    #[test]
    fn test_message_text_new_too_long_fails() {
        // テスト項目: 10001 文字以上のメッセージ本文は作成できない
        // given (前提条件):
        let text = "a".repeat(10001);

        // when (操作):
        let result = MessageText::new(text);

        // then (期待する結果):
        assert_eq!(
            result.unwrap_err(),
            ValueObjectError::MessageTextTooLong {
                max: 10000,
                actual: 10001
            }
        );
    }

    #[test]
    fn test_timestamp_ordering() {
        // テスト項目: タイムスタンプは順序付けできる
        // given (前提条件):
        let ts1 = Timestamp::new(1000);
        let ts2 = Timestamp::new(2000);

        // then (期待する結果):
        assert!(ts1 < ts2);
        assert_eq!(ts2.value(), 2000);
    }
}
