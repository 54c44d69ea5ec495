//! The update model: one protocol event or command.
//!
//! Requests and server notifications share this representation. An update is
//! built incrementally (the client fills in `id`, `from` and `clock` on send)
//! and compared structurally over every populated field.

pub mod kind;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::error::UpdateError;
use crate::wire::symbol::{kw, Symbol};
use crate::wire::value::Value;

pub use kind::{Class, Kind};

/// Seconds between the Lichat epoch (1900-01-01) and the Unix epoch.
pub const UNIVERSAL_UNIX_OFFSET: u64 = 2_208_988_800;

/// The current time as a Lichat universal clock value.
pub fn universal_now() -> u64 {
    let unix = u64::try_from(Utc::now().timestamp()).unwrap_or(0);
    unix + UNIVERSAL_UNIX_OFFSET
}

#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    kind: Kind,
    id: Option<u64>,
    clock: Option<u64>,
    from: Option<String>,
    fields: BTreeMap<Symbol, Value>,
}

impl Update {
    pub fn new(kind: Kind) -> Self {
        Self {
            kind,
            id: None,
            clock: None,
            from: None,
            fields: BTreeMap::new(),
        }
    }

    /// Builder form of [`Update::set`].
    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    #[must_use]
    pub fn with_id(mut self, id: u64) -> Self {
        self.id = Some(id);
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: u64) -> Self {
        self.clock = Some(clock);
        self
    }

    #[must_use]
    pub fn with_from(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }

    /// Set a kind-specific field. `id`, `clock` and `from` are routed to
    /// their dedicated slots.
    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        let value = value.into();
        match key {
            "id" => self.id = value.as_u64(),
            "clock" => self.clock = value.as_u64(),
            "from" => self.from = value.as_str().map(str::to_string),
            _ => {
                self.fields.insert(kw(key), value);
            }
        }
    }

    pub(crate) fn set_field(&mut self, key: Symbol, value: Value) {
        match key.name() {
            "id" | "clock" | "from" => self.set(key.name(), value),
            _ => {
                self.fields.insert(key, value);
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(&kw(key))
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn has(&self, key: &str) -> bool {
        match key {
            "id" => self.id.is_some(),
            "clock" => self.clock.is_some(),
            "from" => self.from.is_some(),
            _ => self.fields.contains_key(&kw(key)),
        }
    }

    /// Kind-specific fields in wire order.
    pub fn fields(&self) -> impl Iterator<Item = (Symbol, &Value)> + '_ {
        self.fields.iter().map(|(k, v)| (*k, v))
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn id(&self) -> Option<u64> {
        self.id
    }

    pub fn clock(&self) -> Option<u64> {
        self.clock
    }

    pub fn from(&self) -> Option<&str> {
        self.from.as_deref()
    }

    pub fn channel(&self) -> Option<&str> {
        self.get_str("channel")
    }

    pub fn text(&self) -> Option<&str> {
        self.get_str("text")
    }

    pub fn target(&self) -> Option<&str> {
        self.get_str("target")
    }

    /// For update failures: the id of the local update that failed.
    pub fn update_id(&self) -> Option<u64> {
        self.get("update-id").and_then(Value::as_u64)
    }

    pub fn classify(&self) -> Class {
        self.kind.class()
    }

    pub fn is_failure(&self) -> bool {
        self.kind.is_failure()
    }

    pub fn is_update_failure(&self) -> bool {
        self.kind.is_update_failure()
    }

    pub fn is_channel_update(&self) -> bool {
        self.kind.is_channel_update()
    }

    /// The id a pending callback would be keyed by: `update-id` for update
    /// failures, otherwise the update's own id.
    pub fn correlation_id(&self) -> Option<u64> {
        if self.is_update_failure() {
            self.update_id().or(self.id)
        } else {
            self.id
        }
    }

    /// The clock as wall-clock time, if set and after the Unix epoch.
    pub fn unix_clock(&self) -> Option<DateTime<Utc>> {
        let clock = self.clock?.checked_sub(UNIVERSAL_UNIX_OFFSET)?;
        DateTime::from_timestamp(i64::try_from(clock).ok()?, 0)
    }

    /// Check that every field this kind requires is present.
    pub fn validate(&self) -> Result<(), UpdateError> {
        for field in self.kind.required_fields() {
            if !self.has(field) {
                return Err(UpdateError::MissingField {
                    kind: self.kind,
                    field,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_routes_standard_fields() {
        let update = Update::new(Kind::Message)
            .with("id", 3u64)
            .with("from", "alice")
            .with("channel", "lobby")
            .with("text", "hi");
        assert_eq!(update.id(), Some(3));
        assert_eq!(update.from(), Some("alice"));
        assert_eq!(update.channel(), Some("lobby"));
        assert_eq!(update.text(), Some("hi"));
        assert!(update.get("id").is_none());
    }

    #[test]
    fn validation_follows_kind() {
        let partial = Update::new(Kind::Message).with("channel", "lobby");
        assert_eq!(
            partial.validate(),
            Err(UpdateError::MissingField {
                kind: Kind::Message,
                field: "text"
            })
        );
        assert!(partial.with("text", "hello").validate().is_ok());
        assert!(Update::new(Kind::Connect).validate().is_ok());
    }

    #[test]
    fn correlation_uses_update_id_for_failures() {
        let failure = Update::new(Kind::NoSuchChannel)
            .with_id(90)
            .with("update-id", 7u64);
        assert_eq!(failure.correlation_id(), Some(7));

        let reply = Update::new(Kind::Join).with_id(7);
        assert_eq!(reply.correlation_id(), Some(7));

        let server_failure = Update::new(Kind::ConnectionUnstable).with_id(12);
        assert_eq!(server_failure.correlation_id(), Some(12));
    }

    #[test]
    fn universal_clock_converts_to_unix() {
        let update = Update::new(Kind::Ping).with_clock(UNIVERSAL_UNIX_OFFSET + 60);
        assert_eq!(update.unix_clock().unwrap().timestamp(), 60);
        assert!(Update::new(Kind::Ping).with_clock(5).unix_clock().is_none());
        assert!(universal_now() > UNIVERSAL_UNIX_OFFSET);
    }

    #[test]
    fn equality_is_structural() {
        let a = Update::new(Kind::Join).with("channel", "x").with_from("bob");
        let b = Update::new(Kind::Join).with_from("bob").with("channel", "x");
        assert_eq!(a, b);
        assert_ne!(a, b.with("text", "extra"));
    }
}
