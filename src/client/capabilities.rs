//! Protocol extensions and per-channel permissions.

use std::collections::{HashMap, HashSet};

use crate::update::{Kind, Update};
use crate::wire::value::Value;

pub const CHANNEL_TREES: &str = "shirakumo-channel-trees";
pub const EMOTES: &str = "shirakumo-emotes";
pub const DATA: &str = "shirakumo-data";
pub const EDIT: &str = "shirakumo-edit";
pub const BACKFILL: &str = "shirakumo-backfill";
pub const CHANNEL_INFO: &str = "shirakumo-channel-info";
pub const PAUSE: &str = "shirakumo-pause";
pub const QUIET: &str = "shirakumo-quiet";
pub const REACTIONS: &str = "shirakumo-reactions";
pub const SERVER_MANAGEMENT: &str = "shirakumo-server-management";
pub const TYPING: &str = "shirakumo-typing";
pub const IP: &str = "shirakumo-ip";

/// Extensions this client offers during the handshake.
pub const CLIENT_EXTENSIONS: &[&str] = &[
    BACKFILL,
    CHANNEL_INFO,
    CHANNEL_TREES,
    DATA,
    EDIT,
    EMOTES,
    IP,
    PAUSE,
    QUIET,
    REACTIONS,
    SERVER_MANAGEMENT,
    TYPING,
];

/// Extensions the server confirmed for this connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtensionSet {
    names: HashSet<String>,
}

impl ExtensionSet {
    /// Read the `extensions` list from the server's `connect` reply.
    /// A missing or malformed list means nothing is supported.
    pub fn from_update(update: &Update) -> Self {
        let names = update
            .get("extensions")
            .map(Value::strings)
            .unwrap_or_default()
            .into_iter()
            .map(str::to_lowercase)
            .collect();
        Self { names }
    }

    pub fn is_supported(&self, name: &str) -> bool {
        self.names.contains(&name.to_lowercase())
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Update kinds the server says we may send, per channel.
#[derive(Debug, Default)]
pub(crate) struct Grants {
    channels: HashMap<String, HashSet<Kind>>,
}

impl Grants {
    /// Record a `capabilities` reply. Unknown kind names are ignored.
    pub fn observe(&mut self, update: &Update) {
        let Some(channel) = update.channel() else { return };
        let permitted = update
            .get("permitted")
            .and_then(Value::as_list)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_symbol().and_then(Kind::from_symbol))
                    .collect()
            })
            .unwrap_or_default();
        self.channels.insert(channel.to_lowercase(), permitted);
    }

    /// `None` when the server has not told us about this channel.
    pub fn is_permitted(&self, channel: &str, kind: Kind) -> Option<bool> {
        self.channels
            .get(&channel.to_lowercase())
            .map(|kinds| kinds.contains(&kind))
    }

    pub fn forget(&mut self, channel: &str) {
        self.channels.remove(&channel.to_lowercase());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::symbol::li;

    #[test]
    fn extensions_from_connect_reply() {
        let reply = Update::new(Kind::Connect)
            .with_from("server")
            .with("extensions", vec![CHANNEL_TREES, "Shirakumo-Data"]);
        let set = ExtensionSet::from_update(&reply);
        assert!(set.is_supported(CHANNEL_TREES));
        assert!(set.is_supported(DATA));
        assert!(!set.is_supported(EMOTES));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn missing_extensions_means_none() {
        let set = ExtensionSet::from_update(&Update::new(Kind::Connect));
        assert!(set.is_empty());
        let set = ExtensionSet::from_update(&Update::new(Kind::Connect).with("extensions", 3u64));
        assert!(set.is_empty());
    }

    #[test]
    fn grants_track_permitted_kinds() {
        let mut grants = Grants::default();
        assert_eq!(grants.is_permitted("lobby", Kind::Message), None);

        grants.observe(&Update::new(Kind::Capabilities).with("channel", "Lobby").with(
            "permitted",
            Value::List(vec![
                Value::Symbol(li("message")),
                Value::Symbol(li("leave")),
                Value::Symbol(li("no-such-kind")),
            ]),
        ));
        assert_eq!(grants.is_permitted("lobby", Kind::Message), Some(true));
        assert_eq!(grants.is_permitted("lobby", Kind::Kick), Some(false));

        grants.forget("lobby");
        assert_eq!(grants.is_permitted("lobby", Kind::Message), None);
    }
}
