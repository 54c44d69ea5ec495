//! Channels the local user is in, and what the server told us about them.

use std::collections::{BTreeMap, HashMap};

use crate::update::{Kind, Update};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelState {
    pub name: String,
    /// Channel info keyed by its keyword name without the colon, e.g. `topic`.
    pub info: BTreeMap<String, String>,
}

impl ChannelState {
    pub fn topic(&self) -> Option<&str> {
        self.info.get("topic").map(String::as_str)
    }
}

/// Joined channels, keyed case-insensitively.
#[derive(Debug, Default)]
pub struct Channels {
    joined: HashMap<String, ChannelState>,
}

impl Channels {
    /// Track membership and channel info from one update.
    /// `username` is the local user's name as sent during the handshake.
    pub(crate) fn observe(&mut self, username: &str, update: &Update) {
        let Some(channel) = update.channel() else { return };
        let own = update
            .from()
            .is_some_and(|from| from.eq_ignore_ascii_case(username));
        match update.kind() {
            Kind::Join if own => {
                self.joined
                    .entry(channel.to_lowercase())
                    .or_insert_with(|| ChannelState {
                        name: channel.to_string(),
                        info: BTreeMap::new(),
                    });
            }
            Kind::Leave if own => {
                self.joined.remove(&channel.to_lowercase());
            }
            Kind::Kick if update.target().is_some_and(|t| t.eq_ignore_ascii_case(username)) => {
                self.joined.remove(&channel.to_lowercase());
            }
            Kind::Destroy => {
                self.joined.remove(&channel.to_lowercase());
            }
            Kind::SetChannelInfo => {
                let (Some(key), Some(text)) = (
                    update.get("key").and_then(|v| v.as_symbol()),
                    update.text(),
                ) else {
                    return;
                };
                if let Some(state) = self.joined.get_mut(&channel.to_lowercase()) {
                    state.info.insert(key.name().to_string(), text.to_string());
                }
            }
            _ => {}
        }
    }

    pub fn get(&self, name: &str) -> Option<&ChannelState> {
        self.joined.get(&name.to_lowercase())
    }

    pub fn is_joined(&self, name: &str) -> bool {
        self.joined.contains_key(&name.to_lowercase())
    }

    /// Joined channel names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.joined.values().map(|c| c.name.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.joined.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joined.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::symbol::kw;

    #[test]
    fn tracks_own_membership_only() {
        let mut channels = Channels::default();
        channels.observe("alice", &Update::new(Kind::Join).with_from("alice").with("channel", "Lobby"));
        channels.observe("alice", &Update::new(Kind::Join).with_from("bob").with("channel", "other"));
        assert_eq!(channels.names(), vec!["Lobby"]);
        assert!(channels.is_joined("lobby"));

        channels.observe("alice", &Update::new(Kind::Leave).with_from("bob").with("channel", "lobby"));
        assert!(channels.is_joined("lobby"));
        channels.observe("alice", &Update::new(Kind::Leave).with_from("Alice").with("channel", "lobby"));
        assert!(channels.is_empty());
    }

    #[test]
    fn kick_removes_target() {
        let mut channels = Channels::default();
        channels.observe("alice", &Update::new(Kind::Join).with_from("alice").with("channel", "x"));
        channels.observe(
            "alice",
            &Update::new(Kind::Kick).with_from("op").with("channel", "x").with("target", "alice"),
        );
        assert!(!channels.is_joined("x"));
    }

    #[test]
    fn records_channel_info() {
        let mut channels = Channels::default();
        channels.observe("alice", &Update::new(Kind::Join).with_from("alice").with("channel", "x"));
        channels.observe(
            "alice",
            &Update::new(Kind::SetChannelInfo)
                .with("channel", "x")
                .with("key", kw("topic"))
                .with("text", "welcome"),
        );
        assert_eq!(channels.get("x").and_then(ChannelState::topic), Some("welcome"));
    }
}
