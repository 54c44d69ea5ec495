//! The closed set of update kinds and their classification.

use std::fmt;

use crate::wire::symbol::{li, Symbol};

/// Coarse classification used for routing and default-channel substitution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Class {
    /// Not scoped to a channel.
    Update,
    /// Carries a `channel` field.
    ChannelUpdate,
    /// Uncorrelated server failure.
    Failure,
    /// Failure answering one specific local update, named by `update-id`.
    UpdateFailure,
}

macro_rules! kinds {
    ($($variant:ident => $name:literal, $class:ident;)*) => {
        /// Every update kind this client understands.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum Kind {
            $($variant,)*
        }

        impl Kind {
            pub const ALL: &'static [Kind] = &[$(Kind::$variant,)*];

            /// Wire name, e.g. `set-channel-info`.
            pub fn name(self) -> &'static str {
                match self {
                    $(Kind::$variant => $name,)*
                }
            }

            pub fn class(self) -> Class {
                match self {
                    $(Kind::$variant => Class::$class,)*
                }
            }

            pub fn from_name(name: &str) -> Option<Kind> {
                match name.to_lowercase().as_str() {
                    $($name => Some(Kind::$variant),)*
                    _ => None,
                }
            }
        }
    };
}

kinds! {
    Ping => "ping", Update;
    Pong => "pong", Update;
    Connect => "connect", Update;
    Disconnect => "disconnect", Update;
    Register => "register", Update;
    Channels => "channels", Update;
    UserInfo => "user-info", Update;
    ServerInfo => "server-info", Update;
    SetUserInfo => "set-user-info", Update;
    Kill => "kill", Update;
    Ban => "ban", Update;
    Unban => "unban", Update;
    Blacklist => "blacklist", Update;
    IpBan => "ip-ban", Update;
    IpUnban => "ip-unban", Update;
    IpBlacklist => "ip-blacklist", Update;
    Emote => "emote", Update;
    Emotes => "emotes", Update;

    Join => "join", ChannelUpdate;
    Leave => "leave", ChannelUpdate;
    Create => "create", ChannelUpdate;
    Kick => "kick", ChannelUpdate;
    Pull => "pull", ChannelUpdate;
    Permissions => "permissions", ChannelUpdate;
    Grant => "grant", ChannelUpdate;
    Deny => "deny", ChannelUpdate;
    Message => "message", ChannelUpdate;
    Users => "users", ChannelUpdate;
    Backfill => "backfill", ChannelUpdate;
    Data => "data", ChannelUpdate;
    Edit => "edit", ChannelUpdate;
    React => "react", ChannelUpdate;
    ChannelInfo => "channel-info", ChannelUpdate;
    SetChannelInfo => "set-channel-info", ChannelUpdate;
    Pause => "pause", ChannelUpdate;
    Quiet => "quiet", ChannelUpdate;
    Unquiet => "unquiet", ChannelUpdate;
    Destroy => "destroy", ChannelUpdate;
    Typing => "typing", ChannelUpdate;
    Capabilities => "capabilities", ChannelUpdate;

    Failure => "failure", Failure;
    MalformedUpdate => "malformed-update", Failure;
    UpdateTooLong => "update-too-long", Failure;
    ConnectionUnstable => "connection-unstable", Failure;
    TooManyConnections => "too-many-connections", Failure;

    UpdateFailure => "update-failure", UpdateFailure;
    InvalidUpdate => "invalid-update", UpdateFailure;
    UsernameMismatch => "username-mismatch", UpdateFailure;
    IncompatibleVersion => "incompatible-version", UpdateFailure;
    InvalidPassword => "invalid-password", UpdateFailure;
    NoSuchProfile => "no-such-profile", UpdateFailure;
    UsernameTaken => "username-taken", UpdateFailure;
    NoSuchChannel => "no-such-channel", UpdateFailure;
    NoSuchParent => "no-such-parent", UpdateFailure;
    RegistrationRejected => "registration-rejected", UpdateFailure;
    AlreadyInChannel => "already-in-channel", UpdateFailure;
    NotInChannel => "not-in-channel", UpdateFailure;
    ChannelnameTaken => "channelname-taken", UpdateFailure;
    BadName => "bad-name", UpdateFailure;
    InsufficientPermissions => "insufficient-permissions", UpdateFailure;
    InvalidPermissions => "invalid-permissions", UpdateFailure;
    NoSuchUser => "no-such-user", UpdateFailure;
    TooManyUpdates => "too-many-updates", UpdateFailure;
    BadContentType => "bad-content-type", UpdateFailure;
    NoSuchChannelInfo => "no-such-channel-info", UpdateFailure;
    MalformedChannelInfo => "malformed-channel-info", UpdateFailure;
    NoSuchUserInfo => "no-such-user-info", UpdateFailure;
    MalformedUserInfo => "malformed-user-info", UpdateFailure;
    ClockSkewed => "clock-skewed", UpdateFailure;
}

impl Kind {
    pub fn symbol(self) -> Symbol {
        li(self.name())
    }

    pub fn from_symbol(symbol: Symbol) -> Option<Kind> {
        Kind::from_name(symbol.name())
    }

    pub fn is_failure(self) -> bool {
        matches!(self.class(), Class::Failure | Class::UpdateFailure)
    }

    pub fn is_update_failure(self) -> bool {
        self.class() == Class::UpdateFailure
    }

    pub fn is_channel_update(self) -> bool {
        self.class() == Class::ChannelUpdate
    }

    /// Fields an outbound update of this kind must carry beyond id/clock/from.
    pub fn required_fields(self) -> &'static [&'static str] {
        use Kind::*;
        match self {
            Message => &["channel", "text"],
            Join | Leave | Users | Destroy | Backfill | Permissions | Typing | Capabilities => {
                &["channel"]
            }
            Kick | Pull | Quiet | Unquiet => &["channel", "target"],
            Grant | Deny => &["channel", "target", "update"],
            Data => &["channel", "content-type", "payload"],
            Edit => &["channel", "text"],
            React => &["channel", "target", "update-id", "emote"],
            ChannelInfo => &["channel", "key"],
            SetChannelInfo => &["channel", "key", "text"],
            Pause => &["channel", "by"],
            Register => &["password"],
            Kill | Ban | Unban | UserInfo | ServerInfo => &["target"],
            IpBan | IpUnban => &["ip", "mask"],
            SetUserInfo => &["key", "text"],
            Emote => &["name", "content-type", "payload"],
            kind if kind.is_update_failure() => &["update-id"],
            _ => &[],
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        for kind in Kind::ALL {
            assert_eq!(Kind::from_name(kind.name()), Some(*kind));
            assert_eq!(Kind::from_symbol(kind.symbol()), Some(*kind));
        }
        assert_eq!(Kind::from_name("SET-CHANNEL-INFO"), Some(Kind::SetChannelInfo));
        assert_eq!(Kind::from_name("frobnicate"), None);
    }

    #[test]
    fn classification() {
        assert!(Kind::Join.is_channel_update());
        assert!(!Kind::Ban.is_channel_update());
        assert!(Kind::NoSuchChannel.is_update_failure());
        assert!(Kind::NoSuchChannel.is_failure());
        assert!(Kind::ConnectionUnstable.is_failure());
        assert!(!Kind::ConnectionUnstable.is_update_failure());
        assert!(!Kind::Message.is_failure());
    }

    #[test]
    fn required_fields_per_kind() {
        assert_eq!(Kind::Message.required_fields(), &["channel", "text"]);
        assert_eq!(Kind::InvalidPassword.required_fields(), &["update-id"]);
        assert!(Kind::Connect.required_fields().is_empty());
        assert!(Kind::Create.required_fields().is_empty());
    }
}
