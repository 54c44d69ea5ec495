//! User slash-command parser.
//!
//! Parses `/command arg1 arg2 ...` input lines into typed [`ParsedCommand`]
//! values. Arguments are split on whitespace; double quotes group words.
//! Most channel-scoped commands take the channel last and fall back to the
//! current channel when it is omitted.

/// A parsed user command. Each variant corresponds to a `/command`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedCommand {
    Connect { server: Option<String> },
    Disconnect,
    Quit,
    Help { topic: Option<String> },
    Switch { channel: String },
    Join { channel: String },
    Leave { channel: Option<String> },
    Create { channel: Option<String> },
    Pull { user: String, channel: Option<String> },
    Kick { user: String, channel: Option<String> },
    KickBan { user: String, channel: Option<String> },
    Register { password: String },
    SetChannelInfo { key: String, value: String, channel: Option<String> },
    ChannelInfo { key: Option<String>, channel: Option<String> },
    Topic { text: Option<String> },
    Pause { seconds: u64, channel: Option<String> },
    Quiet { target: String, channel: Option<String> },
    Unquiet { target: String, channel: Option<String> },
    Ban { target: String },
    Unban { target: String },
    IpBan { ip: String, mask: String },
    IpUnban { ip: String, mask: String },
    Message { channel: String, text: String },
    Users { channel: Option<String> },
    Channels { channel: Option<String> },
    UserInfo { target: String },
    Grant { update: String, target: Option<String>, channel: Option<String> },
    Deny { update: String, target: Option<String>, channel: Option<String> },
}

/// Mask used by `ip-ban`/`ip-unban` when none is given: compare every bit.
pub const DEFAULT_IP_MASK: &str = "::";

/// Command names and one-line descriptions, for `/help`.
pub const HELP: &[(&str, &str)] = &[
    ("connect", "[server] Connect to a configured server, or all auto-connect servers."),
    ("disconnect", "Disconnect from the current server."),
    ("quit", "Disconnect and exit."),
    ("help", "[command] Show help."),
    ("switch", "channel Make a joined channel the current one."),
    ("join", "channel Join an existing channel."),
    ("leave", "[channel] Leave a channel. Defaults to the current channel."),
    ("create", "[channel] Create a channel. Without a name an anonymous channel is created."),
    ("pull", "user [channel] Pull another user into a channel."),
    ("kick", "user [channel] Kick another user from a channel."),
    ("kickban", "user [channel] Kick a user and remove their join permission."),
    ("register", "password Register your username. The password is saved to the config."),
    ("set-channel-info", "key value [channel] Set channel information, e.g. :topic or :rules."),
    ("channel-info", "[key] [channel] Request channel information. Without a key, all of it."),
    ("topic", "[text] View or set the topic of the current channel."),
    ("pause", "[seconds] [channel] Set pause mode. Without a time, pause mode ends."),
    ("quiet", "user [channel] Hide a user's messages from the channel."),
    ("unquiet", "user [channel] Allow a quieted user to message again."),
    ("ban", "user Ban a username from the server."),
    ("unban", "user Unban a username."),
    ("ip-ban", "ip [mask] Ban an IP address. Set bits in the mask are ignored."),
    ("ip-unban", "ip [mask] Unban an IP address."),
    ("message", "channel text Send a message to the given channel."),
    ("users", "[channel] List the users of a channel."),
    ("channels", "[channel] List channels, below the given one with channel trees."),
    ("user-info", "user Request information on a user."),
    ("grant", "update [user] [channel] Allow an update kind, for one user or everyone."),
    ("deny", "update [user] [channel] Deny an update kind, for one user or everyone but you."),
];

/// Parse a slash-command string into a [`ParsedCommand`].
///
/// Returns `None` if the input does not start with `/`, is not a recognized
/// command, or lacks a required argument. Commands are case-insensitive.
pub fn parse_command(input: &str) -> Option<ParsedCommand> {
    let input = input.trim();
    let body = input.strip_prefix('/')?;
    let (cmd, rest) = match body.split_once(char::is_whitespace) {
        Some((cmd, rest)) => (cmd, rest.trim()),
        None => (body, ""),
    };
    let cmd = cmd.to_lowercase();
    let args = split_args(rest);
    let arg = |i: usize| args.get(i).cloned();

    match cmd.as_str() {
        "connect" => Some(ParsedCommand::Connect { server: arg(0) }),
        "disconnect" | "dc" => Some(ParsedCommand::Disconnect),
        "quit" | "exit" => Some(ParsedCommand::Quit),
        "help" | "h" => Some(ParsedCommand::Help { topic: arg(0) }),
        "switch" | "buffer" => Some(ParsedCommand::Switch { channel: arg(0)? }),
        "join" | "j" => Some(ParsedCommand::Join { channel: arg(0)? }),
        "leave" | "part" => Some(ParsedCommand::Leave { channel: arg(0) }),
        "create" => Some(ParsedCommand::Create { channel: arg(0) }),
        "pull" | "invite" => Some(ParsedCommand::Pull {
            user: arg(0)?,
            channel: arg(1),
        }),
        "kick" => Some(ParsedCommand::Kick {
            user: arg(0)?,
            channel: arg(1),
        }),
        "kickban" => Some(ParsedCommand::KickBan {
            user: arg(0)?,
            channel: arg(1),
        }),
        "register" => Some(ParsedCommand::Register { password: arg(0)? }),
        "set-channel-info" => Some(ParsedCommand::SetChannelInfo {
            key: arg(0)?,
            value: arg(1)?,
            channel: arg(2),
        }),
        "channel-info" => Some(ParsedCommand::ChannelInfo {
            key: arg(0),
            channel: arg(1),
        }),
        "topic" | "t" => {
            let text = (!rest.is_empty()).then(|| rest.to_string());
            Some(ParsedCommand::Topic { text })
        }
        "pause" => {
            let seconds = match arg(0) {
                Some(s) => s.parse().ok()?,
                None => 0,
            };
            Some(ParsedCommand::Pause {
                seconds,
                channel: arg(1),
            })
        }
        "quiet" => Some(ParsedCommand::Quiet {
            target: arg(0)?,
            channel: arg(1),
        }),
        "unquiet" => Some(ParsedCommand::Unquiet {
            target: arg(0)?,
            channel: arg(1),
        }),
        "ban" => Some(ParsedCommand::Ban { target: arg(0)? }),
        "unban" => Some(ParsedCommand::Unban { target: arg(0)? }),
        "ip-ban" => Some(ParsedCommand::IpBan {
            ip: arg(0)?,
            mask: arg(1).unwrap_or_else(|| DEFAULT_IP_MASK.to_string()),
        }),
        "ip-unban" => Some(ParsedCommand::IpUnban {
            ip: arg(0)?,
            mask: arg(1).unwrap_or_else(|| DEFAULT_IP_MASK.to_string()),
        }),
        "message" | "msg" => {
            let channel = arg(0)?;
            let text = args.get(1..).map(|words| words.join(" ")).unwrap_or_default();
            if text.is_empty() {
                return None;
            }
            Some(ParsedCommand::Message { channel, text })
        }
        "users" | "names" => Some(ParsedCommand::Users { channel: arg(0) }),
        "channels" | "list" => Some(ParsedCommand::Channels { channel: arg(0) }),
        "user-info" | "whois" => Some(ParsedCommand::UserInfo { target: arg(0)? }),
        "grant" => Some(ParsedCommand::Grant {
            update: arg(0)?,
            target: arg(1),
            channel: arg(2),
        }),
        "deny" => Some(ParsedCommand::Deny {
            update: arg(0)?,
            target: arg(1),
            channel: arg(2),
        }),
        _ => None,
    }
}

/// Split on whitespace, keeping double-quoted runs together.
/// A backslash inside quotes escapes the next character.
fn split_args(input: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quoted = false;
    let mut chars = input.chars();

    while let Some(c) = chars.next() {
        match c {
            '"' => {
                quoted = !quoted;
                in_word = true;
            }
            '\\' if quoted => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            c if c.is_whitespace() && !quoted => {
                if in_word {
                    args.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            c => {
                current.push(c);
                in_word = true;
            }
        }
    }
    if in_word {
        args.push(current);
    }
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_a_command() {
        assert_eq!(parse_command("hello"), None);
        assert_eq!(parse_command("/frobnicate"), None);
    }

    #[test]
    fn test_join_and_leave() {
        assert_eq!(
            parse_command("/join lichatters"),
            Some(ParsedCommand::Join {
                channel: "lichatters".into()
            })
        );
        assert_eq!(parse_command("/join"), None);
        assert_eq!(
            parse_command("/LEAVE"),
            Some(ParsedCommand::Leave { channel: None })
        );
    }

    #[test]
    fn test_channel_defaults_last() {
        assert_eq!(
            parse_command("/kick bob"),
            Some(ParsedCommand::Kick {
                user: "bob".into(),
                channel: None
            })
        );
        assert_eq!(
            parse_command("/kickban bob lobby"),
            Some(ParsedCommand::KickBan {
                user: "bob".into(),
                channel: Some("lobby".into())
            })
        );
    }

    #[test]
    fn test_quoted_arguments() {
        assert_eq!(
            parse_command(r#"/set-channel-info :topic "Welcome to \"lobby\"" lobby"#),
            Some(ParsedCommand::SetChannelInfo {
                key: ":topic".into(),
                value: "Welcome to \"lobby\"".into(),
                channel: Some("lobby".into())
            })
        );
        assert_eq!(split_args(r#"a "" b"#), vec!["a", "", "b"]);
    }

    #[test]
    fn test_topic_keeps_whole_text() {
        assert_eq!(
            parse_command("/topic  news of the day "),
            Some(ParsedCommand::Topic {
                text: Some("news of the day".into())
            })
        );
        assert_eq!(parse_command("/topic"), Some(ParsedCommand::Topic { text: None }));
    }

    #[test]
    fn test_pause() {
        assert_eq!(
            parse_command("/pause"),
            Some(ParsedCommand::Pause {
                seconds: 0,
                channel: None
            })
        );
        assert_eq!(
            parse_command("/pause 30 lobby"),
            Some(ParsedCommand::Pause {
                seconds: 30,
                channel: Some("lobby".into())
            })
        );
        assert_eq!(parse_command("/pause soon"), None);
    }

    #[test]
    fn test_message_and_ip_ban() {
        assert_eq!(
            parse_command("/msg lobby hello there"),
            Some(ParsedCommand::Message {
                channel: "lobby".into(),
                text: "hello there".into()
            })
        );
        assert_eq!(parse_command("/msg lobby"), None);
        assert_eq!(
            parse_command("/ip-ban 10.0.0.1"),
            Some(ParsedCommand::IpBan {
                ip: "10.0.0.1".into(),
                mask: DEFAULT_IP_MASK.into()
            })
        );
    }

    #[test]
    fn test_help_lists_every_command() {
        for (name, _) in HELP {
            let line = match *name {
                "switch" | "join" | "register" | "ban" | "unban" | "user-info" | "pull"
                | "kick" | "kickban" | "quiet" | "unquiet" | "ip-ban" | "ip-unban" | "grant"
                | "deny" => format!("/{} x", name),
                "set-channel-info" | "message" => format!("/{} x y", name),
                _ => format!("/{}", name),
            };
            assert!(parse_command(&line).is_some(), "{} did not parse", line);
        }
    }
}
