use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use lichat::client::{ChannelState, Client, Selector, Session};
use lichat::commands::{parse_command, ParsedCommand, HELP};
use lichat::config::{self, AppConfig, ServerConfig};
use lichat::error::{ClientError, ClientResult};
use lichat::logging::{self, Transcript};
use lichat::update::{Kind, Update};
use lichat::wire::reader::read_value;
use lichat::wire::symbol::{kw, li};
use lichat::wire::value::Value;

/// Host-side state shared by the handlers.
struct Host {
    config: AppConfig,
    server: String,
    current: Option<String>,
    transcript: Transcript,
}

type Shared = Rc<RefCell<Host>>;

enum Flow {
    Continue,
    Quit,
    Connect(Option<String>),
    Disconnect,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cfg = config::load_config()?;
    logging::init(&cfg.logging)?;

    let name = std::env::args()
        .nth(1)
        .or_else(|| cfg.servers.iter().find(|s| s.auto_connect).map(|s| s.name.clone()))
        .or_else(|| cfg.servers.first().map(|s| s.name.clone()))
        .with_context(|| format!("No servers configured in {}", config::config_path().display()))?;

    if let Err(e) = run(cfg, &name).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
    Ok(())
}

async fn run(cfg: AppConfig, name: &str) -> Result<()> {
    let mut server = cfg
        .server(name)
        .cloned()
        .with_context(|| format!("No server named {}", name))?;
    let host: Shared = Rc::new(RefCell::new(Host {
        config: cfg.clone(),
        server: server.name.clone(),
        current: None,
        transcript: Transcript::new(&cfg.logging),
    }));
    let mut client = build_client(&cfg, &server, &host);

    let idle = cfg.behavior.idle_timeout();
    let delay = cfg.behavior.reconnect_delay();
    let mut reconnect_at = Some(Instant::now());
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut tick = tokio::time::interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            line = stdin.next_line() => {
                let Some(line) = line.context("Failed to read input")? else {
                    break;
                };
                match handle_line(&mut client, &host, &line) {
                    Flow::Continue => {}
                    Flow::Quit => break,
                    Flow::Disconnect => {
                        client.disconnect();
                        reconnect_at = None;
                    }
                    Flow::Connect(None) => {
                        if !client.session().is_connected() {
                            reconnect_at = Some(Instant::now());
                        }
                    }
                    Flow::Connect(Some(name)) => match cfg.server(&name) {
                        Some(next) => {
                            client.disconnect();
                            server = next.clone();
                            {
                                let mut host = host.borrow_mut();
                                host.server = server.name.clone();
                                host.current = None;
                            }
                            client = build_client(&cfg, &server, &host);
                            reconnect_at = Some(Instant::now());
                        }
                        None => eprintln!("No such server {}", name),
                    },
                }
            }
            _ = client.readable() => {
                if let Err(e) = client.pump() {
                    report(&e);
                    reconnect_at = Some(Instant::now() + delay);
                }
            }
            _ = tick.tick() => {
                if let (Some(idle), Some(last)) = (idle, client.last_traffic()) {
                    if client.session().is_connected() && last.elapsed() > idle {
                        warn!(?idle, "no traffic, reconnecting");
                        client.disconnect();
                        reconnect_at = Some(Instant::now() + delay);
                    }
                }
                let due = reconnect_at.is_some_and(|at| Instant::now() >= at);
                if due && !client.session().is_connected() {
                    reconnect_at = None;
                    println!("Connecting to {} ({}:{})...", server.name, server.host, server.port);
                    match client.connect(&server.host, server.port, server.tls).await {
                        Ok(()) => info!(server = %server.name, "session started"),
                        Err(e @ ClientError::ConnectionFailed { .. }) => report(&e),
                        Err(e) => {
                            report(&e);
                            reconnect_at = Some(Instant::now() + delay);
                        }
                    }
                }
            }
        }
    }

    client.disconnect();
    Ok(())
}

fn report(error: &ClientError) {
    eprintln!("error [{}]: {}", error.code(), error);
}

fn report_send(result: ClientResult<u64>) {
    if let Err(e) = result {
        report(&e);
    }
}

/// Where an update belongs: the origin's channel for failures we caused,
/// else its own channel, else the server.
fn display_channel(session: &Session, update: &Update) -> String {
    if update.is_update_failure() {
        let origin = session
            .origin(update)
            .filter(|origin| origin.kind() != Kind::Leave)
            .and_then(Update::channel);
        if let Some(channel) = origin {
            return channel.to_string();
        }
    }
    update
        .channel()
        .or_else(|| session.servername())
        .unwrap_or("*")
        .to_string()
}

fn show(host: &Shared, session: &Session, update: &Update, text: Option<String>) {
    let channel = display_channel(session, update);
    let from = update.from().unwrap_or("*");
    let line = match text {
        Some(text) => format!("{}: {}", from, text),
        None => Transcript::format_line(update).unwrap_or_else(|| {
            format!("{}: {}", from, update.text().unwrap_or(update.kind().name()))
        }),
    };
    println!("[{}] {}", channel, line);

    let mut host = host.borrow_mut();
    let server = host.server.clone();
    host.transcript.record(&server, &channel, update);
}

fn build_client(cfg: &AppConfig, server: &ServerConfig, host: &Shared) -> Client {
    let mut client = Client::new(server.profile(), cfg.behavior.client_options(server));

    {
        let host = Rc::clone(host);
        let channels = server.channels.clone();
        client.add_handler(Kind::Connect, move |session: &mut Session, update: &Update| {
            let text = format!("connected as {}", session.username());
            show(&host, session, update, Some(text));
            for channel in &channels {
                let join = Update::new(Kind::Join).with("channel", channel.as_str());
                report_send(session.send(join));
            }
        });
    }
    for kind in [Kind::Message, Kind::Edit, Kind::Leave, Kind::Kick] {
        let host = Rc::clone(host);
        client.add_handler(kind, move |session: &mut Session, update: &Update| {
            show(&host, session, update, None)
        });
    }
    {
        let host = Rc::clone(host);
        client.add_handler(Kind::Join, move |session: &mut Session, update: &Update| {
            let own = update.from() == Some(session.username());
            if own && host.borrow().current.is_none() {
                host.borrow_mut().current = update.channel().map(str::to_string);
            }
            show(&host, session, update, None)
        });
    }
    {
        let host = Rc::clone(host);
        client.add_handler(Kind::Pause, move |session: &mut Session, update: &Update| {
            let channel = update.channel().unwrap_or("?");
            let text = match update.get("by").and_then(Value::as_u64).unwrap_or(0) {
                0 => format!("has disabled pause mode in {}", channel),
                by => format!("has enabled pause mode by {} in {}", by, channel),
            };
            show(&host, session, update, Some(text))
        });
    }
    {
        let host = Rc::clone(host);
        client.add_handler(Kind::Data, move |session: &mut Session, update: &Update| {
            let text = format!(
                "sent file {} ({})",
                update.get_str("filename").unwrap_or("unnamed"),
                update.get_str("content-type").unwrap_or("unknown type")
            );
            show(&host, session, update, Some(text))
        });
    }
    {
        let host = Rc::clone(host);
        client.add_handler(Kind::SetChannelInfo, move |session: &mut Session, update: &Update| {
            let key = update
                .get("key")
                .and_then(Value::as_symbol)
                .map(|key| key.name())
                .unwrap_or("?");
            let text = format!("{}: {}", key, update.text().unwrap_or_default());
            show(&host, session, update, Some(text))
        });
    }
    {
        let host = Rc::clone(host);
        client.add_handler(Kind::Disconnect, move |session: &mut Session, update: &Update| {
            let text = match update.text() {
                Some(reason) => format!("disconnected: {}", reason),
                None => "disconnected".to_string(),
            };
            show(&host, session, update, Some(text))
        });
    }
    {
        let host = Rc::clone(host);
        client.add_handler(Selector::Failure, move |session: &mut Session, update: &Update| {
            show(&host, session, update, None)
        });
    }
    client
}

fn handle_line(client: &mut Client, host: &Shared, line: &str) -> Flow {
    let line = line.trim_end();
    if line.is_empty() {
        return Flow::Continue;
    }
    if !line.starts_with('/') {
        let Some(channel) = host.borrow().current.clone() else {
            eprintln!("Join a channel first (/join <channel>)");
            return Flow::Continue;
        };
        let message = Update::new(Kind::Message)
            .with("channel", channel)
            .with("text", line);
        report_send(client.send(message));
        return Flow::Continue;
    }
    match parse_command(line) {
        Some(command) => run_command(client, host, command),
        None => {
            eprintln!("Unknown command or missing argument: {} (try /help)", line);
            Flow::Continue
        }
    }
}

/// Send `update` and print `message` once the server confirms it.
/// Rejections are shown by the failure handler.
fn send_confirm(client: &mut Client, host: &Shared, update: Update, message: String) {
    let host = Rc::clone(host);
    report_send(client.send_with_callback(
        update,
        move |session: &mut Session, _: &Update, reply: &Update| {
            if !reply.is_failure() {
                show(&host, session, reply, Some(message));
            }
        },
    ));
}

fn parse_key(key: &str) -> Option<Value> {
    read_value(key).ok().filter(|value| value.as_symbol().is_some())
}

fn run_command(client: &mut Client, host: &Shared, command: ParsedCommand) -> Flow {
    let current = host.borrow().current.clone().unwrap_or_default();
    let channel = |requested: Option<String>| -> String {
        client.session().qualify_channel(&current, requested.as_deref())
    };

    match command {
        ParsedCommand::Quit => return Flow::Quit,
        ParsedCommand::Connect { server } => return Flow::Connect(server),
        ParsedCommand::Disconnect => return Flow::Disconnect,
        ParsedCommand::Help { topic } => {
            for (name, description) in HELP {
                if topic.as_deref().is_none_or(|t| t.eq_ignore_ascii_case(name)) {
                    println!("/{}\t{}", name, description);
                }
            }
        }
        ParsedCommand::Switch { channel: name } => {
            let joined = client
                .session()
                .channels()
                .and_then(|c| c.get(&name))
                .map(|c| c.name.clone());
            match joined {
                Some(name) => host.borrow_mut().current = Some(name),
                None => eprintln!("Not in channel {}", name),
            }
        }
        ParsedCommand::Join { channel: name } => {
            let target = channel(Some(name));
            let host = Rc::clone(host);
            report_send(client.send_with_callback(
                Update::new(Kind::Join).with("channel", target),
                move |session: &mut Session, _: &Update, reply: &Update| {
                    if reply.kind() == Kind::Join {
                        host.borrow_mut().current = reply.channel().map(str::to_string);
                        show(&host, session, reply, None);
                    }
                },
            ));
        }
        ParsedCommand::Leave { channel: name } => {
            let target = channel(name);
            report_send(client.send(Update::new(Kind::Leave).with("channel", target.as_str())));
            let mut host = host.borrow_mut();
            if host.current.as_deref() == Some(target.as_str()) {
                host.current = None;
            }
        }
        ParsedCommand::Create { channel: name } => {
            let mut create = Update::new(Kind::Create);
            if let Some(name) = name {
                create.set("channel", channel(Some(name)));
            }
            report_send(client.send(create));
        }
        ParsedCommand::Pull { user, channel: name } => {
            let pull = Update::new(Kind::Pull)
                .with("channel", channel(name))
                .with("target", user);
            report_send(client.send(pull));
        }
        ParsedCommand::Kick { user, channel: name } => {
            let kick = Update::new(Kind::Kick)
                .with("channel", channel(name))
                .with("target", user);
            report_send(client.send(kick));
        }
        ParsedCommand::KickBan { user, channel: name } => {
            let target = channel(name);
            let deny = Update::new(Kind::Deny)
                .with("channel", target.as_str())
                .with("target", user.as_str())
                .with("update", li("join"));
            report_send(client.send(deny));
            let kick = Update::new(Kind::Kick)
                .with("channel", target)
                .with("target", user);
            report_send(client.send(kick));
        }
        ParsedCommand::Register { password } => {
            let host = Rc::clone(host);
            let register = Update::new(Kind::Register).with("password", password.as_str());
            report_send(client.send_with_callback(
                register,
                move |session: &mut Session, _: &Update, reply: &Update| {
                    if reply.kind() != Kind::Register {
                        return;
                    }
                    session.set_password(Some(password.clone()));
                    let saved = {
                        let mut host = host.borrow_mut();
                        let name = host.server.clone();
                        if let Some(server) = host.config.server_mut(&name) {
                            server.password = Some(password);
                        }
                        config::save_config(&host.config)
                    };
                    let text = match saved {
                        Ok(()) => "Profile registered. Password has been saved.".to_string(),
                        Err(e) => format!("Profile registered, but saving the password failed: {:#}", e),
                    };
                    show(&host, session, reply, Some(text));
                },
            ));
        }
        ParsedCommand::SetChannelInfo { key, value, channel: name } => match parse_key(&key) {
            Some(key) => {
                let update = Update::new(Kind::SetChannelInfo)
                    .with("channel", channel(name))
                    .with("key", key)
                    .with("text", value);
                report_send(client.send(update));
            }
            None => eprintln!("{} is not a symbol, try :{}", key, key),
        },
        ParsedCommand::ChannelInfo { key, channel: name } => {
            let key = match key {
                Some(key) => match parse_key(&key) {
                    Some(key) => key,
                    None => {
                        eprintln!("{} is not a symbol, try :{}", key, key);
                        return Flow::Continue;
                    }
                },
                None => Value::from(true),
            };
            let update = Update::new(Kind::ChannelInfo)
                .with("channel", channel(name))
                .with("key", key);
            report_send(client.send(update));
        }
        ParsedCommand::Topic { text: None } => {
            let topic = client
                .session()
                .channels()
                .and_then(|c| c.get(&current))
                .and_then(ChannelState::topic)
                .map(str::to_string);
            println!("[{}] topic: {}", current, topic.as_deref().unwrap_or("(none)"));
        }
        ParsedCommand::Topic { text: Some(text) } => {
            let update = Update::new(Kind::SetChannelInfo)
                .with("channel", channel(None))
                .with("key", kw("topic"))
                .with("text", text);
            report_send(client.send(update));
        }
        ParsedCommand::Pause { seconds, channel: name } => {
            let pause = Update::new(Kind::Pause)
                .with("channel", channel(name))
                .with("by", seconds);
            report_send(client.send(pause));
        }
        ParsedCommand::Quiet { target, channel: name } => {
            let message = format!(
                "The user {} has been quieted. Their messages will no longer be visible.",
                target
            );
            let quiet = Update::new(Kind::Quiet)
                .with("channel", channel(name))
                .with("target", target);
            send_confirm(client, host, quiet, message);
        }
        ParsedCommand::Unquiet { target, channel: name } => {
            let message = format!("The user {} has been allowed messaging again.", target);
            let unquiet = Update::new(Kind::Unquiet)
                .with("channel", channel(name))
                .with("target", target);
            send_confirm(client, host, unquiet, message);
        }
        ParsedCommand::Ban { target } => {
            let message = format!("The user {} has been banned.", target);
            send_confirm(client, host, Update::new(Kind::Ban).with("target", target), message);
        }
        ParsedCommand::Unban { target } => {
            let message = format!("The user {} has been unbanned.", target);
            send_confirm(client, host, Update::new(Kind::Unban).with("target", target), message);
        }
        ParsedCommand::IpBan { ip, mask } => {
            let message = format!("The ip {} under {} has been banned.", ip, mask);
            let ban = Update::new(Kind::IpBan).with("ip", ip).with("mask", mask);
            send_confirm(client, host, ban, message);
        }
        ParsedCommand::IpUnban { ip, mask } => {
            let message = format!("The ip {} under {} has been unbanned.", ip, mask);
            let unban = Update::new(Kind::IpUnban).with("ip", ip).with("mask", mask);
            send_confirm(client, host, unban, message);
        }
        ParsedCommand::Message { channel: name, text } => {
            let message = Update::new(Kind::Message)
                .with("channel", channel(Some(name)))
                .with("text", text);
            report_send(client.send(message));
        }
        ParsedCommand::Users { channel: name } => {
            let request = Update::new(Kind::Users).with("channel", channel(name));
            let host = Rc::clone(host);
            report_send(client.send_with_callback(
                request,
                move |session: &mut Session, _: &Update, reply: &Update| {
                    if let Some(users) = reply.get("users") {
                        let text = format!("Currently in channel: {}", users.strings().join(" "));
                        show(&host, session, reply, Some(text));
                    }
                },
            ));
        }
        ParsedCommand::Channels { channel: name } => {
            let mut request = Update::new(Kind::Channels);
            if let Some(name) = name {
                request.set("channel", channel(Some(name)));
            }
            let host = Rc::clone(host);
            report_send(client.send_with_callback(
                request,
                move |session: &mut Session, _: &Update, reply: &Update| {
                    if let Some(channels) = reply.get("channels") {
                        let text = format!("Channels: {}", channels.strings().join(" "));
                        show(&host, session, reply, Some(text));
                    }
                },
            ));
        }
        ParsedCommand::UserInfo { target } => {
            let host = Rc::clone(host);
            let request = Update::new(Kind::UserInfo).with("target", target.as_str());
            report_send(client.send_with_callback(
                request,
                move |session: &mut Session, _: &Update, reply: &Update| {
                    if reply.kind() != Kind::UserInfo {
                        return;
                    }
                    let connections = reply.get("connections").and_then(Value::as_u64).unwrap_or(0);
                    let registered = match reply.get("registered").and_then(Value::as_bool) {
                        Some(true) => "registered",
                        _ => "not registered",
                    };
                    let text = format!("Info on {}: {} connections, {}", target, connections, registered);
                    show(&host, session, reply, Some(text));
                },
            ));
        }
        ParsedCommand::Grant { update, target, channel: name } => {
            let kind = Value::Symbol(li(&update));
            let target_channel = channel(name);
            match target {
                None => {
                    let rule = Value::List(vec![kind, Value::from(true)]);
                    let permissions = Update::new(Kind::Permissions)
                        .with("channel", target_channel)
                        .with("permissions", Value::List(vec![rule]));
                    let message = format!("All users have been allowed {}ing", update);
                    send_confirm(client, host, permissions, message);
                }
                Some(user) => {
                    let message = format!("{} has been allowed {}ing", user, update);
                    let grant = Update::new(Kind::Grant)
                        .with("channel", target_channel)
                        .with("target", user)
                        .with("update", kind);
                    send_confirm(client, host, grant, message);
                }
            }
        }
        ParsedCommand::Deny { update, target, channel: name } => {
            let kind = Value::Symbol(li(&update));
            let target_channel = channel(name);
            match target {
                None => {
                    let only_me = Value::List(vec![
                        Value::Symbol(li("+")),
                        Value::from(client.session().username()),
                    ]);
                    let rule = Value::List(vec![kind, only_me]);
                    let permissions = Update::new(Kind::Permissions)
                        .with("channel", target_channel)
                        .with("permissions", Value::List(vec![rule]));
                    let message = format!("All users have been denied from {}ing", update);
                    send_confirm(client, host, permissions, message);
                }
                Some(user) => {
                    let message = format!("{} has been denied from {}ing", user, update);
                    let deny = Update::new(Kind::Deny)
                        .with("channel", target_channel)
                        .with("target", user)
                        .with("update", kind);
                    send_confirm(client, host, deny, message);
                }
            }
        }
    }
    Flow::Continue
}
