//! The Lichat client: connection lifecycle, sending, and dispatch.
//!
//! [`Client`] owns the handler registry and a [`Session`]. Handlers and
//! callbacks receive `&mut Session`, which is everything needed to inspect the
//! connection and send follow-up updates from inside a dispatch.

pub mod capabilities;
pub mod channels;
pub mod connection;
pub mod dispatch;


use std::path::PathBuf;
use std::time::{Duration, Instant};

use rand::RngExt;
use tracing::{debug, info, trace, warn};

use crate::emotes::EmoteCache;
use crate::error::{ClientError, ClientResult, Rejection};
use crate::update::{universal_now, Kind, Update};
use crate::wire::{encode, DEFAULT_MAX_FRAME};
use crate::wire::value::Value;

pub use capabilities::ExtensionSet;
pub use channels::{ChannelState, Channels};
pub use connection::{BoxedStream, Stream};
pub use dispatch::{Callback, Handler, HandlerRegistry, Selector};

use capabilities::{Grants, CHANNEL_TREES, CLIENT_EXTENSIONS, EMOTES};
use connection::Transport;
use dispatch::{CallbackTable, OriginMemo};

/// Protocol version sent in the handshake.
pub const PROTOCOL_VERSION: &str = "2.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Disconnected,
    Connecting,
    Authenticating,
    Connected,
}

/// Who we log in as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub username: String,
    /// Only set once the name is registered.
    pub password: Option<String>,
}

impl Profile {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: None,
        }
    }

    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Upper bound on waiting for the server's handshake reply.
    pub handshake_timeout: Duration,
    /// How many callback-less sends are kept for [`Session::origin`].
    pub origin_memo_capacity: usize,
    pub max_frame_size: usize,
    pub accept_invalid_certs: bool,
    /// Root of the per-host emote caches. `None` disables caching.
    pub emote_dir: Option<PathBuf>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(10),
            origin_memo_capacity: 128,
            max_frame_size: DEFAULT_MAX_FRAME,
            accept_invalid_certs: false,
            emote_dir: None,
        }
    }
}

/// Id source for outbound updates. Starts at a random point and only grows,
/// across reconnects too, so a late reply can never match a newer request.
#[derive(Debug)]
struct IdGenerator {
    next: u64,
}

impl IdGenerator {
    fn new() -> Self {
        Self {
            next: rand::rng().random_range(1..1u64 << 32),
        }
    }

    fn next(&mut self) -> u64 {
        let id = self.next;
        self.next += 1;
        id
    }

    /// Keep future ids above one the caller chose.
    fn observe(&mut self, id: u64) {
        if id >= self.next {
            self.next = id.saturating_add(1);
        }
    }
}

/// State that lives exactly as long as one transport.
#[derive(Debug)]
struct Connection {
    transport: Transport,
    servername: String,
    extensions: ExtensionSet,
    callbacks: CallbackTable,
    origins: OriginMemo,
    grants: Grants,
    channels: Channels,
    lost: Option<String>,
}

#[derive(Debug)]
pub struct Session {
    profile: Profile,
    options: ClientOptions,
    state: State,
    connection: Option<Connection>,
    ids: IdGenerator,
    last_traffic: Option<Instant>,
    emotes: Option<EmoteCache>,
}

impl Session {
    fn new(profile: Profile, options: ClientOptions) -> Self {
        Self {
            profile,
            options,
            state: State::Disconnected,
            connection: None,
            ids: IdGenerator::new(),
            last_traffic: None,
            emotes: None,
        }
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    /// Takes effect on the next handshake.
    pub fn set_password(&mut self, password: Option<String>) {
        self.profile.password = password;
    }

    pub fn username(&self) -> &str {
        &self.profile.username
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == State::Connected && self.connection.is_some()
    }

    pub fn servername(&self) -> Option<&str> {
        self.connection.as_ref().map(|c| c.servername.as_str())
    }

    /// Extensions the server confirmed. Empty before a handshake.
    pub fn extensions(&self) -> Option<&ExtensionSet> {
        self.connection.as_ref().map(|c| &c.extensions)
    }

    /// Whether the server confirmed `extension` for this connection.
    /// Bare names such as `channel-trees` match their `shirakumo-` form.
    pub fn is_supported(&self, extension: &str) -> bool {
        let Some(extensions) = self.extensions() else {
            return false;
        };
        extensions.is_supported(extension)
            || extensions.is_supported(&format!("shirakumo-{}", extension))
    }

    /// Whether the last `capabilities` reply for `channel` listed `kind`.
    /// `None` if we have not asked.
    pub fn is_permitted(&self, channel: &str, kind: Kind) -> Option<bool> {
        self.connection
            .as_ref()
            .and_then(|c| c.grants.is_permitted(channel, kind))
    }

    pub fn channels(&self) -> Option<&Channels> {
        self.connection.as_ref().map(|c| &c.channels)
    }

    pub fn emotes(&self) -> Option<&EmoteCache> {
        self.emotes.as_ref()
    }

    /// When the last inbound update was dispatched.
    pub fn last_traffic(&self) -> Option<Instant> {
        self.last_traffic
    }

    /// Resolve the channel an update should target.
    ///
    /// No explicit channel means `current`. With channel trees, a name
    /// starting with `/` is relative to `current`.
    pub fn qualify_channel(&self, current: &str, requested: Option<&str>) -> String {
        match requested {
            None | Some("") => current.to_string(),
            Some(name) if name.starts_with('/') && self.is_supported(CHANNEL_TREES) => {
                format!("{}{}", current.trim_end_matches('/'), name)
            }
            Some(name) => name.to_string(),
        }
    }

    /// Build an update pre-filled with our name and the current clock.
    pub fn make_instance<K, V, I>(&self, kind: Kind, fields: I) -> Update
    where
        K: AsRef<str>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        let mut update = Update::new(kind)
            .with_from(self.profile.username.clone())
            .with_clock(universal_now());
        for (key, value) in fields {
            update.set(key.as_ref(), value);
        }
        update
    }

    /// Send an update. Returns the id it went out with.
    pub fn send(&mut self, update: Update) -> ClientResult<u64> {
        let update = self.prepare(update)?;
        let id = self.write(&update)?;
        if let Some(conn) = self.connection.as_mut() {
            conn.origins.remember(&update);
        }
        Ok(id)
    }

    /// Send an update and run `callback` with the first inbound update
    /// correlated to it. The callback never runs after the connection ends.
    pub fn send_with_callback<F>(&mut self, update: Update, callback: F) -> ClientResult<u64>
    where
        F: FnOnce(&mut Session, &Update, &Update) + 'static,
    {
        let update = self.prepare(update)?;
        let id = self.write(&update)?;
        if let Some(conn) = self.connection.as_mut() {
            conn.callbacks.insert(update, Box::new(callback));
        }
        Ok(id)
    }

    /// The update we sent that `failure` answers, for sends without a callback.
    pub fn origin(&self, failure: &Update) -> Option<&Update> {
        let id = failure.update_id()?;
        self.connection.as_ref()?.origins.get(id)
    }

    fn prepare(&mut self, mut update: Update) -> ClientResult<Update> {
        let Some(conn) = self.connection.as_ref().filter(|c| c.lost.is_none()) else {
            return Err(ClientError::lost("not connected"));
        };
        match update.id() {
            Some(id) if conn.callbacks.contains(id) => return Err(ClientError::DuplicateId(id)),
            Some(id) => self.ids.observe(id),
            None => update = update.with_id(self.ids.next()),
        }
        if update.from().is_none() {
            update = update.with_from(self.profile.username.clone());
        }
        if update.clock().is_none() {
            update = update.with_clock(universal_now());
        }
        update.validate()?;
        Ok(update)
    }

    fn write(&mut self, update: &Update) -> ClientResult<u64> {
        let conn = self
            .connection
            .as_mut()
            .ok_or_else(|| ClientError::lost("not connected"))?;
        let id = update.id().unwrap_or_default();
        debug!(kind = %update.kind(), id, "sending");
        if let Err(reason) = conn.transport.send(encode(update)) {
            conn.lost.get_or_insert(reason.clone());
            return Err(ClientError::lost(reason));
        }
        Ok(id)
    }

    fn take_callback(&mut self, id: u64) -> Option<(Update, Callback)> {
        self.connection.as_mut()?.callbacks.take(id)
    }

    /// Bookkeeping done for every inbound update before any handler runs.
    fn observe(&mut self, update: &Update) {
        self.last_traffic = Some(Instant::now());
        if let Some(conn) = self.connection.as_mut() {
            conn.channels.observe(&self.profile.username, update);
            match update.kind() {
                Kind::Capabilities => conn.grants.observe(update),
                Kind::Leave
                    if update
                        .from()
                        .is_some_and(|from| from.eq_ignore_ascii_case(&self.profile.username)) =>
                {
                    if let Some(channel) = update.channel() {
                        conn.grants.forget(channel);
                    }
                }
                _ => {}
            }
        }
        match update.kind() {
            Kind::Ping if self.is_connected() => {
                // Pongs stay out of the origin memo; nothing answers them.
                let pong = self.prepare(Update::new(Kind::Pong));
                if let Err(e) = pong.and_then(|pong| self.write(&pong)) {
                    debug!(error = %e, "could not answer ping");
                }
            }
            Kind::Emote => {
                if let Some(cache) = self.emotes.as_mut() {
                    match cache.store_update(update) {
                        Ok(name) => debug!(%name, "cached emote"),
                        Err(e) => warn!(error = %e, "could not cache emote"),
                    }
                }
            }
            _ => {}
        }
    }
}

/// A Lichat client.
#[derive(Debug)]
pub struct Client {
    handlers: HandlerRegistry,
    session: Session,
}

impl Client {
    pub fn new(profile: Profile, options: ClientOptions) -> Self {
        Self {
            handlers: HandlerRegistry::default(),
            session: Session::new(profile, options),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    /// Register a handler. Handlers for the same selector run in the order
    /// they were added. Registrations survive reconnects.
    pub fn add_handler<H>(&mut self, selector: impl Into<Selector>, handler: H)
    where
        H: Handler + 'static,
    {
        self.handlers.add(selector.into(), Box::new(handler));
    }

    pub fn state(&self) -> State {
        self.session.state
    }

    pub fn is_supported(&self, extension: &str) -> bool {
        self.session.is_supported(extension)
    }

    pub fn send(&mut self, update: Update) -> ClientResult<u64> {
        self.session.send(update)
    }

    pub fn send_with_callback<F>(&mut self, update: Update, callback: F) -> ClientResult<u64>
    where
        F: FnOnce(&mut Session, &Update, &Update) + 'static,
    {
        self.session.send_with_callback(update, callback)
    }

    pub fn origin(&self, failure: &Update) -> Option<&Update> {
        self.session.origin(failure)
    }

    pub fn make_instance<K, V, I>(&self, kind: Kind, fields: I) -> Update
    where
        K: AsRef<str>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        self.session.make_instance(kind, fields)
    }

    pub fn last_traffic(&self) -> Option<Instant> {
        self.session.last_traffic
    }

    /// Open a connection to `host:port` and log in.
    pub async fn connect(&mut self, host: &str, port: u16, secure: bool) -> ClientResult<()> {
        if self.session.state != State::Disconnected {
            return Err(ClientError::AlreadyConnected);
        }
        info!(%host, port, secure, "connecting");
        self.session.state = State::Connecting;
        let stream = connection::open(host, port, secure, self.session.options.accept_invalid_certs)
            .await
            .inspect_err(|_| self.session.state = State::Disconnected)?;
        self.handshake(stream, format!("{}:{}", host, port), host).await
    }

    /// Log in over an already established stream.
    pub async fn connect_stream(
        &mut self,
        stream: impl Stream,
        peer: impl Into<String>,
    ) -> ClientResult<()> {
        if self.session.state != State::Disconnected {
            return Err(ClientError::AlreadyConnected);
        }
        let peer = peer.into();
        let host = peer.split(':').next().unwrap_or_default().to_string();
        self.handshake(Box::new(stream), peer, &host).await
    }

    async fn handshake(&mut self, stream: BoxedStream, peer: String, host: &str) -> ClientResult<()> {
        let session = &mut self.session;
        session.state = State::Authenticating;
        let mut transport = Transport::spawn(stream, peer, session.options.max_frame_size);

        let mut request = Update::new(Kind::Connect)
            .with_id(session.ids.next())
            .with_clock(universal_now())
            .with_from(session.profile.username.clone())
            .with("version", PROTOCOL_VERSION)
            .with("extensions", CLIENT_EXTENSIONS.to_vec());
        if let Some(password) = &session.profile.password {
            request.set("password", password.as_str());
        }
        if let Err(reason) = transport.send(encode(&request)) {
            transport.close();
            session.state = State::Disconnected;
            return Err(ClientError::lost(reason));
        }

        let timeout = session.options.handshake_timeout;
        let reply = tokio::time::timeout(timeout, async {
            loop {
                let update = transport.next_update().await?;
                if update.kind() == Kind::Ping {
                    let pong = Update::new(Kind::Pong)
                        .with_id(session.ids.next())
                        .with_clock(universal_now())
                        .with_from(session.profile.username.clone());
                    transport.send(encode(&pong))?;
                    continue;
                }
                return Ok::<_, String>(update);
            }
        })
        .await;

        let reply = match reply {
            Ok(Ok(update)) if update.kind() == Kind::Connect => update,
            Ok(Ok(update)) => {
                transport.close();
                session.state = State::Disconnected;
                let reason = Rejection::from_update(&update);
                warn!(%reason, "handshake rejected");
                return Err(ClientError::ConnectionFailed {
                    reason,
                    update: Some(Box::new(update)),
                });
            }
            Ok(Err(reason)) => {
                transport.close();
                session.state = State::Disconnected;
                warn!(%reason, "connection lost during handshake");
                return Err(ClientError::lost(reason));
            }
            Err(_) => {
                transport.close();
                session.state = State::Disconnected;
                warn!(?timeout, "handshake timed out");
                return Err(ClientError::ConnectionFailed {
                    reason: Rejection::Timeout,
                    update: None,
                });
            }
        };

        let servername = reply.from().unwrap_or(host).to_string();
        let extensions = ExtensionSet::from_update(&reply);
        info!(server = %servername, extensions = extensions.len(), "connected");

        session.connection = Some(Connection {
            transport,
            servername: servername.clone(),
            extensions,
            callbacks: CallbackTable::default(),
            origins: OriginMemo::new(session.options.origin_memo_capacity),
            grants: Grants::default(),
            channels: Channels::default(),
            lost: None,
        });
        session.state = State::Connected;
        // Keyed by the host we dialed; the server picks its own name.
        session.emotes = session.options.emote_dir.as_ref().and_then(|root| {
            EmoteCache::open(root, host)
                .inspect_err(|e| warn!(error = %e, "emote cache unavailable"))
                .ok()
        });

        if session.is_supported(EMOTES) {
            let names: Vec<String> = session
                .emotes
                .as_ref()
                .map(|cache| cache.names().into_iter().map(str::to_string).collect())
                .unwrap_or_default();
            if let Err(e) = session.send(Update::new(Kind::Emotes).with("names", names)) {
                debug!(error = %e, "could not request emotes");
            }
        }

        self.handle(&reply);
        Ok(())
    }

    /// Close the connection and dispatch a local `disconnect` update.
    /// Does nothing if there is no connection.
    pub fn disconnect(&mut self) {
        let Some(conn) = self.session.connection.take() else {
            self.session.state = State::Disconnected;
            return;
        };
        if conn.lost.is_none() {
            let farewell = Update::new(Kind::Disconnect)
                .with_id(self.session.ids.next())
                .with_clock(universal_now())
                .with_from(self.session.profile.username.clone());
            let _ = conn.transport.send(encode(&farewell));
        }
        info!(peer = %conn.transport.peer(), pending = conn.callbacks.len(), "disconnected");
        conn.transport.close();
        self.session.state = State::Disconnected;
        self.notify_disconnect(None);
    }

    fn notify_disconnect(&mut self, reason: Option<&str>) {
        let mut notice = Update::new(Kind::Disconnect)
            .with_clock(universal_now())
            .with_from(self.session.profile.username.clone());
        if let Some(reason) = reason {
            notice.set("text", reason);
        }
        self.handle(&notice);
    }

    /// Everything decoded since the last call, without waiting.
    ///
    /// When the peer goes away, updates that arrived before are returned
    /// first; the next call reports [`ClientError::ConnectionLost`] and
    /// drops the connection. Calls after that, or after
    /// [`Client::disconnect`], report [`ClientError::NotConnected`].
    pub fn receive(&mut self) -> ClientResult<Vec<Update>> {
        let Some(conn) = self.session.connection.as_mut() else {
            return Err(ClientError::NotConnected);
        };
        if conn.lost.is_none() {
            let drained = conn.transport.drain();
            if let Some(reason) = drained.lost {
                warn!(peer = %conn.transport.peer(), %reason, "connection lost");
                conn.lost = Some(reason);
            }
            if !drained.updates.is_empty() {
                return Ok(drained.updates);
            }
        }
        match conn.lost.take() {
            Some(reason) => {
                if let Some(conn) = self.session.connection.take() {
                    conn.transport.close();
                }
                self.session.state = State::Disconnected;
                Err(ClientError::lost(reason))
            }
            None => Ok(Vec::new()),
        }
    }

    /// Resolves once [`Client::receive`] has something to report.
    /// Never resolves while disconnected.
    pub async fn readable(&mut self) {
        match self.session.connection.as_mut() {
            Some(conn) if conn.lost.is_some() => {}
            Some(conn) => conn.transport.readable().await,
            None => std::future::pending::<()>().await,
        }
    }

    /// Receive and dispatch everything available, in arrival order.
    /// A lost connection is dispatched once, as a `disconnect` carrying the
    /// reason, before the error is returned.
    pub fn pump(&mut self) -> ClientResult<usize> {
        match self.receive() {
            Ok(updates) => {
                for update in &updates {
                    self.handle(update);
                }
                Ok(updates.len())
            }
            Err(ClientError::ConnectionLost { reason }) => {
                self.notify_disconnect(Some(&reason));
                Err(ClientError::ConnectionLost { reason })
            }
            Err(e) => Err(e),
        }
    }

    /// Route one inbound update: a pending callback for its correlation id
    /// pre-empts the kind handlers; wildcards always run afterwards.
    pub fn handle(&mut self, update: &Update) {
        trace!(kind = %update.kind(), id = ?update.id(), from = ?update.from(), "dispatching");
        self.session.observe(update);
        let pending = update
            .correlation_id()
            .and_then(|id| self.session.take_callback(id));
        match pending {
            Some((origin, callback)) => callback(&mut self.session, &origin, update),
            None => self.handlers.run_kind(&mut self.session, update),
        }
        self.handlers.run_wildcards(&mut self.session, update);
    }
}
