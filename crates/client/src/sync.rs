//! Per-surface synchronization context.
//!
//! A [`SyncClient`] owns one event channel, one local table and one status
//! line. Renderers read the table and status through `watch` receivers and
//! invoke actions; they never write the table themselves.
//!
//! ```rust,ignore
//! let client = SyncClient::builder(EndpointConfig::from_env()).start();
//! let mut table = client.subscribe_table();
//!
//! let car = client.claim("user-1", 60).await?;
//! assert!(client.table().get(&car.id).is_some());
//!
//! while table.changed().await.is_ok() {
//!     for row in view::rows(&table.borrow_and_update()) {
//!         println!("{} {} {}", row.id, row.state, row.assigned);
//!     }
//! }
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use ffb_shared::{Car, CarState, DEFAULT_CLAIM_TTL_SECS};
use futures_channel::mpsc::UnboundedReceiver;
use futures_util::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::api_client::ApiClient;
use crate::config::EndpointConfig;
use crate::error::{require, SyncError};
use crate::events::{ChannelEvent, ConnectionState, EventChannel, ReconnectConfig};
use crate::status::{project, Action, ActionOutcome, StatusLine};
use crate::store::{Reconciler, Seq, TableSnapshot};
use crate::transport::{HttpTransport, ResourceTransport, SessionToken};

/// Builds the transport for a given endpoint configuration. Called again on
/// every reconfiguration.
pub type TransportFactory =
    Arc<dyn Fn(&EndpointConfig) -> Arc<dyn ResourceTransport> + Send + Sync>;

/// Result of a release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Released {
    pub id: String,
    /// The server no longer had the car reserved for this user (typically its
    /// TTL lapsed); the local state was already consistent.
    pub already_free: bool,
}

pub struct SyncClientBuilder {
    config: EndpointConfig,
    reconnect: ReconnectConfig,
    factory: Option<TransportFactory>,
    live: bool,
}

impl SyncClientBuilder {
    pub fn reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn transport_factory(
        mut self,
        factory: impl Fn(&EndpointConfig) -> Arc<dyn ResourceTransport> + Send + Sync + 'static,
    ) -> Self {
        self.factory = Some(Arc::new(factory));
        self
    }

    /// Use one transport regardless of configuration.
    pub fn transport(self, transport: Arc<dyn ResourceTransport>) -> Self {
        self.transport_factory(move |_| Arc::clone(&transport))
    }

    /// Do not open the event stream; the table only changes through actions
    /// and [`SyncClient::refresh`].
    pub fn without_live_channel(mut self) -> Self {
        self.live = false;
        self
    }

    /// Start the client. Must be called from within a tokio runtime when the
    /// live channel is enabled.
    pub fn start(self) -> SyncClient {
        let factory: TransportFactory = match self.factory {
            Some(factory) => factory,
            None => Arc::new(|config: &EndpointConfig| -> Arc<dyn ResourceTransport> {
                Arc::new(HttpTransport::new(config))
            }),
        };
        let transport = factory(&self.config);

        let (table_tx, _) = watch::channel(Arc::new(TableSnapshot::default()));
        let (status_tx, _) = watch::channel(project(ConnectionState::Connecting, None));

        let inner = Arc::new(Inner {
            id: Uuid::new_v4(),
            factory,
            reconnect: self.reconnect,
            live: self.live,
            state: Mutex::new(State {
                config: self.config,
                transport,
                table: Reconciler::new(),
                connection: ConnectionState::Connecting,
                recovering: false,
                last_action: None,
                generation: 0,
                closed: false,
                claims: HashMap::new(),
                channel: None,
            }),
            table_tx,
            status_tx,
        });

        {
            let mut st = inner.lock();
            log_ready(inner.id, &st.config);
            if inner.live {
                let attached = inner.attach(&st.config, st.generation);
                st.channel = Some(attached);
            }
        }

        SyncClient { inner }
    }
}

/// Handle to one surface's synchronized view of the matchmaker. Clones share
/// the same state.
#[derive(Clone)]
pub struct SyncClient {
    inner: Arc<Inner>,
}

struct Inner {
    id: Uuid,
    factory: TransportFactory,
    reconnect: ReconnectConfig,
    live: bool,
    state: Mutex<State>,
    table_tx: watch::Sender<Arc<TableSnapshot>>,
    status_tx: watch::Sender<StatusLine>,
}

struct State {
    config: EndpointConfig,
    transport: Arc<dyn ResourceTransport>,
    table: Reconciler,
    connection: ConnectionState,
    /// Set when the channel drops, cleared once it is live again.
    recovering: bool,
    last_action: Option<ActionOutcome>,
    /// Bumped on reconfiguration; results issued under an older value are dropped.
    generation: u64,
    closed: bool,
    /// car id -> user this client claimed it for
    claims: HashMap<String, String>,
    channel: Option<Attached>,
}

impl State {
    fn status(&self) -> StatusLine {
        let shown = match self.connection {
            ConnectionState::Connecting if self.recovering => ConnectionState::Disconnected,
            other => other,
        };
        project(shown, self.last_action.as_ref())
    }

    fn ticket(&mut self) -> Ticket {
        Ticket {
            transport: Arc::clone(&self.transport),
            generation: self.generation,
            seq: self.table.next_seq(),
        }
    }

    /// The caller claimed this car earlier and nobody else holds it now.
    fn previously_claimed(&self, user_id: &str, car_id: &str) -> bool {
        if self.claims.get(car_id).map(String::as_str) != Some(user_id) {
            return false;
        }
        !self.table.get(car_id).is_some_and(|car| {
            !car.state.is_free() && car.assigned_to.as_deref().is_some_and(|o| o != user_id)
        })
    }
}

struct Attached {
    _channel: EventChannel,
    driver: JoinHandle<()>,
}

impl Drop for Attached {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

struct Ticket {
    transport: Arc<dyn ResourceTransport>,
    generation: u64,
    seq: Seq,
}

impl SyncClient {
    pub fn builder(config: EndpointConfig) -> SyncClientBuilder {
        SyncClientBuilder {
            config,
            reconnect: ReconnectConfig::default(),
            factory: None,
            live: true,
        }
    }

    /// Start with the HTTP transport and a live event channel.
    pub fn start(config: EndpointConfig) -> Self {
        Self::builder(config).start()
    }

    /// Instance id used in log fields.
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn table(&self) -> Arc<TableSnapshot> {
        Arc::clone(&self.inner.table_tx.borrow())
    }

    pub fn subscribe_table(&self) -> watch::Receiver<Arc<TableSnapshot>> {
        self.inner.table_tx.subscribe()
    }

    pub fn status(&self) -> StatusLine {
        self.inner.status_tx.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<StatusLine> {
        self.inner.status_tx.subscribe()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.lock().connection
    }

    pub fn config(&self) -> EndpointConfig {
        self.inner.lock().config.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Reserve any free car for `user_id`. On success the car is in the local
    /// table as RESERVED before this returns.
    pub async fn claim(&self, user_id: &str, ttl_seconds: u32) -> Result<Car, SyncError> {
        let inner = &self.inner;
        if let Err(e) = require(user_id, "user id") {
            return Err(inner.record_failure(Action::Claim, e));
        }

        let ticket = inner.begin()?;
        let result = ticket.transport.claim(user_id, ttl_seconds).await;

        let mut st = inner.lock();
        if st.closed {
            tracing::debug!(client = %inner.id, "discarding claim result after shutdown");
            return Err(SyncError::Closed);
        }
        match result {
            Ok(car) => {
                if st.generation == ticket.generation {
                    st.table.apply_upsert(car.clone(), ticket.seq);
                    st.claims.insert(car.id.clone(), user_id.to_string());
                }
                tracing::info!(client = %inner.id, car = %car.id, user = %user_id, "claimed car");
                st.last_action = Some(ActionOutcome::claimed(&car));
                inner.publish(&st);
                Ok(car)
            }
            Err(e) => {
                tracing::error!(client = %inner.id, user = %user_id, error = %e, "claim failed");
                st.last_action = Some(ActionOutcome::failed(Action::Claim, &e));
                inner.publish_status(&st);
                Err(e)
            }
        }
    }

    /// Claim with the matchmaker's default reservation lifetime.
    pub async fn claim_default(&self, user_id: &str) -> Result<Car, SyncError> {
        self.claim(user_id, DEFAULT_CLAIM_TTL_SECS).await
    }

    /// Give `car_id` back. Releasing a car this client claimed for `user_id`
    /// that the server has already freed succeeds with `already_free`.
    pub async fn release(&self, user_id: &str, car_id: &str) -> Result<Released, SyncError> {
        let inner = &self.inner;
        if let Err(e) = require(user_id, "user id").and_then(|_| require(car_id, "car id")) {
            return Err(inner.record_failure(Action::Release, e));
        }

        let ticket = inner.begin()?;
        let result = ticket.transport.release(user_id, car_id).await;

        let mut st = inner.lock();
        if st.closed {
            tracing::debug!(client = %inner.id, "discarding release result after shutdown");
            return Err(SyncError::Closed);
        }
        match result {
            Ok(resp) => {
                if st.generation == ticket.generation {
                    let freed = resp.car().or_else(|| {
                        st.table.get(&resp.id).map(|car| Car {
                            state: CarState::Free,
                            assigned_to: None,
                            ttl_seconds: None,
                            ..car.clone()
                        })
                    });
                    if let Some(car) = freed {
                        st.table.apply_upsert(car, ticket.seq);
                    }
                    st.claims.remove(&resp.id);
                }
                tracing::info!(client = %inner.id, car = %resp.id, user = %user_id, "released car");
                st.last_action = Some(ActionOutcome::released(&resp.id, false));
                inner.publish(&st);
                Ok(Released {
                    id: resp.id,
                    already_free: false,
                })
            }
            Err(SyncError::InvalidOperation(message)) if st.previously_claimed(user_id, car_id) => {
                tracing::warn!(
                    client = %inner.id,
                    car = %car_id,
                    user = %user_id,
                    %message,
                    "car was already released server-side"
                );
                st.claims.remove(car_id);
                st.last_action = Some(ActionOutcome::released(car_id, true));
                inner.publish_status(&st);
                Ok(Released {
                    id: car_id.to_string(),
                    already_free: true,
                })
            }
            Err(e) => {
                tracing::error!(client = %inner.id, car = %car_id, user = %user_id, error = %e, "release failed");
                st.last_action = Some(ActionOutcome::failed(Action::Release, &e));
                inner.publish_status(&st);
                Err(e)
            }
        }
    }

    /// Ask the gateway for a play-session token. `car_id` must name a car
    /// that has already been claimed; an empty one fails without a request.
    pub async fn create_session(&self, user_id: &str, car_id: &str) -> Result<SessionToken, SyncError> {
        let inner = &self.inner;
        if let Err(e) = require(user_id, "user id") {
            return Err(inner.record_failure(Action::CreateSession, e));
        }
        if car_id.trim().is_empty() {
            let e = SyncError::Precondition("no car selected, claim a car first".into());
            return Err(inner.record_failure(Action::CreateSession, e));
        }

        let ticket = inner.begin()?;
        let result = ticket.transport.create_session(user_id, car_id).await;

        let mut st = inner.lock();
        if st.closed {
            tracing::debug!(client = %inner.id, "discarding session result after shutdown");
            return Err(SyncError::Closed);
        }
        st.last_action = Some(match &result {
            Ok(_) => {
                tracing::info!(client = %inner.id, car = %car_id, user = %user_id, "session created");
                ActionOutcome::session_ready(car_id)
            }
            Err(e) => {
                tracing::error!(client = %inner.id, car = %car_id, error = %e, "create session failed");
                ActionOutcome::failed(Action::CreateSession, e)
            }
        });
        inner.publish_status(&st);
        result
    }

    /// Re-pull the full table on demand.
    pub async fn refresh(&self) -> Result<Arc<TableSnapshot>, SyncError> {
        let inner = &self.inner;
        let ticket = inner.begin()?;
        let result = ticket.transport.list_resources().await;

        let mut st = inner.lock();
        if st.closed {
            return Err(SyncError::Closed);
        }
        match result {
            Ok(rows) => {
                tracing::info!(client = %inner.id, rows = rows.len(), "rooms loaded");
                if st.generation == ticket.generation {
                    st.table.apply_snapshot(rows, ticket.seq);
                }
                st.last_action = Some(ActionOutcome::rooms_loaded());
                inner.publish(&st);
                Ok(Arc::clone(&inner.table_tx.borrow()))
            }
            Err(e) => {
                tracing::error!(client = %inner.id, error = %e, "loading rooms failed");
                st.last_action = Some(ActionOutcome::failed(Action::LoadRooms, &e));
                inner.publish_status(&st);
                Err(e)
            }
        }
    }

    /// Point the client at new endpoints. The event channel is torn down and
    /// reopened, the connection state returns to CONNECTING and anything still
    /// in flight against the old endpoints will not touch the table.
    pub fn set_config(&self, config: EndpointConfig) -> Result<(), SyncError> {
        let inner = &self.inner;
        let mut st = inner.lock();
        if st.closed {
            return Err(SyncError::Closed);
        }

        st.channel = None;
        st.generation += 1;
        st.claims.clear();
        st.transport = (inner.factory)(&config);
        st.config = config;
        st.connection = ConnectionState::Connecting;
        st.recovering = false;
        st.last_action = None;
        log_ready(inner.id, &st.config);

        if inner.live {
            let attached = inner.attach(&st.config, st.generation);
            st.channel = Some(attached);
        }
        inner.publish_status(&st);
        Ok(())
    }

    /// Close the event channel. Results of requests still in flight are
    /// discarded when they complete.
    pub fn shutdown(&self) {
        let mut st = self.inner.lock();
        if st.closed {
            return;
        }
        st.closed = true;
        st.channel = None;
        st.connection = ConnectionState::Disconnected;
        self.inner.publish_status(&st);
        tracing::info!(client = %self.inner.id, "sync client shut down");
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin(&self) -> Result<Ticket, SyncError> {
        let mut st = self.lock();
        if st.closed {
            return Err(SyncError::Closed);
        }
        Ok(st.ticket())
    }

    fn record_failure(&self, action: Action, err: SyncError) -> SyncError {
        let mut st = self.lock();
        if !st.closed {
            tracing::warn!(client = %self.id, error = %err, "{} rejected locally", action.label());
            st.last_action = Some(ActionOutcome::failed(action, &err));
            self.publish_status(&st);
        }
        err
    }

    fn publish(&self, st: &State) {
        self.publish_table(st);
        self.publish_status(st);
    }

    fn publish_table(&self, st: &State) {
        self.table_tx.send_replace(Arc::new(st.table.snapshot()));
    }

    fn publish_status(&self, st: &State) {
        let line = st.status();
        self.status_tx.send_if_modified(|current| {
            if *current == line {
                return false;
            }
            *current = line;
            true
        });
    }

    fn attach(self: &Arc<Self>, config: &EndpointConfig, generation: u64) -> Attached {
        let api = ApiClient::new().with_base_url(config.matchmaker());
        let (channel, events) = EventChannel::open(api, self.reconnect.clone());
        let driver = tokio::spawn(drive(Arc::downgrade(self), generation, events));
        Attached {
            _channel: channel,
            driver,
        }
    }

    /// Fold one channel event into the state. Returns the reload task an
    /// `update` started.
    fn handle_channel_event(self: &Arc<Self>, generation: u64, event: ChannelEvent) -> Option<JoinHandle<()>> {
        let mut st = self.lock();
        if st.closed || st.generation != generation {
            return None;
        }

        match event {
            ChannelEvent::State(next) => {
                if st.connection != next {
                    tracing::info!(
                        client = %self.id,
                        from = st.connection.label(),
                        to = next.label(),
                        "event channel state changed"
                    );
                }
                match next {
                    ConnectionState::Live => {
                        st.recovering = false;
                        st.last_action = None;
                    }
                    ConnectionState::Disconnected => st.recovering = true,
                    ConnectionState::Connecting => {}
                }
                st.connection = next;
                self.publish_status(&st);
                None
            }
            ChannelEvent::Snapshot(rows) => {
                tracing::debug!(client = %self.id, rows = rows.len(), "applying pushed snapshot");
                let seq = st.table.next_seq();
                st.table.apply_snapshot(rows, seq);
                self.publish_table(&st);
                None
            }
            ChannelEvent::Changed(_) => {
                let ticket = st.ticket();
                drop(st);
                Some(self.spawn_reload(ticket))
            }
        }
    }

    fn spawn_reload(self: &Arc<Self>, ticket: Ticket) -> JoinHandle<()> {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let result = ticket.transport.list_resources().await;

            let mut st = inner.lock();
            if st.closed || st.generation != ticket.generation {
                tracing::debug!(client = %inner.id, "discarding stale reload");
                return;
            }
            match result {
                Ok(rows) => {
                    if st.table.apply_snapshot(rows, ticket.seq) {
                        inner.publish_table(&st);
                    } else {
                        tracing::debug!(client = %inner.id, "reload older than the applied snapshot");
                    }
                }
                Err(e) => tracing::warn!(client = %inner.id, error = %e, "reload after update failed"),
            }
        })
    }
}

async fn drive(inner: Weak<Inner>, generation: u64, mut events: UnboundedReceiver<ChannelEvent>) {
    while let Some(event) = events.next().await {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        inner.handle_channel_event(generation, event);
    }
}

fn log_ready(id: Uuid, config: &EndpointConfig) {
    tracing::info!(client = %id, "Ready. MM={}, GW={}", config.matchmaker(), config.gateway());
}
