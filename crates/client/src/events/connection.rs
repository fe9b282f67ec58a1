//! Live matchmaker event stream with indefinite auto-reconnect.

use std::time::Duration;

use ffb_shared::{Car, ServerEvent, ROUTE_EVENTS};
use futures_channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures_util::StreamExt;
use rand::Rng;
use tokio::task::JoinHandle;

use super::sse::SseDecoder;
use crate::api_client::ApiClient;

/// Smallest reconnect delay a server `retry:` hint can set.
pub const MIN_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Connection state of the event stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// A connection attempt is outstanding, or the stream is open but has not
    /// yet delivered a recognized frame.
    Connecting,
    /// At least one recognized frame arrived on the current connection.
    Live,
    /// The last connection dropped; waiting out the backoff.
    Disconnected,
}

impl ConnectionState {
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Live => "live",
            ConnectionState::Disconnected => "disconnected",
        }
    }
}

/// Configuration for auto-reconnect behavior. There is no attempt limit:
/// the stream is retried for as long as the channel lives.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnect
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f32,
    /// Random spread applied to each delay, as a fraction (0.1 = ±10%)
    pub jitter: f32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30000),
            backoff_multiplier: 1.5,
            jitter: 0.1,
        }
    }
}

impl ReconnectConfig {
    /// Calculate delay for a given attempt number, before jitter
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = f64::from(self.backoff_multiplier.max(1.0)).powi(attempt.min(64) as i32);
        let initial_ms = self.initial_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;
        Duration::from_millis((initial_ms * factor).min(max_ms).round() as u64)
    }
}

/// Backoff state machine: grows on every failed attempt, resets once the
/// stream goes live.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: ReconnectConfig,
    attempt: u32,
}

impl Backoff {
    pub fn new(config: ReconnectConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Reconnects scheduled since the last successful connection.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn next_delay(&mut self) -> Duration {
        let base = self.config.delay_for_attempt(self.attempt);
        self.attempt = self.attempt.saturating_add(1);

        let jitter = self.config.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 {
            return base;
        }
        let spread = rand::thread_rng().gen_range(-jitter..=jitter);
        base.mul_f32(1.0 + spread).min(self.config.max_delay)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Apply a server `retry:` hint as the new initial delay, clamped to
    /// `[MIN_RETRY_DELAY, max_delay]`.
    pub fn set_initial_delay(&mut self, delay: Duration) {
        self.config.initial_delay = delay.max(MIN_RETRY_DELAY).min(self.config.max_delay);
    }
}

/// What the channel reports to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    State(ConnectionState),
    /// Full table from a `"snapshot"` envelope.
    Snapshot(Vec<Car>),
    /// An `"update"` envelope arrived; the table must be re-pulled.
    Changed(serde_json::Value),
}

/// One persistent event-stream connection.
///
/// The connection loop runs in a background task and is aborted when the
/// channel is closed or dropped.
pub struct EventChannel {
    base_url: String,
    task: JoinHandle<()>,
}

impl EventChannel {
    /// Start the connection loop. Must be called from within a tokio runtime.
    pub fn open(
        client: ApiClient,
        reconnect: ReconnectConfig,
    ) -> (Self, UnboundedReceiver<ChannelEvent>) {
        let (sender, receiver) = unbounded();
        let base_url = client.base_url().to_string();
        let task = tokio::spawn(connection_loop(client, sender, reconnect));
        (Self { base_url, task }, receiver)
    }

}

impl Drop for EventChannel {
    fn drop(&mut self) {
        self.task.abort();
        tracing::debug!(host = %self.base_url, "event channel closed");
    }
}

enum StreamEnd {
    /// The receiver is gone; stop for good.
    Abandoned,
    Dropped(String),
}

async fn connection_loop(
    client: ApiClient,
    events: UnboundedSender<ChannelEvent>,
    reconnect: ReconnectConfig,
) {
    let host = client.base_url().to_string();
    let mut backoff = Backoff::new(reconnect);

    loop {
        if events
            .unbounded_send(ChannelEvent::State(ConnectionState::Connecting))
            .is_err()
        {
            return;
        }

        match client.open_event_stream(ROUTE_EVENTS).await {
            Ok(response) => {
                tracing::info!(%host, "event stream opened");
                match pump(response, &events, &mut backoff).await {
                    StreamEnd::Abandoned => return,
                    StreamEnd::Dropped(reason) => {
                        tracing::warn!(%host, %reason, "event stream dropped")
                    }
                }
            }
            Err(e) => tracing::warn!(%host, error = %e, "event stream connect failed"),
        }

        if events
            .unbounded_send(ChannelEvent::State(ConnectionState::Disconnected))
            .is_err()
        {
            return;
        }

        let delay = backoff.next_delay();
        tracing::info!(
            %host,
            delay_ms = delay.as_millis() as u64,
            attempt = backoff.attempt(),
            "reconnecting to event stream"
        );
        tokio::time::sleep(delay).await;
    }
}

async fn pump(
    response: reqwest::Response,
    events: &UnboundedSender<ChannelEvent>,
    backoff: &mut Backoff,
) -> StreamEnd {
    let mut decoder = SseDecoder::new();
    let mut body = response.bytes_stream();
    let mut live = false;

    while let Some(chunk) = body.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => return StreamEnd::Dropped(e.to_string()),
        };

        let frames = decoder.feed(&chunk);
        if let Some(retry) = decoder.take_retry() {
            tracing::debug!(retry_ms = retry.as_millis() as u64, "server set retry delay");
            backoff.set_initial_delay(retry);
        }

        for frame in frames {
            let event = match ServerEvent::decode(&frame.data) {
                Ok(Some(event)) => event,
                Ok(None) => {
                    tracing::debug!(data = %frame.data, "ignoring unrecognized event envelope");
                    continue;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "dropping undecodable event frame");
                    continue;
                }
            };

            if !live {
                live = true;
                backoff.reset();
                if events
                    .unbounded_send(ChannelEvent::State(ConnectionState::Live))
                    .is_err()
                {
                    return StreamEnd::Abandoned;
                }
            }

            let out = match event {
                ServerEvent::Snapshot(rows) => ChannelEvent::Snapshot(rows),
                ServerEvent::Update(data) => ChannelEvent::Changed(data),
            };
            if events.unbounded_send(out).is_err() {
                return StreamEnd::Abandoned;
            }
        }
    }

    StreamEnd::Dropped("closed by server".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter() -> ReconnectConfig {
        ReconnectConfig {
            jitter: 0.0,
            ..ReconnectConfig::default()
        }
    }

    #[test]
    fn delay_grows_and_caps() {
        let config = no_jitter();
        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(1000));
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(1500));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(2250));
        assert_eq!(config.delay_for_attempt(50), Duration::from_millis(30000));
        assert_eq!(config.delay_for_attempt(u32::MAX), Duration::from_millis(30000));
    }

    #[test]
    fn backoff_never_gives_up_and_resets() {
        let mut backoff = Backoff::new(no_jitter());
        for _ in 0..1000 {
            assert!(backoff.next_delay() <= Duration::from_millis(30000));
        }
        assert_eq!(backoff.attempt(), 1000);

        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_delay(), Duration::from_millis(1000));
    }

    #[test]
    fn jitter_stays_in_bounds() {
        let mut backoff = Backoff::new(ReconnectConfig {
            jitter: 0.5,
            ..ReconnectConfig::default()
        });
        for _ in 0..100 {
            backoff.reset();
            let d = backoff.next_delay();
            assert!(d >= Duration::from_millis(499) && d <= Duration::from_millis(1501));
        }
    }

    #[test]
    fn server_retry_hint_becomes_initial_delay() {
        let mut backoff = Backoff::new(no_jitter());
        backoff.set_initial_delay(Duration::from_millis(200));
        assert_eq!(backoff.next_delay(), Duration::from_millis(200));
        assert_eq!(backoff.next_delay(), Duration::from_millis(300));
    }

    #[test]
    fn zero_retry_hint_keeps_a_floor() {
        let mut backoff = Backoff::new(no_jitter());
        backoff.set_initial_delay(Duration::ZERO);
        assert_eq!(backoff.next_delay(), MIN_RETRY_DELAY);
        assert_eq!(backoff.next_delay(), Duration::from_millis(150));

        backoff.set_initial_delay(Duration::from_secs(600));
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(30000));
    }
}
