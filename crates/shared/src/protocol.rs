//! Route and endpoint constants for the matchmaker and gateway services.

/// Matchmaker: list all cars.
pub const ROUTE_ROOMS: &str = "/rooms";
/// Matchmaker: reserve a free car.
pub const ROUTE_CLAIM: &str = "/claim";
/// Matchmaker: give a reserved car back.
pub const ROUTE_RELEASE: &str = "/release";
/// Matchmaker: server-sent event stream of snapshot/update envelopes.
pub const ROUTE_EVENTS: &str = "/events";
/// Gateway: mint a play-session token for a claimed car.
pub const ROUTE_SESSION_CREATE: &str = "/session/create";

/// Matchmaker used when nothing else is configured.
pub const DEFAULT_MATCHMAKER_URL: &str = "http://localhost:8081";
/// Gateway used when nothing else is configured.
pub const DEFAULT_GATEWAY_URL: &str = "http://localhost:8080";

/// Envelope `type` of a full table replacement.
pub const EVENT_SNAPSHOT: &str = "snapshot";
/// Envelope `type` of a change notification.
pub const EVENT_UPDATE: &str = "update";

/// Reservation lifetime the matchmaker applies when none (or an out of range
/// value) is requested.
pub const DEFAULT_CLAIM_TTL_SECS: u32 = 120;
