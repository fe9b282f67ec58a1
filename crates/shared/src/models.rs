//! Shared data models for the matchmaker and gateway.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::protocol::{EVENT_SNAPSHOT, EVENT_UPDATE};

// --- Cars ---

/// Reservation state of a car as tracked by the matchmaker.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CarState {
    Free,
    Reserved,
    Busy,
}

impl CarState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CarState::Free => "FREE",
            CarState::Reserved => "RESERVED",
            CarState::Busy => "BUSY",
        }
    }

    pub fn is_free(&self) -> bool {
        matches!(self, CarState::Free)
    }
}

impl std::fmt::Display for CarState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of claimable capacity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Car {
    pub id: String,
    pub state: CarState,
    /// Present iff the car is not free.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "empty_as_none"
    )]
    pub assigned_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    /// Seconds left on the reservation; only meaningful while `Reserved`.
    #[serde(
        default,
        rename = "ttl",
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_ttl"
    )]
    pub ttl_seconds: Option<u32>,
}

impl Car {
    pub fn new(id: impl Into<String>, state: CarState) -> Self {
        Self {
            id: id.into(),
            state,
            assigned_to: None,
            updated_at: None,
            ttl_seconds: None,
        }
    }

    pub fn assigned(mut self, user_id: impl Into<String>) -> Self {
        self.assigned_to = Some(user_id.into());
        self
    }

    pub fn with_ttl(mut self, ttl_seconds: u32) -> Self {
        self.ttl_seconds = Some(ttl_seconds);
        self
    }

    pub fn updated(mut self, at: DateTime<Utc>) -> Self {
        self.updated_at = Some(at);
        self
    }

    /// Drop fields that do not apply to the car's state: a free car has no
    /// assignee and only a reserved car has a TTL.
    pub fn normalized(mut self) -> Self {
        if self.state.is_free() {
            self.assigned_to = None;
        }
        if self.state != CarState::Reserved {
            self.ttl_seconds = None;
        }
        self
    }

    pub fn is_owned_by(&self, user_id: &str) -> bool {
        !self.state.is_free() && self.assigned_to.as_deref() == Some(user_id)
    }
}

fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|v| !v.is_empty()))
}

// The matchmaker reports TTL as a signed integer of whole seconds.
fn lenient_ttl<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<i64>::deserialize(deserializer)?;
    Ok(value.map(|v| v.clamp(0, i64::from(u32::MAX)) as u32))
}

// --- Requests ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClaimRequest {
    pub user_id: String,
    pub ttl_sec: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseRequest {
    pub user_id: String,
    pub car_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub user_id: String,
    pub car_id: String,
}

// --- Responses ---

/// Body of a successful claim. Servers may return the full car or only
/// `{id, assignedTo}`, so everything but the id is optional.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClaimResponse {
    pub id: String,
    #[serde(default)]
    pub state: Option<CarState>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub assigned_to: Option<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, rename = "ttl", deserialize_with = "lenient_ttl")]
    pub ttl_seconds: Option<u32>,
}

impl ClaimResponse {
    /// The reserved car this claim produced, filling gaps from the request.
    pub fn into_car(self, user_id: &str, requested_ttl: u32) -> Car {
        Car {
            id: self.id,
            state: CarState::Reserved,
            assigned_to: Some(self.assigned_to.unwrap_or_else(|| user_id.to_string())),
            updated_at: self.updated_at,
            ttl_seconds: Some(self.ttl_seconds.unwrap_or(requested_ttl)),
        }
    }
}

/// Body of a successful release. Only `id` is guaranteed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseResponse {
    pub id: String,
    #[serde(default)]
    pub state: Option<CarState>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub assigned_to: Option<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ReleaseResponse {
    /// The full car, when the server returned one.
    pub fn car(&self) -> Option<Car> {
        let state = self.state?;
        Some(
            Car {
                id: self.id.clone(),
                state,
                assigned_to: self.assigned_to.clone(),
                updated_at: self.updated_at,
                ttl_seconds: None,
            }
            .normalized(),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionResponse {
    #[serde(default)]
    pub token: String,
}

// --- Event stream ---

/// Raw `{type, data}` frame carried on the matchmaker event stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// A recognized event-stream frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// The complete table, in server order.
    Snapshot(Vec<Car>),
    /// Something changed; the payload is not interpreted.
    Update(serde_json::Value),
}

impl ServerEvent {
    /// Decode one frame. `Ok(None)` means the envelope was well formed but of
    /// a type this client does not know.
    pub fn decode(text: &str) -> Result<Option<Self>, serde_json::Error> {
        let envelope: EventEnvelope = serde_json::from_str(text)?;
        Self::from_envelope(envelope)
    }

    pub fn from_envelope(envelope: EventEnvelope) -> Result<Option<Self>, serde_json::Error> {
        match envelope.kind.as_str() {
            EVENT_SNAPSHOT => {
                let rows: Vec<Car> = serde_json::from_value(envelope.data)?;
                Ok(Some(ServerEvent::Snapshot(rows)))
            }
            EVENT_UPDATE => Ok(Some(ServerEvent::Update(envelope.data))),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn car_decodes_matchmaker_shape() {
        let car: Car = serde_json::from_str(
            r#"{"id":"car-2","state":"RESERVED","assignedTo":"u1","updatedAt":"2024-05-01T10:00:00.123456789Z","ttl":42}"#,
        )
        .unwrap();
        assert_eq!(car.id, "car-2");
        assert_eq!(car.state, CarState::Reserved);
        assert_eq!(car.assigned_to.as_deref(), Some("u1"));
        assert_eq!(car.ttl_seconds, Some(42));
        assert!(car.updated_at.is_some());
    }

    #[test]
    fn car_tolerates_missing_and_empty_fields() {
        let car: Car = serde_json::from_str(r#"{"id":"car-1","state":"FREE","assignedTo":""}"#).unwrap();
        assert_eq!(car.assigned_to, None);
        assert_eq!(car.updated_at, None);
        assert_eq!(car.ttl_seconds, None);
    }

    #[test]
    fn negative_ttl_clamps_to_zero() {
        let car: Car = serde_json::from_str(r#"{"id":"car-1","state":"RESERVED","ttl":-3}"#).unwrap();
        assert_eq!(car.ttl_seconds, Some(0));
    }

    #[test]
    fn unknown_state_is_a_decode_error() {
        assert!(serde_json::from_str::<Car>(r#"{"id":"car-1","state":"PARKED"}"#).is_err());
    }

    #[test]
    fn normalized_drops_fields_that_do_not_apply() {
        let free = Car::new("car-1", CarState::Free).assigned("u1").with_ttl(30).normalized();
        assert_eq!(free.assigned_to, None);
        assert_eq!(free.ttl_seconds, None);

        let busy = Car::new("car-1", CarState::Busy).assigned("u1").with_ttl(30).normalized();
        assert_eq!(busy.assigned_to.as_deref(), Some("u1"));
        assert_eq!(busy.ttl_seconds, None);
    }

    #[test]
    fn claim_response_fills_gaps_from_request() {
        let resp: ClaimResponse = serde_json::from_str(r#"{"id":"car-3"}"#).unwrap();
        let car = resp.into_car("u9", 60);
        assert_eq!(car.state, CarState::Reserved);
        assert_eq!(car.assigned_to.as_deref(), Some("u9"));
        assert_eq!(car.ttl_seconds, Some(60));
    }

    #[test]
    fn release_response_without_state_has_no_car() {
        let resp: ReleaseResponse = serde_json::from_str(r#"{"id":"car-3"}"#).unwrap();
        assert_eq!(resp.car(), None);

        let resp: ReleaseResponse =
            serde_json::from_str(r#"{"id":"car-3","state":"FREE","assignedTo":""}"#).unwrap();
        assert_eq!(resp.car(), Some(Car::new("car-3", CarState::Free)));
    }

    #[test]
    fn decodes_snapshot_and_update_envelopes() {
        let snap = ServerEvent::decode(r#"{"type":"snapshot","data":[{"id":"car-1","state":"FREE"}]}"#)
            .unwrap();
        assert_eq!(
            snap,
            Some(ServerEvent::Snapshot(vec![Car::new("car-1", CarState::Free)]))
        );

        let update = ServerEvent::decode(r#"{"type":"update","data":{"id":"car-1"}}"#).unwrap();
        assert!(matches!(update, Some(ServerEvent::Update(_))));

        let bare = ServerEvent::decode(r#"{"type":"update"}"#).unwrap();
        assert_eq!(bare, Some(ServerEvent::Update(serde_json::Value::Null)));
    }

    #[test]
    fn unknown_envelope_type_is_not_an_error() {
        assert_eq!(ServerEvent::decode(r#"{"type":"heartbeat","data":1}"#).unwrap(), None);
    }

    #[test]
    fn malformed_frames_fail_to_decode() {
        assert!(ServerEvent::decode("not json").is_err());
        assert!(ServerEvent::decode(r#"{"data":[]}"#).is_err());
        assert!(ServerEvent::decode(r#"{"type":"snapshot","data":{"id":"car-1"}}"#).is_err());
    }
}
