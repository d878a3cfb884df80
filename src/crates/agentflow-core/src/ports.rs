//! External input ports - the runtime's request/response boundary.
//!
//! An [`InputPort`] is an executor-shaped endpoint at which the workflow
//! asks the **caller** for information. Any message delivered to a port
//! becomes an [`ExternalRequest`] surfaced through a `RequestInfo` event;
//! the run pauses once quiescent with outstanding requests. The caller
//! answers with an [`ExternalResponse`] carrying the same request id; the
//! response payload is delivered to the port's executor and forwarded along
//! its outgoing edges.
//!
//! Each port declares its request and response payload types. The runtime
//! enforces response-type assignability **at enqueue time** - a mismatched
//! response is rejected before it can touch run state.
//!
//! # Example
//!
//! ```rust
//! use agentflow_core::ports::{ExternalRequest, ExternalResponse, InputPort};
//! use serde_json::json;
//!
//! let port = InputPort::new("ask_user", "question", "answer");
//!
//! // The runtime emits something like:
//! let request = ExternalRequest {
//!     port_id: port.id.clone(),
//!     request_id: "req-1".to_string(),
//!     type_tag: port.request_tag.clone(),
//!     payload: json!("how many?"),
//! };
//!
//! // The caller replies:
//! let response = ExternalResponse::reply_to(&request, "answer", json!(42));
//! assert_eq!(response.request_id, request.request_id);
//! ```

use crate::message::TypeTag;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Declaration of an external input endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InputPort {
    /// Port id; also the id of the port's executor in the graph.
    pub id: String,

    /// Type tag of payloads the port turns into external requests.
    pub request_tag: TypeTag,

    /// Type tag responses must be assignable to.
    pub response_tag: TypeTag,
}

impl InputPort {
    pub fn new(
        id: impl Into<String>,
        request_tag: impl Into<TypeTag>,
        response_tag: impl Into<TypeTag>,
    ) -> Self {
        Self {
            id: id.into(),
            request_tag: request_tag.into(),
            response_tag: response_tag.into(),
        }
    }
}

/// A request for caller-supplied input, emitted through a `RequestInfo`
/// event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExternalRequest {
    /// Port that emitted the request.
    pub port_id: String,

    /// Correlation id the response must echo.
    pub request_id: String,

    /// Type tag of the request payload.
    pub type_tag: TypeTag,

    /// Portable request payload.
    pub payload: Value,
}

/// The caller's answer to an [`ExternalRequest`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExternalResponse {
    /// Port the response is addressed to.
    pub port_id: String,

    /// Id of the request being answered.
    pub request_id: String,

    /// Type tag of the response payload; must be assignable to the port's
    /// declared response tag.
    pub type_tag: TypeTag,

    /// Portable response payload.
    pub payload: Value,
}

impl ExternalResponse {
    pub fn new(
        port_id: impl Into<String>,
        request_id: impl Into<String>,
        type_tag: impl Into<TypeTag>,
        payload: Value,
    ) -> Self {
        Self {
            port_id: port_id.into(),
            request_id: request_id.into(),
            type_tag: type_tag.into(),
            payload,
        }
    }

    /// Build a response mirroring a request's port and request ids.
    pub fn reply_to(request: &ExternalRequest, type_tag: impl Into<TypeTag>, payload: Value) -> Self {
        Self::new(
            request.port_id.clone(),
            request.request_id.clone(),
            type_tag,
            payload,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reply_mirrors_request_identity() {
        let request = ExternalRequest {
            port_id: "p".to_string(),
            request_id: "r-1".to_string(),
            type_tag: "question".to_string(),
            payload: json!("how many?"),
        };
        let response = ExternalResponse::reply_to(&request, "answer", json!(42));
        assert_eq!(response.port_id, "p");
        assert_eq!(response.request_id, "r-1");
        assert_eq!(response.type_tag, "answer");
        assert_eq!(response.payload, json!(42));
    }

    #[test]
    fn wire_format_round_trips() {
        let request = ExternalRequest {
            port_id: "p".to_string(),
            request_id: "r-1".to_string(),
            type_tag: "question".to_string(),
            payload: json!({"text": "how many?"}),
        };
        let value = serde_json::to_value(&request).unwrap();
        let back: ExternalRequest = serde_json::from_value(value).unwrap();
        assert_eq!(back, request);
    }
}
