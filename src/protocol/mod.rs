//! Wire message shapes for the AWS AppSync realtime protocol over the
//! `graphql-ws` subprotocol.
//!
//! AppSync's own message `type` values predate and differ from the more
//! common `graphql-transport-ws` protocol: `start`/`stop` instead of
//! `subscribe`/`complete`, a standalone `ka` keep-alive message, and a
//! `connection_error` variant.

pub mod url;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::GraphQlError;

/// Messages sent from this client to the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    ConnectionInit,
    Start {
        id: String,
        payload: StartPayload,
    },
    Stop {
        id: String,
    },
}

/// Payload of a `start` frame: the GraphQL document plus the per-request
/// authorization header object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartPayload {
    /// JSON-encoded `{query, variables}`, matching AppSync's requirement
    /// that `data` be a *string*, not a nested object.
    pub data: String,
    pub extensions: StartExtensions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartExtensions {
    pub authorization: HashMap<String, String>,
}

/// Messages received from the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    ConnectionAck {
        #[serde(default)]
        payload: ConnectionAckPayload,
    },
    #[serde(rename = "ka")]
    KeepAlive,
    StartAck {
        id: String,
    },
    Data {
        id: String,
        payload: Value,
    },
    Error {
        #[serde(default)]
        id: Option<String>,
        payload: ErrorPayload,
    },
    ConnectionError {
        payload: ConnectionErrorPayload,
    },
    Complete {
        id: String,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionAckPayload {
    #[serde(default, rename = "connectionTimeoutMs")]
    pub connection_timeout_ms: Option<u64>,
}

/// `error` frames may carry either a single GraphQL-shaped error object or
/// an array of them depending on server version; normalize to a `Vec` at
/// the deserialization boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ErrorPayload {
    Many(Vec<GraphQlError>),
    One(GraphQlError),
}

impl ErrorPayload {
    pub fn into_vec(self) -> Vec<GraphQlError> {
        match self {
            ErrorPayload::Many(errors) => errors,
            ErrorPayload::One(error) => vec![error],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionErrorPayload {
    #[serde(default)]
    pub errors: Vec<ConnectionErrorDetail>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionErrorDetail {
    #[serde(default)]
    pub error_type: Option<String>,
    #[serde(default)]
    pub error_code: Option<i64>,
}

impl ClientMessage {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("ClientMessage serialization is infallible")
    }
}

impl ServerMessage {
    pub fn from_text(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_frame_matches_wire_shape() {
        let msg = ClientMessage::Start {
            id: "abc".into(),
            payload: StartPayload {
                data: "{\"query\":\"subscription{x}\",\"variables\":{}}".into(),
                extensions: StartExtensions {
                    authorization: HashMap::from([("host".to_string(), "example.com".to_string())]),
                },
            },
        };
        let json: Value = serde_json::from_str(&msg.to_json()).unwrap();
        assert_eq!(json["type"], "start");
        assert_eq!(json["id"], "abc");
        assert!(json["payload"]["data"].is_string());
    }

    #[test]
    fn parses_connection_ack_with_timeout() {
        let text = r#"{"type":"connection_ack","payload":{"connectionTimeoutMs":300000}}"#;
        let msg = ServerMessage::from_text(text).unwrap();
        match msg {
            ServerMessage::ConnectionAck { payload } => {
                assert_eq!(payload.connection_timeout_ms, Some(300_000));
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn parses_start_ack() {
        let msg = ServerMessage::from_text(r#"{"type":"start_ack","id":"abc"}"#).unwrap();
        match msg {
            ServerMessage::StartAck { id } => assert_eq!(id, "abc"),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn parses_keep_alive() {
        let msg = ServerMessage::from_text(r#"{"type":"ka"}"#).unwrap();
        assert!(matches!(msg, ServerMessage::KeepAlive));
    }

    #[test]
    fn parses_data_frame() {
        let text = r#"{"type":"data","id":"1","payload":{"data":{"onCreateTodo":{"id":"1"}}}}"#;
        let msg = ServerMessage::from_text(text).unwrap();
        match msg {
            ServerMessage::Data { id, payload } => {
                assert_eq!(id, "1");
                assert_eq!(payload["data"]["onCreateTodo"]["id"], "1");
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn parses_connection_error() {
        let text = r#"{"type":"connection_error","payload":{"errors":[{"errorType":"UnauthorizedException","errorCode":401}]}}"#;
        let msg = ServerMessage::from_text(text).unwrap();
        match msg {
            ServerMessage::ConnectionError { payload } => {
                assert_eq!(payload.errors[0].error_code, Some(401));
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn parses_error_payload_as_array_or_single_object() {
        let array = r#"{"type":"error","id":"1","payload":[{"message":"boom"}]}"#;
        let single = r#"{"type":"error","id":"1","payload":{"message":"boom"}}"#;
        for text in [array, single] {
            let msg = ServerMessage::from_text(text).unwrap();
            match msg {
                ServerMessage::Error { payload, .. } => {
                    assert_eq!(payload.into_vec()[0].message, "boom");
                }
                other => panic!("unexpected message: {other:?}"),
            }
        }
    }
}
