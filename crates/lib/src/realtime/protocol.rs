//! Socket.IO v4 / Engine.IO v4 text packets (WebSocket transport only).
//!
//! An Engine.IO frame is one type digit followed by data. Message frames (`4`) carry a
//! Socket.IO packet: type digit, optional `/namespace,`, optional ack id, then JSON.
//! `42["new_event",{...}]` is an EVENT on the default namespace.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Engine.IO protocol revision requested in the handshake URL.
pub const ENGINE_IO_VERSION: u8 = 4;

const DEFAULT_NAMESPACE: &str = "/";

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("empty frame")]
    Empty,
    #[error("unknown engine.io packet type {0:?}")]
    UnknownEngineType(char),
    #[error("unknown socket.io packet type {0:?}")]
    UnknownSocketType(char),
    #[error("binary socket.io packets are not supported")]
    BinaryUnsupported,
    #[error("invalid packet json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("malformed packet: {0}")]
    Malformed(&'static str),
}

/// Engine.IO open payload: `0{"sid":..,"upgrades":[],"pingInterval":25000,"pingTimeout":20000}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    pub ping_interval: u64,
    pub ping_timeout: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_payload: Option<u64>,
}

/// One decoded text frame, Engine.IO control packets and Socket.IO packets flattened together.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Open(Handshake),
    Close,
    Ping,
    Pong,
    Noop,
    /// Client → server carries auth data; server → client carries `{"sid": ..}`.
    Connect {
        namespace: String,
        data: Option<Value>,
    },
    Disconnect {
        namespace: String,
    },
    Event {
        namespace: String,
        ack_id: Option<u64>,
        name: String,
        payload: Value,
    },
    Ack {
        namespace: String,
        ack_id: u64,
        args: Vec<Value>,
    },
    ConnectError {
        namespace: String,
        message: String,
    },
}

impl Packet {
    /// CONNECT on the default namespace with `{"token": credential}` as auth.
    pub fn connect_with_token(token: &str) -> Self {
        Packet::Connect {
            namespace: DEFAULT_NAMESPACE.to_string(),
            data: Some(serde_json::json!({ "token": token })),
        }
    }

    /// EVENT on the default namespace without an ack id.
    pub fn event(name: impl Into<String>, payload: Value) -> Self {
        Packet::Event {
            namespace: DEFAULT_NAMESPACE.to_string(),
            ack_id: None,
            name: name.into(),
            payload,
        }
    }

    pub fn disconnect() -> Self {
        Packet::Disconnect {
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }

    /// Decode a WebSocket text frame.
    pub fn decode(frame: &str) -> Result<Self, ProtocolError> {
        let mut chars = frame.chars();
        let typ = chars.next().ok_or(ProtocolError::Empty)?;
        let rest = chars.as_str();
        match typ {
            '0' => Ok(Packet::Open(serde_json::from_str(rest)?)),
            '1' => Ok(Packet::Close),
            '2' => Ok(Packet::Ping),
            '3' => Ok(Packet::Pong),
            '4' => decode_socket_packet(rest),
            '5' | '6' => Ok(Packet::Noop),
            other => Err(ProtocolError::UnknownEngineType(other)),
        }
    }

    /// Encode as a WebSocket text frame.
    pub fn encode(&self) -> String {
        match self {
            Packet::Open(h) => format!("0{}", serde_json::to_string(h).unwrap_or_default()),
            Packet::Close => "1".to_string(),
            Packet::Ping => "2".to_string(),
            Packet::Pong => "3".to_string(),
            Packet::Noop => "6".to_string(),
            Packet::Connect { namespace, data } => {
                let mut out = format!("40{}", namespace_prefix(namespace));
                if let Some(d) = data {
                    out.push_str(&d.to_string());
                }
                out
            }
            Packet::Disconnect { namespace } => format!("41{}", namespace_prefix(namespace)),
            Packet::Event {
                namespace,
                ack_id,
                name,
                payload,
            } => {
                let body = Value::Array(vec![Value::String(name.clone()), payload.clone()]);
                format!(
                    "42{}{}{}",
                    namespace_prefix(namespace),
                    ack_id.map(|id| id.to_string()).unwrap_or_default(),
                    body
                )
            }
            Packet::Ack {
                namespace,
                ack_id,
                args,
            } => format!(
                "43{}{}{}",
                namespace_prefix(namespace),
                ack_id,
                Value::Array(args.clone())
            ),
            Packet::ConnectError { namespace, message } => format!(
                "44{}{}",
                namespace_prefix(namespace),
                serde_json::json!({ "message": message })
            ),
        }
    }
}

/// Namespaces other than "/" are written as `/chat,`.
fn namespace_prefix(namespace: &str) -> String {
    if namespace.is_empty() || namespace == DEFAULT_NAMESPACE {
        String::new()
    } else {
        format!("{},", namespace)
    }
}

enum SocketKind {
    Connect,
    Disconnect,
    Event,
    Ack,
    ConnectError,
}

fn decode_socket_packet(s: &str) -> Result<Packet, ProtocolError> {
    let mut chars = s.chars();
    let typ = chars.next().ok_or(ProtocolError::Malformed("empty message packet"))?;
    let kind = match typ {
        '0' => SocketKind::Connect,
        '1' => SocketKind::Disconnect,
        '2' => SocketKind::Event,
        '3' => SocketKind::Ack,
        '4' => SocketKind::ConnectError,
        '5' | '6' => return Err(ProtocolError::BinaryUnsupported),
        other => return Err(ProtocolError::UnknownSocketType(other)),
    };
    let mut rest = chars.as_str();

    let namespace = if rest.starts_with('/') {
        match rest.find(',') {
            Some(i) => {
                let ns = &rest[..i];
                rest = &rest[i + 1..];
                ns.to_string()
            }
            None => {
                let ns = rest.to_string();
                rest = "";
                ns
            }
        }
    } else {
        DEFAULT_NAMESPACE.to_string()
    };

    let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
    let ack_id = if digits > 0 {
        let id = rest[..digits]
            .parse::<u64>()
            .map_err(|_| ProtocolError::Malformed("ack id out of range"))?;
        rest = &rest[digits..];
        Some(id)
    } else {
        None
    };

    let data: Option<Value> = if rest.trim().is_empty() {
        None
    } else {
        Some(serde_json::from_str(rest)?)
    };

    match kind {
        SocketKind::Connect => Ok(Packet::Connect { namespace, data }),
        SocketKind::Disconnect => Ok(Packet::Disconnect { namespace }),
        SocketKind::Event => {
            let Some(Value::Array(mut items)) = data else {
                return Err(ProtocolError::Malformed("event body must be an array"));
            };
            if items.is_empty() {
                return Err(ProtocolError::Malformed("event without a name"));
            }
            let Value::String(name) = items.remove(0) else {
                return Err(ProtocolError::Malformed("event name must be a string"));
            };
            let payload = match items.len() {
                0 => Value::Null,
                1 => items.remove(0),
                _ => Value::Array(items),
            };
            Ok(Packet::Event {
                namespace,
                ack_id,
                name,
                payload,
            })
        }
        SocketKind::Ack => {
            let ack_id = ack_id.ok_or(ProtocolError::Malformed("ack without id"))?;
            let args = match data {
                Some(Value::Array(items)) => items,
                Some(other) => vec![other],
                None => Vec::new(),
            };
            Ok(Packet::Ack {
                namespace,
                ack_id,
                args,
            })
        }
        SocketKind::ConnectError => {
            let message = match data {
                Some(Value::Object(map)) => map
                    .get("message")
                    .and_then(|v| v.as_str())
                    .unwrap_or("connect error")
                    .to_string(),
                Some(Value::String(s)) => s,
                _ => "connect error".to_string(),
            };
            Ok(Packet::ConnectError { namespace, message })
        }
    }
}

/// Build the WebSocket URL for a server base URL: `https://host` → `wss://host/socket.io/?EIO=4&transport=websocket`.
pub fn socket_url(base_url: &str) -> String {
    let base = base_url.trim().trim_end_matches('/');
    let base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else if base.starts_with("ws://") || base.starts_with("wss://") {
        base.to_string()
    } else {
        format!("wss://{}", base)
    };
    format!(
        "{}/socket.io/?EIO={}&transport=websocket",
        base, ENGINE_IO_VERSION
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_open_handshake() {
        let p = Packet::decode(
            r#"0{"sid":"abc","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#,
        )
        .unwrap();
        let Packet::Open(h) = p else {
            panic!("expected open, got {:?}", p);
        };
        assert_eq!(h.sid, "abc");
        assert_eq!(h.ping_interval, 25000);
        assert_eq!(h.ping_timeout, 20000);
        assert_eq!(h.max_payload, Some(1_000_000));
    }

    #[test]
    fn decodes_ping_and_encodes_pong() {
        assert_eq!(Packet::decode("2").unwrap(), Packet::Ping);
        assert_eq!(Packet::Pong.encode(), "3");
    }

    #[test]
    fn decodes_event_with_single_argument() {
        let p = Packet::decode(r#"42["new_event",{"device":"D1","lat":1.0,"lon":2.0}]"#).unwrap();
        assert_eq!(
            p,
            Packet::Event {
                namespace: "/".to_string(),
                ack_id: None,
                name: "new_event".to_string(),
                payload: json!({"device": "D1", "lat": 1.0, "lon": 2.0}),
            }
        );
    }

    #[test]
    fn decodes_event_with_namespace_and_ack_id() {
        let p = Packet::decode(r#"42/alerts,17["proximity_alert",{"hotspot_name":"North gate"},"extra"]"#)
            .unwrap();
        let Packet::Event {
            namespace,
            ack_id,
            name,
            payload,
        } = p
        else {
            panic!("expected event");
        };
        assert_eq!(namespace, "/alerts");
        assert_eq!(ack_id, Some(17));
        assert_eq!(name, "proximity_alert");
        assert_eq!(payload, json!([{"hotspot_name": "North gate"}, "extra"]));
    }

    #[test]
    fn event_without_payload_is_null() {
        let p = Packet::decode(r#"42["hotspot_deleted"]"#).unwrap();
        assert!(matches!(p, Packet::Event { payload: Value::Null, .. }));
    }

    #[test]
    fn decodes_connect_ack_and_connect_error() {
        assert_eq!(
            Packet::decode(r#"40{"sid":"xyz"}"#).unwrap(),
            Packet::Connect {
                namespace: "/".to_string(),
                data: Some(json!({"sid": "xyz"})),
            }
        );
        assert_eq!(
            Packet::decode(r#"44{"message":"Authentication error"}"#).unwrap(),
            Packet::ConnectError {
                namespace: "/".to_string(),
                message: "Authentication error".to_string(),
            }
        );
    }

    #[test]
    fn rejects_binary_and_garbage() {
        assert!(matches!(
            Packet::decode(r#"451-["new_event",{"_placeholder":true,"num":0}]"#),
            Err(ProtocolError::BinaryUnsupported)
        ));
        assert!(matches!(Packet::decode(""), Err(ProtocolError::Empty)));
        assert!(matches!(Packet::decode("9"), Err(ProtocolError::UnknownEngineType('9'))));
        assert!(matches!(Packet::decode(r#"42{"not":"array"}"#), Err(ProtocolError::Malformed(_))));
    }

    #[test]
    fn encodes_client_packets() {
        assert_eq!(
            Packet::connect_with_token("tok").encode(),
            r#"40{"token":"tok"}"#
        );
        assert_eq!(
            Packet::event("ping_location", json!({"lat": 1.5})).encode(),
            r#"42["ping_location",{"lat":1.5}]"#
        );
        assert_eq!(Packet::disconnect().encode(), "41");
    }

    #[test]
    fn socket_url_maps_scheme() {
        assert_eq!(
            socket_url("https://sih-saksham.onrender.com/"),
            "wss://sih-saksham.onrender.com/socket.io/?EIO=4&transport=websocket"
        );
        assert_eq!(
            socket_url("http://127.0.0.1:5000"),
            "ws://127.0.0.1:5000/socket.io/?EIO=4&transport=websocket"
        );
    }
}
