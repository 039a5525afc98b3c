//! REST payloads. Known fields are typed; anything else the server sends is kept in `extra`.

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Decimal that the server may send as a JSON number or as a numeric string ("11.20000000").
/// Null, missing and empty strings become `None`.
fn number_or_string<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_f64()),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|_| de::Error::custom(format!("invalid decimal: {:?}", s))),
        Some(other) => Err(de::Error::custom(format!("expected a decimal, got {}", other))),
    }
}

/// Ids arrive as strings from some endpoints and numbers from others.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Id {
    Num(i64),
    Str(String),
}

impl std::fmt::Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Id::Num(n) => write!(f, "{}", n),
            Id::Str(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Id>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Login / register / refresh response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub user: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Field sensor that reports detections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Id>,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "number_or_string")]
    pub latitude: Option<f64>,
    #[serde(default, deserialize_with = "number_or_string")]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "number_or_string")]
    pub battery_percentage: Option<f64>,
    #[serde(default)]
    pub last_seen: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Elephant detection reported by a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Id>,
    #[serde(default)]
    pub source_device: Option<String>,
    #[serde(default, deserialize_with = "number_or_string")]
    pub latitude: Option<f64>,
    #[serde(default, deserialize_with = "number_or_string")]
    pub longitude: Option<f64>,
    #[serde(default, deserialize_with = "number_or_string")]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub detected_at: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Geographic zone of interest for elephant activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hotspot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Id>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "type")]
    pub typ: Option<String>,
    #[serde(default, deserialize_with = "number_or_string")]
    pub latitude: Option<f64>,
    #[serde(default, deserialize_with = "number_or_string")]
    pub longitude: Option<f64>,
    #[serde(default, deserialize_with = "number_or_string")]
    pub radius_km: Option<f64>,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub created_by_name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Id>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub read: Option<bool>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Query for `GET /api/hotspots`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HotspotQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub near_lat: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub near_lng: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub radius_km: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
}

/// Pull a list out of either a bare array or an object wrapping it under `key` (or `data`).
pub(crate) fn extract_list(body: Value, key: &str) -> Value {
    match body {
        Value::Object(mut map) => map
            .remove(key)
            .or_else(|| map.remove("data"))
            .unwrap_or_else(|| Value::Array(Vec::new())),
        other => other,
    }
}

/// Pull a single object out of either a bare object or a `{ key: {...} }` wrapper.
/// `{ key: null }` yields `Null`.
pub(crate) fn extract_item(body: Value, key: &str) -> Value {
    match body {
        Value::Object(mut map)
            if map.get(key).map_or(false, |v| v.is_object() || v.is_null()) =>
        {
            map.remove(key).unwrap_or(Value::Null)
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unknown_fields_are_kept() {
        let h: Hotspot = serde_json::from_value(json!({
            "id": 7,
            "name": "River bend",
            "type": "corridor",
            "latitude": 11.2,
            "longitude": 76.9,
            "radius_km": 2.5,
            "is_active": true,
            "risk": "high"
        }))
        .unwrap();
        assert_eq!(h.id, Some(Id::Num(7)));
        assert_eq!(h.typ.as_deref(), Some("corridor"));
        assert_eq!(h.extra.get("risk"), Some(&json!("high")));
        let back = serde_json::to_value(&h).unwrap();
        assert_eq!(back["risk"], json!("high"));
    }

    #[test]
    fn list_extraction_accepts_wrapped_and_bare() {
        assert_eq!(extract_list(json!([1, 2]), "devices"), json!([1, 2]));
        assert_eq!(extract_list(json!({"devices": [1]}), "devices"), json!([1]));
        assert_eq!(extract_list(json!({"data": [3]}), "devices"), json!([3]));
        assert_eq!(extract_list(json!({"count": 0}), "devices"), json!([]));
    }

    #[test]
    fn item_extraction_unwraps_only_objects() {
        assert_eq!(extract_item(json!({"hotspot": {"id": 1}}), "hotspot"), json!({"id": 1}));
        assert_eq!(extract_item(json!({"id": 1, "hotspot": "x"}), "hotspot"), json!({"id": 1, "hotspot": "x"}));
    }

    #[test]
    fn null_wrapper_means_no_item() {
        assert_eq!(extract_item(json!({"event": null}), "event"), Value::Null);
        assert_eq!(extract_item(json!({"event": null, "message": "none yet"}), "event"), Value::Null);
    }

    #[test]
    fn decimals_sent_as_strings_are_parsed() {
        let d: Device = serde_json::from_value(json!({
            "device_id": "D1",
            "latitude": "11.20000000",
            "longitude": 76.9,
            "battery_percentage": "81.5"
        }))
        .unwrap();
        assert_eq!(d.latitude, Some(11.2));
        assert_eq!(d.longitude, Some(76.9));
        assert_eq!(d.battery_percentage, Some(81.5));

        let h: Hotspot = serde_json::from_value(json!({"radius_km": "2.50", "latitude": null, "longitude": ""})).unwrap();
        assert_eq!(h.radius_km, Some(2.5));
        assert_eq!(h.latitude, None);
        assert_eq!(h.longitude, None);

        let e: DetectionEvent = serde_json::from_value(json!({"confidence": "0.93"})).unwrap();
        assert_eq!(e.confidence, Some(0.93));
        assert_eq!(e.latitude, None);

        let bad = serde_json::from_value::<Device>(json!({"latitude": "north"}));
        assert!(bad.is_err());
    }
}
