//! Endpoint wrappers: one method per server route.

use crate::api::client::{ApiClient, ApiError};
use crate::api::models::{
    extract_item, extract_list, AuthResponse, DetectionEvent, Device, Hotspot, HotspotQuery,
    Notification, User,
};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

/// Radius used by [`ApiClient::nearby_hotspots`] when none is given.
pub const DEFAULT_NEARBY_RADIUS_KM: f64 = 10.0;

/// One path segment, percent-encoded so ids and roles cannot change the route.
fn seg(value: &str) -> std::borrow::Cow<'_, str> {
    urlencoding::encode(value)
}

fn list_of<T: DeserializeOwned>(body: Value, key: &str) -> Result<Vec<T>, ApiError> {
    serde_json::from_value(extract_list(body, key)).map_err(ApiError::from)
}

fn item_of<T: DeserializeOwned>(body: Value, key: &str) -> Result<T, ApiError> {
    serde_json::from_value(extract_item(body, key)).map_err(ApiError::from)
}

impl AuthResponse {
    /// Token and user, or an error naming what the server left out.
    pub fn into_session(self) -> Result<(String, Value), ApiError> {
        let token = self
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ApiError::Decode("no authentication token received from server".to_string()))?;
        let user = self
            .user
            .filter(|u| !u.is_null())
            .ok_or_else(|| ApiError::Decode("no user data received from server".to_string()))?;
        Ok((token, user))
    }
}

impl ApiClient {
    // ---- auth ----

    /// POST /api/auth/login
    pub async fn login(&self, email: &str, password: &str) -> Result<AuthResponse, ApiError> {
        let body = json!({ "email": email, "password": password });
        let res = self.request_public(Method::POST, "/api/auth/login", Some(&body)).await?;
        Ok(serde_json::from_value(res)?)
    }

    /// POST /api/auth/register (role defaults to "user").
    pub async fn register(
        &self,
        name: &str,
        email: &str,
        password: &str,
        role: Option<&str>,
    ) -> Result<AuthResponse, ApiError> {
        let body = json!({
            "name": name,
            "email": email,
            "password": password,
            "role": role.unwrap_or("user"),
        });
        let res = self.request_public(Method::POST, "/api/auth/register", Some(&body)).await?;
        Ok(serde_json::from_value(res)?)
    }

    /// POST /api/auth/logout
    pub async fn logout(&self) -> Result<(), ApiError> {
        self.post("/api/auth/logout", None).await.map(|_| ())
    }

    /// GET /api/auth/me
    pub async fn profile(&self) -> Result<User, ApiError> {
        item_of(self.get("/api/auth/me").await?, "user")
    }

    // ---- users (admin) ----

    pub async fn list_users(&self) -> Result<Vec<User>, ApiError> {
        list_of(self.get("/api/users").await?, "users")
    }

    pub async fn users_by_role(&self, role: &str) -> Result<Vec<User>, ApiError> {
        list_of(self.get(&format!("/api/users/role/{}", seg(role))).await?, "users")
    }

    pub async fn get_user(&self, id: &str) -> Result<User, ApiError> {
        item_of(self.get(&format!("/api/users/{}", seg(id))).await?, "user")
    }

    pub async fn update_user(&self, id: &str, data: &Value) -> Result<Value, ApiError> {
        self.put(&format!("/api/users/{}", seg(id)), Some(data)).await
    }

    pub async fn delete_user(&self, id: &str) -> Result<(), ApiError> {
        self.delete(&format!("/api/users/{}", seg(id))).await.map(|_| ())
    }

    /// GET /api/users/search?query=..&role=..
    pub async fn search_users(&self, query: &str, role: Option<&str>) -> Result<Vec<User>, ApiError> {
        let mut params = vec![("query", query.to_string())];
        if let Some(r) = role {
            params.push(("role", r.to_string()));
        }
        list_of(self.get_with("/api/users/search", &params).await?, "users")
    }

    // ---- devices ----

    pub async fn list_devices(&self) -> Result<Vec<Device>, ApiError> {
        list_of(self.get("/api/devices").await?, "devices")
    }

    pub async fn get_device(&self, id: &str) -> Result<Device, ApiError> {
        item_of(self.get(&format!("/api/devices/{}", seg(id))).await?, "device")
    }

    /// POST /api/devices/create
    pub async fn create_device(&self, data: &Value) -> Result<Value, ApiError> {
        self.post("/api/devices/create", Some(data)).await
    }

    pub async fn update_device(&self, id: &str, data: &Value) -> Result<Value, ApiError> {
        self.put(&format!("/api/devices/{}", seg(id)), Some(data)).await
    }

    pub async fn delete_device(&self, id: &str) -> Result<(), ApiError> {
        self.delete(&format!("/api/devices/{}", seg(id))).await.map(|_| ())
    }

    // ---- detection events ----

    pub async fn list_events(&self) -> Result<Vec<DetectionEvent>, ApiError> {
        list_of(self.get("/api/events").await?, "events")
    }

    /// GET /api/events/latest/{deviceId}. `None` when the device has not reported yet.
    pub async fn latest_event(&self, device_id: &str) -> Result<Option<DetectionEvent>, ApiError> {
        let body = self.get(&format!("/api/events/latest/{}", seg(device_id))).await?;
        let item = extract_item(body, "event");
        if item.is_null() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_value(item)?))
    }

    pub async fn event_history(&self, device_id: &str) -> Result<Vec<DetectionEvent>, ApiError> {
        list_of(self.get(&format!("/api/events/history/{}", seg(device_id))).await?, "events")
    }

    /// POST /api/events/receive: submit a detection (device / test tooling).
    pub async fn receive_event(&self, data: &Value) -> Result<Value, ApiError> {
        self.post("/api/events/receive", Some(data)).await
    }

    // ---- hotspots ----

    pub async fn list_hotspots(&self, query: &HotspotQuery) -> Result<Vec<Hotspot>, ApiError> {
        let params = hotspot_params(query);
        list_of(self.get_with("/api/hotspots", &params).await?, "hotspots")
    }

    pub async fn get_hotspot(&self, id: &str) -> Result<Hotspot, ApiError> {
        item_of(self.get(&format!("/api/hotspots/{}", seg(id))).await?, "hotspot")
    }

    pub async fn create_hotspot(&self, data: &Value) -> Result<Value, ApiError> {
        self.post("/api/hotspots", Some(data)).await
    }

    pub async fn update_hotspot(&self, id: &str, data: &Value) -> Result<Value, ApiError> {
        self.put(&format!("/api/hotspots/{}", seg(id)), Some(data)).await
    }

    pub async fn delete_hotspot(&self, id: &str) -> Result<(), ApiError> {
        self.delete(&format!("/api/hotspots/{}", seg(id))).await.map(|_| ())
    }

    /// Hotspots within `radius_km` (default 10) of a point.
    pub async fn nearby_hotspots(
        &self,
        latitude: f64,
        longitude: f64,
        radius_km: Option<f64>,
    ) -> Result<Vec<Hotspot>, ApiError> {
        let query = HotspotQuery {
            near_lat: Some(latitude),
            near_lng: Some(longitude),
            radius_km: Some(radius_km.unwrap_or(DEFAULT_NEARBY_RADIUS_KM)),
            is_active: None,
        };
        self.list_hotspots(&query).await
    }

    // ---- notifications ----

    /// POST /api/notifications/register-token (device type defaults to "mobile").
    pub async fn register_push_token(&self, token: &str, device_type: Option<&str>) -> Result<(), ApiError> {
        let body = json!({
            "fcm_token": token,
            "device_type": device_type.unwrap_or("mobile"),
        });
        self.post("/api/notifications/register-token", Some(&body)).await.map(|_| ())
    }

    /// POST /api/notifications/send-all (admin broadcast).
    pub async fn send_to_all(&self, title: &str, body: &str, data: Option<&Value>) -> Result<Value, ApiError> {
        let payload = json!({
            "title": title,
            "body": body,
            "data": data.cloned().unwrap_or_else(|| json!({})),
        });
        self.post("/api/notifications/send-all", Some(&payload)).await
    }

    /// GET /api/notifications/my?limit=..&offset=.. (defaults 50 / 0).
    pub async fn my_notifications(
        &self,
        limit: Option<u32>,
        offset: Option<u32>,
    ) -> Result<Vec<Notification>, ApiError> {
        let params = [
            ("limit", limit.unwrap_or(50).to_string()),
            ("offset", offset.unwrap_or(0).to_string()),
        ];
        list_of(self.get_with("/api/notifications/my", &params).await?, "notifications")
    }

    /// PUT /api/notifications/{id}/read
    pub async fn mark_notification_read(&self, id: &str) -> Result<(), ApiError> {
        self.put(&format!("/api/notifications/{}/read", seg(id)), None)
            .await
            .map(|_| ())
    }
}

fn hotspot_params(query: &HotspotQuery) -> Vec<(&'static str, String)> {
    let mut params = Vec::new();
    if let Some(v) = query.near_lat {
        params.push(("near_lat", v.to_string()));
    }
    if let Some(v) = query.near_lng {
        params.push(("near_lng", v.to_string()));
    }
    if let Some(v) = query.radius_km {
        params.push(("radius_km", v.to_string()));
    }
    if let Some(v) = query.is_active {
        params.push(("is_active", v.to_string()));
    }
    params
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn into_session_requires_token_and_user() {
        let ok: AuthResponse =
            serde_json::from_value(json!({"accessToken": "t", "user": {"id": 1}})).unwrap();
        assert_eq!(ok.into_session().unwrap(), ("t".to_string(), json!({"id": 1})));

        let no_token: AuthResponse = serde_json::from_value(json!({"user": {"id": 1}})).unwrap();
        let err = no_token.into_session().unwrap_err();
        assert!(err.to_string().contains("no authentication token"));

        let no_user: AuthResponse = serde_json::from_value(json!({"accessToken": "t"})).unwrap();
        assert!(no_user.into_session().unwrap_err().to_string().contains("no user data"));
    }

    #[test]
    fn path_segments_are_encoded() {
        assert_eq!(seg("D1"), "D1");
        assert_eq!(seg("a/b c?x"), "a%2Fb%20c%3Fx");
        assert_eq!(format!("/api/users/{}", seg("../admin")), "/api/users/..%2Fadmin");
    }

    #[test]
    fn hotspot_params_skip_unset() {
        let q = HotspotQuery {
            near_lat: Some(11.5),
            near_lng: Some(76.25),
            radius_km: Some(10.0),
            is_active: None,
        };
        assert_eq!(
            hotspot_params(&q),
            vec![
                ("near_lat", "11.5".to_string()),
                ("near_lng", "76.25".to_string()),
                ("radius_km", "10".to_string()),
            ]
        );
        assert!(hotspot_params(&HotspotQuery::default()).is_empty());
    }
}
