//! Alert presentation: turns detection, notification and proximity events into visible alerts.
//!
//! [`AlertCenter`] holds the alert currently on screen and drives two pluggable sinks: a
//! [`Notifier`] for local notifications and an [`AlertCue`] for vibration / sound. Sinks run on
//! spawned tasks; their failures are logged and never reach the socket dispatch loop.

pub use crate::config::AlertStyle;

use crate::config::AlertsConfig;
use crate::realtime::{Channel, EventClient, Subscription};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast;

/// Vibration pattern (ms) for modal alerts.
pub const MODAL_VIBRATION: [u64; 4] = [0, 500, 200, 500];

/// Vibration pattern (ms) for heads-up alerts.
pub const HEADS_UP_VIBRATION: [u64; 6] = [0, 500, 200, 500, 200, 500];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    #[serde(rename = "elephant_detection")]
    Detection,
    Notification,
    #[serde(rename = "proximity_alert")]
    Proximity,
}

impl AlertKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertKind::Detection => "elephant_detection",
            AlertKind::Notification => "notification",
            AlertKind::Proximity => "proximity_alert",
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One alert as presented to the user.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub kind: AlertKind,
    pub title: String,
    pub message: String,
    /// Body of the local notification sent alongside the alert.
    pub notification_body: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub confidence: Option<f64>,
    pub source_device: Option<String>,
    pub detected_at: Option<String>,
    pub hotspot_name: Option<String>,
    /// The event payload (for notifications, its `data` object) plus `type`.
    pub data: Map<String, Value>,
    pub received_at: DateTime<Utc>,
}

fn field<'a>(payload: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| payload.get(*k))
        .find(|v| !v.is_null())
}

fn str_field(payload: &Value, keys: &[&str]) -> Option<String> {
    field(payload, keys).and_then(|v| match v {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn f64_field(payload: &Value, keys: &[&str]) -> Option<f64> {
    field(payload, keys).and_then(|v| match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

fn object_of(payload: &Value, kind: AlertKind) -> anyhow::Result<Map<String, Value>> {
    let Value::Object(map) = payload else {
        anyhow::bail!("{} payload is not an object: {}", kind, payload);
    };
    let mut data = map.clone();
    data.insert("type".to_string(), Value::String(kind.as_str().to_string()));
    Ok(data)
}

impl Alert {
    fn blank(kind: AlertKind, data: Map<String, Value>) -> Self {
        Self {
            kind,
            title: String::new(),
            message: String::new(),
            notification_body: String::new(),
            latitude: None,
            longitude: None,
            confidence: None,
            source_device: None,
            detected_at: None,
            hotspot_name: None,
            data,
            received_at: Utc::now(),
        }
    }

    /// Alert for a `new_event` detection.
    pub fn from_detection(payload: &Value) -> anyhow::Result<Self> {
        let mut alert = Self::blank(AlertKind::Detection, object_of(payload, AlertKind::Detection)?);
        alert.source_device = str_field(payload, &["source_device", "device_id", "device"]);
        alert.latitude = f64_field(payload, &["latitude", "lat"]);
        alert.longitude = f64_field(payload, &["longitude", "lon", "lng"]);
        alert.confidence = f64_field(payload, &["confidence"]);
        alert.detected_at = str_field(payload, &["detected_at", "timestamp"]);
        alert.title = "Elephant Detected!".to_string();
        alert.message = format!(
            "An elephant has been detected by {}",
            alert.source_device.as_deref().unwrap_or("an unknown device")
        );
        alert.notification_body = match (alert.latitude, alert.longitude) {
            (Some(lat), Some(lon)) => format!("Location: {:.4}, {:.4}", lat, lon),
            _ => "Location: unknown".to_string(),
        };
        Ok(alert)
    }

    /// Alert for a server `notification`: title and body as sent, `data` carried along.
    pub fn from_notification(payload: &Value) -> anyhow::Result<Self> {
        object_of(payload, AlertKind::Notification)?;
        let extra = payload.get("data").unwrap_or(&Value::Null);
        let mut data = match extra {
            Value::Object(m) => m.clone(),
            _ => Map::new(),
        };
        data.insert(
            "type".to_string(),
            Value::String(AlertKind::Notification.as_str().to_string()),
        );
        let mut alert = Self::blank(AlertKind::Notification, data);
        alert.title = str_field(payload, &["title"]).unwrap_or_else(|| "Notification".to_string());
        alert.message = str_field(payload, &["body", "message"]).unwrap_or_default();
        alert.notification_body = alert.message.clone();
        alert.latitude = f64_field(extra, &["latitude", "lat"]);
        alert.longitude = f64_field(extra, &["longitude", "lon", "lng"]);
        Ok(alert)
    }

    /// Alert for a `proximity_alert` near a hotspot.
    pub fn from_proximity(payload: &Value) -> anyhow::Result<Self> {
        let mut alert = Self::blank(AlertKind::Proximity, object_of(payload, AlertKind::Proximity)?);
        alert.hotspot_name = str_field(payload, &["hotspot_name"])
            .or_else(|| payload.get("hotspot").and_then(|h| str_field(h, &["name"])));
        alert.latitude = f64_field(payload, &["latitude", "lat"]);
        alert.longitude = f64_field(payload, &["longitude", "lon", "lng"]);
        alert.source_device = str_field(payload, &["source_device"]);
        alert.title = "Proximity Alert!".to_string();
        alert.message = format!(
            "Elephant detected near {}",
            alert.hotspot_name.as_deref().unwrap_or("a hotspot")
        );
        alert.notification_body = format!(
            "Elephant near {}",
            alert.hotspot_name.as_deref().unwrap_or("hotspot")
        );
        Ok(alert)
    }

    /// Build the alert for an inbound event; `None` for channels that do not raise alerts.
    pub fn from_event(channel: Channel, payload: &Value) -> Option<anyhow::Result<Self>> {
        match channel {
            Channel::Detection => Some(Self::from_detection(payload)),
            Channel::Notification => Some(Self::from_notification(payload)),
            Channel::ProximityAlert => Some(Self::from_proximity(payload)),
            _ => None,
        }
    }
}

/// Local notification sink.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, title: &str, body: &str, data: &Map<String, Value>) -> anyhow::Result<()>;
}

/// Vibration / sound sink. `start` may repeat until `stop`.
#[async_trait]
pub trait AlertCue: Send + Sync {
    async fn start(&self, pattern: &[u64]) -> anyhow::Result<()>;
    async fn stop(&self) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum AlertEvent {
    Shown(Alert),
    Dismissed(Alert),
}

/// Presentation settings taken from [`AlertsConfig`].
#[derive(Debug, Clone)]
pub struct AlertOptions {
    pub style: AlertStyle,
    /// Heads-up only; `None` keeps the banner until dismissed.
    pub auto_dismiss: Option<Duration>,
    /// Run the cue sink.
    pub cue: bool,
}

impl Default for AlertOptions {
    fn default() -> Self {
        Self::from_config(&AlertsConfig::default())
    }
}

impl AlertOptions {
    pub fn from_config(config: &AlertsConfig) -> Self {
        Self {
            style: config.style,
            auto_dismiss: (config.auto_dismiss_secs > 0)
                .then(|| Duration::from_secs(config.auto_dismiss_secs)),
            cue: config.sound,
        }
    }

    pub fn vibration(&self) -> &'static [u64] {
        match self.style {
            AlertStyle::Modal => &MODAL_VIBRATION,
            AlertStyle::HeadsUp => &HEADS_UP_VIBRATION,
        }
    }
}

#[derive(Default)]
struct State {
    current: Option<Alert>,
    /// Bumped on every show, so a stale auto-dismiss timer leaves a newer alert alone.
    seq: u64,
}

struct Inner {
    options: AlertOptions,
    notifier: Option<Arc<dyn Notifier>>,
    cue: Option<Arc<dyn AlertCue>>,
    state: Mutex<State>,
    events: broadcast::Sender<AlertEvent>,
}

fn lock(m: &Mutex<State>) -> MutexGuard<'_, State> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn spawn_sink<F>(what: &'static str, fut: F)
where
    F: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(h) => {
            h.spawn(async move {
                if let Err(e) = fut.await {
                    log::warn!("alert {} failed: {:#}", what, e);
                }
            });
        }
        Err(_) => log::debug!("no tokio runtime, skipping alert {}", what),
    }
}

/// Holds the visible alert and fans it out to sinks and observers. Cheap to clone.
#[derive(Clone)]
pub struct AlertCenter {
    inner: Arc<Inner>,
}

impl Default for AlertCenter {
    fn default() -> Self {
        Self::new(AlertOptions::default())
    }
}

impl AlertCenter {
    pub fn new(options: AlertOptions) -> Self {
        Self::with_sinks(options, None, None)
    }

    pub fn with_sinks(
        options: AlertOptions,
        notifier: Option<Arc<dyn Notifier>>,
        cue: Option<Arc<dyn AlertCue>>,
    ) -> Self {
        let (events, _) = broadcast::channel(32);
        Self {
            inner: Arc::new(Inner {
                options,
                notifier,
                cue,
                state: Mutex::new(State::default()),
                events,
            }),
        }
    }

    pub fn options(&self) -> &AlertOptions {
        &self.inner.options
    }

    /// Make `alert` the visible alert, replacing any previous one, and fire the sinks.
    pub fn show(&self, alert: Alert) {
        let seq = {
            let mut g = lock(&self.inner.state);
            g.seq += 1;
            g.current = Some(alert.clone());
            g.seq
        };
        log::info!("alert: {} ({})", alert.title, alert.message);

        if let Some(notifier) = self.inner.notifier.clone() {
            let (title, body, data) = (
                alert.title.clone(),
                alert.notification_body.clone(),
                alert.data.clone(),
            );
            spawn_sink("notification", async move { notifier.notify(&title, &body, &data).await });
        }
        if self.inner.options.cue {
            if let Some(cue) = self.inner.cue.clone() {
                let pattern = self.inner.options.vibration();
                spawn_sink("cue", async move { cue.start(pattern).await });
            }
        }
        if self.inner.options.style == AlertStyle::HeadsUp {
            if let Some(after) = self.inner.options.auto_dismiss {
                let center = self.clone();
                if let Ok(h) = tokio::runtime::Handle::try_current() {
                    h.spawn(async move {
                        tokio::time::sleep(after).await;
                        center.dismiss_if(seq);
                    });
                }
            }
        }
        let _ = self.inner.events.send(AlertEvent::Shown(alert));
    }

    /// Hide the visible alert and stop the cue. Returns the alert that was showing.
    pub fn dismiss(&self) -> Option<Alert> {
        let taken = lock(&self.inner.state).current.take();
        self.finish_dismiss(taken)
    }

    fn dismiss_if(&self, seq: u64) {
        let taken = {
            let mut g = lock(&self.inner.state);
            if g.seq != seq {
                return;
            }
            g.current.take()
        };
        if taken.is_some() {
            log::debug!("heads-up alert auto-dismissed");
        }
        self.finish_dismiss(taken);
    }

    fn finish_dismiss(&self, taken: Option<Alert>) -> Option<Alert> {
        let alert = taken?;
        if let Some(cue) = self.inner.cue.clone() {
            spawn_sink("cue stop", async move { cue.stop().await });
        }
        let _ = self.inner.events.send(AlertEvent::Dismissed(alert.clone()));
        Some(alert)
    }

    pub fn current(&self) -> Option<Alert> {
        lock(&self.inner.state).current.clone()
    }

    pub fn is_visible(&self) -> bool {
        lock(&self.inner.state).current.is_some()
    }

    /// Observe alerts as they are shown and dismissed.
    pub fn subscribe(&self) -> broadcast::Receiver<AlertEvent> {
        self.inner.events.subscribe()
    }

    /// Present `payload` from `channel`. Errors for malformed payloads.
    pub fn handle_event(&self, channel: Channel, payload: &Value) -> anyhow::Result<()> {
        match Alert::from_event(channel, payload) {
            Some(alert) => {
                self.show(alert?);
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Subscribe to the detection, notification and proximity channels of `client`.
    pub fn attach(&self, client: &EventClient) -> AlertSubscriptions {
        let subscriptions = [Channel::Detection, Channel::Notification, Channel::ProximityAlert]
            .into_iter()
            .map(|channel| {
                let center = self.clone();
                client.on(channel, move |payload: &Value| center.handle_event(channel, payload))
            })
            .collect();
        AlertSubscriptions { subscriptions }
    }
}

/// The three alert subscriptions made by [`AlertCenter::attach`].
#[must_use = "call detach() to stop presenting alerts"]
#[derive(Debug)]
pub struct AlertSubscriptions {
    subscriptions: Vec<Subscription>,
}

impl AlertSubscriptions {
    pub fn detach(self) {
        for s in &self.subscriptions {
            s.unsubscribe();
        }
    }

    pub fn channels(&self) -> Vec<Channel> {
        self.subscriptions.iter().map(Subscription::channel).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::ClientOptions;
    use serde_json::json;

    #[derive(Default)]
    struct Recorder {
        notified: Mutex<Vec<(String, String)>>,
        cues: Mutex<Vec<Vec<u64>>>,
        stops: Mutex<usize>,
    }

    #[async_trait]
    impl Notifier for Recorder {
        async fn notify(&self, title: &str, body: &str, _data: &Map<String, Value>) -> anyhow::Result<()> {
            self.notified.lock().unwrap().push((title.to_string(), body.to_string()));
            Ok(())
        }
    }

    #[async_trait]
    impl AlertCue for Recorder {
        async fn start(&self, pattern: &[u64]) -> anyhow::Result<()> {
            self.cues.lock().unwrap().push(pattern.to_vec());
            Ok(())
        }
        async fn stop(&self) -> anyhow::Result<()> {
            *self.stops.lock().unwrap() += 1;
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl Notifier for Failing {
        async fn notify(&self, _: &str, _: &str, _: &Map<String, Value>) -> anyhow::Result<()> {
            anyhow::bail!("permission denied")
        }
    }

    #[test]
    fn detection_text() {
        let payload = json!({
            "source_device": "CAM-07",
            "latitude": 11.123456,
            "longitude": 76.98765,
            "confidence": 0.93,
            "detected_at": "2024-03-01T04:12:00Z"
        });
        let alert = Alert::from_detection(&payload).unwrap();
        assert_eq!(alert.title, "Elephant Detected!");
        assert_eq!(alert.message, "An elephant has been detected by CAM-07");
        assert_eq!(alert.notification_body, "Location: 11.1235, 76.9877");
        assert_eq!(alert.confidence, Some(0.93));
        assert_eq!(alert.data["type"], json!("elephant_detection"));
        assert_eq!(alert.data["source_device"], json!("CAM-07"));
    }

    #[test]
    fn detection_without_location() {
        let alert = Alert::from_detection(&json!({"device": "D1"})).unwrap();
        assert_eq!(alert.source_device.as_deref(), Some("D1"));
        assert_eq!(alert.notification_body, "Location: unknown");
        assert!(Alert::from_detection(&json!([1, 2])).is_err());
    }

    #[test]
    fn notification_uses_title_body_and_data() {
        let payload = json!({
            "title": "Herd moving east",
            "body": "Avoid the river road",
            "data": {"hotspot_id": 4}
        });
        let alert = Alert::from_notification(&payload).unwrap();
        assert_eq!(alert.title, "Herd moving east");
        assert_eq!(alert.message, "Avoid the river road");
        assert_eq!(alert.notification_body, "Avoid the river road");
        assert_eq!(alert.data["hotspot_id"], json!(4));
        assert_eq!(alert.data["type"], json!("notification"));
    }

    #[test]
    fn proximity_falls_back_without_hotspot_name() {
        let named = Alert::from_proximity(&json!({"hotspot_name": "Tea Estate"})).unwrap();
        assert_eq!(named.message, "Elephant detected near Tea Estate");
        assert_eq!(named.notification_body, "Elephant near Tea Estate");

        let unnamed = Alert::from_proximity(&json!({"latitude": 1.0})).unwrap();
        assert_eq!(unnamed.title, "Proximity Alert!");
        assert_eq!(unnamed.message, "Elephant detected near a hotspot");
        assert_eq!(unnamed.notification_body, "Elephant near hotspot");
    }

    #[test]
    fn hotspot_channels_raise_no_alert() {
        assert!(Alert::from_event(Channel::HotspotCreated, &json!({})).is_none());
        assert!(Alert::from_event(Channel::ProximityAlert, &json!({})).is_some());
    }

    #[test]
    fn show_and_dismiss_without_runtime() {
        let center = AlertCenter::default();
        assert!(!center.is_visible());
        center.show(Alert::from_proximity(&json!({})).unwrap());
        assert!(center.is_visible());
        let dismissed = center.dismiss().unwrap();
        assert_eq!(dismissed.kind, AlertKind::Proximity);
        assert!(center.current().is_none());
        assert!(center.dismiss().is_none());
    }

    #[tokio::test]
    async fn sinks_receive_alert_and_stop() {
        let rec = Arc::new(Recorder::default());
        let center = AlertCenter::with_sinks(
            AlertOptions::default(),
            Some(rec.clone() as Arc<dyn Notifier>),
            Some(rec.clone() as Arc<dyn AlertCue>),
        );
        let mut events = center.subscribe();
        center.show(Alert::from_detection(&json!({"source_device": "D1", "latitude": 1.0, "longitude": 2.0})).unwrap());
        assert!(matches!(events.recv().await.unwrap(), AlertEvent::Shown(_)));
        center.dismiss();
        assert!(matches!(events.recv().await.unwrap(), AlertEvent::Dismissed(_)));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(
            *rec.notified.lock().unwrap(),
            vec![("Elephant Detected!".to_string(), "Location: 1.0000, 2.0000".to_string())]
        );
        assert_eq!(*rec.cues.lock().unwrap(), vec![MODAL_VIBRATION.to_vec()]);
        assert_eq!(*rec.stops.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn failing_notifier_does_not_block_show() {
        let center = AlertCenter::with_sinks(AlertOptions::default(), Some(Arc::new(Failing)), None);
        center.show(Alert::from_proximity(&json!({})).unwrap());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(center.is_visible());
    }

    #[tokio::test]
    async fn heads_up_auto_dismisses_only_its_own_alert() {
        let options = AlertOptions {
            style: AlertStyle::HeadsUp,
            auto_dismiss: Some(Duration::from_millis(80)),
            cue: true,
        };
        assert_eq!(options.vibration(), &HEADS_UP_VIBRATION);
        let center = AlertCenter::new(options);
        center.show(Alert::from_proximity(&json!({"hotspot_name": "A"})).unwrap());
        tokio::time::sleep(Duration::from_millis(50)).await;
        center.show(Alert::from_proximity(&json!({"hotspot_name": "B"})).unwrap());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(center.current().unwrap().hotspot_name.as_deref(), Some("B"));
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(!center.is_visible());
    }

    #[test]
    fn attach_and_detach_track_subscriptions() {
        let client = EventClient::new(ClientOptions::new("http://127.0.0.1:9"));
        let center = AlertCenter::default();
        let subs = center.attach(&client);
        assert_eq!(
            subs.channels(),
            vec![Channel::Detection, Channel::Notification, Channel::ProximityAlert]
        );

        client.dispatch(Channel::Detection, &json!({"device": "D1", "lat": 1.0, "lon": 2.0}));
        let alert = center.current().unwrap();
        assert_eq!(alert.notification_body, "Location: 1.0000, 2.0000");
        center.dismiss();

        subs.detach();
        assert_eq!(client.dispatch(Channel::Detection, &json!({"device": "D1"})), 0);
        assert!(!center.is_visible());
        assert_eq!(client.subscriber_count(Channel::HotspotCreated), 0);
    }
}
