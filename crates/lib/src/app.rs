//! Application context: the one place that owns config, credentials, the REST client, the event
//! client and the alert center. Created by the application root and passed by reference.

use crate::alerts::{AlertCenter, AlertSubscriptions};
use crate::api::ApiClient;
use crate::config::{self, Config};
use crate::credentials::CredentialStore;
use crate::realtime::{ClientOptions, EventClient};
use anyhow::{Context, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;

pub struct AppContext {
    config: Arc<Config>,
    config_path: PathBuf,
    credentials: Arc<CredentialStore>,
    api: ApiClient,
    events: Arc<EventClient>,
    alerts: AlertCenter,
    realtime: Arc<Mutex<Realtime>>,
}

/// Alert wiring owned while real-time alerts run.
#[derive(Default)]
struct Realtime {
    attached: Option<AlertSubscriptions>,
    watcher: Option<JoinHandle<()>>,
}

fn lock(m: &Mutex<Realtime>) -> MutexGuard<'_, Realtime> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl AppContext {
    /// Build the context from loaded config: credentials from disk, clients for the resolved
    /// base URL.
    pub async fn load(config: Config, config_path: PathBuf, alerts: AlertCenter) -> Result<Self> {
        let cred_path = config::resolve_credentials_path(&config, &config_path);
        log::debug!("credentials at {}", cred_path.display());
        let credentials = Arc::new(CredentialStore::load(&cred_path).await);
        let api = ApiClient::from_config(&config, credentials.clone()).context("building http client")?;
        let events = Arc::new(EventClient::new(ClientOptions::from_config(&config)));
        Ok(Self::from_parts(config, config_path, credentials, api, events, alerts))
    }

    /// Assemble from already-built parts (tests, embedding).
    pub fn from_parts(
        config: Config,
        config_path: PathBuf,
        credentials: Arc<CredentialStore>,
        api: ApiClient,
        events: Arc<EventClient>,
        alerts: AlertCenter,
    ) -> Self {
        Self {
            config: Arc::new(config),
            config_path,
            credentials,
            api,
            events,
            alerts,
            realtime: Arc::default(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.credentials
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn events(&self) -> &Arc<EventClient> {
        &self.events
    }

    pub fn alerts(&self) -> &AlertCenter {
        &self.alerts
    }

    /// Sign in and store the credential without touching the event socket. Returns the user
    /// object.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Value> {
        let res = self.api.login(email, password).await.context("login")?;
        let user = self.store_session(res.into_session().context("login")?).await?;
        log::info!("logged in as {}", email);
        Ok(user)
    }

    /// Create an account (role "user") and store its credential without touching the event
    /// socket.
    pub async fn sign_up(&self, name: &str, email: &str, password: &str) -> Result<Value> {
        let res = self
            .api
            .register(name, email, password, None)
            .await
            .context("register")?;
        let user = self.store_session(res.into_session().context("register")?).await?;
        log::info!("registered {}", email);
        Ok(user)
    }

    /// Sign in, store the credential and start real-time alerts. Returns the user object.
    pub async fn login(&self, email: &str, password: &str) -> Result<Value> {
        let user = self.sign_in(email, password).await?;
        self.start_realtime().await;
        Ok(user)
    }

    /// Create an account, sign in with it and start real-time alerts.
    pub async fn register(&self, name: &str, email: &str, password: &str) -> Result<Value> {
        let user = self.sign_up(name, email, password).await?;
        self.start_realtime().await;
        Ok(user)
    }

    async fn store_session(&self, (token, user): (String, Value)) -> Result<Value> {
        self.credentials
            .set(token, user.clone())
            .await
            .context("storing credentials")?;
        Ok(user)
    }

    /// Connect the event socket with the stored token and attach alert presentation.
    /// Returns false (and does nothing) when signed out.
    ///
    /// Real-time alerts stop on their own once the credential is cleared, e.g. when the REST
    /// client gives up on a rejected token.
    pub async fn start_realtime(&self) -> bool {
        let Some(token) = self.credentials.token().await else {
            log::debug!("not signed in, real-time alerts not started");
            return false;
        };
        self.events.connect(token);
        {
            let mut realtime = lock(&self.realtime);
            if realtime.attached.is_none() {
                realtime.attached = Some(self.alerts.attach(&self.events));
            }
            if let Some(previous) = realtime.watcher.replace(self.watch_credentials()) {
                previous.abort();
            }
        }
        if let Some(push_token) = self.config.alerts.push_token.as_deref() {
            let device_type = self.config.alerts.device_type.as_str();
            if let Err(e) = self.api.register_push_token(push_token, Some(device_type)).await {
                log::warn!("error registering push token: {}", e);
            }
        }
        true
    }

    fn watch_credentials(&self) -> JoinHandle<()> {
        let mut authenticated = self.credentials.watch();
        let events = self.events.clone();
        let alerts = self.alerts.clone();
        let realtime = self.realtime.clone();
        tokio::spawn(async move {
            while *authenticated.borrow_and_update() {
                if authenticated.changed().await.is_err() {
                    return;
                }
            }
            log::warn!("credentials cleared, stopping real-time alerts");
            let attached = lock(&realtime).attached.take();
            teardown(attached, &alerts, &events);
        })
    }

    /// Detach alerts and close the socket. Credentials are kept.
    pub fn stop_realtime(&self) {
        let attached = {
            let mut realtime = lock(&self.realtime);
            if let Some(watcher) = realtime.watcher.take() {
                watcher.abort();
            }
            realtime.attached.take()
        };
        teardown(attached, &self.alerts, &self.events);
    }

    /// Best-effort server logout, then forget the credential and stop real-time alerts.
    pub async fn logout(&self) {
        if self.credentials.token().await.is_some() {
            if let Err(e) = self.api.logout().await {
                log::warn!("server logout failed: {}", e);
            }
        }
        self.credentials.clear().await;
        self.stop_realtime();
        log::info!("logged out");
    }
}

fn teardown(attached: Option<AlertSubscriptions>, alerts: &AlertCenter, events: &EventClient) {
    if let Some(subs) = attached {
        subs.detach();
    }
    alerts.dismiss();
    events.disconnect();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::{Channel, ConnectionState};
    use serde_json::json;

    fn context() -> AppContext {
        let credentials = Arc::new(CredentialStore::in_memory());
        let api = ApiClient::new("http://127.0.0.1:9", credentials.clone());
        let events = Arc::new(EventClient::new(ClientOptions::new("http://127.0.0.1:9")));
        AppContext::from_parts(
            Config::default(),
            PathBuf::from("config.json"),
            credentials,
            api,
            events,
            AlertCenter::default(),
        )
    }

    #[tokio::test]
    async fn start_realtime_needs_a_token() {
        let ctx = context();
        assert!(!ctx.start_realtime().await);
        assert_eq!(ctx.events().subscriber_count(Channel::Detection), 0);
        assert_eq!(ctx.events().state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn start_realtime_attaches_alerts_once() {
        let ctx = context();
        ctx.credentials().set("tok".to_string(), json!({"id": 1})).await.unwrap();
        assert!(ctx.start_realtime().await);
        assert!(ctx.start_realtime().await);
        assert_eq!(ctx.events().subscriber_count(Channel::Detection), 1);
        assert_eq!(ctx.events().subscriber_count(Channel::ProximityAlert), 1);

        ctx.events().dispatch(Channel::ProximityAlert, &json!({"hotspot_name": "Gate 3"}));
        assert!(ctx.alerts().is_visible());

        ctx.logout().await;
        assert!(!ctx.credentials().is_authenticated().await);
        assert!(!ctx.alerts().is_visible());
        assert_eq!(ctx.events().subscriber_count(Channel::Detection), 0);
        assert_eq!(ctx.events().state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn cleared_credentials_stop_realtime() {
        let ctx = context();
        ctx.credentials().set("tok".to_string(), json!({"id": 1})).await.unwrap();
        assert!(ctx.start_realtime().await);
        ctx.events().dispatch(Channel::ProximityAlert, &json!({"hotspot_name": "Gate 3"}));
        assert!(ctx.alerts().is_visible());

        // What the REST client does once a token is rejected for good.
        ctx.credentials().clear().await;
        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while ctx.events().subscriber_count(Channel::Detection) != 0 {
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("alerts detached");
        assert!(!ctx.alerts().is_visible());
        assert_eq!(ctx.events().state(), ConnectionState::Disconnected);

        // Signing in again restarts cleanly.
        ctx.credentials().set("tok2".to_string(), json!({"id": 1})).await.unwrap();
        assert!(ctx.start_realtime().await);
        assert_eq!(ctx.events().subscriber_count(Channel::Detection), 1);
        ctx.stop_realtime();
    }

    #[tokio::test]
    async fn stopped_realtime_ignores_later_sign_out() {
        let ctx = context();
        ctx.credentials().set("tok".to_string(), json!({"id": 1})).await.unwrap();
        assert!(ctx.start_realtime().await);
        ctx.stop_realtime();
        assert_eq!(ctx.events().subscriber_count(Channel::Detection), 0);
        ctx.credentials().clear().await;
        assert_eq!(ctx.events().state(), ConnectionState::Disconnected);
    }
}
