//! REST API: bearer-authenticated JSON calls against the Airavata server.

mod client;
mod endpoints;
mod models;

pub use client::{ApiClient, ApiError};
pub use endpoints::DEFAULT_NEARBY_RADIUS_KM;
pub use models::{AuthResponse, DetectionEvent, Device, Hotspot, HotspotQuery, Id, Notification, User};
