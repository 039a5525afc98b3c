//! Fixed set of server-pushed event channels.

use std::fmt;
use std::str::FromStr;

/// A named category of server-pushed event. The wire names are what the server emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Channel {
    /// Elephant detected by a field device (`new_event`).
    Detection,
    /// Generic notification (`notification`).
    Notification,
    /// Detection close to a hotspot (`proximity_alert`).
    ProximityAlert,
    HotspotCreated,
    HotspotUpdated,
    HotspotDeleted,
}

impl Channel {
    pub const ALL: [Channel; 6] = [
        Channel::Detection,
        Channel::Notification,
        Channel::ProximityAlert,
        Channel::HotspotCreated,
        Channel::HotspotUpdated,
        Channel::HotspotDeleted,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Detection => "new_event",
            Channel::Notification => "notification",
            Channel::ProximityAlert => "proximity_alert",
            Channel::HotspotCreated => "hotspot_created",
            Channel::HotspotUpdated => "hotspot_updated",
            Channel::HotspotDeleted => "hotspot_deleted",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown channel: {0}")]
pub struct UnknownChannel(pub String);

impl FromStr for Channel {
    type Err = UnknownChannel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Channel::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| UnknownChannel(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_parse_back() {
        for c in Channel::ALL {
            assert_eq!(c.as_str().parse::<Channel>().unwrap(), c);
        }
        assert_eq!("new_event".parse::<Channel>().unwrap(), Channel::Detection);
        assert!("connect".parse::<Channel>().is_err());
    }
}
