//! Static channel → destination routing.
//!
//! The routing spec is a single string of `channel|target` entries separated
//! by `;`. Targets starting with `http` are webhooks; every other target is
//! handed to the one non-HTTP sink family the deployment runs.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ConfigError;

const ENTRY_SEPARATOR: char = ';';
const FIELD_SEPARATOR: char = '|';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationKind {
    Topic,
    Webhook,
    Stream,
}

impl fmt::Display for DestinationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Topic => write!(f, "topic"),
            Self::Webhook => write!(f, "webhook"),
            Self::Stream => write!(f, "stream"),
        }
    }
}

/// The non-HTTP sink family active in a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkFamily {
    Topic,
    Stream,
}

impl SinkFamily {
    pub fn kind(self) -> DestinationKind {
        match self {
            Self::Topic => DestinationKind::Topic,
            Self::Stream => DestinationKind::Stream,
        }
    }
}

impl fmt::Display for SinkFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.kind().fmt(f)
    }
}

impl FromStr for SinkFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "topic" | "sns" => Ok(Self::Topic),
            "stream" | "kinesis" => Ok(Self::Stream),
            other => Err(format!(
                "unknown sink family '{}': must be 'topic' or 'stream'",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationRef {
    pub kind: DestinationKind,
    pub target: String,
}

impl DestinationRef {
    /// A target with an `http` prefix (which covers `https`) is a webhook.
    pub fn classify(target: impl Into<String>, family: SinkFamily) -> Self {
        let target = target.into();
        let kind = if target.starts_with("http") {
            DestinationKind::Webhook
        } else {
            family.kind()
        };
        Self { kind, target }
    }
}

impl fmt::Display for DestinationRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.target)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub channel: String,
    pub destination: DestinationRef,
}

/// Immutable after construction; share it behind an `Arc`.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: HashMap<String, Route>,
}

impl RouteTable {
    pub fn parse(spec: &str, family: SinkFamily) -> Result<Self, ConfigError> {
        if spec.trim().is_empty() {
            return Err(ConfigError::MissingRoutes);
        }

        let mut routes = HashMap::new();
        let mut dropped = 0usize;

        for entry in spec.split(ENTRY_SEPARATOR) {
            let fields: Vec<&str> = entry.split(FIELD_SEPARATOR).collect();
            match fields.as_slice() {
                [channel, target] => {
                    let route = Route {
                        channel: (*channel).to_string(),
                        destination: DestinationRef::classify(*target, family),
                    };
                    routes.insert(route.channel.clone(), route);
                }
                _ => {
                    // A trailing `;` leaves an empty entry; not worth a warning.
                    if !entry.is_empty() {
                        warn!(entry, fields = fields.len(), "Dropping malformed route entry");
                    }
                    dropped += 1;
                }
            }
        }

        if routes.is_empty() {
            return Err(ConfigError::NoValidRoutes { dropped });
        }

        Ok(Self { routes })
    }

    pub fn lookup(&self, channel: &str) -> Option<&DestinationRef> {
        self.routes.get(channel).map(|r| &r.destination)
    }

    /// Channels to subscribe to, sorted for stable logs.
    pub fn channels(&self) -> Vec<String> {
        let mut channels: Vec<String> = self.routes.keys().cloned().collect();
        channels.sort();
        channels
    }

    pub fn routes(&self) -> Vec<&Route> {
        let mut routes: Vec<&Route> = self.routes.values().collect();
        routes.sort_by(|a, b| a.channel.cmp(&b.channel));
        routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Whether any route resolves to the given destination family.
    pub fn uses(&self, kind: DestinationKind) -> bool {
        self.routes.values().any(|r| r.destination.kind == kind)
    }
}
