// Publisher - lighting commands to the MQTT broker
//
// The graph worker converts each command's lead time to an absolute
// wall-clock instant, serializes the payload, and pushes it onto a bounded
// SPSC queue. A dedicated transport thread drains the queue and publishes
// at QoS 1; a second thread drives the MQTT connection event loop, which
// also performs automatic reconnects. The worker never blocks past the
// queue push; a full queue or a failed publish is logged and dropped.

pub mod mqtt;
pub mod wallclock;

pub use mqtt::MqttPublisher;
pub use wallclock::WallClock;

use serde::Serialize;

use crate::error::ConfigError;
use crate::lighting::LightingCommand;

/// Wire payload for one scheduled lighting event.
///
/// Field order is part of the device contract; serde preserves struct
/// order, so this struct is the single source of truth for it.
#[derive(Debug, Clone, Serialize)]
pub struct CommandPayload {
    pub unix_time: i64,
    pub microseconds: i64,
    pub confidence: f64,
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub event_id: String,
}

impl CommandPayload {
    /// Build the wire payload from a command and the wall-clock baseline.
    pub fn from_command(cmd: &LightingCommand, clock: &WallClock) -> Self {
        let (unix_time, microseconds) = clock.compose(cmd.t_pred_sec);
        Self {
            unix_time,
            microseconds,
            confidence: cmd.confidence,
            r: cmd.r,
            g: cmd.g,
            b: cmd.b,
            event_id: cmd.event_id.clone(),
        }
    }
}

/// Parse a `tcp://<host>:<port>` broker URI into host and port.
pub fn parse_broker_uri(uri: &str) -> Result<(String, u16), ConfigError> {
    let rest = uri.strip_prefix("tcp://").ok_or_else(|| {
        ConfigError::invalid(
            "publisher.broker_uri",
            format!("expected tcp://<host>:<port>, got {:?}", uri),
        )
    })?;

    let (host, port_str) = rest.rsplit_once(':').ok_or_else(|| {
        ConfigError::invalid(
            "publisher.broker_uri",
            format!("missing :<port> in {:?}", uri),
        )
    })?;

    if host.is_empty() {
        return Err(ConfigError::invalid(
            "publisher.broker_uri",
            format!("empty host in {:?}", uri),
        ));
    }

    let port: u16 = port_str.parse().map_err(|_| {
        ConfigError::invalid(
            "publisher.broker_uri",
            format!("invalid port {:?}", port_str),
        )
    })?;

    Ok((host.to_string(), port))
}
