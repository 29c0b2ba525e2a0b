//! Transport side of the daemon.
//!
//! [`router`] maps subscribed topics to engine operations and is transport
//! agnostic; [`mqtt`] is the only transport.

pub mod mqtt;
pub mod router;

pub use mqtt::{run_mqtt_listener, MqttActuatorSink};
pub use router::{CommandRouter, Inbound, Preview, RouteError, Routed, TopicRole};
