/*!
# Button Receiver - Subscriber MQTT pour boutons ESP8266

Écoute `esp8266/button`, décode le JSON `{device, action, timestamp, status}`
et dispatche sur l'action :
- `config`     : configuration immuable (défauts, YAML, variables MQTT_*)
- `transport`  : trait `Transport` + implémentation rumqttc
- `event`      : `ButtonEvent` et son décodage
- `dispatch`   : table action → handler, avec branche "unknown action"
- `handler`    : callback par message (décodage + dispatch)
- `subscriber` : cycle de vie connexion / souscription / shutdown
- `signals`    : SIGINT / SIGTERM
*/

pub mod config;
pub mod dispatch;
pub mod event;
pub mod handler;
pub mod signals;
pub mod subscriber;
pub mod transport;

pub use config::{ConfigError, ReceiverConfig};
pub use dispatch::{AcknowledgePress, ActionHandler, DispatchOutcome, Dispatcher};
pub use event::{ButtonEvent, DecodeError, BUTTON_PRESSED};
pub use handler::{MessageOutcome, MessageRouter};
pub use subscriber::{
    ConnectionState, DisconnectReason, ReceiverError, ShutdownOutcome, Subscriber,
    SubscriberHooks,
};
pub use transport::{InboundMessage, MqttTransport, Transport, TransportError};

use tracing_subscriber::EnvFilter;

/// Logs fmt filtrés par RUST_LOG (défaut : button_receiver=info)
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("button_receiver=info,button_press=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
