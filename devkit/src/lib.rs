/*!
# Button DevKit - Stubs et utilitaires de test pour button-receiver

Bibliothèque facilitant les tests du receiver sans broker:
- `MockTransport` : transport en mémoire (échecs scriptés, messages simulés, disconnect bloqué)
- `ButtonMessageBuilder` : payloads conformes au firmware ESP8266
- `TestHarness` : subscriber complet câblé sur le mock, avec handler enregistreur
*/

pub mod mqtt_stub;
pub mod test_utils;

pub use mqtt_stub::{mock_transport, ButtonMessageBuilder, MockBroker, MockTransport};
pub use test_utils::{RecordingHandler, RunningHarness, TestHarness};
