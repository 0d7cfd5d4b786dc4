/**
 * DISPATCH - Table action → effet pour les événements bouton
 *
 * RÔLE :
 * Associe chaque `ButtonEvent.action` à un `ActionHandler` enregistré.
 * Toute chaîne a un effet défini : handler connu, ou branche "unknown action".
 *
 * FONCTIONNEMENT :
 * - Dispatcher = table HashMap<action, handler> + bras par défaut explicite
 * - ActionHandler = logique métier aval (DB, notifications...), doit rendre la main vite
 * - Les erreurs et panics d'un handler sont rapportés ici, jamais propagés au transport
 */

use crate::event::{ButtonEvent, BUTTON_PRESSED};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Logique métier invoquée pour une action connue.
///
/// Runs inside the transport callback: implementations must return promptly.
pub trait ActionHandler: Send + Sync {
    fn handle(&self, event: &ButtonEvent) -> anyhow::Result<()>;
}

impl<F> ActionHandler for F
where
    F: Fn(&ButtonEvent) -> anyhow::Result<()> + Send + Sync,
{
    fn handle(&self, event: &ButtonEvent) -> anyhow::Result<()> {
        self(event)
    }
}

/// Accusé de réception par défaut pour `button_pressed`
#[derive(Debug, Default, Clone, Copy)]
pub struct AcknowledgePress;

impl ActionHandler for AcknowledgePress {
    fn handle(&self, event: &ButtonEvent) -> anyhow::Result<()> {
        info!(device = %event.device, "🎉 Button was pressed! Executing custom logic...");
        Ok(())
    }
}

/// Résultat observable d'un dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Action connue, handler terminé sans erreur
    Acknowledged { action: String },
    /// Action absente de la table
    UnknownAction { action: String },
    /// Action connue mais le handler a échoué (erreur ou panic)
    HandlerFailed { action: String, error: String },
}

#[derive(Clone, Default)]
pub struct Dispatcher {
    handlers: HashMap<String, Arc<dyn ActionHandler>>,
}

impl Dispatcher {
    /// Table vide : toute action tombe dans la branche inconnue
    pub fn new() -> Self {
        Self::default()
    }

    /// Vocabulaire par défaut du firmware ESP8266
    pub fn with_defaults() -> Self {
        Self::new().register(BUTTON_PRESSED, AcknowledgePress)
    }

    /// Enregistre (ou remplace) le handler d'une action
    pub fn register<S, H>(mut self, action: S, handler: H) -> Self
    where
        S: Into<String>,
        H: ActionHandler + 'static,
    {
        self.handlers.insert(action.into(), Arc::new(handler));
        self
    }

    pub fn is_known(&self, action: &str) -> bool {
        self.handlers.contains_key(action)
    }

    pub fn known_actions(&self) -> Vec<&str> {
        let mut actions: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        actions.sort_unstable();
        actions
    }

    pub fn dispatch(&self, event: &ButtonEvent) -> DispatchOutcome {
        info!(device = %event.device, "🔘 Processing button press");

        let Some(handler) = self.handlers.get(event.action.as_str()) else {
            warn!(device = %event.device, "⚠️ Unknown action: {}", event.action);
            return DispatchOutcome::UnknownAction { action: event.action.clone() };
        };

        match catch_unwind(AssertUnwindSafe(|| handler.handle(event))) {
            Ok(Ok(())) => DispatchOutcome::Acknowledged { action: event.action.clone() },
            Ok(Err(e)) => {
                error!(action = %event.action, "❌ Action handler failed: {e:#}");
                DispatchOutcome::HandlerFailed {
                    action: event.action.clone(),
                    error: format!("{e:#}"),
                }
            }
            Err(_) => {
                error!(action = %event.action, "❌ Action handler panicked");
                DispatchOutcome::HandlerFailed {
                    action: event.action.clone(),
                    error: "handler panicked".to_string(),
                }
            }
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("actions", &self.known_actions())
            .finish()
    }
}
