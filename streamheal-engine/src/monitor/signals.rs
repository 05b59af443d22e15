//! External signals and their routing
//!
//! Collaborators outside the engine (network interception, console capture)
//! report what they see as `Signal`s. The router maps each kind to a handler
//! and sends everything unregistered to a fallback that logs a truncated
//! message.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    AdDetected,
    TriggerDetected,
    DecoderError,
    AvSyncIssue,
    #[serde(other)]
    Other,
}

impl SignalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::AdDetected => "ad_detected",
            SignalKind::TriggerDetected => "trigger_detected",
            SignalKind::DecoderError => "decoder_error",
            SignalKind::AvSyncIssue => "av_sync_issue",
            SignalKind::Other => "other",
        }
    }
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    #[serde(rename = "type")]
    pub kind: SignalKind,
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

fn default_level() -> String {
    "info".to_string()
}

impl Signal {
    pub fn new(kind: SignalKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            level: default_level(),
            message: message.into(),
            url: None,
        }
    }
}

/// What the engine should do after a signal was handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    AdDetected,
    TriggerDetected,
    DecoderRecovery,
    AvSyncRecovery,
    Logged,
}

pub type SignalHandler = fn(&Signal) -> SignalAction;

/// Cut `message` to at most `max_chars` characters, marking the cut
pub fn truncate_message(message: &str, max_chars: usize) -> String {
    match message.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => format!("{}...", &message[..byte_idx]),
        None => message.to_string(),
    }
}

fn handle_ad_detected(signal: &Signal) -> SignalAction {
    info!(url = signal.url.as_deref().unwrap_or(""), "Ad detected");
    SignalAction::AdDetected
}

fn handle_trigger_detected(signal: &Signal) -> SignalAction {
    debug!(url = signal.url.as_deref().unwrap_or(""), "Ad trigger detected");
    SignalAction::TriggerDetected
}

fn handle_decoder_error(signal: &Signal) -> SignalAction {
    warn!(level = %signal.level, "Decoder error reported");
    SignalAction::DecoderRecovery
}

fn handle_av_sync_issue(_signal: &Signal) -> SignalAction {
    info!("A/V sync issue reported");
    SignalAction::AvSyncRecovery
}

pub struct SignalRouter {
    handlers: HashMap<SignalKind, SignalHandler>,
    truncate_len: usize,
}

impl SignalRouter {
    /// Router with the built-in handlers registered
    pub fn new(truncate_len: usize) -> Self {
        let mut router = Self::empty(truncate_len);
        router.register(SignalKind::AdDetected, handle_ad_detected);
        router.register(SignalKind::TriggerDetected, handle_trigger_detected);
        router.register(SignalKind::DecoderError, handle_decoder_error);
        router.register(SignalKind::AvSyncIssue, handle_av_sync_issue);
        router
    }

    /// Router where every signal goes to the fallback
    pub fn empty(truncate_len: usize) -> Self {
        Self {
            handlers: HashMap::new(),
            truncate_len,
        }
    }

    /// Replace the handler for `kind`
    pub fn register(&mut self, kind: SignalKind, handler: SignalHandler) {
        self.handlers.insert(kind, handler);
    }

    pub fn has_handler(&self, kind: SignalKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    pub fn route(&self, signal: &Signal) -> SignalAction {
        match self.handlers.get(&signal.kind) {
            Some(handler) => handler(signal),
            None => self.fallback(signal),
        }
    }

    fn fallback(&self, signal: &Signal) -> SignalAction {
        let message = truncate_message(&signal.message, self.truncate_len);
        debug!(kind = %signal.kind, level = %signal.level, message = %message, "Unhandled signal");
        SignalAction::Logged
    }
}

impl Default for SignalRouter {
    fn default() -> Self {
        Self::new(200)
    }
}
