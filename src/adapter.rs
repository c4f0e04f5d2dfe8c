//! Inbound chat request → upstream chat-completions payload.
//!
//! The browser client speaks a loose dialect: older builds send a single
//! `message` string plus a `model` name, newer ones send a full `messages`
//! history and an explicit `enable_thinking` flag. [`adapt`] folds both into
//! one [`UpstreamPayload`] without touching the network.

use serde::{Deserialize, Serialize};

/// Model names that older clients used to ask for extended reasoning.
///
/// Those clients never send `enable_thinking`, so a request naming one of
/// these models gets reasoning switched on by default.
const LEGACY_REASONING_MODELS: &[&str] = &["deepseek-r1"];

/// One role/content turn of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Turn {
    pub role: String,
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
}

/// Body of `POST /api/chat`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatRequest {
    /// Single free-text message (legacy clients).
    #[serde(default)]
    pub message: Option<String>,

    /// Ordered conversation history. Wins over `message` when non-empty.
    #[serde(default, alias = "turns", rename = "messages")]
    pub turns: Option<Vec<Turn>>,

    /// Model the client asked for. Never forwarded; see [`resolve_reasoning`].
    #[serde(default, rename = "model", alias = "modelHint", alias = "model_hint")]
    pub model_hint: Option<String>,

    #[serde(
        default,
        rename = "enable_thinking",
        alias = "enableReasoning",
        alias = "enable_reasoning"
    )]
    pub enable_reasoning: Option<bool>,
}

/// JSON body sent to the upstream chat-completions endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpstreamPayload {
    pub model: String,
    pub messages: Vec<Turn>,
    pub stream: bool,
    #[serde(rename = "enable_thinking")]
    pub enable_reasoning: bool,
}

/// What the adapter decided, for the per-request log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub requested_model: Option<String>,
    pub resolved_model: String,
    pub enable_reasoning: bool,
    pub reasoning_explicit: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("message must not be empty")]
    EmptyMessage,
}

/// Build the upstream payload for `req`.
///
/// `backend_model` is the configured upstream model; it is used for every
/// request regardless of the client's model hint.
///
/// # Errors
/// [`ValidationError::EmptyMessage`] when neither a non-empty `messages` list
/// nor a non-empty `message` is present.
pub fn adapt(
    req: ChatRequest,
    backend_model: &str,
) -> Result<(UpstreamPayload, Resolution), ValidationError> {
    let messages = match (req.turns, req.message) {
        (Some(turns), _) if !turns.is_empty() => turns,
        (_, Some(message)) if !message.is_empty() => vec![Turn::user(message)],
        _ => return Err(ValidationError::EmptyMessage),
    };

    let enable_reasoning = resolve_reasoning(req.enable_reasoning, req.model_hint.as_deref());

    let payload = UpstreamPayload {
        model: backend_model.to_owned(),
        messages,
        stream: true,
        enable_reasoning,
    };
    let resolution = Resolution {
        requested_model: req.model_hint,
        resolved_model: payload.model.clone(),
        enable_reasoning,
        reasoning_explicit: req.enable_reasoning.is_some(),
    };

    Ok((payload, resolution))
}

/// An explicit flag always wins; otherwise only a legacy reasoning model name
/// turns reasoning on.
pub fn resolve_reasoning(explicit: Option<bool>, model_hint: Option<&str>) -> bool {
    explicit.unwrap_or_else(|| {
        model_hint.is_some_and(|hint| LEGACY_REASONING_MODELS.contains(&hint))
    })
}
