use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// An application payload, discriminated on the wire by the `tipo` field.
///
/// Messages carrying one of the recognized tags deserialize into a typed
/// [`TaggedPayload`] variant; anything else — unknown tag or no tag at all —
/// falls through to [`Payload::Other`] with the full object preserved, so
/// free-form producers keep working.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    /// A payload with a recognized `tipo` tag.
    Tagged(TaggedPayload),
    /// A free-form JSON object with an unrecognized or missing `tipo`.
    Other(Map<String, Value>),
}

impl Payload {
    /// The wire discriminator of this payload, if one is present.
    pub fn tipo(&self) -> Option<&str> {
        match self {
            Payload::Tagged(tagged) => Some(tagged.tipo()),
            Payload::Other(map) => map.get("tipo").and_then(Value::as_str),
        }
    }
}

impl From<TaggedPayload> for Payload {
    fn from(tagged: TaggedPayload) -> Self {
        Payload::Tagged(tagged)
    }
}

/// The message categories handlers route on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tipo")]
pub enum TaggedPayload {
    /// A notification addressed to someone (`tipo = "notificacao"`).
    #[serde(rename = "notificacao")]
    Notification(Notification),

    /// An action performed on or by a user account (`tipo = "usuario"`).
    #[serde(rename = "usuario")]
    UserAction(UserAction),

    /// A domain or analytics event (`tipo = "evento"`).
    #[serde(rename = "evento")]
    Event(Event),

    /// A log record shipped through the topic (`tipo = "log"`).
    #[serde(rename = "log")]
    Log(LogRecord),
}

impl TaggedPayload {
    /// The wire value of the `tipo` tag for this variant.
    pub fn tipo(&self) -> &'static str {
        match self {
            TaggedPayload::Notification(_) => "notificacao",
            TaggedPayload::UserAction(_) => "usuario",
            TaggedPayload::Event(_) => "evento",
            TaggedPayload::Log(_) => "log",
        }
    }
}

/// Body of a `notificacao` message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub categoria: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destinatario: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub titulo: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mensagem: Option<String>,
    /// Any fields beyond the typed ones, preserved verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Body of a `usuario` message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserAction {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acao: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dados: Option<Map<String, Value>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Body of an `evento` message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acao: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub categoria: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usuario: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Body of a `log` message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mensagem: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub servico: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}
