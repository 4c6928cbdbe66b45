//! Wire protocol definitions
//!
//! Every frame is one JSON object keyed by a kebab-case `type` field.

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Messages pushed by the backend
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum InboundMessage {
    /// Out-of-band control command, see [`ControlCommand`]
    Control {
        #[serde(default)]
        text: Option<String>,
    },

    /// Character identity and model descriptor after a load or switch
    SetModelAndConf {
        #[serde(default)]
        conf_name: Option<String>,
        #[serde(default)]
        conf_uid: Option<String>,
        #[serde(default)]
        client_uid: Option<String>,
        #[serde(default)]
        model_info: Option<ModelInfo>,
    },

    /// Caption text to show right away
    FullText {
        #[serde(default)]
        text: Option<String>,
    },

    ConfigFiles {
        #[serde(default)]
        configs: Option<Vec<ConfigFile>>,
    },

    ConfigSwitched,

    BackgroundFiles {
        #[serde(default)]
        files: Option<Vec<BackgroundFile>>,
    },

    /// One sentence of synthesized speech
    Audio(AudioPayload),

    HistoryData {
        #[serde(default)]
        messages: Option<Vec<ChatMessage>>,
    },

    NewHistoryCreated {
        #[serde(default)]
        history_uid: Option<String>,
    },

    HistoryDeleted {
        #[serde(default)]
        success: bool,
    },

    HistoryList {
        #[serde(default)]
        histories: Option<Vec<HistoryInfo>>,
    },

    /// What the backend heard the user say
    UserInputTranscription {
        #[serde(default)]
        text: Option<String>,
    },

    Error {
        #[serde(default)]
        message: Option<String>,
    },

    GroupUpdate {
        #[serde(default)]
        members: Option<Vec<String>>,
        #[serde(default)]
        is_owner: Option<bool>,
    },

    GroupOperationResult {
        #[serde(default)]
        success: bool,
        #[serde(default)]
        message: Option<String>,
    },

    BackendSynthComplete,

    /// Top-level chain end, distinct from the `control` form
    ConversationChainEnd,

    ForceNewMessage,

    InterruptSignal,

    /// Any `type` this client does not understand
    #[serde(other)]
    Unknown,
}

impl InboundMessage {
    /// Wire name of the message type
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Control { .. } => "control",
            Self::SetModelAndConf { .. } => "set-model-and-conf",
            Self::FullText { .. } => "full-text",
            Self::ConfigFiles { .. } => "config-files",
            Self::ConfigSwitched => "config-switched",
            Self::BackgroundFiles { .. } => "background-files",
            Self::Audio(_) => "audio",
            Self::HistoryData { .. } => "history-data",
            Self::NewHistoryCreated { .. } => "new-history-created",
            Self::HistoryDeleted { .. } => "history-deleted",
            Self::HistoryList { .. } => "history-list",
            Self::UserInputTranscription { .. } => "user-input-transcription",
            Self::Error { .. } => "error",
            Self::GroupUpdate { .. } => "group-update",
            Self::GroupOperationResult { .. } => "group-operation-result",
            Self::BackendSynthComplete => "backend-synth-complete",
            Self::ConversationChainEnd => "conversation-chain-end",
            Self::ForceNewMessage => "force-new-message",
            Self::InterruptSignal => "interrupt-signal",
            Self::Unknown => "unknown",
        }
    }
}

/// Commands carried in the `text` field of a `control` message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    StartMic,
    StopMic,
    ConversationChainStart,
    ConversationChainEnd,
    Other(String),
}

impl ControlCommand {
    pub fn parse(text: &str) -> Self {
        match text {
            "start-mic" => Self::StartMic,
            "stop-mic" => Self::StopMic,
            "conversation-chain-start" => Self::ConversationChainStart,
            "conversation-chain-end" => Self::ConversationChainEnd,
            other => Self::Other(other.to_string()),
        }
    }
}

/// Live2D model descriptor. Only `url` is interpreted here.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ModelInfo {
    #[serde(default)]
    pub url: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BackgroundFile {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub url: String,
}

/// Fields of an `audio` message; all optional on the wire
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct AudioPayload {
    #[serde(default)]
    pub audio: Option<String>,
    #[serde(default)]
    pub volumes: Option<Vec<f32>>,
    #[serde(default)]
    pub slice_length: Option<u32>,
    #[serde(default)]
    pub display_text: Option<DisplayText>,
    #[serde(default)]
    pub actions: Option<Actions>,
    #[serde(default)]
    pub forwarded: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DisplayText {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct Actions {
    #[serde(default)]
    pub expressions: Option<Vec<Expression>>,
}

/// Expression directive: a model expression index or name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Expression {
    Index(i64),
    Name(String),
}

/// Author of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Human,
    Ai,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub content: String,
    pub role: Role,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
}

/// Summary of one stored conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryInfo {
    pub uid: String,
    #[serde(default)]
    pub latest_message: Option<LatestMessage>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatestMessage {
    pub role: Role,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub content: String,
}

/// Requests sent to the backend
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum OutboundMessage {
    FetchHistoryList,
    CreateNewHistory,
    FetchConfigs,
    SwitchConfig { file: String },
    FetchBackgrounds,
    FetchAndSetHistory { history_uid: String },
    DeleteHistory { history_uid: String },
    /// Typed user input
    TextInput { text: String },
    /// Ask the agent to speak unprompted
    AiSpeakSignal,
    RequestGroupInfo,
    AddClientToGroup { invitee_uid: String },
    RemoveClientFromGroup { target_uid: String },
    /// The user cut the agent off; `text` is what had been said so far
    InterruptSignal { text: String },
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type", default)]
    kind: Option<String>,
}

/// Decode one inbound frame.
///
/// Unknown `type` values decode to [`InboundMessage::Unknown`] and are logged
/// here with the offending type name.
pub fn decode_inbound(text: &str) -> Result<InboundMessage, serde_json::Error> {
    let message: InboundMessage = serde_json::from_str(text)?;
    if message == InboundMessage::Unknown {
        let kind = serde_json::from_str::<Envelope>(text)
            .ok()
            .and_then(|e| e.kind)
            .unwrap_or_default();
        warn!(kind = %kind, "unknown message type");
    }
    Ok(message)
}
