//! Events module for UI observers
//!
//! The state machine, the microphone switch and the conversation session
//! publish these on one broadcast channel so renderers can follow along
//! without polling.

use serde::{Deserialize, Serialize};

use crate::state::AgentState;
use crate::transport::protocol::Role;

/// Events emitted while the orchestrator runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Agent activity state changed
    StateChanged {
        from: AgentState,
        to: AgentState,
    },

    /// Microphone switched on or off
    MicChanged { on: bool },

    /// Live caption replaced
    CaptionChanged { text: String },

    /// A model descriptor is staged for the renderer to pick up
    ModelStaged { url: String },

    /// The active history changed
    HistorySelected { uid: String },

    /// The history list was replaced or extended
    HistoryListChanged { count: usize },

    /// The message list was replaced or cleared
    MessagesChanged { count: usize },

    /// A message was appended (or the last AI message grew)
    MessageAppended { role: Role, content: String },

    /// Group roster or ownership changed
    GroupChanged { members: usize, is_owner: bool },

    /// Available character configs replaced
    ConfigsChanged { count: usize },

    /// Available backgrounds replaced
    BackgroundsChanged { count: usize },

    /// Backend finished synthesizing the current response
    SynthComplete,
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Event::StateChanged { from, to } => write!(f, "STATE_CHANGED ({} -> {})", from, to),
            Event::MicChanged { on } => write!(f, "MIC_CHANGED ({})", if *on { "on" } else { "off" }),
            Event::CaptionChanged { .. } => write!(f, "CAPTION_CHANGED"),
            Event::ModelStaged { url } => write!(f, "MODEL_STAGED ({})", url),
            Event::HistorySelected { uid } => write!(f, "HISTORY_SELECTED ({})", uid),
            Event::HistoryListChanged { count } => write!(f, "HISTORY_LIST_CHANGED ({})", count),
            Event::MessagesChanged { count } => write!(f, "MESSAGES_CHANGED ({})", count),
            Event::MessageAppended { role, .. } => write!(f, "MESSAGE_APPENDED ({:?})", role),
            Event::GroupChanged { members, is_owner } => {
                write!(f, "GROUP_CHANGED ({} members, owner={})", members, is_owner)
            }
            Event::ConfigsChanged { count } => write!(f, "CONFIGS_CHANGED ({})", count),
            Event::BackgroundsChanged { count } => write!(f, "BACKGROUNDS_CHANGED ({})", count),
            Event::SynthComplete => write!(f, "SYNTH_COMPLETE"),
        }
    }
}
