//! Conversation data the router maintains for UI collaborators
//!
//! Caption, chat messages, history list, character identity and the group
//! roster. Every setter publishes an [`Event`] so renderers can follow.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::debug;

use crate::events::Event;
use crate::transport::protocol::{BackgroundFile, ChatMessage, ConfigFile, DisplayText, HistoryInfo, ModelInfo, Role};

/// Point-in-time copy of the session
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionData {
    pub conf_name: Option<String>,
    pub conf_uid: Option<String>,
    pub self_uid: Option<String>,
    pub caption: String,
    pub configs: Vec<ConfigFile>,
    pub backgrounds: Vec<BackgroundFile>,
    pub messages: Vec<ChatMessage>,
    pub histories: Vec<HistoryInfo>,
    pub current_history_uid: Option<String>,
    pub group_members: Vec<String>,
    pub is_owner: bool,
    /// Model descriptor waiting for the renderer
    pub pending_model: Option<ModelInfo>,
    pub backend_synth_complete: bool,
    /// Next AI text starts a new bubble
    pub force_new_message: bool,
    /// Text of the response currently being spoken
    pub full_response: String,
}

/// Shared handle to the session; clones see the same data
#[derive(Clone)]
pub struct ConversationSession {
    data: Arc<Mutex<SessionData>>,
    event_tx: broadcast::Sender<Event>,
    next_id: Arc<AtomicU64>,
}

impl ConversationSession {
    pub fn new(event_tx: broadcast::Sender<Event>) -> Self {
        Self {
            data: Arc::new(Mutex::new(SessionData::default())),
            event_tx,
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn snapshot(&self) -> SessionData {
        self.lock().clone()
    }

    pub fn set_conf_name(&self, name: &str) {
        self.lock().conf_name = Some(name.to_string());
    }

    pub fn set_conf_uid(&self, uid: &str) {
        debug!(conf_uid = uid, "character config");
        self.lock().conf_uid = Some(uid.to_string());
    }

    pub fn set_self_uid(&self, uid: &str) {
        self.lock().self_uid = Some(uid.to_string());
    }

    /// Stage a model descriptor for the renderer
    pub fn stage_model(&self, model: ModelInfo) {
        let url = model.url.clone();
        self.lock().pending_model = Some(model);
        self.emit(Event::ModelStaged { url });
    }

    /// Hand the staged model to the renderer, at most once
    pub fn take_pending_model(&self) -> Option<ModelInfo> {
        self.lock().pending_model.take()
    }

    pub fn set_caption(&self, text: &str) {
        self.lock().caption = text.to_string();
        self.emit(Event::CaptionChanged { text: text.to_string() });
    }

    pub fn set_configs(&self, configs: Vec<ConfigFile>) {
        let count = configs.len();
        self.lock().configs = configs;
        self.emit(Event::ConfigsChanged { count });
    }

    pub fn set_backgrounds(&self, files: Vec<BackgroundFile>) {
        let count = files.len();
        self.lock().backgrounds = files;
        self.emit(Event::BackgroundsChanged { count });
    }

    pub fn set_messages(&self, messages: Vec<ChatMessage>) {
        let count = messages.len();
        self.lock().messages = messages;
        self.emit(Event::MessagesChanged { count });
    }

    pub fn set_current_history_uid(&self, uid: &str) {
        self.lock().current_history_uid = Some(uid.to_string());
        self.emit(Event::HistorySelected { uid: uid.to_string() });
    }

    pub fn set_histories(&self, histories: Vec<HistoryInfo>) {
        let count = histories.len();
        self.lock().histories = histories;
        self.emit(Event::HistoryListChanged { count });
    }

    /// Put a fresh, empty history summary at the top of the list
    pub fn prepend_history(&self, uid: &str) {
        let count = {
            let mut data = self.lock();
            data.histories.insert(
                0,
                HistoryInfo {
                    uid: uid.to_string(),
                    latest_message: None,
                    timestamp: Some(Utc::now().to_rfc3339()),
                },
            );
            data.histories.len()
        };
        self.emit(Event::HistoryListChanged { count });
    }

    pub fn append_human_message(&self, text: &str) {
        let message = ChatMessage {
            id: self.message_id(),
            content: text.to_string(),
            role: Role::Human,
            timestamp: Utc::now().to_rfc3339(),
            name: None,
            avatar: None,
        };
        self.lock().messages.push(message);
        self.emit(Event::MessageAppended {
            role: Role::Human,
            content: text.to_string(),
        });
    }

    /// Add spoken text to the response buffer and the AI message list.
    ///
    /// Extends the last AI message unless a new bubble was requested or the
    /// last message came from the user.
    pub fn append_ai_text(&self, text: &str, speaker: Option<&DisplayText>) {
        let id = self.message_id();
        let content = {
            let mut data = self.lock();
            data.full_response.push_str(text);

            let continue_last = !data.force_new_message
                && data.messages.last().is_some_and(|m| m.role == Role::Ai);
            data.force_new_message = false;

            match data.messages.last_mut() {
                Some(last) if continue_last => {
                    last.content.push_str(text);
                    last.content.clone()
                }
                _ => {
                    data.messages.push(ChatMessage {
                        id,
                        content: text.to_string(),
                        role: Role::Ai,
                        timestamp: Utc::now().to_rfc3339(),
                        name: speaker.and_then(|d| d.name.clone()),
                        avatar: speaker.and_then(|d| d.avatar.clone()),
                    });
                    text.to_string()
                }
            }
        };
        self.emit(Event::MessageAppended { role: Role::Ai, content });
    }

    /// Drop the in-flight response text
    pub fn clear_response(&self) {
        self.lock().full_response.clear();
    }

    pub fn full_response(&self) -> String {
        self.lock().full_response.clone()
    }

    pub fn set_force_new_message(&self, force: bool) {
        self.lock().force_new_message = force;
    }

    pub fn set_group_members(&self, members: Vec<String>) {
        let is_owner = {
            let mut data = self.lock();
            data.group_members = members;
            data.is_owner
        };
        self.emit_group(is_owner);
    }

    pub fn set_is_owner(&self, is_owner: bool) {
        self.lock().is_owner = is_owner;
        self.emit_group(is_owner);
    }

    pub fn set_backend_synth_complete(&self, complete: bool) {
        self.lock().backend_synth_complete = complete;
        if complete {
            self.emit(Event::SynthComplete);
        }
    }

    fn emit_group(&self, is_owner: bool) {
        let members = self.lock().group_members.len();
        self.emit(Event::GroupChanged { members, is_owner });
    }

    fn message_id(&self) -> String {
        let seq = self.next_id.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}", Utc::now().timestamp_millis(), seq)
    }

    fn emit(&self, event: Event) {
        let _ = self.event_tx.send(event);
    }

    fn lock(&self) -> MutexGuard<'_, SessionData> {
        match self.data.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
