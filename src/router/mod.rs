//! Inbound message routing
//!
//! Maps each decoded backend message onto state transitions, audio queue
//! operations and session updates. Dispatch is synchronous: anything that
//! has to wait for playback goes through the audio queue instead.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::audio::{AudioPlayer, AudioTask, AudioTaskQueue};
use crate::mic::{MicSwitch, MicToggle};
use crate::notify::{Notification, Notifier};
use crate::session::ConversationSession;
use crate::state::{AgentState, AiStateMachine};
use crate::transport::protocol::{decode_inbound, ModelInfo};
use crate::transport::{ControlCommand, InboundMessage, MessageSink, OutboundMessage};
use crate::wake::PhraseSet;

/// Caption shown after a character switch
const CHARACTER_LOADED_CAPTION: &str = "New Character Loaded";
/// Caption shown when a fresh history starts
const NEW_HISTORY_CAPTION: &str = "New Conversation";

/// External collaborators the router drives
#[derive(Clone)]
pub struct Collaborators {
    pub sink: Arc<dyn MessageSink>,
    pub player: Arc<dyn AudioPlayer>,
    pub notifier: Arc<dyn Notifier>,
}

/// Router knobs taken from the configuration
#[derive(Debug, Clone, Default)]
pub struct RouterSettings {
    /// Prefix for relative model URLs
    pub base_url: String,
    pub end_phrases: PhraseSet,
    pub auto_start_mic_on_conv_end: bool,
}

pub struct MessageRouter {
    state: AiStateMachine,
    queue: AudioTaskQueue,
    session: ConversationSession,
    toggle: MicToggle,
    sink: Arc<dyn MessageSink>,
    player: Arc<dyn AudioPlayer>,
    notifier: Arc<dyn Notifier>,
    base_url: Mutex<String>,
    end_phrases: PhraseSet,
    /// Stop token handed to audio queued since the last interrupt
    playback: Mutex<CancellationToken>,
    /// Read when the chain-end barrier runs, not when it is queued
    auto_start_mic: Arc<AtomicBool>,
}

impl MessageRouter {
    pub fn new(
        state: AiStateMachine,
        queue: AudioTaskQueue,
        session: ConversationSession,
        toggle: MicToggle,
        collaborators: Collaborators,
        settings: RouterSettings,
    ) -> Self {
        Self {
            state,
            queue,
            session,
            toggle,
            sink: collaborators.sink,
            player: collaborators.player,
            notifier: collaborators.notifier,
            base_url: Mutex::new(settings.base_url),
            end_phrases: settings.end_phrases,
            playback: Mutex::new(CancellationToken::new()),
            auto_start_mic: Arc::new(AtomicBool::new(settings.auto_start_mic_on_conv_end)),
        }
    }

    /// Decode and dispatch one raw frame. Malformed frames are logged and
    /// dropped.
    pub fn dispatch_text(&self, text: &str) {
        match decode_inbound(text) {
            Ok(message) => self.dispatch(message),
            Err(e) => warn!(error = %e, "dropping malformed message"),
        }
    }

    /// Apply one inbound message
    pub fn dispatch(&self, message: InboundMessage) {
        debug!(kind = message.kind(), "inbound message");

        match message {
            InboundMessage::Control { text } => {
                if let Some(text) = text {
                    self.handle_control(ControlCommand::parse(&text));
                }
            }

            InboundMessage::SetModelAndConf {
                conf_name,
                conf_uid,
                client_uid,
                model_info,
            } => {
                self.state.set_state(AgentState::Loading);
                if let Some(name) = conf_name {
                    self.session.set_conf_name(&name);
                }
                if let Some(uid) = conf_uid {
                    self.session.set_conf_uid(&uid);
                }
                if let Some(uid) = client_uid {
                    self.session.set_self_uid(&uid);
                }
                if let Some(model) = model_info {
                    self.session.stage_model(self.absolute_model(model));
                }
                self.state.set_state(AgentState::Idle);
            }

            InboundMessage::FullText { text } => {
                if let Some(text) = text {
                    self.session.set_caption(&text);
                }
            }

            InboundMessage::ConfigFiles { configs } => {
                if let Some(configs) = configs {
                    self.session.set_configs(configs);
                }
            }

            InboundMessage::ConfigSwitched => {
                self.state.set_state(AgentState::Idle);
                self.session.set_caption(CHARACTER_LOADED_CAPTION);
                self.notifier.notify(Notification::success("Character switched"));
                self.request(OutboundMessage::FetchHistoryList);
                self.request(OutboundMessage::CreateNewHistory);
            }

            InboundMessage::BackgroundFiles { files } => {
                if let Some(files) = files {
                    self.session.set_backgrounds(files);
                }
            }

            InboundMessage::Audio(payload) => {
                let task = AudioTask::from(payload);
                if matches!(self.state.state(), AgentState::Interrupted | AgentState::Listening) {
                    info!(sentence = task.caption().unwrap_or(""), "audio playback intercepted");
                } else {
                    self.enqueue_audio(task);
                }
            }

            InboundMessage::HistoryData { messages } => {
                if let Some(messages) = messages {
                    self.session.set_messages(messages);
                }
                self.notifier.notify(Notification::success("History loaded"));
            }

            InboundMessage::NewHistoryCreated { history_uid } => {
                self.state.set_state(AgentState::Idle);
                self.session.set_caption(NEW_HISTORY_CAPTION);
                if let Some(uid) = history_uid {
                    self.session.set_current_history_uid(&uid);
                    self.session.set_messages(Vec::new());
                    self.session.prepend_history(&uid);
                    self.notifier.notify(Notification::success("New chat history created"));
                }
            }

            InboundMessage::HistoryDeleted { success } => {
                let notification = if success {
                    Notification::success("History deleted successfully")
                } else {
                    Notification::error("Failed to delete history")
                };
                self.notifier.notify(notification);
            }

            InboundMessage::HistoryList { histories } => {
                if let Some(histories) = histories {
                    let first = histories.first().map(|h| h.uid.clone());
                    self.session.set_histories(histories);
                    if let Some(uid) = first {
                        self.session.set_current_history_uid(&uid);
                    }
                }
            }

            InboundMessage::UserInputTranscription { text } => {
                let Some(text) = text.filter(|t| !t.is_empty()) else {
                    return;
                };
                if self.end_phrases.matches(&text) && self.toggle.mic().is_on() {
                    info!("end phrase heard, stopping microphone");
                    self.toggle.toggle();
                }
                self.session.append_human_message(&text);
            }

            InboundMessage::Error { message } => {
                let message = message.unwrap_or_else(|| "Unknown server error".to_string());
                warn!(message = %message, "backend error");
                self.notifier.notify(Notification::error(message));
            }

            InboundMessage::GroupUpdate { members, is_owner } => {
                if let Some(members) = members {
                    self.session.set_group_members(members);
                }
                if let Some(is_owner) = is_owner {
                    self.session.set_is_owner(is_owner);
                }
            }

            InboundMessage::GroupOperationResult { success, message } => {
                let message = message.unwrap_or_default();
                let notification = if success {
                    Notification::success(message)
                } else {
                    Notification::error(message)
                };
                self.notifier.notify(notification);
            }

            InboundMessage::BackendSynthComplete => {
                self.session.set_backend_synth_complete(true);
            }

            InboundMessage::ConversationChainEnd => {
                if !self.queue.has_task() {
                    self.state
                        .compare_and_set(|s| s == AgentState::ThinkingSpeaking, AgentState::Idle);
                }
            }

            InboundMessage::ForceNewMessage => {
                self.session.set_force_new_message(true);
            }

            InboundMessage::InterruptSignal => {
                self.interrupt(false);
            }

            InboundMessage::Unknown => {
                debug!("ignoring unknown message");
            }
        }
    }

    /// Cut off the agent's current response.
    ///
    /// Only acts while `ThinkingSpeaking`. With `send_signal` the backend is
    /// told what had been spoken so far. Returns whether anything happened.
    pub fn interrupt(&self, send_signal: bool) -> bool {
        if !self
            .state
            .compare_and_set(|s| s == AgentState::ThinkingSpeaking, AgentState::Interrupted)
        {
            debug!(state = %self.state.state(), "nothing to interrupt");
            return false;
        }

        self.stop_playback();
        self.queue.clear_queue();
        if send_signal {
            self.request(OutboundMessage::InterruptSignal {
                text: self.session.full_response(),
            });
        }
        self.session.clear_response();
        info!(send_signal, "response interrupted");
        true
    }

    /// Send typed input, interrupting the agent if it is speaking
    pub fn send_user_text(&self, text: &str) -> bool {
        let text = text.trim();
        if text.is_empty() {
            return false;
        }
        if self.state.is_thinking_speaking() {
            self.interrupt(true);
        }
        self.session.append_human_message(text);
        self.request(OutboundMessage::TextInput {
            text: text.to_string(),
        })
    }

    /// The user is typing; holds `Waiting` until the revert timer fires
    pub fn user_typing(&self) {
        self.state.set_state(AgentState::Waiting);
    }

    pub fn set_auto_start_mic(&self, enabled: bool) {
        self.auto_start_mic.store(enabled, Ordering::Relaxed);
    }

    /// Send a request, logging instead of failing when offline
    pub fn request(&self, message: OutboundMessage) -> bool {
        match self.sink.send(&message) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, ?message, "request not sent");
                false
            }
        }
    }

    /// Pass a caller-built JSON message through unchanged
    pub fn request_raw(&self, message: serde_json::Value) -> bool {
        match self.sink.send_raw(&message) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "raw request not sent");
                false
            }
        }
    }

    pub fn base_url(&self) -> String {
        lock(&self.base_url).clone()
    }

    /// Prefix used for relative model URLs from now on
    pub fn set_base_url(&self, base_url: &str) {
        info!(base_url, "base url changed");
        *lock(&self.base_url) = base_url.to_string();
    }

    /// Cut the playing clip and every clip queued before this call
    fn stop_playback(&self) {
        let mut playback = lock(&self.playback);
        playback.cancel();
        *playback = CancellationToken::new();
    }

    fn handle_control(&self, command: ControlCommand) {
        match command {
            ControlCommand::StartMic => {
                info!("starting microphone");
                self.toggle.mic().start();
            }
            ControlCommand::StopMic => {
                info!("stopping microphone");
                self.toggle.mic().stop();
            }
            ControlCommand::ConversationChainStart => {
                self.state.set_state(AgentState::ThinkingSpeaking);
                self.queue.clear_queue();
                self.session.clear_response();
                self.session.set_caption("");
            }
            ControlCommand::ConversationChainEnd => {
                let state = self.state.clone();
                let mic: MicSwitch = self.toggle.mic().clone();
                let auto_start = Arc::clone(&self.auto_start_mic);
                self.queue.add_task(move || async move {
                    let finished =
                        state.compare_and_set(|s| s == AgentState::ThinkingSpeaking, AgentState::Idle);
                    if finished && auto_start.load(Ordering::Relaxed) {
                        mic.start();
                    }
                    Ok(())
                });
            }
            ControlCommand::Other(text) => {
                warn!(command = %text, "unknown control command");
            }
        }
    }

    fn enqueue_audio(&self, task: AudioTask) {
        let state = self.state.clone();
        let session = self.session.clone();
        let player = Arc::clone(&self.player);
        let notifier = Arc::clone(&self.notifier);
        let stop = lock(&self.playback).clone();

        self.queue.add_task(move || async move {
            if matches!(state.state(), AgentState::Interrupted | AgentState::Listening) {
                debug!("audio task skipped after interruption");
                return Ok(());
            }

            if let Some(display) = &task.display_text {
                session.set_caption(&display.text);
                session.append_ai_text(&display.text, Some(display));
            }

            let played = match task.decode_audio() {
                Ok(audio) if audio.is_empty() => return Ok(()),
                Ok(_) if stop.is_cancelled() => {
                    debug!("audio task interrupted before playback");
                    return Ok(());
                }
                Ok(audio) => player.play(&task, audio, stop).await,
                Err(e) => Err(e.into()),
            };
            if played.is_err() {
                notifier.notify(Notification::error("Audio playback failed"));
            }
            played
        });
    }

    fn absolute_model(&self, mut model: ModelInfo) -> ModelInfo {
        if !model.url.starts_with("http") {
            let base = self.base_url();
            let path = model.url.trim_start_matches('/');
            model.url = format!("{}/{path}", base.trim_end_matches('/'));
        }
        model
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
