//! Console commands for the headless runner
//!
//! A blocking reader thread turns stdin lines into [`ConsoleCommand`]s and
//! forwards them over a channel to the async side, where a
//! [`ConsoleHandler`] carries them out.

use std::io::{self, BufRead};

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::{SettingsStore, BASE_URL_KEY, WS_URL_KEY};
use crate::mic::MicToggle;
use crate::router::MessageRouter;
use crate::transport::{ConnectionManager, OutboundMessage};

/// One line of console input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// `/mic`: toggle the microphone
    ToggleMic,
    /// `/interrupt`
    Interrupt,
    /// `/reconnect`
    Reconnect,
    /// `/connect <ws-url> [base-url]`: switch backend and remember it
    Connect {
        ws_url: String,
        base_url: Option<String>,
    },
    /// `/history`: list histories
    ListHistories,
    /// `/history <uid>`: switch to a history
    OpenHistory(String),
    /// `/delete <uid>`
    DeleteHistory(String),
    /// `/new`: start a fresh history
    NewHistory,
    /// `/configs`: list characters
    ListConfigs,
    /// `/switch <file>`: change character
    SwitchConfig(String),
    /// `/backgrounds`
    ListBackgrounds,
    /// `/group`: ask for the roster
    GroupInfo,
    /// `/invite <uid>`
    Invite(String),
    /// `/kick <uid>`
    Kick(String),
    /// `/speak`: ask the agent to talk on its own
    Speak,
    /// `/raw <json>`: send a message as is
    Raw(String),
    /// `/quit`
    Quit,
    /// Anything not starting with `/`
    Text(String),
    /// A `/command` nobody knows, or one missing its argument
    Unknown(String),
}

impl ConsoleCommand {
    /// Parse one line; blank lines yield `None`
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let Some(rest) = line.strip_prefix('/') else {
            return Some(Self::Text(line.to_string()));
        };

        let (name, arg) = match rest.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim()),
            None => (rest, ""),
        };
        let with_arg = |make: fn(String) -> Self| {
            if arg.is_empty() {
                Self::Unknown(line.to_string())
            } else {
                make(arg.to_string())
            }
        };

        let command = match name {
            "mic" => Self::ToggleMic,
            "interrupt" => Self::Interrupt,
            "reconnect" => Self::Reconnect,
            "connect" => {
                let mut urls = arg.split_whitespace();
                match (urls.next(), urls.next()) {
                    (Some(ws_url), base_url) => Self::Connect {
                        ws_url: ws_url.to_string(),
                        base_url: base_url.map(String::from),
                    },
                    (None, _) => Self::Unknown(line.to_string()),
                }
            }
            "history" if arg.is_empty() => Self::ListHistories,
            "history" => Self::OpenHistory(arg.to_string()),
            "delete" => with_arg(Self::DeleteHistory),
            "new" => Self::NewHistory,
            "configs" => Self::ListConfigs,
            "switch" => with_arg(Self::SwitchConfig),
            "backgrounds" => Self::ListBackgrounds,
            "group" => Self::GroupInfo,
            "invite" => with_arg(Self::Invite),
            "kick" => with_arg(Self::Kick),
            "speak" => Self::Speak,
            "raw" => with_arg(Self::Raw),
            "quit" | "exit" => Self::Quit,
            _ => Self::Unknown(line.to_string()),
        };
        Some(command)
    }
}

/// Read commands from stdin on a dedicated thread
pub fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<ConsoleCommand> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        read_commands(io::stdin().lock(), &tx);
        debug!("stdin reader thread exiting");
    });
    rx
}

/// Forward parsed lines until the reader ends or the receiver is dropped
fn read_commands(reader: impl BufRead, tx: &mpsc::UnboundedSender<ConsoleCommand>) {
    for line in reader.lines() {
        match line {
            Ok(text) => {
                let Some(command) = ConsoleCommand::parse(&text) else {
                    continue;
                };
                debug!(?command, "console command");
                if tx.send(command).is_err() {
                    break;
                }
            }
            Err(e) => {
                error!(error = %e, "stdin read error");
                break;
            }
        }
    }
}

/// Carries out console commands against the running orchestrator
pub struct ConsoleHandler<'a> {
    router: &'a MessageRouter,
    toggle: &'a MicToggle,
    connection: &'a ConnectionManager,
    /// Where `/connect` remembers URLs; `None` disables persistence
    settings: Option<SettingsStore>,
}

impl<'a> ConsoleHandler<'a> {
    pub fn new(
        router: &'a MessageRouter,
        toggle: &'a MicToggle,
        connection: &'a ConnectionManager,
        settings: Option<SettingsStore>,
    ) -> Self {
        Self {
            router,
            toggle,
            connection,
            settings,
        }
    }

    /// Run one command. Returns `false` once the user asked to quit.
    pub fn handle(&mut self, command: ConsoleCommand) -> bool {
        match command {
            ConsoleCommand::Quit => {
                info!("quit requested");
                return false;
            }
            ConsoleCommand::ToggleMic => self.toggle.toggle(),
            ConsoleCommand::Interrupt => {
                self.router.interrupt(true);
            }
            ConsoleCommand::Reconnect => match self.connection.reconnect() {
                Ok(true) => info!("reconnecting"),
                Ok(false) => info!(state = %self.connection.state(), "already connected"),
                Err(e) => error!(error = %e, "reconnect failed"),
            },
            ConsoleCommand::Connect { ws_url, base_url } => self.connect(&ws_url, base_url.as_deref()),
            ConsoleCommand::ListHistories => self.send(OutboundMessage::FetchHistoryList),
            ConsoleCommand::OpenHistory(history_uid) => {
                self.send(OutboundMessage::FetchAndSetHistory { history_uid })
            }
            ConsoleCommand::DeleteHistory(history_uid) => {
                self.send(OutboundMessage::DeleteHistory { history_uid })
            }
            ConsoleCommand::NewHistory => self.send(OutboundMessage::CreateNewHistory),
            ConsoleCommand::ListConfigs => self.send(OutboundMessage::FetchConfigs),
            ConsoleCommand::SwitchConfig(file) => self.send(OutboundMessage::SwitchConfig { file }),
            ConsoleCommand::ListBackgrounds => self.send(OutboundMessage::FetchBackgrounds),
            ConsoleCommand::GroupInfo => self.send(OutboundMessage::RequestGroupInfo),
            ConsoleCommand::Invite(invitee_uid) => {
                self.send(OutboundMessage::AddClientToGroup { invitee_uid })
            }
            ConsoleCommand::Kick(target_uid) => {
                self.send(OutboundMessage::RemoveClientFromGroup { target_uid })
            }
            ConsoleCommand::Speak => self.send(OutboundMessage::AiSpeakSignal),
            ConsoleCommand::Raw(json) => self.send_raw(&json),
            ConsoleCommand::Text(text) => {
                self.router.send_user_text(&text);
            }
            ConsoleCommand::Unknown(line) => warn!(line = %line, "unknown console command"),
        }
        true
    }

    fn send(&self, message: OutboundMessage) {
        self.router.request(message);
    }

    fn send_raw(&self, json: &str) {
        let value: serde_json::Value = match serde_json::from_str(json) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "raw message is not valid json");
                return;
            }
        };
        if !value.get("type").is_some_and(serde_json::Value::is_string) {
            warn!("raw message needs a string \"type\" field");
            return;
        }
        self.router.request_raw(value);
    }

    /// Switch to a new backend and remember its URLs on success
    fn connect(&mut self, ws_url: &str, base_url: Option<&str>) {
        if let Err(e) = self.connection.connect(ws_url) {
            error!(error = %e, "cannot connect");
            return;
        }
        if let Some(base_url) = base_url {
            self.router.set_base_url(base_url);
        }

        let Some(store) = self.settings.as_mut() else {
            return;
        };
        let base_url = self.router.base_url();
        let saved = store
            .set(WS_URL_KEY, ws_url)
            .and_then(|()| store.set(BASE_URL_KEY, &base_url));
        if let Err(e) = saved {
            warn!(error = %e, "could not save connection settings");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use tokio::sync::broadcast;

    use crate::audio::AudioTaskQueue;
    use crate::mic::MicSwitch;
    use crate::router::{Collaborators, RouterSettings};
    use crate::session::ConversationSession;
    use crate::state::AiStateMachine;
    use crate::testing::{RecordingNotifier, RecordingPlayer, RecordingSink};

    struct Rig {
        router: MessageRouter,
        toggle: MicToggle,
        connection: ConnectionManager,
        sink: Arc<RecordingSink>,
    }

    fn rig() -> Rig {
        let (event_tx, _) = broadcast::channel(64);
        let state = AiStateMachine::new(event_tx.clone());
        let toggle = MicToggle::new(MicSwitch::new(), state.clone());
        let sink = Arc::new(RecordingSink::default());
        let router = MessageRouter::new(
            state,
            AudioTaskQueue::new(),
            ConversationSession::new(event_tx),
            toggle.clone(),
            Collaborators {
                sink: sink.clone(),
                player: Arc::new(RecordingPlayer::default()),
                notifier: Arc::new(RecordingNotifier::default()),
            },
            RouterSettings {
                base_url: "http://127.0.0.1:12393".to_string(),
                ..Default::default()
            },
        );
        let (inbound_tx, _) = mpsc::unbounded_channel();
        Rig {
            router,
            toggle,
            connection: ConnectionManager::new(inbound_tx),
            sink,
        }
    }

    fn run(rig: &Rig, settings: Option<SettingsStore>, lines: &[&str]) -> bool {
        let mut handler = ConsoleHandler::new(&rig.router, &rig.toggle, &rig.connection, settings);
        lines
            .iter()
            .filter_map(|line| ConsoleCommand::parse(line))
            .all(|command| handler.handle(command))
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(ConsoleCommand::parse("/mic"), Some(ConsoleCommand::ToggleMic));
        assert_eq!(ConsoleCommand::parse("  /quit "), Some(ConsoleCommand::Quit));
        assert_eq!(ConsoleCommand::parse("/history"), Some(ConsoleCommand::ListHistories));
        assert_eq!(
            ConsoleCommand::parse("/history  abc-123"),
            Some(ConsoleCommand::OpenHistory("abc-123".into()))
        );
        assert_eq!(
            ConsoleCommand::parse("/dance"),
            Some(ConsoleCommand::Unknown("/dance".into()))
        );
    }

    #[test]
    fn test_parse_backend_requests() {
        let cases = [
            ("/configs", ConsoleCommand::ListConfigs),
            ("/switch mao.yaml", ConsoleCommand::SwitchConfig("mao.yaml".into())),
            ("/backgrounds", ConsoleCommand::ListBackgrounds),
            ("/delete h-1", ConsoleCommand::DeleteHistory("h-1".into())),
            ("/group", ConsoleCommand::GroupInfo),
            ("/invite c-2", ConsoleCommand::Invite("c-2".into())),
            ("/kick c-3", ConsoleCommand::Kick("c-3".into())),
            (
                r#"/raw {"type":"ping"}"#,
                ConsoleCommand::Raw(r#"{"type":"ping"}"#.into()),
            ),
        ];
        for (line, expected) in cases {
            assert_eq!(ConsoleCommand::parse(line), Some(expected), "{line}");
        }
    }

    #[test]
    fn test_parse_connect() {
        assert_eq!(
            ConsoleCommand::parse("/connect ws://host:1/ws"),
            Some(ConsoleCommand::Connect {
                ws_url: "ws://host:1/ws".into(),
                base_url: None
            })
        );
        assert_eq!(
            ConsoleCommand::parse("/connect ws://host:1/ws  http://host:1"),
            Some(ConsoleCommand::Connect {
                ws_url: "ws://host:1/ws".into(),
                base_url: Some("http://host:1".into())
            })
        );
    }

    #[test]
    fn test_missing_argument_is_unknown() {
        for line in ["/switch", "/delete", "/invite", "/kick", "/raw", "/connect"] {
            assert_eq!(
                ConsoleCommand::parse(line),
                Some(ConsoleCommand::Unknown(line.into())),
                "{line}"
            );
        }
    }

    #[test]
    fn test_plain_text_and_blank_lines() {
        assert_eq!(ConsoleCommand::parse("   "), None);
        assert_eq!(
            ConsoleCommand::parse(" 今天天气怎么样 "),
            Some(ConsoleCommand::Text("今天天气怎么样".into()))
        );
    }

    #[test]
    fn test_reader_forwards_until_eof() {
        let input = "hello\n\n/new\n/speak\n";
        let (tx, mut rx) = mpsc::unbounded_channel();
        read_commands(io::Cursor::new(input), &tx);
        drop(tx);

        let mut seen = Vec::new();
        while let Ok(command) = rx.try_recv() {
            seen.push(command);
        }
        assert_eq!(
            seen,
            vec![
                ConsoleCommand::Text("hello".into()),
                ConsoleCommand::NewHistory,
                ConsoleCommand::Speak,
            ]
        );
    }

    #[tokio::test]
    async fn test_commands_become_requests() {
        let rig = rig();
        let keep_going = run(
            &rig,
            None,
            &[
                "/configs",
                "/switch mao.yaml",
                "/backgrounds",
                "/history",
                "/history h-1",
                "/delete h-1",
                "/new",
                "/group",
                "/invite c-2",
                "/kick c-3",
                "/speak",
                "hello there",
            ],
        );

        assert!(keep_going);
        assert_eq!(
            rig.sink.sent(),
            vec![
                OutboundMessage::FetchConfigs,
                OutboundMessage::SwitchConfig {
                    file: "mao.yaml".into()
                },
                OutboundMessage::FetchBackgrounds,
                OutboundMessage::FetchHistoryList,
                OutboundMessage::FetchAndSetHistory {
                    history_uid: "h-1".into()
                },
                OutboundMessage::DeleteHistory {
                    history_uid: "h-1".into()
                },
                OutboundMessage::CreateNewHistory,
                OutboundMessage::RequestGroupInfo,
                OutboundMessage::AddClientToGroup {
                    invitee_uid: "c-2".into()
                },
                OutboundMessage::RemoveClientFromGroup {
                    target_uid: "c-3".into()
                },
                OutboundMessage::AiSpeakSignal,
                OutboundMessage::TextInput {
                    text: "hello there".into()
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_raw_needs_a_typed_object() {
        let rig = rig();
        run(
            &rig,
            None,
            &[r#"/raw {"type":"ping","n":1}"#, "/raw {nope", r#"/raw {"n":1}"#, "/raw [1,2]"],
        );
        assert_eq!(rig.sink.raw(), vec![serde_json::json!({"type": "ping", "n": 1})]);
    }

    #[tokio::test]
    async fn test_quit_stops_handling() {
        let rig = rig();
        assert!(!run(&rig, None, &["/quit", "/new"]));
        assert!(rig.sink.sent().is_empty());
    }

    #[tokio::test]
    async fn test_mic_command_toggles() {
        let rig = rig();
        run(&rig, None, &["/mic"]);
        assert!(rig.toggle.mic().is_on());
        run(&rig, None, &["/mic"]);
        assert!(!rig.toggle.mic().is_on());
    }

    #[tokio::test]
    async fn test_connect_switches_backend_and_remembers_it() {
        let dir = tempfile::tempdir().unwrap();
        let rig = rig();
        let store = SettingsStore::open(dir.path()).unwrap();

        run(
            &rig,
            Some(store),
            &["/connect ws://127.0.0.1:9/client-ws http://127.0.0.1:9"],
        );

        assert_eq!(rig.connection.url().as_deref(), Some("ws://127.0.0.1:9/client-ws"));
        assert_eq!(rig.router.base_url(), "http://127.0.0.1:9");

        let saved = SettingsStore::open(dir.path()).unwrap();
        assert_eq!(saved.get(WS_URL_KEY), Some("ws://127.0.0.1:9/client-ws"));
        assert_eq!(saved.get(BASE_URL_KEY), Some("http://127.0.0.1:9"));
        rig.connection.shutdown();
    }

    #[tokio::test]
    async fn test_connect_to_bad_url_changes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let rig = rig();
        let store = SettingsStore::open(dir.path()).unwrap();

        run(&rig, Some(store), &["/connect http://not-a-socket http://elsewhere"]);

        assert_eq!(rig.connection.url(), None);
        assert_eq!(rig.router.base_url(), "http://127.0.0.1:12393");
        let saved = SettingsStore::open(dir.path()).unwrap();
        assert_eq!(saved.get(WS_URL_KEY), None);
    }
}
