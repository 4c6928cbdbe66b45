//! companion-orchestrator: headless runner
//!
//! Connects to the backend, routes its messages one at a time, listens for
//! the wake phrase while the mic is off and reads commands from stdin.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use companion_orchestrator::audio::{AudioTaskQueue, CommandCapture, HeadlessPlayer};
use companion_orchestrator::config::{Config, SettingsStore, BASE_URL_KEY, WS_URL_KEY};
use companion_orchestrator::console::{spawn_stdin_reader, ConsoleHandler};
use companion_orchestrator::events::Event;
use companion_orchestrator::lifecycle::ShutdownSignal;
use companion_orchestrator::mic::{MicSwitch, MicToggle};
use companion_orchestrator::notify::{LogNotifier, Notifier};
use companion_orchestrator::proactive::ProactiveSpeaker;
use companion_orchestrator::router::{Collaborators, MessageRouter, RouterSettings};
use companion_orchestrator::session::ConversationSession;
use companion_orchestrator::state::AiStateMachine;
use companion_orchestrator::stt::HttpTranscriber;
use companion_orchestrator::transport::{ConnectionManager, ConnectionState, MessageSink};
use companion_orchestrator::wake::{PhraseSet, PollTranscriber, WakeWordDetector};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "companion-orchestrator starting");

    let config = Config::load()?;
    config.ensure_dirs()?;
    info!(ws_url = %config.ws_url, data_dir = ?config.data_dir, "configuration loaded");

    let shutdown = ShutdownSignal::new();
    let cancel = CancellationToken::new();

    // Everything observable goes out on one broadcast channel
    let (event_tx, _event_rx) = broadcast::channel::<Event>(256);

    let state = AiStateMachine::new(event_tx.clone());
    let session = ConversationSession::new(event_tx.clone());
    let queue = AudioTaskQueue::new();
    let mic = MicSwitch::with_events(event_tx.clone());
    let toggle = MicToggle::new(mic.clone(), state.clone());
    let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);

    let (inbound_tx, mut inbound_rx) = mpsc::unbounded_channel::<String>();
    let connection = ConnectionManager::new(inbound_tx);
    let sink: Arc<dyn MessageSink> = Arc::new(connection.clone());

    let router = MessageRouter::new(
        state.clone(),
        queue.clone(),
        session.clone(),
        toggle.clone(),
        Collaborators {
            sink: sink.clone(),
            player: Arc::new(HeadlessPlayer::new()),
            notifier: notifier.clone(),
        },
        RouterSettings {
            base_url: config.base_url.clone(),
            end_phrases: PhraseSet::new(&config.end_phrases),
            auto_start_mic_on_conv_end: config.auto_start_mic_on_conv_end,
        },
    );

    let mut tasks = Vec::new();

    if config.wake.enabled {
        let mut detector = WakeWordDetector::new(config.wake.settings(), toggle.clone(), notifier.clone());
        match &config.wake.capture_command {
            Some(command) => {
                let capture = CommandCapture::new(command.as_str(), config.wake.capture_extension.clone());
                let transcriber = HttpTranscriber::new(
                    &config.stt.endpoint,
                    config.stt.api_key.clone(),
                    &config.stt.model,
                    &config.stt.language,
                );
                detector = detector.with_poller(PollTranscriber::new(
                    Arc::new(capture),
                    Arc::new(transcriber),
                    config.wake.poll_timing(),
                ));
            }
            None => warn!("no wake.capture_command configured, poll-transcribe unavailable"),
        }
        let (handle, _status) = detector.spawn(cancel.child_token());
        tasks.push(handle);
    }

    if config.agent.allow_proactive_speak {
        let speaker = ProactiveSpeaker::new(
            state.clone(),
            sink.clone(),
            Duration::from_secs(config.agent.idle_seconds_to_speak),
        );
        tasks.push(speaker.spawn(event_tx.subscribe(), cancel.child_token()));
    }

    let mut settings = match config.settings_store() {
        Ok(store) => Some(store),
        Err(e) => {
            warn!(error = %e, "settings store unavailable, urls will not be saved");
            None
        }
    };
    match connection.connect(&config.ws_url) {
        Ok(()) => {
            if let Some(store) = settings.as_mut() {
                remember_urls(store, &config);
            }
        }
        Err(e) => error!(error = %e, "cannot connect, use /connect with a working url"),
    }
    let mut console = ConsoleHandler::new(&router, &toggle, &connection, settings);

    let mut state_rx = connection.subscribe_state();
    let mut event_rx = event_tx.subscribe();
    let mut console_rx = spawn_stdin_reader();
    let mut console_open = true;
    let shutdown_wait = shutdown.wait();
    tokio::pin!(shutdown_wait);

    info!("orchestrator initialized, entering main loop");

    // Main event loop
    loop {
        tokio::select! {
            Some(frame) = inbound_rx.recv() => router.dispatch_text(&frame),

            changed = state_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *state_rx.borrow_and_update();
                info!(state = %current, "connection state");
                if current == ConnectionState::Closed {
                    warn!("backend connection closed, use /reconnect to retry");
                }
            }

            event = event_rx.recv() => match event {
                Ok(event) => debug!(%event, "event"),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "event receiver lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {}
            },

            command = console_rx.recv(), if console_open => match command {
                Some(command) => {
                    if !console.handle(command) {
                        break;
                    }
                }
                None => {
                    debug!("console closed");
                    console_open = false;
                }
            },

            result = &mut shutdown_wait => {
                if let Err(e) = result {
                    error!(error = %e, "cannot listen for shutdown signals");
                }
                info!("shutdown signal received");
                break;
            }
        }
    }

    // Cleanup
    info!("shutting down...");

    cancel.cancel();
    for task in tasks {
        if let Err(e) = task.await {
            warn!(error = %e, "background task ended abnormally");
        }
    }
    mic.stop();
    queue.shutdown();
    state.shutdown();
    connection.shutdown();

    info!("companion-orchestrator stopped");

    Ok(())
}

/// Persist the URLs that were just used
fn remember_urls(store: &mut SettingsStore, config: &Config) {
    let result = store
        .set(WS_URL_KEY, &config.ws_url)
        .and_then(|()| store.set(BASE_URL_KEY, &config.base_url));
    if let Err(e) = result {
        warn!(error = %e, "could not save connection settings");
    }
}
