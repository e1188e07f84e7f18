use std::sync::Arc;

use agentchat::chat::{
    AgentId, ChatDependencies, ChatView, ChatViewConfig, Message, Part, Role, Route,
    SessionBinder, SessionId, ThreadSidebar, ThreadsUpdatedSignal, VirtualViewport,
    generate_session_id,
};
use agentchat::settings::{FilePreferences, PREFERENCES_FILE_NAME, PreferenceStore, SettingsStore};
use agentchat::transport::{DEFAULT_STEP_DELAY, ScriptedTransport};
use agentchat_storage::{SqliteThreadStore, StorageError};
use snafu::{ResultExt, Snafu};
use tokio::io::{AsyncBufReadExt, BufReader};

const VIEWPORT_HEIGHT: f32 = 720.0;

#[derive(Debug, Snafu)]
enum AppError {
    #[snafu(display("failed to open history database '{path}': {source}"))]
    OpenHistory { path: String, source: StorageError },
    #[snafu(display("failed to read input: {source}"))]
    ReadInput { source: std::io::Error },
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt::init();

    if let Err(error) = run().await {
        tracing::error!(error = %error, "agentchat exited");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    let settings_store = SettingsStore::load();
    let settings = settings_store.settings();
    let config_dir = settings_store.config_dir();

    let database_path = settings
        .resolved_database_path(&config_dir)
        .to_string_lossy()
        .into_owned();
    let store = Arc::new(
        SqliteThreadStore::open(&database_path)
            .await
            .context(OpenHistorySnafu {
                path: database_path.clone(),
            })?,
    );
    let preferences: Arc<dyn PreferenceStore> =
        Arc::new(FilePreferences::open(config_dir.join(PREFERENCES_FILE_NAME)));
    let signal = ThreadsUpdatedSignal::new();
    let transport = ScriptedTransport::new(DEFAULT_STEP_DELAY).with_store(store.clone());

    let config = ChatViewConfig::from_settings(&settings);
    let agent_id = SessionBinder::preferred_agent(preferences.as_ref(), &config.default_agent_id);
    let route = Route::new(agent_id).with_session(generate_session_id());
    tracing::info!(database = %database_path, "starting chat session");

    let deps = ChatDependencies {
        transport: Arc::new(transport),
        history: store.clone(),
        preferences,
        signal: signal.clone(),
    };
    let mut view = ChatView::new(config, deps, VirtualViewport::new(VIEWPORT_HEIGHT), route);
    let mut sidebar = ThreadSidebar::new(store, settings.user_id.as_str(), &signal);
    sidebar.reload().await;

    print_banner(&view);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut was_streaming = false;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context(ReadInputSnafu)? else {
                    break;
                };
                if !handle_line(&mut view, &mut sidebar, line.trim()).await {
                    break;
                }
            }
            _ = view.step(), if view.has_pending_work() => {}
        }

        let streaming = view.is_streaming();
        if was_streaming && !streaming {
            print_transcript(&view);
            if let Some(error) = view.last_error() {
                println!("! {error}");
            }
        }
        was_streaming = streaming;
    }

    view.stop();
    Ok(())
}

/// Returns false when the user asked to quit.
async fn handle_line(
    view: &mut ChatView<VirtualViewport>,
    sidebar: &mut ThreadSidebar,
    line: &str,
) -> bool {
    let (command, argument) = line
        .split_once(' ')
        .map(|(command, argument)| (command, argument.trim()))
        .unwrap_or((line, ""));

    match command {
        "" => {}
        "/quit" => return false,
        "/stop" => {
            if view.stop() {
                print_transcript(view);
            }
        }
        "/new" => {
            view.new_chat();
            print_banner(view);
        }
        "/agent" if !argument.is_empty() => {
            let navigation = view.select_agent(AgentId::new(argument));
            view.navigate(navigation.route);
            print_banner(view);
        }
        "/open" if !argument.is_empty() => {
            let route = sidebar
                .threads()
                .iter()
                .find(|thread| thread.thread_id.as_str() == argument)
                .map(|thread| ThreadSidebar::route_for(thread, view.agent_id()).route)
                .unwrap_or_else(|| {
                    Route::new(view.agent_id().clone()).with_session(SessionId::new(argument))
                });
            view.navigate(route);
            view.run_until_idle().await;
            print_banner(view);
            print_transcript(view);
        }
        "/delete" if !argument.is_empty() => {
            match view.delete_thread(&SessionId::new(argument)).await {
                Ok(Some(_)) => print_banner(view),
                Ok(None) => println!("deleted {argument}"),
                Err(error) => println!("! {error}"),
            }
        }
        "/threads" => {
            sidebar.reload().await;
            for group in sidebar.groups() {
                println!("{}", group.group.title());
                for thread in &group.threads {
                    println!("  {}  [{}]  {}", thread.thread_id, thread.agent_id, thread.preview);
                }
            }
        }
        _ if command.starts_with('/') => {
            println!("commands: /agent <id>, /new, /open <session>, /delete <session>, /threads, /stop, /quit");
        }
        _ => {
            if let Err(rejected) = view.submit(line) {
                println!("! {rejected}");
            }
        }
    }
    true
}

fn print_banner(view: &ChatView<VirtualViewport>) {
    let session = view
        .session_id()
        .map(SessionId::as_str)
        .unwrap_or("(ephemeral)");
    println!("agent {} / session {session}", view.agent_id());
}

fn print_transcript(view: &ChatView<VirtualViewport>) {
    for message in view.messages().iter() {
        print_message(message);
    }
}

fn print_message(message: &Message) {
    let speaker = match message.role {
        Role::User => "you",
        Role::Assistant => "agent",
    };
    for part in message.rendered_parts() {
        match part {
            Part::Reasoning { text } => println!("{speaker} (thinking): {text}"),
            Part::Text { text } => println!("{speaker}: {text}"),
        }
    }
}
