mod ui;

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};
use tracing::warn;

use relayscope::config::Config;
use relayscope::filter::{FilterSet, StorePredicate};
use relayscope::model::{PacketRecord, SessionSummary};
use relayscope::protocol::ProtocolRegistry;
use relayscope::state::{Effect, InputEvent, Mode, Navigate, SessionView};
use relayscope::store::{PacketStore, StoreError};

type Tui = Terminal<CrosstermBackend<io::Stdout>>;

struct OpenSession {
    summary: SessionSummary,
    view: SessionView,
}

struct App {
    store: PacketStore,
    proto_dir: PathBuf,
    registry: Option<ProtocolRegistry>,
    sessions: Vec<SessionSummary>,
    selected_session: usize,
    open: Option<OpenSession>,
    error: Option<String>,
    loading: bool,
}

impl App {
    fn new(config: &Config) -> App {
        let store = PacketStore::open(&config.capture_dir);
        let (sessions, error) = match store.list_sessions() {
            Ok(sessions) => (sessions, None),
            Err(e) => (
                Vec::new(),
                Some(format!(
                    "failed to scan {}: {e}",
                    config.capture_dir.display()
                )),
            ),
        };
        let registry = load_registry(&config.proto_dir, &config.proto_version);
        App {
            store,
            proto_dir: config.proto_dir.clone(),
            registry,
            sessions,
            selected_session: 0,
            open: None,
            error,
            loading: false,
        }
    }

    fn select_prev(&mut self) {
        if self.selected_session > 0 {
            self.selected_session -= 1;
        }
    }

    fn select_next(&mut self) {
        if self.selected_session + 1 < self.sessions.len() {
            self.selected_session += 1;
        }
    }

    // Sessions record the version they were captured under; swap definitions
    // in when it differs from whatever is currently loaded.
    fn ensure_registry(&mut self, version: Option<&str>) {
        let Some(version) = version else { return };
        if self.registry.as_ref().map(|r| r.version()) == Some(version) {
            return;
        }
        self.registry = load_registry(&self.proto_dir, version);
    }
}

fn load_registry(dir: &Path, version: &str) -> Option<ProtocolRegistry> {
    match ProtocolRegistry::load(dir, version) {
        Ok(registry) => Some(registry),
        Err(e) => {
            warn!(version, error = %e, "protocol definitions unavailable, packet names disabled");
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(io::stderr)
        .init();

    let config = Config::from_env();
    let mut app = App::new(&config);

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;

    let result = run(&mut terminal, &mut app).await;

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}

async fn run(terminal: &mut Tui, app: &mut App) -> Result<()> {
    loop {
        terminal.draw(|f| ui::draw(f, app))?;

        if !event::poll(Duration::from_millis(50))? {
            continue;
        }
        let Event::Key(key) = event::read()? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }

        if app.open.is_some() {
            handle_session_key(terminal, app, key.code).await?;
        } else {
            match key.code {
                KeyCode::Char('q') | KeyCode::Esc => return Ok(()),
                KeyCode::Up => app.select_prev(),
                KeyCode::Down => app.select_next(),
                KeyCode::Enter => open_selected(terminal, app).await?,
                _ => {}
            }
        }
    }
}

// Translate one key press into a state machine event and carry out
// whatever effect comes back.
async fn handle_session_key(terminal: &mut Tui, app: &mut App, code: KeyCode) -> Result<()> {
    let Some(open) = app.open.as_mut() else {
        return Ok(());
    };

    let input = match open.view.mode() {
        Mode::FilterInput => match code {
            KeyCode::Esc => InputEvent::CancelFilter,
            KeyCode::Enter => InputEvent::ConfirmFilter,
            KeyCode::Backspace => InputEvent::Backspace,
            KeyCode::Char(c) => InputEvent::EditFilterChar(c),
            _ => return Ok(()),
        },
        Mode::Browsing | Mode::Comparing => match code {
            KeyCode::Char('q') => InputEvent::Quit,
            KeyCode::Esc => InputEvent::CancelCompare,
            KeyCode::Left | KeyCode::Char('h') => InputEvent::Navigate(Navigate::Prev),
            KeyCode::Right | KeyCode::Char('l') => InputEvent::Navigate(Navigate::Next),
            KeyCode::Up | KeyCode::Char('k') => InputEvent::ScrollUp,
            KeyCode::Down | KeyCode::Char('j') => InputEvent::ScrollDown,
            KeyCode::PageUp => InputEvent::Navigate(Navigate::PagePrev),
            KeyCode::PageDown => InputEvent::Navigate(Navigate::PageNext),
            KeyCode::Home => InputEvent::Navigate(Navigate::First),
            KeyCode::End => InputEvent::Navigate(Navigate::Last),
            KeyCode::Char('x') | KeyCode::Char('X') => InputEvent::ToggleView,
            KeyCode::Char('f') | KeyCode::Char('F') => InputEvent::EnterFilter,
            KeyCode::Char('c') | KeyCode::Char('C') => InputEvent::MarkBaseline,
            _ => return Ok(()),
        },
    };

    match open.view.handle(input) {
        Effect::None => {}
        Effect::Exit => app.open = None,
        Effect::ApplyFilter(filter) => apply_filter(terminal, app, filter).await?,
    }
    Ok(())
}

async fn open_selected(terminal: &mut Tui, app: &mut App) -> Result<()> {
    let Some(summary) = app.sessions.get(app.selected_session).cloned() else {
        return Ok(());
    };

    match run_query(terminal, app, &summary, None).await? {
        Ok(packets) => {
            app.error = None;
            app.ensure_registry(summary.protocol_version.as_deref());
            app.open = Some(OpenSession {
                summary,
                view: SessionView::new(packets),
            });
        }
        Err(e) => app.error = Some(format!("failed to load session: {e}")),
    }
    Ok(())
}

// The store query stays off the event loop; one frame goes out first so
// the operator sees the loading overlay while the file is read.
async fn run_query(
    terminal: &mut Tui,
    app: &mut App,
    summary: &SessionSummary,
    predicate: Option<StorePredicate>,
) -> Result<std::result::Result<Vec<PacketRecord>, StoreError>> {
    app.loading = true;
    terminal.draw(|f| ui::draw(f, app))?;

    let store = app.store.clone();
    let summary = summary.clone();
    let result =
        tokio::task::spawn_blocking(move || store.query_packets(&summary, predicate.as_ref()))
            .await
            .context("store query task failed")?;

    app.loading = false;
    Ok(result)
}

// Commit is deferred until the store answers: a failed or empty query
// leaves the session exactly as it was.
async fn apply_filter(terminal: &mut Tui, app: &mut App, filter: FilterSet) -> Result<()> {
    let Some(summary) = app.open.as_ref().map(|open| open.summary.clone()) else {
        return Ok(());
    };
    let predicate = (!filter.is_empty()).then(|| filter.compile());

    match run_query(terminal, app, &summary, predicate).await? {
        Ok(packets) if packets.is_empty() => {
            app.error = Some(format!("no packets match filter \"{filter}\""));
            if let Some(open) = app.open.as_mut() {
                open.view.abort_filter();
            }
        }
        Ok(packets) => {
            app.error = None;
            if let Some(open) = app.open.as_mut() {
                open.view.commit_filter(filter, packets);
            }
        }
        Err(e) => {
            app.error = Some(format!("filter query failed: {e}"));
            if let Some(open) = app.open.as_mut() {
                open.view.abort_filter();
            }
        }
    }
    Ok(())
}
