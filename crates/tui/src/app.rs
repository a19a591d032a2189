use std::{
    collections::HashSet, future::Future, io, path::PathBuf, sync::Arc, thread, time::Duration,
};

use anyhow::{Context, Result};
use automania_core::{
    api::{ApiError, MarketplaceApi},
    config::AppConfig,
    editor::{EditorError, ListingEditor, MainPhoto, PhotoEntry, PreviewRegistry},
    feed::{FeedController, LoadOutcome, LoadTicket},
    models::{Listing, Page, User},
    session::{LogoutOutcome, SessionError, SessionStore},
    validation::validate_photo_url,
};
use chrono::Local;
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, List, ListItem, Paragraph, Wrap},
    Frame, Terminal,
};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::forms::TextInput;

const TICK_RATE: Duration = Duration::from_millis(250);
const SPINNER: [&str; 4] = ["|", "/", "-", "\\"];
const ROWS_PER_LISTING: usize = 2;
const MAX_FIELD_LEN: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Screen {
    SignIn,
    Register,
    Feed,
    Editor,
}

enum AppEvent {
    Input(Event),
    Tick,
    FeedLoaded(LoadTicket, Result<Page<Listing>, ApiError>),
    Deleted(String, Result<(), ApiError>),
    SignedIn(Result<User, SessionError>),
    SignedOut(Result<LogoutOutcome, SessionError>),
    ListingFetched(String, Result<Listing, ApiError>),
    Submitted(Box<ListingEditor>, Result<Listing, EditorError>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AuthField {
    Email,
    FullName,
    Password,
}

/// Inputs for the sign-in and registration screens.
struct AuthForm {
    email: TextInput,
    full_name: TextInput,
    password: TextInput,
    focus: AuthField,
    error: Option<String>,
}

impl AuthForm {
    fn new() -> Self {
        Self {
            email: TextInput::new().with_max_len(MAX_FIELD_LEN),
            full_name: TextInput::new().with_max_len(MAX_FIELD_LEN),
            password: TextInput::masked().with_max_len(MAX_FIELD_LEN),
            focus: AuthField::Email,
            error: None,
        }
    }

    fn fields(screen: Screen) -> &'static [AuthField] {
        match screen {
            Screen::Register => &[AuthField::Email, AuthField::FullName, AuthField::Password],
            _ => &[AuthField::Email, AuthField::Password],
        }
    }

    fn cycle(&mut self, screen: Screen, delta: isize) {
        let fields = Self::fields(screen);
        let current = fields
            .iter()
            .position(|field| *field == self.focus)
            .unwrap_or(0) as isize;
        let len = fields.len() as isize;
        self.focus = fields[((current + delta).rem_euclid(len)) as usize];
    }

    fn input_mut(&mut self) -> &mut TextInput {
        match self.focus {
            AuthField::Email => &mut self.email,
            AuthField::FullName => &mut self.full_name,
            AuthField::Password => &mut self.password,
        }
    }

    fn input(&self, field: AuthField) -> &TextInput {
        match field {
            AuthField::Email => &self.email,
            AuthField::FullName => &self.full_name,
            AuthField::Password => &self.password,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EditorField {
    Brand,
    Model,
    Price,
    MainPhoto,
    AddPhotos,
    Photos,
}

const EDITOR_FIELDS: [EditorField; 6] = [
    EditorField::Brand,
    EditorField::Model,
    EditorField::Price,
    EditorField::MainPhoto,
    EditorField::AddPhotos,
    EditorField::Photos,
];

/// Editor screen: text inputs bound to a [`ListingEditor`].
struct EditorForm {
    /// `None` while a submit owns the editor.
    editor: Option<ListingEditor>,
    brand: TextInput,
    model: TextInput,
    price: TextInput,
    main_photo: TextInput,
    add_photos: TextInput,
    focus: EditorField,
    photo_cursor: usize,
    error: Option<String>,
}

impl EditorForm {
    fn new(editor: ListingEditor) -> Self {
        let main_photo = match editor.main_photo() {
            MainPhoto::Url(url) => url.clone(),
            MainPhoto::File(pending) => pending.path().display().to_string(),
            MainPhoto::Empty => String::new(),
        };
        Self {
            brand: TextInput::new()
                .with_max_len(MAX_FIELD_LEN)
                .with_value(editor.brand()),
            model: TextInput::new()
                .with_max_len(MAX_FIELD_LEN)
                .with_value(editor.model()),
            price: TextInput::new().with_max_len(16).with_value(editor.price_input()),
            main_photo: TextInput::new().with_value(&main_photo),
            add_photos: TextInput::new(),
            focus: EditorField::Brand,
            photo_cursor: 0,
            error: None,
            editor: Some(editor),
        }
    }

    fn is_submitting(&self) -> bool {
        self.editor.is_none()
    }

    fn cycle(&mut self, delta: isize) {
        let current = EDITOR_FIELDS
            .iter()
            .position(|field| *field == self.focus)
            .unwrap_or(0) as isize;
        let len = EDITOR_FIELDS.len() as isize;
        self.focus = EDITOR_FIELDS[((current + delta).rem_euclid(len)) as usize];
    }

    fn focused_input(&mut self) -> Option<&mut TextInput> {
        match self.focus {
            EditorField::Brand => Some(&mut self.brand),
            EditorField::Model => Some(&mut self.model),
            EditorField::Price => Some(&mut self.price),
            EditorField::MainPhoto => Some(&mut self.main_photo),
            EditorField::AddPhotos => Some(&mut self.add_photos),
            EditorField::Photos => None,
        }
    }

    /// Copy the plain text inputs into the editor.
    fn sync_fields(&mut self) {
        if let Some(editor) = self.editor.as_mut() {
            editor.set_brand(self.brand.value());
            editor.set_model(self.model.value());
            editor.set_price(self.price.value());
        }
    }

    /// Interpret the main photo input as a URL or a local path.
    fn apply_main_photo(&mut self) -> Result<(), String> {
        let Some(editor) = self.editor.as_mut() else {
            return Ok(());
        };
        let text = self.main_photo.value().trim().to_string();
        if text.is_empty() {
            editor.clear_main_photo();
            return Ok(());
        }
        if is_url(&text) {
            let unchanged = matches!(editor.main_photo(), MainPhoto::Url(url) if *url == text);
            if !unchanged {
                editor.set_main_photo_url(&text).map_err(|err| err.to_string())?;
            }
            return Ok(());
        }
        let path = expand_path(&text);
        let unchanged =
            matches!(editor.main_photo(), MainPhoto::File(pending) if pending.path() == path);
        if !unchanged {
            editor.set_main_photo_file(path);
        }
        Ok(())
    }

    /// Add the comma-separated URLs and paths typed in the add field.
    fn add_photos(&mut self) -> Result<usize, String> {
        let Some(editor) = self.editor.as_mut() else {
            return Ok(0);
        };
        let entries: Vec<String> = self
            .add_photos
            .value()
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(str::to_string)
            .collect();
        // Reject the whole entry before adding anything, then keep typed order.
        for entry in entries.iter().filter(|entry| is_url(entry)) {
            validate_photo_url(entry).map_err(|err| err.to_string())?;
        }
        let mut added = 0;
        for entry in &entries {
            if is_url(entry) {
                added += editor.add_photo_urls(entry).map_err(|err| err.to_string())?;
            } else {
                editor.add_photo_files([expand_path(entry)]);
                added += 1;
            }
        }
        self.add_photos.clear();
        Ok(added)
    }

    fn remove_selected_photo(&mut self) -> bool {
        let Some(editor) = self.editor.as_mut() else {
            return false;
        };
        if !editor.remove_photo(self.photo_cursor) {
            return false;
        }
        let len = editor.photos().len();
        if self.photo_cursor >= len {
            self.photo_cursor = len.saturating_sub(1);
        }
        true
    }
}

fn is_url(text: &str) -> bool {
    text.starts_with("http://") || text.starts_with("https://")
}

fn expand_path(text: &str) -> PathBuf {
    match text.strip_prefix("~/") {
        Some(rest) => std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_default()
            .join(rest),
        None => PathBuf::from(text),
    }
}

/// Scroll position of the feed list.
#[derive(Debug, Default)]
struct FeedView {
    cursor: usize,
    offset: usize,
    visible_rows: usize,
    confirm_delete: Option<String>,
}

impl FeedView {
    fn move_cursor(&mut self, delta: isize, len: usize) {
        if len == 0 {
            self.cursor = 0;
            return;
        }
        let max = len as isize - 1;
        self.cursor = (self.cursor as isize + delta).clamp(0, max) as usize;
        self.ensure_cursor_visible();
    }

    fn clamp(&mut self, len: usize) {
        if len == 0 {
            self.cursor = 0;
            self.offset = 0;
        } else if self.cursor >= len {
            self.cursor = len - 1;
        }
        self.ensure_cursor_visible();
    }

    fn ensure_cursor_visible(&mut self) {
        let rows = self.visible_rows.max(1);
        if self.cursor < self.offset {
            self.offset = self.cursor;
        } else if self.cursor >= self.offset + rows {
            self.offset = self.cursor + 1 - rows;
        }
    }

    /// Index of the last listing drawn on screen.
    fn last_visible(&self, len: usize) -> Option<usize> {
        if len == 0 || self.visible_rows == 0 {
            return None;
        }
        Some((self.offset + self.visible_rows).min(len) - 1)
    }
}

/// High-level application state for the marketplace TUI.
pub struct AutomaniaApp {
    config: AppConfig,
    session: SessionStore,
    api: Arc<dyn MarketplaceApi>,
    previews: PreviewRegistry,
    feed: FeedController,
    feed_view: FeedView,
    screen: Screen,
    auth: AuthForm,
    editor: Option<EditorForm>,
    pending_edit: Option<String>,
    deleting: HashSet<String>,
    auth_busy: bool,
    status: String,
    should_quit: bool,
    event_tx: Option<mpsc::Sender<AppEvent>>,
    tick: usize,
}

impl AutomaniaApp {
    pub fn new(config: AppConfig, session: SessionStore, api: Arc<dyn MarketplaceApi>) -> Self {
        let screen = if session.is_signed_in() {
            Screen::Feed
        } else {
            Screen::SignIn
        };
        Self {
            feed: FeedController::new(config.page_size),
            config,
            session,
            api,
            previews: PreviewRegistry::new(),
            feed_view: FeedView::default(),
            screen,
            auth: AuthForm::new(),
            editor: None,
            pending_edit: None,
            deleting: HashSet::new(),
            auth_busy: false,
            status: "Ready".to_string(),
            should_quit: false,
            event_tx: None,
            tick: 0,
        }
    }

    pub async fn run(&mut self) -> Result<()> {
        let mut stdout = io::stdout();
        enable_raw_mode().context("failed to enter raw mode")?;
        execute!(stdout, EnterAlternateScreen).context("failed to enter alternate screen")?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend).context("failed to create terminal")?;
        terminal.clear()?;

        let (event_tx, mut event_rx) = mpsc::channel::<AppEvent>(128);
        spawn_input_thread(event_tx.clone());
        self.event_tx = Some(event_tx);

        info!(
            api = %self.config.api_url,
            signed_in = self.session.is_signed_in(),
            "Client started"
        );
        if self.screen == Screen::Feed {
            self.refresh_feed();
        }

        loop {
            terminal.draw(|frame| self.draw(frame))?;
            self.check_feed_visibility();
            if self.should_quit {
                break;
            }

            let maybe_event = event_rx.recv().await;
            if !self.process_app_event(maybe_event) {
                break;
            }
            if self.should_quit {
                break;
            }
        }

        restore_terminal(&mut terminal)?;
        self.event_tx = None;
        Ok(())
    }

    fn spawn_task<F>(&self, task: F)
    where
        F: Future<Output = AppEvent> + Send + 'static,
    {
        let Some(sender) = self.event_tx.clone() else {
            return;
        };
        tokio::spawn(async move {
            let event = task.await;
            if sender.send(event).await.is_err() {
                debug!("Event loop gone; dropping task result");
            }
        });
    }

    fn spawn_feed_load(&self, ticket: LoadTicket) {
        let api = self.api.clone();
        self.spawn_task(async move {
            let result = api.list_listings(ticket.query).await;
            AppEvent::FeedLoaded(ticket, result)
        });
    }

    fn refresh_feed(&mut self) {
        match self.feed.refresh() {
            Some(ticket) => self.spawn_feed_load(ticket),
            None => self.set_status("Still loading…"),
        }
    }

    fn check_feed_visibility(&mut self) {
        if self.screen != Screen::Feed {
            return;
        }
        let last_visible = self.feed_view.last_visible(self.feed.len());
        if let Some(ticket) = self.feed.advance_on_visible(last_visible) {
            debug!(page = ticket.query.page_number, "Last listing visible; loading more");
            self.spawn_feed_load(ticket);
        }
    }

    fn set_status(&mut self, message: impl Into<String>) {
        self.status = message.into();
    }

    fn process_app_event(&mut self, maybe_event: Option<AppEvent>) -> bool {
        match maybe_event {
            Some(AppEvent::Input(event)) => {
                if let Err(err) = self.handle_input(event) {
                    error!(?err, "Input handling failed");
                    self.set_status(format!("Error: {err}"));
                }
            }
            Some(AppEvent::Tick) => {
                self.tick = self.tick.wrapping_add(1);
            }
            Some(AppEvent::FeedLoaded(ticket, result)) => self.handle_feed_loaded(ticket, result),
            Some(AppEvent::Deleted(id, result)) => self.handle_deleted(id, result),
            Some(AppEvent::SignedIn(result)) => self.handle_signed_in(result),
            Some(AppEvent::SignedOut(result)) => self.handle_signed_out(result),
            Some(AppEvent::ListingFetched(id, result)) => self.handle_listing_fetched(id, result),
            Some(AppEvent::Submitted(editor, result)) => self.handle_submitted(*editor, result),
            None => return false,
        }
        true
    }

    fn handle_feed_loaded(&mut self, ticket: LoadTicket, result: Result<Page<Listing>, ApiError>) {
        match self.feed.complete_load(ticket, result) {
            Ok(LoadOutcome::Applied { added }) => {
                self.feed_view.clamp(self.feed.len());
                if added == 0 && self.feed.is_empty() {
                    self.set_status("No listings yet");
                } else {
                    self.set_status(format!(
                        "Showing {} of {} listings",
                        self.feed.len(),
                        self.feed.total()
                    ));
                }
            }
            Ok(LoadOutcome::Discarded) => {}
            Err(err) if err.is_unauthorized() => self.expire_session(),
            Err(err) => self.set_status(format!("Failed to fetch listings: {err}")),
        }
    }

    fn handle_deleted(&mut self, id: String, result: Result<(), ApiError>) {
        self.deleting.remove(&id);
        match result {
            Ok(()) => {
                if self.feed.apply_removed(&id) {
                    self.feed_view.clamp(self.feed.len());
                    self.set_status("Listing deleted");
                }
            }
            Err(err) if err.is_unauthorized() => self.expire_session(),
            Err(err) => {
                warn!(listing_id = %id, ?err, "Delete failed");
                self.set_status(format!("Failed to delete listing: {err}"));
            }
        }
    }

    fn handle_signed_in(&mut self, result: Result<User, SessionError>) {
        self.auth_busy = false;
        match result {
            Ok(user) => {
                self.auth = AuthForm::new();
                self.screen = Screen::Feed;
                self.feed.detach();
                self.feed_view = FeedView::default();
                self.set_status(format!("Welcome, {}", user.full_name));
                self.refresh_feed();
            }
            Err(err) => {
                self.auth.password.clear();
                self.auth.error = Some(err.to_string());
            }
        }
    }

    fn handle_signed_out(&mut self, result: Result<LogoutOutcome, SessionError>) {
        self.auth_busy = false;
        self.leave_session();
        match result {
            Ok(LogoutOutcome {
                server_error: Some(err),
            }) => self.set_status(format!("Signed out locally ({err})")),
            Ok(_) => self.set_status("Signed out"),
            Err(err) => {
                error!(?err, "Logout failed");
                self.set_status(format!("Sign-out incomplete: {err}"));
            }
        }
    }

    fn handle_listing_fetched(&mut self, id: String, result: Result<Listing, ApiError>) {
        if self.pending_edit.as_deref() != Some(id.as_str()) || self.screen != Screen::Feed {
            debug!(listing_id = %id, "Discarding listing fetched for a closed view");
            return;
        }
        self.pending_edit = None;
        match result {
            Ok(listing) => {
                let editor = ListingEditor::from_listing(&listing, self.previews.clone());
                self.editor = Some(EditorForm::new(editor));
                self.screen = Screen::Editor;
                self.set_status(format!("Editing {}", listing.display_name()));
            }
            Err(err) if err.is_unauthorized() => self.expire_session(),
            Err(err) => self.set_status(format!("Failed to fetch listing: {err}")),
        }
    }

    fn handle_submitted(&mut self, editor: ListingEditor, result: Result<Listing, EditorError>) {
        let Some(form) = self.editor.as_mut() else {
            return;
        };
        let was_editing = editor.is_editing();
        form.editor = Some(editor);
        match result {
            Ok(listing) => {
                self.editor = None;
                self.screen = Screen::Feed;
                if was_editing {
                    self.feed.apply_updated(listing.clone());
                }
                self.set_status(if was_editing {
                    format!("Updated {}", listing.display_name())
                } else {
                    format!("Created {}", listing.display_name())
                });
                if !was_editing {
                    self.feed_view = FeedView::default();
                    self.refresh_feed();
                }
            }
            Err(err) if err.is_unauthorized() => self.expire_session(),
            Err(err) => {
                warn!(?err, "Listing submit failed");
                let message = if was_editing {
                    format!("Failed to update listing: {err}")
                } else {
                    format!("Failed to create listing: {err}")
                };
                form.error = Some(message.clone());
                self.set_status(message);
            }
        }
    }

    /// Tear down everything tied to the signed-in identity.
    fn leave_session(&mut self) {
        self.feed.detach();
        self.feed_view = FeedView::default();
        self.editor = None;
        self.pending_edit = None;
        self.deleting.clear();
        self.auth = AuthForm::new();
        self.screen = Screen::SignIn;
    }

    fn expire_session(&mut self) {
        warn!("Session rejected by service; returning to sign-in");
        self.leave_session();
        self.set_status("Session expired, please sign in again");
    }

    fn handle_input(&mut self, event: Event) -> Result<()> {
        let Event::Key(key) = event else {
            return Ok(());
        };
        if key.kind != KeyEventKind::Press {
            return Ok(());
        }
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            self.should_quit = true;
            return Ok(());
        }
        match self.screen {
            Screen::SignIn | Screen::Register => self.handle_auth_key(key),
            Screen::Feed => self.handle_feed_key(key),
            Screen::Editor => self.handle_editor_key(key),
        }
        Ok(())
    }

    fn handle_auth_key(&mut self, key: KeyEvent) {
        if self.auth_busy {
            return;
        }
        match key.code {
            KeyCode::Esc => self.should_quit = true,
            KeyCode::Tab | KeyCode::Down => self.auth.cycle(self.screen, 1),
            KeyCode::BackTab | KeyCode::Up => self.auth.cycle(self.screen, -1),
            KeyCode::Char('r') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                self.screen = match self.screen {
                    Screen::SignIn => Screen::Register,
                    _ => Screen::SignIn,
                };
                self.auth.focus = AuthField::Email;
                self.auth.error = None;
            }
            KeyCode::Enter => self.submit_auth(),
            _ => {
                if self.auth.input_mut().handle_key(&key) {
                    self.auth.error = None;
                }
            }
        }
    }

    fn submit_auth(&mut self) {
        let session = self.session.clone();
        let email = self.auth.email.value().to_string();
        let password = self.auth.password.value().to_string();
        let full_name = self.auth.full_name.value().to_string();
        let registering = self.screen == Screen::Register;
        self.auth_busy = true;
        self.auth.error = None;
        self.spawn_task(async move {
            let result = if registering {
                session.register_new(&email, &password, &full_name).await
            } else {
                session.login(&email, &password).await
            };
            AppEvent::SignedIn(result)
        });
    }

    fn handle_feed_key(&mut self, key: KeyEvent) {
        if let Some(id) = self.feed_view.confirm_delete.take() {
            if matches!(key.code, KeyCode::Char('y') | KeyCode::Char('Y')) {
                self.delete_listing(id);
            } else {
                self.set_status("Delete cancelled");
            }
            return;
        }

        let len = self.feed.len();
        let page = self.feed_view.visible_rows.max(1) as isize;
        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => self.should_quit = true,
            KeyCode::Down | KeyCode::Char('j') => self.feed_view.move_cursor(1, len),
            KeyCode::Up | KeyCode::Char('k') => self.feed_view.move_cursor(-1, len),
            KeyCode::PageDown => self.feed_view.move_cursor(page, len),
            KeyCode::PageUp => self.feed_view.move_cursor(-page, len),
            KeyCode::Home | KeyCode::Char('g') => self.feed_view.move_cursor(-(len as isize), len),
            KeyCode::End | KeyCode::Char('G') => self.feed_view.move_cursor(len as isize, len),
            KeyCode::Char('r') => {
                self.feed_view = FeedView {
                    visible_rows: self.feed_view.visible_rows,
                    ..FeedView::default()
                };
                self.refresh_feed();
            }
            KeyCode::Char('m') => match self.feed.begin_load() {
                Some(ticket) => self.spawn_feed_load(ticket),
                None if !self.feed.has_more() => self.set_status("No more listings"),
                None => {}
            },
            KeyCode::Char('n') => {
                let editor = ListingEditor::new(self.previews.clone());
                self.editor = Some(EditorForm::new(editor));
                self.screen = Screen::Editor;
                self.set_status("New listing");
            }
            KeyCode::Char('e') => {
                if let Some(listing) = self.owned_selection() {
                    let id = listing.id.clone();
                    self.pending_edit = Some(id.clone());
                    let api = self.api.clone();
                    self.set_status("Loading listing…");
                    self.spawn_task(async move {
                        let result = api.get_listing(&id).await;
                        AppEvent::ListingFetched(id, result)
                    });
                }
            }
            KeyCode::Char('d') | KeyCode::Delete => {
                if let Some(listing) = self.owned_selection() {
                    let prompt = format!("Delete {}? (y/n)", listing.display_name());
                    self.feed_view.confirm_delete = Some(listing.id.clone());
                    self.set_status(prompt);
                }
            }
            KeyCode::Char('L') if !self.auth_busy => {
                self.auth_busy = true;
                let session = self.session.clone();
                self.set_status("Signing out…");
                self.spawn_task(async move { AppEvent::SignedOut(session.logout().await) });
            }
            _ => {}
        }
    }

    /// The selected listing if the signed-in user owns it.
    fn owned_selection(&mut self) -> Option<Listing> {
        let user = self.session.current_user();
        let listing = self.feed.get(self.feed_view.cursor)?.clone();
        if !listing.is_owned_by(user.as_ref()) {
            self.set_status("Only the owner can change this listing");
            return None;
        }
        if self.deleting.contains(&listing.id) {
            self.set_status("Delete already in progress");
            return None;
        }
        Some(listing)
    }

    fn delete_listing(&mut self, id: String) {
        self.deleting.insert(id.clone());
        self.set_status("Deleting…");
        let api = self.api.clone();
        self.spawn_task(async move {
            let result = api.delete_listing(&id).await;
            AppEvent::Deleted(id, result)
        });
    }

    fn handle_editor_key(&mut self, key: KeyEvent) {
        let Some(form) = self.editor.as_mut() else {
            self.screen = Screen::Feed;
            return;
        };
        if form.is_submitting() {
            return;
        }

        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        match key.code {
            KeyCode::Esc => {
                self.editor = None;
                self.screen = Screen::Feed;
                self.set_status("Edit cancelled");
                return;
            }
            KeyCode::Char('s') if ctrl => {
                self.submit_editor();
                return;
            }
            KeyCode::Tab | KeyCode::BackTab => {
                let leaving_main = form.focus == EditorField::MainPhoto;
                if leaving_main {
                    if let Err(message) = form.apply_main_photo() {
                        form.error = Some(message);
                        return;
                    }
                }
                form.cycle(if key.code == KeyCode::Tab { 1 } else { -1 });
                return;
            }
            _ => {}
        }

        match form.focus {
            EditorField::Photos => {
                let len = form.editor.as_ref().map_or(0, |editor| editor.photos().len());
                match key.code {
                    KeyCode::Down | KeyCode::Char('j') if len > 0 => {
                        form.photo_cursor = (form.photo_cursor + 1).min(len - 1);
                    }
                    KeyCode::Up | KeyCode::Char('k') => {
                        form.photo_cursor = form.photo_cursor.saturating_sub(1);
                    }
                    KeyCode::Delete | KeyCode::Backspace | KeyCode::Char('x') => {
                        if form.remove_selected_photo() {
                            form.error = None;
                        }
                    }
                    _ => {}
                }
            }
            EditorField::MainPhoto if key.code == KeyCode::Enter => {
                form.error = form.apply_main_photo().err();
            }
            EditorField::AddPhotos if key.code == KeyCode::Enter => match form.add_photos() {
                Ok(added) => {
                    form.error = None;
                    self.status = format!("Added {added} photo(s)");
                }
                Err(message) => form.error = Some(message),
            },
            _ if key.code == KeyCode::Enter => form.cycle(1),
            _ => {
                if let Some(input) = form.focused_input() {
                    if input.handle_key(&key) {
                        form.sync_fields();
                        form.error = None;
                    }
                }
            }
        }
    }

    fn submit_editor(&mut self) {
        let Some(form) = self.editor.as_mut() else {
            return;
        };
        form.sync_fields();
        if let Err(message) = form.apply_main_photo() {
            form.error = Some(message);
            return;
        }
        let Some(editor) = form.editor.as_ref() else {
            return;
        };
        if let Err(err) = editor.validate() {
            form.error = Some(err.to_string());
            return;
        }
        let Some(mut editor) = form.editor.take() else {
            return;
        };
        form.error = None;
        self.set_status("Saving…");
        let api = self.api.clone();
        self.spawn_task(async move {
            let result = editor.submit(api.as_ref()).await;
            AppEvent::Submitted(Box::new(editor), result)
        });
    }

    fn spinner(&self) -> &'static str {
        SPINNER[self.tick % SPINNER.len()]
    }

    fn draw(&mut self, frame: &mut Frame) {
        let area = frame.size();
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3),
                Constraint::Min(5),
                Constraint::Length(3),
            ])
            .split(area);

        self.render_header(frame, chunks[0]);
        match self.screen {
            Screen::SignIn | Screen::Register => self.render_auth(frame, chunks[1]),
            Screen::Feed => self.render_feed(frame, chunks[1]),
            Screen::Editor => self.render_editor(frame, chunks[1]),
        }
        self.render_status(frame, chunks[2]);
    }

    fn render_header(&self, frame: &mut Frame, area: Rect) {
        let identity = match self.session.current_user() {
            Some(user) => format!("{} <{}>", user.full_name, user.email),
            None => "not signed in".to_string(),
        };
        let line = Line::from(vec![
            Span::styled(
                "Automania",
                Style::default()
                    .fg(Color::Yellow)
                    .add_modifier(Modifier::BOLD),
            ),
            Span::raw("  ·  "),
            Span::raw(identity),
            Span::raw("  ·  "),
            Span::styled(
                Local::now().format("%H:%M").to_string(),
                Style::default().fg(Color::DarkGray),
            ),
        ]);
        let header = Paragraph::new(line).block(Block::default().borders(Borders::ALL));
        frame.render_widget(header, area);
    }

    fn render_auth(&self, frame: &mut Frame, area: Rect) {
        let registering = self.screen == Screen::Register;
        let fields = AuthForm::fields(self.screen);
        let height = (fields.len() as u16) * 2 + 6;
        let popup = centered_rect(60, height, area);

        let mut lines = Vec::new();
        for field in fields {
            let label = match field {
                AuthField::Email => "Email",
                AuthField::FullName => "Full name",
                AuthField::Password => "Password",
            };
            let focused = *field == self.auth.focus;
            let style = if focused {
                Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)
            } else {
                Style::default()
            };
            lines.push(Line::from(Span::styled(format!("{label}:"), style)));
            let input = self.auth.input(*field);
            let text = if focused {
                input.display_with_caret()
            } else {
                input.display()
            };
            lines.push(Line::from(format!("  {text}")));
        }
        lines.push(Line::from(""));
        if self.auth_busy {
            lines.push(Line::from(format!("{} Please wait…", self.spinner())));
        } else if let Some(error) = self.auth.error.as_ref() {
            lines.push(Line::from(Span::styled(
                error.clone(),
                Style::default().fg(Color::Red),
            )));
        } else {
            lines.push(Line::from(""));
        }
        lines.push(Line::from(Span::styled(
            if registering {
                "Enter: create account · Tab: next field · Ctrl-R: sign in instead"
            } else {
                "Enter: sign in · Tab: next field · Ctrl-R: create an account"
            },
            Style::default().fg(Color::DarkGray),
        )));

        let title = if registering { "Create account" } else { "Sign in" };
        let paragraph = Paragraph::new(lines)
            .block(Block::default().borders(Borders::ALL).title(title))
            .wrap(Wrap { trim: false });
        frame.render_widget(Clear, popup);
        frame.render_widget(paragraph, popup);
    }

    fn render_feed(&mut self, frame: &mut Frame, area: Rect) {
        let columns = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
            .split(area);

        let inner_height = columns[0].height.saturating_sub(2) as usize;
        self.feed_view.visible_rows = (inner_height / ROWS_PER_LISTING).max(1);
        self.feed_view.clamp(self.feed.len());

        let user = self.session.current_user();
        let start = self.feed_view.offset;
        let end = (start + self.feed_view.visible_rows).min(self.feed.len());
        let items: Vec<ListItem> = self.feed.items()[start..end]
            .iter()
            .enumerate()
            .map(|(offset, listing)| {
                let index = start + offset;
                let selected = index == self.feed_view.cursor;
                let owned = listing.is_owned_by(user.as_ref());
                let mut title_style = Style::default().add_modifier(Modifier::BOLD);
                if selected {
                    title_style = title_style.fg(Color::Black).bg(Color::Cyan);
                }
                let marker = if self.deleting.contains(&listing.id) {
                    " (deleting)"
                } else if owned {
                    " ★"
                } else {
                    ""
                };
                ListItem::new(vec![
                    Line::from(Span::styled(
                        format!("{}{}", listing.display_name(), marker),
                        title_style,
                    )),
                    Line::from(Span::styled(
                        format!("  {}", format_price(listing.price)),
                        Style::default().fg(Color::Green),
                    )),
                ])
            })
            .collect();

        let mut title = format!("Listings ({}/{})", self.feed.len(), self.feed.total());
        if self.feed.is_loading() {
            title.push_str(&format!(" {} loading", self.spinner()));
        } else if !self.feed.has_more() && !self.feed.is_empty() {
            title.push_str(" · end");
        }
        let list = List::new(items).block(Block::default().borders(Borders::ALL).title(title));
        frame.render_widget(list, columns[0]);

        self.render_listing_detail(frame, columns[1], user.as_ref());
    }

    fn render_listing_detail(&self, frame: &mut Frame, area: Rect, user: Option<&User>) {
        let mut lines = Vec::new();
        if let Some(listing) = self.feed.get(self.feed_view.cursor) {
            lines.push(Line::from(Span::styled(
                listing.display_name(),
                Style::default().add_modifier(Modifier::BOLD),
            )));
            lines.push(Line::from(format!("Price: {}", format_price(listing.price))));
            if let Some(created) = listing.created_at {
                lines.push(Line::from(format!(
                    "Listed: {}",
                    created.with_timezone(&Local).format("%Y-%m-%d")
                )));
            }
            lines.push(Line::from(""));
            lines.push(Line::from(format!("Main photo: {}", listing.main_photo)));
            for (index, photo) in listing.additional_photos.iter().enumerate() {
                lines.push(Line::from(format!("Photo {}: {}", index + 1, photo)));
            }
            lines.push(Line::from(""));
            let actions = if listing.is_owned_by(user) {
                "e: edit · d: delete"
            } else {
                "read only"
            };
            lines.push(Line::from(Span::styled(
                actions,
                Style::default().fg(Color::DarkGray),
            )));
        } else if self.feed.is_loading() {
            lines.push(Line::from(format!("{} Loading listings…", self.spinner())));
        } else {
            lines.push(Line::from("No listings. Press n to add one."));
        }
        let paragraph = Paragraph::new(lines)
            .block(Block::default().borders(Borders::ALL).title("Details"))
            .wrap(Wrap { trim: true });
        frame.render_widget(paragraph, area);
    }

    fn render_editor(&self, frame: &mut Frame, area: Rect) {
        let Some(form) = self.editor.as_ref() else {
            return;
        };
        let rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(12), Constraint::Min(3)])
            .split(area);

        let field_line = |field: EditorField, label: &str, input: &TextInput| {
            let focused = form.focus == field;
            let style = if focused {
                Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)
            } else {
                Style::default()
            };
            Line::from(vec![
                Span::styled(format!("{label:<12}"), style),
                Span::raw(if focused {
                    input.display_with_caret()
                } else {
                    input.display()
                }),
            ])
        };

        let validation = form.editor.as_ref().map(|editor| editor.validate());
        let mut lines = vec![
            field_line(EditorField::Brand, "Brand", &form.brand),
            field_line(EditorField::Model, "Model", &form.model),
            field_line(EditorField::Price, "Price", &form.price),
            field_line(EditorField::MainPhoto, "Main photo", &form.main_photo),
            field_line(EditorField::AddPhotos, "Add photos", &form.add_photos),
            Line::from(""),
        ];
        if let Some(main) = form
            .editor
            .as_ref()
            .and_then(|editor| editor.main_photo().display_uri())
        {
            lines.push(Line::from(Span::styled(
                format!("Main photo → {main}"),
                Style::default().fg(Color::DarkGray),
            )));
        }
        match (form.is_submitting(), form.error.as_ref(), validation) {
            (true, _, _) => lines.push(Line::from(format!("{} Saving…", self.spinner()))),
            (false, Some(error), _) => lines.push(Line::from(Span::styled(
                error.clone(),
                Style::default().fg(Color::Red),
            ))),
            (false, None, Some(Err(err))) => lines.push(Line::from(Span::styled(
                format!("Cannot save yet: {err}"),
                Style::default().fg(Color::Yellow),
            ))),
            _ => lines.push(Line::from(Span::styled(
                "Ready to save (Ctrl-S)",
                Style::default().fg(Color::Green),
            ))),
        }

        let editing = form
            .editor
            .as_ref()
            .map_or(false, |editor| editor.is_editing());
        let title = if editing { "Edit listing" } else { "New listing" };
        let fields = Paragraph::new(lines)
            .block(Block::default().borders(Borders::ALL).title(title))
            .wrap(Wrap { trim: false });
        frame.render_widget(fields, rows[0]);

        let photos: Vec<ListItem> = form
            .editor
            .as_ref()
            .map(|editor| {
                editor
                    .photos()
                    .iter()
                    .enumerate()
                    .map(|(index, entry)| {
                        let label = match entry {
                            PhotoEntry::Persisted(uri) => uri.clone(),
                            PhotoEntry::Pending(pending) => format!(
                                "{} (pending, {})",
                                pending.file_name(),
                                pending.preview_uri()
                            ),
                        };
                        let mut style = Style::default();
                        if form.focus == EditorField::Photos && index == form.photo_cursor {
                            style = style.fg(Color::Black).bg(Color::Cyan);
                        }
                        ListItem::new(Line::from(Span::styled(label, style)))
                    })
                    .collect()
            })
            .unwrap_or_default();
        let photos_title = if form.focus == EditorField::Photos {
            "Additional photos (x: remove)"
        } else {
            "Additional photos"
        };
        let list =
            List::new(photos).block(Block::default().borders(Borders::ALL).title(photos_title));
        frame.render_widget(list, rows[1]);
    }

    fn render_status(&self, frame: &mut Frame, area: Rect) {
        let help = match self.screen {
            Screen::SignIn | Screen::Register => "Esc: quit",
            Screen::Feed => {
                "↑/↓ move · r refresh · m more · n new · e edit · d delete · L sign out · q quit"
            }
            Screen::Editor => "Tab next field · Enter apply · Ctrl-S save · Esc cancel",
        };
        let line = Line::from(vec![
            Span::raw(self.status.clone()),
            Span::raw("  "),
            Span::styled(help, Style::default().fg(Color::DarkGray)),
        ]);
        let paragraph = Paragraph::new(line)
            .block(Block::default().borders(Borders::ALL))
            .alignment(Alignment::Left);
        frame.render_widget(paragraph, area);
    }
}

fn format_price(price: u64) -> String {
    let digits = price.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (index, ch) in digits.chars().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    format!("${grouped}")
}

fn centered_rect(percent_x: u16, height: u16, area: Rect) -> Rect {
    let width = (u32::from(area.width) * u32::from(percent_x) / 100) as u16;
    let height = height.min(area.height);
    Rect {
        x: area.x + (area.width - width) / 2,
        y: area.y + (area.height - height) / 2,
        width,
        height,
    }
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>) -> Result<()> {
    disable_raw_mode().context("failed to disable raw mode")?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)
        .context("failed to leave alternate screen")?;
    terminal.show_cursor()?;
    Ok(())
}

fn spawn_input_thread(sender: mpsc::Sender<AppEvent>) {
    thread::spawn(move || loop {
        match event::poll(TICK_RATE) {
            Ok(true) => match event::read() {
                Ok(evt) => {
                    if sender.blocking_send(AppEvent::Input(evt)).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            },
            Ok(false) => {
                if sender.blocking_send(AppEvent::Tick).is_err() {
                    break;
                }
            }
            Err(_) => break,
        }
    });
}

#[cfg(test)]
mod tests {
    use automania_core::{api::HttpApi, storage::CredentialStore};

    use super::*;

    fn signed_in_app() -> AutomaniaApp {
        let config = AppConfig {
            api_url: "http://127.0.0.1:9".to_string(),
            ..AppConfig::default()
        };
        let credentials = CredentialStore::in_memory();
        let user = User {
            id: "u1".to_string(),
            email: "ada@example.com".to_string(),
            full_name: "Ada Lovelace".to_string(),
            created_at: None,
        };
        credentials.store("secret", &user).unwrap();
        let api: Arc<dyn MarketplaceApi> =
            Arc::new(HttpApi::new(&config, credentials.clone()).unwrap());
        let session = SessionStore::init(credentials, api.clone());
        AutomaniaApp::new(config, session, api)
    }

    fn car(id: &str) -> Listing {
        Listing {
            id: id.to_string(),
            owner_id: Some("u1".to_string()),
            brand: "Volvo".to_string(),
            model: "240".to_string(),
            price: 4500,
            main_photo: "https://img.example.com/main.jpg".to_string(),
            additional_photos: Vec::new(),
            created_at: None,
            updated_at: None,
        }
    }

    fn page_of(ids: &[&str], has_next_page: bool) -> Page<Listing> {
        Page {
            docs: ids.iter().map(|id| car(id)).collect(),
            total_docs: ids.len() as u64,
            limit: 9,
            page: 1,
            total_pages: 1,
            has_next_page,
            has_prev_page: false,
        }
    }

    fn loaded_feed_app() -> AutomaniaApp {
        let mut app = signed_in_app();
        assert_eq!(app.screen, Screen::Feed);
        let ticket = app.feed.begin_load().unwrap();
        app.handle_feed_loaded(ticket, Ok(page_of(&["l0", "l1"], true)));
        assert_eq!(app.feed.len(), 2);
        app
    }

    #[test]
    fn rejected_delete_returns_to_sign_in() {
        let mut app = loaded_feed_app();
        app.deleting.insert("l1".to_string());
        let late = app.feed.begin_load().unwrap();

        app.handle_deleted(
            "l1".to_string(),
            Err(ApiError::Unauthorized { purged: true }),
        );
        assert_eq!(app.screen, Screen::SignIn);
        assert!(app.feed.is_empty());
        assert!(app.editor.is_none());
        assert!(app.deleting.is_empty());
        assert!(app.status.contains("sign in"));

        // A page requested before the redirect is dropped on arrival.
        app.handle_feed_loaded(late, Ok(page_of(&["l2"], false)));
        assert!(app.feed.is_empty());
    }

    #[test]
    fn rejected_page_load_returns_to_sign_in() {
        let mut app = loaded_feed_app();
        let ticket = app.feed.begin_load().unwrap();
        app.handle_feed_loaded(ticket, Err(ApiError::Unauthorized { purged: false }));
        assert_eq!(app.screen, Screen::SignIn);
        assert!(app.feed.is_empty());
        assert!(!app.feed.is_loading());
    }

    #[test]
    fn rejected_submit_closes_editor() {
        let mut app = loaded_feed_app();
        let editor = ListingEditor::from_listing(&car("l0"), app.previews.clone());
        app.editor = Some(EditorForm::new(ListingEditor::new(app.previews.clone())));
        app.screen = Screen::Editor;

        app.handle_submitted(
            editor,
            Err(EditorError::Api(ApiError::Unauthorized { purged: true })),
        );
        assert_eq!(app.screen, Screen::SignIn);
        assert!(app.editor.is_none());
        assert!(app.feed.is_empty());
    }

    #[test]
    fn other_failures_keep_the_feed() {
        let mut app = loaded_feed_app();
        app.handle_deleted(
            "l1".to_string(),
            Err(ApiError::Status {
                status: 500,
                message: "boom".to_string(),
            }),
        );
        assert_eq!(app.screen, Screen::Feed);
        assert_eq!(app.feed.len(), 2);
    }

    #[test]
    fn prices_are_grouped() {
        assert_eq!(format_price(0), "$0");
        assert_eq!(format_price(950), "$950");
        assert_eq!(format_price(4500), "$4,500");
        assert_eq!(format_price(1_234_567), "$1,234,567");
    }

    #[test]
    fn feed_view_reports_last_visible_row() {
        let mut view = FeedView {
            visible_rows: 4,
            ..FeedView::default()
        };
        assert_eq!(view.last_visible(0), None);
        assert_eq!(view.last_visible(2), Some(1));
        assert_eq!(view.last_visible(9), Some(3));

        view.move_cursor(6, 9);
        assert_eq!(view.cursor, 6);
        assert_eq!(view.offset, 3);
        assert_eq!(view.last_visible(9), Some(6));

        view.move_cursor(10, 9);
        assert_eq!(view.last_visible(9), Some(8));
    }

    #[test]
    fn auth_focus_wraps_per_screen() {
        let mut form = AuthForm::new();
        form.cycle(Screen::SignIn, 1);
        assert_eq!(form.focus, AuthField::Password);
        form.cycle(Screen::SignIn, 1);
        assert_eq!(form.focus, AuthField::Email);
        form.cycle(Screen::Register, -1);
        assert_eq!(form.focus, AuthField::Password);
        form.cycle(Screen::Register, -1);
        assert_eq!(form.focus, AuthField::FullName);
    }

    #[test]
    fn editor_form_reads_urls_and_paths() {
        let previews = PreviewRegistry::new();
        let mut form = EditorForm::new(ListingEditor::new(previews.clone()));
        form.add_photos.set("https://a.io/1.jpg, /tmp/car.jpg");
        assert_eq!(form.add_photos(), Ok(2));
        assert!(form.add_photos.value().is_empty());
        assert_eq!(previews.live_count(), 1);

        form.main_photo.set("/tmp/front.jpg");
        form.apply_main_photo().unwrap();
        form.apply_main_photo().unwrap();
        assert_eq!(previews.live_count(), 2);

        form.main_photo.set("not a url://");
        form.apply_main_photo().unwrap();
        form.main_photo.set("https://");
        assert!(form.apply_main_photo().is_err());

        form.photo_cursor = 1;
        assert!(form.remove_selected_photo());
        assert_eq!(form.photo_cursor, 0);
        assert_eq!(previews.live_count(), 1);
    }

    fn photo_labels(form: &EditorForm) -> Vec<String> {
        form.editor
            .as_ref()
            .unwrap()
            .photos()
            .iter()
            .map(|entry| match entry {
                PhotoEntry::Persisted(uri) => uri.clone(),
                PhotoEntry::Pending(pending) => pending.file_name(),
            })
            .collect()
    }

    #[test]
    fn added_photos_keep_typed_order() {
        let mut form = EditorForm::new(ListingEditor::new(PreviewRegistry::new()));
        form.add_photos
            .set("/tmp/first.jpg, https://a.io/second.jpg, /tmp/third.jpg");
        assert_eq!(form.add_photos(), Ok(3));
        assert_eq!(
            photo_labels(&form),
            vec!["first.jpg", "https://a.io/second.jpg", "third.jpg"]
        );

        // One bad URL rejects the whole entry, files included.
        form.add_photos.set("/tmp/fourth.jpg, https://");
        assert!(form.add_photos().is_err());
        assert_eq!(photo_labels(&form).len(), 3);
        assert_eq!(form.add_photos.value(), "/tmp/fourth.jpg, https://");
    }
}
