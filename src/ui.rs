use std::cell::Cell;
use std::io::{self, Stdout};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::Utc;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use ratatui::backend::{Backend, CrosstermBackend};
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, Borders, Clear, Padding, Paragraph, Wrap};
use ratatui::{Frame, Terminal};
use textwrap::{wrap, Options as WrapOptions};
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::gallery::Gallery;
use crate::model::Post;
use crate::notify::{Severity, Toast, ToastLog};
use crate::search::format_time_ago;

const TILE_ROW_HEIGHT: u16 = 5;
const MIN_TILE_WIDTH: u16 = 28;
const TOAST_VISIBLE_SECS: i64 = 4;
const SPINNER_FRAMES: [&str; 4] = ["⠋", "⠙", "⠹", "⠸"];

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
struct Palette {
    bg: Color,
    panel_bg: Color,
    panel_focused_bg: Color,
    border_idle: Color,
    border_focused: Color,
    text_primary: Color,
    text_secondary: Color,
    accent: Color,
    success: Color,
    warning: Color,
    error: Color,
    like: Color,
}

const DARK: Palette = Palette {
    bg: Color::Rgb(30, 30, 46),
    panel_bg: Color::Rgb(24, 24, 36),
    panel_focused_bg: Color::Rgb(49, 50, 68),
    border_idle: Color::Rgb(49, 50, 68),
    border_focused: Color::Rgb(137, 180, 250),
    text_primary: Color::Rgb(205, 214, 244),
    text_secondary: Color::Rgb(166, 173, 200),
    accent: Color::Rgb(137, 180, 250),
    success: Color::Rgb(166, 227, 161),
    warning: Color::Rgb(249, 226, 175),
    error: Color::Rgb(243, 139, 168),
    like: Color::Rgb(243, 139, 168),
};

const LIGHT: Palette = Palette {
    bg: Color::Rgb(239, 241, 245),
    panel_bg: Color::Rgb(230, 233, 239),
    panel_focused_bg: Color::Rgb(204, 208, 218),
    border_idle: Color::Rgb(188, 192, 204),
    border_focused: Color::Rgb(30, 102, 245),
    text_primary: Color::Rgb(76, 79, 105),
    text_secondary: Color::Rgb(108, 111, 133),
    accent: Color::Rgb(30, 102, 245),
    success: Color::Rgb(64, 160, 43),
    warning: Color::Rgb(223, 142, 29),
    error: Color::Rgb(210, 15, 57),
    like: Color::Rgb(210, 15, 57),
};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Theme {
    Dark,
    Light,
}

impl Theme {
    pub fn from_name(name: &str) -> Self {
        if name.trim().eq_ignore_ascii_case("light") {
            Theme::Light
        } else {
            Theme::Dark
        }
    }

    fn toggled(self) -> Self {
        match self {
            Theme::Dark => Theme::Light,
            Theme::Light => Theme::Dark,
        }
    }

    fn palette(self) -> Palette {
        match self {
            Theme::Dark => DARK,
            Theme::Light => LIGHT,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Mode {
    Browse,
    Search,
    Detail,
    Comment,
    Create,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
enum DraftField {
    #[default]
    Caption,
    Description,
    Name,
    Affiliation,
    Department,
    Image,
    Submit,
}

impl DraftField {
    const ORDER: [DraftField; 7] = [
        DraftField::Caption,
        DraftField::Description,
        DraftField::Name,
        DraftField::Affiliation,
        DraftField::Department,
        DraftField::Image,
        DraftField::Submit,
    ];

    fn position(self) -> usize {
        Self::ORDER.iter().position(|f| *f == self).unwrap_or(0)
    }

    fn next(self) -> Self {
        Self::ORDER[(self.position() + 1) % Self::ORDER.len()]
    }

    fn previous(self) -> Self {
        let len = Self::ORDER.len();
        Self::ORDER[(self.position() + len - 1) % len]
    }

    fn title(self) -> &'static str {
        match self {
            DraftField::Caption => "Caption",
            DraftField::Description => "Description",
            DraftField::Name => "Your name",
            DraftField::Affiliation => "College",
            DraftField::Department => "Department",
            DraftField::Image => "Image path",
            DraftField::Submit => "Submit",
        }
    }
}

/// Where a tile sits in the grid, in grid units.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
struct Placement {
    index: usize,
    col: u16,
    row: u16,
    cols: u16,
    rows: u16,
}

/// Places tiles of the given (columns, rows) spans in reading order. The
/// cursor only moves forward, so tiles keep their list order.
fn pack_tiles(spans: &[(u16, u16)], columns: u16) -> Vec<Placement> {
    let columns = columns.max(1);
    let mut occupied: Vec<Vec<bool>> = Vec::new();
    let mut placements = Vec::with_capacity(spans.len());
    let (mut row, mut col) = (0u16, 0u16);

    let fits = |occupied: &Vec<Vec<bool>>, row: u16, col: u16, cols: u16, rows: u16| {
        (row..row + rows).all(|r| {
            (col..col + cols).all(|c| {
                occupied
                    .get(r as usize)
                    .map(|line| !line[c as usize])
                    .unwrap_or(true)
            })
        })
    };

    for (index, &(want_cols, want_rows)) in spans.iter().enumerate() {
        let cols = want_cols.clamp(1, columns);
        let rows = want_rows.max(1);
        loop {
            if col + cols > columns {
                row += 1;
                col = 0;
                continue;
            }
            if fits(&occupied, row, col, cols, rows) {
                break;
            }
            col += 1;
        }
        while occupied.len() < (row + rows) as usize {
            occupied.push(vec![false; columns as usize]);
        }
        for r in row..row + rows {
            for c in col..col + cols {
                occupied[r as usize][c as usize] = true;
            }
        }
        placements.push(Placement {
            index,
            col,
            row,
            cols,
            rows,
        });
        col += cols;
    }
    placements
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let percent_x = percent_x.min(100);
    let percent_y = percent_y.min(100);
    let horizontal = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage(100 - percent_x - (100 - percent_x) / 2),
        ])
        .split(area);
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage(100 - percent_y - (100 - percent_y) / 2),
        ])
        .split(horizontal[1]);
    vertical[1]
}

fn wrap_plain(text: &str, width: usize, style: Style) -> Vec<Line<'static>> {
    wrap_with_prefix(text, width, "", style)
}

fn wrap_with_prefix(text: &str, width: usize, prefix: &str, style: Style) -> Vec<Line<'static>> {
    if text.trim().is_empty() {
        return vec![Line::from(Span::styled(String::new(), style))];
    }
    let wrap_width = width.max(prefix.chars().count() + 1);
    let options = WrapOptions::new(wrap_width)
        .break_words(true)
        .initial_indent(prefix)
        .subsequent_indent(prefix);
    wrap(text, options)
        .into_iter()
        .map(|cow| Line::from(Span::styled(cow.into_owned(), style)))
        .collect()
}

fn truncate_to_width(text: &str, width: usize) -> String {
    if UnicodeWidthStr::width(text) <= width {
        return text.to_string();
    }
    let mut out = String::new();
    let mut used = 0;
    for ch in text.chars() {
        let w = UnicodeWidthChar::width(ch).unwrap_or(0);
        if used + w + 1 > width {
            break;
        }
        out.push(ch);
        used += w;
    }
    out.push('…');
    out
}

fn format_size(bytes: u64) -> String {
    if bytes >= 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else if bytes >= 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{bytes} B")
    }
}

struct Spinner {
    index: usize,
    last_tick: Instant,
}

impl Spinner {
    fn new() -> Self {
        Self {
            index: 0,
            last_tick: Instant::now(),
        }
    }

    fn frame(&self) -> &'static str {
        SPINNER_FRAMES[self.index % SPINNER_FRAMES.len()]
    }

    fn advance(&mut self) -> bool {
        let now = Instant::now();
        if now.duration_since(self.last_tick) >= Duration::from_millis(120) {
            self.index = (self.index + 1) % SPINNER_FRAMES.len();
            self.last_tick = now;
            true
        } else {
            false
        }
    }

    fn reset(&mut self) {
        self.index = 0;
        self.last_tick = Instant::now();
    }
}

pub struct Options {
    pub gallery: Gallery,
    pub toasts: Arc<ToastLog>,
    pub theme: Theme,
    pub tick_rate: Duration,
}

pub struct Model {
    gallery: Gallery,
    toasts: Arc<ToastLog>,
    theme: Theme,
    tick_rate: Duration,
    mode: Mode,
    selected: usize,
    grid_offset: Cell<u16>,
    detail_scroll: u16,
    draft_field: DraftField,
    image_path: String,
    spinner: Spinner,
    needs_redraw: bool,
}

impl Model {
    pub fn new(opts: Options) -> Self {
        Self {
            gallery: opts.gallery,
            toasts: opts.toasts,
            theme: opts.theme,
            tick_rate: opts.tick_rate,
            mode: Mode::Browse,
            selected: 0,
            grid_offset: Cell::new(0),
            detail_scroll: 0,
            draft_field: DraftField::default(),
            image_path: String::new(),
            spinner: Spinner::new(),
            needs_redraw: true,
        }
    }

    pub fn gallery(&self) -> &Gallery {
        &self.gallery
    }

    pub fn gallery_mut(&mut self) -> &mut Gallery {
        &mut self.gallery
    }

    pub fn into_gallery(self) -> Gallery {
        self.gallery
    }

    pub fn run(&mut self) -> Result<()> {
        let mut stdout = io::stdout();
        enable_raw_mode()?;
        stdout.execute(EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;
        terminal.clear()?;

        let result = self.event_loop(&mut terminal);

        disable_raw_mode()?;
        terminal.backend_mut().execute(LeaveAlternateScreen)?;
        terminal.show_cursor()?;

        result
    }

    fn event_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
        self.gallery.mount();
        let mut last_tick = Instant::now();

        loop {
            if self.sync_gallery() {
                self.mark_dirty();
            }

            if self.needs_redraw {
                terminal.draw(|frame| self.draw(frame))?;
                self.needs_redraw = false;
            }

            let timeout = self
                .tick_rate
                .checked_sub(last_tick.elapsed())
                .unwrap_or_else(|| Duration::from_millis(16));

            if event::poll(timeout)? {
                if let Event::Key(key) = event::read()? {
                    if key.kind == KeyEventKind::Press {
                        if self.handle_key(key.code)? {
                            break;
                        }
                        self.mark_dirty();
                    }
                } else {
                    self.mark_dirty();
                }
            }

            if last_tick.elapsed() >= self.tick_rate {
                last_tick = Instant::now();
                if self.gallery.is_loading() || self.gallery.is_submitting() {
                    if self.spinner.advance() {
                        self.mark_dirty();
                    }
                } else {
                    self.spinner.reset();
                }
                if self.visible_toast().is_some() {
                    self.mark_dirty();
                }
            }
        }

        Ok(())
    }

    fn mark_dirty(&mut self) {
        self.needs_redraw = true;
    }

    /// Applies pending gallery events and reconciles view state with them.
    fn sync_gallery(&mut self) -> bool {
        let changed = self.gallery.poll();
        if self.mode == Mode::Create && !self.gallery.is_create_open() {
            self.mode = Mode::Browse;
            self.image_path.clear();
            self.draft_field = DraftField::default();
        }
        self.clamp_selection();
        changed
    }

    fn clamp_selection(&mut self) {
        let count = self.gallery.visible_posts().len();
        if count == 0 {
            self.selected = 0;
        } else if self.selected >= count {
            self.selected = count - 1;
        }
    }

    fn selected_post_id(&self) -> Option<String> {
        self.gallery
            .visible_posts()
            .get(self.selected)
            .map(|post| post.id.clone())
    }

    fn move_selection(&mut self, delta: i64) {
        let count = self.gallery.visible_posts().len() as i64;
        if count == 0 {
            return;
        }
        let next = (self.selected as i64 + delta).clamp(0, count - 1);
        self.selected = next as usize;
    }

    /// Returns true when the application should exit.
    pub fn handle_key(&mut self, code: KeyCode) -> Result<bool> {
        match self.mode {
            Mode::Browse => return Ok(self.handle_browse_key(code)),
            Mode::Search => self.handle_search_key(code),
            Mode::Detail => self.handle_detail_key(code),
            Mode::Comment => self.handle_comment_key(code),
            Mode::Create => self.handle_create_key(code),
        }
        Ok(false)
    }

    fn handle_browse_key(&mut self, code: KeyCode) -> bool {
        match code {
            KeyCode::Char('q') => return true,
            KeyCode::Esc => {
                if !self.gallery.search().is_empty() {
                    self.gallery.set_search("");
                    self.selected = 0;
                }
            }
            KeyCode::Char('j') | KeyCode::Down | KeyCode::Right => self.move_selection(1),
            KeyCode::Char('k') | KeyCode::Up | KeyCode::Left => self.move_selection(-1),
            KeyCode::Char('g') | KeyCode::Home => self.selected = 0,
            KeyCode::Char('G') | KeyCode::End => self.move_selection(i64::MAX / 2),
            KeyCode::Enter => self.open_selected(),
            KeyCode::Char('c') => {
                self.open_selected();
                if self.mode == Mode::Detail {
                    self.mode = Mode::Comment;
                }
            }
            KeyCode::Char('l') => {
                if let Some(id) = self.selected_post_id() {
                    self.gallery.toggle_like(&id);
                }
            }
            KeyCode::Char('b') => {
                if let Some(id) = self.selected_post_id() {
                    self.gallery.toggle_bookmark(&id);
                }
            }
            KeyCode::Char('s') => {
                if let Some(id) = self.selected_post_id() {
                    self.gallery.share(&id);
                }
            }
            KeyCode::Char('n') => {
                self.gallery.open_create();
                self.draft_field = DraftField::default();
                self.mode = Mode::Create;
            }
            KeyCode::Char('/') => self.mode = Mode::Search,
            KeyCode::Char('t') => self.theme = self.theme.toggled(),
            _ => {}
        }
        false
    }

    fn open_selected(&mut self) {
        if let Some(id) = self.selected_post_id() {
            self.gallery.open_post(&id);
            self.gallery.set_comment_input("");
            self.detail_scroll = 0;
            self.mode = Mode::Detail;
        }
    }

    fn handle_search_key(&mut self, code: KeyCode) {
        match code {
            KeyCode::Enter => self.mode = Mode::Browse,
            KeyCode::Esc => {
                self.gallery.set_search("");
                self.mode = Mode::Browse;
            }
            KeyCode::Backspace => {
                self.gallery.search_mut().pop();
            }
            KeyCode::Char(ch) => self.gallery.search_mut().push(ch),
            _ => return,
        }
        self.selected = 0;
    }

    fn handle_detail_key(&mut self, code: KeyCode) {
        let post_id = self.gallery.selected_post_id().map(str::to_string);
        match code {
            KeyCode::Esc | KeyCode::Char('q') => {
                self.gallery.close_post();
                self.mode = Mode::Browse;
            }
            KeyCode::Char('j') | KeyCode::Down => {
                self.detail_scroll = self.detail_scroll.saturating_add(1);
            }
            KeyCode::Char('k') | KeyCode::Up => {
                self.detail_scroll = self.detail_scroll.saturating_sub(1);
            }
            KeyCode::Char('c') | KeyCode::Enter => self.mode = Mode::Comment,
            KeyCode::Char('l') => {
                if let Some(id) = post_id {
                    self.gallery.toggle_like(&id);
                }
            }
            KeyCode::Char('b') => {
                if let Some(id) = post_id {
                    self.gallery.toggle_bookmark(&id);
                }
            }
            KeyCode::Char('s') => {
                if let Some(id) = post_id {
                    self.gallery.share(&id);
                }
            }
            KeyCode::Char('t') => self.theme = self.theme.toggled(),
            _ => {}
        }
    }

    fn handle_comment_key(&mut self, code: KeyCode) {
        match code {
            KeyCode::Esc => self.mode = Mode::Detail,
            KeyCode::Enter => {
                self.gallery.add_comment();
            }
            KeyCode::Backspace => {
                self.gallery.comment_input_mut().pop();
            }
            KeyCode::Char(ch) => self.gallery.comment_input_mut().push(ch),
            _ => {}
        }
    }

    fn handle_create_key(&mut self, code: KeyCode) {
        match code {
            KeyCode::Esc => {
                self.gallery.close_create();
                self.mode = Mode::Browse;
            }
            KeyCode::Tab | KeyCode::Down => self.draft_field = self.draft_field.next(),
            KeyCode::BackTab | KeyCode::Up => self.draft_field = self.draft_field.previous(),
            KeyCode::Left if self.draft_field == DraftField::Department => {
                self.gallery.draft_mut().cycle_department(false);
            }
            KeyCode::Right if self.draft_field == DraftField::Department => {
                self.gallery.draft_mut().cycle_department(true);
            }
            KeyCode::Delete if self.draft_field == DraftField::Image => {
                self.gallery.clear_image();
                self.image_path.clear();
            }
            KeyCode::Enter => match self.draft_field {
                DraftField::Image => {
                    let path = self.image_path.trim().to_string();
                    if path.is_empty() {
                        self.draft_field = self.draft_field.next();
                    } else {
                        self.gallery.select_image(std::path::Path::new(&path));
                    }
                }
                DraftField::Submit => {
                    self.gallery.submit_post();
                }
                _ => self.draft_field = self.draft_field.next(),
            },
            KeyCode::Backspace => {
                if let Some(value) = self.active_draft_value() {
                    value.pop();
                }
            }
            KeyCode::Char(ch) => {
                if let Some(value) = self.active_draft_value() {
                    value.push(ch);
                }
            }
            _ => {}
        }
    }

    fn active_draft_value(&mut self) -> Option<&mut String> {
        match self.draft_field {
            DraftField::Caption => Some(&mut self.gallery.draft_mut().caption),
            DraftField::Description => Some(&mut self.gallery.draft_mut().description),
            DraftField::Name => Some(&mut self.gallery.draft_mut().author_name),
            DraftField::Affiliation => Some(&mut self.gallery.draft_mut().affiliation),
            DraftField::Image => Some(&mut self.image_path),
            DraftField::Department | DraftField::Submit => None,
        }
    }

    fn visible_toast(&self) -> Option<Toast> {
        self.toasts.latest().filter(|toast| {
            Utc::now().signed_duration_since(toast.at) < chrono::Duration::seconds(TOAST_VISIBLE_SECS)
        })
    }

    pub fn draw(&mut self, frame: &mut Frame<'_>) {
        let palette = self.theme.palette();
        let full = frame.size();
        frame.render_widget(Block::default().style(Style::default().bg(palette.bg)), full);

        let layout = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3),
                Constraint::Min(0),
                Constraint::Length(1),
            ])
            .split(full);

        self.draw_header(frame, layout[0], &palette);
        self.draw_grid(frame, layout[1], &palette);
        self.draw_status(frame, layout[2], &palette);

        match self.mode {
            Mode::Detail | Mode::Comment => self.draw_detail(frame, layout[1], &palette),
            Mode::Create => self.draw_create(frame, layout[1], &palette),
            Mode::Browse | Mode::Search => {}
        }
    }

    fn draw_header(&self, frame: &mut Frame<'_>, area: Rect, palette: &Palette) {
        let searching = self.mode == Mode::Search;
        let border = if searching {
            palette.border_focused
        } else {
            palette.border_idle
        };
        let block = Block::default()
            .title(Span::styled(
                " Medical Gallery ",
                Style::default()
                    .fg(palette.accent)
                    .add_modifier(Modifier::BOLD),
            ))
            .borders(Borders::ALL)
            .border_style(Style::default().fg(border))
            .style(Style::default().bg(palette.panel_bg));

        let term = self.gallery.search();
        let mut spans = vec![Span::styled(
            "Search: ",
            Style::default().fg(palette.text_secondary),
        )];
        if term.is_empty() && !searching {
            spans.push(Span::styled(
                "press / to search posts, doctors, departments",
                Style::default()
                    .fg(palette.text_secondary)
                    .add_modifier(Modifier::ITALIC),
            ));
        } else {
            spans.push(Span::styled(
                term.to_string(),
                Style::default().fg(palette.text_primary),
            ));
            if searching {
                spans.push(Span::styled("▏", Style::default().fg(palette.accent)));
            }
        }
        spans.push(Span::styled(
            format!(
                "   {} of {} posts",
                self.gallery.visible_posts().len(),
                self.gallery.post_count()
            ),
            Style::default().fg(palette.text_secondary),
        ));

        frame.render_widget(Paragraph::new(Line::from(spans)).block(block), area);
    }

    fn draw_grid(&self, frame: &mut Frame<'_>, area: Rect, palette: &Palette) {
        let posts = self.gallery.visible_posts();
        if posts.is_empty() {
            let message = if self.gallery.is_loading() {
                format!("{} Loading medical moments…", self.spinner.frame())
            } else {
                "No posts found".to_string()
            };
            let paragraph = Paragraph::new(message)
                .style(Style::default().fg(palette.text_secondary))
                .alignment(Alignment::Center);
            let middle = Rect {
                y: area.y + area.height / 2,
                height: 1.min(area.height),
                ..area
            };
            frame.render_widget(paragraph, middle);
            return;
        }

        let columns = (area.width / MIN_TILE_WIDTH).max(1);
        let spans: Vec<(u16, u16)> = posts.iter().map(|p| p.grid_size.span()).collect();
        let placements = pack_tiles(&spans, columns);
        let visible_rows = (area.height / TILE_ROW_HEIGHT).max(1);

        let mut offset = self.grid_offset.get();
        if let Some(selected) = placements.get(self.selected) {
            if selected.row < offset {
                offset = selected.row;
            } else if selected.row + selected.rows > offset + visible_rows {
                offset = (selected.row + selected.rows).saturating_sub(visible_rows);
            }
        }
        self.grid_offset.set(offset);

        let unit_width = area.width / columns;
        let now = Utc::now();
        let user_id = self.gallery.current_user_id();
        for placement in &placements {
            if placement.row < offset || placement.row >= offset + visible_rows {
                continue;
            }
            let x = area.x + placement.col * unit_width;
            let y = area.y + (placement.row - offset) * TILE_ROW_HEIGHT;
            let width = if placement.col + placement.cols == columns {
                area.x + area.width - x
            } else {
                unit_width * placement.cols
            };
            let height = (placement.rows * TILE_ROW_HEIGHT).min(area.y + area.height - y);
            let rect = Rect {
                x,
                y,
                width,
                height,
            };
            let post = &posts[placement.index];
            let focused = placement.index == self.selected;
            self.draw_tile(frame, rect, post, focused, &user_id, now, palette);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn draw_tile(
        &self,
        frame: &mut Frame<'_>,
        area: Rect,
        post: &Post,
        focused: bool,
        user_id: &str,
        now: chrono::DateTime<Utc>,
        palette: &Palette,
    ) {
        let border_style = if focused {
            Style::default().fg(palette.border_focused)
        } else {
            Style::default().fg(palette.border_idle)
        };
        let bg = if focused {
            palette.panel_focused_bg
        } else {
            palette.panel_bg
        };
        let inner_width = area.width.saturating_sub(2) as usize;
        let title = truncate_to_width(&post.caption, inner_width.saturating_sub(2));
        let block = Block::default()
            .title(Span::styled(
                format!(" {title} "),
                Style::default()
                    .fg(palette.text_primary)
                    .add_modifier(Modifier::BOLD),
            ))
            .borders(Borders::ALL)
            .border_style(border_style)
            .style(Style::default().bg(bg));

        let liked = post.is_liked_by(user_id);
        let bookmarked = post.is_bookmarked_by(user_id);
        let mut author = post.author.name.clone();
        if post.author.verified {
            author.push_str(" ✓");
        }
        let mut lines = vec![
            Line::from(Span::styled(
                truncate_to_width(&author, inner_width),
                Style::default().fg(palette.accent),
            )),
            Line::from(Span::styled(
                truncate_to_width(&post.author.department, inner_width),
                Style::default().fg(palette.text_secondary),
            )),
        ];
        let mut stats = vec![
            Span::styled(
                if liked { "♥ " } else { "♡ " },
                Style::default().fg(if liked {
                    palette.like
                } else {
                    palette.text_secondary
                }),
            ),
            Span::styled(
                format!("{}  ✉ {}", post.like_count, post.comments.len()),
                Style::default().fg(palette.text_primary),
            ),
        ];
        if bookmarked {
            stats.push(Span::styled("  ★", Style::default().fg(palette.warning)));
        }
        lines.push(Line::from(stats));
        if area.height > TILE_ROW_HEIGHT {
            lines.push(Line::from(Span::styled(
                format_time_ago(post.created_at, now),
                Style::default().fg(palette.text_secondary),
            )));
            lines.extend(wrap_plain(
                &post.description,
                inner_width,
                Style::default().fg(palette.text_secondary),
            ));
        }

        frame.render_widget(Paragraph::new(Text::from(lines)).block(block), area);
    }

    fn draw_detail(&self, frame: &mut Frame<'_>, area: Rect, palette: &Palette) {
        let popup = centered_rect(80, 90, area);
        frame.render_widget(Clear, popup);

        let block = Block::default()
            .title(Span::styled(
                " Post ",
                Style::default()
                    .fg(palette.accent)
                    .add_modifier(Modifier::BOLD),
            ))
            .borders(Borders::ALL)
            .border_style(Style::default().fg(palette.border_focused))
            .style(Style::default().bg(palette.panel_bg))
            .padding(Padding::horizontal(1));
        let inner = block.inner(popup);
        frame.render_widget(block, popup);

        let Some(post) = self.gallery.selected_post() else {
            frame.render_widget(
                Paragraph::new("This post is no longer available.")
                    .style(Style::default().fg(palette.text_secondary)),
                inner,
            );
            return;
        };

        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(0), Constraint::Length(3)])
            .split(inner);

        let width = chunks[0].width as usize;
        let now = Utc::now();
        let primary = Style::default().fg(palette.text_primary);
        let secondary = Style::default().fg(palette.text_secondary);

        let mut author = post.author.name.clone();
        if post.author.verified {
            author.push_str(" ✓");
        }
        let mut lines = vec![
            Line::from(Span::styled(
                author,
                Style::default()
                    .fg(palette.accent)
                    .add_modifier(Modifier::BOLD),
            )),
            Line::from(Span::styled(
                format!(
                    "{} · {} · {}",
                    post.author.affiliation,
                    post.author.department,
                    format_time_ago(post.created_at, now)
                ),
                secondary,
            )),
            Line::from(Span::styled(format!("[image] {}", post.image_url), secondary)),
            Line::default(),
        ];
        lines.extend(wrap_plain(
            &post.caption,
            width,
            primary.add_modifier(Modifier::BOLD),
        ));
        if !post.description.trim().is_empty() {
            lines.extend(wrap_plain(&post.description, width, primary));
        }
        lines.push(Line::default());

        let liked = self.gallery.is_liked(&post);
        let bookmarked = self.gallery.is_bookmarked(&post);
        lines.push(Line::from(vec![
            Span::styled(
                if liked { "♥ " } else { "♡ " },
                Style::default().fg(if liked { palette.like } else { palette.text_secondary }),
            ),
            Span::styled(format!("{} likes", post.like_count), primary),
            Span::styled(
                if bookmarked { "   ★ saved" } else { "   ☆ save" },
                Style::default().fg(palette.warning),
            ),
        ]));
        lines.push(Line::default());
        lines.push(Line::from(Span::styled(
            format!("Comments ({})", post.comments.len()),
            Style::default()
                .fg(palette.accent)
                .add_modifier(Modifier::BOLD),
        )));
        if post.comments.is_empty() {
            lines.push(Line::from(Span::styled(
                "No comments yet. Be the first to comment!",
                secondary.add_modifier(Modifier::ITALIC),
            )));
        }
        for comment in &post.comments {
            lines.push(Line::from(vec![
                Span::styled(
                    comment.author.clone(),
                    primary.add_modifier(Modifier::BOLD),
                ),
                Span::styled(
                    format!(" · {}", format_time_ago(Some(comment.created_at), now)),
                    secondary,
                ),
            ]));
            lines.extend(wrap_with_prefix(&comment.text, width, "  ", primary));
        }

        frame.render_widget(
            Paragraph::new(Text::from(lines))
                .wrap(Wrap { trim: false })
                .scroll((self.detail_scroll, 0)),
            chunks[0],
        );

        let commenting = self.mode == Mode::Comment;
        let input_block = Block::default()
            .title(Span::styled(" Add a comment ", secondary))
            .borders(Borders::ALL)
            .border_style(Style::default().fg(if commenting {
                palette.border_focused
            } else {
                palette.border_idle
            }));
        let mut input = vec![Span::styled(self.gallery.comment_input().to_string(), primary)];
        if commenting {
            input.push(Span::styled("▏", Style::default().fg(palette.accent)));
        }
        frame.render_widget(
            Paragraph::new(Line::from(input)).block(input_block),
            chunks[1],
        );
    }

    fn draw_create(&self, frame: &mut Frame<'_>, area: Rect, palette: &Palette) {
        let popup = centered_rect(70, 85, area);
        frame.render_widget(Clear, popup);
        let block = Block::default()
            .title(Span::styled(
                " Share a medical moment ",
                Style::default()
                    .fg(palette.accent)
                    .add_modifier(Modifier::BOLD),
            ))
            .borders(Borders::ALL)
            .border_style(Style::default().fg(palette.border_focused))
            .style(Style::default().bg(palette.panel_bg))
            .padding(Padding::uniform(1));
        let inner = block.inner(popup);
        frame.render_widget(block, popup);

        let draft = self.gallery.draft();
        let mut lines = Vec::new();
        for field in DraftField::ORDER {
            let focused = field == self.draft_field;
            let label_style = if focused {
                Style::default()
                    .fg(palette.accent)
                    .add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(palette.text_secondary)
            };
            let value_style = if focused {
                Style::default()
                    .fg(palette.text_primary)
                    .bg(palette.panel_focused_bg)
            } else {
                Style::default().fg(palette.text_primary)
            };
            let value = match field {
                DraftField::Caption => draft.caption.clone(),
                DraftField::Description => draft.description.clone(),
                DraftField::Name => draft.author_name.clone(),
                DraftField::Affiliation => draft.affiliation.clone(),
                DraftField::Department => {
                    if draft.department.is_empty() {
                        "< select with ←/→ >".to_string()
                    } else {
                        format!("< {} >", draft.department)
                    }
                }
                DraftField::Image => self.image_path.clone(),
                DraftField::Submit => {
                    if self.gallery.is_submitting() {
                        format!("{} Sharing…", self.spinner.frame())
                    } else {
                        "[ Share post ]".to_string()
                    }
                }
            };
            let required = matches!(
                field,
                DraftField::Caption | DraftField::Name | DraftField::Department
            );
            let label = if required {
                format!("{} *", field.title())
            } else {
                field.title().to_string()
            };
            lines.push(Line::from(vec![
                Span::styled(format!("{label:<14}"), label_style),
                Span::styled(value, value_style),
            ]));
            if field == DraftField::Image {
                let note = match &draft.image {
                    Some(image) => format!(
                        "{:14}{} ({}, {})",
                        "",
                        image.name,
                        image.content_type,
                        format_size(image.size())
                    ),
                    None => format!("{:14}optional, Enter to attach", ""),
                };
                lines.push(Line::from(Span::styled(
                    note,
                    Style::default().fg(palette.text_secondary),
                )));
            }
            lines.push(Line::default());
        }
        frame.render_widget(
            Paragraph::new(Text::from(lines)).wrap(Wrap { trim: false }),
            inner,
        );
    }

    fn draw_status(&self, frame: &mut Frame<'_>, area: Rect, palette: &Palette) {
        let (text, style) = match self.visible_toast() {
            Some(toast) => {
                let color = match toast.severity {
                    Severity::Info => palette.success,
                    Severity::Warning => palette.warning,
                    Severity::Error => palette.error,
                };
                (
                    status_text(&toast),
                    Style::default()
                        .fg(color)
                        .bg(palette.panel_focused_bg)
                        .add_modifier(Modifier::BOLD),
                )
            }
            None => (
                self.footer_text(),
                Style::default()
                    .fg(palette.text_secondary)
                    .bg(palette.panel_bg)
                    .add_modifier(Modifier::ITALIC),
            ),
        };
        frame.render_widget(
            Paragraph::new(text)
                .style(style)
                .alignment(Alignment::Center),
            area,
        );
    }

    fn footer_text(&self) -> String {
        let parts: &[&str] = match self.mode {
            Mode::Browse => &[
                "j/k move",
                "Enter open",
                "l like",
                "b bookmark",
                "s share",
                "c comment",
                "n new post",
                "/ search",
                "t theme",
                "q quit",
            ],
            Mode::Search => &["type to filter", "Enter keep", "Esc clear"],
            Mode::Detail => &[
                "l like",
                "b bookmark",
                "s share",
                "c comment",
                "j/k scroll",
                "Esc close",
            ],
            Mode::Comment => &["Enter post comment", "Esc back"],
            Mode::Create => &[
                "Tab/Shift-Tab field",
                "←/→ department",
                "Enter attach/submit",
                "Del drop image",
                "Esc cancel",
            ],
        };
        parts.join(" · ")
    }
}

fn status_text(toast: &Toast) -> String {
    if toast.description.is_empty() {
        toast.title.clone()
    } else {
        format!("{}: {}", toast.title, toast.description)
    }
}

/// Renders one frame into any backend; used by tests with `TestBackend`.
pub fn render<B: Backend>(model: &mut Model, terminal: &mut Terminal<B>) -> Result<()> {
    terminal.draw(|frame| model.draw(frame))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GalleryConfig;
    use crate::data::{
        DocumentStore, FieldUpdate, MemoryBlobStore, MemoryClipboard, MemoryDocumentStore,
    };
    use crate::gallery::Services;
    use crate::session::{Identity, Session};
    use ratatui::backend::TestBackend;
    use serde_json::json;

    fn model_with_posts(captions: &[&str]) -> (Model, Arc<MemoryDocumentStore>) {
        let store = Arc::new(MemoryDocumentStore::new());
        for (i, caption) in captions.iter().enumerate() {
            store
                .create_document(
                    "posts",
                    vec![
                        FieldUpdate::set(
                            "user",
                            json!({"name": "Dr. Mehta", "department": "Radiology", "verified": true}),
                        ),
                        FieldUpdate::set("image", json!("https://img.example/x.jpg")),
                        FieldUpdate::set("caption", json!(caption)),
                        FieldUpdate::set("gridSize", json!("small")),
                        FieldUpdate::set("createdAt", json!(1_000 + i as i64)),
                    ],
                )
                .unwrap();
        }
        let toasts = Arc::new(ToastLog::new());
        let services = Services {
            store: store.clone(),
            blobs: Arc::new(MemoryBlobStore::new()),
            notifier: toasts.clone(),
            clipboard: Arc::new(MemoryClipboard::new()),
            identity: Arc::new(Session::new(Identity::new("current-user", "You", ""))),
        };
        let mut gallery = Gallery::new(services, GalleryConfig::default());
        gallery.mount();
        gallery.poll();
        let model = Model::new(Options {
            gallery,
            toasts,
            theme: Theme::Dark,
            tick_rate: Duration::from_millis(100),
        });
        (model, store)
    }

    fn screen(model: &mut Model) -> String {
        let mut terminal = Terminal::new(TestBackend::new(100, 30)).unwrap();
        render(model, &mut terminal).unwrap();
        terminal
            .backend()
            .buffer()
            .content
            .iter()
            .map(|cell| cell.symbol())
            .collect()
    }

    #[test]
    fn packs_tiles_in_reading_order() {
        let placements = pack_tiles(&[(2, 2), (1, 1), (1, 1), (1, 2)], 3);
        let cells: Vec<(u16, u16)> = placements.iter().map(|p| (p.row, p.col)).collect();
        assert_eq!(cells, vec![(0, 0), (0, 2), (1, 2), (2, 0)]);
    }

    #[test]
    fn wide_tiles_shrink_to_narrow_grids() {
        let placements = pack_tiles(&[(2, 2), (1, 1)], 1);
        assert_eq!(placements[0].cols, 1);
        assert_eq!((placements[1].row, placements[1].col), (2, 0));
    }

    #[test]
    fn draft_fields_cycle() {
        assert_eq!(DraftField::Caption.previous(), DraftField::Submit);
        assert_eq!(DraftField::Submit.next(), DraftField::Caption);
        assert_eq!(DraftField::Department.next(), DraftField::Image);
    }

    #[test]
    fn truncates_long_titles() {
        assert_eq!(truncate_to_width("short", 10), "short");
        assert_eq!(truncate_to_width("abcdefghij", 5), "abcd…");
    }

    #[test]
    fn renders_tiles_and_empty_state() {
        let (mut model, _) = model_with_posts(&["Echo case", "MRI review"]);
        let text = screen(&mut model);
        assert!(text.contains("Echo case"));
        assert!(text.contains("MRI review"));
        assert!(text.contains("Medical Gallery"));

        model.gallery_mut().set_search("nothing matches");
        let text = screen(&mut model);
        assert!(text.contains("No posts found"));
    }

    #[test]
    fn search_keys_edit_term() {
        let (mut model, _) = model_with_posts(&["Echo case", "MRI review"]);
        model.handle_key(KeyCode::Char('/')).unwrap();
        for ch in "mri".chars() {
            model.handle_key(KeyCode::Char(ch)).unwrap();
        }
        model.handle_key(KeyCode::Enter).unwrap();
        assert_eq!(model.gallery().search(), "mri");
        assert_eq!(model.gallery().visible_posts().len(), 1);
        assert!(model.handle_key(KeyCode::Char('q')).unwrap());
    }

    #[test]
    fn detail_overlay_shows_selected_post() {
        let (mut model, _) = model_with_posts(&["Echo case"]);
        model.handle_key(KeyCode::Enter).unwrap();
        assert!(model.gallery().selected_post().is_some());
        let text = screen(&mut model);
        assert!(text.contains("No comments yet"));
        model.handle_key(KeyCode::Esc).unwrap();
        assert!(model.gallery().selected_post().is_none());
    }

    #[test]
    fn create_form_collects_draft() {
        let (mut model, _) = model_with_posts(&[]);
        model.handle_key(KeyCode::Char('n')).unwrap();
        assert!(model.gallery().is_create_open());
        for ch in "Rare rash".chars() {
            model.handle_key(KeyCode::Char(ch)).unwrap();
        }
        model.handle_key(KeyCode::Tab).unwrap();
        model.handle_key(KeyCode::Tab).unwrap();
        model.handle_key(KeyCode::Char('Z')).unwrap();
        model.handle_key(KeyCode::Tab).unwrap();
        model.handle_key(KeyCode::Tab).unwrap();
        model.handle_key(KeyCode::Right).unwrap();

        let draft = model.gallery().draft();
        assert_eq!(draft.caption, "Rare rash");
        assert_eq!(draft.author_name, "Z");
        assert_eq!(draft.department, "Cardiology");
        assert!(screen(&mut model).contains("Share a medical moment"));

        model.handle_key(KeyCode::Esc).unwrap();
        assert!(!model.gallery().is_create_open());
    }

    #[test]
    fn theme_names() {
        assert_eq!(Theme::from_name("Light"), Theme::Light);
        assert_eq!(Theme::from_name("dark"), Theme::Dark);
        assert_eq!(Theme::from_name("unknown"), Theme::Dark);
        assert_eq!(Theme::Dark.toggled(), Theme::Light);
    }
}
