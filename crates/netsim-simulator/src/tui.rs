use std::{
    io,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use crate::storage::UserStorage;
use crate::store::SimulationStore;
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use netsim_abstract::{
    CongestionAlgorithm, CongestionBand, EventKind, NewUser, TrafficType, UserPatch,
};
use ratatui::{
    prelude::*,
    widgets::{
        Axis, Block, Borders, Chart, Clear, Dataset, GraphType, List, ListItem, Paragraph, Row,
        Table, TableState,
    },
};

const LOG_LINES_KEPT: usize = 1000;

/// A tracing writer that keeps recent output in memory so it does not
/// scribble over the dashboard.
#[derive(Clone)]
pub struct MemoryLogBuffer {
    logs: Arc<Mutex<Vec<String>>>,
}

impl Default for MemoryLogBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLogBuffer {
    pub fn new() -> Self {
        Self {
            logs: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn push(&self, msg: String) {
        let mut logs = self.logs.lock().unwrap_or_else(|e| e.into_inner());
        logs.push(msg);
        if logs.len() > LOG_LINES_KEPT {
            logs.remove(0);
        }
    }

    pub fn last_line(&self) -> Option<String> {
        self.logs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .last()
            .cloned()
    }
}

impl io::Write for MemoryLogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let s = String::from_utf8_lossy(buf);
        let line = s.trim();
        if !line.is_empty() {
            self.push(line.to_string());
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FormField {
    Name,
    Traffic,
    Rate,
}

#[derive(Debug, Clone)]
struct AddUserForm {
    name: String,
    traffic_type: TrafficType,
    rate: String,
    field: FormField,
}

impl Default for AddUserForm {
    fn default() -> Self {
        Self {
            name: String::new(),
            traffic_type: TrafficType::VideoStream,
            rate: String::new(),
            field: FormField::Name,
        }
    }
}

#[derive(Debug, Clone)]
enum InputMode {
    Normal,
    AddUser(AddUserForm),
    EditRate { id: String, buffer: String },
}

pub struct TuiApp<S: UserStorage> {
    store: SimulationStore<S>,
    log_buffer: Option<MemoryLogBuffer>,
    mode: InputMode,
    /// Row selected in the user table
    selected: usize,
    status: Option<String>,
}

impl<S: UserStorage> TuiApp<S> {
    pub fn new(store: SimulationStore<S>, log_buffer: Option<MemoryLogBuffer>) -> Self {
        Self {
            store,
            log_buffer,
            mode: InputMode::Normal,
            selected: 0,
            status: None,
        }
    }

    pub fn store(&self) -> &SimulationStore<S> {
        &self.store
    }

    pub fn into_store(self) -> SimulationStore<S> {
        self.store
    }

    pub fn run(&mut self) -> anyhow::Result<()> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;

        let result = self.event_loop(&mut terminal);

        // Restore terminal
        disable_raw_mode()?;
        execute!(
            terminal.backend_mut(),
            LeaveAlternateScreen,
            DisableMouseCapture
        )?;
        terminal.show_cursor()?;

        // A running timer must not outlive the dashboard.
        self.store.pause();
        result
    }

    fn event_loop<B: Backend>(&mut self, terminal: &mut Terminal<B>) -> anyhow::Result<()> {
        let frame_rate = Duration::from_millis(100);

        loop {
            terminal.draw(|f| self.ui(f))?;

            let timeout = self
                .store
                .next_due()
                .map(|due| due.saturating_duration_since(Instant::now()))
                .unwrap_or(frame_rate)
                .min(frame_rate);

            if crossterm::event::poll(timeout)?
                && let Event::Key(key) = event::read()?
                && key.kind == KeyEventKind::Press
                && self.handle_key(key.code, Instant::now())
            {
                break;
            }

            self.store.poll(Instant::now());
        }
        Ok(())
    }

    /// Applies one key press. Returns true when the user asked to quit.
    pub fn handle_key(&mut self, code: KeyCode, now: Instant) -> bool {
        let mode = std::mem::replace(&mut self.mode, InputMode::Normal);
        self.mode = match mode {
            InputMode::Normal => return self.handle_normal_key(code, now),
            InputMode::AddUser(form) => self.handle_form_key(form, code),
            InputMode::EditRate { id, buffer } => self.handle_edit_key(id, buffer, code),
        };
        false
    }

    fn handle_normal_key(&mut self, code: KeyCode, now: Instant) -> bool {
        self.status = None;
        match code {
            KeyCode::Char('q') => return true,
            KeyCode::Char(' ') => {
                if self.store.is_running() {
                    self.store.pause();
                } else {
                    self.store.start(now);
                }
            }
            KeyCode::Char('r') => {
                self.store.reset();
                self.selected = 0;
            }
            KeyCode::Char('g') => self.store.set_algorithm(self.store.algorithm().next()),
            KeyCode::Char(c @ '1'..='3') => {
                let index = c as usize - '1' as usize;
                self.store.set_algorithm(CongestionAlgorithm::ALL[index]);
            }
            KeyCode::Up => self.selected = self.selected.saturating_sub(1),
            KeyCode::Down => {
                let last = self.store.users().len().saturating_sub(1);
                self.selected = (self.selected + 1).min(last);
            }
            KeyCode::Char('a') => self.mode = InputMode::AddUser(AddUserForm::default()),
            KeyCode::Char('e') => {
                if let Some(user) = self.store.users().get(self.selected) {
                    self.mode = InputMode::EditRate {
                        id: user.id.clone(),
                        buffer: user.sending_rate.to_string(),
                    };
                }
            }
            KeyCode::Char('d') | KeyCode::Delete => {
                if let Some(id) = self.store.users().get(self.selected).map(|u| u.id.clone()) {
                    self.store.remove_user(&id);
                    let last = self.store.users().len().saturating_sub(1);
                    self.selected = self.selected.min(last);
                }
            }
            _ => {}
        }
        false
    }

    fn handle_form_key(&mut self, mut form: AddUserForm, code: KeyCode) -> InputMode {
        match code {
            KeyCode::Esc => return InputMode::Normal,
            KeyCode::Tab | KeyCode::Down => {
                form.field = match form.field {
                    FormField::Name => FormField::Traffic,
                    FormField::Traffic => FormField::Rate,
                    FormField::Rate => FormField::Name,
                };
            }
            KeyCode::BackTab | KeyCode::Up => {
                form.field = match form.field {
                    FormField::Name => FormField::Rate,
                    FormField::Traffic => FormField::Name,
                    FormField::Rate => FormField::Traffic,
                };
            }
            KeyCode::Left if form.field == FormField::Traffic => {
                form.traffic_type = form.traffic_type.prev();
            }
            KeyCode::Right if form.field == FormField::Traffic => {
                form.traffic_type = form.traffic_type.next();
            }
            KeyCode::Backspace => match form.field {
                FormField::Name => {
                    form.name.pop();
                }
                FormField::Rate => {
                    form.rate.pop();
                }
                FormField::Traffic => {}
            },
            KeyCode::Char(c) => match form.field {
                FormField::Name => form.name.push(c),
                FormField::Rate if c.is_ascii_digit() || c == '.' => form.rate.push(c),
                _ => {}
            },
            KeyCode::Enter => return self.submit_form(form),
            _ => {}
        }
        InputMode::AddUser(form)
    }

    fn submit_form(&mut self, form: AddUserForm) -> InputMode {
        let sending_rate = match form.rate.trim() {
            "" => None,
            raw => match raw.parse::<f64>() {
                Ok(rate) => Some(rate),
                Err(_) => {
                    self.status = Some(format!("'{raw}' is not a number"));
                    return InputMode::AddUser(form);
                }
            },
        };
        let request = NewUser {
            name: Some(form.name.clone()),
            traffic_type: Some(form.traffic_type),
            sending_rate,
        };
        match self.store.add_user(request) {
            Ok(_) => {
                self.status = None;
                self.selected = self.store.users().len().saturating_sub(1);
                InputMode::Normal
            }
            Err(err) => {
                self.status = Some(err.to_string());
                InputMode::AddUser(form)
            }
        }
    }

    fn handle_edit_key(&mut self, id: String, mut buffer: String, code: KeyCode) -> InputMode {
        match code {
            KeyCode::Esc => return InputMode::Normal,
            KeyCode::Backspace => {
                buffer.pop();
            }
            KeyCode::Char(c) if c.is_ascii_digit() || c == '.' => buffer.push(c),
            KeyCode::Enter => {
                let patch = match buffer.trim().parse::<f64>() {
                    Ok(rate) => UserPatch {
                        sending_rate: Some(rate),
                        ..Default::default()
                    },
                    Err(_) => {
                        self.status = Some(format!("'{buffer}' is not a number"));
                        return InputMode::EditRate { id, buffer };
                    }
                };
                return match self.store.update_user(&id, patch) {
                    Ok(()) => {
                        self.status = None;
                        InputMode::Normal
                    }
                    Err(err) => {
                        self.status = Some(err.to_string());
                        InputMode::EditRate { id, buffer }
                    }
                };
            }
            _ => {}
        }
        InputMode::EditRate { id, buffer }
    }

    fn ui(&self, f: &mut Frame) {
        let rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3),  // Control bar
                Constraint::Min(10),    // Topology + chart
                Constraint::Length(12), // Users + event log
            ])
            .split(f.area());

        self.render_control(f, rows[0]);

        let mid = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(40), Constraint::Percentage(60)])
            .split(rows[1]);
        self.render_topology(f, mid[0]);
        self.render_chart(f, mid[1]);

        let bottom = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
            .split(rows[2]);
        self.render_users(f, bottom[0]);
        self.render_event_log(f, bottom[1]);

        match &self.mode {
            InputMode::AddUser(form) => self.render_add_form(f, form),
            InputMode::EditRate { buffer, .. } => self.render_edit_rate(f, buffer),
            InputMode::Normal => {}
        }
    }

    fn render_control(&self, f: &mut Frame, area: Rect) {
        let state = if self.store.is_running() {
            Span::styled("RUNNING", Style::default().fg(Color::Green))
        } else {
            Span::styled("PAUSED", Style::default().fg(Color::Yellow))
        };
        let mut spans = vec![
            Span::raw("Status: "),
            state,
            Span::raw(format!(
                " | Algorithm: {} | Ticks: {} | Users: {} | (space)start/pause (r)eset (g/1-3)algorithm (a)dd (e)dit (d)elete (q)uit",
                self.store.algorithm(),
                self.store.ticks(),
                self.store.users().len(),
            )),
        ];
        if let Some(status) = &self.status {
            spans.push(Span::styled(
                format!(" | {status}"),
                Style::default().fg(Color::Red),
            ));
        }

        let title = match self.log_buffer.as_ref().and_then(MemoryLogBuffer::last_line) {
            Some(line) => format!("Control | {line}"),
            None => "Control".to_string(),
        };
        let block = Paragraph::new(Line::from(spans))
            .block(Block::default().borders(Borders::ALL).title(title));
        f.render_widget(block, area);
    }

    fn render_topology(&self, f: &mut Frame, area: Rect) {
        let bar_width = (area.width as usize).saturating_sub(24).clamp(4, 40);
        let items: Vec<ListItem> = self
            .store
            .nodes()
            .iter()
            .map(|node| {
                let filled = (node.congestion_level * bar_width as f64).round() as usize;
                let color = band_color(node.band());
                ListItem::new(Line::from(vec![
                    Span::raw(format!("{:<10} ", node.display_name())),
                    Span::styled("█".repeat(filled), Style::default().fg(color)),
                    Span::styled(
                        "░".repeat(bar_width.saturating_sub(filled)),
                        Style::default().fg(Color::DarkGray),
                    ),
                    Span::raw(format!(" {:>3.0}%", node.congestion_level * 100.0)),
                ]))
            })
            .collect();

        let list = List::new(items).block(
            Block::default()
                .borders(Borders::ALL)
                .title("Network Topology"),
        );
        f.render_widget(list, area);
    }

    fn render_chart(&self, f: &mut Frame, area: Rect) {
        let history = self.store.metrics_history();
        if history.is_empty() {
            let block = Paragraph::new("No metrics yet. Press space to start the simulation.")
                .block(Block::default().borders(Borders::ALL).title("Network Metrics"));
            f.render_widget(block, area);
            return;
        }

        let series = |value: fn(&netsim_abstract::MetricsSample) -> f64| -> Vec<(f64, f64)> {
            history
                .iter()
                .enumerate()
                .map(|(i, sample)| (i as f64, value(sample)))
                .collect()
        };
        let throughput = series(|s| s.throughput);
        let latency = series(|s| s.latency);
        let loss = series(|s| s.packet_loss);

        let y_max = throughput
            .iter()
            .chain(&latency)
            .chain(&loss)
            .map(|(_, y)| *y)
            .fold(1.0_f64, f64::max)
            * 1.1;
        let x_max = (history.len().max(2) - 1) as f64;

        let datasets = vec![
            Dataset::default()
                .name("throughput (Mbps)")
                .marker(symbols::Marker::Braille)
                .style(Style::default().fg(Color::Green))
                .graph_type(GraphType::Line)
                .data(&throughput),
            Dataset::default()
                .name("latency (ms)")
                .marker(symbols::Marker::Braille)
                .style(Style::default().fg(Color::Yellow))
                .graph_type(GraphType::Line)
                .data(&latency),
            Dataset::default()
                .name("packet loss (%)")
                .marker(symbols::Marker::Braille)
                .style(Style::default().fg(Color::Red))
                .graph_type(GraphType::Line)
                .data(&loss),
        ];

        let chart = Chart::new(datasets)
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title("Network Metrics"),
            )
            .x_axis(
                Axis::default()
                    .title("tick")
                    .bounds([0.0, x_max])
                    .labels(vec![Span::raw("0"), Span::raw(format!("{x_max:.0}"))]),
            )
            .y_axis(
                Axis::default()
                    .bounds([0.0, y_max])
                    .labels(vec![Span::raw("0"), Span::raw(format!("{y_max:.0}"))]),
            );
        f.render_widget(chart, area);
    }

    fn render_users(&self, f: &mut Frame, area: Rect) {
        let block = Block::default()
            .borders(Borders::ALL)
            .title(format!("Active Users ({})", self.store.users().len()));
        if self.store.users().is_empty() {
            let empty = Paragraph::new("No active users. Press 'a' to add one.").block(block);
            f.render_widget(empty, area);
            return;
        }

        let rows = self.store.users().iter().map(|user| {
            Row::new(vec![
                user.id.clone(),
                user.name.clone(),
                user.traffic_type.label().to_string(),
                format!("{}", user.sending_rate),
            ])
        });
        let table = Table::new(
            rows,
            [
                Constraint::Length(16),
                Constraint::Min(12),
                Constraint::Length(14),
                Constraint::Length(8),
            ],
        )
        .header(
            Row::new(vec!["ID", "Name", "Traffic Type", "Mbps"])
                .style(Style::default().add_modifier(Modifier::BOLD)),
        )
        .row_highlight_style(Style::default().add_modifier(Modifier::REVERSED))
        .block(block);

        let mut state = TableState::default().with_selected(Some(self.selected));
        f.render_stateful_widget(table, area, &mut state);
    }

    fn render_event_log(&self, f: &mut Frame, area: Rect) {
        let block = Block::default().borders(Borders::ALL).title("Event Log");
        let events = self.store.event_log();
        if events.is_empty() {
            let empty = Paragraph::new("No events yet. Start the simulation to see activity.")
                .block(block);
            f.render_widget(empty, area);
            return;
        }

        let visible = (area.height as usize).saturating_sub(2);
        let items: Vec<ListItem> = events
            .iter()
            .take(visible)
            .map(|event| {
                let style = Style::default().fg(kind_color(event.kind));
                ListItem::new(Line::from(vec![
                    Span::styled(format!("{} ", event.kind.icon()), style),
                    Span::styled(
                        format!("{} ", event.timestamp),
                        Style::default().fg(Color::DarkGray),
                    ),
                    Span::raw(event.message.clone()),
                ]))
            })
            .collect();
        f.render_widget(List::new(items).block(block), area);
    }

    fn render_add_form(&self, f: &mut Frame, form: &AddUserForm) {
        let area = centered(f.area(), 50, 9);
        let field = |label: &str, value: String, which: FormField| {
            let style = if form.field == which {
                Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)
            } else {
                Style::default()
            };
            Line::from(vec![
                Span::styled(format!("{label:<20}"), style),
                Span::raw(value),
            ])
        };
        let rate = if form.rate.is_empty() {
            "(default for type)".to_string()
        } else {
            form.rate.clone()
        };
        let text = vec![
            field("Name", form.name.clone(), FormField::Name),
            field(
                "Traffic Type",
                format!("< {} >", form.traffic_type),
                FormField::Traffic,
            ),
            field("Sending Rate (Mbps)", rate, FormField::Rate),
            Line::from(""),
            Line::from("Tab: next field  ←/→: traffic type  Enter: add  Esc: cancel"),
        ];
        f.render_widget(Clear, area);
        f.render_widget(
            Paragraph::new(text).block(
                Block::default()
                    .borders(Borders::ALL)
                    .title("Add New User"),
            ),
            area,
        );
    }

    fn render_edit_rate(&self, f: &mut Frame, buffer: &str) {
        let area = centered(f.area(), 40, 5);
        let text = vec![
            Line::from(format!("Sending Rate (Mbps): {buffer}")),
            Line::from("Enter: save  Esc: cancel"),
        ];
        f.render_widget(Clear, area);
        f.render_widget(
            Paragraph::new(text).block(Block::default().borders(Borders::ALL).title("Edit User")),
            area,
        );
    }
}

fn band_color(band: CongestionBand) -> Color {
    match band {
        CongestionBand::Low => Color::Green,
        CongestionBand::Elevated => Color::Yellow,
        CongestionBand::Critical => Color::Red,
    }
}

fn kind_color(kind: EventKind) -> Color {
    match kind {
        EventKind::Info => Color::Blue,
        EventKind::Warning => Color::Yellow,
        EventKind::Success => Color::Green,
    }
}

fn centered(outer: Rect, width: u16, height: u16) -> Rect {
    let width = width.min(outer.width);
    let height = height.min(outer.height);
    Rect {
        x: outer.x + (outer.width - width) / 2,
        y: outer.y + (outer.height - height) / 2,
        width,
        height,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use netsim_abstract::SimConfig;
    use ratatui::backend::TestBackend;

    fn app() -> TuiApp<MemoryStorage> {
        TuiApp::new(SimulationStore::in_memory(SimConfig::deterministic()), None)
    }

    fn press(app: &mut TuiApp<MemoryStorage>, keys: &[KeyCode]) {
        for key in keys {
            assert!(!app.handle_key(*key, Instant::now()));
        }
    }

    fn type_text(app: &mut TuiApp<MemoryStorage>, text: &str) {
        let keys: Vec<KeyCode> = text.chars().map(KeyCode::Char).collect();
        press(app, &keys);
    }

    fn screen(app: &TuiApp<MemoryStorage>) -> String {
        let mut terminal = Terminal::new(TestBackend::new(140, 40)).unwrap();
        terminal.draw(|f| app.ui(f)).unwrap();
        terminal
            .backend()
            .buffer()
            .content
            .iter()
            .map(|cell| cell.symbol())
            .collect()
    }

    #[test]
    fn space_toggles_and_q_quits() {
        let mut app = app();
        press(&mut app, &[KeyCode::Char(' ')]);
        assert!(app.store().is_running());
        press(&mut app, &[KeyCode::Char(' ')]);
        assert!(!app.store().is_running());
        assert!(app.handle_key(KeyCode::Char('q'), Instant::now()));
    }

    #[test]
    fn algorithm_keys_select_policy() {
        let mut app = app();
        press(&mut app, &[KeyCode::Char('2')]);
        assert_eq!(app.store().algorithm(), CongestionAlgorithm::Red);
        press(&mut app, &[KeyCode::Char('g')]);
        assert_eq!(app.store().algorithm(), CongestionAlgorithm::AiOptimized);
    }

    #[test]
    fn add_user_form_submits_to_store() {
        let mut app = app();
        press(&mut app, &[KeyCode::Char('a')]);
        type_text(&mut app, "Dana");
        press(&mut app, &[KeyCode::Tab, KeyCode::Right, KeyCode::Tab]);
        type_text(&mut app, "12.5");
        press(&mut app, &[KeyCode::Enter]);

        let user = app.store().users().last().unwrap();
        assert_eq!(user.name, "Dana");
        assert_eq!(user.traffic_type, TrafficType::FileDownload);
        assert_eq!(user.sending_rate, 12.5);
        assert!(matches!(app.mode, InputMode::Normal));
        assert_eq!(app.selected, 2);
    }

    #[test]
    fn duplicate_name_keeps_form_open() {
        let mut app = app();
        press(&mut app, &[KeyCode::Char('a')]);
        type_text(&mut app, "User A (Video)");
        press(&mut app, &[KeyCode::Enter]);

        assert!(matches!(app.mode, InputMode::AddUser(_)));
        assert!(app.status.as_deref().unwrap().contains("already exists"));
        assert_eq!(app.store().users().len(), 2);
        press(&mut app, &[KeyCode::Esc]);
        assert!(matches!(app.mode, InputMode::Normal));
    }

    #[test]
    fn edit_and_delete_selected_user() {
        let mut app = app();
        press(&mut app, &[KeyCode::Down, KeyCode::Char('e')]);
        for _ in 0..4 {
            press(&mut app, &[KeyCode::Backspace]);
        }
        type_text(&mut app, "7");
        press(&mut app, &[KeyCode::Enter]);
        assert_eq!(app.store().users()[1].sending_rate, 7.0);

        press(&mut app, &[KeyCode::Char('d')]);
        assert_eq!(app.store().users().len(), 1);
        assert_eq!(app.selected, 0);
    }

    #[test]
    fn renders_every_panel() {
        let mut app = app();
        press(&mut app, &[KeyCode::Char(' ')]);
        app.store.tick();

        let text = screen(&app);
        for title in ["Control", "Network Topology", "Network Metrics", "Active Users", "Event Log"] {
            assert!(text.contains(title), "missing {title}");
        }
        assert!(text.contains("Router 1"));
        assert!(text.contains("Simulation started."));
    }

    #[test]
    fn memory_log_buffer_keeps_last_line() {
        use std::io::Write;
        let mut buffer = MemoryLogBuffer::new();
        buffer.write_all(b"first\n").unwrap();
        buffer.write_all(b"second\n").unwrap();
        assert_eq!(buffer.last_line().as_deref(), Some("second"));
    }
}
