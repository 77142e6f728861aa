//! UI rendering module.
//!
//! Contains all the widget rendering logic (View).

use bblp_core::events::LogLevel;
use bblp_core::state::status::UNKNOWN_ETA;
use bblp_core::{ConnectionState, PrintStage, PubSubTransport};
use chrono::Local;
use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    symbols,
    text::{Line, Span, Text},
    widgets::{Block, Borders, Gauge, List, ListItem, Padding, Paragraph, Tabs, Wrap},
};

use crate::app::{App, LogEntry, Tab};

/// Main draw function.
pub fn draw<T: PubSubTransport>(frame: &mut Frame, app: &App<T>) {
    let area = frame.area();

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header/tabs
            Constraint::Min(10),   // Main content
            Constraint::Length(3), // Footer/status bar
        ])
        .split(area);

    draw_header(frame, chunks[0], app);

    match app.current_tab {
        Tab::Status => draw_status_view(frame, chunks[1], app),
        Tab::Logs => draw_logs_view(frame, chunks[1], app),
        Tab::Help => draw_help_view(frame, chunks[1]),
    }

    draw_footer(frame, chunks[2], app);
}

fn draw_header<T: PubSubTransport>(frame: &mut Frame, area: Rect, app: &App<T>) {
    let titles = vec!["Status", "Logs (F2)", "Help (F1)"];
    let selected = match app.current_tab {
        Tab::Status => 0,
        Tab::Logs => 1,
        Tab::Help => 2,
    };

    let tabs = Tabs::new(titles)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Cyan))
                .title(" bblp ")
                .title_style(
                    Style::default()
                        .fg(Color::Cyan)
                        .add_modifier(Modifier::BOLD),
                ),
        )
        .select(selected)
        .style(Style::default().fg(Color::White))
        .highlight_style(
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        )
        .divider(symbols::DOT);

    frame.render_widget(tabs, area);
}

fn draw_footer<T: PubSubTransport>(frame: &mut Frame, area: Rect, app: &App<T>) {
    let status = match app.snapshot.connection {
        ConnectionState::Connecting => {
            Span::styled(" ◌ Connecting ", Style::default().fg(Color::Yellow))
        }
        ConnectionState::Connected => Span::styled(
            format!(" ● {} ", app.host),
            Style::default().fg(Color::Green),
        ),
        ConnectionState::Disconnected => {
            Span::styled(" ○ Disconnected ", Style::default().fg(Color::Red))
        }
    };

    let stage = Span::styled(
        format!(" {} ", app.snapshot.stage_name()),
        Style::default().fg(Color::Cyan),
    );

    let help = Span::styled(
        " Esc: Quit | p: Pause | r: Resume | s s: Stop | u: Refresh ",
        Style::default().fg(Color::DarkGray),
    );

    let line = Line::from(vec![status, stage, help]);

    let footer = Paragraph::new(line).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::DarkGray)),
    );

    frame.render_widget(footer, area);
}

fn draw_status_view<T: PubSubTransport>(frame: &mut Frame, area: Rect, app: &App<T>) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(40), // Printer details
            Constraint::Percentage(60), // Progress & logs
        ])
        .split(area);

    draw_printer_panel(frame, chunks[0], app);

    let right = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(5), // Progress
            Constraint::Min(5),    // Recent logs
        ])
        .split(chunks[1]);

    draw_progress(frame, right[0], app);
    draw_recent_logs(frame, right[1], app);
}

fn field_line(label: &'static str, value: String) -> Line<'static> {
    Line::from(vec![
        Span::styled(label, Style::default().fg(Color::Cyan)),
        Span::styled(value, Style::default().fg(Color::White)),
    ])
}

fn draw_printer_panel<T: PubSubTransport>(frame: &mut Frame, area: Rect, app: &App<T>) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray))
        .title(" Printer ")
        .padding(Padding::horizontal(1));

    let inner = block.inner(area);
    frame.render_widget(block, area);

    let status = app.snapshot.status();
    let unknown = || "?".to_string();
    let temp = |t: Option<f64>| t.map_or_else(unknown, |t| format!("{:.1}°C", t));

    let mut lines = vec![
        field_line("Device:  ", app.device_id.clone().unwrap_or_else(unknown)),
        field_line("Host:    ", app.host.clone()),
        field_line("Link:    ", app.snapshot.connection.to_string()),
        Line::from(""),
        field_line("Task:    ", app.snapshot.task_name()),
        field_line("Stage:   ", app.snapshot.stage_name()),
        field_line(
            "Layer:   ",
            status.layer_num.map_or_else(unknown, |n| n.to_string()),
        ),
        field_line("Nozzle:  ", temp(status.nozzle_temp)),
        field_line("Chamber: ", temp(status.chamber_temp)),
        field_line("Wi-Fi:   ", status.wifi_signal.unwrap_or_else(unknown)),
    ];

    if let Some(modules) = &app.snapshot.version {
        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled(
            "Modules:",
            Style::default().fg(Color::Cyan),
        )));
        for module in modules {
            lines.push(Line::from(format!("  {} {}", module.name, module.sw_ver)));
        }
    }

    frame.render_widget(Paragraph::new(lines), inner);
}

fn draw_progress<T: PubSubTransport>(frame: &mut Frame, area: Rect, app: &App<T>) {
    let status = app.snapshot.status();
    let percent = status.percent.unwrap_or(0).clamp(0, 100) as u16;

    let color = match status.stage {
        Some(PrintStage::Printing) => Color::Cyan,
        Some(PrintStage::Paused) => Color::Yellow,
        Some(PrintStage::Idle) => Color::Green,
        _ => Color::DarkGray,
    };

    let eta = app.snapshot.eta_display(Local::now());
    let label = match app.snapshot.remaining {
        Some(r) => format!("{}% - {}h{}m left, ETA {}", percent, r.hours, r.minutes, eta),
        None if eta == UNKNOWN_ETA => format!("{}%", percent),
        None => format!("{}% - ETA {}", percent, eta),
    };

    let gauge = Gauge::default()
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::DarkGray))
                .title(" Progress "),
        )
        .gauge_style(Style::default().fg(color).bg(Color::Black))
        .percent(percent)
        .label(label);

    frame.render_widget(gauge, area);
}

fn draw_recent_logs<T: PubSubTransport>(frame: &mut Frame, area: Rect, app: &App<T>) {
    let items: Vec<ListItem> = app
        .logs
        .iter()
        .rev()
        .take(area.height.saturating_sub(2) as usize)
        .map(|entry| log_to_list_item(entry, area.width))
        .collect();

    let list = List::new(items)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::DarkGray))
                .title(" Recent Logs "),
        )
        .style(Style::default().fg(Color::White));

    frame.render_widget(list, area);
}

fn draw_logs_view<T: PubSubTransport>(frame: &mut Frame, area: Rect, app: &App<T>) {
    let items: Vec<ListItem> = app
        .logs
        .iter()
        .skip(app.log_scroll)
        .take(area.height.saturating_sub(2) as usize)
        .map(|entry| log_to_list_item(entry, area.width))
        .collect();

    let list = List::new(items)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Cyan))
                .title(format!(
                    " Logs ({}/{}) ",
                    app.log_scroll + 1,
                    app.logs.len().max(1)
                )),
        )
        .style(Style::default().fg(Color::White));

    frame.render_widget(list, area);
}

fn draw_help_view(frame: &mut Frame, area: Rect) {
    let help_text = vec![
        "",
        "  bblp - live printer dashboard",
        "",
        "  KEYBOARD SHORTCUTS:",
        "",
        "  Ctrl+Q, Ctrl+C, Esc    Quit application",
        "  F1                     Show this help",
        "  F2                     View full logs",
        "  p                      Pause the print",
        "  r                      Resume the print",
        "  s, s                   Stop the print (press twice)",
        "  u                      Request a full status refresh",
        "  v                      Request module versions",
        "",
        "  IN LOGS VIEW:",
        "",
        "  j/k, Up/Down           Scroll logs",
        "  Page Up/Down           Scroll by page",
        "  Home/End               Go to start/end",
        "",
        "  Commands need the printer's device ID, which is learned from",
        "  its first report when not given with --device.",
        "",
        "  Press any key to return...",
    ];

    let text: Vec<Line> = help_text.iter().map(|s| Line::from(*s)).collect();

    let help = Paragraph::new(Text::from(text))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Cyan))
                .title(" Help "),
        )
        .style(Style::default().fg(Color::White))
        .wrap(Wrap { trim: false });

    frame.render_widget(help, area);
}

fn log_to_list_item(entry: &LogEntry, width: u16) -> ListItem<'static> {
    let (icon, color) = match entry.level {
        LogLevel::Error => ("✗", Color::Red),
        LogLevel::Warn => ("⚠", Color::Yellow),
        LogLevel::Info => ("●", Color::Green),
        LogLevel::Debug => ("○", Color::Blue),
        LogLevel::Trace => ("·", Color::DarkGray),
    };

    let prefix = vec![
        Span::styled(
            format!("{} ", entry.timestamp),
            Style::default().fg(Color::DarkGray),
        ),
        Span::styled(format!("{} ", icon), Style::default().fg(color)),
    ];
    let indent = entry.timestamp.chars().count() + 3;
    let msg_width = (width as usize).saturating_sub(indent + 4).max(1);

    let chars: Vec<char> = entry.message.chars().collect();
    let mut chunks = chars.chunks(msg_width).map(|c| c.iter().collect::<String>());

    let mut first = prefix;
    first.push(Span::styled(
        chunks.next().unwrap_or_default(),
        Style::default().fg(Color::White),
    ));
    let mut lines = vec![Line::from(first)];
    for chunk in chunks {
        lines.push(Line::from(vec![
            Span::raw(" ".repeat(indent)),
            Span::styled(chunk, Style::default().fg(Color::White)),
        ]));
    }
    ListItem::new(Text::from(lines))
}
