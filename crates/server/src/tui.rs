use std::collections::VecDeque;

use ratatui::Frame;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph};

use crate::server::ClientInfo;

const MAX_LOG_LINES: usize = 200;

pub struct TuiState {
    logs: VecDeque<String>,
}

impl TuiState {
    pub fn new() -> Self {
        Self {
            logs: VecDeque::new(),
        }
    }

    pub fn log(&mut self, line: impl Into<String>) {
        if self.logs.len() >= MAX_LOG_LINES {
            self.logs.pop_front();
        }
        self.logs.push_back(line.into());
    }
}

pub struct DashboardStats {
    pub uptime_secs: u64,
    pub tick_rate: u32,
    pub client_count: usize,
    pub root_count: usize,
}

pub fn render(frame: &mut Frame, state: &TuiState, stats: &DashboardStats, clients: &[ClientInfo]) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(2 + clients.len().max(1) as u16),
            Constraint::Min(4),
            Constraint::Length(3),
        ])
        .split(frame.area());

    render_header(frame, chunks[0], stats);
    render_clients(frame, chunks[1], clients);
    render_log(frame, chunks[2], state);
    render_help(frame, chunks[3]);
}

fn render_header(frame: &mut Frame, area: Rect, stats: &DashboardStats) {
    let uptime = format_duration(stats.uptime_secs);
    let block = Block::default()
        .title(format!(" Trellis Server - Uptime: {uptime} "))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));

    let text = format!(
        "Tick rate: {} Hz  |  Clients: {}  |  Scene roots: {}",
        stats.tick_rate, stats.client_count, stats.root_count
    );
    frame.render_widget(Paragraph::new(text).block(block), area);
}

fn render_clients(frame: &mut Frame, area: Rect, clients: &[ClientInfo]) {
    let block = Block::default()
        .title(" Connections ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Green));

    let lines: Vec<Line> = if clients.is_empty() {
        vec![Line::from(Span::styled(
            "no clients connected",
            Style::default().fg(Color::DarkGray),
        ))]
    } else {
        clients
            .iter()
            .map(|client| {
                let addr = client
                    .addr
                    .map(|addr| addr.to_string())
                    .unwrap_or_else(|| "?".to_string());
                Line::from(vec![
                    Span::styled(
                        format!("#{:<4}", client.client_id),
                        Style::default().fg(Color::Yellow),
                    ),
                    Span::styled(
                        format!("{:<20}", client.name),
                        Style::default().fg(Color::White),
                    ),
                    Span::styled(addr, Style::default().fg(Color::Gray)),
                ])
            })
            .collect()
    };

    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_log(frame: &mut Frame, area: Rect, state: &TuiState) {
    let block = Block::default()
        .title(" Log ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow));

    let visible = area.height.saturating_sub(2) as usize;
    let lines: Vec<Line> = state
        .logs
        .iter()
        .rev()
        .take(visible)
        .rev()
        .map(|line| Line::from(line.as_str()))
        .collect();

    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_help(frame: &mut Frame, area: Rect) {
    let block = Block::default()
        .title(" Controls ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray));

    let text = Paragraph::new("Press 'q' or ESC to quit").block(block).style(
        Style::default()
            .fg(Color::DarkGray)
            .add_modifier(Modifier::ITALIC),
    );
    frame.render_widget(text, area);
}

fn format_duration(secs: u64) -> String {
    let hours = secs / 3600;
    let mins = (secs % 3600) / 60;
    let secs = secs % 60;
    format!("{hours:02}:{mins:02}:{secs:02}")
}
