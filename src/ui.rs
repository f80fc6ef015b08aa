// Rendering for both screens. Pure draw code: state lives in App and
// SessionView, and the only mutation here is clamping scroll offsets to
// the heights we discover at draw time.

use chrono::{DateTime, Utc};
use ratatui::{
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap},
    Frame,
};

use relayscope::diff::{DiffEntry, DiffKind};
use relayscope::model::{Direction, PacketRecord, Value};
use relayscope::protocol::{self, ProtocolRegistry};
use relayscope::state::Mode;

use crate::{App, OpenSession};

pub fn draw(f: &mut Frame, app: &mut App) {
    if app.open.is_some() {
        draw_session(f, app);
    } else {
        draw_session_list(f, app);
    }
    if app.loading {
        draw_loading_overlay(f);
    }
}

fn draw_session_list(f: &mut Frame, app: &App) {
    let mut area = f.size();
    if let Some(error) = app.error.as_deref() {
        let chunks = Layout::default()
            .direction(ratatui::layout::Direction::Vertical)
            .constraints([Constraint::Length(3), Constraint::Min(0)])
            .split(area);
        let banner = Paragraph::new(error)
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(" Error ")
                    .style(Style::default().fg(Color::Red)),
            )
            .wrap(Wrap { trim: false });
        f.render_widget(banner, chunks[0]);
        area = chunks[1];
    }

    if app.sessions.is_empty() {
        let hint = Paragraph::new(format!(
            "No session logs found under {}.\nPoint RELAYSCOPE_CAPTURE_DIR at the relay's capture directory.",
            app.store.dir().display()
        ))
        .block(Block::default().borders(Borders::ALL).title(" Sessions "));
        f.render_widget(hint, area);
        return;
    }

    let items: Vec<ListItem> = app
        .sessions
        .iter()
        .map(|session| {
            let started = DateTime::<Utc>::from_timestamp_millis(session.started_at_ms)
                .unwrap_or_default()
                .format("%Y-%m-%d %H:%M:%S");
            let version = session.protocol_version.as_deref().unwrap_or("unknown");
            ListItem::new(format!(
                "{} | Started: {} UTC | {} packets | proto {}",
                session.id, started, session.packet_count, version
            ))
        })
        .collect();

    let mut list_state = ListState::default();
    list_state.select(Some(app.selected_session));

    let list = List::new(items)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(" Sessions (Up/Down: navigate, Enter: open, q: quit) "),
        )
        .highlight_style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD))
        .highlight_symbol(">> ");
    f.render_stateful_widget(list, area, &mut list_state);
}

fn draw_session(f: &mut Frame, app: &mut App) {
    let App {
        open,
        registry,
        error,
        ..
    } = app;
    let Some(open) = open.as_mut() else { return };
    let registry = registry.as_ref();

    let has_error = error.is_some();
    let mut constraints = vec![
        Constraint::Length(3), // header
        Constraint::Length(6), // filter input + help
        Constraint::Length(3), // timeline
        Constraint::Min(0),    // details / diff
    ];
    if has_error {
        constraints.insert(0, Constraint::Length(3));
    }
    let chunks = Layout::default()
        .direction(ratatui::layout::Direction::Vertical)
        .constraints(constraints)
        .split(f.size());
    let base = usize::from(has_error);

    if let Some(error) = error.as_deref() {
        let banner = Paragraph::new(error)
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(" Error ")
                    .style(Style::default().fg(Color::Red)),
            )
            .wrap(Wrap { trim: false });
        f.render_widget(banner, chunks[0]);
    }

    draw_header(f, chunks[base], open, registry);
    draw_filter_panel(f, chunks[base + 1], open);
    draw_timeline(f, chunks[base + 2], open);
    draw_details(f, chunks[base + 3], open, registry);
}

fn draw_header(f: &mut Frame, area: Rect, open: &OpenSession, registry: Option<&ProtocolRegistry>) {
    let view = &open.view;
    let total = view.packets().len();
    let position = if total == 0 { 0 } else { view.cursor() + 1 };
    let offset_s = view
        .current()
        .map(|p| p.offset_ms as f64 / 1000.0)
        .unwrap_or(0.0);
    let view_mode = if view.show_hex() { "HEX" } else { "JSON" };
    let filter_str = view
        .applied_filter()
        .map(|fs| format!(" [Filter: {fs}]"))
        .unwrap_or_default();
    let compare_str = match (view.mode(), view.baseline()) {
        (Mode::Comparing, Some(baseline)) => {
            format!(" [Compare | Baseline: Packet {}]", baseline + 1)
        }
        _ => String::new(),
    };
    let version = registry
        .map(|r| r.version().to_string())
        .or_else(|| open.summary.protocol_version.clone())
        .unwrap_or_else(|| "unknown".to_string());

    let header = Paragraph::new(format!(
        "Session: {} | Proto: {} | Packet: {}/{} | T+{:.3}s | View: {}{}{}",
        open.summary.id, version, position, total, offset_s, view_mode, filter_str, compare_str
    ))
    .block(Block::default().borders(Borders::ALL).title(" relayscope "));
    f.render_widget(header, area);
}

fn draw_filter_panel(f: &mut Frame, area: Rect, open: &OpenSession) {
    let view = &open.view;
    let chunks = Layout::default()
        .direction(ratatui::layout::Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Length(3)])
        .split(area);

    let editing = view.mode() == Mode::FilterInput;
    let style = if editing {
        Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
    } else {
        Style::default().fg(Color::White)
    };

    let input = Paragraph::new(format!("Filter: {}", view.pending_filter()))
        .block(Block::default().borders(Borders::ALL).title(" Filter Packets "))
        .style(style);
    f.render_widget(input, chunks[0]);

    let help = Paragraph::new(
        "Format: [c|s|a][.name][,clause...] | Examples: s.player_auth_input, c.*sleep*, a.level* | Enter: apply, Esc: cancel\n\
         Keys: h/l: packet | k/j: scroll | PgUp/PgDn: jump 10 | Home/End: ends | x: hex | f: filter | c: baseline | q: back",
    )
    .style(Style::default().fg(Color::DarkGray))
    .wrap(Wrap { trim: false });
    f.render_widget(help, chunks[1]);

    if editing {
        // Border plus the "Filter: " label put the cursor 9 cells in.
        f.set_cursor(
            chunks[0].x + 9 + view.pending_filter().len() as u16,
            chunks[0].y + 1,
        );
    }
}

fn draw_timeline(f: &mut Frame, area: Rect, open: &OpenSession) {
    let view = &open.view;
    if view.packets().is_empty() {
        let empty = Paragraph::new("")
            .block(Block::default().borders(Borders::ALL).title(" Timeline "));
        f.render_widget(empty, area);
        return;
    }

    // Window of glyphs around the cursor, one per packet.
    let window = (area.width as usize).saturating_sub(4).min(120);
    let current = view.cursor();
    let total = view.packets().len();
    let start = current.saturating_sub(window / 2);
    let end = (start + window).min(total);

    let spans: Vec<Span> = (start..end)
        .map(|i| {
            let (glyph, color) = match view.packets()[i].direction {
                Direction::Clientbound => ("<", Color::Green),
                Direction::Serverbound => (">", Color::Blue),
            };
            let is_baseline = view.baseline() == Some(i);
            let is_current = i == current;
            let style = if is_current && is_baseline {
                Style::default()
                    .fg(Color::Yellow)
                    .add_modifier(Modifier::BOLD | Modifier::REVERSED)
            } else if is_current {
                Style::default()
                    .fg(color)
                    .add_modifier(Modifier::BOLD | Modifier::REVERSED)
            } else if is_baseline {
                Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(color)
            };
            Span::styled(glyph, style)
        })
        .collect();

    let title = match view.baseline() {
        Some(baseline) => format!(
            " Timeline {}-{} | Baseline: Packet {} ",
            start + 1,
            end,
            baseline + 1
        ),
        None => format!(" Timeline {}-{} ", start + 1, end),
    };
    let timeline =
        Paragraph::new(Line::from(spans)).block(Block::default().borders(Borders::ALL).title(title));
    f.render_widget(timeline, area);
}

fn draw_details(
    f: &mut Frame,
    area: Rect,
    open: &mut OpenSession,
    registry: Option<&ProtocolRegistry>,
) {
    let comparing = open.view.mode() == Mode::Comparing && !open.view.show_hex();
    let areas: Vec<Rect> = if comparing {
        Layout::default()
            .direction(ratatui::layout::Direction::Horizontal)
            .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
            .split(area)
            .to_vec()
    } else {
        vec![area]
    };

    let Some(packet) = open.view.current().cloned() else {
        let empty = Paragraph::new("No packet selected")
            .block(Block::default().borders(Borders::ALL).title(" Packet Details "));
        f.render_widget(empty, areas[0]);
        return;
    };

    let body = details_text(&packet, registry, open.view.show_hex());
    let lines: Vec<Line> = body.lines().map(|l| Line::from(l.to_string())).collect();
    let total_lines = lines.len();
    let visible = areas[0].height.saturating_sub(2) as usize;
    let max_scroll = total_lines.saturating_sub(visible) as u16;
    let scroll = open.view.clamp_details_scroll(max_scroll);

    let start = scroll as usize;
    let end = (start + visible).min(total_lines);
    let window: Vec<Line> = if start < total_lines {
        lines[start..end].to_vec()
    } else {
        Vec::new()
    };

    let direction_color = match packet.direction {
        Direction::Clientbound => Color::Green,
        Direction::Serverbound => Color::Blue,
    };
    let mode_tag = if open.view.show_hex() {
        "Hex"
    } else if comparing {
        "Compare"
    } else {
        "JSON"
    };
    let scroll_tag = if max_scroll > 0 {
        format!(" [{}/{} lines]", scroll + 1, total_lines)
    } else {
        String::new()
    };

    let details = Paragraph::new(window)
        .block(Block::default().borders(Borders::ALL).title(Span::styled(
            format!(" Packet Details ({mode_tag}){scroll_tag} "),
            Style::default().fg(direction_color),
        )))
        .wrap(Wrap { trim: false });
    f.render_widget(details, areas[0]);

    if comparing && areas.len() > 1 {
        draw_diff_panel(f, areas[1], open);
    }
}

fn details_text(
    packet: &PacketRecord,
    registry: Option<&ProtocolRegistry>,
    show_hex: bool,
) -> String {
    let glyph = match packet.direction {
        Direction::Clientbound => "<",
        Direction::Serverbound => ">",
    };
    let captured = DateTime::<Utc>::from_timestamp_millis(packet.timestamp_ms)
        .unwrap_or_default()
        .format("%Y-%m-%d %H:%M:%S%.3f UTC");

    let mut out = String::new();
    out.push_str(&format!("Direction: {} {}\n", glyph, packet.direction));
    out.push_str(&format!("Captured: {captured}\n"));
    out.push_str(&format!("Packet Number: {}\n", packet.packet_number));
    out.push_str(&format!("Name: {}\n", identity_line(packet, registry)));
    out.push_str(&format!(
        "Relative Time: {:.3}s\n",
        packet.offset_ms as f64 / 1000.0
    ));

    if show_hex {
        let bytes = packet.raw.clone().unwrap_or_else(|| {
            serde_json::to_vec(&packet.value.to_json()).unwrap_or_default()
        });
        out.push_str(&format!("Size: {} bytes\n\nHex Dump:\n", bytes.len()));
        out.push_str(&hex_dump(&bytes, 16));
    } else {
        out.push_str("\nPacket JSON:\n");
        match serde_json::to_string_pretty(&packet.value.to_json()) {
            Ok(json) => out.push_str(&json),
            Err(e) => out.push_str(&format!("error formatting packet: {e}")),
        }
    }
    out
}

// Prefer the name the relay recorded; fall back to decoding the id out of
// the raw bytes and asking the registry.
fn identity_line(packet: &PacketRecord, registry: Option<&ProtocolRegistry>) -> String {
    if let Some(name) = &packet.name {
        return name.clone();
    }
    let Some(raw) = packet.raw.as_deref() else {
        return "unknown (nothing recorded)".to_string();
    };
    match protocol::identify(raw, packet.direction, registry) {
        Ok(identity) => match identity.name {
            Some(name) => format!("{} (0x{:02x})", name, identity.id),
            None => format!("unknown (0x{:02x})", identity.id),
        },
        Err(e) => format!("unidentified ({e})"),
    }
}

fn draw_diff_panel(f: &mut Frame, area: Rect, open: &mut OpenSession) {
    let mut lines: Vec<Line> = Vec::new();

    match open.view.current_diff() {
        None => lines.push(Line::from("No packet selected")),
        Some(diff) => {
            if open.view.is_on_baseline() {
                lines.push(Line::from(Span::styled(
                    "This is the baseline packet for comparison.",
                    Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
                )));
                lines.push(Line::from(""));
                lines.push(Line::from("Navigate to other packets to see differences."));
            } else {
                let time_s = diff.time_delta_ms as f64 / 1000.0;
                lines.push(Line::from(Span::styled(
                    format!("Time delta: {time_s:+.3}s"),
                    Style::default().fg(Color::Cyan),
                )));
                lines.push(Line::from(Span::styled(
                    format!("Packet number delta: {:+}", diff.packet_delta),
                    Style::default().fg(Color::Cyan),
                )));
                lines.push(Line::from(""));

                let changes: Vec<&DiffEntry> = diff.changes().collect();
                if changes.is_empty() {
                    lines.push(Line::from("No differences from baseline packet."));
                } else {
                    lines.push(Line::from("Differences from baseline:"));
                    lines.push(Line::from(""));
                    for entry in changes {
                        push_entry_lines(&mut lines, entry);
                    }
                }
            }
        }
    }

    let total = lines.len();
    let visible = area.height.saturating_sub(2) as usize;
    let max_scroll = total.saturating_sub(visible) as u16;
    let scroll = open.view.clamp_diff_scroll(max_scroll);
    let start = scroll as usize;
    let end = (start + visible).min(total);
    let window: Vec<Line> = if start < total {
        lines[start..end].to_vec()
    } else {
        Vec::new()
    };

    let scroll_tag = if max_scroll > 0 {
        format!(" [{}/{} lines]", scroll + 1, total)
    } else {
        String::new()
    };
    let panel = Paragraph::new(window)
        .block(Block::default().borders(Borders::ALL).title(Span::styled(
            format!(" Differences{scroll_tag} "),
            Style::default().fg(Color::Cyan),
        )))
        .wrap(Wrap { trim: false });
    f.render_widget(panel, area);
}

fn push_entry_lines(lines: &mut Vec<Line<'static>>, entry: &DiffEntry) {
    let path = entry.path.to_string();
    match entry.kind {
        DiffKind::Added => {
            if let Some(new) = &entry.new {
                lines.push(diff_line('+', &path, new, Color::Green));
            }
        }
        DiffKind::Removed => {
            if let Some(old) = &entry.old {
                lines.push(diff_line('-', &path, old, Color::Red));
            }
        }
        DiffKind::Modified => {
            if let Some(old) = &entry.old {
                lines.push(diff_line('-', &path, old, Color::Red));
            }
            if let Some(new) = &entry.new {
                lines.push(diff_line('+', &path, new, Color::Green));
            }
        }
        DiffKind::Unchanged => {}
    }
}

fn diff_line(sign: char, path: &str, value: &Value, color: Color) -> Line<'static> {
    let rendered = serde_json::to_string(&value.to_json())
        .unwrap_or_else(|_| value.type_name().to_string());
    let text = if path.is_empty() {
        format!("{sign} {rendered}")
    } else {
        format!("{sign} {path}: {rendered}")
    };
    Line::from(Span::styled(text, Style::default().fg(color)))
}

fn hex_dump(data: &[u8], bytes_per_line: usize) -> String {
    let mut out = String::new();
    let mut offset = 0;
    for chunk in data.chunks(bytes_per_line) {
        let hex: String = chunk.iter().map(|b| format!("{b:02x} ")).collect();
        let ascii: String = chunk
            .iter()
            .map(|b| if (32..127).contains(b) { *b as char } else { '.' })
            .collect();
        out.push_str(&format!(
            "{offset:04x}  {hex:<width$} {ascii}\n",
            width = bytes_per_line * 3
        ));
        offset += chunk.len();
    }
    out
}

fn draw_loading_overlay(f: &mut Frame) {
    let area = centered_rect(30, 20, f.size());
    f.render_widget(Clear, area);
    let popup = Paragraph::new("Loading packets...")
        .alignment(ratatui::layout::Alignment::Center)
        .block(Block::default().borders(Borders::ALL).title(" Working "));
    f.render_widget(popup, area);
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(ratatui::layout::Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);
    Layout::default()
        .direction(ratatui::layout::Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(vertical[1])[1]
}
