use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use ratatui::{
    prelude::*,
    style::Style,
    widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap},
    Frame,
};

use crate::generator::{classify_strength, Strength};
use crate::models::FieldValue;
use crate::projector::DisplayEntry;
use crate::session::Session;

const COLOR_FROST: Color = Color::Rgb(0xD8, 0xDE, 0xE9);
const COLOR_STEEL: Color = Color::Rgb(0x81, 0xA1, 0xC1);
const COLOR_SLATE: Color = Color::Rgb(0x4C, 0x56, 0x6A);
const COLOR_NIGHT: Color = Color::Rgb(0x2E, 0x34, 0x40);
const COLOR_GOLD: Color = Color::Rgb(0xEB, 0xCB, 0x8B);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pane {
    Groups,
    Entries,
}

/// A modal box drawn centred over the current screen.
pub struct Overlay {
    pub title: String,
    pub lines: Vec<String>,
}

impl Overlay {
    pub fn new(title: impl Into<String>, lines: Vec<String>) -> Self {
        Self {
            title: title.into(),
            lines,
        }
    }
}

#[derive(Clone, Copy)]
struct OverlayTheme {
    border: Color,
    title: Color,
    text: Color,
    bg: Color,
}

fn themed_overlay(title: &str) -> OverlayTheme {
    match title {
        "New entry" | "Edit entry" => OverlayTheme {
            border: COLOR_STEEL,
            title: COLOR_FROST,
            text: COLOR_FROST,
            bg: Color::Rgb(0x1F, 0x25, 0x30),
        },
        "Password generator" => OverlayTheme {
            border: Color::Rgb(0x8F, 0xBC, 0xBB),
            title: COLOR_FROST,
            text: COLOR_FROST,
            bg: Color::Rgb(0x1B, 0x27, 0x2A),
        },
        "Confirm delete" | "Unsaved changes" => OverlayTheme {
            border: Color::Rgb(0xBF, 0x61, 0x6A),
            title: Color::Rgb(0xF2, 0xC6, 0xCB),
            text: COLOR_FROST,
            bg: Color::Rgb(0x2A, 0x1B, 0x1E),
        },
        "Updates" => OverlayTheme {
            border: COLOR_GOLD,
            title: COLOR_GOLD,
            text: COLOR_FROST,
            bg: Color::Rgb(0x29, 0x25, 0x1A),
        },
        _ => OverlayTheme {
            border: COLOR_SLATE,
            title: COLOR_FROST,
            text: COLOR_FROST,
            bg: COLOR_NIGHT,
        },
    }
}

fn centered_overlay_area(frame_size: Rect, lines: &[String], title: &str) -> Rect {
    let widest = lines
        .iter()
        .map(|s| s.chars().count())
        .chain(std::iter::once(title.chars().count()))
        .max()
        .unwrap_or(0);
    let maxw = u16::try_from(widest).unwrap_or(u16::MAX).saturating_add(4);
    let maxh = u16::try_from(lines.len()).unwrap_or(u16::MAX).saturating_add(2);
    Rect::new(
        (frame_size.width.saturating_sub(maxw)) / 2,
        (frame_size.height.saturating_sub(maxh)) / 2,
        maxw.min(frame_size.width),
        maxh.min(frame_size.height),
    )
}

fn render_overlay(f: &mut Frame<'_>, overlay: &Overlay) {
    let area = centered_overlay_area(f.size(), &overlay.lines, &overlay.title);
    let theme = themed_overlay(&overlay.title);
    let paragraph = Paragraph::new(
        overlay
            .lines
            .iter()
            .map(|l| Line::from(l.as_str()))
            .collect::<Vec<Line>>(),
    )
    .style(Style::default().fg(theme.text).bg(theme.bg))
    .block(
        Block::default()
            .borders(Borders::ALL)
            .title(Span::styled(
                overlay.title.as_str(),
                Style::default()
                    .fg(theme.title)
                    .add_modifier(Modifier::BOLD),
            ))
            .border_style(
                Style::default()
                    .fg(theme.border)
                    .add_modifier(Modifier::BOLD),
            )
            .style(Style::default().bg(theme.bg)),
    );
    f.render_widget(Clear, area);
    f.render_widget(paragraph, area);
}

const ASCII_BANNER: [&str; 4] = [
    r" _  __          ___                                 _ ",
    r"| |/ /___ ___  | _ \__ _ ______ __ __ _____ _ _ __| |",
    r"| ' </ -_) -_) |  _/ _` (_-<_-< \ V  V / _ \ '_/ _` |",
    r"|_|\_\___\___| |_| \__,_/__/__/  \_/\_/\___/_| \__,_|",
];

const LOCK_FRAMES: [&[&str]; 4] = [
    &["    ┌───┐    ", "    │   │    ", "  ┌─┴───┴─┐  ", "  │   ●   │  ", "  │   ┃   │  ", "  └───────┘  "],
    &["    ┌───┐    ", "    │   │    ", "  ┌─┴───┴─┐  ", "  │   ●   │  ", "  │  ╱    │  ", "  └───────┘  "],
    &["    ┌───┐    ", "    │   │    ", "  ┌─┴───┴─┐  ", "  │   ●━  │  ", "  │       │  ", "  └───────┘  "],
    &["    ┌───┐    ", "    │   │    ", "  ┌─┴───┴─┐  ", "  │   ●   │  ", "  │    ╲  │  ", "  └───────┘  "],
];

fn strength_color(strength: Strength) -> Color {
    match strength {
        Strength::Weak => Color::Red,
        Strength::Average => Color::Yellow,
        Strength::Strong => Color::Green,
        Strength::Excellent => Color::Cyan,
    }
}

fn strength_bar(strength: Strength) -> Line<'static> {
    let color = strength_color(strength);
    let total = 12usize;
    let filled = (strength.level() as usize * 3).min(total);
    Line::from(vec![
        Span::raw("Strength: "),
        Span::styled(
            strength.label(),
            Style::default().fg(color).add_modifier(Modifier::BOLD),
        ),
        Span::raw(" ["),
        Span::styled("=".repeat(filled), Style::default().fg(color)),
        Span::styled(
            "-".repeat(total - filled),
            Style::default().fg(Color::DarkGray),
        ),
        Span::raw("]"),
    ])
}

fn banner_lines() -> Vec<Line<'static>> {
    ASCII_BANNER
        .iter()
        .map(|l| {
            Line::from(Span::styled(
                *l,
                Style::default().fg(COLOR_STEEL).add_modifier(Modifier::BOLD),
            ))
        })
        .collect()
}

pub struct WelcomeView<'a> {
    pub last_database: Option<&'a Path>,
    pub status: String,
    pub overlay: Option<Overlay>,
    pub version: &'a str,
}

pub fn draw_welcome(f: &mut Frame<'_>, state: &WelcomeView) {
    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(4),
            Constraint::Length(6),
            Constraint::Length(7),
            Constraint::Min(0),
            Constraint::Length(3),
        ])
        .split(f.size());

    let banner = Paragraph::new(banner_lines()).alignment(Alignment::Center);
    f.render_widget(banner, layout[1]);

    let mut menu = vec![
        Line::from(Span::styled(
            format!("v{}", state.version),
            Style::default().fg(COLOR_SLATE),
        )),
        Line::from(""),
        Line::from("[o] Open database    [n] New database    [q] Quit"),
    ];
    if let Some(last) = state.last_database {
        menu.push(Line::from(""));
        menu.push(Line::from(Span::styled(
            format!("[Enter] Reopen {}", last.display()),
            Style::default().fg(COLOR_FROST),
        )));
    }
    f.render_widget(
        Paragraph::new(menu).alignment(Alignment::Center),
        layout[2],
    );

    let footer =
        Paragraph::new(state.status.clone()).block(Block::default().borders(Borders::ALL));
    f.render_widget(footer, layout[4]);

    if let Some(overlay) = &state.overlay {
        render_overlay(f, overlay);
    }
}

pub struct UnlockView<'a> {
    pub database: &'a Path,
    pub passphrase_display: &'a str,
    pub passphrase_visible: bool,
    pub key_file: &'a str,
    pub editing_key_file: bool,
    pub status: String,
    pub anim_frame: usize,
}

pub fn draw_unlock(f: &mut Frame<'_>, state: &UnlockView) {
    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(5),
            Constraint::Length(9),
            Constraint::Length(7),
            Constraint::Min(0),
            Constraint::Length(3),
        ])
        .split(f.size());

    f.render_widget(
        Paragraph::new(banner_lines()).alignment(Alignment::Center),
        layout[1],
    );

    let box_width: u16 = 52;
    let input_area = layout[2];
    let w = box_width.min(input_area.width);
    let x = input_area.x + input_area.width.saturating_sub(w) / 2;
    let label_area = Rect::new(x, input_area.y, w, 2);
    let pass_area = Rect::new(x, input_area.y + 2, w, 3);
    let key_area = Rect::new(x, input_area.y + 5, w, 3);

    let label = Paragraph::new(vec![
        Line::from(Span::styled(
            state.database.display().to_string(),
            Style::default().fg(COLOR_FROST).add_modifier(Modifier::BOLD),
        )),
        Line::from("Enter the passphrase"),
    ])
    .alignment(Alignment::Center);
    f.render_widget(label, label_area);

    let focused = Style::default().fg(COLOR_GOLD);
    let idle = Style::default().fg(COLOR_SLATE);
    let prompt = Paragraph::new(format!("> {}", state.passphrase_display)).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(if state.editing_key_file { idle } else { focused })
            .title(if state.passphrase_visible {
                "Passphrase (visible)"
            } else {
                "Passphrase (hidden)"
            }),
    );
    f.render_widget(prompt, pass_area);

    let key = Paragraph::new(format!("> {}", state.key_file)).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(if state.editing_key_file { focused } else { idle })
            .title("Key file (optional)"),
    );
    f.render_widget(key, key_area);

    let footer =
        Paragraph::new(state.status.clone()).block(Block::default().borders(Borders::ALL));
    f.render_widget(footer, layout[5]);

    let anim = LOCK_FRAMES[state.anim_frame % LOCK_FRAMES.len()];
    let anim_width: u16 = anim.iter().map(|l| l.chars().count() as u16).max().unwrap_or(0);
    let anim_height: u16 = anim.len() as u16;
    let area = layout[3];
    let x = area.x + area.width.saturating_sub(anim_width) / 2;
    let y = area.y + area.height.saturating_sub(anim_height) / 2;
    let anim_area = Rect::new(x, y, anim_width.min(area.width), anim_height.min(area.height));
    let anim_lines: Vec<Line> = anim
        .iter()
        .map(|l| Line::from(Span::styled(*l, Style::default().fg(COLOR_STEEL))))
        .collect();
    f.render_widget(Paragraph::new(anim_lines), anim_area);
}

pub struct BrowserView<'a> {
    pub session: &'a Session,
    pub focus: Pane,
    pub reveal_password: bool,
    pub searching: bool,
    pub overlay: Option<Overlay>,
    pub status: String,
    pub status_strength: Option<Strength>,
    pub clipboard_remaining: Option<Duration>,
}

fn pane_highlight(active: bool, accent: Color) -> Style {
    if active {
        Style::default()
            .fg(accent)
            .bg(Color::Rgb(40, 40, 40))
            .add_modifier(Modifier::BOLD)
    } else {
        Style::default().fg(Color::DarkGray)
    }
}

fn format_time(time: Option<DateTime<Utc>>) -> String {
    time.map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".into())
}

fn or_dash(text: &str) -> &str {
    if text.is_empty() { "-" } else { text }
}

fn detail_lines(state: &BrowserView, entry: &DisplayEntry) -> Vec<Line<'static>> {
    let password = entry.password.reveal();
    let strength = classify_strength(&password);
    let shown = if state.reveal_password {
        password
    } else if entry.password.is_empty() {
        "-".to_string()
    } else {
        "(hidden, v to reveal)".to_string()
    };
    let favorite = if state.session.is_favorite(entry.uuid) {
        " ★"
    } else {
        ""
    };
    let mut lines = vec![
        Line::from(Span::styled(
            format!("{}{favorite}", entry.title),
            Style::default().fg(COLOR_FROST).add_modifier(Modifier::BOLD),
        )),
        Line::from(""),
        Line::from(format!("Username: {}", or_dash(&entry.username))),
        Line::from(format!("Password: {shown}")),
        Line::from(vec![
            Span::raw("Strength: "),
            Span::styled(
                strength.label(),
                Style::default()
                    .fg(strength_color(strength))
                    .add_modifier(Modifier::BOLD),
            ),
        ]),
        Line::from(format!("URL: {}", or_dash(&entry.url))),
        Line::from(format!("Notes: {}", or_dash(&entry.notes))),
    ];
    if !entry.tags.is_empty() {
        lines.push(Line::from(format!("Tags: {}", entry.tags.join(", "))));
    }
    if !entry.custom_fields.is_empty() {
        lines.push(Line::from(""));
        for (name, value) in &entry.custom_fields {
            let text = match value {
                FieldValue::Protected(_) if !state.reveal_password => "(protected)".to_string(),
                other => other.reveal(),
            };
            lines.push(Line::from(format!("{name}: {text}")));
        }
    }
    lines.push(Line::from(""));
    lines.push(Line::from(Span::styled(
        format!(
            "Created {} | Modified {}",
            format_time(entry.created),
            format_time(entry.modified)
        ),
        Style::default().fg(COLOR_SLATE),
    )));
    if let Some(expires) = entry.expires {
        lines.push(Line::from(format!("Expires {}", format_time(Some(expires)))));
    }
    lines
}

pub fn draw_browser(f: &mut Frame<'_>, state: &BrowserView) {
    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(1),
            Constraint::Length(3),
        ])
        .split(f.size());

    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(25),
            Constraint::Percentage(35),
            Constraint::Percentage(40),
        ])
        .split(layout[1]);

    let session = state.session;
    let name = session.database_name().unwrap_or("Database");
    let path = session
        .path()
        .map(|p| p.display().to_string())
        .unwrap_or_default();
    let dirty = if session.is_dirty() { " [modified]" } else { "" };
    let search = if state.searching {
        format!("Search: {}_", session.search())
    } else if session.search().is_empty() {
        "/ to search".to_string()
    } else {
        format!("Search: {}", session.search())
    };
    let header = Paragraph::new(Line::from(vec![
        Span::styled(
            name.to_string(),
            Style::default().fg(COLOR_FROST).add_modifier(Modifier::BOLD),
        ),
        Span::styled(format!("{dirty}  {path}"), Style::default().fg(COLOR_SLATE)),
        Span::raw("  |  "),
        Span::styled(
            search,
            Style::default().fg(if state.searching { COLOR_GOLD } else { COLOR_FROST }),
        ),
    ]))
    .block(Block::default().borders(Borders::ALL));
    f.render_widget(header, layout[0]);

    // Group tree
    let groups = session.root().map(|r| r.flatten()).unwrap_or_default();
    let selected_group = session.selected_group().map(|g| g.uuid);
    let group_items: Vec<ListItem> = groups
        .iter()
        .map(|(depth, g)| {
            ListItem::new(format!(
                "{}{} ({})",
                "  ".repeat(*depth),
                g.name,
                g.all_entries().len()
            ))
        })
        .collect();
    let mut group_state = ListState::default();
    group_state.select(groups.iter().position(|(_, g)| Some(g.uuid) == selected_group));
    let group_list = List::new(group_items)
        .block(Block::default().title("Groups").borders(Borders::ALL))
        .highlight_symbol("▶ ")
        .highlight_style(pane_highlight(state.focus == Pane::Groups, Color::Cyan));
    f.render_stateful_widget(group_list, body[0], &mut group_state);

    // Entries of the selected group and its descendants
    let entries = session.visible_entries();
    let selected_entry = session.selected_entry().map(|e| e.uuid);
    let entry_items: Vec<ListItem> = if entries.is_empty() {
        vec![ListItem::new("No entries")]
    } else {
        entries
            .iter()
            .map(|e| {
                let star = if session.is_favorite(e.uuid) { "★ " } else { "  " };
                let strength = classify_strength(&e.password.reveal());
                ListItem::new(Line::from(vec![
                    Span::styled(star, Style::default().fg(COLOR_GOLD)),
                    Span::raw(format!("{} ", e.title)),
                    Span::styled(
                        format!("{} ", or_dash(&e.username)),
                        Style::default().fg(COLOR_SLATE),
                    ),
                    Span::styled(
                        format!("[{}]", strength.label()),
                        Style::default().fg(strength_color(strength)),
                    ),
                ]))
            })
            .collect()
    };
    let mut entry_state = ListState::default();
    entry_state.select(entries.iter().position(|e| Some(e.uuid) == selected_entry));
    let entry_list = List::new(entry_items)
        .block(
            Block::default()
                .title(format!("Entries ({})", entries.len()))
                .borders(Borders::ALL),
        )
        .highlight_symbol("▶ ")
        .highlight_style(pane_highlight(state.focus == Pane::Entries, Color::Yellow));
    f.render_stateful_widget(entry_list, body[1], &mut entry_state);

    // Detail pane
    let detail_block = Block::default().title("Details").borders(Borders::ALL);
    let lines = match session.selected_entry() {
        Some(entry) => detail_lines(state, entry),
        None => vec![Line::from("No entry selected.")],
    };
    let detail = Paragraph::new(lines)
        .wrap(Wrap { trim: true })
        .block(detail_block);
    f.render_widget(detail, body[2]);

    let mut footer_line = match state.status_strength {
        Some(strength) => strength_bar(strength),
        None => Line::from(state.status.clone()),
    };
    if let Some(left) = state.clipboard_remaining {
        footer_line.spans.push(Span::styled(
            format!("  |  Clipboard clears in {}s", left.as_secs() + 1),
            Style::default().fg(COLOR_GOLD),
        ));
    }
    let footer = Paragraph::new(footer_line).block(Block::default().borders(Borders::ALL));
    f.render_widget(footer, layout[2]);

    if let Some(overlay) = &state.overlay {
        render_overlay(f, overlay);
    }
}
