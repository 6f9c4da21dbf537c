use ratatui::{
    Frame,
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Paragraph, Wrap},
};
use iopsdata_core::{ChatRole, NotificationLevel, QueryResults};

use crate::app::{App, InputMode};

const SQL_PLACEHOLDER: &str = "-- SQL will appear here";
/// Result rows rendered under the SQL; the rest are summarized
const MAX_RESULT_ROWS: usize = 50;

/// Render a line with **bold** spans; everything else is literal.
fn parse_markdown_line(text: &str) -> Line<'static> {
    let mut spans: Vec<Span<'static>> = Vec::new();
    let mut chars = text.chars().peekable();
    let mut current_text = String::new();

    while let Some(c) = chars.next() {
        if c == '*' && chars.peek() == Some(&'*') {
            // Consume the second *
            chars.next();

            if !current_text.is_empty() {
                spans.push(Span::raw(std::mem::take(&mut current_text)));
            }

            // Find closing **
            let mut bold_text = String::new();
            let mut found_close = false;
            while let Some(c) = chars.next() {
                if c == '*' && chars.peek() == Some(&'*') {
                    chars.next();
                    found_close = true;
                    break;
                }
                bold_text.push(c);
            }

            if found_close && !bold_text.is_empty() {
                spans.push(Span::styled(
                    bold_text,
                    Style::default().add_modifier(Modifier::BOLD),
                ));
            } else {
                // No closing **, treat as literal
                current_text.push_str("**");
                current_text.push_str(&bold_text);
            }
        } else {
            current_text.push(c);
        }
    }

    if !current_text.is_empty() {
        spans.push(Span::raw(current_text));
    }

    if spans.is_empty() {
        Line::default()
    } else {
        Line::from(spans)
    }
}

pub fn render(app: &mut App, frame: &mut Frame) {
    let area = frame.area();

    // Main layout: header, body, footer
    let [header_area, body_area, footer_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Min(0),
        Constraint::Length(1),
    ])
    .areas(area);

    render_header(app, frame, header_area);
    render_chat_screen(app, frame, body_area);
    render_footer(app, frame, footer_area);
}

fn render_header(app: &App, frame: &mut Frame, area: Rect) {
    let status = if app.is_busy() { " [streaming]" } else { "" };

    let title = Line::from(vec![
        Span::styled(" iOpsData ", Style::default().fg(Color::Cyan).bold()),
        Span::styled(app.client.chat_url().to_string(), Style::default().fg(Color::Gray)),
        Span::styled(status, Style::default().fg(Color::Yellow)),
        Span::raw(" "),
        Span::styled(
            format!("v{}", env!("CARGO_PKG_VERSION")),
            Style::default().fg(Color::DarkGray),
        ),
    ]);

    let header = Paragraph::new(title).style(Style::default().bg(Color::DarkGray));
    frame.render_widget(header, area);
}

fn render_footer(app: &App, frame: &mut Frame, area: Rect) {
    if let Some(notification) = &app.notification {
        let style = match notification.level {
            NotificationLevel::Error => Style::default().bg(Color::Red).fg(Color::White),
            NotificationLevel::Info => Style::default().bg(Color::Green).fg(Color::Black),
        };
        let line = Line::from(vec![
            Span::styled(format!(" {} ", notification.title), style.add_modifier(Modifier::BOLD)),
            Span::raw(" "),
            Span::raw(notification.description.clone()),
        ]);
        frame.render_widget(Paragraph::new(line), area);
        return;
    }

    let mode_style = match app.input_mode {
        InputMode::Normal => Style::default().bg(Color::Blue).fg(Color::White),
        InputMode::Editing => Style::default().bg(Color::Yellow).fg(Color::Black),
    };
    let mode_text = match app.input_mode {
        InputMode::Normal => " CHAT ",
        InputMode::Editing => " ASK ",
    };

    // Key style: dark background with bright text for visibility on both light/dark terminals
    let key_style = Style::default().bg(Color::DarkGray).fg(Color::White);
    let label_style = Style::default().bg(Color::Black).fg(Color::White);

    let hints: Vec<(&str, &str)> = match app.input_mode {
        InputMode::Editing => vec![("Enter", "send"), ("Esc", "done")],
        InputMode::Normal => vec![
            ("i", "ask"),
            ("j/k", "scroll"),
            ("p", "provider"),
            ("r", "run sql"),
            ("c", "clear"),
            ("q", "quit"),
        ],
    };

    let mut spans = vec![Span::styled(mode_text, mode_style), Span::raw(" ")];
    for (key, label) in hints {
        spans.push(Span::styled(format!(" {} ", key), key_style));
        spans.push(Span::styled(format!(" {} ", label), label_style));
        spans.push(Span::raw(" "));
    }

    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}

fn render_chat_screen(app: &mut App, frame: &mut Frame, area: Rect) {
    // Split layout: chat on the left, generated SQL on the right
    let [chat_column, sql_area] = Layout::horizontal([
        Constraint::Percentage(65),
        Constraint::Percentage(35),
    ])
    .areas(area);

    let [chat_area, input_area] = Layout::vertical([
        Constraint::Min(0),
        Constraint::Length(3),
    ])
    .areas(chat_column);

    // Store areas for mouse hit-testing
    app.chat_area = Some(chat_area);
    app.sql_area = Some(sql_area);

    // Store chat area dimensions for scroll calculations (inner size minus borders)
    app.chat_height = chat_area.height.saturating_sub(2);
    app.chat_width = chat_area.width.saturating_sub(2);

    render_messages(app, frame, chat_area);
    render_input(app, frame, input_area);
    render_sql_panel(app, frame, sql_area);
}

fn render_messages(app: &App, frame: &mut Frame, area: Rect) {
    let border_color = if app.input_mode == InputMode::Normal {
        Color::Cyan
    } else {
        Color::DarkGray
    };
    let chat_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(format!(" Chat: {} ", app.provider.display_name()));

    let messages = app.messages();
    let chat_text = if messages.is_empty() {
        Text::from(Span::styled(
            "Start by asking a question.",
            Style::default().fg(Color::DarkGray),
        ))
    } else {
        let mut lines: Vec<Line> = Vec::new();

        for msg in messages {
            match msg.role {
                ChatRole::User => {
                    lines.push(Line::from(Span::styled(
                        "You:",
                        Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
                    )));
                    lines.push(Line::from(msg.content.clone()));
                }
                ChatRole::Assistant => {
                    lines.push(Line::from(Span::styled(
                        "AI:",
                        Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
                    )));
                    let streaming = app.session.in_flight() == Some(msg.id);
                    if msg.content.is_empty() && streaming {
                        // Animated ellipsis: cycles through ".", "..", "..."
                        let dots = ".".repeat((app.animation_frame as usize) + 1);
                        lines.push(Line::from(Span::styled(
                            format!("Thinking{}", dots),
                            Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
                        )));
                    } else {
                        for line in msg.content.lines() {
                            lines.push(parse_markdown_line(line));
                        }
                    }
                    if msg.sql.is_some() {
                        lines.push(Line::from(Span::styled(
                            "[SQL attached]",
                            Style::default().fg(Color::Magenta),
                        )));
                    }
                }
            }
            lines.push(Line::default());
        }

        Text::from(lines)
    };

    let chat = Paragraph::new(chat_text)
        .block(chat_block)
        .wrap(Wrap { trim: true })
        .scroll((app.chat_scroll, 0));

    frame.render_widget(chat, area);
}

fn render_input(app: &App, frame: &mut Frame, area: Rect) {
    let editing = app.input_mode == InputMode::Editing;
    let border_color = if editing { Color::Yellow } else { Color::DarkGray };
    let title = if app.is_busy() {
        " Ask (waiting for reply) "
    } else {
        " Ask your data anything "
    };

    let input_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(title);

    // Inner width = total width - 2 (for borders)
    let inner_width = area.width.saturating_sub(2) as usize;
    let (scroll_offset, cursor_x) = input_viewport(app.input_cursor, inner_width);

    let visible_text: String = app
        .input
        .chars()
        .skip(scroll_offset)
        .take(inner_width)
        .collect();

    let input = Paragraph::new(visible_text)
        .style(Style::default().fg(Color::Cyan))
        .block(input_block);

    frame.render_widget(input, area);

    if editing {
        frame.set_cursor_position((area.x + cursor_x + 1, area.y + 1));
    }
}

/// Horizontal scroll offset and cursor column for an input box of
/// `inner_width` cells, keeping the cursor inside the box.
fn input_viewport(cursor: usize, inner_width: usize) -> (usize, u16) {
    let scroll_offset = if inner_width == 0 || cursor < inner_width {
        0
    } else {
        cursor - inner_width + 1
    };
    let cursor_x = (cursor - scroll_offset).min(inner_width.saturating_sub(1));
    (scroll_offset, cursor_x as u16)
}

fn render_sql_panel(app: &App, frame: &mut Frame, area: Rect) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Magenta))
        .title(" SQL + Results ");

    let text = match app.session.conversation().latest_sql_message() {
        Some(message) => {
            let sql = message.sql.as_deref().unwrap_or_default();
            let mut lines: Vec<Line> = sql
                .lines()
                .map(|l| Line::styled(l.to_string(), Style::default().fg(Color::White)))
                .collect();
            if let Some(results) = &message.results {
                lines.push(Line::default());
                lines.extend(result_lines(results));
            }
            Text::from(lines)
        }
        None => Text::from(SQL_PLACEHOLDER).style(Style::default().fg(Color::DarkGray)),
    };

    let panel = Paragraph::new(text)
        .block(block)
        .wrap(Wrap { trim: false })
        .scroll((app.sql_scroll, 0));

    frame.render_widget(panel, area);
}

/// Pipe-separated result table with a row count footer
fn result_lines(results: &QueryResults) -> Vec<Line<'static>> {
    let mut lines = vec![Line::styled(
        results.columns.join(" | "),
        Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
    )];

    for cells in results.row_texts().take(MAX_RESULT_ROWS) {
        lines.push(Line::raw(cells.join(" | ")));
    }

    let shown = results.rows.len().min(MAX_RESULT_ROWS);
    let total = results.total_rows();
    let footer = if shown < total {
        format!("({} of {} rows)", shown, total)
    } else {
        format!("({} rows)", total)
    };
    lines.push(Line::styled(footer, Style::default().fg(Color::DarkGray)));
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span_texts(line: &Line) -> Vec<String> {
        line.spans.iter().map(|s| s.content.to_string()).collect()
    }

    #[test]
    fn test_markdown_bold() {
        let line = parse_markdown_line("Total **revenue** by month");
        assert_eq!(span_texts(&line), vec!["Total ", "revenue", " by month"]);
        assert!(line.spans[1].style.add_modifier.contains(Modifier::BOLD));
    }

    #[test]
    fn test_markdown_unclosed_bold_is_literal() {
        let line = parse_markdown_line("a **b");
        assert_eq!(span_texts(&line), vec!["a ", "**b"]);
    }

    #[test]
    fn test_result_lines_table() {
        let results = QueryResults {
            columns: vec!["region".to_string(), "total".to_string()],
            rows: vec![
                vec![serde_json::json!("emea"), serde_json::json!(42)],
                vec![serde_json::json!("apac"), serde_json::Value::Null],
            ],
            row_count: 2,
        };

        let texts: Vec<String> = result_lines(&results).iter().map(|l| l.to_string()).collect();

        assert_eq!(texts, vec!["region | total", "emea | 42", "apac | NULL", "(2 rows)"]);
    }

    #[test]
    fn test_result_lines_truncated() {
        let results = QueryResults {
            columns: vec!["n".to_string()],
            rows: (0..MAX_RESULT_ROWS + 5).map(|i| vec![serde_json::json!(i)]).collect(),
            row_count: 1000,
        };

        let lines = result_lines(&results);

        assert_eq!(lines.len(), MAX_RESULT_ROWS + 2);
        assert_eq!(
            lines.last().unwrap().to_string(),
            format!("({} of 1000 rows)", MAX_RESULT_ROWS)
        );
    }

    #[test]
    fn test_input_viewport_scrolls_with_cursor() {
        assert_eq!(input_viewport(3, 10), (0, 3));
        assert_eq!(input_viewport(10, 10), (1, 9));
        assert_eq!(input_viewport(25, 10), (16, 9));
    }

    #[test]
    fn test_input_viewport_zero_width_keeps_cursor_in_box() {
        assert_eq!(input_viewport(7, 0), (0, 0));
        assert_eq!(input_viewport(0, 0), (0, 0));
    }

    #[test]
    fn test_markdown_empty() {
        assert!(parse_markdown_line("").spans.is_empty());
    }
}
