use std::ops::ControlFlow;

use iopsdata_core::{
    ChatClient, ChatError, ChatMessage, ChatSession, Config, Notification, Provider,
};
use log::{debug, warn};
use ratatui::layout::Rect;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

use crate::tui::{AppEvent, ChatEvent};

/// Ticks (300ms each) a notification stays in the footer
const NOTIFICATION_TICKS: u8 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    Editing,
}

pub struct App {
    // Core state
    pub should_quit: bool,
    pub input_mode: InputMode,

    // Question input
    pub input: String,
    pub input_cursor: usize, // cursor position in input, in chars

    // Conversation
    pub session: ChatSession,
    pub client: ChatClient,
    pub provider: Provider,
    pub reply_task: Option<JoinHandle<()>>,

    // Chat scrolling
    pub chat_scroll: u16,
    pub chat_height: u16, // Height of chat area for scroll calculations
    pub chat_width: u16,  // Width of chat area for wrap calculations
    pub follow_reply: bool,

    // Panel areas for mouse hit-testing (updated during render)
    pub chat_area: Option<Rect>,
    pub sql_area: Option<Rect>,
    pub sql_scroll: u16,

    // Footer notification
    pub notification: Option<Notification>,
    pub notification_ticks: u8,

    // Animation state
    pub animation_frame: u8, // 0-2 for ellipsis animation

    events: UnboundedSender<AppEvent>,
}

impl App {
    pub fn new(config: &Config, client: ChatClient, events: UnboundedSender<AppEvent>) -> Self {
        let provider = client.provider().unwrap_or_default();

        Self {
            should_quit: false,
            input_mode: InputMode::Editing,
            input: String::new(),
            input_cursor: 0,
            session: ChatSession::new().with_sql_extraction(config.extract_sql()),
            client,
            provider,
            reply_task: None,
            chat_scroll: 0,
            chat_height: 0,
            chat_width: 0,
            follow_reply: true,
            chat_area: None,
            sql_area: None,
            sql_scroll: 0,
            notification: None,
            notification_ticks: 0,
            animation_frame: 0,
            events,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.session.is_busy()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        self.session.conversation().messages()
    }

    /// Send the current input. Ignored while a reply is still streaming.
    pub fn submit(&mut self) {
        let question = self.input.trim().to_string();
        let id = match self.session.begin(&question) {
            Ok(id) => id,
            Err(ChatError::Busy) => {
                debug!("Reply still streaming, ignoring send");
                return;
            }
            Err(ChatError::EmptyQuestion) => return,
            Err(e) => {
                self.notify(Notification::chat_failed(&e));
                return;
            }
        };

        self.input.clear();
        self.input_cursor = 0;
        self.follow_reply = true;
        self.scroll_chat_to_bottom();

        // Spawn background task to stream the reply into the event loop
        let client = self.client.clone();
        let tx = self.events.clone();
        self.reply_task = Some(tokio::spawn(async move {
            let updates = tx.clone();
            let outcome = client
                .ask(&question, id, |update| {
                    match updates.send(AppEvent::Chat(ChatEvent::Update(update))) {
                        Ok(()) => ControlFlow::Continue(()),
                        Err(_) => ControlFlow::Break(()),
                    }
                })
                .await;
            let _ = tx.send(AppEvent::Chat(ChatEvent::Finished { id, outcome }));
        }));
    }

    pub fn handle_chat_event(&mut self, event: ChatEvent) {
        match event {
            ChatEvent::Update(update) => {
                if self.session.apply(update) && self.follow_reply {
                    self.scroll_chat_to_bottom();
                }
            }
            ChatEvent::Finished { id, outcome } => {
                let mut raised = None;
                self.session.finish(id, outcome, |n| raised = Some(n));
                self.reply_task = None;
                if let Some(notification) = raised {
                    self.notify(notification);
                }
                if self.follow_reply {
                    self.scroll_chat_to_bottom();
                }
            }
        }
    }

    pub fn notify(&mut self, notification: Notification) {
        self.notification = Some(notification);
        self.notification_ticks = NOTIFICATION_TICKS;
    }

    /// Tick animation frame and expire notifications (called by Tick event)
    pub fn tick(&mut self) {
        if self.is_busy() {
            self.animation_frame = (self.animation_frame + 1) % 3;
        }
        if self.notification.is_some() {
            self.notification_ticks = self.notification_ticks.saturating_sub(1);
            if self.notification_ticks == 0 {
                self.notification = None;
            }
        }
    }

    pub fn cycle_provider(&mut self) {
        self.provider = self.provider.next();
        self.client.set_provider(Some(self.provider));
        if let Err(e) = Config::save_provider(self.provider) {
            warn!("Could not persist provider choice: {}", e);
            self.notify(Notification::settings_not_saved(&e));
        }
    }

    /// Hand the latest generated SQL off for execution
    pub fn queue_latest_sql(&mut self) {
        let queued = self
            .session
            .conversation()
            .latest_sql()
            .map(Notification::query_queued);
        if let Some(notification) = queued {
            self.notify(notification);
        }
    }

    pub fn clear_conversation(&mut self) {
        if self.session.clear().is_ok() {
            self.chat_scroll = 0;
            self.sql_scroll = 0;
        }
    }

    pub fn scroll_chat_down(&mut self, lines: u16) {
        self.chat_scroll = self.chat_scroll.saturating_add(lines);
        self.follow_reply = false;
    }

    pub fn scroll_chat_up(&mut self, lines: u16) {
        self.chat_scroll = self.chat_scroll.saturating_sub(lines);
        self.follow_reply = false;
    }

    /// Scroll chat to bottom so the streaming reply stays visible
    pub fn scroll_chat_to_bottom(&mut self) {
        // Use actual chat width for wrap calculation, default to 50 if not set
        let wrap_width = if self.chat_width > 0 {
            self.chat_width as usize
        } else {
            50
        };

        let mut total_lines: usize = 0;
        for msg in self.messages() {
            total_lines += 1; // Role line ("You:" or "AI:")
            total_lines += wrapped_line_count(&msg.content, wrap_width);
            if msg.sql.is_some() {
                total_lines += 1; // SQL marker
            }
            total_lines += 1; // Blank line after message
        }

        let visible_height = if self.chat_height > 0 {
            self.chat_height as usize
        } else {
            20
        };

        self.chat_scroll = total_lines.saturating_sub(visible_height).min(u16::MAX as usize) as u16;
        self.follow_reply = true;
    }

    /// Stop any streaming reply before the UI goes away
    pub fn shutdown(&mut self) {
        if let Some(task) = self.reply_task.take() {
            task.abort();
        }
    }
}

fn wrapped_line_count(text: &str, width: usize) -> usize {
    let width = width.max(1);
    text.lines()
        .map(|line| {
            // Use character count, not byte length, for proper UTF-8 handling
            let chars = line.chars().count();
            if chars == 0 {
                1
            } else {
                chars.div_ceil(width)
            }
        })
        .sum::<usize>()
        .max(1)
}
