//! Single-line text inputs shared by the sign-in and editor screens.

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

const MASK: char = '•';
const CARET: char = '▏';

/// Editable single-line text with a character cursor.
#[derive(Debug, Clone, Default)]
pub struct TextInput {
    value: String,
    cursor: usize,
    masked: bool,
    max_len: Option<usize>,
}

impl TextInput {
    pub fn new() -> Self {
        Self::default()
    }

    /// An input whose contents are shown as bullets.
    pub fn masked() -> Self {
        Self {
            masked: true,
            ..Self::default()
        }
    }

    pub fn with_max_len(mut self, max_len: usize) -> Self {
        self.max_len = Some(max_len);
        self
    }

    pub fn with_value(mut self, value: &str) -> Self {
        self.set(value);
        self
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn set(&mut self, value: &str) {
        self.value = value.to_string();
        self.cursor = self.value.chars().count();
    }

    pub fn clear(&mut self) {
        self.value.clear();
        self.cursor = 0;
    }

    /// Text to render, masked when configured.
    pub fn display(&self) -> String {
        if self.masked {
            std::iter::repeat(MASK).take(self.value.chars().count()).collect()
        } else {
            self.value.clone()
        }
    }

    /// Cursor position in characters.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Rendered text with a caret drawn at the cursor.
    pub fn display_with_caret(&self) -> String {
        let mut text: Vec<char> = self.display().chars().collect();
        text.insert(self.cursor().min(text.len()), CARET);
        text.into_iter().collect()
    }

    /// Apply an editing key. Returns `true` when the value changed.
    pub fn handle_key(&mut self, key: &KeyEvent) -> bool {
        if key.modifiers.contains(KeyModifiers::CONTROL) {
            return match key.code {
                KeyCode::Char('u') => {
                    let changed = !self.value.is_empty();
                    self.clear();
                    changed
                }
                KeyCode::Char('a') => {
                    self.cursor = 0;
                    false
                }
                KeyCode::Char('e') => {
                    self.cursor = self.value.chars().count();
                    false
                }
                _ => false,
            };
        }
        match key.code {
            KeyCode::Char(ch) => self.insert(ch),
            KeyCode::Backspace => self.backspace(),
            KeyCode::Delete => self.delete(),
            KeyCode::Left => {
                self.move_cursor(-1);
                false
            }
            KeyCode::Right => {
                self.move_cursor(1);
                false
            }
            KeyCode::Home => {
                self.cursor = 0;
                false
            }
            KeyCode::End => {
                self.cursor = self.value.chars().count();
                false
            }
            _ => false,
        }
    }

    fn move_cursor(&mut self, delta: isize) {
        let len = self.value.chars().count() as isize;
        self.cursor = (self.cursor as isize + delta).clamp(0, len) as usize;
    }

    fn byte_index(&self, char_index: usize) -> usize {
        self.value
            .char_indices()
            .nth(char_index)
            .map(|(idx, _)| idx)
            .unwrap_or(self.value.len())
    }

    fn insert(&mut self, ch: char) -> bool {
        if ch.is_control() {
            return false;
        }
        if let Some(max) = self.max_len {
            if self.value.chars().count() >= max {
                return false;
            }
        }
        let idx = self.byte_index(self.cursor);
        self.value.insert(idx, ch);
        self.cursor += 1;
        true
    }

    fn backspace(&mut self) -> bool {
        if self.cursor == 0 {
            return false;
        }
        self.cursor -= 1;
        let idx = self.byte_index(self.cursor);
        self.value.remove(idx);
        true
    }

    fn delete(&mut self) -> bool {
        if self.cursor >= self.value.chars().count() {
            return false;
        }
        let idx = self.byte_index(self.cursor);
        self.value.remove(idx);
        true
    }
}
