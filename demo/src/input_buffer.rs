//! Raw keystrokes of the composition being typed, with a caret.
//!
//! The cursor counts characters, which is also how the engine positions the
//! caret inside a composition, so it can be handed to
//! `TextService::set_composition_cursor` unchanged.

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InputBuffer {
    chars: Vec<char>,
    cursor: usize,
}

impl InputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(&self) -> String {
        self.chars.iter().collect()
    }

    /// Caret position in characters.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.chars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    pub fn clear(&mut self) {
        self.chars.clear();
        self.cursor = 0;
    }

    pub fn insert_char(&mut self, ch: char) {
        self.chars.insert(self.cursor, ch);
        self.cursor += 1;
    }

    pub fn insert_str(&mut self, s: &str) {
        for ch in s.chars() {
            self.insert_char(ch);
        }
    }

    /// Backspace. Returns whether anything was removed.
    pub fn delete_before(&mut self) -> bool {
        if self.cursor == 0 {
            return false;
        }
        self.cursor -= 1;
        self.chars.remove(self.cursor);
        true
    }

    /// Delete key. Returns whether anything was removed.
    pub fn delete_after(&mut self) -> bool {
        if self.cursor >= self.chars.len() {
            return false;
        }
        self.chars.remove(self.cursor);
        true
    }

    pub fn move_left(&mut self) -> bool {
        if self.cursor == 0 {
            return false;
        }
        self.cursor -= 1;
        true
    }

    pub fn move_right(&mut self) -> bool {
        if self.cursor >= self.chars.len() {
            return false;
        }
        self.cursor += 1;
        true
    }

    pub fn move_to_start(&mut self) {
        self.cursor = 0;
    }

    pub fn move_to_end(&mut self) {
        self.cursor = self.chars.len();
    }

    /// Fails when `pos` is past the end.
    pub fn set_cursor(&mut self, pos: usize) -> bool {
        if pos > self.chars.len() {
            return false;
        }
        self.cursor = pos;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_at_cursor() {
        let mut buffer = InputBuffer::new();
        buffer.insert_str("ac");
        buffer.move_left();
        buffer.insert_char('b');
        assert_eq!(buffer.text(), "abc");
        assert_eq!(buffer.cursor(), 2);
    }

    #[test]
    fn test_cursor_counts_characters() {
        let mut buffer = InputBuffer::new();
        buffer.insert_str("ñü");
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.cursor(), 2);
        assert!(buffer.delete_before());
        assert_eq!(buffer.text(), "ñ");
    }

    #[test]
    fn test_edges_are_refused() {
        let mut buffer = InputBuffer::new();
        assert!(!buffer.delete_before());
        assert!(!buffer.delete_after());
        assert!(!buffer.move_left());
        assert!(!buffer.move_right());
        buffer.insert_str("xy");
        assert!(!buffer.set_cursor(3));
        assert!(buffer.set_cursor(0));
        assert!(buffer.delete_after());
        assert_eq!(buffer.text(), "y");
        buffer.move_to_end();
        assert_eq!(buffer.cursor(), 1);
        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.cursor(), 0);
    }
}
