//! Keyboard events as delivered by the host.
//!
//! A [`KeyEvent`] carries the raw values the host's keyboard layer reports
//! (virtual key code, packed `lparam`, the 256-entry key-state table) plus
//! the character the key produces, if any. [`Key`] is the coarse
//! classification most input methods actually switch on.

/// Virtual-key codes used by the engine and the bundled input methods.
pub mod vk {
    pub const BACK: u32 = 0x08;
    pub const TAB: u32 = 0x09;
    pub const RETURN: u32 = 0x0D;
    pub const SHIFT: u32 = 0x10;
    pub const CONTROL: u32 = 0x11;
    pub const MENU: u32 = 0x12;
    pub const CAPITAL: u32 = 0x14;
    pub const ESCAPE: u32 = 0x1B;
    pub const SPACE: u32 = 0x20;
    pub const PRIOR: u32 = 0x21;
    pub const NEXT: u32 = 0x22;
    pub const END: u32 = 0x23;
    pub const HOME: u32 = 0x24;
    pub const LEFT: u32 = 0x25;
    pub const UP: u32 = 0x26;
    pub const RIGHT: u32 = 0x27;
    pub const DOWN: u32 = 0x28;
    pub const DELETE: u32 = 0x2E;
    pub const NUMLOCK: u32 = 0x90;
}

/// Press or release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyEventKind {
    Down,
    Up,
}

/// Coarse meaning of a key press.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    /// A key that produces a printable character.
    Char(char),
    Backspace,
    Delete,
    Left,
    Right,
    Up,
    Down,
    Home,
    End,
    PageUp,
    PageDown,
    Space,
    Enter,
    Escape,
    Tab,
    /// Anything else, by virtual key code.
    Other(u32),
}

/// Key-state bit for "currently pressed".
const KEY_DOWN_MASK: u8 = 0x80;
/// Key-state bit for "toggled on" (Caps Lock, Num Lock).
const KEY_TOGGLED_MASK: u8 = 0x01;

/// A key press or release.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyEvent {
    kind: KeyEventKind,
    key_code: u32,
    char_code: Option<char>,
    lparam: u32,
    key_states: [u8; 256],
}

impl KeyEvent {
    /// An event with an all-up key-state table and no character.
    pub fn new(kind: KeyEventKind, key_code: u32, lparam: u32) -> Self {
        Self {
            kind,
            key_code,
            char_code: None,
            lparam,
            key_states: [0; 256],
        }
    }

    pub fn down(key_code: u32) -> Self {
        Self::new(KeyEventKind::Down, key_code, 1)
    }

    pub fn up(key_code: u32) -> Self {
        // Transition and previous-state bits set, as for a real release.
        Self::new(KeyEventKind::Up, key_code, 0xC000_0001)
    }

    /// A key-down producing `ch`, with the virtual key a US layout would use.
    pub fn from_char(ch: char) -> Self {
        let key_code = match ch {
            'a'..='z' => ch.to_ascii_uppercase() as u32,
            'A'..='Z' | '0'..='9' => ch as u32,
            ' ' => vk::SPACE,
            _ => 0,
        };
        let mut event = Self::down(key_code).with_char(ch);
        if ch.is_ascii_uppercase() {
            event.key_states[vk::SHIFT as usize] = KEY_DOWN_MASK;
        }
        event
    }

    pub fn with_char(mut self, ch: char) -> Self {
        self.char_code = Some(ch);
        self
    }

    /// Replaces the key-state table (256 entries, as the host reports it).
    pub fn with_key_states(mut self, key_states: [u8; 256]) -> Self {
        self.key_states = key_states;
        self
    }

    /// Marks `key_code` as held in the key-state table.
    pub fn with_key_held(mut self, key_code: u32) -> Self {
        if let Some(state) = self.key_states.get_mut(key_code as usize) {
            *state |= KEY_DOWN_MASK;
        }
        self
    }

    pub fn kind(&self) -> KeyEventKind {
        self.kind
    }

    pub fn key_code(&self) -> u32 {
        self.key_code
    }

    pub fn char_code(&self) -> Option<char> {
        self.char_code
    }

    pub fn lparam(&self) -> u32 {
        self.lparam
    }

    /// Auto-repeat count, bits 0..16 of `lparam`.
    pub fn repeat_count(&self) -> u16 {
        (self.lparam & 0xffff) as u16
    }

    /// Hardware scan code, bits 16..24 of `lparam`.
    pub fn scan_code(&self) -> u8 {
        ((self.lparam >> 16) & 0xff) as u8
    }

    /// Bit 24 of `lparam`: right-hand Alt/Ctrl, arrows on the extended block.
    pub fn is_extended(&self) -> bool {
        self.lparam & (1 << 24) != 0
    }

    pub fn is_key_down(&self, key_code: u32) -> bool {
        self.key_state(key_code) & KEY_DOWN_MASK != 0
    }

    pub fn is_key_toggled(&self, key_code: u32) -> bool {
        self.key_state(key_code) & KEY_TOGGLED_MASK != 0
    }

    fn key_state(&self, key_code: u32) -> u8 {
        self.key_states.get(key_code as usize).copied().unwrap_or(0)
    }

    /// Whether Ctrl or Alt is held, i.e. the key is probably a shortcut.
    pub fn has_command_modifier(&self) -> bool {
        self.is_key_down(vk::CONTROL) || self.is_key_down(vk::MENU)
    }

    pub fn key(&self) -> Key {
        match self.key_code {
            vk::BACK => Key::Backspace,
            vk::DELETE => Key::Delete,
            vk::LEFT => Key::Left,
            vk::RIGHT => Key::Right,
            vk::UP => Key::Up,
            vk::DOWN => Key::Down,
            vk::HOME => Key::Home,
            vk::END => Key::End,
            vk::PRIOR => Key::PageUp,
            vk::NEXT => Key::PageDown,
            vk::SPACE => Key::Space,
            vk::RETURN => Key::Enter,
            vk::ESCAPE => Key::Escape,
            vk::TAB => Key::Tab,
            code => match self.char_code {
                Some(ch) if !ch.is_control() => Key::Char(ch),
                _ => Key::Other(code),
            },
        }
    }
}

impl std::fmt::Debug for KeyEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyEvent")
            .field("kind", &self.kind)
            .field("key_code", &format_args!("{:#04x}", self.key_code))
            .field("char_code", &self.char_code)
            .field("lparam", &format_args!("{:#010x}", self.lparam))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lparam_fields() {
        // repeat 3, scan code 0x1e, extended
        let event = KeyEvent::new(KeyEventKind::Down, 'A' as u32, 0x011e_0003);
        assert_eq!(event.repeat_count(), 3);
        assert_eq!(event.scan_code(), 0x1e);
        assert!(event.is_extended());

        let plain = KeyEvent::new(KeyEventKind::Down, 'A' as u32, 0x001e_0001);
        assert!(!plain.is_extended());
    }

    #[test]
    fn test_key_state_bits() {
        let mut states = [0u8; 256];
        states[vk::SHIFT as usize] = 0x80;
        states[vk::CAPITAL as usize] = 0x01;
        let event = KeyEvent::down('A' as u32).with_key_states(states);
        assert!(event.is_key_down(vk::SHIFT));
        assert!(!event.is_key_toggled(vk::SHIFT));
        assert!(event.is_key_toggled(vk::CAPITAL));
        assert!(!event.is_key_down(vk::CAPITAL));
        assert!(!event.is_key_down(4096));
    }

    #[test]
    fn test_classification() {
        assert_eq!(KeyEvent::from_char('q').key(), Key::Char('q'));
        assert_eq!(KeyEvent::from_char(' ').key(), Key::Space);
        assert_eq!(KeyEvent::down(vk::BACK).key(), Key::Backspace);
        assert_eq!(KeyEvent::down(vk::RETURN).key(), Key::Enter);
        assert_eq!(KeyEvent::down(vk::SHIFT).key(), Key::Other(vk::SHIFT));
    }

    #[test]
    fn test_uppercase_char_holds_shift() {
        let event = KeyEvent::from_char('Q');
        assert_eq!(event.key_code(), 'Q' as u32);
        assert!(event.is_key_down(vk::SHIFT));
        assert!(!event.has_command_modifier());
    }

    #[test]
    fn test_release_kind() {
        let event = KeyEvent::up(vk::SPACE);
        assert_eq!(event.kind(), KeyEventKind::Up);
        assert_eq!(event.repeat_count(), 1);
    }
}
