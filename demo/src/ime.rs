//! The demo input method.
//!
//! Letters typed while enabled build a composition (shown upper-cased by
//! default); Space or Enter commits it, Escape cancels it, and the editing
//! keys move through it. A language-bar toggle button and Shift+Space switch
//! between composing and pass-through.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use libime_core::key_event::vk;
use libime_core::{
    ButtonStyle, CommandType, ComPtr, EditSession, Guid, Key, KeyEvent, LangBarButton, Modifiers,
    TextService, TextServiceHandler,
};
use tracing::{debug, info, warn};
use uuid::uuid;

use crate::config::DemoConfig;
use crate::input_buffer::InputBuffer;

pub const CLSID: Guid = uuid!("b7e1c3a0-52d4-4e8f-9a61-0c2d3e4f5a60");
pub const PROFILE: Guid = uuid!("b7e1c3a0-52d4-4e8f-9a61-0c2d3e4f5a61");
pub const GUID_TOGGLE_BUTTON: Guid = uuid!("b7e1c3a0-52d4-4e8f-9a61-0c2d3e4f5a62");
pub const GUID_TOGGLE_KEY: Guid = uuid!("b7e1c3a0-52d4-4e8f-9a61-0c2d3e4f5a63");

/// Command id of the toggle button.
pub const TOGGLE_COMMAND: u32 = 1;

/// State shared between the handler and whoever drives it.
#[derive(Debug, Default)]
pub struct DemoState {
    enabled: Cell<bool>,
    buffer: RefCell<InputBuffer>,
    committed: RefCell<Vec<String>>,
}

impl DemoState {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: Cell::new(enabled),
            ..Self::default()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.get()
    }

    /// Raw letters of the current composition.
    pub fn preedit(&self) -> String {
        self.buffer.borrow().text()
    }

    pub fn cursor(&self) -> usize {
        self.buffer.borrow().cursor()
    }

    /// Every string committed so far, oldest first.
    pub fn committed(&self) -> Vec<String> {
        self.committed.borrow().clone()
    }
}

/// Handler of the demo input method.
pub struct DemoIme {
    state: Rc<DemoState>,
    uppercase: bool,
    label_on: String,
    label_off: String,
}

/// Creates the text service with its button and preserved key registered.
/// Nothing reaches the host until the service is activated.
pub fn create_service(config: &DemoConfig) -> (ComPtr<TextService>, Rc<DemoState>) {
    let state = Rc::new(DemoState::new(config.start_enabled));
    let handler = DemoIme {
        state: Rc::clone(&state),
        uppercase: config.uppercase,
        label_on: config.label_on.clone(),
        label_off: config.label_off.clone(),
    };
    let service = TextService::with_config(CLSID, config.core.clone(), handler);

    let button = LangBarButton::new(
        &service,
        GUID_TOGGLE_BUTTON,
        TOGGLE_COMMAND,
        ButtonStyle::Toggle,
    );
    button.set_text(config.label(config.start_enabled));
    button.set_tooltip("Toggle composing");
    button.set_toggled(config.start_enabled);
    service.add_button(button);
    service.add_preserved_key(vk::SPACE, Modifiers::SHIFT, GUID_TOGGLE_KEY);

    (service, state)
}

impl DemoIme {
    fn label(&self, enabled: bool) -> &str {
        if enabled {
            &self.label_on
        } else {
            &self.label_off
        }
    }

    fn display(&self, raw: &str) -> String {
        if self.uppercase {
            raw.to_ascii_uppercase()
        } else {
            raw.to_string()
        }
    }

    /// Pushes the buffer into the document and places the caret.
    fn render(&self, service: &TextService, session: &EditSession<'_>) -> bool {
        let (text, cursor) = {
            let buffer = self.state.buffer.borrow();
            (self.display(&buffer.text()), buffer.cursor())
        };
        service.set_composition_string(session, &text).is_ok()
            && service.set_composition_cursor(session, cursor).is_ok()
    }

    fn commit(&self, service: &TextService, session: &EditSession<'_>) -> bool {
        let text = self.display(&self.state.preedit());
        if service.end_composition_in(session).is_err() {
            return false;
        }
        debug!(%text, "committed");
        self.state.committed.borrow_mut().push(text);
        true
    }

    fn cancel(&self, service: &TextService, session: &EditSession<'_>) -> bool {
        if let Err(err) = service.set_composition_string(session, "") {
            warn!(error = %err, "could not clear composition");
        }
        service.end_composition_in(session).is_ok()
    }

    fn toggle(&self, service: &TextService) {
        // Whatever is being composed is committed before switching.
        if let Some(context) = service.composition_context() {
            let text = self.display(&self.state.preedit());
            match service.end_composition(&context) {
                Ok(()) => self.state.committed.borrow_mut().push(text),
                Err(err) => warn!(error = %err, "could not commit before toggling"),
            }
        }

        let enabled = !self.state.enabled.get();
        self.state.enabled.set(enabled);
        info!(enabled, "input mode toggled");

        if let Some(button) = service
            .lang_bar_buttons()
            .into_iter()
            .find(|button| button.guid() == GUID_TOGGLE_BUTTON)
        {
            button.set_text(self.label(enabled));
            button.set_toggled(enabled);
        }
    }
}

impl TextServiceHandler for DemoIme {
    fn on_activate(&self, service: &TextService) {
        info!(client = service.client_id().0, "demo input method activated");
    }

    fn on_deactivate(&self, _service: &TextService) {
        self.state.buffer.borrow_mut().clear();
        info!("demo input method deactivated");
    }

    fn filter_key_down(&self, service: &TextService, key: &KeyEvent) -> bool {
        if !self.state.is_enabled() || key.has_command_modifier() {
            return false;
        }
        match key.key() {
            Key::Char(ch) => ch.is_ascii_alphabetic(),
            Key::Backspace
            | Key::Delete
            | Key::Left
            | Key::Right
            | Key::Home
            | Key::End
            | Key::Space
            | Key::Enter
            | Key::Escape => service.is_composing(),
            _ => false,
        }
    }

    fn on_key_down(
        &self,
        service: &TextService,
        key: &KeyEvent,
        session: &EditSession<'_>,
    ) -> bool {
        match key.key() {
            Key::Char(ch) => {
                if !service.is_composing() {
                    if let Err(err) = service.start_composition_in(session) {
                        warn!(error = %err, "could not start composition");
                        return false;
                    }
                    self.state.buffer.borrow_mut().clear();
                }
                self.state.buffer.borrow_mut().insert_char(ch);
                self.render(service, session)
            }
            Key::Backspace | Key::Delete => {
                let emptied = {
                    let mut buffer = self.state.buffer.borrow_mut();
                    if key.key() == Key::Backspace {
                        buffer.delete_before();
                    } else {
                        buffer.delete_after();
                    }
                    buffer.is_empty()
                };
                if emptied {
                    self.cancel(service, session)
                } else {
                    self.render(service, session)
                }
            }
            Key::Left | Key::Right | Key::Home | Key::End => {
                let cursor = {
                    let mut buffer = self.state.buffer.borrow_mut();
                    match key.key() {
                        Key::Left => {
                            buffer.move_left();
                        }
                        Key::Right => {
                            buffer.move_right();
                        }
                        Key::Home => buffer.move_to_start(),
                        _ => buffer.move_to_end(),
                    }
                    buffer.cursor()
                };
                service.set_composition_cursor(session, cursor).is_ok()
            }
            Key::Space | Key::Enter => self.commit(service, session),
            Key::Escape => self.cancel(service, session),
            _ => false,
        }
    }

    fn on_preserved_key(&self, service: &TextService, guid: &Guid) -> bool {
        if *guid != GUID_TOGGLE_KEY {
            return false;
        }
        self.toggle(service);
        true
    }

    fn on_command(&self, service: &TextService, id: u32, command: CommandType) -> bool {
        match (id, command) {
            (TOGGLE_COMMAND, CommandType::LeftClick) => {
                self.toggle(service);
                true
            }
            _ => false,
        }
    }

    fn on_keyboard_status_changed(&self, _service: &TextService, opened: bool) {
        debug!(opened, "keyboard status changed");
    }

    fn on_composition_terminated(&self, _service: &TextService, forced: bool) {
        if forced {
            debug!(preedit = %self.state.preedit(), "composition terminated by host");
        }
        self.state.buffer.borrow_mut().clear();
    }

    fn on_lang_bar_status_changed(&self, _service: &TextService, status: u32) {
        debug!(status, "language bar display changed");
    }
}

