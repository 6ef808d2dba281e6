// core/tests/common/mod.rs
//! Shared fixture: a recording input method activated on the simulated host.
#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use libime_core::host::DocumentContext;
use libime_core::key_event::vk;
use libime_core::sim::{SimContext, SimThreadMgr};
use libime_core::{
    CommandType, ComPtr, Config, EditSession, Guid, Key, KeyEvent, TextInputProcessor,
    TextService, TextServiceHandler,
};
use uuid::uuid;

pub const CLSID: Guid = uuid!("6a1e2b3c-4d5e-4f60-8172-93a4b5c6d7e8");
pub const PROFILE: Guid = uuid!("6a1e2b3c-4d5e-4f60-8172-93a4b5c6d7e9");

/// Everything the handler was told, in order.
#[derive(Default)]
pub struct Log(RefCell<Vec<String>>);

impl Log {
    pub fn push(&self, event: impl Into<String>) {
        self.0.borrow_mut().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.0.borrow().clone()
    }

    pub fn contains(&self, event: &str) -> bool {
        self.0.borrow().iter().any(|seen| seen == event)
    }

    pub fn count(&self, event: &str) -> usize {
        self.0.borrow().iter().filter(|seen| *seen == event).count()
    }

    pub fn clear(&self) {
        self.0.borrow_mut().clear();
    }
}

/// Composes ASCII letters verbatim; Enter and Escape end the composition.
pub struct Recorder {
    log: Rc<Log>,
    buffer: RefCell<String>,
}

impl Recorder {
    pub fn new(log: Rc<Log>) -> Self {
        Self {
            log,
            buffer: RefCell::new(String::new()),
        }
    }
}

impl TextServiceHandler for Recorder {
    fn on_activate(&self, _service: &TextService) {
        self.log.push("activate");
    }

    fn on_deactivate(&self, service: &TextService) {
        self.log.push(format!("deactivate composing={}", service.is_composing()));
    }

    fn on_set_focus(&self, _service: &TextService) {
        self.log.push("focus");
    }

    fn on_kill_focus(&self, _service: &TextService) {
        self.log.push("kill focus");
    }

    fn filter_key_down(&self, service: &TextService, key: &KeyEvent) -> bool {
        match key.key() {
            Key::Char(ch) => ch.is_ascii_alphabetic(),
            Key::Enter | Key::Escape => service.is_composing(),
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
                        self.log.push(format!("start failed: {err}"));
                        return false;
                    }
                    self.buffer.borrow_mut().clear();
                }
                let text = {
                    let mut buffer = self.buffer.borrow_mut();
                    buffer.push(ch);
                    buffer.clone()
                };
                service.set_composition_string(session, &text).is_ok()
            }
            Key::Enter | Key::Escape => service.end_composition_in(session).is_ok(),
            _ => false,
        }
    }

    fn filter_key_up(&self, _service: &TextService, key: &KeyEvent) -> bool {
        key.key_code() == vk::SHIFT
    }

    fn on_key_up(
        &self,
        _service: &TextService,
        _key: &KeyEvent,
        _session: &EditSession<'_>,
    ) -> bool {
        self.log.push("shift up");
        true
    }

    fn on_preserved_key(&self, _service: &TextService, guid: &Guid) -> bool {
        self.log.push(format!("preserved {guid}"));
        true
    }

    fn on_command(&self, _service: &TextService, id: u32, command: CommandType) -> bool {
        self.log.push(format!("command {id} {command:?}"));
        true
    }

    fn on_compartment_changed(&self, _service: &TextService, key: &Guid) {
        self.log.push(format!("compartment {key}"));
    }

    fn on_keyboard_status_changed(&self, _service: &TextService, opened: bool) {
        self.log.push(format!("keyboard opened={opened}"));
    }

    fn on_lang_bar_status_changed(&self, _service: &TextService, status: u32) {
        self.log.push(format!("lang bar {status}"));
    }

    fn on_composition_terminated(&self, _service: &TextService, forced: bool) {
        self.buffer.borrow_mut().clear();
        self.log.push(format!("terminated forced={forced}"));
    }

    fn on_lang_profile_activated(&self, _service: &TextService, profile: &Guid) {
        self.log.push(format!("profile on {profile}"));
    }

    fn on_lang_profile_deactivated(&self, _service: &TextService, profile: &Guid) {
        self.log.push(format!("profile off {profile}"));
    }
}

/// A host with one focused document and an activated recording service.
pub struct Fixture {
    pub host: ComPtr<SimThreadMgr>,
    pub context: ComPtr<SimContext>,
    pub service: ComPtr<TextService>,
    pub log: Rc<Log>,
}

impl Fixture {
    pub fn new(text: &str) -> Self {
        Self::with_config(text, Config::default())
    }

    pub fn with_config(text: &str, config: Config) -> Self {
        let fixture = Self::inactive(text, config);
        fixture
            .service
            .activate(fixture.host.as_thread_mgr(), fixture.host.new_client_id())
            .expect("activation");
        fixture
    }

    /// Everything set up except activation.
    pub fn inactive(text: &str, config: Config) -> Self {
        let host = SimThreadMgr::new();
        let context = host.create_context(text);
        host.set_focus(Some(&context));
        let log = Rc::new(Log::default());
        let service = TextService::with_config(CLSID, config, Recorder::new(Rc::clone(&log)));
        Self {
            host,
            context,
            service,
            log,
        }
    }

    pub fn document(&self) -> ComPtr<dyn DocumentContext> {
        self.context.as_document()
    }

    /// Sends each character as a key press; returns how many were eaten.
    pub fn type_text(&self, text: &str) -> usize {
        text.chars()
            .filter(|ch| self.host.key_down(&KeyEvent::from_char(*ch)))
            .count()
    }

    pub fn press(&self, key_code: u32) -> bool {
        self.host.key_down(&KeyEvent::down(key_code))
    }
}
