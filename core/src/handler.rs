//! Input-method behaviour plugged into the engine.
//!
//! The engine handles the host protocol; an input method supplies a
//! [`TextServiceHandler`] and overrides only the hooks it cares about.

use crate::guid::Guid;
use crate::key_event::KeyEvent;
use crate::langbar::CommandType;
use crate::session::EditSession;
use crate::text_service::TextService;

/// Callbacks from the engine to an input method.
///
/// Every hook receives the service so it can drive the composition. Hooks
/// that run inside an edit session also receive the session; composition
/// calls made from them should use the `*_in` session variants.
#[allow(unused_variables)]
pub trait TextServiceHandler {
    /// The service finished activating.
    fn on_activate(&self, service: &TextService) {}

    /// The service is about to tear down its subscriptions. Any composition
    /// has already been ended.
    fn on_deactivate(&self, service: &TextService) {}

    /// The service's key sink gained foreground focus.
    fn on_set_focus(&self, service: &TextService) {}

    fn on_kill_focus(&self, service: &TextService) {}

    /// Whether `key` would be handled. Must not change any state.
    fn filter_key_down(&self, service: &TextService, key: &KeyEvent) -> bool {
        false
    }

    /// Handles a key that passed [`filter_key_down`](Self::filter_key_down).
    /// Returns whether the key was eaten.
    fn on_key_down(
        &self,
        service: &TextService,
        key: &KeyEvent,
        session: &EditSession<'_>,
    ) -> bool {
        false
    }

    fn filter_key_up(&self, service: &TextService, key: &KeyEvent) -> bool {
        false
    }

    fn on_key_up(&self, service: &TextService, key: &KeyEvent, session: &EditSession<'_>) -> bool {
        false
    }

    /// A key registered with [`TextService::add_preserved_key`] was pressed.
    fn on_preserved_key(&self, service: &TextService, guid: &Guid) -> bool {
        false
    }

    /// A language-bar button or menu entry was used.
    fn on_command(&self, service: &TextService, id: u32, command: CommandType) -> bool {
        false
    }

    /// A monitored compartment changed. Keyboard open/close has already been
    /// tracked by the engine when this runs.
    fn on_compartment_changed(&self, service: &TextService, key: &Guid) {}

    fn on_keyboard_status_changed(&self, service: &TextService, opened: bool) {}

    /// The host changed how the language bar is shown (floating, docked,
    /// hidden); `status` carries the host's display flags.
    fn on_lang_bar_status_changed(&self, service: &TextService, status: u32) {}

    /// The composition is gone. `forced` is true when the host ended it,
    /// false when the service did.
    fn on_composition_terminated(&self, service: &TextService, forced: bool) {}

    fn on_lang_profile_activated(&self, service: &TextService, profile: &Guid) {}

    fn on_lang_profile_deactivated(&self, service: &TextService, profile: &Guid) {}
}

/// A handler that accepts every default.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHandler;

impl TextServiceHandler for NoopHandler {}
