//! The text-service engine.
//!
//! [`TextService`] is the object a host activates. It keeps the host
//! subscriptions for as long as it is active, routes keyboard input to the
//! injected [`TextServiceHandler`], and owns the composition state machine:
//!
//! ```text
//!            start_composition
//!   Idle ─────────────────────────▶ Composing ──┐ set_composition_string
//!    ▲                                 │  ▲      │ set_composition_cursor
//!    │ end_composition (forced=false)  │  └──────┘
//!    │ host termination (forced=true)  │
//!    └─────────────────────────────────┘
//! ```
//!
//! Composition edits must run inside an edit session. The `*_in` methods take
//! the session of a hook that is already running in one; the others request a
//! session first. No `RefCell` borrow is held across a host call, so hooks
//! and host notifications may re-enter the engine freely.

use std::cell::{Cell, RefCell};

use tracing::{debug, trace, warn};

use crate::com::{ComObject, ComPtr, Interface, InterfaceEntry, SelfRef};
use crate::composition::{caret_at_end, caret_in, range_covers, CompositionState};
use crate::config::Config;
use crate::display_attribute::{
    find_attribute_info, AttributeInfo, DisplayAttributeEnum, DisplayAttributeInfo,
    DisplayAttributeProvider, DisplayAttributeTable, EnumDisplayAttributeInfo,
};
use crate::error::{HostError, HostResult, ImeError, Result};
use crate::guid::{
    Guid, GUID_COMPARTMENT_EMPTYCONTEXT, GUID_COMPARTMENT_KEYBOARD_DISABLED,
    GUID_COMPARTMENT_KEYBOARD_OPENCLOSE, GUID_PROP_ATTRIBUTE,
};
use crate::handler::TextServiceHandler;
use crate::host::{
    ActivateFlags, Anchor, ClientId, Compartment, CompartmentMgr, Composition, ContextComposition,
    DocumentContext, EditRecord, InsertAtSelection, KeystrokeMgr, LangBarItemMgr, LangBarMgr,
    Modifiers, PreservedKey, Rect, Selection, Source, TextRange, ThreadMgr,
};
use crate::key_event::KeyEvent;
use crate::langbar::{CommandType, LangBarButton, LangBarEventSink, LangBarItemButton};
use crate::session::{request_session, EditCookie, EditSession};
use crate::sink::{
    ActiveLanguageProfileNotifySink, CompartmentEventSink, CompositionSink, KeyEventSink,
    TextEditSink, TextInputProcessor, ThreadMgrEventSink, IID_TEXT_INPUT_PROCESSOR_EX,
};
use crate::subscription::Subscription;

/// The composition in progress and the document it lives in.
struct ActiveComposition {
    handle: ComPtr<dyn Composition>,
    context: ComPtr<dyn DocumentContext>,
}

/// Host subscriptions held while active.
#[derive(Default)]
struct Listeners {
    thread_mgr_events: Subscription,
    lang_profile: Subscription,
    text_edit: Subscription,
    keyboard_open_close: Subscription,
    lang_bar_events: Subscription,
}

#[derive(Debug, Clone)]
struct PreservedKeyEntry {
    guid: Guid,
    key: PreservedKey,
    description: String,
}

struct CompartmentMonitor {
    key: Guid,
    global: bool,
    subscription: Subscription,
}

/// A text service: the engine object the host activates.
pub struct TextService {
    this: SelfRef<TextService>,
    clsid: Guid,
    config: Config,
    handler: Box<dyn TextServiceHandler>,

    thread_mgr: RefCell<Option<ComPtr<dyn ThreadMgr>>>,
    client_id: Cell<ClientId>,
    activate_flags: Cell<ActivateFlags>,
    deactivating: Cell<bool>,
    keyboard_opened: Cell<bool>,

    composition: RefCell<Option<ActiveComposition>>,

    display_attributes: DisplayAttributeTable,
    listeners: RefCell<Listeners>,
    key_sink_advised: Cell<bool>,
    preserved_keys: RefCell<Vec<PreservedKeyEntry>>,
    compartment_monitors: RefCell<Vec<CompartmentMonitor>>,
    lang_bar_buttons: RefCell<Vec<ComPtr<LangBarButton>>>,
}

impl TextService {
    pub fn new(clsid: Guid, handler: impl TextServiceHandler + 'static) -> ComPtr<Self> {
        Self::with_config(clsid, Config::default(), handler)
    }

    pub fn with_config(
        clsid: Guid,
        config: Config,
        handler: impl TextServiceHandler + 'static,
    ) -> ComPtr<Self> {
        let style = &config.input_attribute;
        let display_attributes = DisplayAttributeTable::default();
        display_attributes.push(DisplayAttributeInfo::new(
            style.guid,
            style.description.clone(),
            style.to_attribute(),
        ));

        ComPtr::make(|this| Self {
            this,
            clsid,
            config,
            handler: Box::new(handler),
            thread_mgr: RefCell::new(None),
            client_id: Cell::new(ClientId::NULL),
            activate_flags: Cell::new(ActivateFlags::empty()),
            deactivating: Cell::new(false),
            keyboard_opened: Cell::new(false),
            composition: RefCell::new(None),
            display_attributes,
            listeners: RefCell::new(Listeners::default()),
            key_sink_advised: Cell::new(false),
            preserved_keys: RefCell::new(Vec::new()),
            compartment_monitors: RefCell::new(Vec::new()),
            lang_bar_buttons: RefCell::new(Vec::new()),
        })
    }

    pub fn clsid(&self) -> Guid {
        self.clsid
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn handler(&self) -> &dyn TextServiceHandler {
        self.handler.as_ref()
    }

    pub fn thread_mgr(&self) -> Option<ComPtr<dyn ThreadMgr>> {
        self.thread_mgr.borrow().clone()
    }

    pub fn client_id(&self) -> ClientId {
        self.client_id.get()
    }

    pub fn is_activated(&self) -> bool {
        self.thread_mgr.borrow().is_some()
    }

    pub fn activate_flags(&self) -> ActivateFlags {
        self.activate_flags.get()
    }

    /// Running in a full-screen (immersive) application.
    pub fn is_immersive(&self) -> bool {
        self.activate_flags.get().contains(ActivateFlags::IMMERSIVE)
    }

    /// The host draws all UI; the service must not show windows.
    pub fn is_ui_less(&self) -> bool {
        self.activate_flags
            .get()
            .contains(ActivateFlags::UI_ELEMENT_ENABLED_ONLY)
    }

    pub fn is_console(&self) -> bool {
        self.activate_flags.get().contains(ActivateFlags::CONSOLE)
    }

    /// Top context of the focused document.
    pub fn current_context(&self) -> Option<ComPtr<dyn DocumentContext>> {
        self.thread_mgr()?.focus()
    }

    fn me(&self) -> Result<ComPtr<TextService>> {
        self.this
            .upgrade()
            .ok_or(ImeError::InvalidState("text service is being dropped"))
    }

    fn require_active(&self) -> Result<()> {
        if self.is_activated() {
            Ok(())
        } else {
            Err(ImeError::InvalidState("text service is not activated"))
        }
    }

    /// Runs `f` inside a synchronous session on `context`.
    fn with_session<R: 'static>(
        &self,
        context: &ComPtr<dyn DocumentContext>,
        f: impl FnOnce(&TextService, &EditSession<'_>) -> R + 'static,
    ) -> Result<R> {
        let me = self.me()?;
        request_session(context, self.client_id(), move |session| f(&*me, session))
    }

    // ---- composition state machine ----

    pub fn composition_state(&self) -> CompositionState {
        if self.composition.borrow().is_some() {
            CompositionState::Composing
        } else {
            CompositionState::Idle
        }
    }

    pub fn is_composing(&self) -> bool {
        self.composition_state().is_composing()
    }

    /// The host composition handle, while composing.
    pub fn composition(&self) -> Option<ComPtr<dyn Composition>> {
        self.composition
            .borrow()
            .as_ref()
            .map(|active| active.handle.clone())
    }

    /// The document the current composition lives in.
    pub fn composition_context(&self) -> Option<ComPtr<dyn DocumentContext>> {
        self.composition
            .borrow()
            .as_ref()
            .map(|active| active.context.clone())
    }

    fn require_composition(&self) -> Result<ComPtr<dyn Composition>> {
        self.composition()
            .ok_or(ImeError::InvalidState("no composition in progress"))
    }

    /// Starts a composition at the insertion point of `context`.
    pub fn start_composition(&self, context: &ComPtr<dyn DocumentContext>) -> Result<()> {
        self.require_active()?;
        if self.is_composing() {
            return Err(ImeError::InvalidState("a composition is already in progress"));
        }
        self.with_session(context, |service, session| service.start_composition_in(session))?
    }

    /// Starts a composition inside a running session.
    pub fn start_composition_in(&self, session: &EditSession<'_>) -> Result<()> {
        if self.is_composing() {
            return Err(ImeError::InvalidState("a composition is already in progress"));
        }
        let context = session.context();
        let ec = session.cookie();

        let composer = context.acquire::<dyn ContextComposition>()?;
        let insert = context.acquire::<dyn InsertAtSelection>()?;
        let sink = self.me()?.acquire::<dyn CompositionSink>()?;

        let anchor = insert.insertion_point(ec)?;
        let handle = composer.start_composition(ec, &anchor, sink)?;

        *self.composition.borrow_mut() = Some(ActiveComposition {
            handle,
            context: context.clone(),
        });
        debug!("composition started");

        // The host already holds the composition; a failed caret move is
        // cosmetic and must not orphan it.
        if let Err(err) = context.set_selection(ec, &Selection::new(anchor)) {
            warn!(error = %err, "could not place caret at composition start");
        }
        Ok(())
    }

    /// Whether the caret is inside the composition. Always true when idle.
    pub fn is_insertion_allowed(&self, session: &EditSession<'_>) -> Result<bool> {
        let Some(composition) = self.composition() else {
            return Ok(true);
        };
        let ec = session.cookie();
        let range = self.held_range(&composition)?;
        let selection = session.context().selection(ec)?;
        Ok(range_covers(ec, &range, &selection.range)?)
    }

    fn check_insertion(&self, session: &EditSession<'_>) -> Result<()> {
        if self.config.reject_outside_insertion && !self.is_insertion_allowed(session)? {
            return Err(ImeError::InsertionNotAllowed);
        }
        Ok(())
    }

    /// Replaces the composition text through a new session.
    pub fn set_composition_text(
        &self,
        context: &ComPtr<dyn DocumentContext>,
        text: &str,
    ) -> Result<()> {
        self.require_composition()?;
        let text = text.to_string();
        self.with_session(context, move |service, session| {
            service.set_composition_string(session, &text)
        })?
    }

    /// Replaces the composition text and puts the caret after it.
    pub fn set_composition_string(&self, session: &EditSession<'_>, text: &str) -> Result<()> {
        let composition = self.require_composition()?;
        self.check_insertion(session)?;

        let context = session.context();
        let ec = session.cookie();
        let range = self.held_range(&composition)?;
        range.set_text(ec, text)?;
        context.set_selection(ec, &Selection::new(caret_at_end(ec, &range)?))?;
        self.apply_input_attribute(session, &range);
        trace!(length = text.chars().count(), "composition text replaced");
        Ok(())
    }

    /// Moves the caret within the composition through a new session.
    pub fn move_composition_cursor(
        &self,
        context: &ComPtr<dyn DocumentContext>,
        pos: usize,
    ) -> Result<()> {
        self.require_composition()?;
        self.with_session(context, move |service, session| {
            service.set_composition_cursor(session, pos)
        })?
    }

    /// Puts the caret `pos` characters into the composition, clamped to its
    /// length.
    pub fn set_composition_cursor(&self, session: &EditSession<'_>, pos: usize) -> Result<()> {
        let composition = self.require_composition()?;
        self.check_insertion(session)?;

        let ec = session.cookie();
        let range = self.held_range(&composition)?;
        let caret = caret_in(ec, &range, pos)?;
        session.context().set_selection(ec, &Selection::new(caret))?;
        self.apply_input_attribute(session, &range);
        Ok(())
    }

    /// The composition text, or an empty string when idle.
    pub fn composition_string(&self, session: &EditSession<'_>) -> Result<String> {
        match self.composition() {
            Some(composition) => Ok(self.held_range(&composition)?.text(session.cookie())?),
            None => Ok(String::new()),
        }
    }

    /// Screen box of the composition text.
    pub fn composition_rect(&self, session: &EditSession<'_>) -> Result<Option<Rect>> {
        let Some(composition) = self.composition() else {
            return Ok(None);
        };
        let range = self.held_range(&composition)?;
        let view = session.context().active_view()?;
        let (rect, _clipped) = view.text_extent(session.cookie(), &range)?;
        Ok(Some(rect))
    }

    /// Screen box of the current selection.
    pub fn selection_rect(&self, session: &EditSession<'_>) -> Result<Rect> {
        let ec = session.cookie();
        let selection = session.context().selection(ec)?;
        let view = session.context().active_view()?;
        let (rect, _clipped) = view.text_extent(ec, &selection.range)?;
        Ok(rect)
    }

    /// Ends the composition through a new session.
    pub fn end_composition(&self, context: &ComPtr<dyn DocumentContext>) -> Result<()> {
        self.require_composition()?;
        self.with_session(context, |service, session| service.end_composition_in(session))?
    }

    /// Ends the composition cooperatively, leaving its text in the document.
    ///
    /// The handle is dropped even when a host call fails along the way; the
    /// first failure is returned.
    pub fn end_composition_in(&self, session: &EditSession<'_>) -> Result<()> {
        let composition = self.require_composition()?;
        let ec = session.cookie();

        let mut outcome = Ok(());
        if let Err(err) = self.release_composition_range(session, &composition) {
            warn!(error = %err, "could not tidy composition range");
            outcome = Err(err.into());
        }
        if let Err(err) = composition.end_composition(ec) {
            warn!(error = %err, "host failed to end composition");
            if outcome.is_ok() {
                outcome = Err(err.into());
            }
        }

        self.handler.on_composition_terminated(self, false);
        self.drop_composition();
        debug!("composition ended");
        outcome
    }

    /// Clears the input attribute and moves the caret to the end of the
    /// composition range.
    fn release_composition_range(
        &self,
        session: &EditSession<'_>,
        composition: &ComPtr<dyn Composition>,
    ) -> HostResult<()> {
        let context = session.context();
        let ec = session.cookie();
        let range = composition.range()?;
        if let Ok(property) = context.property(&GUID_PROP_ATTRIBUTE) {
            property.clear(ec, &range)?;
        }
        let selection = context.selection(ec)?;
        selection.range.shift_end_to_range(ec, &range, Anchor::End)?;
        selection.range.collapse(ec, Anchor::End)?;
        context.set_selection(ec, &selection)
    }

    /// Range of the held composition. A handle the host ended without
    /// telling us is abandoned before the error is returned.
    fn held_range(
        &self,
        composition: &ComPtr<dyn Composition>,
    ) -> HostResult<ComPtr<dyn TextRange>> {
        composition.range().inspect_err(|err| {
            let held = self
                .composition()
                .is_some_and(|current| current.same_object(composition));
            if *err == HostError::NoComposition && held {
                self.abandon_composition();
            }
        })
    }

    /// Gives up the composition without touching the host.
    fn abandon_composition(&self) {
        warn!("abandoning composition");
        self.handler.on_composition_terminated(self, true);
        self.drop_composition();
    }

    fn drop_composition(&self) {
        let gone = self.composition.borrow_mut().take();
        drop(gone);
    }

    fn input_atom(&self) -> Option<u32> {
        self.display_attributes
            .get(&self.config.input_attribute.guid)
            .map(|info| info.atom())
            .filter(|atom| *atom != 0)
    }

    /// Tags `range` with the input display attribute. Failures only cost the
    /// decoration.
    fn apply_input_attribute(&self, session: &EditSession<'_>, range: &ComPtr<dyn TextRange>) {
        let Some(atom) = self.input_atom() else {
            return;
        };
        let Ok(value) = i32::try_from(atom) else {
            return;
        };
        let tagged = session
            .context()
            .property(&GUID_PROP_ATTRIBUTE)
            .and_then(|property| property.set_value(session.cookie(), range, value));
        if let Err(err) = tagged {
            warn!(error = %err, "could not apply input display attribute");
        }
    }

    // ---- display attributes ----

    /// Publishes another display attribute. Registered with the host right
    /// away when active, otherwise on activation.
    pub fn add_display_attribute(&self, info: ComPtr<DisplayAttributeInfo>) {
        self.display_attributes.push(info.clone());
        if let Some(thread_mgr) = self.thread_mgr() {
            register_attribute(&thread_mgr, &info);
        }
    }

    pub fn display_attribute(&self, guid: &Guid) -> Option<ComPtr<DisplayAttributeInfo>> {
        self.display_attributes.get(guid)
    }

    // ---- compartments ----

    pub fn thread_compartment(&self, key: &Guid) -> Option<ComPtr<dyn Compartment>> {
        let manager = self.thread_mgr()?.query::<dyn CompartmentMgr>()?;
        manager.compartment(key).ok()
    }

    pub fn global_compartment(&self, key: &Guid) -> Option<ComPtr<dyn Compartment>> {
        let manager = self.thread_mgr()?.global_compartment_mgr()?;
        manager.compartment(key).ok()
    }

    /// Compartment of `context`, or of the focused context when `None`.
    pub fn context_compartment(
        &self,
        key: &Guid,
        context: Option<&ComPtr<dyn DocumentContext>>,
    ) -> Option<ComPtr<dyn Compartment>> {
        let context = match context {
            Some(context) => context.clone(),
            None => self.current_context()?,
        };
        let manager = context.query::<dyn CompartmentMgr>()?;
        manager.compartment(key).ok()
    }

    pub fn thread_compartment_value(&self, key: &Guid) -> u32 {
        compartment_value(self.thread_compartment(key))
    }

    pub fn global_compartment_value(&self, key: &Guid) -> u32 {
        compartment_value(self.global_compartment(key))
    }

    pub fn context_compartment_value(
        &self,
        key: &Guid,
        context: Option<&ComPtr<dyn DocumentContext>>,
    ) -> u32 {
        compartment_value(self.context_compartment(key, context))
    }

    pub fn set_thread_compartment_value(&self, key: &Guid, value: u32) -> Result<()> {
        self.write_compartment(self.thread_compartment(key), value)
    }

    pub fn set_global_compartment_value(&self, key: &Guid, value: u32) -> Result<()> {
        self.write_compartment(self.global_compartment(key), value)
    }

    pub fn set_context_compartment_value(
        &self,
        key: &Guid,
        value: u32,
        context: Option<&ComPtr<dyn DocumentContext>>,
    ) -> Result<()> {
        self.write_compartment(self.context_compartment(key, context), value)
    }

    fn write_compartment(
        &self,
        compartment: Option<ComPtr<dyn Compartment>>,
        value: u32,
    ) -> Result<()> {
        let compartment = compartment
            .ok_or(ImeError::NoSuchCapability(<dyn CompartmentMgr as Interface>::IID))?;
        compartment.set_value(self.client_id(), value)?;
        Ok(())
    }

    /// Keyboard input is disabled for `context` (or the focused context).
    pub fn is_keyboard_disabled(&self, context: Option<&ComPtr<dyn DocumentContext>>) -> bool {
        self.context_compartment_value(&GUID_COMPARTMENT_KEYBOARD_DISABLED, context) != 0
            || self.context_compartment_value(&GUID_COMPARTMENT_EMPTYCONTEXT, context) != 0
    }

    pub fn is_keyboard_opened(&self) -> bool {
        self.keyboard_opened.get()
    }

    /// Writes the keyboard open/close compartment.
    pub fn set_keyboard_open(&self, open: bool) -> Result<()> {
        if open == self.keyboard_opened.get() {
            return Ok(());
        }
        self.set_thread_compartment_value(&GUID_COMPARTMENT_KEYBOARD_OPENCLOSE, u32::from(open))?;
        // Normally the change notification has done this already.
        self.sync_keyboard_open();
        Ok(())
    }

    fn sync_keyboard_open(&self) {
        let opened = self.thread_compartment_value(&GUID_COMPARTMENT_KEYBOARD_OPENCLOSE) != 0;
        if opened != self.keyboard_opened.replace(opened) {
            debug!(opened, "keyboard open state changed");
            self.handler.on_keyboard_status_changed(self, opened);
        }
    }

    fn init_keyboard_state(&self) {
        let opened = self.thread_compartment_value(&GUID_COMPARTMENT_KEYBOARD_OPENCLOSE) != 0;
        self.keyboard_opened.set(opened);
        if !opened && self.config.force_keyboard_open {
            debug!("keyboard closed at activation; opening it");
            if let Err(err) = self.set_keyboard_open(true) {
                warn!(error = %err, "could not open keyboard");
            }
        }
    }

    /// Watches a compartment; changes reach
    /// [`TextServiceHandler::on_compartment_changed`].
    pub fn add_compartment_monitor(&self, key: Guid, global: bool) {
        if self
            .compartment_monitors
            .borrow()
            .iter()
            .any(|monitor| monitor.key == key)
        {
            return;
        }
        self.compartment_monitors.borrow_mut().push(CompartmentMonitor {
            key,
            global,
            subscription: Subscription::inactive(),
        });
        if self.is_activated() {
            self.subscribe_monitor(key, global);
        }
    }

    pub fn remove_compartment_monitor(&self, key: &Guid) -> bool {
        let removed = {
            let mut monitors = self.compartment_monitors.borrow_mut();
            monitors
                .iter()
                .position(|monitor| monitor.key == *key)
                .map(|index| monitors.remove(index))
        };
        removed.is_some()
    }

    fn subscribe_compartment(&self, key: &Guid, global: bool) -> Subscription {
        let compartment = if global {
            self.global_compartment(key)
        } else {
            self.thread_compartment(key)
        };
        let (Some(source), Ok(me)) = (compartment.and_then(|c| c.query::<dyn Source>()), self.me())
        else {
            return Subscription::inactive();
        };
        Subscription::advise(&source, <dyn CompartmentEventSink>::IID, me.unknown())
    }

    fn subscribe_monitor(&self, key: Guid, global: bool) {
        let mut subscription = self.subscribe_compartment(&key, global);
        if let Some(monitor) = self
            .compartment_monitors
            .borrow_mut()
            .iter_mut()
            .find(|monitor| monitor.key == key)
        {
            std::mem::swap(&mut monitor.subscription, &mut subscription);
        }
        // The replaced (or unclaimed) subscription ends outside the borrow.
        drop(subscription);
    }

    // ---- preserved keys ----

    /// Reserves a key combination; presses reach
    /// [`TextServiceHandler::on_preserved_key`] with `guid`.
    pub fn add_preserved_key(&self, key_code: u32, modifiers: Modifiers, guid: Guid) {
        let entry = PreservedKeyEntry {
            guid,
            key: PreservedKey {
                key_code,
                modifiers,
            },
            description: String::new(),
        };
        self.preserved_keys.borrow_mut().push(entry.clone());
        if let Some(keystroke) = self.keystroke_mgr() {
            self.preserve(&keystroke, &entry);
        }
    }

    pub fn remove_preserved_key(&self, guid: &Guid) -> bool {
        let removed: Vec<PreservedKeyEntry> = {
            let mut keys = self.preserved_keys.borrow_mut();
            let (removed, kept) = keys.drain(..).partition(|entry| entry.guid == *guid);
            *keys = kept;
            removed
        };
        if let Some(keystroke) = self.keystroke_mgr() {
            for entry in &removed {
                if let Err(err) = keystroke.unpreserve_key(&entry.guid, &entry.key) {
                    warn!(error = %err, guid = %entry.guid, "could not release preserved key");
                }
            }
        }
        !removed.is_empty()
    }

    fn keystroke_mgr(&self) -> Option<ComPtr<dyn KeystrokeMgr>> {
        self.thread_mgr()?.query::<dyn KeystrokeMgr>()
    }

    fn preserve(&self, keystroke: &ComPtr<dyn KeystrokeMgr>, entry: &PreservedKeyEntry) {
        if let Err(err) =
            keystroke.preserve_key(self.client_id(), &entry.guid, &entry.key, &entry.description)
        {
            warn!(error = %err, guid = %entry.guid, "could not preserve key");
        }
    }

    // ---- language bar ----

    /// Publishes a button. Attached to the host now when active, otherwise
    /// on activation.
    pub fn add_button(&self, button: ComPtr<LangBarButton>) {
        self.lang_bar_buttons.borrow_mut().push(button.clone());
        if self.is_activated() {
            self.attach_button(&button);
        }
    }

    pub fn remove_button(&self, button: &ComPtr<LangBarButton>) -> bool {
        let removed = {
            let mut buttons = self.lang_bar_buttons.borrow_mut();
            buttons
                .iter()
                .position(|held| held.same_object(button))
                .map(|index| buttons.remove(index))
        };
        match removed {
            Some(button) => {
                if self.is_activated() {
                    self.detach_button(&button);
                }
                true
            }
            None => false,
        }
    }

    pub fn lang_bar_buttons(&self) -> Vec<ComPtr<LangBarButton>> {
        self.lang_bar_buttons.borrow().clone()
    }

    fn lang_bar_mgr(&self) -> Option<ComPtr<dyn LangBarMgr>> {
        self.thread_mgr()?.lang_bar_mgr()
    }

    /// Floating-window flags of the host's language bar; 0 without one.
    pub fn lang_bar_status(&self) -> u32 {
        self.lang_bar_mgr()
            .and_then(|manager| manager.show_floating_status().ok())
            .unwrap_or(0)
    }

    fn lang_bar_item_mgr(&self) -> Option<ComPtr<dyn LangBarItemMgr>> {
        self.thread_mgr()?.query::<dyn LangBarItemMgr>()
    }

    fn attach_button(&self, button: &ComPtr<LangBarButton>) {
        let (Some(manager), Some(item)) = (
            self.lang_bar_item_mgr(),
            button.query::<dyn LangBarItemButton>(),
        ) else {
            return;
        };
        if let Err(err) = manager.add_item(item) {
            warn!(error = %err, "could not add language bar button");
        }
    }

    fn detach_button(&self, button: &ComPtr<LangBarButton>) {
        let (Some(manager), Some(item)) = (
            self.lang_bar_item_mgr(),
            button.query::<dyn LangBarItemButton>(),
        ) else {
            return;
        };
        if let Err(err) = manager.remove_item(&item) {
            warn!(error = %err, "could not remove language bar button");
        }
    }

    /// Routes a button click or menu pick to the handler.
    pub fn dispatch_command(&self, id: u32, command: CommandType) -> bool {
        trace!(id, ?command, "command");
        self.handler.on_command(self, id, command)
    }

    // ---- activation ----

    fn install_listeners(&self, thread_mgr: &ComPtr<dyn ThreadMgr>) -> Result<()> {
        let me = self.me()?;
        let unknown = me.unknown();

        let mut listeners = Listeners::default();
        match thread_mgr.query::<dyn Source>() {
            Some(source) => {
                listeners.thread_mgr_events = Subscription::advise(
                    &source,
                    <dyn ThreadMgrEventSink>::IID,
                    unknown.clone(),
                );
                listeners.lang_profile = Subscription::advise(
                    &source,
                    <dyn ActiveLanguageProfileNotifySink>::IID,
                    unknown.clone(),
                );
                listeners.text_edit =
                    Subscription::advise(&source, <dyn TextEditSink>::IID, unknown.clone());
            }
            None => debug!("thread manager has no event source"),
        }
        match thread_mgr
            .lang_bar_mgr()
            .and_then(|manager| manager.query::<dyn Source>())
        {
            Some(source) => {
                listeners.lang_bar_events =
                    Subscription::advise(&source, <dyn LangBarEventSink>::IID, unknown.clone());
            }
            None => debug!("host has no language bar"),
        }
        listeners.keyboard_open_close =
            self.subscribe_compartment(&GUID_COMPARTMENT_KEYBOARD_OPENCLOSE, false);
        let previous = self.listeners.replace(listeners);
        drop(previous);

        if let Some(keystroke) = thread_mgr.query::<dyn KeystrokeMgr>() {
            let sink = me.acquire::<dyn KeyEventSink>()?;
            match keystroke.advise_key_event_sink(self.client_id(), sink, true) {
                Ok(()) => self.key_sink_advised.set(true),
                Err(err) => warn!(error = %err, "could not advise key event sink"),
            }
            let keys = self.preserved_keys.borrow().clone();
            for entry in &keys {
                self.preserve(&keystroke, entry);
            }
        }

        let monitors: Vec<(Guid, bool)> = self
            .compartment_monitors
            .borrow()
            .iter()
            .map(|monitor| (monitor.key, monitor.global))
            .collect();
        for (key, global) in monitors {
            self.subscribe_monitor(key, global);
        }
        Ok(())
    }

    fn uninstall_listeners(&self) {
        if let Some(keystroke) = self.keystroke_mgr() {
            let keys = self.preserved_keys.borrow().clone();
            for entry in &keys {
                if let Err(err) = keystroke.unpreserve_key(&entry.guid, &entry.key) {
                    trace!(error = %err, "preserved key already released");
                }
            }
            if self.key_sink_advised.replace(false) {
                if let Err(err) = keystroke.unadvise_key_event_sink(self.client_id()) {
                    warn!(error = %err, "could not unadvise key event sink");
                }
            }
        }

        let monitors: Vec<Subscription> = self
            .compartment_monitors
            .borrow_mut()
            .iter_mut()
            .map(|monitor| std::mem::take(&mut monitor.subscription))
            .collect();
        drop(monitors);

        let listeners = self.listeners.take();
        drop(listeners);
    }

    fn register_display_attributes(&self, thread_mgr: &ComPtr<dyn ThreadMgr>) {
        for info in self.display_attributes.snapshot() {
            register_attribute(thread_mgr, &info);
        }
    }

    fn reset(&self) {
        let thread_mgr = self.thread_mgr.replace(None);
        drop(thread_mgr);
        self.client_id.set(ClientId::NULL);
        self.activate_flags.set(ActivateFlags::empty());
        self.keyboard_opened.set(false);
        for info in self.display_attributes.snapshot() {
            info.set_atom(0);
        }
    }
}

fn compartment_value(compartment: Option<ComPtr<dyn Compartment>>) -> u32 {
    compartment
        .and_then(|compartment| compartment.value().ok().flatten())
        .unwrap_or(0)
}

fn register_attribute(thread_mgr: &ComPtr<dyn ThreadMgr>, info: &ComPtr<DisplayAttributeInfo>) {
    match thread_mgr.register_guid(&info.guid()) {
        Ok(atom) => info.set_atom(atom),
        Err(err) => {
            warn!(error = %err, guid = %info.guid(), "could not register display attribute")
        }
    }
}

impl TextInputProcessor for TextService {
    fn activate(&self, thread_mgr: ComPtr<dyn ThreadMgr>, client: ClientId) -> Result<()> {
        let flags = thread_mgr.active_flags();
        self.activate_ex(thread_mgr, client, flags)
    }

    fn activate_ex(
        &self,
        thread_mgr: ComPtr<dyn ThreadMgr>,
        client: ClientId,
        flags: ActivateFlags,
    ) -> Result<()> {
        if self.is_activated() {
            return Err(ImeError::InvalidState("text service is already activated"));
        }
        debug!(client = client.0, ?flags, "activating text service");
        *self.thread_mgr.borrow_mut() = Some(thread_mgr.clone());
        self.client_id.set(client);
        self.activate_flags.set(flags);

        if let Err(err) = self.install_listeners(&thread_mgr) {
            self.uninstall_listeners();
            self.reset();
            return Err(err);
        }
        self.init_keyboard_state();
        self.register_display_attributes(&thread_mgr);
        for button in self.lang_bar_buttons() {
            self.attach_button(&button);
        }

        self.handler.on_activate(self);
        Ok(())
    }

    fn deactivate(&self) -> Result<()> {
        if !self.is_activated() || self.deactivating.get() {
            return Ok(());
        }
        self.deactivating.set(true);
        debug!("deactivating text service");

        if self.is_composing() {
            let ended = match self.composition_context() {
                Some(context) => self.end_composition(&context),
                None => Err(ImeError::InvalidState("composition has no context")),
            };
            if let Err(err) = ended {
                warn!(error = %err, "could not end composition on deactivation");
            }
            if self.is_composing() {
                self.abandon_composition();
            }
        }

        self.handler.on_deactivate(self);
        for button in self.lang_bar_buttons() {
            self.detach_button(&button);
        }
        self.uninstall_listeners();
        self.reset();
        self.deactivating.set(false);
        Ok(())
    }
}

impl ThreadMgrEventSink for TextService {
    fn on_init_document_mgr(&self) -> HostResult<()> {
        Ok(())
    }

    fn on_uninit_document_mgr(&self) -> HostResult<()> {
        Ok(())
    }

    fn on_set_focus(
        &self,
        focus: Option<&ComPtr<dyn DocumentContext>>,
        _previous: Option<&ComPtr<dyn DocumentContext>>,
    ) -> HostResult<()> {
        trace!(focused = focus.is_some(), "document focus changed");
        Ok(())
    }

    fn on_push_context(&self, _context: &ComPtr<dyn DocumentContext>) -> HostResult<()> {
        Ok(())
    }

    fn on_pop_context(&self, _context: &ComPtr<dyn DocumentContext>) -> HostResult<()> {
        Ok(())
    }
}

impl TextEditSink for TextService {
    fn on_end_edit(
        &self,
        context: &ComPtr<dyn DocumentContext>,
        ec: EditCookie<'_>,
        record: &ComPtr<dyn EditRecord>,
    ) -> HostResult<()> {
        if !self.config.end_composition_on_edit_outside {
            return Ok(());
        }
        let Some(composition) = self.composition() else {
            return Ok(());
        };
        if !record.selection_changed()? {
            return Ok(());
        }
        // Another context's edit says nothing about our composition.
        if !self
            .composition_context()
            .is_some_and(|owner| owner.same_object(context))
        {
            return Ok(());
        }

        let selection = context.selection(ec)?;
        let range = self.held_range(&composition)?;
        if !range_covers(ec, &range, &selection.range)? {
            debug!("selection left the composition; ending it");
            if let Err(err) = self.end_composition(context) {
                warn!(error = %err, "could not end composition after outside edit");
            }
        }
        Ok(())
    }
}

impl TextService {
    fn accepts_keys(&self, context: &ComPtr<dyn DocumentContext>) -> bool {
        !self.is_keyboard_disabled(Some(context)) && self.is_keyboard_opened()
    }

    /// Runs a key hook inside a session. A refused session means the key was
    /// not eaten.
    fn key_session(
        &self,
        context: &ComPtr<dyn DocumentContext>,
        f: impl FnOnce(&TextService, &EditSession<'_>) -> bool + 'static,
    ) -> bool {
        match self.with_session(context, f) {
            Ok(eaten) => eaten,
            Err(err) => {
                debug!(error = %err, "key not handled");
                false
            }
        }
    }
}

impl KeyEventSink for TextService {
    fn on_set_focus(&self, foreground: bool) -> HostResult<()> {
        if foreground {
            self.handler.on_set_focus(self);
        } else {
            self.handler.on_kill_focus(self);
        }
        Ok(())
    }

    fn on_test_key_down(
        &self,
        context: &ComPtr<dyn DocumentContext>,
        key: &KeyEvent,
    ) -> HostResult<bool> {
        Ok(self.accepts_keys(context) && self.handler.filter_key_down(self, key))
    }

    fn on_key_down(
        &self,
        context: &ComPtr<dyn DocumentContext>,
        key: &KeyEvent,
    ) -> HostResult<bool> {
        // Some hosts skip the test call, so filter again.
        if !self.accepts_keys(context) || !self.handler.filter_key_down(self, key) {
            return Ok(false);
        }
        let key = key.clone();
        Ok(self.key_session(context, move |service, session| {
            service.handler.on_key_down(service, &key, session)
        }))
    }

    fn on_test_key_up(
        &self,
        context: &ComPtr<dyn DocumentContext>,
        key: &KeyEvent,
    ) -> HostResult<bool> {
        Ok(self.accepts_keys(context) && self.handler.filter_key_up(self, key))
    }

    fn on_key_up(&self, context: &ComPtr<dyn DocumentContext>, key: &KeyEvent) -> HostResult<bool> {
        if !self.accepts_keys(context) || !self.handler.filter_key_up(self, key) {
            return Ok(false);
        }
        let key = key.clone();
        Ok(self.key_session(context, move |service, session| {
            service.handler.on_key_up(service, &key, session)
        }))
    }

    fn on_preserved_key(
        &self,
        _context: &ComPtr<dyn DocumentContext>,
        guid: &Guid,
    ) -> HostResult<bool> {
        Ok(self.handler.on_preserved_key(self, guid))
    }
}

impl CompositionSink for TextService {
    fn on_composition_terminated(
        &self,
        _ec: EditCookie<'_>,
        composition: &ComPtr<dyn Composition>,
    ) -> HostResult<()> {
        let ours = self
            .composition()
            .is_some_and(|held| held.same_object(composition));
        if !ours {
            trace!("termination of a composition we do not hold");
            return Ok(());
        }
        debug!("composition terminated by host");
        self.handler.on_composition_terminated(self, true);
        self.drop_composition();
        Ok(())
    }
}

impl CompartmentEventSink for TextService {
    fn on_change(&self, key: &Guid) -> HostResult<()> {
        if *key == GUID_COMPARTMENT_KEYBOARD_OPENCLOSE {
            self.sync_keyboard_open();
        }
        self.handler.on_compartment_changed(self, key);
        Ok(())
    }
}

impl ActiveLanguageProfileNotifySink for TextService {
    fn on_activated(&self, clsid: &Guid, profile: &Guid, activated: bool) -> HostResult<()> {
        if *clsid != self.clsid {
            return Ok(());
        }
        if activated {
            self.handler.on_lang_profile_activated(self, profile);
        } else {
            self.handler.on_lang_profile_deactivated(self, profile);
        }
        Ok(())
    }
}

impl LangBarEventSink for TextService {
    fn show_floating(&self, flags: u32) -> HostResult<()> {
        self.handler.on_lang_bar_status_changed(self, flags);
        Ok(())
    }
}

impl DisplayAttributeProvider for TextService {
    fn enum_display_attribute_info(&self) -> HostResult<ComPtr<dyn EnumDisplayAttributeInfo>> {
        DisplayAttributeEnum::new(self.display_attributes.snapshot())
            .query::<dyn EnumDisplayAttributeInfo>()
            .ok_or(HostError::NotImplemented)
    }

    fn display_attribute_info(&self, guid: &Guid) -> HostResult<ComPtr<dyn AttributeInfo>> {
        find_attribute_info(&self.display_attributes.snapshot(), guid)
    }
}

impl ComObject for TextService {
    const INTERFACES: &'static [InterfaceEntry<Self>] = &[
        crate::interface_entry!(Self => dyn TextInputProcessor),
        crate::interface_entry!(Self => dyn TextInputProcessor, IID_TEXT_INPUT_PROCESSOR_EX),
        crate::interface_entry!(Self => dyn DisplayAttributeProvider),
        crate::interface_entry!(Self => dyn ThreadMgrEventSink),
        crate::interface_entry!(Self => dyn TextEditSink),
        crate::interface_entry!(Self => dyn KeyEventSink),
        crate::interface_entry!(Self => dyn CompositionSink),
        crate::interface_entry!(Self => dyn CompartmentEventSink),
        crate::interface_entry!(Self => dyn LangBarEventSink),
        crate::interface_entry!(Self => dyn ActiveLanguageProfileNotifySink),
    ];

    fn self_ref(&self) -> &SelfRef<Self> {
        &self.this
    }
}
