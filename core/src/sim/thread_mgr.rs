//! The simulated thread manager: focus, keyboard, compartments and the
//! language bar.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;

use tracing::{debug, trace};

use crate::com::{ComObject, ComPtr, Interface, InterfaceEntry, SelfRef, Unknown};
use crate::error::{HostError, HostResult};
use crate::guid::{Guid, GUID_COMPARTMENT_KEYBOARD_OPENCLOSE};
use crate::host::{
    ActivateFlags, ClientId, Compartment, CompartmentMgr, DocumentContext, KeystrokeMgr,
    LangBarItemMgr, LangBarMgr, Modifiers, PreservedKey, Source, ThreadMgr,
};
use crate::key_event::{vk, KeyEvent};
use crate::langbar::{ClickKind, LangBarItemButton, LangBarItemSink, UpdateFlags};
use crate::sink::{ActiveLanguageProfileNotifySink, KeyEventSink, ThreadMgrEventSink};
use crate::subscription::{next_cookie, Cookie, Subscription};

use super::compartment::{SimCompartment, SimCompartmentStore};
use super::context::SimContext;
use super::lang_bar::SimLangBarMgr;
use super::view;

/// Event sinks accepted by the thread manager's [`Source`].
const ADVISABLE: [Guid; 3] = [
    <dyn ThreadMgrEventSink as Interface>::IID,
    <dyn ActiveLanguageProfileNotifySink as Interface>::IID,
    <dyn crate::sink::TextEditSink as Interface>::IID,
];

struct Advised {
    cookie: Cookie,
    iid: Guid,
    sink: ComPtr<dyn Unknown>,
}

#[derive(Debug, Clone)]
struct Preserved {
    client: ClientId,
    guid: Guid,
    key: PreservedKey,
    description: String,
}

struct KeySink {
    client: ClientId,
    sink: ComPtr<dyn KeyEventSink>,
}

struct BarItem {
    item: ComPtr<dyn LangBarItemButton>,
    _updates: Subscription,
}

/// Counts the update notifications a language-bar item sends.
struct ItemUpdates {
    this: SelfRef<ItemUpdates>,
    count: Cell<u32>,
    last: Cell<UpdateFlags>,
}

impl LangBarItemSink for ItemUpdates {
    fn on_update(&self, flags: UpdateFlags) -> HostResult<()> {
        self.count.set(self.count.get() + 1);
        self.last.set(flags);
        Ok(())
    }
}

impl ComObject for ItemUpdates {
    const INTERFACES: &'static [InterfaceEntry<Self>] =
        &[crate::interface_entry!(Self => dyn LangBarItemSink)];

    fn self_ref(&self) -> &SelfRef<Self> {
        &self.this
    }
}

/// An in-memory host for one UI thread.
///
/// Owns the documents it creates, delivers keystrokes and focus changes to
/// the services activated against it, and records what those services
/// registered so tests can inspect it.
pub struct SimThreadMgr {
    this: SelfRef<SimThreadMgr>,
    flags: ActivateFlags,
    next_client: Cell<u32>,
    contexts: RefCell<Vec<ComPtr<SimContext>>>,
    focus: RefCell<Option<ComPtr<SimContext>>>,
    advised: RefCell<Vec<Advised>>,
    key_sink: RefCell<Option<KeySink>>,
    preserved: RefCell<Vec<Preserved>>,
    thread_compartments: ComPtr<SimCompartmentStore>,
    global_compartments: ComPtr<SimCompartmentStore>,
    atoms: RefCell<HashMap<Guid, u32>>,
    bar_items: RefCell<Vec<BarItem>>,
    item_updates: ComPtr<ItemUpdates>,
    lang_bar: ComPtr<SimLangBarMgr>,
}

impl SimThreadMgr {
    pub fn new() -> ComPtr<Self> {
        Self::with_flags(ActivateFlags::empty())
    }

    /// A thread manager that reports `flags` to services it activates.
    pub fn with_flags(flags: ActivateFlags) -> ComPtr<Self> {
        ComPtr::make(|this| Self {
            this,
            flags,
            next_client: Cell::new(1),
            contexts: RefCell::new(Vec::new()),
            focus: RefCell::new(None),
            advised: RefCell::new(Vec::new()),
            key_sink: RefCell::new(None),
            preserved: RefCell::new(Vec::new()),
            thread_compartments: SimCompartmentStore::new(),
            global_compartments: SimCompartmentStore::new(),
            atoms: RefCell::new(HashMap::new()),
            bar_items: RefCell::new(Vec::new()),
            item_updates: ComPtr::make(|this| ItemUpdates {
                this,
                count: Cell::new(0),
                last: Cell::new(UpdateFlags::empty()),
            }),
            lang_bar: SimLangBarMgr::new(),
        })
    }

    pub fn as_thread_mgr(&self) -> ComPtr<dyn ThreadMgr> {
        match self.this.upgrade() {
            Some(this) => view(&this),
            None => unreachable!("thread manager used while being dropped"),
        }
    }

    /// A fresh client id for the next service activation.
    pub fn new_client_id(&self) -> ClientId {
        let id = self.next_client.get();
        self.next_client.set(id + 1);
        ClientId(id)
    }

    /// Opens a document holding `text`, caret at the end. Not focused.
    pub fn create_context(&self, text: &str) -> ComPtr<SimContext> {
        let context = SimContext::new(text, self.this.downgrade());
        self.contexts.borrow_mut().push(context.clone());
        context
    }

    pub fn focused(&self) -> Option<ComPtr<SimContext>> {
        self.focus.borrow().clone()
    }

    /// Moves focus. A composition left in the previous document is
    /// terminated, as hosts do when the user switches away.
    pub fn set_focus(&self, context: Option<&ComPtr<SimContext>>) {
        let previous = self.focus.replace(context.cloned());
        if let (Some(old), Some(new)) = (&previous, context) {
            if old.same_object(new) {
                return;
            }
        }
        if let Some(old) = &previous {
            if old.terminate_composition() {
                debug!("composition terminated by focus change");
            }
        }

        let focus = context.map(|context| context.as_document());
        let before = previous.as_ref().map(|context| context.as_document());
        for sink in self.sinks::<dyn ThreadMgrEventSink>() {
            if let Err(err) = sink.on_set_focus(focus.as_ref(), before.as_ref()) {
                trace!(error = %err, "focus sink failed");
            }
        }
    }

    /// Tells the key sink whether its service is the foreground one.
    pub fn set_foreground(&self, foreground: bool) {
        let sink = self.key_sink.borrow().as_ref().map(|held| held.sink.clone());
        if let Some(sink) = sink {
            if let Err(err) = sink.on_set_focus(foreground) {
                trace!(error = %err, "key sink focus failed");
            }
        }
    }

    /// Delivers a key press to the focused document. Returns whether a
    /// service ate it; uneaten printable characters are typed into the
    /// document as an application would.
    pub fn key_down(&self, key: &KeyEvent) -> bool {
        let Some(context) = self.focused() else {
            return false;
        };
        let document = context.as_document();
        let sink = self.key_sink.borrow().as_ref().map(|held| held.sink.clone());
        let eaten = match sink {
            Some(sink) => self.dispatch_key_down(&sink, &document, key),
            None => false,
        };
        if !eaten {
            if let Some(ch) = key.char_code().filter(|ch| !ch.is_control()) {
                if !key.has_command_modifier() {
                    context.insert_external(&ch.to_string());
                }
            }
        }
        eaten
    }

    fn dispatch_key_down(
        &self,
        sink: &ComPtr<dyn KeyEventSink>,
        document: &ComPtr<dyn DocumentContext>,
        key: &KeyEvent,
    ) -> bool {
        if let Some(guid) = self.preserved_match(key) {
            trace!(%guid, "preserved key pressed");
            return sink.on_preserved_key(document, &guid).unwrap_or(false);
        }
        match sink.on_test_key_down(document, key) {
            Ok(true) => sink.on_key_down(document, key).unwrap_or(false),
            Ok(false) => false,
            Err(err) => {
                trace!(error = %err, "test key down failed");
                false
            }
        }
    }

    pub fn key_up(&self, key: &KeyEvent) -> bool {
        let Some(context) = self.focused() else {
            return false;
        };
        let document = context.as_document();
        let sink = self.key_sink.borrow().as_ref().map(|held| held.sink.clone());
        let Some(sink) = sink else {
            return false;
        };
        match sink.on_test_key_up(&document, key) {
            Ok(true) => sink.on_key_up(&document, key).unwrap_or(false),
            _ => false,
        }
    }

    fn preserved_match(&self, key: &KeyEvent) -> Option<Guid> {
        let mut held = Modifiers::empty();
        held.set(Modifiers::SHIFT, key.is_key_down(vk::SHIFT));
        held.set(Modifiers::CONTROL, key.is_key_down(vk::CONTROL));
        held.set(Modifiers::ALT, key.is_key_down(vk::MENU));
        self.preserved
            .borrow()
            .iter()
            .find(|entry| entry.key.key_code == key.key_code() && entry.key.modifiers == held)
            .map(|entry| entry.guid)
    }

    /// Reports a language-profile switch to every advised notify sink.
    pub fn notify_profile(&self, clsid: &Guid, profile: &Guid, activated: bool) {
        for sink in self.sinks::<dyn ActiveLanguageProfileNotifySink>() {
            if let Err(err) = sink.on_activated(clsid, profile, activated) {
                trace!(error = %err, "profile sink failed");
            }
        }
    }

    /// Flips the keyboard open/close compartment as the user would.
    pub fn set_keyboard_open(&self, open: bool) {
        self.thread_compartment(&GUID_COMPARTMENT_KEYBOARD_OPENCLOSE)
            .store(u32::from(open));
    }

    pub fn thread_compartment(&self, key: &Guid) -> ComPtr<SimCompartment> {
        self.thread_compartments.get(key)
    }

    pub fn global_compartment(&self, key: &Guid) -> ComPtr<SimCompartment> {
        self.global_compartments.get(key)
    }

    /// Advised sinks that implement `I`, in registration order.
    pub fn sinks<I: ?Sized + Interface + 'static>(&self) -> Vec<ComPtr<I>> {
        let candidates: Vec<ComPtr<dyn Unknown>> = self
            .advised
            .borrow()
            .iter()
            .filter(|advised| advised.iid == I::IID)
            .map(|advised| advised.sink.clone())
            .collect();
        candidates.iter().filter_map(|sink| sink.query::<I>()).collect()
    }

    /// Number of sinks advised for `iid`.
    pub fn advise_count(&self, iid: &Guid) -> usize {
        self.advised
            .borrow()
            .iter()
            .filter(|advised| advised.iid == *iid)
            .count()
    }

    pub fn key_sink_advised(&self) -> bool {
        self.key_sink.borrow().is_some()
    }

    /// Preserved keys with their descriptions.
    pub fn preserved_keys(&self) -> Vec<(Guid, PreservedKey, String)> {
        self.preserved
            .borrow()
            .iter()
            .map(|entry| (entry.guid, entry.key, entry.description.clone()))
            .collect()
    }

    pub fn lang_bar_items(&self) -> Vec<ComPtr<dyn LangBarItemButton>> {
        self.bar_items
            .borrow()
            .iter()
            .map(|held| held.item.clone())
            .collect()
    }

    /// Clicks the language-bar item registered under `guid`.
    pub fn click_item(&self, guid: &Guid, click: ClickKind) -> HostResult<()> {
        let item = self
            .lang_bar_items()
            .into_iter()
            .find(|item| item.info().guid == *guid)
            .ok_or(HostError::InvalidArg)?;
        item.on_click(click)
    }

    /// Update notifications received from language-bar items, and the
    /// flags of the latest one.
    pub fn item_updates(&self) -> (u32, UpdateFlags) {
        (self.item_updates.count.get(), self.item_updates.last.get())
    }

    pub fn lang_bar(&self) -> &ComPtr<SimLangBarMgr> {
        &self.lang_bar
    }

    /// The atom `guid` was registered under, if any.
    pub fn atom_of(&self, guid: &Guid) -> Option<u32> {
        self.atoms.borrow().get(guid).copied()
    }
}

impl ThreadMgr for SimThreadMgr {
    fn focus(&self) -> Option<ComPtr<dyn DocumentContext>> {
        self.focused().map(|context| context.as_document())
    }

    fn active_flags(&self) -> ActivateFlags {
        self.flags
    }

    fn global_compartment_mgr(&self) -> Option<ComPtr<dyn CompartmentMgr>> {
        Some(view(&self.global_compartments))
    }

    fn register_guid(&self, guid: &Guid) -> HostResult<u32> {
        let mut atoms = self.atoms.borrow_mut();
        let next = atoms.len() as u32 + 1;
        Ok(*atoms.entry(*guid).or_insert(next))
    }

    fn lang_bar_mgr(&self) -> Option<ComPtr<dyn LangBarMgr>> {
        Some(view(&self.lang_bar))
    }
}

impl Source for SimThreadMgr {
    fn advise_sink(&self, iid: &Guid, sink: ComPtr<dyn Unknown>) -> HostResult<Cookie> {
        if !ADVISABLE.contains(iid) {
            return Err(HostError::InvalidArg);
        }
        let cookie = next_cookie();
        self.advised.borrow_mut().push(Advised {
            cookie,
            iid: *iid,
            sink,
        });
        Ok(cookie)
    }

    fn unadvise_sink(&self, cookie: Cookie) -> HostResult<()> {
        let removed = {
            let mut advised = self.advised.borrow_mut();
            advised
                .iter()
                .position(|held| held.cookie == cookie)
                .map(|index| advised.remove(index))
        };
        removed.map(|_| ()).ok_or(HostError::InvalidArg)
    }
}

impl KeystrokeMgr for SimThreadMgr {
    fn advise_key_event_sink(
        &self,
        client: ClientId,
        sink: ComPtr<dyn KeyEventSink>,
        _foreground: bool,
    ) -> HostResult<()> {
        if client.is_null() {
            return Err(HostError::InvalidArg);
        }
        let mut slot = self.key_sink.borrow_mut();
        if slot.is_some() {
            return Err(HostError::Failed("a key event sink is already advised".to_string()));
        }
        *slot = Some(KeySink { client, sink });
        Ok(())
    }

    fn unadvise_key_event_sink(&self, client: ClientId) -> HostResult<()> {
        let removed = {
            let mut slot = self.key_sink.borrow_mut();
            match slot.as_ref() {
                Some(held) if held.client == client => slot.take(),
                _ => None,
            }
        };
        removed.map(|_| ()).ok_or(HostError::InvalidArg)
    }

    fn preserve_key(
        &self,
        client: ClientId,
        guid: &Guid,
        key: &PreservedKey,
        description: &str,
    ) -> HostResult<()> {
        let mut preserved = self.preserved.borrow_mut();
        if preserved.iter().any(|entry| entry.key == *key) {
            return Err(HostError::Failed("key is already preserved".to_string()));
        }
        preserved.push(Preserved {
            client,
            guid: *guid,
            key: *key,
            description: description.to_string(),
        });
        Ok(())
    }

    fn unpreserve_key(&self, guid: &Guid, key: &PreservedKey) -> HostResult<()> {
        let mut preserved = self.preserved.borrow_mut();
        let index = preserved
            .iter()
            .position(|entry| entry.guid == *guid && entry.key == *key)
            .ok_or(HostError::InvalidArg)?;
        let entry = preserved.remove(index);
        trace!(client = entry.client.0, guid = %entry.guid, "key released");
        Ok(())
    }
}

impl CompartmentMgr for SimThreadMgr {
    fn compartment(&self, key: &Guid) -> HostResult<ComPtr<dyn Compartment>> {
        self.thread_compartments.compartment(key)
    }
}

impl LangBarItemMgr for SimThreadMgr {
    fn add_item(&self, item: ComPtr<dyn LangBarItemButton>) -> HostResult<()> {
        if self
            .bar_items
            .borrow()
            .iter()
            .any(|held| held.item.same_object(&item))
        {
            return Err(HostError::InvalidArg);
        }
        let updates = match item.query::<dyn Source>() {
            Some(source) => Subscription::advise(
                &source,
                <dyn LangBarItemSink as Interface>::IID,
                self.item_updates.unknown(),
            ),
            None => Subscription::inactive(),
        };
        self.bar_items.borrow_mut().push(BarItem {
            item,
            _updates: updates,
        });
        Ok(())
    }

    fn remove_item(&self, item: &ComPtr<dyn LangBarItemButton>) -> HostResult<()> {
        let removed = {
            let mut items = self.bar_items.borrow_mut();
            items
                .iter()
                .position(|held| held.item.same_object(item))
                .map(|index| items.remove(index))
        };
        // The update subscription ends here, outside the borrow.
        removed.map(drop).ok_or(HostError::InvalidArg)
    }
}

impl ComObject for SimThreadMgr {
    const INTERFACES: &'static [InterfaceEntry<Self>] = &[
        crate::interface_entry!(Self => dyn ThreadMgr),
        crate::interface_entry!(Self => dyn Source),
        crate::interface_entry!(Self => dyn KeystrokeMgr),
        crate::interface_entry!(Self => dyn CompartmentMgr),
        crate::interface_entry!(Self => dyn LangBarItemMgr),
    ];

    fn self_ref(&self) -> &SelfRef<Self> {
        &self.this
    }
}
