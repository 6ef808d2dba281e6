//! Document contexts and compositions.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use tracing::trace;

use crate::com::{ComObject, ComPtr, InterfaceEntry, SelfRef, WeakPtr};
use crate::error::{HostError, HostResult};
use crate::guid::{Guid, GUID_PROP_ATTRIBUTE};
use crate::host::{
    ClientId, Compartment, CompartmentMgr, Composition, ContextComposition, ContextView,
    DocumentContext, InsertAtSelection, Property, Selection, SessionFlags, TextRange,
};
use crate::session::EditCookie;
use crate::sink::{CompositionSink, EditSessionCallback, TextEditSink};

use super::compartment::{SimCompartment, SimCompartmentStore};
use super::document::{SimDocument, SimEditRecord, SimProperty, SimRange, SimView};
use super::thread_mgr::SimThreadMgr;
use super::view;

/// End-of-edit rounds run after one session before giving up.
const MAX_NOTIFY_ROUNDS: usize = 8;

/// A host composition over a tracked range.
pub struct SimComposition {
    this: SelfRef<SimComposition>,
    range: ComPtr<SimRange>,
    sink: ComPtr<dyn CompositionSink>,
    context: WeakPtr<SimContext>,
    active: Cell<bool>,
    calls_after_end: Cell<u32>,
}

impl SimComposition {
    pub fn is_active(&self) -> bool {
        self.active.get()
    }

    pub fn span(&self) -> (usize, usize) {
        self.range.span()
    }

    /// Calls made through the handle after it ended.
    pub fn calls_after_end(&self) -> u32 {
        self.calls_after_end.get()
    }

    fn ensure_active(&self) -> HostResult<()> {
        if self.active.get() {
            Ok(())
        } else {
            self.calls_after_end.set(self.calls_after_end.get() + 1);
            Err(HostError::NoComposition)
        }
    }
}

impl Composition for SimComposition {
    fn range(&self) -> HostResult<ComPtr<dyn TextRange>> {
        self.ensure_active()?;
        Ok(view(&self.range))
    }

    fn end_composition(&self, ec: EditCookie<'_>) -> HostResult<()> {
        self.ensure_active()?;
        let context = self.context.upgrade().ok_or(HostError::NoComposition)?;
        context.doc.check(ec, true)?;
        self.active.set(false);
        let ended = context.composition.borrow_mut().take();
        drop(ended);
        trace!("composition ended by service");
        Ok(())
    }
}

impl ComObject for SimComposition {
    const INTERFACES: &'static [InterfaceEntry<Self>] =
        &[crate::interface_entry!(Self => dyn Composition)];

    fn self_ref(&self) -> &SelfRef<Self> {
        &self.this
    }
}

/// An editable document context.
pub struct SimContext {
    this: SelfRef<SimContext>,
    doc: Rc<SimDocument>,
    thread_mgr: WeakPtr<SimThreadMgr>,
    compartments: ComPtr<SimCompartmentStore>,
    attributes: ComPtr<SimProperty>,
    view: ComPtr<SimView>,
    composition: RefCell<Option<ComPtr<SimComposition>>>,
    last_composition: RefCell<Option<ComPtr<SimComposition>>>,
    deny_sessions: Cell<bool>,
    sessions_granted: Cell<u32>,
}

impl SimContext {
    pub(crate) fn new(text: &str, thread_mgr: WeakPtr<SimThreadMgr>) -> ComPtr<Self> {
        let doc = SimDocument::new(text);
        let attributes = SimProperty::new(&doc);
        let view = SimView::new(&doc);
        ComPtr::make(|this| Self {
            this,
            doc,
            thread_mgr,
            compartments: SimCompartmentStore::new(),
            attributes,
            view,
            composition: RefCell::new(None),
            last_composition: RefCell::new(None),
            deny_sessions: Cell::new(false),
            sessions_granted: Cell::new(0),
        })
    }

    pub fn as_document(&self) -> ComPtr<dyn DocumentContext> {
        match self.this.upgrade() {
            Some(this) => view(&this),
            None => unreachable!("context used while being dropped"),
        }
    }

    pub fn document(&self) -> &Rc<SimDocument> {
        &self.doc
    }

    pub fn text(&self) -> String {
        self.doc.text()
    }

    pub fn selection_span(&self) -> (usize, usize) {
        self.doc.selection_span()
    }

    /// Span of the active composition.
    pub fn composition_span(&self) -> Option<(usize, usize)> {
        self.composition.borrow().as_ref().map(|comp| comp.span())
    }

    pub fn has_composition(&self) -> bool {
        self.composition.borrow().is_some()
    }

    /// The most recent composition, active or not.
    pub fn last_composition(&self) -> Option<ComPtr<SimComposition>> {
        self.last_composition.borrow().clone()
    }

    /// Display-attribute value on the character at `pos`.
    pub fn attribute_at(&self, pos: usize) -> Option<i32> {
        self.attributes.value_at(pos)
    }

    pub fn attributes_clear(&self) -> bool {
        self.attributes.is_clear()
    }

    /// Makes every later session request fail with `Locked`.
    pub fn set_deny_sessions(&self, deny: bool) {
        self.deny_sessions.set(deny);
    }

    pub fn sessions_granted(&self) -> u32 {
        self.sessions_granted.get()
    }

    pub fn compartment(&self, key: &Guid) -> ComPtr<SimCompartment> {
        self.compartments.get(key)
    }

    /// Moves the caret as the user or another service would, then reports
    /// the edit.
    pub fn move_caret(&self, start: usize, end: usize) {
        self.doc.set_selection_span(start, end);
        self.flush_edit_notifications();
    }

    /// Types `text` over the selection as another party, then reports it.
    pub fn insert_external(&self, text: &str) {
        let (start, end) = self.doc.selection_span();
        let range = self.doc.sim_range(start, end);
        let typed = self.doc.with_lock(|ec| {
            range.set_text(ec, text)?;
            range.collapse(ec, crate::host::Anchor::End)
        });
        if typed.is_ok() {
            let (_, caret) = range.span();
            self.doc.set_selection_span(caret, caret);
        }
        self.flush_edit_notifications();
    }

    /// Ends the composition from the host side and tells its sink.
    pub fn terminate_composition(&self) -> bool {
        let Some(composition) = self.composition.borrow_mut().take() else {
            return false;
        };
        composition.active.set(false);
        let handle: ComPtr<dyn Composition> = view(&composition);
        let sink = composition.sink.clone();
        if let Err(err) = self.doc.with_lock(|ec| sink.on_composition_terminated(ec, &handle)) {
            trace!(error = %err, "composition sink failed");
        }
        self.flush_edit_notifications();
        true
    }

    /// Ends the composition from the host side without telling its sink.
    pub fn drop_composition_silently(&self) -> bool {
        let Some(composition) = self.composition.borrow_mut().take() else {
            return false;
        };
        composition.active.set(false);
        true
    }

    /// Sends end-of-edit notifications until the document settles.
    pub(crate) fn flush_edit_notifications(&self) {
        if self.doc.is_locked() {
            return;
        }
        let Some(thread_mgr) = self.thread_mgr.upgrade() else {
            self.doc.take_changes();
            return;
        };
        let document = self.as_document();
        for _ in 0..MAX_NOTIFY_ROUNDS {
            let Some(changes) = self.doc.take_changes() else {
                return;
            };
            let record = view(&SimEditRecord::new(changes));
            for sink in thread_mgr.sinks::<dyn TextEditSink>() {
                if let Err(err) = self
                    .doc
                    .with_read_lock(|ec| sink.on_end_edit(&document, ec, &record))
                {
                    trace!(error = %err, "text edit sink failed");
                }
            }
        }
        trace!("edit notifications did not settle");
    }
}

impl DocumentContext for SimContext {
    fn request_edit_session(
        &self,
        client: ClientId,
        session: ComPtr<dyn EditSessionCallback>,
        flags: SessionFlags,
    ) -> HostResult<()> {
        if client.is_null() {
            return Err(HostError::InvalidArg);
        }
        if self.deny_sessions.get() {
            return Err(HostError::Locked);
        }
        if !flags.contains(SessionFlags::SYNC) {
            return Err(HostError::NotImplemented);
        }
        let writable = flags.contains(SessionFlags::READWRITE);
        self.sessions_granted.set(self.sessions_granted.get() + 1);

        let result = if writable {
            self.doc.with_lock(|ec| session.do_edit_session(ec.raw()))
        } else {
            self.doc.with_read_lock(|ec| session.do_edit_session(ec.raw()))
        };
        self.flush_edit_notifications();
        result
    }

    fn selection(&self, ec: EditCookie<'_>) -> HostResult<Selection> {
        self.doc.check(ec, false)?;
        let (start, end) = self.doc.selection_span();
        Ok(Selection::new(self.doc.range(start, end)))
    }

    fn set_selection(&self, ec: EditCookie<'_>, selection: &Selection) -> HostResult<()> {
        self.doc.check(ec, true)?;
        let (start, len) = selection.range.extent()?;
        self.doc.set_selection_span(start, start + len);
        Ok(())
    }

    fn property(&self, guid: &Guid) -> HostResult<ComPtr<dyn Property>> {
        if *guid == GUID_PROP_ATTRIBUTE {
            Ok(view(&self.attributes))
        } else {
            Err(HostError::InvalidArg)
        }
    }

    fn active_view(&self) -> HostResult<ComPtr<dyn ContextView>> {
        Ok(view(&self.view))
    }
}

impl ContextComposition for SimContext {
    fn start_composition(
        &self,
        ec: EditCookie<'_>,
        range: &ComPtr<dyn TextRange>,
        sink: ComPtr<dyn CompositionSink>,
    ) -> HostResult<ComPtr<dyn Composition>> {
        self.doc.check(ec, true)?;
        if self.has_composition() {
            return Err(HostError::Failed("a composition is already active".to_string()));
        }
        let (start, len) = range.extent()?;
        let composition = ComPtr::make(|this| SimComposition {
            this,
            range: self.doc.sim_range(start, start + len),
            sink,
            context: self.this.downgrade(),
            active: Cell::new(true),
            calls_after_end: Cell::new(0),
        });
        *self.composition.borrow_mut() = Some(composition.clone());
        *self.last_composition.borrow_mut() = Some(composition.clone());
        trace!(start, len, "composition started");
        Ok(view(&composition))
    }
}

impl InsertAtSelection for SimContext {
    fn insertion_point(&self, ec: EditCookie<'_>) -> HostResult<ComPtr<dyn TextRange>> {
        self.doc.check(ec, false)?;
        let (start, end) = self.doc.selection_span();
        Ok(self.doc.range(start, end))
    }
}

impl CompartmentMgr for SimContext {
    fn compartment(&self, key: &Guid) -> HostResult<ComPtr<dyn Compartment>> {
        self.compartments.compartment(key)
    }
}

impl ComObject for SimContext {
    const INTERFACES: &'static [InterfaceEntry<Self>] = &[
        crate::interface_entry!(Self => dyn DocumentContext),
        crate::interface_entry!(Self => dyn ContextComposition),
        crate::interface_entry!(Self => dyn InsertAtSelection),
        crate::interface_entry!(Self => dyn CompartmentMgr),
    ];

    fn self_ref(&self) -> &SelfRef<Self> {
        &self.this
    }
}
