//! Capabilities consumed from the host.
//!
//! The host owns documents, ranges, carets and the keyboard. Everything the
//! engine needs from it is expressed as a capability trait here; a real host
//! adapter implements them over the platform API and [`crate::sim`]
//! implements them in memory.

use std::cmp::Ordering;

use bitflags::bitflags;
use uuid::uuid;

use crate::com::{ComPtr, Interface, Unknown};
use crate::error::HostResult;
use crate::guid::Guid;
use crate::langbar::LangBarItemButton;
use crate::session::EditCookie;
use crate::sink::{EditSessionCallback, KeyEventSink};
use crate::subscription::Cookie;

/// Identifier the host assigns to an activated text service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ClientId(pub u32);

impl ClientId {
    pub const NULL: ClientId = ClientId(0);

    pub fn is_null(self) -> bool {
        self == Self::NULL
    }
}

bitflags! {
    /// Flags describing the environment a service was activated in.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ActivateFlags: u32 {
        const NO_ACTIVATE_TIP = 0x0001;
        const SECURE_MODE = 0x0002;
        const UI_ELEMENT_ENABLED_ONLY = 0x0004;
        const COM_WITHOUT_MARSHALING = 0x0008;
        const IMMERSIVE = 0x0010;
        const CONSOLE = 0x0020;
    }
}

bitflags! {
    /// Kind of edit session requested from a document.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SessionFlags: u32 {
        const SYNC = 0x1;
        const READ = 0x2;
        const READWRITE = 0x6;
        const ASYNC = 0x8;
    }
}

bitflags! {
    /// Modifier keys that are part of a preserved key.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Modifiers: u32 {
        const ALT = 0x0001;
        const CONTROL = 0x0002;
        const SHIFT = 0x0004;
    }
}

/// A key combination reserved by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PreservedKey {
    pub key_code: u32,
    pub modifiers: Modifiers,
}

/// One end of a range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Anchor {
    Start,
    End,
}

/// Which end of a selection the caret sits at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ActiveEnd {
    None,
    Start,
    #[default]
    End,
}

/// A document selection.
#[derive(Debug, Clone)]
pub struct Selection {
    pub range: ComPtr<dyn TextRange>,
    pub active_end: ActiveEnd,
    pub interim_char: bool,
}

impl Selection {
    pub fn new(range: ComPtr<dyn TextRange>) -> Self {
        Self {
            range,
            active_end: ActiveEnd::End,
            interim_char: false,
        }
    }
}

/// Screen rectangle in host coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }
}

/// Registers event sinks and hands back a cookie to unregister them with.
pub trait Source: Unknown {
    fn advise_sink(&self, iid: &Guid, sink: ComPtr<dyn Unknown>) -> HostResult<Cookie>;
    fn unadvise_sink(&self, cookie: Cookie) -> HostResult<()>;
}

impl Interface for dyn Source {
    const IID: Guid = uuid!("4ea48a35-60ae-446f-8fd6-e6a8d82459f7");
}

/// The per-thread input manager a service is activated against.
pub trait ThreadMgr: Unknown {
    /// Top context of the focused document, if any.
    fn focus(&self) -> Option<ComPtr<dyn DocumentContext>>;
    fn active_flags(&self) -> ActivateFlags;
    fn global_compartment_mgr(&self) -> Option<ComPtr<dyn CompartmentMgr>>;
    /// Maps a GUID to a small integer atom, stable for the thread's lifetime.
    fn register_guid(&self, guid: &Guid) -> HostResult<u32>;

    /// The language bar, when the host has one.
    fn lang_bar_mgr(&self) -> Option<ComPtr<dyn LangBarMgr>> {
        None
    }
}

impl Interface for dyn ThreadMgr {
    const IID: Guid = uuid!("aa80e801-2021-11d2-93e0-0060b067b86e");
}

pub trait KeystrokeMgr: Unknown {
    fn advise_key_event_sink(
        &self,
        client: ClientId,
        sink: ComPtr<dyn KeyEventSink>,
        foreground: bool,
    ) -> HostResult<()>;
    fn unadvise_key_event_sink(&self, client: ClientId) -> HostResult<()>;
    fn preserve_key(
        &self,
        client: ClientId,
        guid: &Guid,
        key: &PreservedKey,
        description: &str,
    ) -> HostResult<()>;
    fn unpreserve_key(&self, guid: &Guid, key: &PreservedKey) -> HostResult<()>;
}

impl Interface for dyn KeystrokeMgr {
    const IID: Guid = uuid!("aa80e7f0-2021-11d2-93e0-0060b067b86e");
}

pub trait CompartmentMgr: Unknown {
    /// The compartment for `key`, created on first use.
    fn compartment(&self, key: &Guid) -> HostResult<ComPtr<dyn Compartment>>;
}

impl Interface for dyn CompartmentMgr {
    const IID: Guid = uuid!("7dcf57ac-18ad-438b-824d-979bffb74b7c");
}

/// A host-owned shared integer slot.
pub trait Compartment: Unknown {
    /// `None` until someone stores a value.
    fn value(&self) -> HostResult<Option<u32>>;
    fn set_value(&self, client: ClientId, value: u32) -> HostResult<()>;
}

impl Interface for dyn Compartment {
    const IID: Guid = uuid!("bb08f7a9-607a-4384-8623-056892b64371");
}

pub trait LangBarItemMgr: Unknown {
    fn add_item(&self, item: ComPtr<dyn LangBarItemButton>) -> HostResult<()>;
    fn remove_item(&self, item: &ComPtr<dyn LangBarItemButton>) -> HostResult<()>;
}

impl Interface for dyn LangBarItemMgr {
    const IID: Guid = uuid!("ba468c55-9956-4fb1-a59d-52a7dd7cc6aa");
}

/// The language bar itself. [`LangBarEventSink`](crate::langbar::LangBarEventSink)s
/// register through its [`Source`].
pub trait LangBarMgr: Unknown {
    /// Current floating-window flags.
    fn show_floating_status(&self) -> HostResult<u32>;
    fn show_floating(&self, flags: u32) -> HostResult<()>;
}

impl Interface for dyn LangBarMgr {
    const IID: Guid = uuid!("87955690-e627-11d2-8ddb-00105a2799b5");
}

/// A host document context. Reads and writes require an edit cookie.
pub trait DocumentContext: Unknown {
    /// Asks the host to run `session`. Synchronous requests run before this
    /// returns; the host may refuse with [`HostError::Locked`](crate::HostError::Locked).
    fn request_edit_session(
        &self,
        client: ClientId,
        session: ComPtr<dyn EditSessionCallback>,
        flags: SessionFlags,
    ) -> HostResult<()>;
    fn selection(&self, ec: EditCookie<'_>) -> HostResult<Selection>;
    fn set_selection(&self, ec: EditCookie<'_>, selection: &Selection) -> HostResult<()>;
    fn property(&self, guid: &Guid) -> HostResult<ComPtr<dyn Property>>;
    fn active_view(&self) -> HostResult<ComPtr<dyn ContextView>>;
}

impl Interface for dyn DocumentContext {
    const IID: Guid = uuid!("aa80e7fd-2021-11d2-93e0-0060b067b86e");
}

pub trait ContextComposition: Unknown {
    /// Begins a composition over `range`. The host reports forced
    /// termination to `sink`.
    fn start_composition(
        &self,
        ec: EditCookie<'_>,
        range: &ComPtr<dyn TextRange>,
        sink: ComPtr<dyn crate::sink::CompositionSink>,
    ) -> HostResult<ComPtr<dyn Composition>>;
}

impl Interface for dyn ContextComposition {
    const IID: Guid = uuid!("d40c8aae-ac92-4fc7-9a11-0ee0e23aa39b");
}

pub trait InsertAtSelection: Unknown {
    /// Where text would be inserted now, without inserting anything.
    fn insertion_point(&self, ec: EditCookie<'_>) -> HostResult<ComPtr<dyn TextRange>>;
}

impl Interface for dyn InsertAtSelection {
    const IID: Guid = uuid!("55ce16ba-3014-41c1-9ceb-fade1446ac6c");
}

/// A span of document text whose anchors follow edits.
pub trait TextRange: Unknown {
    fn text(&self, ec: EditCookie<'_>) -> HostResult<String>;
    fn set_text(&self, ec: EditCookie<'_>, text: &str) -> HostResult<()>;
    /// Orders this range's start against `anchor` of `other`.
    fn compare_start(
        &self,
        ec: EditCookie<'_>,
        other: &ComPtr<dyn TextRange>,
        anchor: Anchor,
    ) -> HostResult<Ordering>;
    /// Orders this range's end against `anchor` of `other`.
    fn compare_end(
        &self,
        ec: EditCookie<'_>,
        other: &ComPtr<dyn TextRange>,
        anchor: Anchor,
    ) -> HostResult<Ordering>;
    fn shift_start_to_range(
        &self,
        ec: EditCookie<'_>,
        other: &ComPtr<dyn TextRange>,
        anchor: Anchor,
    ) -> HostResult<()>;
    fn shift_end_to_range(
        &self,
        ec: EditCookie<'_>,
        other: &ComPtr<dyn TextRange>,
        anchor: Anchor,
    ) -> HostResult<()>;
    /// Moves the start by `count` characters and returns how far it moved.
    fn shift_start(&self, ec: EditCookie<'_>, count: i32) -> HostResult<i32>;
    fn collapse(&self, ec: EditCookie<'_>, anchor: Anchor) -> HostResult<()>;
    fn is_empty(&self, ec: EditCookie<'_>) -> HostResult<bool>;
    fn clone_range(&self) -> HostResult<ComPtr<dyn TextRange>>;
    /// Character offset of the start and the length.
    fn extent(&self) -> HostResult<(usize, usize)>;
}

impl Interface for dyn TextRange {
    const IID: Guid = uuid!("aa80e7ff-2021-11d2-93e0-0060b067b86e");
}

/// A host-side composition.
pub trait Composition: Unknown {
    fn range(&self) -> HostResult<ComPtr<dyn TextRange>>;
    fn end_composition(&self, ec: EditCookie<'_>) -> HostResult<()>;
}

impl Interface for dyn Composition {
    const IID: Guid = uuid!("20168d64-5a8f-4a5a-b7bd-cfa29f4d0fd9");
}

/// Per-range integer values, such as display-attribute atoms.
pub trait Property: Unknown {
    fn value(&self, ec: EditCookie<'_>, range: &ComPtr<dyn TextRange>) -> HostResult<Option<i32>>;
    fn set_value(
        &self,
        ec: EditCookie<'_>,
        range: &ComPtr<dyn TextRange>,
        value: i32,
    ) -> HostResult<()>;
    fn clear(&self, ec: EditCookie<'_>, range: &ComPtr<dyn TextRange>) -> HostResult<()>;
}

impl Interface for dyn Property {
    const IID: Guid = uuid!("e2449660-9542-11d2-bf46-00105a2799b5");
}

pub trait ContextView: Unknown {
    /// Bounding box of `range` on screen and whether it was clipped.
    fn text_extent(
        &self,
        ec: EditCookie<'_>,
        range: &ComPtr<dyn TextRange>,
    ) -> HostResult<(Rect, bool)>;
}

impl Interface for dyn ContextView {
    const IID: Guid = uuid!("2433bf8e-0f9b-435c-ba2c-180611978c30");
}

/// What changed during the edit that just ended.
pub trait EditRecord: Unknown {
    fn selection_changed(&self) -> HostResult<bool>;
}

impl Interface for dyn EditRecord {
    const IID: Guid = uuid!("42d4d099-7c1a-4a89-b836-6c6f22160df0");
}
