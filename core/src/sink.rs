//! Capabilities the engine exposes to the host.
//!
//! The host drives a text service exclusively through these traits, after
//! querying the service object for them by identifier.

use uuid::uuid;

use crate::com::{ComPtr, Interface, Unknown};
use crate::error::{HostResult, Result};
use crate::guid::Guid;
use crate::host::{ActivateFlags, ClientId, DocumentContext, EditRecord, ThreadMgr};
use crate::key_event::KeyEvent;
use crate::session::EditCookie;

/// Activation entry points.
pub trait TextInputProcessor: Unknown {
    /// Activates with the flags the thread manager reports.
    fn activate(&self, thread_mgr: ComPtr<dyn ThreadMgr>, client: ClientId) -> Result<()>;
    fn activate_ex(
        &self,
        thread_mgr: ComPtr<dyn ThreadMgr>,
        client: ClientId,
        flags: ActivateFlags,
    ) -> Result<()>;
    fn deactivate(&self) -> Result<()>;
}

impl Interface for dyn TextInputProcessor {
    const IID: Guid = uuid!("aa80e7f7-2021-11d2-93e0-0060b067b86e");
}

/// Extended activation identifier; resolves to the [`TextInputProcessor`] view.
pub const IID_TEXT_INPUT_PROCESSOR_EX: Guid = uuid!("6e4e2102-f9cd-433d-b496-303ce03a6507");

pub trait ThreadMgrEventSink: Unknown {
    fn on_init_document_mgr(&self) -> HostResult<()>;
    fn on_uninit_document_mgr(&self) -> HostResult<()>;
    fn on_set_focus(
        &self,
        focus: Option<&ComPtr<dyn DocumentContext>>,
        previous: Option<&ComPtr<dyn DocumentContext>>,
    ) -> HostResult<()>;
    fn on_push_context(&self, context: &ComPtr<dyn DocumentContext>) -> HostResult<()>;
    fn on_pop_context(&self, context: &ComPtr<dyn DocumentContext>) -> HostResult<()>;
}

impl Interface for dyn ThreadMgrEventSink {
    const IID: Guid = uuid!("aa80e80e-2021-11d2-93e0-0060b067b86e");
}

/// Notified after every edit session that changed a document.
pub trait TextEditSink: Unknown {
    /// `ec` is a read-only cookie valid for this call.
    fn on_end_edit(
        &self,
        context: &ComPtr<dyn DocumentContext>,
        ec: EditCookie<'_>,
        record: &ComPtr<dyn EditRecord>,
    ) -> HostResult<()>;
}

impl Interface for dyn TextEditSink {
    const IID: Guid = uuid!("8127d409-ccd3-4683-967a-b43d5b482bf7");
}

/// Keyboard input. The `test` variants ask whether a key would be eaten
/// without acting on it.
pub trait KeyEventSink: Unknown {
    fn on_set_focus(&self, foreground: bool) -> HostResult<()>;
    fn on_test_key_down(
        &self,
        context: &ComPtr<dyn DocumentContext>,
        key: &KeyEvent,
    ) -> HostResult<bool>;
    fn on_key_down(&self, context: &ComPtr<dyn DocumentContext>, key: &KeyEvent)
        -> HostResult<bool>;
    fn on_test_key_up(
        &self,
        context: &ComPtr<dyn DocumentContext>,
        key: &KeyEvent,
    ) -> HostResult<bool>;
    fn on_key_up(&self, context: &ComPtr<dyn DocumentContext>, key: &KeyEvent) -> HostResult<bool>;
    fn on_preserved_key(
        &self,
        context: &ComPtr<dyn DocumentContext>,
        guid: &Guid,
    ) -> HostResult<bool>;
}

impl Interface for dyn KeyEventSink {
    const IID: Guid = uuid!("aa80e7f5-2021-11d2-93e0-0060b067b86e");
}

pub trait CompositionSink: Unknown {
    /// The host ended `composition` on its own. The handle must not be used
    /// afterwards.
    fn on_composition_terminated(
        &self,
        ec: EditCookie<'_>,
        composition: &ComPtr<dyn crate::host::Composition>,
    ) -> HostResult<()>;
}

impl Interface for dyn CompositionSink {
    const IID: Guid = uuid!("a781718c-579a-4b15-a280-32b8577acc5e");
}

pub trait CompartmentEventSink: Unknown {
    fn on_change(&self, key: &Guid) -> HostResult<()>;
}

impl Interface for dyn CompartmentEventSink {
    const IID: Guid = uuid!("743abd5f-f26d-48df-8cc5-238492419b64");
}

pub trait ActiveLanguageProfileNotifySink: Unknown {
    fn on_activated(&self, clsid: &Guid, profile: &Guid, activated: bool) -> HostResult<()>;
}

impl Interface for dyn ActiveLanguageProfileNotifySink {
    const IID: Guid = uuid!("b246cb75-a93e-4652-bf8c-b3fe0cfd7e57");
}

/// Callback the host runs once it grants an edit session.
pub trait EditSessionCallback: Unknown {
    /// `cookie` is the raw lock value, valid until this call returns.
    fn do_edit_session(&self, cookie: u32) -> HostResult<()>;
}

impl Interface for dyn EditSessionCallback {
    const IID: Guid = uuid!("aa80e803-2021-11d2-93e0-0060b067b86e");
}
