//! An in-memory host.
//!
//! Implements every host capability the engine consumes over plain Rust
//! state: single-line documents with tracked ranges and edit locks, a
//! thread manager that delivers focus changes and keystrokes, compartments,
//! and a language bar. The demo and the integration tests drive a
//! [`TextService`](crate::TextService) through it exactly as a platform host
//! would, then inspect the document and the registrations.
//!
//! ```ignore
//! let host = SimThreadMgr::new();
//! let context = host.create_context("hello ");
//! host.set_focus(Some(&context));
//! let service = TextService::new(CLSID, MyHandler);
//! service.activate(host.as_thread_mgr(), host.new_client_id())?;
//! host.key_down(&KeyEvent::from_char('a'));
//! ```

mod compartment;
mod context;
mod document;
mod lang_bar;
mod thread_mgr;

pub use compartment::{SimCompartment, SimCompartmentStore};
pub use context::{SimComposition, SimContext};
pub use document::{
    PendingChanges, SimDocument, SimEditRecord, SimProperty, SimRange, SimView, CHAR_WIDTH,
    LINE_HEIGHT, ORIGIN,
};
pub use lang_bar::SimLangBarMgr;
pub use thread_mgr::SimThreadMgr;

use crate::com::{ComObject, ComPtr, Interface};

/// Views a concrete sim object through one of the capabilities it declares.
pub(crate) fn view<T, I>(object: &ComPtr<T>) -> ComPtr<I>
where
    T: ComObject,
    I: ?Sized + Interface + 'static,
{
    match object.query::<I>() {
        Some(view) => view,
        None => unreachable!("sim object does not declare the requested capability"),
    }
}
