//! Host-granted edit sessions.
//!
//! All reads and writes of host text happen inside a session: the engine
//! asks the document for one, the host calls back with an edit cookie, and
//! the cookie is only good until that callback returns. [`EditCookie`]
//! carries a lifetime tied to the callback frame, so code holding one cannot
//! keep it past the end of the session.

use std::cell::RefCell;
use std::marker::PhantomData;
use std::rc::Rc;

use tracing::{trace, warn};

use crate::com::{ComObject, ComPtr, InterfaceEntry, SelfRef};
use crate::error::{HostResult, ImeError, Result};
use crate::host::{ClientId, DocumentContext, SessionFlags};
use crate::sink::EditSessionCallback;

/// Proof of a host-granted lock, valid for the lifetime `'s`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EditCookie<'s> {
    raw: u32,
    _frame: PhantomData<&'s ()>,
}

impl EditCookie<'_> {
    /// Runs `f` with a cookie wrapping the host's raw value.
    ///
    /// Hosts call this when dispatching a session or a notification that
    /// carries a lock; the cookie cannot outlive `f`.
    pub fn for_callback<R>(raw: u32, f: impl FnOnce(EditCookie<'_>) -> R) -> R {
        f(EditCookie {
            raw,
            _frame: PhantomData,
        })
    }

    /// The host's value, for hosts validating the lock.
    pub fn raw(&self) -> u32 {
        self.raw
    }
}

/// The document and cookie of a session in progress.
#[derive(Debug, Clone, Copy)]
pub struct EditSession<'s> {
    context: &'s ComPtr<dyn DocumentContext>,
    cookie: EditCookie<'s>,
}

impl<'s> EditSession<'s> {
    pub fn new(context: &'s ComPtr<dyn DocumentContext>, cookie: EditCookie<'s>) -> Self {
        Self { context, cookie }
    }

    pub fn context(&self) -> &'s ComPtr<dyn DocumentContext> {
        self.context
    }

    pub fn cookie(&self) -> EditCookie<'s> {
        self.cookie
    }
}

type SessionBody = Box<dyn FnOnce(&EditSession<'_>)>;

/// The callback object handed to the host for one session request.
struct SessionRequest {
    this: SelfRef<SessionRequest>,
    context: ComPtr<dyn DocumentContext>,
    body: RefCell<Option<SessionBody>>,
}

impl EditSessionCallback for SessionRequest {
    fn do_edit_session(&self, cookie: u32) -> HostResult<()> {
        // Taken out before running so a reentrant dispatch finds it spent.
        let body = self.body.borrow_mut().take();
        match body {
            Some(body) => {
                trace!(cookie, "edit session granted");
                EditCookie::for_callback(cookie, |ec| {
                    body(&EditSession::new(&self.context, ec));
                });
            }
            None => trace!(cookie, "edit session dispatched twice; ignoring"),
        }
        Ok(())
    }
}

impl ComObject for SessionRequest {
    const INTERFACES: &'static [InterfaceEntry<Self>] =
        &[crate::interface_entry!(Self => dyn EditSessionCallback)];

    fn self_ref(&self) -> &SelfRef<Self> {
        &self.this
    }
}

/// Requests a synchronous read-write session on `context` and runs `edit`
/// inside it.
///
/// Returns what `edit` returned. A host that refuses the request, or that
/// accepts it without running the callback, yields [`ImeError::SessionDenied`]
/// and nothing has been touched.
pub fn request_session<R: 'static>(
    context: &ComPtr<dyn DocumentContext>,
    client: ClientId,
    edit: impl FnOnce(&EditSession<'_>) -> R + 'static,
) -> Result<R> {
    let outcome: Rc<RefCell<Option<R>>> = Rc::new(RefCell::new(None));
    let slot = Rc::clone(&outcome);
    let body: SessionBody = Box::new(move |session| {
        let value = edit(session);
        *slot.borrow_mut() = Some(value);
    });

    let request = ComPtr::make(|this| SessionRequest {
        this,
        context: context.clone(),
        body: RefCell::new(Some(body)),
    });
    let callback = request.acquire::<dyn EditSessionCallback>()?;
    drop(request);

    let flags = SessionFlags::SYNC | SessionFlags::READWRITE;
    if let Err(err) = context.request_edit_session(client, callback, flags) {
        warn!(error = %err, "edit session request refused");
        return Err(ImeError::SessionDenied);
    }

    let value = outcome.borrow_mut().take();
    value.ok_or(ImeError::SessionDenied)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cookie_exposes_raw_value_inside_callback() {
        let raw = EditCookie::for_callback(42, |ec| ec.raw());
        assert_eq!(raw, 42);
    }

    #[test]
    fn test_cookies_compare_by_value() {
        EditCookie::for_callback(7, |a| {
            EditCookie::for_callback(7, |b| assert_eq!(a.raw(), b.raw()));
        });
    }
}
