//! Scoped event subscriptions.
//!
//! A [`Subscription`] registers a sink with an event source and unregisters
//! it when dropped. It holds only a weak reference to the source, so a source
//! that disappears first is tolerated.

use std::sync::atomic::{AtomicU32, Ordering};

use tracing::{trace, warn};

use crate::com::{ComPtr, Unknown, WeakPtr};
use crate::guid::{Guid, GUID_NULL};
use crate::host::Source;

/// Opaque registration token issued by an event source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Cookie(u32);

impl Cookie {
    /// Never issued.
    pub const INVALID: Cookie = Cookie(0);

    pub fn from_raw(raw: u32) -> Self {
        Cookie(raw)
    }

    pub fn raw(self) -> u32 {
        self.0
    }

    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

static NEXT_COOKIE: AtomicU32 = AtomicU32::new(1);

/// Next value of the process-wide cookie counter.
///
/// Sources implemented in this crate draw their cookies from here so that a
/// cookie is never reused while the process lives (short of wrapping).
pub fn next_cookie() -> Cookie {
    loop {
        let raw = NEXT_COOKIE.fetch_add(1, Ordering::Relaxed);
        if raw != Cookie::INVALID.0 {
            return Cookie(raw);
        }
    }
}

/// A sink registration that ends when this value is dropped.
///
/// Must be dropped (or [`unadvise`](Self::unadvise)d) before the sink is
/// expected to be destroyed: the source holds a reference to the sink while
/// the subscription is active.
#[derive(Debug)]
pub struct Subscription {
    source: Option<WeakPtr<dyn Source>>,
    cookie: Cookie,
    event: Guid,
}

impl Default for Subscription {
    fn default() -> Self {
        Self::inactive()
    }
}

impl Subscription {
    pub fn inactive() -> Self {
        Self {
            source: None,
            cookie: Cookie::INVALID,
            event: GUID_NULL,
        }
    }

    /// Registers `sink` for the `event` interface on `source`.
    ///
    /// A source that refuses leaves the subscription inactive; the refusal
    /// is logged, not returned, since callers treat every listener as
    /// optional.
    pub fn advise(source: &ComPtr<dyn Source>, event: Guid, sink: ComPtr<dyn Unknown>) -> Self {
        match source.advise_sink(&event, sink) {
            Ok(cookie) if cookie.is_valid() => {
                trace!(%event, cookie = cookie.raw(), "sink advised");
                Self {
                    source: Some(source.downgrade()),
                    cookie,
                    event,
                }
            }
            Ok(_) => {
                warn!(%event, "source issued an invalid cookie");
                Self::inactive()
            }
            Err(err) => {
                trace!(%event, error = %err, "source refused sink");
                Self::inactive()
            }
        }
    }

    pub fn is_active(&self) -> bool {
        self.cookie.is_valid()
    }

    pub fn cookie(&self) -> Cookie {
        self.cookie
    }

    /// Event interface this subscription was made for.
    pub fn event(&self) -> &Guid {
        &self.event
    }

    /// Ends the registration. Calling it again does nothing.
    pub fn unadvise(&mut self) {
        let cookie = std::mem::replace(&mut self.cookie, Cookie::INVALID);
        let Some(source) = self.source.take() else {
            return;
        };
        if !cookie.is_valid() {
            return;
        }
        match source.upgrade() {
            Some(source) => {
                if let Err(err) = source.unadvise_sink(cookie) {
                    warn!(
                        event = %self.event,
                        cookie = cookie.raw(),
                        error = %err,
                        "unadvise failed"
                    );
                } else {
                    trace!(event = %self.event, cookie = cookie.raw(), "sink unadvised");
                }
            }
            None => trace!(event = %self.event, "source already gone"),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unadvise();
    }
}
