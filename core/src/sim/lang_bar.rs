//! The language bar's floating window.

use std::cell::{Cell, RefCell};

use tracing::trace;

use crate::com::{ComObject, ComPtr, Interface, InterfaceEntry, SelfRef, Unknown};
use crate::error::{HostError, HostResult};
use crate::guid::Guid;
use crate::host::{LangBarMgr, Source};
use crate::langbar::LangBarEventSink;
use crate::subscription::{next_cookie, Cookie};

/// Floating-window flags plus the sinks told when they are set.
pub struct SimLangBarMgr {
    this: SelfRef<SimLangBarMgr>,
    status: Cell<u32>,
    sinks: RefCell<Vec<(Cookie, ComPtr<dyn LangBarEventSink>)>>,
}

impl SimLangBarMgr {
    pub fn new() -> ComPtr<Self> {
        ComPtr::make(|this| Self {
            this,
            status: Cell::new(0),
            sinks: RefCell::new(Vec::new()),
        })
    }

    pub fn status(&self) -> u32 {
        self.status.get()
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.borrow().len()
    }
}

impl LangBarMgr for SimLangBarMgr {
    fn show_floating_status(&self) -> HostResult<u32> {
        Ok(self.status.get())
    }

    fn show_floating(&self, flags: u32) -> HostResult<()> {
        self.status.set(flags);
        trace!(flags, "language bar floating status set");
        let sinks: Vec<_> = self.sinks.borrow().iter().map(|(_, sink)| sink.clone()).collect();
        for sink in sinks {
            if let Err(err) = sink.show_floating(flags) {
                trace!(error = %err, "language bar sink failed");
            }
        }
        Ok(())
    }
}

impl Source for SimLangBarMgr {
    fn advise_sink(&self, iid: &Guid, sink: ComPtr<dyn Unknown>) -> HostResult<Cookie> {
        if *iid != <dyn LangBarEventSink as Interface>::IID {
            return Err(HostError::InvalidArg);
        }
        let sink = sink
            .query::<dyn LangBarEventSink>()
            .ok_or(HostError::InvalidArg)?;
        let cookie = next_cookie();
        self.sinks.borrow_mut().push((cookie, sink));
        Ok(cookie)
    }

    fn unadvise_sink(&self, cookie: Cookie) -> HostResult<()> {
        let removed = {
            let mut sinks = self.sinks.borrow_mut();
            sinks
                .iter()
                .position(|(held, _)| *held == cookie)
                .map(|index| sinks.remove(index))
        };
        removed.map(|_| ()).ok_or(HostError::InvalidArg)
    }
}

impl ComObject for SimLangBarMgr {
    const INTERFACES: &'static [InterfaceEntry<Self>] = &[
        crate::interface_entry!(Self => dyn LangBarMgr),
        crate::interface_entry!(Self => dyn Source),
    ];

    fn self_ref(&self) -> &SelfRef<Self> {
        &self.this
    }
}
