//! Compartments and compartment managers.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;

use tracing::trace;

use crate::com::{ComObject, ComPtr, Interface, InterfaceEntry, SelfRef, Unknown};
use crate::error::{HostError, HostResult};
use crate::guid::Guid;
use crate::host::{ClientId, Compartment, CompartmentMgr, Source};
use crate::sink::CompartmentEventSink;
use crate::subscription::{next_cookie, Cookie};

use super::view;

/// A shared value slot that notifies its sinks on change.
pub struct SimCompartment {
    this: SelfRef<SimCompartment>,
    key: Guid,
    value: Cell<Option<u32>>,
    sinks: RefCell<Vec<(Cookie, ComPtr<dyn CompartmentEventSink>)>>,
}

impl SimCompartment {
    pub fn new(key: Guid) -> ComPtr<Self> {
        ComPtr::make(|this| Self {
            this,
            key,
            value: Cell::new(None),
            sinks: RefCell::new(Vec::new()),
        })
    }

    pub fn key(&self) -> Guid {
        self.key
    }

    pub fn current(&self) -> Option<u32> {
        self.value.get()
    }

    /// Stores `value`, notifying sinks when it differs from the old one.
    pub fn store(&self, value: u32) {
        if self.value.replace(Some(value)) == Some(value) {
            return;
        }
        trace!(key = %self.key, value, "compartment changed");
        let sinks: Vec<_> = self.sinks.borrow().iter().map(|(_, sink)| sink.clone()).collect();
        for sink in sinks {
            if let Err(err) = sink.on_change(&self.key) {
                trace!(error = %err, "compartment sink failed");
            }
        }
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.borrow().len()
    }
}

impl Compartment for SimCompartment {
    fn value(&self) -> HostResult<Option<u32>> {
        Ok(self.value.get())
    }

    fn set_value(&self, client: ClientId, value: u32) -> HostResult<()> {
        if client.is_null() {
            return Err(HostError::InvalidArg);
        }
        self.store(value);
        Ok(())
    }
}

impl Source for SimCompartment {
    fn advise_sink(&self, iid: &Guid, sink: ComPtr<dyn Unknown>) -> HostResult<Cookie> {
        if *iid != <dyn CompartmentEventSink as Interface>::IID {
            return Err(HostError::InvalidArg);
        }
        let sink = sink
            .query::<dyn CompartmentEventSink>()
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

impl ComObject for SimCompartment {
    const INTERFACES: &'static [InterfaceEntry<Self>] = &[
        crate::interface_entry!(Self => dyn Compartment),
        crate::interface_entry!(Self => dyn Source),
    ];

    fn self_ref(&self) -> &SelfRef<Self> {
        &self.this
    }
}

/// Compartments keyed by GUID, created on first use.
pub struct SimCompartmentStore {
    this: SelfRef<SimCompartmentStore>,
    compartments: RefCell<HashMap<Guid, ComPtr<SimCompartment>>>,
}

impl SimCompartmentStore {
    pub fn new() -> ComPtr<Self> {
        ComPtr::make(|this| Self {
            this,
            compartments: RefCell::new(HashMap::new()),
        })
    }

    pub fn get(&self, key: &Guid) -> ComPtr<SimCompartment> {
        self.compartments
            .borrow_mut()
            .entry(*key)
            .or_insert_with(|| SimCompartment::new(*key))
            .clone()
    }
}

impl CompartmentMgr for SimCompartmentStore {
    fn compartment(&self, key: &Guid) -> HostResult<ComPtr<dyn Compartment>> {
        Ok(view(&self.get(key)))
    }
}

impl ComObject for SimCompartmentStore {
    const INTERFACES: &'static [InterfaceEntry<Self>] =
        &[crate::interface_entry!(Self => dyn CompartmentMgr)];

    fn self_ref(&self) -> &SelfRef<Self> {
        &self.this
    }
}
