//! Reference-counted capability objects.
//!
//! An object declares, once per type, an ordered table of the capability
//! views it can hand out. Callers ask for a view by identifier and get back a
//! [`ComPtr`] that keeps the object alive; the object is destroyed exactly
//! once, when the last reference goes away.
//!
//! Objects keep a weak reference to themselves ([`SelfRef`]) so that a
//! request made through any view can produce a new owning reference to the
//! same allocation. Counts are not atomic: the runtime assumes the host's
//! single UI thread.

use std::any::Any;
use std::fmt;
use std::ops::Deref;
use std::rc::{Rc, Weak};

use crate::error::ImeError;
use crate::guid::{Guid, IID_UNKNOWN};

/// A capability view that can be requested by identifier.
///
/// Implemented for `dyn Trait` types, e.g. `impl Interface for dyn TextEditSink`.
pub trait Interface {
    const IID: Guid;
}

/// The base capability every object supports.
pub trait Unknown: 'static {
    /// Looks up the view named by `iid` and writes it into `out`, which must
    /// be an `Option<ComPtr<I>>` for the interface `I` that `iid` names.
    ///
    /// On success the object gains one reference (held by the value written
    /// to `out`). On failure the count is unchanged.
    fn query_interface(&self, iid: &Guid, out: &mut dyn Any) -> Result<(), ImeError>;

    /// Number of live owning references.
    fn ref_count(&self) -> usize;

    /// Address of the underlying object, equal for every view of it.
    fn identity(&self) -> *const ();
}

impl Interface for dyn Unknown {
    const IID: Guid = IID_UNKNOWN;
}

/// A concrete object type with a capability table.
pub trait ComObject: Sized + 'static {
    /// Supported views in lookup order. The first entry whose identifier
    /// matches wins; [`IID_UNKNOWN`] is always supported and need not appear.
    const INTERFACES: &'static [InterfaceEntry<Self>];

    /// The object's weak reference to itself, as handed to [`ComPtr::make`].
    fn self_ref(&self) -> &SelfRef<Self>;
}

/// One row of a capability table.
pub struct InterfaceEntry<T> {
    iid: Guid,
    cast: fn(Rc<T>, &mut dyn Any) -> bool,
}

impl<T> InterfaceEntry<T> {
    /// Maps `iid` to a view. `cast` must coerce the object into the view type
    /// and hand it to [`deliver`]; [`interface_entry!`](crate::interface_entry)
    /// writes that closure.
    pub const fn new(iid: Guid, cast: fn(Rc<T>, &mut dyn Any) -> bool) -> Self {
        Self { iid, cast }
    }

    pub fn iid(&self) -> &Guid {
        &self.iid
    }
}

/// Stores `view` into `out` when `out` is an `Option<ComPtr<I>>`.
pub fn deliver<I: ?Sized + 'static>(view: Rc<I>, out: &mut dyn Any) -> bool {
    match out.downcast_mut::<Option<ComPtr<I>>>() {
        Some(slot) => {
            *slot = Some(ComPtr(view));
            true
        }
        None => false,
    }
}

/// Builds an [`InterfaceEntry`] for a `dyn Trait` view of a type.
///
/// ```ignore
/// impl ComObject for Counter {
///     const INTERFACES: &'static [InterfaceEntry<Self>] = &[
///         interface_entry!(Self => dyn Tick),
///         interface_entry!(Self => dyn Tick, IID_TICK_EX),
///     ];
///     fn self_ref(&self) -> &SelfRef<Self> { &self.this }
/// }
/// ```
///
/// The second form maps an extra identifier onto the same view.
#[macro_export]
macro_rules! interface_entry {
    ($ty:ty => $iface:ty) => {
        $crate::com::InterfaceEntry::<$ty>::new(
            <$iface as $crate::com::Interface>::IID,
            |this, out| $crate::com::deliver::<$iface>(this, out),
        )
    };
    ($ty:ty => $iface:ty, $iid:expr) => {
        $crate::com::InterfaceEntry::<$ty>::new($iid, |this, out| {
            $crate::com::deliver::<$iface>(this, out)
        })
    };
}

impl<T: ComObject> Unknown for T {
    fn query_interface(&self, iid: &Guid, out: &mut dyn Any) -> Result<(), ImeError> {
        // Fails only while the object is being torn down.
        let this = self
            .self_ref()
            .0
            .upgrade()
            .ok_or(ImeError::NoSuchCapability(*iid))?;

        let found = if *iid == IID_UNKNOWN {
            deliver::<dyn Unknown>(this, out)
        } else {
            match T::INTERFACES.iter().find(|entry| entry.iid == *iid) {
                Some(entry) => (entry.cast)(this, out),
                None => false,
            }
        };

        if found {
            Ok(())
        } else {
            Err(ImeError::NoSuchCapability(*iid))
        }
    }

    fn ref_count(&self) -> usize {
        self.self_ref().0.strong_count()
    }

    fn identity(&self) -> *const () {
        self as *const T as *const ()
    }
}

/// An object's weak link to its own allocation.
pub struct SelfRef<T>(Weak<T>);

impl<T: ComObject> SelfRef<T> {
    /// A new owning reference, or `None` once the object is being dropped.
    pub fn upgrade(&self) -> Option<ComPtr<T>> {
        self.0.upgrade().map(ComPtr)
    }

    pub fn downgrade(&self) -> WeakPtr<T> {
        WeakPtr(self.0.clone())
    }
}

impl<T> fmt::Debug for SelfRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelfRef")
            .field("strong", &self.0.strong_count())
            .finish()
    }
}

/// An owning reference to a capability view.
///
/// Cloning retains, dropping releases. Two references to different views of
/// one object share a single count.
pub struct ComPtr<I: ?Sized>(Rc<I>);

impl<T: ComObject> ComPtr<T> {
    /// Creates an object and takes over its initial reference.
    pub fn make(build: impl FnOnce(SelfRef<T>) -> T) -> Self {
        ComPtr(Rc::new_cyclic(|weak| build(SelfRef(weak.clone()))))
    }

    /// A new reference to an object the caller can only borrow.
    pub fn from_object(object: &T) -> Option<Self> {
        object.self_ref().upgrade()
    }
}

impl<I: ?Sized + Unknown> ComPtr<I> {
    /// Requests another view of the same object.
    pub fn query<J: ?Sized + Interface + 'static>(&self) -> Option<ComPtr<J>> {
        query_from(&*self.0)
    }

    /// Like [`query`](Self::query) but reports a miss as `NoSuchCapability`.
    pub fn acquire<J: ?Sized + Interface + 'static>(&self) -> Result<ComPtr<J>, ImeError> {
        acquire_from(&*self.0)
    }

    /// Views the object through its base capability.
    pub fn unknown(&self) -> ComPtr<dyn Unknown> {
        // IID_UNKNOWN always resolves while a reference is live.
        match self.query::<dyn Unknown>() {
            Some(unknown) => unknown,
            None => unreachable!("base capability lookup failed on a live object"),
        }
    }

    pub fn ref_count(&self) -> usize {
        Rc::strong_count(&self.0)
    }

    /// Gives up this reference and returns the count left behind.
    pub fn release(self) -> usize {
        let remaining = Rc::strong_count(&self.0) - 1;
        drop(self);
        remaining
    }

    /// Whether both references point at the same object, whatever the views.
    pub fn same_object<J: ?Sized + Unknown>(&self, other: &ComPtr<J>) -> bool {
        self.0.identity() == other.0.identity()
    }

    /// Points this reference at `other`'s object. The new object is retained
    /// before the old one is released, so self-assignment is harmless.
    pub fn assign(&mut self, other: &ComPtr<I>) {
        let retained = other.clone();
        *self = retained;
    }

    pub fn downgrade(&self) -> WeakPtr<I> {
        WeakPtr(Rc::downgrade(&self.0))
    }
}

/// Queries any object, through whichever view the caller holds.
pub fn query_from<U, J>(unknown: &U) -> Option<ComPtr<J>>
where
    U: ?Sized + Unknown,
    J: ?Sized + Interface + 'static,
{
    acquire_from(unknown).ok()
}

/// Fallible form of [`query_from`].
pub fn acquire_from<U, J>(unknown: &U) -> Result<ComPtr<J>, ImeError>
where
    U: ?Sized + Unknown,
    J: ?Sized + Interface + 'static,
{
    let mut slot: Option<ComPtr<J>> = None;
    unknown.query_interface(&J::IID, &mut slot)?;
    slot.ok_or(ImeError::NoSuchCapability(J::IID))
}

impl<I: ?Sized> Clone for ComPtr<I> {
    fn clone(&self) -> Self {
        ComPtr(Rc::clone(&self.0))
    }
}

impl<I: ?Sized> Deref for ComPtr<I> {
    type Target = I;

    fn deref(&self) -> &I {
        &self.0
    }
}

impl<I: ?Sized + Unknown> fmt::Debug for ComPtr<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComPtr")
            .field("object", &self.0.identity())
            .field("refs", &Rc::strong_count(&self.0))
            .finish()
    }
}

/// A non-owning reference. Does not keep the object alive.
pub struct WeakPtr<I: ?Sized>(Weak<I>);

impl<I: ?Sized> WeakPtr<I> {
    pub fn upgrade(&self) -> Option<ComPtr<I>> {
        self.0.upgrade().map(ComPtr)
    }

    pub fn is_alive(&self) -> bool {
        self.0.strong_count() > 0
    }
}

impl<I: ?Sized> Clone for WeakPtr<I> {
    fn clone(&self) -> Self {
        WeakPtr(self.0.clone())
    }
}

impl<I: ?Sized> fmt::Debug for WeakPtr<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakPtr")
            .field("alive", &self.is_alive())
            .finish()
    }
}
