//! Identifiers for capabilities, compartments and properties.
//!
//! Every capability view an object can expose is named by a GUID. The
//! well-known keys below are the ones the engine itself reads or writes;
//! interface identifiers live next to the trait they name.

use uuid::{uuid, Uuid};

/// A 128-bit identifier.
pub type Guid = Uuid;

/// The all-zero identifier.
pub const GUID_NULL: Guid = Uuid::nil();

/// Base-object capability supported by every object.
pub const IID_UNKNOWN: Guid = uuid!("00000000-0000-0000-c000-000000000046");

/// Thread compartment holding the keyboard open (non-zero) / closed (zero) flag.
pub const GUID_COMPARTMENT_KEYBOARD_OPENCLOSE: Guid = uuid!("58273aad-01bb-4164-95c6-755ba0b5162d");

/// Context compartment set by the host when keyboard input is disabled.
pub const GUID_COMPARTMENT_KEYBOARD_DISABLED: Guid = uuid!("71a5b253-1951-466b-9fbc-9c8808fa84f2");

/// Context compartment set by the host for contexts that accept no text.
pub const GUID_COMPARTMENT_EMPTYCONTEXT: Guid = uuid!("d7487dbf-804e-41c5-894d-ad96fd4eea13");

/// Range property carrying display-attribute atoms.
pub const GUID_PROP_ATTRIBUTE: Guid = uuid!("34b45670-7526-11d2-a147-00105a2799b5");
