//! Display attributes for composition text.
//!
//! The host decorates composition text (underline, colours) by looking up
//! the atom stored in the range's attribute property. This module holds the
//! attribute descriptions the service publishes and the enumerator the host
//! walks them with. What the colours mean on screen is up to the host.

use std::cell::{Cell, RefCell};

use serde::{Deserialize, Serialize};
use uuid::uuid;

use crate::com::{ComObject, ComPtr, Interface, InterfaceEntry, SelfRef, Unknown};
use crate::error::{HostError, HostResult};
use crate::guid::Guid;

/// A colour slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AttrColor {
    /// Host default.
    #[default]
    None,
    /// 0xBBGGRR.
    Rgb(u32),
    /// Index into the host's system palette.
    System(i32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LineStyle {
    #[default]
    None,
    Solid,
    Dot,
    Dash,
    Squiggle,
}

/// What stage of conversion the decorated text is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AttrKind {
    #[default]
    Input,
    TargetConverted,
    Converted,
    TargetNotConverted,
    InputError,
    FixedConverted,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DisplayAttribute {
    pub text_color: AttrColor,
    pub background_color: AttrColor,
    pub line_color: AttrColor,
    pub line_style: LineStyle,
    pub bold_line: bool,
    pub kind: AttrKind,
}

/// One published attribute, as the host sees it.
pub trait AttributeInfo: Unknown {
    fn guid(&self) -> Guid;
    fn description(&self) -> String;
    fn attribute(&self) -> DisplayAttribute;
    fn set_attribute(&self, attribute: &DisplayAttribute) -> HostResult<()>;
    /// Restores the attribute the service was built with.
    fn reset(&self) -> HostResult<()>;
}

impl Interface for dyn AttributeInfo {
    const IID: Guid = uuid!("70528852-2f26-4aea-8c96-215150578932");
}

/// Walks the published attributes.
pub trait EnumDisplayAttributeInfo: Unknown {
    /// Up to `count` entries; fewer means the end was reached.
    fn next(&self, count: usize) -> Vec<ComPtr<dyn AttributeInfo>>;
    /// Skips `count` entries. `false` if fewer than `count` were left.
    fn skip(&self, count: usize) -> bool;
    fn reset(&self);
    /// An enumerator over the same entries at the same position.
    fn clone_enum(&self) -> HostResult<ComPtr<dyn EnumDisplayAttributeInfo>>;
}

impl Interface for dyn EnumDisplayAttributeInfo {
    const IID: Guid = uuid!("7cef04d7-cb75-4e80-a7ab-5f5bc7d332de");
}

/// Exposed by a text service that publishes display attributes.
pub trait DisplayAttributeProvider: Unknown {
    fn enum_display_attribute_info(&self) -> HostResult<ComPtr<dyn EnumDisplayAttributeInfo>>;
    /// [`HostError::InvalidArg`] when `guid` is not published.
    fn display_attribute_info(&self, guid: &Guid) -> HostResult<ComPtr<dyn AttributeInfo>>;
}

impl Interface for dyn DisplayAttributeProvider {
    const IID: Guid = uuid!("fee47777-163c-4769-996a-6e9c50ad8f54");
}

/// A published display attribute.
pub struct DisplayAttributeInfo {
    this: SelfRef<DisplayAttributeInfo>,
    guid: Guid,
    description: String,
    /// Host atom, 0 until registered.
    atom: Cell<u32>,
    initial: DisplayAttribute,
    current: Cell<DisplayAttribute>,
}

impl DisplayAttributeInfo {
    pub fn new(
        guid: Guid,
        description: impl Into<String>,
        attribute: DisplayAttribute,
    ) -> ComPtr<Self> {
        let description = description.into();
        ComPtr::make(|this| Self {
            this,
            guid,
            description,
            atom: Cell::new(0),
            initial: attribute,
            current: Cell::new(attribute),
        })
    }

    pub fn atom(&self) -> u32 {
        self.atom.get()
    }

    pub fn set_atom(&self, atom: u32) {
        self.atom.set(atom);
    }
}

impl AttributeInfo for DisplayAttributeInfo {
    fn guid(&self) -> Guid {
        self.guid
    }

    fn description(&self) -> String {
        self.description.clone()
    }

    fn attribute(&self) -> DisplayAttribute {
        self.current.get()
    }

    fn set_attribute(&self, attribute: &DisplayAttribute) -> HostResult<()> {
        self.current.set(*attribute);
        Ok(())
    }

    fn reset(&self) -> HostResult<()> {
        self.current.set(self.initial);
        Ok(())
    }
}

impl ComObject for DisplayAttributeInfo {
    const INTERFACES: &'static [InterfaceEntry<Self>] =
        &[crate::interface_entry!(Self => dyn AttributeInfo)];

    fn self_ref(&self) -> &SelfRef<Self> {
        &self.this
    }
}

/// Finds the published attribute for `guid`.
pub fn find_attribute_info(
    infos: &[ComPtr<DisplayAttributeInfo>],
    guid: &Guid,
) -> HostResult<ComPtr<dyn AttributeInfo>> {
    infos
        .iter()
        .find(|info| info.guid == *guid)
        .and_then(|info| info.query::<dyn AttributeInfo>())
        .ok_or(HostError::InvalidArg)
}

/// Enumerator over a snapshot of published attributes.
pub struct DisplayAttributeEnum {
    this: SelfRef<DisplayAttributeEnum>,
    infos: Vec<ComPtr<DisplayAttributeInfo>>,
    position: Cell<usize>,
}

impl DisplayAttributeEnum {
    pub fn new(infos: Vec<ComPtr<DisplayAttributeInfo>>) -> ComPtr<Self> {
        Self::at(infos, 0)
    }

    fn at(infos: Vec<ComPtr<DisplayAttributeInfo>>, position: usize) -> ComPtr<Self> {
        ComPtr::make(|this| Self {
            this,
            infos,
            position: Cell::new(position),
        })
    }
}

impl EnumDisplayAttributeInfo for DisplayAttributeEnum {
    fn next(&self, count: usize) -> Vec<ComPtr<dyn AttributeInfo>> {
        let start = self.position.get().min(self.infos.len());
        let end = start.saturating_add(count).min(self.infos.len());
        self.position.set(end);
        self.infos[start..end]
            .iter()
            .filter_map(|info| info.query::<dyn AttributeInfo>())
            .collect()
    }

    fn skip(&self, count: usize) -> bool {
        let left = self.infos.len().saturating_sub(self.position.get());
        let skipped = count.min(left);
        self.position.set(self.position.get() + skipped);
        skipped == count
    }

    fn reset(&self) {
        self.position.set(0);
    }

    fn clone_enum(&self) -> HostResult<ComPtr<dyn EnumDisplayAttributeInfo>> {
        Self::at(self.infos.clone(), self.position.get())
            .query::<dyn EnumDisplayAttributeInfo>()
            .ok_or(HostError::NotImplemented)
    }
}

impl ComObject for DisplayAttributeEnum {
    const INTERFACES: &'static [InterfaceEntry<Self>] =
        &[crate::interface_entry!(Self => dyn EnumDisplayAttributeInfo)];

    fn self_ref(&self) -> &SelfRef<Self> {
        &self.this
    }
}

/// Attributes a service publishes, with their registration state.
#[derive(Default)]
pub struct DisplayAttributeTable {
    infos: RefCell<Vec<ComPtr<DisplayAttributeInfo>>>,
}

impl DisplayAttributeTable {
    pub fn push(&self, info: ComPtr<DisplayAttributeInfo>) {
        self.infos.borrow_mut().push(info);
    }

    pub fn snapshot(&self) -> Vec<ComPtr<DisplayAttributeInfo>> {
        self.infos.borrow().clone()
    }

    pub fn get(&self, guid: &Guid) -> Option<ComPtr<DisplayAttributeInfo>> {
        self.infos.borrow().iter().find(|info| info.guid == *guid).cloned()
    }
}
