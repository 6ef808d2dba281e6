//! Language-bar buttons.
//!
//! A button is a small object the service hands to the host's language bar.
//! Only the state the host queries is modelled (text, tooltip, status, click
//! routing); icons and menus are drawn by the host.

use std::cell::{Cell, RefCell};

use bitflags::bitflags;
use tracing::trace;
use uuid::uuid;

use crate::com::{ComObject, ComPtr, Interface, InterfaceEntry, SelfRef, Unknown, WeakPtr};
use crate::error::{HostError, HostResult};
use crate::guid::Guid;
use crate::host::Source;
use crate::subscription::{next_cookie, Cookie};
use crate::text_service::TextService;

bitflags! {
    /// Button status bits reported to the host.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ItemStatus: u32 {
        const DISABLED = 0x0000_0001;
        const HIDDEN = 0x0000_0002;
        const TOGGLED = 0x0001_0000;
    }
}

bitflags! {
    /// Which parts of a button changed.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct UpdateFlags: u32 {
        const ICON = 0x1;
        const TEXT = 0x2;
        const TOOLTIP = 0x4;
        const STATUS = 0x10000;
        const ALL = Self::ICON.bits()
            | Self::TEXT.bits()
            | Self::TOOLTIP.bits()
            | Self::STATUS.bits();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ButtonStyle {
    #[default]
    Button,
    Menu,
    Toggle,
}

/// Mouse button that clicked an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickKind {
    Left,
    Right,
}

/// How a command reached the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandType {
    LeftClick,
    RightClick,
    Menu,
}

/// Static description of an item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LangBarItemInfo {
    pub clsid: Guid,
    pub guid: Guid,
    pub style: ButtonStyle,
    pub description: String,
}

/// A button as the host's language bar sees it.
pub trait LangBarItemButton: Unknown {
    fn info(&self) -> LangBarItemInfo;
    fn status(&self) -> ItemStatus;
    fn show(&self, show: bool) -> HostResult<()>;
    fn tooltip(&self) -> String;
    fn text(&self) -> String;
    fn on_click(&self, click: ClickKind) -> HostResult<()>;
    /// A menu entry added by the service was picked.
    fn on_menu_select(&self, id: u32) -> HostResult<()>;
}

impl Interface for dyn LangBarItemButton {
    const IID: Guid = uuid!("28c7f1d0-de25-11d2-afdd-00105a2799b5");
}

/// Host-side listener told when a button changes.
pub trait LangBarItemSink: Unknown {
    fn on_update(&self, flags: UpdateFlags) -> HostResult<()>;
}

impl Interface for dyn LangBarItemSink {
    const IID: Guid = uuid!("57dbe1a0-de25-11d2-afdd-00105a2799b5");
}

/// Language-bar display changes, exposed by the service.
pub trait LangBarEventSink: Unknown {
    fn show_floating(&self, flags: u32) -> HostResult<()>;
}

impl Interface for dyn LangBarEventSink {
    const IID: Guid = uuid!("18a4e900-e0ae-11d2-afdd-00105a2799b5");
}

/// A button published by a text service.
pub struct LangBarButton {
    this: SelfRef<LangBarButton>,
    service: WeakPtr<TextService>,
    clsid: Guid,
    guid: Guid,
    style: Cell<ButtonStyle>,
    command_id: Cell<u32>,
    text: RefCell<String>,
    tooltip: RefCell<String>,
    status: Cell<ItemStatus>,
    sinks: RefCell<Vec<(Cookie, ComPtr<dyn LangBarItemSink>)>>,
}

impl LangBarButton {
    /// A button that routes clicks to `service` as command `command_id`.
    pub fn new(
        service: &TextService,
        guid: Guid,
        command_id: u32,
        style: ButtonStyle,
    ) -> ComPtr<Self> {
        let weak = service.self_ref().downgrade();
        let clsid = service.clsid();
        ComPtr::make(|this| Self {
            this,
            service: weak,
            clsid,
            guid,
            style: Cell::new(style),
            command_id: Cell::new(command_id),
            text: RefCell::new(String::new()),
            tooltip: RefCell::new(String::new()),
            status: Cell::new(ItemStatus::empty()),
            sinks: RefCell::new(Vec::new()),
        })
    }

    pub fn guid(&self) -> Guid {
        self.guid
    }

    pub fn command_id(&self) -> u32 {
        self.command_id.get()
    }

    pub fn set_command_id(&self, id: u32) {
        self.command_id.set(id);
    }

    pub fn style(&self) -> ButtonStyle {
        self.style.get()
    }

    pub fn set_style(&self, style: ButtonStyle) {
        self.style.set(style);
    }

    pub fn set_text(&self, text: impl Into<String>) {
        *self.text.borrow_mut() = text.into();
        self.update(UpdateFlags::TEXT);
    }

    pub fn set_tooltip(&self, tooltip: impl Into<String>) {
        *self.tooltip.borrow_mut() = tooltip.into();
        self.update(UpdateFlags::TOOLTIP);
    }

    pub fn is_enabled(&self) -> bool {
        !self.status.get().contains(ItemStatus::DISABLED)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.set_status_bit(ItemStatus::DISABLED, !enabled);
    }

    pub fn is_toggled(&self) -> bool {
        self.status.get().contains(ItemStatus::TOGGLED)
    }

    pub fn set_toggled(&self, toggled: bool) {
        self.set_status_bit(ItemStatus::TOGGLED, toggled);
    }

    fn set_status_bit(&self, bit: ItemStatus, on: bool) {
        let mut status = self.status.get();
        if status.contains(bit) == on {
            return;
        }
        status.set(bit, on);
        self.status.set(status);
        self.update(UpdateFlags::STATUS);
    }

    /// Tells every advised sink that `flags` changed.
    pub fn update(&self, flags: UpdateFlags) {
        let sinks: Vec<_> = self.sinks.borrow().iter().map(|(_, sink)| sink.clone()).collect();
        for sink in sinks {
            if let Err(err) = sink.on_update(flags) {
                trace!(error = %err, "language bar sink rejected update");
            }
        }
    }

    fn dispatch(&self, command: CommandType, id: u32) -> HostResult<()> {
        match self.service.upgrade() {
            Some(service) => {
                service.dispatch_command(id, command);
                Ok(())
            }
            None => Err(HostError::Failed("text service is gone".to_string())),
        }
    }
}

impl LangBarItemButton for LangBarButton {
    fn info(&self) -> LangBarItemInfo {
        LangBarItemInfo {
            clsid: self.clsid,
            guid: self.guid,
            style: self.style.get(),
            description: self.tooltip.borrow().clone(),
        }
    }

    fn status(&self) -> ItemStatus {
        self.status.get()
    }

    fn show(&self, show: bool) -> HostResult<()> {
        self.set_status_bit(ItemStatus::HIDDEN, !show);
        Ok(())
    }

    fn tooltip(&self) -> String {
        self.tooltip.borrow().clone()
    }

    fn text(&self) -> String {
        self.text.borrow().clone()
    }

    fn on_click(&self, click: ClickKind) -> HostResult<()> {
        let command = match click {
            ClickKind::Left => CommandType::LeftClick,
            ClickKind::Right => CommandType::RightClick,
        };
        self.dispatch(command, self.command_id.get())
    }

    fn on_menu_select(&self, id: u32) -> HostResult<()> {
        self.dispatch(CommandType::Menu, id)
    }
}

impl Source for LangBarButton {
    fn advise_sink(&self, iid: &Guid, sink: ComPtr<dyn Unknown>) -> HostResult<Cookie> {
        if *iid != <dyn LangBarItemSink as Interface>::IID {
            return Err(HostError::InvalidArg);
        }
        let sink = sink
            .query::<dyn LangBarItemSink>()
            .ok_or(HostError::InvalidArg)?;
        let cookie = next_cookie();
        self.sinks.borrow_mut().push((cookie, sink));
        Ok(cookie)
    }

    fn unadvise_sink(&self, cookie: Cookie) -> HostResult<()> {
        let mut sinks = self.sinks.borrow_mut();
        let position = sinks
            .iter()
            .position(|(c, _)| *c == cookie)
            .ok_or(HostError::InvalidArg)?;
        sinks.remove(position);
        Ok(())
    }
}

impl ComObject for LangBarButton {
    const INTERFACES: &'static [InterfaceEntry<Self>] = &[
        crate::interface_entry!(Self => dyn LangBarItemButton),
        crate::interface_entry!(Self => dyn Source),
    ];

    fn self_ref(&self) -> &SelfRef<Self> {
        &self.this
    }
}
