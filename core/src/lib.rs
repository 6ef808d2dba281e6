//! libime-core
//!
//! The runtime and engine shared by libime input methods: a reference-counted
//! capability object model, scoped event subscriptions, host-granted edit
//! sessions and the composition state machine of a text service.
//!
//! The host (the platform's text framework) owns documents, carets and
//! rendering. An input method implements [`TextServiceHandler`], wraps it in a
//! [`TextService`] and hands the service to the host, which activates it and
//! drives it through the capabilities in [`sink`]. Everything the service needs
//! back from the host is expressed by the traits in [`host`]; [`sim`] provides
//! an in-memory implementation of them.
//!
//! Public API:
//! - `ComPtr` / `ComObject` - capability objects and owning references
//! - `Subscription` - a sink registration scoped to a value
//! - `EditSession` - an edit grant, only valid inside the host's callback
//! - `TextService` - the engine object the host activates
//! - `TextServiceHandler` - input-method behaviour injected into the engine
//! - `Config` - engine options

// Object runtime
pub mod com;
pub use com::{ComObject, ComPtr, Interface, InterfaceEntry, SelfRef, Unknown, WeakPtr};

pub mod guid;
pub use guid::Guid;

pub mod error;
pub use error::{HostError, HostResult, ImeError, Result};

pub mod subscription;
pub use subscription::{Cookie, Subscription};

// Host protocol
pub mod host;
pub use host::{ActivateFlags, ClientId, DocumentContext, Modifiers, Rect, ThreadMgr};

pub mod sink;
pub use sink::TextInputProcessor;

pub mod session;
pub use session::{request_session, EditCookie, EditSession};

pub mod key_event;
pub use key_event::{Key, KeyEvent, KeyEventKind};

// Engine
pub mod composition;
pub use composition::CompositionState;

pub mod display_attribute;
pub use display_attribute::{DisplayAttribute, DisplayAttributeInfo, LineStyle};

pub mod langbar;
pub use langbar::{ButtonStyle, CommandType, LangBarButton};

pub mod handler;
pub use handler::{NoopHandler, TextServiceHandler};

pub mod text_service;
pub use text_service::TextService;

pub mod config;
pub use config::{Config, DisplayAttributeStyle};

// In-memory host
pub mod sim;
