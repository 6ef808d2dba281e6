//! Drives the demo input method on the in-memory host.
//!
//! A [`Demo`] owns a simulated thread manager with one or more documents and
//! the activated demo service. Input is given as [`Command`]s, which the CLI
//! parses from lines such as `hello{enter}` or `:caret 0`.

use std::rc::Rc;

use anyhow::{anyhow, bail, Context};
use libime_core::key_event::vk;
use libime_core::langbar::{ClickKind, LangBarItemButton};
use libime_core::sim::{SimContext, SimThreadMgr};
use libime_core::{ComPtr, KeyEvent, TextInputProcessor, TextService};
use serde::Serialize;
use tracing::debug;

use crate::config::DemoConfig;
use crate::ime::{create_service, DemoState, CLSID, GUID_TOGGLE_BUTTON, PROFILE};

/// One line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Keys to press, in order.
    Keys(Vec<KeyEvent>),
    /// Open a new document with this text and focus it.
    Focus(String),
    /// Focus an existing document by index.
    Switch(usize),
    /// The host ends the composition on its own.
    Terminate,
    /// Put the caret at a character offset of the focused document.
    Caret(usize),
    /// Click the mode button.
    Click,
    /// Open or close the keyboard from the host side.
    Keyboard(bool),
    State,
    Quit,
}

impl Command {
    /// Parses a REPL line.
    ///
    /// Lines starting with `:` are commands; anything else is typed. Inside
    /// typed text, `{name}` presses a named key: `enter`, `esc`, `bs`, `del`,
    /// `left`, `right`, `home`, `end`, `space` and `toggle` (Shift+Space).
    pub fn parse(line: &str) -> anyhow::Result<Self> {
        let Some(rest) = line.strip_prefix(':') else {
            return Ok(Self::Keys(parse_keys(line)?));
        };
        let rest = rest.trim_start();
        let mut words = rest.split_whitespace();
        let name = words.next().unwrap_or_default();
        let arg = words.next();
        let command = match name {
            "focus" => Self::Focus(rest["focus".len()..].trim_start().to_string()),
            "switch" => Self::Switch(number(arg, "switch")?),
            "terminate" => Self::Terminate,
            "caret" => Self::Caret(number(arg, "caret")?),
            "click" => Self::Click,
            "keyboard" => match arg {
                Some("on") => Self::Keyboard(true),
                Some("off") => Self::Keyboard(false),
                _ => bail!("usage: :keyboard on|off"),
            },
            "state" => Self::State,
            "quit" | "q" => Self::Quit,
            other => bail!("unknown command :{other}"),
        };
        Ok(command)
    }
}

fn number(arg: Option<&str>, command: &str) -> anyhow::Result<usize> {
    let arg = arg.ok_or_else(|| anyhow!("usage: :{command} N"))?;
    arg.parse()
        .with_context(|| format!(":{command} expects a number, got {arg:?}"))
}

/// Turns typed text into key presses.
pub fn parse_keys(text: &str) -> anyhow::Result<Vec<KeyEvent>> {
    let mut keys = Vec::new();
    let mut chars = text.chars();
    while let Some(ch) = chars.next() {
        if ch != '{' {
            keys.push(KeyEvent::from_char(ch));
            continue;
        }
        let name: String = chars.by_ref().take_while(|ch| *ch != '}').collect();
        let key = match name.as_str() {
            "enter" => KeyEvent::down(vk::RETURN),
            "esc" => KeyEvent::down(vk::ESCAPE),
            "bs" => KeyEvent::down(vk::BACK),
            "del" => KeyEvent::down(vk::DELETE),
            "left" => KeyEvent::down(vk::LEFT),
            "right" => KeyEvent::down(vk::RIGHT),
            "home" => KeyEvent::down(vk::HOME),
            "end" => KeyEvent::down(vk::END),
            "space" => KeyEvent::from_char(' '),
            "toggle" => KeyEvent::from_char(' ').with_key_held(vk::SHIFT),
            other => bail!("unknown key {{{other}}}"),
        };
        keys.push(key);
    }
    Ok(keys)
}

/// What `:state` reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    pub enabled: bool,
    pub composing: bool,
    pub keyboard_open: bool,
    pub preedit: String,
    pub cursor: usize,
    pub focused: Option<usize>,
    pub document: String,
    pub selection: (usize, usize),
    pub composition: Option<(usize, usize)>,
    pub button: Option<String>,
    pub committed: Vec<String>,
}

/// The host, its documents and the activated demo service.
pub struct Demo {
    host: ComPtr<SimThreadMgr>,
    documents: Vec<ComPtr<SimContext>>,
    service: ComPtr<TextService>,
    state: Rc<DemoState>,
}

impl Demo {
    /// Activates the demo service on a host with one focused document.
    pub fn new(config: &DemoConfig, text: &str) -> anyhow::Result<Self> {
        let host = SimThreadMgr::new();
        let document = host.create_context(text);
        host.set_focus(Some(&document));

        let (service, state) = create_service(config);
        service
            .activate(host.as_thread_mgr(), host.new_client_id())
            .context("activating the demo service")?;
        host.notify_profile(&CLSID, &PROFILE, true);

        Ok(Self {
            host,
            documents: vec![document],
            service,
            state,
        })
    }

    pub fn host(&self) -> &ComPtr<SimThreadMgr> {
        &self.host
    }

    pub fn service(&self) -> &ComPtr<TextService> {
        &self.service
    }

    pub fn state(&self) -> &DemoState {
        &self.state
    }

    pub fn document(&self, index: usize) -> Option<&ComPtr<SimContext>> {
        self.documents.get(index)
    }

    fn focused(&self) -> anyhow::Result<ComPtr<SimContext>> {
        self.host.focused().ok_or_else(|| anyhow!("no document has focus"))
    }

    fn focused_index(&self) -> Option<usize> {
        let focused = self.host.focused()?;
        self.documents
            .iter()
            .position(|document| document.same_object(&focused))
    }

    /// Presses each key; returns how many the service ate.
    pub fn press(&self, keys: &[KeyEvent]) -> usize {
        keys.iter().filter(|key| self.host.key_down(key)).count()
    }

    /// Runs one command. Returns text to show the user, if any.
    pub fn execute(&mut self, command: Command) -> anyhow::Result<Option<String>> {
        debug!(?command, "executing");
        match command {
            Command::Keys(keys) => {
                self.press(&keys);
            }
            Command::Focus(text) => {
                let document = self.host.create_context(&text);
                self.host.set_focus(Some(&document));
                self.documents.push(document);
                return Ok(Some(format!("document {}", self.documents.len() - 1)));
            }
            Command::Switch(index) => {
                let document = self
                    .documents
                    .get(index)
                    .cloned()
                    .ok_or_else(|| anyhow!("no document {index}"))?;
                self.host.set_focus(Some(&document));
            }
            Command::Terminate => {
                if !self.focused()?.terminate_composition() {
                    return Ok(Some("nothing to terminate".to_string()));
                }
            }
            Command::Caret(pos) => {
                let document = self.focused()?;
                let len = document.text().chars().count();
                if pos > len {
                    bail!("caret {pos} is past the end ({len})");
                }
                document.move_caret(pos, pos);
            }
            Command::Click => {
                self.host
                    .click_item(&GUID_TOGGLE_BUTTON, ClickKind::Left)
                    .context("clicking the mode button")?;
            }
            Command::Keyboard(open) => self.host.set_keyboard_open(open),
            Command::State => {
                let json = serde_json::to_string_pretty(&self.snapshot())?;
                return Ok(Some(json));
            }
            Command::Quit => {}
        }
        Ok(None)
    }

    pub fn snapshot(&self) -> Snapshot {
        let focused = self.host.focused();
        let button = self
            .host
            .lang_bar_items()
            .into_iter()
            .find(|item| item.info().guid == GUID_TOGGLE_BUTTON)
            .map(|item| item.text());
        Snapshot {
            enabled: self.state.is_enabled(),
            composing: self.service.is_composing(),
            keyboard_open: self.service.is_keyboard_opened(),
            preedit: self.state.preedit(),
            cursor: self.state.cursor(),
            focused: self.focused_index(),
            document: focused.as_ref().map(|doc| doc.text()).unwrap_or_default(),
            selection: focused.as_ref().map_or((0, 0), |doc| doc.selection_span()),
            composition: focused.as_ref().and_then(|doc| doc.composition_span()),
            button,
            committed: self.state.committed(),
        }
    }

    /// Deactivates the service, ending any composition.
    pub fn shutdown(self) -> anyhow::Result<()> {
        self.host.notify_profile(&CLSID, &PROFILE, false);
        self.service.deactivate().context("deactivating the demo service")?;
        Ok(())
    }
}
