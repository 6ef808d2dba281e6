// core/tests/service_lifecycle.rs
//! Activation, teardown and the host-facing registrations of a text service:
//! subscriptions, keyboard state, compartments, preserved keys, language-bar
//! buttons, display attributes and profile notifications.

mod common;

use common::{Fixture, CLSID, PROFILE};
use libime_core::config::GUID_INPUT_ATTRIBUTE;
use libime_core::display_attribute::{
    AttributeInfo, DisplayAttributeProvider, EnumDisplayAttributeInfo,
};
use libime_core::guid::{GUID_COMPARTMENT_KEYBOARD_DISABLED, GUID_COMPARTMENT_KEYBOARD_OPENCLOSE};
use libime_core::host::LangBarMgr;
use libime_core::key_event::vk;
use libime_core::langbar::{ClickKind, LangBarItemButton, UpdateFlags};
use libime_core::sim::SimThreadMgr;
use libime_core::sink::{
    ActiveLanguageProfileNotifySink, TextEditSink, ThreadMgrEventSink,
    IID_TEXT_INPUT_PROCESSOR_EX,
};
use libime_core::{
    ActivateFlags, ButtonStyle, ComPtr, Config, DisplayAttribute, DisplayAttributeInfo, Guid,
    HostError, ImeError, Interface, KeyEvent, LangBarButton, Modifiers, NoopHandler,
    TextInputProcessor, TextService, ThreadMgr, Unknown,
};
use uuid::uuid;

const SHIFT_SPACE: Guid = uuid!("1b0c9d8e-7f6a-4b5c-9d3e-2f1a0b9c8d70");
const MODE_BUTTON: Guid = uuid!("1b0c9d8e-7f6a-4b5c-9d3e-2f1a0b9c8d71");
const WATCHED: Guid = uuid!("1b0c9d8e-7f6a-4b5c-9d3e-2f1a0b9c8d72");
const WATCHED_GLOBAL: Guid = uuid!("1b0c9d8e-7f6a-4b5c-9d3e-2f1a0b9c8d73");

fn advised(host: &SimThreadMgr) -> [usize; 3] {
    [
        host.advise_count(&<dyn ThreadMgrEventSink>::IID),
        host.advise_count(&<dyn TextEditSink>::IID),
        host.advise_count(&<dyn ActiveLanguageProfileNotifySink>::IID),
    ]
}

#[test]
fn test_activation_installs_listeners() {
    let fx = Fixture::new("");
    assert!(fx.service.is_activated());
    assert!(!fx.service.client_id().is_null());
    assert_eq!(advised(&fx.host), [1, 1, 1]);
    assert!(fx.host.key_sink_advised());
    let open_close = fx.host.thread_compartment(&GUID_COMPARTMENT_KEYBOARD_OPENCLOSE);
    assert_eq!(open_close.sink_count(), 1);
}

#[test]
fn test_activation_opens_keyboard() {
    let fx = Fixture::new("");
    let open_close = fx.host.thread_compartment(&GUID_COMPARTMENT_KEYBOARD_OPENCLOSE);
    assert_eq!(open_close.current(), Some(1));
    assert!(fx.service.is_keyboard_opened());
    assert_eq!(
        fx.log.events(),
        vec![
            "keyboard opened=true".to_string(),
            format!("compartment {GUID_COMPARTMENT_KEYBOARD_OPENCLOSE}"),
            "activate".to_string(),
        ]
    );
}

#[test]
fn test_keyboard_left_closed_when_not_forced() {
    let config = Config {
        force_keyboard_open: false,
        ..Config::default()
    };
    let fx = Fixture::with_config("", config);
    assert!(!fx.service.is_keyboard_opened());
    assert!(!fx.log.contains("keyboard opened=true"));

    // Keys pass straight through to the document.
    assert_eq!(fx.type_text("ab"), 0);
    assert_eq!(fx.context.text(), "ab");
    assert!(!fx.service.is_composing());
}

#[test]
fn test_keyboard_toggled_by_host() {
    let fx = Fixture::new("");
    fx.host.set_keyboard_open(false);
    assert!(!fx.service.is_keyboard_opened());
    assert!(fx.log.contains("keyboard opened=false"));
    assert_eq!(fx.type_text("a"), 0);

    fx.host.set_keyboard_open(true);
    assert!(fx.service.is_keyboard_opened());
    assert_eq!(fx.type_text("b"), 1);
    assert!(fx.service.is_composing());
}

#[test]
fn test_keyboard_toggled_by_service() {
    let fx = Fixture::new("");
    fx.service.set_keyboard_open(false).expect("close");
    assert!(!fx.service.is_keyboard_opened());
    let open_close = fx.host.thread_compartment(&GUID_COMPARTMENT_KEYBOARD_OPENCLOSE);
    assert_eq!(open_close.current(), Some(0));
    assert_eq!(fx.log.count("keyboard opened=false"), 1);
}

#[test]
fn test_disabled_context_ignores_keys() {
    let fx = Fixture::new("");
    fx.context
        .compartment(&GUID_COMPARTMENT_KEYBOARD_DISABLED)
        .store(1);
    assert!(fx.service.is_keyboard_disabled(None));
    assert_eq!(fx.type_text("a"), 0);
    assert!(!fx.service.is_composing());
}

#[test]
fn test_key_up_runs_in_session() {
    let fx = Fixture::new("");
    assert!(fx.host.key_up(&KeyEvent::up(vk::SHIFT)));
    assert!(fx.log.contains("shift up"));
    assert!(!fx.host.key_up(&KeyEvent::up(vk::SPACE)));
}

#[test]
fn test_deactivation_releases_everything() {
    let fx = Fixture::new("");
    let button = LangBarButton::new(&fx.service, MODE_BUTTON, 7, ButtonStyle::Toggle);
    fx.service.add_button(button);
    fx.service.add_preserved_key(vk::SPACE, Modifiers::SHIFT, SHIFT_SPACE);
    fx.service.add_compartment_monitor(WATCHED, false);
    assert!(fx.service.ref_count() > 1);

    fx.service.deactivate().expect("deactivate");

    assert!(!fx.service.is_activated());
    assert!(fx.service.client_id().is_null());
    assert_eq!(advised(&fx.host), [0, 0, 0]);
    assert!(!fx.host.key_sink_advised());
    assert!(fx.host.preserved_keys().is_empty());
    assert!(fx.host.lang_bar_items().is_empty());
    assert_eq!(fx.host.thread_compartment(&WATCHED).sink_count(), 0);
    assert_eq!(
        fx.host
            .thread_compartment(&GUID_COMPARTMENT_KEYBOARD_OPENCLOSE)
            .sink_count(),
        0
    );
    // Only the fixture's own reference is left.
    assert_eq!(fx.service.ref_count(), 1);
    assert!(fx.log.contains("deactivate composing=false"));
}

#[test]
fn test_reactivation_after_deactivate() {
    let fx = Fixture::new("");
    fx.service.deactivate().expect("deactivate");
    fx.service
        .activate(fx.host.as_thread_mgr(), fx.host.new_client_id())
        .expect("second activation");
    assert_eq!(advised(&fx.host), [1, 1, 1]);
    assert_eq!(fx.type_text("a"), 1);
}

#[test]
fn test_double_activation_is_rejected() {
    let fx = Fixture::new("");
    let result = fx
        .service
        .activate(fx.host.as_thread_mgr(), fx.host.new_client_id());
    assert!(matches!(result, Err(ImeError::InvalidState(_))));
    assert_eq!(advised(&fx.host), [1, 1, 1]);
}

#[test]
fn test_deactivate_when_inactive_is_noop() {
    let fx = Fixture::inactive("", Config::default());
    fx.service.deactivate().expect("noop");
    assert!(fx.log.events().is_empty());
}

#[test]
fn test_activation_flags() {
    let host =
        SimThreadMgr::with_flags(ActivateFlags::IMMERSIVE | ActivateFlags::UI_ELEMENT_ENABLED_ONLY);
    let service = TextService::new(CLSID, NoopHandler);
    service
        .activate(host.as_thread_mgr(), host.new_client_id())
        .expect("activate");
    assert!(service.is_immersive());
    assert!(service.is_ui_less());
    assert!(!service.is_console());
    service.deactivate().expect("deactivate");
    assert_eq!(service.activate_flags(), ActivateFlags::empty());

    service
        .activate_ex(host.as_thread_mgr(), host.new_client_id(), ActivateFlags::CONSOLE)
        .expect("activate_ex");
    assert!(service.is_console());
    assert!(!service.is_immersive());
    service.deactivate().expect("deactivate");
}

#[test]
fn test_service_capability_table() {
    let service = TextService::new(CLSID, NoopHandler);
    assert!(service.query::<dyn TextInputProcessor>().is_some());
    assert!(service.query::<dyn DisplayAttributeProvider>().is_some());
    assert!(service.query::<dyn ThreadMgr>().is_none());

    let mut slot: Option<ComPtr<dyn TextInputProcessor>> = None;
    service
        .query_interface(&IID_TEXT_INPUT_PROCESSOR_EX, &mut slot)
        .expect("extended identifier");
    assert!(slot.expect("processor").same_object(&service));
}

#[test]
fn test_preserved_keys() {
    let fx = Fixture::inactive("", Config::default());
    fx.service.add_preserved_key(vk::SPACE, Modifiers::SHIFT, SHIFT_SPACE);
    assert!(fx.host.preserved_keys().is_empty());

    fx.service
        .activate(fx.host.as_thread_mgr(), fx.host.new_client_id())
        .expect("activate");
    let keys = fx.host.preserved_keys();
    assert_eq!(keys.len(), 1);
    assert_eq!(keys[0].0, SHIFT_SPACE);
    assert_eq!(keys[0].1.modifiers, Modifiers::SHIFT);

    let shift_space = KeyEvent::down(vk::SPACE).with_key_held(vk::SHIFT);
    assert!(fx.host.key_down(&shift_space));
    assert!(fx.log.contains(&format!("preserved {SHIFT_SPACE}")));

    // Without Shift the key is an ordinary space.
    assert!(!fx.press(vk::SPACE));
    assert_eq!(fx.log.count(&format!("preserved {SHIFT_SPACE}")), 1);

    assert!(fx.service.remove_preserved_key(&SHIFT_SPACE));
    assert!(fx.host.preserved_keys().is_empty());
    assert!(!fx.service.remove_preserved_key(&SHIFT_SPACE));
}

#[test]
fn test_language_bar_button() {
    let fx = Fixture::inactive("", Config::default());
    let button = LangBarButton::new(&fx.service, MODE_BUTTON, 7, ButtonStyle::Toggle);
    button.set_text("A");
    fx.service.add_button(button.clone());
    assert!(fx.host.lang_bar_items().is_empty());

    fx.service
        .activate(fx.host.as_thread_mgr(), fx.host.new_client_id())
        .expect("activate");
    let items = fx.host.lang_bar_items();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].text(), "A");
    assert_eq!(items[0].info().clsid, CLSID);

    fx.host.click_item(&MODE_BUTTON, ClickKind::Left).expect("click");
    fx.host.click_item(&MODE_BUTTON, ClickKind::Right).expect("click");
    items[0].on_menu_select(3).expect("menu");
    assert!(fx.log.contains("command 7 LeftClick"));
    assert!(fx.log.contains("command 7 RightClick"));
    assert!(fx.log.contains("command 3 Menu"));

    button.set_toggled(true);
    assert!(items[0].status().contains(libime_core::langbar::ItemStatus::TOGGLED));
    assert_eq!(fx.host.item_updates(), (1, UpdateFlags::STATUS));
    button.set_text("B");
    assert_eq!(fx.host.item_updates(), (2, UpdateFlags::TEXT));

    drop(items);
    assert!(fx.service.remove_button(&button));
    assert!(fx.host.lang_bar_items().is_empty());
    assert!(!fx.service.remove_button(&button));

    // Detached buttons no longer notify the host.
    button.set_text("C");
    assert_eq!(fx.host.item_updates().0, 2);
}

#[test]
fn test_language_bar_status() {
    let fx = Fixture::new("");
    let lang_bar = fx.host.lang_bar();
    assert_eq!(lang_bar.sink_count(), 1);
    assert_eq!(fx.service.lang_bar_status(), 0);

    lang_bar.show_floating(4).expect("show floating");
    assert!(fx.log.contains("lang bar 4"));
    assert_eq!(fx.service.lang_bar_status(), 4);

    fx.service.deactivate().expect("deactivate");
    assert_eq!(lang_bar.sink_count(), 0);
    lang_bar.show_floating(1).expect("show floating");
    assert!(!fx.log.contains("lang bar 1"));
    assert_eq!(fx.service.lang_bar_status(), 0);
}

#[test]
fn test_button_outliving_service() {
    let service = TextService::new(CLSID, NoopHandler);
    let button = LangBarButton::new(&service, MODE_BUTTON, 1, ButtonStyle::Button);
    drop(service);
    assert!(matches!(
        button.on_click(ClickKind::Left),
        Err(HostError::Failed(_))
    ));
}

#[test]
fn test_display_attribute_provider() {
    let fx = Fixture::new("");
    let provider = fx
        .service
        .query::<dyn DisplayAttributeProvider>()
        .expect("provider");

    let walker = provider.enum_display_attribute_info().expect("enumerator");
    let infos = walker.next(10);
    assert_eq!(infos.len(), 1);
    assert_eq!(infos[0].guid(), GUID_INPUT_ATTRIBUTE);

    let info = provider
        .display_attribute_info(&GUID_INPUT_ATTRIBUTE)
        .expect("input attribute");
    assert_eq!(info.description(), "Composition input");
    let unknown = uuid!("00000000-0000-0000-0000-00000000beef");
    assert!(matches!(
        provider.display_attribute_info(&unknown),
        Err(HostError::InvalidArg)
    ));

    let atom = fx.host.atom_of(&GUID_INPUT_ATTRIBUTE).expect("registered");
    let published = fx.service.display_attribute(&GUID_INPUT_ATTRIBUTE).expect("published");
    assert_eq!(published.atom(), atom);
}

#[test]
fn test_display_attribute_added_while_active() {
    let fx = Fixture::new("");
    let extra = uuid!("1b0c9d8e-7f6a-4b5c-9d3e-2f1a0b9c8d74");
    fx.service.add_display_attribute(DisplayAttributeInfo::new(
        extra,
        "Converted",
        DisplayAttribute::default(),
    ));
    let atom = fx.host.atom_of(&extra).expect("registered on add");
    assert_ne!(atom, fx.host.atom_of(&GUID_INPUT_ATTRIBUTE).expect("input"));

    fx.service.deactivate().expect("deactivate");
    let info = fx.service.display_attribute(&extra).expect("still published");
    assert_eq!(info.atom(), 0);
}

#[test]
fn test_compartment_monitors() {
    let fx = Fixture::new("");
    fx.service.add_compartment_monitor(WATCHED, false);
    fx.service.add_compartment_monitor(WATCHED_GLOBAL, true);

    fx.host.thread_compartment(&WATCHED).store(5);
    fx.host.global_compartment(&WATCHED_GLOBAL).store(1);
    assert!(fx.log.contains(&format!("compartment {WATCHED}")));
    assert!(fx.log.contains(&format!("compartment {WATCHED_GLOBAL}")));
    assert_eq!(fx.service.thread_compartment_value(&WATCHED), 5);
    assert_eq!(fx.service.global_compartment_value(&WATCHED_GLOBAL), 1);

    assert!(fx.service.remove_compartment_monitor(&WATCHED));
    fx.host.thread_compartment(&WATCHED).store(6);
    assert_eq!(fx.log.count(&format!("compartment {WATCHED}")), 1);
    assert!(!fx.service.remove_compartment_monitor(&WATCHED));
}

#[test]
fn test_compartment_values() {
    let fx = Fixture::new("");
    assert_eq!(fx.service.thread_compartment_value(&WATCHED), 0);
    fx.service.set_thread_compartment_value(&WATCHED, 3).expect("thread");
    fx.service.set_global_compartment_value(&WATCHED, 4).expect("global");
    fx.service
        .set_context_compartment_value(&WATCHED, 9, None)
        .expect("context");

    assert_eq!(fx.host.thread_compartment(&WATCHED).current(), Some(3));
    assert_eq!(fx.host.global_compartment(&WATCHED).current(), Some(4));
    assert_eq!(fx.context.compartment(&WATCHED).current(), Some(9));
    assert_eq!(fx.service.context_compartment_value(&WATCHED, None), 9);
}

#[test]
fn test_compartment_write_needs_activation() {
    let fx = Fixture::inactive("", Config::default());
    assert!(matches!(
        fx.service.set_thread_compartment_value(&WATCHED, 1),
        Err(ImeError::NoSuchCapability(_))
    ));
}

#[test]
fn test_profile_notifications() {
    let fx = Fixture::new("");
    fx.host.notify_profile(&CLSID, &PROFILE, true);
    fx.host.notify_profile(&CLSID, &PROFILE, false);
    let other = uuid!("1b0c9d8e-7f6a-4b5c-9d3e-2f1a0b9c8d75");
    fx.host.notify_profile(&other, &PROFILE, true);

    assert!(fx.log.contains(&format!("profile on {PROFILE}")));
    assert!(fx.log.contains(&format!("profile off {PROFILE}")));
    assert_eq!(fx.log.count(&format!("profile on {PROFILE}")), 1);
}

#[test]
fn test_key_sink_focus() {
    let fx = Fixture::new("");
    fx.host.set_foreground(true);
    fx.host.set_foreground(false);
    let events = fx.log.events();
    assert_eq!(&events[events.len() - 2..], ["focus", "kill focus"]);
}

#[test]
fn test_current_context_follows_focus() {
    let fx = Fixture::new("one");
    let current = fx.service.current_context().expect("focused");
    assert!(current.same_object(&fx.document()));

    fx.host.set_focus(None);
    assert!(fx.service.current_context().is_none());
    // No focused document: keys go nowhere.
    assert!(!fx.host.key_down(&KeyEvent::from_char('a')));

    let unknown = fx.service.unknown();
    assert!(unknown.same_object(&fx.service));
}
