// core/tests/composition_scenarios.rs
//! Composition lifecycle against the simulated host.
//!
//! Covers the three ways a composition ends (the service ends it, the caret
//! leaves it, the host terminates it) and the guard rails around every
//! composition operation.

mod common;

use common::Fixture;
use libime_core::config::GUID_INPUT_ATTRIBUTE;
use libime_core::key_event::vk;
use libime_core::{request_session, Config, HostError, ImeError, Rect, TextInputProcessor};

#[test]
fn test_typing_builds_composition() {
    let fx = Fixture::new("hello ");
    assert_eq!(fx.type_text("abc"), 3);

    assert!(fx.service.is_composing());
    assert_eq!(fx.context.text(), "hello abc");
    assert_eq!(fx.context.composition_span(), Some((6, 9)));
    assert_eq!(fx.context.selection_span(), (9, 9));

    // Composition text carries the input attribute's atom.
    let atom = fx.host.atom_of(&GUID_INPUT_ATTRIBUTE).expect("attribute registered");
    assert_eq!(fx.context.attribute_at(6), Some(atom as i32));
    assert_eq!(fx.context.attribute_at(8), Some(atom as i32));
    assert_eq!(fx.context.attribute_at(5), None);
}

#[test]
fn test_cooperative_end() {
    let fx = Fixture::new("hello ");
    fx.type_text("abc");
    assert!(fx.press(vk::RETURN));

    assert!(!fx.service.is_composing());
    assert!(!fx.context.has_composition());
    assert_eq!(fx.context.text(), "hello abc");
    assert_eq!(fx.context.selection_span(), (9, 9));
    assert!(fx.context.attributes_clear());
    assert_eq!(fx.log.count("terminated forced=false"), 1);
    assert!(!fx.log.contains("terminated forced=true"));
}

#[test]
fn test_end_composition_through_api() {
    let fx = Fixture::new("");
    fx.type_text("xy");
    fx.service.end_composition(&fx.document()).expect("end");

    assert!(!fx.service.is_composing());
    assert_eq!(fx.context.text(), "xy");
    assert_eq!(fx.log.count("terminated forced=false"), 1);
    let handle = fx.context.last_composition().expect("composition");
    assert!(!handle.is_active());
}

#[test]
fn test_caret_leaving_composition_ends_it() {
    let fx = Fixture::new("hello ");
    fx.type_text("ab");
    fx.context.move_caret(0, 0);

    assert!(!fx.service.is_composing());
    assert!(!fx.context.has_composition());
    assert_eq!(fx.context.text(), "hello ab");
    // Ending collapses the caret to the end of the old composition.
    assert_eq!(fx.context.selection_span(), (8, 8));
    assert_eq!(fx.log.count("terminated forced=false"), 1);
}

#[test]
fn test_caret_inside_composition_keeps_it() {
    let fx = Fixture::new("hello ");
    fx.type_text("abc");
    fx.context.move_caret(7, 7);
    assert!(fx.service.is_composing());

    fx.context.move_caret(6, 9);
    assert!(fx.service.is_composing());
    assert!(!fx.log.contains("terminated forced=false"));
}

#[test]
fn test_safety_net_can_be_disabled() {
    let config = Config {
        end_composition_on_edit_outside: false,
        ..Config::default()
    };
    let fx = Fixture::with_config("hello ", config);
    fx.type_text("ab");
    fx.context.move_caret(0, 0);
    assert!(fx.service.is_composing());
}

#[test]
fn test_host_termination() {
    let fx = Fixture::new("hello ");
    fx.type_text("ab");
    assert!(fx.context.terminate_composition());

    assert!(!fx.service.is_composing());
    assert!(fx.log.contains("terminated forced=true"));
    assert!(!fx.log.contains("terminated forced=false"));
    assert_eq!(fx.context.text(), "hello ab");

    // The terminated handle is never touched again.
    let handle = fx.context.last_composition().expect("composition");
    assert_eq!(handle.calls_after_end(), 0);
    assert!(matches!(
        fx.service.end_composition(&fx.document()),
        Err(ImeError::InvalidState(_))
    ));
    assert_eq!(handle.calls_after_end(), 0);

    // A fresh composition can start afterwards.
    fx.type_text("c");
    assert!(fx.service.is_composing());
    assert_eq!(fx.context.composition_span(), Some((8, 9)));
    assert_eq!(handle.calls_after_end(), 0);
}

#[test]
fn test_stale_handle_is_dropped() {
    let fx = Fixture::new("hello ");
    fx.type_text("ab");
    assert!(fx.context.drop_composition_silently());
    assert!(fx.service.is_composing());

    let result = fx.service.set_composition_text(&fx.document(), "zz");
    assert!(matches!(
        result,
        Err(ImeError::HostInconsistency(HostError::NoComposition))
    ));
    assert!(!fx.service.is_composing());
    assert_eq!(fx.log.count("terminated forced=true"), 1);
    assert_eq!(fx.context.text(), "hello ab");

    // The engine composes again instead of letting keys fall through.
    assert_eq!(fx.type_text("c"), 1);
    assert!(fx.service.is_composing());
    assert_eq!(fx.context.text(), "hello abc");
    assert_eq!(fx.context.composition_span(), Some((8, 9)));
}

#[test]
fn test_stale_handle_dropped_on_query() {
    let fx = Fixture::new("hello ");
    fx.type_text("ab");
    fx.context.drop_composition_silently();

    let service = fx.service.clone();
    let text = request_session(&fx.document(), fx.service.client_id(), move |session| {
        service.composition_string(session)
    })
    .expect("session");
    assert!(text.is_err());
    assert!(!fx.service.is_composing());
    assert!(fx.log.contains("terminated forced=true"));
}

#[test]
fn test_focus_change_terminates_composition() {
    let fx = Fixture::new("first ");
    fx.type_text("ab");

    let other = fx.host.create_context("second ");
    fx.host.set_focus(Some(&other));
    assert!(!fx.service.is_composing());
    assert!(fx.log.contains("terminated forced=true"));

    fx.type_text("x");
    assert_eq!(other.text(), "second x");
    let owner = fx.service.composition_context().expect("composing");
    assert!(owner.same_object(&other.as_document()));
    assert_eq!(fx.context.text(), "first ab");
}

#[test]
fn test_start_while_composing_is_rejected() {
    let fx = Fixture::new("hello ");
    fx.type_text("a");
    let result = fx.service.start_composition(&fx.document());
    assert!(matches!(result, Err(ImeError::InvalidState(_))));
    assert_eq!(fx.context.composition_span(), Some((6, 7)));
}

#[test]
fn test_idle_operations_are_rejected() {
    let fx = Fixture::new("hello");
    let doc = fx.document();
    assert!(matches!(
        fx.service.set_composition_text(&doc, "x"),
        Err(ImeError::InvalidState(_))
    ));
    assert!(matches!(
        fx.service.move_composition_cursor(&doc, 0),
        Err(ImeError::InvalidState(_))
    ));
    assert!(matches!(
        fx.service.end_composition(&doc),
        Err(ImeError::InvalidState(_))
    ));
    assert_eq!(fx.context.text(), "hello");
    assert_eq!(fx.context.sessions_granted(), 0);
}

#[test]
fn test_start_requires_activation() {
    let fx = Fixture::inactive("hello", Config::default());
    let result = fx.service.start_composition(&fx.document());
    assert!(matches!(result, Err(ImeError::InvalidState(_))));
}

#[test]
fn test_start_and_extend_through_api() {
    let fx = Fixture::new("ab");
    let doc = fx.document();
    fx.service.start_composition(&doc).expect("start");
    assert!(fx.service.is_composing());
    assert_eq!(fx.context.composition_span(), Some((2, 2)));

    fx.service.set_composition_text(&doc, "xyz").expect("text");
    assert_eq!(fx.context.text(), "abxyz");
    assert_eq!(fx.context.selection_span(), (5, 5));

    fx.service.move_composition_cursor(&doc, 1).expect("cursor");
    assert_eq!(fx.context.selection_span(), (3, 3));
    fx.service.move_composition_cursor(&doc, 99).expect("cursor");
    assert_eq!(fx.context.selection_span(), (5, 5));

    fx.service.set_composition_text(&doc, "").expect("clear text");
    assert_eq!(fx.context.text(), "ab");
    assert!(fx.service.is_composing());
}

#[test]
fn test_denied_session_changes_nothing() {
    let fx = Fixture::new("hello ");
    fx.context.set_deny_sessions(true);
    let result = fx.service.start_composition(&fx.document());
    assert!(matches!(result, Err(ImeError::SessionDenied)));
    assert!(!fx.service.is_composing());
    assert_eq!(fx.context.text(), "hello ");
    assert_eq!(fx.context.sessions_granted(), 0);
}

#[test]
fn test_denied_session_while_composing() {
    let fx = Fixture::new("hello ");
    fx.type_text("ab");
    fx.context.set_deny_sessions(true);

    let result = fx.service.set_composition_text(&fx.document(), "zz");
    assert!(matches!(result, Err(ImeError::SessionDenied)));
    assert_eq!(fx.context.text(), "hello ab");
    assert!(fx.service.is_composing());

    // A key that needs a session is reported as not eaten.
    assert!(!fx.press(vk::RETURN));
    assert!(fx.service.is_composing());
}

#[test]
fn test_insertion_outside_composition_is_refused() {
    let config = Config {
        end_composition_on_edit_outside: false,
        ..Config::default()
    };
    let fx = Fixture::with_config("hello ", config);
    fx.type_text("ab");
    fx.context.move_caret(0, 0);

    let doc = fx.document();
    assert!(matches!(
        fx.service.set_composition_text(&doc, "xy"),
        Err(ImeError::InsertionNotAllowed)
    ));
    assert!(matches!(
        fx.service.move_composition_cursor(&doc, 0),
        Err(ImeError::InsertionNotAllowed)
    ));
    assert_eq!(fx.context.text(), "hello ab");

    let service = fx.service.clone();
    let allowed = request_session(&doc, fx.service.client_id(), move |session| {
        service.is_insertion_allowed(session)
    })
    .expect("session");
    assert_eq!(allowed.ok(), Some(false));
}

#[test]
fn test_outside_insertion_allowed_when_configured() {
    let config = Config {
        end_composition_on_edit_outside: false,
        reject_outside_insertion: false,
        ..Config::default()
    };
    let fx = Fixture::with_config("hello ", config);
    fx.type_text("ab");
    fx.context.move_caret(0, 0);
    fx.service
        .set_composition_text(&fx.document(), "xy")
        .expect("insertion allowed");
    assert_eq!(fx.context.text(), "hello xy");
}

#[test]
fn test_composition_queries() {
    let fx = Fixture::new("hello ");
    let doc = fx.document();

    let service = fx.service.clone();
    let idle = request_session(&doc, fx.service.client_id(), move |session| {
        service.composition_string(session)
    })
    .expect("session");
    assert_eq!(idle.ok().as_deref(), Some(""));

    fx.type_text("abc");
    let service = fx.service.clone();
    let (text, rect, caret) = request_session(&doc, fx.service.client_id(), move |session| {
        (
            service.composition_string(session).ok(),
            service.composition_rect(session).ok().flatten(),
            service.selection_rect(session).ok(),
        )
    })
    .expect("session");

    assert_eq!(text.as_deref(), Some("abc"));
    let rect = rect.expect("composition rect");
    assert_eq!(
        rect,
        Rect {
            left: 148,
            top: 200,
            right: 172,
            bottom: 216
        }
    );
    assert_eq!(rect.width(), 24);
    assert_eq!(caret.map(|r| r.width()), Some(0));
}

#[test]
fn test_deactivate_ends_composition() {
    let fx = Fixture::new("hello ");
    fx.type_text("ab");
    fx.service.deactivate().expect("deactivate");

    assert!(!fx.service.is_composing());
    assert!(!fx.context.has_composition());
    let events = fx.log.events();
    let ended = events
        .iter()
        .position(|e| e == "terminated forced=false")
        .expect("ended");
    let deactivated = events
        .iter()
        .position(|e| e == "deactivate composing=false")
        .expect("deactivated");
    assert!(ended < deactivated);
}

#[test]
fn test_deactivate_abandons_composition_when_denied() {
    let fx = Fixture::new("hello ");
    fx.type_text("ab");
    fx.context.set_deny_sessions(true);
    fx.service.deactivate().expect("deactivate");

    assert!(!fx.service.is_composing());
    assert!(fx.log.contains("terminated forced=true"));
    assert!(!fx.service.is_activated());
}
