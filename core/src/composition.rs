//! Composition state and range geometry.
//!
//! The engine keeps at most one composition: a host range the input method
//! is still editing. These helpers hold the range arithmetic the state
//! machine in [`crate::text_service`] relies on.

use std::cmp::Ordering;

use crate::com::ComPtr;
use crate::error::HostResult;
use crate::host::{Anchor, TextRange};
use crate::session::EditCookie;

/// Whether a composition is in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompositionState {
    #[default]
    Idle,
    Composing,
}

impl CompositionState {
    pub fn is_composing(self) -> bool {
        self == Self::Composing
    }
}

/// Whether `inner` lies entirely within `outer`: `outer.start <= inner.start`
/// and `inner.end <= outer.end`. Empty ranges at either edge count as inside.
pub fn range_covers(
    ec: EditCookie<'_>,
    outer: &ComPtr<dyn TextRange>,
    inner: &ComPtr<dyn TextRange>,
) -> HostResult<bool> {
    let start = outer.compare_start(ec, inner, Anchor::Start)?;
    let end = outer.compare_end(ec, inner, Anchor::End)?;
    Ok(start != Ordering::Greater && end != Ordering::Less)
}

/// A copy of `range` collapsed to `offset` characters from its start,
/// clamped to the range length.
pub fn caret_in(
    ec: EditCookie<'_>,
    range: &ComPtr<dyn TextRange>,
    offset: usize,
) -> HostResult<ComPtr<dyn TextRange>> {
    let length = range.text(ec)?.chars().count();
    let caret = range.clone_range()?;
    caret.collapse(ec, Anchor::Start)?;
    let shift = i32::try_from(offset.min(length)).unwrap_or(i32::MAX);
    if shift > 0 {
        caret.shift_start(ec, shift)?;
    }
    caret.collapse(ec, Anchor::Start)?;
    Ok(caret)
}

/// A copy of `range` collapsed to its end.
pub fn caret_at_end(
    ec: EditCookie<'_>,
    range: &ComPtr<dyn TextRange>,
) -> HostResult<ComPtr<dyn TextRange>> {
    let caret = range.clone_range()?;
    caret.collapse(ec, Anchor::End)?;
    Ok(caret)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimDocument;
    use std::rc::Rc;

    fn with_document<R>(text: &str, f: impl FnOnce(&Rc<SimDocument>, EditCookie<'_>) -> R) -> R {
        let document = SimDocument::new(text);
        document.with_lock(|ec| f(&document, ec))
    }

    #[test]
    fn test_covers_inner_and_edge_ranges() {
        with_document("abcdefgh", |doc, ec| {
            let outer = doc.range(2, 6);
            assert!(range_covers(ec, &outer, &doc.range(3, 5)).unwrap());
            assert!(range_covers(ec, &outer, &doc.range(2, 2)).unwrap());
            assert!(range_covers(ec, &outer, &doc.range(6, 6)).unwrap());
            assert!(range_covers(ec, &outer, &doc.range(2, 6)).unwrap());
        });
    }

    #[test]
    fn test_rejects_ranges_poking_out() {
        with_document("abcdefgh", |doc, ec| {
            let outer = doc.range(2, 6);
            assert!(!range_covers(ec, &outer, &doc.range(1, 4)).unwrap());
            assert!(!range_covers(ec, &outer, &doc.range(4, 7)).unwrap());
            assert!(!range_covers(ec, &outer, &doc.range(7, 7)).unwrap());
        });
    }

    #[test]
    fn test_caret_offset_is_clamped() {
        with_document("xxabcxx", |doc, ec| {
            let range = doc.range(2, 5);
            assert_eq!(caret_in(ec, &range, 1).unwrap().extent().unwrap(), (3, 0));
            assert_eq!(caret_in(ec, &range, 99).unwrap().extent().unwrap(), (5, 0));
            assert_eq!(caret_in(ec, &range, 0).unwrap().extent().unwrap(), (2, 0));
            assert_eq!(caret_at_end(ec, &range).unwrap().extent().unwrap(), (5, 0));
        });
    }

    #[test]
    fn test_state_default_is_idle() {
        assert!(!CompositionState::default().is_composing());
        assert!(CompositionState::Composing.is_composing());
    }
}
