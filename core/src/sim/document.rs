//! Document text, ranges and locks.

use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::rc::Rc;

use crate::com::{ComObject, ComPtr, InterfaceEntry, SelfRef, WeakPtr};
use crate::error::{HostError, HostResult};
use crate::host::{Anchor, ContextView, EditRecord, Property, Rect, TextRange};
use crate::session::EditCookie;

use super::view;

/// Width of one character cell in simulated screen coordinates.
pub const CHAR_WIDTH: i32 = 8;
/// Height of the single simulated text line.
pub const LINE_HEIGHT: i32 = 16;
/// Screen origin of the first character.
pub const ORIGIN: (i32, i32) = (100, 200);

#[derive(Debug, Clone, Copy)]
struct Lock {
    cookie: u32,
    writable: bool,
}

/// Characters plus every live range over them.
///
/// Offsets are in characters. Ranges registered with the document follow
/// edits: text inserted at a range's end extends it, text removed from under
/// it shrinks it.
pub struct SimDocument {
    text: RefCell<Vec<char>>,
    ranges: RefCell<Vec<WeakPtr<SimRange>>>,
    selection: Cell<(usize, usize)>,
    lock: Cell<Option<Lock>>,
    next_lock: Cell<u32>,
    selection_changed: Cell<bool>,
    text_changed: Cell<bool>,
}

/// What happened since the last end-of-edit notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingChanges {
    pub selection_changed: bool,
    pub text_changed: bool,
}

impl SimDocument {
    /// A document holding `text` with the caret at its end.
    pub fn new(text: &str) -> Rc<Self> {
        let chars: Vec<char> = text.chars().collect();
        let end = chars.len();
        Rc::new(Self {
            text: RefCell::new(chars),
            ranges: RefCell::new(Vec::new()),
            selection: Cell::new((end, end)),
            lock: Cell::new(None),
            next_lock: Cell::new(1),
            selection_changed: Cell::new(false),
            text_changed: Cell::new(false),
        })
    }

    pub fn text(&self) -> String {
        self.text.borrow().iter().collect()
    }

    pub fn len(&self) -> usize {
        self.text.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn selection_span(&self) -> (usize, usize) {
        self.selection.get()
    }

    /// Moves the selection, clamped to the text.
    pub fn set_selection_span(&self, start: usize, end: usize) {
        let len = self.len();
        let span = (start.min(len), end.min(len).max(start.min(len)));
        if self.selection.replace(span) != span {
            self.selection_changed.set(true);
        }
    }

    pub fn is_locked(&self) -> bool {
        self.lock.get().is_some()
    }

    /// Runs `f` under a read-write lock.
    pub fn with_lock<R>(&self, f: impl FnOnce(EditCookie<'_>) -> R) -> R {
        self.with_lock_mode(true, f)
    }

    /// Runs `f` under a read-only lock.
    pub fn with_read_lock<R>(&self, f: impl FnOnce(EditCookie<'_>) -> R) -> R {
        self.with_lock_mode(false, f)
    }

    fn with_lock_mode<R>(&self, writable: bool, f: impl FnOnce(EditCookie<'_>) -> R) -> R {
        let cookie = self.next_lock.get();
        self.next_lock.set(cookie.wrapping_add(1).max(1));
        let previous = self.lock.replace(Some(Lock { cookie, writable }));
        let result = EditCookie::for_callback(cookie, f);
        self.lock.set(previous);
        result
    }

    /// Fails unless `ec` is the lock currently granted, and writable when
    /// `write` is set.
    pub fn check(&self, ec: EditCookie<'_>, write: bool) -> HostResult<()> {
        match self.lock.get() {
            Some(lock) if lock.cookie == ec.raw() && (lock.writable || !write) => Ok(()),
            _ => Err(HostError::NoLock),
        }
    }

    /// Clears and returns the change flags, if anything changed.
    pub fn take_changes(&self) -> Option<PendingChanges> {
        let changes = PendingChanges {
            selection_changed: self.selection_changed.replace(false),
            text_changed: self.text_changed.replace(false),
        };
        (changes.selection_changed || changes.text_changed).then_some(changes)
    }

    /// A tracked range over `start..end`, clamped to the text.
    pub fn sim_range(self: &Rc<Self>, start: usize, end: usize) -> ComPtr<SimRange> {
        let len = self.len();
        let start = start.min(len);
        let end = end.clamp(start, len);
        let range = ComPtr::make(|this| SimRange {
            this,
            doc: Rc::clone(self),
            span: Cell::new((start, end)),
        });
        let mut ranges = self.ranges.borrow_mut();
        ranges.retain(|weak| weak.is_alive());
        ranges.push(range.downgrade());
        range
    }

    pub fn range(self: &Rc<Self>, start: usize, end: usize) -> ComPtr<dyn TextRange> {
        view(&self.sim_range(start, end))
    }

    /// Replaces `start..end` with `text` and moves every anchor after it.
    fn replace(&self, start: usize, end: usize, text: &str) {
        let inserted: Vec<char> = text.chars().collect();
        let added = inserted.len();
        self.text.borrow_mut().splice(start..end, inserted);
        self.text_changed.set(true);

        let map = |(s, e): (usize, usize)| {
            let s = shift_start(s, start, end, added);
            let e = shift_end(e, start, end, added);
            (s, e.max(s))
        };
        for range in self.ranges.borrow().iter().filter_map(WeakPtr::upgrade) {
            range.span.set(map(range.span.get()));
        }
        let selection = map(self.selection.get());
        if self.selection.replace(selection) != selection {
            self.selection_changed.set(true);
        }
    }
}

fn shift_start(point: usize, start: usize, end: usize, added: usize) -> usize {
    if point <= start {
        point
    } else if point >= end {
        point - (end - start) + added
    } else {
        start
    }
}

fn shift_end(point: usize, start: usize, end: usize, added: usize) -> usize {
    if point < start {
        point
    } else if point >= end {
        point - (end - start) + added
    } else {
        start + added
    }
}

/// A range over a [`SimDocument`].
pub struct SimRange {
    this: SelfRef<SimRange>,
    doc: Rc<SimDocument>,
    span: Cell<(usize, usize)>,
}

impl SimRange {
    pub fn span(&self) -> (usize, usize) {
        self.span.get()
    }

    fn start(&self) -> usize {
        self.span.get().0
    }

    fn end(&self) -> usize {
        self.span.get().1
    }

    fn set_span(&self, start: usize, end: usize) {
        self.span.set((start, end.max(start)));
    }
}

fn point_of(other: &ComPtr<dyn TextRange>, anchor: Anchor) -> HostResult<usize> {
    let (start, len) = other.extent()?;
    Ok(match anchor {
        Anchor::Start => start,
        Anchor::End => start + len,
    })
}

impl TextRange for SimRange {
    fn text(&self, ec: EditCookie<'_>) -> HostResult<String> {
        self.doc.check(ec, false)?;
        let (start, end) = self.span.get();
        Ok(self.doc.text.borrow()[start..end].iter().collect())
    }

    fn set_text(&self, ec: EditCookie<'_>, text: &str) -> HostResult<()> {
        self.doc.check(ec, true)?;
        let (start, end) = self.span.get();
        self.doc.replace(start, end, text);
        Ok(())
    }

    fn compare_start(
        &self,
        ec: EditCookie<'_>,
        other: &ComPtr<dyn TextRange>,
        anchor: Anchor,
    ) -> HostResult<Ordering> {
        self.doc.check(ec, false)?;
        Ok(self.start().cmp(&point_of(other, anchor)?))
    }

    fn compare_end(
        &self,
        ec: EditCookie<'_>,
        other: &ComPtr<dyn TextRange>,
        anchor: Anchor,
    ) -> HostResult<Ordering> {
        self.doc.check(ec, false)?;
        Ok(self.end().cmp(&point_of(other, anchor)?))
    }

    fn shift_start_to_range(
        &self,
        ec: EditCookie<'_>,
        other: &ComPtr<dyn TextRange>,
        anchor: Anchor,
    ) -> HostResult<()> {
        self.doc.check(ec, false)?;
        let start = point_of(other, anchor)?;
        self.set_span(start, self.end().max(start));
        Ok(())
    }

    fn shift_end_to_range(
        &self,
        ec: EditCookie<'_>,
        other: &ComPtr<dyn TextRange>,
        anchor: Anchor,
    ) -> HostResult<()> {
        self.doc.check(ec, false)?;
        let end = point_of(other, anchor)?;
        self.set_span(self.start().min(end), end);
        Ok(())
    }

    fn shift_start(&self, ec: EditCookie<'_>, count: i32) -> HostResult<i32> {
        self.doc.check(ec, false)?;
        let len = self.doc.len() as i64;
        let old = self.start() as i64;
        let new = (old + i64::from(count)).clamp(0, len);
        let start = new as usize;
        self.set_span(start, self.end().max(start));
        Ok((new - old) as i32)
    }

    fn collapse(&self, ec: EditCookie<'_>, anchor: Anchor) -> HostResult<()> {
        self.doc.check(ec, false)?;
        let point = match anchor {
            Anchor::Start => self.start(),
            Anchor::End => self.end(),
        };
        self.set_span(point, point);
        Ok(())
    }

    fn is_empty(&self, ec: EditCookie<'_>) -> HostResult<bool> {
        self.doc.check(ec, false)?;
        Ok(self.start() == self.end())
    }

    fn clone_range(&self) -> HostResult<ComPtr<dyn TextRange>> {
        let (start, end) = self.span.get();
        Ok(self.doc.range(start, end))
    }

    fn extent(&self) -> HostResult<(usize, usize)> {
        let (start, end) = self.span.get();
        Ok((start, end - start))
    }
}

impl ComObject for SimRange {
    const INTERFACES: &'static [InterfaceEntry<Self>] =
        &[crate::interface_entry!(Self => dyn TextRange)];

    fn self_ref(&self) -> &SelfRef<Self> {
        &self.this
    }
}

/// Integer values attached to ranges of one document.
pub struct SimProperty {
    this: SelfRef<SimProperty>,
    doc: Rc<SimDocument>,
    entries: RefCell<Vec<(ComPtr<SimRange>, i32)>>,
}

impl SimProperty {
    pub fn new(doc: &Rc<SimDocument>) -> ComPtr<Self> {
        ComPtr::make(|this| Self {
            this,
            doc: Rc::clone(doc),
            entries: RefCell::new(Vec::new()),
        })
    }

    /// Value covering the character at `pos`.
    pub fn value_at(&self, pos: usize) -> Option<i32> {
        self.entries
            .borrow()
            .iter()
            .find(|(range, _)| {
                let (start, end) = range.span();
                start <= pos && pos < end
            })
            .map(|(_, value)| *value)
    }

    pub fn is_clear(&self) -> bool {
        self.entries
            .borrow()
            .iter()
            .all(|(range, _)| range.span().0 == range.span().1)
    }

    fn remove_overlapping(&self, start: usize, end: usize) {
        let removed: Vec<_> = {
            let mut entries = self.entries.borrow_mut();
            let (removed, kept) = entries.drain(..).partition(|(range, _)| {
                let (s, e) = range.span();
                (s < end && start < e) || (s, e) == (start, end)
            });
            *entries = kept;
            removed
        };
        drop(removed);
    }
}

impl Property for SimProperty {
    fn value(&self, ec: EditCookie<'_>, range: &ComPtr<dyn TextRange>) -> HostResult<Option<i32>> {
        self.doc.check(ec, false)?;
        let (start, len) = range.extent()?;
        Ok(self.entries.borrow().iter().find_map(|(held, value)| {
            let (s, e) = held.span();
            (s <= start && start + len <= e && s < e).then_some(*value)
        }))
    }

    fn set_value(
        &self,
        ec: EditCookie<'_>,
        range: &ComPtr<dyn TextRange>,
        value: i32,
    ) -> HostResult<()> {
        self.doc.check(ec, true)?;
        let (start, len) = range.extent()?;
        self.remove_overlapping(start, start + len);
        let held = self.doc.sim_range(start, start + len);
        self.entries.borrow_mut().push((held, value));
        Ok(())
    }

    fn clear(&self, ec: EditCookie<'_>, range: &ComPtr<dyn TextRange>) -> HostResult<()> {
        self.doc.check(ec, true)?;
        let (start, len) = range.extent()?;
        self.remove_overlapping(start, start + len);
        Ok(())
    }
}

impl ComObject for SimProperty {
    const INTERFACES: &'static [InterfaceEntry<Self>] =
        &[crate::interface_entry!(Self => dyn Property)];

    fn self_ref(&self) -> &SelfRef<Self> {
        &self.this
    }
}

/// A one-line view laying characters out in fixed-width cells.
pub struct SimView {
    this: SelfRef<SimView>,
    doc: Rc<SimDocument>,
}

impl SimView {
    pub fn new(doc: &Rc<SimDocument>) -> ComPtr<Self> {
        ComPtr::make(|this| Self {
            this,
            doc: Rc::clone(doc),
        })
    }
}

impl ContextView for SimView {
    fn text_extent(
        &self,
        ec: EditCookie<'_>,
        range: &ComPtr<dyn TextRange>,
    ) -> HostResult<(Rect, bool)> {
        self.doc.check(ec, false)?;
        let (start, len) = range.extent()?;
        let left = ORIGIN.0 + start as i32 * CHAR_WIDTH;
        let rect = Rect {
            left,
            top: ORIGIN.1,
            right: left + len as i32 * CHAR_WIDTH,
            bottom: ORIGIN.1 + LINE_HEIGHT,
        };
        Ok((rect, false))
    }
}

impl ComObject for SimView {
    const INTERFACES: &'static [InterfaceEntry<Self>] =
        &[crate::interface_entry!(Self => dyn ContextView)];

    fn self_ref(&self) -> &SelfRef<Self> {
        &self.this
    }
}

/// The record handed to end-of-edit sinks.
pub struct SimEditRecord {
    this: SelfRef<SimEditRecord>,
    changes: PendingChanges,
}

impl SimEditRecord {
    pub fn new(changes: PendingChanges) -> ComPtr<Self> {
        ComPtr::make(|this| Self { this, changes })
    }
}

impl EditRecord for SimEditRecord {
    fn selection_changed(&self) -> HostResult<bool> {
        Ok(self.changes.selection_changed)
    }
}

impl ComObject for SimEditRecord {
    const INTERFACES: &'static [InterfaceEntry<Self>] =
        &[crate::interface_entry!(Self => dyn EditRecord)];

    fn self_ref(&self) -> &SelfRef<Self> {
        &self.this
    }
}
