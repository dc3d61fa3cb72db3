//! String interning table, ported 1:1 from `StringTable`/`String` in
//! `orz/asm.py`. A string added non-interned and later requested again
//! (interned or not) promotes the *original* entry to interned; the new
//! insertion becomes a reference pointing at it. `close()` assigns
//! canonical indices, in insertion order, to every interned entry that
//! isn't itself a reference.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

pub struct StringEntry {
    pub text: Vec<u8>,
    pub interned: Cell<bool>,
    ref_entry: RefCell<Option<StringRef>>,
    ref_index: Cell<Option<u32>>,
    index: Cell<i32>,
}

pub type StringRef = Rc<StringEntry>;

#[derive(Default)]
pub struct StringTable {
    entries: Vec<StringRef>,
}

impl StringTable {
    pub fn new() -> Self {
        StringTable { entries: Vec::new() }
    }

    /// Mirrors `StringTable.add`: first occurrence of `s` by text creates a
    /// fresh entry; every later occurrence forces the first one `interned`
    /// and returns a new entry that references it. `s` is raw bytes, not
    /// text — a Lua string is a byte string, and need not be valid UTF-8.
    pub fn add(&mut self, s: &[u8], interned: bool) -> StringRef {
        if let Some(existing) = self.entries.iter().find(|e| e.text == s).cloned() {
            existing.interned.set(true);

            let entry = Rc::new(StringEntry {
                text: s.to_vec(),
                interned: Cell::new(interned),
                ref_entry: RefCell::new(Some(existing)),
                ref_index: Cell::new(None),
                index: Cell::new(-1),
            });
            self.entries.push(entry.clone());
            entry
        } else {
            let entry = Rc::new(StringEntry {
                text: s.to_vec(),
                interned: Cell::new(interned),
                ref_entry: RefCell::new(None),
                ref_index: Cell::new(None),
                index: Cell::new(-1),
            });
            self.entries.push(entry.clone());
            entry
        }
    }

    /// Assigns canonical indices to every non-reference interned entry (in
    /// insertion order) and resolves each reference entry to that index.
    pub fn close(&mut self) {
        let mut index = 0i32;

        for entry in &self.entries {
            let is_ref = entry.ref_entry.borrow().is_some();

            if !is_ref && entry.interned.get() {
                entry.index.set(index);
                index += 1;
            } else if is_ref {
                let original = entry.ref_entry.borrow().clone().unwrap();
                entry.ref_index.set(Some(original.index.get() as u32));
            }
        }
    }
}

/// Returns `(is_ref, ref_index_or_canonical_index, interned, text)` for
/// serialization: callers write `STRINGREF` + the index when `is_ref`,
/// otherwise `INTERNED`/`STRING` + length-prefixed bytes.
pub fn resolve(entry: &StringEntry) -> (bool, u32, bool, &[u8]) {
    if let Some(idx) = entry.ref_index.get() {
        (true, idx, entry.interned.get(), &entry.text)
    } else {
        (false, entry.index.get().max(0) as u32, entry.interned.get(), &entry.text)
    }
}
