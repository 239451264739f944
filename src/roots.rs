//! Root registration: global roots, temporary roots and collection hooks.
//!
//! Global roots are doubly-linked so deregistration is O(1) in any order.
//! Temporary roots are a LIFO stack; releasing them is restoring a
//! previously read height, which is the idiom for function-local roots.
//! Hooks let callers enumerate roots held in their own data structures at
//! collection time.

use std::ops::{Deref, DerefMut};
use std::ptr::null_mut;

use crate::api::{CollectionKind, Word};
use crate::error::FatalKind;
use crate::fatal;
use crate::globals::WORD_SIZE;
use crate::heaplet::Heaplet;

pub struct GlobalRoot {
    prev: *mut GlobalRoot,
    next: *mut GlobalRoot,
    pub(crate) buf: *mut Word,
    pub(crate) words: usize,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct GlobalRootHandle(pub(crate) *mut GlobalRoot);

pub struct GlobalRootList {
    head: *mut GlobalRoot,
}

impl GlobalRootList {
    pub(crate) const fn new() -> Self {
        Self { head: null_mut() }
    }

    pub(crate) fn register(&mut self, buf: *mut Word, size_bytes: usize) -> GlobalRootHandle {
        if size_bytes == 0 || size_bytes % WORD_SIZE != 0 {
            fatal!(
                FatalKind::MisuseAtMutator,
                "global root size {} is not a positive multiple of the word size",
                size_bytes
            );
        }
        let root = Box::into_raw(Box::new(GlobalRoot {
            prev: null_mut(),
            next: self.head,
            buf,
            words: size_bytes / WORD_SIZE,
        }));
        unsafe {
            if !self.head.is_null() {
                (*self.head).prev = root;
            }
        }
        self.head = root;
        GlobalRootHandle(root)
    }

    pub(crate) fn deregister(&mut self, handle: GlobalRootHandle) {
        let root = handle.0;
        if root.is_null() || !self.contains(root) {
            fatal!(
                FatalKind::MisuseAtMutator,
                "deregistration of unknown global root handle"
            );
        }
        unsafe {
            if (*root).prev.is_null() {
                self.head = (*root).next;
            } else {
                (*(*root).prev).next = (*root).next;
            }
            if !(*root).next.is_null() {
                (*(*root).next).prev = (*root).prev;
            }
            drop(Box::from_raw(root));
        }
    }

    fn contains(&self, root: *mut GlobalRoot) -> bool {
        unsafe {
            let mut cur = self.head;
            while !cur.is_null() {
                if cur == root {
                    return true;
                }
                cur = (*cur).next;
            }
        }
        false
    }

    pub(crate) fn for_each_word(&self, mut visitor: impl FnMut(*mut Word)) {
        unsafe {
            let mut cur = self.head;
            while !cur.is_null() {
                for i in 0..(*cur).words {
                    visitor((*cur).buf.add(i));
                }
                cur = (*cur).next;
            }
        }
    }

    pub(crate) fn drop_all(&mut self) {
        unsafe {
            let mut cur = self.head;
            while !cur.is_null() {
                let next = (*cur).next;
                drop(Box::from_raw(cur));
                cur = next;
            }
        }
        self.head = null_mut();
    }
}

#[derive(Clone, Copy)]
pub(crate) struct TempRoot {
    pub(crate) buf: *mut Word,
    pub(crate) words: usize,
}

pub struct TempRootSet {
    stack: Vec<TempRoot>,
}

impl TempRootSet {
    pub(crate) fn new() -> Self {
        Self { stack: Vec::new() }
    }

    pub(crate) fn push(&mut self, buf: *mut Word, size_bytes: usize) {
        if size_bytes == 0 || size_bytes % WORD_SIZE != 0 {
            fatal!(
                FatalKind::MisuseAtMutator,
                "temporary root size {} is not a positive multiple of the word size",
                size_bytes
            );
        }
        self.stack.push(TempRoot {
            buf,
            words: size_bytes / WORD_SIZE,
        });
    }

    pub(crate) fn pop(&mut self) {
        if self.stack.pop().is_none() {
            fatal!(FatalKind::MisuseAtMutator, "temporary root set underflow");
        }
    }

    pub(crate) fn height(&self) -> usize {
        self.stack.len()
    }

    pub(crate) fn reset_height(&mut self, height: usize) {
        if height > self.stack.len() {
            fatal!(
                FatalKind::MisuseAtMutator,
                "temporary root set height {} above current {}",
                height,
                self.stack.len()
            );
        }
        self.stack.truncate(height);
    }

    pub(crate) fn remove_all(&mut self) {
        self.stack.clear();
    }

    pub(crate) fn for_each_word(&self, mut visitor: impl FnMut(*mut Word)) {
        for root in self.stack.iter() {
            unsafe {
                for i in 0..root.words {
                    visitor(root.buf.add(i));
                }
            }
        }
    }
}

pub type HookFn = fn(&mut Heaplet, *mut u8, CollectionKind);

#[derive(Clone, Copy)]
pub struct Hook {
    pub f: HookFn,
    pub data: *mut u8,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct HookHandle(pub(crate) usize);

pub struct HookSet {
    entries: Vec<Option<Hook>>,
}

impl HookSet {
    pub(crate) fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub(crate) fn register(&mut self, f: HookFn, data: *mut u8) -> HookHandle {
        let hook = Hook { f, data };
        for (i, slot) in self.entries.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(hook);
                return HookHandle(i);
            }
        }
        self.entries.push(Some(hook));
        HookHandle(self.entries.len() - 1)
    }

    pub(crate) fn deregister(&mut self, handle: HookHandle) {
        match self.entries.get_mut(handle.0) {
            Some(slot) if slot.is_some() => *slot = None,
            _ => fatal!(
                FatalKind::MisuseAtMutator,
                "deregistration of unknown hook handle"
            ),
        }
    }

    /// Copy out the live hooks so they can be invoked with the heaplet
    /// mutably borrowed.
    pub(crate) fn snapshot(&self) -> Vec<Hook> {
        self.entries.iter().filter_map(|slot| *slot).collect()
    }
}

/// Scoped temporary-root frame: records the root-set height on entry and
/// restores it on drop, whatever the exit path.
pub struct TempRootFrame<'a> {
    heaplet: &'a mut Heaplet,
    height: usize,
}

impl<'a> TempRootFrame<'a> {
    pub(crate) fn new(heaplet: &'a mut Heaplet) -> Self {
        let height = heaplet.get_temporary_root_set_height();
        Self { heaplet, height }
    }
}

impl<'a> Deref for TempRootFrame<'a> {
    type Target = Heaplet;
    fn deref(&self) -> &Heaplet {
        self.heaplet
    }
}

impl<'a> DerefMut for TempRootFrame<'a> {
    fn deref_mut(&mut self) -> &mut Heaplet {
        self.heaplet
    }
}

impl<'a> Drop for TempRootFrame<'a> {
    fn drop(&mut self) {
        let height = self.height;
        self.heaplet.reset_temporary_root_set_height(height);
    }
}
