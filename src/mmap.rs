//! Raw memory reservations for the block allocator.
//!
//! A reservation is one large anonymous mapping from which `BLOCK_SIZE`
//! aligned blocks are carved. Pages are committed lazily and given back to
//! the OS when blocks are returned.

#[cfg(unix)]
pub mod _unix {
    use crate::globals::BLOCK_SIZE;

    pub struct Reservation {
        /// Owns the mapping; unmapped on drop.
        _map: memmap2::MmapMut,
        start: *mut u8,
        size: usize,
    }

    impl Reservation {
        pub fn new(size: usize) -> Option<Self> {
            let mut map = memmap2::MmapMut::map_anon(size).ok()?;
            let start = map.as_mut_ptr();
            unsafe {
                libc::madvise(start as *mut _, size as _, libc::MADV_SEQUENTIAL);
            }
            Some(Self {
                _map: map,
                start,
                size,
            })
        }

        /// Return a `BLOCK_SIZE` aligned pointer into the reservation.
        pub fn aligned(&self) -> *mut u8 {
            let offset = BLOCK_SIZE - (self.start as usize) % BLOCK_SIZE;
            unsafe { self.start.add(offset % BLOCK_SIZE) }
        }

        pub fn start(&self) -> *mut u8 {
            self.start
        }

        pub fn end(&self) -> *mut u8 {
            (self.start as usize + self.size) as *mut u8
        }

        pub const fn size(&self) -> usize {
            self.size
        }

        pub fn dontneed(&self, page: *mut u8, size: usize) {
            unsafe {
                libc::madvise(page as *mut _, size as _, libc::MADV_DONTNEED);
            }
        }

        pub fn commit(&self, page: *mut u8, size: usize) {
            unsafe {
                libc::madvise(page as *mut _, size as _, libc::MADV_WILLNEED);
            }
        }
    }

    // The mapping is handed out as raw pointers only.
    unsafe impl Send for Reservation {}
    unsafe impl Sync for Reservation {}
}

#[cfg(windows)]
pub mod _win {
    use crate::globals::BLOCK_SIZE;
    use core::ptr::null_mut;
    use winapi::um::{
        memoryapi::{VirtualAlloc, VirtualFree},
        winnt::{MEM_COMMIT, MEM_DECOMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_READWRITE},
    };

    pub struct Reservation {
        start: *mut u8,
        size: usize,
    }

    impl Reservation {
        pub fn new(size: usize) -> Option<Self> {
            unsafe {
                let mem = VirtualAlloc(null_mut(), size, MEM_RESERVE, PAGE_READWRITE);
                if mem.is_null() {
                    return None;
                }
                Some(Self {
                    start: mem as *mut u8,
                    size,
                })
            }
        }

        /// Return a `BLOCK_SIZE` aligned pointer into the reservation.
        pub fn aligned(&self) -> *mut u8 {
            let offset = BLOCK_SIZE - (self.start as usize) % BLOCK_SIZE;
            unsafe { self.start.add(offset % BLOCK_SIZE) }
        }

        pub fn start(&self) -> *mut u8 {
            self.start
        }

        pub fn end(&self) -> *mut u8 {
            (self.start as usize + self.size) as *mut u8
        }

        pub const fn size(&self) -> usize {
            self.size
        }

        pub fn dontneed(&self, page: *mut u8, size: usize) {
            unsafe {
                VirtualFree(page.cast(), size, MEM_DECOMMIT);
            }
        }

        pub fn commit(&self, page: *mut u8, size: usize) {
            unsafe {
                VirtualAlloc(page.cast(), size, MEM_COMMIT, PAGE_READWRITE);
            }
        }
    }

    unsafe impl Send for Reservation {}
    unsafe impl Sync for Reservation {}

    impl Drop for Reservation {
        fn drop(&mut self) {
            unsafe {
                VirtualFree(self.start.cast(), 0, MEM_RELEASE);
            }
        }
    }
}

#[cfg(unix)]
pub use _unix::*;
#[cfg(windows)]
pub use _win::*;
