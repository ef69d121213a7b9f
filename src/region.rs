//! A small bounded-region copy engine guarded by [`FairRwLock`], standing
//! in for the cross-process virtual memory copy a real IOCTL driver would
//! perform (out of scope here — see the crate-level docs).
//!
//! Grounded on `asterinas-asterinas`'s `VmReader`/`VmWriter`: a cursor
//! (`cursor`, `end`) over a contiguous byte range with `remain`/`avail`
//! accounting and a `copy_into` that copies the minimum of what the source
//! has and the destination can hold, reporting back how much was actually
//! moved rather than silently requiring an exact match. `Region` itself can
//! be backed by a heap-allocated, pool-owned buffer or by an externally
//! mapped one — the "mapped-vs-pooled" distinction `spec.md` calls out for
//! the block-copy path the lock guards.

use std::cell::UnsafeCell;
use std::marker::PhantomData;

use crate::error::{Error, Result};
use crate::rwlock::FairRwLock;

enum Backing {
    /// A region the crate allocated and owns outright.
    Pooled(Vec<u8>),
    /// A region over memory owned by the caller, e.g. a page the caller
    /// mapped in some other way. The caller is responsible for ensuring
    /// the range stays valid for as long as the `Region` exists.
    Mapped(*mut u8),
}

/// A fixed-size byte range guarded by a [`FairRwLock`]: shared readers may
/// run concurrently, a writer has the range to itself, exactly as
/// `spec.md` describes for the lock's intended caller.
pub struct Region {
    lock: FairRwLock,
    backing: UnsafeCell<Backing>,
    len: usize,
}

// SAFETY: access to `backing` is only ever performed while holding `lock`
// in the matching mode, which gives it the exclusion `Send`/`Sync` need. A
// `Mapped` backing's raw pointer is the caller's responsibility per
// `Region::mapped`'s safety contract.
unsafe impl Send for Region {}
unsafe impl Sync for Region {}

impl Region {
    /// Creates a region backed by a freshly allocated, zeroed buffer.
    pub fn pooled(len: usize) -> Self {
        Self {
            lock: FairRwLock::new(),
            backing: UnsafeCell::new(Backing::Pooled(vec![0u8; len])),
            len,
        }
    }

    /// Creates a region over caller-owned memory.
    ///
    /// # Safety
    /// `ptr .. ptr.add(len)` must be valid for reads and writes for as long
    /// as this `Region` exists, and the caller must not access that range
    /// through any path other than this `Region` while it exists.
    pub unsafe fn mapped(ptr: *mut u8, len: usize) -> Self {
        Self {
            lock: FairRwLock::new(),
            backing: UnsafeCell::new(Backing::Mapped(ptr)),
            len,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn as_slice(&self) -> &[u8] {
        // SAFETY: caller holds `self.lock` in shared or exclusive mode.
        unsafe {
            match &*self.backing.get() {
                Backing::Pooled(v) => v.as_slice(),
                Backing::Mapped(ptr) => std::slice::from_raw_parts(*ptr, self.len),
            }
        }
    }

    #[allow(clippy::mut_from_ref)]
    fn as_mut_slice(&self) -> &mut [u8] {
        // SAFETY: caller holds `self.lock` in exclusive mode, so no other
        // reference to this range exists.
        unsafe {
            match &mut *self.backing.get() {
                Backing::Pooled(v) => v.as_mut_slice(),
                Backing::Mapped(ptr) => std::slice::from_raw_parts_mut(*ptr, self.len),
            }
        }
    }

    /// Reads `buf.len()` bytes starting at `offset`. Fails with
    /// [`Error::ShortCopy`] rather than returning less than requested.
    pub fn read_bytes(&self, offset: usize, buf: &mut [u8]) -> Result<()> {
        let _guard = self.lock.acquire_shared();
        let data = self.as_slice();
        let mut reader = RegionReader::at(data, offset)?;
        let mut writer = RegionWriter::new(buf);
        let copied = reader.copy_into(&mut writer);
        if copied < buf.len() {
            return Err(Error::ShortCopy { requested: buf.len(), copied });
        }
        Ok(())
    }

    /// Writes `buf` starting at `offset`. Fails with [`Error::ShortCopy`]
    /// rather than writing less than `buf.len()` bytes.
    pub fn write_bytes(&self, offset: usize, buf: &[u8]) -> Result<()> {
        let _guard = self.lock.acquire_exclusive();
        let data = self.as_mut_slice();
        let mut reader = RegionReader::at(buf, 0)?;
        let mut writer = RegionWriter::at(data, offset)?;
        let copied = reader.copy_into(&mut writer);
        if copied < buf.len() {
            return Err(Error::ShortCopy { requested: buf.len(), copied });
        }
        Ok(())
    }
}

/// A cursor over a contiguous, borrowed byte range, tracking how much is
/// left to read. Mirrors `VmReader`'s `cursor`/`end`/`remain` shape.
pub struct RegionReader<'a> {
    cursor: *const u8,
    end: *const u8,
    _marker: PhantomData<&'a [u8]>,
}

impl<'a> RegionReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        // `at` with offset 0 never fails.
        Self::at(data, 0).unwrap()
    }

    pub fn at(data: &'a [u8], offset: usize) -> Result<Self> {
        if offset > data.len() {
            return Err(Error::OutOfBounds { offset, len: 0, region_len: data.len() });
        }
        let ptr = data.as_ptr();
        // SAFETY: `offset <= data.len()`, so both pointers stay in bounds
        // (one-past-the-end is allowed for `end`).
        unsafe {
            Ok(Self {
                cursor: ptr.add(offset),
                end: ptr.add(data.len()),
                _marker: PhantomData,
            })
        }
    }

    pub fn remain(&self) -> usize {
        // SAFETY: `end` is always at or past `cursor`.
        unsafe { self.end.offset_from(self.cursor) as usize }
    }

    pub fn has_remain(&self) -> bool {
        self.remain() > 0
    }

    /// Copies `min(self.remain(), writer.avail())` bytes into `writer`.
    /// Returns the number of bytes actually copied: the partial-copy
    /// accounting that lets a caller distinguish "nothing left to copy"
    /// from "the destination was already full".
    pub fn copy_into(&mut self, writer: &mut RegionWriter<'_>) -> usize {
        let n = self.remain().min(writer.avail());
        if n == 0 {
            return 0;
        }
        // SAFETY: `n` is bounded by both the reader's remaining bytes and
        // the writer's available space, and the two ranges are disjoint
        // since they come from distinct borrows.
        unsafe {
            std::ptr::copy_nonoverlapping(self.cursor, writer.cursor, n);
            self.cursor = self.cursor.add(n);
            writer.cursor = writer.cursor.add(n);
        }
        n
    }
}

/// A cursor over a contiguous, borrowed mutable byte range. Mirrors
/// `VmWriter`'s `cursor`/`end`/`avail` shape.
pub struct RegionWriter<'a> {
    cursor: *mut u8,
    end: *mut u8,
    _marker: PhantomData<&'a mut [u8]>,
}

impl<'a> RegionWriter<'a> {
    pub fn new(data: &'a mut [u8]) -> Self {
        Self::at(data, 0).unwrap()
    }

    pub fn at(data: &'a mut [u8], offset: usize) -> Result<Self> {
        if offset > data.len() {
            return Err(Error::OutOfBounds { offset, len: 0, region_len: data.len() });
        }
        let ptr = data.as_mut_ptr();
        // SAFETY: see `RegionReader::at`.
        unsafe {
            Ok(Self {
                cursor: ptr.add(offset),
                end: ptr.add(data.len()),
                _marker: PhantomData,
            })
        }
    }

    pub fn avail(&self) -> usize {
        // SAFETY: `end` is always at or past `cursor`.
        unsafe { self.end.offset_from(self.cursor) as usize }
    }

    pub fn has_avail(&self) -> bool {
        self.avail() > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_write_then_read() {
        let region = Region::pooled(16);
        region.write_bytes(4, b"abcd").unwrap();
        let mut buf = [0u8; 4];
        region.read_bytes(4, &mut buf).unwrap();
        assert_eq!(&buf, b"abcd");
    }

    #[test]
    fn out_of_bounds_offset_is_rejected() {
        let region = Region::pooled(8);
        let mut buf = [0u8; 4];
        assert_eq!(
            region.read_bytes(9, &mut buf),
            Err(Error::OutOfBounds { offset: 9, len: 0, region_len: 8 })
        );
    }

    #[test]
    fn short_copy_is_reported() {
        let region = Region::pooled(8);
        let mut buf = [0u8; 4];
        // Offset 6 leaves only 2 bytes remaining for a 4-byte read.
        let err = region.read_bytes(6, &mut buf).unwrap_err();
        assert_eq!(err, Error::ShortCopy { requested: 4, copied: 2 });
    }

    #[test]
    fn concurrent_readers_see_consistent_data() {
        use std::sync::Arc;
        use std::thread;

        let region = Arc::new(Region::pooled(4));
        region.write_bytes(0, b"wxyz").unwrap();

        let mut threads = Vec::new();
        for _ in 0..4 {
            let region = Arc::clone(&region);
            threads.push(thread::spawn(move || {
                let mut buf = [0u8; 4];
                region.read_bytes(0, &mut buf).unwrap();
                assert_eq!(&buf, b"wxyz");
            }));
        }
        for t in threads {
            t.join().unwrap();
        }
    }
}
