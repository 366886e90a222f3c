//! # Frame Descriptor Table
//!
//! One [`FrameDescriptor`] per 4 KiB frame of physical memory, indexed by
//! frame number. Free frames are threaded into a LIFO list through the
//! descriptors' `next_free` links, so allocation and release are O(1) and
//! need no memory beyond the table itself.
//!
//! ## Invariants
//!
//! - A frame is on the free list iff its reference count is zero and it is not
//!   permanently reserved: frame 0, the I/O hole `[IOPHYSMEM, EXTPHYSMEM)`,
//!   and everything the boot allocator handed out.
//! - `next_free` is `None` for every allocated frame.
//! - A descriptor's `free` flag is set exactly while the frame is linked into
//!   the free list, detached or not.
//! - The free list is acyclic and visits at most `frame_count` frames.

use core::fmt;
use kernel_info::memory::{EXTPHYSMEM, IOPHYSMEM, PGSHIFT};
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K};
use kernel_vmem::{AddressError, FrameAlloc, PhysMapper};
use log::debug;

/// Index of a 4 KiB physical frame.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[repr(transparent)]
pub struct FrameNumber(u32);

impl FrameNumber {
    #[inline]
    #[must_use]
    pub const fn new(n: u32) -> Self {
        Self(n)
    }

    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// First physical address of the frame.
    #[inline]
    #[must_use]
    pub const fn base(self) -> PhysicalAddress {
        PhysicalAddress::new(self.0 << PGSHIFT)
    }

    #[inline]
    #[must_use]
    pub const fn page(self) -> PhysicalPage<Size4K> {
        PhysicalPage::from_number(self.0)
    }

    #[inline]
    #[must_use]
    pub const fn containing(pa: PhysicalAddress) -> Self {
        Self(pa.as_u32() >> PGSHIFT)
    }
}

impl From<PhysicalPage<Size4K>> for FrameNumber {
    #[inline]
    fn from(page: PhysicalPage<Size4K>) -> Self {
        Self(page.number())
    }
}

impl fmt::Display for FrameNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "frame {:#x}", self.0)
    }
}

impl fmt::Debug for FrameNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Frame({:#x})", self.0)
    }
}

/// Bookkeeping for one physical frame.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[repr(C)]
pub struct FrameDescriptor {
    /// Next frame on the free list; only meaningful while this one is free.
    next_free: Option<FrameNumber>,
    /// Number of mappings and table links referring to the frame.
    ref_count: u16,
    /// Set while the frame is linked into the free list.
    free: bool,
}

impl FrameDescriptor {
    pub const EMPTY: Self = Self {
        next_free: None,
        ref_count: 0,
        free: false,
    };

    #[inline]
    #[must_use]
    pub const fn next_free(&self) -> Option<FrameNumber> {
        self.next_free
    }

    #[inline]
    #[must_use]
    pub const fn ref_count(&self) -> u16 {
        self.ref_count
    }

    #[inline]
    #[must_use]
    pub const fn is_free(&self) -> bool {
        self.free
    }
}

/// A free list taken off a [`FrameTable`] by [`FrameTable::detach_free_list`].
#[derive(Debug)]
#[must_use = "dropping a detached free list leaks its frames"]
pub struct DetachedFreeList {
    head: Option<FrameNumber>,
    count: u32,
}

/// The frame descriptor table together with the head of the free list.
pub struct FrameTable<'m> {
    descriptors: &'m mut [FrameDescriptor],
    free_head: Option<FrameNumber>,
    free_count: u32,
}

impl<'m> FrameTable<'m> {
    /// Take over `descriptors`, one per frame, resetting every entry.
    ///
    /// The free list starts empty; see [`initialize_free_list`](Self::initialize_free_list).
    pub fn new(descriptors: &'m mut [FrameDescriptor]) -> Self {
        assert!(u32::try_from(descriptors.len()).is_ok(), "too many frames");
        descriptors.fill(FrameDescriptor::EMPTY);
        Self {
            descriptors,
            free_head: None,
            free_count: 0,
        }
    }

    /// Build the table in physical memory at `base`.
    ///
    /// # Safety
    /// `[base, base + frame_count * size_of::<FrameDescriptor>())` must be
    /// memory reachable through `mapper`, suitably aligned, used for nothing
    /// else, and must stay valid for `'m`.
    pub unsafe fn from_physical<M: PhysMapper>(
        mapper: &M,
        base: PhysicalAddress,
        frame_count: u32,
    ) -> Self {
        let ptr = mapper.phys_to_ptr(base).cast::<FrameDescriptor>();
        let len = frame_count as usize;
        for i in 0..len {
            unsafe { ptr.add(i).write(FrameDescriptor::EMPTY) };
        }
        let descriptors = unsafe { core::slice::from_raw_parts_mut(ptr, len) };
        Self::new(descriptors)
    }

    /// Number of frames described by the table.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn frame_count(&self) -> u32 {
        self.descriptors.len() as u32
    }

    /// Put every frame that is not permanently reserved on the free list.
    ///
    /// `boot_cursor` is the first address the boot allocator never handed out;
    /// everything in `[EXTPHYSMEM, boot_cursor)` is kernel image or boot data.
    /// Runs once, after the last boot allocation.
    pub fn initialize_free_list(&mut self, boot_cursor: PhysicalAddress) {
        let io_hole = (IOPHYSMEM >> PGSHIFT)..(EXTPHYSMEM >> PGSHIFT);
        let boot_data = (EXTPHYSMEM >> PGSHIFT)..boot_cursor.as_u32().div_ceil(1 << PGSHIFT);

        for n in 1..self.frame_count() {
            if io_hole.contains(&n) || boot_data.contains(&n) {
                continue;
            }
            self.push(FrameNumber(n));
        }

        debug!(
            "Free list holds {} of {} frames (boot data ends at {boot_cursor})",
            self.free_count,
            self.frame_count()
        );
    }

    /// Take a frame off the free list, filling it with zeroes if `zero` is set.
    ///
    /// The frame's reference count is left alone; whoever maps it increments
    /// it. `None` means out of memory.
    pub fn allocate<M: PhysMapper>(&mut self, mapper: &M, zero: bool) -> Option<FrameNumber> {
        let frame = self.pop()?;
        if zero {
            unsafe { mapper.zero_frame(frame.page()) };
        }
        Some(frame)
    }

    /// Return a frame to the free list.
    ///
    /// # Panics
    /// If the frame is still referenced or already linked into the list.
    pub fn free(&mut self, frame: FrameNumber) {
        let desc = &self.descriptors[frame.as_usize()];
        assert_eq!(desc.ref_count, 0, "freeing {frame} while it is referenced");
        assert!(!desc.free, "freeing {frame} twice");
        self.push(frame);
    }

    /// Drop one reference; frees the frame when none remain.
    ///
    /// Returns whether the frame went back on the free list.
    pub fn decrement_and_maybe_free(&mut self, frame: FrameNumber) -> bool {
        let desc = &mut self.descriptors[frame.as_usize()];
        assert!(desc.ref_count > 0, "{frame} has no references to drop");
        desc.ref_count -= 1;
        if desc.ref_count == 0 {
            self.free(frame);
            true
        } else {
            false
        }
    }

    pub fn increment(&mut self, frame: FrameNumber) {
        let desc = &mut self.descriptors[frame.as_usize()];
        assert!(desc.ref_count < u16::MAX, "{frame} has too many references");
        desc.ref_count += 1;
    }

    /// Forget all references to `frame` without freeing it.
    pub fn clear_references(&mut self, frame: FrameNumber) {
        self.descriptors[frame.as_usize()].ref_count = 0;
    }

    #[inline]
    #[must_use]
    pub fn ref_count(&self, frame: FrameNumber) -> u16 {
        self.descriptors[frame.as_usize()].ref_count
    }

    #[inline]
    #[must_use]
    pub fn descriptor(&self, frame: FrameNumber) -> &FrameDescriptor {
        &self.descriptors[frame.as_usize()]
    }

    #[inline]
    #[must_use]
    pub const fn free_count(&self) -> u32 {
        self.free_count
    }

    /// Head of the free list, the frame [`allocate`](Self::allocate) hands out next.
    #[inline]
    #[must_use]
    pub const fn free_head(&self) -> Option<FrameNumber> {
        self.free_head
    }

    /// Walk the free list from its head.
    ///
    /// Follows links as stored; a corrupted list may repeat frames.
    pub fn free_frames(&self) -> impl Iterator<Item = FrameNumber> + '_ {
        core::iter::successors(self.free_head, move |f| self.descriptors[f.as_usize()].next_free)
    }

    /// Whether `frame` is linked into the free list, including one taken off
    /// by [`detach_free_list`](Self::detach_free_list).
    #[inline]
    #[must_use]
    pub fn is_free(&self, frame: FrameNumber) -> bool {
        self.descriptors[frame.as_usize()].free
    }

    /// Frame containing `pa`.
    ///
    /// # Errors
    /// [`AddressError::BeyondPhysicalMemory`] if `pa` lies past the last frame.
    pub const fn frame_at(&self, pa: PhysicalAddress) -> Result<FrameNumber, AddressError> {
        let frame = FrameNumber::containing(pa);
        if frame.0 >= self.frame_count() {
            return Err(AddressError::BeyondPhysicalMemory {
                pa,
                frame_count: self.frame_count(),
            });
        }
        Ok(frame)
    }

    /// Take the whole free list away, leaving the table out of memory.
    pub const fn detach_free_list(&mut self) -> DetachedFreeList {
        let detached = DetachedFreeList {
            head: self.free_head,
            count: self.free_count,
        };
        self.free_head = None;
        self.free_count = 0;
        detached
    }

    /// Put back a list taken by [`detach_free_list`](Self::detach_free_list).
    ///
    /// # Panics
    /// If frames were freed in the meantime; they would be lost.
    pub fn reattach_free_list(&mut self, list: DetachedFreeList) {
        assert!(
            self.free_head.is_none(),
            "reattaching the free list over {} free frames",
            self.free_count
        );
        self.free_head = list.head;
        self.free_count = list.count;
    }

    /// Reorder the free list so that frames below `limit` come first.
    ///
    /// The relative order within both groups is kept.
    pub fn prioritize_below(&mut self, limit: FrameNumber) {
        let mut low: (Option<FrameNumber>, Option<FrameNumber>) = (None, None);
        let mut high: (Option<FrameNumber>, Option<FrameNumber>) = (None, None);

        let mut cursor = self.free_head;
        while let Some(frame) = cursor {
            cursor = self.descriptors[frame.as_usize()].next_free.take();
            let list = if frame < limit { &mut low } else { &mut high };
            match list.1 {
                Some(tail) => self.descriptors[tail.as_usize()].next_free = Some(frame),
                None => list.0 = Some(frame),
            }
            list.1 = Some(frame);
        }

        self.free_head = match low {
            (Some(head), Some(tail)) => {
                self.descriptors[tail.as_usize()].next_free = high.0;
                Some(head)
            }
            _ => high.0,
        };
    }

    fn push(&mut self, frame: FrameNumber) {
        let desc = &mut self.descriptors[frame.as_usize()];
        desc.next_free = self.free_head;
        desc.free = true;
        self.free_head = Some(frame);
        self.free_count += 1;
    }

    fn pop(&mut self) -> Option<FrameNumber> {
        let frame = self.free_head?;
        let desc = &mut self.descriptors[frame.as_usize()];
        self.free_head = desc.next_free.take();
        desc.free = false;
        self.free_count -= 1;
        Some(frame)
    }
}

/// Page tables come off the free list; the directory link counts as a reference.
impl FrameAlloc for FrameTable<'_> {
    fn alloc_4k(&mut self) -> Option<PhysicalPage<Size4K>> {
        let frame = self.pop()?;
        self.increment(frame);
        Some(frame.page())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phys_mapper::HostedPhysMemory;

    fn table(descriptors: &mut [FrameDescriptor], cursor: u32) -> FrameTable<'_> {
        let mut frames = FrameTable::new(descriptors);
        frames.initialize_free_list(PhysicalAddress::new(cursor));
        frames
    }

    #[test]
    fn reserved_frames_stay_off_the_free_list() {
        let mut descriptors = vec![FrameDescriptor::default(); 1024];
        let frames = table(&mut descriptors, 0x0012_C000);

        assert_eq!(frames.free_count(), 883);
        assert_eq!(frames.free_frames().count(), 883);
        for reserved in [0, 0xA0, 0xFF, 0x100, 0x12B] {
            assert!(!frames.is_free(FrameNumber::new(reserved)), "{reserved:#x}");
        }
        for free in [1, 0x9F, 0x12C, 0x3FF] {
            assert!(frames.is_free(FrameNumber::new(free)), "{free:#x}");
        }
        // Pushed in ascending order, so the highest frame comes out first.
        assert_eq!(frames.free_head(), Some(FrameNumber::new(0x3FF)));
    }

    #[test]
    fn unaligned_boot_cursor_reserves_its_frame() {
        let mut descriptors = vec![FrameDescriptor::default(); 0x200];
        let frames = table(&mut descriptors, 0x0012_0001);
        assert!(!frames.is_free(FrameNumber::new(0x120)));
        assert!(frames.is_free(FrameNumber::new(0x121)));
    }

    #[test]
    fn allocate_and_free_round_trip() {
        let mem = HostedPhysMemory::new(0x200);
        let mut descriptors = vec![FrameDescriptor::default(); 0x200];
        let mut frames = table(&mut descriptors, 0x0010_0000);
        let before = frames.free_count();

        let a = frames.allocate(&mem, false).unwrap();
        let b = frames.allocate(&mem, false).unwrap();
        assert_ne!(a, b);
        assert!(!frames.is_free(a));
        assert_eq!(frames.ref_count(a), 0);
        assert_eq!(frames.free_count(), before - 2);

        frames.free(b);
        frames.free(a);
        assert_eq!(frames.free_count(), before);
        assert_eq!(frames.allocate(&mem, false), Some(a));
    }

    #[test]
    fn allocate_zeroes_on_request() {
        let mem = HostedPhysMemory::new(0x200);
        let mut descriptors = vec![FrameDescriptor::default(); 0x200];
        let mut frames = table(&mut descriptors, 0x0010_0000);

        let frame = frames.allocate(&mem, false).unwrap();
        unsafe { mem.fill_frame(frame.page(), 0x5A) };
        frames.free(frame);

        let again = frames.allocate(&mem, true).unwrap();
        assert_eq!(again, frame);
        let bytes = unsafe { mem.phys_to_mut::<[u8; 4096]>(again.base()) };
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn last_reference_frees() {
        let mut descriptors = vec![FrameDescriptor::default(); 16];
        let mut frames = table(&mut descriptors, 0);
        let frame = frames.alloc_4k().map(FrameNumber::from).unwrap();
        assert_eq!(frames.ref_count(frame), 1);

        frames.increment(frame);
        assert!(!frames.decrement_and_maybe_free(frame));
        assert!(frames.decrement_and_maybe_free(frame));
        assert!(frames.is_free(frame));
    }

    #[test]
    #[should_panic(expected = "while it is referenced")]
    fn freeing_a_referenced_frame_panics() {
        let mut descriptors = vec![FrameDescriptor::default(); 16];
        let mut frames = table(&mut descriptors, 0);
        let frame = frames.alloc_4k().map(FrameNumber::from).unwrap();
        frames.free(frame);
    }

    #[test]
    #[should_panic(expected = "twice")]
    fn freeing_the_list_tail_twice_panics() {
        let mut descriptors = vec![FrameDescriptor::default(); 16];
        let mut frames = table(&mut descriptors, 0);
        // Frame 1 went on first, so it is the tail and has no successor.
        let tail = FrameNumber::new(1);
        assert_eq!(frames.descriptor(tail).next_free(), None);
        assert!(frames.descriptor(tail).is_free());
        frames.free(tail);
    }

    #[test]
    fn descriptors_stay_twelve_bytes() {
        assert_eq!(size_of::<FrameDescriptor>(), 12);
    }

    #[test]
    fn detached_list_simulates_exhaustion() {
        let mem = HostedPhysMemory::new(16);
        let mut descriptors = vec![FrameDescriptor::default(); 16];
        let mut frames = table(&mut descriptors, 0);

        let list = frames.detach_free_list();
        assert_eq!(frames.allocate(&mem, false), None);
        assert_eq!(frames.alloc_4k(), None);

        frames.reattach_free_list(list);
        assert_eq!(frames.free_count(), 15);
        assert!(frames.allocate(&mem, false).is_some());
    }

    #[test]
    fn prioritize_below_keeps_relative_order() {
        let mut descriptors = vec![FrameDescriptor::default(); 8];
        let mut frames = table(&mut descriptors, 0);
        // Free list: 7 6 5 4 3 2 1
        frames.prioritize_below(FrameNumber::new(4));

        let order: Vec<u32> = frames.free_frames().map(FrameNumber::as_u32).collect();
        assert_eq!(order, [3, 2, 1, 7, 6, 5, 4]);
        assert_eq!(frames.free_count(), 7);
    }

    #[test]
    fn frame_at_rejects_addresses_past_memory() {
        let mut descriptors = vec![FrameDescriptor::default(); 16];
        let frames = FrameTable::new(&mut descriptors);
        assert_eq!(frames.frame_at(PhysicalAddress::new(0xF123)), Ok(FrameNumber::new(0xF)));
        assert!(frames.frame_at(PhysicalAddress::new(0x1_0000)).is_err());
        assert_eq!(FrameNumber::new(0xF).base().as_u32(), 0xF000);
    }
}
