//! 用户地址空间

use core::fmt;

use crate::address::{PageNum, Ppn, Vaddr, Vpn, VpnRange};
use crate::config::{PAGE_SIZE, TRAMPOLINE};
use crate::frame_allocator::{FrameAllocator, FrameUse, frame_bytes};
use crate::page_table::{PageTable, PageTableEntry, PagingError, PagingResult, PteFlags};

/// `[from, to)` 两端向上取整后覆盖的页
fn pages_between(from: usize, to: usize) -> VpnRange {
    VpnRange::new(
        Vpn::from_addr_ceil(Vaddr(from)),
        Vpn::from_addr_ceil(Vaddr(to)),
    )
}

/// 一个进程的用户地址空间
///
/// 页表加上进程大小 `size`：`[0, size)` 内的每一页都已映射，其余均未映射。
/// 地址空间必须通过 [`destroy`](Self::destroy) 显式销毁。
pub struct MemorySpace<'a> {
    page_table: PageTable<'a>,
    size: usize,
}

impl<'a> MemorySpace<'a> {
    /// 创建空的地址空间：只有一个清零的根节点，大小为 0
    pub fn new(frames: &'a FrameAllocator) -> PagingResult<Self> {
        let page_table = PageTable::new(frames)?;
        log::debug!(
            "memory_space: new space, root {:#x}",
            page_table.root_ppn().start_addr()
        );
        Ok(MemorySpace {
            page_table,
            size: 0,
        })
    }

    /// 页表
    pub fn page_table(&self) -> &PageTable<'a> {
        &self.page_table
    }

    /// 页表（可变）
    pub fn page_table_mut(&mut self) -> &mut PageTable<'a> {
        &mut self.page_table
    }

    /// 进程大小（字节）
    pub fn size(&self) -> usize {
        self.size
    }

    /// 根节点的物理页号
    pub fn root_ppn(&self) -> Ppn {
        self.page_table.root_ppn()
    }

    /// 写入 satp 的值
    pub fn token(&self) -> usize {
        self.page_table.token()
    }

    /// 装入第一个进程：在虚拟地址 0 映射一页清零的用户页并拷入 `image`。
    ///
    /// 成功后大小为一页。
    ///
    /// # Errors
    /// - `image` 超过一页：[`PagingError::ImageTooLarge`]
    /// - 帧耗尽：[`PagingError::FrameAllocFailed`]
    pub fn seed_first_process(&mut self, image: &[u8]) -> PagingResult<()> {
        if image.len() > PAGE_SIZE {
            return Err(PagingError::ImageTooLarge);
        }
        let mut page = self
            .page_table
            .frames()
            .alloc_zeroed(FrameUse::UserPage)
            .ok_or(PagingError::FrameAllocFailed)?;
        page.as_bytes_mut()[..image.len()].copy_from_slice(image);
        self.page_table
            .map_range(Vaddr(0), PAGE_SIZE, page.paddr(), PteFlags::user_rwx())?;
        page.leak();
        self.size = PAGE_SIZE;
        Ok(())
    }

    /// 把地址空间扩展到 `new_size`，返回新的大小。
    ///
    /// 新增的每一页都是清零的 `R|W|X|U` 页。`new_size` 不大于当前大小时直接返回当前大小。
    /// 操作是原子的：中途失败时本次新增的页全部解除映射并释放，大小不变。
    ///
    /// # Errors
    /// - 帧耗尽：[`PagingError::FrameAllocFailed`]
    /// - `new_size` 越过跳板页：[`PagingError::InvalidAddress`]
    pub fn grow(&mut self, new_size: usize) -> PagingResult<usize> {
        if new_size <= self.size {
            return Ok(self.size);
        }
        if new_size > TRAMPOLINE {
            return Err(PagingError::InvalidAddress);
        }

        let pages = pages_between(self.size, new_size);
        let mut mapped = 0;
        for vpn in pages {
            if let Err(err) = self.map_fresh_page(vpn.start_addr()) {
                log::warn!(
                    "memory_space: grow {:#x} -> {:#x} failed ({}), rolling back {} pages",
                    self.size,
                    new_size,
                    err,
                    mapped
                );
                self.page_table
                    .unmap_range(pages.start.start_addr(), mapped, true);
                return Err(err);
            }
            mapped += 1;
        }
        self.size = new_size;
        Ok(new_size)
    }

    fn map_fresh_page(&mut self, va: Vaddr) -> PagingResult<()> {
        let page = self
            .page_table
            .frames()
            .alloc_zeroed(FrameUse::UserPage)
            .ok_or(PagingError::FrameAllocFailed)?;
        self.page_table
            .map_range(va, PAGE_SIZE, page.paddr(), PteFlags::user_rwx())?;
        page.leak();
        Ok(())
    }

    /// 把地址空间收缩到 `new_size`，返回新的大小；`new_size` 不小于当前大小时不做任何事。
    ///
    /// 被移除的页立即释放。
    pub fn shrink(&mut self, new_size: usize) -> usize {
        if new_size >= self.size {
            return self.size;
        }
        let pages = pages_between(new_size, self.size);
        if !pages.is_empty() {
            self.page_table
                .unmap_range(pages.start.start_addr(), pages.len(), true);
        }
        self.size = new_size;
        new_size
    }

    /// 把本空间 `[0, size)` 的内容复制到空的 `dest` 中：每页一个新帧，权限相同。
    ///
    /// 中途失败时，已装入 `dest` 的页全部解除映射并释放；本空间不会被修改。
    ///
    /// # Panics
    /// 本空间 `[0, size)` 内有未映射的页
    pub fn duplicate_into(&self, dest: &mut MemorySpace<'_>) -> PagingResult<()> {
        let pages = VpnRange::covering(Vaddr(0), Vaddr(self.size));
        let mut copied = 0;
        for vpn in pages {
            let va = vpn.start_addr();
            let Some(src) = self.page_table.leaf(va) else {
                panic!("memory_space: duplicate: page {:#x} not present", va);
            };
            if let Err(err) = dest.install_copy(va, src) {
                log::warn!(
                    "memory_space: duplicate failed at {:#x} ({}), dropping {} pages",
                    va,
                    err,
                    copied
                );
                dest.page_table.unmap_range(Vaddr(0), copied, true);
                return Err(err);
            }
            copied += 1;
        }
        dest.size = self.size;
        Ok(())
    }

    fn install_copy(&mut self, va: Vaddr, src: PageTableEntry) -> PagingResult<()> {
        let mut page = self
            .page_table
            .frames()
            .alloc_for(FrameUse::UserPage)
            .ok_or(PagingError::FrameAllocFailed)?;
        // SAFETY: 源帧由源页表的叶子持有，复制期间只读
        let bytes = unsafe { frame_bytes(src.ppn()) };
        page.as_bytes_mut().copy_from_slice(bytes);
        let perm = src.flags() - PteFlags::V;
        self.page_table.map_range(va, PAGE_SIZE, page.paddr(), perm)?;
        page.leak();
        Ok(())
    }

    /// 创建一个新地址空间并复制本空间（fork）
    pub fn duplicate(&self) -> PagingResult<MemorySpace<'a>> {
        let mut child = MemorySpace::new(self.page_table.frames())?;
        if let Err(err) = self.duplicate_into(&mut child) {
            child.destroy();
            return Err(err);
        }
        Ok(child)
    }

    /// 把本空间 `[from, to)` 的用户页镜像到进程私有的内核页表中，清除 U 位并共享物理帧。
    ///
    /// 两端向上取整到页。操作是原子的：失败时本次装入的镜像全部移除。
    /// 镜像页被释放（`shrink`/`destroy`）之前必须先调用 [`unmirror_from`](Self::unmirror_from)。
    ///
    /// # Panics
    /// 本空间在范围内有未映射的页，或内核页表中对应位置已有映射
    pub fn mirror_into(
        &self,
        kernel: &mut PageTable<'_>,
        from: usize,
        to: usize,
    ) -> PagingResult<()> {
        let pages = pages_between(from, to);
        let mut mirrored = 0;
        for vpn in pages {
            let va = vpn.start_addr();
            let Some(src) = self.page_table.leaf(va) else {
                panic!("memory_space: mirror: page {:#x} not present", va);
            };
            let perm = src.flags() - (PteFlags::U | PteFlags::V);
            if let Err(err) = kernel.map_range(va, PAGE_SIZE, src.paddr(), perm) {
                log::warn!("memory_space: mirror failed at {:#x} ({})", va, err);
                kernel.unmap_range(pages.start.start_addr(), mirrored, false);
                return Err(err);
            }
            mirrored += 1;
        }
        Ok(())
    }

    /// 从内核页表中移除 `[from, to)` 的镜像，不释放物理帧
    pub fn unmirror_from(&self, kernel: &mut PageTable<'_>, from: usize, to: usize) {
        let pages = pages_between(from, to);
        if !pages.is_empty() {
            kernel.unmap_range(pages.start.start_addr(), pages.len(), false);
        }
    }

    /// 解除并释放 `[0, size)` 内的所有页，然后释放全部页表节点
    pub fn destroy(self) {
        let MemorySpace {
            mut page_table,
            size,
        } = self;
        let pages = VpnRange::covering(Vaddr(0), Vaddr(size));
        if !pages.is_empty() {
            page_table.unmap_range(Vaddr(0), pages.len(), true);
        }
        page_table.destroy();
    }
}

impl fmt::Debug for MemorySpace<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemorySpace")
            .field("root", &format_args!("{:#x}", self.root_ppn().start_addr()))
            .field("size", &format_args!("{:#x}", self.size))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_space::new_kernel_table;
    use crate::test_utils::TestMachine;

    fn user_bytes(space: &MemorySpace<'_>, va: usize) -> &'static mut [u8] {
        let pa = space.page_table().translate(Vaddr(va)).unwrap();
        unsafe { frame_bytes(Ppn::from_addr_floor(pa)) }
    }

    #[test]
    fn test_seed_first_process() {
        let machine = TestMachine::new(16);
        let frames = machine.frames();
        let mut space = MemorySpace::new(frames).unwrap();
        let image = [0x13u8, 0x05, 0x00, 0x00, 0x73];
        space.seed_first_process(&image).unwrap();

        assert_eq!(space.size(), PAGE_SIZE);
        let page = user_bytes(&space, 0);
        assert_eq!(&page[..image.len()], &image);
        assert!(page[image.len()..].iter().all(|&b| b == 0));
        let pte = space.page_table().leaf(Vaddr(0)).unwrap();
        assert_eq!(pte.flags() - PteFlags::V, PteFlags::user_rwx());

        space.destroy();
        assert_eq!(frames.free_frames(), 16);
    }

    #[test]
    fn test_seed_image_size_limit() {
        let machine = TestMachine::new(16);
        let mut space = MemorySpace::new(machine.frames()).unwrap();
        let big = [0u8; PAGE_SIZE + 1];
        assert_eq!(space.seed_first_process(&big), Err(PagingError::ImageTooLarge));
        assert_eq!(space.size(), 0);

        let exact = [7u8; PAGE_SIZE];
        space.seed_first_process(&exact).unwrap();
        assert_eq!(user_bytes(&space, 0)[PAGE_SIZE - 1], 7);
        space.destroy();
    }

    #[test]
    fn test_grow_maps_zeroed_pages() {
        let machine = TestMachine::new(16);
        let frames = machine.frames();
        let mut space = MemorySpace::new(frames).unwrap();

        assert_eq!(space.grow(10000), Ok(10000));
        assert_eq!(space.size(), 10000);
        for va in [0x0, 0x1000, 0x2000] {
            assert!(space.page_table().translate(Vaddr(va)).is_some());
            assert!(user_bytes(&space, va).iter().all(|&b| b == 0));
        }
        assert_eq!(space.page_table().translate(Vaddr(0x3000)), None);

        // 不足一页的增长落在已映射的最后一页中
        assert_eq!(space.grow(12000), Ok(12000));
        assert_eq!(space.page_table().translate(Vaddr(0x3000)), None);
        assert_eq!(space.grow(100), Ok(12000));

        space.destroy();
        assert_eq!(frames.free_frames(), 16);
    }

    #[test]
    fn test_grow_rolls_back_on_exhaustion() {
        let machine = TestMachine::new(16);
        let frames = machine.frames();
        let mut space = MemorySpace::new(frames).unwrap();
        space.seed_first_process(&[1, 2, 3]).unwrap();

        let mut drained = alloc::vec::Vec::new();
        while let Some(frame) = frames.alloc() {
            drained.push(frame);
        }
        drop(drained.pop());
        assert_eq!(frames.free_frames(), 1);

        assert_eq!(space.grow(3 * PAGE_SIZE), Err(PagingError::FrameAllocFailed));
        assert_eq!(space.size(), PAGE_SIZE);
        assert_eq!(space.page_table().translate(Vaddr(0x1000)), None);
        assert_eq!(space.page_table().translate(Vaddr(0x2000)), None);
        assert_eq!(frames.free_frames(), 1);

        drop(drained);
        space.destroy();
        assert_eq!(frames.free_frames(), 16);
    }

    #[test]
    fn test_grow_past_trampoline_is_rejected() {
        let machine = TestMachine::new(4);
        let mut space = MemorySpace::new(machine.frames()).unwrap();
        assert_eq!(space.grow(TRAMPOLINE + 1), Err(PagingError::InvalidAddress));
        assert_eq!(space.size(), 0);
        space.destroy();
    }

    #[test]
    fn test_shrink_releases_whole_pages_only() {
        let machine = TestMachine::new(16);
        let frames = machine.frames();
        let mut space = MemorySpace::new(frames).unwrap();
        space.grow(4 * PAGE_SIZE).unwrap();
        let before = frames.free_frames();

        assert_eq!(space.shrink(5 * PAGE_SIZE), 4 * PAGE_SIZE);
        assert_eq!(space.shrink(PAGE_SIZE + 1), PAGE_SIZE + 1);
        assert_eq!(frames.free_frames(), before + 2);
        assert!(space.page_table().translate(Vaddr(0x1000)).is_some());
        assert_eq!(space.page_table().translate(Vaddr(0x2000)), None);

        assert_eq!(space.shrink(0), 0);
        assert_eq!(space.page_table().translate(Vaddr(0)), None);
        space.destroy();
        assert_eq!(frames.free_frames(), 16);
    }

    #[test]
    fn test_duplicate_copies_bytes_into_fresh_frames() {
        let machine = TestMachine::new(32);
        let frames = machine.frames();
        let mut parent = MemorySpace::new(frames).unwrap();
        parent.grow(2 * PAGE_SIZE).unwrap();
        user_bytes(&parent, 0)[10] = 0xAB;
        user_bytes(&parent, 0x1000)[20] = 0xCD;

        let child = parent.duplicate().unwrap();
        assert_eq!(child.size(), parent.size());
        for va in [0x0, 0x1000] {
            let p = parent.page_table().translate(Vaddr(va)).unwrap();
            let c = child.page_table().translate(Vaddr(va)).unwrap();
            assert_ne!(p, c);
            assert_eq!(
                parent.page_table().leaf(Vaddr(va)).unwrap().flags(),
                child.page_table().leaf(Vaddr(va)).unwrap().flags()
            );
        }
        assert_eq!(user_bytes(&child, 0)[10], 0xAB);
        assert_eq!(user_bytes(&child, 0x1000)[20], 0xCD);

        user_bytes(&child, 0)[10] = 0;
        assert_eq!(user_bytes(&parent, 0)[10], 0xAB);

        child.destroy();
        parent.destroy();
        assert_eq!(frames.free_frames(), 32);
    }

    #[test]
    fn test_duplicate_rolls_back_destination() {
        let machine = TestMachine::new(16);
        let frames = machine.frames();
        let mut parent = MemorySpace::new(frames).unwrap();
        parent.grow(3 * PAGE_SIZE).unwrap();
        user_bytes(&parent, 0x2000)[0] = 9;

        let mut child = MemorySpace::new(frames).unwrap();
        let mut drained = alloc::vec::Vec::new();
        while let Some(frame) = frames.alloc() {
            drained.push(frame);
        }
        // 子空间需要 L1、L0 两个节点加三页，只给四帧
        for _ in 0..4 {
            drop(drained.pop());
        }

        assert_eq!(
            parent.duplicate_into(&mut child),
            Err(PagingError::FrameAllocFailed)
        );
        assert_eq!(child.size(), 0);
        for va in [0x0, 0x1000, 0x2000] {
            assert_eq!(child.page_table().translate(Vaddr(va)), None);
        }
        assert_eq!(parent.size(), 3 * PAGE_SIZE);
        assert_eq!(user_bytes(&parent, 0x2000)[0], 9);

        drop(drained);
        child.destroy();
        parent.destroy();
        assert_eq!(frames.free_frames(), 16);
    }

    #[test]
    #[should_panic(expected = "not present")]
    fn test_duplicate_missing_source_page_is_fatal() {
        let machine = TestMachine::new(16);
        let frames = machine.frames();
        let mut parent = MemorySpace::new(frames).unwrap();
        parent.grow(2 * PAGE_SIZE).unwrap();
        parent.page_table_mut().unmap_range(Vaddr(0x1000), 1, true);
        let _ = parent.duplicate();
    }

    #[test]
    fn test_destroy_returns_every_frame() {
        let machine = TestMachine::new(32);
        let frames = machine.frames();
        let mut space = MemorySpace::new(frames).unwrap();
        space.seed_first_process(b"init").unwrap();
        space.grow(5 * PAGE_SIZE + 17).unwrap();
        space.shrink(2 * PAGE_SIZE);
        space.destroy();
        assert_eq!(frames.free_frames(), 32);
    }

    #[test]
    fn test_mirror_shares_frames_without_user_bit() {
        let machine = TestMachine::new(64);
        let frames = machine.frames();
        let mut space = MemorySpace::new(frames).unwrap();
        space.grow(2 * PAGE_SIZE).unwrap();
        let mut kernel = new_kernel_table(frames).unwrap();

        space.mirror_into(&mut kernel, 0, space.size()).unwrap();
        for va in [0x0, 0x1000] {
            let user_pa = space.page_table().translate(Vaddr(va)).unwrap();
            assert_eq!(kernel.translate_kernel(Vaddr(va)), Some(user_pa));
            assert_eq!(kernel.translate(Vaddr(va)), None);
        }

        space.unmirror_from(&mut kernel, PAGE_SIZE, space.size());
        assert_eq!(kernel.translate_kernel(Vaddr(0x1000)), None);
        assert!(kernel.translate_kernel(Vaddr(0)).is_some());
        space.unmirror_from(&mut kernel, 0, PAGE_SIZE);

        kernel.release_shared();
        space.destroy();
        assert_eq!(frames.free_frames(), 64);
    }
}
