//! Sv39 三级页表
//!
//! 虚拟地址拆分为三段 9 位索引和 12 位页内偏移：
//!
//! ```text
//!  38        30 29        21 20        12 11           0
//! +------------+------------+------------+--------------+
//! |  L2 index  |  L1 index  |  L0 index  |    offset    |
//! +------------+------------+------------+--------------+
//! ```
//!
//! 页表节点占一整帧，由创建页表时注入的 [`FrameAllocator`] 分配，
//! 以 [`FrameUse::TableNode`] 标记。节点只在完全初始化（清零）后才被挂进树中，
//! 树只会向下生长，因此递归销毁不存在环。
//!
//! ## 并发
//!
//! 页表本身不加锁：同一时刻只允许一个核修改同一棵页表，
//! 通常是正在执行该进程内核态代码的核。

use core::fmt;

use super::{PageTableEntry, PagingError, PagingResult, PteFlags};
use crate::address::{
    AlignOps, ConvertablePaddr, Paddr, PageNum, Ppn, UsizeConvert, Vaddr, Vpn, VpnRange,
};
use crate::arch_ops::arch_ops;
use crate::config::{MAX_VA, PAGE_SIZE, PAGE_TABLE_LEVELS, PTES_PER_TABLE};
use crate::frame_allocator::{FrameAllocator, FrameUse};

/// satp 的 MODE 字段：Sv39
const SATP_SV39: usize = 8 << 60;

/// 以表项数组的形式访问一个页表节点
///
/// # Safety
/// `ppn` 必须是一个页表节点帧，并且调用者遵守“单核修改”约定。
unsafe fn node<'n>(ppn: Ppn) -> &'n mut [PageTableEntry; PTES_PER_TABLE] {
    let ptr = ppn
        .start_addr()
        .to_vaddr()
        .as_mut_ptr::<[PageTableEntry; PTES_PER_TABLE]>();
    unsafe { &mut *ptr }
}

/// 一棵 Sv39 页表
pub struct PageTable<'a> {
    root: Ppn,
    frames: &'a FrameAllocator,
}

impl<'a> PageTable<'a> {
    /// 分配并清零根节点
    pub fn new(frames: &'a FrameAllocator) -> PagingResult<Self> {
        let root = frames
            .alloc_zeroed(FrameUse::TableNode)
            .ok_or(PagingError::FrameAllocFailed)?
            .leak();
        Ok(PageTable { root, frames })
    }

    /// 根节点的物理页号
    pub fn root_ppn(&self) -> Ppn {
        self.root
    }

    /// 为节点与数据页提供帧的分配器
    pub fn frames(&self) -> &'a FrameAllocator {
        self.frames
    }

    /// 写入 satp 的值
    pub fn token(&self) -> usize {
        SATP_SV39 | self.root.as_usize()
    }

    /// 切换到此页表并刷新 TLB
    ///
    /// # Safety
    /// 此页表必须映射了当前执行的内核代码与栈。
    pub unsafe fn activate(&self) {
        unsafe { arch_ops().activate(self.token()) };
        arch_ops().flush_tlb_all();
    }

    /// 返回 `va` 对应的最后一级表项。
    ///
    /// `alloc` 为真时，沿途缺失的中间节点会被分配、清零并挂入树中。
    ///
    /// # Errors
    /// - 缺少中间节点且不允许分配：[`PagingError::NotMapped`]
    /// - 分配中间节点失败：[`PagingError::FrameAllocFailed`]
    ///
    /// # Panics
    /// `va >= MAX_VA`
    pub fn walk(&mut self, va: Vaddr, alloc: bool) -> PagingResult<&mut PageTableEntry> {
        if va.as_usize() >= MAX_VA {
            panic!("page_table: walk past MAX_VA: {:#x}", va);
        }

        let mut table = self.root;
        for level in (1..PAGE_TABLE_LEVELS).rev() {
            // SAFETY: table 是本树中的节点
            let pte = unsafe { &mut node(table)[va.index(level)] };
            if pte.is_valid() {
                debug_assert!(pte.is_table(), "page_table: huge page at {:#x}", va);
                table = pte.ppn();
                continue;
            }
            if !alloc {
                return Err(PagingError::NotMapped);
            }
            let child = self
                .frames
                .alloc_zeroed(FrameUse::TableNode)
                .ok_or(PagingError::FrameAllocFailed)?
                .leak();
            *pte = PageTableEntry::new_table(child);
            table = child;
        }

        // SAFETY: 同上
        Ok(unsafe { &mut node(table)[va.index(0)] })
    }

    /// 只读遍历；越界或缺少中间节点时返回 `None`
    fn find(&self, va: Vaddr) -> Option<&PageTableEntry> {
        if va.as_usize() >= MAX_VA {
            return None;
        }
        let mut table = self.root;
        for level in (1..PAGE_TABLE_LEVELS).rev() {
            // SAFETY: table 是本树中的节点，这里只读
            let pte = unsafe { &node(table)[va.index(level)] };
            if !pte.is_table() {
                return None;
            }
            table = pte.ppn();
        }
        // SAFETY: 同上
        Some(unsafe { &node(table)[va.index(0)] })
    }

    /// 把 `[va, va + size)` 覆盖的每一页映射到从 `pa` 开始的连续物理页。
    ///
    /// `va` 与 `size` 不必页对齐。中间节点分配失败时返回错误，
    /// 已经建立的前几页映射保持原样。
    ///
    /// # Panics
    /// - 目标表项已经有效（所有映射必须互不重叠）
    /// - `perm` 不含 R/W/X 中任何一位，或 `size` 为 0
    pub fn map_range(
        &mut self,
        va: Vaddr,
        size: usize,
        pa: Paddr,
        perm: PteFlags,
    ) -> PagingResult<()> {
        if size == 0 {
            panic!("page_table: map_range of zero bytes at {:#x}", va);
        }
        if !perm.intersects(PteFlags::RWX) {
            panic!("page_table: leaf permission {:?} lacks R/W/X", perm);
        }

        let mut page = va.align_down_to_page();
        let last = Vaddr(va.as_usize() + size - 1).align_down_to_page();
        let mut ppn = Ppn::from_addr_floor(pa);
        loop {
            let pte = self.walk(page, true)?;
            if pte.is_valid() {
                panic!("page_table: remap of {:#x}", page);
            }
            *pte = PageTableEntry::new_leaf(ppn, perm);
            if page == last {
                break;
            }
            page += PAGE_SIZE;
            ppn += 1;
        }
        log::trace!(
            "page_table: mapped [{:#x}, {:#x}] -> {:#x} {:?}",
            va.align_down_to_page(),
            last,
            pa,
            perm
        );
        Ok(())
    }

    /// 解除从 `va` 开始的 `npages` 页映射，可选择同时释放背后的物理帧。
    ///
    /// # Panics
    /// `va` 未对齐，或任何一页的表项缺失、无效或不是叶子。
    pub fn unmap_range(&mut self, va: Vaddr, npages: usize, free_backing: bool) {
        if !va.is_page_aligned() {
            panic!("page_table: unmap of unaligned {:#x}", va);
        }
        let frames = self.frames;
        let first = Vpn::from_addr_floor(va);
        for vpn in VpnRange::new(first, first + npages) {
            let page = vpn.start_addr();
            let Ok(pte) = self.walk(page, false) else {
                panic!("page_table: unmap of {:#x}: no table", page);
            };
            if !pte.is_valid() {
                panic!("page_table: unmap of {:#x}: not mapped", page);
            }
            if !pte.is_leaf() {
                panic!("page_table: unmap of {:#x}: not a leaf", page);
            }
            if free_backing {
                frames.free(pte.paddr());
            }
            pte.clear();
        }
    }

    /// 用户视角的翻译：仅当表项有效且带 U 位时返回物理页起始地址。
    ///
    /// 所有需要安全检查的地址解析都走这里。
    pub fn translate(&self, va: Vaddr) -> Option<Paddr> {
        let pte = self.find(va)?;
        (pte.is_valid() && pte.is_user()).then(|| pte.paddr())
    }

    /// 内核视角的翻译：只要求叶子项有效，返回值包含页内偏移。
    pub fn translate_kernel(&self, va: Vaddr) -> Option<Paddr> {
        let pte = self.find(va)?;
        pte.is_leaf().then(|| pte.paddr() + va.page_offset())
    }

    /// `va` 所在页的叶子表项副本
    pub fn leaf(&self, va: Vaddr) -> Option<PageTableEntry> {
        self.find(va).filter(|pte| pte.is_leaf()).copied()
    }

    /// 清除某页的 U 位，使其只对内核可见（用户栈下方的保护页）。
    ///
    /// # Panics
    /// 该页没有有效表项
    pub fn clear_user(&mut self, va: Vaddr) {
        match self.walk(va, false) {
            Ok(pte) if pte.is_valid() => {
                let flags = pte.flags() - PteFlags::U;
                pte.set_flags(flags);
            }
            _ => panic!("page_table: clear_user on unmapped {:#x}", va),
        }
    }

    /// 树中的节点数（包括根）
    pub fn node_count(&self) -> usize {
        fn count(table: Ppn) -> usize {
            // SAFETY: 只读遍历本树节点
            let entries = unsafe { node(table) };
            1 + entries
                .iter()
                .filter(|pte| pte.is_table())
                .map(|pte| count(pte.ppn()))
                .sum::<usize>()
        }
        count(self.root)
    }

    /// 自底向上释放所有节点。
    ///
    /// # Panics
    /// 树中仍有叶子映射：叶子必须先通过 [`unmap_range`](Self::unmap_range) 显式移除。
    pub fn destroy(self) {
        fn free_walk(frames: &FrameAllocator, table: Ppn) {
            // SAFETY: 销毁期间页表归调用者独占
            let entries = unsafe { node(table) };
            for (index, pte) in entries.iter_mut().enumerate() {
                if pte.is_table() {
                    free_walk(frames, pte.ppn());
                    pte.clear();
                } else if pte.is_valid() {
                    panic!("page_table: destroy with live leaf at index {}", index);
                }
            }
            frames.free_expecting(table.start_addr(), FrameUse::TableNode);
        }

        log::debug!("page_table: destroy root {:#x}", self.root.start_addr());
        free_walk(self.frames, self.root);
    }

    /// 只释放节点，不触碰叶子指向的帧。
    ///
    /// 用于进程私有的内核页表：其中的叶子全部是借用的映射
    /// （设备寄存器、内核镜像、镜像过来的用户页），帧属于别处。
    pub fn release_shared(self) {
        fn release_walk(frames: &FrameAllocator, table: Ppn) {
            // SAFETY: 同 destroy
            let entries = unsafe { node(table) };
            for pte in entries.iter_mut() {
                if pte.is_table() {
                    release_walk(frames, pte.ppn());
                }
                pte.clear();
            }
            frames.free_expecting(table.start_addr(), FrameUse::TableNode);
        }

        release_walk(self.frames, self.root);
    }

    /// 递归打印所有有效表项：索引、原始值与物理地址，每深一级多缩进一个 `..`
    pub fn dump(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        fn dump_walk(out: &mut dyn fmt::Write, table: Ppn, depth: usize) -> fmt::Result {
            // SAFETY: 只读遍历
            let entries = unsafe { node(table) };
            for (index, pte) in entries.iter().enumerate() {
                if !pte.is_valid() {
                    continue;
                }
                for _ in 0..=depth {
                    out.write_str("..")?;
                }
                writeln!(out, "{}: pte {:#x} pa {:#x}", index, pte.bits(), pte.paddr())?;
                if pte.is_table() {
                    dump_walk(out, pte.ppn(), depth + 1)?;
                }
            }
            Ok(())
        }

        writeln!(out, "page table {:#x}", self.root.start_addr())?;
        dump_walk(out, self.root, 0)
    }
}

impl fmt::Debug for PageTable<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PageTable({:#x})", self.root.start_addr())
    }
}
