//! 帧分配器模块
//!
//! 本模块管理固定大小（4096 字节）的物理帧。
//!
//! ## 分配策略（空闲链表）
//!
//! 空闲帧串成单向链表，链表指针就存放在空闲帧自身的第一个机器字中，
//! 0 表示链表结束。整个链表由一把自旋锁保护，持锁时间为 O(1)：
//!
//! 1. 分配：弹出表头，持锁期间只读取表头帧中的下一项指针
//! 2. 释放：把当前表头写入被释放帧，再把它设为新的表头
//!
//! 复用顺序因此是后进先出（LIFO），除此之外不保证任何顺序。
//!
//! ## 填充字节
//!
//! - 释放时整帧写入 [`FREE_FILL`]，悬垂读取会读到明显的垃圾值
//! - 分配时整帧写入 [`ALLOC_FILL`]，内容**不会**清零，调用者必须自行初始化
//!
//! 两次填充都在锁外进行。
//!
//! ## 归属标记
//!
//! 每个受管帧在 [`FrameAllocator`] 内部有一个 [`FrameUse`] 标记，按帧号索引。
//! 重复释放会被标记检测为致命错误，而不是悄悄破坏链表。
//!
//! ## RAII
//!
//! [`FrameTracker`] 在 `Drop` 时自动回收所管理的帧；
//! 交给页表项持有时调用 [`FrameTracker::leak`] 转移所有权。

use core::fmt;

use crate::address::{AlignOps, ConvertablePaddr, Paddr, PageNum, Ppn, UsizeConvert};
use crate::config::{ALLOC_FILL, FREE_FILL, PAGE_SIZE, mm_config};
use alloc::vec;
use alloc::vec::Vec;
use lazy_static::lazy_static;
use sync::SpinLock;

/// 物理帧当前的归属
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameUse {
    /// 位于受管范围内但尚未登记到空闲链表
    Offline,
    /// 在空闲链表上
    Free,
    /// 页表节点
    TableNode,
    /// 用户数据页
    UserPage,
    /// 调用者自用的缓冲区
    Buffer,
}

// ============================================================================
// 物理帧访问
// ============================================================================

/// 帧在直接映射区域中的起始指针
#[inline]
fn frame_ptr(ppn: Ppn) -> *mut u8 {
    ppn.start_addr().to_vaddr().as_mut_ptr::<u8>()
}

/// 整帧写入同一个字节
fn fill_frame(ppn: Ppn, byte: u8) {
    // SAFETY: ppn 来自受管范围，直接映射覆盖整个物理内存
    unsafe { core::ptr::write_bytes(frame_ptr(ppn), byte, PAGE_SIZE) };
}

/// 以字节切片访问一整帧
///
/// # Safety
/// 调用者必须拥有该帧（或确知它被映射为可访问的物理内存），
/// 且在返回的切片存活期间没有其他可变别名。
pub(crate) unsafe fn frame_bytes<'a>(ppn: Ppn) -> &'a mut [u8] {
    unsafe { core::slice::from_raw_parts_mut(frame_ptr(ppn), PAGE_SIZE) }
}

// ============================================================================
// FrameTracker - 单帧 RAII 封装
// ============================================================================

/// 物理帧跟踪器。
///
/// 被 drop 时自动把帧还给分配它的 [`FrameAllocator`]。
pub struct FrameTracker<'a> {
    ppn: Ppn,
    allocator: &'a FrameAllocator,
}

impl<'a> FrameTracker<'a> {
    /// 物理页号
    pub fn ppn(&self) -> Ppn {
        self.ppn
    }

    /// 帧的起始物理地址
    pub fn paddr(&self) -> Paddr {
        self.ppn.start_addr()
    }

    /// 帧内容
    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: 帧由本跟踪器独占
        unsafe { frame_bytes(self.ppn) }
    }

    /// 帧内容（可写）
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: 同上，且 &mut self 保证唯一借用
        unsafe { frame_bytes(self.ppn) }
    }

    /// 把整帧清零
    pub fn zero(&mut self) {
        fill_frame(self.ppn, 0);
    }

    /// 放弃自动回收，把帧的所有权交给调用者（通常是页表项）。
    ///
    /// 之后只能通过 [`FrameAllocator::free`] 归还。
    pub fn leak(self) -> Ppn {
        let ppn = self.ppn;
        core::mem::forget(self);
        ppn
    }
}

impl Drop for FrameTracker<'_> {
    fn drop(&mut self) {
        self.allocator.free(self.ppn.start_addr());
    }
}

impl fmt::Debug for FrameTracker<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FrameTracker({:#x})", self.paddr())
    }
}

// ============================================================================
// FrameAllocator
// ============================================================================

/// 锁保护下的空闲链表状态
#[derive(Debug)]
struct FreeList {
    /// 表头帧；链表中后续帧的地址保存在帧内
    head: Option<Ppn>,
    free_count: usize,
    /// 按 `ppn - base` 索引的归属标记
    usage: Vec<FrameUse>,
}

/// 物理帧分配器。
///
/// 管理 `[base, limit)` 内的物理帧，`base` 之下是内核镜像等保留区域。
/// 分配器是显式对象：内核使用 [`kernel_frames`] 返回的全局实例，
/// 测试可以构造互相隔离的实例。
#[derive(Debug)]
pub struct FrameAllocator {
    /// 第一个受管帧（保留边界向上取整）
    base: Ppn,
    /// 受管范围结束帧（不包含）
    limit: Ppn,
    inner: SpinLock<FreeList>,
}

impl FrameAllocator {
    /// 创建一个管理 `[reserved_end, phys_top)` 的空分配器。
    ///
    /// 此时所有帧都处于 [`FrameUse::Offline`]，需要调用 [`init_range`](Self::init_range) 登记。
    pub fn new(reserved_end: Paddr, phys_top: Paddr) -> Self {
        let base = Ppn::from_addr_ceil(reserved_end);
        let limit = Ppn::from_addr_floor(phys_top).max(base);
        let slots = limit.as_usize() - base.as_usize();
        FrameAllocator {
            base,
            limit,
            inner: SpinLock::new(FreeList {
                head: None,
                free_count: 0,
                usage: vec![FrameUse::Offline; slots],
            }),
        }
    }

    /// 把 `[start, end)` 内的每个完整帧经由 [`free`](Self::free) 登记为空闲。
    pub fn init_range(&self, start: Paddr, end: Paddr) {
        let mut pa = start.align_up_to_page();
        let mut count = 0usize;
        while pa.as_usize() + PAGE_SIZE <= end.as_usize() {
            self.free(pa);
            pa += PAGE_SIZE;
            count += 1;
        }
        log::debug!(
            "frame_allocator: registered {} frames in [{:#x}, {:#x})",
            count,
            start,
            end
        );
    }

    /// 分配一个调用者自用的帧
    pub fn alloc(&self) -> Option<FrameTracker<'_>> {
        self.alloc_for(FrameUse::Buffer)
    }

    /// 分配一个帧并记录其用途。
    ///
    /// 返回的帧以 [`ALLOC_FILL`] 填充；空闲链表为空时立即返回 `None`，从不等待。
    pub fn alloc_for(&self, usage: FrameUse) -> Option<FrameTracker<'_>> {
        debug_assert!(
            !matches!(usage, FrameUse::Free | FrameUse::Offline),
            "frame_allocator: invalid usage {:?}",
            usage
        );
        let Some(ppn) = self.pop(usage) else {
            log::debug!("frame_allocator: out of frames");
            return None;
        };
        fill_frame(ppn, ALLOC_FILL);
        Some(FrameTracker {
            ppn,
            allocator: self,
        })
    }

    /// 分配一个清零的帧（页表节点、用户页）
    pub fn alloc_zeroed(&self, usage: FrameUse) -> Option<FrameTracker<'_>> {
        let mut frame = self.alloc_for(usage)?;
        frame.zero();
        Some(frame)
    }

    /// 回收一个物理帧。
    ///
    /// # Panics
    /// 地址未对齐、低于保留边界、不低于受管上界，或帧已经是空闲状态。
    pub fn free(&self, pa: Paddr) {
        if !pa.is_page_aligned() {
            panic!("frame_allocator: free of misaligned address {:#x}", pa);
        }
        if pa < self.base.start_addr() || pa >= self.limit.start_addr() {
            panic!(
                "frame_allocator: free of {:#x} outside managed range [{:#x}, {:#x})",
                pa,
                self.base.start_addr(),
                self.limit.start_addr()
            );
        }
        let ppn = Ppn::from_addr_floor(pa);
        let slot = self.slot(ppn);
        if self.inner.lock().usage[slot] == FrameUse::Free {
            panic!("frame_allocator: double free of {:#x}", pa);
        }

        fill_frame(ppn, FREE_FILL);

        let mut list = self.inner.lock();
        let next = list.head.map_or(0, |head| head.start_addr().as_usize());
        // SAFETY: 帧已归还，首字用作链表指针
        unsafe { frame_ptr(ppn).cast::<usize>().write(next) };
        list.head = Some(ppn);
        list.free_count += 1;
        list.usage[slot] = FrameUse::Free;
    }

    /// 回收一个帧，并在调试构建中确认它的归属
    pub(crate) fn free_expecting(&self, pa: Paddr, expected: FrameUse) {
        debug_assert_eq!(
            self.usage_of(pa),
            Some(expected),
            "frame_allocator: {:#x} freed with unexpected owner",
            pa
        );
        self.free(pa);
    }

    /// 空闲帧数
    pub fn free_frames(&self) -> usize {
        self.inner.lock().free_count
    }

    /// 空闲内存字节数
    pub fn free_bytes(&self) -> usize {
        self.free_frames() * PAGE_SIZE
    }

    /// 受管范围内的帧数（包括尚未登记的）
    pub fn total_frames(&self) -> usize {
        self.limit.as_usize() - self.base.as_usize()
    }

    /// 查询帧的归属；范围外返回 `None`
    pub fn usage_of(&self, pa: Paddr) -> Option<FrameUse> {
        let ppn = Ppn::from_addr_floor(pa);
        if ppn < self.base || ppn >= self.limit {
            return None;
        }
        Some(self.inner.lock().usage[self.slot(ppn)])
    }

    #[inline]
    fn slot(&self, ppn: Ppn) -> usize {
        ppn.as_usize() - self.base.as_usize()
    }

    /// 弹出空闲链表表头
    fn pop(&self, usage: FrameUse) -> Option<Ppn> {
        let mut list = self.inner.lock();
        let ppn = list.head?;
        // SAFETY: 空闲帧首字保存着下一项的物理地址
        let next = unsafe { frame_ptr(ppn).cast::<usize>().read() };
        list.head = (next != 0).then(|| Ppn::from_addr_floor(Paddr(next)));
        list.free_count -= 1;
        let slot = self.slot(ppn);
        debug_assert_eq!(list.usage[slot], FrameUse::Free);
        list.usage[slot] = usage;
        Some(ppn)
    }
}

// ============================================================================
// 内核全局实例
// ============================================================================

lazy_static! {
    /// 内核使用的物理帧分配器，管理 `[kernel_end, phys_top)`。
    static ref KERNEL_FRAMES: FrameAllocator = {
        let config = mm_config();
        FrameAllocator::new(Paddr(config.kernel_end()), Paddr(config.phys_top()))
    };
}

/// 把内核镜像之后到物理内存上界的所有帧登记到全局分配器。
///
/// 需要先注册 [`MmConfig`](crate::MmConfig) 与 [`ArchMmOps`](crate::ArchMmOps)。
pub fn init_frame_allocator() {
    let config = mm_config();
    KERNEL_FRAMES.init_range(Paddr(config.kernel_end()), Paddr(config.phys_top()));
}

/// 内核全局帧分配器
pub fn kernel_frames() -> &'static FrameAllocator {
    &KERNEL_FRAMES
}
