//! 内存管理相关操作的 Mock 实现
//!
//! 注意：这里不直接依赖 `vm` crate（避免循环依赖）。
//! `vm` crate 在 `cfg(test)` 下为这些类型实现其 trait（`ArchMmOps` / `MmConfig`）。

use alloc::alloc::{Layout, alloc_zeroed, dealloc, handle_alloc_error};
use core::sync::atomic::{AtomicUsize, Ordering};

const PAGE_SIZE: usize = 4096;

/// Mock 的内存管理架构操作
///
/// 采用恒等映射（vaddr == paddr），并记录最近一次写入的 satp 与 TLB 刷新次数。
pub struct MockMmOps {
    satp: AtomicUsize,
    flushes: AtomicUsize,
}

impl MockMmOps {
    pub const fn new() -> Self {
        Self {
            satp: AtomicUsize::new(0),
            flushes: AtomicUsize::new(0),
        }
    }

    /// 将物理地址转换为虚拟地址（恒等映射）
    pub fn paddr_to_vaddr(&self, paddr: usize) -> usize {
        paddr
    }

    /// 记录 satp
    pub fn activate(&self, satp: usize) {
        self.satp.store(satp, Ordering::SeqCst);
    }

    /// 记一次 TLB 刷新
    pub fn flush_tlb_all(&self) {
        self.flushes.fetch_add(1, Ordering::SeqCst);
    }

    /// 最近一次 activate 的 satp
    pub fn active_satp(&self) -> usize {
        self.satp.load(Ordering::SeqCst)
    }

    /// 累计 TLB 刷新次数
    pub fn tlb_flushes(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }
}

/// 全局 Mock 实例
pub static MOCK_MM_OPS: MockMmOps = MockMmOps::new();

/// Mock 的物理内存布局（QEMU virt 机器）
pub struct MockMmConfig;

impl MockMmConfig {
    /// UART0 寄存器 (base, size)
    pub const UART0: (usize, usize) = (0x1000_0000, PAGE_SIZE);
    /// virtio 磁盘寄存器
    pub const VIRTIO0: (usize, usize) = (0x1000_1000, PAGE_SIZE);
    /// 平台级中断控制器
    pub const PLIC: (usize, usize) = (0x0c00_0000, 0x40_0000);

    pub const fn new() -> Self {
        Self
    }

    pub fn kernel_base(&self) -> usize {
        0x8000_0000
    }

    pub fn kernel_text_end(&self) -> usize {
        0x8000_4000
    }

    pub fn kernel_end(&self) -> usize {
        0x8001_0000
    }

    /// 仅供测试：2 MiB 的物理内存
    pub fn phys_top(&self) -> usize {
        0x8020_0000
    }

    pub fn trampoline_paddr(&self) -> usize {
        0x8000_1000
    }
}

/// 全局 Mock 实例
pub static MOCK_MM_CONFIG: MockMmConfig = MockMmConfig::new();

/// 用宿主堆内存模拟的一段按页对齐的物理内存
///
/// 配合恒等映射的 [`MockMmOps`]，其地址可以直接当作物理地址交给帧分配器。
pub struct MockPhysMem {
    base: *mut u8,
    layout: Layout,
}

impl MockPhysMem {
    /// 分配 `frames` 个清零的页
    pub fn new(frames: usize) -> Self {
        assert!(frames > 0, "MockPhysMem needs at least one frame");
        let layout = match Layout::from_size_align(frames * PAGE_SIZE, PAGE_SIZE) {
            Ok(layout) => layout,
            Err(_) => panic!("MockPhysMem: bad layout for {} frames", frames),
        };
        // SAFETY: layout 大小非零
        let base = unsafe { alloc_zeroed(layout) };
        if base.is_null() {
            handle_alloc_error(layout);
        }
        Self { base, layout }
    }

    /// 起始地址（页对齐）
    pub fn start(&self) -> usize {
        self.base as usize
    }

    /// 结束地址（不含）
    pub fn end(&self) -> usize {
        self.start() + self.layout.size()
    }

    /// 页数
    pub fn frames(&self) -> usize {
        self.layout.size() / PAGE_SIZE
    }
}

impl Drop for MockPhysMem {
    fn drop(&mut self) {
        // SAFETY: base 由 new 以同一 layout 分配
        unsafe { dealloc(self.base, self.layout) };
    }
}

// SAFETY: MockPhysMem 独占这块内存，访问同步由使用者（帧分配器）负责
unsafe impl Send for MockPhysMem {}
unsafe impl Sync for MockPhysMem {}
