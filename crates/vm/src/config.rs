//! 内存布局配置 trait、注册机制与固定的分页几何常量

use core::sync::atomic::{AtomicUsize, Ordering};

/// 物理帧 / 虚拟页大小（字节）
pub const PAGE_SIZE: usize = 4096;
/// 页内偏移位数
pub const PAGE_SHIFT: usize = 12;
/// 每个页表节点中的表项数（2^9）
pub const PTES_PER_TABLE: usize = 512;
/// 页表级数（Sv39）
pub const PAGE_TABLE_LEVELS: usize = 3;
/// 每级索引位数
pub const INDEX_BITS: usize = 9;

/// 最大虚拟地址（不含）
///
/// Sv39 要求第 38 位以上与第 38 位一致；这里只使用低半部分，
/// 从而避免处理符号扩展。
pub const MAX_VA: usize = 1 << (INDEX_BITS * PAGE_TABLE_LEVELS + PAGE_SHIFT - 1);

/// 跳板页虚拟地址：每个地址空间最高的一页
pub const TRAMPOLINE: usize = MAX_VA - PAGE_SIZE;

/// 释放时写入整帧的填充字节，用于暴露悬垂访问
pub const FREE_FILL: u8 = 0x01;
/// 分配时写入整帧的填充字节，用于暴露未初始化读
pub const ALLOC_FILL: u8 = 0x05;

/// 一段需要恒等映射的设备寄存器区间
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MmioRegion {
    /// 起始物理地址（同时也是虚拟地址）
    pub base: usize,
    /// 区间长度（字节）
    pub size: usize,
}

/// 物理内存布局
///
/// 此 trait 提供内核镜像与物理内存的边界。
/// 内核启动代码需要实现此 trait 并注册。
pub trait MmConfig: Send + Sync {
    /// 内核镜像起始地址（KERNBASE）
    fn kernel_base(&self) -> usize;

    /// 内核代码段结束地址（etext）
    fn kernel_text_end(&self) -> usize;

    /// 内核镜像结束地址（end），其下的物理内存不归帧分配器管理
    fn kernel_end(&self) -> usize;

    /// 物理内存上界（PHYSTOP，不含）
    fn phys_top(&self) -> usize;

    /// 跳板代码所在的物理地址
    fn trampoline_paddr(&self) -> usize;

    /// 每个内核页表都要恒等映射的设备寄存器区间
    fn mmio_regions(&self) -> &'static [MmioRegion];
}

static CONFIG_DATA: AtomicUsize = AtomicUsize::new(0);
static CONFIG_VTABLE: AtomicUsize = AtomicUsize::new(0);

/// 注册布局配置
///
/// # Safety
/// 必须在单线程环境下、在任何内存管理操作之前调用
pub unsafe fn register_config(config: &'static dyn MmConfig) {
    let ptr = config as *const dyn MmConfig;
    // SAFETY: 将 fat pointer 拆分为 data 和 vtable 两部分存储
    let (data, vtable) =
        unsafe { core::mem::transmute::<*const dyn MmConfig, (usize, usize)>(ptr) };
    CONFIG_DATA.store(data, Ordering::Release);
    CONFIG_VTABLE.store(vtable, Ordering::Release);
}

/// 获取已注册的布局配置
///
/// # Panics
/// 如果尚未调用 [`register_config`]，则 panic
#[inline]
pub fn mm_config() -> &'static dyn MmConfig {
    let data = CONFIG_DATA.load(Ordering::Acquire);
    let vtable = CONFIG_VTABLE.load(Ordering::Acquire);
    if data == 0 {
        panic!("vm: MmConfig not registered");
    }
    // SAFETY: 重组 register_config 存入的 fat pointer
    unsafe { &*core::mem::transmute::<(usize, usize), *const dyn MmConfig>((data, vtable)) }
}
