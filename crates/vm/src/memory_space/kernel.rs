//! 内核页表
//!
//! 启动时的内核页表与每个进程私有的内核页表共享同一套布局：
//!
//! | 区域 | 虚拟地址 | 权限 |
//! |------|----------|------|
//! | 设备寄存器 | 恒等映射 | `R|W` |
//! | 内核代码 `[kernel_base, kernel_text_end)` | 恒等映射 | `R|X` |
//! | 内核数据与其余物理内存 `[kernel_text_end, phys_top)` | 恒等映射 | `R|W` |
//! | 跳板页 | [`TRAMPOLINE`] | `R|X` |
//!
//! 这些叶子全部是借用的映射，内核页表只能用
//! [`PageTable::release_shared`] 释放。

use crate::address::{Paddr, Vaddr};
use crate::config::{MmConfig, PAGE_SIZE, TRAMPOLINE, mm_config};
use crate::frame_allocator::FrameAllocator;
use crate::page_table::{PageTable, PagingResult, PteFlags};

/// 创建一张预先装好内核共享映射的页表
///
/// 节点分配失败时已分配的节点全部归还。
pub fn new_kernel_table(frames: &FrameAllocator) -> PagingResult<PageTable<'_>> {
    let mut table = PageTable::new(frames)?;
    if let Err(err) = map_kernel_layout(&mut table, mm_config()) {
        log::warn!("memory_space: kernel table setup failed: {}", err);
        table.release_shared();
        return Err(err);
    }
    log::debug!(
        "memory_space: kernel table {:#x} ready",
        table.token()
    );
    Ok(table)
}

fn map_kernel_layout(table: &mut PageTable<'_>, config: &dyn MmConfig) -> PagingResult<()> {
    for region in config.mmio_regions() {
        table.map_range(
            Vaddr(region.base),
            region.size,
            Paddr(region.base),
            PteFlags::kernel_rw(),
        )?;
    }

    let base = config.kernel_base();
    let text_end = config.kernel_text_end();
    table.map_range(
        Vaddr(base),
        text_end - base,
        Paddr(base),
        PteFlags::kernel_rx(),
    )?;
    table.map_range(
        Vaddr(text_end),
        config.phys_top() - text_end,
        Paddr(text_end),
        PteFlags::kernel_rw(),
    )?;

    table.map_range(
        Vaddr(TRAMPOLINE),
        PAGE_SIZE,
        Paddr(config.trampoline_paddr()),
        PteFlags::kernel_rx(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{TEST_CONFIG, TestMachine};

    #[test]
    fn test_kernel_layout() {
        let machine = TestMachine::new(32);
        let frames = machine.frames();
        let table = new_kernel_table(frames).unwrap();
        let config = &TEST_CONFIG;

        let uart = config.mmio_regions()[0].base;
        let leaf = table.leaf(Vaddr(uart)).unwrap();
        assert_eq!(leaf.paddr(), Paddr(uart));
        assert_eq!(leaf.flags() - PteFlags::V, PteFlags::kernel_rw());

        let text = table.leaf(Vaddr(config.kernel_base())).unwrap();
        assert_eq!(text.flags() - PteFlags::V, PteFlags::kernel_rx());
        let data = table.leaf(Vaddr(config.kernel_text_end())).unwrap();
        assert_eq!(data.flags() - PteFlags::V, PteFlags::kernel_rw());
        let top = config.phys_top() - PAGE_SIZE;
        assert_eq!(table.translate_kernel(Vaddr(top + 8)), Some(Paddr(top + 8)));
        assert_eq!(table.translate_kernel(Vaddr(config.phys_top())), None);

        assert_eq!(
            table.translate_kernel(Vaddr(TRAMPOLINE)),
            Some(Paddr(config.trampoline_paddr()))
        );

        // 共享映射对用户视角不可见
        assert_eq!(table.translate(Vaddr(config.kernel_base())), None);
        assert_eq!(table.translate(Vaddr(TRAMPOLINE)), None);

        table.release_shared();
        assert_eq!(frames.free_frames(), 32);
    }

    #[test]
    fn test_kernel_table_setup_failure_returns_nodes() {
        let machine = TestMachine::new(4);
        let frames = machine.frames();
        assert!(new_kernel_table(frames).is_err());
        assert_eq!(frames.free_frames(), 4);
    }
}
