//! 宿主机测试环境
//!
//! 把 `test-support` 中的 Mock 接到本 crate 与 `sync` 的 trait 上，
//! 并提供一块用宿主内存模拟的“物理内存”。

use std::sync::Once;

use crate::address::Paddr;
use crate::arch_ops::{ArchMmOps, register_arch_ops};
use crate::config::{MmConfig, MmioRegion, PAGE_SIZE, register_config};
use crate::frame_allocator::FrameAllocator;
use test_support::mock::arch::MOCK_ARCH_OPS;
use test_support::mock::mm::{MOCK_MM_CONFIG, MOCK_MM_OPS, MockMmConfig, MockPhysMem};

struct TestArch;

impl sync::ArchOps for TestArch {
    unsafe fn read_and_disable_interrupts(&self) -> usize {
        unsafe { MOCK_ARCH_OPS.read_and_disable_interrupts() }
    }

    unsafe fn restore_interrupts(&self, flags: usize) {
        unsafe { MOCK_ARCH_OPS.restore_interrupts(flags) }
    }

    fn sstatus_sie(&self) -> usize {
        MOCK_ARCH_OPS.sstatus_sie()
    }
}

struct TestMmOps;

impl ArchMmOps for TestMmOps {
    fn paddr_to_vaddr(&self, paddr: usize) -> usize {
        MOCK_MM_OPS.paddr_to_vaddr(paddr)
    }

    unsafe fn activate(&self, satp: usize) {
        MOCK_MM_OPS.activate(satp);
    }

    fn flush_tlb_all(&self) {
        MOCK_MM_OPS.flush_tlb_all();
    }
}

static TEST_MMIO: [MmioRegion; 3] = [
    MmioRegion {
        base: MockMmConfig::UART0.0,
        size: MockMmConfig::UART0.1,
    },
    MmioRegion {
        base: MockMmConfig::VIRTIO0.0,
        size: MockMmConfig::VIRTIO0.1,
    },
    MmioRegion {
        base: MockMmConfig::PLIC.0,
        size: MockMmConfig::PLIC.1,
    },
];

pub(crate) struct TestConfig;

impl MmConfig for TestConfig {
    fn kernel_base(&self) -> usize {
        MOCK_MM_CONFIG.kernel_base()
    }

    fn kernel_text_end(&self) -> usize {
        MOCK_MM_CONFIG.kernel_text_end()
    }

    fn kernel_end(&self) -> usize {
        MOCK_MM_CONFIG.kernel_end()
    }

    fn phys_top(&self) -> usize {
        MOCK_MM_CONFIG.phys_top()
    }

    fn trampoline_paddr(&self) -> usize {
        MOCK_MM_CONFIG.trampoline_paddr()
    }

    fn mmio_regions(&self) -> &'static [MmioRegion] {
        &TEST_MMIO
    }
}

pub(crate) static TEST_CONFIG: TestConfig = TestConfig;

static INIT: Once = Once::new();

/// 注册测试用的架构操作与布局配置，可重复调用
pub(crate) fn init() {
    INIT.call_once(|| unsafe {
        sync::register_arch_ops(&TestArch);
        register_arch_ops(&TestMmOps);
        register_config(&TEST_CONFIG);
    });
}

/// 充当内核镜像、不归分配器管理的帧数
const RESERVED_FRAMES: usize = 2;

/// 一台小机器：宿主内存模拟的物理内存，前几帧充当内核镜像，其余交给分配器
pub(crate) struct TestMachine {
    frames: FrameAllocator,
    mem: MockPhysMem,
}

impl TestMachine {
    /// 分配器管理恰好 `frames` 个空闲帧
    pub(crate) fn new(frames: usize) -> Self {
        init();
        let mem = MockPhysMem::new(RESERVED_FRAMES + frames);
        let reserved_end = Paddr(mem.start() + RESERVED_FRAMES * PAGE_SIZE);
        let phys_top = Paddr(mem.end());
        let allocator = FrameAllocator::new(reserved_end, phys_top);
        allocator.init_range(reserved_end, phys_top);
        TestMachine {
            frames: allocator,
            mem,
        }
    }

    pub(crate) fn frames(&self) -> &FrameAllocator {
        &self.frames
    }

    /// 第一个受管帧
    pub(crate) fn reserved_end(&self) -> Paddr {
        Paddr(self.mem.start() + RESERVED_FRAMES * PAGE_SIZE)
    }

    pub(crate) fn phys_top(&self) -> Paddr {
        Paddr(self.mem.end())
    }
}
