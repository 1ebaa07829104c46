//! 中断保护器
//!
//! 只能阻止本核上“持锁代码被本核中断打断”的情况；
//! 跨核互斥仍由自旋锁负责。

use crate::arch_ops;

/// RAII 中断保护：创建时关闭本核中断，销毁时恢复到之前的状态
pub struct IntrGuard {
    flags: usize,
}

impl IntrGuard {
    /// 关闭中断并记住之前的状态
    pub fn new() -> Self {
        // SAFETY: 状态在 drop 时原样恢复
        let flags = unsafe { arch_ops().read_and_disable_interrupts() };
        IntrGuard { flags }
    }

    /// 进入前中断是否开启
    pub fn was_enabled(&self) -> bool {
        self.flags & arch_ops().sstatus_sie() != 0
    }
}

impl Default for IntrGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for IntrGuard {
    fn drop(&mut self) {
        // SAFETY: flags 来自 new
        unsafe { arch_ops().restore_interrupts(self.flags) };
    }
}
