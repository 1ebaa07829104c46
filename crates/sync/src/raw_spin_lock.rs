//! 不带数据的自旋锁
//!
//! 持锁期间本核中断保持关闭。锁不可重入。

use crate::intr_guard::IntrGuard;
use core::hint;
use core::sync::atomic::{AtomicBool, Ordering};

/// 自旋锁
#[derive(Debug, Default)]
pub struct RawSpinLock {
    locked: AtomicBool,
}

impl RawSpinLock {
    /// 未加锁状态
    pub const fn new() -> Self {
        RawSpinLock {
            locked: AtomicBool::new(false),
        }
    }

    /// 先关中断再自旋获取锁
    pub fn lock(&self) -> RawSpinLockGuard<'_> {
        let intr = IntrGuard::new();
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            while self.locked.load(Ordering::Relaxed) {
                hint::spin_loop();
            }
        }
        RawSpinLockGuard { lock: self, _intr: intr }
    }

    /// 尝试一次；失败时中断状态立即恢复
    pub fn try_lock(&self) -> Option<RawSpinLockGuard<'_>> {
        let intr = IntrGuard::new();
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| RawSpinLockGuard { lock: self, _intr: intr })
    }

    /// 锁当前是否被持有
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }
}

/// 持锁凭证：先释放锁，再恢复中断
pub struct RawSpinLockGuard<'a> {
    lock: &'a RawSpinLock,
    _intr: IntrGuard,
}

impl Drop for RawSpinLockGuard<'_> {
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
    }
}
