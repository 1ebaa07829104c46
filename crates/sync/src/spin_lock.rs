//! 保护数据的自旋锁

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};

use crate::raw_spin_lock::{RawSpinLock, RawSpinLockGuard};

/// 自旋锁保护的数据
///
/// 持锁期间中断关闭，因此临界区必须短小且不能再次获取同一把锁。
#[derive(Debug)]
pub struct SpinLock<T> {
    raw: RawSpinLock,
    data: UnsafeCell<T>,
}

impl<T> SpinLock<T> {
    /// 用初始数据创建
    pub const fn new(data: T) -> Self {
        SpinLock {
            raw: RawSpinLock::new(),
            data: UnsafeCell::new(data),
        }
    }

    /// 获取锁
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        let raw = self.raw.lock();
        SpinLockGuard {
            _raw: raw,
            // SAFETY: 持有锁即独占数据
            data: unsafe { &mut *self.data.get() },
        }
    }

    /// 尝试获取锁
    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, T>> {
        self.raw.try_lock().map(|raw| SpinLockGuard {
            _raw: raw,
            // SAFETY: 同上
            data: unsafe { &mut *self.data.get() },
        })
    }

    /// 锁当前是否被持有
    pub fn is_locked(&self) -> bool {
        self.raw.is_locked()
    }

    /// 独占访问时无需加锁
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }
}

/// [`SpinLock`] 的持锁凭证
pub struct SpinLockGuard<'a, T> {
    _raw: RawSpinLockGuard<'a>,
    data: &'a mut T,
}

impl<T> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.data
    }
}

impl<T> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.data
    }
}

// SAFETY: 数据只在持锁时被访问
unsafe impl<T: Send> Send for SpinLock<T> {}
unsafe impl<T: Send> Sync for SpinLock<T> {}
