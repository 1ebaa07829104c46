//! 物理地址与虚拟地址类型

use crate::address::operations::{AlignOps, CalcOps, UsizeConvert};
use crate::arch_ops::arch_ops;
use crate::config::{INDEX_BITS, PAGE_SHIFT, PTES_PER_TABLE};

/// 表示内存地址（物理或虚拟）的 Trait
pub trait Address: UsizeConvert + AlignOps + CalcOps + Ord + core::fmt::Debug {}

macro_rules! impl_address {
    ($type:ty) => {
        impl UsizeConvert for $type {
            fn as_usize(&self) -> usize {
                self.0
            }

            fn from_usize(value: usize) -> Self {
                Self(value)
            }
        }

        impl AlignOps for $type {}

        $crate::impl_calc_ops!($type);

        impl Address for $type {}

        impl core::fmt::LowerHex for $type {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::LowerHex::fmt(&self.0, f)
            }
        }
    };
}

/// 物理地址
#[repr(transparent)]
#[derive(Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct Paddr(pub usize);
impl_address!(Paddr);

/// 虚拟地址
#[repr(transparent)]
#[derive(Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct Vaddr(pub usize);
impl_address!(Vaddr);

impl Vaddr {
    /// 取第 `level` 级页表索引（level 2 为根）
    #[inline]
    pub const fn index(self, level: usize) -> usize {
        (self.0 >> (PAGE_SHIFT + INDEX_BITS * level)) & (PTES_PER_TABLE - 1)
    }

    /// 作为只读指针
    pub fn as_ptr<T>(self) -> *const T {
        self.0 as *const T
    }

    /// 作为可写指针
    pub fn as_mut_ptr<T>(self) -> *mut T {
        self.0 as *mut T
    }
}

/// 可以经由直接映射转换为内核虚拟地址的物理地址
pub trait ConvertablePaddr {
    /// 转换为内核可访问的虚拟地址
    fn to_vaddr(&self) -> Vaddr;
}

impl ConvertablePaddr for Paddr {
    fn to_vaddr(&self) -> Vaddr {
        Vaddr(arch_ops().paddr_to_vaddr(self.0))
    }
}
