//! 地址与页号共用的运算 trait

use crate::config::PAGE_SIZE;

/// 在类型和 usize 之间进行转换
pub trait UsizeConvert: Copy {
    /// 取出原始数值
    fn as_usize(&self) -> usize;
    /// 由原始数值构造
    fn from_usize(value: usize) -> Self;
}

/// 算术运算：以 usize 为步长的加减
pub trait CalcOps:
    Sized
    + core::ops::Add<usize, Output = Self>
    + core::ops::Sub<usize, Output = Self>
    + core::ops::AddAssign<usize>
    + core::ops::SubAssign<usize>
{
}

/// 页对齐操作
pub trait AlignOps: UsizeConvert {
    /// 是否按页对齐
    fn is_page_aligned(self) -> bool {
        self.as_usize() % PAGE_SIZE == 0
    }

    /// 向下对齐到页边界
    fn align_down_to_page(self) -> Self {
        Self::from_usize(page_round_down(self.as_usize()))
    }

    /// 向上对齐到页边界
    fn align_up_to_page(self) -> Self {
        Self::from_usize(page_round_up(self.as_usize()))
    }

    /// 页内偏移
    fn page_offset(self) -> usize {
        self.as_usize() & (PAGE_SIZE - 1)
    }
}

/// 向上取整到页边界（PGROUNDUP）
#[inline]
pub const fn page_round_up(value: usize) -> usize {
    (value + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}

/// 向下取整到页边界（PGROUNDDOWN）
#[inline]
pub const fn page_round_down(value: usize) -> usize {
    value & !(PAGE_SIZE - 1)
}

/// 为包装 usize 的新类型实现 [`CalcOps`]
#[macro_export]
macro_rules! impl_calc_ops {
    ($type:ty) => {
        impl core::ops::Add<usize> for $type {
            type Output = Self;
            fn add(self, rhs: usize) -> Self {
                Self(self.0 + rhs)
            }
        }

        impl core::ops::Sub<usize> for $type {
            type Output = Self;
            fn sub(self, rhs: usize) -> Self {
                Self(self.0 - rhs)
            }
        }

        impl core::ops::AddAssign<usize> for $type {
            fn add_assign(&mut self, rhs: usize) {
                self.0 += rhs;
            }
        }

        impl core::ops::SubAssign<usize> for $type {
            fn sub_assign(&mut self, rhs: usize) {
                self.0 -= rhs;
            }
        }

        impl $crate::address::operations::CalcOps for $type {}
    };
}
