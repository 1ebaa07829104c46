//! 页码抽象
//!
//! 页码是地址除以 [`PAGE_SIZE`] 的结果。帧分配器以 [`Ppn`] 为单位记账，
//! 地址空间的生长、收缩与复制以 [`VpnRange`] 为单位遍历。

use crate::address::operations::{AlignOps, CalcOps, UsizeConvert};
use crate::address::types::{Address, Paddr, Vaddr};
use crate::config::PAGE_SIZE;

/// 表示一个页码的 Trait，Ppn 与 Vpn 均实现此 Trait。
pub trait PageNum:
    CalcOps + UsizeConvert + Copy + Clone + PartialEq + PartialOrd + Eq + Ord
{
    /// 关联的地址类型（Ppn 关联 Paddr，Vpn 关联 Vaddr）
    type TAddress: Address;

    /// 将页码增加 1
    fn step(&mut self) {
        *self += 1;
    }

    /// 包含该地址的页（向下取整）
    fn from_addr_floor(addr: Self::TAddress) -> Self {
        Self::from_usize(addr.align_down_to_page().as_usize() / PAGE_SIZE)
    }

    /// 向上取整：未对齐的地址落到下一页
    fn from_addr_ceil(addr: Self::TAddress) -> Self {
        Self::from_usize(addr.align_up_to_page().as_usize() / PAGE_SIZE)
    }

    /// 页的起始地址
    fn start_addr(self) -> Self::TAddress {
        Self::TAddress::from_usize(self.as_usize() * PAGE_SIZE)
    }

    /// 页的结束地址（下一页的起始地址）
    fn end_addr(self) -> Self::TAddress {
        Self::TAddress::from_usize((self.as_usize() + 1) * PAGE_SIZE)
    }
}

/// 为页码类型实现 `UsizeConvert`、`CalcOps` 与 `PageNum`
#[macro_export]
macro_rules! impl_page_num {
    ($type:ty, $addr_type:ty) => {
        impl $crate::address::operations::UsizeConvert for $type {
            fn as_usize(&self) -> usize {
                self.0
            }

            fn from_usize(value: usize) -> Self {
                Self(value)
            }
        }

        $crate::impl_calc_ops!($type);

        impl $crate::address::page_num::PageNum for $type {
            type TAddress = $addr_type;
        }
    };
}

/// 物理页码
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct Ppn(pub usize);
impl_page_num!(Ppn, Paddr);

/// 虚拟页码
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct Vpn(pub usize);
impl_page_num!(Vpn, Vaddr);

/// 半开区间 `[start, end)` 的页码范围
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageNumRange<T: PageNum> {
    /// 起始页码（包含）
    pub start: T,
    /// 结束页码（不包含）
    pub end: T,
}

impl<T: PageNum> PageNumRange<T> {
    /// 创建页码范围；`end < start` 时视为空
    pub fn new(start: T, end: T) -> Self {
        Self {
            start,
            end: if end < start { start } else { end },
        }
    }

    /// 覆盖地址区间 `[start, end)` 的所有页：起点向下、终点向上取整
    pub fn covering(start: T::TAddress, end: T::TAddress) -> Self {
        Self::new(T::from_addr_floor(start), T::from_addr_ceil(end))
    }

    /// 页数
    pub fn len(&self) -> usize {
        self.end.as_usize() - self.start.as_usize()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// 是否包含给定页码
    pub fn contains(&self, page: T) -> bool {
        page >= self.start && page < self.end
    }
}

impl<T: PageNum> IntoIterator for PageNumRange<T> {
    type Item = T;
    type IntoIter = PageNumRangeIterator<T>;

    fn into_iter(self) -> Self::IntoIter {
        PageNumRangeIterator {
            current: self.start,
            end: self.end,
        }
    }
}

/// 按升序返回范围内每个页码的迭代器
pub struct PageNumRangeIterator<T: PageNum> {
    current: T,
    end: T,
}

impl<T: PageNum> Iterator for PageNumRangeIterator<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        if self.current >= self.end {
            return None;
        }
        let page = self.current;
        self.current.step();
        Some(page)
    }
}

/// 物理页码范围
pub type PpnRange = PageNumRange<Ppn>;
/// 虚拟页码范围
pub type VpnRange = PageNumRange<Vpn>;
