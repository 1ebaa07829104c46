//! Sv39 页表项

use core::fmt;

use crate::address::{Paddr, PageNum, Ppn, UsizeConvert};
use bitflags::bitflags;

bitflags! {
    /// 页表项标志位（低 8 位）
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PteFlags: u64 {
        /// 有效
        const V = 1 << 0;
        /// 可读
        const R = 1 << 1;
        /// 可写
        const W = 1 << 2;
        /// 可执行
        const X = 1 << 3;
        /// 用户态可访问
        const U = 1 << 4;
        /// 全局映射
        const G = 1 << 5;
        /// 已访问
        const A = 1 << 6;
        /// 已写入
        const D = 1 << 7;
    }
}

impl PteFlags {
    /// 访问权限位，三者皆空的有效项指向下一级页表
    pub const RWX: Self = Self::R.union(Self::W).union(Self::X);

    /// 用户页的完整权限
    pub const fn user_rwx() -> Self {
        Self::RWX.union(Self::U)
    }

    /// 内核读写
    pub const fn kernel_rw() -> Self {
        Self::R.union(Self::W)
    }

    /// 内核读执行
    pub const fn kernel_rx() -> Self {
        Self::R.union(Self::X)
    }
}

const PPN_SHIFT: u64 = 10;
const PPN_MASK: u64 = (1 << 44) - 1;
const FLAGS_MASK: u64 = (1 << PPN_SHIFT) - 1;

/// Sv39 页表项：低 10 位为标志，10..=53 位为物理页号
#[repr(transparent)]
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct PageTableEntry(u64);

impl PageTableEntry {
    /// 无效项
    pub const EMPTY: Self = Self(0);

    /// 叶子项：映射到 `ppn`，附带权限并置 V
    pub fn new_leaf(ppn: Ppn, perm: PteFlags) -> Self {
        Self(((ppn.as_usize() as u64) << PPN_SHIFT) | (perm | PteFlags::V).bits())
    }

    /// 指向下一级页表的项：只置 V
    pub fn new_table(ppn: Ppn) -> Self {
        Self(((ppn.as_usize() as u64) << PPN_SHIFT) | PteFlags::V.bits())
    }

    /// 原始值
    pub const fn bits(&self) -> u64 {
        self.0
    }

    /// 物理页号
    pub fn ppn(&self) -> Ppn {
        Ppn(((self.0 >> PPN_SHIFT) & PPN_MASK) as usize)
    }

    /// 物理页起始地址（PTE2PA）
    pub fn paddr(&self) -> Paddr {
        self.ppn().start_addr()
    }

    /// 标志位（忽略 RSW 两位）
    pub fn flags(&self) -> PteFlags {
        PteFlags::from_bits_truncate(self.0 & FLAGS_MASK)
    }

    /// 有效位
    pub fn is_valid(&self) -> bool {
        self.flags().contains(PteFlags::V)
    }

    /// 有效且没有任何访问权限：指向下一级页表
    pub fn is_table(&self) -> bool {
        self.is_valid() && !self.flags().intersects(PteFlags::RWX)
    }

    /// 有效且带有访问权限：终结翻译的叶子项
    pub fn is_leaf(&self) -> bool {
        self.is_valid() && self.flags().intersects(PteFlags::RWX)
    }

    /// 用户态可访问
    pub fn is_user(&self) -> bool {
        self.flags().contains(PteFlags::U)
    }

    /// 替换标志位，保留物理页号
    pub fn set_flags(&mut self, flags: PteFlags) {
        self.0 = (self.0 & !FLAGS_MASK) | flags.bits();
    }

    /// 置为无效
    pub fn clear(&mut self) {
        self.0 = 0;
    }
}

impl fmt::Debug for PageTableEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageTableEntry")
            .field("pa", &format_args!("{:#x}", self.paddr()))
            .field("flags", &self.flags())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leaf_and_table_classification() {
        let leaf = PageTableEntry::new_leaf(Ppn(0x80123), PteFlags::kernel_rw());
        assert!(leaf.is_valid());
        assert!(leaf.is_leaf());
        assert!(!leaf.is_table());
        assert!(!leaf.is_user());
        assert_eq!(leaf.ppn(), Ppn(0x80123));
        assert_eq!(leaf.paddr(), Paddr(0x8012_3000));

        let table = PageTableEntry::new_table(Ppn(0x80200));
        assert!(table.is_table());
        assert!(!table.is_leaf());
        assert_eq!(table.flags(), PteFlags::V);

        assert!(!PageTableEntry::EMPTY.is_valid());
        assert!(!PageTableEntry::EMPTY.is_leaf());
        assert!(!PageTableEntry::EMPTY.is_table());
    }

    #[test]
    fn test_set_flags_keeps_ppn() {
        let mut pte = PageTableEntry::new_leaf(Ppn(42), PteFlags::user_rwx());
        assert!(pte.is_user());
        pte.set_flags(pte.flags() - PteFlags::U);
        assert!(!pte.is_user());
        assert!(pte.is_leaf());
        assert_eq!(pte.ppn(), Ppn(42));
    }
}
