//! 直接拷贝路径
//!
//! 进程的用户页以“去掉 U 位”的形式镜像在它私有的内核页表中
//! （见 [`MemorySpace::mirror_into`](crate::MemorySpace::mirror_into)）。
//! 该内核页表处于活动状态时，内核可以像访问自己的内存一样访问用户地址，
//! 拷贝只需检查 `[va, va + len)` 落在进程大小之内，无需逐页遍历页表。

use super::{CopyStats, UserAccess};
use crate::address::{AlignOps, ConvertablePaddr, Vaddr};
use crate::config::PAGE_SIZE;
use crate::page_table::{PageTable, PagingError, PagingResult};

/// 直接路径读写用户地址的方式
pub trait ActiveMapping {
    /// 从虚拟地址 `va` 读取 `dst.len()` 字节
    ///
    /// # Safety
    /// `[va, va + dst.len())` 必须在此映射中可读
    unsafe fn read(&self, va: usize, dst: &mut [u8]);

    /// 把 `src` 写到虚拟地址 `va`
    ///
    /// # Safety
    /// `[va, va + src.len())` 必须在此映射中可写
    unsafe fn write(&self, va: usize, src: &[u8]);
}

/// 当前活动页表：虚拟地址由硬件翻译，直接解引用
#[derive(Debug, Clone, Copy, Default)]
pub struct HardwareMapping;

impl ActiveMapping for HardwareMapping {
    unsafe fn read(&self, va: usize, dst: &mut [u8]) {
        unsafe { core::ptr::copy_nonoverlapping(va as *const u8, dst.as_mut_ptr(), dst.len()) };
    }

    unsafe fn write(&self, va: usize, src: &[u8]) {
        unsafe { core::ptr::copy_nonoverlapping(src.as_ptr(), va as *mut u8, src.len()) };
    }
}

/// 以软件方式按内核视角翻译：对没有启用 MMU 的环境（例如宿主机测试）
/// 模拟“这张内核页表处于活动状态”
impl ActiveMapping for PageTable<'_> {
    unsafe fn read(&self, va: usize, dst: &mut [u8]) {
        let mut done = 0;
        while done < dst.len() {
            let (ptr, n) = kernel_chunk(self, va + done, dst.len() - done);
            unsafe { core::ptr::copy_nonoverlapping(ptr, dst[done..].as_mut_ptr(), n) };
            done += n;
        }
    }

    unsafe fn write(&self, va: usize, src: &[u8]) {
        let mut done = 0;
        while done < src.len() {
            let (ptr, n) = kernel_chunk(self, va + done, src.len() - done);
            unsafe { core::ptr::copy_nonoverlapping(src[done..].as_ptr(), ptr, n) };
            done += n;
        }
    }
}

/// `va` 处在同一页内最多 `len` 字节的内核可访问指针
///
/// # Panics
/// `va` 在内核视角下未映射，等同于内核态缺页
fn kernel_chunk(table: &PageTable<'_>, va: usize, len: usize) -> (*mut u8, usize) {
    let Some(pa) = table.translate_kernel(Vaddr(va)) else {
        panic!("uaccess: kernel page fault at {:#x}", va);
    };
    let n = len.min(PAGE_SIZE - Vaddr(va).page_offset());
    (pa.to_vaddr().as_mut_ptr::<u8>(), n)
}

/// 直接拷贝：以进程大小做边界检查后经由 [`ActiveMapping`] 访问用户内存
pub struct DirectAccess<'m> {
    size: usize,
    mapping: &'m dyn ActiveMapping,
    stats: &'m CopyStats,
}

impl<'m> DirectAccess<'m> {
    /// 为大小为 `size` 的进程创建直接拷贝器，每次 `copy_in` / `copy_in_str` 都计入 `stats`
    ///
    /// # Safety
    /// 在返回值存活期间，`[0, size)` 必须在 `mapping` 中可读写，
    /// 即进程的用户页已全部镜像到当前活动的内核页表中。
    pub unsafe fn new(size: usize, mapping: &'m dyn ActiveMapping, stats: &'m CopyStats) -> Self {
        DirectAccess {
            size,
            mapping,
            stats,
        }
    }

    /// 进程大小
    pub fn size(&self) -> usize {
        self.size
    }

    fn check(&self, va: usize, len: usize) -> PagingResult<()> {
        let end = va.checked_add(len).ok_or(PagingError::InvalidAddress)?;
        if va >= self.size || end > self.size {
            return Err(PagingError::InvalidAddress);
        }
        Ok(())
    }
}

impl UserAccess for DirectAccess<'_> {
    fn copy_out(&self, dst_va: usize, src: &[u8]) -> PagingResult<()> {
        if src.is_empty() {
            return Ok(());
        }
        self.check(dst_va, src.len())?;
        // SAFETY: 范围在 [0, size) 内，由构造时的约定保证可写
        unsafe { self.mapping.write(dst_va, src) };
        Ok(())
    }

    fn copy_in(&self, dst: &mut [u8], src_va: usize) -> PagingResult<()> {
        self.stats.record_copy_in();
        if dst.is_empty() {
            return Ok(());
        }
        self.check(src_va, dst.len())?;
        // SAFETY: 同上
        unsafe { self.mapping.read(src_va, dst) };
        Ok(())
    }

    fn copy_in_str(&self, dst: &mut [u8], src_va: usize) -> PagingResult<usize> {
        self.stats.record_copy_in_str();
        for (i, slot) in dst.iter_mut().enumerate() {
            let va = src_va.checked_add(i).ok_or(PagingError::InvalidAddress)?;
            if va >= self.size {
                return Err(PagingError::InvalidAddress);
            }
            let mut byte = [0u8];
            // SAFETY: va < size
            unsafe { self.mapping.read(va, &mut byte) };
            *slot = byte[0];
            if byte[0] == 0 {
                return Ok(i);
            }
        }
        Err(PagingError::MissingTerminator)
    }
}
