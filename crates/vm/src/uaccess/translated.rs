//! 经由页表翻译的拷贝

use super::UserAccess;
use crate::address::{AlignOps, PageNum, Ppn, Vaddr};
use crate::config::PAGE_SIZE;
use crate::frame_allocator::frame_bytes;
use crate::page_table::{PageTable, PagingError, PagingResult};

impl PageTable<'_> {
    /// `va` 所在用户页的物理页号与页内偏移
    fn user_frame(&self, va: usize) -> PagingResult<(Ppn, usize)> {
        let va = Vaddr(va);
        let pa = self.translate(va).ok_or(PagingError::NotMapped)?;
        Ok((Ppn::from_addr_floor(pa), va.page_offset()))
    }
}

impl UserAccess for PageTable<'_> {
    fn copy_out(&self, dst_va: usize, src: &[u8]) -> PagingResult<()> {
        let mut va = dst_va;
        let mut rest = src;
        while !rest.is_empty() {
            let (ppn, offset) = self.user_frame(va)?;
            // SAFETY: 表项有效且带 U 位，帧由该地址空间持有
            let page = unsafe { frame_bytes(ppn) };
            let n = rest.len().min(PAGE_SIZE - offset);
            page[offset..offset + n].copy_from_slice(&rest[..n]);
            rest = &rest[n..];
            va += n;
        }
        Ok(())
    }

    fn copy_in(&self, dst: &mut [u8], src_va: usize) -> PagingResult<()> {
        let mut va = src_va;
        let mut done = 0;
        while done < dst.len() {
            let (ppn, offset) = self.user_frame(va)?;
            // SAFETY: 表项有效且带 U 位，帧由该地址空间持有
            let page = unsafe { frame_bytes(ppn) };
            let n = (dst.len() - done).min(PAGE_SIZE - offset);
            dst[done..done + n].copy_from_slice(&page[offset..offset + n]);
            done += n;
            va += n;
        }
        Ok(())
    }

    fn copy_in_str(&self, dst: &mut [u8], src_va: usize) -> PagingResult<usize> {
        let mut va = src_va;
        let mut len = 0;
        while len < dst.len() {
            let (ppn, offset) = self.user_frame(va)?;
            // SAFETY: 表项有效且带 U 位，帧由该地址空间持有
            let page = unsafe { frame_bytes(ppn) };
            let n = (dst.len() - len).min(PAGE_SIZE - offset);
            for &byte in &page[offset..offset + n] {
                dst[len] = byte;
                if byte == 0 {
                    return Ok(len);
                }
                len += 1;
            }
            va += n;
        }
        Err(PagingError::MissingTerminator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_space::MemorySpace;
    use crate::test_utils::TestMachine;

    #[test]
    fn test_copy_out_then_in() {
        let machine = TestMachine::new(16);
        let mut space = MemorySpace::new(machine.frames()).unwrap();
        space.grow(2 * PAGE_SIZE).unwrap();
        let table = space.page_table();

        table.copy_out(0x100, b"hello").unwrap();
        let mut buf = [0u8; 5];
        table.copy_in(&mut buf, 0x100).unwrap();
        assert_eq!(&buf, b"hello");

        // 跨页
        let data: [u8; 64] = core::array::from_fn(|i| i as u8);
        table.copy_out(PAGE_SIZE - 10, &data).unwrap();
        let mut back = [0u8; 64];
        table.copy_in(&mut back, PAGE_SIZE - 10).unwrap();
        assert_eq!(back, data);

        space.destroy();
    }

    #[test]
    fn test_copy_out_is_not_rolled_back() {
        let machine = TestMachine::new(16);
        let mut space = MemorySpace::new(machine.frames()).unwrap();
        space.grow(PAGE_SIZE).unwrap();
        let table = space.page_table();

        let data = [0x5Au8; 8];
        assert_eq!(
            table.copy_out(PAGE_SIZE - 4, &data),
            Err(PagingError::NotMapped)
        );
        let mut tail = [0u8; 4];
        table.copy_in(&mut tail, PAGE_SIZE - 4).unwrap();
        assert_eq!(tail, [0x5A; 4]);

        let mut buf = [0u8; 8];
        assert_eq!(
            table.copy_in(&mut buf, PAGE_SIZE - 4),
            Err(PagingError::NotMapped)
        );
        space.destroy();
    }

    #[test]
    fn test_copy_in_str() {
        let machine = TestMachine::new(16);
        let mut space = MemorySpace::new(machine.frames()).unwrap();
        space.grow(2 * PAGE_SIZE).unwrap();
        let table = space.page_table();

        table.copy_out(0x40, b"init\0").unwrap();
        let mut buf = [0xFFu8; 16];
        assert_eq!(table.copy_in_str(&mut buf, 0x40), Ok(4));
        assert_eq!(&buf[..5], b"init\0");

        let mut short = [0u8; 4];
        assert_eq!(
            table.copy_in_str(&mut short, 0x40),
            Err(PagingError::MissingTerminator)
        );
        assert_eq!(&short, b"init");

        let mut empty = [0u8; 0];
        assert_eq!(
            table.copy_in_str(&mut empty, 0x40),
            Err(PagingError::MissingTerminator)
        );

        // 字符串跨越进程末尾
        table.copy_out(2 * PAGE_SIZE - 3, b"abc").unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(
            table.copy_in_str(&mut buf, 2 * PAGE_SIZE - 3),
            Err(PagingError::NotMapped)
        );
        space.destroy();
    }

    #[test]
    fn test_guard_page_is_not_copyable() {
        let machine = TestMachine::new(16);
        let mut space = MemorySpace::new(machine.frames()).unwrap();
        space.grow(2 * PAGE_SIZE).unwrap();
        space.page_table_mut().clear_user(Vaddr(0));

        let table = space.page_table();
        assert_eq!(table.copy_out(0x10, b"x"), Err(PagingError::NotMapped));
        table.copy_out(PAGE_SIZE, b"x").unwrap();
        space.destroy();
    }

    #[test]
    fn test_empty_copies_succeed_anywhere() {
        let machine = TestMachine::new(4);
        let table = PageTable::new(machine.frames()).unwrap();
        table.copy_out(0x9000, &[]).unwrap();
        table.copy_in(&mut [], 0x9000).unwrap();
        table.destroy();
    }
}
