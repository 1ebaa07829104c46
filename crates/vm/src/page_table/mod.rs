//! 页表模块
//!
//! Sv39 三级页表的构建、映射、解除映射、翻译与销毁。
mod entry;
mod table;

use core::fmt;

pub use entry::{PageTableEntry, PteFlags};
pub use table::PageTable;

/// 可恢复的分页错误，由调用者转换为进程可见的错误码
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagingError {
    /// 帧分配失败
    FrameAllocFailed,
    /// 虚拟地址未映射，或对用户不可访问
    NotMapped,
    /// 地址越过进程大小或发生溢出
    InvalidAddress,
    /// 在长度上限内没有找到字符串结束符
    MissingTerminator,
    /// 初始程序镜像超过一页
    ImageTooLarge,
}

impl fmt::Display for PagingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            PagingError::FrameAllocFailed => "out of physical frames",
            PagingError::NotMapped => "address not mapped",
            PagingError::InvalidAddress => "address out of range",
            PagingError::MissingTerminator => "string terminator not found",
            PagingError::ImageTooLarge => "initial image larger than a page",
        };
        f.write_str(msg)
    }
}

/// 分页操作的结果类型
pub type PagingResult<T> = Result<T, PagingError>;
