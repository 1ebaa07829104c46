//! 直接拷贝路径的调用计数

use core::fmt::{self, Write};
use core::sync::atomic::{AtomicUsize, Ordering};

/// `copy_in` 与 `copy_in_str` 的调用次数
#[derive(Debug, Default)]
pub struct CopyStats {
    copy_in: AtomicUsize,
    copy_in_str: AtomicUsize,
}

/// 内核全局计数
pub static COPY_STATS: CopyStats = CopyStats::new();

impl CopyStats {
    /// 两个计数均为 0
    pub const fn new() -> Self {
        CopyStats {
            copy_in: AtomicUsize::new(0),
            copy_in_str: AtomicUsize::new(0),
        }
    }

    pub(crate) fn record_copy_in(&self) {
        self.copy_in.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_copy_in_str(&self) {
        self.copy_in_str.fetch_add(1, Ordering::Relaxed);
    }

    /// `copy_in` 调用次数
    pub fn copy_in_calls(&self) -> usize {
        self.copy_in.load(Ordering::Relaxed)
    }

    /// `copy_in_str` 调用次数
    pub fn copy_in_str_calls(&self) -> usize {
        self.copy_in_str.load(Ordering::Relaxed)
    }

    /// 以 `copyin: N\ncopyinstr: M\n` 的格式写入 `buf`，超出部分被截断。
    ///
    /// 返回实际写入的字节数。
    pub fn render(&self, buf: &mut [u8]) -> usize {
        let mut out = SliceWriter { buf, len: 0 };
        // SliceWriter 从不报错，截断是静默的
        let _ = write!(
            out,
            "copyin: {}\ncopyinstr: {}\n",
            self.copy_in_calls(),
            self.copy_in_str_calls()
        );
        out.len
    }
}

/// 写满即止的定长缓冲区
struct SliceWriter<'b> {
    buf: &'b mut [u8],
    len: usize,
}

impl Write for SliceWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let room = self.buf.len() - self.len;
        let n = s.len().min(room);
        self.buf[self.len..self.len + n].copy_from_slice(&s.as_bytes()[..n]);
        self.len += n;
        Ok(())
    }
}
