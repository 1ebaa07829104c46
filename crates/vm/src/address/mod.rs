//! 地址模块
//!
//! 物理地址、虚拟地址与页码的类型化封装。
//!
//! - [`Paddr`] / [`Vaddr`] - 物理与虚拟地址
//! - [`Ppn`] / [`Vpn`] - 物理与虚拟页码
//! - [`PpnRange`] / [`VpnRange`] - 半开页码区间
//! - [`UsizeConvert`] / [`AlignOps`] - 与 usize 的转换、页对齐
pub mod operations;
pub mod page_num;
pub mod types;

pub use operations::{AlignOps, UsizeConvert, page_round_down, page_round_up};
pub use page_num::{PageNum, Ppn, PpnRange, Vpn, VpnRange};
pub use types::{ConvertablePaddr, Paddr, Vaddr};
