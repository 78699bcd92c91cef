//! Reference strategies exercising the engine's callback contract.

pub mod entry_exit;
pub mod ma_cross;

pub use entry_exit::EntryExitStrategy;
pub use ma_cross::{MaCrossStrategy, MaMode, MaPriceSource, MaRule};
