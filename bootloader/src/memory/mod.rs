//! Memory management - the boot heap arena

pub mod heap;

pub use heap::{BootHeap, HeapBuf};
