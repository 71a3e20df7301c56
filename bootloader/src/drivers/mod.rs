//! Device drivers - VGA text output for boot diagnostics

pub mod vga;

pub use vga::{Color, TextSink, VgaTerminal};
