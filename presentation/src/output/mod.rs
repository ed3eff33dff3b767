//! Output formatting for engagement reports

pub mod console;
