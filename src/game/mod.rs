//! Game server side: the child process, its console framing, and the
//! event classifier and formatters.

pub mod classifier;
pub mod codec;
pub mod formatter;
pub mod process;

// Re-export commonly used types
pub use classifier::LineClassifier;
pub use process::{console_lines, GameProcess, ProcessStdin};
