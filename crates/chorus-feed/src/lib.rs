pub mod command;
pub mod contracts;
pub mod prompt;
pub mod source;

pub use command::*;
pub use contracts::*;
pub use prompt::*;
pub use source::*;
