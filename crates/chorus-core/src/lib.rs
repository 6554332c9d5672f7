pub mod actions;
pub mod config;
pub mod error;
pub mod parser;
pub mod persistence;
pub mod reducer;
pub mod resolver;
pub mod reveal;
pub mod roster;
pub mod speakers;
pub mod state;
pub mod view;

pub use actions::*;
pub use config::*;
pub use error::*;
pub use parser::*;
pub use persistence::*;
pub use reducer::*;
pub use resolver::*;
pub use reveal::*;
pub use roster::*;
pub use speakers::*;
pub use state::*;
pub use view::*;
