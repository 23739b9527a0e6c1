pub mod chat;
pub mod history;
pub mod plan;
pub mod task;
pub mod workflow;

pub use chat::*;
pub use history::*;
pub use plan::*;
pub use task::*;
pub use workflow::*;
