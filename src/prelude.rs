//! Commonly used types and traits

pub use crate::context::{Context, SharedContext};
pub use crate::define_action;
pub use crate::error::MachineError;
pub use crate::machine::{EntryPoint, Machine};
pub use crate::point::TransitionPoint;
pub use crate::step::{Action, Step};
pub use crate::token::Token;
pub use tokio_util::sync::CancellationToken;
