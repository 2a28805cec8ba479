//! # Ayatori (綾取り)
//!
//! A cooperative, cancellable state machine for Rust.
//!
//! "Ayatori" is the string figure game: one loop of thread passed from
//! figure to figure. Here one shared context is passed from action to action.
//!
//! ## Features
//!
//! - **Nested steps**: actions return a point, nothing, or a producer of
//!   further steps; producers nest to any depth and drain depth-first
//! - **Stack based**: the interpreter keeps its own stack and never recurses
//! - **Preemption**: calling an action again cancels its previous run at the
//!   next await point, with an optional recovery point
//! - **Deep merge**: payloads are JSON partials merged into a serde state,
//!   with arrays replaced rather than concatenated
//! - **Error Handling**: Structured errors with `thiserror`
//!
//! ## Quick Start
//!
//! ```rust
//! use ayatori::prelude::*;
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let machine = Machine::builder()
//!     .default_token("Idle")
//!     .default_state(|| json!({ "greeting": null }))
//!     .action_fn("Greet", |_, _, args| {
//!         Ok(TransitionPoint::to("Greeted")
//!             .with_payload(json!({ "greeting": args.first().cloned() }))
//!             .into())
//!     })
//!     .build()
//!     .expect("valid machine");
//!
//! machine
//!     .call("Greet", vec![json!("Hello, Ayatori!")])
//!     .await
//!     .expect("run succeeds");
//!
//! let ctx = machine.context().snapshot();
//! assert_eq!(ctx.current_state(), "Greeted");
//! assert_eq!(ctx.data()["greeting"], "Hello, Ayatori!");
//! # }
//! ```
//!
//! ## Producers and chaining
//!
//! A point whose token names an action runs that action next. Producers
//! yield steps one at a time; each yielded step is drained before the
//! producer is asked again.
//!
//! ```rust
//! use ayatori::prelude::*;
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let machine = Machine::builder()
//!     .default_token("Idle")
//!     .default_state(|| json!({ "log": [] }))
//!     .action_fn("Outer", |_, _, _| {
//!         Ok(Step::sequence([
//!             TransitionPoint::to("Inner").into(),
//!             TransitionPoint::payload(json!({ "log": ["outer"] })).into(),
//!         ]))
//!     })
//!     .action_fn("Inner", |_, _, _| {
//!         Ok(TransitionPoint::to("Done").with_payload(json!({ "log": ["inner"] })).into())
//!     })
//!     .build()
//!     .expect("valid machine");
//!
//! machine.call("Outer", Vec::new()).await.expect("run succeeds");
//!
//! let ctx = machine.context().snapshot();
//! assert_eq!(ctx.current_state(), "Done");
//! assert_eq!(ctx.data()["log"], json!(["outer"]));
//! # }
//! ```
//!
//! ## Error Handling
//!
//! ```rust
//! use ayatori::prelude::*;
//! use serde_json::{json, Value};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let machine = Machine::<Value>::builder()
//!     .default_token("Idle")
//!     .default_state(|| json!({}))
//!     .action_fn("Fail", |_, _, _| Err(MachineError::action("Fail", "no route")))
//!     .build()
//!     .expect("valid machine");
//!
//! if let Err(error) = machine.call("Fail", Vec::new()).await {
//!     match error {
//!         MachineError::ActionFailed { token, details } => {
//!             eprintln!("Action {} failed: {}", token, details);
//!         }
//!         _ => eprintln!("Error: {}", error),
//!     }
//! }
//! # }
//! ```

mod context;
mod error;
mod machine;
mod point;
mod step;
mod token;

pub mod commit;
pub mod interpreter;
pub mod merge;
pub mod prelude;

pub use context::{Context, SharedContext};
pub use error::MachineError;
pub use interpreter::{ActionTable, RunOutcome};
pub use machine::{EntryPoint, Machine, MachineBuilder};
pub use point::{Transform, TransitionPoint};
pub use step::{Action, FnAction, Producer, Sequence, Step};
pub use token::Token;
pub use tokio_util::sync::CancellationToken;

/// Macro to define an action type with minimal boilerplate
///
/// This macro creates a unit struct with:
/// - `const TOKEN: &'static str` - compile-time action token
/// - `token()` returning it as a [`Token`]
/// - `Debug` derive
/// - `Default` implementation
///
/// # Example
///
/// ```rust
/// use ayatori::define_action;
///
/// define_action!(Checkout);
/// assert_eq!(Checkout::TOKEN, "Checkout");
/// assert_eq!(Checkout::token(), "Checkout");
/// ```
#[macro_export]
macro_rules! define_action {
    ($name:ident) => {
        #[derive(Debug)]
        pub struct $name;

        impl $name {
            /// Action token as a compile-time constant
            #[allow(dead_code)]
            pub const TOKEN: &'static str = stringify!($name);

            /// Action token
            #[allow(dead_code)]
            pub fn token() -> $crate::Token {
                $crate::Token::new(Self::TOKEN)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self
            }
        }
    };
}
