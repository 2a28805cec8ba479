//! Machines and their per-action entry points.

use crate::commit;
use crate::context::{Context, SharedContext};
use crate::error::MachineError;
use crate::interpreter::{self, ActionTable, RunOutcome};
use crate::point::TransitionPoint;
use crate::step::{Action, FnAction, Step};
use crate::token::Token;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type Rollback<S> = Box<dyn Fn(&Context<S>) -> TransitionPoint<S> + Send + Sync>;
type Observer<S> = Box<dyn Fn(&Context<S>) + Send + Sync>;

/// Configuration and context shared by every entry point of a machine.
struct Shared<S> {
    actions: ActionTable<S>,
    rollback: HashMap<Token, Rollback<S>>,
    observer: Option<Observer<S>>,
    context: SharedContext<S>,
}

impl<S> Shared<S>
where
    S: Serialize + DeserializeOwned,
{
    fn commit(&self, point: TransitionPoint<S>) -> Result<(), MachineError> {
        self.commit_with(|_| point)
    }

    /// Builds a point from the context, commits it and notifies the observer,
    /// all under one write lock.
    fn commit_with<F>(&self, make: F) -> Result<(), MachineError>
    where
        F: FnOnce(&Context<S>) -> TransitionPoint<S>,
    {
        self.context.write(|ctx| {
            let point = make(ctx);
            commit::apply(Some(point), ctx)?;
            if let Some(observer) = &self.observer {
                observer(ctx);
            }
            Ok(())
        })
    }
}

/// A set of named actions driving one shared context.
///
/// # Examples
///
/// ```
/// use ayatori::prelude::*;
/// use serde_json::json;
///
/// # #[tokio::main]
/// # async fn main() {
/// let machine = Machine::builder()
///     .default_token("Idle")
///     .default_state(|| json!({ "count": 0 }))
///     .action_fn("Start", |_, _, _| {
///         Ok(Step::sequence([
///             TransitionPoint::payload(json!({ "count": 1 })).into(),
///             TransitionPoint::to("Running").with_payload(json!({ "count": 2 })).into(),
///         ]))
///     })
///     .build()
///     .expect("valid machine");
///
/// machine.call("Start", Vec::new()).await.expect("run succeeds");
///
/// let ctx = machine.context().snapshot();
/// assert_eq!(ctx.current_state(), "Running");
/// assert_eq!(ctx.data()["count"], 2);
/// # }
/// ```
pub struct Machine<S> {
    shared: Arc<Shared<S>>,
    entries: HashMap<Token, EntryPoint<S>>,
}

impl<S> fmt::Debug for Machine<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Machine")
            .field("actions", &self.entries.keys().collect::<Vec<_>>())
            .field("rollback", &self.shared.rollback.keys().collect::<Vec<_>>())
            .field("observer", &self.shared.observer.is_some())
            .finish()
    }
}

impl<S> Machine<S>
where
    S: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Creates a new machine builder.
    pub fn builder() -> MachineBuilder<S> {
        MachineBuilder::new()
    }

    /// Returns the entry point of the action registered under `token`.
    pub fn entry(&self, token: &str) -> Option<&EntryPoint<S>> {
        self.entries.get(token)
    }

    /// Returns one entry point per registered action.
    ///
    /// The returned entry points share cancellation state with the ones
    /// held by the machine.
    pub fn entries(&self) -> HashMap<Token, EntryPoint<S>> {
        self.entries.clone()
    }

    /// Returns an iterator over all registered action tokens.
    pub fn tokens(&self) -> impl Iterator<Item = &Token> {
        self.entries.keys()
    }

    /// Calls the entry point of `token`.
    pub async fn call(&self, token: &str, args: Vec<Value>) -> Result<(), MachineError> {
        match self.entries.get(token) {
            Some(entry) => entry.call(args).await,
            None => Err(MachineError::ActionNotFound(Token::new(token))),
        }
    }

    /// Returns a handle to the machine's context.
    pub fn context(&self) -> SharedContext<S> {
        self.shared.context.clone()
    }
}

/// Externally callable entry point of one named action.
///
/// Calling it while an earlier call is still running flags the earlier run,
/// which stops at its next suspension point. Entry points of different
/// actions never preempt each other, and their commits to the shared
/// context interleave without ordering guarantees.
pub struct EntryPoint<S> {
    token: Token,
    shared: Arc<Shared<S>>,
    current: Arc<Mutex<CancellationToken>>,
}

impl<S> Clone for EntryPoint<S> {
    fn clone(&self) -> Self {
        Self {
            token: self.token.clone(),
            shared: Arc::clone(&self.shared),
            current: Arc::clone(&self.current),
        }
    }
}

impl<S> fmt::Debug for EntryPoint<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryPoint")
            .field("token", &self.token)
            .finish_non_exhaustive()
    }
}

impl<S> EntryPoint<S>
where
    S: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// The action this entry point runs.
    pub fn token(&self) -> &Token {
        &self.token
    }

    /// Runs the action with `args` until its steps are drained or the run is
    /// preempted.
    ///
    /// A preempted run returns `Ok(())` after committing the action's
    /// recovery point, if one is registered.
    ///
    /// # Errors
    ///
    /// Any error raised by an action, a producer, or a commit. Commits that
    /// landed before the error stay, and no recovery is attempted.
    pub async fn call(&self, args: Vec<Value>) -> Result<(), MachineError> {
        let cancel = self.renew();
        let initial = Step::Point(TransitionPoint::to(self.token.clone()).with_args(args));
        let shared = &self.shared;

        let outcome = interpreter::run(
            initial,
            &shared.actions,
            &shared.context,
            &cancel,
            |point| shared.commit(point),
        )
        .await
        .map_err(|e| {
            warn!("Action '{}' failed: {}", self.token, e);
            e
        })?;

        if outcome == RunOutcome::Cancelled || cancel.is_cancelled() {
            info!("Action '{}' was preempted", self.token);
            self.recover()?;
        } else {
            debug!("Action '{}' drained", self.token);
        }
        Ok(())
    }

    /// Flags the in-flight run, if any, without starting a new one.
    pub fn cancel(&self) {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel();
    }

    fn renew(&self) -> CancellationToken {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        current.cancel();
        *current = CancellationToken::new();
        current.clone()
    }

    fn recover(&self) -> Result<(), MachineError> {
        let Some(rollback) = self.shared.rollback.get(&self.token) else {
            return Ok(());
        };
        info!("Committing recovery for '{}'", self.token);
        self.shared.commit_with(|ctx| rollback(ctx))
    }
}

/// Builder for constructing [`Machine`] instances.
pub struct MachineBuilder<S> {
    default_token: Option<Token>,
    default_state: Option<Box<dyn FnOnce() -> S>>,
    actions: ActionTable<S>,
    rollback: HashMap<Token, Rollback<S>>,
    observer: Option<Observer<S>>,
}

impl<S> Default for MachineBuilder<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> MachineBuilder<S> {
    /// Creates a new empty builder.
    pub fn new() -> Self {
        Self {
            default_token: None,
            default_state: None,
            actions: HashMap::new(),
            rollback: HashMap::new(),
            observer: None,
        }
    }

    /// Sets the token the context starts at.
    pub fn default_token(mut self, token: impl Into<Token>) -> Self {
        self.default_token = Some(token.into());
        self
    }

    /// Sets the factory for the initial state. It runs once, in `build()`.
    pub fn default_state<F>(mut self, factory: F) -> Self
    where
        F: FnOnce() -> S + 'static,
    {
        self.default_state = Some(Box::new(factory));
        self
    }

    /// Registers an action.
    pub fn action<A>(mut self, token: impl Into<Token>, action: A) -> Self
    where
        A: Action<S> + 'static,
    {
        self.actions.insert(token.into(), Arc::new(action));
        self
    }

    /// Registers a synchronous closure as an action.
    pub fn action_fn<F>(self, token: impl Into<Token>, f: F) -> Self
    where
        F: Fn(&SharedContext<S>, &CancellationToken, &[Value]) -> Result<Step<S>, MachineError>
            + Send
            + Sync
            + 'static,
        S: Send + Sync + 'static,
    {
        self.action(token, FnAction(f))
    }

    /// Registers the recovery point of an action, committed after a
    /// preempted run of it.
    ///
    /// The callback runs while the context is write-locked. Use the
    /// `&Context` it is given; reading a captured [`SharedContext`] from
    /// inside it deadlocks.
    pub fn rollback<F>(mut self, token: impl Into<Token>, f: F) -> Self
    where
        F: Fn(&Context<S>) -> TransitionPoint<S> + Send + Sync + 'static,
    {
        self.rollback.insert(token.into(), Box::new(f));
        self
    }

    /// Sets the callback invoked after every commit.
    ///
    /// It sees exactly the context that commit produced, because it runs
    /// under the same write lock. Use the `&Context` it is given; reading a
    /// captured [`SharedContext`] from inside it deadlocks.
    pub fn observer<F>(mut self, f: F) -> Self
    where
        F: Fn(&Context<S>) + Send + Sync + 'static,
    {
        self.observer = Some(Box::new(f));
        self
    }

    /// Builds the machine and its context.
    pub fn build(self) -> Result<Machine<S>, MachineError> {
        let default_token = self.default_token.ok_or_else(|| {
            MachineError::Configuration("Default token must be specified".to_string())
        })?;
        let default_state = self.default_state.ok_or_else(|| {
            MachineError::Configuration("Default state must be specified".to_string())
        })?;

        if let Some(orphan) = self
            .rollback
            .keys()
            .find(|token| !self.actions.contains_key(*token))
        {
            return Err(MachineError::Configuration(format!(
                "Rollback registered for '{}' which has no action",
                orphan
            )));
        }

        let shared = Arc::new(Shared {
            context: SharedContext::new(Context::new(default_token, default_state())),
            actions: self.actions,
            rollback: self.rollback,
            observer: self.observer,
        });

        let entries = shared
            .actions
            .keys()
            .map(|token| {
                let entry = EntryPoint {
                    token: token.clone(),
                    shared: Arc::clone(&shared),
                    current: Arc::new(Mutex::new(CancellationToken::new())),
                };
                (token.clone(), entry)
            })
            .collect();

        Ok(Machine { shared, entries })
    }
}
