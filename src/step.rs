use crate::context::SharedContext;
use crate::error::MachineError;
use crate::point::TransitionPoint;
use async_trait::async_trait;
use futures::stream::{BoxStream, Stream, StreamExt};
use serde_json::Value;
use std::fmt;
use tokio_util::sync::CancellationToken;

/// What an action hands back to the interpreter.
pub enum Step<S> {
    /// Nothing to do.
    Empty,
    /// A transition: committed, or dispatched when its token names an action.
    Point(TransitionPoint<S>),
    /// A sequence of further steps, drained depth-first.
    Producer(Producer<S>),
    /// A step described as JSON, decoded into a point when it is reached.
    ///
    /// The object may carry `token`, `args` and `payload` keys and nothing else.
    Json(Value),
}

/// A source of steps, consumed one at a time.
pub enum Producer<S> {
    /// Steps collected up front; see [`Sequence`].
    Sequence(Sequence<S>),
    /// Yields lazily without suspending.
    Iter(Box<dyn Iterator<Item = Result<Step<S>, MachineError>> + Send>),
    /// May suspend between items; each poll is a cancellation point.
    Stream(BoxStream<'static, Result<Step<S>, MachineError>>),
}

/// Synchronous producer backed by a `Vec`.
///
/// Dropping a sequence flattens nested sequences onto a worklist, so an
/// unexecuted tree of any depth is released without recursion.
pub struct Sequence<S> {
    items: std::vec::IntoIter<Result<Step<S>, MachineError>>,
}

impl<S> Sequence<S> {
    pub fn new(items: Vec<Result<Step<S>, MachineError>>) -> Self {
        Self {
            items: items.into_iter(),
        }
    }
}

impl<S> Iterator for Sequence<S> {
    type Item = Result<Step<S>, MachineError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.items.next()
    }
}

impl<S> Drop for Sequence<S> {
    fn drop(&mut self) {
        let mut pending: Vec<_> = std::mem::take(&mut self.items).collect();
        while let Some(item) = pending.pop() {
            if let Ok(Step::Producer(Producer::Sequence(mut nested))) = item {
                // `nested` drops empty once its items are moved out.
                pending.extend(std::mem::take(&mut nested.items));
            }
        }
    }
}

impl<S> Step<S> {
    /// Synchronous producer over infallible steps.
    ///
    /// ```
    /// use ayatori::{Step, TransitionPoint};
    /// use serde_json::json;
    ///
    /// let step: Step<serde_json::Value> = Step::sequence([
    ///     TransitionPoint::payload(json!({ "count": 1 })).into(),
    ///     TransitionPoint::payload(json!({ "count": 2 })).into(),
    /// ]);
    /// assert!(matches!(step, Step::Producer(_)));
    /// ```
    pub fn sequence<I>(steps: I) -> Self
    where
        I: IntoIterator<Item = Step<S>>,
    {
        Self::try_sequence(steps.into_iter().map(Ok))
    }

    /// Synchronous producer whose items may fail.
    pub fn try_sequence<I>(steps: I) -> Self
    where
        I: IntoIterator<Item = Result<Step<S>, MachineError>>,
    {
        Step::Producer(Producer::Sequence(Sequence::new(steps.into_iter().collect())))
    }

    /// Synchronous producer pulled lazily, one item per request.
    pub fn generate<I>(steps: I) -> Self
    where
        I: IntoIterator<Item = Result<Step<S>, MachineError>>,
        I::IntoIter: Send + 'static,
    {
        Step::Producer(Producer::Iter(Box::new(steps.into_iter())))
    }

    /// Asynchronous producer over infallible steps.
    pub fn stream<T>(steps: T) -> Self
    where
        T: Stream<Item = Step<S>> + Send + 'static,
        S: 'static,
    {
        Step::Producer(Producer::Stream(steps.map(Ok).boxed()))
    }

    /// Asynchronous producer whose items may fail.
    pub fn try_stream<T>(steps: T) -> Self
    where
        T: Stream<Item = Result<Step<S>, MachineError>> + Send + 'static,
    {
        Step::Producer(Producer::Stream(steps.boxed()))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Step::Empty)
    }
}

impl<S> From<TransitionPoint<S>> for Step<S> {
    fn from(point: TransitionPoint<S>) -> Self {
        Step::Point(point)
    }
}

impl<S> From<Option<TransitionPoint<S>>> for Step<S> {
    fn from(point: Option<TransitionPoint<S>>) -> Self {
        point.map_or(Step::Empty, Step::Point)
    }
}

impl<S> fmt::Debug for Step<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Empty => f.write_str("Empty"),
            Step::Point(point) => f.debug_tuple("Point").field(point).finish(),
            Step::Producer(Producer::Sequence(_)) => f.write_str("Producer(Sequence)"),
            Step::Producer(Producer::Iter(_)) => f.write_str("Producer(Iter)"),
            Step::Producer(Producer::Stream(_)) => f.write_str("Producer(Stream)"),
            Step::Json(value) => f.debug_tuple("Json").field(value).finish(),
        }
    }
}

/// A named unit of behavior computing the next step of a machine.
///
/// Actions read the shared context; they never write it directly. Every
/// change flows through the points they return.
///
/// Cancellation is cooperative. The interpreter abandons an action at its
/// await points once the run's token is flagged, but synchronous work
/// between await points cannot be interrupted.
///
/// # Examples
///
/// ```
/// use ayatori::prelude::*;
/// use async_trait::async_trait;
/// use serde_json::{json, Value};
///
/// struct Fetch;
///
/// #[async_trait]
/// impl Action<Value> for Fetch {
///     async fn execute(
///         &self,
///         _ctx: &SharedContext<Value>,
///         _cancel: &CancellationToken,
///         args: &[Value],
///     ) -> Result<Step<Value>, MachineError> {
///         tokio::task::yield_now().await;
///         Ok(TransitionPoint::to("Fetched")
///             .with_payload(json!({ "id": args.first().cloned() }))
///             .into())
///     }
/// }
/// ```
#[async_trait]
pub trait Action<S>: Send + Sync {
    /// Computes the next step.
    ///
    /// # Arguments
    ///
    /// * `ctx` - Read access to the shared context; clone it to use inside producers
    /// * `cancel` - Token of the run this call belongs to
    /// * `args` - Arguments of the point that dispatched this action
    async fn execute(
        &self,
        ctx: &SharedContext<S>,
        cancel: &CancellationToken,
        args: &[Value],
    ) -> Result<Step<S>, MachineError>;
}

/// Adapts a synchronous closure into an [`Action`].
pub struct FnAction<F>(pub F);

#[async_trait]
impl<S, F> Action<S> for FnAction<F>
where
    S: Send + Sync + 'static,
    F: Fn(&SharedContext<S>, &CancellationToken, &[Value]) -> Result<Step<S>, MachineError>
        + Send
        + Sync,
{
    async fn execute(
        &self,
        ctx: &SharedContext<S>,
        cancel: &CancellationToken,
        args: &[Value],
    ) -> Result<Step<S>, MachineError> {
        (self.0)(ctx, cancel, args)
    }
}
