//! Stack machine that drains nested steps depth-first.
//!
//! The interpreter never recurses: every pending point and every producer
//! that still has items lives on an explicit stack, so nesting depth is
//! bounded by memory only.

use crate::context::SharedContext;
use crate::error::MachineError;
use crate::point::TransitionPoint;
use crate::step::{Action, Producer, Step};
use crate::token::Token;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Actions by token, shared between all entry points of a machine.
pub type ActionTable<S> = HashMap<Token, Arc<dyn Action<S>>>;

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The stack emptied.
    Drained,
    /// The run's token was flagged; remaining frames were discarded.
    Cancelled,
}

/// Drains `initial` and every step it leads to.
///
/// Each loop iteration looks at the top of the stack:
///
/// - a point whose token names an action is replaced by that action's result
/// - any other point is popped and handed to `on_terminal`
/// - a producer is asked for its next item, which is pushed on top of it;
///   an exhausted producer is popped
///
/// Action calls and stream polls are suspension points. Each one races
/// against `cancel`, and the flag is checked again after it and at the top
/// of every iteration. Synchronous work between them cannot be interrupted.
///
/// # Errors
///
/// Errors from actions, producers, and `on_terminal` abort the run as they
/// are. A JSON step that does not decode into a point fails with
/// [`MachineError::UnrecognizedStackElement`].
pub async fn run<S, F>(
    initial: Step<S>,
    actions: &ActionTable<S>,
    ctx: &SharedContext<S>,
    cancel: &CancellationToken,
    mut on_terminal: F,
) -> Result<RunOutcome, MachineError>
where
    F: FnMut(TransitionPoint<S>) -> Result<(), MachineError>,
{
    let mut stack: Vec<Step<S>> = Vec::new();
    push(&mut stack, initial);

    while let Some(frame) = stack.pop() {
        if cancel.is_cancelled() {
            return Ok(RunOutcome::Cancelled);
        }

        match frame {
            Step::Empty => {}
            Step::Json(value) => stack.push(Step::Point(decode(value)?)),
            Step::Point(point) => {
                let action = point.token.as_ref().and_then(|t| actions.get(t));
                let Some(action) = action else {
                    on_terminal(point)?;
                    continue;
                };

                debug!(
                    "Dispatching action '{}'",
                    point.token.as_ref().map_or("", |t| t.as_str())
                );
                let next = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Ok(RunOutcome::Cancelled),
                    next = action.execute(ctx, cancel, &point.args) => next?,
                };
                if cancel.is_cancelled() {
                    return Ok(RunOutcome::Cancelled);
                }
                // Tail chain: the action's result takes the point's place.
                push(&mut stack, next);
            }
            Step::Producer(mut producer) => {
                let item = match &mut producer {
                    Producer::Sequence(seq) => seq.next(),
                    Producer::Iter(iter) => iter.next(),
                    Producer::Stream(stream) => {
                        let item = tokio::select! {
                            biased;
                            _ = cancel.cancelled() => return Ok(RunOutcome::Cancelled),
                            item = stream.next() => item,
                        };
                        if cancel.is_cancelled() {
                            return Ok(RunOutcome::Cancelled);
                        }
                        item
                    }
                };

                if let Some(item) = item {
                    let step = item?;
                    stack.push(Step::Producer(producer));
                    push(&mut stack, step);
                }
            }
        }
    }

    Ok(RunOutcome::Drained)
}

fn push<S>(stack: &mut Vec<Step<S>>, step: Step<S>) {
    if !step.is_empty() {
        stack.push(step);
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPoint {
    token: Option<Token>,
    #[serde(default)]
    args: Vec<Value>,
    payload: Option<Value>,
}

fn decode<S>(value: Value) -> Result<TransitionPoint<S>, MachineError> {
    let found = value.to_string();
    let raw: RawPoint = serde_json::from_value(value)
        .map_err(|_| MachineError::UnrecognizedStackElement { found })?;

    Ok(TransitionPoint {
        token: raw.token,
        args: raw.args,
        payload: raw.payload,
        transform: None,
    })
}
