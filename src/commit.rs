//! Applying transition points to a context.

use crate::context::Context;
use crate::error::MachineError;
use crate::merge::deep_merge;
use crate::point::TransitionPoint;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

/// Applies `point` to `ctx` in place.
///
/// If the point has a payload, the next state is `transform(state, payload)`
/// when a transform is given, or the deep merge of the payload into the
/// state otherwise. A transform without a payload is ignored. The token and
/// state are set together once the next state is known.
///
/// # Errors
///
/// [`MachineError::Merge`] when the merged JSON no longer fits `S`. Nothing
/// is applied in that case: the context keeps its token and state.
pub fn apply<S>(point: Option<TransitionPoint<S>>, ctx: &mut Context<S>) -> Result<(), MachineError>
where
    S: Serialize + DeserializeOwned,
{
    let Some(point) = point else {
        return Ok(());
    };

    let data = match (point.transform, point.payload) {
        (Some(transform), Some(payload)) => Some(transform(ctx.data(), &payload)),
        (_, Some(payload)) => Some(merge_state(ctx.data(), &payload)?),
        _ => None,
    };

    if let Some(token) = point.token {
        debug!("Moving from '{}' to '{}'", ctx.current_state(), token);
        ctx.set_current(token);
    }
    if let Some(data) = data {
        ctx.set_data(data);
    }
    Ok(())
}

/// Deep merges a JSON payload into a typed state.
pub fn merge_state<S>(state: &S, payload: &serde_json::Value) -> Result<S, MachineError>
where
    S: Serialize + DeserializeOwned,
{
    let base = serde_json::to_value(state)?;
    Ok(serde_json::from_value(deep_merge(&base, payload))?)
}
