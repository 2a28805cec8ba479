//! A traffic light cycling through its phases.
//!
//! Calling `Cycle` again while a cycle is running preempts it; the rollback
//! switches the light to flashing amber.
//!
//! Run with: `cargo run --example traffic_light`

use async_trait::async_trait;
use ayatori::prelude::*;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Light {
    color: String,
    cycles: u32,
    history: Vec<String>,
}

define_action!(Cycle);
define_action!(Phase);

#[async_trait]
impl Action<Light> for Cycle {
    async fn execute(
        &self,
        ctx: &SharedContext<Light>,
        _cancel: &CancellationToken,
        args: &[Value],
    ) -> Result<Step<Light>, MachineError> {
        let delay = args.first().and_then(Value::as_u64).unwrap_or(50);
        let cycles = ctx.read(|c| c.data().cycles);

        let phases = stream::iter(["green", "amber", "red"]).then(move |color| async move {
            tokio::time::sleep(Duration::from_millis(delay)).await;
            Step::from(TransitionPoint::to(Phase::TOKEN).with_args([json!(color)]))
        });
        let done = stream::once(async move {
            Step::from(TransitionPoint::payload(json!({ "cycles": cycles + 1 })))
        });
        Ok(Step::stream(phases.chain(done)))
    }
}

#[async_trait]
impl Action<Light> for Phase {
    async fn execute(
        &self,
        _ctx: &SharedContext<Light>,
        _cancel: &CancellationToken,
        args: &[Value],
    ) -> Result<Step<Light>, MachineError> {
        let color = args
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| MachineError::action(Phase::TOKEN, "missing color"))?
            .to_string();

        Ok(TransitionPoint::to(color.clone())
            .with_payload(json!({ "color": color }))
            .with_transform(|light: &Light, payload: &Value| {
                let mut next = light.clone();
                if let Some(color) = payload["color"].as_str() {
                    next.color = color.to_string();
                    next.history.push(color.to_string());
                }
                next
            })
            .into())
    }
}

#[tokio::main]
async fn main() -> Result<(), MachineError> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let machine = Machine::builder()
        .default_token("off")
        .default_state(|| Light {
            color: "off".to_string(),
            cycles: 0,
            history: Vec::new(),
        })
        .action(Cycle::TOKEN, Cycle)
        .action(Phase::TOKEN, Phase)
        .rollback(Cycle::TOKEN, |_| {
            TransitionPoint::to("flashing").with_payload(json!({ "color": "flashing-amber" }))
        })
        .observer(|ctx| info!("light is {} ({:?})", ctx.current_state(), ctx.data()))
        .build()?;

    machine.call(Cycle::TOKEN, vec![json!(20)]).await?;

    let cycle = machine
        .entry(Cycle::TOKEN)
        .cloned()
        .ok_or_else(|| MachineError::ActionNotFound(Cycle::token()))?;
    let slow = cycle.clone();
    let running = tokio::spawn(async move { slow.call(vec![json!(200)]).await });
    tokio::time::sleep(Duration::from_millis(250)).await;

    // Preempts the slow cycle after its first phase.
    cycle.call(vec![json!(10)]).await?;
    running
        .await
        .map_err(|e| MachineError::action(Cycle::TOKEN, e.to_string()))??;

    let ctx = machine.context().snapshot();
    info!(
        "finished at '{}' after {} cycles, history {:?}",
        ctx.current_state(),
        ctx.data().cycles,
        ctx.data().history
    );
    Ok(())
}
