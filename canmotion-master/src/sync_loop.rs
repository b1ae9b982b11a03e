//! Cyclic synchronizer
//!
//! Once per sync period: send a setpoint PDO for every initialized device, then a single SYNC
//! frame. The SYNC is what makes the drives latch the setpoints they just received, so it always
//! goes last.

use std::sync::Arc;

use log::{debug, warn};
use tokio_util::sync::CancellationToken;

use canmotion_common::traits::AsyncCanSender;
use canmotion_common::{messages, pdo};

use crate::master::MasterContext;

pub(crate) async fn run<S: AsyncCanSender>(ctx: Arc<MasterContext<S>>, cancel: CancellationToken) {
    let period = ctx.config.sync_period();

    loop {
        if cancel.is_cancelled() {
            break;
        }
        let tic = tokio::time::Instant::now();

        for device in ctx.registry.iter() {
            if !device.initialized() {
                continue;
            }
            let next = ctx.trajectory.next_setpoint(device, period);
            device.set_desired_pos(next);
            let frame = pdo::setpoint_frame(device.id(), next);
            if let Err(e) = ctx.send(frame).await {
                warn!("Failed to send setpoint to node {}: {e}", device.id());
            }
        }
        if let Err(e) = ctx.send(messages::sync_frame()).await {
            warn!("Failed to send SYNC: {e}");
        }

        // Sleep only the residual of the period; an overrun starts the next cycle immediately
        let residual = period.saturating_sub(tic.elapsed());
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(residual) => (),
        }
    }
    debug!("Synchronizer task exited");
}
