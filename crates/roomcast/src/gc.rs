//! Background GC: the token-expiry sweep and the stale-connection sweep.
//!
//! Both run on their own schedules, decoupled from any room's lifecycle.
//! A reclaimed connection is relayed through the directory's close path,
//! so the owning room runs the same roster/role cleanup a transport close
//! would trigger. Entries that vanish between sweeps (rooms torn down
//! concurrently) are simply absent — already handled, never an error.

use std::sync::Arc;

use tokio::time::MissedTickBehavior;

use crate::state::AppState;

/// Spawns both sweep drivers.
pub(crate) fn spawn(state: &Arc<AppState>) {
    tokio::spawn(run_token_sweep(Arc::clone(state)));
    tokio::spawn(run_stale_connection_sweep(Arc::clone(state)));
}

/// Periodically removes unredeemed tokens past their TTL.
async fn run_token_sweep(state: Arc<AppState>) {
    let mut interval =
        tokio::time::interval(state.tokens.sweep_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        interval.tick().await;
        let expired = state.tokens.sweep_expired();
        if !expired.is_empty() {
            tracing::debug!(
                count = expired.len(),
                "expired unredeemed tokens"
            );
        }
    }
}

/// Periodically force-closes connections with no recent activity and
/// feeds each one through the normal close path.
async fn run_stale_connection_sweep(state: Arc<AppState>) {
    let mut interval =
        tokio::time::interval(state.registry.sweep_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        interval.tick().await;
        for token in state.registry.sweep_stale() {
            state.directory.handle_close(&token).await;
        }
    }
}
