//! Stop/target race monitor.
//!
//! Both exit legs of a filled entry compete to close the same position. Each
//! tick reads both legs from one order-book snapshot; the first leg seen
//! COMPLETE wins and the sibling is cancelled before the monitor returns. If
//! both are COMPLETE in the same snapshot the stop wins (the loss is already
//! real), and the cancel of the filled target fails benignly.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use sigex_core::{BracketStatus, LegStatus, Price};

use crate::order_executor::{CancelOutcome, OrderExecutor};

/// What happened to the losing leg's cancel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiblingCancel {
    /// No cancel was needed.
    NotAttempted,
    Done(CancelOutcome),
    /// Cancel failed; the sibling may still be resting.
    Failed,
}

/// Terminal result of one bracket watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BracketOutcome {
    pub status: BracketStatus,
    pub exit_price: Option<Price>,
    /// Order id of the leg that lost the race, if any.
    pub sibling_id: Option<String>,
    pub sibling_cancel: SiblingCancel,
}

impl BracketOutcome {
    fn unresolved(status: BracketStatus) -> Self {
        Self {
            status,
            exit_price: None,
            sibling_id: None,
            sibling_cancel: SiblingCancel::NotAttempted,
        }
    }
}

/// Watches stop/target pairs.
#[derive(Clone)]
pub struct BracketMonitor {
    executor: Arc<OrderExecutor>,
}

impl BracketMonitor {
    pub fn new(executor: Arc<OrderExecutor>) -> Self {
        Self { executor }
    }

    /// Poll both legs every `interval` until one fills, `deadline` passes or
    /// `cancel` fires.
    ///
    /// Exactly one cancel is sent to the losing leg. Deadline and
    /// cancellation leave both legs resting.
    pub async fn monitor_bracket(
        &self,
        sl_id: &str,
        target_id: &str,
        interval: Duration,
        deadline: Duration,
        cancel: CancellationToken,
    ) -> BracketOutcome {
        let ends_at = Instant::now() + deadline;
        let mut warned_dead_leg = false;

        loop {
            match self.executor.order_statuses(&[sl_id, target_id]).await {
                Ok(book) => {
                    let sl = book.get(sl_id);
                    let target = book.get(target_id);
                    let sl_status = sl.map(|s| s.status);
                    let target_status = target.map(|s| s.status);

                    if sl_status == Some(LegStatus::Complete) {
                        let exit_price = sl.and_then(|s| s.average_price);
                        return self
                            .resolve(BracketStatus::SlFilled, exit_price, target_id, sl_id)
                            .await;
                    }
                    if target_status == Some(LegStatus::Complete) {
                        let exit_price = target.and_then(|s| s.average_price);
                        return self
                            .resolve(BracketStatus::TargetFilled, exit_price, sl_id, target_id)
                            .await;
                    }

                    let dead = |s: Option<LegStatus>| {
                        matches!(s, Some(LegStatus::Rejected | LegStatus::Cancelled))
                    };
                    if dead(sl_status) && dead(target_status) {
                        warn!(
                            sl_id,
                            target_id,
                            "Both exit legs ended without fill, bracket closed outside engine"
                        );
                        return BracketOutcome::unresolved(BracketStatus::Cancelled);
                    }
                    if (dead(sl_status) || dead(target_status)) && !warned_dead_leg {
                        warned_dead_leg = true;
                        error!(
                            sl_id,
                            target_id,
                            sl_status = ?sl_status,
                            target_status = ?target_status,
                            "Exit leg ended without fill, position half protected"
                        );
                    }
                }
                Err(e) => warn!(sl_id, target_id, error = %e, "Bracket poll failed"),
            }

            let now = Instant::now();
            if now >= ends_at {
                info!(sl_id, target_id, "Bracket watch deadline reached, legs left resting");
                return BracketOutcome::unresolved(BracketStatus::TimedOut);
            }

            tokio::select! {
                () = tokio::time::sleep(interval.min(ends_at - now)) => {}
                () = cancel.cancelled() => {
                    info!(sl_id, target_id, "Bracket watch cancelled");
                    return BracketOutcome::unresolved(BracketStatus::Cancelled);
                }
            }
        }
    }

    async fn resolve(
        &self,
        status: BracketStatus,
        exit_price: Option<Price>,
        sibling_id: &str,
        winner_id: &str,
    ) -> BracketOutcome {
        debug!(winner_id, sibling_id, %status, "Bracket leg filled, cancelling sibling");
        let sibling_cancel = match self.executor.cancel_order(sibling_id).await {
            Ok(outcome) => SiblingCancel::Done(outcome),
            Err(e) => {
                error!(
                    sibling_id,
                    error = %e,
                    "Sibling cancel failed, exit leg may still be resting"
                );
                SiblingCancel::Failed
            }
        };
        info!(winner_id, sibling_id, %status, exit_price = ?exit_price, "Bracket closed");

        BracketOutcome {
            status,
            exit_price,
            sibling_id: Some(sibling_id.to_string()),
            sibling_cancel,
        }
    }
}
