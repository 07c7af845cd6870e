use crate::domain::order::{GatewaySignal, Order, OrderId, Transition};
use crate::domain::ports::{ClockRef, OrderStoreRef, PaymentGatewayRef, StateChange};
use crate::error::Result;
use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, info, instrument, warn};

pub const DEFAULT_SWEEP_LIMIT: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepAction {
    /// Timed out and moved to its terminal failed state.
    AutoFailed,
    /// The gateway confirmed payment.
    MarkedPaid,
    /// Still waiting; checked again on the next sweep.
    Pending,
    /// A concurrent writer changed the order first.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweepEntry {
    pub order_id: OrderId,
    pub order_number: String,
    pub previous_state: &'static str,
    pub new_state: &'static str,
    pub action: SweepAction,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub processed: usize,
    pub updated: usize,
    pub results: Vec<SweepEntry>,
}

/// Settles pending orders whose callback never arrived.
///
/// Safe to run on overlapping schedules and alongside live callbacks: each
/// change is committed only if the order is still in the state it was read in.
pub struct ReconciliationSweeper {
    orders: OrderStoreRef,
    gateway: PaymentGatewayRef,
    clock: ClockRef,
}

impl ReconciliationSweeper {
    pub fn new(orders: OrderStoreRef, gateway: PaymentGatewayRef, clock: ClockRef) -> Self {
        Self {
            orders,
            gateway,
            clock,
        }
    }

    #[instrument(skip(self))]
    pub async fn sweep(&self, limit: usize) -> Result<SweepReport> {
        let pending = self.orders.pending_oldest_first(limit).await?;
        let processed = pending.len();

        let mut changes = Vec::new();
        let mut results = Vec::with_capacity(processed);
        for mut order in pending {
            let previous = order.state.clone();
            let (action, message) = self.reconcile(&mut order).await;
            results.push(SweepEntry {
                order_id: order.id,
                order_number: order.order_number.clone(),
                previous_state: previous.label(),
                new_state: order.state.label(),
                action,
                message,
            });
            if order.state != previous {
                changes.push(StateChange {
                    expected: previous,
                    order,
                });
            }
        }

        let attempted = changes.len();
        let written: HashSet<OrderId> = if changes.is_empty() {
            HashSet::new()
        } else {
            self.orders.commit(changes).await?.into_iter().collect()
        };

        for entry in results
            .iter_mut()
            .filter(|e| e.previous_state != e.new_state && !written.contains(&e.order_id))
        {
            warn!(order_id = %entry.order_id, "Order changed concurrently; sweep result discarded");
            entry.new_state = entry.previous_state;
            entry.action = SweepAction::Skipped;
            entry.message = "order changed concurrently".to_string();
        }

        let updated = written.len();
        info!(processed, updated, discarded = attempted - updated, "Sweep complete");
        Ok(SweepReport {
            processed,
            updated,
            results,
        })
    }

    async fn reconcile(&self, order: &mut Order) -> (SweepAction, String) {
        let now = self.clock.now();
        if order.is_past_deadline(now) {
            order.expire(now);
            info!(order_id = %order.id, "Order timed out without payment");
            return (SweepAction::AutoFailed, "payment deadline passed".to_string());
        }

        let lookup_key = order.gateway_lookup_key().to_string();
        let Some(report) = self.gateway.query_trade_status(&lookup_key, now).await else {
            debug!(order_id = %order.id, %lookup_key, "Trade status unknown");
            return (SweepAction::Pending, "trade status query failed".to_string());
        };

        match report.signal() {
            Some(signal @ GatewaySignal::Confirmed { .. }) => {
                match order.apply_signal(signal, self.clock.now()) {
                    Transition::Changed => {
                        info!(order_id = %order.id, "Payment confirmed by trade status query");
                        (SweepAction::MarkedPaid, "payment confirmed".to_string())
                    }
                    Transition::Unchanged => (SweepAction::Skipped, "already settled".to_string()),
                    Transition::Ignored(reason) => (SweepAction::Skipped, reason.to_string()),
                }
            }
            Some(GatewaySignal::Declined { .. }) => {
                // The query took time; the deadline may have passed meanwhile.
                let now = self.clock.now();
                if order.is_past_deadline(now) {
                    order.expire(now);
                    return (SweepAction::AutoFailed, "payment deadline passed".to_string());
                }
                let message = report.message().unwrap_or("not paid yet").to_string();
                (SweepAction::Pending, message)
            }
            None => (
                SweepAction::Pending,
                "gateway reported success without a trade number".to_string(),
            ),
        }
    }
}
