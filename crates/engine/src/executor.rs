use std::sync::Arc;

use tracing::{debug, info, warn};

use common::{
    ChildOrder, ChildOrderSpec, ChildStatus, Error, ExchangeGateway, OrderAck, OrderLedger,
    OrderRequest, Result, StrategyKind, StrategyRun, VenueOrderStatus,
};

/// What happened when a worker tried to fire a plan slot.
#[derive(Debug)]
pub enum SlotOutcome {
    /// The slot had already left `Pending` (cancel sweep or an earlier
    /// process); nothing was sent.
    Skipped(ChildStatus),
    /// The venue took the order. The record may already be terminal if the
    /// acknowledgement reported a fill.
    Acked(ChildOrder),
    Rejected(ChildOrder),
}

/// Ledger status implied by a venue status, if it is final.
pub(crate) fn settled_status(status: VenueOrderStatus) -> Option<ChildStatus> {
    match status {
        VenueOrderStatus::Filled => Some(ChildStatus::Filled),
        VenueOrderStatus::Canceled | VenueOrderStatus::Expired => Some(ChildStatus::Cancelled),
        VenueOrderStatus::Rejected => Some(ChildStatus::Rejected),
        VenueOrderStatus::New | VenueOrderStatus::PartiallyFilled => None,
    }
}

/// Turns plan slots into venue orders and records each outcome in the ledger.
///
/// This is the ONLY component that calls `ExchangeGateway::place_order`.
pub struct ChildOrderExecutor {
    gateway: Arc<dyn ExchangeGateway>,
    ledger: Arc<dyn OrderLedger>,
}

impl ChildOrderExecutor {
    pub fn new(gateway: Arc<dyn ExchangeGateway>, ledger: Arc<dyn OrderLedger>) -> Self {
        Self { gateway, ledger }
    }

    /// Claim a `Pending` slot and submit it. The claim is a ledger
    /// compare-and-set, so a slot is sent at most once even when a cancel
    /// sweep runs concurrently.
    pub async fn fire(&self, run: &StrategyRun, spec: &ChildOrderSpec) -> Result<SlotOutcome> {
        let run_id = run.run_id.as_str();
        let claimed = match self
            .ledger
            .update_status(run_id, spec.index, ChildStatus::Submitted, None, None)
            .await
        {
            Ok(child) => child,
            Err(Error::InvalidTransition { from, .. }) => {
                debug!(run_id, index = spec.index, status = %from, "Slot no longer pending, skipping");
                return Ok(SlotOutcome::Skipped(from));
            }
            Err(e) => return Err(e),
        };

        let request = match child_request(run, spec, &claimed.client_order_id) {
            Ok(request) => request,
            Err(e) => return self.reject(run_id, spec.index, &e).await,
        };

        if run.kind == StrategyKind::Twap {
            match self.gateway.get_reference_price(run.symbol()).await {
                Ok(price) => debug!(run_id, index = spec.index, price, "Reference price"),
                Err(e) => warn!(run_id, error = %e, "Reference price unavailable, firing anyway"),
            }
        }

        info!(
            run_id,
            index = spec.index,
            symbol = %request.symbol,
            side = %request.side,
            qty = request.quantity,
            price = ?request.price,
            "Submitting child order"
        );

        match self.gateway.place_order(&request).await {
            Ok(ack) => self.record_ack(run_id, spec.index, &ack).await.map(SlotOutcome::Acked),
            Err(e) => self.reject(run_id, spec.index, &e).await,
        }
    }

    async fn reject(&self, run_id: &str, index: u32, error: &Error) -> Result<SlotOutcome> {
        warn!(run_id, index, error = %error, "Child order rejected");
        let rejected = self
            .ledger
            .update_status(run_id, index, ChildStatus::Rejected, None, Some(&error.to_string()))
            .await?;
        Ok(SlotOutcome::Rejected(rejected))
    }

    /// Record a venue acknowledgement for a `Submitted` slot, then apply any
    /// final status it carries.
    pub async fn record_ack(&self, run_id: &str, index: u32, ack: &OrderAck) -> Result<ChildOrder> {
        let acked = match self
            .ledger
            .update_status(run_id, index, ChildStatus::Acked, Some(&ack.venue_order_id), None)
            .await
        {
            Ok(child) => child,
            // Reconciliation saw the order on the book first.
            Err(Error::InvalidTransition { from, .. }) if from != ChildStatus::Submitted => {
                debug!(run_id, index, status = %from, "Slot already promoted");
                self.ledger.get(run_id, index).await?
            }
            Err(e) => return Err(e),
        };

        let Some(next) = settled_status(ack.status) else {
            return Ok(acked);
        };
        if acked.status != ChildStatus::Acked {
            return Ok(acked);
        }
        let error = (next == ChildStatus::Rejected).then_some("rejected by venue");
        match self.ledger.update_status(run_id, index, next, None, error).await {
            Ok(settled) => {
                info!(run_id, index, status = %settled.status, "Child order settled on acknowledgement");
                Ok(settled)
            }
            Err(Error::InvalidTransition { .. }) => self.ledger.get(run_id, index).await,
            Err(e) => Err(e),
        }
    }

    /// Submit a one-shot order that belongs to no run.
    pub async fn place_one_shot(&self, request: &OrderRequest) -> Result<OrderAck> {
        info!(
            symbol = %request.symbol,
            side = %request.side,
            order_type = %request.order_type,
            qty = request.quantity,
            "Submitting one-shot order"
        );
        self.gateway.place_order(request).await
    }
}

/// Venue order for a plan slot: TWAP slices go out at market, grid levels as
/// resting GTC limits.
pub(crate) fn child_request(
    run: &StrategyRun,
    spec: &ChildOrderSpec,
    client_order_id: &str,
) -> Result<OrderRequest> {
    let request = match (run.kind, spec.target_price) {
        (StrategyKind::Twap, _) => OrderRequest::market(run.symbol(), spec.side, spec.quantity),
        (StrategyKind::Grid, Some(price)) => {
            OrderRequest::limit(run.symbol(), spec.side, spec.quantity, price)
        }
        (StrategyKind::Grid, None) => {
            return Err(Error::Other(format!(
                "grid slot {}#{} has no target price",
                run.run_id, spec.index
            )))
        }
    };
    Ok(request.with_client_order_id(client_order_id))
}
