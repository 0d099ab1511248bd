#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use common::{
    EngineConfig, Error, ExchangeGateway, OpenOrder, OrderAck, OrderRef, OrderRequest, Result,
    RunState, RunStatus, VenueOrderStatus,
};
use engine::{ExecutionScheduler, MemoryStore};
use validator::OrderValidator;

#[derive(Debug, Clone)]
pub struct MockOrder {
    pub request: OrderRequest,
    pub status: VenueOrderStatus,
}

#[derive(Default)]
struct MockState {
    placements: usize,
    cancel_calls: usize,
    orders: BTreeMap<u64, MockOrder>,
}

/// Scripted venue. Placements are numbered from 0 in call order; numbers
/// listed in `reject` fail with a gateway error.
pub struct MockGateway {
    state: Mutex<MockState>,
    reject: HashSet<usize>,
    fill_on_ack: bool,
    cancel_delay: Duration,
    place_delay: Duration,
}

impl MockGateway {
    /// Every order fills on acknowledgement, like a market order.
    pub fn filling() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            reject: HashSet::new(),
            fill_on_ack: true,
            cancel_delay: Duration::ZERO,
            place_delay: Duration::ZERO,
        }
    }

    /// Every order rests on the book until `fill` or `cancel_order`.
    pub fn resting() -> Self {
        Self {
            fill_on_ack: false,
            ..Self::filling()
        }
    }

    pub fn rejecting(mut self, placements: impl IntoIterator<Item = usize>) -> Self {
        self.reject.extend(placements);
        self
    }

    /// Every `cancel_order` call waits this long before reaching the book.
    pub fn with_cancel_delay(mut self, delay: Duration) -> Self {
        self.cancel_delay = delay;
        self
    }

    /// Every `place_order` call waits this long before the venue answers.
    pub fn with_place_delay(mut self, delay: Duration) -> Self {
        self.place_delay = delay;
        self
    }

    /// Put an order on the book without going through `place_order`, as if a
    /// previous process placed it.
    pub async fn inject(&self, request: OrderRequest) -> String {
        let mut state = self.state.lock().await;
        let id = state.orders.len() as u64 + 1;
        state.orders.insert(
            id,
            MockOrder {
                request,
                status: VenueOrderStatus::New,
            },
        );
        id.to_string()
    }

    pub async fn fill(&self, venue_order_id: &str) {
        let id: u64 = venue_order_id.parse().unwrap();
        let mut state = self.state.lock().await;
        state.orders.get_mut(&id).unwrap().status = VenueOrderStatus::Filled;
    }

    /// Orders that reached the venue, in placement order.
    pub async fn orders(&self) -> Vec<(String, MockOrder)> {
        self.state
            .lock()
            .await
            .orders
            .iter()
            .map(|(id, o)| (id.to_string(), o.clone()))
            .collect()
    }

    pub async fn placements(&self) -> usize {
        self.state.lock().await.placements
    }

    pub async fn cancel_calls(&self) -> usize {
        self.state.lock().await.cancel_calls
    }
}

#[async_trait]
impl ExchangeGateway for MockGateway {
    async fn place_order(&self, order: &OrderRequest) -> Result<OrderAck> {
        if !self.place_delay.is_zero() {
            tokio::time::sleep(self.place_delay).await;
        }
        let mut state = self.state.lock().await;
        let n = state.placements;
        state.placements += 1;
        if self.reject.contains(&n) {
            return Err(Error::Gateway(format!("scripted rejection of placement {n}")));
        }
        let id = state.orders.len() as u64 + 1;
        let status = if self.fill_on_ack {
            VenueOrderStatus::Filled
        } else {
            VenueOrderStatus::New
        };
        state.orders.insert(
            id,
            MockOrder {
                request: order.clone(),
                status,
            },
        );
        Ok(OrderAck {
            venue_order_id: id.to_string(),
            client_order_id: order.client_order_id.clone(),
            status,
        })
    }

    async fn cancel_order(&self, _symbol: &str, venue_order_id: &str) -> Result<String> {
        let id: u64 = venue_order_id
            .parse()
            .map_err(|_| Error::Gateway("bad id".into()))?;
        if !self.cancel_delay.is_zero() {
            tokio::time::sleep(self.cancel_delay).await;
        }
        let mut state = self.state.lock().await;
        state.cancel_calls += 1;
        match state.orders.get_mut(&id) {
            Some(o) if o.status.is_live() => {
                o.status = VenueOrderStatus::Canceled;
                Ok(venue_order_id.to_string())
            }
            _ => Err(Error::Gateway(format!("unknown order {venue_order_id}"))),
        }
    }

    async fn list_open_orders(&self, symbol: &str) -> Result<Vec<OpenOrder>> {
        let state = self.state.lock().await;
        Ok(state
            .orders
            .iter()
            .filter(|(_, o)| o.request.symbol == symbol && o.status.is_live())
            .map(|(id, o)| OpenOrder {
                venue_order_id: id.to_string(),
                client_order_id: o.request.client_order_id.clone(),
                symbol: o.request.symbol.clone(),
                side: o.request.side,
                price: o.request.price.unwrap_or(0.0),
                quantity: o.request.quantity,
            })
            .collect())
    }

    async fn get_reference_price(&self, _symbol: &str) -> Result<f64> {
        Ok(50_000.0)
    }

    async fn query_order(&self, _symbol: &str, order: &OrderRef) -> Result<Option<OrderAck>> {
        let state = self.state.lock().await;
        let found = state.orders.iter().find(|(id, o)| match order {
            OrderRef::Venue(v) => id.to_string() == *v,
            OrderRef::Client(c) => o.request.client_order_id.as_deref() == Some(c.as_str()),
        });
        Ok(found.map(|(id, o)| OrderAck {
            venue_order_id: id.to_string(),
            client_order_id: o.request.client_order_id.clone(),
            status: o.status,
        }))
    }
}

pub fn config() -> EngineConfig {
    EngineConfig {
        reconcile_interval: Duration::from_secs(1),
        failure_threshold: 0.5,
        confirm_fills: true,
        grid_submit_delay: Duration::from_millis(10),
    }
}

pub fn scheduler(gateway: Arc<MockGateway>) -> (ExecutionScheduler, Arc<MemoryStore>) {
    scheduler_with(config(), gateway)
}

pub fn scheduler_with(
    config: EngineConfig,
    gateway: Arc<MockGateway>,
) -> (ExecutionScheduler, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let scheduler = ExecutionScheduler::new(
        config,
        gateway,
        Arc::new(OrderValidator::new()),
        store.clone(),
        store.clone(),
    );
    (scheduler, store)
}

/// Poll until `done` holds for the run's status. Meant for paused-clock
/// tests, where the sleeps cost nothing.
pub async fn wait_for(
    scheduler: &ExecutionScheduler,
    run_id: &str,
    done: impl Fn(&RunStatus) -> bool,
) -> RunStatus {
    for _ in 0..10_000 {
        let status = scheduler.status(run_id).await.unwrap();
        if done(&status) {
            return status;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    panic!("run {run_id} never reached the expected state");
}

pub async fn wait_for_state(scheduler: &ExecutionScheduler, run_id: &str, state: RunState) -> RunStatus {
    wait_for(scheduler, run_id, |s| s.run.state == state).await
}
