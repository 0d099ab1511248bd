mod support;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use common::{
    client_order_id, ChildStatus, Error, GridParams, OrderLedger, OrderRequest, OrderSide,
    OrderType, RunRepository, RunState, SpacingMode, StrategyParams, StrategyRun, TwapParams,
};
use engine::ReconciliationLoop;
use support::{wait_for, wait_for_state, MockGateway};

fn twap(side: OrderSide, total_quantity: f64, chunks: u32) -> StrategyParams {
    StrategyParams::Twap(TwapParams {
        symbol: "BTCUSDT".into(),
        side,
        total_quantity,
        duration_hours: 1.0,
        chunks,
    })
}

fn grid(lower: f64, upper: f64, levels: u32) -> StrategyParams {
    StrategyParams::Grid(GridParams {
        symbol: "BTCUSDT".into(),
        lower_bound: lower,
        upper_bound: upper,
        level_count: levels,
        spacing_mode: SpacingMode::Arithmetic,
        quantity_per_level: 0.01,
    })
}

fn statuses(children: &[common::ChildOrder]) -> Vec<ChildStatus> {
    children.iter().map(|c| c.status).collect()
}

#[tokio::test(start_paused = true)]
async fn twap_fires_four_equal_slices_fifteen_minutes_apart() {
    let gateway = Arc::new(MockGateway::filling());
    let (scheduler, _) = support::scheduler(gateway.clone());

    let run_id = scheduler.start(twap(OrderSide::Buy, 1.0, 4)).await.unwrap();
    let status = wait_for_state(&scheduler, &run_id, RunState::Completed).await;

    let plan = &status.run.plan;
    assert_eq!(plan.len(), 4);
    assert!(plan.iter().all(|s| (s.quantity - 0.25).abs() < 1e-12));
    let start = plan[0].scheduled_time.unwrap();
    for (i, spec) in plan.iter().enumerate() {
        let offset = spec.scheduled_time.unwrap() - start;
        assert_eq!(offset.num_minutes(), 15 * i as i64);
    }

    assert_eq!(status.counts.filled, 4);
    let orders = gateway.orders().await;
    assert_eq!(orders.len(), 4);
    for (i, (_, order)) in orders.iter().enumerate() {
        assert_eq!(order.request.side, OrderSide::Buy);
        assert_eq!(order.request.price, None);
        assert_eq!(
            order.request.client_order_id.as_deref(),
            Some(client_order_id(&run_id, i as u32).as_str())
        );
    }
}

#[tokio::test(start_paused = true)]
async fn rejected_slice_does_not_abort_the_run() {
    let gateway = Arc::new(MockGateway::filling().rejecting([2]));
    let (scheduler, _) = support::scheduler(gateway.clone());

    let run_id = scheduler.start(twap(OrderSide::Sell, 1.0, 4)).await.unwrap();

    let mid_run = wait_for(&scheduler, &run_id, |s| {
        s.children[2].status == ChildStatus::Rejected
    })
    .await;
    assert_eq!(mid_run.run.state, RunState::Running);
    assert!(mid_run.children[2]
        .last_error
        .as_deref()
        .unwrap()
        .contains("scripted rejection"));

    let done = wait_for(&scheduler, &run_id, |s| s.run.state.is_terminal()).await;
    assert_eq!(done.run.state, RunState::Completed);
    assert_eq!(
        statuses(&done.children),
        vec![
            ChildStatus::Filled,
            ChildStatus::Filled,
            ChildStatus::Rejected,
            ChildStatus::Filled
        ]
    );
    assert_eq!(gateway.placements().await, 4);
}

#[tokio::test(start_paused = true)]
async fn rejections_above_threshold_fail_the_run_and_stop_submission() {
    let gateway = Arc::new(MockGateway::filling().rejecting(0..4));
    let (scheduler, _) = support::scheduler(gateway.clone());

    let run_id = scheduler.start(twap(OrderSide::Buy, 1.0, 4)).await.unwrap();
    let status = wait_for_state(&scheduler, &run_id, RunState::Failed).await;

    assert!(status.run.failure_reason.as_deref().unwrap().contains("3/4"));
    assert!(status.run.completed_at.is_some());

    // Give the worker every chance to fire the last slice.
    tokio::time::sleep(Duration::from_secs(2 * 3600)).await;
    assert_eq!(gateway.placements().await, 3);
    let status = scheduler.status(&run_id).await.unwrap();
    assert_eq!(status.children[3].status, ChildStatus::Pending);
}

#[tokio::test(start_paused = true)]
async fn grid_places_alternating_levels_across_the_ladder() {
    let gateway = Arc::new(MockGateway::resting());
    let (scheduler, _) = support::scheduler(gateway.clone());

    let run_id = scheduler.start(grid(48_000.0, 52_000.0, 5)).await.unwrap();
    let status = wait_for(&scheduler, &run_id, |s| s.counts.acked == 5).await;
    assert_eq!(status.run.state, RunState::Running);

    let orders = gateway.orders().await;
    let prices: Vec<f64> = orders.iter().map(|(_, o)| o.request.price.unwrap()).collect();
    let sides: Vec<OrderSide> = orders.iter().map(|(_, o)| o.request.side).collect();
    assert_eq!(prices, vec![48_000.0, 49_000.0, 50_000.0, 51_000.0, 52_000.0]);
    assert_eq!(
        sides,
        vec![
            OrderSide::Buy,
            OrderSide::Sell,
            OrderSide::Buy,
            OrderSide::Sell,
            OrderSide::Buy
        ]
    );
    assert!(status.children.iter().all(|c| c.venue_order_id.is_some()));
}

#[tokio::test(start_paused = true)]
async fn reconciliation_is_monotonic_and_cancel_sweeps_the_rest() {
    let gateway = Arc::new(MockGateway::resting());
    let (scheduler, _) = support::scheduler(gateway.clone());
    let reconciler = ReconciliationLoop::new(scheduler.clone());

    let run_id = scheduler.start(grid(48_000.0, 52_000.0, 5)).await.unwrap();
    let status = wait_for(&scheduler, &run_id, |s| s.counts.acked == 5).await;

    for child in &status.children[..2] {
        gateway.fill(child.venue_order_id.as_deref().unwrap()).await;
    }

    let first = reconciler.reconcile_once().await;
    assert_eq!(first.transitions, 2);
    let second = reconciler.reconcile_once().await;
    assert_eq!(second.transitions, 0);

    let status = scheduler.status(&run_id).await.unwrap();
    assert_eq!(status.counts.filled, 2);
    assert_eq!(status.counts.acked, 3);
    assert_eq!(status.run.state, RunState::Running);

    let summary = scheduler.cancel(&run_id).await.unwrap();
    assert_eq!(summary.withdrawn, 0);
    assert_eq!(summary.cancel_requests, 3);
    assert_eq!(summary.cancelled, 3);
    assert_eq!(summary.failed, 0);

    let status = scheduler.status(&run_id).await.unwrap();
    assert_eq!(status.run.state, RunState::Cancelled);
    assert_eq!(status.counts.filled, 2);
    assert_eq!(status.counts.cancelled, 3);
    assert!(gateway.orders().await.iter().all(|(_, o)| !o.status.is_live()));

    // Cancel is not repeatable.
    assert!(matches!(
        scheduler.cancel(&run_id).await,
        Err(Error::AlreadyTerminal {
            state: RunState::Cancelled,
            ..
        })
    ));
    // Terminal runs are left alone by later passes.
    assert_eq!(reconciler.reconcile_once().await.runs_checked, 0);
}

#[tokio::test(start_paused = true)]
async fn grid_completes_once_every_level_fills() {
    let gateway = Arc::new(MockGateway::resting());
    let (scheduler, _) = support::scheduler(gateway.clone());
    let reconciler = ReconciliationLoop::new(scheduler.clone());

    let run_id = scheduler.start(grid(100.0, 110.0, 3)).await.unwrap();
    wait_for(&scheduler, &run_id, |s| s.counts.acked == 3).await;
    for (id, _) in gateway.orders().await {
        gateway.fill(&id).await;
    }

    let report = reconciler.reconcile_once().await;
    assert_eq!(report.transitions, 3);
    let status = scheduler.status(&run_id).await.unwrap();
    assert_eq!(status.run.state, RunState::Completed);
}

#[tokio::test(start_paused = true)]
async fn external_cancel_is_confirmed_rather_than_assumed_filled() {
    let gateway = Arc::new(MockGateway::resting());
    let (scheduler, _) = support::scheduler(gateway.clone());
    let reconciler = ReconciliationLoop::new(scheduler.clone());

    let run_id = scheduler.start(grid(100.0, 110.0, 3)).await.unwrap();
    let status = wait_for(&scheduler, &run_id, |s| s.counts.acked == 3).await;
    let victim = status.children[1].venue_order_id.clone().unwrap();
    use common::ExchangeGateway;
    gateway.cancel_order("BTCUSDT", &victim).await.unwrap();

    let report = reconciler.reconcile_once().await;
    assert_eq!(report.transitions, 1);
    let status = scheduler.status(&run_id).await.unwrap();
    assert_eq!(status.children[1].status, ChildStatus::Cancelled);
}

#[tokio::test(start_paused = true)]
async fn without_confirmation_a_vanished_order_counts_as_filled() {
    let gateway = Arc::new(MockGateway::resting());
    let config = common::EngineConfig {
        confirm_fills: false,
        ..support::config()
    };
    let (scheduler, _) = support::scheduler_with(config, gateway.clone());
    let reconciler = ReconciliationLoop::new(scheduler.clone());

    let run_id = scheduler.start(grid(100.0, 110.0, 3)).await.unwrap();
    let status = wait_for(&scheduler, &run_id, |s| s.counts.acked == 3).await;
    let victim = status.children[0].venue_order_id.clone().unwrap();
    use common::ExchangeGateway;
    gateway.cancel_order("BTCUSDT", &victim).await.unwrap();

    reconciler.reconcile_once().await;
    let status = scheduler.status(&run_id).await.unwrap();
    assert_eq!(status.children[0].status, ChildStatus::Filled);
}

#[tokio::test(start_paused = true)]
async fn cancel_withdraws_unfired_twap_slices() {
    let gateway = Arc::new(MockGateway::filling());
    let (scheduler, _) = support::scheduler(gateway.clone());

    let run_id = scheduler.start(twap(OrderSide::Sell, 1.0, 4)).await.unwrap();
    tokio::time::sleep(Duration::from_secs(60)).await;

    let summary = scheduler.cancel(&run_id).await.unwrap();
    assert_eq!(summary.withdrawn, 3);
    assert_eq!(summary.cancel_requests, 0);

    tokio::time::sleep(Duration::from_secs(2 * 3600)).await;
    let status = scheduler.status(&run_id).await.unwrap();
    assert_eq!(status.run.state, RunState::Cancelled);
    assert_eq!(
        statuses(&status.children),
        vec![
            ChildStatus::Filled,
            ChildStatus::Cancelled,
            ChildStatus::Cancelled,
            ChildStatus::Cancelled
        ]
    );
    assert_eq!(gateway.placements().await, 1);
}

#[tokio::test]
async fn invalid_parameters_create_nothing() {
    let gateway = Arc::new(MockGateway::filling());
    let (scheduler, _) = support::scheduler(gateway.clone());

    let err = scheduler.start(grid(52_000.0, 48_000.0, 5)).await.unwrap_err();
    assert!(matches!(err, Error::InvalidParameters(_)));

    let err = scheduler.start(twap(OrderSide::Buy, 0.0, 0)).await.unwrap_err();
    match err {
        Error::InvalidParameters(errors) => assert_eq!(errors.len(), 2),
        other => panic!("unexpected error {other}"),
    }

    let mut bad_symbol = twap(OrderSide::Buy, 1.0, 4);
    if let StrategyParams::Twap(p) = &mut bad_symbol {
        p.symbol = "BTC".into();
    }
    let err = scheduler.start(bad_symbol).await.unwrap_err();
    assert!(err.to_string().contains("Invalid symbol format"));

    assert!(scheduler.list(None).await.unwrap().is_empty());
    assert_eq!(gateway.placements().await, 0);
}

#[tokio::test]
async fn lowercase_symbols_are_accepted() {
    let gateway = Arc::new(MockGateway::resting());
    let (scheduler, _) = support::scheduler(gateway.clone());

    let mut params = grid(100.0, 110.0, 2);
    if let StrategyParams::Grid(p) = &mut params {
        p.symbol = " btcusdt".into();
    }
    let run_id = scheduler.start(params).await.unwrap();
    let status = scheduler.status(&run_id).await.unwrap();
    assert_eq!(status.run.symbol(), "BTCUSDT");
    scheduler.cancel(&run_id).await.unwrap();
}

#[tokio::test]
async fn unknown_runs_are_reported() {
    let gateway = Arc::new(MockGateway::filling());
    let (scheduler, _) = support::scheduler(gateway);

    assert!(matches!(
        scheduler.status("nope").await,
        Err(Error::RunNotFound(_))
    ));
    assert!(matches!(
        scheduler.cancel("nope").await,
        Err(Error::RunNotFound(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn list_filters_by_state() {
    let gateway = Arc::new(MockGateway::resting());
    let (scheduler, _) = support::scheduler(gateway);

    let a = scheduler.start(grid(100.0, 110.0, 2)).await.unwrap();
    let b = scheduler.start(grid(100.0, 110.0, 2)).await.unwrap();
    scheduler.cancel(&a).await.unwrap();

    let running: Vec<String> = scheduler
        .list(Some(RunState::Running))
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.run_id)
        .collect();
    assert_eq!(running, vec![b]);
    assert_eq!(scheduler.list(None).await.unwrap().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn resume_settles_in_flight_slots_and_fires_the_rest() {
    let gateway = Arc::new(MockGateway::resting());
    let (scheduler, store) = support::scheduler(gateway.clone());

    // State left behind by a process that died mid-setup: slot 0 reached the
    // venue but its acknowledgement was lost, slot 1 never got there.
    let params = grid(48_000.0, 52_000.0, 5);
    let plan = strategy::build_plan(&params, Utc::now(), Some(2)).unwrap();
    let run = StrategyRun::new(params, plan, Utc::now());
    store.insert_run(&run).await.unwrap();
    for spec in &run.plan {
        store.record(&run.run_id, spec.index, spec).await.unwrap();
    }
    store
        .transition_run(&run.run_id, RunState::Running, None)
        .await
        .unwrap();
    for index in [0, 1] {
        store
            .update_status(&run.run_id, index, ChildStatus::Submitted, None, None)
            .await
            .unwrap();
    }
    let landed = OrderRequest::limit("BTCUSDT", OrderSide::Buy, 0.01, 48_000.0)
        .with_client_order_id(client_order_id(&run.run_id, 0));
    let venue_id = gateway.inject(landed).await;

    assert_eq!(scheduler.resume().await.unwrap(), 1);

    let status = wait_for(&scheduler, &run.run_id, |s| {
        s.counts.pending == 0 && s.counts.submitted == 0
    })
    .await;
    assert_eq!(status.children[0].status, ChildStatus::Acked);
    assert_eq!(status.children[0].venue_order_id.as_deref(), Some(venue_id.as_str()));
    assert_eq!(status.children[1].status, ChildStatus::Rejected);
    assert_eq!(status.counts.acked, 4);
    // One injected order plus the three slots that were still pending.
    assert_eq!(gateway.orders().await.len(), 4);
    assert_eq!(gateway.placements().await, 3);
}

#[tokio::test]
async fn resume_fails_runs_interrupted_before_launch() {
    let gateway = Arc::new(MockGateway::filling());
    let (scheduler, store) = support::scheduler(gateway);

    let params = twap(OrderSide::Buy, 1.0, 2);
    let plan = strategy::build_plan(&params, Utc::now(), None).unwrap();
    let run = StrategyRun::new(params, plan, Utc::now());
    store.insert_run(&run).await.unwrap();

    assert_eq!(scheduler.resume().await.unwrap(), 0);
    let run = store.get_run(&run.run_id).await.unwrap();
    assert_eq!(run.state, RunState::Failed);
}

#[tokio::test]
async fn one_shot_orders_are_validated_before_submission() {
    let gateway = Arc::new(MockGateway::resting());
    let (scheduler, _) = support::scheduler(gateway.clone());

    let mut no_price = OrderRequest::limit("BTCUSDT", OrderSide::Buy, 0.01, 1.0);
    no_price.price = None;
    assert!(matches!(
        scheduler.place_order(no_price).await,
        Err(Error::InvalidParameters(_))
    ));
    let too_precise = OrderRequest::limit("BTCUSDT", OrderSide::Buy, 0.01, 50_000.123);
    assert!(matches!(
        scheduler.place_order(too_precise).await,
        Err(Error::InvalidParameters(_))
    ));
    assert_eq!(gateway.placements().await, 0);

    let ack = scheduler
        .place_order(OrderRequest::stop_limit("ethusdt", OrderSide::Sell, 0.5, 2_900.0, 2_890.0))
        .await
        .unwrap();
    let orders = gateway.orders().await;
    assert_eq!(orders[0].0, ack.venue_order_id);
    assert_eq!(orders[0].1.request.symbol, "ETHUSDT");
}

#[tokio::test]
async fn trailing_stops_need_activation_and_a_sane_callback_rate() {
    let gateway = Arc::new(MockGateway::resting());
    let (scheduler, _) = support::scheduler(gateway.clone());

    let mut no_activation = OrderRequest::trailing_stop("BTCUSDT", OrderSide::Sell, 0.01, 52_000.0, 1.0);
    no_activation.activation_price = None;
    match scheduler.place_order(no_activation).await {
        Err(Error::InvalidParameters(errors)) => {
            assert!(errors.iter().any(|e| e.contains("activation price")));
        }
        other => panic!("expected InvalidParameters, got {other:?}"),
    }
    let wide = OrderRequest::trailing_stop("BTCUSDT", OrderSide::Sell, 0.01, 52_000.0, 12.0);
    match scheduler.place_order(wide).await {
        Err(Error::InvalidParameters(errors)) => {
            assert!(errors.iter().any(|e| e.contains("callback rate")));
        }
        other => panic!("expected InvalidParameters, got {other:?}"),
    }
    assert_eq!(gateway.placements().await, 0);

    scheduler
        .place_order(OrderRequest::trailing_stop("BTCUSDT", OrderSide::Sell, 0.01, 52_000.0, 1.5))
        .await
        .unwrap();
    let orders = gateway.orders().await;
    assert_eq!(orders[0].1.request.order_type, OrderType::TrailingStopMarket);
    assert_eq!(orders[0].1.request.callback_rate, Some(1.5));
}

#[tokio::test(start_paused = true)]
async fn concurrent_cancels_send_each_venue_cancel_once() {
    let gateway = Arc::new(MockGateway::resting().with_cancel_delay(Duration::from_millis(50)));
    let (scheduler, _) = support::scheduler(gateway.clone());

    let run_id = scheduler.start(grid(48_000.0, 52_000.0, 5)).await.unwrap();
    wait_for(&scheduler, &run_id, |s| s.counts.acked == 5).await;

    let (first, second) = tokio::join!(scheduler.cancel(&run_id), scheduler.cancel(&run_id));
    let (summary, err) = match (first, second) {
        (Ok(summary), Err(err)) | (Err(err), Ok(summary)) => (summary, err),
        other => panic!("expected exactly one successful cancel, got {other:?}"),
    };
    assert_eq!(summary.cancel_requests, 5);
    assert_eq!(summary.cancelled, 5);
    assert!(matches!(
        err,
        Error::AlreadyTerminal {
            state: RunState::Cancelled,
            ..
        }
    ));
    assert_eq!(gateway.cancel_calls().await, 5);
}

#[tokio::test(start_paused = true)]
async fn cancel_during_sweep_is_not_overtaken_by_evaluation() {
    let gateway = Arc::new(MockGateway::resting().with_cancel_delay(Duration::from_millis(50)));
    let (scheduler, _) = support::scheduler(gateway.clone());
    let reconciler = ReconciliationLoop::new(scheduler.clone());

    let run_id = scheduler.start(grid(100.0, 110.0, 3)).await.unwrap();
    let status = wait_for(&scheduler, &run_id, |s| s.counts.acked == 3).await;
    for child in &status.children {
        gateway.fill(child.venue_order_id.as_deref().unwrap()).await;
    }

    // The venue already filled everything; the sweep's cancels fail and the
    // reconciler runs while they are in flight.
    let (cancelled, report) = tokio::join!(scheduler.cancel(&run_id), reconciler.reconcile_once());
    let summary = cancelled.unwrap();
    assert_eq!(summary.failed, 3);
    assert_eq!(report.errors, 0);

    let status = scheduler.status(&run_id).await.unwrap();
    assert_eq!(status.run.state, RunState::Cancelled);
}

#[tokio::test]
async fn reconciliation_promotes_a_submitted_slot_found_by_client_id() {
    let gateway = Arc::new(MockGateway::resting());
    let (scheduler, store) = support::scheduler(gateway.clone());
    let reconciler = ReconciliationLoop::new(scheduler.clone());

    let params = grid(100.0, 110.0, 3);
    let plan = strategy::build_plan(&params, Utc::now(), Some(2)).unwrap();
    let run = StrategyRun::new(params, plan, Utc::now());
    store.insert_run(&run).await.unwrap();
    for spec in &run.plan {
        store.record(&run.run_id, spec.index, spec).await.unwrap();
    }
    store
        .transition_run(&run.run_id, RunState::Running, None)
        .await
        .unwrap();
    store
        .update_status(&run.run_id, 0, ChildStatus::Submitted, None, None)
        .await
        .unwrap();
    let request = OrderRequest::limit("BTCUSDT", OrderSide::Buy, 0.01, 100.0)
        .with_client_order_id(client_order_id(&run.run_id, 0));
    let venue_id = gateway.inject(request).await;

    let report = reconciler.reconcile_once().await;
    assert_eq!(report.transitions, 1);
    assert_eq!(report.drift, 0);

    let child = store.get(&run.run_id, 0).await.unwrap();
    assert_eq!(child.status, ChildStatus::Acked);
    assert_eq!(child.venue_order_id.as_deref(), Some(venue_id.as_str()));
    assert_eq!(store.get(&run.run_id, 1).await.unwrap().status, ChildStatus::Pending);

    assert_eq!(reconciler.reconcile_once().await.transitions, 0);
}

#[tokio::test(start_paused = true)]
async fn open_order_for_a_settled_slot_is_reported_as_drift() {
    let gateway = Arc::new(MockGateway::resting());
    let (scheduler, store) = support::scheduler(gateway.clone());
    let reconciler = ReconciliationLoop::new(scheduler.clone());

    let run_id = scheduler.start(grid(100.0, 110.0, 3)).await.unwrap();
    wait_for(&scheduler, &run_id, |s| s.counts.acked == 3).await;

    // The ledger believes slot 1 is gone while the venue still works it.
    store
        .update_status(&run_id, 1, ChildStatus::Cancelled, None, None)
        .await
        .unwrap();

    let report = reconciler.reconcile_once().await;
    assert_eq!(report.drift, 1);
    assert_eq!(report.transitions, 0);

    let status = scheduler.status(&run_id).await.unwrap();
    assert_eq!(status.children[1].status, ChildStatus::Cancelled);
    assert_eq!(status.run.state, RunState::Running);
    assert_eq!(gateway.orders().await.iter().filter(|(_, o)| o.status.is_live()).count(), 3);
}

#[tokio::test(start_paused = true)]
async fn order_acknowledged_after_cancel_is_cancelled_by_its_worker() {
    let gateway = Arc::new(MockGateway::resting().with_place_delay(Duration::from_millis(50)));
    let (scheduler, _) = support::scheduler(gateway.clone());

    let run_id = scheduler.start(grid(100.0, 110.0, 3)).await.unwrap();
    // Slot 0 is now waiting on the venue.
    tokio::time::sleep(Duration::from_millis(10)).await;
    let status = scheduler.status(&run_id).await.unwrap();
    assert_eq!(status.children[0].status, ChildStatus::Submitted);

    let summary = scheduler.cancel(&run_id).await.unwrap();
    assert_eq!(summary.withdrawn, 2);
    assert_eq!(summary.cancel_requests, 0);

    let status = wait_for(&scheduler, &run_id, |s| {
        s.children[0].status == ChildStatus::Cancelled
    })
    .await;
    assert_eq!(status.run.state, RunState::Cancelled);
    assert!(status.children[0].venue_order_id.is_some());
    assert_eq!(gateway.placements().await, 1);
    assert_eq!(gateway.cancel_calls().await, 1);
    assert!(gateway.orders().await.iter().all(|(_, o)| !o.status.is_live()));
}
