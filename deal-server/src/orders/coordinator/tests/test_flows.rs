use super::*;

// ========================================================================
// ========================================================================
//  核心业务流程
// ========================================================================
// ========================================================================

// ------------------------------------------------------------------------
// A: PlaceOrder → order AwaitingAcceptance, listing Pending, funds locked
// ------------------------------------------------------------------------
#[tokio::test]
async fn test_place_order_reserves_listing() {
    let h = harness();
    h.add_listing("listing-a");

    let order = h.place("listing-a", T).await;

    assert_eq!(order.status, OrderStatus::AwaitingAcceptance);
    assert_eq!(order.version, 1);
    assert_eq!(order.buyer_id, BUYER);
    assert_eq!(order.seller_id, SELLER);
    assert_eq!(order.amount, 1_500_000_000);
    assert_eq!(order.fee, PLATFORM_FEE_LAMPORTS);
    assert_eq!(order.guarantee_hours, 24.0);
    assert!(!order.accepted_by_seller);
    assert_eq!(order.accepted_at, None);
    assert_eq!(order.created_at, T);

    assert_eq!(h.listing_status("listing-a"), ListingStatus::Pending);
    assert_eq!(h.escrow_state(&order), Some(EscrowState::Initialized));
    assert_eq!(h.order(&order.order_id), order);
    assert_eq!(h.events(&order.order_id), vec![OrderEventType::OrderPlaced]);

    let sent = h.emitter.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].kind, NotificationKind::NewOrder);
    assert_eq!(sent[0].recipient_id, SELLER);
    assert_eq!(sent[0].link, "/product/listing-a");
    assert!(sent[0].message.contains("from Alice"));
}

// ------------------------------------------------------------------------
// B: Accept, never start, sweep at +25h → CancelledMissed, listing Active
// ------------------------------------------------------------------------
#[tokio::test]
async fn test_sweep_cancels_abandoned_order() {
    let h = harness();
    let order = h.accepted_order("listing-b").await;
    assert_eq!(order.accepted_at, Some(T));
    assert_eq!(order.deadline(), Some(T + 24 * H));

    let report = h.sweeper().sweep_at(T + 25 * H).await;
    assert_eq!(report.cancelled, 1);
    assert_eq!(report.failed, 0);

    let order = h.order(&order.order_id);
    assert_invariants(&order);
    assert_eq!(order.status, OrderStatus::CancelledMissed);
    assert_eq!(
        order.cancellation_reason,
        Some(CancellationReason::delivery_never_started())
    );
    assert_eq!(h.listing_status("listing-b"), ListingStatus::Active);
    // 扫描不动账本
    assert_eq!(h.escrow_state(&order), Some(EscrowState::Initialized));
    assert_eq!(h.emitter.count(NotificationKind::DeliveryMissed), 1);

    let events = h.coordinator.order_events(&order.order_id).unwrap();
    let last = events.last().unwrap();
    assert_eq!(last.event_type, OrderEventType::DeliveryMissed);
    assert_eq!(last.actor_id, SWEEP_ACTOR);
}

// ------------------------------------------------------------------------
// C: Accept, start at +1h, confirm at +30h → Completed, late, listing Sold
// ------------------------------------------------------------------------
#[tokio::test]
async fn test_late_confirmation_completes() {
    let h = harness();
    let order = h.accepted_order("listing-c").await;

    let started = h.start(&order.order_id, T + H).await.unwrap();
    assert!(started.delivery_started);
    assert_eq!(started.status, OrderStatus::Accepted);

    let done = h.confirm(&order.order_id, T + 30 * H).await.unwrap();
    assert_eq!(done.status, OrderStatus::Completed);
    assert!(done.is_late_delivery);
    assert_eq!(h.listing_status("listing-c"), ListingStatus::Sold);
    assert_eq!(h.escrow_state(&done), Some(EscrowState::Completed));
    assert_eq!(h.ledger.settlement_count(&done.escrow_address), 1);

    assert_eq!(
        h.events(&order.order_id),
        vec![
            OrderEventType::OrderPlaced,
            OrderEventType::OrderAccepted,
            OrderEventType::DeliveryStarted,
            OrderEventType::OrderCompleted,
        ]
    );
    let completed: Vec<_> = h
        .emitter
        .sent()
        .into_iter()
        .filter(|n| n.kind == NotificationKind::OrderCompleted)
        .collect();
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].recipient_id, SELLER);

    let profile = h.coordinator.compute_reliability(SELLER).unwrap();
    assert_eq!(profile.late_completed, 1);
    assert_eq!(profile.count, 1);
}

// ------------------------------------------------------------------------
// D: ClaimRefund before the deadline → InvalidTransition, nothing moves
// ------------------------------------------------------------------------
#[tokio::test]
async fn test_refund_before_deadline_rejected() {
    let h = harness();
    let order = h.accepted_order("listing-d").await;

    let result = h.refund(&order.order_id, T + 23 * H).await;
    assert!(matches!(result, Err(CoordinatorError::InvalidTransition(_))));

    let stored = h.order(&order.order_id);
    assert_eq!(stored.status, OrderStatus::Accepted);
    assert_eq!(stored.version, order.version);
    assert_eq!(h.escrow_state(&stored), Some(EscrowState::Initialized));
    assert_eq!(h.listing_status("listing-d"), ListingStatus::Pending);
}

#[tokio::test]
async fn test_refund_after_deadline() {
    let h = harness();
    let order = h.accepted_order("listing-r").await;

    let refunded = h.refund(&order.order_id, T + 25 * H).await.unwrap();
    assert_eq!(refunded.status, OrderStatus::Refunded);
    assert_eq!(
        refunded.cancellation_reason,
        Some(CancellationReason::deadline_missed())
    );
    assert_eq!(h.escrow_state(&refunded), Some(EscrowState::Refunded));
    assert_eq!(h.listing_status("listing-r"), ListingStatus::Active);

    // 卖家收到退款通知
    let last = h.emitter.sent().pop().unwrap();
    assert_eq!(last.recipient_id, SELLER);
    assert_eq!(last.kind, NotificationKind::OrderDenied);
}

// ------------------------------------------------------------------------
// E: 5 unsuccessful outcomes → HighRisk, clean seller → Reliable
// ------------------------------------------------------------------------
#[tokio::test]
async fn test_reliability_flags() {
    let h = harness();
    for i in 0..5 {
        let order = h.accepted_order(&format!("listing-e{}", i)).await;
        h.refund(&order.order_id, T + 25 * H).await.unwrap();
    }

    let profile = h.coordinator.compute_reliability(SELLER).unwrap();
    assert_eq!(profile.count, 5);
    assert_eq!(profile.refunded, 5);
    assert_eq!(profile.flag, ReliabilityFlag::HighRisk);
    assert_eq!(profile.summary(), "High Risk: 5+ unsuccessful orders");

    let clean = h.coordinator.compute_reliability("fresh-seller").unwrap();
    assert_eq!(clean.count, 0);
    assert_eq!(clean.flag, ReliabilityFlag::Reliable);
}

#[tokio::test]
async fn test_on_time_confirmation_not_counted() {
    let h = harness();
    let order = h.accepted_order("listing-ok").await;
    let done = h.confirm(&order.order_id, T + 10 * H).await.unwrap();
    assert!(!done.is_late_delivery);

    let profile = h.coordinator.compute_reliability(SELLER).unwrap();
    assert_eq!(profile.total_orders, 1);
    assert_eq!(profile.count, 0);
    assert_eq!(profile.flag, ReliabilityFlag::Reliable);
}

#[tokio::test]
async fn test_deny_frees_listing_and_keeps_funds_locked() {
    let h = harness();
    h.add_listing("listing-deny");
    let order = h.place("listing-deny", T).await;

    let denied = h
        .deny(&order.order_id, reason("Out of stock"), T + H)
        .await
        .unwrap();
    assert_eq!(denied.status, OrderStatus::CancelledBySeller);
    assert_eq!(denied.cancellation_reason, Some(reason("Out of stock")));
    assert_eq!(h.listing_status("listing-deny"), ListingStatus::Active);
    // 拒单不退款（资金仍锁定在托管中）
    assert_eq!(h.escrow_state(&denied), Some(EscrowState::Initialized));

    let last = h.emitter.sent().pop().unwrap();
    assert_eq!(last.kind, NotificationKind::OrderDenied);
    assert_eq!(last.recipient_id, BUYER);
    assert!(last.message.contains("Out of stock"));

    // 拒单不计入可靠度
    let profile = h.coordinator.compute_reliability(SELLER).unwrap();
    assert_eq!(profile.denied, 1);
    assert_eq!(profile.count, 0);
}

#[tokio::test]
async fn test_relist_after_deny_accepts_new_buyer() {
    let h = harness();
    h.add_listing("listing-relist");
    let first = h.place("listing-relist", T).await;
    h.deny(&first.order_id, reason("Changed my mind"), T + H)
        .await
        .unwrap();

    let second = h
        .place_as(OTHER_BUYER, "listing-relist", T + 2 * H)
        .await
        .unwrap();
    assert_ne!(second.escrow_address, first.escrow_address);
    assert_eq!(h.listing_status("listing-relist"), ListingStatus::Pending);

    let history = h.coordinator.orders_for_listing("listing-relist").unwrap();
    assert_eq!(history.len(), 2);
}

// ------------------------------------------------------------------------
// 同一买家再次购买：新订单必须有自己的托管，旧订单不受影响
// ------------------------------------------------------------------------
#[tokio::test]
async fn test_same_buyer_rebuys_after_sweep() {
    let h = harness();
    let first = h.accepted_order("listing-again").await;
    assert_eq!(h.sweeper().sweep_at(T + 25 * H).await.cancelled, 1);
    assert_eq!(h.listing_status("listing-again"), ListingStatus::Active);

    let second = h.place("listing-again", T + 26 * H).await;
    assert_ne!(second.escrow_address, first.escrow_address);
    assert_ne!(second.escrow_order_key, first.escrow_order_key);
    assert_eq!(h.ledger.account_count(), 2);

    h.accept(&second.order_id, T + 26 * H).await.unwrap();
    h.confirm(&second.order_id, T + 27 * H).await.unwrap();
    assert_eq!(h.escrow_state(&second), Some(EscrowState::Completed));
    // 旧托管仍锁定，不会被新订单结算
    assert_eq!(h.escrow_state(&first), Some(EscrowState::Initialized));
    assert_eq!(h.listing_status("listing-again"), ListingStatus::Sold);

    let report = h.reconciler().cross_check().await;
    assert_eq!(report.converged, 0);
    assert_eq!(report.locked_funds, 1);

    let old = h.order(&first.order_id);
    assert_eq!(old.status, OrderStatus::CancelledMissed);
    assert_eq!(old.version, first.version + 1);
    let completed = h
        .coordinator
        .orders_for_listing("listing-again")
        .unwrap()
        .into_iter()
        .filter(|o| o.status == OrderStatus::Completed)
        .count();
    assert_eq!(completed, 1);
}

#[tokio::test]
async fn test_same_buyer_rebuys_after_deny() {
    let h = harness();
    h.add_listing("listing-deny-again");
    let first = h.place("listing-deny-again", T).await;
    h.deny(&first.order_id, reason("Changed my mind"), T + H)
        .await
        .unwrap();

    let second = h.place("listing-deny-again", T + 2 * H).await;
    assert_ne!(second.escrow_address, first.escrow_address);
    assert_eq!(h.ledger.account_count(), 2);
    assert_eq!(h.escrow_state(&second), Some(EscrowState::Initialized));
    assert_eq!(h.listing_status("listing-deny-again"), ListingStatus::Pending);
}

#[tokio::test]
async fn test_events_are_sequenced_and_broadcast() {
    let h = harness();
    let mut rx = h.coordinator.subscribe();
    let order = h.accepted_order("listing-ev").await;

    let placed = rx.recv().await.unwrap();
    let accepted = rx.recv().await.unwrap();
    assert_eq!(placed.event_type, OrderEventType::OrderPlaced);
    assert_eq!(placed.from_status, None);
    assert_eq!(accepted.event_type, OrderEventType::OrderAccepted);
    assert_eq!(accepted.from_status, Some(OrderStatus::AwaitingAcceptance));
    assert_eq!(accepted.to_status, OrderStatus::Accepted);
    assert!(accepted.sequence > placed.sequence);
    assert_eq!(
        accepted.payload,
        EventPayload::OrderAccepted {
            accepted_at: T,
            deadline: T + 24 * H,
        }
    );

    let stored = h.coordinator.order_events(&order.order_id).unwrap();
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[1].sequence, accepted.sequence);
}

#[tokio::test]
async fn test_execute_command_response() {
    let h = harness();
    h.add_listing("listing-resp");

    let ok = h
        .coordinator
        .execute_command(
            OrderCommand::new(
                BUYER,
                OrderCommandPayload::PlaceOrder {
                    listing_id: "listing-resp".to_string(),
                    shipping: shipping(),
                },
            )
            .at(T),
        )
        .await;
    assert!(ok.success);
    let order = ok.order.unwrap();

    let cmd = OrderCommand::new(
        OTHER_BUYER,
        OrderCommandPayload::AcceptOrder {
            order_id: order.order_id.clone(),
        },
    )
    .at(T);
    let command_id = cmd.command_id.clone();
    let rejected = h.coordinator.execute_command(cmd).await;
    assert!(!rejected.success);
    assert_eq!(rejected.command_id, command_id);
    let error = rejected.error.unwrap();
    assert_eq!(error.code, ErrorCode::PermissionDenied);
    assert!(!error.retryable);
}

#[tokio::test]
async fn test_fractional_guarantee_hours_snapshot() {
    let h = harness();
    let mut quick = listing("listing-quick");
    quick.guarantee_hours = Some(1.5);
    quick.delivery_method = DeliveryMethod::Pickup;
    h.coordinator.upsert_listing(&quick).unwrap();

    let order = h.place("listing-quick", T).await;
    let order = h.accept(&order.order_id, T).await.unwrap();
    assert_eq!(order.deadline(), Some(T + 90 * 60 * 1000));

    // 下单后卖家修改保障时长不影响已有订单
    quick.guarantee_hours = Some(72.0);
    h.coordinator.upsert_listing(&quick).unwrap();
    assert_eq!(h.order(&order.order_id).guarantee_hours, 1.5);

    let accepted = h.emitter.sent().pop().unwrap();
    assert!(accepted.message.contains("hand over"));
}

// ------------------------------------------------------------------------
// 下架：只有卖家、只有未被占用的挂单
// ------------------------------------------------------------------------
#[tokio::test]
async fn test_withdraw_listing() {
    let h = harness();
    h.add_listing("listing-withdraw");
    h.add_listing("listing-reserved");
    h.place("listing-reserved", T).await;

    let stranger = h.coordinator.withdraw_listing("listing-withdraw", BUYER);
    assert!(matches!(stranger, Err(CoordinatorError::Unauthorized(_))));

    let reserved = h.coordinator.withdraw_listing("listing-reserved", SELLER);
    assert!(matches!(reserved, Err(CoordinatorError::ListingNotAvailable(_))));
    assert_eq!(h.listing_status("listing-reserved"), ListingStatus::Pending);

    let withdrawn = h
        .coordinator
        .withdraw_listing("listing-withdraw", SELLER)
        .unwrap();
    assert_eq!(withdrawn.status, ListingStatus::Deleted);

    // 已下架不可下单，也不会初始化托管
    let result = h.place_as(BUYER, "listing-withdraw", T + H).await;
    assert!(matches!(result, Err(CoordinatorError::ListingNotAvailable(_))));
    assert_eq!(h.ledger.account_count(), 1);
}
