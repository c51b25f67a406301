//! Integration tests for the full submission pipeline.
//!
//! Tests: request → TransactionEngine → UnitOfWork → in-memory store → queries
//!
//! Verifies:
//! - Failed batches leave no trace (atomicity, idempotent rejection)
//! - Counters stay conserved across any sequence of operations
//! - Holder resolution for Return/Transfer, including drift detection
//! - Overlapping batches serialize; disjoint batches do not block

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use proptest::prelude::*;

    use sampletrack_inventory::{
        ActionType, AuditAction, AuditFilter, Pagination, Party, RegisterUnits, Sample,
        SampleKey, SampleState, SubmitTransaction, Unit, UnitId, UnitLine, UnitStatus,
    };

    use crate::engine::{EngineError, TransactionEngine};
    use crate::store::{InMemoryInventoryStore, InventoryStore, StoreError};

    type Engine = TransactionEngine<InMemoryInventoryStore>;

    fn clerk() -> Party {
        Party::new("Clerk", "Warehouse")
    }

    fn ana() -> Party {
        Party::new("Ana", "Design")
    }

    fn ben() -> Party {
        Party::new("Ben", "Sales")
    }

    fn request(action: ActionType, counterparty: Option<Party>, units: &[&str]) -> SubmitTransaction {
        SubmitTransaction {
            action,
            actor: clerk(),
            counterparty,
            reason_id: matches!(action, ActionType::Export | ActionType::Reject).then_some(3),
            note: None,
            destination: (action == ActionType::Return).then(|| "WH2".to_string()),
            units: units.iter().map(|u| UnitLine::new(*u)).collect(),
        }
    }

    async fn register(engine: &Engine, sample: &str, count: u32) {
        engine
            .register_units(RegisterUnits {
                sample_key: sample.to_string(),
                unit_ids: (1..=count).map(|i| format!("{sample}|{i}")).collect(),
                location: "WH1".to_string(),
                actor: clerk(),
                note: None,
            })
            .await
            .unwrap();
    }

    async fn setup(sample: &str, count: u32) -> Engine {
        let engine = TransactionEngine::new(InMemoryInventoryStore::new());
        register(&engine, sample, count).await;
        engine
    }

    async fn unit(engine: &Engine, id: &str) -> Unit {
        engine.unit(id).await.unwrap().unwrap()
    }

    async fn sample(engine: &Engine, key: &str) -> Sample {
        engine.sample(key).await.unwrap().unwrap()
    }

    async fn holder(engine: &Engine, id: &str) -> Option<Party> {
        engine.current_holder(id).await.unwrap().and_then(|r| r.holder)
    }

    async fn audit_count(engine: &Engine) -> u64 {
        engine
            .audit_log(&AuditFilter::default(), Pagination::default())
            .await
            .unwrap()
            .total
    }

    #[tokio::test]
    async fn second_identical_borrow_is_refused_without_side_effects() {
        let engine = setup("A-1", 10).await;
        engine
            .submit(request(ActionType::Borrow, Some(ana()), &["A-1|1"]))
            .await
            .unwrap();
        let audit_before = audit_count(&engine).await;

        let err = engine
            .submit(request(ActionType::Borrow, Some(ana()), &["A-1|1"]))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Precondition { .. }));
        assert_eq!(err.offending_unit(), Some("A-1|1"));
        assert_eq!(err.http_status(), 400);

        assert_eq!(unit(&engine, "A-1|1").await.status(), UnitStatus::Borrowed);
        let s = sample(&engine, "A-1").await;
        assert_eq!((s.on_hand(), s.borrowed()), (9, 1));
        assert_eq!(audit_count(&engine).await, audit_before);
    }

    #[tokio::test]
    async fn failing_unit_aborts_the_whole_batch() {
        let engine = setup("A-1", 10).await;
        engine
            .submit(request(ActionType::Borrow, Some(ben()), &["A-1|3"]))
            .await
            .unwrap();

        let err = engine
            .submit(request(ActionType::Borrow, Some(ana()), &["A-1|1", "A-1|2", "A-1|3"]))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "precondition_error");
        assert_eq!(err.offending_unit(), Some("A-1|3"));

        for id in ["A-1|1", "A-1|2"] {
            let u = unit(&engine, id).await;
            assert_eq!(u.status(), UnitStatus::Available);
            assert_eq!(u.location(), Some("WH1"));
        }
        let s = sample(&engine, "A-1").await;
        assert_eq!((s.on_hand(), s.borrowed()), (9, 1));
    }

    #[tokio::test]
    async fn borrow_then_return_restores_the_unit() {
        let engine = setup("A-1", 10).await;
        engine
            .submit(request(ActionType::Borrow, Some(ana()), &["A-1|1"]))
            .await
            .unwrap();
        engine
            .submit(request(ActionType::Return, Some(ana()), &["A-1|1"]))
            .await
            .unwrap();

        let u = unit(&engine, "A-1|1").await;
        assert_eq!(u.status(), UnitStatus::Available);
        assert_eq!(u.location(), Some("WH2"));
        let s = sample(&engine, "A-1").await;
        assert_eq!((s.on_hand(), s.borrowed()), (10, 0));
        assert_eq!(holder(&engine, "A-1|1").await, None);

        let filter = AuditFilter {
            unit_id: Some(UnitId::parse("A-1|1").unwrap()),
            ..AuditFilter::default()
        };
        let page = engine.audit_log(&filter, Pagination::default()).await.unwrap();
        let actions: Vec<AuditAction> = page.entries.iter().map(|e| e.action).collect();
        assert_eq!(actions, vec![AuditAction::Return, AuditAction::Borrow, AuditAction::Register]);
        assert_eq!(page.entries[0].previous_holder, Some(ana()));
    }

    #[tokio::test]
    async fn only_the_holder_can_return_a_unit() {
        let engine = setup("S", 1).await;
        engine
            .submit(request(ActionType::Borrow, Some(ana()), &["S|1"]))
            .await
            .unwrap();

        let err = engine
            .submit(request(ActionType::Return, Some(Party::new("Mallory", "Elsewhere")), &["S|1"]))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Conflict { .. }));
        assert_eq!(err.http_status(), 409);
        assert_eq!(err.offending_unit(), Some("S|1"));
        assert_eq!(unit(&engine, "S|1").await.status(), UnitStatus::Borrowed);
        assert_eq!(holder(&engine, "S|1").await, Some(ana()));

        engine
            .submit(request(ActionType::Return, Some(ana()), &["S|1"]))
            .await
            .unwrap();
        assert_eq!(unit(&engine, "S|1").await.status(), UnitStatus::Available);
    }

    #[tokio::test]
    async fn transfer_spanning_two_holders_is_rejected_entirely() {
        let engine = setup("A-1", 10).await;
        engine
            .submit(request(ActionType::Borrow, Some(ana()), &["A-1|1"]))
            .await
            .unwrap();
        engine
            .submit(request(ActionType::Borrow, Some(ben()), &["A-1|2"]))
            .await
            .unwrap();

        let err = engine
            .submit(request(
                ActionType::Transfer,
                Some(Party::new("Cat", "QA")),
                &["A-1|1", "A-1|2"],
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Conflict { .. }));
        assert_eq!(err.http_status(), 409);

        assert_eq!(holder(&engine, "A-1|1").await, Some(ana()));
        assert_eq!(holder(&engine, "A-1|2").await, Some(ben()));
        assert_eq!(unit(&engine, "A-1|1").await.status(), UnitStatus::Borrowed);
    }

    #[tokio::test]
    async fn full_lifecycle_of_one_sample() {
        let engine = setup("A-1", 10).await;
        let cat = Party::new("Cat", "QA");

        engine
            .submit(request(ActionType::Borrow, Some(ana()), &["A-1|1"]))
            .await
            .unwrap();
        assert_eq!(unit(&engine, "A-1|1").await.status(), UnitStatus::Borrowed);
        let s = sample(&engine, "A-1").await;
        assert_eq!((s.on_hand(), s.borrowed()), (9, 1));

        engine
            .submit(request(ActionType::Transfer, Some(cat.clone()), &["A-1|1"]))
            .await
            .unwrap();
        assert_eq!(unit(&engine, "A-1|1").await.status(), UnitStatus::Borrowed);
        assert_eq!(holder(&engine, "A-1|1").await, Some(cat.clone()));
        let s = sample(&engine, "A-1").await;
        assert_eq!((s.on_hand(), s.borrowed()), (9, 1));

        engine
            .submit(request(ActionType::Return, Some(cat), &["A-1|1"]))
            .await
            .unwrap();
        let u = unit(&engine, "A-1|1").await;
        assert_eq!((u.status(), u.location()), (UnitStatus::Available, Some("WH2")));
        let s = sample(&engine, "A-1").await;
        assert_eq!((s.on_hand(), s.borrowed()), (10, 0));

        engine
            .submit(request(ActionType::Export, Some(ben()), &["A-1|2"]))
            .await
            .unwrap();
        assert_eq!(unit(&engine, "A-1|2").await.status(), UnitStatus::Exported);
        let s = sample(&engine, "A-1").await;
        assert_eq!((s.on_hand(), s.exported()), (9, 1));

        engine
            .submit(request(ActionType::Reject, None, &["A-1|3"]))
            .await
            .unwrap();
        let u = unit(&engine, "A-1|3").await;
        assert_eq!(u.status(), UnitStatus::Rejected);
        assert_eq!(u.location(), Some("WH1"));
        let s = sample(&engine, "A-1").await;
        assert_eq!((s.on_hand(), s.borrowed(), s.exported(), s.rejected()), (8, 0, 1, 1));
        assert_eq!(s.total(), 10);
        assert_eq!(s.state(), SampleState::Available);
    }

    #[tokio::test]
    async fn transfer_supersedes_the_previous_holder_record() {
        let engine = setup("A-1", 2).await;
        let borrow_id = engine
            .submit(request(ActionType::Borrow, Some(ana()), &["A-1|1", "A-1|2"]))
            .await
            .unwrap();
        let transfer_id = engine
            .submit(request(ActionType::Transfer, Some(ben()), &["A-1|1", "A-1|2"]))
            .await
            .unwrap();

        let borrow = engine.transaction(borrow_id).await.unwrap().unwrap();
        assert_eq!(borrow.details.len(), 2);
        assert!(borrow.details.iter().all(|d| d.closed_at.is_some()));

        let transfer = engine.transaction(transfer_id).await.unwrap().unwrap();
        assert_eq!(transfer.header.counterparty, Some(ben()));
        for detail in &transfer.details {
            assert!(detail.closed_at.is_none());
            let predecessor = detail.predecessor.unwrap();
            assert!(borrow.details.iter().any(|d| d.id == predecessor && d.unit_id == detail.unit_id));
        }

        assert!(engine.open_holdings("Ana").await.unwrap().is_empty());
        let held = engine.open_holdings("Ben").await.unwrap();
        assert_eq!(held.len(), 2);
        assert!(held.iter().all(|d| d.action == ActionType::Transfer));
    }

    #[tokio::test]
    async fn export_can_be_returned() {
        let engine = setup("A-1", 1).await;
        engine
            .submit(request(ActionType::Export, Some(ben()), &["A-1|1"]))
            .await
            .unwrap();
        assert_eq!(sample(&engine, "A-1").await.state(), SampleState::Exported);

        engine
            .submit(request(ActionType::Return, Some(ben()), &["A-1|1"]))
            .await
            .unwrap();
        let s = sample(&engine, "A-1").await;
        assert_eq!((s.on_hand(), s.exported()), (1, 0));
        assert_eq!(s.state(), SampleState::Available);
    }

    #[tokio::test]
    async fn returning_an_available_unit_is_a_precondition_failure() {
        let engine = setup("A-1", 2).await;
        let err = engine
            .submit(request(ActionType::Return, Some(ana()), &["A-1|1"]))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Precondition { .. }));
    }

    #[tokio::test]
    async fn unknown_unit_is_not_found() {
        let engine = setup("A-1", 2).await;
        let err = engine
            .submit(request(ActionType::Borrow, Some(ana()), &["A-1|1", "A-1|7"]))
            .await
            .unwrap_err();
        assert_eq!(err.http_status(), 404);
        assert_eq!(err.offending_unit(), Some("A-1|7"));
        assert_eq!(unit(&engine, "A-1|1").await.status(), UnitStatus::Available);
    }

    #[tokio::test]
    async fn malformed_requests_never_reach_storage() {
        let engine = setup("A-1", 2).await;

        let mut missing_department = request(ActionType::Borrow, Some(Party::named("Ana")), &["A-1|1"]);
        let err = engine.submit(missing_department.clone()).await.unwrap_err();
        assert_eq!(err.kind(), "validation_error");

        missing_department.counterparty = Some(ana());
        missing_department.units = vec![UnitLine::new("A-1|x")];
        let err = engine.submit(missing_department).await.unwrap_err();
        assert_eq!(err.kind(), "validation_error");
        assert_eq!(err.offending_unit(), Some("A-1|x"));

        let mut no_destination = request(ActionType::Return, Some(ana()), &["A-1|1"]);
        no_destination.destination = None;
        assert_eq!(engine.submit(no_destination).await.unwrap_err().http_status(), 400);
    }

    #[tokio::test]
    async fn missing_holder_record_is_reported_as_drift() {
        let engine = setup("A-1", 2).await;

        // Mark a unit Borrowed behind the engine's back.
        let id = UnitId::parse("A-1|1").unwrap();
        let mut uow = engine.store().begin().await.unwrap();
        uow.lock_units(std::slice::from_ref(&id)).await.unwrap();
        uow.update_units(&[Unit::from_parts(id, UnitStatus::Borrowed, None).unwrap()])
            .await
            .unwrap();
        uow.commit().await.unwrap();

        let err = engine
            .submit(request(ActionType::Return, Some(ana()), &["A-1|1"]))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Consistency { .. }));
        assert_eq!(err.http_status(), 500);
        assert_eq!(err.offending_unit(), Some("A-1|1"));
        assert_eq!(unit(&engine, "A-1|1").await.status(), UnitStatus::Borrowed);
    }

    #[tokio::test]
    async fn registration_rules() {
        let engine = setup("A-1", 2).await;

        let dup = RegisterUnits {
            sample_key: "A-1".to_string(),
            unit_ids: vec!["A-1|3".to_string(), "A-1|2".to_string()],
            location: "WH1".to_string(),
            actor: clerk(),
            note: None,
        };
        let err = engine.register_units(dup).await.unwrap_err();
        assert!(matches!(err, EngineError::Conflict { .. }));
        assert_eq!(err.offending_unit(), Some("A-1|2"));
        assert!(engine.unit("A-1|3").await.unwrap().is_none());

        let foreign = RegisterUnits {
            sample_key: "A-1".to_string(),
            unit_ids: vec!["B-2|1".to_string()],
            location: "WH1".to_string(),
            actor: clerk(),
            note: None,
        };
        assert_eq!(engine.register_units(foreign).await.unwrap_err().kind(), "validation_error");
        assert!(engine.sample("B-2").await.unwrap().is_none());

        assert_eq!(sample(&engine, "A-1").await.on_hand(), 2);
    }

    #[tokio::test]
    async fn only_available_units_can_be_removed() {
        let engine = setup("A-1", 3).await;
        engine
            .submit(request(ActionType::Borrow, Some(ana()), &["A-1|2"]))
            .await
            .unwrap();

        let after = engine.deregister_unit("A-1|1", clerk(), None).await.unwrap();
        assert_eq!((after.on_hand(), after.total()), (1, 2));
        assert!(engine.unit("A-1|1").await.unwrap().is_none());

        let err = engine.deregister_unit("A-1|2", clerk(), None).await.unwrap_err();
        assert!(matches!(err, EngineError::Precondition { .. }));

        let err = engine.deregister_unit("A-1|1", clerk(), None).await.unwrap_err();
        assert_eq!(err.http_status(), 404);

        let filter = AuditFilter {
            action: Some(AuditAction::Deregister),
            ..AuditFilter::default()
        };
        assert_eq!(engine.audit_log(&filter, Pagination::default()).await.unwrap().total, 1);
    }

    #[tokio::test]
    async fn audit_log_pages_newest_first() {
        let engine = setup("A-1", 3).await;
        engine
            .submit(request(ActionType::Borrow, Some(ana()), &["A-1|1"]))
            .await
            .unwrap();

        let filter = AuditFilter {
            sample_key: Some(SampleKey::parse("A-1").unwrap()),
            ..AuditFilter::default()
        };
        let first = engine.audit_log(&filter, Pagination::new(2, 0)).await.unwrap();
        assert_eq!(first.total, 4);
        assert_eq!(first.entries.len(), 2);
        assert!(first.has_more);
        assert_eq!(first.entries[0].action, AuditAction::Borrow);

        let last = engine.audit_log(&filter, Pagination::new(2, 2)).await.unwrap();
        assert_eq!(last.entries.len(), 2);
        assert!(!last.has_more);
        assert!(last.entries.iter().all(|e| e.action == AuditAction::Register));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn overlapping_borrows_have_exactly_one_winner() {
        let engine = Arc::new(setup("A-1", 3).await);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let engine = engine.clone();
                tokio::spawn(async move {
                    let who = Party::new(format!("Borrower {i}"), "Design");
                    engine
                        .submit(request(ActionType::Borrow, Some(who), &["A-1|1", "A-1|2"]))
                        .await
                })
            })
            .collect();

        let mut winners = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => winners += 1,
                Err(err) => assert!(matches!(err, EngineError::Precondition { .. }), "{err:?}"),
            }
        }
        assert_eq!(winners, 1);

        let s = sample(&engine, "A-1").await;
        assert_eq!((s.on_hand(), s.borrowed()), (1, 2));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn disjoint_batches_do_not_block_each_other() {
        let engine = TransactionEngine::new(InMemoryInventoryStore::with_lock_timeout(Duration::from_millis(200)));
        register(&engine, "A-1", 1).await;
        register(&engine, "B-2", 1).await;

        // Hold A-1's rows open; a batch on B-2 must still go through.
        let mut held = engine.store().begin().await.unwrap();
        held.lock_units(&[UnitId::parse("A-1|1").unwrap()]).await.unwrap();
        held.lock_samples(&[SampleKey::parse("A-1").unwrap()]).await.unwrap();

        engine
            .submit(request(ActionType::Borrow, Some(ana()), &["B-2|1"]))
            .await
            .unwrap();

        // An overlapping batch waits, then gives up with a retryable conflict.
        let err = engine
            .submit(request(ActionType::Borrow, Some(ana()), &["A-1|1"]))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Store(StoreError::LockTimeout(_))));
        assert_eq!(err.http_status(), 409);

        held.rollback().await.unwrap();
        engine
            .submit(request(ActionType::Borrow, Some(ana()), &["A-1|1"]))
            .await
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn batch_that_waited_for_locks_is_stamped_after_it_got_them() {
        let engine = Arc::new(setup("S", 2).await);
        engine
            .submit(request(ActionType::Borrow, Some(ana()), &["S|2"]))
            .await
            .unwrap();

        let mut blocker = engine.store().begin().await.unwrap();
        blocker.lock_units(&[UnitId::parse("S|1").unwrap()]).await.unwrap();

        let waiting = {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .submit(request(ActionType::Borrow, Some(ben()), &["S|1", "S|2"]))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        engine
            .submit(request(ActionType::Return, Some(ana()), &["S|2"]))
            .await
            .unwrap();
        blocker.rollback().await.unwrap();
        waiting.await.unwrap().unwrap();

        assert_eq!(unit(&engine, "S|2").await.status(), UnitStatus::Borrowed);
        let filter = AuditFilter {
            unit_id: Some(UnitId::parse("S|2").unwrap()),
            ..AuditFilter::default()
        };
        let page = engine.audit_log(&filter, Pagination::default()).await.unwrap();
        let actions: Vec<AuditAction> = page.entries.iter().map(|e| e.action).collect();
        assert_eq!(
            actions,
            vec![AuditAction::Borrow, AuditAction::Return, AuditAction::Borrow, AuditAction::Register]
        );
        assert_eq!(page.entries[0].counterparty, Some(ben()));
        assert!(page.entries[0].occurred_at >= page.entries[1].occurred_at);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Submit(ActionType, u32, bool),
        Deregister(u32),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        let action = prop_oneof![
            Just(ActionType::Borrow),
            Just(ActionType::Return),
            Just(ActionType::Transfer),
            Just(ActionType::Export),
            Just(ActionType::Reject),
        ];
        prop_oneof![
            8 => (action, 1u32..=4, any::<bool>()).prop_map(|(a, u, who)| Op::Submit(a, u, who)),
            1 => (1u32..=4).prop_map(Op::Deregister),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]

        #[test]
        fn counters_match_registry_after_any_sequence(ops in prop::collection::vec(op_strategy(), 1..24)) {
            let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            runtime.block_on(async {
                let engine = setup("A-1", 4).await;
                let mut registered = 4;

                for op in ops {
                    match op {
                        Op::Submit(action, index, first) => {
                            let who = if first { ana() } else { ben() };
                            let counterparty = (action != ActionType::Reject).then_some(who);
                            let id = format!("A-1|{index}");
                            let _ = engine.submit(request(action, counterparty, &[id.as_str()])).await;
                        }
                        Op::Deregister(index) => {
                            if engine.deregister_unit(&format!("A-1|{index}"), clerk(), None).await.is_ok() {
                                registered -= 1;
                            }
                        }
                    }

                    let s = sample(&engine, "A-1").await;
                    assert_eq!(s.total(), registered);

                    let mut by_status = [0i64; 4];
                    for index in 1..=4 {
                        if let Some(u) = engine.unit(&format!("A-1|{index}")).await.unwrap() {
                            let slot = match u.status() {
                                UnitStatus::Available => 0,
                                UnitStatus::Borrowed => 1,
                                UnitStatus::Exported => 2,
                                UnitStatus::Rejected => 3,
                            };
                            by_status[slot] += 1;
                            assert_eq!(holder(&engine, u.id_typed().as_str()).await.is_some(), u.status().is_out());
                        }
                    }
                    assert_eq!(by_status, [s.on_hand(), s.borrowed(), s.exported(), s.rejected()]);
                }
            });
        }
    }
}
