//! Budget tracker behaviour across a step.

use actuation_kernel::budget::{BudgetError, BudgetKind, BudgetTracker, OperationKind};
use actuation_kernel::config::BudgetConfig;

fn tracker(limits: BudgetConfig) -> BudgetTracker {
    BudgetTracker::new(limits)
}

#[test]
fn every_limit_raises_its_own_kind() {
    let limits = BudgetConfig {
        max_ticks: 10,
        max_nodes: 1,
        max_depth: 1,
        max_bytes: 10,
        max_work: 10,
    };

    let mut t = tracker(limits.clone());
    let err = t.charge_operation(OperationKind::Bind, 0).expect_err("ticks");
    assert_eq!(err.kind(), BudgetKind::Time);

    let mut t = tracker(limits.clone());
    t.charge_node().expect("first node");
    assert_eq!(t.charge_node().expect_err("nodes").kind(), BudgetKind::Node);

    let mut t = tracker(limits.clone());
    let guard = t.enter_depth().expect("depth 1");
    drop(guard);
    let mut outer = t.enter_depth().expect("depth 1 again");
    assert_eq!(outer.enter_depth().expect_err("depth 2").kind(), BudgetKind::Depth);
    drop(outer);

    let mut t = tracker(limits.clone());
    assert_eq!(t.charge_bytes(11).expect_err("bytes").kind(), BudgetKind::Byte);

    let mut t = tracker(limits);
    assert_eq!(t.charge_work(11).expect_err("work").kind(), BudgetKind::Work);
}

#[test]
fn counters_never_decrease_within_a_step() {
    let mut t = tracker(BudgetConfig::default());
    let mut last = t.snapshot();
    for i in 0..20u64 {
        t.charge_operation(OperationKind::Hash, i.saturating_mul(100)).expect("ticks");
        t.charge_bytes(i).expect("bytes");
        t.charge_work(1).expect("work");
        let now = t.snapshot();
        assert!(now.ticks >= last.ticks);
        assert!(now.bytes >= last.bytes);
        assert!(now.work >= last.work);
        last = now;
    }
}

#[test]
fn peak_depth_survives_release() {
    let mut t = tracker(BudgetConfig::default());
    {
        let mut a = t.enter_depth().expect("1");
        let mut b = a.enter_depth().expect("2");
        let _c = b.enter_depth().expect("3");
    }
    let snap = t.snapshot();
    assert_eq!(snap.depth, 0);
    assert_eq!(snap.peak_depth, 3);
}

#[test]
fn costs_are_deterministic() {
    let run = || {
        let mut t = tracker(BudgetConfig::default());
        for kind in [
            OperationKind::Canonicalize,
            OperationKind::Hash,
            OperationKind::Compare,
            OperationKind::Lookup,
            OperationKind::Bind,
            OperationKind::Verify,
            OperationKind::Scan,
        ] {
            t.charge_operation(kind, 1000).expect("charge");
        }
        t.snapshot()
    };
    assert_eq!(run(), run());
}

#[test]
fn error_reports_usage_and_limit() {
    let mut t = tracker(BudgetConfig {
        max_nodes: 10,
        ..BudgetConfig::default()
    });
    for _ in 0..10 {
        t.charge_node().expect("within limit");
    }
    assert_eq!(
        t.charge_node(),
        Err(BudgetError::NodeBudgetExceeded { used: 11, limit: 10 })
    );
}
