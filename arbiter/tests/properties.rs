use proptest::prelude::*;
use rtt_arbiter::{
    test_utils::{client, target, DriverCall, Harness},
    ArbiterState, Notification,
};
use std::collections::HashMap;

#[derive(Debug, Clone)]
enum Op {
    Start { client: u8, key: u8 },
    Stop { client: u8, key: u8 },
    Enable { client: u8, key: u8 },
    Disable { client: u8, key: u8 },
    Complete,
    Fail,
    Disconnect { client: u8 },
    Unload,
    Load,
}

fn op() -> impl Strategy<Value = Op> {
    let client = 1u8..4;
    let key = 1u8..6;
    prop_oneof![
        4 => (client.clone(), key.clone()).prop_map(|(client, key)| Op::Start { client, key }),
        2 => (client.clone(), key.clone()).prop_map(|(client, key)| Op::Stop { client, key }),
        2 => (client.clone(), key.clone()).prop_map(|(client, key)| Op::Enable { client, key }),
        2 => (client.clone(), key.clone()).prop_map(|(client, key)| Op::Disable { client, key }),
        3 => Just(Op::Complete),
        1 => Just(Op::Fail),
        1 => client.prop_map(|client| Op::Disconnect { client }),
        1 => Just(Op::Unload),
        1 => Just(Op::Load),
    ]
}

fn apply(harness: &mut Harness, op: &Op) {
    match *op {
        Op::Start { client: c, key } => {
            harness.start(client(u128::from(c)), u32::from(key), vec![target(key)]);
        }
        Op::Stop { client: c, key } => harness.stop(client(u128::from(c)), u32::from(key)),
        Op::Enable { client: c, key } => harness.enable(client(u128::from(c)), u32::from(key)),
        Op::Disable { client: c, key } => harness.disable(client(u128::from(c)), u32::from(key)),
        Op::Complete => {
            harness.complete_in_flight();
        }
        Op::Fail => {
            if let Some(burst) = harness.driver.last_burst() {
                harness.fail_burst(burst, "injected");
            }
        }
        Op::Disconnect { client: c } => harness.disconnect(client(u128::from(c))),
        Op::Unload => harness.unload(),
        Op::Load => harness.load(),
    }
}

proptest! {
    #[test]
    fn prop_ranging_and_responding_are_exclusive(ops in prop::collection::vec(op(), 1..60)) {
        let mut harness = Harness::enabled();
        for op in &ops {
            apply(&mut harness, op);

            let snapshot = harness.snapshot();
            match snapshot.state {
                ArbiterState::Responding => {
                    prop_assert!(snapshot.in_flight.is_none());
                    prop_assert!(snapshot.queued.is_empty());
                    prop_assert!(!snapshot.leases.is_empty());
                }
                ArbiterState::Ranging => {
                    prop_assert!(snapshot.leases.is_empty());
                    prop_assert!(snapshot.in_flight.is_some());
                }
                ArbiterState::Idle | ArbiterState::Disabled => {
                    prop_assert!(snapshot.in_flight.is_none());
                    prop_assert!(snapshot.queued.is_empty());
                    prop_assert!(snapshot.leases.is_empty());
                }
            }
        }
    }

    #[test]
    fn prop_terminal_replies_are_bounded_per_key(ops in prop::collection::vec(op(), 1..60)) {
        let mut harness = Harness::enabled();
        for op in &ops {
            apply(&mut harness, op);
        }

        // Each start, enable or stop can end in at most one terminal reply for its key
        let mut budget: HashMap<(u128, u32), usize> = HashMap::new();
        for op in &ops {
            match *op {
                Op::Start { client, key } | Op::Stop { client, key } | Op::Enable { client, key } => {
                    *budget.entry((u128::from(client), u32::from(key))).or_default() += 1;
                }
                _ => {}
            }
        }

        let mut delivered: HashMap<(u128, u32), usize> = HashMap::new();
        for (c, notification) in harness.sink.all() {
            if notification.is_terminal() {
                *delivered.entry((c.0.as_u128(), notification.key())).or_default() += 1;
            }
        }

        for (pair, count) in delivered {
            prop_assert!(count <= budget.get(&pair).copied().unwrap_or(0), "{:?} got {} replies", pair, count);
        }
    }

    #[test]
    fn prop_driver_enable_and_disable_alternate(ops in prop::collection::vec(op(), 1..60)) {
        let mut harness = Harness::enabled();
        for op in &ops {
            apply(&mut harness, op);
        }

        let mut responder_on = false;
        for call in harness.driver.calls() {
            match call {
                DriverCall::EnableResponder { .. } => {
                    // An unload may drop leases without a disable call
                    responder_on = true;
                }
                DriverCall::DisableResponder => {
                    prop_assert!(responder_on);
                    responder_on = false;
                }
                DriverCall::IssueRanging { .. } | DriverCall::CancelRanging { .. } => {}
            }
        }
    }

    #[test]
    fn prop_bursts_issue_in_fifo_order(keys in prop::collection::vec(1u8..200, 1..20)) {
        let mut harness = Harness::enabled();
        let c1 = client(1);

        let mut expected = Vec::new();
        for key in &keys {
            let key = u32::from(*key);
            if !expected.contains(&key) {
                expected.push(key);
            }
            harness.start(c1, key, vec![target(1)]);
        }
        while harness.state() == ArbiterState::Ranging {
            harness.complete_in_flight();
        }

        let completed: Vec<u32> = harness
            .sink
            .for_client(&c1)
            .iter()
            .filter_map(|n| match n {
                Notification::Succeeded { key, .. } => Some(*key),
                _ => None,
            })
            .collect();
        // Every start lands before the first completion, so repeats are rejected
        prop_assert_eq!(completed, expected);
        prop_assert_eq!(harness.state(), ArbiterState::Idle);
    }

    #[test]
    fn prop_disconnect_leaves_no_footprint(ops in prop::collection::vec(op(), 1..60)) {
        let mut harness = Harness::enabled();
        for op in &ops {
            apply(&mut harness, op);
        }
        for c in 1u8..4 {
            harness.disconnect(client(u128::from(c)));
        }

        let snapshot = harness.snapshot();
        prop_assert!(snapshot.in_flight.is_none());
        prop_assert!(snapshot.queued.is_empty());
        prop_assert!(snapshot.leases.is_empty());
        prop_assert!(snapshot.clients.is_empty());
        prop_assert!(snapshot.state == ArbiterState::Idle || snapshot.state == ArbiterState::Disabled);
    }
}
