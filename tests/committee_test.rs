/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Tests of the committee's epoch cache, by-view queries, and worker thread, against the mock protocol
//! state in [common::protocol_state].

mod common;

use std::{
    sync::{mpsc, Arc},
    time::Duration,
};

use common::{
    logging::{setup_logger, wait_until},
    protocol_state::{node_id, MockEpoch, MockProtocolState},
};
use hotstuff_ledger::{
    committee::{
        dkg::DKG,
        epoch_cache::MAX_CACHED_EPOCHS,
        protocol::{EpochPhase, ProtocolEvent},
        Committee, CommitteeConfiguration, CommitteeError,
    },
    types::data_types::{EpochCounter, ViewNumber},
};
use log::LevelFilter;

const WAIT: Duration = Duration::from_secs(5);

fn config() -> CommitteeConfiguration {
    CommitteeConfiguration::builder()
        .me(node_id(1))
        .fallback_epoch_views(1_000)
        .build()
}

fn counters(committee: &Committee<MockProtocolState>) -> Vec<u64> {
    committee
        .cached_epochs()
        .iter()
        .map(EpochCounter::int)
        .collect()
}

#[test]
fn bootstrap_prepares_previous_current_and_committed_next_epochs() {
    setup_logger(LevelFilter::Debug);

    let state = MockProtocolState::new(MockEpoch::new(2, 100, 199))
        .with_previous(MockEpoch::new(1, 0, 99))
        .with_next(MockEpoch::new(3, 200, 299));
    let committee = Committee::new(Arc::new(state), config(), None).unwrap();
    assert_eq!(counters(&committee), vec![1, 2, 3]);

    // Without a committed next epoch, only the current and previous epochs are prepared.
    let state = MockProtocolState::new(MockEpoch::new(2, 100, 199))
        .with_previous(MockEpoch::new(1, 0, 99))
        .with_phase(EpochPhase::Setup);
    let committee = Committee::new(Arc::new(state), config(), None).unwrap();
    assert_eq!(counters(&committee), vec![1, 2]);
}

#[test]
fn committed_phase_without_next_epoch_is_fatal() {
    let state =
        MockProtocolState::new(MockEpoch::new(2, 100, 199)).with_phase(EpochPhase::Committed);
    assert!(Committee::new(Arc::new(state), config(), None).is_err());
}

#[test]
fn non_contiguous_bootstrap_epochs_are_fatal() {
    let state = MockProtocolState::new(MockEpoch::new(2, 100, 199))
        .with_previous(MockEpoch::new(1, 0, 98));
    assert!(matches!(
        Committee::new(Arc::new(state), config(), None),
        Err(CommitteeError::NonContiguousEpochs(_))
    ));
}

#[test]
fn views_are_only_answered_for_cached_epochs() {
    setup_logger(LevelFilter::Debug);

    let state = Arc::new(MockProtocolState::new(MockEpoch::new(4, 0, 499)));
    let committee = Committee::new(state, config(), None).unwrap();
    let (protocol_events, protocol_event_receiver) = mpsc::channel();
    let (irrecoverable_errors, _irrecoverable_error_receiver) = mpsc::channel();
    let _worker = committee.start(protocol_event_receiver, irrecoverable_errors);

    // Epoch 5 is not cached yet.
    assert!(committee
        .leader_for_view(ViewNumber::new(800))
        .unwrap_err()
        .is_view_for_unknown_epoch());

    protocol_events
        .send(ProtocolEvent::EpochCommitted(MockEpoch::new(5, 500, 999)))
        .unwrap();
    wait_until(WAIT, || counters(&committee).contains(&5));

    committee.leader_for_view(ViewNumber::new(800)).unwrap();
    committee.leader_for_view(ViewNumber::new(999)).unwrap();
    assert!(committee
        .identities_by_epoch(ViewNumber::new(1000))
        .unwrap_err()
        .is_view_for_unknown_epoch());

    protocol_events
        .send(ProtocolEvent::EpochCommitted(MockEpoch::new(6, 1000, 1499)))
        .unwrap();
    wait_until(WAIT, || counters(&committee).contains(&6));
    committee.leader_for_view(ViewNumber::new(1000)).unwrap();
}

#[test]
fn cache_holds_the_three_highest_epochs() {
    let state = Arc::new(MockProtocolState::new(MockEpoch::new(1, 0, 99)));
    let committee = Committee::new(state, config(), None).unwrap();
    let (protocol_events, protocol_event_receiver) = mpsc::channel();
    let (irrecoverable_errors, _irrecoverable_error_receiver) = mpsc::channel();
    let _worker = committee.start(protocol_event_receiver, irrecoverable_errors);

    for counter in 2..=10u64 {
        protocol_events
            .send(ProtocolEvent::EpochCommitted(MockEpoch::new(
                counter,
                (counter - 1) * 100,
                counter * 100 - 1,
            )))
            .unwrap();
        wait_until(WAIT, || counters(&committee).contains(&counter));
        assert!(committee.cached_epochs().len() as u64 <= MAX_CACHED_EPOCHS);
    }
    assert_eq!(counters(&committee), vec![8, 9, 10]);

    assert!(committee
        .leader_for_view(ViewNumber::new(50))
        .unwrap_err()
        .is_view_for_unknown_epoch());
}

#[test]
fn non_contiguous_committed_epoch_stops_the_worker() {
    let state = Arc::new(MockProtocolState::new(MockEpoch::new(1, 0, 99)));
    let committee = Committee::new(state, config(), None).unwrap();
    let (protocol_events, protocol_event_receiver) = mpsc::channel();
    let (irrecoverable_errors, irrecoverable_error_receiver) = mpsc::channel();
    let _worker = committee.start(protocol_event_receiver, irrecoverable_errors);

    protocol_events
        .send(ProtocolEvent::EpochCommitted(MockEpoch::new(2, 150, 199)))
        .unwrap();
    let err = irrecoverable_error_receiver.recv_timeout(WAIT).unwrap();
    assert!(matches!(err, CommitteeError::NonContiguousEpochs(_)));
    assert_eq!(counters(&committee), vec![1]);

    // Committing the same epoch twice is not an error.
    let state = Arc::new(MockProtocolState::new(MockEpoch::new(1, 0, 99)));
    let committee = Committee::new(state, config(), None).unwrap();
    let (protocol_events, protocol_event_receiver) = mpsc::channel();
    let (irrecoverable_errors, irrecoverable_error_receiver) = mpsc::channel();
    let _worker = committee.start(protocol_event_receiver, irrecoverable_errors);
    for _ in 0..2 {
        protocol_events
            .send(ProtocolEvent::EpochCommitted(MockEpoch::new(2, 100, 199)))
            .unwrap();
    }
    wait_until(WAIT, || counters(&committee) == vec![1, 2]);
    assert!(irrecoverable_error_receiver
        .recv_timeout(Duration::from_millis(200))
        .is_err());
}

#[test]
fn leaders_are_deterministic() {
    let new_committee = || {
        let state = MockProtocolState::new(MockEpoch::new(2, 100, 199))
            .with_previous(MockEpoch::new(1, 0, 99));
        Committee::new(Arc::new(state), config(), None).unwrap()
    };
    let first = new_committee();
    let second = new_committee();

    for view in 0..200 {
        let view = ViewNumber::new(view);
        let leader = first.leader_for_view(view).unwrap();
        assert_eq!(leader, first.leader_for_view(view).unwrap());
        assert_eq!(leader, second.leader_for_view(view).unwrap());
        // Leaders are always voting members.
        assert!(first.identity_by_epoch(view, &leader).is_ok());
    }
}

#[test]
fn weight_thresholds_and_membership() {
    let state = Arc::new(MockProtocolState::new(MockEpoch::new(1, 0, 99)));
    let committee = Committee::new(state, config(), None).unwrap();
    let view = ViewNumber::new(10);

    // Only the four voting members count: total weight 10.
    assert_eq!(committee.identities_by_epoch(view).unwrap().len(), 4);
    assert_eq!(committee.quorum_threshold_for_view(view).unwrap().int(), 7);
    assert_eq!(committee.timeout_threshold_for_view(view).unwrap().int(), 4);

    assert_eq!(
        committee
            .identity_by_epoch(view, &node_id(3))
            .unwrap()
            .weight
            .int(),
        3
    );
    // Ejected.
    assert!(matches!(
        committee.identity_by_epoch(view, &node_id(5)),
        Err(CommitteeError::InvalidSigner { .. })
    ));
    // Never listed.
    assert!(matches!(
        committee.identity_by_epoch(view, &node_id(9)),
        Err(CommitteeError::InvalidSigner { .. })
    ));

    let dkg = committee.dkg(view).unwrap();
    assert_eq!(dkg.size(), 4);
    assert_eq!(committee.self_id(), node_id(1));
}

#[test]
fn fallback_epoch_follows_the_current_epoch() {
    setup_logger(LevelFilter::Debug);

    let state = Arc::new(
        MockProtocolState::new(MockEpoch::new(2, 100, 199))
            .with_previous(MockEpoch::new(1, 0, 99)),
    );
    let committee = Committee::new(state, config(), None).unwrap();
    let (protocol_events, protocol_event_receiver) = mpsc::channel();
    let (irrecoverable_errors, irrecoverable_error_receiver) = mpsc::channel();
    let _worker = committee.start(protocol_event_receiver, irrecoverable_errors);

    assert!(committee
        .leader_for_view(ViewNumber::new(200))
        .unwrap_err()
        .is_view_for_unknown_epoch());

    protocol_events
        .send(ProtocolEvent::EpochEmergencyFallbackTriggered)
        .unwrap();
    wait_until(WAIT, || counters(&committee).contains(&3));

    // The fallback epoch starts right after epoch 2 and lasts `fallback_epoch_views` views.
    committee.leader_for_view(ViewNumber::new(200)).unwrap();
    committee.leader_for_view(ViewNumber::new(1199)).unwrap();
    assert!(committee
        .leader_for_view(ViewNumber::new(1200))
        .unwrap_err()
        .is_view_for_unknown_epoch());
    assert_eq!(
        committee.identities_by_epoch(ViewNumber::new(500)).unwrap(),
        committee.identities_by_epoch(ViewNumber::new(150)).unwrap()
    );
    assert!(irrecoverable_error_receiver
        .recv_timeout(Duration::from_millis(100))
        .is_err());
}

#[test]
fn fallback_with_committed_next_epoch_is_irrecoverable() {
    let state = Arc::new(
        MockProtocolState::new(MockEpoch::new(2, 100, 199))
            .with_next(MockEpoch::new(3, 200, 299)),
    );
    let committee = Committee::new(state, config(), None).unwrap();
    let (protocol_events, protocol_event_receiver) = mpsc::channel();
    let (irrecoverable_errors, irrecoverable_error_receiver) = mpsc::channel();
    let _worker = committee.start(protocol_event_receiver, irrecoverable_errors);

    protocol_events
        .send(ProtocolEvent::EpochEmergencyFallbackTriggered)
        .unwrap();
    assert!(matches!(
        irrecoverable_error_receiver.recv_timeout(WAIT).unwrap(),
        CommitteeError::FallbackNextEpochCached { .. }
    ));
}

#[test]
fn fallback_triggered_before_start_is_injected_at_bootstrap() {
    let state = MockProtocolState::new(MockEpoch::new(2, 100, 199))
        .with_previous(MockEpoch::new(1, 0, 99))
        .with_fallback_triggered();
    let committee = Committee::new(Arc::new(state), config(), None).unwrap();
    assert_eq!(counters(&committee), vec![1, 2, 3]);
    committee.leader_for_view(ViewNumber::new(200)).unwrap();
}
