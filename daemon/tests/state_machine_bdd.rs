//! Behavioural coverage of the sequence/state machine: state-file
//! grammars, cursor arithmetic, and resume bookkeeping.

use chrono::{TimeZone, Utc};
use rstest::rstest;

use pathwatch::replication::{
    ReplicationFrequency, StateFile, parse_triple_path, sequence_to_path, split_sequence,
};

fn sample_state(sequence: i64) -> StateFile {
    StateFile {
        timestamp: Utc.with_ymd_and_hms(2020, 10, 9, 10, 3, 2).single(),
        sequence,
        path: "/replication/minute/004/230/996".to_owned(),
        frequency: Some(ReplicationFrequency::Minutely),
    }
}

#[test]
fn change_grammar_round_trips() {
    let state = sample_state(4_230_996);
    let rendered = state.to_change_grammar();
    assert!(rendered.contains("timestamp=2020-10-09T10\\:03\\:02Z"));

    let parsed = StateFile::parse(&rendered)
        .expect("serialized state parses")
        .with_path(state.path.clone())
        .with_frequency(ReplicationFrequency::Minutely);
    assert_eq!(parsed, state);
}

#[test]
fn changeset_grammar_round_trips() {
    let state = StateFile {
        frequency: Some(ReplicationFrequency::Changesets),
        path: "/replication/changesets/004/139/992".to_owned(),
        ..sample_state(4_139_992)
    };
    let rendered = state.to_changeset_grammar();
    assert!(rendered.starts_with("---\n"));

    let parsed = StateFile::parse(&rendered)
        .expect("serialized state parses")
        .with_path(state.path.clone())
        .with_frequency(ReplicationFrequency::Changesets);
    assert_eq!(parsed, state);
}

#[test]
fn accepted_states_are_always_valid() {
    let state = sample_state(0);
    assert!(state.is_valid(), "sequence zero is legitimate for changesets");

    let mut missing_timestamp = sample_state(1);
    missing_timestamp.timestamp = None;
    assert!(!missing_timestamp.is_valid());

    let mut negative = sample_state(-1);
    negative.sequence = -1;
    assert!(!negative.is_valid());
}

#[rstest]
#[case(0, (0, 0, 0))]
#[case(999, (0, 0, 999))]
#[case(1_000, (0, 1, 0))]
#[case(4_230_996, (4, 230, 996))]
fn sequences_split_into_path_triples(#[case] sequence: u64, #[case] triple: (u64, u64, u64)) {
    assert_eq!(split_sequence(sequence), triple);
    let rendered = sequence_to_path(sequence);
    assert_eq!(
        parse_triple_path(&rendered).expect("rendered triple parses"),
        triple
    );
}
