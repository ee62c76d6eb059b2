use ledgerplay_cli::{load_config, replay, ConfigError, ValidatedConfig};
use ledgerplay_execution::{root_hash_after, MemoryTrie};
use ledgerplay_types::{Address, Value};
use std::{io::Write as _, path::PathBuf, str::FromStr};

fn fixture() -> ValidatedConfig {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures/replay.yaml");
    load_config(&path)
        .expect("fixture parses")
        .validate()
        .expect("fixture is valid")
}

fn address(hex: &str) -> Address {
    Address::from_str(hex).unwrap()
}

fn run(config: &ValidatedConfig, verbose: bool) -> (String, ledgerplay_cli::ReplayOutcome) {
    let mut out = Vec::new();
    let outcome = replay(config, verbose, &mut out).expect("replay succeeds");
    (String::from_utf8(out).unwrap(), outcome)
}

#[test]
fn replays_fixture_transactions() {
    let config = fixture();
    let (report, outcome) = run(&config, false);
    let lines: Vec<&str> = report.lines().collect();

    assert_eq!(outcome.transactions, 3);
    assert_eq!(outcome.evaluations, 6);
    assert_eq!(outcome.failures, 1);

    for expected in [
        "- action #1: mint_asset",
        "- action #2: transfer_asset",
        "- action #3: set_state",
        "- action #1: draw_random",
        "- action #1: burn_asset",
        "tx id: none",
    ] {
        assert!(lines.contains(&expected), "missing {expected:?} in\n{report}");
    }
    assert!(lines
        .iter()
        .any(|line| line.starts_with("action #2 exception: the action mint_asset")));

    let digests: Vec<&&str> = lines
        .iter()
        .filter(|line| line.starts_with("--- action evaluation"))
        .collect();
    assert_eq!(digests.len(), 6);
    assert!(digests[0].starts_with(
        "--- action evaluation 1/3: tx-id(1111111111111111111111111111111111111111111111111111111111111111), action-type(\"mint_asset\"), delta: "
    ));
    assert_eq!(
        digests
            .iter()
            .filter(|line| line.ends_with(", exception below"))
            .count(),
        1
    );
    assert_eq!(
        lines.iter().filter(|line| line.starts_with("---- ")).count(),
        1
    );
}

#[test]
fn final_ledger_reflects_committed_actions() {
    let config = fixture();
    let (_, outcome) = run(&config, false);
    let ncg = &config.currencies["NCG"];

    let sender = address("0x0101010101010101010101010101010101010101");
    let recipient = address("0x0202020202020202020202020202020202020202");
    let ledger = &outcome.ledger;
    assert_eq!(ledger.get_balance(&sender, ncg).unwrap().raw_value(), 9_000);
    assert_eq!(ledger.get_balance(&recipient, ncg).unwrap().raw_value(), 1_500);
    assert_eq!(ledger.get_total_supply(ncg).unwrap().raw_value(), 10_500);

    let written = address("0x0303030303030303030303030303030303030303");
    assert_eq!(ledger.get_state(&written).unwrap(), Some(Value::from("hello")));
    let base: MemoryTrie = config.base_entries.clone().into_iter().collect();
    assert_eq!(
        root_hash_after(&base, ledger).unwrap(),
        outcome.state_root_hash
    );

    let drawn = ledger
        .get_state(&address("0x0404040404040404040404040404040404040404"))
        .unwrap()
        .and_then(|value| value.as_integer())
        .unwrap();
    assert!((0..100).contains(&drawn));
}

#[test]
fn replay_is_reproducible() {
    let config = fixture();
    let (first, first_outcome) = run(&config, true);
    let (second, second_outcome) = run(&config, true);
    assert_eq!(first, second);
    assert_eq!(first_outcome.state_root_hash, second_outcome.state_root_hash);
}

#[test]
fn verbose_report_lists_updated_addresses() {
    let (report, _) = run(&fixture(), true);
    assert!(report.contains(
        "- action #3 updated address #1(0x0303030303030303030303030303030303030303) beginning.."
    ));
    assert!(report.contains("\"hello\""));
    assert!(report.contains("block #1 pre-evaluation hash: "));
    assert_eq!(report.matches("state root hash: ").count(), 3);
}

#[test]
fn invalid_fixture_is_rejected() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
currencies:
  NCG:
    decimal_places: 2
transactions:
  - block_index: 1
    pre_evaluation_hash: "0x1111111111111111111111111111111111111111111111111111111111111111"
    signer: "not-hex"
    actions: []
"#
    )
    .unwrap();

    let err = load_config(file.path()).unwrap().validate().unwrap_err();
    match err {
        ConfigError::Transaction { index, source } => {
            assert_eq!(index, 0);
            assert!(matches!(
                *source,
                ConfigError::InvalidAddress { field: "signer", .. }
            ));
        }
        other => panic!("unexpected error {other}"),
    }
}
