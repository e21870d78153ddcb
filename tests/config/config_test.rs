//! Tests for `src/config.rs`.

use std::collections::HashMap;

use actuation_kernel::acv::CouplingPattern;
use actuation_kernel::audit::external::LeakMode;
use actuation_kernel::config::KernelConfig;
use actuation_kernel::recomposer::RecomposerMode;

fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
        .collect();
    move |key: &str| map.get(key).cloned()
}

#[test]
fn defaults_are_safe() {
    let config = KernelConfig::default();
    assert_eq!(config.kernel.seed, None);
    assert_eq!(config.recomposer.mode, RecomposerMode::Hardened);
    assert_eq!(config.coupling.pattern, CouplingPattern::A);
    assert_eq!(config.delegation.max_depth, 2);
    assert_eq!(config.external_log.mode, LeakMode::Strict);
    assert!(config.canonical.reject_non_finite);
    assert!(config.validate().is_ok());
}

#[test]
fn full_toml_parses_every_section() {
    let config = KernelConfig::from_toml(
        r#"
[kernel]
kernel_id = "lab-7"
seed = 99
log_level = "debug"

[budget]
max_ticks = 5000
max_nodes = 16
max_depth = 8
max_bytes = 4096
max_work = 300

[canonical]
reject_non_finite = false
max_depth = 12

[recomposer]
mode = "soft"
allowed_action_types = ["move"]

[coupling]
pattern = "C"
merkle_openings = 5

[delegation]
max_depth = 4

[external_log]
mode = "permissive"
whitelist = ["event", "decision"]
"#,
    )
    .expect("should parse");

    assert_eq!(config.kernel.kernel_id, "lab-7");
    assert_eq!(config.kernel.seed, Some(99));
    assert_eq!(config.kernel.log_level, "debug");
    assert_eq!(config.budget.max_work, 300);
    assert!(!config.canonical.reject_non_finite);
    assert_eq!(config.canonical.max_depth, 12);
    assert_eq!(config.recomposer.mode, RecomposerMode::Soft);
    assert_eq!(config.recomposer.allowed_action_types, vec!["move".to_owned()]);
    assert_eq!(config.coupling.pattern, CouplingPattern::C);
    assert_eq!(config.coupling.merkle_openings, 5);
    assert_eq!(config.delegation.max_depth, 4);
    assert_eq!(config.external_log.mode, LeakMode::Permissive);
    assert_eq!(config.external_log.whitelist.len(), 2);
}

#[test]
fn env_overrides_win() {
    let mut config = KernelConfig::default();
    config.apply_overrides(env(&[
        ("AK_KERNEL_ID", "from-env"),
        ("AK_SEED", "17"),
        ("AK_MAX_NODES", "32"),
        ("AK_RECOMPOSER_MODE", "strict"),
        ("AK_COUPLING_PATTERN", "b"),
        ("AK_MAX_DELEGATION_DEPTH", "3"),
    ]));
    assert_eq!(config.kernel.kernel_id, "from-env");
    assert_eq!(config.kernel.seed, Some(17));
    assert_eq!(config.budget.max_nodes, 32);
    assert_eq!(config.recomposer.mode, RecomposerMode::Strict);
    assert_eq!(config.coupling.pattern, CouplingPattern::B);
    assert_eq!(config.delegation.max_depth, 3);
}

#[test]
fn invalid_override_is_ignored() {
    let mut config = KernelConfig::default();
    config.apply_overrides(env(&[("AK_MAX_NODES", "lots"), ("AK_RECOMPOSER_MODE", "lax")]));
    assert_eq!(config.budget.max_nodes, 1_024);
    assert_eq!(config.recomposer.mode, RecomposerMode::Hardened);
}

#[test]
fn empty_allow_list_fails_validation() {
    let err = KernelConfig::from_toml("[recomposer]\nallowed_action_types = []\n")
        .expect_err("should fail validation");
    assert!(err.to_string().contains("allowed_action_types"));
}

#[test]
fn unknown_mode_fails_to_parse() {
    assert!(KernelConfig::from_toml("[recomposer]\nmode = \"lax\"\n").is_err());
}

#[test]
fn load_from_missing_file_yields_defaults() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let config = KernelConfig::load_from(&tmp.path().join("absent.toml")).expect("defaults");
    assert_eq!(config, KernelConfig::default());
}

#[test]
fn load_from_reads_file() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let path = tmp.path().join("actuation-kernel.toml");
    std::fs::write(&path, "[delegation]\nmax_depth = 6\n").expect("write");
    let config = KernelConfig::load_from(&path).expect("load");
    assert_eq!(config.delegation.max_depth, 6);
}

#[test]
fn load_from_malformed_file_errors() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let path = tmp.path().join("broken.toml");
    std::fs::write(&path, "[budget\nmax_nodes = ").expect("write");
    assert!(KernelConfig::load_from(&path).is_err());
}
