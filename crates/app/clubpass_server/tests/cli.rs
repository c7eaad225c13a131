//! Command-line smoke tests. None of these reach the database.

use assert_cmd::Command;
use predicates::prelude::*;

fn server() -> Command {
    Command::cargo_bin("clubpass_server").expect("binary built")
}

#[test]
fn help_lists_key_options() {
    server()
        .arg("--help")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("--magic-link-base-url")
                .and(predicate::str::contains("--bus-signing-seed"))
                .and(predicate::str::contains("--rate-limit-rps")),
        );
}

#[test]
fn version_matches_the_crate() {
    server()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn malformed_magic_link_url_is_rejected() {
    server()
        .args(["--magic-link-base-url", "not a url"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid value"));
}
