//! Integration tests for the `geoclip` binary's argument handling.

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn no_arguments_shows_usage() {
    Command::cargo_bin("geoclip")
        .unwrap()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn download_rejects_unsupported_output_extension() {
    Command::cargo_bin("geoclip")
        .unwrap()
        .args([
            "download",
            "/data/source.parquet",
            "--output",
            "/tmp/out.geojson",
            "--bbox",
            "0,0,1,1",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unsupported output format"));
}

#[test]
fn download_rejects_malformed_bounds() {
    Command::cargo_bin("geoclip")
        .unwrap()
        .args([
            "download",
            "/data/source.parquet",
            "--output",
            "/tmp/out.parquet",
            "--bbox",
            "0,0,1",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("four values"));
}

#[test]
fn download_rejects_unknown_crs() {
    Command::cargo_bin("geoclip")
        .unwrap()
        .args([
            "download",
            "/data/source.parquet",
            "--output",
            "/tmp/out.parquet",
            "--bbox",
            "0,0,1,1",
            "--crs",
            "EPSG:2154",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("EPSG:2154"));
}

#[test]
fn validate_reports_missing_source() {
    Command::cargo_bin("geoclip")
        .unwrap()
        .args(["validate", "/definitely/not/here.parquet"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unable to read source"));
}
