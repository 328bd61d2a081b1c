//! Tests for apps, toggle, set-pattern, rules and the add-* commands.

use super::parse;
use crate::cli::{Cli, CliCommand};
use clap::Parser;
use std::path::PathBuf;

#[test]
fn cli_parse_apps() {
    match parse(&["resub", "apps"]) {
        CliCommand::Apps => {}
        _ => panic!("expected Apps"),
    }
}

#[test]
fn cli_parse_toggle_flips_by_default() {
    match parse(&["resub", "toggle", "crm"]) {
        CliCommand::Toggle { id, enabled } => {
            assert_eq!(id, "crm");
            assert!(enabled.is_none());
        }
        _ => panic!("expected Toggle"),
    }
}

#[test]
fn cli_parse_toggle_explicit() {
    match parse(&["resub", "toggle", "crm", "--enabled", "false"]) {
        CliCommand::Toggle { enabled, .. } => assert_eq!(enabled, Some(false)),
        _ => panic!("expected Toggle with --enabled"),
    }
}

#[test]
fn cli_parse_set_pattern() {
    match parse(&["resub", "set-pattern", "crm", "https://*.corp.example/*"]) {
        CliCommand::SetPattern { id, pattern } => {
            assert_eq!(id, "crm");
            assert_eq!(pattern, "https://*.corp.example/*");
        }
        _ => panic!("expected SetPattern"),
    }
}

#[test]
fn cli_parse_rules() {
    match parse(&["resub", "rules", "https://site.example/page"]) {
        CliCommand::Rules { url } => assert_eq!(url, "https://site.example/page"),
        _ => panic!("expected Rules"),
    }
}

#[test]
fn cli_parse_add_app_defaults() {
    match parse(&["resub", "add-app", "crm", "https://crm.example/*"]) {
        CliCommand::AddApp {
            id,
            pattern,
            name,
            disabled,
        } => {
            assert_eq!(id, "crm");
            assert_eq!(pattern, "https://crm.example/*");
            assert!(name.is_none());
            assert!(!disabled);
        }
        _ => panic!("expected AddApp"),
    }
}

#[test]
fn cli_parse_add_package() {
    match parse(&[
        "resub",
        "add-package",
        "crm",
        "--output-name",
        "widget",
        "dist/widget.umd.js",
        "dist/widget.css",
    ]) {
        CliCommand::AddPackage {
            app_id,
            output_name,
            files,
        } => {
            assert_eq!(app_id, "crm");
            assert_eq!(output_name, "widget");
            assert_eq!(
                files,
                vec![
                    PathBuf::from("dist/widget.umd.js"),
                    PathBuf::from("dist/widget.css")
                ]
            );
        }
        _ => panic!("expected AddPackage"),
    }
}

#[test]
fn cli_add_package_needs_files() {
    assert!(Cli::try_parse_from(["resub", "add-package", "crm", "--output-name", "w"]).is_err());
}

#[test]
fn cli_parse_add_dev() {
    match parse(&["resub", "add-dev", "crm", "widget", "http://localhost:5173"]) {
        CliCommand::AddDev {
            app_id,
            package,
            dev_url,
        } => {
            assert_eq!(app_id, "crm");
            assert_eq!(package, "widget");
            assert_eq!(dev_url, "http://localhost:5173");
        }
        _ => panic!("expected AddDev"),
    }
}

#[test]
fn cli_parse_add_replacement() {
    match parse(&[
        "resub",
        "add-replacement",
        "https://cdn.example/lib.js",
        "http://localhost:8080",
    ]) {
        CliCommand::AddReplacement { source, target } => {
            assert_eq!(source, "https://cdn.example/lib.js");
            assert_eq!(target, "http://localhost:8080");
        }
        _ => panic!("expected AddReplacement"),
    }
}

#[test]
fn cli_parse_verbose_is_global() {
    let cli = Cli::try_parse_from(["resub", "apps", "-v"]).unwrap();
    assert!(cli.verbose);
    let cli = Cli::try_parse_from(["resub", "usage"]).unwrap();
    assert!(!cli.verbose);
}
