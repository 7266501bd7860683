// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {
    crate::diff::detect_lines,
    anyhow::{bail, Context, Result},
    clap::{Arg, ArgMatches, Command},
    log::info,
    rosdep_repo_check::{
        config::Config,
        fmt_os, get_package_link,
        suggest::make_suggestion,
        summarize_broken_packages,
        verify::verify_rules,
        yaml::{isolate_snippets_by_lines, load_annotated, AnnotatedValue},
    },
    std::{collections::BTreeSet, path::Path},
};

const VERIFY_ABOUT: &str = "\
Verify that rosdep rules resolve to real packages.

Every rule in the given files is checked against the package sources
configured for its OS: each (OS, version, architecture, package)
combination is looked up in the corresponding repository index. A
summary of all unresolvable packages, grouped by platform, is printed
to stderr and the command exits non-zero if any rule is broken.
";

const CHECK_CHANGED_ABOUT: &str = "\
Verify only the rosdep rules touched by a diff.

The diff is parsed for changed line numbers, and each rule file is
reduced to the keys whose definitions are touched by those lines before
verification. Results are emitted as GitHub workflow annotations
(::error / ::warning) so they attach to the changed lines in a review.

For changed keys that have no rule at all for some configured OS, the
suggestion engine proposes likely package names on that OS as warnings.
";

fn config_arg() -> Arg<'static> {
    Arg::new("config")
        .long("--config")
        .takes_value(true)
        .required(true)
        .help("Path to the package sources configuration file")
}

fn rules_arg() -> Arg<'static> {
    Arg::new("rules")
        .takes_value(true)
        .multiple_values(true)
        .required(true)
        .help("Paths to rosdep rule files")
}

pub fn run_cli() -> Result<i32> {
    let app = Command::new("rosdep repository check")
        .version("0.1")
        .about("Check rosdep rules against OS package repositories")
        .arg_required_else_help(true);

    let app = app.subcommand(
        Command::new("verify")
            .about("Verify every rosdep rule in the given files")
            .long_about(VERIFY_ABOUT)
            .arg(config_arg())
            .arg(
                Arg::new("include-found")
                    .long("--include-found")
                    .help("Also report packages that were found, with dashboard links"),
            )
            .arg(rules_arg()),
    );

    let app = app.subcommand(
        Command::new("check-changed")
            .about("Verify only the rules touched by a unified diff")
            .long_about(CHECK_CHANGED_ABOUT)
            .arg(config_arg())
            .arg(
                Arg::new("diff")
                    .long("--diff")
                    .takes_value(true)
                    .required(true)
                    .help("Path to a unified diff scoping which rules to verify"),
            )
            .arg(rules_arg()),
    );

    let mut app = app.subcommand(
        Command::new("suggest")
            .about("Suggest package names which may satisfy a rosdep key")
            .arg(config_arg())
            .arg(
                Arg::new("os")
                    .long("--os")
                    .takes_value(true)
                    .help("Only suggest for this OS (default: all configured OSes)"),
            )
            .arg(
                Arg::new("key")
                    .takes_value(true)
                    .required(true)
                    .help("The rosdep key to find a package for"),
            ),
    );

    let matches = app.clone().get_matches();

    match matches.subcommand() {
        Some(("verify", args)) => command_verify(args),
        Some(("check-changed", args)) => command_check_changed(args),
        Some(("suggest", args)) => command_suggest(args),
        Some((command, _)) => bail!("invalid sub-command: {}", command),
        None => {
            app.print_help()?;
            Ok(0)
        }
    }
}

fn load_config(args: &ArgMatches) -> Result<Config> {
    let path = args.value_of("config").expect("config argument is required");

    Config::load(Path::new(path)).with_context(|| format!("loading configuration from {}", path))
}

fn load_rules(path: &str) -> Result<AnnotatedValue> {
    let text =
        std::fs::read_to_string(path).with_context(|| format!("reading rules from {}", path))?;

    load_annotated(&text).with_context(|| format!("parsing rules from {}", path))
}

/// Newest supported version and primary architecture for an OS, for
/// informational links.
fn newest_platform<'a>(config: &'a Config, os_name: &str) -> (&'a str, &'a str) {
    let os_version = config
        .supported_versions
        .get(os_name)
        .and_then(|versions| versions.last())
        .map(String::as_str)
        .unwrap_or("");
    let os_arch = config
        .supported_arches
        .get(os_name)
        .and_then(|arches| arches.first())
        .map(String::as_str)
        .unwrap_or("");

    (os_version, os_arch)
}

fn command_verify(args: &ArgMatches) -> Result<i32> {
    let config = load_config(args)?;
    let include_found = args.is_present("include-found");

    let mut broken = Vec::new();

    for path in args.values_of("rules").expect("rules argument is required") {
        info!("verifying all rosdep keys in '{}'", path);

        let rules = load_rules(path)?;
        let outcomes = verify_rules(&config, &rules, &rules, include_found)?;

        for outcome in outcomes {
            match &outcome.provider {
                Some(provider) => {
                    let link = get_package_link(
                        &config,
                        provider,
                        &outcome.os_name,
                        &outcome.os_version,
                        &outcome.os_arch,
                    );
                    println!(
                        "Package '{}' for {} on {} was found: {}",
                        outcome.package,
                        fmt_os(&outcome.os_name, &outcome.os_version),
                        outcome.os_arch,
                        link
                    );
                }
                None => broken.push(outcome),
            }
        }
    }

    if broken.is_empty() {
        Ok(0)
    } else {
        eprintln!("{}", summarize_broken_packages(&broken));
        Ok(1)
    }
}

fn command_check_changed(args: &ArgMatches) -> Result<i32> {
    let config = load_config(args)?;

    let diff_path = args.value_of("diff").expect("diff argument is required");
    let diff = std::fs::read_to_string(diff_path)
        .with_context(|| format!("reading diff from {}", diff_path))?;

    let changed = detect_lines(&diff);

    if changed.is_empty() {
        info!("no rosdep changes were detected");
        return Ok(0);
    }

    let mut broken = false;

    for path in args.values_of("rules").expect("rules argument is required") {
        let lines = match changed.get(path) {
            Some(lines) => lines,
            None => continue,
        };

        let full = load_rules(path)?;
        let isolated = isolate_snippets_by_lines(&full, lines);

        let keys = isolated.as_mapping().unwrap_or_default();

        if keys.is_empty() {
            continue;
        }

        info!("verifying changed rosdep keys in '{}'", path);

        for outcome in verify_rules(&config, &isolated, &full, true)? {
            match &outcome.provider {
                Some(provider) => {
                    let link = get_package_link(
                        &config,
                        provider,
                        &outcome.os_name,
                        &outcome.os_version,
                        &outcome.os_arch,
                    );
                    println!(
                        "Package '{}' for {} on {} was found: {}",
                        outcome.package,
                        fmt_os(&outcome.os_name, &outcome.os_version),
                        outcome.os_arch,
                        link
                    );
                }
                None => {
                    broken = true;
                    println!(
                        "::error file={},line={}::Package '{}' could not be found for {} on {}",
                        path,
                        outcome.line.unwrap_or(1),
                        outcome.package,
                        fmt_os(&outcome.os_name, &outcome.os_version),
                        outcome.os_arch,
                    );
                }
            }
        }

        suggest_for_uncovered_oses(&config, path, lines, &isolated, &full)?;
    }

    Ok(if broken { 1 } else { 0 })
}

/// Emit suggestion warnings for changed keys that have no rule at all
/// for some configured OS.
fn suggest_for_uncovered_oses(
    config: &Config,
    path: &str,
    changed_lines: &BTreeSet<usize>,
    isolated: &AnnotatedValue,
    full: &AnnotatedValue,
) -> Result<()> {
    for (key_node, _) in isolated.as_mapping().unwrap_or_default() {
        let key = match key_node.as_str() {
            Some(key) => key,
            None => continue,
        };

        // pip keys are not satisfiable by OS packages.
        if key.ends_with("-pip") {
            continue;
        }

        if !changed_lines.contains(&key_node.line) {
            continue;
        }

        let covered: Vec<&str> = full
            .get(key)
            .and_then(AnnotatedValue::as_mapping)
            .unwrap_or_default()
            .iter()
            .filter_map(|(os, _)| os.as_str())
            .collect();

        for os_name in config.supported_versions.keys() {
            if covered.contains(&os_name.as_str()) {
                continue;
            }

            info!("looking for suggestions for {} on {}", key, os_name);

            if let Some(suggestion) = make_suggestion(config, key, os_name)? {
                let (os_version, os_arch) = newest_platform(config, os_name);
                let link = get_package_link(config, &suggestion, os_name, os_version, os_arch);

                println!(
                    "::warning file={},line={}::Key '{}' might be satisfied by {} package named '{}': {}",
                    path, key_node.line, key, os_name, suggestion.binary_name, link
                );
            }
        }
    }

    Ok(())
}

fn command_suggest(args: &ArgMatches) -> Result<i32> {
    let config = load_config(args)?;
    let key = args.value_of("key").expect("key argument is required");

    let os_names: Vec<String> = match args.value_of("os") {
        Some(os_name) => vec![os_name.to_string()],
        None => config.supported_versions.keys().cloned().collect(),
    };

    for os_name in &os_names {
        match make_suggestion(&config, key, os_name)? {
            Some(suggestion) => {
                let (os_version, os_arch) = newest_platform(&config, os_name);
                let link = get_package_link(&config, &suggestion, os_name, os_version, os_arch);

                println!(
                    "Key '{}' might be satisfied by {} package named '{}': {}",
                    key, os_name, suggestion.binary_name, link
                );
            }
            None => {
                println!("No suggestion for '{}' on {}", key, os_name);
            }
        }
    }

    Ok(0)
}
