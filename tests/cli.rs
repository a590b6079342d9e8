//! Documentation-consistency checks: every command line in the README must
//! parse against the binary it names.

use clap::Parser;

use feddst::opts::CommonOpts;

#[derive(Parser)]
struct Common {
    #[command(flatten)]
    common: CommonOpts,
}

#[derive(Parser)]
struct PruneFl {
    #[command(flatten)]
    common: CommonOpts,
    #[arg(long, default_value_t = 100)]
    initial_rounds: usize,
}

#[derive(Parser)]
struct WithLossScaling {
    #[command(flatten)]
    common: CommonOpts,
    #[arg(long, default_value_t = 1.0)]
    loss_scaling: f32,
}

#[derive(Parser)]
struct HardRetrain {
    #[command(flatten)]
    common: CommonOpts,
    #[arg(long)]
    retrain_rounds: Option<usize>,
}

#[derive(Parser)]
struct MaskRetrain {
    #[command(flatten)]
    common: CommonOpts,
    #[arg(long, default_value_t = 0)]
    type_value: u8,
}

/// Extracts `(binary, args)` from every `cargo run --bin <bin> -- ...`
/// command in the README.
fn readme_commands() -> Vec<(String, Vec<String>)> {
    let text = include_str!("../README.md");
    let mut commands = Vec::new();
    for line in text.lines() {
        let Some(idx) = line.find("--bin ") else {
            continue;
        };
        let rest = &line[idx + "--bin ".len()..];
        let cmd = &rest[..rest.find('`').unwrap_or(rest.len())];

        let mut parts = cmd.split_whitespace().map(str::to_string);
        let bin = parts.next().expect("binary name after --bin");
        let mut args: Vec<String> = parts.collect();
        if args.first().map(String::as_str) == Some("--") {
            args.remove(0);
        }
        commands.push((bin, args));
    }
    commands
}

#[test]
fn readme_lists_every_experiment() {
    let commands = readme_commands();
    assert_eq!(commands.len(), 9);
    for bin in [
        "dst",
        "prunefl",
        "ours",
        "cs",
        "dst_hard_retrain",
        "dst_ensemble",
        "dst_mask_retrain",
    ] {
        assert!(
            commands.iter().any(|(b, _)| b == bin),
            "README never runs {bin}"
        );
    }
}

#[test]
fn every_readme_command_parses() {
    for (bin, args) in readme_commands() {
        let argv: Vec<String> = std::iter::once(bin.clone()).chain(args).collect();
        let parsed = match bin.as_str() {
            "dst" | "dst_ensemble" => Common::try_parse_from(&argv).map(|_| ()),
            "prunefl" => PruneFl::try_parse_from(&argv).map(|_| ()),
            "ours" | "cs" => WithLossScaling::try_parse_from(&argv).map(|_| ()),
            "dst_hard_retrain" => HardRetrain::try_parse_from(&argv).map(|_| ()),
            "dst_mask_retrain" => MaskRetrain::try_parse_from(&argv).map(|_| ()),
            other => panic!("README names an unknown binary: {other}"),
        };
        assert!(parsed.is_ok(), "{bin}: {:?}", parsed.err());
    }
}

#[test]
fn feddst_command_carries_its_flags() {
    let (_, args) = readme_commands().into_iter().next().expect("first command");
    let argv: Vec<String> = std::iter::once("dst".to_string()).chain(args).collect();
    let opts = Common::try_parse_from(&argv).unwrap().common;
    assert_eq!(opts.sparsity, 0.8);
    assert_eq!(opts.readjustment_ratio, 0.5);
    assert_eq!(opts.rounds_between_readjustments, 15);
    assert_eq!(opts.beta, 0.1);
}
