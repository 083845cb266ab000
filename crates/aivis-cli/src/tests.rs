use std::str::FromStr;

use aivis_analysis::CostBreakdown;
use aivis_core::{RunStatus, TokenUsage};
use aivis_db::RunCounters;
use aivis_pipeline::{RunOutcome, RunSummary};
use rust_decimal::Decimal;
use uuid::Uuid;

use super::*;
use crate::catalog::CompanyCommands;
use crate::runs::{describe_outcome, RunCommands};

#[test]
fn parses_db_migrate_command() {
    let cli = Cli::try_parse_from(["aivis-cli", "db", "migrate"]).expect("expected valid cli args");

    assert!(matches!(
        cli.command,
        Some(Commands::Db {
            command: DbCommands::Migrate
        })
    ));
}

#[test]
fn no_command_is_none() {
    let cli = Cli::try_parse_from(["aivis-cli"]).expect("expected valid cli args");
    assert!(cli.command.is_none());
}

#[test]
fn parses_run_create_with_no_enqueue() {
    let company = Uuid::new_v4();
    let cli = Cli::try_parse_from([
        "aivis-cli",
        "run",
        "create",
        "--company",
        &company.to_string(),
        "--no-enqueue",
    ])
    .expect("expected valid cli args");

    match cli.command {
        Some(Commands::Run {
            command:
                RunCommands::Create {
                    company: parsed,
                    no_enqueue,
                },
        }) => {
            assert_eq!(parsed, company);
            assert!(no_enqueue);
        }
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn run_execute_requires_a_uuid() {
    assert!(Cli::try_parse_from(["aivis-cli", "run", "execute", "not-a-uuid"]).is_err());
}

#[test]
fn parses_add_question_defaults_to_active() {
    let company = Uuid::new_v4();
    let cli = Cli::try_parse_from([
        "aivis-cli",
        "company",
        "add-question",
        "--company",
        &company.to_string(),
        "--text",
        "Who makes the best widgets?",
    ])
    .expect("expected valid cli args");

    assert!(matches!(
        cli.command,
        Some(Commands::Company {
            command: CompanyCommands::AddQuestion { inactive: false, .. }
        })
    ));
}

#[test]
fn parses_worker_once() {
    let cli = Cli::try_parse_from(["aivis-cli", "worker", "--once"]).expect("expected valid cli args");
    assert!(matches!(cli.command, Some(Commands::Worker { once: true })));
}

#[test]
fn cost_accepts_negative_counts() {
    let cli = Cli::try_parse_from([
        "aivis-cli",
        "cost",
        "--model",
        "demo-mini",
        "--input",
        "-1000",
        "--output",
        "50000",
        "--pricing",
        "/nonexistent/pricing.yaml",
    ])
    .expect("expected valid cli args");

    let Some(Commands::Cost(args)) = cli.command else {
        panic!("expected cost command");
    };
    let usage = args.usage();
    assert_eq!(usage.input_tokens, -1000);
    assert_eq!(usage.output_tokens, 50_000);
    assert_eq!(usage.searches, 0);
}

#[test]
fn cost_prices_demo_scenario_with_builtin_table() {
    let cli = Cli::try_parse_from([
        "aivis-cli",
        "cost",
        "--model",
        "demo-mini",
        "--input",
        "100000",
        "--output",
        "50000",
        "--pricing",
        "/nonexistent/pricing.yaml",
    ])
    .expect("expected valid cli args");
    let Some(Commands::Cost(args)) = cli.command else {
        panic!("expected cost command");
    };

    assert!(cost::run_cost(&args).is_ok());
}

#[test]
fn cost_rejects_unknown_model() {
    let cli = Cli::try_parse_from([
        "aivis-cli",
        "cost",
        "--model",
        "ghost-model",
        "--input",
        "10",
        "--pricing",
        "/nonexistent/pricing.yaml",
    ])
    .expect("expected valid cli args");
    let Some(Commands::Cost(args)) = cli.command else {
        panic!("expected cost command");
    };

    let err = cost::run_cost(&args).expect_err("unknown model must fail");
    assert!(err.to_string().contains("ghost-model"));
}

#[test]
fn format_breakdown_lists_every_component() {
    let usage = TokenUsage {
        input_tokens: 100_000,
        output_tokens: 50_000,
        ..TokenUsage::default()
    };
    let cost = CostBreakdown {
        input_cost: Decimal::from_str("0.015").unwrap(),
        output_cost: Decimal::from_str("0.03").unwrap(),
        thinking_cost: Decimal::ZERO,
        caching_cost: Decimal::ZERO,
        search_cost: Decimal::ZERO,
        total_cost: Decimal::from_str("0.045").unwrap(),
    };

    let text = cost::format_breakdown("demo-mini", &usage, &cost);
    assert!(text.contains("model:     demo-mini"));
    assert!(text.contains("100000 tokens  $0.015"));
    assert!(text.lines().last().unwrap().ends_with("$0.045"));
}

#[test]
fn describe_outcome_covers_each_variant() {
    let summary = RunSummary {
        run_id: 7,
        trace_id: Uuid::nil(),
        answers_succeeded: 3,
        mentions: 5,
        citations: 2,
        new_competitors: vec!["Globex".to_string()],
        counters: RunCounters {
            failed_answers: 1,
            ..RunCounters::default()
        },
        usd_cost: Decimal::from_str("0.045").unwrap(),
        tokens_used: 150_000,
    };
    let completed = describe_outcome(&RunOutcome::Completed(summary));
    assert!(completed.starts_with("completed: 3 answers, 5 mentions, 2 citations"));
    assert!(completed.contains("$0.045"));
    assert!(completed.contains("failed answers 1"));

    let failed = describe_outcome(&RunOutcome::Failed {
        reason: "no active questions".to_string(),
    });
    assert_eq!(failed, "failed: no active questions");

    let terminal = describe_outcome(&RunOutcome::AlreadyTerminal {
        status: RunStatus::Completed,
    });
    assert_eq!(terminal, "already completed; nothing to do");
}
