//! Scripted end-to-end demo.
//!
//! Drives two workflows in-process with the scripted agent driver: a
//! research workflow that survives a modification and completes with a
//! settlement, and a risky workflow whose rejection triggers the
//! compensating rollback. Uses the in-memory sinks so the demo leaves no
//! state behind.

use std::collections::BTreeMap;
use std::sync::Arc;

use comfy_table::Table;
use console::style;
use serde_json::json;

use warden_core::clock::SystemClock;
use warden_core::event::EventBus;
use warden_core::monitor::Monitor;
use warden_core::orchestrator::Orchestrator;
use warden_core::rollback::{CompensatingAction, ReconciliationEngine};
use warden_core::supervisor::{Supervisor, digest_context, summarize_state};
use warden_infra::artifact::MemoryArtifactStore;
use warden_infra::driver::{AgentDriver, ScriptedDriver, ScriptedStep};
use warden_infra::escrow::MemoryEscrow;
use warden_infra::rollback::LedgerInverseRunner;
use warden_types::approval::ApprovalDecision;
use warden_types::config::{CompletionPolicy, MonitorThresholds};
use warden_types::escrow::SettlementPolicy;
use warden_types::workflow::{CheckpointConfig, ExecutionState, WorkflowConfig};

type DemoOrchestrator = Orchestrator<MemoryArtifactStore, MemoryEscrow, LedgerInverseRunner>;

struct Demo {
    orchestrator: DemoOrchestrator,
    supervisor: Supervisor,
    monitor: Monitor,
    ledger: MemoryEscrow,
    driver: ScriptedDriver,
}

pub async fn run() -> anyhow::Result<()> {
    println!("{}", style("Warden demo: supervised agent workflows").bold());
    println!();

    let demo = build_demo();
    research_scenario(&demo).await?;
    println!();
    rejection_scenario(&demo).await?;

    Ok(())
}

fn build_demo() -> Demo {
    let clock = Arc::new(SystemClock);
    let ledger = MemoryEscrow::new();

    let orchestrator = Orchestrator::new(
        MemoryArtifactStore::new(),
        ledger.clone(),
        ReconciliationEngine::new(
            LedgerInverseRunner::new(ledger.clone()),
            CompletionPolicy::default(),
        ),
        clock.clone(),
        EventBus::new(256),
        SettlementPolicy::default(),
    );

    let driver = ScriptedDriver::new()
        .script_checkpoint(
            "plan",
            vec![
                step("survey market sources", false, None, 180.0),
                step(
                    "draft research outline",
                    false,
                    Some(("outline", json!(["pricing", "competitors", "trends"]))),
                    240.0,
                ),
            ],
        )
        .script_checkpoint(
            "gather",
            vec![
                step("fetch pricing data", false, None, 310.0),
                step(
                    "post progress comment",
                    true,
                    Some(("dataset", json!({"rows": 412}))),
                    150.0,
                ),
            ],
        )
        .script_checkpoint(
            "publish",
            vec![step(
                "publish final report",
                true,
                Some(("report", json!("s3://reports/market-q3.pdf"))),
                95.0,
            )],
        )
        .script_checkpoint(
            "transfer",
            vec![step("wire funds to vendor", true, None, 60.0)],
        );

    Demo {
        orchestrator,
        supervisor: Supervisor::new("supervisor-dana", clock),
        monitor: Monitor::new(MonitorThresholds::default()),
        ledger,
        driver,
    }
}

fn step(
    description: &str,
    has_side_effects: bool,
    output: Option<(&str, serde_json::Value)>,
    tokens: f64,
) -> ScriptedStep {
    ScriptedStep {
        description: description.to_string(),
        has_side_effects,
        decision: format!("decided to {description}"),
        output: output.map(|(k, v)| (k.to_string(), v)),
        tokens,
    }
}

fn checkpoint(id: &str, name: &str, can_rollback: bool) -> CheckpointConfig {
    CheckpointConfig {
        checkpoint_id: id.to_string(),
        name: name.to_string(),
        description: String::new(),
        requires_approval: true,
        timeout_seconds: 300,
        can_rollback,
    }
}

/// Capture a checkpoint, request approval, and apply the given decision.
/// Returns the state the next checkpoint should build on.
async fn drive_checkpoint(
    demo: &Demo,
    workflow_id: &str,
    checkpoint_id: &str,
    previous: Option<&ExecutionState>,
    decision: ApprovalDecision,
    rationale: &str,
    modifications: Option<BTreeMap<String, serde_json::Value>>,
) -> anyhow::Result<ExecutionState> {
    let state = demo.driver.run_checkpoint(checkpoint_id, previous).await?;

    let execution = demo.orchestrator.get(workflow_id).await?;
    let checkpoint_config = execution
        .current_checkpoint()
        .expect("demo checkpoints are in bounds")
        .clone();
    let report = demo
        .monitor
        .observe(&state, &checkpoint_config, chrono::Utc::now());

    // Register inverses for the side-effectful calls before pausing
    for call in state.api_calls.iter().filter(|c| c.has_side_effects) {
        demo.orchestrator
            .register_action(
                workflow_id,
                &call.call_id,
                "api_call",
                Some(CompensatingAction::ApiCall {
                    description: format!("undo: {}", call.description),
                    payload: call.result.clone(),
                }),
            )
            .await
            .ok();
    }

    let outcome = demo
        .orchestrator
        .create_checkpoint(workflow_id, state.clone())
        .await?;
    let request = demo
        .orchestrator
        .request_approval(
            workflow_id,
            outcome.snapshot.snapshot_id,
            summarize_state(&state, Some(&report)),
            digest_context(&state, Some(&report)),
        )
        .await?;
    demo.supervisor.track(request.clone());

    println!(
        "  {} {}",
        style("checkpoint").cyan(),
        style(&checkpoint_config.name).bold()
    );
    println!("    {}", request.summary);

    let response = demo.supervisor.submit_decision(
        request.request_id,
        decision,
        rationale,
        "supervisor-dana",
        modifications,
    )?;
    let outcome = demo
        .orchestrator
        .submit_approval(workflow_id, response)
        .await?;
    println!(
        "    {} {:?} -> {:?}",
        style("decision").green(),
        decision,
        outcome.next_state
    );

    Ok(outcome.modified_state.unwrap_or(state))
}

async fn research_scenario(demo: &Demo) -> anyhow::Result<()> {
    println!(
        "{}",
        style("Scenario 1: research workflow, modified then completed").underlined()
    );

    let config = WorkflowConfig {
        workflow_id: "wf-demo-research".to_string(),
        name: "market research".to_string(),
        description: "Research market trends and publish a report".to_string(),
        checkpoints: vec![
            checkpoint("plan", "Plan", true),
            checkpoint("gather", "Gather", true),
            checkpoint("publish", "Publish", false),
        ],
        escrow_amount: 250.0,
        poster_id: "acme-inc".to_string(),
        executor_id: "agent-7".to_string(),
        supervisor_id: Some("supervisor-dana".to_string()),
        settlement: None,
    };
    demo.orchestrator.initialize(config)?;
    demo.orchestrator.start("wf-demo-research").await?;

    let plan = drive_checkpoint(
        demo,
        "wf-demo-research",
        "plan",
        None,
        ApprovalDecision::Approved,
        "solid outline",
        None,
    )
    .await?;

    // The supervisor trims the outline before letting the gather phase run
    let trimmed = drive_checkpoint(
        demo,
        "wf-demo-research",
        "gather",
        Some(&plan),
        ApprovalDecision::Modified,
        "drop the trends axis, focus the dataset",
        Some(BTreeMap::from([(
            "outline".to_string(),
            json!(["pricing", "competitors"]),
        )])),
    )
    .await?;

    let gathered = drive_checkpoint(
        demo,
        "wf-demo-research",
        "gather",
        Some(&trimmed),
        ApprovalDecision::Approved,
        "dataset looks right now",
        None,
    )
    .await?;

    let final_state = drive_checkpoint(
        demo,
        "wf-demo-research",
        "publish",
        Some(&gathered),
        ApprovalDecision::Approved,
        "report approved for publication",
        None,
    )
    .await?;

    let settlement = demo
        .orchestrator
        .settle("wf-demo-research", &final_state)
        .await?;
    demo.orchestrator.complete("wf-demo-research").await?;

    let mut table = Table::new();
    table.set_header(["Recipient", "Amount", "Reason"]);
    for split in &settlement.splits {
        table.add_row([
            split.recipient_id.clone(),
            format!("{:.2}", split.amount),
            split.reason.clone(),
        ]);
    }
    println!("{table}");

    let account = demo
        .ledger
        .account(&settlement.escrow_id)
        .expect("demo escrow account exists");
    println!(
        "  escrow {} released {:.2} of {:.2}",
        settlement.escrow_id,
        account.released,
        account.locked
    );

    Ok(())
}

async fn rejection_scenario(demo: &Demo) -> anyhow::Result<()> {
    println!(
        "{}",
        style("Scenario 2: risky transfer, rejected and rolled back").underlined()
    );

    let config = WorkflowConfig {
        workflow_id: "wf-demo-transfer".to_string(),
        name: "vendor transfer".to_string(),
        description: "Wire funds to a new vendor".to_string(),
        checkpoints: vec![checkpoint("transfer", "Transfer", true)],
        escrow_amount: 50.0,
        poster_id: "acme-inc".to_string(),
        executor_id: "agent-7".to_string(),
        supervisor_id: Some("supervisor-dana".to_string()),
        settlement: None,
    };
    demo.orchestrator.initialize(config)?;
    demo.orchestrator.start("wf-demo-transfer").await?;

    let state = demo.driver.run_checkpoint("transfer", None).await?;
    for call in state.api_calls.iter().filter(|c| c.has_side_effects) {
        demo.orchestrator
            .register_action(
                "wf-demo-transfer",
                &call.call_id,
                "api_call",
                Some(CompensatingAction::ApiCall {
                    description: format!("undo: {}", call.description),
                    payload: call.result.clone(),
                }),
            )
            .await?;
    }

    let outcome = demo
        .orchestrator
        .create_checkpoint("wf-demo-transfer", state.clone())
        .await?;
    let request = demo
        .orchestrator
        .request_approval(
            "wf-demo-transfer",
            outcome.snapshot.snapshot_id,
            summarize_state(&state, None),
            digest_context(&state, None),
        )
        .await?;
    demo.supervisor.track(request.clone());
    println!("    {}", request.summary);

    let response = demo.supervisor.submit_decision(
        request.request_id,
        ApprovalDecision::Rejected,
        "vendor not on the allowlist",
        "supervisor-dana",
        None,
    )?;
    demo.orchestrator
        .submit_approval("wf-demo-transfer", response)
        .await?;

    let report = demo
        .orchestrator
        .reconcile("wf-demo-transfer", "vendor not on the allowlist")
        .await?;
    println!(
        "    {} rollback success={} completion={:.0}% recommended payout={:.2}",
        style("reconciled").yellow(),
        report.rollback_success,
        report.partial_completion * 100.0,
        report.recommended_payout
    );

    demo.orchestrator
        .complete_rollback("wf-demo-transfer", report.rollback_success)
        .await?;
    demo.orchestrator
        .cancel("wf-demo-transfer", "transfer abandoned after rejection")
        .await?;

    let stats = demo.supervisor.stats();
    println!(
        "  supervisor {}: {} decisions, approval rate {:.0}%",
        stats.supervisor_id,
        stats.total,
        stats.approval_rate * 100.0
    );

    Ok(())
}
