//! Walkthrough - one pipeline run over a small in-memory manual.
//!
//! Uses the mock AI, so no model credentials are needed. Configuration is
//! read from `SECTION_EXTRACT_*` environment variables (or `.env`).
//!
//! ```bash
//! RUST_LOG=section_extract=debug cargo run --example walkthrough
//! ```

use section_extract::{testing::TestCorpus, MockAI, Pipeline, PipelineConfig, Result};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const SUBJECT: &str = "triage categories";

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,section_extract=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let store = TestCorpus::new()
        .root("manual", "Field Manual")
        .section("manual", "triage", "Triage")
        .section("triage", "red", "Red")
        .section("triage", "yellow", "Yellow")
        .section("manual", "staffing", "Staffing")
        .summary("triage", "How patients are sorted by urgency")
        .embedding("triage", vec![1.0, 0.0])
        .embedding("staffing", vec![0.0, 1.0])
        .text("triage", "## Triage\nPatients are sorted into categories.\n")
        .text("red", "### Red\nImmediate care\nAirway, breathing, circulation\n")
        .text("yellow", "### Yellow\nUrgent but stable\n")
        .text("staffing", "## Staffing\nShifts rotate weekly.\n")
        .build();

    let ai = MockAI::new()
        .with_embedding(SUBJECT, vec![1.0, 0.0])
        .with_scores([
            ("manual", 0.75),
            ("triage", 0.95),
            ("red", 0.85),
            ("yellow", 0.8),
            ("staffing", 0.1),
        ]);

    let config = PipelineConfig::from_env()?;
    let pipeline = Pipeline::with_config(store, ai, config);

    let outcome = pipeline.run(SUBJECT, &CancellationToken::new()).await?;

    println!("Subject: {}", outcome.subject);
    println!(
        "Retrieval: {:?} ({} candidates{})",
        outcome.retrieval.effective,
        outcome.retrieval.len(),
        if outcome.retrieval.degraded { ", degraded" } else { "" }
    );
    println!(
        "Traversal: {} accepted of {} scored, threshold {:.2}",
        outcome.traversal.accepted.len(),
        outcome.traversal.scored.len(),
        outcome.traversal.effective_threshold
    );
    println!();

    for extraction in &outcome.extractions {
        println!(
            "{} [{:?}, {} segment(s)]",
            extraction.node_id, extraction.status, extraction.segments_total
        );
        for item in &extraction.items {
            println!("  - {}", item.digest);
        }
    }

    Ok(())
}
