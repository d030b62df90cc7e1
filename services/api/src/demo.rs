use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::Utc;
use clap::Args;
use engage_ai::config::AppConfig;
use engage_ai::error::AppError;
use engage_ai::workflows::engagement::domain::{
    Candidate, CandidateAttributes, CandidateMetadata, Channel, ContextEntry, ContextKind,
    Subject, SubjectKind,
};
use engage_ai::workflows::engagement::{
    BatchRecordImporter, IngestDefaults, PipelineOutcome,
};

use crate::infra::build_pipeline_service;

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Program the demo candidates belong to
    #[arg(long, default_value = "reviews")]
    pub(crate) program: String,
    /// Marketplace the demo candidates belong to
    #[arg(long, default_value = "US")]
    pub(crate) marketplace: String,
    /// How many synthetic candidates to push through the pipeline
    #[arg(long, default_value_t = 3)]
    pub(crate) count: u32,
}

#[derive(Args, Debug)]
pub(crate) struct IngestArgs {
    /// Connector batch export (CSV) to ingest
    #[arg(long)]
    pub(crate) file: PathBuf,
    /// Days until ingested candidates expire (defaults to the configured TTL)
    #[arg(long)]
    pub(crate) ttl_days: Option<i64>,
    /// Connector recorded as the candidates' source
    #[arg(long, default_value = "csv-import")]
    pub(crate) connector: String,
}

pub(crate) async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let config = AppConfig::load()?;
    let service = build_pipeline_service(&config.pipeline);

    println!("Engagement pipeline demo");
    println!(
        "Program '{}', marketplace '{}', {} candidates",
        args.program, args.marketplace, args.count
    );

    for index in 0..args.count {
        let candidate = demo_candidate(
            &args.program,
            &args.marketplace,
            index,
            config.pipeline.candidate_ttl_days,
        );
        let customer_id = candidate.customer_id.clone();

        match service.process(candidate).await {
            Ok(PipelineOutcome::Stored { candidate }) => {
                println!("\n- {} -> stored (version {})", customer_id, candidate.metadata.version);
                if let Some(scores) = &candidate.scores {
                    for (model_id, score) in scores {
                        let origin = if score.is_fallback() { "fallback" } else { "model" };
                        println!(
                            "    {model_id}: {:.3} (confidence {:?}, {origin})",
                            score.value, score.confidence
                        );
                    }
                }
            }
            Ok(PipelineOutcome::Rejected { candidate }) => {
                let record = candidate
                    .rejection_history
                    .last()
                    .map(|record| format!("{} ({})", record.reason, record.reason_code))
                    .unwrap_or_else(|| "unknown".to_string());
                println!("\n- {} -> rejected: {}", customer_id, record);
            }
            Err(err) => println!("\n- {} -> pipeline error: {}", customer_id, err),
        }
    }

    let delivered = service
        .query_by_channel(&args.program, Channel::Email, 10, false)
        .await?;
    println!("\nDeliverable over email, best first:");
    for candidate in delivered {
        println!(
            "- {} / {} (top score {:.3})",
            candidate.customer_id,
            candidate.subject.id,
            candidate.top_score()
        );
    }

    let health = service.models_health().await;
    println!("\nModel health:");
    for (model_id, health) in health {
        let status = if health.healthy { "healthy" } else { "unhealthy" };
        println!("- {model_id}: {status}");
    }

    Ok(())
}

pub(crate) async fn run_ingest(args: IngestArgs) -> Result<(), AppError> {
    let config = AppConfig::load()?;
    let service = build_pipeline_service(&config.pipeline);

    let defaults = IngestDefaults {
        ttl_days: args.ttl_days.unwrap_or(config.pipeline.candidate_ttl_days),
        source_connector_id: args.connector.clone(),
        workflow_execution_id: format!("ingest-{}", Utc::now().timestamp()),
    };
    let report = BatchRecordImporter::from_path(&args.file, &defaults)?;

    println!(
        "Parsed {} candidates ({} rows skipped) from {}",
        report.candidates.len(),
        report.skipped.len(),
        args.file.display()
    );
    for skipped in &report.skipped {
        println!("- line {}: {}", skipped.line, skipped.reason);
    }

    let batch = service.process_batch(report.candidates).await;
    println!(
        "\nPipeline outcome: {} stored, {} rejected, {} failed",
        batch.stored.len(),
        batch.rejected.len(),
        batch.failed.len()
    );
    for candidate in &batch.rejected {
        if let Some(record) = candidate.rejection_history.last() {
            println!(
                "- rejected {}: {} ({})",
                candidate.customer_id, record.reason, record.reason_code
            );
        }
    }
    for failed in &batch.failed {
        let identity = failed
            .identity
            .as_ref()
            .map(|identity| identity.to_string())
            .unwrap_or_else(|| "<unknown>".to_string());
        println!("- failed {}: {}", identity, failed.reason);
    }

    Ok(())
}

fn demo_candidate(program: &str, marketplace: &str, index: u32, ttl_days: i64) -> Candidate {
    let mut channel_eligibility = BTreeMap::new();
    channel_eligibility.insert(Channel::Email, true);
    channel_eligibility.insert(Channel::Push, index % 2 == 0);

    Candidate {
        customer_id: format!("demo-customer-{index}"),
        context: vec![
            ContextEntry::new(ContextKind::Program, program),
            ContextEntry::new(ContextKind::Marketplace, marketplace),
        ],
        subject: Subject {
            kind: SubjectKind::Product,
            id: format!("demo-product-{index}"),
            metadata: None,
        },
        scores: None,
        attributes: CandidateAttributes {
            event_date: Utc::now() - chrono::Duration::days(i64::from(index) + 1),
            delivery_date: None,
            timing_window: None,
            order_value: Some(19.99 + f64::from(index) * 10.0),
            media_eligible: Some(index % 2 == 0),
            channel_eligibility,
        },
        metadata: CandidateMetadata::for_new_candidate(
            ttl_days,
            "demo-connector",
            format!("demo-{}", Utc::now().timestamp()),
        ),
        rejection_history: Vec::new(),
    }
}
