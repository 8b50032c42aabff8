//! Run summary output

use crate::pipeline::{FailureStage, RunConfig, RunSummary};
use tracing::error;

/// Print the summary as a single JSON object on stdout
pub fn print_json(config: &RunConfig, summary: &RunSummary) -> Result<(), serde_json::Error> {
    let output = serde_json::json!({
        "success": !summary.has_output_failures(),
        "symbol": config.symbol,
        "interval": config.interval.as_str(),
        "market": config.market.slug(),
        "frequency": config.frequency.as_str(),
        "layout": config.layout.as_str(),
        "summary": summary,
    });
    println!("{}", serde_json::to_string(&output)?);
    Ok(())
}

/// Print a human-readable summary
pub fn print_human(config: &RunConfig, summary: &RunSummary) {
    println!(
        "\n{} {} {} ({})",
        config.market, config.symbol, config.interval, config.frequency
    );
    println!("Archives: {} (from {})", summary.references_total, summary.first_year);
    println!("  downloaded: {}", summary.downloaded);
    println!("  already present: {}", summary.skipped);
    println!("  failed: {}", summary.failed);
    if summary.cancelled > 0 {
        println!("  cancelled: {}", summary.cancelled);
    }

    if config.convert {
        println!(
            "Converted: {} files, {} failed",
            summary.converted_files, summary.conversion_failures
        );
        println!("Rows written: {}", summary.rows_written);
        if summary.rows_skipped > 0 {
            println!("Rows skipped (malformed): {}", summary.rows_skipped);
        }
        if summary.archives_deleted > 0 {
            println!("Archives deleted: {}", summary.archives_deleted);
        }
        for path in &summary.output_files {
            println!("Output: {}", path.display());
        }
    }

    if !summary.failed_references.is_empty() {
        println!("\nFailed archives (re-run to retry):");
        for failed in &summary.failed_references {
            let stage = match failed.stage {
                FailureStage::Download => "download",
                FailureStage::Conversion => "conversion",
            };
            println!("  [{stage}] {} {}: {}", failed.period, failed.url, failed.reason);
        }
    }

    for failure in &summary.output_failures {
        eprintln!(
            "\nFailed to write {}: {}",
            failure.path.display(),
            failure.reason
        );
        error!("Output failed: {}", failure.path.display());
    }
}
