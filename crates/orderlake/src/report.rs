use anyhow::Result;
use comfy_table::{presets::UTF8_FULL, Table};
use orderlake_core::analysis::AnalysisReport;
use orderlake_core::checkpoint::LoadedCheckpoint;
use orderlake_core::sync::SyncReport;
use serde::Serialize;

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn key_value_table(rows: Vec<(&str, String)>) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec!["field", "value"]);
    for (field, value) in rows {
        table.add_row(vec![field.to_string(), value]);
    }
    table
}

pub fn print_analysis(report: &AnalysisReport, json: bool) -> Result<()> {
    if json {
        return print_json(report);
    }

    println!(
        "Source {} ({} rows via {}, {} unparsed dates, {} Black Friday week rows)",
        report.source,
        report.source_rows,
        report.parser,
        report.unparsed_dates,
        report.black_friday_rows
    );

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_header(vec!["view", "rows", "partitions", "location"]);
    for view in &report.views {
        table.add_row(vec![
            view.view.to_string(),
            view.rows.to_string(),
            view.partitions.to_string(),
            view.location.clone(),
        ]);
    }
    println!("{table}");
    Ok(())
}

pub fn print_sync(report: &SyncReport, json: bool) -> Result<()> {
    if json {
        return print_json(report);
    }

    let new_checkpoint = report
        .new_checkpoint
        .as_ref()
        .map(|checkpoint| checkpoint.to_string())
        .unwrap_or_else(|| "unchanged".to_string());
    let recent_since = report
        .filter
        .recent_since
        .map(|date| date.to_string())
        .unwrap_or_else(|| "-".to_string());

    let table = key_value_table(vec![
        ("status", format!("{:?}", report.status)),
        ("capture", format!("{:?}", report.capture)),
        ("previous checkpoint", report.previous_checkpoint.to_string()),
        ("checkpoint source", format!("{:?}", report.checkpoint_source)),
        ("recent since", recent_since),
        ("orders extracted", report.orders_extracted.to_string()),
        ("items extracted", report.items_extracted.to_string()),
        ("orphaned items", report.orphaned_items.to_string()),
        ("rows transformed", report.rows_transformed.to_string()),
        ("rows written", report.rows_written.to_string()),
        ("files written", report.files_written.len().to_string()),
        ("new checkpoint", new_checkpoint),
    ]);
    println!("{table}");
    Ok(())
}

pub fn print_checkpoint(loaded: &LoadedCheckpoint, json: bool) -> Result<()> {
    if json {
        return print_json(loaded);
    }

    let checkpoint = &loaded.checkpoint;
    let table = key_value_table(vec![
        ("source", format!("{:?}", loaded.source)),
        ("last order id", checkpoint.last_order_id.to_string()),
        ("last synced date", checkpoint.last_synced_date.clone()),
        (
            "etl run time",
            checkpoint.etl_run_time.clone().unwrap_or_else(|| "-".into()),
        ),
        ("objects", loaded.keys.join(", ")),
    ]);
    println!("{table}");
    Ok(())
}
