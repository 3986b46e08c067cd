//! Colored terminal output for the CLI.

use console::Style;

use crate::demo::{DemoReport, OrderStatus};
use crate::execution::ProcessSummary;

/// Green for a clean process, red once a failure went unhandled, yellow
/// when escalations were handled along the way.
fn summary_style(summary: &ProcessSummary) -> Style {
    if summary.unhandled_failures > 0 {
        Style::new().red().bold()
    } else if summary.escalations_handled > 0 {
        Style::new().yellow()
    } else {
        Style::new().green().bold()
    }
}

pub fn order_line(report: &DemoReport) -> String {
    let (style, mark) = match report.order_status {
        OrderStatus::Shipped => (Style::new().green().bold(), "✓"),
        OrderStatus::Backordered => (Style::new().yellow(), "↻"),
        OrderStatus::Received | OrderStatus::Reserved => (Style::new().red().bold(), "✗"),
    };
    let total = report
        .total_cents
        .map(|cents| format!("{}.{:02}", cents / 100, cents % 100))
        .unwrap_or_else(|| "-".into());
    format!(
        "  {} Order {:?}, total {total}, {} left in stock",
        style.apply_to(mark),
        report.order_status,
        report.remaining_stock
    )
}

/// Prints the order outcome followed by the process summary as JSON.
pub fn print_report(report: &DemoReport) {
    println!("{}", order_line(report));
    println!();
    println!("{}", summary_style(&report.summary).apply_to("─── Process Summary ───"));
    println!("{}", serde_json::to_string_pretty(report).unwrap_or_default());
}
