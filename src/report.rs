use crate::analysis::AnalysisReport;
use anyhow::Result;
use std::path::Path;

const WIDTH: usize = 60;

fn rule(left: char, right: char) -> String {
    format!("{}{}{}", left, "═".repeat(WIDTH), right)
}

/// One boxed row, padded (or cut) to the inner width.
fn row(text: impl AsRef<str>) -> String {
    let cell: String = text.as_ref().chars().take(WIDTH).collect();
    format!("║{:<width$}║", cell, width = WIDTH)
}

/// The boxed allocation, risk and simulation table, one string per line.
pub fn render_report(report: &AnalysisReport) -> Vec<String> {
    let mut lines = vec![
        rule('╔', '╗'),
        row(format!("{:^width$}", "Portfolio Allocation & Risk", width = WIDTH)),
        rule('╠', '╣'),
        row(format!(
            "  Expected Annual Return : {:>+8.2}%",
            report.metrics.expected_return * 100.0
        )),
        row(format!("  Expected Annual Vol    : {:>8.2}%", report.metrics.risk * 100.0)),
        row(match report.sharpe_ratio {
            Some(s) => format!("  Sharpe Ratio           : {:>8.3}", s),
            None => "  Sharpe Ratio           :      n/a".to_string(),
        }),
        row(format!("  Risk-Free Rate         : {:>8.2}%", report.risk_free_rate * 100.0)),
    ];
    if let Some(iterations) = report.optimizer_iterations {
        lines.push(row(format!("  Optimizer Iterations   : {:>8}", iterations)));
    }

    lines.push(rule('╠', '╣'));
    lines.push(row("  Symbol       Weight        Amount   Ann.Vol"));
    lines.push(rule('╠', '╣'));
    let mut sorted = report.weights.clone();
    sorted.sort_by(|a, b| b.1.total_cmp(&a.1));
    for (sym, w) in &sorted {
        let vol = report
            .asset_volatilities
            .iter()
            .find(|(s, _)| s == sym)
            .map_or(f64::NAN, |(_, v)| *v);
        lines.push(row(format!(
            "  {:<10} {:>7.2}%  ${:>12.2}  {:>7.2}%",
            sym,
            w * 100.0,
            w * report.initial_investment,
            vol * 100.0
        )));
    }
    if !report.dropped_symbols.is_empty() {
        lines.push(row(format!(
            "  Dropped (no history): {}",
            report.dropped_symbols.join(", ")
        )));
    }

    if report.correlation.len() > 1 {
        lines.push(rule('╠', '╣'));
        lines.push(row("  Correlation"));
        for (i, (sym, _)) in report.weights.iter().enumerate() {
            let cells: String = report
                .correlation
                .get(i)
                .map(|r| r.iter().map(|c| format!("{:>6.2}", c)).collect())
                .unwrap_or_default();
            lines.push(row(format!("  {:<8}{}", sym, cells)));
        }
    }

    lines.push(rule('╠', '╣'));
    lines.push(row(format!(
        "  Historical VaR ({} daily returns)",
        report.num_periods
    )));
    for r in &report.risk {
        lines.push(row(format!(
            "  {:>5.1}%  VaR {:>7.3}%  ES {:>7.3}%  (${:>10.2})",
            r.confidence_level * 100.0,
            r.value_at_risk * 100.0,
            r.expected_shortfall * 100.0,
            r.value_at_risk * report.initial_investment
        )));
    }

    let s = &report.simulation_summary;
    lines.push(rule('╠', '╣'));
    lines.push(row(format!(
        "  Monte Carlo: {} paths x {} steps (seed {})",
        report.simulation.num_simulations(),
        report.simulation.time_horizon(),
        report.simulation.seed
    )));
    lines.push(row(format!("  Initial   : ${:>12.2}", report.initial_investment)));
    lines.push(row(format!("  Mean      : ${:>12.2}", s.mean_final)));
    lines.push(row(format!("  Median    : ${:>12.2}", s.median_final)));
    lines.push(row(format!("  5th pct   : ${:>12.2}", s.p5_final)));
    lines.push(row(format!("  95th pct  : ${:>12.2}", s.p95_final)));
    lines.push(row(format!("  P(loss)   : {:>12.1}%", s.probability_of_loss * 100.0)));

    if let Some(best) = crate::frontier::best_sampled(&report.frontier) {
        lines.push(rule('╠', '╣'));
        lines.push(row(format!(
            "  Best of {} random portfolios: Sharpe {:>6.3}",
            report.frontier.len(),
            best.sharpe_ratio
        )));
    }
    lines.push(rule('╚', '╝'));
    lines
}

/// Prints the allocation, risk and simulation summary as a boxed table.
pub fn print_report(report: &AnalysisReport) {
    println!();
    for line in render_report(report) {
        println!("{}", line);
    }
    println!();
}

/// Writes the report (without the raw simulation paths) as pretty JSON.
pub fn write_json(report: &AnalysisReport, path: &Path) -> Result<()> {
    let file = std::fs::File::create(path)?;
    let writer = std::io::BufWriter::new(file);
    serde_json::to_writer_pretty(writer, report)?;
    Ok(())
}
