//! Plain-text tables for models, fit results and pulls.
//!
//! Formatting lives here so the evaluation and fitting code stays free of
//! presentation concerns.

use crate::eval::Model;
use crate::fit::BestFitResult;
use crate::report::Pulls;

/// Table of every component's parameters plus each unit's reducers and output.
pub fn format_model(model: &Model) -> String {
    let mut out = String::new();
    for u in 0..model.unit_count() {
        let Ok(unit) = model.unit(u) else {
            continue;
        };
        out.push_str(&format!(
            "Unit [{u}] ({} points, output: {})\n",
            unit.domain().len(),
            unit.selected().unwrap_or("sum of components"),
        ));
        out.push_str(&header());
        for (name, ce) in unit.comps() {
            let frozen = if ce.is_frozen() { " (frozen)" } else { "" };
            out.push_str(&format!("{name}: {}{frozen}\n", ce.kind()));
            for (id, p) in ce.params() {
                let fixed = if p.fixed { "fixed" } else { "" };
                out.push_str(
                    format!(
                        "  {:<14} {:>14} {:>14} {:>14} {:<6}",
                        truncate(&id.to_string(), 14),
                        fmt_num(p.value),
                        fmt_num(p.low),
                        fmt_num(p.high),
                        fixed
                    )
                    .trim_end(),
                );
                out.push('\n');
            }
        }
        for r in unit.reducers() {
            let sources: Vec<&str> = r.source_names().collect();
            out.push_str(&format!("{} = reduce({})\n", r.name(), sources.join(", ")));
        }
        let labels: Vec<&str> = model.patch_labels().collect();
        if u + 1 == model.unit_count() && !labels.is_empty() {
            out.push_str(&format!("Patches: {}\n", labels.join(" -> ")));
        }
        out.push('\n');
    }
    out
}

fn header() -> String {
    let mut out = String::new();
    out.push_str(
        format!(
            "  {:<14} {:>14} {:>14} {:>14} {:<6}",
            "param", "value", "low", "high", ""
        )
        .trim_end(),
    );
    out.push('\n');
    out.push_str(
        format!("  {:-<14} {:-<14} {:-<14} {:-<14}", "", "", "", "").trim_end(),
    );
    out.push('\n');
    out
}

/// Best-fit table followed by the fit statistics.
pub fn format_fit_summary(result: &BestFitResult) -> String {
    let mut out = String::new();
    out.push_str("=== compfit - best fit ===\n");

    for (u, comps) in result.units.iter().enumerate() {
        out.push_str(&format!("Unit [{u}]\n"));
        out.push_str(
            format!(
                "  {:<22} {:>14} {:>14} {:>14}",
                "param", "value", "uncertainty", "patched"
            )
            .trim_end(),
        );
        out.push('\n');
        for (comp, params) in comps {
            for (id, p) in params {
                let label = truncate(&format!("{comp}.{id}"), 22);
                let marker = if p.fixed { " (fixed)" } else { "" };
                let patched = if p.patched.to_bits() == p.value.to_bits() {
                    String::new()
                } else {
                    fmt_num(p.patched)
                };
                out.push_str(
                    format!(
                        "  {label:<22} {:>14} {:>14} {:>14}{marker}",
                        fmt_num(p.value),
                        fmt_num(p.uncertainty),
                        patched
                    )
                    .trim_end(),
                );
                out.push('\n');
            }
        }
    }

    out.push('\n');
    out.push_str(&format!(
        "Status: {} ({}; {} iterations, {} evaluations)\n",
        result.status, result.minimizer, result.iterations, result.evaluations
    ));
    if !result.message.is_empty() {
        out.push_str(&format!("Message: {}\n", result.message));
    }
    out.push_str(&format!(
        "Observations: {} | free params: {} | dof: {}\n",
        result.observations, result.free_params, result.dof
    ));
    out.push_str(&format!(
        "Cost: {:.6} | reduced chi2: {:.4} | log-probability: {:.4}\n",
        result.cost,
        result.reduced_chi2(),
        result.log_probability
    ));
    out.push_str(&format!("Elapsed: {:.3} ms\n", result.elapsed.as_secs_f64() * 1e3));
    out
}

/// Largest pulls on each side of the data.
pub fn format_pulls(pulls: &Pulls) -> String {
    let mut out = String::new();
    out.push_str("Model above data:\n");
    out.push_str(&format_pull_table(&pulls.above));
    out.push('\n');
    out.push_str("Model below data:\n");
    out.push_str(&format_pull_table(&pulls.below));
    out
}

fn format_pull_table(rows: &[crate::report::PointResidual]) -> String {
    let mut out = String::new();
    out.push_str(
        format!(
            "{:>6} {:>12} {:>12} {:>10}",
            "index", "observed", "predicted", "pull"
        )
        .trim_end(),
    );
    out.push('\n');
    out.push_str(format!("{:-<6} {:-<12} {:-<12} {:-<10}", "", "", "", "").trim_end());
    out.push('\n');
    for r in rows {
        out.push_str(
            format!(
                "{:>6} {:>12.4} {:>12.4} {:>10.3}",
                r.index, r.observed, r.predicted, r.pull
            )
            .trim_end(),
        );
        out.push('\n');
    }
    out
}

fn fmt_num(v: f64) -> String {
    if v.is_nan() {
        "-".to_string()
    } else if v.is_infinite() {
        if v > 0.0 { "+inf".to_string() } else { "-inf".to_string() }
    } else {
        format!("{v:.6}")
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out = String::new();
    for (i, ch) in s.chars().enumerate() {
        if i + 1 >= max {
            break;
        }
        out.push(ch);
    }
    out.push('.');
    out
}
