//! Text for /usage and /tools

use playdeck_wire::{CostBreakdown, ToolCallRecord, UsageSnapshot};

/// Render the usage snapshot and its cost estimate
pub fn format_usage(usage: Option<&UsageSnapshot>, cost: Option<CostBreakdown>) -> String {
    let Some(usage) = usage else {
        return "No usage reported yet.".to_string();
    };

    let mut output = String::new();
    let scope = if usage.is_cumulative {
        "whole request"
    } else {
        "last model call"
    };
    match &usage.model {
        Some(model) => output.push_str(&format!("Usage ({}, {}):\n", model, scope)),
        None => output.push_str(&format!("Usage ({}):\n", scope)),
    }

    output.push_str(&format!(
        "  Input:     {:>8}\n",
        format_number(usage.input_tokens)
    ));
    if usage.cached_tokens > 0 {
        output.push_str(&format!(
            "  Cached:    {:>8}\n",
            format_number(usage.cached_tokens)
        ));
    }
    output.push_str(&format!(
        "  Output:    {:>8}\n",
        format_number(usage.output_tokens)
    ));
    if usage.reasoning_tokens > 0 {
        output.push_str(&format!(
            "  Reasoning: {:>8}\n",
            format_number(usage.reasoning_tokens)
        ));
    }
    output.push_str(&format!(
        "  Total:     {:>8}\n",
        format_number(usage.total_tokens)
    ));
    output.push('\n');

    match cost {
        Some(cost) => output.push_str(&format!("Estimated cost: {}", format_cost(&cost))),
        None => output.push_str("Estimated cost: unknown (no rates for this model)"),
    }

    output
}

pub fn format_cost(cost: &CostBreakdown) -> String {
    format!(
        "${:.4} (input ${:.4}, cached ${:.4}, output ${:.4})",
        cost.total, cost.input, cost.cached, cost.output
    )
}

/// Render the most recent tool calls, oldest first
pub fn format_tools(tools: &[&ToolCallRecord], visible: bool) -> String {
    let mut output = String::new();
    if tools.is_empty() {
        output.push_str("No tool calls yet.\n");
    } else {
        output.push_str("Recent tool calls:\n");
        for record in tools {
            let status = if record.success { "ok" } else { "failed" };
            match record.duration_ms {
                Some(ms) => output.push_str(&format!("  {} {} ({}ms)\n", record.tool, status, ms)),
                None => output.push_str(&format!("  {} {}\n", record.tool, status)),
            }
        }
    }
    output.push_str(&format!(
        "Tool calls {} in debug exports.",
        if visible { "shown" } else { "hidden" }
    ));
    output
}

pub fn format_number(n: u64) -> String {
    if n >= 1_000_000 {
        format!("{:.1}M", n as f64 / 1_000_000.0)
    } else if n >= 1_000 {
        format!("{:.1}k", n as f64 / 1_000.0)
    } else {
        n.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1_500), "1.5k");
        assert_eq!(format_number(2_000_000), "2.0M");
    }

    #[test]
    fn test_format_usage() {
        assert_eq!(format_usage(None, None), "No usage reported yet.");

        let usage = UsageSnapshot {
            input_tokens: 1_200,
            output_tokens: 40,
            total_tokens: 1_240,
            cached_tokens: 200,
            model: Some("gpt-4o".into()),
            is_cumulative: true,
            ..Default::default()
        };
        let text = format_usage(Some(&usage), None);
        assert!(text.starts_with("Usage (gpt-4o, whole request)"));
        assert!(text.contains("Cached:"));
        assert!(!text.contains("Reasoning:"));
        assert!(text.ends_with("unknown (no rates for this model)"));

        let cost = CostBreakdown {
            input: 0.5,
            cached: 0.0,
            output: 0.25,
            total: 0.75,
        };
        assert!(format_usage(Some(&usage), Some(cost)).contains("$0.7500"));
    }

    #[test]
    fn test_format_tools() {
        let a = ToolCallRecord {
            tool: "search".into(),
            success: true,
            duration_ms: Some(12),
        };
        let b = ToolCallRecord {
            tool: "fetch".into(),
            success: false,
            duration_ms: None,
        };
        let text = format_tools(&[&a, &b], false);
        assert!(text.contains("search ok (12ms)"));
        assert!(text.contains("fetch failed\n"));
        assert!(text.ends_with("hidden in debug exports."));
        assert!(format_tools(&[], true).starts_with("No tool calls yet."));
    }
}
