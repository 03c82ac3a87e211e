use std::collections::HashMap;
use std::fmt::Write;

use chrono::NaiveDate;

use crate::classify::{self, Classifier, ConverterSegment, Tier};
use crate::models::MetricRecord;

#[derive(Debug, Clone, PartialEq)]
pub struct TierSummary {
    pub tier: Tier,
    pub count: usize,
    pub avg_engagement: f64,
    pub avg_sales: f64,
    pub total_sales: f64,
    pub pct_of_total_sales: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConverterSummary {
    pub segment: ConverterSegment,
    pub count: usize,
    pub avg_efficiency: f64,
    pub avg_sales: f64,
}

fn mean(total: f64, count: usize) -> f64 {
    if count == 0 {
        0.0
    } else {
        total / count as f64
    }
}

/// Tier mix, highest tier first. Rows with neither engagement nor sales are
/// left out; empty tiers are omitted.
pub fn summarize_tiers(records: &[MetricRecord], classifier: &Classifier) -> Vec<TierSummary> {
    let mut map: HashMap<Tier, (usize, f64, f64)> = HashMap::new();

    for record in records {
        let m = record.metrics();
        if m.engagement == 0.0 && m.sales == 0.0 {
            continue;
        }
        let tier = classify::assign_tier(&m, &classifier.segment.tiers);
        let entry = map.entry(tier).or_insert((0, 0.0, 0.0));
        entry.0 += 1;
        entry.1 += m.engagement;
        entry.2 += m.sales;
    }

    let grand_total: f64 = map.values().map(|(_, _, sales)| sales).sum();

    Tier::ALL
        .iter()
        .filter_map(|tier| {
            let (count, engagement, sales) = map.get(tier).copied()?;
            Some(TierSummary {
                tier: *tier,
                count,
                avg_engagement: mean(engagement, count),
                avg_sales: mean(sales, count),
                total_sales: sales,
                pct_of_total_sales: if grand_total > 0.0 {
                    sales * 100.0 / grand_total
                } else {
                    0.0
                },
            })
        })
        .collect()
}

/// Converter mix over records that have both sales and engagement.
pub fn summarize_converters(records: &[MetricRecord], classifier: &Classifier) -> Vec<ConverterSummary> {
    let mut map: HashMap<ConverterSegment, (usize, f64, f64)> = HashMap::new();

    for record in records {
        let m = record.metrics();
        if m.sales <= 0.0 || m.engagement <= 0.0 {
            continue;
        }
        let segment = classify::converter_segment(&m, &classifier.segment.converters);
        let entry = map.entry(segment).or_insert((0, 0.0, 0.0));
        entry.0 += 1;
        entry.1 += classify::efficiency_ratio(&m);
        entry.2 += m.sales;
    }

    ConverterSegment::ALL
        .iter()
        .filter_map(|segment| {
            let (count, efficiency, sales) = map.get(segment).copied()?;
            Some(ConverterSummary {
                segment: *segment,
                count,
                avg_efficiency: mean(efficiency, count),
                avg_sales: mean(sales, count),
            })
        })
        .collect()
}

pub fn build_report(
    dataset_label: &str,
    generated_on: NaiveDate,
    records: &[MetricRecord],
    classifier: &Classifier,
) -> String {
    let tiers = summarize_tiers(records, classifier);
    let converters = summarize_converters(records, classifier);

    let mut output = String::new();

    let _ = writeln!(output, "# Advocate Performance Report");
    let _ = writeln!(
        output,
        "Generated for {} on {} ({} records)",
        dataset_label,
        generated_on,
        records.len()
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Performance Tiers");

    if tiers.is_empty() {
        let _ = writeln!(output, "No accounts with engagement or sales.");
    } else {
        for summary in tiers.iter() {
            let _ = writeln!(
                output,
                "- {}: {} accounts, avg engagement {:.0}, avg sales {:.2}, {:.1}% of sales",
                summary.tier,
                summary.count,
                summary.avg_engagement,
                summary.avg_sales,
                summary.pct_of_total_sales
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Conversion Efficiency");

    if converters.is_empty() {
        let _ = writeln!(output, "No accounts with both sales and engagement.");
    } else {
        for summary in converters.iter() {
            let _ = writeln!(
                output,
                "- {}: {} accounts, avg efficiency {:.4}, avg sales {:.2}",
                summary.segment, summary.count, summary.avg_efficiency, summary.avg_sales
            );
        }
    }

    let mut ranked: Vec<(f64, &MetricRecord)> = records
        .iter()
        .map(|r| (classifier.classify(r).champion_score, r))
        .collect();
    ranked.sort_by(|a, b| b.0.total_cmp(&a.0));

    let _ = writeln!(output);
    let _ = writeln!(output, "## Top Champions");

    if ranked.is_empty() {
        let _ = writeln!(output, "No accounts in this dataset.");
    } else {
        for (score, record) in ranked.iter().take(10) {
            let _ = writeln!(
                output,
                "- {} ({}) champion score {:.2}",
                record.text("user_names"),
                record.text("email"),
                score
            );
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::record;
    use serde_json::json;

    fn sample() -> Vec<MetricRecord> {
        vec![
            record(json!({ "email": "a@x.co", "user_names": "Ana", "total_engagement_score": 60000, "total_sales": 6000 })),
            record(json!({ "email": "b@x.co", "user_names": "Ben", "total_engagement_score": 1500, "total_sales": 800 })),
            record(json!({ "email": "c@x.co", "user_names": "Cy", "total_engagement_score": 1200, "total_sales": 200 })),
            record(json!({ "email": "d@x.co", "user_names": "Di", "total_engagement_score": null, "total_sales": null })),
        ]
    }

    #[test]
    fn tiers_are_ordered_and_shares_add_up() {
        let summaries = summarize_tiers(&sample(), &Classifier::default());
        let tiers: Vec<Tier> = summaries.iter().map(|s| s.tier).collect();
        assert_eq!(tiers, vec![Tier::Platinum, Tier::Bronze]);
        assert_eq!(summaries[1].count, 2);
        assert!((summaries[1].avg_sales - 500.0).abs() < 1e-9);
        let share: f64 = summaries.iter().map(|s| s.pct_of_total_sales).sum();
        assert!((share - 100.0).abs() < 1e-9);
    }

    #[test]
    fn converters_skip_rows_without_sales() {
        let summaries = summarize_converters(&sample(), &Classifier::default());
        let total: usize = summaries.iter().map(|s| s.count).sum();
        assert_eq!(total, 3);
        assert_eq!(summaries[0].segment, ConverterSegment::Super);
    }

    #[test]
    fn report_lists_sections() {
        let date = NaiveDate::from_ymd_opt(2026, 10, 17).unwrap();
        let report = build_report("accounts", date, &sample(), &Classifier::default());
        assert!(report.contains("## Performance Tiers"));
        assert!(report.contains("- Platinum: 1 accounts"));
        assert!(report.contains("## Top Champions\n- Ana (a@x.co)"));
    }

    #[test]
    fn empty_report_has_placeholders() {
        let date = NaiveDate::from_ymd_opt(2026, 10, 17).unwrap();
        let report = build_report("accounts", date, &[], &Classifier::default());
        assert!(report.contains("No accounts with engagement or sales."));
        assert!(report.contains("No accounts in this dataset."));
    }
}
