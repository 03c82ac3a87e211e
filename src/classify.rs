use std::fmt;

use serde::Serialize;

use crate::models::{fields, MetricRecord, Metrics};
use crate::settings::{
    ActivityThresholds, BalancedThresholds, ChampionSettings, ConverterThresholds,
    EfficientConverterThresholds, EngagementChampionThresholds, OutlierSettings, OverallWeights,
    ParticipationThreshold, SegmentSettings, SettingsStore, TierThreshold, TierThresholds,
    ValueThresholds,
};

/// Scale applied to the conversion rate percentage in the champion score.
pub const CONVERSION_RATE_SCALE: f64 = 10.0;

/// Performance tier, ordered by rank (`Starter` lowest).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Tier {
    Starter,
    Bronze,
    Silver,
    Gold,
    Platinum,
}

impl Tier {
    pub const ALL: [Tier; 5] = [
        Tier::Platinum,
        Tier::Gold,
        Tier::Silver,
        Tier::Bronze,
        Tier::Starter,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Tier::Platinum => "Platinum",
            Tier::Gold => "Gold",
            Tier::Silver => "Silver",
            Tier::Bronze => "Bronze",
            Tier::Starter => "Starter",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum ActivityLevel {
    Inactive,
    Low,
    Moderate,
    Active,
    HighlyActive,
}

impl ActivityLevel {
    pub fn label(self) -> &'static str {
        match self {
            ActivityLevel::HighlyActive => "Highly Active",
            ActivityLevel::Active => "Active",
            ActivityLevel::Moderate => "Moderately Active",
            ActivityLevel::Low => "Low Activity",
            ActivityLevel::Inactive => "Inactive",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum ValueSegment {
    NoSales,
    Low,
    Medium,
    High,
}

impl ValueSegment {
    pub fn label(self) -> &'static str {
        match self {
            ValueSegment::High => "High Value",
            ValueSegment::Medium => "Medium Value",
            ValueSegment::Low => "Low Value",
            ValueSegment::NoSales => "No Sales Yet",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum ConverterSegment {
    Low,
    Average,
    High,
    Super,
}

impl ConverterSegment {
    pub const ALL: [ConverterSegment; 4] = [
        ConverterSegment::Super,
        ConverterSegment::High,
        ConverterSegment::Average,
        ConverterSegment::Low,
    ];

    pub fn label(self) -> &'static str {
        match self {
            ConverterSegment::Super => "Super Converters",
            ConverterSegment::High => "High Converters",
            ConverterSegment::Average => "Average Converters",
            ConverterSegment::Low => "Low Converters",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum OpportunityFlag {
    HighPotential,
    MediumPotential,
    Engaged,
}

impl OpportunityFlag {
    pub fn label(self) -> &'static str {
        match self {
            OpportunityFlag::HighPotential => "High Potential - Needs Sales Optimization",
            OpportunityFlag::MediumPotential => "Medium Potential - Could Improve",
            OpportunityFlag::Engaged => "Engaged",
        }
    }
}

macro_rules! impl_display_via_label {
    ($($ty:ty),*) => {
        $(impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.label())
            }
        })*
    };
}

impl_display_via_label!(Tier, ActivityLevel, ValueSegment, ConverterSegment, OpportunityFlag);

fn meets_both(m: &Metrics, t: &TierThreshold) -> bool {
    m.engagement >= t.engagement && m.sales >= t.sales
}

/// Platinum, Gold and Silver need both thresholds; Bronze needs either one.
pub fn assign_tier(m: &Metrics, tiers: &TierThresholds) -> Tier {
    if meets_both(m, &tiers.platinum) {
        Tier::Platinum
    } else if meets_both(m, &tiers.gold) {
        Tier::Gold
    } else if meets_both(m, &tiers.silver) {
        Tier::Silver
    } else if m.engagement >= tiers.bronze.engagement || m.sales >= tiers.bronze.sales {
        Tier::Bronze
    } else {
        Tier::Starter
    }
}

pub fn activity_level(m: &Metrics, levels: &ActivityThresholds) -> ActivityLevel {
    let meets = |t: &ParticipationThreshold| m.programs >= t.programs && m.tasks >= t.tasks;
    if meets(&levels.highly_active) {
        ActivityLevel::HighlyActive
    } else if meets(&levels.active) {
        ActivityLevel::Active
    } else if meets(&levels.moderate) {
        ActivityLevel::Moderate
    } else if meets(&levels.low) {
        ActivityLevel::Low
    } else {
        ActivityLevel::Inactive
    }
}

/// Sales floors are exclusive here: exactly `high` is still Medium Value.
pub fn value_segment(m: &Metrics, value: &ValueThresholds) -> ValueSegment {
    if m.sales > value.high {
        ValueSegment::High
    } else if m.sales > value.medium {
        ValueSegment::Medium
    } else if m.sales > value.low {
        ValueSegment::Low
    } else {
        ValueSegment::NoSales
    }
}

pub fn champion_score(m: &Metrics, w: &OverallWeights) -> f64 {
    m.engagement * w.engagement_weight
        + m.sales * w.sales_weight
        + (m.conversion_rate_pct * CONVERSION_RATE_SCALE) * w.conversion_weight
}

/// Minimum of the two normalized metrics. A non-positive normalizer
/// contributes 0 rather than an infinite ratio.
pub fn balance_score(m: &Metrics, b: &BalancedThresholds) -> f64 {
    let ratio = |value: f64, normalizer: f64| {
        if normalizer > 0.0 {
            value / normalizer
        } else {
            0.0
        }
    };
    ratio(m.engagement, b.engagement_normalizer).min(ratio(m.sales, b.sales_normalizer))
}

/// Sales per engagement point; the supplied ratio wins over recomputation.
pub fn efficiency_ratio(m: &Metrics) -> f64 {
    match m.efficiency {
        Some(ratio) => ratio,
        None if m.engagement > 0.0 => m.sales / m.engagement,
        None => 0.0,
    }
}

pub fn opportunity_flag(m: &Metrics, t: &EngagementChampionThresholds) -> OpportunityFlag {
    if m.engagement > t.high_potential_engagement && m.sales < t.high_potential_max_sales {
        OpportunityFlag::HighPotential
    } else if m.engagement > t.medium_potential_engagement && m.sales < t.medium_potential_max_sales
    {
        OpportunityFlag::MediumPotential
    } else {
        OpportunityFlag::Engaged
    }
}

pub fn converter_segment(m: &Metrics, t: &ConverterThresholds) -> ConverterSegment {
    let ratio = efficiency_ratio(m);
    if ratio >= t.super_converter {
        ConverterSegment::Super
    } else if ratio >= t.high {
        ConverterSegment::High
    } else if ratio >= t.average {
        ConverterSegment::Average
    } else {
        ConverterSegment::Low
    }
}

/// Keeps an upstream z-score when its magnitude reaches `min_z_score`.
/// A missing z-score never passes.
pub fn passes_z_threshold(z_score: Option<f64>, min_z_score: f64) -> bool {
    z_score.is_some_and(|z| z.abs() >= min_z_score)
}

/// High sales on low engagement.
pub fn is_efficient_converter(m: &Metrics, t: &EfficientConverterThresholds) -> bool {
    m.sales > t.min_sales && m.engagement < t.max_engagement && efficiency_ratio(m) > t.min_efficiency
}

/// Every derived label for one record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    pub tier: Tier,
    pub activity: ActivityLevel,
    pub value: ValueSegment,
    pub converter: ConverterSegment,
    pub opportunity: OpportunityFlag,
    pub champion_score: f64,
    pub balance_score: f64,
    pub efficiency_ratio: f64,
}

/// Threshold snapshot handed to classification at the composition root.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Classifier {
    pub champion: ChampionSettings,
    pub segment: SegmentSettings,
    pub outlier: OutlierSettings,
}

impl Classifier {
    pub fn from_store(store: &SettingsStore) -> Self {
        Self {
            champion: store.load(),
            segment: store.load(),
            outlier: store.load(),
        }
    }

    pub fn classify(&self, record: &MetricRecord) -> Classification {
        let m = record.metrics();
        Classification {
            tier: assign_tier(&m, &self.segment.tiers),
            activity: activity_level(&m, &self.segment.activity),
            value: value_segment(&m, &self.segment.value),
            converter: converter_segment(&m, &self.segment.converters),
            opportunity: opportunity_flag(&m, &self.champion.engagement),
            champion_score: champion_score(&m, &self.champion.overall),
            balance_score: balance_score(&m, &self.champion.balanced),
            efficiency_ratio: efficiency_ratio(&m),
        }
    }

    /// Writes the derived labels into each record so the pipeline can filter
    /// and sort on them like any upstream column.
    pub fn annotate(&self, records: &mut [MetricRecord]) {
        for record in records.iter_mut() {
            let c = self.classify(record);
            record.set("tier", c.tier.label());
            record.set("activity_segment", c.activity.label());
            record.set("value_segment", c.value.label());
            record.set("converter_segment", c.converter.label());
            record.set("opportunity_flag", c.opportunity.label());
            record.set("champion_score", round2(c.champion_score));
            record.set("balance_score", round2(c.balance_score));
            record.set("efficiency_ratio", (c.efficiency_ratio * 10_000.0).round() / 10_000.0);
        }
    }

    /// Drops upstream outlier rows whose z-score no longer clears the stored threshold.
    pub fn retain_outliers(&self, records: &mut Vec<MetricRecord>, kind: OutlierKind) {
        let min = match kind {
            OutlierKind::Sales => self.outlier.sales.min_z_score,
            OutlierKind::Engagement => self.outlier.engagement.min_z_score,
        };
        records.retain(|r| passes_z_threshold(r.number_opt(fields::Z_SCORE), min));
    }

    pub fn retain_efficient_converters(&self, records: &mut Vec<MetricRecord>) {
        let t = &self.outlier.efficient_converters;
        records.retain(|r| is_efficient_converter(&r.metrics(), t));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutlierKind {
    Sales,
    Engagement,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::record;
    use serde_json::json;

    fn metrics(engagement: f64, sales: f64) -> Metrics {
        Metrics {
            engagement,
            sales,
            ..Metrics::default()
        }
    }

    fn tiers() -> TierThresholds {
        SegmentSettings::default().tiers
    }

    #[test]
    fn champion_score_scales_conversion_rate() {
        let m = Metrics {
            engagement: 1000.0,
            sales: 500.0,
            conversion_rate_pct: 50.0,
            ..Metrics::default()
        };
        let w = OverallWeights {
            engagement_weight: 0.4,
            sales_weight: 0.4,
            conversion_weight: 0.2,
        };
        assert!((champion_score(&m, &w) - 700.0).abs() < 1e-9);
    }

    #[test]
    fn platinum_requires_both_thresholds() {
        assert_eq!(assign_tier(&metrics(50_000.0, 5_000.0), &tiers()), Tier::Platinum);
        assert_eq!(assign_tier(&metrics(50_000.0, 4_999.0), &tiers()), Tier::Gold);
        assert_eq!(assign_tier(&metrics(19_999.0, 100_000.0), &tiers()), Tier::Silver);
    }

    #[test]
    fn bronze_accepts_either_threshold() {
        assert_eq!(assign_tier(&metrics(1_000.0, 0.0), &tiers()), Tier::Bronze);
        assert_eq!(assign_tier(&metrics(0.0, 100.0), &tiers()), Tier::Bronze);
        assert_eq!(assign_tier(&metrics(999.0, 99.0), &tiers()), Tier::Starter);
    }

    #[test]
    fn tier_rank_is_monotonic() {
        let steps = [0.0, 99.0, 100.0, 500.0, 999.0, 1_000.0, 2_000.0, 5_000.0, 20_000.0, 50_000.0, 90_000.0];
        for &held in &steps {
            let mut last_by_engagement = Tier::Starter;
            let mut last_by_sales = Tier::Starter;
            for &step in &steps {
                let by_engagement = assign_tier(&metrics(step, held), &tiers());
                let by_sales = assign_tier(&metrics(held, step), &tiers());
                assert!(by_engagement >= last_by_engagement);
                assert!(by_sales >= last_by_sales);
                last_by_engagement = by_engagement;
                last_by_sales = by_sales;
            }
        }
    }

    #[test]
    fn activity_levels_use_and_semantics() {
        let levels = SegmentSettings::default().activity;
        let with = |programs: f64, tasks: f64| Metrics {
            programs,
            tasks,
            ..Metrics::default()
        };
        assert_eq!(activity_level(&with(10.0, 10.0), &levels), ActivityLevel::HighlyActive);
        assert_eq!(activity_level(&with(12.0, 9.0), &levels), ActivityLevel::Active);
        assert_eq!(activity_level(&with(2.0, 1.0), &levels), ActivityLevel::Low);
        assert_eq!(activity_level(&with(0.0, 50.0), &levels), ActivityLevel::Inactive);
    }

    #[test]
    fn value_segment_floors_are_exclusive() {
        let value = SegmentSettings::default().value;
        assert_eq!(value_segment(&metrics(0.0, 2_000.0), &value), ValueSegment::Medium);
        assert_eq!(value_segment(&metrics(0.0, 2_000.5), &value), ValueSegment::High);
        assert_eq!(value_segment(&metrics(0.0, 0.0), &value), ValueSegment::NoSales);
    }

    #[test]
    fn balance_score_takes_weaker_side() {
        let b = ChampionSettings::default().balanced;
        assert_eq!(balance_score(&metrics(3_000.0, 500.0), &b), 0.5);
        let zeroed = BalancedThresholds {
            engagement_normalizer: 0.0,
            ..b
        };
        assert_eq!(balance_score(&metrics(3_000.0, 500.0), &zeroed), 0.0);
    }

    #[test]
    fn opportunity_flag_priority() {
        let t = ChampionSettings::default().engagement;
        assert_eq!(opportunity_flag(&metrics(900.0, 999.0), &t), OpportunityFlag::HighPotential);
        assert_eq!(opportunity_flag(&metrics(900.0, 1_000.0), &t), OpportunityFlag::MediumPotential);
        assert_eq!(opportunity_flag(&metrics(800.0, 10.0), &t), OpportunityFlag::MediumPotential);
        assert_eq!(opportunity_flag(&metrics(600.0, 10.0), &t), OpportunityFlag::Engaged);
        assert_eq!(opportunity_flag(&metrics(700.0, 2_000.0), &t), OpportunityFlag::Engaged);
    }

    #[test]
    fn converter_segment_recomputes_missing_ratio() {
        let t = SegmentSettings::default().converters;
        assert_eq!(converter_segment(&metrics(100.0, 50.0), &t), ConverterSegment::Super);
        assert_eq!(converter_segment(&metrics(100.0, 30.0), &t), ConverterSegment::High);
        assert_eq!(converter_segment(&metrics(0.0, 30.0), &t), ConverterSegment::Low);
        let supplied = Metrics {
            efficiency: Some(0.1),
            ..metrics(100.0, 90.0)
        };
        assert_eq!(converter_segment(&supplied, &t), ConverterSegment::Average);
    }

    #[test]
    fn z_threshold_uses_magnitude() {
        assert!(passes_z_threshold(Some(-2.5), 2.0));
        assert!(passes_z_threshold(Some(2.0), 2.0));
        assert!(!passes_z_threshold(Some(1.99), 2.0));
        assert!(!passes_z_threshold(None, 0.0));
    }

    #[test]
    fn classification_is_pure_and_total() {
        let classifier = Classifier::default();
        let row = record(json!({ "email": "nobody@example.com", "total_sales": null }));
        let first = classifier.classify(&row);
        assert_eq!(first, classifier.classify(&row));
        assert_eq!(first.tier, Tier::Starter);
        assert_eq!(first.champion_score, 0.0);
        assert_eq!(first.efficiency_ratio, 0.0);
    }

    #[test]
    fn annotate_writes_labels() {
        let classifier = Classifier::default();
        let mut rows = vec![record(json!({
            "total_engagement_score": "25000",
            "total_sales": 3000,
            "total_programs": 6,
            "total_tasks": 7,
            "program_conversion_rate": 40
        }))];
        classifier.annotate(&mut rows);
        assert_eq!(rows[0].text("tier"), "Gold");
        assert_eq!(rows[0].text("activity_segment"), "Active");
        assert_eq!(rows[0].text("value_segment"), "High Value");
        assert_eq!(rows[0].number("champion_score"), 25000.0 * 0.4 + 3000.0 * 0.4 + 400.0 * 0.2);
    }

    #[test]
    fn retains_outliers_and_efficient_converters() {
        let classifier = Classifier::default();
        let mut outliers = vec![
            record(json!({ "z_score": "2.40" })),
            record(json!({ "z_score": 1.2 })),
            record(json!({ "z_score": null })),
        ];
        classifier.retain_outliers(&mut outliers, OutlierKind::Sales);
        assert_eq!(outliers.len(), 1);

        let mut converters = vec![
            record(json!({ "total_engagement_score": 3000, "total_sales": 1500 })),
            record(json!({ "total_engagement_score": 6000, "total_sales": 4000 })),
        ];
        classifier.retain_efficient_converters(&mut converters);
        assert_eq!(converters.len(), 1);
    }
}
