//! User-tunable thresholds for champion, outlier and segment classification,
//! persisted as one JSON document of `storage key -> settings object`.

use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

const WEIGHT_SUM_TOLERANCE: f64 = 0.01;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to access settings file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("settings JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown settings field `{0}`")]
    UnknownField(String),
    #[error("settings field `{0}` must be a finite number")]
    NotFinite(String),
}

/// A settings category stored under its own key.
pub trait SettingsCategory: Serialize + DeserializeOwned + Default + Clone {
    const STORAGE_KEY: &'static str;

    /// Category-specific rules on top of the generic numeric checks.
    fn extra_violations(&self) -> Vec<String> {
        Vec::new()
    }

    /// Set the numeric field at a dotted camelCase path, e.g. `overall.salesWeight`.
    fn update_field(&mut self, path: &str, value: f64) -> Result<(), SettingsError> {
        let number = serde_json::Number::from_f64(value)
            .ok_or_else(|| SettingsError::NotFinite(path.to_string()))?;
        let mut tree = serde_json::to_value(&*self)?;
        let mut cursor = &mut tree;
        for segment in path.split('.') {
            cursor = cursor
                .as_object_mut()
                .and_then(|object| object.get_mut(segment))
                .ok_or_else(|| SettingsError::UnknownField(path.to_string()))?;
        }
        if !matches!(cursor, Value::Number(_) | Value::Null) {
            return Err(SettingsError::UnknownField(path.to_string()));
        }
        *cursor = Value::Number(number);
        *self = serde_json::from_value(tree)?;
        Ok(())
    }
}

/// Human-readable rule violations; empty for a valid configuration.
///
/// Every numeric leaf must be finite and non-negative, leaves named
/// `*Normalizer` must be strictly positive, and the category may add its own
/// rules (the champion weight sum, the outlier z-score floor).
pub fn validate_settings<C: SettingsCategory>(cfg: &C) -> Vec<String> {
    let tree = match serde_json::to_value(cfg) {
        Ok(tree) => tree,
        Err(err) => return vec![format!("settings could not be encoded: {err}")],
    };

    let mut leaves = Vec::new();
    collect_leaves(&tree, String::new(), &mut leaves);

    let mut violations = Vec::new();
    for (path, value) in leaves {
        match value.as_f64() {
            // serde_json encodes NaN and infinities as null
            None => violations.push(format!("{path} must be a finite number")),
            Some(v) if v < 0.0 => violations.push(format!("{path} must be non-negative")),
            Some(v) if v <= 0.0 && path.ends_with("Normalizer") => {
                violations.push(format!("{path} must be greater than zero"))
            }
            Some(_) => {}
        }
    }
    violations.extend(cfg.extra_violations());
    violations
}

fn collect_leaves<'a>(value: &'a Value, prefix: String, out: &mut Vec<(String, &'a Value)>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                collect_leaves(child, path, out);
            }
        }
        leaf => out.push((prefix, leaf)),
    }
}

/// Overlay `stored` onto `defaults`, keeping defaults for every field the
/// stored object does not carry or stores as `null`.
fn merge_onto(defaults: &mut Value, stored: Value) {
    match (defaults, stored) {
        (_, Value::Null) => {}
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(slot) => merge_onto(slot, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

/// File-backed key-value slot shared by all settings categories.
///
/// No locking: concurrent writers overwrite each other, last write wins.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stored settings for `C`, or its defaults when the slot is missing or corrupt.
    pub fn load<C: SettingsCategory>(&self) -> C {
        let slots = match self.read_slots() {
            Ok(Some(slots)) => slots,
            Ok(None) => return C::default(),
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "settings unreadable, using defaults");
                return C::default();
            }
        };

        let Some(stored) = slots.get(C::STORAGE_KEY).cloned() else {
            return C::default();
        };

        let mut tree = match serde_json::to_value(C::default()) {
            Ok(tree) => tree,
            Err(_) => return C::default(),
        };
        merge_onto(&mut tree, stored);

        match serde_json::from_value(tree) {
            Ok(cfg) => cfg,
            Err(err) => {
                warn!(key = C::STORAGE_KEY, error = %err, "stored settings malformed, using defaults");
                C::default()
            }
        }
    }

    /// Persist `cfg` under its key. Does not validate; callers run
    /// [`validate_settings`] first and decide whether to proceed.
    pub fn save<C: SettingsCategory>(&self, cfg: &C) -> Result<(), SettingsError> {
        let mut slots = match self.read_slots() {
            Ok(slots) => slots.unwrap_or_default(),
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "overwriting unreadable settings file");
                Map::new()
            }
        };
        slots.insert(C::STORAGE_KEY.to_string(), serde_json::to_value(cfg)?);

        let payload = serde_json::to_string_pretty(&Value::Object(slots))?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| SettingsError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::write(&self.path, payload).map_err(|source| SettingsError::Io {
            path: self.path.clone(),
            source,
        })?;
        debug!(key = C::STORAGE_KEY, path = %self.path.display(), "settings saved");
        Ok(())
    }

    /// Persist and return a fresh copy of the category defaults.
    pub fn reset<C: SettingsCategory>(&self) -> Result<C, SettingsError> {
        let cfg = C::default();
        self.save(&cfg)?;
        Ok(cfg)
    }

    fn read_slots(&self) -> Result<Option<Map<String, Value>>, SettingsError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(SettingsError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        match serde_json::from_str::<Value>(&raw)? {
            Value::Object(slots) => Ok(Some(slots)),
            _ => Ok(Some(Map::new())),
        }
    }
}

// ---------------------------------------------------------------------------
// Champion

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChampionSettings {
    pub overall: OverallWeights,
    pub sales: SalesChampionThresholds,
    pub engagement: EngagementChampionThresholds,
    pub balanced: BalancedThresholds,
}

/// Champion score weights; must sum to 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverallWeights {
    pub engagement_weight: f64,
    pub sales_weight: f64,
    pub conversion_weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SalesChampionThresholds {
    pub min_sales: f64,
}

/// Opportunity flag thresholds for engagement champions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngagementChampionThresholds {
    pub min_engagement: f64,
    pub high_potential_engagement: f64,
    pub high_potential_max_sales: f64,
    pub medium_potential_engagement: f64,
    pub medium_potential_max_sales: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalancedThresholds {
    pub min_engagement: f64,
    pub min_sales: f64,
    pub engagement_normalizer: f64,
    pub sales_normalizer: f64,
}

impl Default for ChampionSettings {
    fn default() -> Self {
        Self {
            overall: OverallWeights {
                engagement_weight: 0.4,
                sales_weight: 0.4,
                conversion_weight: 0.2,
            },
            sales: SalesChampionThresholds { min_sales: 0.0 },
            engagement: EngagementChampionThresholds {
                min_engagement: 300.0,
                high_potential_engagement: 800.0,
                high_potential_max_sales: 1000.0,
                medium_potential_engagement: 600.0,
                medium_potential_max_sales: 2000.0,
            },
            balanced: BalancedThresholds {
                min_engagement: 500.0,
                min_sales: 500.0,
                engagement_normalizer: 1000.0,
                sales_normalizer: 1000.0,
            },
        }
    }
}

impl SettingsCategory for ChampionSettings {
    const STORAGE_KEY: &'static str = "advocacy.settings.champion";

    fn extra_violations(&self) -> Vec<String> {
        let w = &self.overall;
        let sum = w.engagement_weight + w.sales_weight + w.conversion_weight;
        // small slack so that 0.33 * 3 lands inside the band
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE + 1e-9 || !sum.is_finite() {
            vec![format!(
                "overall weights must sum to 1.0 (±{WEIGHT_SUM_TOLERANCE}), got {sum:.3}"
            )]
        } else {
            Vec::new()
        }
    }
}

impl ChampionSettings {
    /// Query parameters understood by the champions endpoint.
    pub fn query_params(&self) -> Vec<(&'static str, String)> {
        vec![
            ("engagement_weight", self.overall.engagement_weight.to_string()),
            ("sales_weight", self.overall.sales_weight.to_string()),
            ("conversion_weight", self.overall.conversion_weight.to_string()),
            ("min_sales", self.sales.min_sales.to_string()),
            ("min_engagement", self.engagement.min_engagement.to_string()),
            (
                "high_potential_eng",
                self.engagement.high_potential_engagement.to_string(),
            ),
            (
                "high_potential_sales",
                self.engagement.high_potential_max_sales.to_string(),
            ),
            (
                "med_potential_eng",
                self.engagement.medium_potential_engagement.to_string(),
            ),
            (
                "med_potential_sales",
                self.engagement.medium_potential_max_sales.to_string(),
            ),
            ("balanced_min_eng", self.balanced.min_engagement.to_string()),
            ("balanced_min_sales", self.balanced.min_sales.to_string()),
            ("eng_normalizer", self.balanced.engagement_normalizer.to_string()),
            ("sales_normalizer", self.balanced.sales_normalizer.to_string()),
        ]
    }
}

// ---------------------------------------------------------------------------
// Outlier

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutlierSettings {
    pub sales: ZScoreThreshold,
    pub engagement: ZScoreThreshold,
    pub efficient_converters: EfficientConverterThresholds,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZScoreThreshold {
    pub min_z_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EfficientConverterThresholds {
    pub min_sales: f64,
    pub max_engagement: f64,
    pub min_efficiency: f64,
}

impl Default for OutlierSettings {
    fn default() -> Self {
        Self {
            sales: ZScoreThreshold { min_z_score: 2.0 },
            engagement: ZScoreThreshold { min_z_score: 1.5 },
            efficient_converters: EfficientConverterThresholds {
                min_sales: 1000.0,
                max_engagement: 5000.0,
                min_efficiency: 0.3,
            },
        }
    }
}

/// Lowest z-score the outlier endpoints accept.
pub const MIN_Z_SCORE: f64 = 1.0;

impl SettingsCategory for OutlierSettings {
    const STORAGE_KEY: &'static str = "advocacy.settings.outlier";

    fn extra_violations(&self) -> Vec<String> {
        [
            ("sales.minZScore", self.sales.min_z_score),
            ("engagement.minZScore", self.engagement.min_z_score),
        ]
        .into_iter()
        .filter(|(_, z)| *z < MIN_Z_SCORE)
        .map(|(path, _)| format!("{path} must be at least {MIN_Z_SCORE}"))
        .collect()
    }
}

// ---------------------------------------------------------------------------
// Segment

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentSettings {
    pub tiers: TierThresholds,
    pub activity: ActivityThresholds,
    pub value: ValueThresholds,
    pub converters: ConverterThresholds,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TierThresholds {
    pub platinum: TierThreshold,
    pub gold: TierThreshold,
    pub silver: TierThreshold,
    pub bronze: TierThreshold,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TierThreshold {
    pub engagement: f64,
    pub sales: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityThresholds {
    pub highly_active: ParticipationThreshold,
    pub active: ParticipationThreshold,
    pub moderate: ParticipationThreshold,
    pub low: ParticipationThreshold,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipationThreshold {
    pub programs: f64,
    pub tasks: f64,
}

/// Sales floors for value segments, compared with `>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueThresholds {
    pub high: f64,
    pub medium: f64,
    pub low: f64,
}

/// Efficiency-ratio floors for converter segments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConverterThresholds {
    pub super_converter: f64,
    pub high: f64,
    pub average: f64,
}

impl Default for SegmentSettings {
    fn default() -> Self {
        Self {
            tiers: TierThresholds {
                platinum: TierThreshold {
                    engagement: 50_000.0,
                    sales: 5_000.0,
                },
                gold: TierThreshold {
                    engagement: 20_000.0,
                    sales: 2_000.0,
                },
                silver: TierThreshold {
                    engagement: 5_000.0,
                    sales: 500.0,
                },
                bronze: TierThreshold {
                    engagement: 1_000.0,
                    sales: 100.0,
                },
            },
            activity: ActivityThresholds {
                highly_active: ParticipationThreshold {
                    programs: 10.0,
                    tasks: 10.0,
                },
                active: ParticipationThreshold {
                    programs: 5.0,
                    tasks: 5.0,
                },
                moderate: ParticipationThreshold {
                    programs: 2.0,
                    tasks: 2.0,
                },
                low: ParticipationThreshold {
                    programs: 1.0,
                    tasks: 0.0,
                },
            },
            value: ValueThresholds {
                high: 2_000.0,
                medium: 500.0,
                low: 0.0,
            },
            converters: ConverterThresholds {
                super_converter: 0.5,
                high: 0.3,
                average: 0.1,
            },
        }
    }
}

impl SettingsCategory for SegmentSettings {
    const STORAGE_KEY: &'static str = "advocacy.settings.segment";
}

#[cfg(test)]
pub(crate) fn temp_store(name: &str) -> SettingsStore {
    let path = std::env::temp_dir().join(format!(
        "advocacy-settings-{name}-{}.json",
        std::process::id()
    ));
    let _ = fs::remove_file(&path);
    SettingsStore::new(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weights(e: f64, s: f64, c: f64) -> ChampionSettings {
        let mut cfg = ChampionSettings::default();
        cfg.overall = OverallWeights {
            engagement_weight: e,
            sales_weight: s,
            conversion_weight: c,
        };
        cfg
    }

    fn weight_errors(cfg: &ChampionSettings) -> usize {
        validate_settings(cfg)
            .iter()
            .filter(|v| v.contains("sum to 1.0"))
            .count()
    }

    #[test]
    fn defaults_are_valid() {
        assert!(validate_settings(&ChampionSettings::default()).is_empty());
        assert!(validate_settings(&OutlierSettings::default()).is_empty());
        assert!(validate_settings(&SegmentSettings::default()).is_empty());
    }

    #[test]
    fn weight_sum_band_is_inclusive() {
        assert_eq!(weight_errors(&weights(0.33, 0.33, 0.33)), 0);
        assert_eq!(weight_errors(&weights(0.4, 0.4, 0.21)), 0);
        assert_eq!(weight_errors(&weights(0.4, 0.4, 0.3)), 1);
        assert_eq!(weight_errors(&weights(0.1, 0.1, 0.1)), 1);
    }

    #[test]
    fn negative_values_and_zero_normalizers_are_reported() {
        let mut cfg = ChampionSettings::default();
        cfg.sales.min_sales = -5.0;
        cfg.balanced.sales_normalizer = 0.0;
        let violations = validate_settings(&cfg);
        assert!(violations.contains(&"sales.minSales must be non-negative".to_string()));
        assert!(violations.contains(&"balanced.salesNormalizer must be greater than zero".to_string()));
        assert_eq!(violations.len(), 2);
    }

    #[test]
    fn nan_thresholds_are_reported() {
        let mut cfg = OutlierSettings::default();
        cfg.engagement.min_z_score = f64::NAN;
        assert_eq!(
            validate_settings(&cfg),
            vec!["engagement.minZScore must be a finite number".to_string()]
        );
    }

    #[test]
    fn z_scores_below_one_are_reported() {
        let mut cfg = OutlierSettings::default();
        cfg.sales.min_z_score = 0.5;
        assert_eq!(
            validate_settings(&cfg),
            vec!["sales.minZScore must be at least 1".to_string()]
        );
        cfg.sales.min_z_score = 1.0;
        assert!(validate_settings(&cfg).is_empty());
    }

    #[test]
    fn update_field_by_path() {
        let mut cfg = ChampionSettings::default();
        cfg.update_field("overall.salesWeight", 0.5).unwrap();
        assert_eq!(cfg.overall.sales_weight, 0.5);
        assert!(matches!(
            cfg.update_field("overall.bogus", 1.0),
            Err(SettingsError::UnknownField(_))
        ));
        assert!(matches!(
            cfg.update_field("overall", 1.0),
            Err(SettingsError::UnknownField(_))
        ));
        assert!(matches!(
            cfg.update_field("overall.salesWeight", f64::INFINITY),
            Err(SettingsError::NotFinite(_))
        ));
    }

    #[test]
    fn load_without_file_returns_defaults() {
        let store = temp_store("missing");
        assert_eq!(store.load::<SegmentSettings>(), SegmentSettings::default());
    }

    #[test]
    fn save_then_load_keeps_other_categories() {
        let store = temp_store("roundtrip");
        let mut champion = ChampionSettings::default();
        champion.sales.min_sales = 250.0;
        store.save(&champion).unwrap();

        let mut segment = SegmentSettings::default();
        segment.tiers.gold.sales = 2500.0;
        store.save(&segment).unwrap();

        assert_eq!(store.load::<ChampionSettings>(), champion);
        assert_eq!(store.load::<SegmentSettings>(), segment);
        let _ = fs::remove_file(store.path());
    }

    #[test]
    fn corrupt_file_falls_back_to_defaults() {
        let store = temp_store("corrupt");
        fs::write(store.path(), "{ not json").unwrap();
        assert_eq!(store.load::<OutlierSettings>(), OutlierSettings::default());
        let _ = fs::remove_file(store.path());
    }

    #[test]
    fn wrong_shape_falls_back_to_defaults() {
        let store = temp_store("shape");
        fs::write(
            store.path(),
            r#"{"advocacy.settings.outlier": {"sales": {"minZScore": "high"}}}"#,
        )
        .unwrap();
        assert_eq!(store.load::<OutlierSettings>(), OutlierSettings::default());
        let _ = fs::remove_file(store.path());
    }

    #[test]
    fn partial_settings_are_backfilled() {
        let store = temp_store("partial");
        fs::write(
            store.path(),
            r#"{"advocacy.settings.segment": {"tiers": {"gold": {"engagement": 15000}}}}"#,
        )
        .unwrap();
        let loaded = store.load::<SegmentSettings>();
        let defaults = SegmentSettings::default();
        assert_eq!(loaded.tiers.gold.engagement, 15000.0);
        assert_eq!(loaded.tiers.gold.sales, defaults.tiers.gold.sales);
        assert_eq!(loaded.activity, defaults.activity);
        let _ = fs::remove_file(store.path());
    }

    #[test]
    fn null_leaves_keep_their_default_only() {
        let store = temp_store("null-leaf");
        fs::write(
            store.path(),
            r#"{"advocacy.settings.segment": {"tiers": {"gold": {"engagement": null, "sales": 2500}, "silver": {"sales": 700}}}}"#,
        )
        .unwrap();
        let loaded = store.load::<SegmentSettings>();
        let defaults = SegmentSettings::default();
        assert_eq!(loaded.tiers.gold.engagement, defaults.tiers.gold.engagement);
        assert_eq!(loaded.tiers.gold.sales, 2500.0);
        assert_eq!(loaded.tiers.silver.sales, 700.0);
        let _ = fs::remove_file(store.path());
    }

    #[test]
    fn reset_persists_defaults() {
        let store = temp_store("reset");
        let mut cfg = ChampionSettings::default();
        cfg.overall.engagement_weight = 0.9;
        store.save(&cfg).unwrap();

        let reset = store.reset::<ChampionSettings>().unwrap();
        assert_eq!(reset, ChampionSettings::default());
        assert_eq!(store.load::<ChampionSettings>(), ChampionSettings::default());
        let _ = fs::remove_file(store.path());
    }

    #[test]
    fn save_does_not_validate() {
        let store = temp_store("unvalidated");
        let cfg = weights(0.9, 0.9, 0.9);
        store.save(&cfg).unwrap();
        assert_eq!(store.load::<ChampionSettings>(), cfg);
        let _ = fs::remove_file(store.path());
    }
}
