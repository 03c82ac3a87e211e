use std::time::Duration;

use async_trait::async_trait;
use clap::ValueEnum;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::batch::{self, FetchError, PageSource, ReconcileError};
use crate::classify::{Classifier, OutlierKind};
use crate::models::{fields, MetricRecord};

/// Datasets the dashboard lists, each bound to one upstream endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Dataset {
    Accounts,
    ActivitySegments,
    Champions,
    SalesChampions,
    EngagementChampions,
    BalancedChampions,
    SalesOutliers,
    EngagementOutliers,
    EfficientConverters,
    Brands,
}

/// Ranking the champions endpoint applies, sent as `champion_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChampionType {
    Overall,
    Sales,
    Engagement,
    Balanced,
}

impl ChampionType {
    pub fn as_param(self) -> &'static str {
        match self {
            ChampionType::Overall => "overall",
            ChampionType::Sales => "sales",
            ChampionType::Engagement => "engagement",
            ChampionType::Balanced => "balanced",
        }
    }
}

/// Upstream contract for one listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint {
    pub path: &'static str,
    pub count_path: Option<&'static str>,
    /// Server-enforced maximum `limit`.
    pub batch_size: usize,
}

impl Dataset {
    pub fn endpoint(self) -> Endpoint {
        match self {
            Dataset::Accounts => Endpoint {
                path: "/api/v1/analytics/top-accounts",
                count_path: Some("/api/v1/analytics/top-accounts/count"),
                batch_size: 1000,
            },
            Dataset::ActivitySegments => Endpoint {
                path: "/api/v1/analytics/segments/activity-based",
                count_path: Some("/api/v1/analytics/segments/activity-based/count"),
                batch_size: 500,
            },
            Dataset::EngagementOutliers => Endpoint {
                path: "/api/v1/analytics/outliers/engagement",
                count_path: None,
                batch_size: 200,
            },
            Dataset::SalesOutliers => Endpoint {
                path: "/api/v1/analytics/outliers/sales",
                count_path: None,
                batch_size: 100,
            },
            Dataset::EfficientConverters => Endpoint {
                path: "/api/v1/analytics/patterns/efficient-converters",
                count_path: None,
                batch_size: 100,
            },
            Dataset::Champions
            | Dataset::SalesChampions
            | Dataset::EngagementChampions
            | Dataset::BalancedChampions => Endpoint {
                path: "/api/v1/analytics/champions",
                count_path: None,
                batch_size: 100,
            },
            Dataset::Brands => Endpoint {
                path: "/api/v1/analytics/brands",
                count_path: None,
                batch_size: 10_000,
            },
        }
    }

    pub fn champion_type(self) -> Option<ChampionType> {
        match self {
            Dataset::Champions => Some(ChampionType::Overall),
            Dataset::SalesChampions => Some(ChampionType::Sales),
            Dataset::EngagementChampions => Some(ChampionType::Engagement),
            Dataset::BalancedChampions => Some(ChampionType::Balanced),
            _ => None,
        }
    }

    /// Rows describe advocate accounts and take classification labels.
    pub fn per_advocate(self) -> bool {
        !matches!(self, Dataset::Brands)
    }

    /// File stem used for exports.
    pub fn slug(self) -> &'static str {
        match self {
            Dataset::Accounts => "accounts",
            Dataset::ActivitySegments => "activity_segments",
            Dataset::Champions => "champions",
            Dataset::SalesChampions => "sales_champions",
            Dataset::EngagementChampions => "engagement_champions",
            Dataset::BalancedChampions => "balanced_champions",
            Dataset::SalesOutliers => "sales_outliers",
            Dataset::EngagementOutliers => "engagement_outliers",
            Dataset::EfficientConverters => "efficient_converters",
            Dataset::Brands => "brands",
        }
    }

    /// Fields free-text search looks at.
    pub fn search_fields(self) -> &'static [&'static str] {
        match self {
            Dataset::Accounts => &["user_names", "email", "instagram_handles", "tiktok_handles"],
            Dataset::SalesOutliers | Dataset::EngagementOutliers => {
                &["advocate_user_name", "account_email", "brand"]
            }
            Dataset::Brands => &["brand"],
            _ => &["user_names", "email"],
        }
    }

    /// Threshold parameters the endpoint accepts, rendered from stored settings.
    pub fn query_params(self, classifier: &Classifier) -> Vec<(&'static str, String)> {
        let outlier = &classifier.outlier;
        if let Some(kind) = self.champion_type() {
            let mut params = vec![("champion_type", kind.as_param().to_string())];
            params.extend(classifier.champion.query_params());
            return params;
        }
        match self {
            Dataset::SalesOutliers => vec![("min_z_score", outlier.sales.min_z_score.to_string())],
            Dataset::EngagementOutliers => {
                vec![("min_z_score", outlier.engagement.min_z_score.to_string())]
            }
            Dataset::EfficientConverters => {
                let t = &outlier.efficient_converters;
                vec![
                    ("min_sales", t.min_sales.to_string()),
                    ("max_engagement", t.max_engagement.to_string()),
                    ("min_efficiency", t.min_efficiency.to_string()),
                ]
            }
            Dataset::Brands => vec![("order_by", fields::SALES.to_string())],
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CountResponse {
    total: usize,
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: String,
    http: reqwest::Client,
}

impl ApiClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, FetchError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, ?params, "GET");
        let response = self
            .http
            .get(&url)
            .query(params)
            .send()
            .await
            .map_err(|source| FetchError::Transport {
                url: url.clone(),
                source,
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url,
                status: status.as_u16(),
            });
        }
        response
            .json::<T>()
            .await
            .map_err(|err| FetchError::Payload {
                url,
                reason: err.to_string(),
            })
    }

    pub fn source(&self, dataset: Dataset, params: Vec<(&'static str, String)>) -> EndpointSource<'_> {
        EndpointSource {
            client: self,
            endpoint: dataset.endpoint(),
            params,
        }
    }

    #[instrument(skip_all, fields(dataset = dataset.slug()))]
    pub async fn fetch_dataset(
        &self,
        dataset: Dataset,
        classifier: &Classifier,
    ) -> Result<Vec<MetricRecord>, ReconcileError> {
        let source = self.source(dataset, dataset.query_params(classifier));
        load_dataset(&source, dataset, classifier).await
    }
}

/// Full dataset from `source`: batched through the count query when the
/// endpoint has one, otherwise a single request at the endpoint cap. Outlier
/// and converter rows are then re-checked against the local thresholds.
pub async fn load_dataset<S>(
    source: &S,
    dataset: Dataset,
    classifier: &Classifier,
) -> Result<Vec<MetricRecord>, ReconcileError>
where
    S: PageSource + ?Sized,
{
    let endpoint = dataset.endpoint();
    let mut records = match endpoint.count_path {
        Some(_) => batch::fetch_all(source, endpoint.batch_size).await?,
        None => source
            .page(0, endpoint.batch_size)
            .await
            .map_err(|err| ReconcileError::Batch {
                offset: 0,
                source: err,
            })?,
    };

    match dataset {
        Dataset::SalesOutliers => classifier.retain_outliers(&mut records, OutlierKind::Sales),
        Dataset::EngagementOutliers => {
            classifier.retain_outliers(&mut records, OutlierKind::Engagement)
        }
        Dataset::EfficientConverters => classifier.retain_efficient_converters(&mut records),
        _ => {}
    }
    Ok(records)
}

/// One endpoint plus fixed query parameters, paged by `limit`/`offset`.
pub struct EndpointSource<'a> {
    client: &'a ApiClient,
    endpoint: Endpoint,
    params: Vec<(&'static str, String)>,
}

#[async_trait]
impl PageSource for EndpointSource<'_> {
    async fn count(&self) -> Result<usize, FetchError> {
        let Some(count_path) = self.endpoint.count_path else {
            return Ok(self.endpoint.batch_size);
        };
        let response: CountResponse = self.client.get_json(count_path, &self.params).await?;
        Ok(response.total)
    }

    async fn page(&self, offset: usize, limit: usize) -> Result<Vec<MetricRecord>, FetchError> {
        let params = self.page_params(offset, limit);
        self.client.get_json(self.endpoint.path, &params).await
    }
}

impl EndpointSource<'_> {
    /// Fixed parameters plus `limit`; `offset` only where the endpoint pages.
    fn page_params(&self, offset: usize, limit: usize) -> Vec<(&'static str, String)> {
        let mut params = self.params.clone();
        params.push(("limit", limit.to_string()));
        if self.endpoint.count_path.is_some() {
            params.push(("offset", offset.to_string()));
        }
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::record;
    use serde_json::json;
    use std::sync::Mutex;

    struct FixedSource {
        rows: Vec<MetricRecord>,
        calls: Mutex<Vec<(usize, usize)>>,
    }

    impl FixedSource {
        fn new(rows: Vec<MetricRecord>) -> Self {
            Self {
                rows,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl PageSource for FixedSource {
        async fn count(&self) -> Result<usize, FetchError> {
            Ok(self.rows.len())
        }

        async fn page(&self, offset: usize, limit: usize) -> Result<Vec<MetricRecord>, FetchError> {
            self.calls.lock().unwrap().push((offset, limit));
            let end = (offset + limit).min(self.rows.len());
            Ok(self.rows[offset.min(end)..end].to_vec())
        }
    }

    fn client() -> ApiClient {
        ApiClient::new("http://localhost:8000", Duration::from_secs(1)).unwrap()
    }

    #[test]
    fn counted_endpoints_have_caps() {
        for dataset in Dataset::value_variants() {
            let endpoint = dataset.endpoint();
            assert!(endpoint.batch_size > 0);
            assert!(endpoint.path.starts_with("/api/v1/"));
        }
        assert_eq!(Dataset::Accounts.endpoint().batch_size, 1000);
        assert_eq!(Dataset::ActivitySegments.endpoint().batch_size, 500);
        assert!(Dataset::Champions.endpoint().count_path.is_none());
        assert!(Dataset::Brands.endpoint().count_path.is_none());
        assert!(!Dataset::Brands.per_advocate());
        assert!(Dataset::EngagementChampions.per_advocate());
    }

    #[test]
    fn outlier_params_follow_settings() {
        let mut classifier = Classifier::default();
        classifier.outlier.sales.min_z_score = 2.5;
        assert_eq!(
            Dataset::SalesOutliers.query_params(&classifier),
            vec![("min_z_score", "2.5".to_string())]
        );
        assert!(Dataset::Accounts.query_params(&classifier).is_empty());
    }

    #[test]
    fn champion_datasets_send_their_ranking() {
        let classifier = Classifier::default();
        for (dataset, expected) in [
            (Dataset::Champions, "overall"),
            (Dataset::SalesChampions, "sales"),
            (Dataset::EngagementChampions, "engagement"),
            (Dataset::BalancedChampions, "balanced"),
        ] {
            let params = dataset.query_params(&classifier);
            assert_eq!(params[0], ("champion_type", expected.to_string()));
            assert_eq!(params.len(), 14);
            assert_eq!(dataset.endpoint(), Dataset::Champions.endpoint());
        }
        assert_eq!(
            Dataset::Brands.query_params(&classifier),
            vec![("order_by", "total_sales".to_string())]
        );
    }

    #[test]
    fn offset_is_sent_only_to_counted_endpoints() {
        let client = client();
        let counted = client.source(Dataset::Accounts, Vec::new());
        assert_eq!(
            counted.page_params(2000, 1000),
            vec![("limit", "1000".to_string()), ("offset", "2000".to_string())]
        );

        let capped = client.source(Dataset::SalesOutliers, vec![("min_z_score", "2".to_string())]);
        assert_eq!(
            capped.page_params(0, 100),
            vec![("min_z_score", "2".to_string()), ("limit", "100".to_string())]
        );
    }

    #[tokio::test]
    async fn capped_endpoints_take_one_request() {
        let source = FixedSource::new((0..40).map(|i| record(json!({ "id": i }))).collect());
        let rows = load_dataset(&source, Dataset::Brands, &Classifier::default())
            .await
            .unwrap();
        assert_eq!(rows.len(), 40);
        assert_eq!(*source.calls.lock().unwrap(), vec![(0, 10_000)]);
    }

    #[tokio::test]
    async fn counted_endpoints_are_batched() {
        let source = FixedSource::new((0..1200).map(|i| record(json!({ "id": i }))).collect());
        let rows = load_dataset(&source, Dataset::ActivitySegments, &Classifier::default())
            .await
            .unwrap();
        assert_eq!(rows.len(), 1200);
        let mut calls = source.calls.lock().unwrap().clone();
        calls.sort();
        assert_eq!(calls, vec![(0, 500), (500, 500), (1000, 200)]);
    }

    #[tokio::test]
    async fn outlier_rows_are_rechecked_locally() {
        let source = FixedSource::new(vec![
            record(json!({ "id": 1, "z_score": 2.4 })),
            record(json!({ "id": 2, "z_score": -3.1 })),
            record(json!({ "id": 3, "z_score": 1.2 })),
            record(json!({ "id": 4, "z_score": null })),
        ]);
        let rows = load_dataset(&source, Dataset::SalesOutliers, &Classifier::default())
            .await
            .unwrap();
        let ids: Vec<f64> = rows.iter().map(|r| r.number("id")).collect();
        assert_eq!(ids, vec![1.0, 2.0]);
    }

    #[test]
    fn base_url_drops_trailing_slash() {
        let client = ApiClient::new("http://localhost:8000/", Duration::from_secs(1)).unwrap();
        assert_eq!(client.base_url, "http://localhost:8000");
    }
}
