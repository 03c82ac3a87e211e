//! Client-side analytics for advocate and brand performance data: batch
//! reconciliation against capped API pages, threshold-driven classification,
//! filter/sort/paginate over the assembled dataset, and CSV export.

pub mod api;
pub mod batch;
pub mod classify;
pub mod config;
pub mod export;
pub mod models;
pub mod pipeline;
pub mod report;
pub mod settings;
