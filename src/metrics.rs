use metrics::{describe_counter, describe_histogram};

/// Register metric descriptions with whatever recorder the host installed.
///
/// Metrics exposed:
/// - Counters: searches run, articles ingested/skipped, scores computed,
///   remote retries, errors by type
/// - Histograms: ingest, scoring, clustering, and embedding durations
pub fn register_metric_descriptions() {
    describe_counter!(
        "primetime_searches_total",
        "Total number of searches executed"
    );

    describe_counter!(
        "primetime_articles_ingested_total",
        "Total number of articles upserted and linked during ingestion"
    );

    describe_counter!(
        "primetime_articles_skipped_total",
        "Total number of articles dropped during ingestion due to per-article failures"
    );

    describe_counter!(
        "primetime_scores_computed_total",
        "Total number of opportunity scores persisted"
    );

    describe_counter!(
        "primetime_remote_retries_total",
        "Total number of retried remote adapter calls"
    );

    describe_counter!("primetime_errors_total", "Total number of errors by type");

    describe_histogram!(
        "primetime_ingest_duration_seconds",
        metrics::Unit::Seconds,
        "Time to run one search end to end, excluding background scoring"
    );

    describe_histogram!(
        "primetime_scoring_duration_seconds",
        metrics::Unit::Seconds,
        "Time to compute and persist one opportunity score"
    );

    describe_histogram!(
        "primetime_clustering_duration_seconds",
        metrics::Unit::Seconds,
        "Time for one full clustering pass over the vector population"
    );

    describe_histogram!(
        "primetime_embedding_duration_seconds",
        metrics::Unit::Seconds,
        "Time to embed one article"
    );
}

/// Record an error with a type label.
pub fn record_error(error_type: &str) {
    metrics::counter!(
        "primetime_errors_total",
        "error_type" => error_type.to_string()
    )
    .increment(1);
}
