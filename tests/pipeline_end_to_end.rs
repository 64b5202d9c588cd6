//! End-to-end site run with one healthy and one failing target

mod common;

use affiliate_ingest::application::IngestService;
use affiliate_ingest::domain::{ProductSource, RawCandidate, RunOutcome, RunPhase};
use affiliate_ingest::infrastructure::retry_manager::RetryPolicy;
use common::*;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const HEALTHY: &str = "https://shop.example/list/1";
const BROKEN: &str = "https://shop.example/list/2";

fn healthy_candidates() -> Vec<RawCandidate> {
    let missing_price = RawCandidate {
        price_text: None,
        ..candidate(3, "Home Office")
    };
    vec![candidate(1, "Home Office"), candidate(2, "Home Office"), missing_price]
}

#[tokio::test]
async fn partial_failure_publishes_healthy_target_and_replaces_state() {
    let dir = TempDir::new().unwrap();
    let extractor = Arc::new(ScriptedExtractor::new(vec![
        (HEALTHY, Script::Candidates(healthy_candidates())),
        (BROKEN, Script::AlwaysTimeout),
    ]));
    let ctx = context(&dir, Arc::clone(&extractor));
    ctx.state_store.commit(&previous_state(10)).await.unwrap();
    let service = IngestService::new(Arc::new(ctx));

    let result = service.run_site(&site(&dir, &[HEALTHY, BROKEN])).await;

    assert_eq!(result.outcome, RunOutcome::Degraded);
    assert_eq!(result.source, Some(ProductSource::Partial));
    assert_eq!(result.final_phase(), Some(RunPhase::Degraded));
    assert!(result.phases.contains(&RunPhase::Writing));
    assert_eq!(result.products_published, 2);

    let stats = &result.statistics;
    assert_eq!(stats.targets_attempted, 2);
    assert_eq!(stats.targets_succeeded, 1);
    assert_eq!(stats.targets_failed, 1);
    assert_eq!(stats.candidates_extracted, 3);
    assert_eq!(stats.products_accepted, 2);
    assert_eq!(stats.products_rejected, 1);
    assert_eq!(stats.rejection_reasons.get("missing_price"), Some(&1));
    assert!((stats.average_quality_score - 1.0).abs() < 1e-9);

    // one attempt plus three retries
    assert_eq!(extractor.calls(BROKEN), 4);
    assert_eq!(extractor.calls(HEALTHY), 1);

    let output = read_output(&site(&dir, &[]).output_path);
    let slugs: Vec<_> = output.products.iter().map(|p| p.slug.as_str()).collect();
    assert_eq!(slugs, ["fresh-product-1", "fresh-product-2"]);
    assert_eq!(output.total_products, 2);
    assert_eq!(output.source, ProductSource::Partial);
    assert!(output.products.iter().all(|p| !p.slug.starts_with("old-")));

    let state = service.context().state_store.peek(SITE).await.unwrap().unwrap();
    assert_eq!(state.products, output.products);
    assert_eq!(state.consecutive_failures, 0);
}

#[tokio::test]
async fn successful_run_republishes_images_and_completes() {
    let dir = TempDir::new().unwrap();
    let extractor = Arc::new(ScriptedExtractor::new(vec![(
        HEALTHY,
        Script::Candidates(vec![candidate(1, "Home Office"), candidate(2, "Home Office")]),
    )]));
    let service = IngestService::new(Arc::new(context(&dir, extractor)));

    let result = service.run_site(&site(&dir, &[HEALTHY])).await;

    assert_eq!(result.outcome, RunOutcome::Success);
    assert_eq!(result.final_phase(), Some(RunPhase::Complete));
    assert_eq!(
        result.phases,
        vec![
            RunPhase::Pending,
            RunPhase::Extracting,
            RunPhase::Validating,
            RunPhase::ImageProcessing,
            RunPhase::Merging,
            RunPhase::Writing,
            RunPhase::Complete,
        ]
    );
    assert_eq!(result.statistics.images_republished, 2);

    let output = read_output(&site(&dir, &[]).output_path);
    for product in &output.products {
        let url = product.image_url.as_str();
        assert!(url.starts_with("https://deals.example.com/images/products/home-office/"), "{url}");
        assert!(url.ends_with(".png"));
    }
    assert!(dir.path().join("public/images/products/home-office").is_dir());
    assert_eq!(result.output_path.as_deref(), Some(site(&dir, &[]).output_path.as_path()));
}

#[tokio::test]
async fn concurrent_sites_do_not_affect_each_other() {
    let dir = TempDir::new().unwrap();
    let extractor = Arc::new(ScriptedExtractor::new(vec![
        (HEALTHY, Script::Candidates(vec![candidate(1, "Home Office")])),
        (BROKEN, Script::AlwaysTimeout),
    ]));
    let service = IngestService::new(Arc::new(context(&dir, extractor)));

    let good = site(&dir, &[HEALTHY]);
    let mut bad = site(&dir, &[BROKEN]);
    bad.site_name = "outlet".into();
    bad.output_path = dir.path().join("public/outlet.json");

    let results = service.run_sites(vec![good, bad]).await;
    assert_eq!(results[0].site_name, SITE);
    assert_eq!(results[0].outcome, RunOutcome::Success);
    assert_eq!(results[1].site_name, "outlet");
    assert_eq!(results[1].outcome, RunOutcome::Degraded);
    assert_eq!(results[1].source, Some(ProductSource::Empty));
    assert!(!dir.path().join("public/outlet.json").exists());
}

#[tokio::test(start_paused = true)]
async fn target_timeout_fails_only_that_target() {
    let dir = TempDir::new().unwrap();
    let extractor = Arc::new(ScriptedExtractor::new(vec![
        (BROKEN, Script::AlwaysTimeout),
        (HEALTHY, Script::Candidates(vec![candidate(1, "Home Office")])),
    ]));
    let mut ctx = context(&dir, Arc::clone(&extractor));
    ctx.settings.retry = RetryPolicy::new(3, Duration::from_secs(10), Duration::from_secs(10));
    ctx.settings.target_timeout = Duration::from_secs(1);
    ctx.settings.images.enabled = false;
    let service = IngestService::new(Arc::new(ctx));

    let result = service.run_site(&site(&dir, &[BROKEN, HEALTHY])).await;

    // the first backoff outlasts the timeout, so no retry starts
    assert_eq!(extractor.calls(BROKEN), 1);
    assert_eq!(extractor.calls(HEALTHY), 1);
    assert_eq!(result.outcome, RunOutcome::Degraded);
    assert_eq!(result.source, Some(ProductSource::Partial));
    assert_eq!(result.statistics.targets_failed, 1);
    assert_eq!(result.statistics.targets_succeeded, 1);
    assert_eq!(result.statistics.products_accepted, 1);
    assert_eq!(read_output(&site(&dir, &[]).output_path).products.len(), 1);
}
