//! 검증 단계 성능 벤치마크
//!
//! Candidate scoring plus slug claiming for a realistic listing batch.

use affiliate_ingest::application::{ValidationSettings, Validator};
use affiliate_ingest::domain::{AffiliateRule, RawCandidate, derive_slug};
use criterion::{Criterion, black_box, criterion_group, criterion_main};
use regex::Regex;

fn candidates(n: usize) -> Vec<RawCandidate> {
    (0..n)
        .map(|i| {
            let raw = RawCandidate::new("amazon", "Home Office", "https://www.amazon.com/s?k=desk")
                .with_title(format!("Adjustable Standing Desk Converter {}", i % 40))
                .with_price(format!("${}.99", 100 + i % 50))
                .with_image(format!("https://m.media-amazon.com/images/I/{i}.jpg"));
            if i % 5 == 0 {
                raw
            } else {
                raw.with_affiliate(format!("https://www.amazon.com/dp/B0{i:08}?tag=deals-20"))
            }
        })
        .collect()
}

fn bench_validation(c: &mut Criterion) {
    let rule = AffiliateRule::new(
        Regex::new(r"(^|\.)amazon\.(com|co\.[a-z]{2}|com\.[a-z]{2}|[a-z]{2})$").unwrap(),
        "tag",
    );
    let batch = candidates(200);

    c.bench_function("validate_200_candidates", |b| {
        b.iter(|| {
            let mut validator = Validator::new(ValidationSettings::default());
            for raw in batch.iter().cloned() {
                black_box(validator.validate(raw, &rule));
            }
        });
    });

    c.bench_function("derive_slug", |b| {
        b.iter(|| {
            derive_slug(
                black_box("Ergonomic Mesh Office Chair with Lumbar Support & Adjustable Armrests"),
                black_box("Home Office"),
                50,
            )
        });
    });
}

criterion_group!(benches, bench_validation);
criterion_main!(benches);
