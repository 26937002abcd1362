// SPDX-FileCopyrightText: 2025 RAprogramm <andrey.rozanov.vl@gmail.com>
//
// SPDX-License-Identifier: MIT

use std::path::Path;

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use fedidir::{ApiMode, normalize_payload, parse_registry, sanitize_thumbnail};

fn benchmark_sanitize_thumbnail(c: &mut Criterion) {
    let assets = Path::new("/nonexistent-assets-root");

    c.bench_function("sanitize_remote_url", |b| {
        b.iter(|| sanitize_thumbnail(black_box("https://cdn.example.org/thumb.png"), assets))
    });

    c.bench_function("sanitize_rewrite_loop", |b| {
        b.iter(|| sanitize_thumbnail(black_box("/img/img/thumb.png"), assets))
    });
}

fn benchmark_normalize_mastodon(c: &mut Criterion) {
    let payload = serde_json::json!({
        "title": "Example Social",
        "short_description": "A small instance",
        "thumbnail": "https://cdn.example.org/thumb.png",
        "stats": {"user_count": 1200, "status_count": 54000},
        "registrations": true,
        "approval_required": false,
        "contact_account": {"acct": "admin"}
    });

    c.bench_function("normalize_mastodon_payload", |b| {
        b.iter(|| {
            normalize_payload(ApiMode::Mastodon, black_box(payload.clone()))
                .expect("normalization failed")
        })
    });
}

fn benchmark_normalize_misskey(c: &mut Criterion) {
    let payload = serde_json::json!({
        "name": "Misskey Example",
        "description": "Notes and more",
        "bannerUrl": "https://cdn.example.org/banner.webp",
        "disableRegistration": false,
        "originalUsersCount": 300,
        "originalNotesCount": 9000
    });

    c.bench_function("normalize_misskey_payload", |b| {
        b.iter(|| {
            normalize_payload(ApiMode::Misskey, black_box(payload.clone()))
                .expect("normalization failed")
        })
    });
}

fn benchmark_parse_registry(c: &mut Criterion) {
    let mut yaml = String::from("instances:\n");
    for i in 0..100 {
        yaml.push_str(&format!(
            "  - host: instance{i}.example.org\n    mode: mastodon\n    failures: {}\n",
            i % 5
        ));
    }

    c.bench_function("parse_100_instances", |b| {
        b.iter(|| parse_registry(black_box(&yaml)).expect("parse failed"))
    });
}

criterion_group!(
    benches,
    benchmark_sanitize_thumbnail,
    benchmark_normalize_mastodon,
    benchmark_normalize_misskey,
    benchmark_parse_registry
);
criterion_main!(benches);
