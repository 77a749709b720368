use std::{hint::black_box, time::Duration};

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use s3io::multipart::{PartPlan, PartSizing};

fn client(addressing: s3io::AddressingStyle, version: s3io::SignatureVersion) -> s3io::Client {
    let creds = s3io::Credentials::new("AKIDEXAMPLE", "SECRETKEYEXAMPLE")
        .expect("static credentials must be valid");

    s3io::Client::builder("https://s3.example.com")
        .expect("endpoint must be valid")
        .region("us-east-1")
        .auth(s3io::Auth::Static(creds))
        .addressing_style(addressing)
        .signature_version(version)
        .build()
        .expect("client must build")
}

fn bench_presign(c: &mut Criterion) {
    let bucket = "my-bucket";
    let key = "a/b/c/object.txt";

    let mut group = c.benchmark_group("presign");
    group.measurement_time(Duration::from_secs(3));

    for (label, version) in [
        ("v4", s3io::SignatureVersion::V4),
        ("v2", s3io::SignatureVersion::V2),
    ] {
        let path = client(s3io::AddressingStyle::Path, version);
        let virtual_hosted = client(s3io::AddressingStyle::VirtualHosted, version);

        for (style, client) in [("path", &path), ("virtual", &virtual_hosted)] {
            group.bench_function(BenchmarkId::new(format!("get_{label}"), style), |b| {
                b.iter(|| {
                    let req = client
                        .objects()
                        .presign_get(black_box(bucket), black_box(key))
                        .build()
                        .expect("presign must succeed");
                    black_box(req);
                });
            });
        }

        group.bench_function(BenchmarkId::new(format!("put_{label}"), "headers"), |b| {
            let ct = http::HeaderValue::from_static("application/octet-stream");
            b.iter(|| {
                let req = path
                    .objects()
                    .presign_put(black_box(bucket), black_box(key))
                    .expires_in(Duration::from_secs(60))
                    .header(http::header::CONTENT_TYPE, ct.clone())
                    .metadata("m1", "v1")
                    .query_param("response-content-disposition", "attachment")
                    .build()
                    .expect("presign must succeed");
                black_box(req);
            });
        });
    }

    group.finish();
}

fn bench_part_plan(c: &mut Criterion) {
    let mut group = c.benchmark_group("part_plan");
    group.measurement_time(Duration::from_secs(3));

    for total in [0u64, 11 << 20, 1 << 40] {
        group.bench_with_input(BenchmarkId::new("plan", total), &total, |b, &total| {
            b.iter(|| {
                let plan = PartPlan::new(Some(black_box(total)), PartSizing::default())
                    .expect("plan must succeed");
                let count = plan.part_count().unwrap_or(0);
                let total: u64 = (1..=count)
                    .filter_map(|n| plan.part(n).ok())
                    .map(|p| p.length)
                    .sum();
                black_box(total);
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_presign, bench_part_plan);
criterion_main!(benches);
