use criterion::{black_box, criterion_group, criterion_main, Criterion};

use markscan_core::matcher::{match_all, match_id};

fn roster(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("{:08}", 10_000_000 + i * 7919)).collect()
}

/// Recognized IDs with one corrupted character every third entry.
fn recognized(roster: &[String]) -> Vec<String> {
    roster
        .iter()
        .enumerate()
        .map(|(i, id)| {
            if i % 3 == 0 {
                let mut chars: Vec<char> = id.chars().collect();
                chars[i % 8] = 'X';
                chars.into_iter().collect()
            } else {
                id.clone()
            }
        })
        .collect()
}

fn bench_match(c: &mut Criterion) {
    let mut group = c.benchmark_group("match");

    for n in [30usize, 120, 400] {
        let ids = roster(n);
        let scans = recognized(&ids);

        group.bench_function(format!("single_exact_{n}"), |b| {
            b.iter(|| match_id(black_box(&ids[n / 2]), black_box(&ids), 100.0))
        });
        group.bench_function(format!("single_fuzzy_{n}"), |b| {
            b.iter(|| match_id(black_box(&scans[0]), black_box(&ids), 80.0))
        });
        group.bench_function(format!("batch_{n}"), |b| {
            b.iter(|| match_all(black_box(&scans), black_box(&ids), 80.0))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_match);
criterion_main!(benches);
