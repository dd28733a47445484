use concord_core::{topic_matches, TopicPattern};
use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;

const TOPICS: &[&str] = &[
    "goal.created",
    "goal.status_changed",
    "task.assigned",
    "browser.tab.url",
    "browser.tab.history.back",
    "agent.planner.inbox.depth",
];

fn bench_compiled_patterns(c: &mut Criterion) {
    let patterns: Vec<TopicPattern> = ["goal.*", "browser.**", "*.tab.**", "agent.**.depth"]
        .iter()
        .map(|p| TopicPattern::new(p))
        .collect();

    c.bench_function("pattern/compiled_match", |b| {
        b.iter(|| {
            let mut hits = 0usize;
            for pattern in &patterns {
                for topic in TOPICS {
                    if pattern.matches(black_box(topic)) {
                        hits += 1;
                    }
                }
            }
            black_box(hits);
        });
    });
}

fn bench_adhoc_patterns(c: &mut Criterion) {
    c.bench_function("pattern/adhoc_match", |b| {
        b.iter(|| {
            let mut hits = 0usize;
            for topic in TOPICS {
                if topic_matches(black_box("**.url"), black_box(topic)) {
                    hits += 1;
                }
            }
            black_box(hits);
        });
    });
}

criterion_group!(benches, bench_compiled_patterns, bench_adhoc_patterns);
criterion_main!(benches);
