use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use keywatch::{
    matches_all, ChangeFeedMirror, ChannelRef, Commands, InMemoryStores, InboundEvent, KeywordWatcher,
    MatchEngine, MirrorConfig, SystemClock,
};

const MESSAGE: &str = "Deploy of build 4821 to PRODUCTION failed: disk quota exceeded on node-7, rolling back";

fn make_mirror(records_per_channel: usize) -> (Arc<ChangeFeedMirror>, Arc<keywatch::InMemoryPingStore>) {
    let stores = InMemoryStores::new();
    let keywords = Arc::new(stores.keywords);
    let clock = Arc::new(SystemClock);
    let commands = Commands::new(keywords.clone(), clock.clone(), 10);

    // 8 channels; most records on the hot channel never match.
    for channel in 0..8 {
        for i in 0..records_per_channel {
            let text = format!("token{i} quota");
            commands
                .add_record(&text, ChannelRef::new(format!("c{channel}"), "bench"), 0)
                .unwrap();
        }
    }
    commands
        .add_record("deploy failed production", ChannelRef::new("c0", "bench"), 0)
        .unwrap();

    let mirror = Arc::new(ChangeFeedMirror::new(keywords, clock, MirrorConfig::default()));
    mirror.initialize().unwrap();
    // Mark synced without a worker thread.
    mirror
        .apply(&keywatch::FeedMessage::new("/", None))
        .unwrap();
    (mirror, Arc::new(stores.pings))
}

fn bench_matches_all(c: &mut Criterion) {
    let keywords: Vec<String> = ["deploy", "failed", "production"].iter().map(|s| (*s).to_string()).collect();
    c.bench_function("matching/matches_all_hit", |b| {
        b.iter(|| matches_all(black_box(&keywords), black_box(MESSAGE)));
    });

    let miss: Vec<String> = ["deploy", "succeeded"].iter().map(|s| (*s).to_string()).collect();
    c.bench_function("matching/matches_all_miss", |b| {
        b.iter(|| matches_all(black_box(&miss), black_box(MESSAGE)));
    });
}

fn bench_snapshot_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("matching/snapshot_scan");
    for per_channel in [16usize, 256] {
        let (mirror, _) = make_mirror(per_channel);
        let snapshot = mirror.snapshot().unwrap();
        group.throughput(Throughput::Elements((per_channel * 8 + 1) as u64));
        group.bench_function(format!("{per_channel}_per_channel"), |b| {
            b.iter(|| MatchEngine::matches_in(black_box(&snapshot), "c0", black_box(MESSAGE)));
        });
    }
    group.finish();
}

fn bench_handle_event(c: &mut Criterion) {
    let (mirror, pings) = make_mirror(64);
    let (sink, alerts) = keywatch::ChannelSink::new(1 << 16);
    let watcher = KeywordWatcher::new(mirror, pings, Arc::new(sink), Arc::new(SystemClock));
    let event = InboundEvent::new("c0", MESSAGE);

    c.bench_function("matching/handle_event", |b| {
        b.iter(|| {
            let outcome = watcher.handle_event(black_box(&event));
            // Keep the sink from filling up.
            while alerts.try_recv().is_ok() {}
            outcome
        });
    });
}

criterion_group!(benches, bench_matches_all, bench_snapshot_scan, bench_handle_event);
criterion_main!(benches);
