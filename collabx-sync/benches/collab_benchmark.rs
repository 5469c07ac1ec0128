use std::hint::black_box;
use std::net::SocketAddr;
use std::sync::Arc;

use collabx_sync::broadcast::{BroadcastGroup, Join, RoomManager};
use collabx_sync::ReconnectPolicy;
use criterion::{criterion_group, criterion_main, Criterion};
use uuid::Uuid;

fn addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8000))
}

fn bench_broadcast_100_members(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("broadcast_100_members", |b| {
        b.iter(|| {
            rt.block_on(async {
                let group = BroadcastGroup::new(1024);

                let mut receivers = Vec::new();
                for _ in 0..100 {
                    receivers.push(group.add_member(Uuid::new_v4(), addr()).await);
                }

                let count = group.broadcast(Uuid::nil(), black_box(Arc::new(vec![0u8; 64])));
                black_box(count);
            });
        })
    });
}

fn bench_broadcast_1000_frames(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("broadcast_1000_frames_100_members", |b| {
        b.iter(|| {
            rt.block_on(async {
                let group = BroadcastGroup::new(2048);

                let mut receivers = Vec::new();
                for _ in 0..100 {
                    receivers.push(group.add_member(Uuid::new_v4(), addr()).await);
                }

                let sender = Uuid::new_v4();
                for i in 0..1000u64 {
                    let data = Arc::new(vec![i as u8; 64]);
                    group.broadcast(sender, black_box(data));
                }
            });
        })
    });
}

fn bench_room_join_leave(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let manager = RoomManager::new(256, 100);

    c.bench_function("room_join_leave", |b| {
        b.iter(|| {
            rt.block_on(async {
                let id = Uuid::new_v4();
                if let Join::Joined { receiver, .. } = manager.join("bench", id, addr()).await {
                    black_box(receiver);
                }
                black_box(manager.leave("bench", &id).await);
            });
        })
    });
}

fn bench_backoff_schedule(c: &mut Criterion) {
    let policy = ReconnectPolicy::default();

    c.bench_function("backoff_schedule", |b| {
        b.iter(|| {
            for attempt in 1..=6 {
                black_box(policy.delay_for(black_box(attempt)));
            }
        })
    });
}

criterion_group!(
    benches,
    bench_broadcast_100_members,
    bench_broadcast_1000_frames,
    bench_room_join_leave,
    bench_backoff_schedule,
);
criterion_main!(benches);
