use std::hint::black_box;

use collabx_core::{diff, EditOrigin, Frame, SharedDocument, TextTarget};
use criterion::{criterion_group, criterion_main, Criterion, Throughput};

fn paragraph(words: usize) -> String {
    (0..words)
        .map(|i| format!("word{i}"))
        .collect::<Vec<_>>()
        .join(" ")
}

fn bench_diff(c: &mut Criterion) {
    let mut group = c.benchmark_group("Diff");
    group.throughput(Throughput::Elements(1));

    let old = paragraph(2_000);
    let mut new = old.clone();
    new.insert_str(old.len() / 2, "typed ");

    group.bench_function("single_insert_10k_chars", |b| {
        b.iter(|| black_box(diff(black_box(&old), black_box(&new))))
    });

    group.bench_function("identical_10k_chars", |b| {
        b.iter(|| black_box(diff(black_box(&old), black_box(&old))))
    });

    group.finish();
}

fn bench_document(c: &mut Criterion) {
    let mut group = c.benchmark_group("Document");
    group.throughput(Throughput::Elements(1));

    group.bench_function("local_keystroke", |b| {
        // Typing into an ever-growing document
        let mut doc = SharedDocument::new("bench");
        let mut text = String::new();
        b.iter(|| {
            let before = text.clone();
            text.push('x');
            let edit = diff(&before, &text).unwrap();
            let event = doc
                .edit_text(&TextTarget::Main, &edit, EditOrigin::Local)
                .unwrap();
            black_box(event);
        })
    });

    let mut source = SharedDocument::new("bench");
    let edit = diff("", &paragraph(500)).unwrap();
    let update = source
        .edit_text(&TextTarget::Main, &edit, EditOrigin::Local)
        .unwrap()
        .update;

    group.bench_function("apply_remote_update", |b| {
        let mut dest = SharedDocument::new("bench");
        b.iter(|| {
            dest.apply_update(black_box(&update), EditOrigin::Remote)
                .unwrap();
        })
    });

    group.finish();
}

fn bench_frames(c: &mut Criterion) {
    let mut group = c.benchmark_group("Frames");

    let mut doc = SharedDocument::new("bench");
    let edit = diff("", &paragraph(5_000)).unwrap();
    doc.edit_text(&TextTarget::Main, &edit, EditOrigin::Local)
        .unwrap();
    let state = doc.encode_state();
    group.throughput(Throughput::Bytes(state.len() as u64));

    group.bench_function("snapshot_encode", |b| {
        b.iter(|| black_box(Frame::snapshot(state.clone()).encode().unwrap()))
    });

    let encoded = Frame::snapshot(state.clone()).encode().unwrap();
    group.bench_function("snapshot_decode", |b| {
        b.iter(|| {
            let frame = Frame::decode(black_box(&encoded)).unwrap();
            black_box(frame.into_payload().unwrap())
        })
    });

    group.finish();
}

criterion_group!(benches, bench_diff, bench_document, bench_frames);
criterion_main!(benches);
