use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use creditline_core::{
    CreditLedger, CreditRequest, Direction, Frame, Message, WindowTracker, WireFrame,
};
use creditline_transport::LinkHandle;

const LINK: LinkHandle = LinkHandle::new(1);

fn bench_admit_with_eviction(c: &mut Criterion) {
    let mut group = c.benchmark_group("window_admit");

    for window in [10usize, 100, 1000] {
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(window), &window, |b, &window| {
            let mut tracker = WindowTracker::new(Some(window), Some(window));
            b.iter(|| {
                let handle = tracker.reserve();
                black_box(tracker.admit_outgoing(handle, LINK))
            })
        });
    }

    group.finish();
}

fn bench_admit_settle(c: &mut Criterion) {
    let mut group = c.benchmark_group("window_admit_settle");
    group.throughput(Throughput::Elements(1));

    group.bench_function("incoming", |b| {
        let mut tracker = WindowTracker::new(None, None);
        let mut remote_id = 0u64;
        b.iter(|| {
            remote_id += 1;
            let admission = tracker.admit_incoming(LINK, remote_id);
            black_box(tracker.settle(admission.handle))
        })
    });

    group.bench_function("settle_all_before_1000", |b| {
        b.iter_batched(
            || {
                let mut tracker = WindowTracker::new(None, None);
                for id in 0..1000 {
                    tracker.admit_incoming(LINK, id);
                }
                tracker
            },
            |mut tracker| black_box(tracker.settle_all_before(LINK, Direction::Incoming, 990)),
            criterion::BatchSize::SmallInput,
        )
    });

    group.finish();
}

fn bench_credit(c: &mut Criterion) {
    let mut group = c.benchmark_group("credit");

    group.bench_function("request_consume_exact", |b| {
        let mut ledger = CreditLedger::new(None);
        b.iter(|| {
            ledger.request_send_credit(LINK, black_box(CreditRequest::Exact(1)));
            black_box(ledger.consume(LINK, Direction::Outgoing, 1))
        })
    });

    group.bench_function("unbounded_call", |b| {
        let mut ledger = CreditLedger::new(None);
        b.iter(|| {
            ledger.request_recv_credit(LINK, CreditRequest::Unbounded);
            for _ in 0..16 {
                let _ = ledger.consume(LINK, Direction::Incoming, 1);
            }
            ledger.end_call();
        })
    });

    group.finish();
}

fn bench_frames(c: &mut Criterion) {
    let frame = WireFrame::Transfer {
        delivery_id: 42,
        message: Message::new("mem://server/queue")
            .with_reply_to("mem://client")
            .with_body(vec![0xAA; 1024]),
    };
    let encoded = frame.encode().unwrap();

    let mut group = c.benchmark_group("frames");
    group.throughput(Throughput::Bytes(encoded.len() as u64));

    group.bench_function("parse_header", |b| {
        b.iter(|| Frame::parse(black_box(&encoded)))
    });
    group.bench_function("encode_transfer", |b| b.iter(|| black_box(&frame).encode()));
    group.bench_function("decode_transfer", |b| {
        b.iter(|| WireFrame::decode(black_box(&encoded)))
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_admit_with_eviction,
    bench_admit_settle,
    bench_credit,
    bench_frames
);
criterion_main!(benches);
