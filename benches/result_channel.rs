use criterion::Criterion;
use criterion::{criterion_group, criterion_main};

use promising_cache::{ResultChannel, ResultSink, SerialQueue};

use std::convert::Infallible;
use std::time::Duration;

const CHAIN_LENGTH: usize = 100;
const WAIT: Duration = Duration::from_secs(5);

fn push_then_wait(queue: &SerialQueue) {
    let sink = ResultSink::<usize, Infallible>::new(queue);
    let channel = sink.channel();

    sink.push(Ok(1)).unwrap();
    channel.wait_timeout(WAIT).unwrap().unwrap();
}

fn transform_chain(queue: &SerialQueue) {
    let mut channel = ResultChannel::<usize, Infallible>::success(0, queue);

    for _ in 0..CHAIN_LENGTH {
        channel = channel.transform_success(|v| v + 1).unwrap();
    }

    assert_eq!(channel.wait_timeout(WAIT).unwrap().unwrap(), CHAIN_LENGTH);
}

fn hop_between_queues(first: &SerialQueue, second: &SerialQueue) {
    let mut channel = ResultChannel::<usize, Infallible>::success(0, first);

    for i in 0..CHAIN_LENGTH {
        let next = if i % 2 == 0 { second.clone() } else { first.clone() };
        let on = next.clone();
        channel = channel
            .then(Some(&next), move |v| ResultChannel::success(v + 1, &on))
            .unwrap();
    }

    assert_eq!(channel.wait_timeout(WAIT).unwrap().unwrap(), CHAIN_LENGTH);
}

fn bencher(c: &mut Criterion) {
    let first = SerialQueue::new("bench.first");
    let second = SerialQueue::new("bench.second");

    c.bench_function("result channel push then wait", |b| b.iter(|| push_then_wait(&first)));

    c.bench_function("result channel transform chain", |b| b.iter(|| transform_chain(&first)));

    c.bench_function("result channel then across queues", |b| {
        b.iter(|| hop_between_queues(&first, &second))
    });
}

criterion_group!(benches, bencher);
criterion_main!(benches);
