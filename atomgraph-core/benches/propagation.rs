use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use atomgraph_core::{Context, Scope, StateAtom, ValueAtom};

#[derive(Clone, Hash)]
struct Source;

impl StateAtom for Source {
    type Value = u64;

    fn default_value(&self, _context: &Context) -> u64 {
        0
    }
}

/// Link `n` of a chain; link 0 reads the source.
#[derive(Clone, Hash)]
struct Link(usize);

impl ValueAtom for Link {
    type Value = u64;

    fn value(&self, context: &Context) -> u64 {
        match self.0 {
            0 => context.watch(&Source) + 1,
            n => context.watch(&Link(n - 1)) + 1,
        }
    }
}

/// Fan-out leaf; every leaf reads the source directly.
#[derive(Clone, Hash)]
struct Leaf(usize);

impl ValueAtom for Leaf {
    type Value = u64;

    fn value(&self, context: &Context) -> u64 {
        context.watch(&Source) * self.0 as u64
    }
}

fn chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("chain");
    for depth in [10, 50, 200] {
        let scope = Scope::new();
        let view = scope.subscribe();
        view.evaluate(|context| context.watch(&Link(depth - 1)));

        let mut next = 0;
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, &depth| {
            b.iter(|| {
                next += 1;
                scope.set(&Source, next);
                black_box(view.evaluate(|context| context.watch(&Link(depth - 1))))
            })
        });
    }
    group.finish();
}

fn fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("fan_out");
    for width in [10, 100, 1_000] {
        let scope = Scope::new();
        let view = scope.subscribe();
        let watch_all = |context: &Context| (0..width).map(|n| context.watch(&Leaf(n))).sum::<u64>();
        view.evaluate(watch_all);

        let mut next = 0;
        group.bench_with_input(BenchmarkId::from_parameter(width), &width, |b, _| {
            b.iter(|| {
                next += 1;
                scope.set(&Source, next);
                black_box(view.evaluate(watch_all))
            })
        });
    }
    group.finish();
}

fn cached_watch(c: &mut Criterion) {
    let scope = Scope::new();
    let view = scope.subscribe();
    view.evaluate(|context| context.watch(&Link(50)));

    c.bench_function("cached_watch", |b| {
        b.iter(|| black_box(view.evaluate(|context| context.watch(&Link(50)))))
    });
}

criterion_group!(benches, chain, fan_out, cached_watch);
criterion_main!(benches);
