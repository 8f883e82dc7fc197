use std::hint::black_box;

use criterion::*;

mod common;
use common::*;

fn spawn_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("spawn");

    group.bench_function("spawn_100k_subjects", |b| {
        b.iter(|| {
            let (machine, mechanism) = make_mechanism();
            populate(&mechanism, SUBJECTS_MED).expect("populate failed in benchmark");
            black_box((machine, mechanism));
        });
    });

    group.bench_function("spawn_deferred_100k_subjects", |b| {
        b.iter(|| {
            let (machine, mechanism) = make_mechanism();
            for _ in 0..SUBJECTS_MED {
                mechanism
                    .spawn_subject_deferred((Position::default(), Wealth { value: 1.0 }))
                    .expect("deferred spawn failed in benchmark");
            }
            mechanism.apply_deferreds().expect("apply_deferreds failed in benchmark");
            black_box((machine, mechanism));
        });
    });

    group.bench_function("migrate_10k_subjects", |b| {
        b.iter_batched(
            || {
                let (machine, mechanism) = make_mechanism();
                let subjects: Vec<_> = (0..SUBJECTS_SMALL)
                    .map(|_| mechanism.spawn_subject((Position::default(),)).expect("spawn failed in benchmark"))
                    .collect();
                (machine, mechanism, subjects)
            },
            |(machine, mechanism, subjects)| {
                for &subject in &subjects {
                    mechanism
                        .set_trait(subject, Wealth { value: 1.0 })
                        .expect("migration failed in benchmark");
                }
                black_box((machine, mechanism));
            },
            BatchSize::LargeInput,
        );
    });

    group.bench_function("despawn_10k_subjects", |b| {
        b.iter_batched(
            || {
                let (machine, mechanism) = make_mechanism();
                let subjects: Vec<_> = (0..SUBJECTS_SMALL)
                    .map(|_| mechanism.spawn_subject((Position::default(),)).expect("spawn failed in benchmark"))
                    .collect();
                (machine, mechanism, subjects)
            },
            |(machine, mechanism, subjects)| {
                for &subject in &subjects {
                    mechanism.despawn(subject).expect("despawn failed in benchmark");
                }
                black_box((machine, mechanism));
            },
            BatchSize::LargeInput,
        );
    });

    group.finish();
}

criterion_group!(benches, spawn_benchmark);
criterion_main!(benches);
