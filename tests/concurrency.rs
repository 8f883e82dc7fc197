use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use std::thread;

use apparatus::prelude::*;

mod common;
use common::*;

fn spawn_many(mechanism: &Mechanism, count: u64) {
    for i in 0..count {
        mechanism.spawn_subject((A(i),)).unwrap();
    }
}

#[test]
fn every_subject_is_visited_exactly_once() {
    let (machine, mechanism) = setup();
    spawn_many(&mechanism, 1003);

    let chain = mechanism.enchain_solid(Filter::make::<(A,)>(&machine).unwrap()).unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let worker_seen = Arc::clone(&seen);
    chain
        .operate_concurrently(
            move |cursor| worker_seen.lock().unwrap().push(cursor.subject()),
            4,
            100,
            false,
        )
        .unwrap();
    chain.wait_for_operatings_completion();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1003);
    assert_eq!(seen.iter().collect::<HashSet<_>>().len(), 1003);
}

#[test]
fn workers_write_their_own_rows() {
    let (machine, mechanism) = setup();
    spawn_many(&mechanism, 500);

    let chain = mechanism.enchain_solid(Filter::make::<(A,)>(&machine).unwrap()).unwrap();
    chain
        .operate_concurrently(
            |cursor| {
                cursor.trait_mut::<A>().unwrap().0 += 1000;
            },
            8,
            16,
            true,
        )
        .unwrap();

    let chain = mechanism.enchain(Filter::make::<(A,)>(&machine).unwrap()).unwrap();
    let mut values = Vec::new();
    chain.operate(|cursor| values.push(cursor.get_trait::<A>().unwrap().0)).unwrap();
    values.sort_unstable();
    assert_eq!(values, (1000..1500).collect::<Vec<_>>());
}

#[test]
fn small_chains_run_on_fewer_workers() {
    let (machine, mechanism) = setup();
    spawn_many(&mechanism, 10);

    let chain = mechanism.enchain_solid(Filter::make::<(A,)>(&machine).unwrap()).unwrap();
    let counter = Arc::new(AtomicUsize::new(0));
    let worker_counter = Arc::clone(&counter);
    chain
        .operate_concurrently(
            move |_| {
                worker_counter.fetch_add(1, Ordering::SeqCst);
            },
            16,
            100,
            true,
        )
        .unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 10);
}

#[test]
fn concurrent_operate_needs_a_solid_chain() {
    let (machine, mechanism) = setup();
    spawn_many(&mechanism, 10);

    let chain = mechanism.enchain(Filter::make::<(A,)>(&machine).unwrap()).unwrap();
    assert!(matches!(
        chain.operate_concurrently(|_| {}, 4, 1, true),
        Err(ApparatusError::InvalidOperation(_))
    ));

    let chain = mechanism.enchain_solid(Filter::make::<(A,)>(&machine).unwrap());
    assert!(chain.is_err());
}

#[test]
fn zero_threads_is_rejected() {
    let (machine, mechanism) = setup();
    spawn_many(&mechanism, 10);
    let chain = mechanism.enchain_solid(Filter::make::<(A,)>(&machine).unwrap()).unwrap();
    assert!(matches!(
        chain.operate_concurrently(|_| {}, 0, 1, true),
        Err(ApparatusError::InvalidArgument(_))
    ));
}

#[test]
fn empty_solid_chains_dispose_without_dispatch() {
    let (machine, mechanism) = setup();
    let chain = mechanism.enchain_solid(Filter::make::<(A,)>(&machine).unwrap()).unwrap();
    assert_eq!(chain.operate_concurrently(|_| unreachable!(), 4, 1, false).unwrap(), Status::Noop);
    assert!(chain.is_disposed());
    assert!(!mechanism.is_locked());
}

#[test]
fn retained_solid_chains_can_run_twice() {
    let (machine, mechanism) = setup();
    spawn_many(&mechanism, 300);

    let chain = mechanism.enchain_solid(Filter::make::<(A,)>(&machine).unwrap()).unwrap();
    chain.retain().unwrap();
    let counter = Arc::new(AtomicUsize::new(0));
    for _ in 0..2 {
        let worker_counter = Arc::clone(&counter);
        chain
            .operate_concurrently(
                move |_| {
                    worker_counter.fetch_add(1, Ordering::SeqCst);
                },
                3,
                50,
                false,
            )
            .unwrap();
        chain.wait_for_operatings_completion();
    }
    assert_eq!(counter.load(Ordering::SeqCst), 600);
    assert!(!chain.is_disposed());

    chain.release().unwrap();
    assert!(chain.is_disposed());
}

#[test]
fn dropping_the_chain_waits_for_detached_workers() {
    let (machine, mechanism) = setup();
    spawn_many(&mechanism, 400);

    let counter = Arc::new(AtomicUsize::new(0));
    let worker_counter = Arc::clone(&counter);
    let chain = mechanism.enchain_solid(Filter::make::<(A,)>(&machine).unwrap()).unwrap();
    chain
        .operate_concurrently(
            move |_| {
                worker_counter.fetch_add(1, Ordering::SeqCst);
            },
            4,
            10,
            false,
        )
        .unwrap();
    drop(chain);

    assert_eq!(counter.load(Ordering::SeqCst), 400);
    assert!(!mechanism.is_locked());
}

#[test]
fn lookups_from_other_threads_proceed_during_a_solid_pass() {
    let (machine, mechanism) = setup();
    let first = mechanism.spawn_subject((A(42),)).unwrap();
    spawn_many(&mechanism, 99);

    let chain = mechanism.enchain_solid(Filter::make::<(A,)>(&machine).unwrap()).unwrap();
    let reader = mechanism.clone();
    let handle = thread::spawn(move || {
        let mut total = 0;
        for _ in 0..100 {
            total += reader.get_trait::<A>(first).unwrap().0;
        }
        total
    });
    let counter = Arc::new(AtomicUsize::new(0));
    let worker_counter = Arc::clone(&counter);
    chain
        .operate_concurrently(
            move |_| {
                worker_counter.fetch_add(1, Ordering::SeqCst);
            },
            4,
            10,
            true,
        )
        .unwrap();

    assert_eq!(handle.join().unwrap(), 4200);
    assert_eq!(counter.load(Ordering::SeqCst), 100);
}

#[test]
fn structural_changes_from_other_threads_wait_their_turn() {
    let (_machine, mechanism) = setup();
    let threads: Vec<_> = (0..4)
        .map(|t| {
            let mechanism = mechanism.clone();
            thread::spawn(move || {
                for i in 0..50 {
                    let subject = mechanism.spawn_subject((A(t * 100 + i),)).unwrap();
                    if i % 2 == 0 {
                        mechanism.set_trait(subject, Health(i as u32)).unwrap();
                    }
                }
            })
        })
        .collect();
    for thread in threads {
        thread.join().unwrap();
    }

    assert_eq!(mechanism.subjects_num(), 200);
    assert_eq!(mechanism.chunks_num(), 2);
}

#[test]
fn spawns_waiting_for_access_see_a_chain_enchained_meanwhile() {
    let (machine, mechanism) = setup();
    let subject = mechanism.spawn_subject((A(1),)).unwrap();

    let (chain, spawning) = mechanism
        .with_trait_mut::<A, _>(subject, |value| {
            value.0 += 1;
            let spawner = mechanism.clone();
            let spawning = thread::spawn(move || spawner.spawn_subject((A(2),)));
            thread::sleep(Duration::from_millis(50));
            let chain = mechanism.enchain_solid(Filter::make::<(A,)>(&machine).unwrap()).unwrap();
            (chain, spawning)
        })
        .unwrap();

    assert!(matches!(spawning.join().unwrap(), Err(ApparatusError::InvalidState(_))));
    assert_eq!(mechanism.subjects_num(), 1);
    drop(chain);
    assert!(mechanism.spawn_subject((A(3),)).is_ok());
}

#[test]
fn liquid_passes_hold_off_spawns_from_other_threads() {
    let (machine, mechanism) = setup();
    spawn_many(&mechanism, 50);

    let mut spawning = None;
    mechanism
        .operate(Filter::make::<(A,)>(&machine).unwrap(), |_| {
            if spawning.is_none() {
                let spawner = mechanism.clone();
                spawning = Some(thread::spawn(move || spawner.spawn_subject((A(99),))));
                thread::sleep(Duration::from_millis(20));
            }
            assert_eq!(mechanism.subjects_num(), 50);
        })
        .unwrap();

    spawning.unwrap().join().unwrap().unwrap();
    assert_eq!(mechanism.subjects_num(), 51);
}

#[test]
fn solid_passes_refuse_mechanism_writes_from_the_callback() {
    let (machine, mechanism) = setup();
    spawn_many(&mechanism, 3);

    let chain = mechanism.enchain_solid(Filter::make::<(A,)>(&machine).unwrap()).unwrap();
    chain
        .operate(|cursor| {
            let subject = cursor.subject();
            assert!(matches!(mechanism.set_trait(subject, A(7)), Err(ApparatusError::InvalidState(_))));
            assert_eq!(mechanism.set_trait_deferred(subject, A(7)).unwrap(), Status::Deferred);
            cursor.trait_mut::<A>().unwrap().0 += 10;
        })
        .unwrap();

    assert!(!mechanism.is_locked());
    assert_eq!(mechanism.apply_deferreds().unwrap(), Status::Success);
    let mut values = Vec::new();
    mechanism
        .operate(Filter::make::<(A,)>(&machine).unwrap(), |cursor| values.push(cursor.get_trait::<A>().unwrap().0))
        .unwrap();
    assert_eq!(values, vec![7, 7, 7]);
}

#[test]
fn concurrent_operate_under_exclusive_access_is_refused() {
    let (machine, mechanism) = setup();
    let subject = mechanism.spawn_subject((A(1),)).unwrap();
    spawn_many(&mechanism, 20);

    let outcome = mechanism
        .with_trait_mut::<A, _>(subject, |_| {
            mechanism.operate_concurrently(Filter::make::<(A,)>(&machine).unwrap(), |_| {}, 4, 1)
        })
        .unwrap();
    assert!(matches!(outcome, Err(ApparatusError::InvalidState(_))));
    assert!(!mechanism.is_locked());
}

#[test]
fn mechanism_operate_concurrently_visits_every_subject() {
    let (machine, mechanism) = setup();
    spawn_many(&mechanism, 400);

    let counter = Arc::new(AtomicUsize::new(0));
    let worker_counter = Arc::clone(&counter);
    let outcome = mechanism
        .operate_concurrently(
            Filter::make::<(A,)>(&machine).unwrap(),
            move |cursor| {
                cursor.trait_mut::<A>().unwrap().0 += 1;
                worker_counter.fetch_add(1, Ordering::SeqCst);
            },
            4,
            50,
        )
        .unwrap();

    assert_eq!(outcome, Status::Success);
    assert_eq!(counter.load(Ordering::SeqCst), 400);
    assert!(!mechanism.is_locked());
}
