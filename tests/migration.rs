use apparatus::prelude::*;

mod common;
use common::*;

#[test]
fn adding_a_trait_moves_the_subject_and_keeps_its_values() {
    let (machine, mechanism) = setup();
    let subject = mechanism.spawn_subject((Position { x: 5.0, y: 6.0 }, Name("m".into()))).unwrap();
    let neighbour = mechanism.spawn_subject((Position { x: 7.0, y: 8.0 }, Name("n".into()))).unwrap();

    assert_eq!(mechanism.set_trait(subject, Velocity { x: 1.0, y: 0.0 }).unwrap(), Status::Success);

    assert_eq!(mechanism.chunks_num(), 2);
    assert_eq!(mechanism.get_trait::<Position>(subject).unwrap(), Position { x: 5.0, y: 6.0 });
    assert_eq!(mechanism.get_trait::<Name>(subject).unwrap(), Name("m".into()));
    assert_eq!(mechanism.get_trait::<Velocity>(subject).unwrap(), Velocity { x: 1.0, y: 0.0 });
    assert_eq!(mechanism.get_trait::<Position>(neighbour).unwrap(), Position { x: 7.0, y: 8.0 });
    assert_eq!(mechanism.get_trait::<Name>(neighbour).unwrap(), Name("n".into()));

    let fingerprint = mechanism.fingerprint(subject).unwrap();
    assert!(fingerprint.traits.has(machine.trait_id_of::<Velocity>().unwrap() as usize));
    assert_eq!(fingerprint.traits.count(), 3);
}

#[test]
fn removing_a_trait_moves_the_subject_back() {
    let (_machine, mechanism) = setup();
    let subject = mechanism.spawn_subject((Position { x: 1.0, y: 1.0 }, Velocity { x: 2.0, y: 2.0 })).unwrap();

    assert_eq!(mechanism.remove_trait::<Velocity>(subject).unwrap(), Status::Success);

    assert!(!mechanism.has_trait::<Velocity>(subject));
    assert_eq!(mechanism.get_trait::<Position>(subject).unwrap(), Position { x: 1.0, y: 1.0 });
    assert!(matches!(
        mechanism.get_trait::<Velocity>(subject),
        Err(ApparatusError::MissingTrait(_))
    ));
}

#[test]
fn removing_a_missing_trait_depends_on_the_paradigm() {
    let (_machine, mechanism) = setup();
    let subject = mechanism.spawn_subject((Position::default(),)).unwrap();

    assert!(matches!(
        mechanism.remove_trait::<Velocity>(subject),
        Err(ApparatusError::MissingTrait(_))
    ));
    assert_eq!(mechanism.remove_trait_with::<Velocity>(subject, Paradigm::Polite).unwrap(), Status::Noop);
}

#[test]
fn obtain_adds_a_default_only_once() {
    let (_machine, mechanism) = setup();
    let subject = mechanism.spawn_subject((Position::default(),)).unwrap();

    assert_eq!(mechanism.obtain_trait::<Health>(subject).unwrap(), Status::Success);
    mechanism.set_trait(subject, Health(9)).unwrap();
    assert_eq!(mechanism.obtain_trait::<Health>(subject).unwrap(), Status::Noop);
    assert_eq!(mechanism.get_trait::<Health>(subject).unwrap(), Health(9));
}

#[test]
fn remove_all_traits_leaves_an_empty_subject() {
    let (_machine, mechanism) = setup();
    let subject = mechanism.spawn_subject((Position::default(), Health(1))).unwrap();

    assert_eq!(mechanism.remove_all_traits(subject).unwrap(), Status::Success);
    assert!(mechanism.is_valid(subject));
    assert!(mechanism.fingerprint(subject).unwrap().traits.is_empty());
    assert_eq!(mechanism.remove_all_traits(subject).unwrap(), Status::Noop);

    mechanism.set_trait(subject, Health(4)).unwrap();
    assert_eq!(mechanism.get_trait::<Health>(subject).unwrap(), Health(4));
}

#[test]
fn subjects_migrated_during_a_liquid_pass_are_not_revisited() {
    let (machine, mechanism) = setup();
    let subjects: Vec<_> = (0..3)
        .map(|i| mechanism.spawn_subject((Position { x: i as f32, y: 0.0 },)).unwrap())
        .collect();

    let chain = mechanism.enchain(position_filter(&machine)).unwrap();
    let mut visits = 0;
    chain
        .operate(|cursor| {
            visits += 1;
            cursor.set_trait(Velocity { x: 1.0, y: 1.0 }).unwrap();
        })
        .unwrap();

    assert_eq!(visits, 3);
    for (i, subject) in subjects.iter().enumerate() {
        assert_eq!(mechanism.get_trait::<Position>(*subject).unwrap(), Position { x: i as f32, y: 0.0 });
        assert!(mechanism.has_trait::<Velocity>(*subject));
    }

    let chain = mechanism.enchain(position_filter(&machine)).unwrap();
    assert_eq!(chain.subjects().unwrap().len(), 3);
}

#[test]
fn solid_mechanisms_refuse_migration_but_allow_in_place_writes() {
    let (machine, mechanism) = setup();
    let subject = mechanism.spawn_subject((Position::default(),)).unwrap();
    let chain = mechanism.enchain_solid(position_filter(&machine)).unwrap();

    assert!(mechanism.is_solid());
    assert_eq!(mechanism.set_trait(subject, Position { x: 2.0, y: 2.0 }).unwrap(), Status::Success);
    assert!(matches!(
        mechanism.set_trait(subject, Velocity::default()),
        Err(ApparatusError::InvalidState(_))
    ));
    assert!(matches!(
        mechanism.remove_trait::<Position>(subject),
        Err(ApparatusError::InvalidState(_))
    ));
    assert!(mechanism.spawn_subject((Position::default(),)).is_err());

    drop(chain);
    assert!(mechanism.is_liquid());
    assert_eq!(mechanism.set_trait(subject, Velocity::default()).unwrap(), Status::Success);
}

#[test]
fn cursor_refuses_to_migrate_inside_a_solid_chain() {
    let (machine, mechanism) = setup();
    mechanism.spawn_subject((Position::default(),)).unwrap();
    let chain = mechanism.enchain_solid(position_filter(&machine)).unwrap();

    chain
        .operate(|cursor| {
            assert!(matches!(
                cursor.set_trait(Velocity::default()),
                Err(ApparatusError::InvalidState(_))
            ));
            assert_eq!(cursor.set_trait(Position { x: 3.0, y: 3.0 }).unwrap(), Status::Success);
        })
        .unwrap();
}

#[test]
#[cfg(debug_assertions)]
#[should_panic(expected = "precondition violated")]
fn unsafe_paradigm_asserts_liquidity_in_debug_builds() {
    let (machine, mechanism) = setup();
    let subject = mechanism.spawn_subject((Position::default(), Velocity::default())).unwrap();
    let _chain = mechanism.enchain_solid(position_filter(&machine)).unwrap();
    let _ = mechanism.remove_trait_with::<Velocity>(subject, Paradigm::Unsafe);
}

#[test]
fn unsafe_paradigm_still_reports_failures() {
    let (_machine, mechanism) = setup();
    let subject = mechanism.spawn_subject((Position::default(), Velocity::default())).unwrap();
    assert_eq!(mechanism.remove_trait_with::<Velocity>(subject, Paradigm::Unsafe).unwrap(), Status::Success);
    assert!(matches!(
        mechanism.remove_trait_with::<Velocity>(subject, Paradigm::Unsafe),
        Err(ApparatusError::MissingTrait(_))
    ));
}
