use apparatus::prelude::*;

mod common;
use common::*;

#[test]
fn records_copy_traits_and_user_flags() {
    let (machine, mechanism) = setup();
    let subject = mechanism
        .spawn_subject_with_flags((Position { x: 1.0, y: 2.0 }, Name("crate".into())), Flag::C.mark())
        .unwrap();
    mechanism.boot_all().unwrap();

    let record = mechanism.record(subject).unwrap();
    assert_eq!(record.traits_num(), 2);
    assert_eq!(record.get_trait::<Position>(), Some(Position { x: 1.0, y: 2.0 }));
    assert_eq!(record.get_trait::<Name>(), Some(Name("crate".into())));
    assert!(!record.has_trait::<Velocity>());
    assert_eq!(record.flagmark(), Flag::C.mark());

    mechanism.set_trait(subject, Position::default()).unwrap();
    assert_eq!(record.get_trait::<Position>(), Some(Position { x: 1.0, y: 2.0 }));

    let copy = mechanism.spawn_subject_from_record(&record).unwrap();
    assert_ne!(copy, subject);
    assert_eq!(mechanism.get_trait::<Name>(copy).unwrap(), Name("crate".into()));
    assert!(mechanism.has_flag(copy, Flag::C).unwrap());
    assert!(!mechanism.has_flag(copy, Flag::Booted).unwrap());
    assert_eq!(mechanism.chunks_num(), 1);
    assert_eq!(mechanism.enchain(Filter::make::<(Position,)>(&machine).unwrap()).unwrap().subjects().unwrap().len(), 2);
}

#[test]
fn one_record_spawns_many_subjects_across_mechanisms() {
    let (machine, mechanism) = setup();
    let other = Mechanism::new(&machine);
    let mut record = SubjectRecord::new();
    record.set_trait(&machine, Health(5)).unwrap();
    record.set_flag(Flag::E, true);

    let first = mechanism.spawn_subject_from_record(&record).unwrap();
    let second = mechanism.spawn_subject_from_record(&record).unwrap();
    let foreign = other.spawn_subject_from_record(&record).unwrap();

    mechanism.set_trait(first, Health(1)).unwrap();
    assert_eq!(mechanism.get_trait::<Health>(second).unwrap(), Health(5));
    assert_eq!(other.get_trait::<Health>(foreign).unwrap(), Health(5));
    assert!(other.has_flag(foreign, Flag::E).unwrap());
    assert!(!mechanism.is_valid(foreign));
}

#[test]
fn deferred_record_spawns_wait_for_the_queue() {
    let (machine, mechanism) = setup();
    let original = mechanism.spawn_subject((A(3), Health(4))).unwrap();
    let record = mechanism.record(original).unwrap();

    let chain = mechanism.enchain_solid(Filter::make::<(A,)>(&machine).unwrap()).unwrap();
    assert!(mechanism.spawn_subject_from_record(&record).is_err());
    let spawned = mechanism.spawn_subject_deferred_from_record(&record).unwrap();
    assert!(mechanism.is_valid(spawned));
    assert!(mechanism.get_trait::<A>(spawned).is_err());
    drop(chain);

    assert_eq!(mechanism.apply_deferreds().unwrap(), Status::Success);
    assert_eq!(mechanism.get_trait::<A>(spawned).unwrap(), A(3));
    assert_eq!(mechanism.get_trait::<Health>(spawned).unwrap(), Health(4));
}

#[test]
fn stale_subjects_have_no_record() {
    let (_machine, mechanism) = setup();
    let subject = mechanism.spawn_subject((A(1),)).unwrap();
    mechanism.despawn(subject).unwrap();
    assert!(matches!(mechanism.record(subject), Err(ApparatusError::StaleSubject(_))));
}

#[test]
fn network_ids_find_their_subject() {
    let (_machine, mechanism) = setup();
    let first = mechanism.spawn_subject((A(1),)).unwrap();
    let second = mechanism.spawn_subject((A(2),)).unwrap();

    assert_eq!(mechanism.set_network_id(first, Some(10)).unwrap(), Status::Success);
    assert_eq!(mechanism.set_network_id(first, Some(10)).unwrap(), Status::Noop);
    assert_eq!(mechanism.find_subject_by_network_id(10), Some(first));
    assert_eq!(mechanism.find_subject_by_network_id(11), None);

    assert!(matches!(
        mechanism.set_network_id(second, Some(10)),
        Err(ApparatusError::InvalidState(_))
    ));
    assert_eq!(mechanism.network_id(second).unwrap(), None);

    mechanism.set_network_id(first, Some(12)).unwrap();
    assert_eq!(mechanism.find_subject_by_network_id(10), None);
    mechanism.set_network_id(second, Some(10)).unwrap();
    assert_eq!(mechanism.find_subject_by_network_id(10), Some(second));
}

#[test]
fn despawning_frees_the_network_id() {
    let (_machine, mechanism) = setup();
    let subject = mechanism.spawn_subject((A(1),)).unwrap();
    mechanism.set_network_id(subject, Some(7)).unwrap();
    mechanism.despawn(subject).unwrap();

    assert_eq!(mechanism.find_subject_by_network_id(7), None);
    let successor = mechanism.spawn_subject((A(2),)).unwrap();
    assert_eq!(mechanism.set_network_id(successor, Some(7)).unwrap(), Status::Success);
    assert_eq!(mechanism.find_subject_by_network_id(7), Some(successor));
}

#[test]
fn network_ids_are_scoped_to_their_mechanism() {
    let (machine, mechanism) = setup();
    let other = Mechanism::new(&machine);
    let here = mechanism.spawn_subject((A(1),)).unwrap();
    let there = other.spawn_subject((A(1),)).unwrap();

    mechanism.set_network_id(here, Some(1)).unwrap();
    other.set_network_id(there, Some(1)).unwrap();
    assert_eq!(mechanism.find_subject_by_network_id(1), Some(here));
    assert_eq!(other.find_subject_by_network_id(1), Some(there));
}
