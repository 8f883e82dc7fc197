use apparatus::prelude::*;
use apparatus::{Fingerprint, MachineConfig, StaleSubjectError};

mod common;
use common::*;

#[test]
fn spawned_traits_read_back() {
    let (_machine, mechanism) = setup();
    let subject = mechanism
        .spawn_subject((Position { x: 3.0, y: 4.0 }, Health(10), Name("ada".into())))
        .unwrap();

    assert!(mechanism.is_valid(subject));
    assert_eq!(mechanism.get_trait::<Position>(subject).unwrap(), Position { x: 3.0, y: 4.0 });
    assert_eq!(mechanism.get_trait::<Health>(subject).unwrap(), Health(10));
    assert_eq!(mechanism.get_trait::<Name>(subject).unwrap(), Name("ada".into()));
    assert!(!mechanism.has_trait::<Velocity>(subject));
    assert!(matches!(
        mechanism.get_trait::<Velocity>(subject),
        Err(ApparatusError::MissingTrait(_))
    ));
    assert_eq!(mechanism.subjects_num(), 1);
    assert_eq!(mechanism.chunks_num(), 1);
}

#[test]
fn subjects_with_equal_trait_sets_share_a_chunk() {
    let (_machine, mechanism) = setup();
    for i in 0..10 {
        mechanism.spawn_subject((Position::default(), Health(i))).unwrap();
    }
    mechanism.spawn_subject((Health(0), Position::default())).unwrap();
    mechanism.spawn_subject((Health(0),)).unwrap();

    assert_eq!(mechanism.chunks_num(), 2);
    assert_eq!(mechanism.subjects_num(), 12);
}

#[test]
fn in_place_writes_and_pointers() {
    let (_machine, mechanism) = setup();
    let subject = mechanism.spawn_subject((Health(1),)).unwrap();

    assert_eq!(mechanism.set_trait(subject, Health(2)).unwrap(), Status::Success);
    assert_eq!(mechanism.with_trait_mut::<Health, _>(subject, |health| {
        health.0 += 1;
        health.0
    }).unwrap(), 3);

    let ptr = mechanism.get_trait_ptr::<Health>(subject).unwrap();
    unsafe { (*ptr.as_ptr()).0 = 7 };
    assert_eq!(mechanism.get_trait::<Health>(subject).unwrap(), Health(7));
}

#[test]
fn despawn_invalidates_the_handle_even_after_slot_reuse() {
    let (machine, mechanism) = setup();
    let old = mechanism.spawn_subject((Health(1),)).unwrap();
    assert_eq!(mechanism.despawn(old).unwrap(), Status::Success);

    assert!(!mechanism.is_valid(old));
    assert!(!old.is_valid(&machine));
    assert!(matches!(
        mechanism.get_trait::<Health>(old),
        Err(ApparatusError::StaleSubject(StaleSubjectError { subject })) if subject == old
    ));

    let new = mechanism.spawn_subject((Health(2),)).unwrap();
    assert_ne!(new, old);
    assert!(!mechanism.is_valid(old));
    assert_eq!(mechanism.get_trait::<Health>(new).unwrap(), Health(2));

    assert_eq!(mechanism.despawn(old).unwrap(), Status::Noop);
    assert_eq!(mechanism.subjects_num(), 1);
}

#[test]
fn invalid_handle_is_never_valid() {
    let (machine, mechanism) = setup();
    assert!(!SubjectHandle::INVALID.is_valid(&machine));
    assert!(!mechanism.is_valid(SubjectHandle::default()));
}

#[test]
fn despawning_the_middle_row_keeps_the_others_intact() {
    let (_machine, mechanism) = setup();
    let subjects: Vec<_> = (0..4).map(|i| mechanism.spawn_subject((A(i),)).unwrap()).collect();

    mechanism.despawn(subjects[1]).unwrap();

    for (i, subject) in subjects.iter().enumerate() {
        if i == 1 {
            continue;
        }
        assert_eq!(mechanism.get_trait::<A>(*subject).unwrap(), A(i as u64));
    }
    assert_eq!(mechanism.subjects_num(), 3);
}

#[test]
fn subjects_of_another_mechanism_are_rejected() {
    let (machine, mechanism) = setup();
    let other = Mechanism::new(&machine);
    let subject = mechanism.spawn_subject((Health(1),)).unwrap();

    assert!(!other.is_valid(subject));
    assert!(matches!(other.get_trait::<Health>(subject), Err(ApparatusError::InvalidArgument(_))));
    assert!(other.despawn(subject).is_err());
    assert!(mechanism.is_valid(subject));
}

#[test]
fn dropping_a_mechanism_releases_its_subjects() {
    let (machine, mechanism) = setup();
    let other = Mechanism::new(&machine);
    let kept = mechanism.spawn_subject((Health(1),)).unwrap();
    let dropped = other.spawn_subject((Health(2),)).unwrap();
    assert_eq!(machine.subjects_num(), 2);

    drop(other);

    assert_eq!(machine.subjects_num(), 1);
    assert!(kept.is_valid(&machine));
    assert!(!dropped.is_valid(&machine));
}

#[test]
fn clone_copies_traits_into_an_independent_subject() {
    let (_machine, mechanism) = setup();
    let original = mechanism.spawn_subject((Position { x: 1.0, y: 2.0 }, Name("x".into()))).unwrap();
    let copy = mechanism.clone_subject(original).unwrap();

    assert_ne!(copy, original);
    assert_eq!(mechanism.get_trait::<Position>(copy).unwrap(), Position { x: 1.0, y: 2.0 });
    mechanism.set_trait(copy, Name("y".into())).unwrap();
    assert_eq!(mechanism.get_trait::<Name>(original).unwrap(), Name("x".into()));
}

#[test]
fn user_flags_toggle_and_engine_flags_are_refused() {
    let (_machine, mechanism) = setup();
    let subject = mechanism.spawn_subject((Health(1),)).unwrap();

    assert_eq!(mechanism.set_flag(subject, Flag::A, true).unwrap(), Status::Success);
    assert_eq!(mechanism.set_flag(subject, Flag::A, true).unwrap(), Status::Noop);
    assert!(mechanism.has_flag(subject, Flag::A).unwrap());
    assert!(!mechanism.toggle_flag(subject, Flag::A).unwrap());
    assert!(!mechanism.has_flag(subject, Flag::A).unwrap());

    assert!(matches!(
        mechanism.set_flag(subject, Flag::Stale, true),
        Err(ApparatusError::InvalidArgument(_))
    ));
    assert!(mechanism.spawn_subject_with_flags((Health(1),), Flagmark::STALE).is_err());
}

#[test]
fn spawn_flags_are_kept() {
    let (_machine, mechanism) = setup();
    let subject = mechanism
        .spawn_subject_with_flags((Health(1),), Flag::B.mark() | Flag::C.mark())
        .unwrap();
    let flagmark = mechanism.flagmark(subject).unwrap();
    assert!(flagmark.has(Flag::B) && flagmark.has(Flag::C));
    assert!(!flagmark.has(Flag::Booted));
}

#[test]
fn fingerprint_lists_traits_and_flags() {
    let (machine, mechanism) = setup();
    let subject = mechanism.spawn_subject((Position::default(), Velocity::default())).unwrap();
    mechanism.set_flag(subject, Flag::D, true).unwrap();

    let fingerprint: Fingerprint = mechanism.fingerprint(subject).unwrap();
    let position = machine.trait_id_of::<Position>().unwrap() as usize;
    let velocity = machine.trait_id_of::<Velocity>().unwrap() as usize;
    assert_eq!(fingerprint.traits.count(), 2);
    assert!(fingerprint.traits.has(position) && fingerprint.traits.has(velocity));
    assert!(fingerprint.details.is_empty());
    assert!(fingerprint.flagmark.has(Flag::D));

    let filter = Filter::any().include::<Position>(&machine).unwrap().include_flag(Flag::D);
    assert!(fingerprint.matches(&filter));
    let filter = Filter::any().exclude::<Velocity>(&machine).unwrap();
    assert!(!fingerprint.matches(&filter));
}

#[test]
fn network_id_round_trips() {
    let (_machine, mechanism) = setup();
    let subject = mechanism.spawn_subject((Health(1),)).unwrap();
    assert_eq!(mechanism.network_id(subject).unwrap(), None);
    mechanism.set_network_id(subject, Some(42)).unwrap();
    assert_eq!(mechanism.network_id(subject).unwrap(), Some(42));
    mechanism.set_network_id(subject, None).unwrap();
    assert_eq!(mechanism.network_id(subject).unwrap(), None);
}

#[test]
fn subject_ref_forwards_to_the_mechanism() {
    let (_machine, mechanism) = setup();
    let handle = mechanism.spawn_subject((Health(5),)).unwrap();
    let subject = mechanism.subject(handle);

    assert_eq!(subject.handle(), handle);
    assert_eq!(subject.get_trait::<Health>().unwrap(), Health(5));
    subject.obtain_trait::<Velocity>().unwrap();
    assert!(subject.has_trait::<Velocity>());
    subject.despawn().unwrap();
    assert!(!subject.is_valid());
}

#[test]
fn subject_ceiling_is_enforced() {
    init_tracing();
    let machine = Machine::with_config(MachineConfig::default().with_max_subjects(2));
    let mechanism = Mechanism::new(&machine);
    mechanism.spawn_subject((Health(1),)).unwrap();
    mechanism.spawn_subject((Health(2),)).unwrap();
    assert!(matches!(mechanism.spawn_subject((Health(3),)), Err(ApparatusError::OutOfLimit(_))));
}
