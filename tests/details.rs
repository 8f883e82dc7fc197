use apparatus::prelude::*;

mod common;
use common::*;

fn labelled(machine: &Machine) -> Filter {
    Filter::new().include_detail::<Label>(machine).unwrap()
}

#[test]
fn subjectives_carry_their_details() {
    let (_machine, mechanism) = setup();
    let subject = mechanism
        .spawn_subjective((Position::default(),), vec![Box::new(Label("first"))])
        .unwrap();

    assert!(mechanism.has_detail::<Label>(subject));
    assert!(!mechanism.has_detail::<Square>(subject));
    assert_eq!(mechanism.with_detail::<Label, _>(subject, |label| label.0).unwrap(), "first");

    let subjective = mechanism.subjective_of(subject).unwrap().unwrap();
    assert_eq!(subjective.subject(), subject);
    assert_eq!(subjective.details_num(), 1);
    assert_eq!(mechanism.belts_num(), 1);
}

#[test]
fn plain_subjects_have_no_subjective() {
    let (_machine, mechanism) = setup();
    let subject = mechanism.spawn_subject((Position::default(),)).unwrap();
    assert!(mechanism.subjective_of(subject).unwrap().is_none());
    assert!(matches!(
        mechanism.with_detail::<Label, _>(subject, |_| ()),
        Err(ApparatusError::MissingDetail(_))
    ));
}

#[test]
fn detail_filters_walk_belts() {
    let (machine, mechanism) = setup();
    let tagged = mechanism.spawn_subjective((A(1),), vec![Box::new(Label("x"))]).unwrap();
    mechanism.spawn_subject((A(2),)).unwrap();

    let chain = mechanism.enchain(labelled(&machine)).unwrap();
    let mut seen = Vec::new();
    chain
        .operate(|cursor| {
            assert!(cursor.is_belt());
            seen.push((cursor.subject(), cursor.with_detail::<Label, _>(|label| label.0).unwrap()));
            assert_eq!(cursor.get_trait::<A>().unwrap(), A(1));
        })
        .unwrap();

    assert_eq!(seen, vec![(tagged, "x")]);
}

#[test]
fn details_attached_later_move_the_subjective() {
    let (machine, mechanism) = setup();
    let subject = mechanism.spawn_subject((A(1),)).unwrap();
    assert_eq!(mechanism.add_detail(subject, Label("late")).unwrap(), Status::Success);
    assert_eq!(mechanism.belts_num(), 1);

    mechanism.add_detail(subject, Square::new(2.0)).unwrap();
    assert_eq!(mechanism.belts_num(), 2);

    let chain = mechanism.enchain(labelled(&machine)).unwrap();
    assert_eq!(chain.subjects().unwrap(), vec![subject]);
}

#[test]
fn derived_details_answer_for_their_base() {
    let (machine, mechanism) = setup();
    machine.register_detail_base::<Square, Shape>().unwrap();
    let subject = mechanism.spawn_subjective((A(0),), vec![Box::new(Square::new(3.0))]).unwrap();

    assert!(mechanism.has_detail::<Shape>(subject));
    assert_eq!(mechanism.with_detail::<Shape, _>(subject, |shape| shape.sides).unwrap(), 4);

    let filter = Filter::from_parts::<(DetailWrite<Shape>,)>(&machine).unwrap();
    let chain = mechanism.enchain(filter).unwrap();
    let mut visits = 0;
    chain
        .operate(|cursor| {
            visits += 1;
            let (mut shape,) = cursor.parts::<(DetailWrite<Shape>,)>().unwrap();
            shape.sides += 1;
        })
        .unwrap();

    assert_eq!(visits, 1);
    assert_eq!(mechanism.with_detail::<Square, _>(subject, |square| (square.shape.sides, square.side)).unwrap(), (5, 3.0));
}

#[test]
fn detail_parts_read_pinned_cells() {
    let (machine, mechanism) = setup();
    machine.register_detail_base::<Square, Shape>().unwrap();
    mechanism
        .spawn_subjective((A(0),), vec![Box::new(Square::new(1.0)), Box::new(Label("sq"))])
        .unwrap();

    let filter = Filter::from_parts::<(DetailRead<Shape>, DetailRead<Label>, Read<A>)>(&machine).unwrap();
    let chain = mechanism.enchain(filter).unwrap();
    chain
        .operate(|cursor| {
            let (shape, label, a) = cursor.parts::<(DetailRead<Shape>, DetailRead<Label>, Read<A>)>().unwrap();
            assert_eq!(shape.sides, 4);
            assert_eq!(label.0, "sq");
            assert_eq!(*a, A(0));
        })
        .unwrap();
}

#[test]
fn detail_parts_need_a_belt_cursor() {
    let (machine, mechanism) = setup();
    mechanism.spawn_subjective((Position::default(),), vec![Box::new(Label("x"))]).unwrap();

    let chain = mechanism.enchain(position_filter(&machine)).unwrap();
    chain
        .operate(|cursor| {
            assert!(!cursor.is_belt());
            assert!(matches!(
                cursor.part::<DetailRead<Label>>(),
                Err(ApparatusError::InvalidOperation(_))
            ));
            assert_eq!(cursor.with_detail::<Label, _>(|label| label.0).unwrap(), "x");
        })
        .unwrap();
}

#[test]
fn removed_details_stop_matching() {
    let (machine, mechanism) = setup();
    let subject = mechanism.spawn_subjective((A(0),), vec![Box::new(Label("gone"))]).unwrap();

    assert_eq!(mechanism.remove_details::<Label>(subject).unwrap(), Status::Success);
    assert!(!mechanism.has_detail::<Label>(subject));
    assert!(matches!(
        mechanism.remove_details::<Label>(subject),
        Err(ApparatusError::MissingDetail(_))
    ));
    assert!(mechanism.enchain(labelled(&machine)).unwrap().subjects().unwrap().is_empty());
}

#[test]
fn disabled_details_are_skipped() {
    let (machine, mechanism) = setup();
    let subject = mechanism.spawn_subjective((A(0),), vec![Box::new(Label("off"))]).unwrap();

    assert_eq!(mechanism.set_details_enabled::<Label>(subject, false).unwrap(), Status::Success);
    assert!(!mechanism.has_detail::<Label>(subject));
    assert!(mechanism.enchain(labelled(&machine)).unwrap().subjects().unwrap().is_empty());
    assert_eq!(mechanism.set_details_enabled::<Label>(subject, false).unwrap(), Status::Noop);

    mechanism.set_details_enabled::<Label>(subject, true).unwrap();
    assert_eq!(mechanism.enchain(labelled(&machine)).unwrap().subjects().unwrap(), vec![subject]);
}

#[test]
fn excluded_details_filter_chunk_rows() {
    let (machine, mechanism) = setup();
    mechanism.spawn_subjective((A(0),), vec![Box::new(Label("no"))]).unwrap();
    let plain = mechanism.spawn_subject((A(1),)).unwrap();

    let filter = Filter::make::<(A,)>(&machine).unwrap().exclude_detail::<Label>(&machine).unwrap();
    assert_eq!(mechanism.enchain(filter).unwrap().subjects().unwrap(), vec![plain]);
}

#[test]
fn mutable_detail_access_through_the_mechanism() {
    let (_machine, mechanism) = setup();
    let subject = mechanism.spawn_subjective((), vec![Box::new(Square::new(1.0))]).unwrap();
    mechanism.with_detail_mut::<Square, _>(subject, |square| square.side = 8.0).unwrap();
    assert_eq!(mechanism.with_detail::<Square, _>(subject, |square| square.side).unwrap(), 8.0);
}

#[test]
fn despawning_a_subjective_empties_its_belt_slot() {
    let (machine, mechanism) = setup();
    let subject = mechanism.spawn_subjective((A(0),), vec![Box::new(Label("x"))]).unwrap();
    let other = mechanism.spawn_subjective((A(1),), vec![Box::new(Label("y"))]).unwrap();

    mechanism.despawn(subject).unwrap();
    assert_eq!(mechanism.enchain(labelled(&machine)).unwrap().subjects().unwrap(), vec![other]);
}

#[test]
fn obtaining_a_detail_reuses_an_attached_one() {
    let (_machine, mechanism) = setup();
    let subject = mechanism.spawn_subject((Position::default(),)).unwrap();

    assert_eq!(mechanism.obtain_detail::<Tally>(subject).unwrap(), Status::Success);
    mechanism.with_detail_mut::<Tally, _>(subject, |tally| tally.0 = 3).unwrap();
    assert_eq!(mechanism.obtain_detail::<Tally>(subject).unwrap(), Status::Reused);
    assert_eq!(mechanism.with_detail::<Tally, _>(subject, |tally| tally.0).unwrap(), 3);
    assert_eq!(mechanism.subjective_of(subject).unwrap().unwrap().details_num(), 1);
}

#[test]
fn collecting_details_reports_when_there_are_none() {
    let (_machine, mechanism) = setup();
    mechanism.machine().register_detail_base::<Square, Shape>().unwrap();
    let subject = mechanism
        .spawn_subjective(
            (Position::default(),),
            vec![Box::new(Square::new(1.0)), Box::new(Shape { sides: 3 }), Box::new(Label("x"))],
        )
        .unwrap();

    let mut shapes = Vec::new();
    assert_eq!(mechanism.collect_details::<Shape>(subject, &mut shapes).unwrap(), Status::Success);
    assert_eq!(shapes.len(), 2);

    let mut tallies = Vec::new();
    assert_eq!(mechanism.collect_details::<Tally>(subject, &mut tallies).unwrap(), Status::NoItems);
    assert!(tallies.is_empty());

    let plain = mechanism.spawn_subject((Position::default(),)).unwrap();
    assert_eq!(mechanism.collect_details::<Shape>(plain, &mut shapes).unwrap(), Status::NoItems);
    assert_eq!(shapes.len(), 2);
}
