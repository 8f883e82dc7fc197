#![allow(dead_code)]

use std::sync::Arc;

use apparatus::prelude::*;

pub const SUBJECTS_SMALL: usize = 10_000;
pub const SUBJECTS_MED: usize = 100_000;

#[derive(Clone, Copy, Default)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}
impl Trait for Position {}

#[derive(Clone, Copy, Default)]
pub struct Wealth {
    pub value: f32,
}
impl Trait for Wealth {}

#[derive(Clone, Copy, Default)]
pub struct Productivity {
    pub rate: f32,
}
impl Trait for Productivity {}

pub struct Tag(pub u32);
impl Detail for Tag {}

pub fn make_mechanism() -> (Arc<Machine>, Mechanism) {
    let machine = Machine::new();
    let mechanism = Mechanism::new(&machine);
    (machine, mechanism)
}

pub fn populate(mechanism: &Mechanism, subjects: usize) -> ApparatusResult<()> {
    for _ in 0..subjects {
        mechanism.spawn_subject((
            Position { x: 0.0, y: 0.0 },
            Wealth { value: 100.0 },
            Productivity { rate: 1.0 },
        ))?;
    }
    mechanism.boot_all()?;
    Ok(())
}

pub fn populate_tagged(mechanism: &Mechanism, subjects: usize) -> ApparatusResult<()> {
    for i in 0..subjects {
        mechanism.spawn_subjective((Wealth { value: 1.0 },), vec![Box::new(Tag(i as u32))])?;
    }
    mechanism.boot_all()?;
    Ok(())
}

pub fn world(subjects: usize) -> (Arc<Machine>, Mechanism) {
    let (machine, mechanism) = make_mechanism();
    populate(&mechanism, subjects).expect("populate failed in benchmark");
    (machine, mechanism)
}
