#![allow(dead_code)]

use std::sync::{Arc, Once};

use apparatus::prelude::*;

static TRACING: Once = Once::new();

/// Routes engine logs to the test harness. Filter with `RUST_LOG`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

#[derive(Clone, Copy, Default, Debug, PartialEq)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}
impl Trait for Position {}

#[derive(Clone, Copy, Default, Debug, PartialEq)]
pub struct Velocity {
    pub x: f32,
    pub y: f32,
}
impl Trait for Velocity {}

#[derive(Clone, Copy, Default, Debug, PartialEq)]
pub struct Health(pub u32);
impl Trait for Health {}

#[derive(Clone, Copy, Default, Debug, PartialEq)]
pub struct A(pub u64);
impl Trait for A {}

#[derive(Clone, Default, Debug, PartialEq)]
pub struct Name(pub String);
impl Trait for Name {}

#[derive(Debug, PartialEq)]
pub struct Shape {
    pub sides: u32,
}
impl Detail for Shape {}

#[derive(Debug)]
pub struct Square {
    pub shape: Shape,
    pub side: f32,
}
impl Detail for Square {}

impl AsRef<Shape> for Square {
    fn as_ref(&self) -> &Shape {
        &self.shape
    }
}

impl AsMut<Shape> for Square {
    fn as_mut(&mut self) -> &mut Shape {
        &mut self.shape
    }
}

impl Square {
    pub fn new(side: f32) -> Self {
        Self { shape: Shape { sides: 4 }, side }
    }
}

#[derive(Debug, PartialEq)]
pub struct Label(pub &'static str);
impl Detail for Label {}

#[derive(Debug, Default, PartialEq)]
pub struct Tally(pub u32);
impl Detail for Tally {}

pub fn setup() -> (Arc<Machine>, Mechanism) {
    init_tracing();
    let machine = Machine::new();
    let mechanism = Mechanism::new(&machine);
    (machine, mechanism)
}

pub fn position_filter(machine: &Machine) -> Filter {
    Filter::make::<(Position,)>(machine).unwrap()
}
