//! The instruction model and the recursive interpreter.
//!
//! Routines are executed as a plain tree walk over [`Instr`] sequences. The
//! interpreter owns no state of its own: the world, the program store and the
//! stop signal are all passed in, so independent simulations never interfere.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::world::{Predicate, World};
use crate::Config;

/// One parsed instruction. Blocks own their bodies outright; routine and
/// condition references are by name and resolved at execution time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Instr {
    Step,
    TurnLeft,
    PlaceFlag,
    PickFlag,
    Print(String),
    Repeat(u32, Vec<Instr>),
    /// Source keyword `UNTIL`; loops while the condition holds.
    While {
        pred: String,
        negated: bool,
        body: Vec<Instr>,
    },
    If {
        pred: String,
        negated: bool,
        then_body: Vec<Instr>,
        else_body: Vec<Instr>,
    },
    Call(String),
}

/// The routine table built by the loader. Read-only once loaded.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Program {
    routines: HashMap<String, Vec<Instr>>,
}

impl Program {
    pub fn new() -> Program {
        Program::default()
    }

    pub(crate) fn insert(&mut self, name: String, body: Vec<Instr>) {
        self.routines.insert(name, body);
    }

    pub fn routine(&self, name: &str) -> Option<&[Instr]> {
        self.routines.get(name).map(Vec::as_slice)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.routines.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.routines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routines.is_empty()
    }
}

/// Cooperative cancellation handle, cheap to clone and settable from any
/// thread. The interpreter polls it between instructions and before every
/// loop iteration; once set, execution unwinds without touching the world
/// further, and whatever already happened stays.
#[derive(Clone, Debug, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> StopSignal {
        StopSignal::default()
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ExecError {
    #[error("no routine named {0:?}")]
    UnknownRoutine(String),
    #[error("unknown condition {0:?}")]
    UnknownPredicate(String),
    #[error("routine calls nested deeper than the limit of {0}")]
    CallDepthExceeded(usize),
}

/// How an execution finished: normally, or unwound by the stop signal.
/// Stopping is a regular outcome, not an error.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Halt {
    Completed,
    Stopped,
}

/// Destination for `PRINT` output, in generation order. The library hands
/// lines over as they are produced, so a sink can observe a run mid-flight.
pub trait PrintSink {
    fn print(&mut self, text: &str);
}

impl PrintSink for Vec<String> {
    fn print(&mut self, text: &str) {
        self.push(text.to_owned());
    }
}

/// Execute a named routine, collecting `PRINT` output.
///
/// A stopped run returns whatever output it produced before unwinding. A
/// failed run loses it; use [`run`] with your own sink when you need the
/// partial output of a failure.
pub fn execute(
    program: &Program,
    world: &mut World,
    routine: &str,
    stop: &StopSignal,
    config: &Config,
) -> Result<Vec<String>, ExecError> {
    let mut output = Vec::new();
    run(program, world, routine, stop, &mut output, config)?;
    Ok(output)
}

/// Execute a named routine, streaming `PRINT` output into `sink`.
pub fn run(
    program: &Program,
    world: &mut World,
    routine: &str,
    stop: &StopSignal,
    sink: &mut dyn PrintSink,
    config: &Config,
) -> Result<Halt, ExecError> {
    log::debug!("running routine {routine:?}");
    let mut exec = Exec {
        program,
        stop,
        sink,
        depth: 0,
        max_depth: config.max_call_depth,
    };
    match exec.call(world, routine)? {
        Flow::Stopped => Ok(Halt::Stopped),
        Flow::Continue => Ok(Halt::Completed),
    }
}

/// Signal threaded back up the walk when the stop flag was observed. Not an
/// error: every active level returns early and the run reports `Stopped`.
enum Flow {
    Continue,
    Stopped,
}

struct Exec<'a> {
    program: &'a Program,
    stop: &'a StopSignal,
    sink: &'a mut dyn PrintSink,
    depth: usize,
    max_depth: usize,
}

impl<'a> Exec<'a> {
    fn call(&mut self, world: &mut World, name: &str) -> Result<Flow, ExecError> {
        let body = self
            .program
            .routine(name)
            .ok_or_else(|| ExecError::UnknownRoutine(name.to_owned()))?;
        if self.depth >= self.max_depth {
            return Err(ExecError::CallDepthExceeded(self.max_depth));
        }
        self.depth += 1;
        let flow = self.seq(world, body);
        self.depth -= 1;
        flow
    }

    fn seq(&mut self, world: &mut World, body: &[Instr]) -> Result<Flow, ExecError> {
        for instr in body {
            if self.stop.is_set() {
                return Ok(Flow::Stopped);
            }
            if let Flow::Stopped = self.one(world, instr)? {
                return Ok(Flow::Stopped);
            }
        }
        Ok(Flow::Continue)
    }

    fn one(&mut self, world: &mut World, instr: &Instr) -> Result<Flow, ExecError> {
        match instr {
            Instr::Step => world.step(),
            Instr::TurnLeft => world.turn_left(),
            Instr::PlaceFlag => world.place_flag(),
            Instr::PickFlag => world.pick_flag(),
            Instr::Print(text) => self.sink.print(text),
            Instr::Repeat(count, body) => {
                if !body.is_empty() {
                    for _ in 0..*count {
                        if self.stop.is_set() {
                            return Ok(Flow::Stopped);
                        }
                        if let Flow::Stopped = self.seq(world, body)? {
                            return Ok(Flow::Stopped);
                        }
                    }
                }
            }
            Instr::While {
                pred,
                negated,
                body,
            } => {
                let pred = resolve(pred)?;
                // An empty body is skipped rather than spun on forever.
                if !body.is_empty() {
                    loop {
                        if self.stop.is_set() {
                            return Ok(Flow::Stopped);
                        }
                        if world.check(pred) == *negated {
                            break;
                        }
                        if let Flow::Stopped = self.seq(world, body)? {
                            return Ok(Flow::Stopped);
                        }
                    }
                }
            }
            Instr::If {
                pred,
                negated,
                then_body,
                else_body,
            } => {
                let pred = resolve(pred)?;
                let arm = if world.check(pred) != *negated {
                    then_body
                } else {
                    else_body
                };
                return self.seq(world, arm);
            }
            Instr::Call(name) => return self.call(world, name),
        }
        Ok(Flow::Continue)
    }
}

fn resolve(name: &str) -> Result<Predicate, ExecError> {
    Predicate::from_keyword(name).ok_or_else(|| ExecError::UnknownPredicate(name.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::{Cell, Direction};

    fn setup() -> (Config, World) {
        let config = Config {
            grid_size: 5,
            ..Config::default()
        };
        let world = World::new(&config);
        (config, world)
    }

    fn program(routines: &[(&str, Vec<Instr>)]) -> Program {
        let mut program = Program::new();
        for (name, body) in routines {
            program.insert(name.to_string(), body.clone());
        }
        program
    }

    fn while_wall(body: Vec<Instr>) -> Instr {
        Instr::While {
            pred: "WALL".into(),
            negated: true,
            body,
        }
    }

    #[test]
    fn repeat_zero_runs_nothing() {
        let (config, mut world) = setup();
        let program = program(&[("GO", vec![Instr::Repeat(0, vec![Instr::Print("x".into())])])]);
        let output = execute(&program, &mut world, "GO", &StopSignal::new(), &config).unwrap();
        assert!(output.is_empty());
    }

    #[test]
    fn branch_runs_exactly_one_arm() {
        let (config, mut world) = setup();
        world.set_pose(0, 0, Direction::West); // wall (grid edge) ahead
        let branch = Instr::If {
            pred: "WALL".into(),
            negated: false,
            then_body: vec![Instr::Print("then".into())],
            else_body: vec![Instr::Print("else".into())],
        };
        let program = program(&[("GO", vec![branch])]);
        let output = execute(&program, &mut world, "GO", &StopSignal::new(), &config).unwrap();
        assert_eq!(output, vec!["then"]);
    }

    #[test]
    fn negated_branch_flips_the_test() {
        let (config, mut world) = setup();
        world.set_pose(2, 2, Direction::East); // nothing ahead
        let branch = Instr::If {
            pred: "WALL".into(),
            negated: true,
            then_body: vec![Instr::Print("open".into())],
            else_body: vec![Instr::Print("blocked".into())],
        };
        let program = program(&[("GO", vec![branch])]);
        let output = execute(&program, &mut world, "GO", &StopSignal::new(), &config).unwrap();
        assert_eq!(output, vec!["open"]);
    }

    #[test]
    fn while_walks_until_the_wall() {
        let (config, mut world) = setup();
        world.set_pose(0, 2, Direction::East);
        world.set_cell(3, 2, Cell::Wall);
        let program = program(&[("GO", vec![while_wall(vec![Instr::Step])])]);
        execute(&program, &mut world, "GO", &StopSignal::new(), &config).unwrap();
        assert_eq!(world.position(), (2, 2));
    }

    #[test]
    fn empty_while_body_is_skipped() {
        let (config, mut world) = setup();
        world.set_pose(2, 2, Direction::East);
        let program = program(&[("GO", vec![while_wall(vec![]), Instr::Print("done".into())])]);
        let output = execute(&program, &mut world, "GO", &StopSignal::new(), &config).unwrap();
        assert_eq!(output, vec!["done"]);
    }

    #[test]
    fn unknown_routine_is_an_error() {
        let (config, mut world) = setup();
        let program = program(&[("GO", vec![Instr::Call("NOWHERE".into())])]);
        let err = execute(&program, &mut world, "GO", &StopSignal::new(), &config).unwrap_err();
        assert_eq!(err, ExecError::UnknownRoutine("NOWHERE".into()));

        let err = execute(&program, &mut world, "MISSING", &StopSignal::new(), &config).unwrap_err();
        assert_eq!(err, ExecError::UnknownRoutine("MISSING".into()));
    }

    #[test]
    fn unknown_predicate_is_an_error() {
        let (config, mut world) = setup();
        let bad = Instr::While {
            pred: "FROG".into(),
            negated: false,
            body: vec![Instr::Step],
        };
        let program = program(&[("GO", vec![bad])]);
        let err = execute(&program, &mut world, "GO", &StopSignal::new(), &config).unwrap_err();
        assert_eq!(err, ExecError::UnknownPredicate("FROG".into()));
    }

    #[test]
    fn runaway_recursion_hits_the_depth_ceiling() {
        let (_, mut world) = setup();
        let config = Config {
            grid_size: 5,
            max_call_depth: 16,
            ..Config::default()
        };
        let program = program(&[
            ("A", vec![Instr::Call("B".into())]),
            ("B", vec![Instr::Call("A".into())]),
        ]);
        let err = execute(&program, &mut world, "A", &StopSignal::new(), &config).unwrap_err();
        assert_eq!(err, ExecError::CallDepthExceeded(16));
    }

    #[test]
    fn preset_stop_signal_runs_nothing() {
        let (config, mut world) = setup();
        world.set_pose(2, 2, Direction::East);
        let program = program(&[("GO", vec![Instr::Step, Instr::Print("x".into())])]);
        let stop = StopSignal::new();
        stop.set();
        let mut output = Vec::new();
        let halt = run(&program, &mut world, "GO", &stop, &mut output, &config).unwrap();
        assert_eq!(halt, Halt::Stopped);
        assert!(output.is_empty());
        assert_eq!(world.position(), (2, 2));
    }
}
