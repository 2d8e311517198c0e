//! Source loading: comment stripping, routine collection, header parsing and
//! the indentation-driven block parser.
//!
//! A source file is a list of routine definitions followed by a map header.
//! Nesting is expressed with a fixed three-space marker, one per level, and
//! every block is closed by an `END` (or `END, ELSE` between the arms of an
//! `IF`) at the depth of the line that opened it. The loader classifies each
//! line exactly once; the interpreter never looks at text again.

use std::collections::HashMap;

use nom::{
    branch::alt,
    bytes::complete::tag,
    character::complete::{char, space0, u32 as dec_u32},
    combinator::{all_consuming, map, rest, value, verify},
    sequence::{pair, preceded, separated_pair, terminated},
    IResult, Parser,
};

use crate::interp::{Instr, Program};
use crate::translate;
use crate::world::{Cell, Direction, World};
use crate::Config;

/// The block marker: one of these per nesting level.
const INDENT: &str = "   ";

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum LoadError {
    #[error("source is not valid ISO-8859-2 text")]
    Encoding,
    #[error("no \"Map size\" header line")]
    MissingHeader,
    #[error("line {line}: expected \"{expected}\"")]
    Header { line: usize, expected: &'static str },
    #[error("line {line}: map does not fit the {size}x{size} grid")]
    MapTooLarge { line: usize, size: usize },
    #[error("line {line}: map row is shorter than the declared width")]
    ShortMapRow { line: usize },
    #[error("line {line}: unrecognized map glyph {glyph:?}")]
    BadGlyph { line: usize, glyph: char },
    #[error("line {line}: position is outside the grid")]
    OutsidePosition { line: usize },
    #[error("line {line}: block opened here has no matching END at its depth")]
    Unterminated { line: usize },
    #[error("line {line}: IF opened here has no matching \"END, ELSE\"")]
    MissingElse { line: usize },
    #[error("line {line}: unexpected indentation")]
    UnexpectedIndent { line: usize },
    #[error("line {line}: END without an open block")]
    StrayEnd { line: usize },
}

/// Everything the loader produces from one source file.
#[derive(Debug)]
pub struct Loaded {
    pub world: World,
    pub program: Program,
    /// The alias-translated source with comments preserved, one entry per
    /// input line. Round-trip aid: loading this text again yields the same
    /// program.
    pub translated: Vec<String>,
}

/// Decode raw `.K99` bytes and load them.
pub fn load_bytes(bytes: &[u8], config: &Config) -> Result<Loaded, LoadError> {
    load(&translate::decode(bytes)?, config)
}

/// Load already-decoded source text: translate aliases, strip comments,
/// collect routine definitions, and parse the map header into the initial
/// world.
pub fn load(source: &str, config: &Config) -> Result<Loaded, LoadError> {
    let translated: Vec<String> = source.lines().map(translate::translate_line).collect();

    // Comment-stripped view; blank results drop out but keep their numbers.
    let mut stripped = Vec::new();
    for (i, line) in translated.iter().enumerate() {
        let text = match line.find(';') {
            Some(at) => &line[..at],
            None => line.as_str(),
        };
        let text = text.trim_end();
        if !text.is_empty() {
            stripped.push(Line {
                number: i + 1,
                text: text.to_owned(),
            });
        }
    }

    let header_at = stripped
        .iter()
        .position(|line| line.text.starts_with("Map size"))
        .ok_or(LoadError::MissingHeader)?;

    let world = parse_header(&stripped[header_at..], config)?;
    let program = collect_routines(&stripped[..header_at])?;
    log::debug!(
        "loaded {} routine(s): {}",
        program.len(),
        program.names().collect::<Vec<_>>().join(", ")
    );

    Ok(Loaded {
        world,
        program,
        translated,
    })
}

/// One comment-stripped, right-trimmed source line.
#[derive(Clone, Debug)]
struct Line {
    number: usize,
    text: String,
}

impl Line {
    /// Nesting depth: the number of leading block markers.
    fn indent(&self) -> usize {
        let mut depth = 0;
        let mut rest = self.text.as_str();
        while let Some(stripped) = rest.strip_prefix(INDENT) {
            depth += 1;
            rest = stripped;
        }
        depth
    }

    /// The line with its block markers removed. Sub-marker indentation is
    /// left in place so malformed nesting stays visible to the parser.
    fn content(&self) -> &str {
        let mut rest = self.text.as_str();
        while let Some(stripped) = rest.strip_prefix(INDENT) {
            rest = stripped;
        }
        rest
    }

    /// Drop one leading block marker, if present. Used when hoisting a
    /// routine's body out of its definition.
    fn deindented(&self) -> Line {
        Line {
            number: self.number,
            text: self
                .text
                .strip_prefix(INDENT)
                .unwrap_or(&self.text)
                .to_owned(),
        }
    }
}

// ---------------------------------------------------------------------------
// Routine collection

/// Split the pre-header region into routine definitions and parse each body.
/// A depth-0 line that is not `END`-prefixed starts a routine; its body runs
/// to the matching depth-0 `END`. Later definitions of the same name win.
fn collect_routines(lines: &[Line]) -> Result<Program, LoadError> {
    let mut routines: HashMap<String, Vec<Instr>> = HashMap::new();
    let mut pos = 0;
    while pos < lines.len() {
        let opener = &lines[pos];
        if opener.indent() > 0 {
            return Err(LoadError::UnexpectedIndent {
                line: opener.number,
            });
        }
        if opener.content().starts_with("END") {
            return Err(LoadError::StrayEnd {
                line: opener.number,
            });
        }
        let name = opener.content().to_owned();
        pos += 1;

        let mut body = Vec::new();
        while let Some(next) = lines.get(pos) {
            if next.indent() == 0 && !next.content().starts_with("END") {
                break;
            }
            body.push(next.deindented());
            pos += 1;
        }
        let instrs = parse_routine(&body, opener.number)?;
        log::trace!("routine {name:?}: {} instruction(s)", instrs.len());
        routines.insert(name, instrs);
    }

    let mut program = Program::new();
    for (name, body) in routines {
        program.insert(name, body);
    }
    Ok(program)
}

/// Parse a routine's hoisted body: a depth-0 sequence closed by a final
/// depth-0 `END` with nothing after it.
fn parse_routine(lines: &[Line], opener: usize) -> Result<Vec<Instr>, LoadError> {
    let mut pos = 0;
    let body = parse_seq(lines, &mut pos, 0)?;
    match lines.get(pos) {
        Some(line) if line.indent() == 0 && line.content() == "END" => pos += 1,
        Some(line) => {
            return Err(LoadError::StrayEnd {
                line: line.number,
            })
        }
        None => return Err(LoadError::Unterminated { line: opener }),
    }
    match lines.get(pos) {
        None => Ok(body),
        Some(line) if line.indent() > 0 => Err(LoadError::UnexpectedIndent {
            line: line.number,
        }),
        Some(line) => Err(LoadError::StrayEnd {
            line: line.number,
        }),
    }
}

/// Parse consecutive instructions at exactly `depth`. Stops (without
/// consuming) at a terminator line or at anything shallower; the caller
/// decides whether that stop is legitimate.
fn parse_seq(lines: &[Line], pos: &mut usize, depth: usize) -> Result<Vec<Instr>, LoadError> {
    let mut seq = Vec::new();
    while let Some(line) = lines.get(*pos) {
        let d = line.indent();
        if d < depth {
            break;
        }
        if d > depth {
            return Err(LoadError::UnexpectedIndent {
                line: line.number,
            });
        }
        let content = line.content();
        if content == "END" || content == "END, ELSE" {
            break;
        }
        let number = line.number;
        *pos += 1;
        match classify(content) {
            LineKind::Plain(instr) => seq.push(instr),
            LineKind::Repeat(count) => {
                let body = parse_seq(lines, pos, depth + 1)?;
                expect_end(lines, pos, depth, number)?;
                seq.push(Instr::Repeat(count, body));
            }
            LineKind::While { pred, negated } => {
                let body = parse_seq(lines, pos, depth + 1)?;
                expect_end(lines, pos, depth, number)?;
                seq.push(Instr::While {
                    pred,
                    negated,
                    body,
                });
            }
            LineKind::If { pred, negated } => {
                let then_body = parse_seq(lines, pos, depth + 1)?;
                expect_end_else(lines, pos, depth, number)?;
                let else_body = parse_seq(lines, pos, depth + 1)?;
                expect_end(lines, pos, depth, number)?;
                seq.push(Instr::If {
                    pred,
                    negated,
                    then_body,
                    else_body,
                });
            }
        }
    }
    Ok(seq)
}

fn expect_end(
    lines: &[Line],
    pos: &mut usize,
    depth: usize,
    opener: usize,
) -> Result<(), LoadError> {
    match lines.get(*pos) {
        Some(line) if line.indent() == depth && line.content() == "END" => {
            *pos += 1;
            Ok(())
        }
        _ => Err(LoadError::Unterminated { line: opener }),
    }
}

fn expect_end_else(
    lines: &[Line],
    pos: &mut usize,
    depth: usize,
    opener: usize,
) -> Result<(), LoadError> {
    match lines.get(*pos) {
        Some(line) if line.indent() == depth && line.content() == "END, ELSE" => {
            *pos += 1;
            Ok(())
        }
        _ => Err(LoadError::MissingElse { line: opener }),
    }
}

// ---------------------------------------------------------------------------
// Line classification

#[derive(Clone, Debug)]
enum LineKind {
    Plain(Instr),
    Repeat(u32),
    While { pred: String, negated: bool },
    If { pred: String, negated: bool },
}

/// Classify one de-indented line. Anything that is not a recognized keyword
/// form is a routine call by name, checked against the program store only
/// when it is executed.
fn classify(content: &str) -> LineKind {
    match instr_line(content) {
        Ok((_, kind)) => kind,
        Err(_) => LineKind::Plain(Instr::Call(content.to_owned())),
    }
}

fn instr_line(input: &str) -> IResult<&str, LineKind> {
    alt((
        value(LineKind::Plain(Instr::Step), all_consuming(tag("STEP"))),
        value(LineKind::Plain(Instr::TurnLeft), all_consuming(tag("LEFT"))),
        value(LineKind::Plain(Instr::PickFlag), all_consuming(tag("PICK"))),
        value(
            LineKind::Plain(Instr::PlaceFlag),
            all_consuming(tag("PLACE")),
        ),
        map(preceded(tag("PRINT "), rest), |text: &str| {
            LineKind::Plain(Instr::Print(text.to_owned()))
        }),
        map(
            all_consuming(preceded(
                tag("REPEAT "),
                terminated(dec_u32, tag("-TIMES")),
            )),
            LineKind::Repeat,
        ),
        map(
            all_consuming(preceded(tag("UNTIL "), condition)),
            |(negated, pred)| LineKind::While { pred, negated },
        ),
        map(
            all_consuming(preceded(tag("IF "), condition)),
            |(negated, pred)| LineKind::If { pred, negated },
        ),
    ))(input)
}

/// `IS <name>` or `ISNOT <name>`. The predicate name is kept as text and
/// resolved at execution time.
fn condition(input: &str) -> IResult<&str, (bool, String)> {
    pair(
        terminated(
            alt((value(true, tag("ISNOT")), value(false, tag("IS")))),
            char(' '),
        ),
        map(verify(rest, |s: &str| !s.is_empty()), str::to_owned),
    )(input)
}

// ---------------------------------------------------------------------------
// Header parsing

/// Parse the map header into the initial world. `lines[0]` is the `Map size`
/// line; the four fixed fields are followed by an optional `Map definition`
/// marker and the declared number of map rows.
fn parse_header(lines: &[Line], config: &Config) -> Result<World, LoadError> {
    let grid = config.grid_size;
    let mut world = World::new(config);

    let size_line = header_line(lines, 0, "Map size: W, H")?;
    let (width, height) = field(size_line, "Map size:", "Map size: W, H", number_pair)?;
    let size_line = size_line.number;
    if width as usize > grid || height as usize > grid {
        return Err(LoadError::MapTooLarge {
            line: size_line,
            size: grid,
        });
    }

    let pos_line = header_line(lines, 1, "Karel position: X, Y")?;
    let (x, y) = field(pos_line, "Karel position:", "Karel position: X, Y", number_pair)?;
    let (x, y) = to_grid(x, y, grid).ok_or(LoadError::OutsidePosition {
        line: pos_line.number,
    })?;

    let rot_line = header_line(lines, 2, "Karel rotation: DIR")?;
    let facing = field(rot_line, "Karel rotation:", "Karel rotation: DIR", direction)?;

    let home_line = header_line(lines, 3, "Home position: X, Y")?;
    let (hx, hy) = field(home_line, "Home position:", "Home position: X, Y", number_pair)?;
    let (hx, hy) = to_grid(hx, hy, grid).ok_or(LoadError::OutsidePosition {
        line: home_line.number,
    })?;

    world.set_pose(x, y, facing);
    world.set_home(hx, hy);

    // Real files carry a "Map definition" marker before the rows.
    let mut row_at = 4;
    if let Some(line) = lines.get(4) {
        if line.content().starts_with("Map definition") {
            row_at = 5;
        }
    }

    for row in 0..height as usize {
        let line = header_line(lines, row_at + row, "a map row")?;
        let glyphs: Vec<char> = line.content().chars().collect();
        if glyphs.len() < width as usize {
            return Err(LoadError::ShortMapRow { line: line.number });
        }
        for (x, &glyph) in glyphs.iter().take(width as usize).enumerate() {
            match glyph {
                '.' => {}
                'X' => world.set_cell(x, row, Cell::Wall),
                '1'..='8' => {
                    let count = glyph.to_digit(10).unwrap() as u8;
                    world.set_cell(x, row, Cell::Flags(count));
                }
                other => {
                    return Err(LoadError::BadGlyph {
                        line: line.number,
                        glyph: other,
                    })
                }
            }
        }
    }

    if config.wall_outside_map {
        for x in 0..grid {
            for y in 0..grid {
                if x >= width as usize || y >= height as usize {
                    world.set_cell(x, y, Cell::Wall);
                }
            }
        }
    }

    log::debug!("map {width}x{height}, start ({x}, {y}) facing {facing:?}, home ({hx}, {hy})");
    Ok(world)
}

fn header_line<'a>(
    lines: &'a [Line],
    idx: usize,
    expected: &'static str,
) -> Result<&'a Line, LoadError> {
    lines.get(idx).ok_or_else(|| LoadError::Header {
        // The header exists, so `lines` is never empty here.
        line: lines.last().map(|l| l.number).unwrap_or(0),
        expected,
    })
}

/// Run a nom parser over `<prefix> <value>`, mapping any failure to a header
/// error naming the line.
fn field<'a, O>(
    line: &'a Line,
    prefix: &'static str,
    expected: &'static str,
    parser: impl Parser<&'a str, O, nom::error::Error<&'a str>>,
) -> Result<O, LoadError> {
    let mut full = all_consuming(preceded(pair(tag(prefix), space0), parser));
    match full.parse(line.content()) {
        Ok((_, parsed)) => Ok(parsed),
        Err(_) => Err(LoadError::Header {
            line: line.number,
            expected,
        }),
    }
}

fn number_pair(input: &str) -> IResult<&str, (u32, u32)> {
    separated_pair(dec_u32, pair(char(','), space0), dec_u32)(input)
}

fn direction(input: &str) -> IResult<&str, Direction> {
    alt((
        value(Direction::North, tag("NORTH")),
        value(Direction::West, tag("WEST")),
        value(Direction::South, tag("SOUTH")),
        value(Direction::East, tag("EAST")),
    ))(input)
}

/// 1-based header coordinates to 0-based grid coordinates.
fn to_grid(x: u32, y: u32, grid: usize) -> Option<(usize, usize)> {
    if x == 0 || y == 0 || x as usize > grid || y as usize > grid {
        return None;
    }
    Some((x as usize - 1, y as usize - 1))
}
