//! Branch-size optimizer
//!
//! Every branch, case table and try entry is first treated as a *site*
//! recording its current width and the instructions its offsets point at.
//! Sites are then shrunk to the narrowest width their offsets fit in. Each
//! shrink ripples a byte saving into every position past the shrunk
//! instruction, which can let other sites shrink in turn, so whole passes
//! repeat until a pass changes nothing. Widths only ever decrease, so the
//! iteration terminates. The stream is finally re-emitted from the decoded
//! instructions with their final widths and offsets, and entry points are
//! corrected by the same savings.

use crate::encoder::{BytecodeWriter, DecodeError};
use crate::instruction::{decode_stream, Instruction, Operand};
use crate::metadata::{encode_records, MetaRecord};
use crate::opcode::Width;
use crate::unit::{CompiledUnit, UnitError};
use thiserror::Error;
use tracing::debug;

/// Optimizer errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OptimizeError {
    /// Code stream does not decode
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Metadata does not decode
    #[error("unit error: {0}")]
    Unit(#[from] UnitError),

    /// Branch target is not the start of an instruction
    #[error("branch at offset {at} targets {target}, which is not an instruction boundary")]
    MisalignedTarget {
        /// Offset of the branching instruction
        at: usize,
        /// Absolute target
        target: i64,
    },

    /// Entry point is not the start of an instruction
    #[error("entry point {0} is not an instruction boundary")]
    MisalignedEntry(u32),
}

/// Result of optimizing a code stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Optimized {
    /// Re-emitted code
    pub code: Vec<u8>,
    /// Entry points moved to their new offsets, in input order
    pub entry_points: Vec<u32>,
    /// Number of passes run, including the final stable one
    pub passes: usize,
    /// Bytes removed
    pub bytes_saved: usize,
}

/// Result of optimizing a compiled unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptimizedUnit {
    /// Unit with re-emitted code and corrected method offsets
    pub unit: CompiledUnit,
    /// Number of passes run
    pub passes: usize,
    /// Bytes removed
    pub bytes_saved: usize,
}

/// A branching instruction whose offsets share one width
#[derive(Debug)]
struct Site {
    /// Index of the instruction
    instr: usize,
    width: Width,
    /// Target instruction index per encoded offset (`None` = no-catch marker)
    targets: Vec<Option<usize>>,
}

impl Site {
    fn needed_width(&self, starts: &[i64]) -> Width {
        let from = starts[self.instr];
        self.targets
            .iter()
            .flatten()
            .map(|&t| Width::for_offset(starts[t] - from))
            .max()
            .unwrap_or(Width::Narrow)
    }
}

/// Locate the instruction starting at `target`; `instrs.len()` is the end of code
fn boundary(instrs: &[Instruction], code_len: usize, target: i64) -> Option<usize> {
    if target == code_len as i64 {
        return Some(instrs.len());
    }
    if target < 0 {
        return None;
    }
    instrs
        .binary_search_by_key(&(target as usize), |i| i.offset)
        .ok()
}

fn collect_sites(instrs: &[Instruction], code_len: usize) -> Result<Vec<Site>, OptimizeError> {
    let mut sites = Vec::new();
    for (index, instr) in instrs.iter().enumerate() {
        let raw: Vec<Option<i32>> = match &instr.operand {
            Operand::Offset(off) => vec![Some(*off)],
            Operand::Table(table) => table.iter().copied().map(Some).collect(),
            Operand::TryPair { catch, finally } => {
                vec![(*catch != 0).then_some(*catch), Some(*finally)]
            }
            _ => continue,
        };
        let mut targets = Vec::with_capacity(raw.len());
        for off in raw {
            targets.push(match off {
                None => None,
                Some(off) => {
                    let target = instr.offset as i64 + off as i64;
                    let t = boundary(instrs, code_len, target).ok_or(
                        OptimizeError::MisalignedTarget {
                            at: instr.offset,
                            target,
                        },
                    )?;
                    Some(t)
                }
            });
        }
        sites.push(Site {
            instr: index,
            width: instr.width,
            targets,
        });
    }
    Ok(sites)
}

/// Subtract `saving` from every position strictly after `pos`
fn ripple(starts: &mut [i64], pos: i64, saving: i64) {
    for start in starts.iter_mut().filter(|s| **s > pos) {
        *start -= saving;
    }
}

/// Shrink every branch, case table and try entry in `code` to its minimal width
///
/// `entry_points` (method starts) are moved along with the code.
pub fn optimize(code: &[u8], entry_points: &[u32]) -> Result<Optimized, OptimizeError> {
    let instrs = decode_stream(code)?;

    // starts[i] is the current start of instruction i; the extra slot is end of code
    let mut starts: Vec<i64> = instrs.iter().map(|i| i.offset as i64).collect();
    starts.push(code.len() as i64);

    let entries: Vec<usize> = entry_points
        .iter()
        .map(|&e| boundary(&instrs, code.len(), e as i64).ok_or(OptimizeError::MisalignedEntry(e)))
        .collect::<Result<_, _>>()?;

    let mut sites = collect_sites(&instrs, code.len())?;

    let mut passes = 0;
    loop {
        passes += 1;
        let mut changed = false;
        for site in sites.iter_mut() {
            let needed = site.needed_width(&starts);
            if needed < site.width {
                let per_offset = (site.width.bytes() - needed.bytes()) as i64;
                let saving = per_offset * site.targets.len() as i64;
                let from = starts[site.instr];
                ripple(&mut starts, from, saving);
                site.width = needed;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    // Re-emit with final widths
    let mut widths: Vec<Option<Width>> = vec![None; instrs.len()];
    let mut resolved: Vec<Option<&Site>> = vec![None; instrs.len()];
    for site in &sites {
        widths[site.instr] = Some(site.width);
        resolved[site.instr] = Some(site);
    }

    let mut writer = BytecodeWriter::with_capacity(code.len());
    for (index, instr) in instrs.iter().enumerate() {
        debug_assert_eq!(writer.offset() as i64, starts[index]);
        let mut out = instr.clone();
        out.offset = writer.offset();
        if let (Some(width), Some(site)) = (widths[index], resolved[index]) {
            let from = starts[index];
            let offsets: Vec<i32> = site
                .targets
                .iter()
                .map(|t| t.map_or(0, |t| (starts[t] - from) as i32))
                .collect();
            out.width = width;
            out.operand = match &instr.operand {
                Operand::Offset(_) => Operand::Offset(offsets[0]),
                Operand::Table(_) => Operand::Table(offsets),
                Operand::TryPair { .. } => Operand::TryPair {
                    catch: offsets[0],
                    finally: offsets[1],
                },
                other => other.clone(),
            };
        }
        out.write(&mut writer);
    }
    debug_assert_eq!(writer.offset() as i64, starts[instrs.len()]);

    let new_code = writer.into_bytes();
    let bytes_saved = code.len() - new_code.len();
    let entry_points = entries.iter().map(|&i| starts[i] as u32).collect();

    debug!(
        passes,
        bytes_saved,
        sites = sites.len(),
        "branch optimization finished"
    );

    Ok(Optimized {
        code: new_code,
        entry_points,
        passes,
        bytes_saved,
    })
}

/// Optimize a single unit, rewriting every method's code offset
pub fn optimize_unit(unit: &CompiledUnit) -> Result<OptimizedUnit, OptimizeError> {
    let mut records = unit.records()?;
    let entries: Vec<u32> = records
        .iter()
        .filter_map(|r| match r {
            MetaRecord::Method { code_offset, .. } => Some(*code_offset),
            _ => None,
        })
        .collect();

    let optimized = optimize(&unit.code, &entries)?;

    let mut moved = optimized.entry_points.iter();
    for record in records.iter_mut() {
        if let MetaRecord::Method { code_offset, .. } = record {
            if let Some(&new_offset) = moved.next() {
                *code_offset = new_offset;
            }
        }
    }

    Ok(OptimizedUnit {
        unit: CompiledUnit::new(encode_records(&records), optimized.code),
        passes: optimized.passes,
        bytes_saved: optimized.bytes_saved,
    })
}
