//! `om optimize`: shrink the branch operands of one unit

use crate::output::StyledOutput;
use anyhow::Context;
use om_bytecode::optimize_unit;
use om_core::FileResolver;
use std::path::Path;

pub fn execute(input: &Path, output: &Path, out: &mut StyledOutput) -> anyhow::Result<()> {
    let unit = FileResolver::load_file(input)?;
    let optimized = optimize_unit(&unit)
        .with_context(|| format!("Failed to optimize {}", input.display()))?;
    std::fs::write(output, optimized.unit.encode())
        .with_context(|| format!("Failed to write {}", output.display()))?;

    out.success(&format!(
        "{} -> {} ({} bytes saved in {} passes)",
        input.display(),
        output.display(),
        optimized.bytes_saved,
        optimized.passes
    ));
    Ok(())
}
