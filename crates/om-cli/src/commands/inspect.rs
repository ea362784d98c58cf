//! `om inspect`: dump a unit's metadata as JSON

use anyhow::Context;
use om_core::FileResolver;
use serde_json::json;
use std::path::Path;

pub fn execute(file: &Path, with_code: bool) -> anyhow::Result<()> {
    let unit = FileResolver::load_file(file)?;
    let metadata = unit
        .metadata()
        .with_context(|| format!("Malformed metadata in {}", file.display()))?;

    let mut report = json!({
        "file": file.display().to_string(),
        "code_size": unit.code.len(),
        "metadata": metadata,
    });
    if with_code {
        let code: Vec<String> = unit
            .instructions()
            .with_context(|| format!("Malformed code in {}", file.display()))?
            .iter()
            .map(|instr| instr.to_string())
            .collect();
        report["code"] = json!(code);
    }

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
