//! `om verify`: structural checks over one or more units

use crate::output::StyledOutput;
use om_bytecode::verify_unit;
use om_core::FileResolver;
use std::path::PathBuf;

pub fn execute(files: &[PathBuf], out: &mut StyledOutput) -> anyhow::Result<()> {
    let mut failed = 0;
    for file in files {
        let checked = FileResolver::load_file(file)
            .map_err(anyhow::Error::from)
            .and_then(|unit| verify_unit(&unit).map_err(anyhow::Error::from));
        match checked {
            Ok(meta) => out.success(&format!("{} (module {})", file.display(), meta.module)),
            Err(e) => {
                out.failure(&format!("{}: {}", file.display(), e));
                failed += 1;
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{} of {} unit(s) failed verification", failed, files.len());
    }
    Ok(())
}
