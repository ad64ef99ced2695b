use std::fs;
use std::io::{self, Write};

use anyhow::{bail, Context, Result};
use registry::RegistryOptions;
use unified::{split, ShaderSource, StageBlock};

use crate::cli::SplitArgs;

/// Prints each derived stage source with the offsets used to remap its
/// diagnostics.
pub fn run_split(args: SplitArgs, options: &RegistryOptions) -> Result<()> {
    let text = fs::read_to_string(&args.file)
        .with_context(|| format!("failed to read {}", args.file.display()))?;
    let name = args
        .file
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("shader")
        .to_string();
    let source = ShaderSource::new(name, text).with_path(args.file.as_path());
    let shader = split(&source, &options.split)?;

    let blocks: Vec<&StageBlock> = shader
        .stages()
        .iter()
        .filter(|block| args.stage.map_or(true, |kind| block.kind() == kind))
        .collect();
    if let Some(kind) = args.stage {
        if blocks.is_empty() {
            bail!("{} has no {kind} stage", args.file.display());
        }
    }

    let stdout = io::stdout();
    let mut out = stdout.lock();
    for block in blocks {
        write_block(&mut out, block)?;
    }
    Ok(())
}

fn write_block(out: &mut impl Write, block: &StageBlock) -> io::Result<()> {
    writeln!(
        out,
        "// ---- {} stage: entry `{}`, header {} lines, body {} ----",
        block.kind(),
        block.entry_name(),
        block.header_lines(),
        block.body_lines(),
    )?;
    out.write_all(block.source().as_bytes())?;
    if !block.source().ends_with('\n') {
        writeln!(out)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use unified::{split_text, SplitOptions};

    const SHADER: &str = "#version 410 core
#pragma vertex
@entry void vs() { gl_Position = vec4(0.0); }
#pragma fragment
out vec4 color;
@entry void fs() { color = vec4(1.0); }
";

    #[test]
    fn block_banner_names_entry_and_offsets() {
        let shader = split_text("banner", SHADER, &SplitOptions::default()).unwrap();
        let mut out = Vec::new();
        write_block(&mut out, &shader.stages()[1]).unwrap();
        let text = String::from_utf8(out).unwrap();

        let banner = text.lines().next().unwrap();
        assert!(banner.contains("fragment stage"));
        assert!(banner.contains("entry `fs`"));
        assert!(banner.contains("lines 5-6"));
        assert!(text.contains("void main()"));
    }
}
