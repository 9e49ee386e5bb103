use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::time::Instant;

use pix_album::collage_generator::{generate_collage, CollageFormat, DEFAULT_CELL_SIZE};

const USAGE: &str =
    "Usage: pix-collage <output> <input>... [--cell-size N] [--format jpeg|png]";

#[derive(Debug)]
struct Args {
    output: PathBuf,
    inputs: Vec<PathBuf>,
    cell_size: u32,
    format: CollageFormat,
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<Args> {
    let mut positional = Vec::new();
    let mut cell_size = DEFAULT_CELL_SIZE;
    let mut format = None;

    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--cell-size" => {
                let value = args.next().context("--cell-size needs a value")?;
                cell_size = value
                    .parse()
                    .with_context(|| format!("Invalid cell size: {}", value))?;
            }
            "--format" => {
                let value = args.next().context("--format needs a value")?;
                format = Some(value.parse::<CollageFormat>()?);
            }
            "-h" | "--help" => bail!(USAGE),
            _ => positional.push(PathBuf::from(arg)),
        }
    }

    if positional.len() < 2 {
        bail!(USAGE);
    }
    let output = positional.remove(0);

    // Without --format the output extension decides
    let format = match format {
        Some(format) => format,
        None => format_from_extension(&output).unwrap_or_default(),
    };

    Ok(Args {
        output,
        inputs: positional,
        cell_size,
        format,
    })
}

fn format_from_extension(path: &Path) -> Option<CollageFormat> {
    path.extension()?.to_str()?.parse().ok()
}

fn main() -> Result<()> {
    env_logger::init();

    let args = parse_args(std::env::args().skip(1))?;

    let mut photos = Vec::with_capacity(args.inputs.len());
    for input in &args.inputs {
        match std::fs::read(input) {
            Ok(data) => photos.push(data),
            Err(e) => eprintln!("Skipping {}: {}", input.display(), e),
        }
    }

    let start = Instant::now();
    let Some(collage) = generate_collage(&photos, args.cell_size, args.format)? else {
        bail!("No usable photos among {} inputs", args.inputs.len());
    };

    std::fs::write(&args.output, &collage.bytes)
        .with_context(|| format!("Failed to write {}", args.output.display()))?;

    println!(
        "Wrote {} ({}x{} grid, {}x{}px, {} placed, {} skipped) in {:.2?}",
        args.output.display(),
        collage.layout.columns,
        collage.layout.rows,
        collage.width,
        collage.height,
        collage.placed,
        collage.skipped + (args.inputs.len() - photos.len()),
        start.elapsed()
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_args() {
        let parsed = parse_args(args(&["out.png", "a.jpg", "b.jpg", "--cell-size", "120"])).unwrap();
        assert_eq!(parsed.output, PathBuf::from("out.png"));
        assert_eq!(parsed.inputs.len(), 2);
        assert_eq!(parsed.cell_size, 120);
        assert_eq!(parsed.format, CollageFormat::Png);

        let parsed = parse_args(args(&["--format", "jpeg", "out.png", "a.jpg"])).unwrap();
        assert_eq!(parsed.format, CollageFormat::Jpeg);

        let parsed = parse_args(args(&["out", "a.jpg"])).unwrap();
        assert_eq!(parsed.format, CollageFormat::Jpeg);
        assert_eq!(parsed.cell_size, DEFAULT_CELL_SIZE);
    }

    #[test]
    fn test_parse_args_rejects_bad_input() {
        assert!(parse_args(args(&["out.jpg"])).is_err());
        assert!(parse_args(args(&["out.jpg", "a.jpg", "--cell-size", "big"])).is_err());
        assert!(parse_args(args(&["out.jpg", "a.jpg", "--format", "tiff"])).is_err());
        assert!(parse_args(args(&["out.jpg", "a.jpg", "--cell-size"])).is_err());
    }
}
