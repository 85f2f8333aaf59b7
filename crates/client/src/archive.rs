use std::io::copy;
use std::path::Path;

use anyhow::{Context, Result};
use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Pack the given files and directories into a DEFLATE zip archive.
///
/// Directory inputs keep their relative structure beneath their parent, so
/// `compress(["/tmp/in/a"], out)` yields entries `a/…`. Empty directories are
/// written as explicit entries and survive the round trip.
pub fn compress(inputs: &[impl AsRef<Path>], output: &Path) -> Result<()> {
    let file = std::fs::File::create(output)
        .with_context(|| format!("Failed to create archive {}", output.display()))?;
    let mut writer = ZipWriter::new(file);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    for input in inputs {
        let input = input.as_ref();
        if input.is_file() {
            let name = input
                .file_name()
                .context("Input file has no basename")?
                .to_string_lossy()
                .into_owned();
            writer
                .start_file(name, options)
                .context("Failed to start archive entry")?;
            let mut source = std::fs::File::open(input)
                .with_context(|| format!("Failed to open {}", input.display()))?;
            copy(&mut source, &mut writer)
                .with_context(|| format!("Failed to compress {}", input.display()))?;
        } else if input.is_dir() {
            let base = input.parent().unwrap_or_else(|| Path::new(""));
            for entry in WalkDir::new(input) {
                let entry = entry.context("Failed to walk input directory")?;
                let name = entry
                    .path()
                    .strip_prefix(base)
                    .context("Entry escaped its input root")?
                    .to_string_lossy()
                    .into_owned();
                if entry.file_type().is_dir() {
                    writer
                        .add_directory(name, options)
                        .context("Failed to add archive directory")?;
                } else {
                    writer
                        .start_file(name, options)
                        .context("Failed to start archive entry")?;
                    let mut source = std::fs::File::open(entry.path())
                        .with_context(|| format!("Failed to open {}", entry.path().display()))?;
                    copy(&mut source, &mut writer)
                        .with_context(|| format!("Failed to compress {}", entry.path().display()))?;
                }
            }
        } else {
            println!(
                "Warning: {} is neither a file nor a directory, skipping.",
                input.display()
            );
        }
    }

    writer.finish().context("Failed to finish archive")?;
    Ok(())
}

/// Extract an archive into `output_dir`, optionally deleting the archive
/// afterwards.
pub fn decompress(archive: &Path, output_dir: &Path, delete_input: bool) -> Result<()> {
    let file = std::fs::File::open(archive)
        .with_context(|| format!("Failed to open archive {}", archive.display()))?;
    let mut zip = ZipArchive::new(file).context("Failed to read archive")?;
    zip.extract(output_dir)
        .with_context(|| format!("Failed to extract into {}", output_dir.display()))?;

    if delete_input {
        std::fs::remove_file(archive)
            .with_context(|| format!("Failed to delete archive {}", archive.display()))?;
    }
    Ok(())
}
