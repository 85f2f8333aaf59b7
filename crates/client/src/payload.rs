use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tunnel_protocol::FileMetadata;
use uuid::Uuid;

use crate::{archive, checksum};

/// The file actually placed on the wire: either the user's single file or a
/// temporary archive of everything they asked to send. The temporary archive
/// is removed when the payload is dropped, whichever way the transfer ends.
pub struct Payload {
    path: PathBuf,
    temporary: bool,
}

impl Payload {
    pub fn prepare(paths: &[PathBuf]) -> Result<Self> {
        if let [single] = paths
            && single.is_file()
        {
            return Ok(Self {
                path: single.clone(),
                temporary: false,
            });
        }

        println!("Multiple files or directory detected: compressing...");
        let archive_path = std::env::temp_dir().join(format!("tunnel-{}.zip", Uuid::new_v4()));
        archive::compress(paths, &archive_path)?;
        println!("Compression finished");

        Ok(Self {
            path: archive_path,
            temporary: true,
        })
    }

    /// Compute the immutable descriptor sent to the server at registration.
    pub fn metadata(&self) -> Result<FileMetadata> {
        let filename = self
            .path
            .file_name()
            .context("Payload path has no basename")?
            .to_string_lossy()
            .into_owned();
        let filesize = std::fs::metadata(&self.path)
            .with_context(|| format!("Failed to stat {}", self.path.display()))?
            .len();
        Ok(FileMetadata {
            filename,
            filesize,
            checksum: checksum::file_sha256(&self.path)?,
            should_unzip: self.temporary,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for Payload {
    fn drop(&mut self) {
        if self.temporary {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_file_is_sent_directly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello.txt");
        std::fs::write(&path, "hello world\n").unwrap();

        let payload = Payload::prepare(&[path.clone()]).unwrap();
        assert_eq!(payload.path(), path);

        let metadata = payload.metadata().unwrap();
        assert_eq!(metadata.filename, "hello.txt");
        assert_eq!(metadata.filesize, 12);
        assert!(!metadata.should_unzip);
        assert_eq!(metadata.checksum, checksum::file_sha256(&path).unwrap());

        drop(payload);
        assert!(path.exists(), "direct payloads must never be deleted");
    }

    #[test]
    fn multiple_inputs_are_archived_and_cleaned_up() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("one.txt");
        let second = dir.path().join("two.txt");
        std::fs::write(&first, "1").unwrap();
        std::fs::write(&second, "2").unwrap();

        let payload = Payload::prepare(&[first, second]).unwrap();
        let archive_path = payload.path().to_path_buf();
        assert!(archive_path.exists());

        let metadata = payload.metadata().unwrap();
        assert!(metadata.should_unzip);
        assert!(metadata.filename.ends_with(".zip"));
        assert!(metadata.filesize > 0);

        drop(payload);
        assert!(!archive_path.exists(), "temporary archive must be removed");
    }

    #[test]
    fn single_directory_is_archived() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("tree");
        std::fs::create_dir_all(input.join("sub")).unwrap();
        std::fs::write(input.join("sub").join("f"), "x").unwrap();

        let payload = Payload::prepare(&[input]).unwrap();
        assert!(payload.metadata().unwrap().should_unzip);
    }
}
