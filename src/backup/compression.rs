use crate::backup::pipeline::StageCommand;
use crate::error::Result;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// `7z` reading the dump from stdin into a single LZMA2 entry.
///
/// With a passphrase, headers are encrypted too (`-mhe=on`) so entry names
/// and sizes do not leak.
pub fn seven_zip_command(
    seven_zip: &Path,
    archive_path: &Path,
    entry_name: &str,
    passphrase: Option<&str>,
) -> StageCommand {
    let mut command = StageCommand::new(seven_zip)
        .arg("a")
        .arg("-t7z")
        .arg(format!("-si{}", entry_name))
        .args(["-md=1m", "-ms=off", "-mx=1", "-mm=LZMA2", "-mmt=1", "-bso0", "-bsp0"]);

    if let Some(passphrase) = passphrase.filter(|p| !p.is_empty()) {
        command = command.arg(format!("-p{}", passphrase)).arg("-mhe=on");
    }

    command.arg(archive_path)
}

pub fn calculate_sha256(file_path: &Path) -> Result<String> {
    use sha2::{Digest, Sha256};

    let file = File::open(file_path)?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 64 * 1024];

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    let hash = hasher.finalize();
    Ok(format!("{:x}", hash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    fn args(command: &StageCommand) -> Vec<String> {
        command
            .arg_list()
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_seven_zip_without_passphrase() {
        let command = seven_zip_command(Path::new("7z"), Path::new("/tmp/app.7z"), "app.dump", None);
        let args = args(&command);

        assert_eq!(args[0], "a");
        assert!(args.contains(&"-siapp.dump".to_string()));
        assert!(args.contains(&"-mm=LZMA2".to_string()));
        assert!(!args.iter().any(|a| a.starts_with("-p") || a == "-mhe=on"));
        assert_eq!(args.last().unwrap(), "/tmp/app.7z");
    }

    #[test]
    fn test_seven_zip_passphrase_encrypts_headers() {
        let command = seven_zip_command(
            Path::new("7z"),
            Path::new("/tmp/app.7z"),
            "app.sql",
            Some("correct horse"),
        );
        let args = args(&command);

        assert!(args.contains(&"-pcorrect horse".to_string()));
        assert!(args.contains(&"-mhe=on".to_string()));
        assert_eq!(args.last().unwrap(), "/tmp/app.7z");
    }

    #[test]
    fn test_empty_passphrase_is_ignored() {
        let command = seven_zip_command(Path::new("7z"), Path::new("a.7z"), "a.sql", Some(""));
        assert!(!args(&command).contains(&"-mhe=on".to_string()));
    }

    #[test]
    fn test_calculate_sha256() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("test.txt");

        let mut file = File::create(&file_path).unwrap();
        file.write_all(b"hello world").unwrap();

        let hash = calculate_sha256(&file_path).unwrap();
        assert_eq!(
            hash,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }
}
