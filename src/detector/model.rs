//! Model file resolution and download

use std::fs;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::error::{Error, Result};

/// Return the local model path, downloading the model first if it is missing.
pub fn ensure_model(config: &Config) -> Result<PathBuf> {
    let model_path = config.model_path();
    if model_path.is_file() {
        return Ok(model_path);
    }

    tracing::info!(path = %model_path.display(), "Model not found");
    tracing::info!(url = %config.model_url, "Downloading model");

    let bytes = download(&config.model_url)?;
    let model = if config.model_url.ends_with(".zip") {
        extract_model(&bytes)?
    } else {
        bytes
    };

    install(&model_path, &model)?;
    tracing::info!(path = %model_path.display(), bytes = model.len(), "Model saved");
    Ok(model_path)
}

/// Map a resolution failure onto the detector-initialization error
pub fn unavailable(e: Error) -> Error {
    match e {
        Error::ModelUnavailable(_) => e,
        other => Error::ModelUnavailable(other.to_string()),
    }
}

fn download(url: &str) -> Result<Vec<u8>> {
    let response = reqwest::blocking::get(url)
        .map_err(|e| Error::Download(format!("request to {} failed: {}", url, e)))?;

    if !response.status().is_success() {
        return Err(Error::Download(format!(
            "{} returned {}",
            url,
            response.status()
        )));
    }

    let bytes = response
        .bytes()
        .map_err(|e| Error::Download(format!("reading {} failed: {}", url, e)))?;
    Ok(bytes.to_vec())
}

/// Pull the first `.onnx` member out of a zip archive
fn extract_model(archive: &[u8]) -> Result<Vec<u8>> {
    let mut zip = zip::ZipArchive::new(Cursor::new(archive))
        .map_err(|e| Error::Download(format!("not a zip archive: {}", e)))?;

    let name = zip
        .file_names()
        .find(|name| name.ends_with(".onnx"))
        .map(str::to_string)
        .ok_or_else(|| Error::Download("no .onnx model in archive".to_string()))?;

    let mut member = zip
        .by_name(&name)
        .map_err(|e| Error::Download(format!("{} unreadable in archive: {}", name, e)))?;

    let mut data = Vec::with_capacity(member.size() as usize);
    member.read_to_end(&mut data)?;
    Ok(data)
}

/// Write next to the target then rename, so a half-written model never appears
fn install(model_path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = model_path.parent() {
        fs::create_dir_all(parent)?;
    }

    let partial = model_path.with_extension("partial");
    fs::write(&partial, data)?;
    fs::rename(&partial, model_path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn config_in(dir: &Path) -> Config {
        Config {
            data_dir: dir.to_path_buf(),
            // Unroutable: any download attempt fails fast
            model_url: "http://127.0.0.1:9/model.onnx".to_string(),
            min_confidence: 0.33,
        }
    }

    #[test]
    fn test_existing_model_is_not_downloaded() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        install(&config.model_path(), b"weights").unwrap();

        assert_eq!(ensure_model(&config).unwrap(), config.model_path());
    }

    #[test]
    fn test_failed_download_leaves_no_model() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());

        let err = ensure_model(&config).unwrap_err();
        assert!(matches!(err, Error::Download(_)));
        assert!(matches!(unavailable(err), Error::ModelUnavailable(_)));
        assert!(!config.model_path().exists());
    }

    fn archive(members: &[(&str, &[u8])]) -> Vec<u8> {
        let mut buffer = Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut buffer);
            let options = zip::write::SimpleFileOptions::default();
            for (name, data) in members {
                writer.start_file(*name, options).unwrap();
                writer.write_all(data).unwrap();
            }
            writer.finish().unwrap();
        }
        buffer.into_inner()
    }

    #[test]
    fn test_extract_model_from_zip() {
        let bundle = archive(&[
            ("coco.names", b"person\nbicycle\n"),
            ("yolov4/yolov4.onnx", b"ONNX"),
        ]);
        assert_eq!(extract_model(&bundle).unwrap(), b"ONNX");

        let labels_only = archive(&[("coco.names", b"person\n")]);
        assert!(matches!(extract_model(&labels_only), Err(Error::Download(_))));
    }
}
