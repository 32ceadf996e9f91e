use std::path::{Path, PathBuf};

use tracing::debug;

use super::super::error::SaveError;

/// Builds the on-disk name for page `index`: `"{index}.{extension}"`.
pub(super) fn page_file_name(index: usize, extension: &str) -> String {
    format!("{index}.{extension}")
}

/// Checks that `body` decodes as an image and writes it to `dir`.
///
/// Decoding runs on the blocking pool. The original bytes are written as
/// fetched; the decode only proves the payload is a usable image.
pub(super) async fn save_image(
    dir: &Path,
    index: usize,
    url: &str,
    extension: &str,
    body: Vec<u8>,
) -> Result<String, SaveError> {
    let file_name = page_file_name(index, extension);
    let path: PathBuf = dir.join(&file_name);
    let url_owned = url.to_string();

    let join = tokio::task::spawn_blocking(move || -> Result<PathBuf, SaveError> {
        let decoded = image::load_from_memory(&body).map_err(|source| SaveError::Decode {
            index,
            url: url_owned,
            source,
        })?;
        debug!(
            index,
            width = decoded.width(),
            height = decoded.height(),
            "decoded page image"
        );
        std::fs::write(&path, &body).map_err(|e| SaveError::io(&path, e))?;
        Ok(path)
    })
    .await;

    match join {
        Ok(result) => {
            let path = result?;
            debug!(index, path = %path.display(), "saved page image");
            Ok(file_name)
        }
        Err(join_error) => Err(SaveError::Worker {
            index,
            message: join_error.to_string(),
        }),
    }
}
