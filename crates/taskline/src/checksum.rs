use std::path::Path;

use md5::{Digest, Md5};
use tokio::io::AsyncReadExt;

use crate::error::{Result, TasklineError};
use crate::storage::Storage;

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// MD5 of the file at `path` as lower-case hex, read in chunks.
pub async fn md5sum(storage: &dyn Storage, path: &Path) -> Result<String> {
    let mut reader = storage.open(path).await?;
    let mut hasher = Md5::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let n = reader
            .read(&mut buf)
            .await
            .map_err(|e| TasklineError::storage(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}
