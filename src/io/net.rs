use crate::{error::Result, io::progress::emit_download_progress};
use reqwest::blocking::Client;
use std::{
    fs::{self, File},
    io::{Read, Write},
    path::Path,
    time::Duration,
};
use tracing::debug;

pub fn http_client() -> Result<Client> {
    let client = Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(60 * 60))
        .user_agent(concat!("audio-studio-ai/", env!("CARGO_PKG_VERSION")))
        .build()?;
    Ok(client)
}

/// Streams `url` into `dest` through a sibling `.part` file.
pub fn download_with_progress(client: &Client, url: &str, dest: &Path) -> Result<u64> {
    let tmp = dest.with_extension("part");
    debug!(url, dest = %dest.display(), "downloading artifact");

    let mut resp = client.get(url).send()?.error_for_status()?;
    let total = resp.content_length().unwrap_or(0);
    emit_download_progress(0, total);

    let mut file = File::create(&tmp)?;
    let mut downloaded: u64 = 0;
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = resp.read(&mut buf)?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n])?;
        downloaded += n as u64;
        emit_download_progress(downloaded, total);
    }
    file.flush()?;
    drop(file);

    if dest.exists() {
        fs::remove_file(dest).ok();
    }
    fs::rename(&tmp, dest)?;

    emit_download_progress(total.max(downloaded), total.max(downloaded));
    Ok(downloaded)
}
