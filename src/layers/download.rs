use anyhow::{anyhow, Result};
use reqwest::{Client, Response};
use std::path::{Path, PathBuf};
use tokio::fs::{create_dir_all, File};
use tokio::io::AsyncWriteExt;

use crate::layers::pacing::Pacer;
use crate::layers::repository::Repository;

pub const ADS_GATEWAY_URL: &str = "https://ui.adsabs.harvard.edu/link_gateway";

pub struct Downloader {
    client: Client,
    base_dir: PathBuf,
    gateway: String,
}

impl Downloader {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            client: Client::new(),
            base_dir: base_dir.into(),
            gateway: ADS_GATEWAY_URL.to_string(),
        }
    }

    pub fn with_gateway(mut self, gateway: impl Into<String>) -> Self {
        self.gateway = gateway.into().trim_end_matches('/').to_string();
        self
    }

    /// `2021A&A...647A..10P` -> `2021A&A___647A__10P.pdf`
    pub fn file_name(bibcode: &str) -> String {
        format!("{}.pdf", bibcode.replace('.', "_"))
    }

    pub fn target_path(&self, bibcode: &str) -> PathBuf {
        self.base_dir.join(Self::file_name(bibcode))
    }

    /// Fetches the e-print PDF for `bibcode`, reusing a file already on disk.
    pub async fn download_pdf(&self, bibcode: &str) -> Result<PathBuf> {
        let pdf_path = self.target_path(bibcode);
        if pdf_path.exists() {
            tracing::warn!("PDF already exists for bibcode: {}", bibcode);
            return Ok(pdf_path);
        }
        create_dir_all(&self.base_dir).await?;

        let url = format!("{}/{}/EPRINT_PDF", self.gateway, urlencoding::encode(bibcode));
        tracing::info!("Downloading PDF from: {}", url);
        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            let err = format!("Failed to download PDF for bibcode {}: {}", bibcode, response.status());
            tracing::error!("{}", err);
            return Err(anyhow!(err));
        }

        save_body(response, &pdf_path).await?;
        Ok(pdf_path)
    }

    /// Downloads every stored paper that has no PDF yet and records the path.
    /// Returns how many papers gained a PDF.
    pub async fn run(&self, pacer: &Pacer, repo: &mut Repository) -> Result<usize> {
        let pending: Vec<String> = repo
            .papers()
            .filter(|p| p.pdf.is_none())
            .map(|p| p.bibcode.clone())
            .collect();
        let total = pending.len();
        let mut fetched = 0;

        for (i, bibcode) in pending.iter().enumerate() {
            if !self.target_path(bibcode).exists() {
                pacer.ready().await;
            }
            match self.download_pdf(bibcode).await {
                Ok(path) => {
                    tracing::info!("{:3}/{}: {} -> {:?}", i + 1, total, bibcode, path);
                    if let Some(paper) = repo.get_mut(bibcode) {
                        paper.pdf = Some(path);
                    }
                    fetched += 1;
                    repo.save().await?;
                }
                Err(e) => tracing::error!("Error downloading PDF for bibcode {}: {}", bibcode, e),
            }
        }
        Ok(fetched)
    }
}

/// Streams `response` into `<target>.part` and renames it into place.
/// On any failure the partial file is removed.
async fn save_body(mut response: Response, target: &Path) -> Result<()> {
    let partial = target.with_extension("pdf.part");
    let written: Result<()> = async {
        let mut file = File::create(&partial).await?;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        tokio::fs::rename(&partial, target).await?;
        Ok::<(), anyhow::Error>(())
    }
    .await;

    if written.is_err() && partial.exists() {
        if let Err(e) = tokio::fs::remove_file(&partial).await {
            tracing::warn!("Could not remove partial download {:?}: {}", partial, e);
        }
    }
    written
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::Paper;
    use mockito::{Matcher, Server};

    #[test]
    fn test_file_name_replaces_dots() {
        assert_eq!(Downloader::file_name("2021A&A...647A..10P"), "2021A&A___647A__10P.pdf");
    }

    #[tokio::test]
    async fn test_download_streams_pdf_to_disk() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", Matcher::Regex(r"^/2021A(%26|&)A\.\.\.647A\.\.10P/EPRINT_PDF$".into()))
            .with_status(200)
            .with_header("content-type", "application/pdf")
            .with_body("%PDF-1.4 test")
            .expect(1)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let downloader = Downloader::new(dir.path().join("pdfs")).with_gateway(server.url());

        let path = downloader.download_pdf("2021A&A...647A..10P").await.unwrap();
        assert_eq!(tokio::fs::read_to_string(&path).await.unwrap(), "%PDF-1.4 test");

        // second call reuses the file
        downloader.download_pdf("2021A&A...647A..10P").await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_failed_write_leaves_no_partial_file() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/paper.pdf")
            .with_status(200)
            .with_body("%PDF-1.4 test")
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        // a directory in the way makes the final rename fail
        let target = dir.path().join("2021A&A___647A__10P.pdf");
        std::fs::create_dir(&target).unwrap();

        let response = reqwest::get(format!("{}/paper.pdf", server.url())).await.unwrap();
        assert!(save_body(response, &target).await.is_err());
        assert!(!dir.path().join("2021A&A___647A__10P.pdf.part").exists());
        assert!(target.is_dir());
    }

    #[tokio::test]
    async fn test_run_records_paths_and_skips_failures() {
        let mut server = Server::new_async().await;
        let _ok = server
            .mock("GET", "/2020PhRvL.125v1301M/EPRINT_PDF")
            .with_status(200)
            .with_body("%PDF")
            .create_async()
            .await;
        let _missing = server
            .mock("GET", "/2022PTEP.2022e2A01E/EPRINT_PDF")
            .with_status(404)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let mut repo = Repository::create(dir.path().join("papers.json"), "q", Vec::new());
        repo.put(Paper::new("2020PhRvL.125v1301M", "t", "a"));
        repo.put(Paper::new("2022PTEP.2022e2A01E", "t", "a"));

        let downloader = Downloader::new(dir.path().join("pdfs")).with_gateway(server.url());
        let fetched = downloader.run(&Pacer::unlimited(), &mut repo).await.unwrap();

        assert_eq!(fetched, 1);
        assert_eq!(
            repo.get("2020PhRvL.125v1301M").unwrap().pdf,
            Some(dir.path().join("pdfs").join("2020PhRvL_125v1301M.pdf"))
        );
        assert!(repo.get("2022PTEP.2022e2A01E").unwrap().pdf.is_none());
        assert!(!dir.path().join("pdfs").join("2022PTEP_2022e2A01E.pdf").exists());
    }
}
