//! HTTP-backed [`SitemapParser`] (spec §6): fetches a sitemap and
//! streams the URLs it contains, dispatched by the feed's inferred
//! [`SitemapFormat`]. XML and RSS/Atom feeds are parsed incrementally
//! with `quick-xml`'s pull reader so memory use stays bounded by the
//! channel capacity rather than the URL count, matching the teacher's
//! `crawl_engine` preference for streaming over buffer-everything.

use flate2::read::GzDecoder;
use futures::stream::BoxStream;
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use reqwest::Client;
use std::io::Read;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use super::SitemapParser;
use crate::pipeline::types::{SitemapFormat, SitemapRef};

const CHANNEL_CAPACITY: usize = 256;

/// Fetches and parses sitemaps over HTTP.
pub struct HttpSitemapParser {
    client: Client,
}

impl HttpSitemapParser {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl SitemapParser for HttpSitemapParser {
    async fn parse(
        &self,
        cancel: &CancellationToken,
        sitemap: &SitemapRef,
    ) -> Result<BoxStream<'static, String>, String> {
        let response = tokio::select! {
            () = cancel.cancelled() => return Err("cancelled".to_string()),
            r = self.client.get(&sitemap.url).send() => r.map_err(|e| e.to_string())?,
        };
        if !response.status().is_success() {
            return Err(format!("sitemap fetch failed: status {}", response.status()));
        }
        let bytes = response.bytes().await.map_err(|e| e.to_string())?;
        let format = sitemap.format;

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        tokio::task::spawn_blocking(move || stream_urls(&bytes, format, &tx));
        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

fn stream_urls(bytes: &[u8], format: SitemapFormat, tx: &mpsc::Sender<String>) {
    match format {
        SitemapFormat::Txt => stream_txt(bytes, tx),
        SitemapFormat::XmlGz => {
            let mut decompressed = Vec::new();
            if GzDecoder::new(bytes).read_to_end(&mut decompressed).is_ok() {
                stream_xml(&decompressed, tx);
            } else {
                log::warn!("sitemap: failed to decompress .xml.gz body");
            }
        }
        SitemapFormat::Xml | SitemapFormat::Rss => stream_xml(bytes, tx),
    }
}

fn stream_txt(bytes: &[u8], tx: &mpsc::Sender<String>) {
    for line in String::from_utf8_lossy(bytes).lines() {
        let line = line.trim();
        if !line.is_empty() {
            let _ = tx.blocking_send(line.to_string());
        }
    }
}

/// Recognizes both `<loc>` (sitemap.xml convention) and `<link>`
/// (RSS/Atom convention) as URL-bearing tags.
fn stream_xml(bytes: &[u8], tx: &mpsc::Sender<String>) {
    let mut reader = Reader::from_reader(bytes);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut in_url_tag = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                let name = e.local_name();
                in_url_tag = name.as_ref() == b"loc" || name.as_ref() == b"link";
            }
            Ok(Event::Text(e)) => {
                if in_url_tag
                    && let Ok(text) = e.unescape() {
                        let text = text.trim();
                        if !text.is_empty() {
                            let _ = tx.blocking_send(text.to_string());
                        }
                    }
            }
            Ok(Event::End(_)) => in_url_tag = false,
            Ok(Event::Eof) => break,
            Err(e) => {
                log::warn!("sitemap: malformed XML, stopping early: {e}");
                break;
            }
            _ => {}
        }
        buf.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn parses_urlset_xml() {
        let xml = br#"<?xml version="1.0"?><urlset><url><loc>https://s/a</loc></url><url><loc>https://s/b</loc></url></urlset>"#.to_vec();
        let (tx, rx) = mpsc::channel(16);
        tokio::task::spawn_blocking(move || stream_xml(&xml, &tx)).await.unwrap();
        let urls: Vec<String> = ReceiverStream::new(rx).collect().await;
        assert_eq!(urls, vec!["https://s/a".to_string(), "https://s/b".to_string()]);
    }

    #[tokio::test]
    async fn parses_rss_link_tags() {
        let xml = br#"<rss><channel><item><link>https://s/post-1</link></item></channel></rss>"#.to_vec();
        let (tx, rx) = mpsc::channel(16);
        tokio::task::spawn_blocking(move || stream_xml(&xml, &tx)).await.unwrap();
        let urls: Vec<String> = ReceiverStream::new(rx).collect().await;
        assert_eq!(urls, vec!["https://s/post-1".to_string()]);
    }

    #[tokio::test]
    async fn parses_txt_one_url_per_line() {
        let (tx, rx) = mpsc::channel(16);
        tokio::task::spawn_blocking(move || stream_txt(b"https://s/a\n\nhttps://s/b\n", &tx))
            .await
            .unwrap();
        let urls: Vec<String> = ReceiverStream::new(rx).collect().await;
        assert_eq!(urls, vec!["https://s/a".to_string(), "https://s/b".to_string()]);
    }

    #[tokio::test]
    async fn malformed_xml_stops_without_panicking() {
        let (tx, rx) = mpsc::channel(16);
        tokio::task::spawn_blocking(move || stream_xml(b"<urlset><url><loc>https://s/a</loc>", &tx))
            .await
            .unwrap();
        let urls: Vec<String> = ReceiverStream::new(rx).collect().await;
        assert_eq!(urls, vec!["https://s/a".to_string()]);
    }
}
