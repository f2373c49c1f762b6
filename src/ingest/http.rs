//! HTTP camera source.
//!
//! Handles two camera styles behind one URL:
//! - multipart MJPEG streams (`Content-Type: multipart/...`), scanned for
//!   JPEG SOI/EOI boundaries
//! - plain snapshot endpoints returning one JPEG per GET
//!
//! Frames are decimated to the configured target rate.

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use std::io::Read;
use std::time::{Duration, Instant};
use url::Url;

use super::{frame_interval, health_grace, FrameSource};

const MAX_JPEG_BYTES: usize = 5 * 1024 * 1024;

#[derive(Clone, Debug)]
pub struct HttpCameraConfig {
    /// Camera URL, http(s) scheme.
    pub url: String,
    /// Target frame rate; faster streams are decimated to this.
    pub target_fps: u32,
}

impl Default for HttpCameraConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:81/stream".to_string(),
            target_fps: 10,
        }
    }
}

enum HttpStream {
    Mjpeg(MjpegStream),
    SingleJpeg,
}

pub struct HttpCameraSource {
    config: HttpCameraConfig,
    stream: Option<HttpStream>,
    last_frame_at: Option<Instant>,
    connected_at: Option<Instant>,
    frame_count: u64,
}

impl HttpCameraSource {
    pub fn new(config: HttpCameraConfig) -> Result<Self> {
        let url = Url::parse(&config.url).context("parse camera url")?;
        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(anyhow!(
                    "unsupported camera scheme '{}'; expected http(s)",
                    other
                ))
            }
        }
        Ok(Self {
            config,
            stream: None,
            last_frame_at: None,
            connected_at: None,
            frame_count: 0,
        })
    }

    pub fn frames_captured(&self) -> u64 {
        self.frame_count
    }
}

impl FrameSource for HttpCameraSource {
    fn connect(&mut self) -> Result<()> {
        let response = ureq::get(&self.config.url)
            .call()
            .context("connect to camera http stream")?;
        let content_type = response.header("Content-Type").unwrap_or("");
        if content_type.to_lowercase().contains("multipart") {
            let reader = response.into_reader();
            self.stream = Some(HttpStream::Mjpeg(MjpegStream::new(reader)));
        } else {
            self.stream = Some(HttpStream::SingleJpeg);
        }
        self.connected_at = Some(Instant::now());
        Ok(())
    }

    fn disconnect(&mut self) {
        // Dropping the reader closes the underlying connection.
        self.stream = None;
        self.connected_at = None;
        self.last_frame_at = None;
    }

    fn next_frame(&mut self) -> Result<RgbImage> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| anyhow!("camera source not connected; call connect() first"))?;
        let min_interval = frame_interval(self.config.target_fps);
        loop {
            let jpeg_bytes = match stream {
                HttpStream::Mjpeg(stream) => stream.read_next_jpeg(),
                HttpStream::SingleJpeg => fetch_single_jpeg(&self.config.url),
            }?;

            let now = Instant::now();
            if let Some(last) = self.last_frame_at {
                if now.duration_since(last) < min_interval {
                    continue;
                }
            }

            let frame = image::load_from_memory(&jpeg_bytes)
                .context("decode camera jpeg")?
                .into_rgb8();
            self.frame_count += 1;
            self.last_frame_at = Some(now);
            return Ok(frame);
        }
    }

    fn is_healthy(&self) -> bool {
        let Some(connected_at) = self.connected_at else {
            return false;
        };
        let Some(last_frame_at) = self.last_frame_at else {
            return connected_at.elapsed() <= Duration::from_secs(5);
        };
        last_frame_at.elapsed() <= health_grace(self.config.target_fps)
    }

    fn describe(&self) -> String {
        format!("http camera {}", self.config.url)
    }
}

struct MjpegStream {
    reader: Box<dyn Read + Send>,
    buffer: Vec<u8>,
}

impl MjpegStream {
    fn new(reader: Box<dyn Read + Send>) -> Self {
        Self {
            reader,
            buffer: Vec::with_capacity(64 * 1024),
        }
    }

    fn read_next_jpeg(&mut self) -> Result<Vec<u8>> {
        let mut chunk = vec![0u8; 8192];
        loop {
            if let Some((start, end)) = find_jpeg_bounds(&self.buffer) {
                let frame = self.buffer[start..end].to_vec();
                self.buffer.drain(..end);
                return Ok(frame);
            }

            let read = self.reader.read(&mut chunk).context("read mjpeg chunk")?;
            if read == 0 {
                return Err(anyhow!("mjpeg stream ended"));
            }
            self.buffer.extend_from_slice(&chunk[..read]);

            if self.buffer.len() > MAX_JPEG_BYTES * 2 {
                let keep = 2.min(self.buffer.len());
                let drain_len = self.buffer.len() - keep;
                self.buffer.drain(..drain_len);
            }
        }
    }
}

fn fetch_single_jpeg(url: &str) -> Result<Vec<u8>> {
    let response = ureq::get(url)
        .call()
        .with_context(|| format!("fetch jpeg snapshot from {}", url))?;
    let mut bytes = Vec::new();
    response
        .into_reader()
        .read_to_end(&mut bytes)
        .context("read jpeg snapshot")?;
    if bytes.is_empty() {
        return Err(anyhow!("empty jpeg snapshot"));
    }
    Ok(bytes)
}

/// Locate one complete JPEG (SOI..EOI) in the buffer.
fn find_jpeg_bounds(buffer: &[u8]) -> Option<(usize, usize)> {
    let mut start = None;
    let mut i = 0;
    while i + 1 < buffer.len() {
        if buffer[i] == 0xFF && buffer[i + 1] == 0xD8 {
            start = Some(i);
            break;
        }
        i += 1;
    }
    let start = start?;
    let mut j = start + 2;
    while j + 1 < buffer.len() {
        if buffer[j] == 0xFF && buffer[j + 1] == 0xD9 {
            return Some((start, j + 2));
        }
        j += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn encode_jpeg(width: u32, height: u32) -> Vec<u8> {
        let frame = RgbImage::new(width, height);
        let mut bytes = Vec::new();
        let encoder = image::codecs::jpeg::JpegEncoder::new(&mut bytes);
        frame.write_with_encoder(encoder).unwrap();
        bytes
    }

    #[test]
    fn rejects_non_http_schemes() {
        let cfg = HttpCameraConfig {
            url: "rtsp://camera".to_string(),
            target_fps: 10,
        };
        assert!(HttpCameraSource::new(cfg).is_err());
    }

    #[test]
    fn next_frame_before_connect_fails() {
        let mut source = HttpCameraSource::new(HttpCameraConfig::default()).unwrap();
        assert!(source.next_frame().is_err());
        assert!(!source.is_healthy());
    }

    #[test]
    fn finds_jpeg_bounds_in_mjpeg_chunks() {
        let jpeg = encode_jpeg(8, 8);
        let mut stream = Vec::new();
        stream.extend_from_slice(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n");
        stream.extend_from_slice(&jpeg);
        stream.extend_from_slice(b"\r\n--frame\r\n");

        let (start, end) = find_jpeg_bounds(&stream).expect("jpeg in buffer");
        assert_eq!(&stream[start..start + 2], &[0xFF, 0xD8]);
        assert_eq!(&stream[end - 2..end], &[0xFF, 0xD9]);
        image::load_from_memory(&stream[start..end]).expect("decodable slice");
    }

    #[test]
    fn mjpeg_stream_yields_consecutive_frames() {
        let jpeg = encode_jpeg(8, 8);
        let mut wire = Vec::new();
        for _ in 0..2 {
            wire.extend_from_slice(b"--frame\r\n\r\n");
            wire.extend_from_slice(&jpeg);
            wire.extend_from_slice(b"\r\n");
        }
        let mut stream = MjpegStream::new(Box::new(Cursor::new(wire)));
        let first = stream.read_next_jpeg().unwrap();
        let second = stream.read_next_jpeg().unwrap();
        assert_eq!(first, jpeg);
        assert_eq!(second, jpeg);
    }
}
