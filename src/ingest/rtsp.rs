//! RTSP media backend.
//!
//! `RtspBackend` opens:
//! - `stub://<name>[?options]`: synthetic frames, for tests and demos
//! - anything else: a GStreamer pipeline (feature `rtsp-gstreamer`)
//!
//! Synthetic options (query string, `&`-separated):
//! - `offline`: opening fails, like an unreachable camera
//! - `blind`: opens, but every read yields no frame
//! - `miss_every=N`: every Nth read yields no frame

use anyhow::{anyhow, Result};
#[cfg(feature = "rtsp-gstreamer")]
use anyhow::Context;
#[cfg(feature = "rtsp-gstreamer")]
use gstreamer::prelude::*;

use super::{MediaBackend, MediaHandle, StreamTuning};
use crate::frame::Frame;

/// Default backend for camera addresses.
#[derive(Clone, Copy, Debug, Default)]
pub struct RtspBackend;

impl RtspBackend {
    pub fn new() -> Self {
        Self
    }
}

impl MediaBackend for RtspBackend {
    fn name(&self) -> &'static str {
        "rtsp"
    }

    fn open(&self, address: &str, tuning: &StreamTuning) -> Result<Box<dyn MediaHandle>> {
        if let Some(rest) = address.strip_prefix("stub://") {
            let source = SyntheticSource::open(rest, tuning)?;
            return Ok(Box::new(source));
        }
        #[cfg(feature = "rtsp-gstreamer")]
        {
            Ok(Box::new(GstreamerSource::open(address, tuning)?))
        }
        #[cfg(not(feature = "rtsp-gstreamer"))]
        {
            Err(anyhow!(
                "opening {} requires the rtsp-gstreamer feature",
                address
            ))
        }
    }
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://)
// ----------------------------------------------------------------------------

struct SyntheticSource {
    name: String,
    width: u32,
    height: u32,
    frame_count: u64,
    reads: u64,
    miss_every: Option<u64>,
    blind: bool,
    /// Simulated scene; bumps occasionally so motion engines have something to see.
    scene_state: u8,
}

impl SyntheticSource {
    fn open(target: &str, tuning: &StreamTuning) -> Result<Self> {
        let (name, query) = match target.split_once('?') {
            Some((name, query)) => (name, query),
            None => (target, ""),
        };
        let mut source = Self {
            name: name.to_string(),
            width: tuning.width,
            height: tuning.height,
            frame_count: 0,
            reads: 0,
            miss_every: None,
            blind: false,
            scene_state: rand::random(),
        };
        for option in query.split('&').filter(|o| !o.is_empty()) {
            match option.split_once('=') {
                None if option == "offline" => {
                    return Err(anyhow!("synthetic source {} is offline", source.name));
                }
                None if option == "blind" => source.blind = true,
                Some(("miss_every", n)) => {
                    let n: u64 = n
                        .parse()
                        .map_err(|_| anyhow!("miss_every must be a positive integer"))?;
                    if n == 0 {
                        return Err(anyhow!("miss_every must be a positive integer"));
                    }
                    source.miss_every = Some(n);
                }
                _ => return Err(anyhow!("unknown synthetic option '{}'", option)),
            }
        }
        log::info!("RtspBackend: opened synthetic source {}", source.name);
        Ok(source)
    }

    /// Mostly static background with a scene change every 50 frames.
    fn generate_pixels(&mut self) -> Vec<u8> {
        let pixel_count = rgb_len(self.width, self.height);
        if self.frame_count.is_multiple_of(50) {
            self.scene_state = self.scene_state.wrapping_add(1);
        }
        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + self.scene_state as u64) % 256) as u8;
        }
        pixels
    }
}

/// Byte length of an RGB frame, computed without `u32` overflow.
fn rgb_len(width: u32, height: u32) -> usize {
    width as usize * height as usize * 3
}

impl MediaHandle for SyntheticSource {
    fn read_frame(&mut self) -> Result<Option<Frame>> {
        self.reads += 1;
        if self.blind {
            return Ok(None);
        }
        if let Some(n) = self.miss_every {
            if self.reads.is_multiple_of(n) {
                return Ok(None);
            }
        }
        self.frame_count += 1;
        let pixels = self.generate_pixels();
        Ok(Some(Frame::new(pixels, self.width, self.height)))
    }
}

// ----------------------------------------------------------------------------
// Production RTSP source using GStreamer
// ----------------------------------------------------------------------------

#[cfg(feature = "rtsp-gstreamer")]
struct GstreamerSource {
    address: String,
    pipeline: gstreamer::Pipeline,
    appsink: gstreamer_app::AppSink,
    read_timeout: std::time::Duration,
}

#[cfg(feature = "rtsp-gstreamer")]
impl GstreamerSource {
    /// rtspsrc ! depay/decode ! videorate ! videoscale ! videoconvert ! appsink
    fn open(address: &str, tuning: &StreamTuning) -> Result<Self> {
        gstreamer::init().context("initialize gstreamer")?;

        let decode = if tuning.codec.eq_ignore_ascii_case("h264") {
            "rtph264depay ! h264parse ! avdec_h264"
        } else {
            "decodebin"
        };
        let pipeline_description = format!(
            "rtspsrc location={} latency=0 ! {} ! videorate drop-only=true ! \
             video/x-raw,framerate={}/1 ! videoscale ! video/x-raw,width={},height={} ! \
             videoconvert ! video/x-raw,format=RGB ! \
             appsink name=appsink sync=false max-buffers={} drop=true",
            address,
            decode,
            tuning.max_fps.max(1),
            tuning.width,
            tuning.height,
            tuning.buffer_frames.max(1)
        );
        let pipeline = gstreamer::parse::launch(&pipeline_description)
            .context("build RTSP pipeline")?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| anyhow!("RTSP pipeline is not a Pipeline"))?;

        let appsink = pipeline
            .by_name("appsink")
            .context("appsink element missing from pipeline")?
            .downcast::<gstreamer_app::AppSink>()
            .map_err(|_| anyhow!("appsink element has unexpected type"))?;

        pipeline
            .set_state(gstreamer::State::Playing)
            .context("set RTSP pipeline to Playing")?;
        log::info!("RtspBackend: opened {}", address);

        Ok(Self {
            address: address.to_string(),
            pipeline,
            appsink,
            read_timeout: tuning.read_timeout,
        })
    }

    fn check_bus(&self) -> Result<()> {
        let Some(bus) = self.pipeline.bus() else {
            return Ok(());
        };
        while let Some(message) = bus.timed_pop(gstreamer::ClockTime::ZERO) {
            use gstreamer::MessageView;
            match message.view() {
                MessageView::Error(err) => {
                    return Err(anyhow!(
                        "gstreamer error from {:?}: {}",
                        err.src().map(|s| s.path_string()),
                        err.error()
                    ));
                }
                MessageView::Eos(..) => return Err(anyhow!("{} reached EOS", self.address)),
                _ => {}
            }
        }
        Ok(())
    }
}

#[cfg(feature = "rtsp-gstreamer")]
impl MediaHandle for GstreamerSource {
    fn read_frame(&mut self) -> Result<Option<Frame>> {
        self.check_bus()?;
        let timeout = gstreamer::ClockTime::from_mseconds(self.read_timeout.as_millis() as u64);
        let Some(sample) = self.appsink.try_pull_sample(timeout) else {
            return Ok(None);
        };
        let (pixels, width, height) = sample_to_pixels(&sample)?;
        Ok(Some(Frame::new(pixels, width, height)))
    }
}

#[cfg(feature = "rtsp-gstreamer")]
impl Drop for GstreamerSource {
    fn drop(&mut self) {
        if let Err(e) = self.pipeline.set_state(gstreamer::State::Null) {
            log::warn!("RtspBackend: failed to stop pipeline for {}: {}", self.address, e);
        }
    }
}

#[cfg(feature = "rtsp-gstreamer")]
fn sample_to_pixels(sample: &gstreamer::Sample) -> Result<(Vec<u8>, u32, u32)> {
    let buffer = sample.buffer().context("RTSP sample missing buffer")?;
    let caps = sample.caps().context("RTSP sample missing caps")?;
    let info =
        gstreamer_video::VideoInfo::from_caps(caps).context("parse RTSP caps as video info")?;

    let width = info.width();
    let height = info.height();
    let row_bytes = (width as usize) * 3;
    let stride = info.stride()[0] as usize;

    let map = buffer.map_readable().context("map RTSP buffer")?;
    let data = map.as_slice();

    if stride == row_bytes {
        return Ok((data.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("RTSP buffer row is out of bounds")?,
        );
    }

    Ok((pixels, width, height))
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
