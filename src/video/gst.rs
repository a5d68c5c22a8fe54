//! GStreamer-backed video decoding into caller-owned framebuffers

use color_eyre::{eyre::eyre, Result};
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use tracing::{debug, info, warn};

use super::{FrameStep, VideoError};
use crate::CONFIG;

/// Decoded-frame producer over a file-to-appsink pipeline
pub struct VideoSource {
    pipeline: gst::Pipeline,
    appsink: gst_app::AppSink,
    frames_decoded: u64,
}

impl VideoSource {
    /// Open and preroll the decode pipeline for `path`.
    ///
    /// The capsfilter pins the appsink to I420 at the scanout geometry, so
    /// a file with the wrong resolution, a second stream, or audio fails
    /// negotiation here instead of mid-playback.
    pub fn open(path: &str) -> Result<Self> {
        gst::init().map_err(|e| eyre!("failed to initialize GStreamer: {e}"))?;

        let cfg = CONFIG.load();
        let (width, height) = (cfg.video.width, cfg.video.height);

        let pipeline_str = format!(
            "filesrc location=\"{path}\" ! decodebin ! videoconvert ! \
             video/x-raw,format=I420,width={width},height={height} ! \
             appsink name=appsink"
        );
        debug!("Pipeline: {pipeline_str}");

        let pipeline = gst::parse::launch(&pipeline_str)?
            .downcast::<gst::Pipeline>()
            .map_err(|_| eyre!("failed to create pipeline"))?;

        let appsink = pipeline
            .by_name("appsink")
            .ok_or_else(|| eyre!("failed to find appsink element"))?
            .downcast::<gst_app::AppSink>()
            .map_err(|_| eyre!("failed to cast to AppSink"))?;

        appsink.set_property("emit-signals", false);
        appsink.set_property("max-buffers", 2u32);
        appsink.set_property("sync", false); // pacing is ours, not the clock's

        pipeline.set_state(gst::State::Paused)?;
        let (res, state, _pending) = pipeline.state(gst::ClockTime::from_seconds(5));
        if res.is_err() || state != gst::State::Paused {
            let _ = pipeline.set_state(gst::State::Null);
            return Err(eyre!("failed to preroll video"));
        }

        // Double-check what actually got negotiated
        if let Some(caps) = appsink.static_pad("sink").and_then(|p| p.current_caps()) {
            let vinfo = gst_video::VideoInfo::from_caps(&caps)
                .map_err(|e| eyre!("unreadable caps on appsink: {e}"))?;
            if vinfo.format() != gst_video::VideoFormat::I420
                || vinfo.width() != width
                || vinfo.height() != height
            {
                let _ = pipeline.set_state(gst::State::Null);
                return Err(eyre!("video must be {width}x{height} YUV420P"));
            }
        }

        pipeline.set_state(gst::State::Playing)?;
        info!("Opened video: {path}");

        Ok(Self {
            pipeline,
            appsink,
            frames_decoded: 0,
        })
    }

    /// Decode the next frame directly into `dst`.
    ///
    /// On a recoverable error `dst` is left with whatever was produced;
    /// the caller decides whether to present it anyway.
    pub fn next_frame(&mut self, dst: &mut [u8]) -> Result<FrameStep, VideoError> {
        let sample = match self.appsink.pull_sample() {
            Ok(sample) => sample,
            Err(_) => {
                if self.appsink.is_eos() {
                    info!("Hit EOF on video after {} frames", self.frames_decoded);
                    return Ok(FrameStep::EndOfStream);
                }
                // A pull can fail without EOS when the pipeline errored;
                // the bus tells the two apart.
                if let Some(reason) = self.pipeline_error() {
                    return Err(VideoError::Pipeline(reason));
                }
                return Err(VideoError::Decode("failed to pull sample".into()));
            }
        };

        let buffer = sample
            .buffer()
            .ok_or_else(|| VideoError::Decode("sample without buffer".into()))?;
        let map = buffer
            .map_readable()
            .map_err(|e| VideoError::Decode(format!("unmappable buffer: {e}")))?;

        let data = map.as_slice();
        if data.len() != dst.len() {
            let n = data.len().min(dst.len());
            dst[..n].copy_from_slice(&data[..n]);
            return Err(VideoError::Decode(format!(
                "unexpected frame size {} (want {})",
                data.len(),
                dst.len()
            )));
        }
        dst.copy_from_slice(data);

        self.frames_decoded += 1;
        Ok(FrameStep::Frame)
    }

    fn pipeline_error(&self) -> Option<String> {
        let bus = self.pipeline.bus()?;
        let msg = bus.pop_filtered(&[gst::MessageType::Error])?;
        if let gst::MessageView::Error(err) = msg.view() {
            let src = err.src().map(|s| s.path_string());
            warn!("pipeline error from {src:?}: {:?}", err.debug());
            Some(err.error().to_string())
        } else {
            None
        }
    }

    /// Tear the pipeline down. Also runs on drop.
    pub fn close(&self) {
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}

impl Drop for VideoSource {
    fn drop(&mut self) {
        self.close();
    }
}
