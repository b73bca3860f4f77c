use super::{frame_index_from_pts, VideoReader};
use anyhow::{anyhow, Context, Result};
use ffmpeg_next::ffi;
use ffmpeg_next::format::Pixel;
use ffmpeg_next::software::scaling;
use ffmpeg_next::util::frame::Video as VideoFrame;
use image::RgbImage;
use std::path::Path;

/// Forward gaps larger than this are reached by seeking instead of decoding.
const SEEK_THRESHOLD: usize = 50;

/// Video reader backed by FFmpeg via ffmpeg-next, decoding on the CPU and
/// converting every returned frame to RGB24. Frame positions come from
/// decoded timestamps, so a seek that lands on an earlier keyframe is
/// decoded forward to the requested frame.
pub struct FfmpegReader {
    input_ctx: ffmpeg_next::format::context::Input,
    decoder: ffmpeg_next::codec::decoder::Video,
    video_stream_index: usize,
    /// Created on the first frame, when the decoded pixel format is known.
    scaler: Option<scaling::Context>,
    width: u32,
    height: u32,
    source_fps: f64,
    total_frames: usize,
    /// Seconds per stream timestamp tick.
    time_base: f64,
    /// Timestamp of the first frame, in stream ticks.
    start_pts: i64,
    /// Index of the frame the decoder will produce next.
    next_index: usize,
    /// Frame requested by the last seek, until a read reaches it.
    pending_target: Option<usize>,
    /// Reused while decoding past unwanted frames.
    reuse_frame: VideoFrame,
    reuse_packet: ffmpeg_next::codec::packet::Packet,
    eof_sent: bool,
}

impl FfmpegReader {
    pub fn new(path: &Path) -> Result<Self> {
        ffmpeg_next::init().context("Failed to initialize FFmpeg")?;

        if !path.exists() {
            return Err(anyhow!("Video file not found: {}", path.display()));
        }
        let input_ctx = ffmpeg_next::format::input(&path).context("Failed to open video file")?;

        let video_stream = input_ctx
            .streams()
            .best(ffmpeg_next::media::Type::Video)
            .ok_or_else(|| anyhow!("No video stream found in {}", path.display()))?;
        let video_stream_index = video_stream.index();

        let rational_fps = video_stream.avg_frame_rate();
        let source_fps = if rational_fps.denominator() > 0 && rational_fps.numerator() > 0 {
            rational_fps.numerator() as f64 / rational_fps.denominator() as f64
        } else {
            tracing::warn!("FfmpegReader: could not determine FPS, defaulting to 30.0");
            30.0
        };

        let time_base = f64::from(video_stream.time_base());
        let start_pts = video_stream.start_time();
        let start_pts = if start_pts == ffi::AV_NOPTS_VALUE { 0 } else { start_pts };

        // Transport streams rarely carry a frame count; estimate from duration.
        let stream_frames = video_stream.frames().max(0) as usize;
        let duration_secs = input_ctx.duration() as f64 / ffi::AV_TIME_BASE as f64;
        let total_frames = if stream_frames == 0 {
            (duration_secs * source_fps).round().max(0.0) as usize
        } else {
            stream_frames
        };

        let decoder = ffmpeg_next::codec::context::Context::from_parameters(video_stream.parameters())
            .context("Failed to create decoder context")?
            .decoder()
            .video()
            .context("Failed to open video decoder")?;
        let width = decoder.width();
        let height = decoder.height();

        tracing::info!(
            "FfmpegReader: opened {}, {}x{}, duration={:.2}s, fps={:.2}, frames={}",
            path.display(),
            width,
            height,
            duration_secs,
            source_fps,
            total_frames
        );

        Ok(Self {
            input_ctx,
            decoder,
            video_stream_index,
            scaler: None,
            width,
            height,
            source_fps,
            total_frames,
            time_base,
            start_pts,
            next_index: 0,
            pending_target: None,
            reuse_frame: VideoFrame::empty(),
            reuse_packet: ffmpeg_next::codec::packet::Packet::empty(),
            eof_sent: false,
        })
    }

    /// Pulls the next decoded frame into `target`. Returns `false` once the
    /// decoder is drained.
    fn decode_into(&mut self, target: &mut VideoFrame) -> Result<bool> {
        loop {
            match self.decoder.receive_frame(target) {
                Ok(()) => return Ok(true),
                Err(ffmpeg_next::Error::Other { errno: ffi::EAGAIN }) if !self.eof_sent => {}
                Err(ffmpeg_next::Error::Other { errno: ffi::EAGAIN }) | Err(ffmpeg_next::Error::Eof) => {
                    return Ok(false)
                }
                Err(e) => return Err(anyhow!("Decoder error: {}", e)),
            }

            let mut fed = false;
            while self.reuse_packet.read(&mut self.input_ctx).is_ok() {
                if self.reuse_packet.stream() == self.video_stream_index {
                    self.decoder
                        .send_packet(&self.reuse_packet)
                        .context("Failed to send packet to decoder")?;
                    fed = true;
                    break;
                }
            }
            if !fed {
                self.decoder.send_eof().context("Failed to send EOF to decoder")?;
                self.eof_sent = true;
            }
        }
    }

    /// Decodes forward to the first frame at or past `target`. Earlier
    /// frames are dropped without conversion.
    fn decode_until(&mut self, target: usize) -> Result<Option<VideoFrame>> {
        self.pending_target = None;
        loop {
            let mut frame = std::mem::replace(&mut self.reuse_frame, VideoFrame::empty());
            if !self.decode_into(&mut frame)? {
                self.reuse_frame = frame;
                return Ok(None);
            }
            let index = frame
                .timestamp()
                .or_else(|| frame.pts())
                .map(|pts| frame_index_from_pts(pts, self.start_pts, self.time_base, self.source_fps))
                .unwrap_or(self.next_index);
            self.next_index = index + 1;
            if index >= target {
                if index > target {
                    tracing::debug!("FfmpegReader: frame {} requested, decoder resumed at {}", target, index);
                }
                return Ok(Some(frame));
            }
            self.reuse_frame = frame;
        }
    }

    fn to_rgb_image(&mut self, frame: &VideoFrame) -> Result<RgbImage> {
        if self.scaler.is_none() {
            self.scaler = Some(
                scaling::Context::get(
                    frame.format(),
                    self.width,
                    self.height,
                    Pixel::RGB24,
                    self.width,
                    self.height,
                    scaling::Flags::BILINEAR,
                )
                .context("Failed to create scaler")?,
            );
        }
        let mut rgb = VideoFrame::empty();
        if let Some(scaler) = self.scaler.as_mut() {
            scaler.run(frame, &mut rgb).context("Scaler failed")?;
        }

        // Rows may be padded; copy them out tightly.
        let row_len = self.width as usize * 3;
        let stride = rgb.stride(0);
        let data = rgb.data(0);
        let mut packed = Vec::with_capacity(row_len * self.height as usize);
        for y in 0..self.height as usize {
            packed.extend_from_slice(&data[y * stride..y * stride + row_len]);
        }
        RgbImage::from_raw(self.width, self.height, packed)
            .ok_or_else(|| anyhow!("Decoded frame has an unexpected size"))
    }
}

impl VideoReader for FfmpegReader {
    fn frame_count(&self) -> Result<usize> {
        Ok(self.total_frames)
    }

    fn source_fps(&self) -> Result<f64> {
        Ok(self.source_fps)
    }

    /// Seeks to the keyframe at or before `frame_num`; the next read decodes
    /// forward from there to `frame_num`.
    fn seek_to_frame(&mut self, frame_num: usize) -> Result<()> {
        let seconds = self.start_pts as f64 * self.time_base + frame_num as f64 / self.source_fps;
        let timestamp = (seconds * ffi::AV_TIME_BASE as f64) as i64;
        self.input_ctx
            .seek(timestamp, ..timestamp)
            .context("Failed to seek")?;
        self.decoder.flush();
        self.eof_sent = false;
        self.pending_target = Some(frame_num);
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Option<RgbImage>> {
        let target = self.position();
        match self.decode_until(target)? {
            Some(frame) => self.to_rgb_image(&frame).map(Some),
            None => Ok(None),
        }
    }

    fn position(&self) -> usize {
        self.pending_target.unwrap_or(self.next_index)
    }

    fn read_frame_at(&mut self, frame_num: usize) -> Result<Option<RgbImage>> {
        match frame_num.checked_sub(self.position()) {
            Some(gap) if gap <= SEEK_THRESHOLD => {}
            _ => self.seek_to_frame(frame_num)?,
        }
        match self.decode_until(frame_num)? {
            Some(frame) => self.to_rgb_image(&frame).map(Some),
            None => Ok(None),
        }
    }
}
