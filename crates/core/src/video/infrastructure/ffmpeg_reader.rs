use std::path::Path;

use crate::shared::frame::Frame;
use crate::shared::video_metadata::VideoMetadata;
use crate::video::domain::video_reader::VideoReader;

type FrameResult = Result<Frame, Box<dyn std::error::Error>>;

/// Decodes a video source to RGB24 frames via ffmpeg-next.
///
/// Files, RTSP/HTTP streams, and V4L device paths all enter through the
/// same libavformat front door, so the driver never cares which kind of
/// source a camera is bound to.
pub struct FfmpegReader {
    input: Option<ffmpeg_next::format::context::Input>,
    stream_index: usize,
}

// Safety: the demuxer's raw pointers never leave this reader, and the
// pipeline drives it from one thread at a time.
unsafe impl Send for FfmpegReader {}

impl FfmpegReader {
    pub fn new() -> Self {
        Self {
            input: None,
            stream_index: 0,
        }
    }

    fn begin_decode(&mut self) -> Result<DecodeSession<'_>, Box<dyn std::error::Error>> {
        let stream_index = self.stream_index;
        let input = self.input.as_mut().ok_or("video source not opened")?;

        let parameters = input
            .stream(stream_index)
            .ok_or("video stream disappeared")?
            .parameters();
        let codec = ffmpeg_next::codec::context::Context::from_parameters(parameters)?
            .decoder()
            .video()?;

        let (width, height) = (codec.width(), codec.height());
        let to_rgb = ffmpeg_next::software::scaling::Context::get(
            codec.format(),
            width,
            height,
            ffmpeg_next::format::Pixel::RGB24,
            width,
            height,
            ffmpeg_next::software::scaling::Flags::BILINEAR,
        )?;

        Ok(DecodeSession {
            input,
            stream_index,
            codec,
            to_rgb,
            width,
            height,
            frames_out: 0,
            phase: Phase::Demux,
        })
    }
}

impl Default for FfmpegReader {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Phase {
    /// Pulling packets from the demuxer.
    Demux,
    /// Demuxer exhausted; emptying what the codec still buffers.
    Drain,
    Finished,
}

/// Pull-based decode loop over one opened input.
///
/// The codec is fed packets only when it has nothing decoded to hand
/// back, so memory stays bounded by libavcodec's own buffering and the
/// first frame is available before the source is fully read.
struct DecodeSession<'a> {
    input: &'a mut ffmpeg_next::format::context::Input,
    stream_index: usize,
    codec: ffmpeg_next::decoder::Video,
    to_rgb: ffmpeg_next::software::scaling::Context,
    width: u32,
    height: u32,
    frames_out: usize,
    phase: Phase,
}

impl DecodeSession<'_> {
    /// A frame already sitting in the codec, converted to RGB.
    fn decoded(&mut self) -> Option<FrameResult> {
        let mut raw = ffmpeg_next::util::frame::video::Video::empty();
        if self.codec.receive_frame(&mut raw).is_err() {
            return None;
        }

        let mut rgb = ffmpeg_next::util::frame::video::Video::empty();
        if let Err(e) = self.to_rgb.run(&raw, &mut rgb) {
            return Some(Err(e.into()));
        }

        // Strip libav's per-row stride padding while copying out.
        let row_len = self.width as usize * 3;
        let mut pixels = Vec::with_capacity(row_len * self.height as usize);
        for row in rgb.data(0).chunks(rgb.stride(0)).take(self.height as usize) {
            pixels.extend_from_slice(&row[..row_len]);
        }

        let frame = Frame::new(pixels, self.width, self.height, self.frames_out);
        self.frames_out += 1;
        Some(Ok(frame))
    }

    /// Hand the codec the next packet belonging to our stream.
    /// Returns false once the demuxer has nothing left.
    fn feed(&mut self) -> bool {
        for (stream, packet) in self.input.packets() {
            if stream.index() != self.stream_index {
                continue;
            }
            // A packet the codec rejects is skipped, not fatal.
            let _ = self.codec.send_packet(&packet);
            return true;
        }
        false
    }
}

impl Iterator for DecodeSession<'_> {
    type Item = FrameResult;

    fn next(&mut self) -> Option<FrameResult> {
        loop {
            if self.phase == Phase::Finished {
                return None;
            }
            if let Some(result) = self.decoded() {
                return Some(result);
            }
            match self.phase {
                Phase::Demux => {
                    if !self.feed() {
                        let _ = self.codec.send_eof();
                        self.phase = Phase::Drain;
                    }
                }
                Phase::Drain => self.phase = Phase::Finished,
                Phase::Finished => return None,
            }
        }
    }
}

impl VideoReader for FfmpegReader {
    fn open(&mut self, location: &str) -> Result<VideoMetadata, Box<dyn std::error::Error>> {
        ffmpeg_next::init()?;

        let input = ffmpeg_next::format::input(&Path::new(location))?;
        let stream = input
            .streams()
            .best(ffmpeg_next::media::Type::Video)
            .ok_or_else(|| format!("{location} has no video stream"))?;
        let stream_index = stream.index();

        let codec = ffmpeg_next::codec::context::Context::from_parameters(stream.parameters())?
            .decoder()
            .video()?;

        // Live sources report a zero rate and frame count; the driver
        // substitutes its configured defaults.
        let rate = stream.rate();
        let metadata = VideoMetadata {
            width: codec.width(),
            height: codec.height(),
            fps: if rate.denominator() > 0 {
                f64::from(rate)
            } else {
                0.0
            },
            total_frames: stream.frames().max(0) as usize,
            codec: codec
                .codec()
                .map(|c| c.name().to_string())
                .unwrap_or_default(),
            source_path: Some(Path::new(location).to_path_buf()),
        };

        self.stream_index = stream_index;
        self.input = Some(input);

        Ok(metadata)
    }

    fn frames(&mut self) -> Box<dyn Iterator<Item = FrameResult> + '_> {
        match self.begin_decode() {
            Ok(session) => Box::new(session),
            Err(e) => Box::new(std::iter::once(Err(e))),
        }
    }

    fn close(&mut self) {
        self.input = None;
        self.stream_index = 0;
    }
}
