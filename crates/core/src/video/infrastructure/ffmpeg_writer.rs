use std::path::Path;

use crate::shared::frame::Frame;
use crate::shared::video_metadata::VideoMetadata;
use crate::video::domain::video_writer::VideoWriter;

/// Frame rate used when the metadata carries none.
const FALLBACK_FPS: i32 = 30;

/// Encodes annotated frames to an `.mp4` sink via ffmpeg-next.
///
/// MPEG4 keeps the output playable everywhere the dashboard serves it
/// without per-host codec configuration. Video only: the annotated output
/// carries no audio.
pub struct FfmpegWriter {
    session: Option<EncodeSession>,
}

// Safety: the encoder contexts hold raw pointers that never leave the
// writer, and the pipeline drives it from one thread at a time.
unsafe impl Send for FfmpegWriter {}

impl FfmpegWriter {
    pub fn new() -> Self {
        Self { session: None }
    }
}

impl Default for FfmpegWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl VideoWriter for FfmpegWriter {
    fn open(
        &mut self,
        path: &Path,
        metadata: &VideoMetadata,
    ) -> Result<(), Box<dyn std::error::Error>> {
        ffmpeg_next::init()?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        self.session = Some(EncodeSession::create(path, metadata)?);
        Ok(())
    }

    fn write(&mut self, frame: &Frame) -> Result<(), Box<dyn std::error::Error>> {
        self.session
            .as_mut()
            .ok_or("FfmpegWriter: not opened")?
            .encode(frame)
    }

    fn close(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        match self.session.take() {
            Some(session) => session.finish(),
            None => Ok(()),
        }
    }
}

/// Everything the writer holds between `open` and `close`: muxer, codec,
/// color converter, and the frame-count pts clock.
struct EncodeSession {
    output: ffmpeg_next::format::context::Output,
    encoder: ffmpeg_next::codec::encoder::video::Encoder,
    to_yuv: ffmpeg_next::software::scaling::Context,
    width: u32,
    height: u32,
    /// Frames sent so far; doubles as the pts of the next frame.
    frames_sent: i64,
    time_base: ffmpeg_next::Rational,
}

impl EncodeSession {
    fn create(
        path: &Path,
        metadata: &VideoMetadata,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let fps = whole_fps(metadata.fps);
        let time_base = ffmpeg_next::Rational(1, fps);

        let mut output = ffmpeg_next::format::output(path)?;
        let codec = ffmpeg_next::encoder::find(ffmpeg_next::codec::Id::MPEG4)
            .ok_or("MPEG4 encoder unavailable")?;

        let mut config = ffmpeg_next::codec::context::Context::new_with_codec(codec)
            .encoder()
            .video()?;
        config.set_width(metadata.width);
        config.set_height(metadata.height);
        config.set_format(ffmpeg_next::format::Pixel::YUV420P);
        config.set_time_base(time_base);
        config.set_frame_rate(Some(ffmpeg_next::Rational(fps, 1)));
        if output
            .format()
            .flags()
            .contains(ffmpeg_next::format::Flags::GLOBAL_HEADER)
        {
            config.set_flags(ffmpeg_next::codec::Flags::GLOBAL_HEADER);
        }
        let encoder = config.open_with(ffmpeg_next::Dictionary::new())?;

        // Single video stream at index 0.
        output.add_stream(Some(codec))?.set_parameters(&encoder);
        output.write_header()?;

        let to_yuv = ffmpeg_next::software::scaling::Context::get(
            ffmpeg_next::format::Pixel::RGB24,
            metadata.width,
            metadata.height,
            ffmpeg_next::format::Pixel::YUV420P,
            metadata.width,
            metadata.height,
            ffmpeg_next::software::scaling::Flags::BILINEAR,
        )?;

        Ok(Self {
            output,
            encoder,
            to_yuv,
            width: metadata.width,
            height: metadata.height,
            frames_sent: 0,
            time_base,
        })
    }

    fn encode(&mut self, frame: &Frame) -> Result<(), Box<dyn std::error::Error>> {
        let mut rgb = ffmpeg_next::util::frame::video::Video::new(
            ffmpeg_next::format::Pixel::RGB24,
            self.width,
            self.height,
        );

        // libav rows are stride-padded; fill the picture row by row.
        let row_len = self.width as usize * 3;
        let stride = rgb.stride(0);
        let plane = rgb.data_mut(0);
        for (src, dst) in frame
            .data()
            .chunks_exact(row_len)
            .zip(plane.chunks_mut(stride))
        {
            dst[..row_len].copy_from_slice(src);
        }

        let mut yuv = ffmpeg_next::util::frame::video::Video::empty();
        self.to_yuv.run(&rgb, &mut yuv)?;
        yuv.set_pts(Some(self.frames_sent));
        self.frames_sent += 1;

        self.encoder.send_frame(&yuv)?;
        self.mux_ready_packets()
    }

    /// Hand whatever the encoder has finished to the muxer.
    fn mux_ready_packets(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        let stream_time_base = self
            .output
            .stream(0)
            .ok_or("output stream missing")?
            .time_base();

        let mut packet = ffmpeg_next::Packet::empty();
        while self.encoder.receive_packet(&mut packet).is_ok() {
            packet.set_stream(0);
            packet.rescale_ts(self.time_base, stream_time_base);
            packet.write_interleaved(&mut self.output)?;
        }
        Ok(())
    }

    fn finish(mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.encoder.send_eof()?;
        self.mux_ready_packets()?;
        self.output.write_trailer()?;
        Ok(())
    }
}

fn whole_fps(fps: f64) -> i32 {
    let rounded = fps.round() as i32;
    if rounded > 0 {
        rounded
    } else {
        FALLBACK_FPS
    }
}
