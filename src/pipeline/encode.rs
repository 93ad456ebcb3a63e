//! Encode stage: filtered frames in, compressed packets out to the sink.
//!
//! Packets come out of the encoder whenever it is ready; B-frame lookahead
//! means a push can legitimately produce nothing, and the backlog is only
//! recovered by the terminal flush. Packets are written to the sink verbatim,
//! in production order, with no extra framing.

use ac_ffmpeg::codec::video::frame::get_pixel_format;
use ac_ffmpeg::codec::video::{VideoEncoder, VideoFrame};
use ac_ffmpeg::codec::Encoder;
use ac_ffmpeg::time::TimeBase;
use log::debug;
use std::io::Write;

use crate::config::{EncoderSettings, VideoMode};
use crate::error::PipelineError;

pub struct EncodeStage<W: Write> {
    encoder: VideoEncoder,
    sink: W,
    flushed: bool,
    packets_written: u64,
    bytes_written: u64,
    #[cfg(test)]
    pushed_pts: Vec<i64>,
}

impl<W: Write> EncodeStage<W> {
    /// Open an encoder session for the fixed mode and wire it to `sink`.
    pub fn new(
        settings: &EncoderSettings,
        mode: &VideoMode,
        time_base: TimeBase,
        sink: W,
    ) -> Result<Self, PipelineError> {
        let mut builder = VideoEncoder::builder(&settings.codec)
            .map_err(|_| PipelineError::CodecUnavailable(settings.codec.clone()))?;

        let bit_rate = settings.bit_rate.to_string();
        let gop_size = settings.gop_size.to_string();
        let max_b_frames = settings.max_b_frames.to_string();
        builder = builder
            .pixel_format(get_pixel_format("yuv420p"))
            .width(mode.width as usize)
            .height(mode.height as usize)
            .time_base(time_base)
            .set_option("b", &bit_rate)
            .set_option("g", &gop_size)
            .set_option("bf", &max_b_frames);
        if settings.codec.contains("264") {
            builder = builder.set_option("preset", &settings.preset);
        }

        let encoder = builder
            .build()
            .map_err(|e| PipelineError::OpenFailed(e.to_string()))?;
        debug!("encoder '{}' opened at {} bps", settings.codec, settings.bit_rate);

        Ok(Self {
            encoder,
            sink,
            flushed: false,
            packets_written: 0,
            bytes_written: 0,
            #[cfg(test)]
            pushed_pts: Vec::new(),
        })
    }

    /// Feed one filtered frame and write out whatever packets are ready.
    pub fn push(&mut self, frame: VideoFrame) -> Result<(), PipelineError> {
        if self.flushed {
            return Err(PipelineError::Flushed);
        }
        #[cfg(test)]
        self.pushed_pts.push(frame.pts().timestamp());
        self.encoder.push(frame)?;
        self.drain()
    }

    /// Terminal drain: signal end of stream, collect the reordering backlog
    /// and flush the sink. A repeated flush is a no-op.
    pub fn flush(&mut self) -> Result<(), PipelineError> {
        if self.flushed {
            return Ok(());
        }
        self.flushed = true;
        self.encoder.flush()?;
        self.drain()?;
        self.sink.flush()?;
        Ok(())
    }

    /// Pull packets until the encoder reports "nothing ready yet", which is
    /// the normal idle signal, not an error.
    fn drain(&mut self) -> Result<(), PipelineError> {
        while let Some(packet) = self.encoder.take()? {
            let data = packet.data();
            self.sink.write_all(data)?;
            self.packets_written += 1;
            self.bytes_written += data.len() as u64;
        }
        Ok(())
    }

    pub fn packets_written(&self) -> u64 {
        self.packets_written
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn is_flushed(&self) -> bool {
        self.flushed
    }

    /// Timestamps of every frame this stage has accepted, in push order.
    #[cfg(test)]
    pub fn pushed_pts(&self) -> &[i64] {
        &self.pushed_pts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ac_ffmpeg::codec::video::VideoFrameMut;
    use ac_ffmpeg::time::Timestamp;
    use crate::config::VideoMode;

    fn mode() -> VideoMode {
        VideoMode {
            width: 64,
            height: 32,
        }
    }

    /// `None` when the codec is missing from the local FFmpeg build.
    fn try_stage() -> Option<EncodeStage<Vec<u8>>> {
        let time_base = TimeBase::new(1, 10);
        match EncodeStage::new(&EncoderSettings::default(), &mode(), time_base, Vec::new()) {
            Ok(stage) => Some(stage),
            Err(PipelineError::CodecUnavailable(_)) => None,
            Err(e) => panic!("encoder construction failed: {e}"),
        }
    }

    fn yuv_frame(pts: i64) -> VideoFrame {
        let time_base = TimeBase::new(1, 10);
        VideoFrameMut::black(get_pixel_format("yuv420p"), 64, 32)
            .with_time_base(time_base)
            .with_pts(Timestamp::new(pts, time_base))
            .freeze()
    }

    #[test]
    fn unknown_codec_is_reported_as_unavailable() {
        let settings = EncoderSettings {
            codec: String::from("no-such-codec"),
            ..Default::default()
        };
        let err = EncodeStage::new(&settings, &mode(), TimeBase::new(1, 10), Vec::new())
            .map(|_| ())
            .unwrap_err();
        assert!(matches!(err, PipelineError::CodecUnavailable(_)));
    }

    #[test]
    fn flush_recovers_the_reordering_backlog() {
        let Some(mut stage) = try_stage() else {
            return;
        };
        for pts in 0..12 {
            stage.push(yuv_frame(pts)).unwrap();
        }
        stage.flush().unwrap();
        // With B-frames enabled some packets only appear at flush, but in the
        // end every input frame must be accounted for.
        assert_eq!(stage.packets_written(), 12);
        assert!(stage.bytes_written() > 0);
    }

    #[test]
    fn push_after_flush_is_rejected() {
        let Some(mut stage) = try_stage() else {
            return;
        };
        stage.push(yuv_frame(0)).unwrap();
        stage.flush().unwrap();
        assert!(stage.is_flushed());
        assert!(matches!(
            stage.push(yuv_frame(1)),
            Err(PipelineError::Flushed)
        ));
    }

    #[test]
    fn second_flush_is_a_noop() {
        let Some(mut stage) = try_stage() else {
            return;
        };
        stage.push(yuv_frame(0)).unwrap();
        stage.flush().unwrap();
        let packets = stage.packets_written();
        stage.flush().unwrap();
        assert_eq!(stage.packets_written(), packets);
    }
}
