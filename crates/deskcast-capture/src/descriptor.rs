//! Pipeline descriptor builders for every feed.
//!
//! Builders are stored with their stream manager and evaluated each time a
//! pipeline is created, with the live screen size passed in. Encoder
//! parameters of the video tiers derive from the screen area:
//!
//! - `base = width * height * 6 / 4` bits/s, divided per tier
//! - `buffer = bitrate / 1000`, sized ×6, initial ×4, optimal ×5

use deskcast_pipeline::PipelineDescriptor;
use deskcast_types::{Codec, ScreenSize};

use crate::config::CaptureConfig;

/// Inputs of a descriptor builder.
#[derive(Debug, Clone, Copy)]
pub struct DescriptorParams<'a> {
    /// Screen size at creation time.
    pub screen: ScreenSize,

    /// Push destination, set for the broadcast feed only.
    pub destination: Option<&'a str>,
}

impl<'a> DescriptorParams<'a> {
    /// Parameters for a feed without a destination.
    pub fn new(screen: ScreenSize) -> Self {
        Self {
            screen,
            destination: None,
        }
    }

    /// Parameters for a push feed.
    pub fn with_destination(screen: ScreenSize, destination: &'a str) -> Self {
        Self {
            screen,
            destination: Some(destination),
        }
    }
}

/// Function producing a fresh descriptor for each pipeline creation.
pub type DescriptorBuilder =
    Box<dyn Fn(&DescriptorParams<'_>) -> PipelineDescriptor + Send + Sync>;

fn boxed<F>(build: F) -> DescriptorBuilder
where
    F: Fn(&DescriptorParams<'_>) -> PipelineDescriptor + Send + Sync + 'static,
{
    Box::new(build)
}

/// One video quality tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoTier {
    /// Tier identifier.
    pub id: &'static str,

    /// Divisor applied to the base bitrate.
    pub divisor: u64,

    /// Encoded frames per second.
    pub framerate: u32,
}

/// Fixed tier table, in the order reported by `video_ids()`.
pub const VIDEO_TIERS: [VideoTier; 4] = [
    VideoTier { id: "hd", divisor: 1, framerate: 25 },
    VideoTier { id: "hq", divisor: 2, framerate: 15 },
    VideoTier { id: "mq", divisor: 3, framerate: 10 },
    VideoTier { id: "lq", divisor: 4, framerate: 5 },
];

/// Keyframe interval of the tier encoders, in frames.
pub const KEYFRAME_INTERVAL: u32 = 25;

/// Base bitrate for a screen, in bits/s.
pub fn base_bitrate(screen: ScreenSize) -> u64 {
    screen.pixels() * 6 / 4
}

impl VideoTier {
    /// Look up a tier by id.
    pub fn by_id(id: &str) -> Option<VideoTier> {
        VIDEO_TIERS.iter().copied().find(|tier| tier.id == id)
    }

    /// Target bitrate in bits/s.
    pub fn bitrate(&self, screen: ScreenSize) -> u64 {
        base_bitrate(screen) / self.divisor
    }

    /// Encoder buffer unit in milliseconds.
    pub fn buffer(&self, screen: ScreenSize) -> u64 {
        self.bitrate(screen) / 1000
    }
}

/// Substitute `{name}` placeholders in one pass.
///
/// Unknown placeholders are left intact, and substituted values are never
/// scanned again.
pub fn render(template: &str, vars: &[(&str, String)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let tail = &rest[open..];

        let Some(close) = tail.find('}') else {
            out.push_str(tail);
            return out;
        };

        let name = &tail[1..close];
        match vars.iter().find(|(key, _)| *key == name) {
            Some((_, value)) => {
                out.push_str(value);
                rest = &tail[close + 1..];
            }
            None => {
                out.push('{');
                rest = &tail[1..];
            }
        }
    }

    out.push_str(rest);
    out
}

fn screen_vars(display: &str, screen: ScreenSize) -> Vec<(&'static str, String)> {
    vec![
        ("display", display.to_string()),
        ("width", screen.width.to_string()),
        ("height", screen.height.to_string()),
        ("rate", screen.rate.to_string()),
    ]
}

fn vpx_encoder(element: &str, bitrate: u64, buffer: u64) -> String {
    format!(
        "{element} end-usage=cbr target-bitrate={bitrate} cpu-used=4 threads=4 deadline=1 undershoot=95 keyframe-max-dist={KEYFRAME_INTERVAL} min-quantizer=3 max-quantizer=32 buffer-size={} buffer-initial-size={} buffer-optimal-size={}",
        buffer * 6,
        buffer * 4,
        buffer * 5,
    )
}

fn video_encoder(codec: Codec, bitrate: u64, buffer: u64) -> String {
    match codec {
        Codec::Vp8 => vpx_encoder("vp8enc", bitrate, buffer),
        Codec::Vp9 => vpx_encoder("vp9enc", bitrate, buffer),
        Codec::H264 => format!(
            "x264enc threads=4 bitrate={} key-int-max={KEYFRAME_INTERVAL} byte-stream=true tune=zerolatency speed-preset=veryfast ! video/x-h264,stream-format=byte-stream",
            bitrate / 1000,
        ),
        // Rejected by CaptureConfig::validate before any builder exists.
        Codec::Opus | Codec::G722 | Codec::Pcmu | Codec::Pcma | Codec::Jpeg => {
            vpx_encoder("vp8enc", bitrate, buffer)
        }
    }
}

/// Builder for one video tier.
///
/// An explicit template may use `{bitrate}`, `{framerate}` and the
/// `{buffer_size}`, `{buffer_initial_size}`, `{buffer_optimal_size}`
/// placeholders in addition to the screen ones.
pub fn video_builder(config: &CaptureConfig, tier: VideoTier) -> DescriptorBuilder {
    let display = config.display.clone();
    let codec = config.video_codec;
    let template = config.video_pipeline.clone();

    boxed(move |params| {
        let bitrate = tier.bitrate(params.screen);
        let buffer = tier.buffer(params.screen);

        let description = match &template {
            Some(template) => {
                let mut vars = screen_vars(&display, params.screen);
                vars.extend([
                    ("bitrate", bitrate.to_string()),
                    ("framerate", tier.framerate.to_string()),
                    ("buffer_size", (buffer * 6).to_string()),
                    ("buffer_initial_size", (buffer * 4).to_string()),
                    ("buffer_optimal_size", (buffer * 5).to_string()),
                ]);
                render(template, &vars)
            }
            None => format!(
                "ximagesrc display-name={display} show-pointer=false use-damage=false \
                 ! video/x-raw,framerate={}/1 \
                 ! videoconvert \
                 ! queue \
                 ! {} \
                 ! appsink name=appsink",
                tier.framerate,
                video_encoder(codec, bitrate, buffer),
            ),
        };

        PipelineDescriptor::new(description)
    })
}

/// Builder for the audio feed. Independent of the screen geometry.
pub fn audio_builder(config: &CaptureConfig) -> DescriptorBuilder {
    let display = config.display.clone();
    let template = config.audio_pipeline.clone().unwrap_or_else(|| {
        format!(
            "pulsesrc device={} \
             ! audio/x-raw,channels=2 \
             ! audioconvert \
             ! queue \
             ! {} \
             ! appsink name=appsink",
            config.audio_device,
            config.audio_codec.audio_encoder().unwrap_or("opusenc"),
        )
    });

    boxed(move |params| {
        PipelineDescriptor::new(render(&template, &screen_vars(&display, params.screen)))
    })
}

/// Builder for the broadcast push feed; `{url}` is the destination.
pub fn broadcast_builder(config: &CaptureConfig) -> DescriptorBuilder {
    let display = config.display.clone();
    let template = config.broadcast_pipeline.clone().unwrap_or_else(|| {
        format!(
            "flvmux name=mux ! rtmpsink location='{{url}} live=1' \
             pulsesrc device={} \
             ! audio/x-raw,channels=2 \
             ! audioconvert \
             ! queue \
             ! voaacenc bitrate={} \
             ! mux. \
             ximagesrc display-name={} show-pointer=true use-damage=false \
             ! video/x-raw \
             ! videoconvert \
             ! queue \
             ! x264enc threads=4 bitrate={} key-int-max=15 byte-stream=true tune=zerolatency speed-preset={} \
             ! mux.",
            config.audio_device,
            u64::from(config.broadcast_audio_bitrate) * 1000,
            config.display,
            config.broadcast_video_bitrate,
            config.broadcast_preset,
        )
    });

    boxed(move |params| {
        let mut vars = screen_vars(&display, params.screen);
        vars.push(("url", params.destination.unwrap_or_default().to_string()));
        PipelineDescriptor::new(render(&template, &vars))
    })
}

/// Builder for the still-frame screencast feed.
pub fn screencast_builder(config: &CaptureConfig) -> DescriptorBuilder {
    let display = config.display.clone();
    let template = config.screencast_pipeline.clone().unwrap_or_else(|| {
        format!(
            "ximagesrc display-name={} show-pointer=true use-damage=false \
             ! video/x-raw,framerate={} \
             ! videoconvert \
             ! queue \
             ! jpegenc quality={} \
             ! appsink name=appsink",
            config.display, config.screencast_rate, config.screencast_quality,
        )
    });

    boxed(move |params| {
        PipelineDescriptor::new(render(&template, &screen_vars(&display, params.screen)))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tier(id: &str) -> VideoTier {
        VideoTier::by_id(id).unwrap()
    }

    #[test]
    fn test_tier_bitrates() {
        let small = ScreenSize::new(1280, 720, 30);
        let large = ScreenSize::new(1920, 1080, 30);

        assert_eq!(tier("hd").bitrate(small), 1_382_400);
        assert_eq!(tier("hd").bitrate(large), 3_110_400);
        assert_eq!(tier("hq").bitrate(small), 691_200);
        assert_eq!(tier("mq").bitrate(small), 460_800);
        assert_eq!(tier("lq").bitrate(small), 345_600);
        assert_eq!(tier("hd").buffer(small), 1_382);
    }

    #[test]
    fn test_tier_order() {
        let ids: Vec<_> = VIDEO_TIERS.iter().map(|t| t.id).collect();
        assert_eq!(ids, ["hd", "hq", "mq", "lq"]);
        assert!(VideoTier::by_id("uhd").is_none());
    }

    #[test]
    fn test_default_vp8_descriptor() {
        let builder = video_builder(&CaptureConfig::default(), tier("hd"));
        let descriptor = builder(&DescriptorParams::new(ScreenSize::new(1280, 720, 30)));
        let s = descriptor.as_str();

        assert!(s.starts_with("ximagesrc display-name=:99.0 show-pointer=false"));
        assert!(s.contains("framerate=25/1"));
        assert!(s.contains("vp8enc end-usage=cbr target-bitrate=1382400"));
        assert!(s.contains("keyframe-max-dist=25 min-quantizer=3 max-quantizer=32"));
        assert!(s.contains("buffer-size=8292 buffer-initial-size=5528 buffer-optimal-size=6910"));
        assert!(descriptor.has_appsink());
    }

    #[test]
    fn test_builder_reads_size_at_call_time() {
        let builder = video_builder(&CaptureConfig::default(), tier("hd"));

        let before = builder(&DescriptorParams::new(ScreenSize::new(1280, 720, 30)));
        let after = builder(&DescriptorParams::new(ScreenSize::new(1920, 1080, 60)));

        assert!(before.as_str().contains("target-bitrate=1382400"));
        assert!(after.as_str().contains("target-bitrate=3110400"));
    }

    #[test]
    fn test_h264_tier_uses_kbps() {
        let config = CaptureConfig {
            video_codec: Codec::H264,
            ..Default::default()
        };
        let descriptor = video_builder(&config, tier("hq"))(&DescriptorParams::new(
            ScreenSize::new(1280, 720, 30),
        ));

        assert!(descriptor.as_str().contains("x264enc threads=4 bitrate=691 key-int-max=25"));
    }

    #[test]
    fn test_each_video_codec_selects_its_encoder() {
        for (codec, element) in [
            (Codec::Vp8, "vp8enc "),
            (Codec::Vp9, "vp9enc "),
            (Codec::H264, "x264enc "),
        ] {
            let encoder = video_encoder(codec, 1_382_400, 1_382);
            assert!(encoder.starts_with(element), "{codec}: {encoder}");
        }
    }

    #[test]
    fn test_explicit_video_template() {
        let config = CaptureConfig {
            video_pipeline: Some(
                "ximagesrc display-name={display} ! video/x-raw,framerate={framerate}/1,width={width} \
                 ! vp8enc target-bitrate={bitrate} buffer-size={buffer_size} ! appsink name=appsink"
                    .into(),
            ),
            ..Default::default()
        };
        let descriptor = video_builder(&config, tier("lq"))(&DescriptorParams::new(
            ScreenSize::new(1280, 720, 30),
        ));

        assert_eq!(
            descriptor.as_str(),
            "ximagesrc display-name=:99.0 ! video/x-raw,framerate=5/1,width=1280 \
             ! vp8enc target-bitrate=345600 buffer-size=2070 ! appsink name=appsink"
        );
    }

    #[test]
    fn test_audio_descriptor_uses_codec_fragment() {
        let config = CaptureConfig {
            audio_codec: Codec::Pcmu,
            ..Default::default()
        };
        let descriptor = audio_builder(&config)(&DescriptorParams::new(ScreenSize::default()));

        assert!(descriptor
            .as_str()
            .starts_with("pulsesrc device=audio_output.monitor"));
        assert!(descriptor.as_str().contains("audio/x-raw, rate=8000 ! mulawenc"));
    }

    #[test]
    fn test_broadcast_url_substituted_at_build_time() {
        let builder = broadcast_builder(&CaptureConfig::default());
        let screen = ScreenSize::default();

        let first = builder(&DescriptorParams::with_destination(screen, "rtmp://a/live"));
        let second = builder(&DescriptorParams::with_destination(screen, "rtmp://b/live"));

        assert!(first
            .as_str()
            .starts_with("flvmux name=mux ! rtmpsink location='rtmp://a/live live=1'"));
        assert!(second.as_str().contains("location='rtmp://b/live live=1'"));
        assert!(first.as_str().contains("voaacenc bitrate=128000"));
        assert!(first.as_str().contains("x264enc threads=4 bitrate=4096"));
        assert!(first.as_str().contains("speed-preset=veryfast"));
    }

    #[test]
    fn test_screencast_descriptor() {
        let descriptor =
            screencast_builder(&CaptureConfig::default())(&DescriptorParams::new(ScreenSize::default()));

        assert!(descriptor.as_str().contains("framerate=10/1"));
        assert!(descriptor.as_str().contains("jpegenc quality=60"));
        assert!(descriptor.has_appsink());
    }

    #[test]
    fn test_render_single_pass() {
        let vars = [("url", "{display}".to_string()), ("display", ":0".to_string())];

        assert_eq!(render("{url} {display}", &vars), "{display} :0");
        assert_eq!(render("{unknown} {display", &vars), "{unknown} {display");
        assert_eq!(render("a{{display}}b", &vars), "a{:0}b");
    }
}
