//! SubRip rendering and caption burn-in.

use std::fmt::Write as _;
use std::path::Path;

use vshort_models::CaptionSegment;

use crate::command::FfmpegCommand;
use crate::error::{MediaError, MediaResult};

/// Format seconds as an SRT timestamp (`HH:MM:SS,mmm`).
pub fn format_timestamp(seconds: f64) -> String {
    let total_ms = (seconds.max(0.0) * 1000.0).round() as u64;
    let ms = total_ms % 1000;
    let total_secs = total_ms / 1000;
    format!(
        "{:02}:{:02}:{:02},{:03}",
        total_secs / 3600,
        (total_secs % 3600) / 60,
        total_secs % 60,
        ms
    )
}

/// Render caption segments as a SubRip track.
///
/// Segments with blank text are skipped and the remaining blocks are
/// numbered from 1. Malformed timing or out-of-order starts are errors, as
/// is a track with nothing left to show.
pub fn render_srt(segments: &[CaptionSegment]) -> MediaResult<String> {
    let mut out = String::new();
    let mut index = 0usize;
    let mut last_start = f64::NEG_INFINITY;

    for seg in segments {
        let text = seg.trimmed_text();
        if text.is_empty() {
            continue;
        }
        if !seg.is_well_formed() {
            return Err(MediaError::InvalidSubtitle(format!(
                "bad timing {:.3} --> {:.3}",
                seg.start, seg.end
            )));
        }
        if seg.start < last_start {
            return Err(MediaError::InvalidSubtitle(format!(
                "segment at {:.3}s starts before previous segment at {:.3}s",
                seg.start, last_start
            )));
        }
        last_start = seg.start;
        index += 1;

        // Writing to a String cannot fail
        let _ = write!(
            out,
            "{}\n{} --> {}\n{}\n\n",
            index,
            format_timestamp(seg.start),
            format_timestamp(seg.end),
            text
        );
    }

    if index == 0 {
        return Err(MediaError::InvalidSubtitle("no speech detected".to_string()));
    }
    Ok(out)
}

/// Render and write a SubRip track to `path`.
pub async fn write_srt(segments: &[CaptionSegment], path: &Path) -> MediaResult<()> {
    let srt = render_srt(segments)?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, srt).await?;
    Ok(())
}

/// Escape a path for use as a filter option inside an `-vf` filtergraph.
///
/// ffmpeg unescapes the value twice: once when splitting the graph into
/// filters and once when splitting the filter's `key=value` options.
pub fn escape_filter_path(path: &Path) -> String {
    let normalized = path.to_string_lossy().replace('\\', "/");
    let option_level = escape_chars(&normalized, &['\\', '\'', ':']);
    escape_chars(&option_level, &['\\', '\'', '[', ']', ',', ';'])
}

fn escape_chars(value: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Look of burned-in captions: large bold white text, black outline and
/// shadow, lifted off the bottom edge.
#[derive(Debug, Clone, PartialEq)]
pub struct SubtitleStyle {
    pub font_name: String,
    pub font_size: u32,
    /// ASS `&HAABBGGRR` colours
    pub primary_colour: String,
    pub outline_colour: String,
    pub back_colour: String,
    pub bold: bool,
    pub outline: u32,
    pub shadow: u32,
    pub margin_v: u32,
}

impl Default for SubtitleStyle {
    fn default() -> Self {
        Self {
            font_name: "Arial".to_string(),
            font_size: 24,
            primary_colour: "&H00FFFFFF".to_string(),
            outline_colour: "&H00000000".to_string(),
            back_colour: "&H80000000".to_string(),
            bold: true,
            outline: 2,
            shadow: 1,
            margin_v: 50,
        }
    }
}

impl SubtitleStyle {
    /// `force_style` value for the subtitles filter.
    pub fn to_force_style(&self) -> String {
        format!(
            "FontName={},FontSize={},PrimaryColour={},OutlineColour={},BackColour={},Bold={},Outline={},Shadow={},MarginV={}",
            self.font_name,
            self.font_size,
            self.primary_colour,
            self.outline_colour,
            self.back_colour,
            if self.bold { 1 } else { 0 },
            self.outline,
            self.shadow,
            self.margin_v
        )
    }
}

/// Command burning `srt` onto `clip`. Audio is passed through.
pub fn burn_command(
    clip: &Path,
    srt: &Path,
    output: &Path,
    style: &SubtitleStyle,
) -> FfmpegCommand {
    let filter = format!(
        "subtitles={}:force_style='{}'",
        escape_filter_path(srt),
        style.to_force_style()
    );
    FfmpegCommand::new(clip, output)
        .video_filter(filter)
        .audio_codec("copy")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(0.0), "00:00:00,000");
        assert_eq!(format_timestamp(1.5), "00:00:01,500");
        assert_eq!(format_timestamp(61.0), "00:01:01,000");
        assert_eq!(format_timestamp(3723.456), "01:02:03,456");
        assert_eq!(format_timestamp(59.9996), "00:01:00,000");
        assert_eq!(format_timestamp(-2.0), "00:00:00,000");
    }

    #[test]
    fn test_render_srt_blocks() {
        let segments = vec![
            CaptionSegment::new(0.0, 1.5, " Hello there "),
            CaptionSegment::new(1.5, 3.25, "General Kenobi"),
        ];
        let srt = render_srt(&segments).unwrap();
        assert_eq!(
            srt,
            "1\n00:00:00,000 --> 00:00:01,500\nHello there\n\n\
             2\n00:00:01,500 --> 00:00:03,250\nGeneral Kenobi\n\n"
        );
    }

    #[test]
    fn test_blank_segments_skipped() {
        let segments = vec![
            CaptionSegment::new(0.0, 1.0, "   "),
            CaptionSegment::new(1.0, 2.0, "kept"),
        ];
        let srt = render_srt(&segments).unwrap();
        assert!(srt.starts_with("1\n00:00:01,000"));
    }

    #[test]
    fn test_rejects_bad_tracks() {
        assert!(matches!(render_srt(&[]), Err(MediaError::InvalidSubtitle(_))));
        assert!(render_srt(&[CaptionSegment::new(2.0, 1.0, "backwards")]).is_err());
        assert!(render_srt(&[
            CaptionSegment::new(5.0, 6.0, "late"),
            CaptionSegment::new(1.0, 2.0, "early"),
        ])
        .is_err());
    }

    #[test]
    fn test_escape_filter_path() {
        assert_eq!(
            escape_filter_path(Path::new("/work/a:b/it's,[x].srt")),
            r"/work/a\\:b/it\\\'s\,\[x\].srt"
        );
    }

    #[test]
    fn test_escape_colon_in_work_dir() {
        assert_eq!(
            escape_filter_path(Path::new("/srv/vshort:work/abc/output/talk_part01.srt")),
            r"/srv/vshort\\:work/abc/output/talk_part01.srt"
        );
        assert_eq!(
            escape_filter_path(Path::new(r"C:\work\a.srt")),
            r"C\\:/work/a.srt"
        );
    }

    #[test]
    fn test_burn_command_escapes_srt_path() {
        let cmd = burn_command(
            Path::new("clips/a_part01.mp4"),
            Path::new("/data/2024:run/output/a_part01.srt"),
            Path::new("/data/2024:run/output/a_part01_captioned.mp4"),
            &SubtitleStyle::default(),
        );
        let args = cmd.build_args();
        let vf = args.iter().position(|a| a == "-vf").unwrap();
        assert!(args[vf + 1].starts_with(r"subtitles=/data/2024\\:run/output/a_part01.srt:force_style='"));
    }

    #[test]
    fn test_burn_command_filter() {
        let cmd = burn_command(
            Path::new("clips/talk_part01.mp4"),
            Path::new("output/talk_part01.srt"),
            Path::new("output/talk_part01_captioned.mp4"),
            &SubtitleStyle::default(),
        );
        let args = cmd.build_args();
        let vf = args.iter().position(|a| a == "-vf").unwrap();
        assert_eq!(
            args[vf + 1],
            "subtitles=output/talk_part01.srt:force_style='FontName=Arial,FontSize=24,\
             PrimaryColour=&H00FFFFFF,OutlineColour=&H00000000,BackColour=&H80000000,\
             Bold=1,Outline=2,Shadow=1,MarginV=50'"
        );
        assert!(args.windows(2).any(|w| w == ["-c:a", "copy"]));
    }

    #[tokio::test]
    async fn test_write_srt() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("output").join("clip.srt");
        write_srt(&[CaptionSegment::new(0.0, 1.0, "hi")], &path)
            .await
            .unwrap();
        let content = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(content.starts_with("1\n00:00:00,000 --> 00:00:01,000\nhi"));
    }
}
