use std::io::Cursor;

use image::imageops::FilterType;
use image::{DynamicImage, ImageOutputFormat};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::info;

use crate::runner::error::{Result, TaskError};
use crate::runner::HandlerContext;

const INPUT: &str = "image.png";
const OUTPUT: &str = "image-resized.png";
const MAX_OUTPUT_PIXELS: u64 = 8192 * 8192;
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp", "webp"];

static DIMENSIONS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d+)\s*[x×]\s*(\d+)\b").expect("valid dimensions regex"));
static PERCENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+(?:\.\d+)?)\s*%").expect("valid percent regex"));
static WIDTH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bwidth\s*(?:of|to|=|:)?\s*(\d+)").expect("valid width regex")
});
static HEIGHT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bheight\s*(?:of|to|=|:)?\s*(\d+)").expect("valid height regex")
});

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResizeSpec {
    Exact(u32, u32),
    Width(u32),
    Height(u32),
    Percent(f64),
}

fn capture_u32(re: &Regex, task: &str) -> Option<u32> {
    re.captures(task).and_then(|c| c[1].parse().ok())
}

pub fn parse_spec(task: &str) -> Option<ResizeSpec> {
    if let Some(c) = DIMENSIONS_RE.captures(task) {
        if let (Ok(w), Ok(h)) = (c[1].parse(), c[2].parse()) {
            return Some(ResizeSpec::Exact(w, h));
        }
    }
    match (capture_u32(&WIDTH_RE, task), capture_u32(&HEIGHT_RE, task)) {
        (Some(w), Some(h)) => return Some(ResizeSpec::Exact(w, h)),
        (Some(w), None) => return Some(ResizeSpec::Width(w)),
        (None, Some(h)) => return Some(ResizeSpec::Height(h)),
        (None, None) => {}
    }
    PERCENT_RE
        .captures(task)
        .and_then(|c| c[1].parse().ok())
        .map(ResizeSpec::Percent)
}

/// Target size; single-dimension and percentage specs keep the aspect ratio.
pub fn target_size(spec: ResizeSpec, width: u32, height: u32) -> (u32, u32) {
    let scale = |v: u32, f: f64| ((v as f64 * f).round() as u32).max(1);
    match spec {
        ResizeSpec::Exact(w, h) => (w, h),
        ResizeSpec::Width(w) => (w, scale(height, w as f64 / width.max(1) as f64)),
        ResizeSpec::Height(h) => (scale(width, h as f64 / height.max(1) as f64), h),
        ResizeSpec::Percent(p) => (scale(width, p / 100.0), scale(height, p / 100.0)),
    }
}

fn resize_png(bytes: &[u8], spec: ResizeSpec) -> Result<(Vec<u8>, (u32, u32))> {
    let img = image::load_from_memory(bytes)
        .map_err(|e| TaskError::InvalidArgument(format!("cannot decode image: {e}")))?;
    let (w, h) = target_size(spec, img.width(), img.height());
    if w == 0 || h == 0 {
        return Err(TaskError::InvalidArgument("target size must be positive".to_string()));
    }
    if u64::from(w) * u64::from(h) > MAX_OUTPUT_PIXELS {
        return Err(TaskError::InvalidArgument(format!(
            "target size {w}x{h} exceeds the {MAX_OUTPUT_PIXELS} pixel limit"
        )));
    }
    let resized: DynamicImage = img.resize_exact(w, h, FilterType::Lanczos3);

    let mut out = Cursor::new(Vec::new());
    resized
        .write_to(&mut out, ImageOutputFormat::Png)
        .map_err(|e| TaskError::Upstream(format!("cannot encode png: {e}")))?;
    Ok((out.into_inner(), (w, h)))
}

pub async fn run(ctx: &HandlerContext, task: &str) -> Result<String> {
    let spec = parse_spec(task).ok_or_else(|| {
        TaskError::InvalidArgument("task must give a size such as 200x100, width 200 or 50%".to_string())
    })?;
    let input = ctx.input_file(task, IMAGE_EXTENSIONS, INPUT);
    let bytes = ctx.workspace.read_bytes(&input).await?;

    let (png, (w, h)) = tokio::task::spawn_blocking(move || resize_png(&bytes, spec))
        .await
        .map_err(|e| TaskError::Upstream(format!("resize task failed: {e}")))??;
    ctx.workspace.write(OUTPUT, &png).await?;

    info!(handler = "resize_image", %input, width = w, height = h, output = OUTPUT, "resized image");
    Ok(format!("Resized {input} to {w}x{h}; wrote {OUTPUT}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::testing::{context, ScriptedModel};
    use image::{ImageBuffer, Rgb};

    #[test]
    fn parses_size_forms() {
        assert_eq!(parse_spec("Resize image.png to 100x50"), Some(ResizeSpec::Exact(100, 50)));
        assert_eq!(parse_spec("make it width 300"), Some(ResizeSpec::Width(300)));
        assert_eq!(
            parse_spec("set width to 30 and height: 20"),
            Some(ResizeSpec::Exact(30, 20))
        );
        assert_eq!(parse_spec("shrink to 25%"), Some(ResizeSpec::Percent(25.0)));
        assert_eq!(parse_spec("make it smaller"), None);
    }

    #[test]
    fn aspect_ratio_is_kept_for_single_dimension() {
        assert_eq!(target_size(ResizeSpec::Width(50), 200, 100), (50, 25));
        assert_eq!(target_size(ResizeSpec::Height(10), 200, 100), (20, 10));
        assert_eq!(target_size(ResizeSpec::Percent(50.0), 201, 100), (101, 50));
    }

    #[tokio::test]
    async fn writes_resized_png() {
        let dir = tempfile::tempdir().unwrap();
        let img: ImageBuffer<Rgb<u8>, Vec<u8>> = ImageBuffer::from_pixel(40, 20, Rgb([10, 20, 30]));
        img.save(dir.path().join("photo.png")).unwrap();
        let ctx = context(dir.path(), ScriptedModel::new(Vec::<String>::new()));

        run(&ctx, "Resize /data/photo.png to 50%").await.unwrap();

        let out = image::open(dir.path().join(OUTPUT)).unwrap();
        assert_eq!((out.width(), out.height()), (20, 10));
    }

    #[tokio::test]
    async fn oversized_target_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let img: ImageBuffer<Rgb<u8>, Vec<u8>> = ImageBuffer::from_pixel(4, 4, Rgb([0, 0, 0]));
        img.save(dir.path().join(INPUT)).unwrap();
        let ctx = context(dir.path(), ScriptedModel::new(Vec::<String>::new()));

        assert!(matches!(
            run(&ctx, "Resize image.png to 100000x100000").await,
            Err(TaskError::InvalidArgument(_))
        ));
        assert!(matches!(
            run(&ctx, "Resize image.png to 2000000%").await,
            Err(TaskError::InvalidArgument(_))
        ));
        assert!(!dir.path().join(OUTPUT).exists());
    }

    #[tokio::test]
    async fn missing_size_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), ScriptedModel::new(Vec::<String>::new()));
        assert!(matches!(
            run(&ctx, "Resize the image").await,
            Err(TaskError::InvalidArgument(_))
        ));
    }
}
