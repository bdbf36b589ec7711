use std::path::Path;

use tracing::info;

use crate::runner::error::{Result, TaskError};
use crate::runner::HandlerContext;

const INPUT: &str = "audio.mp3";
const OUTPUT: &str = "audio-transcription.txt";
const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "m4a", "ogg", "flac", "webm", "mp4"];

pub async fn run(ctx: &HandlerContext, task: &str) -> Result<String> {
    let input = ctx.input_file(task, AUDIO_EXTENSIONS, INPUT);
    let audio = ctx.workspace.read_bytes(&input).await?;
    if audio.is_empty() {
        return Err(TaskError::InvalidArgument(format!("{input} is empty")));
    }
    let file_name = Path::new(&input)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| input.clone());

    let bytes = audio.len();
    let text = ctx.model.transcribe(&file_name, audio).await?;
    ctx.workspace.write(OUTPUT, text.trim()).await?;

    info!(handler = "transcribe_audio", %input, bytes, output = OUTPUT, "transcribed audio");
    Ok(format!("Transcribed {input} to {OUTPUT}"))
}
